#![allow(dead_code)]

use persistsql_core::{
    open_db_in_memory, ColumnDef, ColumnType, Common, DbError, DbResult, ModelSchema, OnDelete,
    Query, Resource, ResourceId, SqlPersistence,
};
use rusqlite::types::Value;
use rusqlite::Row;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Widget {
    pub common: Common,
    pub name: String,
    pub color: Option<String>,
    pub weight: i64,
}

impl Widget {
    pub fn new(name: &str) -> Self {
        Self {
            common: Common::new(),
            name: name.to_string(),
            color: Some("blue".to_string()),
            weight: 7,
        }
    }
}

impl Resource for Widget {
    const SCHEMA: ModelSchema = ModelSchema::new(
        "widgets",
        &[
            ColumnDef::new("name", ColumnType::Text).not_null(),
            ColumnDef::new("color", ColumnType::Text),
            ColumnDef::new("weight", ColumnType::Integer)
                .not_null()
                .default_sql("0"),
        ],
    );

    fn common(&self) -> &Common {
        &self.common
    }

    fn common_mut(&mut self) -> &mut Common {
        &mut self.common
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::Text(self.name.clone())),
            ("color", Value::from(self.color.clone())),
            ("weight", Value::Integer(self.weight)),
        ]
    }

    fn from_row(common: Common, row: &Row<'_>) -> DbResult<Self> {
        Ok(Self {
            common,
            name: row.get("name")?,
            color: row.get("color")?,
            weight: row.get("weight")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub common: Common,
    pub widget_id: ResourceId,
    pub label: String,
}

impl Part {
    pub fn new(widget_id: ResourceId, label: &str) -> Self {
        Self {
            common: Common::new(),
            widget_id,
            label: label.to_string(),
        }
    }
}

impl Resource for Part {
    const SCHEMA: ModelSchema = ModelSchema::new(
        "parts",
        &[
            ColumnDef::new("widget_id", ColumnType::Uuid)
                .not_null()
                .references("widgets", OnDelete::Cascade),
            ColumnDef::new("label", ColumnType::Text).not_null().unique(),
        ],
    );

    fn common(&self) -> &Common {
        &self.common
    }

    fn common_mut(&mut self) -> &mut Common {
        &mut self.common
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("widget_id", Value::Text(self.widget_id.to_string())),
            ("label", Value::Text(self.label.clone())),
        ]
    }

    fn from_row(common: Common, row: &Row<'_>) -> DbResult<Self> {
        let widget_text: String = row.get("widget_id")?;
        let widget_id = Uuid::parse_str(&widget_text).map_err(|_| {
            DbError::InvalidData(format!("invalid uuid `{widget_text}` in parts.widget_id"))
        })?;
        Ok(Self {
            common,
            widget_id,
            label: row.get("label")?,
        })
    }
}

/// In-memory façade with both fixture tables provisioned.
pub fn provisioned() -> SqlPersistence {
    let persistence = SqlPersistence::new(open_db_in_memory().unwrap()).unwrap();
    persistence
        .create_tables(&[Widget::SCHEMA, Part::SCHEMA], &[])
        .unwrap();
    persistence
}

pub fn by_id(id: ResourceId) -> impl Fn(&mut Query) {
    move |query: &mut Query| {
        query.where_pk(id);
    }
}

pub fn table_exists(persistence: &SqlPersistence, table: &str) -> bool {
    sqlite_object_exists(persistence, "table", table)
}

pub fn index_exists(persistence: &SqlPersistence, index: &str) -> bool {
    sqlite_object_exists(persistence, "index", index)
}

fn sqlite_object_exists(persistence: &SqlPersistence, kind: &str, name: &str) -> bool {
    persistence.with_connection(|conn| {
        conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            );",
            [kind, name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    })
}

pub fn row_count(persistence: &SqlPersistence, table: &str) -> i64 {
    persistence.with_connection(|conn| {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
            row.get(0)
        })
        .unwrap()
    })
}

/// Every stored column of one widget, straight from SQLite.
pub type RawWidgetRow = (
    String,
    i64,
    i64,
    Option<i64>,
    i64,
    String,
    Option<String>,
    i64,
);

pub fn raw_widget(persistence: &SqlPersistence, id: ResourceId) -> RawWidgetRow {
    persistence.with_connection(|conn| {
        conn.query_row(
            "SELECT id, create_time, update_time, delete_time, version, name, color, weight
             FROM widgets
             WHERE id = ?1;",
            [id.to_string()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )
        .unwrap()
    })
}
