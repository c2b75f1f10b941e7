//! Table definitions for idempotent provisioning.
//!
//! # Responsibility
//! - Describe a model table as const data next to the model type.
//! - Render `CREATE TABLE IF NOT EXISTS` statements including the
//!   `Common` envelope columns and foreign-key constraints.
//!
//! # Invariants
//! - Envelope columns always come first, in a fixed order.
//! - Every rendered identifier matches `^[A-Za-z_][A-Za-z0-9_]*$`.

use super::{DbError, DbResult};
use crate::model::common::{
    COMMON_COLUMNS, CREATE_TIME_COLUMN, DELETE_TIME_COLUMN, ID_COLUMN, UPDATE_TIME_COLUMN,
    VERSION_COLUMN,
};
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Storage class for a resource column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
    /// Stored as `0`/`1`.
    Boolean,
    /// Stored as hyphenated text, like the envelope `id`.
    Uuid,
    /// Stored as epoch milliseconds.
    Timestamp,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            Self::Text | Self::Uuid => "TEXT",
            Self::Integer | Self::Boolean | Self::Timestamp => "INTEGER",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
        }
    }
}

/// Referential action applied when the referenced row is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

impl OnDelete {
    fn sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
        }
    }
}

/// Foreign key from a column to another model's `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub on_delete: OnDelete,
}

/// One resource-specific column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnType,
    pub not_null: bool,
    pub unique: bool,
    /// Raw SQL default expression, e.g. `'draft'` or `0`.
    pub default: Option<&'static str>,
    pub references: Option<ForeignKey>,
}

impl ColumnDef {
    pub const fn new(name: &'static str, kind: ColumnType) -> Self {
        Self {
            name,
            kind,
            not_null: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub const fn not_null(self) -> Self {
        Self {
            not_null: true,
            ..self
        }
    }

    pub const fn unique(self) -> Self {
        Self {
            unique: true,
            ..self
        }
    }

    pub const fn default_sql(self, expression: &'static str) -> Self {
        Self {
            default: Some(expression),
            ..self
        }
    }

    pub const fn references(self, table: &'static str, on_delete: OnDelete) -> Self {
        Self {
            references: Some(ForeignKey { table, on_delete }),
            ..self
        }
    }

    fn definition_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.kind.sql());
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Table mapping for one resource type.
///
/// The `Common` envelope columns are implied and must not be repeated in
/// `columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSchema {
    pub table: &'static str,
    pub columns: &'static [ColumnDef],
}

impl ModelSchema {
    pub const fn new(table: &'static str, columns: &'static [ColumnDef]) -> Self {
        Self { table, columns }
    }

    /// Returns every column name, envelope columns first.
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        COMMON_COLUMNS
            .iter()
            .copied()
            .chain(self.columns.iter().map(|column| column.name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_names().any(|column| column == name)
    }

    /// Checks identifiers and rejects columns that shadow the envelope.
    pub fn validate(&self) -> DbResult<()> {
        ensure_identifier(self.table)?;
        for column in self.columns {
            ensure_identifier(column.name)?;
            if COMMON_COLUMNS.contains(&column.name) {
                return Err(DbError::InvalidData(format!(
                    "table `{}` redefines envelope column `{}`",
                    self.table, column.name
                )));
            }
            if let Some(fk) = column.references {
                ensure_identifier(fk.table)?;
            }
        }
        Ok(())
    }

    /// Renders the idempotent DDL for this table.
    pub fn create_table_sql(&self) -> DbResult<String> {
        self.validate()?;

        let mut definitions = vec![
            format!("{ID_COLUMN} TEXT PRIMARY KEY NOT NULL"),
            format!("{CREATE_TIME_COLUMN} INTEGER NOT NULL"),
            format!("{UPDATE_TIME_COLUMN} INTEGER NOT NULL"),
            format!("{DELETE_TIME_COLUMN} INTEGER"),
            format!("{VERSION_COLUMN} INTEGER NOT NULL DEFAULT 1"),
        ];
        definitions.extend(self.columns.iter().map(ColumnDef::definition_sql));
        definitions.extend(self.columns.iter().filter_map(|column| {
            column.references.map(|fk| {
                format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({ID_COLUMN}) ON DELETE {}",
                    column.name,
                    fk.table,
                    fk.on_delete.sql()
                )
            })
        }));

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            self.table,
            definitions.join(",\n    ")
        ))
    }
}

/// Literal statement run after table creation.
///
/// The text is executed verbatim; no escaping happens here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatement {
    pub sql: String,
    /// When `true`, a failure is logged and provisioning continues.
    pub err_ok: bool,
}

impl RawStatement {
    /// Statement whose failure aborts provisioning.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            err_ok: false,
        }
    }

    /// Statement whose failure is tolerated.
    pub fn tolerant(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            err_ok: true,
        }
    }
}

pub(crate) fn ensure_identifier(name: &str) -> DbResult<()> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnDef, ColumnType, ModelSchema, OnDelete};
    use crate::db::DbError;

    const OWNERS: ModelSchema = ModelSchema::new(
        "owners",
        &[ColumnDef::new("name", ColumnType::Text).not_null().unique()],
    );

    const PETS: ModelSchema = ModelSchema::new(
        "pets",
        &[
            ColumnDef::new("owner_id", ColumnType::Uuid)
                .not_null()
                .references("owners", OnDelete::Cascade),
            ColumnDef::new("legs", ColumnType::Integer).default_sql("4"),
        ],
    );

    #[test]
    fn create_table_sql_puts_envelope_columns_first() {
        let sql = OWNERS.create_table_sql().unwrap();

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS owners ("));
        let id_pos = sql.find("id TEXT PRIMARY KEY").unwrap();
        let name_pos = sql.find("name TEXT NOT NULL UNIQUE").unwrap();
        assert!(id_pos < name_pos);
        assert!(sql.contains("delete_time INTEGER,"));
        assert!(sql.contains("version INTEGER NOT NULL DEFAULT 1"));
    }

    #[test]
    fn create_table_sql_renders_foreign_keys_and_defaults() {
        let sql = PETS.create_table_sql().unwrap();

        assert!(sql.contains("legs INTEGER DEFAULT 4"));
        assert!(sql.contains("FOREIGN KEY (owner_id) REFERENCES owners (id) ON DELETE CASCADE"));
    }

    #[test]
    fn validate_rejects_bad_identifiers() {
        let schema = ModelSchema::new("bad table", &[]);
        assert!(matches!(
            schema.create_table_sql(),
            Err(DbError::InvalidIdentifier(name)) if name == "bad table"
        ));
    }

    #[test]
    fn validate_rejects_envelope_shadowing() {
        const SHADOW: ModelSchema =
            ModelSchema::new("shadow", &[ColumnDef::new("version", ColumnType::Text)]);
        assert!(matches!(SHADOW.validate(), Err(DbError::InvalidData(_))));
    }

    #[test]
    fn has_column_covers_envelope_and_model_columns() {
        assert!(PETS.has_column("id"));
        assert!(PETS.has_column("delete_time"));
        assert!(PETS.has_column("owner_id"));
        assert!(!PETS.has_column("name"));
    }
}
