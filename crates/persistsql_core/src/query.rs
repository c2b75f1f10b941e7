//! Query specification handed to caller hooks.
//!
//! # Responsibility
//! - Collect visibility, predicates, update columns and read shaping for
//!   one statement against one model table.
//! - Render the collected specification into SQL plus positional params.
//!
//! # Invariants
//! - Building a `Query` never touches the database; only the façade
//!   executes rendered statements.
//! - Column names passed to builder methods are checked against the model
//!   schema; the first invalid one fails the statement at execution time.
//! - Ordering, limit and offset only affect reads.

use crate::db::{DbError, DbResult, ModelSchema};
use crate::model::common::{ResourceId, DELETE_TIME_COLUMN, ID_COLUMN, VERSION_COLUMN};
use rusqlite::types::Value;

/// Caller-supplied customization run on a query before it executes.
pub type QueryHook<'a> = &'a dyn Fn(&mut Query);

/// SQL expression for the database clock in epoch milliseconds.
///
/// SQLite evaluates `'now'` once per statement, so every use inside one
/// statement yields the same value.
pub(crate) const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

/// Which rows a query may see with respect to soft deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Only rows whose `delete_time` is null.
    #[default]
    Active,
    /// Active and soft-deleted rows.
    WithDeleted,
    /// Only soft-deleted rows.
    DeletedOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Predicate {
    sql: String,
    params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Defect {
    UnknownColumn(String),
    InvalidValue(String),
}

/// Right-hand side of one `SET` assignment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SetValue {
    Now,
    Null,
    Param(Value),
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Rendered {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Mutable statement specification for one model table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    schema: ModelSchema,
    visibility: Visibility,
    predicates: Vec<Predicate>,
    columns: Vec<String>,
    order_by: Vec<(String, Order)>,
    limit: Option<u32>,
    offset: u32,
    increment_version: bool,
    defect: Option<Defect>,
}

impl Query {
    pub(crate) fn new(schema: ModelSchema) -> Self {
        Self {
            schema,
            visibility: Visibility::Active,
            predicates: Vec::new(),
            columns: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            increment_version: false,
            defect: None,
        }
    }

    pub fn table(&self) -> &'static str {
        self.schema.table
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Columns an update will write, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    pub fn row_limit(&self) -> Option<u32> {
        self.limit
    }

    /// Lifts the soft-delete filter entirely.
    pub fn all_with_deleted(&mut self) -> &mut Self {
        self.visibility = Visibility::WithDeleted;
        self
    }

    /// Restricts the query to soft-deleted rows.
    pub fn deleted(&mut self) -> &mut Self {
        self.visibility = Visibility::DeletedOnly;
        self
    }

    pub fn where_pk(&mut self, id: ResourceId) -> &mut Self {
        self.push_predicate(format!("{ID_COLUMN} = ?"), vec![Value::Text(id.to_string())])
    }

    pub fn where_eq(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        if self.check_column(column) {
            self.push_predicate(format!("{column} = ?"), vec![value.into()]);
        }
        self
    }

    /// Adds a raw predicate with `?` placeholders.
    ///
    /// The text is used verbatim; callers own its safety.
    pub fn where_expr(
        &mut self,
        sql: impl Into<String>,
        params: impl IntoIterator<Item = Value>,
    ) -> &mut Self {
        self.push_predicate(sql.into(), params.into_iter().collect())
    }

    /// Matches only the row revision `expected`.
    pub fn where_version(&mut self, expected: u64) -> &mut Self {
        match i64::try_from(expected) {
            Ok(version) => {
                self.push_predicate(format!("{VERSION_COLUMN} = ?"), vec![Value::Integer(version)])
            }
            Err(_) => {
                self.record(Defect::InvalidValue(format!(
                    "version {expected} does not fit a column"
                )));
                self
            }
        }
    }

    /// Adds a column to the update's `SET` list; duplicates are ignored.
    pub fn column(&mut self, name: &str) -> &mut Self {
        if self.check_column(name) && !self.columns.iter().any(|column| column == name) {
            self.columns.push(name.to_string());
        }
        self
    }

    /// Makes writes bump `version` by one.
    pub fn increment_version(&mut self) -> &mut Self {
        self.increment_version = true;
        self
    }

    pub fn order_by(&mut self, column: &str, order: Order) -> &mut Self {
        if self.check_column(column) {
            self.order_by.push((column.to_string(), order));
        }
        self
    }

    pub fn limit(&mut self, limit: u32) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u32) -> &mut Self {
        self.offset = offset;
        self
    }

    pub(crate) fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    pub(crate) fn render_select(&self) -> DbResult<Rendered> {
        self.ensure_valid()?;

        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM {}", self.schema.table);
        self.push_where(&mut sql, &mut params);

        if !self.order_by.is_empty() {
            let terms = self
                .order_by
                .iter()
                .map(|(column, order)| format!("{column} {}", order.sql()))
                .collect::<Vec<_>>();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(i64::from(limit)));
            if self.offset > 0 {
                sql.push_str(" OFFSET ?");
                params.push(Value::Integer(i64::from(self.offset)));
            }
        } else if self.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(Value::Integer(i64::from(self.offset)));
        }

        Ok(Rendered { sql, params })
    }

    /// Renders `UPDATE ... SET ... WHERE ... RETURNING *`.
    pub(crate) fn render_update(&self, assignments: &[(&str, SetValue)]) -> DbResult<Rendered> {
        self.ensure_valid()?;

        let mut params = Vec::new();
        let mut sets = Vec::with_capacity(assignments.len() + 1);
        for (column, value) in assignments {
            match value {
                SetValue::Now => sets.push(format!("{column} = {NOW_MS_SQL}")),
                SetValue::Null => sets.push(format!("{column} = NULL")),
                SetValue::Param(value) => {
                    sets.push(format!("{column} = ?"));
                    params.push(value.clone());
                }
            }
        }
        if self.increment_version {
            sets.push(format!("{VERSION_COLUMN} = {VERSION_COLUMN} + 1"));
        }

        let mut sql = format!("UPDATE {} SET {}", self.schema.table, sets.join(", "));
        self.push_where(&mut sql, &mut params);
        sql.push_str(" RETURNING *");

        Ok(Rendered { sql, params })
    }

    fn push_where(&self, sql: &mut String, params: &mut Vec<Value>) {
        let mut clauses = Vec::with_capacity(self.predicates.len() + 1);
        match self.visibility {
            Visibility::Active => clauses.push(format!("{DELETE_TIME_COLUMN} IS NULL")),
            Visibility::WithDeleted => {}
            Visibility::DeletedOnly => clauses.push(format!("{DELETE_TIME_COLUMN} IS NOT NULL")),
        }
        for predicate in &self.predicates {
            clauses.push(format!("({})", predicate.sql));
            params.extend(predicate.params.iter().cloned());
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
    }

    fn push_predicate(&mut self, sql: String, params: Vec<Value>) -> &mut Self {
        self.predicates.push(Predicate { sql, params });
        self
    }

    fn check_column(&mut self, column: &str) -> bool {
        if self.schema.has_column(column) {
            return true;
        }
        self.record(Defect::UnknownColumn(column.to_string()));
        false
    }

    fn record(&mut self, defect: Defect) {
        if self.defect.is_none() {
            self.defect = Some(defect);
        }
    }

    fn ensure_valid(&self) -> DbResult<()> {
        match &self.defect {
            None => Ok(()),
            Some(Defect::UnknownColumn(column)) => Err(DbError::UnknownColumn {
                table: self.schema.table,
                column: column.clone(),
            }),
            Some(Defect::InvalidValue(message)) => Err(DbError::InvalidData(message.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Order, Query, SetValue, Visibility};
    use crate::db::{ColumnDef, ColumnType, DbError, ModelSchema};
    use rusqlite::types::Value;
    use uuid::Uuid;

    const BOOKS: ModelSchema = ModelSchema::new(
        "books",
        &[
            ColumnDef::new("title", ColumnType::Text).not_null(),
            ColumnDef::new("pages", ColumnType::Integer),
        ],
    );

    #[test]
    fn select_defaults_to_active_rows() {
        let rendered = Query::new(BOOKS).render_select().unwrap();
        assert_eq!(rendered.sql, "SELECT * FROM books WHERE delete_time IS NULL");
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn select_with_deleted_has_no_filter() {
        let mut query = Query::new(BOOKS);
        query.all_with_deleted();
        assert_eq!(query.visibility(), Visibility::WithDeleted);
        assert_eq!(query.render_select().unwrap().sql, "SELECT * FROM books");
    }

    #[test]
    fn select_renders_predicates_order_and_paging() {
        let id = Uuid::new_v4();
        let mut query = Query::new(BOOKS);
        query
            .where_pk(id)
            .where_eq("pages", 10_i64)
            .order_by("title", Order::Desc)
            .limit(5)
            .offset(2);

        let rendered = query.render_select().unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT * FROM books WHERE delete_time IS NULL AND (id = ?) AND (pages = ?) \
             ORDER BY title DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            rendered.params,
            vec![
                Value::Text(id.to_string()),
                Value::Integer(10),
                Value::Integer(5),
                Value::Integer(2),
            ]
        );
    }

    #[test]
    fn offset_without_limit_uses_unbounded_limit() {
        let mut query = Query::new(BOOKS);
        query.offset(3);
        assert!(query.render_select().unwrap().sql.ends_with("LIMIT -1 OFFSET ?"));
    }

    #[test]
    fn update_puts_set_params_before_where_params() {
        let id = Uuid::new_v4();
        let mut query = Query::new(BOOKS);
        query.where_pk(id).increment_version();

        let rendered = query
            .render_update(&[
                ("update_time", SetValue::Now),
                ("title", SetValue::Param(Value::Text("Dune".to_string()))),
            ])
            .unwrap();

        assert!(rendered.sql.starts_with("UPDATE books SET update_time = CAST("));
        assert!(rendered
            .sql
            .ends_with("title = ?, version = version + 1 WHERE delete_time IS NULL AND (id = ?) RETURNING *"));
        assert_eq!(
            rendered.params,
            vec![Value::Text("Dune".to_string()), Value::Text(id.to_string())]
        );
    }

    #[test]
    fn deleted_only_visibility_renders_not_null_filter() {
        let mut query = Query::new(BOOKS);
        query.deleted();
        let rendered = query
            .render_update(&[("delete_time", SetValue::Null)])
            .unwrap();
        assert_eq!(
            rendered.sql,
            "UPDATE books SET delete_time = NULL WHERE delete_time IS NOT NULL RETURNING *"
        );
    }

    #[test]
    fn unknown_columns_fail_at_render_time() {
        let mut query = Query::new(BOOKS);
        query.column("title").column("author").where_eq("isbn", 1_i64);

        assert_eq!(query.columns(), ["title".to_string()]);
        match query.render_select() {
            Err(DbError::UnknownColumn { table, column }) => {
                assert_eq!(table, "books");
                assert_eq!(column, "author");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn column_ignores_duplicates() {
        let mut query = Query::new(BOOKS);
        query.column("title").column("title").column("pages");
        assert_eq!(query.columns(), ["title".to_string(), "pages".to_string()]);
    }
}
