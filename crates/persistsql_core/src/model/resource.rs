//! Capability contract for persisted row types.
//!
//! A resource holds a `Common` value plus its own fields, maps to exactly
//! one table described by `SCHEMA`, and knows how to turn itself into
//! column values and back.

use crate::db::{DbResult, ModelSchema};
use crate::model::common::{Common, ResourceId};
use rusqlite::types::Value;
use rusqlite::Row;

/// Row type the persistence façade can store.
///
/// # Contract
/// - `column_values` returns one entry per column in `SCHEMA.columns`,
///   excluding the envelope columns.
/// - `from_row` receives a full row (`SELECT *`/`RETURNING *`) whose
///   envelope has already been decoded into `common`.
pub trait Resource: Sized {
    const SCHEMA: ModelSchema;

    fn common(&self) -> &Common;

    fn common_mut(&mut self) -> &mut Common;

    fn column_values(&self) -> Vec<(&'static str, Value)>;

    fn from_row(common: Common, row: &Row<'_>) -> DbResult<Self>;

    fn id(&self) -> ResourceId {
        self.common().id
    }

    fn table() -> &'static str {
        Self::SCHEMA.table
    }

    fn is_deleted(&self) -> bool {
        self.common().is_deleted()
    }
}

/// Decodes a full row into `R`.
pub(crate) fn decode_row<R: Resource>(row: &Row<'_>) -> DbResult<R> {
    let common = Common::from_row(row)?;
    R::from_row(common, row)
}
