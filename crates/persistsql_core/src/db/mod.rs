//! SQLite connection bootstrap and schema definition types.
//!
//! # Responsibility
//! - Open and configure SQLite connections handed to the persistence layer.
//! - Describe model tables so they can be provisioned idempotently.
//!
//! # Invariants
//! - Returned connections honor the configured `foreign_keys` pragma.
//! - Identifiers rendered into SQL are validated before use.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;
pub mod schema;

pub use open::{open_db, open_db_in_memory, open_with_config};
pub use schema::{ColumnDef, ColumnType, ModelSchema, OnDelete, RawStatement};

pub type DbResult<T> = Result<T, DbError>;

/// Low-level storage error shared by bootstrap, schema and row decoding.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Column is not part of the model schema.
    UnknownColumn {
        table: &'static str,
        column: String,
    },
    /// Column exists but must never be rewritten after insert.
    ImmutableColumn {
        table: &'static str,
        column: String,
    },
    /// Table or column name is not a plain SQL identifier.
    InvalidIdentifier(String),
    /// Persisted data cannot be decoded into the model.
    InvalidData(String),
}

impl DbError {
    /// Returns whether the failure came from an interrupted statement.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::OperationInterrupted
        )
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnknownColumn { table, column } => {
                write!(f, "unknown column `{column}` for table `{table}`")
            }
            Self::ImmutableColumn { table, column } => {
                write!(f, "column `{column}` of table `{table}` cannot be updated")
            }
            Self::InvalidIdentifier(name) => write!(f, "invalid SQL identifier `{name}`"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnknownColumn { .. } => None,
            Self::ImmutableColumn { .. } => None,
            Self::InvalidIdentifier(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
