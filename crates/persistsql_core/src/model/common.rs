//! Envelope fields carried by every resource row.
//!
//! # Invariants
//! - `id` is never nil and never changes after insert.
//! - `create_time` is written once; `update_time` moves on every update.
//! - `delete_time == None` means the row is active.
//! - `version` starts at 1 and only grows.

use crate::db::{DbError, DbResult};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Primary key of every resource table.
pub type ResourceId = Uuid;

pub const ID_COLUMN: &str = "id";
pub const CREATE_TIME_COLUMN: &str = "create_time";
pub const UPDATE_TIME_COLUMN: &str = "update_time";
pub const DELETE_TIME_COLUMN: &str = "delete_time";
pub const VERSION_COLUMN: &str = "version";

/// Envelope columns in table order.
pub const COMMON_COLUMNS: &[&str] = &[
    ID_COLUMN,
    CREATE_TIME_COLUMN,
    UPDATE_TIME_COLUMN,
    DELETE_TIME_COLUMN,
    VERSION_COLUMN,
];

/// Validation failures for envelope values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonValidationError {
    NilId,
    ZeroVersion,
}

impl Display for CommonValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "resource id cannot be nil"),
            Self::ZeroVersion => write!(f, "resource version must start at 1"),
        }
    }
}

impl Error for CommonValidationError {}

/// Identity, timestamps and version shared by all resources.
///
/// Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Common {
    pub id: ResourceId,
    pub create_time: i64,
    pub update_time: i64,
    /// Soft-delete tombstone.
    pub delete_time: Option<i64>,
    /// Counter for optimistic concurrency checks.
    pub version: u64,
}

impl Common {
    /// Creates an active envelope with a fresh v4 id.
    pub fn new() -> Self {
        let now = now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            create_time: now,
            update_time: now,
            delete_time: None,
            version: 1,
        }
    }

    /// Creates an active envelope for an id that already exists elsewhere.
    pub fn with_id(id: ResourceId) -> Result<Self, CommonValidationError> {
        let common = Self { id, ..Self::new() };
        common.validate()?;
        Ok(common)
    }

    pub fn validate(&self) -> Result<(), CommonValidationError> {
        if self.id.is_nil() {
            return Err(CommonValidationError::NilId);
        }
        if self.version == 0 {
            return Err(CommonValidationError::ZeroVersion);
        }
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_time.is_some()
    }

    pub fn is_active(&self) -> bool {
        !self.is_deleted()
    }

    /// Decodes the envelope columns of a full row.
    pub fn from_row(row: &Row<'_>) -> DbResult<Self> {
        let id_text: String = row.get(ID_COLUMN)?;
        let id = Uuid::parse_str(&id_text).map_err(|_| {
            DbError::InvalidData(format!("invalid uuid value `{id_text}` in column `id`"))
        })?;

        let raw_version: i64 = row.get(VERSION_COLUMN)?;
        let version = u64::try_from(raw_version).map_err(|_| {
            DbError::InvalidData(format!("negative version `{raw_version}` for `{id}`"))
        })?;

        Ok(Self {
            id,
            create_time: row.get(CREATE_TIME_COLUMN)?,
            update_time: row.get(UPDATE_TIME_COLUMN)?,
            delete_time: row.get(DELETE_TIME_COLUMN)?,
            version,
        })
    }

    pub(crate) fn version_value(&self) -> DbResult<i64> {
        i64::try_from(self.version).map_err(|_| {
            DbError::InvalidData(format!("version {} does not fit a column", self.version))
        })
    }
}

impl Default for Common {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
