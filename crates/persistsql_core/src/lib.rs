//! Generic CRUD persistence for soft-deletable resources on SQLite.
//!
//! Callers describe row types with [`Resource`] and a [`ModelSchema`], then
//! go through [`SqlPersistence`] for provisioning, single-row CRUD and
//! notifications.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod query;
pub mod repo;

pub use config::{ConfigError, DbConfig, LoggingConfig, PersistConfig};
pub use db::{
    open_db, open_db_in_memory, open_with_config, ColumnDef, ColumnType, DbError, DbResult,
    ModelSchema, OnDelete, RawStatement,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::common::{now_epoch_ms, Common, CommonValidationError, ResourceId};
pub use model::resource::Resource;
pub use notify::{Notification, NotificationHub, NOTIFY_CHANNEL};
pub use query::{Order, Query, QueryHook, Visibility};
pub use repo::persistence::{Operation, PersistError, PersistResult, SqlPersistence};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
