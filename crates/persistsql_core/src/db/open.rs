//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Apply the connection pragmas the persistence layer relies on.
//!
//! # Invariants
//! - Returned connections have the configured busy timeout applied.
//! - Foreign keys are enforced unless the config explicitly disables them.

use super::DbResult;
use crate::config::DbConfig;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file with default settings.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let config = DbConfig {
        path: Some(path.as_ref().to_path_buf()),
        ..DbConfig::default()
    };
    open_with_config(&config)
}

/// Opens an in-memory SQLite database with default settings.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with_config(&DbConfig::default())
}

/// Opens a connection as described by `config`.
///
/// A config without `path` yields a private in-memory database.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_with_config(config: &DbConfig) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = if config.path.is_some() { "file" } else { "memory" };
    info!("event=db_open module=db status=start mode={mode}");

    let opened = match config.path.as_deref() {
        Some(path) => Connection::open(path),
        None => Connection::open_in_memory(),
    };

    let result: DbResult<Connection> = opened
        .map_err(Into::into)
        .and_then(|conn| configure_connection(&conn, config).map(|()| conn));

    match &result {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={mode} duration_ms={}",
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error={}",
            started_at.elapsed().as_millis(),
            err
        ),
    }

    result
}

fn configure_connection(conn: &Connection, config: &DbConfig) -> DbResult<()> {
    let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}
