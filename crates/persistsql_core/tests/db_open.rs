use persistsql_core::{open_db, open_db_in_memory, open_with_config, DbConfig};
use rusqlite::Connection;

fn pragma(conn: &Connection, name: &str) -> i64 {
    conn.query_row(&format!("PRAGMA {name};"), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn in_memory_connection_enforces_foreign_keys() {
    let conn = open_db_in_memory().unwrap();
    assert_eq!(pragma(&conn, "foreign_keys"), 1);
    assert_eq!(pragma(&conn, "busy_timeout"), 5_000);
}

#[test]
fn file_connection_persists_between_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.db");

    let first = open_db(&path).unwrap();
    first
        .execute_batch("CREATE TABLE marker (id INTEGER PRIMARY KEY);")
        .unwrap();
    drop(first);

    let second = open_db(&path).unwrap();
    let exists: i64 = second
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'marker');",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1);
}

#[test]
fn config_controls_pragmas() {
    let config = DbConfig {
        path: None,
        busy_timeout_ms: 250,
        foreign_keys: false,
    };
    let conn = open_with_config(&config).unwrap();

    assert_eq!(pragma(&conn, "foreign_keys"), 0);
    assert_eq!(pragma(&conn, "busy_timeout"), 250);
}

#[test]
fn unopenable_path_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing-dir").join("db.sqlite");
    assert!(open_db(&path).is_err());
}
