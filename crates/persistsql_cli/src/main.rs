//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire config, logging, the database and the persistence façade end to end.
//! - Walk one demo resource through its whole lifecycle with deterministic output.
//!
//! Usage: `persistsql [config.json]`

use log::info;
use persistsql_core::logging::init_from_config;
use persistsql_core::{
    core_version, open_with_config, ColumnDef, ColumnType, Common, DbResult, ModelSchema,
    PersistConfig, Query, RawStatement, Resource, SqlPersistence,
};
use rusqlite::types::Value;
use rusqlite::Row;
use std::error::Error;
use std::process::ExitCode;

#[derive(Debug, Clone)]
struct Memo {
    common: Common,
    title: String,
}

impl Resource for Memo {
    const SCHEMA: ModelSchema = ModelSchema::new(
        "memos",
        &[ColumnDef::new("title", ColumnType::Text).not_null()],
    );

    fn common(&self) -> &Common {
        &self.common
    }

    fn common_mut(&mut self) -> &mut Common {
        &mut self.common
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![("title", Value::Text(self.title.clone()))]
    }

    fn from_row(common: Common, row: &Row<'_>) -> DbResult<Self> {
        Ok(Self {
            common,
            title: row.get("title")?,
        })
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("persistsql: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => PersistConfig::load(path)?,
        None => PersistConfig::default(),
    };
    init_from_config(&config.logging)?;
    info!("event=cli_start module=cli status=ok version={}", core_version());

    let persistence = SqlPersistence::new(open_with_config(&config.database)?)?;
    persistence.create_tables(
        &[Memo::SCHEMA],
        &[RawStatement::tolerant(
            "CREATE INDEX IF NOT EXISTS idx_memos_title ON memos (title);",
        )],
    )?;
    let events = persistence.subscribe();

    let memo = persistence.create(&Memo {
        common: Common::new(),
        title: "draft".to_string(),
    })?;
    let id = memo.id();
    let by_id = |query: &mut Query| {
        query.where_pk(id);
    };
    println!("created id={} version={}", id, memo.common.version);

    let mut edited = memo.clone();
    edited.title = "final".to_string();
    let updated = persistence.update(&edited, &["title"], Some(&by_id))?;
    println!(
        "updated title={}",
        updated.map_or("<none>".to_string(), |memo| memo.title)
    );

    persistence.delete(&memo, None)?;
    let hidden = persistence.read::<Memo>(false, &by_id)?;
    println!("visible_after_delete={}", hidden.is_some());

    persistence.undelete(&memo, None)?;
    let restored = persistence.read::<Memo>(false, &by_id)?;
    println!("visible_after_undelete={}", restored.is_some());

    persistence.notify(&format!("memo:{id}"))?;
    println!(
        "notifications_received={}",
        events.try_iter().count()
    );

    persistence.close()?;
    println!("persistsql_core version={}", core_version());
    Ok(())
}
