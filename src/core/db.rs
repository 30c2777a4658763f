use crate::core::error::BoardError;
use crate::core::schemas;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn db_connect(db_path: &str, busy_timeout_secs: u32) -> Result<Connection, BoardError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(u64::from(busy_timeout_secs)))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Fails early with a clear message when the data directory cannot hold the store.
pub fn storage_health_preflight(root: &Path) -> Result<(), BoardError> {
    fs::create_dir_all(root)?;
    let probe = root.join(".agentboard_write_probe");
    fs::write(&probe, b"ok").map_err(|e| {
        BoardError::ConfigError(format!(
            "STORAGE_PREFLIGHT_FAILED: {} is not writable: {}",
            root.display(),
            e
        ))
    })?;
    fs::remove_file(&probe)?;
    Ok(())
}

/// Create every table and index, and stamp the schema version.
pub fn initialize_board_db(conn: &Connection) -> Result<(), BoardError> {
    for stmt in schemas::BOARD_DB_SCHEMA_ALL {
        conn.execute_batch(stmt)?;
    }
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match version {
        None => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES('schema_version', ?1)",
                params![schemas::BOARD_SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(v) if v != schemas::BOARD_SCHEMA_VERSION.to_string() => {
            return Err(BoardError::ConfigError(format!(
                "store schema version {} is not supported (expected {})",
                v,
                schemas::BOARD_SCHEMA_VERSION
            )));
        }
        Some(_) => {}
    }
    Ok(())
}
