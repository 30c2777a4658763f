//! SQLite connection pool with read/write separation.
//!
//! - Maintains a **write mutex** for serialized write access within the process
//! - Creates fresh **read connections** per operation (no mutex, concurrent via WAL)
//! - Cross-process writers are serialized by SQLite itself (`BEGIN IMMEDIATE` + `busy_timeout`)
//!
//! Connections are NOT pooled (opened fresh each time): per-connection state such as a
//! progress handler installed for one unit of work never leaks into the next one.

use crate::core::db;
use crate::core::error::BoardError;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub struct SqlitePool {
    db_path: PathBuf,
    busy_timeout_secs: u32,
    write_lock: Mutex<()>,
}

impl SqlitePool {
    pub fn new(db_path: &Path, busy_timeout_secs: u32) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            busy_timeout_secs,
            write_lock: Mutex::new(()),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.busy_timeout_secs))
    }

    /// Execute a closure with a write connection. Write access is serialized via mutex.
    pub fn with_write<F, R>(&self, f: F) -> Result<R, BoardError>
    where
        F: FnOnce(&mut Connection) -> Result<R, BoardError>,
    {
        // The mutex guards no data; a panicking writer has already rolled back.
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut conn = db::db_connect(&self.db_path.to_string_lossy(), self.busy_timeout_secs)?;
        f(&mut conn)
    }

    /// Execute a closure with a read connection (no mutex serialization).
    pub fn with_read<F, R>(&self, f: F) -> Result<R, BoardError>
    where
        F: FnOnce(&Connection) -> Result<R, BoardError>,
    {
        let conn = db::db_connect(&self.db_path.to_string_lossy(), self.busy_timeout_secs)?;
        f(&conn)
    }
}
