//! The DB Broker is the "Thin Waist" for state access.
//!
//! Every multi-row mutation (votes and their counters, replies and their parents,
//! quota consumption, invite-code redemption, refresh rotation) runs as one unit of
//! work through [`DbBroker::with_tx`]: begin, execute, commit on `Ok`, roll back on
//! `Err` or panic. A panic is re-raised after the rollback.

use crate::core::config::BoardConfig;
use crate::core::db;
use crate::core::error::BoardError;
use crate::core::pool::SqlitePool;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Number of SQLite VM instructions between deadline checks.
const DEADLINE_CHECK_OPS: i32 = 1_000;

/// Cheap to clone: clones share one store and one writer lock.
///
/// A broker scoped with [`until`](Self::until) applies its deadline to every unit of
/// work and read it runs, so the operations built on top honor the caller's timeout
/// without taking one themselves.
#[derive(Clone)]
pub struct DbBroker {
    pool: Arc<SqlitePool>,
    deadline: Option<Instant>,
}

impl DbBroker {
    /// Open (creating if needed) the store described by `config`.
    pub fn open(config: &BoardConfig) -> Result<Self, BoardError> {
        db::storage_health_preflight(&config.data_dir)?;
        let broker = Self::new(&config.db_path(), config.busy_timeout_secs);
        broker.pool.with_write(|conn| db::initialize_board_db(conn))?;
        Ok(broker)
    }

    pub fn new(db_path: &Path, busy_timeout_secs: u32) -> Self {
        Self {
            pool: Arc::new(SqlitePool::new(db_path, busy_timeout_secs)),
            deadline: None,
        }
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    /// The same store, with every call bounded by `deadline` (the earlier one wins
    /// when this broker is already scoped).
    pub fn until(&self, deadline: Instant) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            deadline: earliest(self.deadline, Some(deadline)),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run `work` atomically against one transaction.
    pub fn with_tx<F, R>(&self, actor: &str, op: &str, work: F) -> Result<R, BoardError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, BoardError>,
    {
        self.run(self.deadline, actor, op, work)
    }

    /// Like [`with_tx`](Self::with_tx), but the unit fails with a cancelled store fault
    /// and rolls back once `deadline` passes: before it begins, while a statement runs,
    /// or before it commits.
    pub fn with_tx_until<F, R>(
        &self,
        deadline: Instant,
        actor: &str,
        op: &str,
        work: F,
    ) -> Result<R, BoardError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, BoardError>,
    {
        self.run(earliest(self.deadline, Some(deadline)), actor, op, work)
    }

    /// Read-only access on a fresh WAL connection; never sees uncommitted writes.
    pub fn read<F, R>(&self, op: &str, f: F) -> Result<R, BoardError>
    where
        F: FnOnce(&Connection) -> Result<R, BoardError>,
    {
        let deadline = self.deadline;
        let busy = self.pool.busy_timeout();
        let result = self.pool.with_read(|conn| {
            if let Some(deadline) = deadline {
                arm_deadline(conn, deadline, busy)?;
            }
            f(conn)
        });
        debug!(op, ok = result.is_ok(), "broker read");
        result
    }

    fn run<F, R>(
        &self,
        deadline: Option<Instant>,
        actor: &str,
        op: &str,
        work: F,
    ) -> Result<R, BoardError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, BoardError>,
    {
        let started = Instant::now();
        let busy = self.pool.busy_timeout();
        let result = self.pool.with_write(|conn| {
            // Checked after the writer lock is held, so time spent queued counts.
            if let Some(deadline) = deadline {
                arm_deadline(conn, deadline, busy)?;
            }
            execute_unit(conn, deadline, actor, op, work)
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(actor, op, status = "committed", elapsed_ms, "broker unit"),
            Err(e) if e.is_logical() => {
                debug!(actor, op, status = "rejected", elapsed_ms, error = %e, "broker unit")
            }
            Err(e) if e.is_cancelled() => {
                warn!(actor, op, status = "cancelled", elapsed_ms, "broker unit")
            }
            Err(e) => warn!(actor, op, status = "rolled_back", elapsed_ms, error = %e, "broker unit"),
        }
        result
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Refuse a spent deadline, then bound the connection by the time left: the
/// progress handler interrupts running statements and the busy timeout stops
/// lock waits inside SQLite from outliving the caller.
fn arm_deadline(
    conn: &Connection,
    deadline: Instant,
    busy: Duration,
) -> Result<(), BoardError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(BoardError::deadline_exceeded());
    }
    conn.busy_timeout(busy.min(left))?;
    conn.progress_handler(DEADLINE_CHECK_OPS, Some(move || Instant::now() >= deadline))?;
    Ok(())
}

fn execute_unit<F, R>(
    conn: &mut Connection,
    deadline: Option<Instant>,
    actor: &str,
    op: &str,
    work: F,
) -> Result<R, BoardError>
where
    F: FnOnce(&Transaction<'_>) -> Result<R, BoardError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    match panic::catch_unwind(AssertUnwindSafe(|| work(&tx))) {
        Ok(Ok(_)) if expired(deadline) => {
            rollback(tx, actor, op);
            Err(BoardError::deadline_exceeded())
        }
        Ok(Ok(value)) => {
            tx.commit()?;
            Ok(value)
        }
        Ok(Err(err)) => {
            rollback(tx, actor, op);
            Err(err)
        }
        Err(payload) => {
            rollback(tx, actor, op);
            warn!(actor, op, status = "panicked", "broker unit rolled back, re-raising");
            panic::resume_unwind(payload)
        }
    }
}

fn rollback(tx: Transaction<'_>, actor: &str, op: &str) {
    if let Err(e) = tx.rollback() {
        // Dropping the handle rolls back as a last resort.
        warn!(actor, op, error = %e, "explicit rollback failed");
    }
}
