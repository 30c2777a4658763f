use agentboard::core::broker::DbBroker;
use agentboard::core::config::BoardConfig;
use agentboard::core::db;
use agentboard::core::error::BoardError;
use agentboard::core::schemas;
use rusqlite::params;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn count_codes(broker: &DbBroker) -> i64 {
    broker
        .read("test.count", |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM invite_codes", [], |row| row.get(0))?)
        })
        .unwrap()
}

fn insert_code(conn: &rusqlite::Connection, code: &str) -> Result<(), BoardError> {
    conn.execute(
        "INSERT INTO invite_codes(code, is_used, created_at) VALUES(?1, 0, 0)",
        params![code],
    )?;
    Ok(())
}

fn explode() -> Result<(), BoardError> {
    panic!("fault inside unit of work")
}

#[test]
fn store_initialization_is_idempotent_and_hardened() {
    let tmp = tempdir().unwrap();
    let config = BoardConfig::for_tests(tmp.path());
    DbBroker::open(&config).unwrap();
    let broker = DbBroker::open(&config).unwrap();
    assert!(config.db_path().exists());

    let conn = db::db_connect(&broker.db_path().to_string_lossy(), 5).unwrap();
    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(fk_on, 1);
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
    let version: String = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(version, schemas::BOARD_SCHEMA_VERSION.to_string());
}

#[test]
fn unsupported_schema_version_is_rejected() {
    let tmp = tempdir().unwrap();
    let config = BoardConfig::for_tests(tmp.path());
    let broker = DbBroker::open(&config).unwrap();
    broker
        .with_tx("test", "meta.bump", |tx| {
            tx.execute("UPDATE meta SET value = '99' WHERE key = 'schema_version'", [])?;
            Ok(())
        })
        .unwrap();
    let err = DbBroker::open(&config).err().expect("newer schema must be refused");
    assert!(matches!(err, BoardError::ConfigError(_)));
}

#[test]
fn unit_of_work_commits_on_success() {
    let tmp = tempdir().unwrap();
    let broker = DbBroker::open(&BoardConfig::for_tests(tmp.path())).unwrap();

    let value = broker
        .with_tx("tester", "test.commit", |tx| {
            insert_code(tx, "c1")?;
            insert_code(tx, "c2")?;
            Ok(42)
        })
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(count_codes(&broker), 2);
}

#[test]
fn unit_of_work_rolls_back_on_error() {
    let tmp = tempdir().unwrap();
    let broker = DbBroker::open(&BoardConfig::for_tests(tmp.path())).unwrap();

    let err = broker
        .with_tx("tester", "test.rollback", |tx| {
            insert_code(tx, "c1")?;
            Err::<(), _>(BoardError::ValidationError("second step failed".into()))
        })
        .unwrap_err();
    assert!(matches!(err, BoardError::ValidationError(_)));
    assert_eq!(count_codes(&broker), 0);

    // A store fault from the second statement also undoes the first.
    let err = broker
        .with_tx("tester", "test.rollback_fault", |tx| {
            insert_code(tx, "c1")?;
            insert_code(tx, "c1")
        })
        .unwrap_err();
    assert!(matches!(err, BoardError::RusqliteError(_)));
    assert_eq!(count_codes(&broker), 0);
}

#[test]
fn unit_of_work_rolls_back_and_reraises_panics() {
    let tmp = tempdir().unwrap();
    let broker = DbBroker::open(&BoardConfig::for_tests(tmp.path())).unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        broker.with_tx("tester", "test.panic", |tx| {
            insert_code(tx, "c1")?;
            explode()
        })
    }));
    let payload = outcome.expect_err("panic must reach the caller");
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .unwrap_or_default();
    assert_eq!(message, "fault inside unit of work");
    assert_eq!(count_codes(&broker), 0);

    // The store stays usable after the fault.
    broker
        .with_tx("tester", "test.after_panic", |tx| insert_code(tx, "c2"))
        .unwrap();
    assert_eq!(count_codes(&broker), 1);
}

#[test]
fn unit_of_work_honors_deadline() {
    let tmp = tempdir().unwrap();
    let broker = DbBroker::open(&BoardConfig::for_tests(tmp.path())).unwrap();

    let deadline = Instant::now() + Duration::from_millis(20);
    let err = broker
        .with_tx_until(deadline, "tester", "test.deadline", |tx| {
            insert_code(tx, "c1")?;
            let n: i64 = tx.query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500000000)
                 SELECT COUNT(*) FROM c",
                [],
                |row| row.get(0),
            )?;
            Ok(n)
        })
        .unwrap_err();
    assert!(err.is_cancelled(), "expected interrupt, got {err}");
    assert_eq!(count_codes(&broker), 0);

    let ok = broker
        .with_tx_until(
            Instant::now() + Duration::from_secs(30),
            "tester",
            "test.deadline_ok",
            |tx| insert_code(tx, "c2"),
        );
    assert!(ok.is_ok());
    assert_eq!(count_codes(&broker), 1);
}

#[test]
fn expired_deadline_refuses_unit_before_it_begins() {
    let tmp = tempdir().unwrap();
    let broker = DbBroker::open(&BoardConfig::for_tests(tmp.path())).unwrap();

    let mut ran = false;
    let err = broker
        .with_tx_until(Instant::now(), "tester", "test.late", |tx| {
            ran = true;
            insert_code(tx, "late")
        })
        .unwrap_err();
    assert!(err.is_cancelled(), "expected cancellation, got {err}");
    assert!(!ran);
    assert_eq!(count_codes(&broker), 0);

    // A scoped broker applies the same rule to plain units and reads.
    let scoped = broker.until(Instant::now());
    assert!(
        scoped
            .with_tx("tester", "test.scoped", |tx| insert_code(tx, "late"))
            .unwrap_err()
            .is_cancelled()
    );
    assert!(
        scoped
            .read("test.scoped_read", |_| Ok(()))
            .unwrap_err()
            .is_cancelled()
    );
    assert_eq!(count_codes(&broker), 0);
}

#[test]
fn deadline_passing_inside_cheap_work_still_rolls_back() {
    let tmp = tempdir().unwrap();
    let broker = DbBroker::open(&BoardConfig::for_tests(tmp.path())).unwrap();

    // Too few VM steps for the progress handler to fire; the commit check catches it.
    let err = broker
        .with_tx_until(
            Instant::now() + Duration::from_millis(30),
            "tester",
            "test.slow_caller",
            |tx| {
                insert_code(tx, "c1")?;
                std::thread::sleep(Duration::from_millis(80));
                Ok(())
            },
        )
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(count_codes(&broker), 0);
}

#[test]
fn time_queued_behind_another_writer_counts_against_deadline() {
    let tmp = tempdir().unwrap();
    let broker = Arc::new(DbBroker::open(&BoardConfig::for_tests(tmp.path())).unwrap());
    let barrier = Arc::new(Barrier::new(2));

    let holder = {
        let broker = Arc::clone(&broker);
        let barrier = Arc::clone(&barrier);
        std::thread::spawn(move || {
            broker
                .with_tx("holder", "test.hold", |tx| {
                    barrier.wait();
                    std::thread::sleep(Duration::from_millis(300));
                    insert_code(tx, "held")
                })
                .unwrap();
        })
    };
    barrier.wait();
    let err = broker
        .with_tx_until(
            Instant::now() + Duration::from_millis(20),
            "tester",
            "test.queued",
            |tx| insert_code(tx, "queued"),
        )
        .unwrap_err();
    holder.join().unwrap();

    assert!(err.is_cancelled());
    assert_eq!(count_codes(&broker), 1);
}

#[test]
fn scoped_deadlines_keep_the_earlier_bound() {
    let tmp = tempdir().unwrap();
    let broker = DbBroker::open(&BoardConfig::for_tests(tmp.path())).unwrap();
    let soon = Instant::now() + Duration::from_secs(5);
    let later = soon + Duration::from_secs(60);

    assert_eq!(broker.deadline(), None);
    assert_eq!(broker.until(soon).until(later).deadline(), Some(soon));
    assert_eq!(broker.until(later).until(soon).deadline(), Some(soon));
    broker
        .until(later)
        .with_tx("tester", "test.in_time", |tx| insert_code(tx, "c1"))
        .unwrap();
    assert_eq!(count_codes(&broker), 1);
}

#[test]
fn concurrent_units_of_work_are_serialized() {
    let tmp = tempdir().unwrap();
    let broker = Arc::new(DbBroker::open(&BoardConfig::for_tests(tmp.path())).unwrap());
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let broker = Arc::clone(&broker);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for j in 0..10 {
                    broker
                        .with_tx("worker", "test.concurrent", |tx| {
                            insert_code(tx, &format!("w{}-{}", i, j))
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(count_codes(&broker), 60);
}

#[test]
fn storage_preflight_rejects_unwritable_root() {
    let tmp = tempdir().unwrap();
    let file = tmp.path().join("not-a-dir");
    std::fs::write(&file, b"x").unwrap();
    assert!(db::storage_health_preflight(&file).is_err());
    assert!(db::storage_health_preflight(&tmp.path().join("fresh")).is_ok());
}
