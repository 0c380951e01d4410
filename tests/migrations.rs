//! Migration runner against the in-memory store.

use std::fs;
use std::sync::Arc;

use service_bootstrap::migration::{MigrationError, MigrationRunner};

mod common;

use common::{five_migrations, write_migrations, MemoryStore};

#[tokio::test]
async fn applies_in_version_order_then_nothing_on_rerun() {
    let dir = tempfile::tempdir().unwrap();
    // Written out of order on purpose; the directory listing order must not matter.
    write_migrations(
        dir.path(),
        &[
            ("0003_payments.sql", "CREATE TABLE payments (id BIGINT);"),
            ("0001_users.sql", "CREATE TABLE users (id BIGINT);"),
            ("V2__orders.sql", "CREATE TABLE orders (id BIGINT);"),
            ("README.md", "not a migration"),
        ],
    );

    let store = MemoryStore::new();
    let runner = MigrationRunner::new(Arc::new(store.clone()));

    let first = runner.run(dir.path()).await.unwrap();
    let versions: Vec<i64> = first.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(first[1].name, "orders");

    let second = runner.run(dir.path()).await.unwrap();
    assert!(second.is_empty(), "second run must apply nothing");
    assert_eq!(store.applied_versions(), vec![1, 2, 3]);
    assert_eq!(store.attempted(), vec![1, 2, 3]);
}

#[tokio::test]
async fn failure_stops_the_run_and_keeps_earlier_migrations() {
    let dir = tempfile::tempdir().unwrap();
    five_migrations(dir.path());

    let store = MemoryStore::new();
    store.fail_on(3);
    let runner = MigrationRunner::new(Arc::new(store.clone()));

    let err = runner.run(dir.path()).await.unwrap_err();
    assert_eq!(err.failed_version(), Some(3));
    assert!(err.to_string().contains("migration 3 (payments) failed"));

    match err {
        MigrationError::Failed {
            applied,
            not_attempted,
            ..
        } => {
            let applied: Vec<i64> = applied.iter().map(|r| r.version).collect();
            assert_eq!(applied, vec![1, 2]);
            assert_eq!(not_attempted, vec![4, 5]);
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    assert_eq!(store.applied_versions(), vec![1, 2]);
    assert_eq!(store.attempted(), vec![1, 2, 3], "4 and 5 must never be attempted");
}

#[tokio::test]
async fn edited_migration_is_refused_before_anything_runs() {
    let dir = tempfile::tempdir().unwrap();
    five_migrations(dir.path());

    let store = MemoryStore::new();
    let runner = MigrationRunner::new(Arc::new(store.clone()));
    runner.run(dir.path()).await.unwrap();

    fs::write(
        dir.path().join("0002_orders.sql"),
        "CREATE TABLE orders (id BIGINT, total NUMERIC);",
    )
    .unwrap();
    write_migrations(dir.path(), &[("0006_tags.sql", "CREATE TABLE tags (id BIGINT);")]);

    let err = runner.run(dir.path()).await.unwrap_err();
    assert!(matches!(err, MigrationError::ChecksumMismatch { version: 2, .. }));
    assert_eq!(store.applied_versions(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn version_below_the_ledger_head_is_out_of_order() {
    let dir = tempfile::tempdir().unwrap();
    write_migrations(
        dir.path(),
        &[
            ("0001_users.sql", "CREATE TABLE users (id BIGINT);"),
            ("0005_audit.sql", "CREATE TABLE audit (id BIGINT);"),
        ],
    );

    let store = MemoryStore::new();
    let runner = MigrationRunner::new(Arc::new(store.clone()));
    runner.run(dir.path()).await.unwrap();

    write_migrations(dir.path(), &[("0003_late.sql", "CREATE TABLE late (id BIGINT);")]);
    let err = runner.run(dir.path()).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::OutOfOrder {
            version: 3,
            latest: 5
        }
    ));
}

#[tokio::test]
async fn missing_directory_is_a_scan_error() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MigrationRunner::new(Arc::new(MemoryStore::new()));

    let absent = dir.path().join("absent");
    let err = runner.run(&absent).await.unwrap_err();
    match &err {
        MigrationError::Scan { path, source } => {
            assert_eq!(path, &absent);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected Scan, got {other:?}"),
    }
    assert_eq!(err.failed_version(), None);
}
