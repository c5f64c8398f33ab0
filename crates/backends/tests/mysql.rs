//! Tests against a live MySQL server
//!
//! Run with `MYSQL_URL=mysql://... cargo test -p stepwise-backends -- --ignored`

#![cfg(feature = "mysql")]

use stepwise_backends::{MySqlBackend, MySqlConfig};
use stepwise_core::{run, Backend, Migration, Mode, RunConfig, SliceSource};
use stepwise_testing::BackendSuite;

async fn backend(table: &str) -> MySqlBackend {
    let url = std::env::var("MYSQL_URL").expect("MYSQL_URL must be set for mysql tests");
    let config = MySqlConfig::new().with_table(table);
    MySqlBackend::connect(&url, config).await.unwrap()
}

#[tokio::test]
#[ignore]
async fn test_conformance_suite() {
    let backend = backend("_stepwise_suite_log").await;
    BackendSuite::new(&backend)
        .with_templates(
            "CREATE TABLE {test}_{n} (id INT);",
            "DROP TABLE {test}_{n};",
        )
        .with_clean_migration("DROP TABLE IF EXISTS {test}_{n};")
        .with_clean_test("DELETE FROM _stepwise_suite_log;")
        .run_all()
        .await
        .unwrap();
    backend.drop_storage().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_lock_is_exclusive_across_sessions() {
    let first = backend("_stepwise_lock_log").await;
    let second = MySqlBackend::connect(
        &std::env::var("MYSQL_URL").unwrap(),
        MySqlConfig::new().with_table("_stepwise_lock_log").with_lock_timeout(0),
    )
    .await
    .unwrap();

    first.lock().await.unwrap();
    assert!(second.lock().await.is_err());
    first.unlock().await.unwrap();

    second.lock().await.unwrap();
    second.unlock().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_failed_step_leaves_version_untouched() {
    let backend = backend("_stepwise_fail_log").await;
    let source = SliceSource::new(vec![
        Migration::new(1, "ok", "SELECT 1;", "SELECT 1;"),
        Migration::new(2, "broken", "SELECT * FROM no_such_table;", "SELECT 1;"),
    ]);

    let err = run(&backend, &source, RunConfig::new(Mode::ApplyAll))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("exec:"));
    assert_eq!(backend.version().await.unwrap(), 1);

    backend.drop_storage().await.unwrap();
}
