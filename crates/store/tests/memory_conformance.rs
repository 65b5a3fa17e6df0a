//! Runs the backend conformance suite against the in-memory store.

use regula_store::conformance::run_conformance_suite;
use regula_store::MemoryStore;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn memory_store_conformance() {
    init_tracing();
    let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
    assert_eq!(report.failed, 0, "{report}");
    assert!(report.total > 0);
}
