//! Conformance test suite for [`KvStore`] backends serving rulesets.
//!
//! This module provides a backend-agnostic test suite that any
//! [`KvStore`] implementation can run to verify it upholds the
//! behavior the ruleset service depends on. The suite covers:
//!
//! - **Signatures**: single creation, duplicate detection, validation
//! - **Versions**: append-only puts, latest/pinned reads, deduplication
//! - **Listing**: ordering, prefix filtering, cursor pagination
//! - **Watching**: replay from a revision, path filtering, timeouts
//! - **Evaluation**: typed engine evaluation straight from storage
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory
//! function that creates a fresh, empty store for each test:
//!
//! ```ignore
//! use regula_store::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn etcd_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_etcd_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod evaluation;
mod listing;
mod signatures;
mod versions;
mod watch;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use regula_rule::{Expr, OpCode, Param, Rule, Signature, Type, Value};

use crate::kv::KvStore;
use crate::{Config, RulesetService};

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "signatures", "listing").
    pub category: String,
    /// Test name (e.g. "put_returns_distinct_sortable_versions").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a key-value backend.
///
/// The `factory` function is called once per test to create a fresh,
/// empty store, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(signatures::run_signature_tests(&factory).await);
    results.extend(versions::run_version_tests(&factory).await);
    results.extend(listing::run_listing_tests(&factory).await);
    results.extend(watch::run_watch_tests(&factory).await);
    results.extend(evaluation::run_evaluation_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: services and rules with sensible defaults ───────────────────────

/// A service over `store` with retry delays short enough for tests.
fn service<S: KvStore>(store: S) -> Result<RulesetService<S>, String> {
    let mut cfg = Config::new("conformance");
    cfg.watch_retry_delay = Duration::from_millis(10);
    cfg.put_retry_delay = Duration::from_millis(10);
    RulesetService::new(store, cfg).map_err(|e| e.to_string())
}

/// `bool` signature over a single string parameter `user-id`.
fn flag_signature() -> Signature {
    Signature::new(Type::Bool).with_param("user-id", Type::String)
}

/// Rule matching when the string parameter `param` equals `value`.
fn match_rule(param: &str, value: &str, result: bool) -> Result<Rule, String> {
    let expr = Expr::op(
        OpCode::Eq,
        [
            Expr::Param(Param::string(param)),
            Expr::Value(Value::string(value)),
        ],
    )
    .map_err(|e| e.to_string())?;
    Ok(Rule::new(expr, Value::bool(result)))
}

/// Rule matching every evaluation.
fn constant_rule(result: bool) -> Result<Rule, String> {
    let expr = Expr::op(
        OpCode::Eq,
        [
            Expr::Value(Value::string("a")),
            Expr::Value(Value::string("a")),
        ],
    )
    .map_err(|e| e.to_string())?;
    Ok(Rule::new(expr, Value::bool(result)))
}
