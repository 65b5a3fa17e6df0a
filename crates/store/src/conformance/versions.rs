use std::future::Future;

use super::{constant_rule, flag_signature, match_rule, service, TestResult};
use crate::kv::KvStore;
use crate::StoreError;

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "versions",
        "put_returns_distinct_sortable_versions",
        put_returns_distinct_sortable_versions(factory).await,
    ));
    results.push(TestResult::from_result(
        "versions",
        "get_latest_resolves_most_recent_put",
        get_latest_resolves_most_recent_put(factory).await,
    ));
    results.push(TestResult::from_result(
        "versions",
        "get_pinned_version_returns_that_version",
        get_pinned_version_returns_that_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "versions",
        "get_unknown_version_returns_not_found",
        get_unknown_version_returns_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "versions",
        "get_unknown_path_returns_not_found",
        get_unknown_path_returns_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "versions",
        "identical_rules_return_not_modified",
        identical_rules_return_not_modified(factory).await,
    ));
    results.push(TestResult::from_result(
        "versions",
        "restoring_earlier_rules_writes_a_new_version",
        restoring_earlier_rules_writes_a_new_version(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// Successive puts mint distinct versions that sort in put order.
async fn put_returns_distinct_sortable_versions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    let v1 = svc
        .put("app/flag", &[match_rule("user-id", "admin", true)?])
        .await
        .map_err(|e| e.to_string())?;
    let v2 = svc
        .put("app/flag", &[match_rule("user-id", "root", true)?])
        .await
        .map_err(|e| e.to_string())?;

    if v1.is_empty() || v2.is_empty() {
        return Err("versions must be non-empty".to_string());
    }
    if v1 >= v2 {
        return Err(format!("versions must sort in put order: {v1} vs {v2}"));
    }
    Ok(())
}

/// Without a pinned version, get serves the rules of the last put.
async fn get_latest_resolves_most_recent_put<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    svc.put("app/flag", &[match_rule("user-id", "admin", true)?])
        .await
        .map_err(|e| e.to_string())?;
    let latest_rules = vec![match_rule("user-id", "root", true)?];
    let v2 = svc
        .put("app/flag", &latest_rules)
        .await
        .map_err(|e| e.to_string())?;

    let entry = svc
        .get("app/flag", None)
        .await
        .map_err(|e| e.to_string())?;
    if entry.version != v2 {
        return Err(format!("expected version {v2}, got {}", entry.version));
    }
    if entry.ruleset.rules != latest_rules {
        return Err("latest rules do not match the last put".to_string());
    }
    Ok(())
}

/// A pinned get serves that exact version, alongside the full history.
async fn get_pinned_version_returns_that_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    let first_rules = vec![match_rule("user-id", "admin", true)?];
    let v1 = svc
        .put("app/flag", &first_rules)
        .await
        .map_err(|e| e.to_string())?;
    let v2 = svc
        .put("app/flag", &[match_rule("user-id", "root", true)?])
        .await
        .map_err(|e| e.to_string())?;

    let entry = svc
        .get("app/flag", Some(&v1))
        .await
        .map_err(|e| e.to_string())?;
    if entry.version != v1 {
        return Err(format!("expected version {v1}, got {}", entry.version));
    }
    if entry.ruleset.rules != first_rules {
        return Err("pinned rules do not match the first put".to_string());
    }
    if entry.versions != vec![v1, v2] {
        return Err(format!("unexpected version history: {:?}", entry.versions));
    }
    Ok(())
}

/// A version that was never minted must not resolve.
async fn get_unknown_version_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;
    svc.put("app/flag", &[constant_rule(true)?])
        .await
        .map_err(|e| e.to_string())?;

    let result = svc
        .get("app/flag", Some("00000000-0000-7000-8000-000000000000"))
        .await;
    match result {
        Err(StoreError::RulesetNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected RulesetNotFound, got: {e}")),
        Ok(entry) => Err(format!("expected RulesetNotFound, got {:?}", entry.version)),
    }
}

/// Paths with no signature must not resolve at all.
async fn get_unknown_path_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    match svc.get("app/missing", None).await {
        Err(StoreError::RulesetNotFound { path }) => {
            if path != "app/missing" {
                return Err(format!("expected path \"app/missing\", got {:?}", path));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected RulesetNotFound, got: {e}")),
        Ok(_) => Err("missing path should not resolve".to_string()),
    }
}

/// Re-putting byte-identical rules is a no-op that reports the version
/// already holding them.
async fn identical_rules_return_not_modified<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    let rules = vec![match_rule("user-id", "admin", true)?];
    let v1 = svc
        .put("app/flag", &rules)
        .await
        .map_err(|e| e.to_string())?;

    match svc.put("app/flag", &rules).await {
        Err(StoreError::NotModified { path, version }) => {
            if path != "app/flag" || version != v1 {
                return Err(format!(
                    "expected NotModified for {v1}, got {path}@{version}"
                ));
            }
        }
        Err(e) => return Err(format!("expected NotModified, got: {e}")),
        Ok(v) => return Err(format!("identical rules minted a new version {v}")),
    }

    let entry = svc
        .get("app/flag", None)
        .await
        .map_err(|e| e.to_string())?;
    if entry.versions != vec![v1] {
        return Err(format!("unexpected version history: {:?}", entry.versions));
    }
    Ok(())
}

/// Deduplication compares against the latest version only; restoring an
/// older rule list is a real write.
async fn restoring_earlier_rules_writes_a_new_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    let original = vec![match_rule("user-id", "admin", true)?];
    svc.put("app/flag", &original)
        .await
        .map_err(|e| e.to_string())?;
    svc.put("app/flag", &[match_rule("user-id", "root", true)?])
        .await
        .map_err(|e| e.to_string())?;
    let v3 = svc
        .put("app/flag", &original)
        .await
        .map_err(|e| e.to_string())?;

    let entry = svc
        .get("app/flag", None)
        .await
        .map_err(|e| e.to_string())?;
    if entry.version != v3 {
        return Err(format!("expected version {v3}, got {}", entry.version));
    }
    if entry.versions.len() != 3 {
        return Err(format!(
            "expected three versions, got {:?}",
            entry.versions
        ));
    }
    if entry.ruleset.rules != original {
        return Err("restored rules do not match the original put".to_string());
    }
    Ok(())
}
