use std::future::Future;

use regula_rule::{Signature, Type, Value};

use super::{constant_rule, flag_signature, match_rule, service, TestResult};
use crate::kv::KvStore;
use crate::StoreError;

pub(super) async fn run_signature_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "signatures",
        "create_signature_roundtrips_through_get",
        create_signature_roundtrips_through_get(factory).await,
    ));
    results.push(TestResult::from_result(
        "signatures",
        "create_signature_twice_returns_already_exists",
        create_signature_twice_returns_already_exists(factory).await,
    ));
    results.push(TestResult::from_result(
        "signatures",
        "create_signature_rejects_malformed_paths",
        create_signature_rejects_malformed_paths(factory).await,
    ));
    results.push(TestResult::from_result(
        "signatures",
        "create_signature_rejects_reserved_param_names",
        create_signature_rejects_reserved_param_names(factory).await,
    ));
    results.push(TestResult::from_result(
        "signatures",
        "create_signature_rejects_abstract_types",
        create_signature_rejects_abstract_types(factory).await,
    ));
    results.push(TestResult::from_result(
        "signatures",
        "put_without_signature_returns_signature_not_found",
        put_without_signature_returns_signature_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "signatures",
        "put_rejects_rules_violating_the_signature",
        put_rejects_rules_violating_the_signature(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A created signature comes back from get, with no rules yet.
async fn create_signature_roundtrips_through_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    let entry = svc
        .get("app/flag", None)
        .await
        .map_err(|e| e.to_string())?;
    if entry.signature != flag_signature() {
        return Err(format!("signature changed in storage: {:?}", entry.signature));
    }
    if !entry.version.is_empty() {
        return Err(format!(
            "expected no resolved version, got {:?}",
            entry.version
        ));
    }
    if !entry.versions.is_empty() || !entry.ruleset.rules.is_empty() {
        return Err("expected no rule versions before the first put".to_string());
    }
    Ok(())
}

/// Signatures are immutable; a second create must be refused.
async fn create_signature_twice_returns_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    let result = svc.create_signature("app/flag", &flag_signature()).await;
    match result {
        Err(StoreError::AlreadyExists { path }) => {
            if path != "app/flag" {
                return Err(format!("expected path \"app/flag\", got {:?}", path));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected AlreadyExists, got: {e}")),
        Ok(()) => Err("expected AlreadyExists error, but got Ok".to_string()),
    }
}

/// Paths outside the lowercase/digit/dash/slash grammar are rejected
/// before anything is written.
async fn create_signature_rejects_malformed_paths<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    for path in ["", "Upper", "-lead", "trail-", "a//b", "a_b", "9th"] {
        match svc.create_signature(path, &flag_signature()).await {
            Err(StoreError::Validation(_)) => {}
            Err(e) => return Err(format!("path {:?}: expected Validation, got: {e}", path)),
            Ok(()) => return Err(format!("path {:?} should have been rejected", path)),
        }
    }
    Ok(())
}

/// Parameter names the query surface reserves must be refused.
async fn create_signature_rejects_reserved_param_names<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    let sig = Signature::new(Type::Bool).with_param("version", Type::String);
    match svc.create_signature("app/flag", &sig).await {
        Err(StoreError::Validation(e)) => {
            if e.reason != "forbidden value" {
                return Err(format!("expected \"forbidden value\", got {:?}", e.reason));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected Validation, got: {e}")),
        Ok(()) => Err("reserved parameter name should have been rejected".to_string()),
    }
}

/// Signatures must be concrete: abstract return or parameter types are
/// refused.
async fn create_signature_rejects_abstract_types<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    let abstract_return = Signature::new(Type::Number);
    if !matches!(
        svc.create_signature("a", &abstract_return).await,
        Err(StoreError::Validation(_))
    ) {
        return Err("abstract return type should have been rejected".to_string());
    }
    let abstract_param = Signature::new(Type::Bool).with_param("n", Type::Any);
    if !matches!(
        svc.create_signature("b", &abstract_param).await,
        Err(StoreError::Validation(_))
    ) {
        return Err("abstract param type should have been rejected".to_string());
    }
    Ok(())
}

/// Rules cannot be stored before their signature exists.
async fn put_without_signature_returns_signature_not_found<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    let rules = vec![match_rule("user-id", "admin", true)?];
    match svc.put("app/flag", &rules).await {
        Err(StoreError::SignatureNotFound { path }) => {
            if path != "app/flag" {
                return Err(format!("expected path \"app/flag\", got {:?}", path));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected SignatureNotFound, got: {e}")),
        Ok(v) => Err(format!("expected SignatureNotFound, but stored {v:?}")),
    }
}

/// Rules referencing undeclared parameters or returning the wrong type
/// are refused.
async fn put_rejects_rules_violating_the_signature<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    let rules = vec![match_rule("tier", "gold", true)?];
    match svc.put("app/flag", &rules).await {
        Err(StoreError::Validation(e)) => {
            if e.reason != "signature mismatch: unknown parameter" {
                return Err(format!("unexpected validation reason: {:?}", e.reason));
            }
        }
        Err(e) => return Err(format!("expected Validation, got: {e}")),
        Ok(v) => return Err(format!("expected Validation, but stored {v:?}")),
    }

    let mut wrong_result = constant_rule(true)?;
    wrong_result.result = Value::string("x");
    match svc.put("app/flag", &[wrong_result]).await {
        Err(StoreError::Validation(e)) if e.field == "returnType" => Ok(()),
        Err(e) => Err(format!("expected returnType validation, got: {e}")),
        Ok(v) => Err(format!("expected returnType validation, but stored {v:?}")),
    }
}
