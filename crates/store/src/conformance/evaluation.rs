use std::future::Future;

use regula_engine::{Engine, EngineError};
use regula_rule::{
    EvalError, Expr, OpCode, Param, ParamMap, Rule, Signature, Type, Value,
};

use super::{constant_rule, flag_signature, match_rule, service, TestResult};
use crate::kv::KvStore;

pub(super) async fn run_evaluation_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "evaluation",
        "engine_evaluates_latest_rules",
        engine_evaluates_latest_rules(factory).await,
    ));
    results.push(TestResult::from_result(
        "evaluation",
        "engine_pins_to_requested_version",
        engine_pins_to_requested_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "evaluation",
        "engine_reports_missing_rulesets",
        engine_reports_missing_rulesets(factory).await,
    ));
    results.push(TestResult::from_result(
        "evaluation",
        "engine_rejects_result_type_mismatch",
        engine_rejects_result_type_mismatch(factory).await,
    ));
    results.push(TestResult::from_result(
        "evaluation",
        "unmatched_rules_surface_no_match",
        unmatched_rules_surface_no_match(factory).await,
    ));
    results.push(TestResult::from_result(
        "evaluation",
        "engine_evaluates_compound_rules",
        engine_evaluates_compound_rules(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// First-match evaluation over the stored latest version.
async fn engine_evaluates_latest_rules<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;
    svc.put(
        "app/flag",
        &[match_rule("user-id", "admin", true)?, constant_rule(false)?],
    )
    .await
    .map_err(|e| e.to_string())?;

    let engine = Engine::new(svc);
    let admin = ParamMap::new().with_string("user-id", "admin");
    let guest = ParamMap::new().with_string("user-id", "guest");

    let on = engine
        .get_bool("app/flag", &admin, None)
        .await
        .map_err(|e| e.to_string())?;
    let off = engine
        .get_bool("app/flag", &guest, None)
        .await
        .map_err(|e| e.to_string())?;
    if !on || off {
        return Err(format!("expected true/false, got {on}/{off}"));
    }
    Ok(())
}

/// Pinning a version evaluates that version even after newer puts.
async fn engine_pins_to_requested_version<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .put("app/flag", &[constant_rule(true)?])
        .await
        .map_err(|e| e.to_string())?;
    svc.put("app/flag", &[constant_rule(false)?])
        .await
        .map_err(|e| e.to_string())?;

    let engine = Engine::new(svc);
    let params = ParamMap::new();

    let pinned = engine
        .get_bool("app/flag", &params, Some(&v1))
        .await
        .map_err(|e| e.to_string())?;
    let latest = engine
        .get_bool("app/flag", &params, None)
        .await
        .map_err(|e| e.to_string())?;
    if !pinned || latest {
        return Err(format!("expected pinned=true latest=false, got {pinned}/{latest}"));
    }

    let result = engine
        .eval("app/flag", &params, Some(&v1))
        .await
        .map_err(|e| e.to_string())?;
    if result.version != v1 {
        return Err(format!("expected version {v1}, got {}", result.version));
    }
    Ok(())
}

/// Unknown paths surface as RulesetNotFound through the engine.
async fn engine_reports_missing_rulesets<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let engine = Engine::new(service(factory().await)?);
    let params = ParamMap::new();
    match engine.get_bool("app/missing", &params, None).await {
        Err(EngineError::RulesetNotFound) => Ok(()),
        Err(e) => Err(format!("expected RulesetNotFound, got: {e}")),
        Ok(v) => Err(format!("expected RulesetNotFound, got {v}")),
    }
}

/// Typed getters refuse rulesets of another result type.
async fn engine_rejects_result_type_mismatch<S, F, Fut>(factory: &F) -> Result<(), String>
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

    let engine = Engine::new(svc);
    let params = ParamMap::new();
    match engine.get_string("app/flag", &params, None).await {
        Err(EngineError::ResultTypeMismatch {
            requested: Type::String,
            returned: Type::Bool,
        }) => Ok(()),
        Err(e) => Err(format!("expected ResultTypeMismatch, got: {e}")),
        Ok(v) => Err(format!("expected ResultTypeMismatch, got {v:?}")),
    }
}

/// A ruleset where nothing matches reports the non-match, not a value.
async fn unmatched_rules_surface_no_match<S, F, Fut>(factory: &F) -> Result<(), String>
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

    let engine = Engine::new(svc);
    let guest = ParamMap::new().with_string("user-id", "guest");
    match engine.get_bool("app/flag", &guest, None).await {
        Err(EngineError::Eval(EvalError::NoMatch)) => Ok(()),
        Err(e) => Err(format!("expected NoMatch, got: {e}")),
        Ok(v) => Err(format!("expected NoMatch, got {v}")),
    }
}

/// Boolean composition and ordered comparison evaluate against typed
/// parameters end to end.
async fn engine_evaluates_compound_rules<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    let sig = Signature::new(Type::Bool)
        .with_param("plan", Type::String)
        .with_param("seats", Type::Int64);
    svc.create_signature("billing/bulk", &sig)
        .await
        .map_err(|e| e.to_string())?;

    let guard = Expr::op(
        OpCode::And,
        [
            Expr::op(
                OpCode::Eq,
                [
                    Expr::Param(Param::string("plan")),
                    Expr::Value(Value::string("pro")),
                ],
            )
            .map_err(|e| e.to_string())?,
            Expr::op(
                OpCode::Gte,
                [
                    Expr::Param(Param::int64("seats")),
                    Expr::Value(Value::int64(5)),
                ],
            )
            .map_err(|e| e.to_string())?,
        ],
    )
    .map_err(|e| e.to_string())?;
    let rules = vec![Rule::new(guard, Value::bool(true)), constant_rule(false)?];
    svc.put("billing/bulk", &rules)
        .await
        .map_err(|e| e.to_string())?;

    let engine = Engine::new(svc);
    let cases = [("pro", 8, true), ("pro", 3, false), ("free", 8, false)];
    for (plan, seats, want) in cases {
        let params = ParamMap::new()
            .with_string("plan", plan)
            .with_int64("seats", seats);
        let got = engine
            .get_bool("billing/bulk", &params, None)
            .await
            .map_err(|e| e.to_string())?;
        if got != want {
            return Err(format!("plan={plan} seats={seats}: expected {want}, got {got}"));
        }
    }
    Ok(())
}
