//! End-to-end engine scenarios over the in-memory ruleset source.
//!
//! Exercises the public surface the way an embedder uses it: build
//! rulesets through the operator builder, register versions in a
//! `RulesetBuffer`, and read results back through the typed getters.

use regula_engine::{Engine, EngineError, RulesetBuffer};
use regula_rule::{EvalError, Expr, OpCode, Param, ParamMap, Rule, Ruleset, Type, Value};

/// Gold members below the percentile threshold get the feature,
/// everyone else falls through to `false`.
fn rollout(threshold: i64) -> Ruleset {
    let cohort = Expr::op(
        OpCode::And,
        [
            Expr::op(
                OpCode::Eq,
                [
                    Expr::Param(Param::string("tier")),
                    Expr::Value(Value::string("gold")),
                ],
            )
            .unwrap(),
            Expr::op(
                OpCode::Percentile,
                [
                    Expr::Param(Param::string("user-id")),
                    Expr::Value(Value::int64(threshold)),
                ],
            )
            .unwrap(),
        ],
    )
    .unwrap();
    Ruleset::new(vec![
        Rule::new(cohort, Value::bool(true)),
        Rule::new(Expr::Value(Value::bool(true)), Value::bool(false)),
    ])
}

fn volume_discounts() -> Ruleset {
    let big = Expr::op(
        OpCode::Gte,
        [
            Expr::Param(Param::int64("seats")),
            Expr::Value(Value::int64(50)),
        ],
    )
    .unwrap();
    let mid = Expr::op(
        OpCode::Gte,
        [
            Expr::Param(Param::int64("seats")),
            Expr::Value(Value::int64(10)),
        ],
    )
    .unwrap();
    Ruleset::new(vec![
        Rule::new(big, Value::float64(0.2)),
        Rule::new(mid, Value::float64(0.1)),
        Rule::new(Expr::Value(Value::bool(true)), Value::float64(0.0)),
    ])
}

fn user(tier: &str, id: &str) -> ParamMap {
    ParamMap::new()
        .with_string("tier", tier)
        .with_string("user-id", id)
}

#[tokio::test]
async fn rollout_widens_across_versions() {
    let buffer = RulesetBuffer::new();
    // User "a" hashes into percentile bucket 46: outside a 20% rollout,
    // inside a 60% one.
    buffer.add("features/new-checkout", "v1", rollout(20));
    buffer.add("features/new-checkout", "v2", rollout(60));
    let engine = Engine::new(buffer);

    let latest = engine
        .get_bool("features/new-checkout", &user("gold", "a"), None)
        .await
        .unwrap();
    assert!(latest);

    let pinned = engine
        .get_bool("features/new-checkout", &user("gold", "a"), Some("v1"))
        .await
        .unwrap();
    assert!(!pinned);
}

#[tokio::test]
async fn non_members_fall_through_to_the_default() {
    let buffer = RulesetBuffer::new();
    buffer.add("features/new-checkout", "v1", rollout(100));
    let engine = Engine::new(buffer);

    let on = engine
        .get_bool("features/new-checkout", &user("bronze", "a"), None)
        .await
        .unwrap();
    assert!(!on);
}

#[tokio::test]
async fn earlier_rules_shadow_later_ones() {
    let buffer = RulesetBuffer::new();
    buffer.add("pricing/volume", "v1", volume_discounts());
    let engine = Engine::new(buffer);

    for (seats, expected) in [(80, 0.2), (25, 0.1), (3, 0.0)] {
        let params = ParamMap::new().with_int64("seats", seats);
        let discount = engine
            .get_float64("pricing/volume", &params, None)
            .await
            .unwrap();
        assert_eq!(discount, expected, "seats = {}", seats);
    }
}

#[tokio::test]
async fn error_paths_reach_the_caller_intact() {
    let buffer = RulesetBuffer::new();
    buffer.add("pricing/volume", "v1", volume_discounts());
    let engine = Engine::new(buffer);
    let params = ParamMap::new().with_int64("seats", 1);

    let err = engine
        .get_int64("pricing/volume", &params, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ResultTypeMismatch {
            requested: Type::Int64,
            returned: Type::Float64,
        }
    ));

    let err = engine
        .eval("pricing/volume", &params, Some("v9"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RulesetNotFound));

    let err = engine
        .get_float64(
            "pricing/volume",
            &ParamMap::new().with_string("seats", "many"),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Eval(EvalError::ParamTypeMismatch { .. })
    ));
}
