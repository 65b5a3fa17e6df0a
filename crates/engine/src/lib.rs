//! Regula evaluation engine -- a typed front end over any ruleset
//! source.
//!
//! The engine does not know where rulesets live. Anything that can
//! resolve a path to a ruleset implements [`Evaluator`]; the storage
//! service is one implementation, the in-memory [`RulesetBuffer`] is
//! another. [`Engine`] wraps an evaluator with typed getters that
//! reject results of the wrong type before the caller sees them.

mod buffer;

pub use buffer::RulesetBuffer;

use async_trait::async_trait;
use regula_rule::{EvalError, Params, Type, Value};

/// Errors surfaced by evaluators and the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No ruleset exists at the path (or the requested version of it).
    #[error("ruleset not found")]
    RulesetNotFound,
    /// The ruleset's result type differs from what the caller asked for.
    #[error("requested a {requested} but the ruleset returns a {returned}")]
    ResultTypeMismatch { requested: Type, returned: Type },
    /// Evaluation itself failed.
    #[error(transparent)]
    Eval(#[from] EvalError),
    /// The backing source failed.
    #[error("evaluator backend error: {0}")]
    Backend(String),
}

/// The product of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    /// Value produced by the first matching rule.
    pub value: Value,
    /// Version of the ruleset that produced it.
    pub version: String,
}

impl EvalResult {
    pub fn new(value: Value, version: impl Into<String>) -> EvalResult {
        EvalResult {
            value,
            version: version.into(),
        }
    }
}

/// A source of rulesets that can evaluate them by path.
///
/// ## Version pinning
///
/// `eval` resolves the latest version of the path; `eval_version` pins
/// a specific one. The version that actually ran is reported back in
/// the [`EvalResult`], so callers can pin future calls to it.
///
/// ## Thread safety
///
/// Implementations must be `Send + Sync` so one evaluator can serve
/// concurrent evaluations.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluates the latest version of the ruleset at `path`.
    async fn eval(&self, path: &str, params: &dyn Params) -> Result<EvalResult, EngineError>;

    /// Evaluates the given version of the ruleset at `path`.
    async fn eval_version(
        &self,
        path: &str,
        version: &str,
        params: &dyn Params,
    ) -> Result<EvalResult, EngineError>;
}

/// Typed front end over an [`Evaluator`].
///
/// Each getter requests one concrete result type and fails with
/// [`EngineError::ResultTypeMismatch`] when the ruleset returns another,
/// so a caller asking for a boolean can never be handed a string. The
/// engine holds no state of its own.
pub struct Engine<E> {
    evaluator: E,
}

impl<E: Evaluator> Engine<E> {
    pub fn new(evaluator: E) -> Engine<E> {
        Engine { evaluator }
    }

    /// Evaluates without a type expectation. `version` pins a specific
    /// ruleset version; `None` uses the latest.
    pub async fn eval(
        &self,
        path: &str,
        params: &dyn Params,
        version: Option<&str>,
    ) -> Result<EvalResult, EngineError> {
        match version {
            Some(version) => self.evaluator.eval_version(path, version, params).await,
            None => self.evaluator.eval(path, params).await,
        }
    }

    pub async fn get_string(
        &self,
        path: &str,
        params: &dyn Params,
        version: Option<&str>,
    ) -> Result<String, EngineError> {
        let result = self.expect(Type::String, path, params, version).await?;
        Ok(result.value.data().to_string())
    }

    pub async fn get_bool(
        &self,
        path: &str,
        params: &dyn Params,
        version: Option<&str>,
    ) -> Result<bool, EngineError> {
        let result = self.expect(Type::Bool, path, params, version).await?;
        Ok(result.value.as_bool()?)
    }

    pub async fn get_int64(
        &self,
        path: &str,
        params: &dyn Params,
        version: Option<&str>,
    ) -> Result<i64, EngineError> {
        let result = self.expect(Type::Int64, path, params, version).await?;
        Ok(result.value.as_int64()?)
    }

    pub async fn get_float64(
        &self,
        path: &str,
        params: &dyn Params,
        version: Option<&str>,
    ) -> Result<f64, EngineError> {
        let result = self.expect(Type::Float64, path, params, version).await?;
        Ok(result.value.as_float64()?)
    }

    async fn expect(
        &self,
        requested: Type,
        path: &str,
        params: &dyn Params,
        version: Option<&str>,
    ) -> Result<EvalResult, EngineError> {
        let result = self.eval(path, params, version).await?;
        if result.value.ty() != requested {
            return Err(EngineError::ResultTypeMismatch {
                requested,
                returned: result.value.ty(),
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regula_rule::{Expr, OpCode, Param, ParamMap, Rule, Ruleset};

    fn pricing_ruleset() -> Ruleset {
        let gold = Expr::op(
            OpCode::Eq,
            [
                Expr::Param(Param::string("tier")),
                Expr::Value(Value::string("gold")),
            ],
        )
        .unwrap();
        Ruleset::new(vec![
            Rule::new(gold, Value::float64(0.25)),
            Rule::new(Expr::Value(Value::bool(true)), Value::float64(0.0)),
        ])
    }

    fn buffer() -> RulesetBuffer {
        let buffer = RulesetBuffer::new();
        buffer.add("pricing/discount", "v1", pricing_ruleset());
        buffer
    }

    #[tokio::test]
    async fn typed_getter_returns_the_value_and_checks_the_type() {
        let engine = Engine::new(buffer());
        let params = ParamMap::new().with_string("tier", "gold");

        let discount = engine
            .get_float64("pricing/discount", &params, None)
            .await
            .unwrap();
        assert_eq!(discount, 0.25);

        let err = engine
            .get_bool("pricing/discount", &params, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::ResultTypeMismatch {
                requested: Type::Bool,
                returned: Type::Float64,
            }
        ));
    }

    #[tokio::test]
    async fn eval_reports_the_version_that_ran() {
        let engine = Engine::new(buffer());
        let params = ParamMap::new().with_string("tier", "none");
        let result = engine.eval("pricing/discount", &params, None).await.unwrap();
        assert_eq!(result.version, "v1");
        assert_eq!(result.value, Value::float64(0.0));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let engine = Engine::new(RulesetBuffer::new());
        let err = engine
            .get_bool("missing", &ParamMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RulesetNotFound));
    }

    #[tokio::test]
    async fn eval_errors_pass_through() {
        let engine = Engine::new(buffer());
        let err = engine
            .get_float64("pricing/discount", &ParamMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Eval(EvalError::ParamNotFound { .. })
        ));
    }
}
