//! Rules and first-match rulesets.

use crate::error::EvalError;
use crate::eval::eval;
use crate::expr::{Expr, Param};
use crate::param::Params;
use crate::types::{Type, Value};

/// One decision rule: a boolean guard expression and the constant value
/// produced when it matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub expr: Expr,
    pub result: Value,
}

impl Rule {
    pub fn new(expr: Expr, result: Value) -> Rule {
        Rule { expr, result }
    }

    /// Evaluates the guard. A true guard yields the result; a false one
    /// yields [`EvalError::NoMatch`].
    pub fn eval(&self, params: &dyn Params) -> Result<Value, EvalError> {
        let guard = eval(&self.expr, params)?;
        if guard.ty() != Type::Bool {
            return Err(EvalError::Domain {
                reason: format!("rule guard evaluated to a {} instead of a Boolean", guard.ty()),
            });
        }
        if guard.as_bool()? {
            Ok(self.result.clone())
        } else {
            Err(EvalError::NoMatch)
        }
    }
}

/// An ordered list of rules evaluated first-match-wins.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ruleset {
    pub rules: Vec<Rule>,
}

impl Ruleset {
    pub fn new(rules: Vec<Rule>) -> Ruleset {
        Ruleset { rules }
    }

    /// Evaluates rules in order and returns the first match. Any error
    /// other than a non-match aborts immediately; later rules are never
    /// consulted as fallbacks.
    pub fn eval(&self, params: &dyn Params) -> Result<Value, EvalError> {
        for rule in &self.rules {
            match rule.eval(params) {
                Err(EvalError::NoMatch) => continue,
                other => return other,
            }
        }
        Err(EvalError::NoMatch)
    }

    /// Free parameters referenced across all rules, deduplicated by name
    /// in first-occurrence order.
    pub fn free_params(&self) -> Vec<Param> {
        let mut out: Vec<Param> = Vec::new();
        for rule in &self.rules {
            for param in rule.expr.free_params() {
                if !out.iter().any(|p| p.name() == param.name()) {
                    out.push(param);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::OpCode;
    use crate::param::ParamMap;

    fn matches_string(name: &str, value: &str, result: i64) -> Rule {
        let expr = Expr::op(
            OpCode::Eq,
            [
                Expr::Param(Param::string(name)),
                Expr::Value(Value::string(value)),
            ],
        )
        .unwrap();
        Rule::new(expr, Value::int64(result))
    }

    #[test]
    fn first_match_wins() {
        let ruleset = Ruleset::new(vec![
            matches_string("plan", "free", 0),
            matches_string("plan", "pro", 10),
            Rule::new(Expr::Value(Value::bool(true)), Value::int64(-1)),
        ]);

        let params = ParamMap::new().with_string("plan", "pro");
        assert_eq!(ruleset.eval(&params).unwrap(), Value::int64(10));
    }

    #[test]
    fn constant_true_guard_acts_as_default() {
        let ruleset = Ruleset::new(vec![
            matches_string("plan", "free", 0),
            Rule::new(Expr::Value(Value::bool(true)), Value::int64(-1)),
        ]);

        let params = ParamMap::new().with_string("plan", "enterprise");
        assert_eq!(ruleset.eval(&params).unwrap(), Value::int64(-1));
    }

    #[test]
    fn no_matching_rule_is_an_error() {
        let ruleset = Ruleset::new(vec![matches_string("plan", "free", 0)]);
        let params = ParamMap::new().with_string("plan", "pro");
        assert_eq!(ruleset.eval(&params), Err(EvalError::NoMatch));
    }

    #[test]
    fn empty_ruleset_never_matches() {
        let ruleset = Ruleset::default();
        assert_eq!(ruleset.eval(&ParamMap::new()), Err(EvalError::NoMatch));
    }

    #[test]
    fn errors_abort_instead_of_falling_through() {
        // First rule references a missing param; the catch-all below it
        // must not mask the failure.
        let ruleset = Ruleset::new(vec![
            matches_string("plan", "free", 0),
            Rule::new(Expr::Value(Value::bool(true)), Value::int64(-1)),
        ]);
        let err = ruleset.eval(&ParamMap::new()).unwrap_err();
        assert_eq!(
            err,
            EvalError::ParamNotFound {
                name: "plan".to_string()
            }
        );
    }

    #[test]
    fn free_params_span_all_rules() {
        let ruleset = Ruleset::new(vec![
            matches_string("plan", "free", 0),
            matches_string("region", "eu", 1),
            matches_string("plan", "pro", 2),
        ]);
        let names: Vec<String> = ruleset
            .free_params()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["plan", "region"]);
    }
}
