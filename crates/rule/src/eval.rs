//! Recursive evaluation of finalised expression trees.
//!
//! Trees arriving here were contract-checked at build time, so the
//! evaluator trusts static types: it dispatches ordered comparison on
//! the first operand's type and picks integer or float arithmetic from
//! the narrowed return type. What it cannot trust is the params, which
//! is where the runtime errors come from.

use std::cmp::Ordering;

use crate::error::EvalError;
use crate::expr::{Expr, Param};
use crate::operator::{OpCode, Operator};
use crate::param::{ParamValue, Params, Scope};
use crate::types::{fnv1_32, Type, Value};

/// Evaluates an expression against the given params.
pub fn eval(expr: &Expr, params: &dyn Params) -> Result<Value, EvalError> {
    match expr {
        Expr::Value(value) => Ok(value.clone()),
        Expr::Param(param) => eval_param(param, params),
        Expr::Op(op) => eval_op(op, params),
    }
}

fn eval_param(param: &Param, params: &dyn Params) -> Result<Value, EvalError> {
    match param.ty() {
        Type::String => params.get_string(param.name()).map(Value::string),
        Type::Bool => params.get_bool(param.name()).map(Value::bool),
        Type::Int64 => params.get_int64(param.name()).map(Value::int64),
        Type::Float64 => params.get_float64(param.name()).map(Value::float64),
        Type::Number | Type::Any => Err(EvalError::Domain {
            reason: format!("parameter {:?} has an abstract type", param.name()),
        }),
    }
}

fn eval_op(op: &Operator, params: &dyn Params) -> Result<Value, EvalError> {
    let operands = op.operands();
    match op.opcode() {
        OpCode::Eq => eval_eq(operands, params),
        OpCode::In => eval_in(operands, params),
        OpCode::Not => Ok(Value::bool(!eval_bool(&operands[0], params)?)),
        OpCode::And => eval_and(operands, params),
        OpCode::Or => eval_or(operands, params),
        OpCode::Lt => eval_ordered(operands, params, Ordering::Less, false),
        OpCode::Lte => eval_ordered(operands, params, Ordering::Less, true),
        OpCode::Gt => eval_ordered(operands, params, Ordering::Greater, false),
        OpCode::Gte => eval_ordered(operands, params, Ordering::Greater, true),
        OpCode::Add | OpCode::Sub | OpCode::Mult | OpCode::Div => eval_arith(op, params),
        OpCode::Mod => eval_mod(operands, params),
        OpCode::Fnv => {
            let value = eval(&operands[0], params)?;
            Ok(Value::int64(i64::from(fnv1_32(value.data().as_bytes()))))
        }
        OpCode::Percentile => eval_percentile(operands, params),
        OpCode::Let => eval_let(operands, params),
        OpCode::If => {
            if eval_bool(&operands[0], params)? {
                eval(&operands[1], params)
            } else {
                eval(&operands[2], params)
            }
        }
        OpCode::IntToFloat => {
            let i = eval_int64(&operands[0], params)?;
            Ok(Value::float64(i as f64))
        }
    }
}

fn eval_bool(expr: &Expr, params: &dyn Params) -> Result<bool, EvalError> {
    eval(expr, params)?.as_bool()
}

fn eval_int64(expr: &Expr, params: &dyn Params) -> Result<i64, EvalError> {
    eval(expr, params)?.as_int64()
}

fn eval_float64(expr: &Expr, params: &dyn Params) -> Result<f64, EvalError> {
    eval(expr, params)?.as_float64()
}

/// Structural equality against the first operand, stopping at the first
/// mismatch.
fn eval_eq(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let first = eval(&operands[0], params)?;
    for operand in &operands[1..] {
        if eval(operand, params)? != first {
            return Ok(Value::bool(false));
        }
    }
    Ok(Value::bool(true))
}

/// Whether the first operand equals any of the rest.
fn eval_in(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let needle = eval(&operands[0], params)?;
    for operand in &operands[1..] {
        if eval(operand, params)? == needle {
            return Ok(Value::bool(true));
        }
    }
    Ok(Value::bool(false))
}

fn eval_and(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    for operand in operands {
        if !eval_bool(operand, params)? {
            return Ok(Value::bool(false));
        }
    }
    Ok(Value::bool(true))
}

fn eval_or(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    for operand in operands {
        if eval_bool(operand, params)? {
            return Ok(Value::bool(true));
        }
    }
    Ok(Value::bool(false))
}

/// Chained ordered comparison: every adjacent pair must satisfy the
/// wanted ordering. Dispatches on the first operand's static type, which
/// finalisation guarantees all operands share. An unordered pair (float
/// NaN) fails the chain rather than erroring.
fn eval_ordered(
    operands: &[Expr],
    params: &dyn Params,
    want: Ordering,
    allow_equal: bool,
) -> Result<Value, EvalError> {
    let ty = operands[0].return_type();
    let mut prev = eval(&operands[0], params)?;
    for operand in &operands[1..] {
        let next = eval(operand, params)?;
        let holds = match compare_values(ty, &prev, &next)? {
            Some(ordering) => ordering == want || (allow_equal && ordering == Ordering::Equal),
            None => false,
        };
        if !holds {
            return Ok(Value::bool(false));
        }
        prev = next;
    }
    Ok(Value::bool(true))
}

fn compare_values(ty: Type, a: &Value, b: &Value) -> Result<Option<Ordering>, EvalError> {
    match ty {
        Type::Int64 => Ok(Some(a.as_int64()?.cmp(&b.as_int64()?))),
        Type::Float64 => Ok(a.as_float64()?.partial_cmp(&b.as_float64()?)),
        Type::String => Ok(Some(a.data().cmp(b.data()))),
        // false orders before true
        Type::Bool => Ok(Some(a.as_bool()?.cmp(&b.as_bool()?))),
        Type::Number | Type::Any => Err(EvalError::Domain {
            reason: format!("cannot order values of type {}", ty),
        }),
    }
}

/// Left-to-right arithmetic reduction. The narrowed return type selects
/// integer or float mode; integers wrap on overflow.
fn eval_arith(op: &Operator, params: &dyn Params) -> Result<Value, EvalError> {
    let opcode = op.opcode();
    let operands = op.operands();
    if op.return_type() == Type::Float64 {
        let mut acc = eval_float64(&operands[0], params)?;
        for operand in &operands[1..] {
            let next = eval_float64(operand, params)?;
            acc = match opcode {
                OpCode::Add => acc + next,
                OpCode::Sub => acc - next,
                OpCode::Mult => acc * next,
                OpCode::Div => {
                    if next == 0.0 {
                        return Err(EvalError::DivideByZero);
                    }
                    acc / next
                }
                _ => unreachable!("non-arithmetic opcode in eval_arith"),
            };
        }
        Ok(Value::float64(acc))
    } else {
        let mut acc = eval_int64(&operands[0], params)?;
        for operand in &operands[1..] {
            let next = eval_int64(operand, params)?;
            acc = match opcode {
                OpCode::Add => acc.wrapping_add(next),
                OpCode::Sub => acc.wrapping_sub(next),
                OpCode::Mult => acc.wrapping_mul(next),
                OpCode::Div => {
                    if next == 0 {
                        return Err(EvalError::DivideByZero);
                    }
                    acc.wrapping_div(next)
                }
                _ => unreachable!("non-arithmetic opcode in eval_arith"),
            };
        }
        Ok(Value::int64(acc))
    }
}

fn eval_mod(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let dividend = eval_int64(&operands[0], params)?;
    let divisor = eval_int64(&operands[1], params)?;
    if divisor == 0 {
        return Err(EvalError::DivideByZero);
    }
    Ok(Value::int64(dividend.wrapping_rem(divisor)))
}

/// Hashes the first operand's canonical encoding and checks whether the
/// bucket (hash mod 100) falls at or below the threshold.
fn eval_percentile(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let value = eval(&operands[0], params)?;
    let hash = i64::from(fnv1_32(value.data().as_bytes()));
    let threshold = eval_int64(&operands[1], params)?;
    Ok(Value::bool(hash % 100 <= threshold))
}

/// Binds a name over the ambient params for the body. The first operand
/// is a parameter reference naming the binding and is never evaluated;
/// the second is evaluated in the outer scope.
fn eval_let(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let binding = match &operands[0] {
        Expr::Param(param) => param,
        _ => {
            return Err(EvalError::Domain {
                reason: "let requires a parameter reference as its first operand".to_string(),
            })
        }
    };
    let value = eval(&operands[1], params)?;
    let bound = match binding.ty() {
        Type::String => ParamValue::String(value.data().to_string()),
        Type::Bool => ParamValue::Bool(value.as_bool()?),
        Type::Int64 => ParamValue::Int64(value.as_int64()?),
        Type::Float64 => ParamValue::Float64(value.as_float64()?),
        Type::Number | Type::Any => {
            return Err(EvalError::Domain {
                reason: format!("parameter {:?} has an abstract type", binding.name()),
            })
        }
    };
    let scope = Scope::bind(binding.name(), bound, params)?;
    eval(&operands[2], &scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ParamMap;

    fn int(v: i64) -> Expr {
        Expr::Value(Value::int64(v))
    }

    fn float(v: f64) -> Expr {
        Expr::Value(Value::float64(v))
    }

    fn string(v: &str) -> Expr {
        Expr::Value(Value::string(v))
    }

    fn boolean(v: bool) -> Expr {
        Expr::Value(Value::bool(v))
    }

    fn op(opcode: OpCode, operands: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::op(opcode, operands).unwrap()
    }

    /// An expression that builds fine but fails at eval time, for
    /// proving operands beyond a decisive one are never evaluated.
    fn poison() -> Expr {
        op(OpCode::Eq, [op(OpCode::Div, [int(1), int(0)]), int(1)])
    }

    fn none() -> ParamMap {
        ParamMap::new()
    }

    #[test]
    fn eq_compares_structurally() {
        let expr = op(
            OpCode::Eq,
            [Expr::Param(Param::string("id")), string("123")],
        );
        let matched = eval(&expr, &ParamMap::new().with_string("id", "123")).unwrap();
        assert_eq!(matched, Value::bool(true));
        let missed = eval(&expr, &ParamMap::new().with_string("id", "456")).unwrap();
        assert_eq!(missed, Value::bool(false));
    }

    #[test]
    fn eq_stops_at_first_mismatch() {
        let expr = op(OpCode::Eq, [int(1), int(2), poison()]);
        assert_eq!(eval(&expr, &none()).unwrap(), Value::bool(false));
    }

    #[test]
    fn eq_distinguishes_types_with_equal_encodings() {
        let expr = op(OpCode::Eq, [int(1), string("1")]);
        assert_eq!(eval(&expr, &none()).unwrap(), Value::bool(false));
    }

    #[test]
    fn in_checks_membership() {
        let expr = op(
            OpCode::In,
            [Expr::Param(Param::string("tier")), string("gold"), string("silver")],
        );
        let hit = eval(&expr, &ParamMap::new().with_string("tier", "silver")).unwrap();
        assert_eq!(hit, Value::bool(true));
        let miss = eval(&expr, &ParamMap::new().with_string("tier", "bronze")).unwrap();
        assert_eq!(miss, Value::bool(false));
    }

    #[test]
    fn not_negates() {
        let expr = op(OpCode::Not, [boolean(false)]);
        assert_eq!(eval(&expr, &none()).unwrap(), Value::bool(true));
    }

    #[test]
    fn and_short_circuits_on_false() {
        let expr = op(OpCode::And, [boolean(false), poison()]);
        assert_eq!(eval(&expr, &none()).unwrap(), Value::bool(false));

        let all = op(OpCode::And, [boolean(true), boolean(true)]);
        assert_eq!(eval(&all, &none()).unwrap(), Value::bool(true));
    }

    #[test]
    fn or_short_circuits_on_true() {
        let expr = op(OpCode::Or, [boolean(true), poison()]);
        assert_eq!(eval(&expr, &none()).unwrap(), Value::bool(true));

        let neither = op(OpCode::Or, [boolean(false), boolean(false)]);
        assert_eq!(eval(&neither, &none()).unwrap(), Value::bool(false));
    }

    #[test]
    fn ordered_comparison_per_type() {
        assert_eq!(
            eval(&op(OpCode::Lt, [int(1), int(2), int(3)]), &none()).unwrap(),
            Value::bool(true)
        );
        assert_eq!(
            eval(&op(OpCode::Lt, [int(1), int(3), int(2)]), &none()).unwrap(),
            Value::bool(false)
        );
        assert_eq!(
            eval(&op(OpCode::Lte, [int(2), int(2)]), &none()).unwrap(),
            Value::bool(true)
        );
        assert_eq!(
            eval(&op(OpCode::Gt, [float(2.5), float(1.5)]), &none()).unwrap(),
            Value::bool(true)
        );
        assert_eq!(
            eval(&op(OpCode::Gte, [string("b"), string("b"), string("a")]), &none()).unwrap(),
            Value::bool(true)
        );
        // false orders before true
        assert_eq!(
            eval(&op(OpCode::Lt, [boolean(false), boolean(true)]), &none()).unwrap(),
            Value::bool(true)
        );
    }

    #[test]
    fn integer_arithmetic_truncates_division() {
        let expr = op(OpCode::Div, [int(7), int(2)]);
        assert_eq!(eval(&expr, &none()).unwrap(), Value::int64(3));
    }

    #[test]
    fn arithmetic_reduces_left_to_right() {
        let expr = op(OpCode::Sub, [int(10), int(3), int(2)]);
        assert_eq!(eval(&expr, &none()).unwrap(), Value::int64(5));
        let product = op(OpCode::Mult, [int(2), int(3), int(4)]);
        assert_eq!(eval(&product, &none()).unwrap(), Value::int64(24));
    }

    #[test]
    fn mixed_arithmetic_returns_a_float() {
        let expr = op(OpCode::Add, [int(1), float(1.5)]);
        let result = eval(&expr, &none()).unwrap();
        assert_eq!(result.ty(), Type::Float64);
        assert_eq!(result.data(), "2.500000");
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let int_div = op(OpCode::Div, [int(1), int(0)]);
        assert_eq!(eval(&int_div, &none()), Err(EvalError::DivideByZero));

        let float_div = op(OpCode::Div, [float(1.0), float(0.0)]);
        assert_eq!(eval(&float_div, &none()), Err(EvalError::DivideByZero));

        let rem = op(OpCode::Mod, [int(5), int(0)]);
        assert_eq!(eval(&rem, &none()), Err(EvalError::DivideByZero));
    }

    #[test]
    fn mod_of_integers() {
        let expr = op(OpCode::Mod, [int(7), int(3)]);
        assert_eq!(eval(&expr, &none()).unwrap(), Value::int64(1));
    }

    #[test]
    fn fnv_hashes_the_canonical_encoding() {
        let expr = op(OpCode::Fnv, [string("a")]);
        let result = eval(&expr, &none()).unwrap();
        assert_eq!(result, Value::int64(i64::from(0x050c_5d7e_u32)));
    }

    #[test]
    fn percentile_buckets_are_stable() {
        // fnv1("a") = 84696446, bucket 46
        let at = op(OpCode::Percentile, [string("a"), int(46)]);
        assert_eq!(eval(&at, &none()).unwrap(), Value::bool(true));
        let below = op(OpCode::Percentile, [string("a"), int(45)]);
        assert_eq!(eval(&below, &none()).unwrap(), Value::bool(false));
        let everyone = op(OpCode::Percentile, [string("a"), int(100)]);
        assert_eq!(eval(&everyone, &none()).unwrap(), Value::bool(true));
    }

    #[test]
    fn let_binds_for_the_body() {
        // let n = add(x, 1) in eq(n, 3)
        let value = op(OpCode::Add, [Expr::Param(Param::int64("x")), int(1)]);
        let body = op(OpCode::Eq, [Expr::Param(Param::int64("n")), int(3)]);
        let expr = op(OpCode::Let, [Expr::Param(Param::int64("n")), value, body]);

        let result = eval(&expr, &ParamMap::new().with_int64("x", 2)).unwrap();
        assert_eq!(result, Value::bool(true));
    }

    #[test]
    fn let_rejects_colliding_names() {
        let expr = op(
            OpCode::Let,
            [
                Expr::Param(Param::int64("x")),
                int(1),
                Expr::Param(Param::int64("x")),
            ],
        );
        let err = eval(&expr, &ParamMap::new().with_int64("x", 9)).unwrap_err();
        assert!(matches!(err, EvalError::Domain { .. }));
    }

    #[test]
    fn let_requires_a_param_reference() {
        let expr = op(OpCode::Let, [int(1), int(1), int(2)]);
        let err = eval(&expr, &none()).unwrap_err();
        assert!(matches!(err, EvalError::Domain { .. }));
    }

    #[test]
    fn if_evaluates_only_the_selected_branch() {
        let then_poison = op(
            OpCode::If,
            [boolean(false), poison(), op(OpCode::Eq, [int(1), int(1)])],
        );
        assert_eq!(eval(&then_poison, &none()).unwrap(), Value::bool(true));

        let else_poison = op(OpCode::If, [boolean(true), string("yes"), string("no")]);
        assert_eq!(eval(&else_poison, &none()).unwrap(), Value::string("yes"));
    }

    #[test]
    fn param_type_mismatch_surfaces() {
        let expr = op(OpCode::Eq, [Expr::Param(Param::int64("n")), int(1)]);
        let err = eval(&expr, &ParamMap::new().with_string("n", "1")).unwrap_err();
        assert_eq!(
            err,
            EvalError::ParamTypeMismatch {
                name: "n".to_string()
            }
        );
    }

    #[test]
    fn missing_param_surfaces() {
        let expr = op(OpCode::Eq, [Expr::Param(Param::bool("on")), boolean(true)]);
        let err = eval(&expr, &none()).unwrap_err();
        assert_eq!(
            err,
            EvalError::ParamNotFound {
                name: "on".to_string()
            }
        );
    }
}
