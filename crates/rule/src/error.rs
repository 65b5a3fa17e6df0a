//! Errors produced while building, validating, and evaluating expressions.

use std::fmt;

use crate::operator::OpCode;
use crate::types::Type;

/// A contract violation detected while constructing an expression.
///
/// Build errors carry 1-based operand positions so callers can point at
/// the offending argument in their own surface syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// An operand's static type does not satisfy its positional term.
    Type {
        opcode: OpCode,
        position: usize,
        expected: Type,
        found: Type,
    },
    /// The builder was finalised with fewer operands than the contract requires.
    Arity {
        opcode: OpCode,
        required: usize,
        found: usize,
    },
    /// An operand was pushed past the last term of a saturated contract.
    TooManyOperands {
        opcode: OpCode,
        max: usize,
        position: usize,
    },
    /// No operator is registered under the given name.
    UnknownOperator { name: String },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Type {
                opcode,
                position,
                expected,
                found,
            } => {
                write!(
                    f,
                    "attempt to call {:?} with a {} in position {}, but it requires a {}",
                    opcode.as_str(),
                    found,
                    position,
                    expected
                )
            }
            BuildError::Arity {
                opcode,
                required,
                found,
            } => {
                write!(
                    f,
                    "attempted to call {:?} with {} {}, but it requires {} {}",
                    opcode.as_str(),
                    found,
                    plural(*found),
                    required,
                    plural(*required)
                )
            }
            BuildError::TooManyOperands {
                opcode,
                max,
                position,
            } => {
                write!(
                    f,
                    "attempted to pass an argument in position {} to {:?} operator, which only accepts {} arguments",
                    position,
                    opcode.as_str(),
                    max
                )
            }
            BuildError::UnknownOperator { name } => {
                write!(f, "No operator called {:?} exists", name)
            }
        }
    }
}

impl std::error::Error for BuildError {}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        "argument"
    } else {
        "arguments"
    }
}

/// A failure raised while evaluating an expression against params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The referenced parameter is absent from the ambient params.
    ParamNotFound { name: String },
    /// The referenced parameter exists but holds a different type.
    ParamTypeMismatch { name: String },
    /// No rule in the ruleset matched the given params.
    NoMatch,
    /// Integer or float division (or remainder) with a zero divisor.
    DivideByZero,
    /// The expression stepped outside its operator's domain.
    Domain { reason: String },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::ParamNotFound { name } => {
                write!(f, "parameter not found: {:?}", name)
            }
            EvalError::ParamTypeMismatch { name } => {
                write!(f, "parameter type mismatches: {:?}", name)
            }
            EvalError::NoMatch => {
                write!(f, "rule doesn't match the given params")
            }
            EvalError::DivideByZero => {
                write!(f, "division by zero")
            }
            EvalError::Domain { reason } => {
                write!(f, "{}", reason)
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// A write-time validation failure naming the offending field.
///
/// The `field` discriminates what was being validated ("path", "param",
/// "returnType", ...), `value` echoes the rejected input, and `reason`
/// explains the rule that was broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> ValidationError {
        ValidationError {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} with value '{}': {}",
            self.field, self.value, self.reason
        )
    }
}

impl std::error::Error for ValidationError {}
