//! The operator catalogue and the contract-checked expression builder.
//!
//! Operators are built in two phases: operands are pushed one at a time
//! and checked against the contract's positional terms, then `finalise`
//! verifies arity, applies numeric homogenisation, and narrows abstract
//! return types to concrete ones. A finalised [`Operator`] is immutable.

use std::str::FromStr;

use crate::contract::{Contract, Term};
use crate::error::BuildError;
use crate::expr::Expr;
use crate::types::Type;

/// Identifies a registered operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Eq,
    In,
    Not,
    And,
    Or,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    Fnv,
    Percentile,
    Let,
    If,
    IntToFloat,
}

impl OpCode {
    /// The wire and surface name.
    pub fn as_str(self) -> &'static str {
        match self {
            OpCode::Eq => "eq",
            OpCode::In => "in",
            OpCode::Not => "not",
            OpCode::And => "and",
            OpCode::Or => "or",
            OpCode::Lt => "lt",
            OpCode::Lte => "lte",
            OpCode::Gt => "gt",
            OpCode::Gte => "gte",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mult => "mult",
            OpCode::Div => "div",
            OpCode::Mod => "mod",
            OpCode::Fnv => "fnv",
            OpCode::Percentile => "percentile",
            OpCode::Let => "let",
            OpCode::If => "if",
            OpCode::IntToFloat => "intToFloat",
        }
    }

    /// The publicly registered operators. `intToFloat` is reachable only
    /// through homogenisation and persisted trees, so it is not listed.
    pub fn registered() -> &'static [OpCode] {
        &[
            OpCode::Eq,
            OpCode::In,
            OpCode::Not,
            OpCode::And,
            OpCode::Or,
            OpCode::Lt,
            OpCode::Lte,
            OpCode::Gt,
            OpCode::Gte,
            OpCode::Add,
            OpCode::Sub,
            OpCode::Mult,
            OpCode::Div,
            OpCode::Mod,
            OpCode::Fnv,
            OpCode::Percentile,
            OpCode::Let,
            OpCode::If,
        ]
    }

    /// The operator's declared contract.
    pub fn contract(self) -> Contract {
        let (return_type, terms) = match self {
            OpCode::Eq => (Type::Bool, vec![Term::many(Type::Any, 2)]),
            OpCode::In => (
                Type::Bool,
                vec![Term::one(Type::Any), Term::many(Type::Any, 1)],
            ),
            OpCode::Not => (Type::Bool, vec![Term::one(Type::Bool)]),
            OpCode::And | OpCode::Or => (Type::Bool, vec![Term::many(Type::Bool, 2)]),
            OpCode::Lt | OpCode::Lte | OpCode::Gt | OpCode::Gte => {
                (Type::Bool, vec![Term::many(Type::Any, 2)])
            }
            OpCode::Add | OpCode::Sub | OpCode::Mult | OpCode::Div => {
                (Type::Number, vec![Term::many(Type::Number, 2)])
            }
            OpCode::Mod => (
                Type::Int64,
                vec![Term::one(Type::Int64), Term::one(Type::Int64)],
            ),
            OpCode::Fnv => (Type::Int64, vec![Term::one(Type::Any)]),
            OpCode::Percentile => (
                Type::Bool,
                vec![Term::one(Type::Any), Term::one(Type::Int64)],
            ),
            OpCode::Let => (
                Type::Any,
                vec![
                    Term::one(Type::Any),
                    Term::one(Type::Any),
                    Term::one(Type::Any),
                ],
            ),
            OpCode::If => (
                Type::Any,
                vec![
                    Term::one(Type::Bool),
                    Term::one(Type::Any),
                    Term::one(Type::Any),
                ],
            ),
            OpCode::IntToFloat => (Type::Float64, vec![Term::one(Type::Int64)]),
        };
        Contract {
            opcode: self,
            return_type,
            terms,
        }
    }
}

impl FromStr for OpCode {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<OpCode, BuildError> {
        let opcode = match s {
            "eq" => OpCode::Eq,
            "in" => OpCode::In,
            "not" => OpCode::Not,
            "and" => OpCode::And,
            "or" => OpCode::Or,
            "lt" => OpCode::Lt,
            "lte" => OpCode::Lte,
            "gt" => OpCode::Gt,
            "gte" => OpCode::Gte,
            "add" => OpCode::Add,
            "sub" => OpCode::Sub,
            "mult" => OpCode::Mult,
            "div" => OpCode::Div,
            "mod" => OpCode::Mod,
            "fnv" => OpCode::Fnv,
            "percentile" => OpCode::Percentile,
            "let" => OpCode::Let,
            "if" => OpCode::If,
            "intToFloat" => OpCode::IntToFloat,
            other => {
                return Err(BuildError::UnknownOperator {
                    name: other.to_string(),
                })
            }
        };
        Ok(opcode)
    }
}

/// A finalised operator node: an opcode applied to checked operands.
///
/// Only [`OperatorBuilder::finalise`] produces these, so every instance
/// satisfies its contract and carries a concrete return type.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    contract: Contract,
    operands: Vec<Expr>,
}

impl Operator {
    pub fn opcode(&self) -> OpCode {
        self.contract.opcode
    }

    pub fn return_type(&self) -> Type {
        self.contract.return_type
    }

    pub fn operands(&self) -> &[Expr] {
        &self.operands
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Accumulates operands for one operator, checking each against the
/// contract as it arrives.
#[derive(Debug)]
pub struct OperatorBuilder {
    contract: Contract,
    operands: Vec<Expr>,
}

impl OperatorBuilder {
    pub fn new(opcode: OpCode) -> OperatorBuilder {
        OperatorBuilder {
            contract: opcode.contract(),
            operands: Vec::new(),
        }
    }

    /// Adds the next operand. Fails when the position is past the last
    /// term or the operand's static type does not satisfy its term.
    pub fn push_expr(&mut self, expr: Expr) -> Result<(), BuildError> {
        let position = self.operands.len();
        let term = match self.contract.term_at(position) {
            Some(term) => term,
            None => {
                let max = self.contract.max_operands().unwrap_or(position);
                return Err(BuildError::TooManyOperands {
                    opcode: self.contract.opcode,
                    max,
                    position: position + 1,
                });
            }
        };
        let found = expr.return_type();
        if !term.fulfilled_by(found) {
            return Err(BuildError::Type {
                opcode: self.contract.opcode,
                position: position + 1,
                expected: term.ty,
                found,
            });
        }
        self.operands.push(expr);
        Ok(())
    }

    /// Checks arity, homogenises numeric operands, narrows the return
    /// type, and yields the immutable expression.
    pub fn finalise(mut self) -> Result<Expr, BuildError> {
        let required = self.contract.min_operands();
        if self.operands.len() < required {
            return Err(BuildError::Arity {
                opcode: self.contract.opcode,
                required,
                found: self.operands.len(),
            });
        }
        self.homogenise();
        self.narrow()?;
        Ok(Expr::Op(Operator {
            contract: self.contract,
            operands: self.operands,
        }))
    }

    /// Mixed integers and floats under a `Many` `Number` term are made
    /// uniform: integers are wrapped in `intToFloat` and the element
    /// type becomes `Float64`; all-integer stays `Int64`. A `Number`
    /// return type narrows to the element type. Wrapping is the only
    /// implicit coercion anywhere in the language.
    fn homogenise(&mut self) {
        let positions = self
            .contract
            .many_positions(Type::Number, self.operands.len());
        if positions.is_empty() {
            return;
        }
        let mixed = positions
            .iter()
            .any(|&p| self.operands[p].return_type() == Type::Float64);
        if mixed {
            for &p in &positions {
                if self.operands[p].return_type() == Type::Int64 {
                    self.operands[p] = Expr::Op(Operator {
                        contract: OpCode::IntToFloat.contract(),
                        operands: vec![self.operands[p].clone()],
                    });
                }
            }
        }
        if self.contract.return_type == Type::Number {
            self.contract.return_type = if mixed { Type::Float64 } else { Type::Int64 };
        }
    }

    /// Narrows `Any` return types and enforces the type agreements that
    /// only hold once every operand is present.
    fn narrow(&mut self) -> Result<(), BuildError> {
        match self.contract.opcode {
            // Both branches must agree; the expression takes their type.
            OpCode::If => {
                let then_ty = self.operands[1].return_type();
                let else_ty = self.operands[2].return_type();
                if then_ty != else_ty {
                    return Err(BuildError::Type {
                        opcode: OpCode::If,
                        position: 3,
                        expected: then_ty,
                        found: else_ty,
                    });
                }
                self.contract.return_type = then_ty;
            }
            // The bound value must match the binding's declared type; the
            // expression takes the body's type.
            OpCode::Let => {
                let declared = self.operands[0].return_type();
                let bound = self.operands[1].return_type();
                if declared != bound {
                    return Err(BuildError::Type {
                        opcode: OpCode::Let,
                        position: 2,
                        expected: declared,
                        found: bound,
                    });
                }
                self.contract.return_type = self.operands[2].return_type();
            }
            // Ordered comparison is defined per type, never across types.
            OpCode::Lt | OpCode::Lte | OpCode::Gt | OpCode::Gte => {
                let first = self.operands[0].return_type();
                for (i, operand) in self.operands.iter().enumerate().skip(1) {
                    let found = operand.return_type();
                    if found != first {
                        return Err(BuildError::Type {
                            opcode: self.contract.opcode,
                            position: i + 1,
                            expected: first,
                            found,
                        });
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
