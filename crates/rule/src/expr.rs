//! Expression trees.
//!
//! A tree is a composition of three node kinds: typed constants,
//! references to ambient parameters, and finalised operators. Every
//! node exposes a static return type, which is what the contract
//! machinery checks during construction.

use crate::error::BuildError;
use crate::operator::{OpCode, Operator, OperatorBuilder};
use crate::types::{Type, Value};

/// A typed reference to a named parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    ty: Type,
    name: String,
}

impl Param {
    /// Builds a reference from wire parts. Used when decoding persisted
    /// trees; prefer the typed constructors elsewhere.
    pub fn new(ty: Type, name: impl Into<String>) -> Param {
        Param {
            ty,
            name: name.into(),
        }
    }

    pub fn string(name: impl Into<String>) -> Param {
        Param::new(Type::String, name)
    }

    pub fn bool(name: impl Into<String>) -> Param {
        Param::new(Type::Bool, name)
    }

    pub fn int64(name: impl Into<String>) -> Param {
        Param::new(Type::Int64, name)
    }

    pub fn float64(name: impl Into<String>) -> Param {
        Param::new(Type::Float64, name)
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One node of an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A typed constant.
    Value(Value),
    /// A reference to an ambient parameter.
    Param(Param),
    /// An operator applied to operands.
    Op(Operator),
}

impl Expr {
    /// Builds an operator expression in one call, pushing each operand
    /// and finalising.
    pub fn op<I>(opcode: OpCode, operands: I) -> Result<Expr, BuildError>
    where
        I: IntoIterator<Item = Expr>,
    {
        let mut builder = OperatorBuilder::new(opcode);
        for operand in operands {
            builder.push_expr(operand)?;
        }
        builder.finalise()
    }

    /// The static type this expression evaluates to. Always concrete
    /// for finalised trees.
    pub fn return_type(&self) -> Type {
        match self {
            Expr::Value(v) => v.ty(),
            Expr::Param(p) => p.ty(),
            Expr::Op(op) => op.return_type(),
        }
    }

    /// Every free parameter reference in the tree, deduplicated by name
    /// in first-occurrence order. Names bound by an enclosing `let` are
    /// not free in its body.
    pub fn free_params(&self) -> Vec<Param> {
        let mut out: Vec<Param> = Vec::new();
        for param in self.free_param_occurrences() {
            if !out.iter().any(|p| p.name() == param.name()) {
                out.push(param);
            }
        }
        out
    }

    /// Every free parameter occurrence, in traversal order and without
    /// deduplication. Signature validation checks each occurrence, since
    /// one name may be referenced at conflicting types.
    pub(crate) fn free_param_occurrences(&self) -> Vec<Param> {
        let mut bound = Vec::new();
        let mut out = Vec::new();
        collect_free(self, &mut bound, &mut out);
        out
    }
}

fn collect_free(expr: &Expr, bound: &mut Vec<String>, out: &mut Vec<Param>) {
    match expr {
        Expr::Value(_) => {}
        Expr::Param(param) => {
            if !bound.iter().any(|b| b == param.name()) {
                out.push(param.clone());
            }
        }
        Expr::Op(op) if op.opcode() == OpCode::Let => {
            let operands = op.operands();
            // The bound value is computed in the outer scope.
            collect_free(&operands[1], bound, out);
            if let Expr::Param(binding) = &operands[0] {
                bound.push(binding.name().to_string());
                collect_free(&operands[2], bound, out);
                bound.pop();
            } else {
                collect_free(&operands[0], bound, out);
                collect_free(&operands[2], bound, out);
            }
        }
        Expr::Op(op) => {
            for operand in op.operands() {
                collect_free(operand, bound, out);
            }
        }
    }
}
