//! Regula rule language -- typed expression trees, operator contracts,
//! and first-match ruleset evaluation.
//!
//! Expressions are built through a contract-checked builder, so every
//! finalised tree is well typed and evaluation only ever fails on bad
//! params or domain errors (division by zero, `let` collisions). Values
//! carry canonical textual encodings, which keeps equality structural
//! and persisted rulesets byte-stable.

pub mod contract;
pub mod error;
pub mod eval;
pub mod expr;
pub mod json;
pub mod operator;
pub mod param;
pub mod ruleset;
pub mod signature;
pub mod types;

pub use contract::{Cardinality, Contract, Term};
pub use error::{BuildError, EvalError, ValidationError};
pub use eval::eval;
pub use expr::{Expr, Param};
pub use json::JsonError;
pub use operator::{OpCode, Operator, OperatorBuilder};
pub use param::{ParamMap, ParamValue, Params, Scope};
pub use ruleset::{Rule, Ruleset};
pub use signature::Signature;
pub use types::{Type, Value};
