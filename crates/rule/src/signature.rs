//! Ruleset signatures: the declared result type and parameter types.
//!
//! A signature is fixed at creation and every subsequent rules write is
//! checked against it, so readers can rely on a path always producing
//! the same result type with the same inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ruleset::Rule;
use crate::types::Type;

/// The declared types of a ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Type every rule result must have.
    #[serde(rename = "returnType")]
    pub return_type: Type,
    /// Declared parameters by name. Sorted, so encodings are stable.
    #[serde(default)]
    pub params: BTreeMap<String, Type>,
}

impl Signature {
    pub fn new(return_type: Type) -> Signature {
        Signature {
            return_type,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, ty: Type) -> Signature {
        self.params.insert(name.into(), ty);
        self
    }

    /// Checks one rule against this signature: the result type must
    /// match, the guard must be boolean, and every free parameter
    /// reference must be declared at the referenced type. Names bound by
    /// `let` are checked structurally at build time instead, so they are
    /// exempt here.
    pub fn validate(&self, rule: &Rule) -> Result<(), ValidationError> {
        if rule.result.ty() != self.return_type {
            return Err(ValidationError::new(
                "returnType",
                rule.result.ty().name(),
                format!(
                    "signature mismatch: return type must be of type {}",
                    self.return_type.name()
                ),
            ));
        }
        if rule.expr.return_type() != Type::Bool {
            return Err(ValidationError::new(
                "expr",
                rule.expr.return_type().name(),
                "signature mismatch: rule expression must return a bool",
            ));
        }
        for param in rule.expr.free_param_occurrences() {
            match self.params.get(param.name()) {
                None => {
                    return Err(ValidationError::new(
                        "param",
                        param.name(),
                        "signature mismatch: unknown parameter",
                    ));
                }
                Some(declared) if *declared != param.ty() => {
                    return Err(ValidationError::new(
                        "param type",
                        param.ty().name(),
                        format!(
                            "signature mismatch: param must be of type {}",
                            declared.name()
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
