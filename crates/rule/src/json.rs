//! JSON interchange for expression trees, rules, and rulesets.
//!
//! Every node is an object with a `kind` discriminator: `"value"` and
//! `"param"` are leaves, any other kind is an operator name with an
//! `operands` array. Decoding rebuilds trees through the operator
//! builder, so a decoded tree re-passes every contract check and
//! malformed or ill-typed documents are rejected.

use std::fmt;

use serde_json::{json, Value as Json};

use crate::error::BuildError;
use crate::expr::{Expr, Param};
use crate::operator::{OpCode, OperatorBuilder};
use crate::ruleset::{Rule, Ruleset};
use crate::types::{Type, Value};

/// A failure decoding the JSON form of a rules entity.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonError {
    /// The document shape is wrong: missing fields, bad kinds, wrong
    /// JSON types.
    Malformed { message: String },
    /// The document decoded structurally but violates an operator
    /// contract.
    Build(BuildError),
}

impl JsonError {
    fn malformed(message: impl Into<String>) -> JsonError {
        JsonError::Malformed {
            message: message.into(),
        }
    }
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonError::Malformed { message } => write!(f, "malformed rules JSON: {}", message),
            JsonError::Build(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for JsonError {}

impl From<BuildError> for JsonError {
    fn from(err: BuildError) -> JsonError {
        JsonError::Build(err)
    }
}

impl Expr {
    pub fn to_json(&self) -> Json {
        match self {
            Expr::Value(value) => json!({
                "kind": "value",
                "type": value.ty().name(),
                "data": value.data(),
            }),
            Expr::Param(param) => json!({
                "kind": "param",
                "type": param.ty().name(),
                "name": param.name(),
            }),
            Expr::Op(op) => {
                let operands: Vec<Json> = op.operands().iter().map(Expr::to_json).collect();
                json!({
                    "kind": op.opcode().as_str(),
                    "operands": operands,
                })
            }
        }
    }

    pub fn from_json(json: &Json) -> Result<Expr, JsonError> {
        let kind = str_field(json, "kind")?;
        match kind {
            "value" => Ok(Expr::Value(value_from_json(json)?)),
            "param" => {
                let ty = type_field(json)?;
                let name = str_field(json, "name")?;
                Ok(Expr::Param(Param::new(ty, name)))
            }
            name => {
                let opcode: OpCode = name.parse()?;
                let operands = json
                    .get("operands")
                    .and_then(Json::as_array)
                    .ok_or_else(|| JsonError::malformed("operator node without operands array"))?;
                let mut builder = OperatorBuilder::new(opcode);
                for operand in operands {
                    builder.push_expr(Expr::from_json(operand)?)?;
                }
                Ok(builder.finalise()?)
            }
        }
    }
}

impl Rule {
    pub fn to_json(&self) -> Json {
        json!({
            "expr": self.expr.to_json(),
            "result": {
                "kind": "value",
                "type": self.result.ty().name(),
                "data": self.result.data(),
            },
        })
    }

    pub fn from_json(json: &Json) -> Result<Rule, JsonError> {
        let expr = json
            .get("expr")
            .ok_or_else(|| JsonError::malformed("rule without expr"))?;
        let result = json
            .get("result")
            .ok_or_else(|| JsonError::malformed("rule without result"))?;
        if str_field(result, "kind")? != "value" {
            return Err(JsonError::malformed("rule result must be a value node"));
        }
        Ok(Rule::new(Expr::from_json(expr)?, value_from_json(result)?))
    }
}

impl Ruleset {
    pub fn to_json(&self) -> Json {
        let rules: Vec<Json> = self.rules.iter().map(Rule::to_json).collect();
        json!({ "rules": rules })
    }

    pub fn from_json(json: &Json) -> Result<Ruleset, JsonError> {
        let rules = json
            .get("rules")
            .and_then(Json::as_array)
            .ok_or_else(|| JsonError::malformed("ruleset without rules array"))?;
        let rules = rules
            .iter()
            .map(Rule::from_json)
            .collect::<Result<Vec<Rule>, JsonError>>()?;
        Ok(Ruleset::new(rules))
    }
}

fn str_field<'a>(json: &'a Json, field: &str) -> Result<&'a str, JsonError> {
    json.get(field)
        .and_then(Json::as_str)
        .ok_or_else(|| JsonError::malformed(format!("missing string field {:?}", field)))
}

fn type_field(json: &Json) -> Result<Type, JsonError> {
    let name = str_field(json, "type")?;
    Type::from_name(name).ok_or_else(|| JsonError::malformed(format!("unknown type {:?}", name)))
}

fn value_from_json(json: &Json) -> Result<Value, JsonError> {
    Ok(Value::new(type_field(json)?, str_field(json, "data")?))
}
