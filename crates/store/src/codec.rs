//! Protobuf encoding of persisted rules and signatures.
//!
//! The wire messages are hand-written prost structs rather than build
//! output; the schema is small and frozen, and the field tags must
//! never move because checksums are computed over these exact bytes.
//! Encoding is deterministic: prost writes fields in tag order and the
//! signature param map is a `BTreeMap`, so equal entities always encode
//! to equal bytes.
//!
//! Decoding rebuilds expression trees through the operator builder, so
//! a blob that decodes successfully is also contract-valid.

use prost::Message;
use regula_rule::{
    BuildError, Expr, OpCode, Operator, OperatorBuilder, Param, Rule, Signature, Type, Value,
};

pub(crate) mod pb {
    //! Wire messages. Tags are fixed by the deployed ruleset trees.

    use std::collections::BTreeMap;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Rules {
        #[prost(message, repeated, tag = "1")]
        pub rules: Vec<Rule>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Rule {
        #[prost(message, optional, tag = "1")]
        pub expr: Option<Expr>,
        #[prost(message, optional, tag = "2")]
        pub result: Option<Value>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Expr {
        #[prost(oneof = "expr::Kind", tags = "1, 2, 3")]
        pub kind: Option<expr::Kind>,
    }

    pub mod expr {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Kind {
            #[prost(message, tag = "1")]
            Value(super::Value),
            #[prost(message, tag = "2")]
            Param(super::Param),
            #[prost(message, tag = "3")]
            Operator(super::Operator),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Value {
        #[prost(string, tag = "1")]
        pub kind: String,
        #[prost(string, tag = "2")]
        pub r#type: String,
        #[prost(string, tag = "3")]
        pub data: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Param {
        #[prost(string, tag = "1")]
        pub kind: String,
        #[prost(string, tag = "2")]
        pub r#type: String,
        #[prost(string, tag = "3")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Operator {
        #[prost(string, tag = "1")]
        pub kind: String,
        #[prost(message, repeated, tag = "2")]
        pub operands: Vec<Expr>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Signature {
        #[prost(string, tag = "1")]
        pub return_type: String,
        #[prost(btree_map = "string, string", tag = "2")]
        pub params: BTreeMap<String, String>,
    }
}

/// A failure decoding a persisted blob.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CodecError {
    #[error("protobuf decode failed: {0}")]
    Proto(#[from] prost::DecodeError),
    #[error("malformed persisted tree: {0}")]
    Malformed(String),
    #[error(transparent)]
    Build(#[from] BuildError),
}

pub(crate) fn encode_rules(rules: &[Rule]) -> Vec<u8> {
    let message = pb::Rules {
        rules: rules.iter().map(rule_to_pb).collect(),
    };
    message.encode_to_vec()
}

pub(crate) fn decode_rules(bytes: &[u8]) -> Result<Vec<Rule>, CodecError> {
    let message = pb::Rules::decode(bytes)?;
    message.rules.iter().map(rule_from_pb).collect()
}

pub(crate) fn encode_signature(signature: &Signature) -> Vec<u8> {
    let message = pb::Signature {
        return_type: signature.return_type.name().to_string(),
        params: signature
            .params
            .iter()
            .map(|(name, ty)| (name.clone(), ty.name().to_string()))
            .collect(),
    };
    message.encode_to_vec()
}

pub(crate) fn decode_signature(bytes: &[u8]) -> Result<Signature, CodecError> {
    let message = pb::Signature::decode(bytes)?;
    let mut signature = Signature::new(parse_type(&message.return_type)?);
    for (name, ty) in &message.params {
        signature.params.insert(name.clone(), parse_type(ty)?);
    }
    Ok(signature)
}

fn parse_type(name: &str) -> Result<Type, CodecError> {
    Type::from_name(name)
        .ok_or_else(|| CodecError::Malformed(format!("unknown type {:?}", name)))
}

fn rule_to_pb(rule: &Rule) -> pb::Rule {
    pb::Rule {
        expr: Some(expr_to_pb(&rule.expr)),
        result: Some(value_to_pb(&rule.result)),
    }
}

fn rule_from_pb(rule: &pb::Rule) -> Result<Rule, CodecError> {
    let expr = rule
        .expr
        .as_ref()
        .ok_or_else(|| CodecError::Malformed("rule without expression".to_string()))?;
    let result = rule
        .result
        .as_ref()
        .ok_or_else(|| CodecError::Malformed("rule without result".to_string()))?;
    Ok(Rule::new(expr_from_pb(expr)?, value_from_pb(result)?))
}

fn expr_to_pb(expr: &Expr) -> pb::Expr {
    let kind = match expr {
        Expr::Value(value) => pb::expr::Kind::Value(value_to_pb(value)),
        Expr::Param(param) => pb::expr::Kind::Param(pb::Param {
            kind: "param".to_string(),
            r#type: param.ty().name().to_string(),
            name: param.name().to_string(),
        }),
        Expr::Op(op) => pb::expr::Kind::Operator(operator_to_pb(op)),
    };
    pb::Expr { kind: Some(kind) }
}

fn operator_to_pb(op: &Operator) -> pb::Operator {
    pb::Operator {
        kind: op.opcode().as_str().to_string(),
        operands: op.operands().iter().map(expr_to_pb).collect(),
    }
}

fn value_to_pb(value: &Value) -> pb::Value {
    pb::Value {
        kind: "value".to_string(),
        r#type: value.ty().name().to_string(),
        data: value.data().to_string(),
    }
}

fn value_from_pb(value: &pb::Value) -> Result<Value, CodecError> {
    Ok(Value::new(parse_type(&value.r#type)?, value.data.clone()))
}

fn expr_from_pb(expr: &pb::Expr) -> Result<Expr, CodecError> {
    let kind = expr
        .kind
        .as_ref()
        .ok_or_else(|| CodecError::Malformed("empty expression node".to_string()))?;
    match kind {
        pb::expr::Kind::Value(value) => Ok(Expr::Value(value_from_pb(value)?)),
        pb::expr::Kind::Param(param) => Ok(Expr::Param(Param::new(
            parse_type(&param.r#type)?,
            param.name.clone(),
        ))),
        pb::expr::Kind::Operator(op) => {
            let opcode: OpCode = op.kind.parse()?;
            let mut builder = OperatorBuilder::new(opcode);
            for operand in &op.operands {
                builder.push_expr(expr_from_pb(operand)?)?;
            }
            Ok(builder.finalise()?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rules() -> Vec<Rule> {
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
                        Expr::Value(Value::int64(20)),
                    ],
                )
                .unwrap(),
            ],
        )
        .unwrap();
        vec![
            Rule::new(cohort, Value::bool(true)),
            Rule::new(Expr::Value(Value::bool(true)), Value::bool(false)),
        ]
    }

    #[test]
    fn rules_round_trip() {
        let rules = sample_rules();
        let bytes = encode_rules(&rules);
        let back = decode_rules(&bytes).unwrap();
        assert_eq!(back, rules);
    }

    #[test]
    fn encoding_is_deterministic() {
        let rules = sample_rules();
        assert_eq!(encode_rules(&rules), encode_rules(&rules));

        let signature = Signature::new(Type::Bool)
            .with_param("b", Type::Int64)
            .with_param("a", Type::String);
        assert_eq!(encode_signature(&signature), encode_signature(&signature));
    }

    #[test]
    fn value_node_wire_bytes_are_frozen() {
        let message = pb::Value {
            kind: "value".to_string(),
            r#type: "bool".to_string(),
            data: "true".to_string(),
        };
        let mut expected = vec![0x0a, 0x05];
        expected.extend_from_slice(b"value");
        expected.extend_from_slice(&[0x12, 0x04]);
        expected.extend_from_slice(b"bool");
        expected.extend_from_slice(&[0x1a, 0x04]);
        expected.extend_from_slice(b"true");
        assert_eq!(message.encode_to_vec(), expected);
    }

    #[test]
    fn signature_round_trips() {
        let signature = Signature::new(Type::Float64)
            .with_param("tier", Type::String)
            .with_param("age", Type::Int64);
        let bytes = encode_signature(&signature);
        let back = decode_signature(&bytes).unwrap();
        assert_eq!(back, signature);
    }

    #[test]
    fn homogenised_wrappers_are_explicit_on_the_wire() {
        let expr = Expr::op(
            OpCode::Add,
            [Expr::Value(Value::int64(1)), Expr::Value(Value::float64(1.5))],
        )
        .unwrap();
        let rules = vec![Rule::new(
            Expr::op(OpCode::Eq, [expr, Expr::Value(Value::float64(2.5))]).unwrap(),
            Value::bool(true),
        )];
        let back = decode_rules(&encode_rules(&rules)).unwrap();
        assert_eq!(back, rules);
    }

    #[test]
    fn junk_bytes_fail_to_decode() {
        assert!(matches!(
            decode_rules(b"\xff\xff\xff"),
            Err(CodecError::Proto(_))
        ));
    }

    #[test]
    fn unknown_operator_on_the_wire_is_rejected() {
        let message = pb::Rules {
            rules: vec![pb::Rule {
                expr: Some(pb::Expr {
                    kind: Some(pb::expr::Kind::Operator(pb::Operator {
                        kind: "dave".to_string(),
                        operands: Vec::new(),
                    })),
                }),
                result: Some(pb::Value {
                    kind: "value".to_string(),
                    r#type: "bool".to_string(),
                    data: "true".to_string(),
                }),
            }],
        };
        let err = decode_rules(&message.encode_to_vec()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Build(BuildError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn missing_rule_fields_are_malformed() {
        let message = pb::Rules {
            rules: vec![pb::Rule {
                expr: None,
                result: None,
            }],
        };
        let err = decode_rules(&message.encode_to_vec()).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }
}
