//! Caller-supplied parameters and the lexical overlay used by `let`.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::EvalError;
use crate::types::Type;

/// Named, typed inputs available to an evaluation.
///
/// Getters fail with [`EvalError::ParamNotFound`] when the name is
/// absent and [`EvalError::ParamTypeMismatch`] when it is bound to a
/// different type.
pub trait Params: Send + Sync {
    fn get_string(&self, name: &str) -> Result<String, EvalError>;
    fn get_bool(&self, name: &str) -> Result<bool, EvalError>;
    fn get_int64(&self, name: &str) -> Result<i64, EvalError>;
    fn get_float64(&self, name: &str) -> Result<f64, EvalError>;

    /// Every name resolvable through this instance, including names
    /// inherited from an enclosing scope.
    fn keys(&self) -> Vec<String>;

    /// Canonical textual encoding of the named parameter.
    fn encode_value(&self, name: &str) -> Result<String, EvalError>;
}

/// One typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Bool(bool),
    Int64(i64),
    Float64(f64),
}

impl ParamValue {
    pub fn ty(&self) -> Type {
        match self {
            ParamValue::String(_) => Type::String,
            ParamValue::Bool(_) => Type::Bool,
            ParamValue::Int64(_) => Type::Int64,
            ParamValue::Float64(_) => Type::Float64,
        }
    }

    /// Canonical encoding, identical to the matching [`crate::Value`]
    /// constructor.
    pub fn encode(&self) -> String {
        match self {
            ParamValue::String(v) => v.clone(),
            ParamValue::Bool(v) => if *v { "true" } else { "false" }.to_string(),
            ParamValue::Int64(v) => v.to_string(),
            ParamValue::Float64(v) => format!("{:.6}", v),
        }
    }
}

/// An owned map of parameters, the usual way callers provide inputs.
///
/// Iteration order is the lexicographic order of names, so `keys` is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    values: BTreeMap<String, ParamValue>,
}

impl ParamMap {
    pub fn new() -> ParamMap {
        ParamMap::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn with_string(mut self, name: impl Into<String>, value: impl Into<String>) -> ParamMap {
        self.set(name, ParamValue::String(value.into()));
        self
    }

    pub fn with_bool(mut self, name: impl Into<String>, value: bool) -> ParamMap {
        self.set(name, ParamValue::Bool(value));
        self
    }

    pub fn with_int64(mut self, name: impl Into<String>, value: i64) -> ParamMap {
        self.set(name, ParamValue::Int64(value));
        self
    }

    pub fn with_float64(mut self, name: impl Into<String>, value: f64) -> ParamMap {
        self.set(name, ParamValue::Float64(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    fn lookup(&self, name: &str) -> Result<&ParamValue, EvalError> {
        self.values.get(name).ok_or_else(|| EvalError::ParamNotFound {
            name: name.to_string(),
        })
    }
}

impl Params for ParamMap {
    fn get_string(&self, name: &str) -> Result<String, EvalError> {
        match self.lookup(name)? {
            ParamValue::String(v) => Ok(v.clone()),
            _ => Err(EvalError::ParamTypeMismatch {
                name: name.to_string(),
            }),
        }
    }

    fn get_bool(&self, name: &str) -> Result<bool, EvalError> {
        match self.lookup(name)? {
            ParamValue::Bool(v) => Ok(*v),
            _ => Err(EvalError::ParamTypeMismatch {
                name: name.to_string(),
            }),
        }
    }

    fn get_int64(&self, name: &str) -> Result<i64, EvalError> {
        match self.lookup(name)? {
            ParamValue::Int64(v) => Ok(*v),
            _ => Err(EvalError::ParamTypeMismatch {
                name: name.to_string(),
            }),
        }
    }

    fn get_float64(&self, name: &str) -> Result<f64, EvalError> {
        match self.lookup(name)? {
            ParamValue::Float64(v) => Ok(*v),
            _ => Err(EvalError::ParamTypeMismatch {
                name: name.to_string(),
            }),
        }
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn encode_value(&self, name: &str) -> Result<String, EvalError> {
        Ok(self.lookup(name)?.encode())
    }
}

/// A lexical overlay binding one extra name over a parent scope.
///
/// Created by the `let` operator. The overlay resolves its own name
/// first and delegates everything else, so inner bindings shadow
/// nothing: [`Scope::bind`] refuses names already visible in the parent.
pub struct Scope<'p> {
    name: String,
    value: ParamValue,
    parent: &'p dyn Params,
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl<'p> Scope<'p> {
    /// Binds `name` to `value` over `parent`. Fails when the name is
    /// already bound anywhere in the enclosing chain.
    pub fn bind(
        name: impl Into<String>,
        value: ParamValue,
        parent: &'p dyn Params,
    ) -> Result<Scope<'p>, EvalError> {
        let name = name.into();
        if parent.keys().iter().any(|k| *k == name) {
            return Err(EvalError::Domain {
                reason: format!("parameter {:?} is already defined", name),
            });
        }
        Ok(Scope {
            name,
            value,
            parent,
        })
    }

    fn own<T>(
        &self,
        name: &str,
        extract: impl FnOnce(&ParamValue) -> Option<T>,
    ) -> Option<Result<T, EvalError>> {
        if name != self.name {
            return None;
        }
        Some(extract(&self.value).ok_or(EvalError::ParamTypeMismatch {
            name: name.to_string(),
        }))
    }
}

impl Params for Scope<'_> {
    fn get_string(&self, name: &str) -> Result<String, EvalError> {
        match self.own(name, |v| match v {
            ParamValue::String(s) => Some(s.clone()),
            _ => None,
        }) {
            Some(result) => result,
            None => self.parent.get_string(name),
        }
    }

    fn get_bool(&self, name: &str) -> Result<bool, EvalError> {
        match self.own(name, |v| match v {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }) {
            Some(result) => result,
            None => self.parent.get_bool(name),
        }
    }

    fn get_int64(&self, name: &str) -> Result<i64, EvalError> {
        match self.own(name, |v| match v {
            ParamValue::Int64(i) => Some(*i),
            _ => None,
        }) {
            Some(result) => result,
            None => self.parent.get_int64(name),
        }
    }

    fn get_float64(&self, name: &str) -> Result<f64, EvalError> {
        match self.own(name, |v| match v {
            ParamValue::Float64(x) => Some(*x),
            _ => None,
        }) {
            Some(result) => result,
            None => self.parent.get_float64(name),
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = self.parent.keys();
        keys.push(self.name.clone());
        keys
    }

    fn encode_value(&self, name: &str) -> Result<String, EvalError> {
        if name == self.name {
            Ok(self.value.encode())
        } else {
            self.parent.encode_value(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_enforce_types() {
        let params = ParamMap::new()
            .with_string("id", "123")
            .with_int64("age", 30);

        assert_eq!(params.get_string("id").unwrap(), "123");
        assert_eq!(params.get_int64("age").unwrap(), 30);
        assert_eq!(
            params.get_bool("id"),
            Err(EvalError::ParamTypeMismatch {
                name: "id".to_string()
            })
        );
        assert_eq!(
            params.get_string("missing"),
            Err(EvalError::ParamNotFound {
                name: "missing".to_string()
            })
        );
    }

    #[test]
    fn keys_are_sorted() {
        let params = ParamMap::new()
            .with_bool("zeta", true)
            .with_int64("alpha", 1)
            .with_string("mid", "m");
        assert_eq!(params.keys(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn encode_value_matches_value_encodings() {
        let params = ParamMap::new()
            .with_float64("rate", 1.5)
            .with_bool("on", false)
            .with_int64("n", -2);
        assert_eq!(params.encode_value("rate").unwrap(), "1.500000");
        assert_eq!(params.encode_value("on").unwrap(), "false");
        assert_eq!(params.encode_value("n").unwrap(), "-2");
    }

    #[test]
    fn scope_resolves_own_name_and_delegates() {
        let outer = ParamMap::new().with_string("user", "u1");
        let scope = Scope::bind("count", ParamValue::Int64(3), &outer).unwrap();

        assert_eq!(scope.get_int64("count").unwrap(), 3);
        assert_eq!(scope.get_string("user").unwrap(), "u1");
        let mut keys = scope.keys();
        keys.sort();
        assert_eq!(keys, vec!["count", "user"]);
    }

    #[test]
    fn scope_rejects_rebinding() {
        let outer = ParamMap::new().with_string("user", "u1");
        let err = Scope::bind("user", ParamValue::Int64(1), &outer).unwrap_err();
        assert!(matches!(err, EvalError::Domain { .. }));
    }

    #[test]
    fn nested_scopes_see_all_enclosing_names() {
        let outer = ParamMap::new().with_int64("a", 1);
        let mid = Scope::bind("b", ParamValue::Int64(2), &outer).unwrap();
        let inner = Scope::bind("c", ParamValue::Int64(3), &mid).unwrap();

        assert_eq!(inner.get_int64("a").unwrap(), 1);
        assert_eq!(inner.get_int64("b").unwrap(), 2);
        assert_eq!(inner.get_int64("c").unwrap(), 3);
        assert!(Scope::bind("a", ParamValue::Bool(true), &inner).is_err());
    }
}
