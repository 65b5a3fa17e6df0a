//! Write-time validation of paths, parameter names, signatures, and
//! rules.
//!
//! Everything here runs before a byte is written. Paths and names are
//! checked character-wise rather than by regex: the alphabets are tiny
//! and the rules are positional (first character, last character, no
//! doubled separator), which a single pass expresses directly.

use regula_rule::{Rule, Signature, ValidationError};

/// Parameter names reserved by the query surface.
const RESERVED_NAMES: &[&str] = &["version", "list", "eval", "watch", "revision"];

/// Checks a ruleset path: lowercase alphanumerics, `-` and `/`, starting
/// with a letter, ending alphanumeric, and no `//` run.
pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    if well_formed(path, true) {
        Ok(())
    } else {
        Err(ValidationError::new("path", path, "invalid format"))
    }
}

/// Checks a parameter name: like a path but without `/`, no `--` run,
/// and not a reserved word.
pub fn validate_param_name(name: &str) -> Result<(), ValidationError> {
    if !well_formed(name, false) {
        return Err(ValidationError::new("param", name, "invalid format"));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(ValidationError::new("param", name, "forbidden value"));
    }
    Ok(())
}

/// Checks a signature: concrete types throughout and valid parameter
/// names.
pub fn validate_signature(signature: &Signature) -> Result<(), ValidationError> {
    if !signature.return_type.is_concrete() {
        return Err(ValidationError::new(
            "returnType",
            signature.return_type.name(),
            "unsupported type",
        ));
    }
    for (name, ty) in &signature.params {
        validate_param_name(name)?;
        if !ty.is_concrete() {
            return Err(ValidationError::new(
                "param type",
                ty.name(),
                "unsupported type",
            ));
        }
    }
    Ok(())
}

/// Checks every submitted rule against the stored signature.
pub fn validate_rules(signature: &Signature, rules: &[Rule]) -> Result<(), ValidationError> {
    for rule in rules {
        signature.validate(rule)?;
    }
    Ok(())
}

fn well_formed(s: &str, allow_slash: bool) -> bool {
    let bytes = s.as_bytes();
    let (first, last) = match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return false,
    };
    if !first.is_ascii_lowercase() || !last.is_ascii_alphanumeric() {
        return false;
    }
    let mut prev = 0u8;
    for &b in bytes {
        let ok = b.is_ascii_lowercase()
            || b.is_ascii_digit()
            || b == b'-'
            || (allow_slash && b == b'/');
        if !ok {
            return false;
        }
        if allow_slash {
            if b == b'/' && prev == b'/' {
                return false;
            }
        } else if b == b'-' && prev == b'-' {
            return false;
        }
        prev = b;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use regula_rule::Type;

    #[test]
    fn good_paths() {
        for path in ["a", "app", "app/flag", "app2/a-b/x9", "y/1", "a-b"] {
            assert!(validate_path(path).is_ok(), "path {:?} should pass", path);
        }
    }

    #[test]
    fn bad_paths() {
        for path in [
            "", "A", "1a", "-a", "/a", "a/", "a-", "a//b", "a b", "a_b", "app/Flag", "a!b",
        ] {
            let err = validate_path(path).unwrap_err();
            assert_eq!(err.field, "path", "path {:?}", path);
            assert_eq!(err.reason, "invalid format");
        }
    }

    #[test]
    fn good_param_names() {
        for name in ["a", "user-id", "tier2", "a-b-c"] {
            assert!(validate_param_name(name).is_ok(), "name {:?}", name);
        }
    }

    #[test]
    fn bad_param_names() {
        for name in ["", "User", "9lives", "a/b", "a--b", "-a", "a-"] {
            let err = validate_param_name(name).unwrap_err();
            assert_eq!(err.field, "param", "name {:?}", name);
            assert_eq!(err.reason, "invalid format");
        }
    }

    #[test]
    fn reserved_names_are_forbidden() {
        for name in ["version", "list", "eval", "watch", "revision"] {
            let err = validate_param_name(name).unwrap_err();
            assert_eq!(err.reason, "forbidden value");
        }
    }

    #[test]
    fn signatures_require_concrete_types() {
        let good = Signature::new(Type::Bool).with_param("user-id", Type::String);
        assert!(validate_signature(&good).is_ok());

        let abstract_return = Signature::new(Type::Number);
        assert_eq!(
            validate_signature(&abstract_return).unwrap_err().field,
            "returnType"
        );

        let abstract_param = Signature::new(Type::Bool).with_param("n", Type::Any);
        assert_eq!(
            validate_signature(&abstract_param).unwrap_err().field,
            "param type"
        );

        let bad_name = Signature::new(Type::Bool).with_param("Bad", Type::String);
        assert_eq!(validate_signature(&bad_name).unwrap_err().field, "param");
    }
}
