//! Key layout of the persisted ruleset trees.
//!
//! Three trees hang off one namespace:
//!
//! ```text
//! <ns>/rulesets/signatures/<path>          signature, written once
//! <ns>/rulesets/checksums/<path>           MD5 of the latest rules
//! <ns>/rulesets/rules/<path>!<version>     one immutable rules blob
//! ```
//!
//! Version identifiers are appended after `!`, a character paths can
//! never contain. That keeps every version of one path inside its own
//! scan range: a prefix scan of `rules/app!` sees versions of `app` and
//! nothing of `app/sub` or `apple`.

/// Separates the path from the version in rules keys.
const VERSION_SEPARATOR: char = '!';

/// Builds and splits keys for one namespace.
#[derive(Debug, Clone)]
pub(crate) struct Keyspace {
    namespace: String,
}

impl Keyspace {
    pub fn new(namespace: impl Into<String>) -> Keyspace {
        Keyspace {
            namespace: namespace.into(),
        }
    }

    pub fn signature(&self, path: &str) -> String {
        format!("{}/rulesets/signatures/{}", self.namespace, path)
    }

    pub fn signatures_root(&self) -> String {
        format!("{}/rulesets/signatures/", self.namespace)
    }

    pub fn checksum(&self, path: &str) -> String {
        format!("{}/rulesets/checksums/{}", self.namespace, path)
    }

    pub fn rules(&self, path: &str, version: &str) -> String {
        format!(
            "{}/rulesets/rules/{}{}{}",
            self.namespace, path, VERSION_SEPARATOR, version
        )
    }

    pub fn rules_root(&self) -> String {
        format!("{}/rulesets/rules/", self.namespace)
    }

    /// Prefix covering every version of one path.
    pub fn rules_prefix(&self, path: &str) -> String {
        format!(
            "{}/rulesets/rules/{}{}",
            self.namespace, path, VERSION_SEPARATOR
        )
    }

    /// Splits a rules key into path and version. `None` for keys
    /// outside the rules tree.
    pub fn split_rules(&self, key: &str) -> Option<(String, String)> {
        let rest = key.strip_prefix(&self.rules_root())?;
        let (path, version) = rest.split_once(VERSION_SEPARATOR)?;
        Some((path.to_string(), version.to_string()))
    }
}
