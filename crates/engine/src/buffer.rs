//! An in-memory ruleset source for embedding and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use regula_rule::{Params, Ruleset};

use crate::{EngineError, EvalResult, Evaluator};

struct Versioned {
    version: String,
    ruleset: Ruleset,
}

/// Holds ruleset versions per path, entirely in memory.
///
/// Versions accumulate in insertion order and the most recently added
/// one is the latest, mirroring how the storage service resolves
/// versions. Useful for embedding a fixed rule table in a process or
/// wiring an [`crate::Engine`] in tests without a store.
#[derive(Default)]
pub struct RulesetBuffer {
    paths: RwLock<HashMap<String, Vec<Versioned>>>,
}

impl RulesetBuffer {
    pub fn new() -> RulesetBuffer {
        RulesetBuffer::default()
    }

    /// Registers a version of the ruleset at `path`, making it the
    /// latest.
    pub fn add(&self, path: impl Into<String>, version: impl Into<String>, ruleset: Ruleset) {
        let mut paths = match self.paths.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        paths.entry(path.into()).or_default().push(Versioned {
            version: version.into(),
            ruleset,
        });
    }

    fn resolve(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<(Ruleset, String), EngineError> {
        let paths = match self.paths.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let versions = paths.get(path).ok_or(EngineError::RulesetNotFound)?;
        let entry = match version {
            Some(version) => versions.iter().rev().find(|v| v.version == version),
            None => versions.last(),
        };
        let entry = entry.ok_or(EngineError::RulesetNotFound)?;
        Ok((entry.ruleset.clone(), entry.version.clone()))
    }
}

#[async_trait]
impl Evaluator for RulesetBuffer {
    async fn eval(&self, path: &str, params: &dyn Params) -> Result<EvalResult, EngineError> {
        let (ruleset, version) = self.resolve(path, None)?;
        let value = ruleset.eval(params)?;
        Ok(EvalResult::new(value, version))
    }

    async fn eval_version(
        &self,
        path: &str,
        version: &str,
        params: &dyn Params,
    ) -> Result<EvalResult, EngineError> {
        let (ruleset, version) = self.resolve(path, Some(version))?;
        let value = ruleset.eval(params)?;
        Ok(EvalResult::new(value, version))
    }
}
