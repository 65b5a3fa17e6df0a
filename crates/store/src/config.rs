//! Service configuration.

use std::time::Duration;

/// Tunables for a [`crate::RulesetService`].
///
/// Only the namespace is required; everything else has defaults sized
/// for a small deployment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Key namespace every tree lives under. Required, non-empty.
    pub namespace: String,
    /// Page size when a listing does not specify one.
    pub default_list_limit: usize,
    /// Pause before reopening a failed change feed.
    pub watch_retry_delay: Duration,
    /// Pause between optimistic write attempts.
    pub put_retry_delay: Duration,
    /// Write attempts before a contended put gives up.
    pub put_retries: u32,
}

impl Config {
    pub fn new(namespace: impl Into<String>) -> Config {
        Config {
            namespace: namespace.into(),
            default_list_limit: 50,
            watch_retry_delay: Duration::from_secs(1),
            put_retry_delay: Duration::from_millis(250),
            put_retries: 3,
        }
    }
}
