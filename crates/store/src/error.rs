//! The error taxonomy of the storage engine.

use regula_rule::ValidationError;

use crate::kv::KvError;

/// Everything a [`crate::RulesetService`] operation can fail with.
///
/// Callers are expected to branch on the variant; the messages are
/// informational.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A path, name, signature, or rule failed write-time validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No signature exists at the path; it must be created before rules
    /// can be written.
    #[error("no signature found at path {path:?}")]
    SignatureNotFound { path: String },

    /// No ruleset at the path, or the requested version of it is
    /// missing.
    #[error("ruleset not found: {path:?}")]
    RulesetNotFound { path: String },

    /// A signature already exists at the path; signatures are immutable.
    #[error("a signature already exists at path {path:?}")]
    AlreadyExists { path: String },

    /// The submitted rules encode identically to the stored latest
    /// version, which is echoed back.
    #[error("ruleset {path:?} not modified, latest version is {version:?}")]
    NotModified { path: String, version: String },

    /// The listing cursor is not valid base64 or decodes to garbage.
    #[error("invalid listing cursor")]
    InvalidCursor,

    /// Contention or outage; the operation may be retried as-is.
    #[error("transient storage failure: {reason}")]
    Transient { reason: String },

    /// A decode failure or broken invariant inside the store.
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl From<KvError> for StoreError {
    fn from(err: KvError) -> StoreError {
        match err {
            KvError::Unavailable(reason) => StoreError::Transient { reason },
            KvError::Backend(reason) => StoreError::Internal(reason),
        }
    }
}
