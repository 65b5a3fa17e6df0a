//! The ordered key-value store abstraction the ruleset service runs on.
//!
//! The service needs four capabilities from its backing store: point
//! reads, ordered range scans served at one consistent revision, atomic
//! transactions guarded by per-key version predicates, and a change
//! feed that can replay history from a past revision. Any backend
//! offering these can serve rulesets; [`crate::MemoryStore`] is the
//! in-process one.

use async_trait::async_trait;

/// A key with its value and MVCC metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Modifications since the key was created, starting at 1. A
    /// predicate of 0 asserts absence.
    pub version: i64,
    /// Store revision of the last modification.
    pub mod_revision: i64,
}

/// Bounds and options for one range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// First key of the range, inclusive.
    pub start: String,
    /// End of the range, exclusive. `None` reads `start` alone.
    pub end: Option<String>,
    /// Maximum entries to return; 0 means unlimited.
    pub limit: usize,
    /// Return keys with empty values.
    pub keys_only: bool,
    /// Serve the range in descending key order.
    pub descending: bool,
}

impl ScanRequest {
    /// A scan covering exactly `key`.
    pub fn key(key: impl Into<String>) -> ScanRequest {
        ScanRequest {
            start: key.into(),
            end: None,
            limit: 0,
            keys_only: false,
            descending: false,
        }
    }

    /// A scan covering every key starting with `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> ScanRequest {
        let prefix = prefix.into();
        let end = prefix_range_end(&prefix);
        ScanRequest {
            start: prefix,
            end: Some(end),
            limit: 0,
            keys_only: false,
            descending: false,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> ScanRequest {
        self.limit = limit;
        self
    }

    pub fn keys_only(mut self) -> ScanRequest {
        self.keys_only = true;
        self
    }

    pub fn descending(mut self) -> ScanRequest {
        self.descending = true;
        self
    }
}

/// Result of one range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResponse {
    pub kvs: Vec<KeyValue>,
    /// Whether entries beyond `limit` exist in the range.
    pub more: bool,
    /// Store revision the scan was served at.
    pub revision: i64,
}

/// A per-key version predicate guarding a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    pub key: String,
    /// Expected per-key version; 0 asserts the key is absent.
    pub version: i64,
}

impl Compare {
    pub fn version(key: impl Into<String>, version: i64) -> Compare {
        Compare {
            key: key.into(),
            version,
        }
    }
}

/// One operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: Vec<u8> },
    Range(ScanRequest),
}

/// An atomic transaction: if every predicate holds, the ops apply; all
/// ops observe one consistent revision either way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub compares: Vec<Compare>,
    pub success: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Txn {
        Txn::default()
    }

    pub fn when(mut self, compare: Compare) -> Txn {
        self.compares.push(compare);
        self
    }

    pub fn then(mut self, op: TxnOp) -> Txn {
        self.success.push(op);
        self
    }
}

/// Result of one transaction op, in op order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    Put,
    Range(ScanResponse),
}

/// Result of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnResponse {
    /// Whether every predicate held and the ops were applied.
    pub succeeded: bool,
    /// Store revision after the transaction.
    pub revision: i64,
    pub results: Vec<OpResult>,
}

/// The kind of change an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// One committed change to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEvent {
    pub kind: EventKind,
    pub key: String,
    pub value: Vec<u8>,
}

/// Committed events sharing one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    pub events: Vec<KvEvent>,
    pub revision: i64,
}

/// Failures raised by key-value backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    /// The store cannot currently serve requests; callers may retry.
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    /// A failure that retrying will not fix.
    #[error("key-value store error: {0}")]
    Backend(String),
}

/// A change feed delivering committed batches in revision order.
#[async_trait]
pub trait WatchFeed: Send {
    /// The next batch, or `None` when the feed has closed cleanly.
    async fn recv(&mut self) -> Result<Option<EventBatch>, KvError>;
}

/// A transactional ordered key-value store with MVCC revisions.
///
/// ## Revisions and versions
///
/// The store carries a single revision counter that advances on every
/// committed write transaction. Each key additionally tracks its own
/// version: 1 on creation, incremented per modification. Predicates
/// compare per-key versions, with 0 meaning "absent".
///
/// ## Consistency
///
/// A transaction's range reads and all its predicate checks observe one
/// consistent snapshot. A plain `scan` is likewise served at a single
/// revision, reported in the response.
///
/// ## Thread safety
///
/// Implementations must be `Send + Sync + 'static` so one handle can be
/// shared across async tasks.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// The change feed handle type.
    type Feed: WatchFeed;

    /// Reads a single key.
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, KvError>;

    /// Serves one range read.
    async fn scan(&self, req: ScanRequest) -> Result<ScanResponse, KvError>;

    /// Atomically checks every predicate and, when all hold, applies
    /// the ops.
    async fn txn(&self, txn: Txn) -> Result<TxnResponse, KvError>;

    /// Opens a change feed for keys under `prefix`, delivering batches
    /// with revisions strictly greater than `since_revision`. Passing 0
    /// skips history and delivers only new events.
    async fn watch(&self, prefix: &str, since_revision: i64) -> Result<Self::Feed, KvError>;
}

/// The smallest string ordering strictly after every string prefixed by
/// `prefix`, used as the exclusive end of prefix scans. Empty output
/// means the prefix covers the end of the keyspace.
pub fn prefix_range_end(prefix: &str) -> String {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return chars.into_iter().collect();
        }
    }
    String::new()
}
