//! The ruleset service: versioned, transactional persistence and change
//! feeds over any [`KvStore`].
//!
//! One service owns one namespace. Signatures are created once and
//! never change; rules are appended as immutable versions under
//! k-sortable identifiers; readers resolve "latest" by scanning the
//! version range backwards. Every write goes through a transaction
//! guarded by per-key version predicates, so concurrent writers can
//! only interleave cleanly or retry.

use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use md5::{Digest, Md5};
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};
use uuid::timestamp::context::ContextV7;
use uuid::{Timestamp, Uuid};

use async_trait::async_trait;
use regula_engine::{EngineError, EvalResult, Evaluator};
use regula_rule::{Params, Rule, Ruleset, Signature, ValidationError};

use crate::codec;
use crate::config::Config;
use crate::error::StoreError;
use crate::keys::Keyspace;
use crate::kv::{
    Compare, EventKind, KvError, KvEvent, KvStore, OpResult, ScanRequest, ScanResponse, Txn,
    TxnOp, WatchFeed,
};

/// Hard ceiling on listing page sizes; out-of-range requests fall back
/// to 50.
const MAX_LIST_LIMIT: usize = 100;
const FALLBACK_LIST_LIMIT: usize = 50;

/// A ruleset as stored: the resolved version, its rules and signature,
/// and the full version history in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct RulesetEntry {
    pub path: String,
    /// Version the rules below were read from. Empty when the path has
    /// a signature but no rules yet.
    pub version: String,
    pub ruleset: Ruleset,
    pub signature: Signature,
    pub versions: Vec<String>,
}

/// One page of ruleset paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetPage {
    /// Paths in ascending order.
    pub paths: Vec<String>,
    /// Store revision the listing was served at.
    pub revision: i64,
    /// Opaque cursor for the next page; empty when the listing is
    /// complete.
    pub cursor: String,
}

/// Options for [`RulesetService::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Page size. `None` and values outside 1..=100 fall back to the
    /// configured default.
    pub limit: Option<usize>,
    /// Cursor from a previous page.
    pub cursor: Option<String>,
}

/// Options for [`RulesetService::watch`].
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Paths to deliver events for; empty means every path.
    pub paths: Vec<String>,
    /// Deliver events with revisions strictly greater than this; 0
    /// starts from the live head.
    pub revision: i64,
    /// Report a timeout after this long without a deliverable event.
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// A new version of one ruleset path.
#[derive(Debug, Clone, PartialEq)]
pub struct RulesetEvent {
    pub path: String,
    pub version: String,
    pub rules: Vec<Rule>,
}

/// Events delivered by one watch call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RulesetEvents {
    pub events: Vec<RulesetEvent>,
    /// Last revision the watch observed; resume from here.
    pub revision: i64,
    /// Whether the call returned because the timeout elapsed.
    pub timeout: bool,
}

enum PutOutcome {
    Committed(String),
    Conflicted,
}

enum BatchOutcome {
    Batch(crate::kv::EventBatch),
    TimedOut,
    FeedLost,
}

/// Versioned ruleset storage over a [`KvStore`].
pub struct RulesetService<S> {
    store: S,
    keys: Keyspace,
    cfg: Config,
    versions: Mutex<ContextV7>,
}

impl<S: KvStore> RulesetService<S> {
    /// Creates a service over `store`. The configured namespace must be
    /// non-empty.
    pub fn new(store: S, cfg: Config) -> Result<RulesetService<S>, StoreError> {
        if cfg.namespace.is_empty() {
            return Err(ValidationError::new("namespace", "", "cannot be empty").into());
        }
        Ok(RulesetService {
            keys: Keyspace::new(&cfg.namespace),
            store,
            cfg,
            versions: Mutex::new(ContextV7::new()),
        })
    }

    // ── Signatures ───────────────────────────────────────────────────────────

    /// Stores the signature for `path`. Fails with
    /// [`StoreError::AlreadyExists`] when one is already there;
    /// signatures are immutable once created.
    pub async fn create_signature(
        &self,
        path: &str,
        signature: &Signature,
    ) -> Result<(), StoreError> {
        crate::validate::validate_path(path)?;
        crate::validate::validate_signature(signature)?;

        let key = self.keys.signature(path);
        let txn = Txn::new()
            .when(Compare::version(key.as_str(), 0))
            .then(TxnOp::Put {
                key: key.clone(),
                value: codec::encode_signature(signature),
            });
        let resp = self.store.txn(txn).await?;
        if !resp.succeeded {
            return Err(StoreError::AlreadyExists {
                path: path.to_string(),
            });
        }
        debug!(path, revision = resp.revision, "signature created");
        Ok(())
    }

    // ── Rules ────────────────────────────────────────────────────────────────

    /// Appends a new version of the rules at `path` and returns its
    /// version identifier.
    ///
    /// Identical rules are deduplicated by canonical encoding: when the
    /// submitted list encodes to the stored checksum, the write is
    /// skipped and [`StoreError::NotModified`] echoes the latest
    /// version. Contended writes retry before surfacing
    /// [`StoreError::Transient`].
    pub async fn put(&self, path: &str, rules: &[Rule]) -> Result<String, StoreError> {
        let sig_key = self.keys.signature(path);
        let sum_key = self.keys.checksum(path);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_put(path, rules, &sig_key, &sum_key).await? {
                PutOutcome::Committed(version) => return Ok(version),
                PutOutcome::Conflicted if attempt < self.cfg.put_retries => {
                    warn!(path, attempt, "write conflict, retrying");
                    time::sleep(self.cfg.put_retry_delay).await;
                }
                PutOutcome::Conflicted => {
                    return Err(StoreError::Transient {
                        reason: format!(
                            "write conflict on {:?} after {} attempts",
                            path, attempt
                        ),
                    });
                }
            }
        }
    }

    async fn try_put(
        &self,
        path: &str,
        rules: &[Rule],
        sig_key: &str,
        sum_key: &str,
    ) -> Result<PutOutcome, StoreError> {
        // One consistent read of everything the write depends on.
        let read = Txn::new()
            .then(TxnOp::Range(ScanRequest::key(sig_key)))
            .then(TxnOp::Range(ScanRequest::key(sum_key)))
            .then(TxnOp::Range(
                ScanRequest::prefix(self.keys.rules_prefix(path))
                    .keys_only()
                    .descending()
                    .with_limit(1),
            ));
        let resp = self.store.txn(read).await?;

        let sig_scan = range_at(&resp.results, 0)?;
        let sig_kv = match sig_scan.kvs.first() {
            Some(kv) => kv,
            None => {
                return Err(StoreError::SignatureNotFound {
                    path: path.to_string(),
                })
            }
        };
        let signature = self.decode_signature(sig_key, &sig_kv.value)?;
        crate::validate::validate_rules(&signature, rules)?;

        let encoded = codec::encode_rules(rules);
        let checksum = Md5::digest(&encoded);

        let sum_scan = range_at(&resp.results, 1)?;
        let sum_kv = sum_scan.kvs.first();
        if let Some(stored) = sum_kv {
            if stored.value == checksum.as_slice() {
                let latest = range_at(&resp.results, 2)?
                    .kvs
                    .first()
                    .and_then(|kv| self.keys.split_rules(&kv.key))
                    .map(|(_, version)| version)
                    .unwrap_or_default();
                return Err(StoreError::NotModified {
                    path: path.to_string(),
                    version: latest,
                });
            }
        }

        let version = self.mint_version();
        let sig_version = sig_kv.version;
        let sum_version = sum_kv.map(|kv| kv.version).unwrap_or(0);
        let txn = Txn::new()
            .when(Compare::version(sig_key, sig_version))
            .when(Compare::version(sum_key, sum_version))
            .then(TxnOp::Put {
                key: sum_key.to_string(),
                value: checksum.to_vec(),
            })
            .then(TxnOp::Put {
                key: self.keys.rules(path, &version),
                value: encoded,
            });
        let resp = self.store.txn(txn).await?;
        if !resp.succeeded {
            return Ok(PutOutcome::Conflicted);
        }
        debug!(path, version = %version, revision = resp.revision, "ruleset version stored");
        Ok(PutOutcome::Committed(version))
    }

    /// Version identifiers are k-sortable: time-ordered across calls,
    /// counter-ordered within one millisecond.
    fn mint_version(&self) -> String {
        Uuid::new_v7(Timestamp::now(&self.versions)).to_string()
    }

    /// Fetches the ruleset at `path`: the requested version when given,
    /// otherwise the latest.
    pub async fn get(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<RulesetEntry, StoreError> {
        if path.is_empty() {
            return Err(StoreError::RulesetNotFound {
                path: path.to_string(),
            });
        }
        let sig_key = self.keys.signature(path);
        let rules_read = match version {
            Some(version) => ScanRequest::key(self.keys.rules(path, version)),
            None => ScanRequest::prefix(self.keys.rules_prefix(path))
                .descending()
                .with_limit(1),
        };
        let txn = Txn::new()
            .then(TxnOp::Range(ScanRequest::key(sig_key.as_str())))
            .then(TxnOp::Range(
                ScanRequest::prefix(self.keys.rules_prefix(path)).keys_only(),
            ))
            .then(TxnOp::Range(rules_read));
        let resp = self.store.txn(txn).await?;

        let sig_kv = match range_at(&resp.results, 0)?.kvs.first() {
            Some(kv) => kv,
            None => {
                return Err(StoreError::RulesetNotFound {
                    path: path.to_string(),
                })
            }
        };
        let signature = self.decode_signature(&sig_key, &sig_kv.value)?;

        let versions: Vec<String> = range_at(&resp.results, 1)?
            .kvs
            .iter()
            .filter_map(|kv| self.keys.split_rules(&kv.key))
            .map(|(_, version)| version)
            .collect();

        let (resolved, rules) = match range_at(&resp.results, 2)?.kvs.first() {
            Some(kv) => {
                let (_, resolved) = self.keys.split_rules(&kv.key).ok_or_else(|| {
                    error!(key = %kv.key, "malformed rules key");
                    StoreError::Internal(format!("malformed rules key {:?}", kv.key))
                })?;
                let rules = self.decode_rules(&kv.key, &kv.value)?;
                (resolved, rules)
            }
            None if version.is_some() => {
                return Err(StoreError::RulesetNotFound {
                    path: path.to_string(),
                })
            }
            None => (String::new(), Vec::new()),
        };

        Ok(RulesetEntry {
            path: path.to_string(),
            version: resolved,
            ruleset: Ruleset::new(rules),
            signature,
            versions,
        })
    }

    // ── Listing ──────────────────────────────────────────────────────────────

    /// Pages through ruleset paths under `prefix` in ascending order.
    /// An empty prefix lists the whole namespace.
    pub async fn list(&self, prefix: &str, opts: &ListOptions) -> Result<RulesetPage, StoreError> {
        let limit = self.effective_limit(opts.limit);
        let root = self.keys.signatures_root();
        let end = crate::kv::prefix_range_end(&format!("{}{}", root, prefix));

        let start = match opts.cursor.as_deref() {
            Some(cursor) if !cursor.is_empty() => {
                format!("{}{}", root, decode_cursor(cursor)?)
            }
            _ => format!("{}{}", root, prefix),
        };
        let req = ScanRequest {
            start,
            end: Some(end),
            limit,
            keys_only: true,
            descending: false,
        };
        let resp = self.store.scan(req).await?;

        let paths: Vec<String> = resp
            .kvs
            .iter()
            .filter_map(|kv| kv.key.strip_prefix(root.as_str()))
            .map(str::to_string)
            .collect();
        let cursor = match paths.last() {
            Some(last) if paths.len() == limit && resp.more => {
                URL_SAFE.encode(format!("{}\u{0}", last))
            }
            _ => String::new(),
        };
        debug!(
            prefix,
            count = paths.len(),
            revision = resp.revision,
            "listed ruleset paths"
        );
        Ok(RulesetPage {
            paths,
            revision: resp.revision,
            cursor,
        })
    }

    fn effective_limit(&self, requested: Option<usize>) -> usize {
        let limit = requested.unwrap_or(self.cfg.default_list_limit);
        if (1..=MAX_LIST_LIMIT).contains(&limit) {
            limit
        } else {
            FALLBACK_LIST_LIMIT
        }
    }

    // ── Watching ─────────────────────────────────────────────────────────────

    /// Blocks until at least one watched path gains a version, the
    /// optional timeout elapses, or the store fails unrecoverably.
    ///
    /// Events with undecodable payloads are logged and dropped rather
    /// than aborting the watch; a batch whose events are all filtered
    /// out does not wake the caller. Recoverable feed failures reconnect
    /// after the configured delay, resuming from the last observed
    /// revision so nothing is skipped.
    pub async fn watch(&self, opts: &WatchOptions) -> Result<RulesetEvents, StoreError> {
        let deadline = opts.timeout.map(|timeout| Instant::now() + timeout);
        let root = self.keys.rules_root();
        let mut since = opts.revision;

        loop {
            let mut feed = match self.store.watch(&root, since).await {
                Ok(feed) => feed,
                Err(KvError::Unavailable(reason)) => {
                    warn!(%reason, "change feed open failed, retrying");
                    if self.pause(deadline).await {
                        return Ok(timed_out(since));
                    }
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            loop {
                let batch = match self.next_batch(&mut feed, deadline).await? {
                    BatchOutcome::Batch(batch) => batch,
                    BatchOutcome::TimedOut => return Ok(timed_out(since)),
                    BatchOutcome::FeedLost => break,
                };
                since = batch.revision;
                let events = self.keep_events(&opts.paths, batch.events);
                if events.is_empty() {
                    continue;
                }
                return Ok(RulesetEvents {
                    events,
                    revision: since,
                    timeout: false,
                });
            }

            if self.pause(deadline).await {
                return Ok(timed_out(since));
            }
        }
    }

    async fn next_batch(
        &self,
        feed: &mut S::Feed,
        deadline: Option<Instant>,
    ) -> Result<BatchOutcome, StoreError> {
        let received = match deadline {
            Some(deadline) => match time::timeout_at(deadline, feed.recv()).await {
                Ok(received) => received,
                Err(_) => return Ok(BatchOutcome::TimedOut),
            },
            None => feed.recv().await,
        };
        match received {
            Ok(Some(batch)) => Ok(BatchOutcome::Batch(batch)),
            Ok(None) => Ok(BatchOutcome::FeedLost),
            Err(KvError::Unavailable(reason)) => {
                warn!(%reason, "change feed interrupted");
                Ok(BatchOutcome::FeedLost)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Filters a raw batch down to deliverable ruleset events: puts on
    /// rules keys, under a selected path, with decodable payloads.
    fn keep_events(&self, paths: &[String], events: Vec<KvEvent>) -> Vec<RulesetEvent> {
        let mut kept = Vec::new();
        for event in events {
            if event.kind != EventKind::Put {
                debug!(key = %event.key, "watch: ignoring non-put event");
                continue;
            }
            let (path, version) = match self.keys.split_rules(&event.key) {
                Some(parts) => parts,
                None => {
                    debug!(key = %event.key, "watch: ignoring foreign key");
                    continue;
                }
            };
            if !paths.is_empty() && !paths.iter().any(|p| *p == path) {
                continue;
            }
            match codec::decode_rules(&event.value) {
                Ok(rules) => kept.push(RulesetEvent {
                    path,
                    version,
                    rules,
                }),
                Err(err) => {
                    error!(key = %event.key, %err, "watch: dropping undecodable event");
                }
            }
        }
        kept
    }

    /// Sleeps the retry delay, bounded by the deadline. Returns whether
    /// the deadline elapsed.
    async fn pause(&self, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => {
                time::timeout_at(deadline, time::sleep(self.cfg.watch_retry_delay))
                    .await
                    .is_err()
            }
            None => {
                time::sleep(self.cfg.watch_retry_delay).await;
                false
            }
        }
    }

    // ── Decoding ─────────────────────────────────────────────────────────────

    fn decode_signature(&self, key: &str, bytes: &[u8]) -> Result<Signature, StoreError> {
        codec::decode_signature(bytes).map_err(|err| {
            error!(key, %err, "stored signature failed to decode");
            StoreError::Internal(format!("undecodable signature at {:?}", key))
        })
    }

    fn decode_rules(&self, key: &str, bytes: &[u8]) -> Result<Vec<Rule>, StoreError> {
        codec::decode_rules(bytes).map_err(|err| {
            error!(key, %err, "stored rules failed to decode");
            StoreError::Internal(format!("undecodable rules at {:?}", key))
        })
    }
}

fn range_at(results: &[OpResult], index: usize) -> Result<&ScanResponse, StoreError> {
    match results.get(index) {
        Some(OpResult::Range(scan)) => Ok(scan),
        _ => Err(StoreError::Internal(
            "transaction returned an unexpected result shape".to_string(),
        )),
    }
}

fn decode_cursor(cursor: &str) -> Result<String, StoreError> {
    let bytes = URL_SAFE
        .decode(cursor)
        .map_err(|_| StoreError::InvalidCursor)?;
    String::from_utf8(bytes).map_err(|_| StoreError::InvalidCursor)
}

fn timed_out(revision: i64) -> RulesetEvents {
    RulesetEvents {
        events: Vec::new(),
        revision,
        timeout: true,
    }
}

#[async_trait]
impl<S: KvStore> Evaluator for RulesetService<S> {
    async fn eval(&self, path: &str, params: &dyn Params) -> Result<EvalResult, EngineError> {
        self.eval_at(path, None, params).await
    }

    async fn eval_version(
        &self,
        path: &str,
        version: &str,
        params: &dyn Params,
    ) -> Result<EvalResult, EngineError> {
        self.eval_at(path, Some(version), params).await
    }
}

impl<S: KvStore> RulesetService<S> {
    async fn eval_at(
        &self,
        path: &str,
        version: Option<&str>,
        params: &dyn Params,
    ) -> Result<EvalResult, EngineError> {
        let entry = self.get(path, version).await.map_err(|err| match err {
            StoreError::RulesetNotFound { .. } | StoreError::SignatureNotFound { .. } => {
                EngineError::RulesetNotFound
            }
            other => EngineError::Backend(other.to_string()),
        })?;
        let value = entry.ruleset.eval(params)?;
        Ok(EvalResult::new(value, entry.version))
    }
}
