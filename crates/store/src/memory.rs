//! A fully in-memory `KvStore` with MVCC revisions and watchable
//! history.
//!
//! Backs the conformance suite and embedded single-process deployments.
//! Committed batches are kept in an append-only log so watches can
//! replay from any past revision; live delivery rides a broadcast
//! channel, and a lagged receiver resynchronises from the log instead
//! of missing batches.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::kv::{
    EventBatch, EventKind, KeyValue, KvError, KvEvent, KvStore, OpResult, ScanRequest,
    ScanResponse, Txn, TxnOp, TxnResponse, WatchFeed,
};

const BROADCAST_CAPACITY: usize = 64;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    version: i64,
    mod_revision: i64,
}

struct Inner {
    entries: BTreeMap<String, Entry>,
    revision: i64,
    /// Every committed batch, oldest first.
    history: Vec<EventBatch>,
}

/// An in-memory [`KvStore`]. Cloning shares the underlying store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    live: broadcast::Sender<EventBatch>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        let (live, _) = broadcast::channel(BROADCAST_CAPACITY);
        MemoryStore {
            inner: Arc::new(Mutex::new(Inner {
                entries: BTreeMap::new(),
                revision: 0,
                history: Vec::new(),
            })),
            live,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, KvError> {
        self.inner
            .lock()
            .map_err(|_| KvError::Backend("store mutex poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> MemoryStore {
        MemoryStore::new()
    }
}

fn scan_locked(inner: &Inner, req: &ScanRequest) -> ScanResponse {
    let mut kvs: Vec<KeyValue> = match &req.end {
        None => inner
            .entries
            .get_key_value(&req.start)
            .into_iter()
            .map(|(key, entry)| key_value(key, entry, req.keys_only))
            .collect(),
        Some(end) => {
            let bounds = (
                Bound::Included(req.start.as_str()),
                Bound::Excluded(end.as_str()),
            );
            inner
                .entries
                .range::<str, _>(bounds)
                .map(|(key, entry)| key_value(key, entry, req.keys_only))
                .collect()
        }
    };
    if req.descending {
        kvs.reverse();
    }
    let more = req.limit > 0 && kvs.len() > req.limit;
    if more {
        kvs.truncate(req.limit);
    }
    ScanResponse {
        kvs,
        more,
        revision: inner.revision,
    }
}

fn key_value(key: &str, entry: &Entry, keys_only: bool) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: if keys_only {
            Vec::new()
        } else {
            entry.value.clone()
        },
        version: entry.version,
        mod_revision: entry.mod_revision,
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    type Feed = MemoryFeed;

    async fn get(&self, key: &str) -> Result<Option<KeyValue>, KvError> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .get_key_value(key)
            .map(|(key, entry)| key_value(key, entry, false)))
    }

    async fn scan(&self, req: ScanRequest) -> Result<ScanResponse, KvError> {
        let inner = self.lock()?;
        Ok(scan_locked(&inner, &req))
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse, KvError> {
        let mut inner = self.lock()?;

        let succeeded = txn.compares.iter().all(|compare| {
            let current = inner
                .entries
                .get(&compare.key)
                .map(|entry| entry.version)
                .unwrap_or(0);
            current == compare.version
        });
        if !succeeded {
            return Ok(TxnResponse {
                succeeded: false,
                revision: inner.revision,
                results: Vec::new(),
            });
        }

        // Read-only transactions do not advance the revision.
        let writes = txn
            .success
            .iter()
            .any(|op| matches!(op, TxnOp::Put { .. }));
        if writes {
            inner.revision += 1;
        }
        let revision = inner.revision;

        let mut results = Vec::with_capacity(txn.success.len());
        let mut events = Vec::new();
        for op in &txn.success {
            match op {
                TxnOp::Put { key, value } => {
                    let entry = inner.entries.entry(key.clone()).or_insert(Entry {
                        value: Vec::new(),
                        version: 0,
                        mod_revision: 0,
                    });
                    entry.value = value.clone();
                    entry.version += 1;
                    entry.mod_revision = revision;
                    events.push(KvEvent {
                        kind: EventKind::Put,
                        key: key.clone(),
                        value: value.clone(),
                    });
                    results.push(OpResult::Put);
                }
                TxnOp::Range(req) => {
                    results.push(OpResult::Range(scan_locked(&inner, req)));
                }
            }
        }

        if writes {
            let batch = EventBatch { events, revision };
            inner.history.push(batch.clone());
            // Nobody listening is fine.
            let _ = self.live.send(batch);
        }

        Ok(TxnResponse {
            succeeded: true,
            revision,
            results,
        })
    }

    async fn watch(&self, prefix: &str, since_revision: i64) -> Result<MemoryFeed, KvError> {
        // Subscribe before snapshotting history so no batch can fall
        // between replay and live delivery.
        let live = self.live.subscribe();
        let inner = self.lock()?;
        let start = if since_revision == 0 {
            inner.revision
        } else {
            since_revision
        };
        let replay: VecDeque<EventBatch> = inner
            .history
            .iter()
            .filter(|batch| batch.revision > start)
            .cloned()
            .collect();
        Ok(MemoryFeed {
            prefix: prefix.to_string(),
            replay,
            live,
            next_revision: start + 1,
            store: Arc::clone(&self.inner),
        })
    }
}

/// Change feed over a [`MemoryStore`].
pub struct MemoryFeed {
    prefix: String,
    replay: VecDeque<EventBatch>,
    live: broadcast::Receiver<EventBatch>,
    next_revision: i64,
    store: Arc<Mutex<Inner>>,
}

impl MemoryFeed {
    fn filter(&self, batch: EventBatch) -> Option<EventBatch> {
        let revision = batch.revision;
        let events: Vec<KvEvent> = batch
            .events
            .into_iter()
            .filter(|event| event.key.starts_with(&self.prefix))
            .collect();
        if events.is_empty() {
            None
        } else {
            Some(EventBatch { events, revision })
        }
    }

    fn resync(&mut self) -> Result<(), KvError> {
        let inner = self
            .store
            .lock()
            .map_err(|_| KvError::Backend("store mutex poisoned".to_string()))?;
        self.replay = inner
            .history
            .iter()
            .filter(|batch| batch.revision >= self.next_revision)
            .cloned()
            .collect();
        Ok(())
    }
}

#[async_trait]
impl WatchFeed for MemoryFeed {
    async fn recv(&mut self) -> Result<Option<EventBatch>, KvError> {
        loop {
            if let Some(batch) = self.replay.pop_front() {
                self.next_revision = batch.revision + 1;
                if let Some(kept) = self.filter(batch) {
                    return Ok(Some(kept));
                }
                continue;
            }
            match self.live.recv().await {
                Ok(batch) => {
                    // Replay may already have covered this revision.
                    if batch.revision < self.next_revision {
                        continue;
                    }
                    self.next_revision = batch.revision + 1;
                    if let Some(kept) = self.filter(batch) {
                        return Ok(Some(kept));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    self.resync()?;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Compare;

    fn put(key: &str, value: &[u8]) -> TxnOp {
        TxnOp::Put {
            key: key.to_string(),
            value: value.to_vec(),
        }
    }

    #[tokio::test]
    async fn puts_advance_revisions_and_key_versions() {
        let store = MemoryStore::new();

        let first = store.txn(Txn::new().then(put("k/a", b"1"))).await.unwrap();
        assert!(first.succeeded);
        assert_eq!(first.revision, 1);

        let second = store.txn(Txn::new().then(put("k/a", b"2"))).await.unwrap();
        assert_eq!(second.revision, 2);

        let kv = store.get("k/a").await.unwrap().unwrap();
        assert_eq!(kv.value, b"2");
        assert_eq!(kv.version, 2);
        assert_eq!(kv.mod_revision, 2);
    }

    #[tokio::test]
    async fn absence_predicate_guards_creation() {
        let store = MemoryStore::new();

        let create = Txn::new()
            .when(Compare::version("k/a", 0))
            .then(put("k/a", b"1"));
        assert!(store.txn(create.clone()).await.unwrap().succeeded);
        // Second attempt: the key now exists at version 1.
        assert!(!store.txn(create).await.unwrap().succeeded);
    }

    #[tokio::test]
    async fn version_predicate_detects_interleaved_writes() {
        let store = MemoryStore::new();
        store.txn(Txn::new().then(put("k/a", b"1"))).await.unwrap();

        let stale = Txn::new()
            .when(Compare::version("k/a", 1))
            .then(put("k/a", b"2"));
        store.txn(Txn::new().then(put("k/a", b"x"))).await.unwrap();

        let resp = store.txn(stale).await.unwrap();
        assert!(!resp.succeeded);
        assert_eq!(store.get("k/a").await.unwrap().unwrap().value, b"x");
    }

    #[tokio::test]
    async fn read_only_transactions_do_not_advance_the_revision() {
        let store = MemoryStore::new();
        store.txn(Txn::new().then(put("k/a", b"1"))).await.unwrap();

        let read = store
            .txn(Txn::new().then(TxnOp::Range(ScanRequest::key("k/a"))))
            .await
            .unwrap();
        assert_eq!(read.revision, 1);
        match &read.results[0] {
            OpResult::Range(scan) => assert_eq!(scan.kvs[0].value, b"1"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn scans_are_ordered_limited_and_flagged() {
        let store = MemoryStore::new();
        for key in ["k/a", "k/b", "k/c", "other"] {
            store
                .txn(Txn::new().then(put(key, key.as_bytes())))
                .await
                .unwrap();
        }

        let page = store
            .scan(ScanRequest::prefix("k/").with_limit(2))
            .await
            .unwrap();
        let keys: Vec<&str> = page.kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["k/a", "k/b"]);
        assert!(page.more);

        let rest = store
            .scan(ScanRequest::prefix("k/").descending().with_limit(1))
            .await
            .unwrap();
        assert_eq!(rest.kvs[0].key, "k/c");
        assert!(rest.more);

        let keys_only = store
            .scan(ScanRequest::prefix("k/").keys_only())
            .await
            .unwrap();
        assert!(!keys_only.more);
        assert!(keys_only.kvs.iter().all(|kv| kv.value.is_empty()));
    }

    #[tokio::test]
    async fn watch_replays_history_from_a_revision() {
        let store = MemoryStore::new();
        store.txn(Txn::new().then(put("k/a", b"1"))).await.unwrap();
        store.txn(Txn::new().then(put("k/b", b"2"))).await.unwrap();
        store.txn(Txn::new().then(put("x/c", b"3"))).await.unwrap();

        let mut feed = store.watch("k/", 1).await.unwrap();
        let batch = feed.recv().await.unwrap().unwrap();
        assert_eq!(batch.revision, 2);
        assert_eq!(batch.events[0].key, "k/b");
        // The x/ batch is filtered out entirely; nothing further arrives
        // until a new k/ write commits.
        store.txn(Txn::new().then(put("k/d", b"4"))).await.unwrap();
        let batch = feed.recv().await.unwrap().unwrap();
        assert_eq!(batch.revision, 4);
        assert_eq!(batch.events[0].key, "k/d");
    }

    #[tokio::test]
    async fn watch_since_zero_skips_history() {
        let store = MemoryStore::new();
        store.txn(Txn::new().then(put("k/a", b"1"))).await.unwrap();

        let mut feed = store.watch("k/", 0).await.unwrap();
        store.txn(Txn::new().then(put("k/b", b"2"))).await.unwrap();
        let batch = feed.recv().await.unwrap().unwrap();
        assert_eq!(batch.events[0].key, "k/b");
        assert_eq!(batch.revision, 2);
    }

    #[tokio::test]
    async fn live_batches_arrive_in_commit_order() {
        let store = MemoryStore::new();
        let mut feed = store.watch("", 0).await.unwrap();

        store.txn(Txn::new().then(put("a", b"1"))).await.unwrap();
        store
            .txn(Txn::new().then(put("b", b"2")).then(put("c", b"3")))
            .await
            .unwrap();

        let first = feed.recv().await.unwrap().unwrap();
        assert_eq!(first.revision, 1);
        let second = feed.recv().await.unwrap().unwrap();
        assert_eq!(second.revision, 2);
        let keys: Vec<&str> = second.events.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn multi_op_transactions_commit_atomically_at_one_revision() {
        let store = MemoryStore::new();
        let resp = store
            .txn(Txn::new().then(put("k/a", b"1")).then(put("k/b", b"2")))
            .await
            .unwrap();
        assert_eq!(resp.revision, 1);

        let a = store.get("k/a").await.unwrap().unwrap();
        let b = store.get("k/b").await.unwrap().unwrap();
        assert_eq!(a.mod_revision, 1);
        assert_eq!(b.mod_revision, 1);
    }

    #[tokio::test]
    async fn failed_transactions_apply_nothing() {
        let store = MemoryStore::new();
        let resp = store
            .txn(
                Txn::new()
                    .when(Compare::version("k/a", 5))
                    .then(put("k/a", b"1")),
            )
            .await
            .unwrap();
        assert!(!resp.succeeded);
        assert_eq!(resp.revision, 0);
        assert!(store.get("k/a").await.unwrap().is_none());
    }
}
