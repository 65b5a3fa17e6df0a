use std::future::Future;
use std::time::Duration;

use super::{flag_signature, match_rule, service, TestResult};
use crate::kv::KvStore;
use crate::{ListOptions, WatchOptions};

/// Generous bound for watches that replay history and so return
/// immediately.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Short bound for watches that are expected to time out.
const IDLE_TIMEOUT: Duration = Duration::from_millis(50);

pub(super) async fn run_watch_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "watch",
        "watch_delivers_new_versions",
        watch_delivers_new_versions(factory).await,
    ));
    results.push(TestResult::from_result(
        "watch",
        "watch_filters_by_path",
        watch_filters_by_path(factory).await,
    ));
    results.push(TestResult::from_result(
        "watch",
        "watch_resumes_from_checkpoint",
        watch_resumes_from_checkpoint(factory).await,
    ));
    results.push(TestResult::from_result(
        "watch",
        "watch_times_out_when_idle",
        watch_times_out_when_idle(factory).await,
    ));
    results.push(TestResult::from_result(
        "watch",
        "checkpoint_advances_past_delivered_events",
        checkpoint_advances_past_delivered_events(factory).await,
    ));
    results.push(TestResult::from_result(
        "watch",
        "signature_writes_do_not_wake_watches",
        signature_writes_do_not_wake_watches(factory).await,
    ));

    results
}

/// Store revision before any of the writes a test is about to watch.
async fn current_revision<S: KvStore>(svc: &crate::RulesetService<S>) -> Result<i64, String> {
    let page = svc
        .list("", &ListOptions::default())
        .await
        .map_err(|e| e.to_string())?;
    Ok(page.revision)
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A watch from a past revision replays the versions stored since.
async fn watch_delivers_new_versions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;
    let rev0 = current_revision(&svc).await?;

    let rules = vec![match_rule("user-id", "admin", true)?];
    let version = svc
        .put("app/flag", &rules)
        .await
        .map_err(|e| e.to_string())?;

    let events = svc
        .watch(&WatchOptions {
            paths: Vec::new(),
            revision: rev0,
            timeout: Some(DELIVERY_TIMEOUT),
        })
        .await
        .map_err(|e| e.to_string())?;

    if events.timeout {
        return Err("watch timed out instead of delivering".to_string());
    }
    if events.events.len() != 1 {
        return Err(format!("expected one event, got {}", events.events.len()));
    }
    let event = &events.events[0];
    if event.path != "app/flag" || event.version != version {
        return Err(format!(
            "unexpected event: {}@{} (wanted app/flag@{version})",
            event.path, event.version
        ));
    }
    if event.rules != rules {
        return Err("event rules do not match the put".to_string());
    }
    if events.revision <= rev0 {
        return Err(format!(
            "checkpoint did not advance: {} after {rev0}",
            events.revision
        ));
    }
    Ok(())
}

/// A path filter suppresses versions of other paths entirely.
async fn watch_filters_by_path<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("a", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;
    svc.create_signature("b", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;
    let rev0 = current_revision(&svc).await?;

    svc.put("b", &[match_rule("user-id", "x", true)?])
        .await
        .map_err(|e| e.to_string())?;
    let wanted = svc
        .put("a", &[match_rule("user-id", "y", true)?])
        .await
        .map_err(|e| e.to_string())?;

    let events = svc
        .watch(&WatchOptions {
            paths: vec!["a".to_string()],
            revision: rev0,
            timeout: Some(DELIVERY_TIMEOUT),
        })
        .await
        .map_err(|e| e.to_string())?;

    if events.events.len() != 1 {
        return Err(format!("expected one event, got {:?}", events.events));
    }
    if events.events[0].path != "a" || events.events[0].version != wanted {
        return Err(format!(
            "unexpected event: {}@{}",
            events.events[0].path, events.events[0].version
        ));
    }
    Ok(())
}

/// Watching from a mid-history revision skips versions already seen.
async fn watch_resumes_from_checkpoint<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    svc.put("app/flag", &[match_rule("user-id", "first", true)?])
        .await
        .map_err(|e| e.to_string())?;
    let rev_mid = current_revision(&svc).await?;
    let second = svc
        .put("app/flag", &[match_rule("user-id", "second", true)?])
        .await
        .map_err(|e| e.to_string())?;

    let events = svc
        .watch(&WatchOptions {
            paths: Vec::new(),
            revision: rev_mid,
            timeout: Some(DELIVERY_TIMEOUT),
        })
        .await
        .map_err(|e| e.to_string())?;

    if events.events.len() != 1 || events.events[0].version != second {
        return Err(format!("expected only the second version, got {:?}", events.events));
    }
    Ok(())
}

/// With nothing to deliver, the watch reports the timeout and echoes
/// the caller's revision.
async fn watch_times_out_when_idle<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;
    let rev0 = current_revision(&svc).await?;

    let events = svc
        .watch(&WatchOptions {
            paths: Vec::new(),
            revision: rev0,
            timeout: Some(IDLE_TIMEOUT),
        })
        .await
        .map_err(|e| e.to_string())?;

    if !events.timeout {
        return Err("expected the watch to time out".to_string());
    }
    if !events.events.is_empty() {
        return Err(format!("expected no events, got {:?}", events.events));
    }
    if events.revision != rev0 {
        return Err(format!(
            "idle watch moved the checkpoint: {} from {rev0}",
            events.revision
        ));
    }
    Ok(())
}

/// Resuming from a delivered checkpoint must not replay the same
/// events.
async fn checkpoint_advances_past_delivered_events<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("app/flag", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;
    let rev0 = current_revision(&svc).await?;
    svc.put("app/flag", &[match_rule("user-id", "admin", true)?])
        .await
        .map_err(|e| e.to_string())?;

    let first = svc
        .watch(&WatchOptions {
            paths: Vec::new(),
            revision: rev0,
            timeout: Some(DELIVERY_TIMEOUT),
        })
        .await
        .map_err(|e| e.to_string())?;
    if first.events.is_empty() {
        return Err("first watch should have delivered".to_string());
    }

    let second = svc
        .watch(&WatchOptions {
            paths: Vec::new(),
            revision: first.revision,
            timeout: Some(IDLE_TIMEOUT),
        })
        .await
        .map_err(|e| e.to_string())?;
    if !second.timeout || !second.events.is_empty() {
        return Err(format!("events were replayed: {:?}", second.events));
    }
    Ok(())
}

/// Only rule versions wake watchers; signature writes are invisible to
/// them.
async fn signature_writes_do_not_wake_watches<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    svc.create_signature("a", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;
    let rev0 = current_revision(&svc).await?;
    svc.create_signature("b", &flag_signature())
        .await
        .map_err(|e| e.to_string())?;

    let events = svc
        .watch(&WatchOptions {
            paths: Vec::new(),
            revision: rev0,
            timeout: Some(IDLE_TIMEOUT),
        })
        .await
        .map_err(|e| e.to_string())?;
    if !events.timeout || !events.events.is_empty() {
        return Err(format!("signature write woke the watch: {:?}", events.events));
    }
    Ok(())
}
