use std::future::Future;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;

use super::{flag_signature, service, TestResult};
use crate::kv::KvStore;
use crate::{ListOptions, StoreError};

pub(super) async fn run_listing_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "listing",
        "list_returns_paths_in_order",
        list_returns_paths_in_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "listing",
        "list_filters_by_prefix",
        list_filters_by_prefix(factory).await,
    ));
    results.push(TestResult::from_result(
        "listing",
        "list_paginates_with_cursor",
        list_paginates_with_cursor(factory).await,
    ));
    results.push(TestResult::from_result(
        "listing",
        "exhausted_listing_omits_cursor",
        exhausted_listing_omits_cursor(factory).await,
    ));
    results.push(TestResult::from_result(
        "listing",
        "list_rejects_garbage_cursors",
        list_rejects_garbage_cursors(factory).await,
    ));
    results.push(TestResult::from_result(
        "listing",
        "list_clamps_out_of_range_limits",
        list_clamps_out_of_range_limits(factory).await,
    ));
    results.push(TestResult::from_result(
        "listing",
        "list_empty_store_returns_empty_page",
        list_empty_store_returns_empty_page(factory).await,
    ));

    results
}

async fn create_paths<S: KvStore>(
    svc: &crate::RulesetService<S>,
    paths: &[&str],
) -> Result<(), String> {
    for path in paths {
        svc.create_signature(path, &flag_signature())
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

// ── Test implementations ──────────────────────────────────────────────────────

/// Paths list in ascending order regardless of creation order, and the
/// page reports the revision it was served at.
async fn list_returns_paths_in_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    create_paths(&svc, &["b", "a/x", "a"]).await?;

    let page = svc
        .list("", &ListOptions::default())
        .await
        .map_err(|e| e.to_string())?;
    if page.paths != ["a", "a/x", "b"] {
        return Err(format!("unexpected order: {:?}", page.paths));
    }
    if page.revision <= 0 {
        return Err(format!("expected a positive revision, got {}", page.revision));
    }
    if !page.cursor.is_empty() {
        return Err("complete listing should not carry a cursor".to_string());
    }
    Ok(())
}

/// Only paths under the prefix appear.
async fn list_filters_by_prefix<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    create_paths(&svc, &["app/one", "app/two", "web/one"]).await?;

    let page = svc
        .list("app/", &ListOptions::default())
        .await
        .map_err(|e| e.to_string())?;
    if page.paths != ["app/one", "app/two"] {
        return Err(format!("unexpected paths: {:?}", page.paths));
    }
    Ok(())
}

/// Pages chain through cursors without skipping or repeating, including
/// across paths that extend each other.
async fn list_paginates_with_cursor<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    create_paths(&svc, &["y", "y/1", "y/2", "y/3", "yy", "z"]).await?;

    let page1 = svc
        .list(
            "y",
            &ListOptions {
                limit: Some(2),
                cursor: None,
            },
        )
        .await
        .map_err(|e| e.to_string())?;
    if page1.paths != ["y", "y/1"] {
        return Err(format!("page 1: {:?}", page1.paths));
    }
    if page1.cursor.is_empty() {
        return Err("page 1 should carry a cursor".to_string());
    }

    let page2 = svc
        .list(
            "y",
            &ListOptions {
                limit: Some(2),
                cursor: Some(page1.cursor),
            },
        )
        .await
        .map_err(|e| e.to_string())?;
    if page2.paths != ["y/2", "y/3"] {
        return Err(format!("page 2: {:?}", page2.paths));
    }
    if page2.cursor.is_empty() {
        return Err("page 2 should carry a cursor".to_string());
    }

    let page3 = svc
        .list(
            "y",
            &ListOptions {
                limit: Some(2),
                cursor: Some(page2.cursor),
            },
        )
        .await
        .map_err(|e| e.to_string())?;
    if page3.paths != ["yy"] {
        return Err(format!("page 3: {:?}", page3.paths));
    }
    if !page3.cursor.is_empty() {
        return Err("final page should not carry a cursor".to_string());
    }
    Ok(())
}

/// A page that exactly drains the range must not invite another call.
async fn exhausted_listing_omits_cursor<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    create_paths(&svc, &["a", "b"]).await?;

    let page = svc
        .list(
            "",
            &ListOptions {
                limit: Some(2),
                cursor: None,
            },
        )
        .await
        .map_err(|e| e.to_string())?;
    if page.paths != ["a", "b"] {
        return Err(format!("unexpected paths: {:?}", page.paths));
    }
    if !page.cursor.is_empty() {
        return Err("exact-fit page should not carry a cursor".to_string());
    }
    Ok(())
}

/// Cursors that are not base64, or decode to junk bytes, are rejected.
async fn list_rejects_garbage_cursors<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    create_paths(&svc, &["a"]).await?;

    let junk_utf8 = URL_SAFE.encode([0xff, 0xfe]);
    for cursor in ["not-base64!", junk_utf8.as_str()] {
        let result = svc
            .list(
                "",
                &ListOptions {
                    limit: None,
                    cursor: Some(cursor.to_string()),
                },
            )
            .await;
        match result {
            Err(StoreError::InvalidCursor) => {}
            Err(e) => return Err(format!("cursor {:?}: expected InvalidCursor, got: {e}", cursor)),
            Ok(_) => return Err(format!("cursor {:?} should have been rejected", cursor)),
        }
    }
    Ok(())
}

/// Limits outside 1..=100 fall back to the default page size instead of
/// failing.
async fn list_clamps_out_of_range_limits<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    create_paths(&svc, &["a", "b", "c"]).await?;

    for limit in [Some(0), Some(1000), None] {
        let page = svc
            .list("", &ListOptions {
                limit,
                cursor: None,
            })
            .await
            .map_err(|e| e.to_string())?;
        if page.paths != ["a", "b", "c"] {
            return Err(format!("limit {:?}: unexpected paths {:?}", limit, page.paths));
        }
        if !page.cursor.is_empty() {
            return Err(format!("limit {:?}: unexpected cursor", limit));
        }
    }
    Ok(())
}

/// An empty namespace lists as an empty page, not an error.
async fn list_empty_store_returns_empty_page<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KvStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let svc = service(factory().await)?;
    let page = svc
        .list("", &ListOptions::default())
        .await
        .map_err(|e| e.to_string())?;
    if !page.paths.is_empty() || !page.cursor.is_empty() {
        return Err(format!("expected an empty page, got {:?}", page.paths));
    }
    Ok(())
}
