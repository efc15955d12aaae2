//! End-to-end scenarios for the filesystem provider: snapshot queries,
//! incremental add/rename/delete, hidden exclusion, and rescan
//! reconciliation.

mod helpers;

use helpers::{assert_quiet, fs_provider, next_change, write_file};
use oxshelf_catalog::{
    AssetQuery, AssetUri, CatalogProvider, ChangeKind, FsEvent, QueryScope, ScopeTraversal,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn uris(records: &[oxshelf_catalog::AssetRecord]) -> Vec<String> {
    records.iter().map(|r| r.uri.to_string()).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_query_is_sorted_and_excludes_hidden() {
    let dir = TempDir::new().unwrap();
    write_file(&dir.path().join("zebra.txt"), b"z");
    write_file(&dir.path().join("Alpha/one.omat"), b"{}");
    write_file(&dir.path().join(".cache/skipme.txt"), b"x");
    write_file(&dir.path().join("Alpha/.hidden.txt"), b"x");

    let (provider, _source) = fs_provider("Content", dir.path());
    let records = provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();

    assert_eq!(
        uris(&records),
        vec!["asset:///Content/Alpha/one.omat", "asset:///Content/zebra.txt"]
    );
    assert_eq!(records[0].derived_name, "one");
}

#[tokio::test(flavor = "multi_thread")]
async fn add_rename_delete_lifecycle() {
    let dir = TempDir::new().unwrap();
    let (provider, source) = fs_provider("Content", dir.path());

    // First query initializes the (empty) store.
    let records = provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();
    assert!(records.is_empty());

    let mut changes = provider.changes();

    // Create.
    let a_path = dir.path().join("a.txt");
    write_file(&a_path, b"hello");
    source.emit(FsEvent::created(&a_path));
    let change = next_change(&mut changes).await;
    assert_eq!(change.kind, ChangeKind::Added);
    assert_eq!(change.uri.to_string(), "asset:///Content/a.txt");

    // Rename into a subfolder, target still in scope.
    let b_path = dir.path().join("sub/b.txt");
    write_file(&b_path, b"hello");
    std::fs::remove_file(&a_path).unwrap();
    source.emit(FsEvent::renamed(&a_path, &b_path));
    let change = next_change(&mut changes).await;
    assert_eq!(change.kind, ChangeKind::Relocated);
    assert_eq!(change.uri.to_string(), "asset:///Content/sub/b.txt");
    assert_eq!(
        change.previous_uri.as_ref().map(|u| u.to_string()),
        Some("asset:///Content/a.txt".to_string())
    );

    // Delete.
    std::fs::remove_file(&b_path).unwrap();
    source.emit(FsEvent::deleted(&b_path));
    let change = next_change(&mut changes).await;
    assert_eq!(change.kind, ChangeKind::Removed);
    assert_eq!(change.uri.to_string(), "asset:///Content/sub/b.txt");

    assert_quiet(&mut changes).await;

    let records = provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn hidden_paths_produce_no_events_and_no_records() {
    let dir = TempDir::new().unwrap();
    let (provider, source) = fs_provider("Content", dir.path());
    provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();

    let mut changes = provider.changes();
    let hidden = dir.path().join(".cache/x");
    write_file(&hidden, b"x");
    source.emit(FsEvent::created(&hidden));

    assert_quiet(&mut changes).await;
    let records = provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn rename_across_the_inclusion_boundary_degrades() {
    let dir = TempDir::new().unwrap();
    let (provider, source) = fs_provider("Content", dir.path());
    provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();
    let mut changes = provider.changes();

    // In -> out: a deletion.
    let seen = dir.path().join("seen.txt");
    write_file(&seen, b"x");
    source.emit(FsEvent::created(&seen));
    assert_eq!(next_change(&mut changes).await.kind, ChangeKind::Added);

    let hidden = dir.path().join(".trash/seen.txt");
    write_file(&hidden, b"x");
    std::fs::remove_file(&seen).unwrap();
    source.emit(FsEvent::renamed(&seen, &hidden));
    let change = next_change(&mut changes).await;
    assert_eq!(change.kind, ChangeKind::Removed);
    assert_eq!(change.uri.to_string(), "asset:///Content/seen.txt");

    // Out -> in: a creation.
    let restored = dir.path().join("restored.txt");
    write_file(&restored, b"x");
    source.emit(FsEvent::renamed(&hidden, &restored));
    let change = next_change(&mut changes).await;
    assert_eq!(change.kind, ChangeKind::Added);
    assert_eq!(change.uri.to_string(), "asset:///Content/restored.txt");

    assert_quiet(&mut changes).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_event_reports_update_or_inserts() {
    let dir = TempDir::new().unwrap();
    let (provider, source) = fs_provider("Content", dir.path());

    let known = dir.path().join("known.txt");
    write_file(&known, b"v1");
    provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();
    let mut changes = provider.changes();

    // Known file: update.
    write_file(&known, b"v2");
    source.emit(FsEvent::changed(&known));
    let change = next_change(&mut changes).await;
    assert_eq!(change.kind, ChangeKind::Updated);

    // Unknown but valid file: insert.
    let fresh = dir.path().join("fresh.txt");
    write_file(&fresh, b"x");
    source.emit(FsEvent::changed(&fresh));
    let change = next_change(&mut changes).await;
    assert_eq!(change.kind, ChangeKind::Added);
    assert_eq!(change.uri.to_string(), "asset:///Content/fresh.txt");
}

#[tokio::test(flavor = "multi_thread")]
async fn rescan_required_reconciles_against_disk() {
    let dir = TempDir::new().unwrap();
    let (provider, source) = fs_provider("Content", dir.path());

    let stays = dir.path().join("stays.txt");
    let goes = dir.path().join("goes.txt");
    write_file(&stays, b"x");
    write_file(&goes, b"x");
    provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();
    let mut changes = provider.changes();

    // Mutate disk without any per-file events, then force a rescan.
    std::fs::remove_file(&goes).unwrap();
    write_file(&dir.path().join("appears.txt"), b"x");
    source.emit(FsEvent::rescan_required());

    let mut kinds = vec![next_change(&mut changes).await, next_change(&mut changes).await];
    kinds.sort_by_key(|c| c.uri.to_string());
    assert_eq!(kinds[0].kind, ChangeKind::Added);
    assert_eq!(kinds[0].uri.to_string(), "asset:///Content/appears.txt");
    assert_eq!(kinds[1].kind, ChangeKind::Removed);
    assert_eq!(kinds[1].uri.to_string(), "asset:///Content/goes.txt");
    assert_quiet(&mut changes).await;

    let records = provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();
    assert_eq!(
        uris(&records),
        vec!["asset:///Content/appears.txt", "asset:///Content/stays.txt"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn event_fold_matches_full_rescan() {
    // Applying a sequence of events must leave the store equal to a fresh
    // enumeration of the same tree.
    let dir = TempDir::new().unwrap();
    let (provider, source) = fs_provider("Content", dir.path());
    provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();
    let mut changes = provider.changes();

    let a = dir.path().join("a.txt");
    let b = dir.path().join("nested/b.txt");
    let c = dir.path().join("c.txt");
    write_file(&a, b"1");
    write_file(&b, b"2");
    write_file(&c, b"3");
    source.emit(FsEvent::created(&a));
    source.emit(FsEvent::created(&b));
    source.emit(FsEvent::created(&c));
    for _ in 0..3 {
        next_change(&mut changes).await;
    }

    let c2 = dir.path().join("nested/c2.txt");
    write_file(&c2, b"3");
    std::fs::remove_file(&c).unwrap();
    source.emit(FsEvent::renamed(&c, &c2));
    std::fs::remove_file(&a).unwrap();
    source.emit(FsEvent::deleted(&a));
    for _ in 0..2 {
        next_change(&mut changes).await;
    }

    let folded = provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();

    let (fresh_provider, _fresh_source) = fs_provider("Content", dir.path());
    let fresh =
        fresh_provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();

    assert_eq!(uris(&folded), uris(&fresh));
}

#[tokio::test(flavor = "multi_thread")]
async fn scoped_queries_and_search() {
    let dir = TempDir::new().unwrap();
    write_file(&dir.path().join("A/B/x.txt"), b"");
    write_file(&dir.path().join("A/y.txt"), b"");
    write_file(&dir.path().join("A/B/C/z.txt"), b"");

    let (provider, _source) = fs_provider("C", dir.path());
    let cancel = CancellationToken::new();
    let root = AssetUri::parse("asset:///C/A/").unwrap();

    let children = provider
        .query(
            &AssetQuery::scoped(QueryScope::new(vec![root.clone()], ScopeTraversal::Children)),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(uris(&children), vec!["asset:///C/A/y.txt"]);

    let descendants = provider
        .query(
            &AssetQuery::scoped(QueryScope::new(vec![root.clone()], ScopeTraversal::Descendants)),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(
        uris(&descendants),
        vec!["asset:///C/A/B/C/z.txt", "asset:///C/A/B/x.txt", "asset:///C/A/y.txt"]
    );

    let self_only = provider
        .query(
            &AssetQuery::scoped(QueryScope::new(vec![root], ScopeTraversal::SelfOnly)),
            &cancel,
        )
        .await
        .unwrap();
    assert!(self_only.is_empty(), "no record equals the scope root");

    // Substring search is case-insensitive and also covers derived names.
    let found = provider.query(&AssetQuery::all().with_search("Y.TXT"), &cancel).await.unwrap();
    assert_eq!(uris(&found), vec!["asset:///C/A/y.txt"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_query_returns_cancelled() {
    let dir = TempDir::new().unwrap();
    let (provider, _source) = fs_provider("Content", dir.path());
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        provider.query(&AssetQuery::all(), &cancel).await,
        Err(oxshelf_catalog::CatalogError::Cancelled)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn change_stream_completes_when_provider_drops() {
    let dir = TempDir::new().unwrap();
    let (provider, source) = fs_provider("Content", dir.path());
    let mut changes = provider.changes();

    drop(provider);
    drop(source);

    let end = tokio::time::timeout(helpers::EVENT_TIMEOUT, changes.recv()).await;
    assert!(matches!(end, Ok(None)), "stream should complete, got {end:?}");
}
