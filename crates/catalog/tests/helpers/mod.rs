//! Shared harness for catalog integration tests.
//!
//! Providers are driven through a [`ManualEventSource`] so the incremental
//! pipeline runs without a real platform watcher; disk state lives in a
//! temp dir.

// Each integration binary uses a different subset of these helpers.
#![allow(dead_code)]

use oxshelf_catalog::{
    AssetChange, ChangeMessage, ChangeSubscription, FilesystemCatalogProvider,
    FilesystemProviderConfig, LocalStorage, ManualEventSource,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Generous bound for one debounced batch to land (window is 100 ms).
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound used to assert that nothing further arrives.
pub const QUIET_TIMEOUT: Duration = Duration::from_millis(400);

pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Filesystem provider over `root` with an injected event source.
pub fn fs_provider(
    mount: &str,
    root: &Path,
) -> (FilesystemCatalogProvider, Arc<ManualEventSource>) {
    let source = Arc::new(ManualEventSource::new());
    let config = FilesystemProviderConfig {
        mount_point: mount.to_string(),
        root_folder_path: root.to_path_buf(),
        watcher_filter: None,
    };
    let provider =
        FilesystemCatalogProvider::with_event_source(config, LocalStorage::arc(), source.clone())
            .unwrap();
    (provider, source)
}

/// Await the next change, panicking on lag, completion, or timeout.
pub async fn next_change(sub: &mut ChangeSubscription) -> AssetChange {
    match tokio::time::timeout(EVENT_TIMEOUT, sub.recv()).await {
        Ok(Some(ChangeMessage::Change(change))) => change,
        Ok(Some(ChangeMessage::Lagged(missed))) => panic!("subscriber lagged by {missed}"),
        Ok(None) => panic!("change stream completed unexpectedly"),
        Err(_) => panic!("timed out waiting for a change event"),
    }
}

/// Assert that no further change arrives within the quiet window.
pub async fn assert_quiet(sub: &mut ChangeSubscription) {
    if let Ok(message) = tokio::time::timeout(QUIET_TIMEOUT, sub.recv()).await {
        panic!("expected no further events, got {message:?}");
    }
}
