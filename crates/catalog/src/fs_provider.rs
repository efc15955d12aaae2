//! Filesystem catalog provider: an authoritative incremental index of the
//! files under a mount root.
//!
//! The first query snapshots the tree with a parallel walk. After that a
//! watcher feeds raw events into a debounce thread that coalesces 100 ms
//! bursts, folds each batch into the keyed store, and publishes typed
//! changes. Any failure during event application degrades to a full rescan
//! instead of surfacing an error to subscribers.

use crate::changes::{ChangeHub, ChangeSubscription};
use crate::config::FilesystemProviderConfig;
use crate::error::CatalogError;
use crate::provider::{filter_records, CatalogProvider};
use crate::record::{AssetChange, AssetQuery, AssetRecord};
use crate::storage::Storage;
use crate::uri::{AssetUri, UriFingerprint};
use crate::watch::{
    FsEvent, FsEventKind, FsEventSource, NotifyEventSource, NullEventSource, WatchGuard,
};
use async_trait::async_trait;
use parking_lot::{Once, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Coalescing window for raw watcher events. Renames in particular arrive
/// as several events inside one burst.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Outcome of folding one raw event into the store.
enum Applied {
    Changes(Vec<AssetChange>),
    /// The event cannot be folded incrementally (directory move, watcher
    /// overflow, IO failure); resynchronize with a full enumeration.
    NeedsRescan,
}

struct FsShared {
    name: String,
    mount: String,
    root: PathBuf,
    storage: Arc<dyn Storage>,
    store: RwLock<BTreeMap<UriFingerprint, AssetRecord>>,
    hub: ChangeHub,
    init: Once,
}

/// Provider over a directory tree, one mount per instance.
pub struct FilesystemCatalogProvider {
    shared: Arc<FsShared>,
    _watch: WatchGuard,
}

impl FilesystemCatalogProvider {
    /// Create a provider watching its root with the native watcher (or the
    /// null source if the root does not exist).
    pub fn new(
        config: FilesystemProviderConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, CatalogError> {
        let root = storage.normalize(&config.root_folder_path)?;
        let source: Arc<dyn FsEventSource> = if storage.folder(&root)?.exists() {
            let mut source = NotifyEventSource::new(&root);
            if let Some(filter) = &config.watcher_filter {
                source = source.with_filter(filter.clone());
            }
            Arc::new(source)
        } else {
            debug!("root {} does not exist, using null event source", root.display());
            Arc::new(NullEventSource)
        };
        Self::with_event_source(config, storage, source)
    }

    /// Create a provider fed by an explicit event source. This is the seam
    /// tests and in-process backends use to drive the incremental pipeline
    /// without a real watcher.
    pub fn with_event_source(
        config: FilesystemProviderConfig,
        storage: Arc<dyn Storage>,
        source: Arc<dyn FsEventSource>,
    ) -> Result<Self, CatalogError> {
        let root = storage.normalize(&config.root_folder_path)?;
        let shared = Arc::new(FsShared {
            name: format!("filesystem:{}", config.mount_point),
            mount: config.mount_point,
            root,
            storage,
            store: RwLock::new(BTreeMap::new()),
            hub: ChangeHub::new(),
            init: Once::new(),
        });

        let (tx, rx) = mpsc::channel();
        let guard = source.watch(tx)?;

        let worker = Arc::clone(&shared);
        std::thread::Builder::new()
            .name(format!("oxshelf-debounce-{}", worker.mount))
            .spawn(move || debounce_loop(rx, worker))
            .map_err(CatalogError::Storage)?;

        Ok(Self { shared, _watch: guard })
    }

    /// The mount token this provider stamps into URIs.
    pub fn mount(&self) -> &str {
        &self.shared.mount
    }

    async fn ensure_initialized(&self) -> Result<(), CatalogError> {
        if self.shared.init.state().done() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.initialize())
            .await
            .map_err(|err| CatalogError::Storage(std::io::Error::other(err)))?;
        Ok(())
    }
}

#[async_trait]
impl CatalogProvider for FilesystemCatalogProvider {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn query(
        &self,
        query: &AssetQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<AssetRecord>, CatalogError> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        self.ensure_initialized().await?;
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        let mount = self.shared.mount.clone();
        let store = self.shared.store.read();
        filter_records(store.iter(), query, cancel, |record| {
            vec![record.derived_name.clone(), mount.clone()]
        })
    }

    fn changes(&self) -> ChangeSubscription {
        self.shared.hub.subscribe()
    }
}

impl FsShared {
    /// One-shot snapshot enumeration. Entries applied by events that raced
    /// ahead of the snapshot win; the walk only fills gaps.
    fn initialize(&self) {
        self.init.call_once(|| {
            let started = Instant::now();
            let fresh = self.enumerate();
            let count = fresh.len();
            let mut store = self.store.write();
            for (fingerprint, record) in fresh {
                store.entry(fingerprint).or_insert(record);
            }
            info!(
                "indexed {count} assets under mount '{}' in {:?}",
                self.mount,
                started.elapsed()
            );
        });
    }

    /// Enumerate all accessible, included documents under the root.
    fn enumerate(&self) -> BTreeMap<UriFingerprint, AssetRecord> {
        let folder = match self.storage.folder(&self.root) {
            Ok(folder) => folder,
            Err(err) => {
                debug!("cannot open root {}: {err}", self.root.display());
                return BTreeMap::new();
            }
        };
        let mut out = BTreeMap::new();
        for path in folder.documents() {
            let Some(rel) = self.rel_of(&path) else { continue };
            let Ok(uri) = AssetUri::new(self.mount.clone(), &rel) else { continue };
            out.insert(uri.fingerprint(), AssetRecord::new(uri));
        }
        out
    }

    /// Map an absolute path to its mount-relative slash path, or `None`
    /// when the path is outside the root or excluded.
    fn rel_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        is_included(&rel).then_some(rel)
    }

    fn uri_for(&self, rel: &str) -> Result<AssetUri, CatalogError> {
        AssetUri::new(self.mount.clone(), rel)
    }

    fn is_directory(&self, path: &Path) -> bool {
        self.storage.folder(path).map(|f| f.exists()).unwrap_or(false)
    }

    /// Fold one debounced batch into the store, then publish the resulting
    /// changes. Errors never leave this function.
    fn apply_batch(&self, batch: Vec<FsEvent>) {
        let mut changes = Vec::new();
        for event in batch {
            match self.apply_event(&event) {
                Ok(Applied::Changes(mut applied)) => changes.append(&mut applied),
                Ok(Applied::NeedsRescan) => {
                    changes.extend(self.rescan());
                    // The rescan reconciled everything this batch observed.
                    break;
                }
                Err(err) => {
                    warn!("event application failed ({err}), falling back to rescan");
                    changes.extend(self.rescan());
                    break;
                }
            }
        }
        for change in changes {
            self.hub.publish(change);
        }
    }

    fn apply_event(&self, event: &FsEvent) -> Result<Applied, CatalogError> {
        match event.kind {
            FsEventKind::Created => self.note_present(&event.path, false),
            FsEventKind::Changed => self.note_present(&event.path, true),
            FsEventKind::Deleted => Ok(Applied::Changes(self.note_deleted(&event.path))),
            FsEventKind::Renamed => {
                let old = event.old_path.as_deref().ok_or_else(|| {
                    CatalogError::invalid_path("rename event without old path")
                })?;
                self.note_renamed(old, &event.path)
            }
            FsEventKind::RescanRequired => Ok(Applied::NeedsRescan),
        }
    }

    /// `Created`/`Changed`: insert if new, and for `Changed` report an
    /// update when the record was already known.
    fn note_present(&self, path: &Path, report_update: bool) -> Result<Applied, CatalogError> {
        let Some(rel) = self.rel_of(path) else {
            return Ok(Applied::Changes(Vec::new()));
        };
        if self.is_directory(path) {
            return Ok(Applied::Changes(Vec::new()));
        }
        let uri = self.uri_for(&rel)?;
        let fingerprint = uri.fingerprint();

        let known = {
            let mut store = self.store.write();
            let known = store.contains_key(&fingerprint);
            if !known {
                store.insert(fingerprint, AssetRecord::new(uri.clone()));
            }
            known
        };

        let changes = if known {
            if report_update {
                vec![AssetChange::updated(uri)]
            } else {
                Vec::new()
            }
        } else {
            vec![AssetChange::added(uri)]
        };
        Ok(Applied::Changes(changes))
    }

    /// `Deleted`: remove the record, or every record below the path when a
    /// folder disappeared.
    fn note_deleted(&self, path: &Path) -> Vec<AssetChange> {
        let Some(rel) = self.rel_of(path) else { return Vec::new() };
        let Ok(uri) = self.uri_for(&rel) else { return Vec::new() };

        let mut store = self.store.write();
        if store.remove(&uri.fingerprint()).is_some() {
            return vec![AssetChange::removed(uri)];
        }

        // Not a known document: a deleted folder takes its subtree with it.
        let prefix = format!("{rel}/");
        let doomed: Vec<UriFingerprint> = store
            .iter()
            .filter(|(_, record)| record.uri.relative().starts_with(&prefix))
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|fingerprint| store.remove(&fingerprint))
            .map(|record| AssetChange::removed(record.uri))
            .collect()
    }

    fn note_renamed(&self, old_path: &Path, new_path: &Path) -> Result<Applied, CatalogError> {
        // A moved directory shifts every descendant path at once; diffing
        // against a fresh enumeration is the only safe reconciliation.
        if self.is_directory(new_path) {
            return Ok(Applied::NeedsRescan);
        }

        match (self.rel_of(old_path), self.rel_of(new_path)) {
            (Some(old_rel), Some(new_rel)) => {
                let old_uri = self.uri_for(&old_rel)?;
                let new_uri = self.uri_for(&new_rel)?;

                let (had_old, had_new) = {
                    let mut store = self.store.write();
                    let had_old = store.remove(&old_uri.fingerprint()).is_some();
                    let had_new = store
                        .insert(new_uri.fingerprint(), AssetRecord::new(new_uri.clone()))
                        .is_some();
                    (had_old, had_new)
                };

                let changes = if had_old {
                    vec![AssetChange::relocated(new_uri, old_uri)]
                } else if !had_new {
                    vec![AssetChange::added(new_uri)]
                } else {
                    Vec::new()
                };
                Ok(Applied::Changes(changes))
            }
            // Moved into scope: a creation.
            (None, Some(_)) => self.note_present(new_path, false),
            // Moved out of scope: a deletion.
            (Some(_), None) => Ok(Applied::Changes(self.note_deleted(old_path))),
            (None, None) => Ok(Applied::Changes(Vec::new())),
        }
    }

    /// Enumerate everything and diff against the store. Emits `Removed`
    /// for entries that vanished and `Added` for new ones; never `Updated`.
    fn rescan(&self) -> Vec<AssetChange> {
        info!("rescanning mount '{}'", self.mount);
        let fresh = self.enumerate();
        let mut store = self.store.write();

        let mut changes = Vec::new();
        for (fingerprint, record) in store.iter() {
            if !fresh.contains_key(fingerprint) {
                changes.push(AssetChange::removed(record.uri.clone()));
            }
        }
        for (fingerprint, record) in &fresh {
            if !store.contains_key(fingerprint) {
                changes.push(AssetChange::added(record.uri.clone()));
            }
        }
        *store = fresh;
        drop(store);

        // A rescan leaves the store authoritative; the first query must not
        // redo the snapshot walk.
        self.init.call_once(|| {});
        changes
    }
}

/// Exclude any path with a hidden segment (leading `.`) or a traversal
/// segment. The leading path counts: a clean file under `.cache/` is out.
fn is_included(rel: &str) -> bool {
    !rel.is_empty()
        && !rel
            .split('/')
            .any(|segment| segment.is_empty() || segment.starts_with('.') || segment.contains(".."))
}

/// Collect raw events and fold them in windows: the first event opens a
/// 100 ms window, everything arriving inside it lands in the same batch.
fn debounce_loop(rx: Receiver<FsEvent>, shared: Arc<FsShared>) {
    loop {
        let first = match rx.recv() {
            Ok(event) => event,
            Err(_) => break,
        };
        let mut batch = vec![first];
        let deadline = Instant::now() + DEBOUNCE_WINDOW;
        let mut disconnected = false;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(event) => batch.push(event),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        shared.apply_batch(batch);
        if disconnected {
            break;
        }
    }
    debug!("event pipeline for mount '{}' ended", shared.mount);
}
