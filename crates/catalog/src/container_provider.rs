//! Container-index catalog provider.
//!
//! Derives its view from a binary container index file. The watcher is
//! filtered to the index file name; any debounced batch of events triggers
//! a reload-and-diff: re-read the index, compare against the previous
//! store, and emit `Removed`/`Added`/`Updated` for the delta. A failed
//! decode empties the catalog (with `Removed` for everything) rather than
//! surfacing an error through the change stream.

use crate::changes::{ChangeHub, ChangeSubscription};
use crate::config::ContainerProviderConfig;
use crate::container::{read_index, ContainerEntry};
use crate::error::CatalogError;
use crate::provider::{filter_records, CatalogProvider};
use crate::record::{AssetChange, AssetQuery, AssetRecord};
use crate::storage::Storage;
use crate::uri::UriFingerprint;
use crate::watch::{FsEvent, FsEventSource, NotifyEventSource, NullEventSource, WatchGuard};
use async_trait::async_trait;
use parking_lot::{Once, RwLock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Store value: the listing record plus the decoded locator, kept so the
/// diff can distinguish a content update from an unchanged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexedEntry {
    record: AssetRecord,
    entry: ContainerEntry,
}

struct ContainerShared {
    name: String,
    authority: String,
    index_path: PathBuf,
    storage: Arc<dyn Storage>,
    store: RwLock<BTreeMap<UriFingerprint, IndexedEntry>>,
    hub: ChangeHub,
    init: Once,
}

/// Provider over one packaged container's index file.
pub struct ContainerCatalogProvider {
    shared: Arc<ContainerShared>,
    _watch: WatchGuard,
}

impl ContainerCatalogProvider {
    /// Create a provider watching its cooked root with the native watcher
    /// (or the null source when the root does not exist).
    pub fn new(
        config: ContainerProviderConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, CatalogError> {
        let cooked_root = storage.normalize(&config.cooked_root_folder_path)?;
        let source: Arc<dyn FsEventSource> = if storage.folder(&cooked_root)?.exists() {
            let filter = config.effective_watcher_filter().to_string();
            Arc::new(NotifyEventSource::new(&cooked_root).with_filter(filter))
        } else {
            debug!(
                "cooked root {} does not exist, using null event source",
                cooked_root.display()
            );
            Arc::new(NullEventSource)
        };
        Self::with_event_source(config, storage, source)
    }

    /// Injection seam mirroring
    /// [`FilesystemCatalogProvider::with_event_source`](crate::fs_provider::FilesystemCatalogProvider::with_event_source).
    pub fn with_event_source(
        config: ContainerProviderConfig,
        storage: Arc<dyn Storage>,
        source: Arc<dyn FsEventSource>,
    ) -> Result<Self, CatalogError> {
        let cooked_root = storage.normalize(&config.cooked_root_folder_path)?;
        let index_path = cooked_root.join(&config.index_file_name);
        let shared = Arc::new(ContainerShared {
            name: format!("container:{}", config.authority),
            authority: config.authority,
            index_path,
            storage,
            store: RwLock::new(BTreeMap::new()),
            hub: ChangeHub::new(),
            init: Once::new(),
        });

        let (tx, rx) = mpsc::channel();
        let guard = source.watch(tx)?;

        let worker = Arc::clone(&shared);
        std::thread::Builder::new()
            .name(format!("oxshelf-container-{}", worker.authority))
            .spawn(move || debounce_loop(rx, worker))
            .map_err(CatalogError::Storage)?;

        Ok(Self { shared, _watch: guard })
    }

    /// The mount token this container declares for resolver routing.
    pub fn authority(&self) -> &str {
        &self.shared.authority
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
impl CatalogProvider for ContainerCatalogProvider {
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

        let store = self.shared.store.read();
        filter_records(
            store.iter().map(|(fingerprint, indexed)| (fingerprint, &indexed.record)),
            query,
            cancel,
            |_| Vec::new(),
        )
    }

    fn changes(&self) -> ChangeSubscription {
        self.shared.hub.subscribe()
    }
}

impl ContainerShared {
    fn initialize(&self) {
        self.init.call_once(|| {
            let started = Instant::now();
            match self.decode_index() {
                Ok(fresh) => {
                    let count = fresh.len();
                    *self.store.write() = fresh;
                    info!(
                        "indexed {count} container entries for '{}' in {:?}",
                        self.authority,
                        started.elapsed()
                    );
                }
                Err(err) => {
                    warn!("container index '{}' unreadable at startup: {err}", self.authority);
                }
            }
        });
    }

    /// Decode the index file into a fresh keyed map. A missing index file
    /// is an empty catalog, not an error; entries with invalid virtual
    /// paths are skipped.
    fn decode_index(&self) -> Result<BTreeMap<UriFingerprint, IndexedEntry>, CatalogError> {
        let document = self.storage.document(&self.index_path)?;
        if !document.exists() {
            return Ok(BTreeMap::new());
        }
        let mut reader = document.open_read()?;
        let entries = read_index(&mut reader)?;

        let mut out = BTreeMap::new();
        for entry in entries {
            match entry.uri() {
                Ok(uri) => {
                    let record = AssetRecord::new(uri);
                    out.insert(record.uri.fingerprint(), IndexedEntry { record, entry });
                }
                Err(err) => {
                    debug!("skipping entry with invalid virtual path: {err}");
                }
            }
        }
        Ok(out)
    }

    /// Reload the index and emit the delta against the previous store.
    fn reload_and_diff(&self) {
        let fresh = match self.decode_index() {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!("container index '{}' reload failed ({err}), emptying", self.authority);
                self.clear_with_removals();
                return;
            }
        };

        let mut changes = Vec::new();
        {
            let mut store = self.store.write();
            for (fingerprint, indexed) in store.iter() {
                if !fresh.contains_key(fingerprint) {
                    changes.push(AssetChange::removed(indexed.record.uri.clone()));
                }
            }
            for (fingerprint, indexed) in &fresh {
                match store.get(fingerprint) {
                    None => changes.push(AssetChange::added(indexed.record.uri.clone())),
                    Some(previous) if previous.entry != indexed.entry => {
                        changes.push(AssetChange::updated(indexed.record.uri.clone()));
                    }
                    Some(_) => {}
                }
            }
            *store = fresh;
        }
        self.init.call_once(|| {});

        info!(
            "container '{}' reloaded, {} change(s)",
            self.authority,
            changes.len()
        );
        for change in changes {
            self.hub.publish(change);
        }
    }

    /// Safe fallback after a decode failure: every known URI is reported
    /// removed, then the store empties.
    fn clear_with_removals(&self) {
        let removed: Vec<AssetChange> = {
            let mut store = self.store.write();
            let changes = store
                .values()
                .map(|indexed| AssetChange::removed(indexed.record.uri.clone()))
                .collect();
            store.clear();
            changes
        };
        self.init.call_once(|| {});
        for change in removed {
            self.hub.publish(change);
        }
    }
}

/// Same windowing as the filesystem provider, but the batch content is
/// irrelevant: any activity on the index file triggers one reload.
fn debounce_loop(rx: Receiver<FsEvent>, shared: Arc<ContainerShared>) {
    loop {
        match rx.recv() {
            Ok(_first) => {}
            Err(_) => break,
        }
        let deadline = Instant::now() + DEBOUNCE_WINDOW;
        let mut disconnected = false;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        shared.reload_and_diff();
        if disconnected {
            break;
        }
    }
    debug!("index watch for '{}' ended", shared.authority);
}
