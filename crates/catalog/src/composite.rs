//! Composite catalog: N providers behind one query and one change stream.
//!
//! Queries fan out to every child in parallel, then the results are
//! deduplicated by URI fingerprint (first provider wins) and byte-sorted.
//! The merged change stream is lazy and reference counted: the first
//! subscriber spins up one forwarding task per child, later subscribers
//! share those tasks, and when the last subscription drops the upstream
//! subscriptions are released. A later subscribe reconstitutes them.

use crate::changes::{ChangeMessage, ChangeSubscription, CHANGE_BUFFER};
use crate::error::CatalogError;
use crate::provider::CatalogProvider;
use crate::record::{AssetChange, AssetQuery, AssetRecord};
use crate::uri::UriFingerprint;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Unifies multiple providers into a single deduplicated view.
///
/// `changes` spawns its forwarding tasks on the ambient tokio runtime, so
/// it must be called from within one.
pub struct CompositeCatalog {
    name: String,
    providers: Vec<Arc<dyn CatalogProvider>>,
    merge: Arc<Mutex<Option<MergeState>>>,
}

struct MergeState {
    tx: broadcast::Sender<AssetChange>,
    cancel: CancellationToken,
    subscribers: usize,
}

/// Drop guard handed to every merged subscription; releasing the last one
/// cancels the forwarding tasks and drops the upstream subscriptions.
struct MergeRetain {
    merge: Arc<Mutex<Option<MergeState>>>,
}

impl Drop for MergeRetain {
    fn drop(&mut self) {
        let mut guard = self.merge.lock();
        if let Some(state) = guard.as_mut() {
            state.subscribers -= 1;
            if state.subscribers == 0 {
                state.cancel.cancel();
                *guard = None;
            }
        }
    }
}

impl CompositeCatalog {
    pub fn new(providers: Vec<Arc<dyn CatalogProvider>>) -> Self {
        Self {
            name: "composite".to_string(),
            providers,
            merge: Arc::new(Mutex::new(None)),
        }
    }

    pub fn providers(&self) -> &[Arc<dyn CatalogProvider>] {
        &self.providers
    }

    fn start_merge(&self) -> MergeState {
        let (tx, _) = broadcast::channel(CHANGE_BUFFER);
        let cancel = CancellationToken::new();

        for provider in &self.providers {
            let mut upstream = provider.changes();
            let provider_name = provider.name().to_string();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        message = upstream.recv() => match message {
                            Some(ChangeMessage::Change(change)) => {
                                let _ = tx.send(change);
                            }
                            Some(ChangeMessage::Lagged(missed)) => {
                                warn!(
                                    "merge fell {missed} event(s) behind provider '{provider_name}'"
                                );
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        MergeState { tx, cancel, subscribers: 0 }
    }
}

#[async_trait]
impl CatalogProvider for CompositeCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    /// Fan out to every child, await all, flatten, deduplicate by
    /// fingerprint, byte-sort. Child order breaks fingerprint ties.
    async fn query(
        &self,
        query: &AssetQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<AssetRecord>, CatalogError> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        let results =
            join_all(self.providers.iter().map(|p| p.query(query, cancel))).await;

        let mut merged: BTreeMap<UriFingerprint, AssetRecord> = BTreeMap::new();
        for result in results {
            for record in result? {
                merged.entry(record.uri.fingerprint()).or_insert(record);
            }
        }

        let mut out: Vec<AssetRecord> = merged.into_values().collect();
        out.sort_by_cached_key(|record| record.uri.to_string());
        Ok(out)
    }

    fn changes(&self) -> ChangeSubscription {
        if self.providers.is_empty() {
            return ChangeSubscription::completed();
        }

        let mut guard = self.merge.lock();
        let state = guard.get_or_insert_with(|| self.start_merge());
        state.subscribers += 1;
        let rx = state.tx.subscribe();
        drop(guard);

        ChangeSubscription::with_retain(rx, Arc::new(MergeRetain { merge: Arc::clone(&self.merge) }))
    }
}
