//! The provider surface: a cancelable async query plus a change stream.

use crate::changes::ChangeSubscription;
use crate::error::CatalogError;
use crate::record::{AssetQuery, AssetRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// A component maintaining an indexed view of one backend.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Stable name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Records matching `query`, sorted by full URI string in byte order.
    ///
    /// The first query triggers backend initialization (snapshot
    /// enumeration). Honors `cancel` at every enumeration boundary.
    async fn query(
        &self,
        query: &AssetQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<AssetRecord>, CatalogError>;

    /// Subscribe to this provider's change stream. Every subscriber sees
    /// the same logical sequence; the stream completes when the provider
    /// is dropped.
    fn changes(&self) -> ChangeSubscription;
}

/// Case-insensitive substring match over precomputed haystacks.
pub(crate) fn search_matches(needle_lower: &str, haystacks: &[&str]) -> bool {
    haystacks.iter().any(|hay| hay.to_ascii_lowercase().contains(needle_lower))
}

/// Shared tail of every provider's `query`: scope + search filtering over a
/// store snapshot, then the byte-order sort. `extra_haystacks` supplies
/// provider-specific search surfaces beyond the URI string.
pub(crate) fn filter_records<'a, I, K>(
    entries: I,
    query: &AssetQuery,
    cancel: &CancellationToken,
    extra_haystacks: impl Fn(&AssetRecord) -> Vec<String>,
) -> Result<Vec<AssetRecord>, CatalogError>
where
    I: Iterator<Item = (&'a K, &'a AssetRecord)>,
    K: 'a,
{
    let needle_lower = query.search_text.as_deref().map(str::to_ascii_lowercase);
    let mut out = Vec::new();
    for (_, record) in entries {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        if !query.scope.matches(&record.uri) {
            continue;
        }
        if let Some(needle) = needle_lower.as_deref() {
            let uri_text = record.uri.to_string();
            let extras = extra_haystacks(record);
            let mut haystacks: Vec<&str> = vec![&uri_text];
            haystacks.extend(extras.iter().map(String::as_str));
            if !search_matches(needle, &haystacks) {
                continue;
            }
        }
        out.push(record.clone());
    }
    out.sort_by_cached_key(|record| record.uri.to_string());
    Ok(out)
}

/// Convenience for tests and generated providers: build a fingerprint-keyed
/// store from records.
pub(crate) fn keyed_store(
    records: impl IntoIterator<Item = AssetRecord>,
) -> BTreeMap<crate::uri::UriFingerprint, AssetRecord> {
    records
        .into_iter()
        .map(|record| (record.uri.fingerprint(), record))
        .collect()
}
