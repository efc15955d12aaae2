//! Generated catalog provider: a fixed set of built-in records available
//! before any content is authored or cooked.

use crate::changes::ChangeSubscription;
use crate::error::CatalogError;
use crate::provider::{filter_records, keyed_store, CatalogProvider};
use crate::record::{AssetQuery, AssetRecord};
use crate::resolver::{GeometryAsset, LoadedAsset, MaterialAsset};
use crate::uri::{AssetUri, UriFingerprint};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Mount token for engine-generated content.
pub const GENERATED_MOUNT: &str = "Generated";

/// Immutable in-memory provider. Its change stream is empty and already
/// completed.
pub struct GeneratedCatalogProvider {
    name: String,
    store: BTreeMap<UriFingerprint, AssetRecord>,
}

impl GeneratedCatalogProvider {
    /// Provider over the engine's built-in primitives and defaults.
    pub fn with_builtins() -> Self {
        Self::from_records(builtin_assets().into_iter().map(|(record, _)| record))
    }

    /// Provider over an arbitrary fixed record set.
    pub fn from_records(records: impl IntoIterator<Item = AssetRecord>) -> Self {
        Self { name: format!("generated:{GENERATED_MOUNT}"), store: keyed_store(records) }
    }
}

#[async_trait]
impl CatalogProvider for GeneratedCatalogProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        query: &AssetQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<AssetRecord>, CatalogError> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        filter_records(self.store.iter(), query, cancel, |_| Vec::new())
    }

    fn changes(&self) -> ChangeSubscription {
        ChangeSubscription::completed()
    }
}

/// The built-in record set together with the runtime assets backing them.
/// The generated resolver serves lookups from the same table, so the
/// catalog view and the resolvable set can never drift apart.
pub fn builtin_assets() -> Vec<(AssetRecord, LoadedAsset)> {
    let mut out = Vec::new();

    let material_uri = generated_uri("Materials/Default.omat");
    out.push((
        AssetRecord::new(material_uri.clone()),
        LoadedAsset::Material(MaterialAsset {
            uri: material_uri,
            source_path: None,
            document: json!({
                "shader": "standard",
                "baseColor": [0.8, 0.8, 0.8, 1.0],
                "metallic": 0.0,
                "roughness": 0.9,
            }),
        }),
    ));

    for (relative, positions, indices) in [
        ("Meshes/Quad.omesh", quad_positions(), vec![0u32, 1, 2, 0, 2, 3]),
        ("Meshes/Triangle.omesh", triangle_positions(), vec![0u32, 1, 2]),
        ("Meshes/Cube.omesh", cube_positions(), cube_indices()),
    ] {
        let uri = generated_uri(relative);
        out.push((
            AssetRecord::new(uri.clone()),
            LoadedAsset::Geometry(GeometryAsset {
                uri,
                source_path: None,
                positions,
                indices,
            }),
        ));
    }

    out
}

fn generated_uri(relative: &str) -> AssetUri {
    // The mount constant and relative literals are static and well formed.
    AssetUri::new(GENERATED_MOUNT, relative).expect("builtin URI")
}

fn quad_positions() -> Vec<[f32; 3]> {
    vec![[-0.5, -0.5, 0.0], [0.5, -0.5, 0.0], [0.5, 0.5, 0.0], [-0.5, 0.5, 0.0]]
}

fn triangle_positions() -> Vec<[f32; 3]> {
    vec![[-0.5, -0.5, 0.0], [0.5, -0.5, 0.0], [0.0, 0.5, 0.0]]
}

fn cube_positions() -> Vec<[f32; 3]> {
    let mut positions = Vec::with_capacity(8);
    for z in [-0.5f32, 0.5] {
        for y in [-0.5f32, 0.5] {
            for x in [-0.5f32, 0.5] {
                positions.push([x, y, z]);
            }
        }
    }
    positions
}

fn cube_indices() -> Vec<u32> {
    vec![
        0, 1, 3, 0, 3, 2, // -z
        4, 6, 7, 4, 7, 5, // +z
        0, 4, 5, 0, 5, 1, // -y
        2, 3, 7, 2, 7, 6, // +y
        0, 2, 6, 0, 6, 4, // -x
        1, 5, 7, 1, 7, 3, // +x
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{QueryScope, ScopeTraversal};

    #[tokio::test]
    async fn builtins_are_listed_sorted() {
        let provider = GeneratedCatalogProvider::with_builtins();
        let records =
            provider.query(&AssetQuery::all(), &CancellationToken::new()).await.unwrap();
        assert!(!records.is_empty());
        let uris: Vec<String> = records.iter().map(|r| r.uri.to_string()).collect();
        let mut sorted = uris.clone();
        sorted.sort();
        assert_eq!(uris, sorted);
        assert!(uris.iter().all(|u| u.starts_with("asset:///Generated/")));
    }

    #[tokio::test]
    async fn scope_and_search_apply() {
        let provider = GeneratedCatalogProvider::with_builtins();
        let root = AssetUri::new(GENERATED_MOUNT, "Meshes").unwrap();
        let query = AssetQuery::scoped(QueryScope::new(vec![root], ScopeTraversal::Children))
            .with_search("cube");
        let records = provider.query(&query, &CancellationToken::new()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].derived_name, "Cube");
    }

    #[tokio::test]
    async fn change_stream_is_completed() {
        let provider = GeneratedCatalogProvider::with_builtins();
        let mut changes = provider.changes();
        assert!(changes.recv().await.is_none());
    }
}
