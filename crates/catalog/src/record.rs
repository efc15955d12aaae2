//! Catalog records, change events, queries, and the importer record
//! contract.

use crate::scope::QueryScope;
use crate::uri::AssetUri;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A lightweight listing entry surfaced by `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub uri: AssetUri,
    /// File name without its final extension.
    pub derived_name: String,
}

impl AssetRecord {
    pub fn new(uri: AssetUri) -> Self {
        let derived_name = uri.derived_name();
        Self { uri, derived_name }
    }
}

/// What happened to an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
    Relocated,
}

/// One entry in a provider's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetChange {
    pub kind: ChangeKind,
    pub uri: AssetUri,
    /// Set only for [`ChangeKind::Relocated`]: where the asset used to be.
    pub previous_uri: Option<AssetUri>,
}

impl AssetChange {
    pub fn added(uri: AssetUri) -> Self {
        Self { kind: ChangeKind::Added, uri, previous_uri: None }
    }

    pub fn removed(uri: AssetUri) -> Self {
        Self { kind: ChangeKind::Removed, uri, previous_uri: None }
    }

    pub fn updated(uri: AssetUri) -> Self {
        Self { kind: ChangeKind::Updated, uri, previous_uri: None }
    }

    pub fn relocated(uri: AssetUri, previous: AssetUri) -> Self {
        Self { kind: ChangeKind::Relocated, uri, previous_uri: Some(previous) }
    }
}

/// A scoped query with an optional substring filter.
///
/// `search_text` semantics are provider-defined; the baseline is a
/// case-insensitive substring match against the URI string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetQuery {
    pub scope: QueryScope,
    pub search_text: Option<String>,
}

impl AssetQuery {
    /// Query matching everything.
    pub fn all() -> Self {
        Self { scope: QueryScope::all(), search_text: None }
    }

    pub fn scoped(scope: QueryScope) -> Self {
        Self { scope, search_text: None }
    }

    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search_text = Some(text.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Importer-emitted records (contract with the cooking pipeline)
// ---------------------------------------------------------------------------

/// Role a dependency played during import.
///
/// The derived `Ord` (declaration order, then path) is the deterministic
/// dependency ordering importers must emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
    SourceFile,
    Sidecar,
    ReferencedResource,
}

/// One dependency of an imported asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedDependency {
    pub path: String,
    pub kind: DependencyKind,
}

impl PartialOrd for ImportedDependency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImportedDependency {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind.cmp(&other.kind).then_with(|| self.path.as_bytes().cmp(other.path.as_bytes()))
    }
}

/// Provenance of an imported asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedSource {
    pub path: String,
    pub content_hash: [u8; 32],
    pub last_write_time_ms: i64,
}

/// The record an importer emits for one cooked asset.
///
/// The catalog stores nothing from `payload`; it uses the virtual path to
/// form URIs, the content hash for change detection, and the dependency
/// list for deterministic ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedAsset {
    pub asset_key: String,
    pub virtual_path: String,
    pub asset_type: String,
    pub source: ImportedSource,
    pub dependencies: Vec<ImportedDependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl ImportedAsset {
    /// URI derived from the record's virtual path.
    pub fn uri(&self) -> Result<AssetUri, crate::error::CatalogError> {
        crate::container::virtual_path_to_uri(&self.virtual_path)
    }

    /// Dependencies in canonical order: kind first, then byte-exact path.
    pub fn ordered_dependencies(&self) -> Vec<ImportedDependency> {
        let mut deps = self.dependencies.clone();
        deps.sort();
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_name_strips_final_extension_only() {
        let record =
            AssetRecord::new(AssetUri::new("Content", "Meshes/rock.cooked.omesh").unwrap());
        assert_eq!(record.derived_name, "rock.cooked");
    }

    #[test]
    fn relocated_carries_previous_uri() {
        let new = AssetUri::new("Content", "b.txt").unwrap();
        let old = AssetUri::new("Content", "a.txt").unwrap();
        let change = AssetChange::relocated(new.clone(), old.clone());
        assert_eq!(change.kind, ChangeKind::Relocated);
        assert_eq!(change.uri, new);
        assert_eq!(change.previous_uri, Some(old));
    }

    #[test]
    fn dependency_ordering_is_kind_then_path() {
        let mut deps = vec![
            ImportedDependency { path: "b.png".into(), kind: DependencyKind::ReferencedResource },
            ImportedDependency { path: "z.json".into(), kind: DependencyKind::SourceFile },
            ImportedDependency { path: "a.png".into(), kind: DependencyKind::ReferencedResource },
            ImportedDependency { path: "z.json.meta".into(), kind: DependencyKind::Sidecar },
        ];
        deps.sort();
        let kinds: Vec<_> = deps.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DependencyKind::SourceFile,
                DependencyKind::Sidecar,
                DependencyKind::ReferencedResource,
                DependencyKind::ReferencedResource,
            ]
        );
        assert_eq!(deps[2].path, "a.png");
        assert_eq!(deps[3].path, "b.png");
    }
}
