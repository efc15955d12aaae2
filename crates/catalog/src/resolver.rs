//! URI resolution: routing a URI to the backend that can load it.
//!
//! Each resolver declares the mounts it owns; the registry walks its list
//! in order and delegates to the first match. Resolution returns a shared
//! handle to a [`LoadedAsset`] variant, or `None` when no resolver owns
//! the mount or the asset does not exist.

use crate::container::virtual_path_to_uri;
use crate::error::CatalogError;
use crate::generated::builtin_assets;
use crate::storage::Storage;
use crate::uri::{AssetUri, UriFingerprint};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Loaded assets
// ---------------------------------------------------------------------------

/// A JSON-authored material document.
#[derive(Debug, Clone)]
pub struct MaterialAsset {
    pub uri: AssetUri,
    pub source_path: Option<PathBuf>,
    pub document: Value,
}

/// Triangle geometry: positions plus a triangle index list.
#[derive(Debug, Clone)]
pub struct GeometryAsset {
    pub uri: AssetUri,
    pub source_path: Option<PathBuf>,
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

/// UTF-8 text content (shaders, markup, plain text).
#[derive(Debug, Clone)]
pub struct TextAsset {
    pub uri: AssetUri,
    pub source_path: Option<PathBuf>,
    pub text: String,
}

/// Raw bytes for anything without a dedicated loader.
#[derive(Debug, Clone)]
pub struct BlobAsset {
    pub uri: AssetUri,
    pub source_path: Option<PathBuf>,
    pub bytes: Vec<u8>,
}

/// Tagged union over the concrete runtime asset types. Every variant
/// carries its URI and its source form alongside the derived structure.
#[derive(Debug, Clone)]
pub enum LoadedAsset {
    Material(MaterialAsset),
    Geometry(GeometryAsset),
    Text(TextAsset),
    Blob(BlobAsset),
}

impl LoadedAsset {
    pub fn uri(&self) -> &AssetUri {
        match self {
            Self::Material(asset) => &asset.uri,
            Self::Geometry(asset) => &asset.uri,
            Self::Text(asset) => &asset.uri,
            Self::Blob(asset) => &asset.uri,
        }
    }

    pub fn source_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Material(asset) => asset.source_path.as_ref(),
            Self::Geometry(asset) => asset.source_path.as_ref(),
            Self::Text(asset) => asset.source_path.as_ref(),
            Self::Blob(asset) => asset.source_path.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver surface
// ---------------------------------------------------------------------------

/// One backend's loader entry point.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this resolver owns `mount` (case-insensitive).
    fn can_resolve(&self, mount: &str) -> bool;

    /// Load the asset behind `uri`, or `None` if it does not exist.
    async fn resolve(&self, uri: &AssetUri) -> Result<Option<Arc<LoadedAsset>>, CatalogError>;
}

/// Ordered list of resolvers; the first whose `can_resolve` accepts the
/// URI's mount handles the resolution.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Arc<dyn AssetResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Arc<dyn AssetResolver>) {
        self.resolvers.push(resolver);
    }

    pub async fn resolve(
        &self,
        uri: &AssetUri,
    ) -> Result<Option<Arc<LoadedAsset>>, CatalogError> {
        for resolver in &self.resolvers {
            if resolver.can_resolve(uri.mount()) {
                return resolver.resolve(uri).await;
            }
        }
        debug!("no resolver owns mount '{}'", uri.mount());
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Generated resolver
// ---------------------------------------------------------------------------

/// Serves the built-in asset table from memory.
pub struct GeneratedResolver {
    name: String,
    mount: String,
    assets: HashMap<UriFingerprint, Arc<LoadedAsset>>,
}

impl GeneratedResolver {
    pub fn with_builtins() -> Self {
        let assets = builtin_assets()
            .into_iter()
            .map(|(record, asset)| (record.uri.fingerprint(), Arc::new(asset)))
            .collect();
        Self {
            name: "generated".to_string(),
            mount: crate::generated::GENERATED_MOUNT.to_string(),
            assets,
        }
    }
}

#[async_trait]
impl AssetResolver for GeneratedResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_resolve(&self, mount: &str) -> bool {
        mount.eq_ignore_ascii_case(&self.mount)
    }

    async fn resolve(&self, uri: &AssetUri) -> Result<Option<Arc<LoadedAsset>>, CatalogError> {
        Ok(self.assets.get(&uri.fingerprint()).cloned())
    }
}

// ---------------------------------------------------------------------------
// Filesystem resolver
// ---------------------------------------------------------------------------

/// Maps a URI to a path under a source root and loads it with the loader
/// selected by extension. Loaded assets are cached; callers reacting to an
/// `Updated`/`Removed` change should call [`invalidate`](Self::invalidate)
/// before re-resolving.
pub struct FilesystemResolver {
    name: String,
    mount: String,
    source_root: PathBuf,
    storage: Arc<dyn Storage>,
    cache: DashMap<UriFingerprint, Arc<LoadedAsset>>,
}

impl FilesystemResolver {
    pub fn new(
        mount: impl Into<String>,
        source_root: impl Into<PathBuf>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, CatalogError> {
        let mount = mount.into();
        let source_root = storage.normalize(&source_root.into())?;
        Ok(Self {
            name: format!("filesystem:{mount}"),
            mount,
            source_root,
            storage,
            cache: DashMap::new(),
        })
    }

    /// Drop the cached asset for `uri`, if any.
    pub fn invalidate(&self, uri: &AssetUri) {
        self.cache.remove(&uri.fingerprint());
    }

    fn disk_path(&self, uri: &AssetUri) -> PathBuf {
        let mut path = self.source_root.clone();
        for segment in uri.relative().split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    fn load(&self, uri: &AssetUri, path: PathBuf) -> Result<Option<LoadedAsset>, CatalogError> {
        let document = self.storage.document(&path)?;
        if !document.exists() {
            return Ok(None);
        }
        let mut bytes = Vec::new();
        document.open_read()?.read_to_end(&mut bytes)?;

        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let asset = match extension.as_str() {
            "omat" | "json" => {
                let document: Value = serde_json::from_slice(&bytes).map_err(|err| {
                    CatalogError::invalid_format(format!("material '{uri}': {err}"))
                })?;
                LoadedAsset::Material(MaterialAsset {
                    uri: uri.clone(),
                    source_path: Some(path),
                    document,
                })
            }
            "obj" => {
                let text = String::from_utf8(bytes).map_err(|_| {
                    CatalogError::invalid_format(format!("geometry '{uri}' is not UTF-8"))
                })?;
                let (positions, indices) = parse_obj_positions(&text)
                    .map_err(|msg| CatalogError::invalid_format(format!("'{uri}': {msg}")))?;
                LoadedAsset::Geometry(GeometryAsset {
                    uri: uri.clone(),
                    source_path: Some(path),
                    positions,
                    indices,
                })
            }
            "txt" | "md" | "xml" | "wgsl" | "glsl" | "hlsl" | "ron" | "yaml" | "yml" => {
                match String::from_utf8(bytes) {
                    Ok(text) => LoadedAsset::Text(TextAsset {
                        uri: uri.clone(),
                        source_path: Some(path),
                        text,
                    }),
                    Err(err) => LoadedAsset::Blob(BlobAsset {
                        uri: uri.clone(),
                        source_path: Some(path),
                        bytes: err.into_bytes(),
                    }),
                }
            }
            _ => LoadedAsset::Blob(BlobAsset {
                uri: uri.clone(),
                source_path: Some(path),
                bytes,
            }),
        };
        Ok(Some(asset))
    }
}

#[async_trait]
impl AssetResolver for FilesystemResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_resolve(&self, mount: &str) -> bool {
        mount.eq_ignore_ascii_case(&self.mount)
    }

    async fn resolve(&self, uri: &AssetUri) -> Result<Option<Arc<LoadedAsset>>, CatalogError> {
        let fingerprint = uri.fingerprint();
        if let Some(cached) = self.cache.get(&fingerprint) {
            return Ok(Some(Arc::clone(&cached)));
        }

        let path = self.disk_path(uri);
        match self.load(uri, path)? {
            Some(asset) => {
                let asset = Arc::new(asset);
                self.cache.insert(fingerprint, Arc::clone(&asset));
                Ok(Some(asset))
            }
            None => Ok(None),
        }
    }
}

/// Minimal OBJ reader: `v` positions and triangulated `f` faces. Enough
/// structure for consumers to upload; full OBJ semantics belong to the
/// import pipeline.
fn parse_obj_positions(text: &str) -> Result<(Vec<[f32; 3]>, Vec<u32>), String> {
    let mut positions = Vec::new();
    let mut indices = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("v") => {
                let mut coords = [0f32; 3];
                for coord in &mut coords {
                    *coord = fields
                        .next()
                        .and_then(|f| f.parse().ok())
                        .ok_or_else(|| format!("bad vertex on line {}", line_no + 1))?;
                }
                positions.push(coords);
            }
            Some("f") => {
                let face: Vec<u32> = fields
                    .map(|f| {
                        let index_text = f.split('/').next().unwrap_or(f);
                        index_text
                            .parse::<u32>()
                            .ok()
                            .and_then(|i| i.checked_sub(1))
                            .ok_or_else(|| format!("bad face on line {}", line_no + 1))
                    })
                    .collect::<Result<_, _>>()?;
                if face.len() < 3 {
                    return Err(format!("face with <3 vertices on line {}", line_no + 1));
                }
                for i in 1..face.len() - 1 {
                    indices.extend_from_slice(&[face[0], face[i], face[i + 1]]);
                }
            }
            _ => {}
        }
    }
    Ok((positions, indices))
}

// ---------------------------------------------------------------------------
// Container resolver
// ---------------------------------------------------------------------------

/// Declares ownership of a container's mount. Payload loading is not
/// implemented yet, so every resolution reports "not found".
// TODO: read payload ranges out of the container's payload blob once the
// runtime grows a blob reader.
pub struct ContainerResolver {
    name: String,
    authority: String,
}

impl ContainerResolver {
    pub fn new(authority: impl Into<String>) -> Self {
        let authority = authority.into();
        Self { name: format!("container:{authority}"), authority }
    }
}

#[async_trait]
impl AssetResolver for ContainerResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_resolve(&self, mount: &str) -> bool {
        mount.eq_ignore_ascii_case(&self.authority)
    }

    async fn resolve(&self, _uri: &AssetUri) -> Result<Option<Arc<LoadedAsset>>, CatalogError> {
        Ok(None)
    }
}

/// Resolve a container virtual path directly, bypassing URI construction.
pub async fn resolve_virtual_path(
    registry: &ResolverRegistry,
    virtual_path: &str,
) -> Result<Option<Arc<LoadedAsset>>, CatalogError> {
    let uri = virtual_path_to_uri(virtual_path)?;
    registry.resolve(&uri).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn registry_routes_by_mount_in_order() {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(GeneratedResolver::with_builtins()));
        registry.register(Arc::new(ContainerResolver::new("Engine")));

        let generated = AssetUri::new("generated", "Meshes/Cube.omesh").unwrap();
        let resolved = registry.resolve(&generated).await.unwrap();
        assert!(matches!(resolved.as_deref(), Some(LoadedAsset::Geometry(_))));

        let engine = AssetUri::new("Engine", "Meshes/Cube").unwrap();
        assert!(registry.resolve(&engine).await.unwrap().is_none());

        let unowned = AssetUri::new("Nowhere", "x").unwrap();
        assert!(registry.resolve(&unowned).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn filesystem_resolver_loads_by_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Materials")).unwrap();
        std::fs::write(
            dir.path().join("Materials/Wood.omat"),
            br#"{"shader": "standard", "baseColor": [1, 0.5, 0.2, 1]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("raw.bin"), [0u8, 1, 2]).unwrap();

        let resolver =
            FilesystemResolver::new("Content", dir.path(), LocalStorage::arc()).unwrap();

        let material = AssetUri::new("Content", "Materials/Wood.omat").unwrap();
        match resolver.resolve(&material).await.unwrap().as_deref() {
            Some(LoadedAsset::Material(asset)) => {
                assert_eq!(asset.document["shader"], "standard");
                assert!(asset.source_path.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }

        let text = AssetUri::new("Content", "notes.txt").unwrap();
        assert!(matches!(
            resolver.resolve(&text).await.unwrap().as_deref(),
            Some(LoadedAsset::Text(_))
        ));

        let blob = AssetUri::new("Content", "raw.bin").unwrap();
        assert!(matches!(
            resolver.resolve(&blob).await.unwrap().as_deref(),
            Some(LoadedAsset::Blob(_))
        ));

        let missing = AssetUri::new("Content", "nope.txt").unwrap();
        assert!(resolver.resolve(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_drops_the_cached_copy() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        let resolver =
            FilesystemResolver::new("Content", dir.path(), LocalStorage::arc()).unwrap();
        let uri = AssetUri::new("Content", "a.txt").unwrap();

        match resolver.resolve(&uri).await.unwrap().as_deref() {
            Some(LoadedAsset::Text(asset)) => assert_eq!(asset.text, "one"),
            other => panic!("unexpected {other:?}"),
        }

        std::fs::write(dir.path().join("a.txt"), "two").unwrap();
        resolver.invalidate(&uri);
        match resolver.resolve(&uri).await.unwrap().as_deref() {
            Some(LoadedAsset::Text(asset)) => assert_eq!(asset.text, "two"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn obj_parsing_triangulates_quads() {
        let obj = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let (positions, indices) = parse_obj_positions(obj).unwrap();
        assert_eq!(positions.len(), 4);
        assert_eq!(indices, vec![0, 1, 2, 0, 2, 3]);
    }
}
