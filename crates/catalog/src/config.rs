//! Provider configuration records and catalog assembly.
//!
//! An `oxshelf.toml` file declares the providers making up a catalog:
//!
//! ```toml
//! [[filesystem]]
//! mount_point = "Content"
//! root_folder_path = "assets/content"
//!
//! [[container]]
//! authority = "Engine"
//! cooked_root_folder_path = "cooked"
//!
//! [generated]
//! enabled = true
//! ```

use crate::composite::CompositeCatalog;
use crate::container::DEFAULT_INDEX_FILE_NAME;
use crate::container_provider::ContainerCatalogProvider;
use crate::error::CatalogError;
use crate::fs_provider::FilesystemCatalogProvider;
use crate::generated::GeneratedCatalogProvider;
use crate::provider::CatalogProvider;
use crate::resolver::{
    ContainerResolver, FilesystemResolver, GeneratedResolver, ResolverRegistry,
};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Options for one filesystem provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemProviderConfig {
    /// Authority token inserted into URIs.
    pub mount_point: String,
    /// Absolute (or working-directory-relative) root of the walk.
    pub root_folder_path: PathBuf,
    /// Optional filename filter for the watcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watcher_filter: Option<String>,
}

/// Options for one container provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerProviderConfig {
    /// Mount token for URIs derived from this container.
    pub authority: String,
    /// Folder containing the index and payloads.
    pub cooked_root_folder_path: PathBuf,
    /// Index filename inside the cooked root.
    #[serde(default = "default_index_file_name")]
    pub index_file_name: String,
    /// Watcher filename filter; defaults to the index file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watcher_filter: Option<String>,
}

impl ContainerProviderConfig {
    pub fn new(authority: impl Into<String>, cooked_root: impl Into<PathBuf>) -> Self {
        Self {
            authority: authority.into(),
            cooked_root_folder_path: cooked_root.into(),
            index_file_name: default_index_file_name(),
            watcher_filter: None,
        }
    }

    /// The filter the index watcher actually uses.
    pub fn effective_watcher_filter(&self) -> &str {
        self.watcher_filter.as_deref().unwrap_or(&self.index_file_name)
    }
}

fn default_index_file_name() -> String {
    DEFAULT_INDEX_FILE_NAME.to_string()
}

/// Options for the generated provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for GeneratedProviderConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Full catalog declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub filesystem: Vec<FilesystemProviderConfig>,
    #[serde(default)]
    pub container: Vec<ContainerProviderConfig>,
    #[serde(default)]
    pub generated: GeneratedProviderConfig,
}

impl CatalogConfig {
    /// Parse an `oxshelf.toml` file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|err| {
            CatalogError::invalid_format(format!("{}: {err}", path.display()))
        })
    }
}

/// A composite catalog plus the resolver registry routing its mounts.
pub struct Catalog {
    pub catalog: CompositeCatalog,
    pub resolvers: ResolverRegistry,
}

impl Catalog {
    /// Build providers and resolvers from a configuration. Filesystem
    /// providers come first, then containers, then the generated set; that
    /// order also breaks deduplication ties.
    pub fn from_config(
        config: &CatalogConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, CatalogError> {
        let mut providers: Vec<Arc<dyn CatalogProvider>> = Vec::new();
        let mut resolvers = ResolverRegistry::new();

        for fs_config in &config.filesystem {
            let provider =
                FilesystemCatalogProvider::new(fs_config.clone(), Arc::clone(&storage))?;
            let resolver = FilesystemResolver::new(
                fs_config.mount_point.clone(),
                fs_config.root_folder_path.clone(),
                Arc::clone(&storage),
            )?;
            providers.push(Arc::new(provider));
            resolvers.register(Arc::new(resolver));
        }

        for container_config in &config.container {
            let provider =
                ContainerCatalogProvider::new(container_config.clone(), Arc::clone(&storage))?;
            resolvers.register(Arc::new(ContainerResolver::new(
                container_config.authority.clone(),
            )));
            providers.push(Arc::new(provider));
        }

        if config.generated.enabled {
            providers.push(Arc::new(GeneratedCatalogProvider::with_builtins()));
            resolvers.register(Arc::new(GeneratedResolver::with_builtins()));
        }

        info!("assembled catalog with {} provider(s)", providers.len());
        Ok(Self { catalog: CompositeCatalog::new(providers), resolvers })
    }
}
