//! Oxshelf asset catalog — a multi-provider, incrementally updated index
//! of engine content keyed by `asset://` URIs.
//!
//! Providers maintain an authoritative view of one backend (a source tree,
//! a packaged container index, or generated built-ins), answer scoped
//! queries with deterministic ordering, and publish typed change events.
//! The [`CompositeCatalog`] merges providers into one deduplicated view,
//! and the [`ResolverRegistry`] routes a URI to the backend that can load
//! it.

pub mod changes;
pub mod composite;
pub mod config;
pub mod container;
pub mod container_provider;
pub mod error;
pub mod fs_provider;
pub mod generated;
pub mod provider;
pub mod record;
pub mod resolver;
pub mod scope;
pub mod storage;
pub mod uri;
pub mod watch;

pub use changes::{ChangeMessage, ChangeSubscription};
pub use composite::CompositeCatalog;
pub use config::{
    Catalog, CatalogConfig, ContainerProviderConfig, FilesystemProviderConfig,
    GeneratedProviderConfig,
};
pub use container::{
    read_index, virtual_path_to_uri, write_index, ContainerEntry, CONTAINER_MAGIC,
    CONTAINER_VERSION, DEFAULT_INDEX_FILE_NAME,
};
pub use container_provider::ContainerCatalogProvider;
pub use error::CatalogError;
pub use fs_provider::FilesystemCatalogProvider;
pub use generated::{builtin_assets, GeneratedCatalogProvider, GENERATED_MOUNT};
pub use provider::CatalogProvider;
pub use record::{
    AssetChange, AssetQuery, AssetRecord, ChangeKind, DependencyKind, ImportedAsset,
    ImportedDependency, ImportedSource,
};
pub use resolver::{
    AssetResolver, BlobAsset, ContainerResolver, FilesystemResolver, GeneratedResolver,
    GeometryAsset, LoadedAsset, MaterialAsset, ResolverRegistry, TextAsset,
};
pub use scope::{QueryScope, ScopeTraversal};
pub use storage::{Document, Folder, LocalStorage, Storage};
pub use uri::{AssetUri, UriFingerprint, ASSET_SCHEME};
pub use watch::{
    FsEvent, FsEventKind, FsEventSource, ManualEventSource, NotifyEventSource, NullEventSource,
    WatchGuard,
};
