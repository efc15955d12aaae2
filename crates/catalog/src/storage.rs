//! Narrow storage collaborator consumed by the providers.
//!
//! Providers never touch `std::fs` directly; everything goes through
//! [`Storage`] so tests and alternate backends can substitute their own
//! implementation. The local implementation walks with the same machinery
//! the rest of the pipeline uses: a parallel directory walk that skips
//! hidden entries and silently drops anything inaccessible.

use crate::error::CatalogError;
use ignore::WalkBuilder;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

/// Storage entry points the catalog core depends on.
pub trait Storage: Send + Sync {
    /// Turn `path` into an absolute path. Fails on invalid paths.
    fn normalize(&self, path: &Path) -> Result<PathBuf, CatalogError>;

    /// Folder handle for `path` (which need not exist).
    fn folder(&self, path: &Path) -> Result<Box<dyn Folder>, CatalogError>;

    /// Document handle for `path` (which need not exist).
    fn document(&self, path: &Path) -> Result<Box<dyn Document>, CatalogError>;
}

/// A folder: existence, stable location, recursive document enumeration.
pub trait Folder: Send + Sync {
    fn exists(&self) -> bool;

    fn location(&self) -> &Path;

    /// All accessible documents under this folder, recursively. Hidden
    /// entries (any path segment starting with `.`) and unreadable entries
    /// are skipped without error.
    fn documents(&self) -> Vec<PathBuf>;
}

/// A document: existence and a read stream.
pub trait Document: Send + Sync {
    fn exists(&self) -> bool;

    fn location(&self) -> &Path;

    fn open_read(&self) -> Result<Box<dyn Read + Send>, CatalogError>;
}

// ---------------------------------------------------------------------------
// Local filesystem implementation
// ---------------------------------------------------------------------------

/// [`Storage`] backed by the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn arc() -> Arc<dyn Storage> {
        Arc::new(Self)
    }
}

impl Storage for LocalStorage {
    fn normalize(&self, path: &Path) -> Result<PathBuf, CatalogError> {
        Ok(std::path::absolute(path)?)
    }

    fn folder(&self, path: &Path) -> Result<Box<dyn Folder>, CatalogError> {
        Ok(Box::new(LocalFolder { path: path.to_path_buf() }))
    }

    fn document(&self, path: &Path) -> Result<Box<dyn Document>, CatalogError> {
        Ok(Box::new(LocalDocument { path: path.to_path_buf() }))
    }
}

struct LocalFolder {
    path: PathBuf,
}

impl Folder for LocalFolder {
    fn exists(&self) -> bool {
        self.path.is_dir()
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn documents(&self) -> Vec<PathBuf> {
        walk_documents_parallel(&self.path)
    }
}

struct LocalDocument {
    path: PathBuf,
}

impl Document for LocalDocument {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn open_read(&self) -> Result<Box<dyn Read + Send>, CatalogError> {
        Ok(Box::new(fs::File::open(&self.path)?))
    }
}

/// Collect every accessible file under `root` using a parallel walk. Hidden
/// files and directories are excluded; walk errors drop the entry.
fn walk_documents_parallel(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }

    let results: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

    WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .threads(rayon::current_num_threads().min(12))
        .build_parallel()
        .run(|| {
            Box::new(|entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return ignore::WalkState::Continue,
                };
                if entry.file_type().is_some_and(|ft| ft.is_file()) {
                    results.lock().unwrap().push(entry.path().to_path_buf());
                }
                ignore::WalkState::Continue
            })
        });

    results.into_inner().unwrap()
}
