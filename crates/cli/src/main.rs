//! Oxshelf CLI — inspect and drive asset catalogs from the terminal.
//!
//! Calls `oxshelf-catalog` directly with no engine runtime: list a
//! catalog's records, watch its change stream, resolve a single URI, pack
//! a source tree into a container, or dump a container index.

use clap::{Parser, Subcommand, ValueEnum};
use oxshelf_catalog::{
    read_index, write_index, AssetQuery, AssetUri, Catalog, CatalogConfig, CatalogProvider,
    ChangeMessage, ContainerEntry, FilesystemProviderConfig, LoadedAsset, LocalStorage,
    QueryScope, ScopeTraversal, Storage, DEFAULT_INDEX_FILE_NAME,
};
use sha2::{Digest, Sha256};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio_util::sync::CancellationToken;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Oxshelf content-pipeline CLI — asset catalogs from the terminal.
#[derive(Parser)]
#[command(name = "oxshelf", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog records matching a scope and optional search text
    List {
        /// Catalog config file (default: ./oxshelf.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Ad-hoc source root mounted as "Content" (instead of a config)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Scope root URI, e.g. asset:///Content/Materials/
        #[arg(long)]
        scope: Option<String>,

        /// Traversal relative to the scope root
        #[arg(long, value_enum, default_value = "descendants")]
        traversal: TraversalArg,

        /// Case-insensitive substring filter
        #[arg(long)]
        search: Option<String>,
    },
    /// Subscribe to the catalog's change stream and print events
    Watch {
        /// Catalog config file (default: ./oxshelf.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Ad-hoc source root mounted as "Content" (instead of a config)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Resolve one URI to a loaded asset
    Resolve {
        /// Asset URI, e.g. asset:///Content/Materials/Wood.omat
        uri: String,

        /// Catalog config file (default: ./oxshelf.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Ad-hoc source root mounted as "Content" (instead of a config)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Pack a source tree into a container (payload blob + index)
    Pack {
        /// Source tree to pack
        source_root: PathBuf,

        /// Output folder for the container files
        #[arg(long, default_value = "cooked")]
        out: PathBuf,

        /// Mount token stamped into virtual paths
        #[arg(long, default_value = "Engine")]
        mount: String,
    },
    /// Decode a container index and print its entries
    Inspect {
        /// Path to the index file
        index_path: PathBuf,
    },
}

/// CLI spelling of the scope traversals.
#[derive(Clone, Copy, ValueEnum)]
enum TraversalArg {
    All,
    #[value(name = "self")]
    SelfOnly,
    Children,
    Descendants,
}

impl From<TraversalArg> for ScopeTraversal {
    fn from(value: TraversalArg) -> Self {
        match value {
            TraversalArg::All => ScopeTraversal::All,
            TraversalArg::SelfOnly => ScopeTraversal::SelfOnly,
            TraversalArg::Children => ScopeTraversal::Children,
            TraversalArg::Descendants => ScopeTraversal::Descendants,
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog assembly
// ---------------------------------------------------------------------------

/// Build a catalog from `--config`, `--root`, or a local `oxshelf.toml`.
fn open_catalog(config: Option<PathBuf>, root: Option<PathBuf>) -> Catalog {
    let storage = LocalStorage::arc();

    let catalog_config = if let Some(root) = root {
        CatalogConfig {
            filesystem: vec![FilesystemProviderConfig {
                mount_point: "Content".to_string(),
                root_folder_path: root,
                watcher_filter: None,
            }],
            ..Default::default()
        }
    } else {
        let path = config.unwrap_or_else(|| PathBuf::from("oxshelf.toml"));
        match CatalogConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Cannot load catalog config '{}': {err}", path.display());
                std::process::exit(1);
            }
        }
    };

    match Catalog::from_config(&catalog_config, storage) {
        Ok(catalog) => catalog,
        Err(err) => {
            eprintln!("Cannot assemble catalog: {err}");
            std::process::exit(1);
        }
    }
}

fn build_query(scope: Option<String>, traversal: TraversalArg, search: Option<String>) -> AssetQuery {
    let scope = match scope {
        Some(text) => {
            let root = match AssetUri::parse(&text) {
                Ok(root) => root,
                Err(err) => {
                    eprintln!("Invalid scope root '{text}': {err}");
                    std::process::exit(1);
                }
            };
            QueryScope::new(vec![root], traversal.into())
        }
        None => QueryScope::all(),
    };
    let mut query = AssetQuery::scoped(scope);
    query.search_text = search;
    query
}

// ---------------------------------------------------------------------------
// Container packing
// ---------------------------------------------------------------------------

/// Walk `source_root`, append every included document to the payload blob,
/// and write the index. Entries are sorted by virtual path so repeated
/// packs of the same tree produce identical indexes.
fn pack_container(
    source_root: &Path,
    out: &Path,
    mount: &str,
) -> Result<(usize, PathBuf), Box<dyn std::error::Error>> {
    let storage = LocalStorage::arc();
    let source_root = storage.normalize(source_root)?;
    let folder = storage.folder(&source_root)?;
    if !folder.exists() {
        return Err(format!("source root '{}' does not exist", source_root.display()).into());
    }

    let mut documents = folder.documents();
    documents.sort();

    std::fs::create_dir_all(out)?;
    let payload_path = out.join("container.payload.bin");
    let index_path = out.join(DEFAULT_INDEX_FILE_NAME);

    let mut payload = std::fs::File::create(&payload_path)?;
    let mut entries = Vec::with_capacity(documents.len());
    let mut offset = 0u64;

    for path in documents {
        let relative = match path.strip_prefix(&source_root) {
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                info!("skipping unreadable '{relative}': {err}");
                continue;
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let content_hash: [u8; 32] = hasher.finalize().into();

        let last_write_time_ms = std::fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0);

        payload.write_all(&bytes)?;
        entries.push(ContainerEntry {
            virtual_path: format!("/{mount}/{relative}"),
            payload_offset: offset,
            payload_size: bytes.len() as u64,
            content_hash,
            last_write_time_ms,
        });
        offset += bytes.len() as u64;
    }

    entries.sort_by(|a, b| a.virtual_path.cmp(&b.virtual_path));

    let mut index = std::fs::File::create(&index_path)?;
    write_index(&mut index, &entries)?;
    Ok((entries.len(), index_path))
}

fn hash_prefix(hash: &[u8; 32]) -> String {
    hash.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

fn describe_asset(asset: &LoadedAsset) -> serde_json::Value {
    match asset {
        LoadedAsset::Material(material) => serde_json::json!({
            "kind": "material",
            "uri": material.uri.to_string(),
            "sourcePath": material.source_path.as_ref().map(|p| p.display().to_string()),
            "document": material.document,
        }),
        LoadedAsset::Geometry(geometry) => serde_json::json!({
            "kind": "geometry",
            "uri": geometry.uri.to_string(),
            "sourcePath": geometry.source_path.as_ref().map(|p| p.display().to_string()),
            "positions": geometry.positions.len(),
            "triangles": geometry.indices.len() / 3,
        }),
        LoadedAsset::Text(text) => serde_json::json!({
            "kind": "text",
            "uri": text.uri.to_string(),
            "sourcePath": text.source_path.as_ref().map(|p| p.display().to_string()),
            "bytes": text.text.len(),
        }),
        LoadedAsset::Blob(blob) => serde_json::json!({
            "kind": "blob",
            "uri": blob.uri.to_string(),
            "sourcePath": blob.source_path.as_ref().map(|p| p.display().to_string()),
            "bytes": blob.bytes.len(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("oxshelf=info".parse().expect("static directive")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { config, root, scope, traversal, search } => {
            let catalog = open_catalog(config, root);
            let query = build_query(scope, traversal, search);
            let records = match catalog.catalog.query(&query, &CancellationToken::new()).await {
                Ok(records) => records,
                Err(err) => {
                    eprintln!("Query failed: {err}");
                    std::process::exit(1);
                }
            };

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&records).expect("records serialize")
                );
            } else {
                for record in &records {
                    println!("{:<60} {}", record.uri.to_string(), record.derived_name);
                }
                eprintln!("\n{} record(s)", records.len());
            }
        }
        Commands::Watch { config, root } => {
            let catalog = open_catalog(config, root);
            // Prime provider stores so the stream reports deltas, not the
            // initial population.
            let _ = catalog.catalog.query(&AssetQuery::all(), &CancellationToken::new()).await;
            let mut changes = catalog.catalog.changes();
            eprintln!("Watching for changes (Ctrl-C to stop)...");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("Stopping.");
                        break;
                    }
                    message = changes.recv() => match message {
                        Some(ChangeMessage::Change(change)) => {
                            if cli.json {
                                println!(
                                    "{}",
                                    serde_json::to_string(&change).expect("change serializes")
                                );
                            } else {
                                match &change.previous_uri {
                                    Some(previous) => println!(
                                        "{:?} {} (was {})",
                                        change.kind, change.uri, previous
                                    ),
                                    None => println!("{:?} {}", change.kind, change.uri),
                                }
                            }
                        }
                        Some(ChangeMessage::Lagged(missed)) => {
                            eprintln!("(lagged, {missed} event(s) dropped; re-query advised)");
                        }
                        None => {
                            eprintln!("Change stream completed.");
                            break;
                        }
                    },
                }
            }
        }
        Commands::Resolve { uri, config, root } => {
            let parsed = match AssetUri::parse(&uri) {
                Ok(parsed) => parsed,
                Err(err) => {
                    eprintln!("Invalid URI '{uri}': {err}");
                    std::process::exit(1);
                }
            };
            let catalog = open_catalog(config, root);
            match catalog.resolvers.resolve(&parsed).await {
                Ok(Some(asset)) => {
                    let description = describe_asset(&asset);
                    if cli.json {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&description).expect("serializes")
                        );
                    } else {
                        println!("{description}");
                    }
                }
                Ok(None) => {
                    eprintln!("Not found: {parsed}");
                    std::process::exit(1);
                }
                Err(err) => {
                    eprintln!("Resolution failed: {err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Pack { source_root, out, mount } => {
            match pack_container(&source_root, &out, &mount) {
                Ok((count, index_path)) => {
                    eprintln!("Packed {count} asset(s) into {}", index_path.display());
                }
                Err(err) => {
                    eprintln!("Pack failed: {err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Inspect { index_path } => {
            let mut file = match std::fs::File::open(&index_path) {
                Ok(file) => file,
                Err(err) => {
                    eprintln!("Cannot open '{}': {err}", index_path.display());
                    std::process::exit(1);
                }
            };
            let entries = match read_index(&mut file) {
                Ok(entries) => entries,
                Err(err) => {
                    eprintln!("Cannot decode '{}': {err}", index_path.display());
                    std::process::exit(1);
                }
            };

            if cli.json {
                let items: Vec<serde_json::Value> = entries
                    .iter()
                    .map(|entry| {
                        serde_json::json!({
                            "virtualPath": entry.virtual_path,
                            "payloadOffset": entry.payload_offset,
                            "payloadSize": entry.payload_size,
                            "contentHash": hash_prefix(&entry.content_hash),
                            "lastWriteTimeMs": entry.last_write_time_ms,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items).expect("serializes"));
            } else {
                for entry in &entries {
                    println!(
                        "{:<50} {:>10} bytes @ {:<10} {}  mtime {}",
                        entry.virtual_path,
                        entry.payload_size,
                        entry.payload_offset,
                        hash_prefix(&entry.content_hash),
                        entry.last_write_time_ms,
                    );
                }
                eprintln!("\n{} entr(ies)", entries.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pack_then_inspect_round_trips() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(source.join("Meshes")).unwrap();
        std::fs::write(source.join("Meshes/cube.obj"), b"v 0 0 0\n").unwrap();
        std::fs::write(source.join("readme.txt"), b"hello").unwrap();

        let out = dir.path().join("cooked");
        let (count, index_path) = pack_container(&source, &out, "Engine").unwrap();
        assert_eq!(count, 2);

        let mut file = std::fs::File::open(&index_path).unwrap();
        let entries = read_index(&mut file).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].virtual_path, "/Engine/Meshes/cube.obj");
        assert_eq!(entries[1].virtual_path, "/Engine/readme.txt");
        assert_eq!(entries[1].payload_size, 5);

        // Payload blob length equals the sum of entry sizes.
        let payload = std::fs::read(out.join("container.payload.bin")).unwrap();
        let total: u64 = entries.iter().map(|e| e.payload_size).sum();
        assert_eq!(payload.len() as u64, total);
    }

    #[test]
    fn pack_skips_hidden_files() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(source.join(".git")).unwrap();
        std::fs::write(source.join(".git/config"), b"x").unwrap();
        std::fs::write(source.join("kept.txt"), b"x").unwrap();

        let out = dir.path().join("cooked");
        let (count, index_path) = pack_container(&source, &out, "Engine").unwrap();
        assert_eq!(count, 1);

        let mut file = std::fs::File::open(&index_path).unwrap();
        let entries = read_index(&mut file).unwrap();
        assert_eq!(entries[0].virtual_path, "/Engine/kept.txt");
    }
}
