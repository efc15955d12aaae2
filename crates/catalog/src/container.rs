//! Binary container index codec.
//!
//! A `.cooked` container ships with an index file enumerating its payloads.
//! Layout (little-endian):
//!
//! ```text
//! Header  : u32 magic ("OXSH") | u32 version | u64 count
//! Entry[] : string virtual_path        (u32 length, UTF-8 bytes)
//!           u64    payload_offset
//!           u64    payload_size
//!           u8[32] content_hash        (SHA-256)
//!           i64    last_write_time_ms  (unix epoch, UTC)
//! ```
//!
//! The reader rejects mismatched magic/version and truncated streams with
//! [`CatalogError::InvalidFormat`]; the writer emits entries in the order
//! presented and is the exact inverse of the reader.

use crate::error::CatalogError;
use crate::uri::AssetUri;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const CONTAINER_MAGIC: u32 = u32::from_le_bytes(*b"OXSH");
pub const CONTAINER_VERSION: u32 = 1;

/// Default file name of the index inside a cooked root.
pub const DEFAULT_INDEX_FILE_NAME: &str = "container.index.bin";

/// Longest accepted virtual path, in bytes. A length prefix above this is
/// treated as corruption rather than attempted as an allocation.
const MAX_VIRTUAL_PATH_BYTES: u32 = 64 * 1024;

/// One payload locator in a container index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    /// Canonical `/<Mount>/<Relative>` path.
    pub virtual_path: String,
    pub payload_offset: u64,
    pub payload_size: u64,
    pub content_hash: [u8; 32],
    pub last_write_time_ms: i64,
}

impl ContainerEntry {
    /// URI form of this entry's virtual path.
    pub fn uri(&self) -> Result<AssetUri, CatalogError> {
        virtual_path_to_uri(&self.virtual_path)
    }
}

/// Map `/M/P` to `asset:///M/P`.
///
/// Rejects paths that do not start with `/` or lack an inner `/` separating
/// mount from relative path. Commutes with direct URI construction:
/// `virtual_path_to_uri("/M/P") == AssetUri::new("M", "P")`.
pub fn virtual_path_to_uri(virtual_path: &str) -> Result<AssetUri, CatalogError> {
    let rest = virtual_path.strip_prefix('/').ok_or_else(|| {
        CatalogError::invalid_path(format!("virtual path must start with '/': '{virtual_path}'"))
    })?;
    let (mount, relative) = rest.split_once('/').ok_or_else(|| {
        CatalogError::invalid_path(format!("virtual path has no mount separator: '{virtual_path}'"))
    })?;
    AssetUri::new(mount, relative)
}

/// Decode a full index from `reader`.
pub fn read_index(reader: &mut impl Read) -> Result<Vec<ContainerEntry>, CatalogError> {
    let magic = reader.read_u32::<LittleEndian>().map_err(map_read_err)?;
    if magic != CONTAINER_MAGIC {
        return Err(CatalogError::invalid_format(format!(
            "bad magic {magic:#010x}, expected {CONTAINER_MAGIC:#010x}"
        )));
    }
    let version = reader.read_u32::<LittleEndian>().map_err(map_read_err)?;
    if version != CONTAINER_VERSION {
        return Err(CatalogError::invalid_format(format!(
            "unsupported index version {version}, expected {CONTAINER_VERSION}"
        )));
    }
    let count = reader.read_u64::<LittleEndian>().map_err(map_read_err)?;

    let mut entries = Vec::with_capacity(count.min(u16::MAX as u64) as usize);
    for _ in 0..count {
        entries.push(read_entry(reader)?);
    }
    Ok(entries)
}

fn read_entry(reader: &mut impl Read) -> Result<ContainerEntry, CatalogError> {
    let path_len = reader.read_u32::<LittleEndian>().map_err(map_read_err)?;
    if path_len > MAX_VIRTUAL_PATH_BYTES {
        return Err(CatalogError::invalid_format(format!(
            "virtual path length {path_len} exceeds limit {MAX_VIRTUAL_PATH_BYTES}"
        )));
    }
    let mut path_bytes = vec![0u8; path_len as usize];
    reader.read_exact(&mut path_bytes).map_err(map_read_err)?;
    let virtual_path = String::from_utf8(path_bytes)
        .map_err(|_| CatalogError::invalid_format("virtual path is not valid UTF-8"))?;

    let payload_offset = reader.read_u64::<LittleEndian>().map_err(map_read_err)?;
    let payload_size = reader.read_u64::<LittleEndian>().map_err(map_read_err)?;
    let mut content_hash = [0u8; 32];
    reader.read_exact(&mut content_hash).map_err(map_read_err)?;
    let last_write_time_ms = reader.read_i64::<LittleEndian>().map_err(map_read_err)?;

    Ok(ContainerEntry {
        virtual_path,
        payload_offset,
        payload_size,
        content_hash,
        last_write_time_ms,
    })
}

/// Encode `entries` to `writer` in the order given.
pub fn write_index(
    writer: &mut impl Write,
    entries: &[ContainerEntry],
) -> Result<(), CatalogError> {
    writer.write_u32::<LittleEndian>(CONTAINER_MAGIC)?;
    writer.write_u32::<LittleEndian>(CONTAINER_VERSION)?;
    writer.write_u64::<LittleEndian>(entries.len() as u64)?;
    for entry in entries {
        writer.write_u32::<LittleEndian>(entry.virtual_path.len() as u32)?;
        writer.write_all(entry.virtual_path.as_bytes())?;
        writer.write_u64::<LittleEndian>(entry.payload_offset)?;
        writer.write_u64::<LittleEndian>(entry.payload_size)?;
        writer.write_all(&entry.content_hash)?;
        writer.write_i64::<LittleEndian>(entry.last_write_time_ms)?;
    }
    Ok(())
}

/// A short read anywhere in the index is a format defect of the stream, not
/// an environment failure.
fn map_read_err(err: io::Error) -> CatalogError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        CatalogError::invalid_format("truncated container index")
    } else {
        CatalogError::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(virtual_path: &str, seed: u8) -> ContainerEntry {
        ContainerEntry {
            virtual_path: virtual_path.to_string(),
            payload_offset: seed as u64 * 4096,
            payload_size: 1000 + seed as u64,
            content_hash: [seed; 32],
            last_write_time_ms: 1_700_000_000_000 + seed as i64,
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let entries = vec![
            entry("/Engine/Meshes/Cube", 1),
            entry("/Engine/Meshes/Sphere", 2),
            entry("/Content/Materials/Wood.omat", 3),
        ];
        let mut buf = Vec::new();
        write_index(&mut buf, &entries).unwrap();
        let decoded = read_index(&mut buf.as_slice()).unwrap();
        assert_eq!(entries, decoded);
    }

    #[test]
    fn empty_index_round_trips() {
        let mut buf = Vec::new();
        write_index(&mut buf, &[]).unwrap();
        assert_eq!(read_index(&mut buf.as_slice()).unwrap(), Vec::new());
    }

    #[test]
    fn bad_magic_is_invalid_format() {
        let mut buf = Vec::new();
        write_index(&mut buf, &[entry("/E/x", 1)]).unwrap();
        buf[0] ^= 0xFF;
        assert!(matches!(
            read_index(&mut buf.as_slice()),
            Err(CatalogError::InvalidFormat(_))
        ));
    }

    #[test]
    fn bad_version_is_invalid_format() {
        let mut buf = Vec::new();
        write_index(&mut buf, &[]).unwrap();
        buf[4] = 0xEE;
        assert!(matches!(
            read_index(&mut buf.as_slice()),
            Err(CatalogError::InvalidFormat(_))
        ));
    }

    #[test]
    fn truncation_is_invalid_format() {
        let mut buf = Vec::new();
        write_index(&mut buf, &[entry("/Engine/Meshes/Cube", 1)]).unwrap();
        for cut in [3, 15, 20, buf.len() - 1] {
            assert!(
                matches!(read_index(&mut &buf[..cut]), Err(CatalogError::InvalidFormat(_))),
                "cut at {cut} should be InvalidFormat"
            );
        }
    }

    #[test]
    fn oversized_length_prefix_is_invalid_format() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&CONTAINER_MAGIC.to_le_bytes());
        buf.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            read_index(&mut buf.as_slice()),
            Err(CatalogError::InvalidFormat(_))
        ));
    }

    #[test]
    fn non_utf8_path_is_invalid_format() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&CONTAINER_MAGIC.to_le_bytes());
        buf.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&[0xFF, 0xFE]);
        buf.extend_from_slice(&[0u8; 8 + 8 + 32 + 8]);
        assert!(matches!(
            read_index(&mut buf.as_slice()),
            Err(CatalogError::InvalidFormat(_))
        ));
    }

    #[test]
    fn virtual_path_maps_to_constructed_uri() {
        let mapped = virtual_path_to_uri("/Engine/Meshes/Cube").unwrap();
        let direct = AssetUri::new("Engine", "Meshes/Cube").unwrap();
        assert_eq!(mapped, direct);
        assert_eq!(mapped.fingerprint(), direct.fingerprint());
    }

    #[test]
    fn malformed_virtual_paths_are_rejected() {
        assert!(virtual_path_to_uri("Engine/Meshes/Cube").is_err());
        assert!(virtual_path_to_uri("/EngineOnly").is_err());
    }
}
