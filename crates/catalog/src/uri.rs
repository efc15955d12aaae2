//! The `asset://` identifier scheme.
//!
//! Canonical form: `asset:///<Mount>/<RelativePath>`. The leading triple
//! slash denotes an empty URI authority; the mount token lives in the path
//! component so that authority normalization cannot lowercase it. The
//! alternate `asset://<Mount>/<RelativePath>` form (mount in the authority)
//! is accepted on parse and treated as equal once mount and relative path
//! are extracted.
//!
//! Equality: scheme and mount are case-insensitive, the relative path is
//! byte-exact. [`UriFingerprint`] captures that normalization and is the
//! key used for store lookups and cross-provider deduplication.

use crate::error::CatalogError;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// URI scheme literal.
pub const ASSET_SCHEME: &str = "asset";

/// Characters escaped when formatting mount and path segments. `/` stays
/// literal; spaces and other authority-invalid characters are allowed in the
/// mount token and round-trip through percent escapes.
const SEGMENT_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'%');

/// A parsed asset identifier: mount token plus `/`-separated relative path.
#[derive(Debug, Clone)]
pub struct AssetUri {
    mount: String,
    relative: String,
}

impl AssetUri {
    /// Build a URI from a mount token and a relative path.
    ///
    /// The relative path is normalized: backslashes become `/`, and leading
    /// and trailing slashes are trimmed. Fails with
    /// [`CatalogError::InvalidPath`] if the mount is empty.
    pub fn new(mount: impl Into<String>, relative: impl AsRef<str>) -> Result<Self, CatalogError> {
        let mount = mount.into();
        if mount.is_empty() {
            return Err(CatalogError::invalid_path("mount point must not be empty"));
        }
        Ok(Self {
            mount,
            relative: normalize_relative(relative.as_ref()),
        })
    }

    /// Parse either URI form (`asset:///M/P` or `asset://M/P`).
    pub fn parse(input: &str) -> Result<Self, CatalogError> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| CatalogError::invalid_path(format!("not a URI: '{input}'")))?;
        if !scheme.eq_ignore_ascii_case(ASSET_SCHEME) {
            return Err(CatalogError::invalid_path(format!(
                "unsupported scheme '{scheme}' in '{input}'"
            )));
        }

        // `asset:///M/P` leaves "/M/P", `asset://M/P` leaves "M/P"; either
        // way the first segment after an optional slash is the mount.
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        let (mount_raw, relative_raw) = match rest.split_once('/') {
            Some((m, r)) => (m, r),
            None => (rest, ""),
        };

        let mount = unescape(mount_raw)?;
        let relative = unescape(relative_raw)?;
        Self::new(mount, relative)
    }

    /// The mount token, exactly as constructed (case preserved).
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// The relative path below the mount, `/`-separated, case preserved.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// `/<Mount>/<Relative>`, the form container indexes store.
    pub fn virtual_path(&self) -> String {
        format!("/{}/{}", self.mount, self.relative)
    }

    /// The normalized identity triple used for equality, hashing, and
    /// cross-provider deduplication.
    pub fn fingerprint(&self) -> UriFingerprint {
        UriFingerprint {
            mount: self.mount.to_ascii_lowercase(),
            relative: self.relative.clone(),
        }
    }

    /// Final path segment (the file name), or the mount for a mount root.
    pub fn name(&self) -> &str {
        match self.relative.rsplit('/').next() {
            Some("") | None => &self.mount,
            Some(last) => last,
        }
    }

    /// File name without its final extension.
    pub fn derived_name(&self) -> String {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => name.to_string(),
        }
    }
}

impl fmt::Display for AssetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ASSET_SCHEME}:///{}/",
            utf8_percent_encode(&self.mount, SEGMENT_ESCAPES)
        )?;
        let mut first = true;
        for segment in self.relative.split('/') {
            if segment.is_empty() {
                continue;
            }
            if !first {
                f.write_str("/")?;
            }
            first = false;
            write!(f, "{}", utf8_percent_encode(segment, SEGMENT_ESCAPES))?;
        }
        Ok(())
    }
}

impl PartialEq for AssetUri {
    fn eq(&self, other: &Self) -> bool {
        self.mount.eq_ignore_ascii_case(&other.mount) && self.relative == other.relative
    }
}

impl Eq for AssetUri {}

impl Hash for AssetUri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.mount.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0);
        self.relative.hash(state);
    }
}

impl Serialize for AssetUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AssetUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Normalized `(mount_ci, relative_bytes)` identity. Two URIs with equal
/// fingerprints name the same logical asset regardless of which provider or
/// URI form produced them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UriFingerprint {
    mount: String,
    relative: String,
}

impl UriFingerprint {
    /// Lowercased mount token.
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Relative path, byte-exact.
    pub fn relative(&self) -> &str {
        &self.relative
    }
}

fn normalize_relative(relative: &str) -> String {
    relative
        .replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn unescape(raw: &str) -> Result<String, CatalogError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|_| CatalogError::invalid_path(format!("invalid percent escape in '{raw}'")))
}
