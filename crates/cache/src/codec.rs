//! Mapping from resource keys to filesystem-safe file names
//!
//! The disk cache never stores keys; a file's name is derived from its key
//! on every lookup, so the mapping must be deterministic across process
//! restarts.

use crate::ResourceKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Deterministic key to file name mapping used by disk caches.
pub trait FileKeyCodec: Send + Sync {
    /// Derive the file name for `key`. Must contain no path separators.
    fn file_name(&self, key: &ResourceKey) -> String;
}

/// Lowercase hex SHA-256 of the key. Collision resistant; the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyCodec;

impl FileKeyCodec for Sha256KeyCodec {
    fn file_name(&self, key: &ResourceKey) -> String {
        let digest = Sha256::digest(key.as_str().as_bytes());
        let mut name = String::with_capacity(digest.len() * 2);
        for byte in digest.iter() {
            let _ = write!(name, "{:02x}", byte);
        }
        name
    }
}

/// Classic 31-multiplier string hash over UTF-16 units, rendered as a
/// signed 32-bit decimal. Negative hashes keep their leading `-`.
///
/// Short and stable, but two keys can collide; prefer [`Sha256KeyCodec`]
/// unless file names must stay compatible with an existing cache directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashCodeKeyCodec;

impl HashCodeKeyCodec {
    fn hash(key: &str) -> i32 {
        key.encode_utf16()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
    }
}

impl FileKeyCodec for HashCodeKeyCodec {
    fn file_name(&self, key: &ResourceKey) -> String {
        Self::hash(key.as_str()).to_string()
    }
}

/// Codec selection as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyCodecKind {
    #[default]
    Sha256,
    HashCode,
}

impl KeyCodecKind {
    pub fn build(self) -> Box<dyn FileKeyCodec> {
        match self {
            KeyCodecKind::Sha256 => Box::new(Sha256KeyCodec),
            KeyCodecKind::HashCode => Box::new(HashCodeKeyCodec),
        }
    }
}
