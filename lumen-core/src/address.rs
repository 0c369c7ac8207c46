use std::fmt;

use sha2::{Digest, Sha256};

use crate::resource::ResourceId;

/// File extension used for every persisted entry.
pub const ENTRY_EXTENSION: &str = "png";

/// Stable, digest-derived storage key for a [`ResourceId`].
///
/// Lowercase hex of the SHA-256 of the serialized URL. No salt, so the same
/// id maps to the same address across process restarts.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentAddress(String);

impl ContentAddress {
    /// Hex digits in a SHA-256 digest.
    pub const LEN: usize = 64;

    /// The lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<hex>.png`, the on-disk file name for this address.
    pub fn file_name(&self) -> String {
        let mut name = String::with_capacity(Self::LEN + 1 + ENTRY_EXTENSION.len());
        name.push_str(&self.0);
        name.push('.');
        name.push_str(ENTRY_EXTENSION);
        name
    }

    /// Whether `raw` looks like an address (64 lowercase hex digits).
    pub fn is_valid(raw: &str) -> bool {
        raw.len() == Self::LEN
            && raw
                .as_bytes()
                .iter()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentAddress").field(&self.0).finish()
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of the id's normalized URL string.
pub fn address(id: &ResourceId) -> ContentAddress {
    let digest = Sha256::digest(id.as_str().as_bytes());
    ContentAddress(hex::encode(digest))
}
