//! Shared types for quarry
//!
//! This crate provides common types used across the quarry ecosystem,
//! including content digests, product type identities, and filesystem
//! change events.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// A 32-byte blake3 content fingerprint.
///
/// Digest equality is the engine's notion of content equality: two inputs
/// with the same digest are treated as identical for caching, identity,
/// and change detection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Digest a byte slice.
    pub fn of_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Digest(*blake3::hash(bytes.as_ref()).as_bytes())
    }

    /// Digest the contents of a file.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        let mut file = std::fs::File::open(path)?;
        io::copy(&mut file, &mut hasher)?;
        Ok(Digest(*hasher.finalize().as_bytes()))
    }

    /// Render as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(s, 16).ok()?;
        }
        Some(Digest(bytes))
    }

    /// Raw bytes of the digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Digest::from_hex(&hex).ok_or_else(|| D::Error::custom("invalid digest hex"))
    }
}

/// Incremental builder for digesting composite keys.
#[derive(Debug)]
pub struct DigestBuilder(blake3::Hasher);

impl DigestBuilder {
    pub fn new() -> Self {
        DigestBuilder(blake3::Hasher::new())
    }

    /// Feed bytes into the digest, length-prefixed so that component
    /// boundaries are unambiguous.
    pub fn update(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    pub fn finish(self) -> Digest {
        Digest(*self.0.finalize().as_bytes())
    }
}

impl Default for DigestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a product type.
///
/// Product types name the outputs rules can produce and the parameters
/// requests supply. Identity is the Rust `TypeId`; the type name is kept
/// for display and stable ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProductType {
    id: TypeId,
    name: &'static str,
}

impl ProductType {
    /// The product type for a Rust type.
    pub fn of<T: Any>() -> Self {
        ProductType {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Short name without the module path.
    pub fn name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }

    /// Fully-qualified type name, stable across runs for the same source.
    pub fn full_name(&self) -> &'static str {
        self.name
    }
}

impl PartialOrd for ProductType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProductType {
    fn cmp(&self, other: &Self) -> Ordering {
        // Name first so digests built over ordered sets are stable across
        // processes; TypeId only breaks exact-name ties.
        self.name.cmp(other.name).then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Kind of filesystem change observed by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Renamed,
    Other,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "create"),
            ChangeKind::Modified => write!(f, "modify"),
            ChangeKind::Removed => write!(f, "remove"),
            ChangeKind::Renamed => write!(f, "rename"),
            ChangeKind::Other => write!(f, "unknown"),
        }
    }
}

/// A single filesystem change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl PathEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        PathEvent {
            path: path.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_determinism() {
        let d1 = Digest::of_bytes(b"hello");
        let d2 = Digest::of_bytes(b"hello");
        let d3 = Digest::of_bytes(b"world");

        assert_eq!(d1, d2);
        assert_ne!(d1, d3);
    }

    #[test]
    fn test_digest_hex_roundtrip() {
        let d = Digest::of_bytes(b"content");
        let hex = d.to_hex();

        assert_eq!(hex.len(), 64);
        assert_eq!(Digest::from_hex(&hex), Some(d));
        assert_eq!(Digest::from_hex("not hex"), None);
    }

    #[test]
    fn test_builder_boundaries() {
        // Length prefixing means ("ab", "c") and ("a", "bc") must differ.
        let d1 = DigestBuilder::new().update("ab").update("c").finish();
        let d2 = DigestBuilder::new().update("a").update("bc").finish();

        assert_ne!(d1, d2);
    }

    #[test]
    fn test_product_type_identity() {
        struct Alpha;
        struct Beta;

        assert_eq!(ProductType::of::<Alpha>(), ProductType::of::<Alpha>());
        assert_ne!(ProductType::of::<Alpha>(), ProductType::of::<Beta>());
        assert_eq!(ProductType::of::<Alpha>().name(), "Alpha");
    }
}
