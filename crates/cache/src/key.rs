//! Resource keys and object sizing
//!
//! A [`ResourceKey`] identifies one cacheable unit of work, typically a URI
//! plus a suffix describing how the resource was processed. Keys are
//! immutable and cheap to clone so they can be shared between the caches,
//! the lock table and in-flight tasks.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque, immutable identifier of a requested resource.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Create a key from any string-like value.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Build the key for a resource processed to a target size.
    ///
    /// The same URI requested at two different sizes yields two keys, so
    /// both decoded variants can live in the memory cache side by side.
    ///
    /// ```
    /// use resload_cache::ResourceKey;
    ///
    /// let key = ResourceKey::for_target("https://example.com/a.png", 128, 96);
    /// assert_eq!(key.as_str(), "https://example.com/a.png_128x96");
    /// ```
    pub fn for_target(uri: &str, width: u32, height: u32) -> Self {
        Self::new(format!("{}_{}x{}", uri, width, height))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({:?})", &*self.0)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Size in bytes a decoded object occupies in the memory cache budget.
pub trait ByteSize {
    fn byte_size(&self) -> usize;
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Box<[u8]> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for String {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_equality_and_clone() {
        let a = ResourceKey::from("uri://one");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "uri://one");
        assert_ne!(a, ResourceKey::from("uri://two"));
    }

    #[test]
    fn test_for_target_suffix() {
        let small = ResourceKey::for_target("uri://img", 64, 64);
        let large = ResourceKey::for_target("uri://img", 512, 512);
        assert_eq!(small.as_str(), "uri://img_64x64");
        assert_ne!(small, large);
    }

    #[test]
    fn test_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(ResourceKey::from("k"), 1);
        assert_eq!(map.get("k"), Some(&1));
    }

    #[test]
    fn test_byte_size_impls() {
        assert_eq!(vec![0u8; 10].byte_size(), 10);
        assert_eq!(String::from("abc").byte_size(), 3);
        assert_eq!(vec![1u8; 4].into_boxed_slice().byte_size(), 4);
    }
}
