use dashmap::{DashMap, mapref::entry::Entry};

use crate::{bitmap::CachedImage, resource::ResourceId};

/// In-process tier of decoded images.
///
/// Best-effort: nothing here promises an entry survives. Hosts reclaim memory
/// by calling [`MemoryCache::clear`], and every `get` miss is a normal outcome.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<ResourceId, CachedImage>,
}

impl MemoryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the cached handle; pixels are shared.
    pub fn get(&self, id: &ResourceId) -> Option<CachedImage> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Store `image`, replacing any previous entry.
    pub fn put(&self, image: CachedImage, id: ResourceId) {
        self.entries.insert(id, image);
    }

    /// Insert unless an entry already exists. Returns `true` when this call
    /// stored the image.
    pub fn insert_if_absent(&self, image: CachedImage, id: ResourceId) -> bool {
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(image);
                true
            }
        }
    }

    /// Evict one entry.
    pub fn remove(&self, id: &ResourceId) -> Option<CachedImage> {
        self.entries.remove(id).map(|(_, image)| image)
    }

    /// Whether `id` is resident.
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Sum of decoded pixel bytes currently held.
    pub fn resident_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.value().estimated_bytes())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::test_support::gradient;

    fn id(raw: &str) -> ResourceId {
        ResourceId::parse(raw).unwrap()
    }

    #[test]
    fn put_get_clear() {
        let cache = MemoryCache::new();
        let a = id("https://example.com/a.png");
        assert!(cache.get(&a).is_none());

        let img = gradient(3, 2);
        cache.put(img.clone(), a.clone());
        assert!(cache.get(&a).unwrap().ptr_eq(&img));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.resident_bytes(), 3 * 2 * 4);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&a).is_none());
    }

    #[test]
    fn insert_if_absent_keeps_first() {
        let cache = MemoryCache::new();
        let a = id("https://example.com/a.png");
        let first = gradient(1, 1);
        let second = gradient(2, 2);

        assert!(cache.insert_if_absent(first.clone(), a.clone()));
        assert!(!cache.insert_if_absent(second, a.clone()));
        assert!(cache.get(&a).unwrap().ptr_eq(&first));
        assert!(cache.remove(&a).is_some());
        assert!(!cache.contains(&a));
    }
}
