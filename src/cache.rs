//! Recency-ordered memory cache of decoded images.
//!
//! - Keyed by resource identity
//! - Byte-size accounting against a capacity fixed at construction
//! - Strict least-recently-used eviction; reads count as use
//! - Inserts are idempotent: the first image stored under a key wins

use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::decode::DecodedImage;

struct CacheState {
    entries: LruCache<String, DecodedImage>,
    current_bytes: usize,
}

/// Bounded key to image store shared between workers and callers.
#[derive(Clone)]
pub struct ImageCache {
    /// Maximum total size in bytes.
    capacity_bytes: usize,
    state: Arc<Mutex<CacheState>>,
}

impl ImageCache {
    pub fn new(capacity_bytes: usize) -> Self {
        debug!(capacity_bytes, "Initialized image cache");
        Self {
            capacity_bytes,
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                current_bytes: 0,
            })),
        }
    }

    /// Look up an image, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<DecodedImage> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Check for a key without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Insert an image unless the key is already present.
    ///
    /// Returns true if the image was stored. Images larger than the whole capacity are
    /// never stored.
    pub fn put(&self, key: &str, image: DecodedImage) -> bool {
        let size = image.byte_size();
        let mut state = self.state.lock();

        if state.entries.contains(key) {
            trace!(key, "Cache entry already present, keeping first write");
            return false;
        }

        if size > self.capacity_bytes {
            debug!(
                key,
                size,
                capacity = self.capacity_bytes,
                "Image larger than cache capacity, not caching"
            );
            return false;
        }

        while state.current_bytes + size > self.capacity_bytes {
            match state.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    state.current_bytes = state.current_bytes.saturating_sub(evicted.byte_size());
                    trace!(
                        key = %evicted_key,
                        evicted_bytes = evicted.byte_size(),
                        current_bytes = state.current_bytes,
                        "Evicted image from cache"
                    );
                }
                None => break,
            }
        }

        state.entries.put(key.to_string(), image);
        state.current_bytes += size;
        true
    }

    /// Total bytes of all live entries.
    pub fn size_bytes(&self) -> usize {
        self.state.lock().current_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    /// An image occupying `rows * 40` bytes (10 px wide).
    fn image(rows: u32) -> DecodedImage {
        DecodedImage::new(RgbaImage::new(10, rows))
    }

    /// Keys from most to least recently used.
    fn keys_by_recency(cache: &ImageCache) -> Vec<String> {
        cache
            .state
            .lock()
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    #[test]
    fn test_get_missing() {
        let cache = ImageCache::new(1000);
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_is_idempotent() {
        let cache = ImageCache::new(1000);
        let first = image(2);
        let second = image(3);

        assert!(cache.put("k", first.clone()));
        assert!(!cache.put("k", second));

        let cached = cache.get("k").unwrap();
        assert!(cached.same_buffer(&first));
        assert_eq!(cache.size_bytes(), 80);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        // Room for three 40-byte rows.
        let cache = ImageCache::new(120);
        cache.put("a", image(1));
        cache.put("b", image(1));
        cache.put("c", image(1));

        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get("a").is_some());
        cache.put("d", image(1));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.size_bytes(), 120);
    }

    #[test]
    fn test_evicts_only_what_is_needed() {
        let cache = ImageCache::new(200);
        cache.put("a", image(1));
        cache.put("b", image(1));
        cache.put("c", image(1));
        cache.put("d", image(1));
        cache.put("e", image(1));

        // 80 bytes need two 40-byte evictions.
        cache.put("big", image(2));
        assert_eq!(keys_by_recency(&cache), vec!["big", "e", "d", "c"]);
        assert_eq!(cache.size_bytes(), 200);
    }

    #[test]
    fn test_capacity_invariant_holds() {
        let cache = ImageCache::new(500);
        for i in 0..50u32 {
            cache.put(&format!("img-{i}"), image(1 + i % 4));
            assert!(cache.size_bytes() <= cache.capacity_bytes());
        }
    }

    #[test]
    fn test_oversized_image_not_cached() {
        let cache = ImageCache::new(100);
        cache.put("small", image(1));
        assert!(!cache.put("huge", image(10)));
        assert!(cache.contains("small"));
        assert!(!cache.contains("huge"));
    }
}
