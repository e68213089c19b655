use super::{AnchorGenerator, AnchorSet};
use crate::common::*;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// The number of image sizes an [AnchorCache] holds by default.
pub const DEFAULT_ANCHOR_CACHE_CAPACITY: usize = 16;

/// Memoizes anchor sets by input image size.
///
/// Anchors are a pure function of the image size, so a cached set is
/// interchangeable with a freshly generated one. The cache holds at most
/// `capacity` sizes and evicts the least recently used one to make room.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct AnchorCache {
    generator: AnchorGenerator,
    capacity: usize,
    #[derivative(Debug = "ignore")]
    clock: AtomicU64,
    #[derivative(Debug = "ignore")]
    cache: DashMap<HW<usize>, CacheEntry>,
}

struct CacheEntry {
    anchors: Arc<AnchorSet>,
    last_used: AtomicU64,
}

impl AnchorCache {
    pub fn new(generator: AnchorGenerator) -> Self {
        Self::with_capacity(generator, NonZeroUsize::new(DEFAULT_ANCHOR_CACHE_CAPACITY).unwrap())
    }

    pub fn with_capacity(generator: AnchorGenerator, capacity: NonZeroUsize) -> Self {
        Self {
            generator,
            capacity: capacity.get(),
            clock: AtomicU64::new(0),
            cache: DashMap::new(),
        }
    }

    pub fn generator(&self) -> &AnchorGenerator {
        &self.generator
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the anchors for an image size, generating them on first use.
    pub fn get(&self, image_size: &HW<usize>) -> Result<Arc<AnchorSet>> {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.cache.get(image_size) {
            entry.last_used.store(stamp, Ordering::Relaxed);
            return Ok(entry.anchors.clone());
        }

        let anchors = Arc::new(self.generator.generate_for_image(image_size)?);
        debug!(
            "generated {} anchors for image size {:?}",
            anchors.len(),
            image_size.hw()
        );

        self.evict(self.capacity - 1);
        let anchors = self
            .cache
            .entry(*image_size)
            .or_insert_with(|| CacheEntry {
                anchors,
                last_used: AtomicU64::new(stamp),
            })
            .anchors
            .clone();
        Ok(anchors)
    }

    /// Drop least recently used entries until at most `max_len` remain.
    fn evict(&self, max_len: usize) {
        while self.cache.len() > max_len {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|entry| entry.last_used.load(Ordering::Relaxed))
                .map(|entry| *entry.key());

            match oldest {
                Some(key) => {
                    self.cache.remove(&key);
                    debug!("evicted anchors for image size {:?}", key.hw());
                }
                None => break,
            }
        }
    }

    pub fn contains(&self, image_size: &HW<usize>) -> bool {
        self.cache.contains_key(image_size)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}
