//! Ordered `i32 -> i32` multimap with exact-pair deletion.
//!
//! Pairs are kept in a `BTreeSet`, so range scans come out ordered by key and
//! then by value. Point lookups go through an LRU cache whose capacity is set
//! in pages.

use crate::error::{IndexError, Result};
use crate::utils::ByteCursor;
use lru::LruCache;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;

const DEFAULT_CACHE_PAGES: usize = 256;

/// Multimap from fixed-length integer keys to duplicate integer values
pub struct OrderedMultimap {
    pairs: BTreeSet<(i32, i32)>,
    cache: LruCache<i32, Vec<i32>>,
}

impl Default for OrderedMultimap {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedMultimap {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_CACHE_PAGES)
    }

    pub fn with_cache_size(pages: usize) -> Self {
        Self {
            pairs: BTreeSet::new(),
            cache: LruCache::new(NonZeroUsize::new(pages).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Resize the point-lookup cache. Zero pages keeps a single slot.
    pub fn set_cache_size(&mut self, pages: usize) {
        self.cache
            .resize(NonZeroUsize::new(pages).unwrap_or(NonZeroUsize::MIN));
    }

    /// Insert a pair. Returns false when the exact pair is already present.
    pub fn insert_key(&mut self, key: i32, value: i32) -> bool {
        let inserted = self.pairs.insert((key, value));
        if inserted {
            self.cache.pop(&key);
        }
        inserted
    }

    /// Delete an exact pair. Returns false when it was not present.
    pub fn delete_key(&mut self, key: i32, value: i32) -> bool {
        let removed = self.pairs.remove(&(key, value));
        if removed {
            self.cache.pop(&key);
        }
        removed
    }

    /// All pairs with `low <= key <= high`, ordered by key then value
    pub fn search_for_range(&self, low: i32, high: i32) -> Vec<(i32, i32)> {
        if low > high {
            return Vec::new();
        }
        self.pairs
            .range((low, i32::MIN)..=(high, i32::MAX))
            .copied()
            .collect()
    }

    /// Values stored under `key`, in ascending order
    pub fn get(&mut self, key: i32) -> Vec<i32> {
        if let Some(values) = self.cache.get(&key) {
            return values.clone();
        }
        let values: Vec<i32> = self
            .search_for_range(key, key)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        self.cache.put(key, values.clone());
        values
    }

    pub fn count(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
        self.cache.clear();
    }

    /// Append `count:u32` followed by `(key:i32, value:i32)` pairs
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.reserve(4 + self.pairs.len() * 8);
        buf.extend_from_slice(&(self.pairs.len() as u32).to_le_bytes());
        for &(key, value) in &self.pairs {
            buf.extend_from_slice(&key.to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Read a section written by [`encode`](Self::encode)
    pub fn decode(cursor: &mut ByteCursor<'_>, cache_pages: usize) -> Result<Self> {
        let truncated = || IndexError::format("directory section is truncated");
        let count = cursor.read_u32().ok_or_else(truncated)? as usize;
        if count.saturating_mul(8) > cursor.remaining() {
            return Err(truncated());
        }

        let mut map = Self::with_cache_size(cache_pages);
        for _ in 0..count {
            let key = cursor.read_i32().ok_or_else(truncated)?;
            let value = cursor.read_i32().ok_or_else(truncated)?;
            if !map.pairs.insert((key, value)) {
                return Err(IndexError::format(format!(
                    "directory holds pair ({}, {}) twice",
                    key, value
                )));
            }
        }
        Ok(map)
    }
}
