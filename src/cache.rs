//! This module contains the process-wide layout cache.
//!
//! Layout indexes are immutable once built, so the cache is a simple
//! bounded LRU with once-only publication: the first publisher of a key
//! wins, and every later publisher receives the already-published entry.
//! Keying includes the code hash so that an account whose code changes
//! never serves a stale layout.
//!
//! For deterministic testing the cache can be constructed disabled, in
//! which case it stores nothing and every lookup misses.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use lru::LruCache;

use crate::{
    constant::DEFAULT_LAYOUT_CACHE_CAPACITY,
    layout::LayoutIndex,
    value::{Address, Word},
};

/// The cache key: an account, on a chain, at a specific code version.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CacheKey {
    /// The chain the account lives on.
    pub chain_id: u64,

    /// The account address.
    pub address: Address,

    /// The hash of the account's code when the layout was obtained.
    pub code_hash: Word,
}

/// A bounded, shareable cache of layout indexes.
#[derive(Debug)]
pub struct LayoutCache {
    entries: Option<Mutex<LruCache<CacheKey, Arc<LayoutIndex>>>>,
}

impl LayoutCache {
    /// Creates a cache bounded to `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Some(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Creates a cache that stores nothing, for deterministic testing.
    #[must_use]
    pub fn disabled() -> Self {
        Self { entries: None }
    }

    /// Looks up the layout for `key`, marking it most recently used.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<LayoutIndex>> {
        let entries = self.entries.as_ref()?;
        let mut entries = entries.lock().ok()?;
        entries.get(key).cloned()
    }

    /// Publishes a layout under `key`, returning the entry that ends up
    /// cached.
    ///
    /// Publication is once-only: if another analysis published the key
    /// first, that earlier entry is returned and `layout` is discarded, so
    /// concurrent analyses always converge on one instance.
    pub fn publish(&self, key: CacheKey, layout: Arc<LayoutIndex>) -> Arc<LayoutIndex> {
        let Some(entries) = self.entries.as_ref() else {
            return layout;
        };
        let Ok(mut entries) = entries.lock() else {
            return layout;
        };

        if let Some(existing) = entries.get(&key) {
            return existing.clone();
        }
        entries.put(key, layout.clone());
        layout
    }

    /// Gets the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|entries| entries.lock().ok())
            .map_or(0, |entries| entries.len())
    }

    /// Checks whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LayoutCache {
    fn default() -> Self {
        Self::new(DEFAULT_LAYOUT_CACHE_CAPACITY)
    }
}
