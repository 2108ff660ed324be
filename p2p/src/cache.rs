//! Time-windowed dedup / confirm cache.
//!
//! The confirm cache remembers when a key was last stored and answers "was
//! this seen within the last `window`?".  It guards three things: resending a
//! message the send loop already delivered, forwarding a relay message twice
//! through the same hop, and resending a finalization a peer has confirmed.
//!
//! The cache is advisory.  Entries can be evicted early by the backing store,
//! so every handler above this layer must tolerate duplicate delivery.

use {
    lru::LruCache,
    parking_lot::Mutex,
    std::{
        sync::Arc,
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
};

/// Suppression window for outbound messages already sent successfully.
pub const RESEND_WINDOW: Duration = Duration::from_secs(60);

/// Suppression window for finalizations a peer has confirmed.
pub const FINALIZATION_WINDOW: Duration = Duration::from_secs(60 * 60);

/// How long a relayer's advertisement of a consumer stays usable.
pub const REMOTE_RELAYER_WINDOW: Duration = Duration::from_secs(60);

/// Default number of entries held by [`LruCacheStore`].
pub const DEFAULT_CACHE_CAPACITY: usize = 64 * 1024;

/// Key-value store backing the confirm cache, supplied by the handle.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn set(&self, key: &[u8], value: Vec<u8>);
}

/// Bounded in-memory [`CacheStore`] that evicts the least recently used key.
pub struct LruCacheStore {
    cache: Mutex<LruCache<Vec<u8>, Vec<u8>>>,
}

impl LruCacheStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity.max(1))),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl Default for LruCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl CacheStore for LruCacheStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.lock().get(&key.to_vec()).cloned()
    }

    fn set(&self, key: &[u8], value: Vec<u8>) {
        self.cache.lock().put(key.to_vec(), value);
    }
}

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Timestamped view over a [`CacheStore`].
#[derive(Clone)]
pub struct ConfirmCache {
    store: Arc<dyn CacheStore>,
}

impl ConfirmCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// True when `key` was stored less than `window` ago.
    pub fn contains(&self, key: &[u8], window: Duration) -> bool {
        self.contains_at(key, window, now_millis())
    }

    /// [`Self::contains`] evaluated at `now` (ms since the epoch).
    pub fn contains_at(&self, key: &[u8], window: Duration, now: u64) -> bool {
        if key.is_empty() {
            return false;
        }
        let Some(value) = self.store.get(key) else {
            return false;
        };
        let Ok(bytes) = <[u8; 8]>::try_from(value.as_slice()) else {
            return false;
        };
        let stored = u64::from_be_bytes(bytes);
        now < stored.saturating_add(window.as_millis() as u64)
    }

    /// Record `key` as seen at `timestamp` (ms since the epoch), replacing any
    /// earlier record.
    ///
    /// # Panics
    ///
    /// Panics if `key` is empty.
    pub fn store(&self, key: &[u8], timestamp: u64) {
        assert!(!key.is_empty(), "confirm cache key must not be empty");
        self.store.set(key, timestamp.to_be_bytes().to_vec());
    }

    /// Record `key` as seen now.
    pub fn store_now(&self, key: &[u8]) {
        self.store(key, now_millis());
    }
}
