//! Thread-Safe Storage Engine with Expiry Support
//!
//! The single piece of state shared by every connection. It maps keys to
//! entries carrying an optional absolute expiry timestamp.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: keys are spread over independent `RwLock<HashMap>`
//!    shards, so traffic on different keys rarely contends.
//! 2. **Whole-Entry Writes**: `set` swaps the complete `Entry` under the shard's
//!    write lock. A reader holding the read lock sees either the old entry or the
//!    new one, never a value from one write paired with the expiry of another.
//! 3. **Lazy Expiry**: an expired entry reads as absent. The read that notices it
//!    evicts it; otherwise it stays until overwritten or swept.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A stored value with its optional expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The stored bytes
    pub value: Bytes,
    /// Absolute expiry in ms since the epoch (None = never expires)
    pub expires_at: Option<u64>,
}

impl Entry {
    /// Creates an entry, turning a relative TTL into an absolute deadline.
    pub fn new(value: Bytes, ttl_ms: Option<u64>) -> Self {
        Self::new_at(value, ttl_ms, now_millis())
    }

    fn new_at(value: Bytes, ttl_ms: Option<u64>, now: u64) -> Self {
        Self {
            value,
            expires_at: ttl_ms.map(|ttl| now.saturating_add(ttl)),
        }
    }

    /// An entry is expired once the current time is past its deadline.
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

/// Point-in-time counters reported by [`StorageEngine::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Entries currently held, including expired ones not yet evicted
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    /// Expired entries removed by reads or sweeps
    pub expired: u64,
}

type Shard = RwLock<HashMap<Bytes, Entry>>;

/// The shared key-value store.
///
/// Wrap it in an `Arc` and hand a clone to every connection. The backing maps
/// are private; all access goes through [`set`](Self::set) and
/// [`get`](Self::get).
///
/// # Example
///
/// ```
/// use pulsekv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.set(Bytes::from("name"), Bytes::from("pulse"), None);
///
/// let entry = engine.get(b"name").unwrap();
/// assert_eq!(entry.value, Bytes::from("pulse"));
/// assert_eq!(entry.expires_at, None);
///
/// assert!(engine.get(b"missing").is_none());
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    // A panicking writer never leaves a half-inserted entry behind, so a
    // poisoned map is still consistent.
    fn read(shard: &Shard) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        shard.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(shard: &Shard) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        shard.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `value` under `key`, replacing any previous entry wholesale.
    ///
    /// With `ttl_ms` the entry expires that many milliseconds from now; without
    /// it the entry never expires, even if the previous one had a deadline.
    pub fn set(&self, key: Bytes, value: Bytes, ttl_ms: Option<u64>) {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let entry = Entry::new(value, ttl_ms);
        let mut data = Self::write(self.shard(&key));
        if data.insert(key, entry).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the entry for `key`, or `None` if it was never written or has
    /// expired.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.shard(key);
        let now = now_millis();

        {
            let data = Self::read(shard);
            match data.get(key) {
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: take the write lock and evict, unless a writer got in first.
        let mut data = Self::write(shard);
        match data.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Removes every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let now = now_millis();
        let mut removed = 0;

        for shard in &self.shards {
            let mut data = Self::write(shard);
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired_at(now));
            removed += (before - data.len()) as u64;
        }

        if removed > 0 {
            self.key_count.fetch_sub(removed, Ordering::Relaxed);
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }

        removed
    }

    /// Number of entries held, including expired ones not yet evicted.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}
