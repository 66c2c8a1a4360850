//! In-memory response cache for idempotent remote lookups.
//!
//! Entries are keyed by a resource kind plus canonicalized JSON parameters, so
//! `{"a":1,"b":2}` and `{"b":2,"a":1}` address the same entry. Entries expire
//! after a fixed TTL; when the table is full the oldest insertion is evicted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
/// Default maximum number of entries.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1000;

struct Entry {
    seq: u64,
    inserted_at: Instant,
    value: Value,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    /// Insertion order: sequence number -> key. The first entry is the oldest.
    order: BTreeMap<u64, String>,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
}

impl CacheStats {
    /// Fraction of lookups that hit (0.0 when nothing was looked up).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Hits and misses since `start`; size and limits stay current.
    pub fn since(&self, start: &Self) -> Self {
        Self {
            hits: self.hits.saturating_sub(start.hits),
            misses: self.misses.saturating_sub(start.misses),
            ..*self
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// TTL- and size-bounded cache. Share it behind an `Arc`.
///
/// The cache never fails: a poisoned lock is recovered and lookups that cannot
/// be answered are misses.
pub struct CacheLayer {
    state: Mutex<CacheState>,
    ttl: Duration,
    max_size: usize,
    enabled: bool,
}

impl CacheLayer {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl,
            max_size: max_size.max(1),
            enabled: true,
        }
    }

    /// A cache that always misses and never stores.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(DEFAULT_CACHE_TTL, DEFAULT_CACHE_MAX_SIZE)
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deterministic key for `kind` + `params`.
    pub fn key(kind: &str, params: &Value) -> String {
        format!("{kind}:{}", canonicalize(params))
    }

    /// Look up a fresh entry. Expired entries are removed.
    pub fn get(&self, kind: &str, params: &Value) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let key = Self::key(kind, params);
        let now = Instant::now();
        let mut state = self.lock();

        let fresh = match state.entries.get(&key) {
            None => None,
            Some(entry) if now.duration_since(entry.inserted_at) <= self.ttl => {
                Some(entry.value.clone())
            }
            Some(_) => {
                state.remove(&key);
                None
            }
        };

        if fresh.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        fresh
    }

    /// Typed lookup. A value that no longer decodes as `T` counts as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, kind: &str, params: &Value) -> Option<T> {
        let value = self.get(kind, params)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::debug!(kind, error = %e, "Cached value failed to decode");
                let mut state = self.lock();
                state.hits = state.hits.saturating_sub(1);
                state.misses += 1;
                None
            }
        }
    }

    /// Store `value`. Overwriting refreshes the insertion time.
    pub fn set(&self, kind: &str, params: &Value, value: Value) {
        if !self.enabled {
            return;
        }
        let key = Self::key(kind, params);
        let mut state = self.lock();

        if state.remove(&key).is_none()
            && state.entries.len() >= self.max_size
            && let Some(evicted) = state.evict_oldest()
        {
            tracing::trace!(key = %evicted, "Evicted oldest cache entry");
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.order.insert(seq, key.clone());
        state.entries.insert(
            key,
            Entry {
                seq,
                inserted_at: Instant::now(),
                value,
            },
        );
    }

    /// Remove one entry. Returns whether it existed.
    pub fn delete(&self, kind: &str, params: &Value) -> bool {
        if !self.enabled {
            return false;
        }
        let key = Self::key(kind, params);
        self.lock().remove(&key).is_some()
    }

    /// Remove every entry whose key contains `pattern`. Returns the count removed.
    pub fn clear_matching(&self, pattern: &str) -> usize {
        let mut state = self.lock();
        let doomed: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.contains(pattern))
            .cloned()
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        doomed.len()
    }

    /// Drop all entries. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            enabled: self.enabled,
            hits: state.hits,
            misses: state.misses,
            size: state.entries.len(),
            max_size: self.max_size,
            ttl: self.ttl,
        }
    }
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL, DEFAULT_CACHE_MAX_SIZE)
    }
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Compact JSON with object keys sorted at every depth.
fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

// serde_json's map may preserve insertion order (feature `preserve_order`), so
// the writer walks objects in sorted order itself.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
