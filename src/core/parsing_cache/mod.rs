// src/core/parsing_cache/mod.rs

//! A per-thread cache mapping canonical statements to classifier results,
//! keeping repeat statements from being reclassified. Capacity is governed
//! by a single process-wide byte budget, split evenly across however many
//! worker threads currently hold a cache and shaved down further by a fixed
//! fudge factor, since a classifier's self-reported size chronically
//! underestimates true heap use. Eviction is random-bucket, not LRU: no
//! per-entry access bookkeeping is kept, so a hit never needs to write.

use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use indexmap::IndexMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::core::metrics;
use crate::core::parser::{ClassifierResult, SqlMode};

/// The largest single entry the cache will ever hold, independent of the
/// overall budget. Mirrors the MariaDB/MySQL protocol packet ceiling that
/// bounds how large a single statement's classifier output can plausibly be.
pub const MAX_ENTRY_SIZE: i64 = 0xff_ffff - 5;

/// Applied to the per-thread share of the budget before comparing against
/// it, to leave headroom for classifier memory the size estimate misses.
pub const CAPACITY_FUDGE_FACTOR: f64 = 0.65;

static CACHE_MAX_SIZE: AtomicI64 = AtomicI64::new(i64::MAX);
static RUNNING_THREADS: AtomicUsize = AtomicUsize::new(1);

/// Sets the process-wide cache size budget in bytes. A value of `0` disables
/// the parsing cache entirely (every lookup becomes a miss).
pub fn set_cache_max_size(bytes: i64) {
    CACHE_MAX_SIZE.store(bytes, Ordering::Relaxed);
}

pub fn cache_max_size() -> i64 {
    CACHE_MAX_SIZE.load(Ordering::Relaxed)
}

/// Registers how many worker threads currently maintain a parsing cache, so
/// each thread's share of the budget can be computed. Called once by the
/// thread pool on size changes, not per lookup.
pub fn set_running_threads(count: usize) {
    RUNNING_THREADS.store(count.max(1), Ordering::Relaxed);
}

fn per_thread_budget() -> i64 {
    let running = RUNNING_THREADS.load(Ordering::Relaxed).max(1) as i64;
    let share = cache_max_size() / running;
    (share as f64 * CAPACITY_FUDGE_FACTOR) as i64
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub size: i64,
}

struct CacheEntry {
    result: ClassifierResult,
    hits: u64,
}

/// A single thread's parsing cache. Not `Send`/`Sync` — each worker thread
/// owns its own instance via [`with_thread_cache`].
pub struct ParsingCache {
    entries: IndexMap<String, CacheEntry>,
    stats: CacheStats,
    enabled: bool,
    rng: SmallRng,
}

impl ParsingCache {
    fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            stats: CacheStats::default(),
            enabled: true,
            rng: SmallRng::from_entropy(),
        }
    }

    /// A thread-local escape hatch: a worker currently executing a
    /// statement that must not itself be served from (or written to) the
    /// cache flips this off for the duration, then restores it.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled && cache_max_size() != 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Looks up `canonical` without recording a hit/miss, for diagnostics.
    pub fn peek(&self, canonical: &str) -> Option<&ClassifierResult> {
        self.entries.get(canonical).map(|e| &e.result)
    }

    /// Looks up `canonical`, returning the cached result only if `sql_mode`
    /// and `options` still match what it was classified with. A mismatch
    /// evicts the stale entry rather than returning it.
    pub fn get(&mut self, canonical: &str, sql_mode: SqlMode, options: u32) -> Option<ClassifierResult> {
        if !self.enabled() {
            return None;
        }

        let matches = self
            .entries
            .get(canonical)
            .map(|e| e.result.sql_mode == sql_mode && e.result.parser_options == options)
            .unwrap_or(false);

        if matches {
            let entry = self.entries.get_mut(canonical).unwrap();
            entry.hits += 1;
            self.stats.hits += 1;
            metrics::CACHE_HITS_TOTAL.inc();
            Some(entry.result.clone())
        } else {
            if self.entries.contains_key(canonical) {
                self.remove(canonical);
            }
            self.stats.misses += 1;
            metrics::CACHE_MISSES_TOTAL.inc();
            None
        }
    }

    fn remove(&mut self, canonical: &str) {
        if let Some(entry) = self.entries.shift_remove(canonical) {
            self.stats.size -= entry.result.self_reported_size as i64;
        }
    }

    /// Inserts a freshly classified result, making room via random-bucket
    /// eviction if needed. Silently declines entries too large for the
    /// current per-thread budget rather than erroring — a classifier whose
    /// output won't fit simply isn't cached.
    pub fn insert(&mut self, canonical: String, result: ClassifierResult) {
        if !self.enabled() {
            return;
        }
        if self.entries.contains_key(&canonical) {
            return;
        }

        let size = result.self_reported_size as i64;
        let budget = per_thread_budget();

        if size >= MAX_ENTRY_SIZE || size > budget {
            self.stats.misses += 1;
            metrics::CACHE_MISSES_TOTAL.inc();
            return;
        }

        let required_space = (self.stats.size + size) - budget;
        if required_space > 0 {
            self.make_space(required_space);
        }

        if self.stats.size + size <= budget {
            self.entries.insert(canonical, CacheEntry { result, hits: 0 });
            self.stats.inserts += 1;
            self.stats.size += size;
            metrics::CACHE_SIZE_BYTES.set(self.stats.size as f64);
        } else {
            self.stats.misses += 1;
            metrics::CACHE_MISSES_TOTAL.inc();
        }
    }

    /// Updates the running size total when a stored entry's reported size
    /// changes in place, without touching eviction bookkeeping.
    pub fn update_total_size(&mut self, delta: i64) {
        self.stats.size += delta;
        metrics::CACHE_SIZE_BYTES.set(self.stats.size as f64);
    }

    fn make_space(&mut self, required: i64) {
        let mut freed = 0i64;
        while freed < required && !self.entries.is_empty() {
            freed += self.evict_one();
        }
    }

    /// Evicts a single entry chosen uniformly at random, rather than by
    /// recency: no per-access bookkeeping is kept, so there is no LRU order
    /// to evict by, and a cache that never tracks "used last" never pays
    /// for tracking it on every hit.
    fn evict_one(&mut self) -> i64 {
        if self.entries.is_empty() {
            return 0;
        }
        let idx = self.rng.gen_range(0..self.entries.len());
        let (_, entry) = self.entries.swap_remove_index(idx).expect("index in bounds");
        self.stats.evictions += 1;
        metrics::CACHE_EVICTIONS_TOTAL.inc();
        entry.result.self_reported_size as i64
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats.size = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ParsingCache {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static THREAD_CACHE: RefCell<ParsingCache> = RefCell::new(ParsingCache::new());
}

/// Runs `f` against the calling thread's cache. Each worker thread gets its
/// own instance lazily on first use; there is no cross-thread visibility or
/// locking, matching the thread-local design this module is grounded on.
pub fn with_thread_cache<R>(f: impl FnOnce(&mut ParsingCache) -> R) -> R {
    THREAD_CACHE.with(|cache| f(&mut cache.borrow_mut()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::OperationCode;

    fn sample_result(size: usize) -> ClassifierResult {
        ClassifierResult {
            operation: OperationCode::Select,
            databases: vec![],
            tables: vec![],
            fields: vec![],
            sql_mode: SqlMode::Default,
            parser_options: 0,
            self_reported_size: size,
        }
    }

    #[test]
    fn insert_then_get_hits() {
        set_cache_max_size(1_000_000);
        set_running_threads(1);
        let mut cache = ParsingCache::new();
        cache.insert("SELECT ?".to_string(), sample_result(64));
        let got = cache.get("SELECT ?", SqlMode::Default, 0);
        assert!(got.is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn mode_mismatch_evicts_and_misses() {
        set_cache_max_size(1_000_000);
        set_running_threads(1);
        let mut cache = ParsingCache::new();
        cache.insert("SELECT ?".to_string(), sample_result(64));
        let got = cache.get("SELECT ?", SqlMode::Oracle, 0);
        assert!(got.is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn zero_budget_disables_cache() {
        set_cache_max_size(0);
        set_running_threads(1);
        let mut cache = ParsingCache::new();
        cache.insert("SELECT ?".to_string(), sample_result(64));
        assert_eq!(cache.len(), 0);
        set_cache_max_size(1_000_000);
    }

    #[test]
    fn eviction_makes_room_for_new_entries() {
        set_cache_max_size(1000);
        set_running_threads(1);
        let mut cache = ParsingCache::new();
        for i in 0..50 {
            cache.insert(format!("SELECT {i}"), sample_result(40));
        }
        assert!(cache.stats().evictions > 0);
        assert!(cache.stats().size as f64 <= 1000.0 * CAPACITY_FUDGE_FACTOR + 40.0);
        set_cache_max_size(1_000_000);
    }

    #[test]
    fn entry_larger_than_budget_is_declined() {
        set_cache_max_size(100);
        set_running_threads(1);
        let mut cache = ParsingCache::new();
        cache.insert("SELECT huge".to_string(), sample_result(1000));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(
            cache.get("SELECT huge", SqlMode::Default, 0),
            None,
            "a declined insert must not be retrievable"
        );
        set_cache_max_size(1_000_000);
    }
}
