//! Plan Cache Module
//!
//! Maps the structural fingerprint of a rewritten operator tree (captured
//! values erased) to its compiled plan, so trees that differ only in captured
//! values skip composition, optimization and rendering. Entries are keyed by
//! one hash and verified against a second, independently seeded one; a
//! mismatch is a miss rather than a wrong plan.
//!
//! ## Design
//!
//! Uses LRU (Least Recently Used) eviction with a configurable entry limit.
//! The map is guarded by a `parking_lot` lock that is never held while
//! compiling: a miss returns immediately and the caller stores the plan it
//! compiled afterwards.

use super::CompiledPlan;
use crate::ast::Fingerprint;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cache entry for a compiled plan
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    /// Second hash of the tree that produced `value`
    pub check: u64,
    /// Access tick of the last hit (higher is more recent)
    pub last_accessed: u64,
    pub access_count: usize,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, check: u64, tick: u64) -> Self {
        CacheEntry {
            value,
            check,
            last_accessed: tick,
            access_count: 1,
        }
    }

    /// Mark the entry as accessed
    pub fn touch(&mut self, tick: u64) {
        self.last_accessed = tick;
        self.access_count += 1;
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Number of entries currently in cache
    pub size: usize,
    pub evictions: usize,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn reset(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }
}

/// Thread-safe LRU cache of compiled plans keyed by fingerprint
#[derive(Debug)]
pub struct PlanCache {
    plans: RwLock<HashMap<u64, CacheEntry<Arc<CompiledPlan>>>>,
    max_entries: usize,
    clock: AtomicU64,
    stats: RwLock<CacheStats>,
}

impl PlanCache {
    /// Create a cache holding at most `max_entries` plans
    pub fn new(max_entries: usize) -> Self {
        PlanCache {
            plans: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            clock: AtomicU64::new(0),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn with_defaults() -> Self {
        PlanCache::new(1000)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up the plan compiled for `fingerprint`
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Arc<CompiledPlan>> {
        let tick = self.tick();
        let mut plans = self.plans.write();
        let found = match plans.get_mut(&fingerprint.hash) {
            Some(entry) if entry.check == fingerprint.check => {
                entry.touch(tick);
                Some(Arc::clone(&entry.value))
            }
            Some(_) => {
                debug!(fingerprint = fingerprint.hash, "fingerprint check mismatch");
                None
            }
            None => None,
        };
        let mut stats = self.stats.write();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    /// Store a compiled plan, evicting the least recently used one at capacity
    pub fn insert(&self, fingerprint: Fingerprint, plan: Arc<CompiledPlan>) {
        let tick = self.tick();
        let mut plans = self.plans.write();
        if !plans.contains_key(&fingerprint.hash) && plans.len() >= self.max_entries {
            self.evict_lru(&mut plans);
        }
        plans.insert(
            fingerprint.hash,
            CacheEntry::new(plan, fingerprint.check, tick),
        );
        self.stats.write().size = plans.len();
    }

    fn evict_lru(&self, plans: &mut HashMap<u64, CacheEntry<Arc<CompiledPlan>>>) {
        if let Some(&oldest) = plans
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key)
        {
            plans.remove(&oldest);
            self.stats.write().evictions += 1;
            debug!(fingerprint = oldest, "evicted cached plan");
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    pub fn reset_stats(&self) {
        self.stats.write().reset();
    }

    pub fn clear(&self) {
        self.plans.write().clear();
        self.stats.write().size = 0;
    }

    pub fn len(&self) -> usize {
        self.plans.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.read().is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Shape, SqlExpr};
    use crate::ir_builder::Terminal;
    use crate::materializer::RowMaterializer;

    fn plan(sql: &str) -> Arc<CompiledPlan> {
        Arc::new(CompiledPlan {
            sql: sql.to_string(),
            parameters: Vec::new(),
            materializer: RowMaterializer::build(&Shape::Scalar(SqlExpr::constant(1))).unwrap(),
            client: None,
            terminal: Terminal::Sequence,
        })
    }

    fn key(hash: u64) -> Fingerprint {
        Fingerprint { hash, check: hash }
    }

    #[test]
    fn test_cache_hit_miss() {
        let cache = PlanCache::new(100);

        assert!(cache.get(key(1)).is_none());
        assert_eq!(cache.stats().misses, 1);

        cache.insert(key(1), plan("SELECT 1"));

        assert_eq!(cache.get(key(1)).map(|p| p.sql.clone()), Some("SELECT 1".to_string()));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().size, 1);
    }

    #[test]
    fn test_cache_eviction() {
        let cache = PlanCache::new(2);

        cache.insert(key(1), plan("q1"));
        cache.insert(key(2), plan("q2"));

        // Access q1 to make it more recent
        cache.get(key(1));

        // Third entry evicts q2 (LRU)
        cache.insert(key(3), plan("q3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(key(1)).is_some());
        assert!(cache.get(key(3)).is_some());
        assert!(cache.get(key(2)).is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let cache = PlanCache::new(1);
        cache.insert(key(1), plan("q1"));
        cache.insert(key(1), plan("q1 again"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_check_mismatch_is_a_miss() {
        let cache = PlanCache::new(10);
        cache.insert(Fingerprint { hash: 7, check: 1 }, plan("q1"));

        assert!(cache.get(Fingerprint { hash: 7, check: 2 }).is_none());
        assert_eq!(cache.stats().misses, 1);
        assert!(cache.get(Fingerprint { hash: 7, check: 1 }).is_some());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            ..Default::default()
        };

        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_clear() {
        let cache = PlanCache::new(10);
        cache.insert(key(1), plan("q1"));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().size, 0);
    }
}
