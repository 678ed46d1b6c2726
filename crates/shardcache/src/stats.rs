//! Cache statistics tracking

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every shard of a cache
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    erases: AtomicU64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_erase(&self) {
        self.erases.fetch_add(1, Ordering::Relaxed);
    }

    /// Lookups that found an entry
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries created by insert
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Entries removed to bring usage back under capacity
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Entries removed by an explicit erase
    pub fn erases(&self) -> u64 {
        self.erases.load(Ordering::Relaxed)
    }

    /// Hit ratio over all lookups (0.0 when there were none)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.inserts,
            &self.evictions,
            &self.erases,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// `name:value` lines, one per counter
impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cache_hits:{}", self.hits())?;
        writeln!(f, "cache_misses:{}", self.misses())?;
        writeln!(f, "cache_hit_ratio:{:.2}", self.hit_ratio())?;
        writeln!(f, "cache_inserts:{}", self.inserts())?;
        writeln!(f, "cache_evictions:{}", self.evictions())?;
        write!(f, "cache_erases:{}", self.erases())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_ratio() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_ratio(), 0.0);

        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.hit_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn test_stats_reset() {
        let stats = CacheStats::new();
        stats.record_insert();
        stats.record_eviction();
        stats.record_erase();
        stats.reset();

        assert_eq!(stats.inserts(), 0);
        assert_eq!(stats.evictions(), 0);
        assert_eq!(stats.erases(), 0);
    }

    #[test]
    fn test_stats_display() {
        let stats = CacheStats::new();
        stats.record_hit();
        let text = stats.to_string();
        assert!(text.contains("cache_hits:1"));
        assert!(text.contains("cache_hit_ratio:1.00"));
        assert!(text.ends_with("cache_erases:0"));
    }
}
