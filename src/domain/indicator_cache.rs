//! TTL cache of indicator series, keyed by symbol and indicator type.
//!
//! Owned by a scanner instance; nothing is shared between instances. An
//! entry is reused while younger than the TTL and computed over a history
//! ending at the same bar.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::domain::indicator::{IndicatorSeries, IndicatorType};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone)]
struct CachedSeries {
    series: IndicatorSeries,
    as_of: Option<NaiveDateTime>,
    cached_at: Instant,
}

#[derive(Debug)]
pub struct IndicatorCache {
    ttl: Duration,
    entries: HashMap<(String, IndicatorType), CachedSeries>,
    stats: CacheStats,
}

impl Default for IndicatorCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl IndicatorCache {
    pub fn new(ttl: Duration) -> Self {
        IndicatorCache {
            ttl,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached series for `(symbol, indicator)`, or the result of `compute`
    /// when missing, expired, or computed over a different last bar.
    pub fn get_or_compute<F>(
        &mut self,
        symbol: &str,
        indicator: IndicatorType,
        as_of: Option<NaiveDateTime>,
        now: Instant,
        compute: F,
    ) -> &IndicatorSeries
    where
        F: FnOnce() -> IndicatorSeries,
    {
        let ttl = self.ttl;
        let stats = &mut self.stats;
        let fresh_entry = || CachedSeries {
            series: compute(),
            as_of,
            cached_at: now,
        };

        let entry = match self.entries.entry((symbol.to_string(), indicator)) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.as_of == as_of && now.saturating_duration_since(entry.cached_at) < ttl {
                    stats.hits += 1;
                } else {
                    stats.misses += 1;
                    stats.evictions += 1;
                    debug!(symbol, %indicator, "indicator cache entry stale");
                    *entry = fresh_entry();
                }
                entry
            }
            Entry::Vacant(vacant) => {
                stats.misses += 1;
                debug!(symbol, %indicator, "indicator cache miss");
                vacant.insert(fresh_entry())
            }
        };
        &entry.series
    }

    /// Drop every entry for `symbol`.
    pub fn invalidate(&mut self, symbol: &str) {
        let before = self.entries.len();
        self.entries.retain(|(s, _), _| s != symbol);
        self.stats.evictions += (before - self.entries.len()) as u64;
    }

    /// Drop entries older than the TTL.
    pub fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.cached_at) < ttl);
        self.stats.evictions += (before - self.entries.len()) as u64;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
