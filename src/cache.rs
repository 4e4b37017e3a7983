//! Result cache: bounded, time-limited fingerprint → verdict map
//!
//! Eviction is strictly by insertion order: when full, the oldest-inserted
//! entry goes first. Expired entries are never returned and are dropped
//! lazily on lookup (or eagerly via `purge_expired`).

use crate::config::CacheConfig;
use crate::types::{Fingerprint, Verdict};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct CacheEntry {
    verdict: Verdict,
    inserted_at: Instant,
    /// Matches the entry's slot in the insertion queue
    seq: u64,
}

/// Bounded verdict cache with time-based expiry
pub struct ResultCache {
    entries: HashMap<Fingerprint, CacheEntry>,
    /// Insertion order; slots whose seq no longer matches are stale
    order: VecDeque<(Fingerprint, u64)>,
    next_seq: u64,
    max_entries: usize,
    ttl: Duration,
    stats: CacheStats,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_limits(config.max_entries, config.ttl())
    }

    /// `max_entries` is clamped to at least 1
    pub fn with_limits(max_entries: usize, ttl: Duration) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: HashMap::with_capacity(max_entries.min(4096)),
            order: VecDeque::with_capacity(max_entries.min(4096)),
            next_seq: 0,
            max_entries,
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// Look up an unexpired verdict
    pub fn get(&mut self, fingerprint: &Fingerprint) -> Option<Verdict> {
        let expired = match self.entries.get(fingerprint) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.stats.hits += 1;
                return Some(entry.verdict.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(fingerprint);
            self.stats.expirations += 1;
        }
        self.stats.misses += 1;
        None
    }

    /// Whether an unexpired entry exists, without touching counters
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries
            .get(fingerprint)
            .map(|e| e.inserted_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Store a verdict, evicting the oldest entries if at capacity
    ///
    /// Re-inserting an existing fingerprint refreshes both its value and
    /// its position in the insertion order.
    pub fn insert(&mut self, fingerprint: Fingerprint, verdict: Verdict) {
        self.entries.remove(&fingerprint);

        while self.entries.len() >= self.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((fingerprint.clone(), seq));
        self.entries.insert(
            fingerprint,
            CacheEntry {
                verdict,
                inserted_at: Instant::now(),
                seq,
            },
        );

        if self.order.len() > self.max_entries * 2 + 16 {
            self.compact();
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        let removed = before - self.entries.len();
        self.stats.expirations += removed as u64;
        if removed > 0 {
            self.compact();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((fingerprint, seq)) = self.order.pop_front() {
            let live = self
                .entries
                .get(&fingerprint)
                .map(|e| e.seq == seq)
                .unwrap_or(false);
            if live {
                self.entries.remove(&fingerprint);
                self.stats.evictions += 1;
                tracing::trace!(fingerprint = %fingerprint, "Evicted oldest cache entry");
                return true;
            }
        }
        false
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order.retain(|(fingerprint, seq)| {
            entries
                .get(fingerprint)
                .map(|e| e.seq == *seq)
                .unwrap_or(false)
        });
    }
}
