//! Session counters and timing statistics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Number of recent creations/expirations kept for rate calculations.
pub const TIMING_STATS_CACHE_SIZE: usize = 100;

/// When a session was created or expired, and how long it had lived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Event time in milliseconds.
    pub timestamp: i64,
    /// Lifetime in seconds (zero for creations).
    pub duration_secs: i64,
}

/// Bounded ring of recent timings.
#[derive(Debug)]
pub struct TimingRing {
    entries: VecDeque<SessionTiming>,
    capacity: usize,
}

impl TimingRing {
    /// Create an empty ring holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a timing, evicting the oldest entry when full.
    pub fn push(&mut self, timing: SessionTiming) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(timing);
    }

    /// Number of recorded timings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Events per minute over the window covered by the ring.
    ///
    /// Returns `u64::MAX` when every recorded event happened at `now`.
    pub fn rate_per_minute(&self, now: i64) -> u64 {
        let Some(oldest) = self.entries.iter().map(|t| t.timestamp).min() else {
            return 0;
        };
        let count = self.entries.len() as u64;
        if oldest < now {
            (60_000 * count) / (now - oldest) as u64
        } else {
            u64::MAX
        }
    }
}

#[derive(Debug, Default)]
struct Lifetimes {
    max_secs: i64,
    average_secs: f64,
    count: u64,
}

/// Counters maintained by a manager over its lifetime.
#[derive(Debug)]
pub struct SessionStats {
    created: AtomicU64,
    expired: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
    processing_time_ms: AtomicU64,
    lifetimes: Mutex<Lifetimes>,
    creation_timing: Mutex<TimingRing>,
    expiration_timing: Mutex<TimingRing>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            created: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            processing_time_ms: AtomicU64::new(0),
            lifetimes: Mutex::new(Lifetimes::default()),
            creation_timing: Mutex::new(TimingRing::new(TIMING_STATS_CACHE_SIZE)),
            expiration_timing: Mutex::new(TimingRing::new(TIMING_STATS_CACHE_SIZE)),
        }
    }
}

impl SessionStats {
    /// Record a session creation at `now`.
    pub fn record_created(&self, now: i64) {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.creation_timing.lock().push(SessionTiming {
            timestamp: now,
            duration_secs: 0,
        });
    }

    /// Record a restored session (counts as created, no timing entry).
    pub fn record_restored(&self) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    /// Record an expiration of a session that lived `lifetime_secs`.
    ///
    /// The running average is updated incrementally:
    /// `avg' = (avg * (n - 1) + lifetime) / n`.
    pub fn record_expired(&self, now: i64, lifetime_secs: i64) {
        self.expired.fetch_add(1, Ordering::SeqCst);
        {
            let mut lifetimes = self.lifetimes.lock();
            lifetimes.count += 1;
            let n = lifetimes.count as f64;
            lifetimes.average_secs =
                (lifetimes.average_secs * (n - 1.0) + lifetime_secs as f64) / n;
            if lifetime_secs > lifetimes.max_secs {
                lifetimes.max_secs = lifetime_secs;
            }
        }
        self.expiration_timing.lock().push(SessionTiming {
            timestamp: now,
            duration_secs: lifetime_secs,
        });
    }

    /// Record a creation refused by the active-session limit.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a generated id that collided with a live session.
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::SeqCst);
    }

    /// Add time spent in an expiration sweep.
    pub fn add_processing_time(&self, millis: u64) {
        self.processing_time_ms.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::SeqCst)
    }

    pub fn processing_time_ms(&self) -> u64 {
        self.processing_time_ms.load(Ordering::SeqCst)
    }

    /// Longest lifetime of an expired session, in seconds.
    pub fn max_alive_secs(&self) -> i64 {
        self.lifetimes.lock().max_secs
    }

    /// Average lifetime of expired sessions, in seconds.
    pub fn average_alive_secs(&self) -> f64 {
        self.lifetimes.lock().average_secs
    }

    /// Sessions created per minute, over the last creations.
    pub fn create_rate(&self, now: i64) -> u64 {
        self.creation_timing.lock().rate_per_minute(now)
    }

    /// Sessions expired per minute, over the last expirations.
    pub fn expire_rate(&self, now: i64) -> u64 {
        self.expiration_timing.lock().rate_per_minute(now)
    }
}

/// Point-in-time copy of a manager's statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub active: usize,
    pub max_active: usize,
    pub created: u64,
    pub expired: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub max_alive_secs: i64,
    pub average_alive_secs: f64,
    pub create_rate: u64,
    pub expire_rate: u64,
    pub processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let mut ring = TimingRing::new(2);
        for ts in [1, 2, 3] {
            ring.push(SessionTiming {
                timestamp: ts,
                duration_secs: 0,
            });
        }
        assert_eq!(ring.len(), 2);
        // Oldest remaining is 2: two events over 8ms.
        assert_eq!(ring.rate_per_minute(10), 60_000 * 2 / 8);
    }

    #[test]
    fn test_rate_of_empty_ring_is_zero() {
        let ring = TimingRing::new(5);
        assert!(ring.is_empty());
        assert_eq!(ring.rate_per_minute(1_000), 0);
    }

    #[test]
    fn test_rate_when_all_events_are_now() {
        let mut ring = TimingRing::new(5);
        ring.push(SessionTiming {
            timestamp: 50,
            duration_secs: 0,
        });
        assert_eq!(ring.rate_per_minute(50), u64::MAX);
    }

    #[test]
    fn test_incremental_average_and_max() {
        let stats = SessionStats::default();
        stats.record_expired(0, 10);
        stats.record_expired(0, 20);
        stats.record_expired(0, 60);
        assert_eq!(stats.expired(), 3);
        assert_eq!(stats.max_alive_secs(), 60);
        assert!((stats.average_alive_secs() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_counters() {
        let stats = SessionStats::default();
        stats.record_created(0);
        stats.record_restored();
        stats.record_rejected();
        stats.record_duplicate();
        stats.add_processing_time(7);
        assert_eq!(stats.created(), 2);
        assert_eq!(stats.rejected(), 1);
        assert_eq!(stats.duplicates(), 1);
        assert_eq!(stats.processing_time_ms(), 7);
    }
}
