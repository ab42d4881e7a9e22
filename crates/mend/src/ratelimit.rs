//! Per-tier request budgets.
//!
//! The governor is the only mutual-exclusion point in a run: each tier has
//! one bucket of hourly capacity, scaled by a time-of-day multiplier, and
//! `try_acquire` is an atomic check-then-increment under a single lock so
//! concurrent workers can never overshoot the effective capacity. A
//! deferred caller must not retry within the same run; the change request
//! is reconsidered on the next one.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use crate::config::{TierCapacities, TimeBands};

/// Weekday peak window, UTC hours.
const PEAK_START_HOUR: u32 = 9;
const PEAK_END_HOUR: u32 = 18;

/// The three governed remediation tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    Review,
    Repair,
    Fallback,
}

impl TierKind {
    /// Display name for logs and tallies.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Repair => "repair",
            Self::Fallback => "fallback",
        }
    }

    /// Position in per-tier counter arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Review => 0,
            Self::Repair => 1,
            Self::Fallback => 2,
        }
    }
}

/// Outcome of a budget acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Budget consumed; the caller may proceed now
    Granted,
    /// Effective capacity exhausted; do not retry this run
    Deferred,
}

#[derive(Debug)]
struct Bucket {
    base_per_hour: u32,
    consumed: u32,
    window_start: DateTime<Utc>,
}

/// Time-of-day multiplier: weekends get the lowest band, weekday peak hours
/// run above 1x, remaining hours below 1x.
#[must_use]
pub fn multiplier(bands: &TimeBands, now: DateTime<Utc>) -> f64 {
    match now.weekday() {
        Weekday::Sat | Weekday::Sun => bands.weekend,
        _ if (PEAK_START_HOUR..PEAK_END_HOUR).contains(&now.hour()) => bands.peak,
        _ => bands.off_hours,
    }
}

/// Consumption-based budget governor, sole writer of the counters.
struct Inner {
    buckets: [Bucket; 3],
    bands: TimeBands,
}

pub struct RateLimitGovernor {
    inner: Mutex<Inner>,
}

impl RateLimitGovernor {
    /// Create a governor with fresh windows starting at `now`.
    #[must_use]
    pub fn new(capacities: &TierCapacities, bands: TimeBands, now: DateTime<Utc>) -> Self {
        let bucket = |base_per_hour| Bucket {
            base_per_hour,
            consumed: 0,
            window_start: now,
        };
        Self {
            inner: Mutex::new(Inner {
                buckets: [
                    bucket(capacities.review),
                    bucket(capacities.repair),
                    bucket(capacities.fallback),
                ],
                bands,
            }),
        }
    }

    /// Apply new capacities and bands without resetting consumption, so a
    /// config reload between runs cannot refill the current hour's budget.
    pub fn reconfigure(&self, capacities: &TierCapacities, bands: TimeBands) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.buckets[TierKind::Review.index()].base_per_hour = capacities.review;
        inner.buckets[TierKind::Repair.index()].base_per_hour = capacities.repair;
        inner.buckets[TierKind::Fallback.index()].base_per_hour = capacities.fallback;
        inner.bands = bands;
    }

    /// Effective capacity for a tier at `now`.
    #[must_use]
    pub fn effective_capacity(&self, tier: TierKind, now: DateTime<Utc>) -> u32 {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        scaled_capacity(inner.buckets[tier.index()].base_per_hour, &inner.bands, now)
    }

    /// Atomically check and consume one unit of a tier's budget.
    ///
    /// Rolls the hourly window first, then applies check-then-increment in
    /// a single critical section, so `consumed <= effective capacity` holds
    /// at every point even under concurrent callers.
    pub fn try_acquire(&self, tier: TierKind, now: DateTime<Utc>) -> Acquire {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let bands = inner.bands.clone();
        let bucket = &mut inner.buckets[tier.index()];

        if now - bucket.window_start >= chrono::Duration::hours(1) {
            bucket.consumed = 0;
            bucket.window_start = now;
        }

        let effective = scaled_capacity(bucket.base_per_hour, &bands, now);
        if bucket.consumed >= effective {
            return Acquire::Deferred;
        }
        bucket.consumed += 1;
        Acquire::Granted
    }

    /// Units consumed in the current window (observability and tests).
    #[must_use]
    pub fn consumed(&self, tier: TierKind) -> u32 {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.buckets[tier.index()].consumed
    }
}

/// A positive base capacity never scales below one unit per hour, so a low
/// band cannot silently turn a tier off.
fn scaled_capacity(base: u32, bands: &TimeBands, now: DateTime<Utc>) -> u32 {
    let scaled = (f64::from(base) * multiplier(bands, now)).floor() as u32;
    scaled.max(u32::from(base > 0))
}
