//! Echo-suppression watermark.
//!
//! The watermark is the instant through which table state has already been
//! reconciled with the sheet. The inbound path advances it right after a
//! write so the next poll does not mistake that write for a table-side
//! change; the poller advances it after a fully successful cycle.
//!
//! It only ever moves forward. Stored as microseconds since the epoch in an
//! atomic so both paths can advance it concurrently without a lock.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, SubsecRound, Utc};

#[derive(Debug)]
pub struct Watermark {
    micros: AtomicI64,
}

impl Watermark {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(start.timestamp_micros()),
        }
    }

    /// Watermark initialized to the current instant.
    pub fn starting_now() -> Self {
        Self::new(now())
    }

    pub fn get(&self) -> DateTime<Utc> {
        let micros = self.micros.load(Ordering::SeqCst);
        DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Move the watermark to `t` if `t` is strictly after the current value.
    ///
    /// Returns `true` when the value changed.
    pub fn advance(&self, t: DateTime<Utc>) -> bool {
        let candidate = t.timestamp_micros();
        let previous = self.micros.fetch_max(candidate, Ordering::SeqCst);
        candidate > previous
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::starting_now()
    }
}

/// Current instant at the watermark's resolution.
///
/// Timestamps compared against the watermark must not carry more precision
/// than it stores, or a write and the advance that follows it can land in the
/// same microsecond and compare as newer.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Where a clean poll cycle that started at `cycle_start` leaves the watermark.
///
/// One microsecond before the start of `cycle_start`'s millisecond, so a
/// datastore that records modification times in milliseconds still selects
/// writes that landed in that millisecond after the cycle began. Rows written
/// earlier in the same millisecond may be pushed once more.
pub fn cycle_resume_point(cycle_start: DateTime<Utc>) -> DateTime<Utc> {
    cycle_start.trunc_subsecs(3) - Duration::microseconds(1)
}
