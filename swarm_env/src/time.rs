//! Simulated time.
//!
//! `SimTime` is an instant on the logical clock and `SimDuration` a span of
//! it. Both are integer nanoseconds, which keeps ordering exact (no float
//! ties) while resolving well below a millisecond. Durations are always built
//! from an explicit [`TimeUnit`] so a "100" can never silently mean
//! milliseconds in one place and microseconds in another.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Unit tag for building durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    /// Number of nanoseconds in one of this unit.
    pub const fn nanos(self) -> u64 {
        match self {
            TimeUnit::Seconds => NANOS_PER_SEC,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Nanoseconds => 1,
        }
    }
}

/// A span of simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimDuration(u64);

impl SimDuration {
    /// Zero-length duration.
    pub const ZERO: SimDuration = SimDuration(0);

    /// Creates a duration of `amount` units.
    ///
    /// Saturates at the largest representable span instead of wrapping.
    pub const fn new(amount: u64, unit: TimeUnit) -> Self {
        SimDuration(amount.saturating_mul(unit.nanos()))
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        SimDuration(nanos)
    }

    pub const fn from_micros(us: u64) -> Self {
        Self::new(us, TimeUnit::Microseconds)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self::new(ms, TimeUnit::Milliseconds)
    }

    pub const fn from_secs(s: u64) -> Self {
        Self::new(s, TimeUnit::Seconds)
    }

    /// Creates a duration from fractional seconds, rounded to the nearest
    /// nanosecond. Negative and NaN inputs map to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() || secs <= 0.0 {
            return SimDuration::ZERO;
        }
        let nanos = (secs * NANOS_PER_SEC as f64).round();
        if nanos >= u64::MAX as f64 {
            SimDuration(u64::MAX)
        } else {
            SimDuration(nanos as u64)
        }
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Add for SimDuration {
    type Output = SimDuration;

    fn add(self, rhs: Self) -> Self::Output {
        SimDuration(self.0.saturating_add(rhs.0))
    }
}

impl Mul<u64> for SimDuration {
    type Output = SimDuration;

    fn mul(self, rhs: u64) -> Self::Output {
        SimDuration(self.0.saturating_mul(rhs))
    }
}

impl From<std::time::Duration> for SimDuration {
    fn from(d: std::time::Duration) -> Self {
        SimDuration(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}

/// An instant on the simulated clock, in nanoseconds since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Simulation start.
    pub const ZERO: SimTime = SimTime(0);

    /// Creates an instant `amount` units after simulation start.
    pub const fn new(amount: u64, unit: TimeUnit) -> Self {
        SimTime(amount.saturating_mul(unit.nanos()))
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self::new(ms, TimeUnit::Milliseconds)
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Adds a duration, returning `None` on overflow.
    pub fn checked_add(&self, duration: SimDuration) -> Option<SimTime> {
        self.0.checked_add(duration.0).map(SimTime)
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is in the future.
    pub fn saturating_since(&self, earlier: SimTime) -> SimDuration {
        SimDuration(self.0.saturating_sub(earlier.0))
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimDuration) -> Self::Output {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<SimDuration> for SimTime {
    fn add_assign(&mut self, rhs: SimDuration) {
        *self = *self + rhs;
    }
}

impl Sub for SimTime {
    type Output = SimDuration;

    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_since(rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_tagged_durations_agree() {
        assert_eq!(
            SimDuration::new(100, TimeUnit::Milliseconds),
            SimDuration::new(100_000, TimeUnit::Microseconds)
        );
        assert_eq!(SimDuration::from_secs(1), SimDuration::from_millis(1000));
        assert_eq!(SimDuration::new(7, TimeUnit::Nanoseconds).as_nanos(), 7);
    }

    #[test]
    fn test_sub_millisecond_resolution() {
        let t = SimTime::ZERO + SimDuration::from_micros(64);
        assert!(t > SimTime::ZERO);
        assert!(t < SimTime::from_millis(1));
        assert_eq!(t.as_nanos(), 64_000);
    }

    #[test]
    fn test_from_secs_f64_rounds_to_nanos() {
        // 250 bytes on a 250 kbps link
        let d = SimDuration::from_secs_f64(250.0 / 125.0 / 250.0);
        assert_eq!(d, SimDuration::from_millis(8));

        assert_eq!(SimDuration::from_secs_f64(-1.0), SimDuration::ZERO);
        assert_eq!(SimDuration::from_secs_f64(f64::NAN), SimDuration::ZERO);
    }

    #[test]
    fn test_time_arithmetic() {
        let a = SimTime::from_millis(10);
        let b = a + SimDuration::from_millis(5);
        assert_eq!(b, SimTime::from_millis(15));
        assert_eq!(b - a, SimDuration::from_millis(5));
        assert_eq!(a - b, SimDuration::ZERO);
        assert_eq!(SimTime::from_nanos(u64::MAX).checked_add(SimDuration::from_nanos(1)), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(SimTime::from_millis(1500).to_string(), "1.500000s");
    }
}
