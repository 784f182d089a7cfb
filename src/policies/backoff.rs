//! # Relaunch delay.
//!
//! The delay before relaunch number `n` (0-based, i.e. `streak - 1`) is
//! `first × factor^n`, capped at `max`, then jittered. The base is derived from
//! `n` alone, so a short jittered delay never drags later delays down.
//!
//! ```rust
//! use std::time::Duration;
//! use workervisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(20),
//!     factor: 3.0,
//!     jitter: JitterPolicy::None,
//! };
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(2), Duration::from_secs(9));
//! assert_eq!(backoff.next(3), Duration::from_secs(20));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first relaunch.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth per consecutive crash; `1.0` keeps the delay constant.
    pub factor: f64,
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant 5s, capped at 60s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(5),
            max: Duration::from_secs(60),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Same policy with a constant delay.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay before relaunch number `n` (0-based).
    pub fn next(&self, n: u32) -> Duration {
        let exp = i32::try_from(n).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if secs.is_finite() && (0.0..=self.max.as_secs_f64()).contains(&secs) {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            other => other.apply(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exp(first_ms: u64, max_ms: u64, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn grows_geometrically_then_caps() {
        let p = exp(100, 1_000, JitterPolicy::None);
        let got: Vec<u64> = (0..6).map(|n| p.next(n).as_millis() as u64).collect();
        assert_eq!(got, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn default_is_constant() {
        let p = BackoffPolicy::default();
        for n in 0..8 {
            assert_eq!(p.next(n), Duration::from_secs(5));
        }
    }

    #[test]
    fn first_above_max_is_capped() {
        let p = exp(10_000, 5_000, JitterPolicy::None);
        assert_eq!(p.next(0), Duration::from_secs(5));
    }

    #[test]
    fn overflow_caps_at_max() {
        let p = exp(100, 10_000, JitterPolicy::None);
        assert_eq!(p.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn equal_jitter_keeps_at_least_half() {
        let p = exp(100, 30_000, JitterPolicy::Equal);
        for n in 0..15 {
            let base = (100.0 * 2.0f64.powi(n as i32)).min(30_000.0) as u64;
            let d = p.next(n).as_millis() as u64;
            assert!(d >= base / 2 && d <= base, "n={n} d={d} base={base}");
        }
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let p = exp(100, 30_000, JitterPolicy::Full);
        for n in 5..15 {
            let base = (100.0 * 2.0f64.powi(n as i32)).min(30_000.0) as u64;
            assert!(p.next(n).as_millis() as u64 <= base);
        }
    }

    #[test]
    fn decorrelated_stays_between_first_and_max() {
        let p = exp(100, 30_000, JitterPolicy::Decorrelated);
        for _ in 0..100 {
            let d = p.next(8);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_secs(30));
        }
    }
}
