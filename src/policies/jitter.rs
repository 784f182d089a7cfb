//! # Jitter for relaunch delays.
//!
//! A host reboot or a messaging outage crashes many workers at once; jitter
//! keeps their relaunches from landing in the same instant.
//!
//! - [`JitterPolicy::None`]: exact delay
//! - [`JitterPolicy::Full`]: uniform in `[0, d]`
//! - [`JitterPolicy::Equal`]: `d/2 + uniform[0, d/2]`
//! - [`JitterPolicy::Decorrelated`]: uniform in `[first, min(3d, max)]`

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    #[default]
    None,
    Full,
    Equal,
    /// Needs the `first`/`max` bounds, see [`JitterPolicy::apply_decorrelated`].
    Decorrelated,
}

impl JitterPolicy {
    /// Jitters `delay`. `Decorrelated` returns it unchanged.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = millis(delay);
        if ms == 0 {
            return delay;
        }
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => delay,
            JitterPolicy::Full => Duration::from_millis(rand::rng().random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let extra = if half == 0 {
                    0
                } else {
                    rand::rng().random_range(0..=half)
                };
                Duration::from_millis(half + extra)
            }
        }
    }

    /// Decorrelated jitter around `prev`, bounded by `floor` and `max`.
    ///
    /// Other policies fall back to [`JitterPolicy::apply`].
    pub fn apply_decorrelated(&self, floor: Duration, prev: Duration, max: Duration) -> Duration {
        if *self != JitterPolicy::Decorrelated {
            return self.apply(prev);
        }
        let lo = millis(floor);
        let hi = millis(prev).saturating_mul(3).min(millis(max)).max(lo);
        if lo >= hi {
            return floor;
        }
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
