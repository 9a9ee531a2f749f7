//! Monotonic time for bus scheduling
//!
//! All protocol timing in this crate is derived from a microsecond-resolution
//! monotonic clock.  The [`Instant`] and [`Duration`] types here are thin
//! wrappers around a microsecond tick count.  On `std` targets,
//! [`Instant::now()`] reads the operating system's monotonic clock.  On
//! `no_std` targets, the application is responsible for sourcing timestamps
//! (e.g. from a hardware timer) and passing them into the `poll()` functions.

use core::ops;

/// A point in monotonic time, in microseconds.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, Hash)]
pub struct Instant {
    micros: u64,
}

impl Instant {
    pub const ZERO: Self = Instant { micros: 0 };

    /// Construct an `Instant` from a microsecond tick count.
    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    /// Total microseconds since the (arbitrary) clock epoch.
    #[inline]
    pub const fn total_micros(self) -> u64 {
        self.micros
    }

    /// Total milliseconds since the (arbitrary) clock epoch.
    #[inline]
    pub const fn total_millis(self) -> u64 {
        self.micros / 1000
    }

    /// Read the current time from the OS monotonic clock.
    #[cfg(feature = "std")]
    pub fn now() -> Self {
        use std::sync::OnceLock;
        static EPOCH: OnceLock<std::time::Instant> = OnceLock::new();
        let epoch = *EPOCH.get_or_init(std::time::Instant::now);
        Self {
            micros: u64::try_from(epoch.elapsed().as_micros()).unwrap(),
        }
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant {
            micros: self.micros + rhs.micros,
        }
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.micros += rhs.micros;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant {
            micros: self.micros - rhs.micros,
        }
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration {
            micros: self.micros - rhs.micros,
        }
    }
}

/// A span of monotonic time, in microseconds.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, Hash)]
pub struct Duration {
    micros: u64,
}

impl Duration {
    pub const ZERO: Self = Duration { micros: 0 };

    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            micros: millis * 1000,
        }
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            micros: secs * 1_000_000,
        }
    }

    #[inline]
    pub const fn total_micros(self) -> u64 {
        self.micros
    }

    #[inline]
    pub const fn total_millis(self) -> u64 {
        self.micros / 1000
    }
}

impl ops::Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration {
            micros: self.micros + rhs.micros,
        }
    }
}

impl ops::AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        self.micros += rhs.micros;
    }
}

impl ops::Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration {
            micros: self.micros - rhs.micros,
        }
    }
}

impl ops::Mul<u32> for Duration {
    type Output = Duration;

    fn mul(self, rhs: u32) -> Duration {
        Duration {
            micros: self.micros * u64::from(rhs),
        }
    }
}

impl ops::Div<u32> for Duration {
    type Output = Duration;

    fn div(self, rhs: u32) -> Duration {
        Duration {
            micros: self.micros / u64::from(rhs),
        }
    }
}

#[cfg(feature = "std")]
impl From<Duration> for std::time::Duration {
    fn from(value: Duration) -> Self {
        std::time::Duration::from_micros(value.micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_duration_arithmetic() {
        let start = Instant::from_micros(5000);
        let later = start + Duration::from_millis(2);
        assert_eq!(later.total_micros(), 7000);
        assert_eq!(later - start, Duration::from_micros(2000));
        assert_eq!(later - Duration::from_micros(7000), Instant::ZERO);

        let mut t = Instant::ZERO;
        t += Duration::from_secs(1);
        assert_eq!(t.total_millis(), 1000);

        assert_eq!(Duration::from_millis(3) * 4, Duration::from_micros(12000));
        assert_eq!(Duration::from_millis(10) / 4, Duration::from_micros(2500));
    }

    #[cfg(feature = "std")]
    #[test]
    fn now_is_monotonic() {
        let a = Instant::now();
        let b = Instant::now();
        assert!(b >= a);
    }
}
