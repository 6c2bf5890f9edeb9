//! Media-framework interface
//!
//! The playback engine drives a streaming multimedia framework through the
//! narrow set of traits in [`element`] and receives its asynchronous
//! messages as [`BusMessage`] values. Nothing framework-specific leaks past
//! these types, so the engine can run against a real backend or the
//! in-process simulation alike.

pub mod bus;
pub mod element;

pub use bus::{BusMessage, TagList, TagListValue};
pub use element::{
    AboutToFinishHandler, AudioDevice, AudioSinkElement, BusHandler, DeviceNotifyHandler,
    FilterElement, InstallResult, InstallStart, MediaFramework, Pipeline, PluginInstaller,
    SinkBin, VolumeHandler,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use thiserror::Error;

/// Result type for framework operations
pub type MediaResult<T> = std::result::Result<T, MediaError>;

/// Failures reported by a framework implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// No element factory with that name
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Elements could not be linked
    #[error("Link failed: {0}")]
    Link(String),

    /// A state transition was refused
    #[error("State change failed: {0}")]
    StateChange(String),

    /// A pipeline description could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Operation not allowed in the current state
    #[error("Not permitted: {0}")]
    NotPermitted(String),
}

/// Stream time in nanoseconds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ClockTime(u64);

impl ClockTime {
    pub const ZERO: ClockTime = ClockTime(0);
    pub const MSECOND: ClockTime = ClockTime(1_000_000);
    pub const SECOND: ClockTime = ClockTime(1_000_000_000);

    pub const fn from_nseconds(ns: u64) -> Self {
        ClockTime(ns)
    }

    pub const fn from_mseconds(ms: u64) -> Self {
        ClockTime(ms * 1_000_000)
    }

    /// Negative and non-finite inputs clamp to zero
    pub fn from_seconds_f64(seconds: f64) -> Self {
        if seconds.is_finite() && seconds > 0.0 {
            ClockTime((seconds * 1e9).round() as u64)
        } else {
            ClockTime::ZERO
        }
    }

    pub const fn nseconds(self) -> u64 {
        self.0
    }

    pub const fn mseconds(self) -> u64 {
        self.0 / 1_000_000
    }

    pub fn seconds_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    pub const fn saturating_sub(self, other: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_sub(other.0))
    }
}

impl Add for ClockTime {
    type Output = ClockTime;

    fn add(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub for ClockTime {
    type Output = ClockTime;

    fn sub(self, rhs: ClockTime) -> ClockTime {
        self.saturating_sub(rhs)
    }
}

impl From<std::time::Duration> for ClockTime {
    fn from(d: std::time::Duration) -> Self {
        ClockTime(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.mseconds();
        write!(
            f,
            "{}:{:02}:{:02}.{:03}",
            ms / 3_600_000,
            (ms / 60_000) % 60,
            (ms / 1000) % 60,
            ms % 1000
        )
    }
}

/// Element / pipeline state, ordered from least to most active
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum State {
    /// Uninitialized; resources released
    Null,
    Ready,
    /// Pre-rolled, clock stopped
    Paused,
    Playing,
}

/// Outcome of a state change request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeReturn {
    Success,
    /// Completes in the background
    Async,
    /// Live source; no pre-roll
    NoPreroll,
    Failure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_time_conversions() {
        let t = ClockTime::from_seconds_f64(1.5);
        assert_eq!(t.nseconds(), 1_500_000_000);
        assert_eq!(t.mseconds(), 1500);
        assert!((t.seconds_f64() - 1.5).abs() < 1e-9);
        assert_eq!(ClockTime::from_seconds_f64(-3.0), ClockTime::ZERO);
        assert_eq!(ClockTime::from_seconds_f64(f64::NAN), ClockTime::ZERO);
    }

    #[test]
    fn test_clock_time_display() {
        assert_eq!(ClockTime::from_mseconds(3_723_004).to_string(), "1:02:03.004");
    }

    #[test]
    fn test_state_ordering() {
        assert!(State::Null < State::Ready);
        assert!(State::Paused < State::Playing);
    }

    #[test]
    fn test_sub_saturates() {
        assert_eq!(ClockTime::SECOND - ClockTime::from_seconds_f64(2.0), ClockTime::ZERO);
    }

    proptest::proptest! {
        #[test]
        fn prop_seconds_survive_conversion(seconds in 0.0f64..1.0e6) {
            let t = ClockTime::from_seconds_f64(seconds);
            proptest::prop_assert!((t.seconds_f64() - seconds).abs() < 1e-6);
            proptest::prop_assert_eq!(t.mseconds(), t.nseconds() / 1_000_000);
        }
    }
}
