//! Playback types

use exaile_core::{SettingsManager, Track};
use serde::{Deserialize, Serialize};

/// Coarse player state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Playing,
    Paused,
    Stopped,
}

/// A track to start, with where and how
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub track: Track,
    /// Position in seconds to seek to once pre-rolled
    pub start_at: Option<f64>,
    /// Stay paused after pre-roll
    pub paused: bool,
}

impl PlayRequest {
    pub fn new(track: Track) -> Self {
        Self {
            track,
            start_at: None,
            paused: false,
        }
    }
}

/// Engine options, mirrored from `<engine>/...` settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Overlap consecutive tracks on two streams
    pub crossfade_enabled: bool,
    /// Overlap length (ms)
    pub crossfade_duration_ms: u32,
    /// Fade in on user-initiated play
    pub user_fade_enabled: bool,
    /// User fade length (ms)
    pub user_fade_duration_ms: u32,
    /// Stop instead of following the sound server to another device
    pub disable_autoswitch: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crossfade_enabled: false,
            crossfade_duration_ms: 3000,
            user_fade_enabled: false,
            user_fade_duration_ms: 1000,
            disable_autoswitch: false,
        }
    }
}

impl EngineConfig {
    /// Read the options stored under `section/`
    pub fn from_settings(settings: &SettingsManager, section: &str) -> Self {
        let defaults = Self::default();
        let key = |name: &str| format!("{}/{}", section, name);
        Self {
            crossfade_enabled: settings.get_option(&key("crossfading"), defaults.crossfade_enabled),
            crossfade_duration_ms: settings
                .get_option(&key("crossfade_duration"), defaults.crossfade_duration_ms)
                .max(1),
            user_fade_enabled: settings.get_option(&key("user_fade_enabled"), defaults.user_fade_enabled),
            user_fade_duration_ms: settings
                .get_option(&key("user_fade"), defaults.user_fade_duration_ms),
            disable_autoswitch: settings
                .get_option(&key("disable_autoswitch"), defaults.disable_autoswitch),
        }
    }

    /// Crossfade length in seconds
    pub fn crossfade_secs(&self) -> f64 {
        f64::from(self.crossfade_duration_ms) / 1000.0
    }

    /// User fade length in seconds
    pub fn user_fade_secs(&self) -> f64 {
        f64::from(self.user_fade_duration_ms) / 1000.0
    }
}
