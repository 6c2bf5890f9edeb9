//! Player state saved across restarts

use crate::error::Result;
use crate::types::PlayerState;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// What the player was doing at shutdown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub state: PlayerState,
    /// Position in the current track
    pub position_ns: u64,
    /// Seconds played since the last play-time update
    #[serde(default)]
    pub playtime_stamp: f64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            state: PlayerState::Stopped,
            position_ns: 0,
            playtime_stamp: 0.0,
        }
    }
}

impl SessionState {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        debug!("Saved player session to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
