//! Play queue and backing playlist
//!
//! Answers "what plays next?" for the engine:
//!
//! ```text
//! Current: Track A
//! ─────────────────────────────
//! Queue (user added, plays first):
//!   - Track B
//!   - Track C
//! ─────────────────────────────
//! Playlist (from cursor on):
//!   - Track D
//!   - Track E
//! ```
//!
//! Looking ahead ([`PlayQueue::peek_next`]) never changes anything; the
//! queue only moves once the engine reports the track actually started
//! ([`PlayQueue::commit_next`]). That way a gapless pre-queue that never
//! plays leaves the queue untouched.

use exaile_core::{SettingsManager, Track};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Previous restarts the current track after this many seconds of play
pub const RESTART_THRESHOLD_SECS: f64 = 5.0;

/// How a playlist continues past its end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop at the end
    #[default]
    Off,
    /// Wrap around to the first track
    All,
    /// Repeat the current track forever
    Track,
}

/// Ordered tracks with a play cursor
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    name: String,
    tracks: Vec<Track>,
    position: Option<usize>,
    repeat: RepeatMode,
}

impl Playlist {
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            name: name.into(),
            tracks,
            position: None,
            repeat: RepeatMode::Off,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
    }

    /// Index of the current track
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Move the cursor; out of range clears it
    pub fn set_position(&mut self, position: Option<usize>) {
        self.position = position.filter(|p| *p < self.tracks.len());
    }

    pub fn current(&self) -> Option<Track> {
        self.tracks.get(self.position?).cloned()
    }

    /// First index of `track` in the playlist
    pub fn index_of(&self, track: &Track) -> Option<usize> {
        self.tracks.iter().position(|t| t == track)
    }

    /// Track after the cursor, honoring the repeat mode
    pub fn peek_next(&self) -> Option<Track> {
        self.next_index().and_then(|i| self.tracks.get(i).cloned())
    }

    /// Advance the cursor and return the new current track
    pub fn next(&mut self) -> Option<Track> {
        let index = self.next_index()?;
        self.position = Some(index);
        self.tracks.get(index).cloned()
    }

    /// Step the cursor back and return the new current track
    ///
    /// At the first track this wraps with [`RepeatMode::All`] and otherwise
    /// stays on the first track.
    pub fn prev(&mut self) -> Option<Track> {
        let position = self.position?;
        let index = match (position, self.repeat) {
            (0, RepeatMode::All) => self.tracks.len().checked_sub(1)?,
            (0, _) => 0,
            (p, RepeatMode::Track) => p,
            (p, _) => p - 1,
        };
        self.position = Some(index);
        self.tracks.get(index).cloned()
    }

    fn next_index(&self) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        let Some(position) = self.position else {
            return Some(0);
        };
        match self.repeat {
            RepeatMode::Track => Some(position),
            _ if position + 1 < self.tracks.len() => Some(position + 1),
            RepeatMode::All => Some(0),
            RepeatMode::Off => None,
        }
    }
}

/// Queue behavior, mirrored from `queue/...` settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Drop queued tracks once they start instead of moving past them
    pub remove_when_played: bool,
    /// Adding to an empty queue while stopped starts playback
    pub enqueue_begins_playback: bool,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            remove_when_played: true,
            enqueue_begins_playback: true,
        }
    }
}

impl QueuePolicy {
    pub fn from_settings(settings: &SettingsManager) -> Self {
        let defaults = Self::default();
        Self {
            remove_when_played: settings
                .get_option("queue/remove_item_when_played", defaults.remove_when_played),
            enqueue_begins_playback: settings.get_option(
                "queue/enqueue_begins_playback",
                defaults.enqueue_begins_playback,
            ),
        }
    }
}

/// User queue spliced in front of the current playlist
#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    /// Tracks explicitly added by the user
    tracks: Vec<Track>,

    /// Next queued track when played items are kept
    cursor: usize,

    /// Playlist that takes over once the queue is used up
    playlist: Option<Playlist>,

    /// Last track handed to the engine
    current: Option<Track>,

    policy: QueuePolicy,
}

impl PlayQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Switch policies; played items still kept are dropped when switching
    /// to removal
    pub fn set_policy(&mut self, policy: QueuePolicy) {
        if policy.remove_when_played && !self.policy.remove_when_played {
            self.tracks.drain(..self.cursor.min(self.tracks.len()));
            self.cursor = 0;
        }
        self.policy = policy;
    }

    /// Queued tracks that have not played yet
    pub fn pending(&self) -> &[Track] {
        &self.tracks[self.head_index().min(self.tracks.len())..]
    }

    /// Number of queued tracks not yet played
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a track to the end of the queue
    pub fn enqueue(&mut self, track: Track) {
        debug!("Enqueued {}", track.uri());
        self.tracks.push(track);
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.cursor = 0;
    }

    /// Remove a pending track by index; returns it
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        let index = self.head_index() + index;
        (index < self.tracks.len()).then(|| self.tracks.remove(index))
    }

    pub fn current_playlist(&self) -> Option<&Playlist> {
        self.playlist.as_ref()
    }

    pub fn current_playlist_mut(&mut self) -> Option<&mut Playlist> {
        self.playlist.as_mut()
    }

    /// Bind the playlist that plays once the queue is empty
    pub fn set_current_playlist(&mut self, playlist: Option<Playlist>) {
        self.playlist = playlist;
    }

    /// Mark `track` as playing after a direct play request
    ///
    /// Moves the playlist cursor onto it if the playlist contains it; the
    /// queue itself is untouched.
    pub fn set_current(&mut self, track: &Track) {
        if let Some(playlist) = &mut self.playlist {
            if let Some(index) = playlist.index_of(track) {
                playlist.set_position(Some(index));
            }
        }
        self.current = Some(track.clone());
    }

    /// Last track handed out
    pub fn current(&self) -> Option<Track> {
        self.current.clone()
    }

    /// What would play next, without moving anything
    pub fn peek_next(&self) -> Option<Track> {
        if let Some(track) = self.tracks.get(self.head_index()) {
            return Some(track.clone());
        }
        self.playlist.as_ref().and_then(Playlist::peek_next)
    }

    /// Record that `track`, obtained from [`peek_next`](Self::peek_next),
    /// started playing
    pub fn commit_next(&mut self, track: &Track) {
        let head = self.head_index();
        if self.tracks.get(head) == Some(track) {
            if self.policy.remove_when_played {
                self.tracks.remove(head);
            } else {
                self.cursor += 1;
            }
        } else if let Some(playlist) = &mut self.playlist {
            if playlist.peek_next().as_ref() == Some(track) {
                playlist.next();
            } else if let Some(index) = playlist.index_of(track) {
                playlist.set_position(Some(index));
            }
        }
        self.current = Some(track.clone());
    }

    /// Consume and return the next track
    pub fn next(&mut self) -> Option<Track> {
        let track = self.peek_next()?;
        self.commit_next(&track);
        Some(track)
    }

    /// Track for a "previous" command
    ///
    /// Early in a track this steps back in the playlist; otherwise, or with
    /// nowhere to step back to, the playing track restarts.
    pub fn prev(&mut self, position_secs: f64, playing: Option<&Track>) -> Option<Track> {
        let Some(playing) = playing else {
            return self.current();
        };

        let track = if position_secs < RESTART_THRESHOLD_SECS {
            self.playlist
                .as_mut()
                .and_then(Playlist::prev)
                .unwrap_or_else(|| playing.clone())
        } else {
            playing.clone()
        };
        self.current = Some(track.clone());
        Some(track)
    }

    fn head_index(&self) -> usize {
        if self.policy.remove_when_played {
            0
        } else {
            self.cursor
        }
    }
}
