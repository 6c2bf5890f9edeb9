//! Named events
//!
//! Components publish fire-and-forget notifications on an [`EventBus`];
//! listeners subscribe by event name, optionally narrowed to one track.
//! Callbacks run synchronously on the emitting thread, outside the bus lock,
//! so a callback may itself subscribe, unsubscribe or emit.

use crate::track::Track;
use crossbeam_channel::{unbounded, Receiver};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Coarse classification of playback failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackErrorKind {
    /// A decoder or other plugin is not installed
    MissingPlugin,
    /// The output device failed or went away
    Device,
    /// The media could not be read
    Stream,
    /// Anything else reported by the framework
    Internal,
}

/// Events published by the player and its collaborators
#[derive(Debug, Clone)]
pub enum Event {
    /// A track became the current track
    PlaybackTrackStart {
        /// The track now playing
        track: Track,
    },

    /// A track stopped being the current track
    PlaybackTrackEnd {
        /// The outgoing track
        track: Track,
        /// True when nothing follows (user stop or exhausted queue)
        stopped: bool,
    },

    /// Playback started from a stopped player
    PlaybackPlayerStart {
        /// The first track
        track: Track,
    },

    /// Auto-advance ran out of tracks
    PlaybackPlayerEnd {
        /// The last track played
        track: Track,
    },

    /// Playback paused
    PlaybackPlayerPause {
        /// The paused track
        track: Track,
    },

    /// Playback resumed after a pause
    PlaybackPlayerResume {
        /// The resumed track
        track: Track,
    },

    /// Pause state flipped in either direction
    PlaybackTogglePause {
        /// The current track
        track: Track,
        /// New pause state
        paused: bool,
    },

    /// Network buffering progress
    PlaybackBuffering {
        /// Fill level, 0-100
        percent: u32,
    },

    /// Something went wrong during playback
    PlaybackError {
        /// Coarse error class
        kind: PlaybackErrorKind,
        /// Short human-readable message
        message: String,
    },

    /// The current track was seeked
    PlaybackSeeked {
        /// New position in seconds
        position: f64,
    },

    /// Tags of a track changed
    TrackTagsChanged {
        /// The modified track
        track: Track,
        /// Names of the changed tags
        tags: Vec<String>,
    },

    /// The queue moved on to a new track
    TrackChange {
        /// The new current track
        track: Track,
    },

    /// A setting was written
    OptionSet {
        /// Full `section/key` name
        key: String,
    },
}

impl Event {
    /// Canonical event name used for subscriptions and logging
    pub fn name(&self) -> &'static str {
        match self {
            Event::PlaybackTrackStart { .. } => "playback_track_start",
            Event::PlaybackTrackEnd { .. } => "playback_track_end",
            Event::PlaybackPlayerStart { .. } => "playback_player_start",
            Event::PlaybackPlayerEnd { .. } => "playback_player_end",
            Event::PlaybackPlayerPause { .. } => "playback_player_pause",
            Event::PlaybackPlayerResume { .. } => "playback_player_resume",
            Event::PlaybackTogglePause { .. } => "playback_toggle_pause",
            Event::PlaybackBuffering { .. } => "playback_buffering",
            Event::PlaybackError { .. } => "playback_error",
            Event::PlaybackSeeked { .. } => "playback_seeked",
            Event::TrackTagsChanged { .. } => "track_tags_changed",
            Event::TrackChange { .. } => "track_change",
            Event::OptionSet { .. } => "option_set",
        }
    }

    /// Track the event is about, if any
    pub fn track(&self) -> Option<&Track> {
        match self {
            Event::PlaybackTrackStart { track }
            | Event::PlaybackTrackEnd { track, .. }
            | Event::PlaybackPlayerStart { track }
            | Event::PlaybackPlayerEnd { track }
            | Event::PlaybackPlayerPause { track }
            | Event::PlaybackPlayerResume { track }
            | Event::PlaybackTogglePause { track, .. }
            | Event::TrackTagsChanged { track, .. }
            | Event::TrackChange { track } => Some(track),
            Event::PlaybackBuffering { .. }
            | Event::PlaybackError { .. }
            | Event::PlaybackSeeked { .. }
            | Event::OptionSet { .. } => None,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    name: Option<&'static str>,
    track: Option<Track>,
    callback: Callback,
}

impl Subscriber {
    fn matches(&self, event: &Event) -> bool {
        if self.name.is_some_and(|name| name != event.name()) {
            return false;
        }
        match &self.track {
            Some(track) => event.track() == Some(track),
            None => true,
        }
    }
}

#[derive(Default)]
struct BusInner {
    next_id: SubscriptionId,
    subscribers: Vec<Subscriber>,
}

/// Publish/subscribe hub; clones share the same subscriber list
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event name, or to everything with `None`
    pub fn subscribe<F>(&self, name: Option<&'static str>, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add(name, None, Arc::new(callback))
    }

    /// Subscribe to events about a single track
    pub fn subscribe_track<F>(
        &self,
        name: Option<&'static str>,
        track: Track,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add(name, Some(track), Arc::new(callback))
    }

    /// Deliver matching events into a channel instead of a callback
    ///
    /// Used to hand events over to a thread that owns non-`Sync` state.
    pub fn channel(&self, name: Option<&'static str>) -> (SubscriptionId, Receiver<Event>) {
        let (tx, rx) = unbounded();
        let id = self.subscribe(name, move |event| {
            // receiver gone means the listener was dropped
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != id);
        inner.subscribers.len() != before
    }

    /// Publish an event to every matching subscriber
    pub fn emit(&self, event: Event) {
        let callbacks: Vec<Callback> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .subscribers
                .iter()
                .filter(|s| s.matches(&event))
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        trace!(event = event.name(), listeners = callbacks.len(), "emit");

        for callback in callbacks {
            callback(&event);
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }

    fn add(&self, name: Option<&'static str>, track: Option<Track>, callback: Callback) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Subscriber {
            id,
            name,
            track,
            callback,
        });
        id
    }
}
