//! Exaile Playback
//!
//! Gapless and crossfading playback on top of a streaming multimedia
//! framework.
//!
//! This crate provides:
//! - Hot-swappable audio output (`DynamicAudioSink`)
//! - Per-track fade in/out and start/stop offsets (`TrackFader`)
//! - A single playbin wrapper with tag and error handling (`AudioStream`)
//! - Two-stream engine with gapless, crossfade and user-fade transitions
//! - Play queue, auto-advance policy and play statistics (`Player`)
//! - Session save/restore
//!
//! # Architecture
//!
//! The engine never spawns threads. Framework callbacks only post
//! [`LoopEvent`]s to a channel; everything else happens when the owner
//! calls [`Player::iterate`]. Timers (fades, delayed starts, sink release)
//! live on the same loop, driven by the framework's clock.
//!
//! # Example
//!
//! ```rust,no_run
//! use exaile_core::{EventBus, SettingsManager, Track};
//! use exaile_core::media::MediaFramework;
//! use exaile_playback::Player;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn framework() -> Arc<dyn MediaFramework> { unimplemented!() }
//! let events = EventBus::new();
//! let settings = Arc::new(SettingsManager::new().with_events(events.clone()));
//! let mut player = Player::new(framework(), settings, events)?;
//!
//! player.enqueue(Track::new("file:///music/a.flac"));
//! player.enqueue(Track::new("file:///music/b.flac"));
//! player.run_for(Duration::from_secs(5));
//! player.next();
//! # Ok::<(), exaile_playback::PlaybackError>(())
//! ```

pub mod dynamic_sink;
pub mod engine;
mod error;
pub mod fader;
pub mod filters;
pub mod mainloop;
pub mod missing_plugin;
mod player;
pub mod queue;
pub mod session;
pub mod sink;
pub mod stream;
pub mod tags;
pub mod types;

// Public exports
pub use dynamic_sink::DynamicAudioSink;
pub use engine::{EngineHost, PlaybackEngine};
pub use error::{PlaybackError, Result};
pub use fader::{FadeState, TrackFader};
pub use filters::{AudioFilterProvider, AudioFilters, ElementFilter};
pub use mainloop::{LoopEvent, MainLoop, Scheduler, StreamId, TimerId, TimerTask};
pub use player::{Player, PlayerOptions};
pub use queue::{PlayQueue, Playlist, QueuePolicy, RepeatMode};
pub use session::SessionState;
pub use stream::{AudioStream, StreamContext, StreamNotice};
pub use types::{EngineConfig, PlayRequest, PlayerState};
