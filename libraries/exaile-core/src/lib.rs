//! Exaile Core
//!
//! Shared building blocks for the Exaile playback engine.
//!
//! # Architecture
//!
//! - **Track**: read-only handle with the handful of tags the engine reads
//! - **Events**: named publish/subscribe bus
//! - **Settings**: typed `section/key` options with change notification
//! - **Media**: the narrow interface through which the engine drives a
//!   streaming multimedia framework
//! - **Clock**: monotonic time shared by timers and pipelines
//!
//! # Example
//!
//! ```rust
//! use exaile_core::{Event, EventBus, SettingsManager, Track};
//!
//! let bus = EventBus::new();
//! let settings = SettingsManager::new().with_events(bus.clone());
//! bus.subscribe(Some("option_set"), |event| println!("{:?}", event));
//! settings.set_option("player/crossfading", true).unwrap();
//!
//! let track = Track::with_length("file:///music/song.flac", 215.0);
//! assert_eq!(track.length(), Some(215.0));
//! ```

#![forbid(unsafe_code)]

pub mod clock;
pub mod error;
pub mod event;
pub mod logging;
pub mod media;
pub mod settings;
pub mod track;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ExaileError, Result};
pub use event::{Event, EventBus, PlaybackErrorKind, SubscriptionId};
pub use settings::{FromSettingValue, SettingValue, SettingsManager, SettingsWatch};
pub use track::{TagUpdate, TagValue, Track};
