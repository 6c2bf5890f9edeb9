//! Exaile Media Simulation
//!
//! An in-process implementation of the `exaile_core::media` traits whose
//! only notion of time is a shared [`ManualClock`]. Pipelines play "media"
//! registered in a catalog: they advance their position while playing,
//! call about-to-finish shortly before the end, switch URIs gaplessly,
//! post EOS, tags, buffering and errors, and host a sink bin whose real
//! sink can be blocked, unlinked and replaced.
//!
//! Nothing happens between calls to [`SimFramework::tick`] (or
//! [`SimFramework::advance`]), which makes every run reproducible.
//!
//! # Example
//!
//! ```rust
//! use exaile_core::media::{MediaFramework, State};
//! use exaile_media_sim::SimFramework;
//! use std::time::Duration;
//!
//! let sim = SimFramework::new();
//! sim.add_media("file:///a.ogg", 3.0);
//! let playbin = sim.create_playbin("demo").unwrap();
//! playbin.set_uri("file:///a.ogg");
//! playbin.set_state(State::Playing);
//! sim.advance(Duration::from_secs(1));
//! assert_eq!(playbin.query_position().unwrap().mseconds(), 1000);
//! ```

#![forbid(unsafe_code)]

pub mod framework;
pub mod pipeline;
pub mod sink;

pub use exaile_core::ManualClock;
pub use framework::{SimFailure, SimFramework, SimMedia};
pub use pipeline::{SimPipeline, SimSinkBin};
pub use sink::{SimFilter, SimSink};
