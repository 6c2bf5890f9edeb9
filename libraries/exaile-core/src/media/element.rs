//! Framework element traits
//!
//! Objects behind these traits are shared with framework worker threads, so
//! every method takes `&self` and implementations use interior mutability.
//! Callbacks registered here may fire on any thread.

use super::{BusMessage, ClockTime, MediaResult, State, StateChangeReturn};
use crate::clock::Clock;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Receives every message posted on a pipeline's bus
pub type BusHandler = Box<dyn Fn(BusMessage) + Send + Sync>;

/// Called shortly before the current URI runs out; may set the next URI
pub type AboutToFinishHandler = Box<dyn Fn(&dyn Pipeline) + Send + Sync>;

/// Called when the output volume changed behind our back
pub type VolumeHandler = Box<dyn Fn(f64) + Send + Sync>;

/// Called when the device actually backing a sink changes
pub type DeviceNotifyHandler = Box<dyn Fn(Option<String>) + Send + Sync>;

/// A decode-and-play pipeline for one URI at a time
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;

    /// Set the URI to play. While pre-rolled or playing this queues the
    /// next URI for a gapless switch instead.
    fn set_uri(&self, uri: &str);

    fn uri(&self) -> Option<String>;

    fn set_state(&self, state: State) -> StateChangeReturn;

    /// Wait up to `timeout` for a pending state change and report the
    /// current state
    fn get_state(&self, timeout: Duration) -> (StateChangeReturn, State);

    fn query_position(&self) -> Option<ClockTime>;

    fn query_duration(&self) -> Option<ClockTime>;

    /// Flushing seek to an absolute position
    fn seek(&self, position: ClockTime) -> bool;

    fn set_volume(&self, volume: f64);

    fn volume(&self) -> f64;

    /// Replace the audio-filter chain; only allowed in [`State::Null`]
    fn set_audio_filter(&self, filters: Vec<Box<dyn FilterElement>>) -> MediaResult<()>;

    /// The compound sink that hosts the real output sink
    fn audio_sink_bin(&self) -> Arc<dyn SinkBin>;

    fn set_bus_watch(&self, handler: BusHandler);

    fn remove_bus_watch(&self);

    fn connect_about_to_finish(&self, handler: AboutToFinishHandler);

    fn connect_volume_notify(&self, handler: VolumeHandler);

    /// Drop every signal handler registered on this pipeline
    fn disconnect_signals(&self);

    /// Write a graphviz description of the pipeline to `dir/name.dot`
    fn dump_dot(&self, dir: &Path, name: &str) -> std::io::Result<PathBuf>;
}

/// Compound sink with one sink pad and a replaceable real sink inside
pub trait SinkBin: Send + Sync {
    fn name(&self) -> &str;

    /// Add `sink` to the bin and link it to the bin's pad
    fn add_and_link(&self, sink: &dyn AudioSinkElement) -> MediaResult<()>;

    fn unlink_and_remove(&self, sink: &dyn AudioSinkElement);

    /// Flushing seek issued from inside the bin
    fn flushing_seek(&self, position: ClockTime) -> bool;

    /// Block data flow on the bin's pad and run `on_blocked` from the
    /// streaming thread once it is blocked; the block is released when the
    /// callback returns
    fn block_downstream(&self, on_blocked: Box<dyn FnOnce() + Send>);

    /// Post an error on the owning pipeline's bus
    fn post_error(&self, message: &str, debug: &str);
}

/// A real output sink
pub trait AudioSinkElement: Send + Sync {
    fn name(&self) -> &str;

    fn factory_name(&self) -> &str;

    fn set_state(&self, state: State) -> StateChangeReturn;

    /// Current state, waiting up to `timeout` for pending changes
    fn state(&self, timeout: Duration) -> State;

    fn sync_state_with_parent(&self) -> bool;

    fn query_position(&self) -> Option<ClockTime>;

    /// Select an output device; false if the sink has no device property
    fn set_device(&self, _device: &str) -> bool {
        false
    }

    /// Device requested through [`set_device`](Self::set_device)
    fn device(&self) -> Option<String> {
        None
    }

    /// Whether the sink reports the device actually in use
    fn has_current_device(&self) -> bool {
        false
    }

    fn current_device(&self) -> Option<String> {
        None
    }

    fn connect_current_device_notify(&self, _handler: DeviceNotifyHandler) {}

    fn as_any(&self) -> &dyn Any;
}

/// An element inserted into the audio-filter chain
pub trait FilterElement: Send + Sync {
    fn name(&self) -> &str;

    fn factory_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// An output device offered by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// Human readable name
    pub display_name: String,
    /// Identifier stored in `player/audiosink_device`
    pub device_id: String,
}

/// How a plugin-install request started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStart {
    Started,
    HelperMissing,
    InstallInProgress,
    InternalFailure,
}

/// How a plugin-install request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallResult {
    Success,
    PartialSuccess,
    NotFound,
    Error,
    Crashed,
    UserAbort,
    InternalFailure,
}

/// Platform helper that installs missing plugins
pub trait PluginInstaller: Send + Sync {
    /// Start installing the plugins described by `details`;
    /// `on_done` runs on an arbitrary thread
    fn install(
        &self,
        details: &[String],
        on_done: Box<dyn FnOnce(InstallResult) + Send>,
    ) -> InstallStart;
}

/// Entry point into a framework implementation
pub trait MediaFramework: Send + Sync {
    /// Clock shared by the framework and the player's main loop
    fn clock(&self) -> Arc<dyn Clock>;

    fn create_playbin(&self, name: &str) -> MediaResult<Arc<dyn Pipeline>>;

    /// Whether an element factory is available
    fn has_element(&self, factory: &str) -> bool;

    fn make_sink(&self, factory: &str, name: &str) -> MediaResult<Box<dyn AudioSinkElement>>;

    /// Build a sink from a chain of element descriptions linked in order
    fn parse_sink_pipeline(
        &self,
        elements: &[String],
        name: &str,
    ) -> MediaResult<Box<dyn AudioSinkElement>>;

    fn make_filter(&self, factory: &str, name: &str) -> MediaResult<Box<dyn FilterElement>>;

    /// Sink that posts `message` as an error as soon as data reaches it
    fn error_sink(&self, message: &str, name: &str) -> Box<dyn AudioSinkElement>;

    /// Output devices known to the platform
    fn audio_devices(&self) -> Vec<AudioDevice>;

    /// Sink factory that renders to a listed device
    fn make_device_sink(
        &self,
        device: &AudioDevice,
        name: &str,
    ) -> MediaResult<Box<dyn AudioSinkElement>>;

    fn plugin_installer(&self) -> Option<Arc<dyn PluginInstaller>> {
        None
    }
}
