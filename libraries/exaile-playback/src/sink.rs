//! Output sink presets and construction
//!
//! `player/audiosink` selects a preset. `auto` picks a device from the
//! platform's device list by `player/audiosink_device`, `custom` parses
//! `player/custom_sink_pipe`, and the rest name a single sink element.
//! Construction never fails outright: on error an error sink is returned
//! that reports the problem on the bus once audio reaches it.

use crate::error::{PlaybackError, Result};
use exaile_core::media::{AudioDevice, AudioSinkElement, MediaFramework};
use exaile_core::SettingsManager;
use tracing::{debug, error};

/// A selectable output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkPreset {
    /// Value stored in `player/audiosink`
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Sink element factory, if the preset maps to one
    pub pipe: Option<&'static str>,
}

pub const SINK_PRESETS: &[SinkPreset] = &[
    SinkPreset {
        id: "auto",
        name: "Automatic",
        pipe: None,
    },
    SinkPreset {
        id: "alsa",
        name: "ALSA",
        pipe: Some("alsasink"),
    },
    SinkPreset {
        id: "oss",
        name: "OSS",
        pipe: Some("osssink"),
    },
    SinkPreset {
        id: "pulse",
        name: "PulseAudio",
        pipe: Some("pulsesink"),
    },
    SinkPreset {
        id: "jack",
        name: "JACK",
        pipe: Some("jackaudiosink"),
    },
    SinkPreset {
        id: "custom",
        name: "Custom",
        pipe: None,
    },
];

/// Device id that selects the framework's automatic sink
pub const AUTO_DEVICE: &str = "auto";

/// Presets usable with this framework
pub fn sink_presets(framework: &dyn MediaFramework) -> Vec<SinkPreset> {
    SINK_PRESETS
        .iter()
        .filter(|p| p.pipe.map_or(true, |pipe| framework.has_element(pipe)))
        .copied()
        .collect()
}

/// Devices selectable under the `auto` preset, automatic first
pub fn audio_devices(framework: &dyn MediaFramework) -> Vec<AudioDevice> {
    let mut devices = vec![AudioDevice {
        display_name: "Automatic".into(),
        device_id: AUTO_DEVICE.into(),
    }];
    devices.extend(
        framework
            .audio_devices()
            .into_iter()
            .filter(|d| !d.device_id.is_empty()),
    );
    devices
}

/// Build the sink selected by the `section/` settings
pub fn create_sink(
    framework: &dyn MediaFramework,
    settings: &SettingsManager,
    section: &str,
    name: &str,
) -> Box<dyn AudioSinkElement> {
    match try_create_sink(framework, settings, section, name) {
        Ok(sink) => sink,
        Err(e) => {
            let message = match e {
                PlaybackError::Sink(message) => message,
                other => other.to_string(),
            };
            error!("{}", message);
            framework.error_sink(&message, name)
        }
    }
}

/// Build the selected sink, failing instead of substituting an error sink
pub fn try_create_sink(
    framework: &dyn MediaFramework,
    settings: &SettingsManager,
    section: &str,
    name: &str,
) -> Result<Box<dyn AudioSinkElement>> {
    let sink_type: String = settings.get_option(&format!("{}/audiosink", section), "auto".to_string());
    debug!("Creating {} audio sink {}", sink_type, name);

    match sink_type.as_str() {
        "auto" => {
            let device: String = settings.get_option(
                &format!("{}/audiosink_device", section),
                AUTO_DEVICE.to_string(),
            );
            let built = if device == AUTO_DEVICE {
                framework.make_sink("autoaudiosink", name).ok()
            } else {
                framework
                    .audio_devices()
                    .into_iter()
                    .find(|d| d.device_id == device)
                    .and_then(|d| framework.make_device_sink(&d, name).ok())
            };
            built.ok_or_else(|| {
                PlaybackError::sink(format!(
                    "Could not create audiosink (device: {}, type: {})",
                    device, sink_type
                ))
            })
        }
        "custom" => {
            let pipe: String = settings.get_option(&format!("{}/custom_sink_pipe", section), String::new());
            let elements: Vec<String> = pipe
                .split('!')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
            if elements.is_empty() {
                return Err(PlaybackError::sink("No custom pipeline specified!"));
            }
            framework.parse_sink_pipeline(&elements, name).map_err(|e| {
                error!("Custom sink '{}': {}", pipe, e);
                PlaybackError::sink(format!("Error creating custom audiosink '{}'", pipe))
            })
        }
        other => {
            let preset = SINK_PRESETS
                .iter()
                .find(|p| p.id == other && p.pipe.is_some())
                .ok_or_else(|| PlaybackError::sink(format!("Invalid sink type '{}' specified", other)))?;
            let pipe = preset.pipe.unwrap_or_default();
            framework
                .make_sink(pipe, name)
                .map_err(|_| PlaybackError::sink(format!("Could not create sink type '{}'", pipe)))
        }
    }
}
