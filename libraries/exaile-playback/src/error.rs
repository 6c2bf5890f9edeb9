/// Error types for the playback engine
use exaile_core::media::MediaError;
use exaile_core::ExaileError;
use thiserror::Error;

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Playback errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// No track is loaded
    #[error("No track loaded")]
    NoTrackLoaded,

    /// Pipeline did not reach a seekable state in time
    #[error("Seek rejected: pipeline not ready")]
    SeekRejected,

    /// Output sink could not be built or switched
    #[error("Sink error: {0}")]
    Sink(String),

    /// Unknown `player/audiosink` preset
    #[error("Unknown audio sink preset: {0}")]
    UnknownPreset(String),

    /// Framework reported a failure
    #[error("Media framework error: {0}")]
    Media(#[from] MediaError),

    /// Settings or other core failure
    #[error(transparent)]
    Core(#[from] ExaileError),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl PlaybackError {
    /// Create a sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }
}
