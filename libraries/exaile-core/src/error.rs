/// Core error types for Exaile
use thiserror::Error;

/// Result type alias using `ExaileError`
pub type Result<T> = std::result::Result<T, ExaileError>;

/// Core error type for Exaile
#[derive(Error, Debug)]
pub enum ExaileError {
    /// Settings could not be loaded or stored
    #[error("Settings error: {0}")]
    Settings(String),

    /// Settings file written by a newer release
    #[error("Settings version {found} is newer than supported version {supported}")]
    SettingsVersion { found: i64, supported: i64 },

    /// Option key is not of the form `section/key`
    #[error("Invalid option key: {0}")]
    InvalidKey(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Layered configuration errors
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl ExaileError {
    /// Create a settings error
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
