//! Error types for chime-core.

use thiserror::Error;

/// Main error type for the chime-core library.
#[derive(Error, Debug)]
pub enum Error {
    // Config errors
    #[error("Failed to load config '{0}': {1}")]
    ConfigLoad(String, String),

    #[error("Failed to parse config '{0}': {1}")]
    ConfigParse(String, String),

    #[error("Config validation error in '{0}': {1}")]
    ConfigValidation(String, String),

    // Sound reference errors
    #[error("Invalid sound reference: {0:?}")]
    InvalidSoundRef(String),

    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Sound file not found: {0}")]
    SoundFileNotFound(String),

    // Engine errors
    #[error("Failed to load asset {0}: {1}")]
    AssetLoad(String, String),

    #[error("No audio output device available")]
    NoAudioDevice,

    #[error("Failed to play sound: {0}")]
    SoundPlayback(String),

    // Registry errors
    #[error("Playback registry already initialized")]
    RegistryAlreadyInitialized,

    // Generic errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
