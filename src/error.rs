//! Error types for the streaming session

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Video error: {0}")]
    Video(#[from] VideoError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio device errors.
///
/// Capture and playback start failures carry one of these so the caller can
/// tell a missing device from a busy one or an unsatisfiable format.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device unavailable (busy or access denied): {0}")]
    Unavailable(String),

    #[error("Unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Audio thread failed: {0}")]
    Thread(String),
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::Unavailable(err.to_string())
            }
            cpal::BuildStreamError::StreamConfigNotSupported
            | cpal::BuildStreamError::InvalidArgument => {
                AudioError::UnsupportedConfig(err.to_string())
            }
            other => AudioError::Stream(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => AudioError::Unavailable(err.to_string()),
            other => AudioError::Stream(other.to_string()),
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                AudioError::Unavailable(err.to_string())
            }
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
                AudioError::UnsupportedConfig(err.to_string())
            }
            other => AudioError::Stream(other.to_string()),
        }
    }
}

/// Sample and image codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Odd PCM16 payload length: {0} bytes")]
    OddPcmLength(usize),

    #[error("Image encoding failed: {0}")]
    ImageEncode(String),

    #[error("Empty frame: {0}x{1}")]
    EmptyFrame(u32, u32),
}

/// Video source errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("No video source configured")]
    NotConfigured,

    #[error("Failed to load image: {0}")]
    Load(String),

    #[error("Camera already running")]
    AlreadyRunning,
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Session task is gone")]
    SessionGone,
}

/// Inbound frame errors; these never tear down the session
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Binary frame is not UTF-8")]
    NotUtf8,
}

/// Tool handler errors, reported back to the peer inside the result payload
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("No handler registered for tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler panicked or was cancelled: {0}")]
    Aborted(String),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid endpoint URL: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("API key variable {0} is not set")]
    MissingApiKey(String),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
