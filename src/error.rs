use thiserror::Error;

use crate::types::Axis;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors that can occur while bridging an amplifier to the host
#[derive(Error, Debug)]
pub enum AdapterError {
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Control API answered with a status the call does not accept
    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// Control API payload did not have the expected shape
    #[error("Malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    /// No stable identity token can be derived for a device
    #[error("Cannot derive identity for device {device_id}: {reason}")]
    Identity { device_id: String, reason: String },

    /// Input rejected locally, no call was issued
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A control write failed or was not acknowledged
    #[error("{axis} command for {device_id} failed: {reason}")]
    Command {
        device_id: String,
        axis: Axis,
        reason: String,
    },

    /// Inbound event payload could not be decoded
    #[error("Malformed event on {topic} ({payload:?}): {reason}")]
    MalformedEvent {
        topic: String,
        payload: String,
        reason: String,
    },

    /// MQTT client request could not be queued
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Event channel was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration could not be loaded
    #[error("Config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for AdapterError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Coarse error category, used to decide how far an error may propagate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    MalformedResponse,
    Identity,
    Validation,
    Command,
    MalformedEvent,
    Config,
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_)
            | Self::UnexpectedStatus { .. }
            | Self::Mqtt(_)
            | Self::ConnectionClosed
            | Self::ChannelError(_) => ErrorKind::Transport,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::Identity { .. } => ErrorKind::Identity,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Command { .. } => ErrorKind::Command,
            Self::MalformedEvent { .. } => ErrorKind::MalformedEvent,
            Self::Config(_) | Self::Figment(_) => ErrorKind::Config,
        }
    }
}
