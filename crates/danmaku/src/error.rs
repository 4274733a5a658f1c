//! Danmaku error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, DanmakuError>;

/// Errors that can occur while fetching, decoding or rendering danmaku.
#[derive(Error, Debug)]
pub enum DanmakuError {
    /// The comment source failed to deliver bytes (network, auth, HTTP status).
    #[error("Transport error: {0}")]
    Transport(String),

    /// No usable data was returned for a content id.
    #[error("No danmaku data for content {content_id}")]
    NoData { content_id: i64 },

    /// A blob or record could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Protobuf decoding errors
    #[error("Protobuf error: {0}")]
    Prost(#[from] prost::DecodeError),

    /// XML parsing errors
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A load was cancelled before it completed.
    #[error("Load cancelled")]
    Cancelled,

    /// The controller actor is no longer running.
    #[error("Render controller has stopped")]
    ControllerStopped,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DanmakuError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
