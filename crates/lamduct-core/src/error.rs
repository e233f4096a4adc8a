//! Transport errors.

/// Failure to move a frame across a byte stream.
///
/// A corrupted stream cannot be resynchronized, so every variant is fatal to
/// the transport that produced it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("stream closed before a complete frame ({buffered} bytes buffered)")]
    UnexpectedEof { buffered: usize },
    #[error("invalid frame length prefix: {0:?}")]
    InvalidLength(String),
    #[error("frame header exceeds {0} bytes without a ':' separator")]
    HeaderTooLong(usize),
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("frame payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame payload is not a JSON object")]
    NotAnObject,
    #[error("transport is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
