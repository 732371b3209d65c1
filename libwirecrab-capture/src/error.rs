use std::io;

use thiserror::Error;

/// Errors preventing a capture from starting
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied on {device}: {reason} (are you running with CAP_NET_RAW?)")]
    PermissionDenied { device: String, reason: String },
    #[error("could not launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("capture source error: {0}")]
    Source(String),
    #[error("recording error: {0}")]
    Recording(#[from] libwirecrab_tools::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors reading decoded records from an external decoder
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("missing fields: expected {expected}, found {found}")]
    MissingFields { expected: usize, found: usize },
    #[error("truncated record at end of stream")]
    Truncated,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// Return true if the stream can still produce records after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StreamError::Io(_))
    }
}

/// Errors of a packet details lookup
#[derive(Debug, Error)]
pub enum DetailsError {
    #[error("no capture recording available")]
    NoRecording,
    #[error("frame {0} not found")]
    NotFound(u64),
    #[error("decode failed: {0}")]
    Decode(String),
}
