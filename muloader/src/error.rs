//! Error types for muloader.

use std::io;
use thiserror::Error;

/// Result type for muloader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for muloader operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (payload file, serial port reads and writes).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A byte on the link that is not a known status code.
    #[error("Unknown status code: 0x{0:02X}")]
    UnknownCode(u8),

    /// The payload has no bytes to upload.
    #[error("Payload is empty")]
    EmptyPayload,

    /// A blocking read on the link did not complete in time.
    #[error("Link timeout: {0}")]
    LinkTimeout(String),

    /// Transport failure on the link (closed port, short write).
    #[error("Link error: {0}")]
    Link(String),

    /// The tag metadata reported by the device could not be parsed.
    #[error("Metadata parse error: {0}")]
    MetadataParse(String),

    /// Protocol violation, or an anomaly escalated in strict mode.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The embedding application requested the upload to stop.
    #[error("Interrupted")]
    Interrupted,
}
