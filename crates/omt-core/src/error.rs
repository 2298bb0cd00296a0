use thiserror::Error;

use crate::frame::FrameKind;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding protocol data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Frame header did not start with the protocol magic
    #[error("Frame magic mismatch: got {0:02X} {1:02X}")]
    MagicMismatch(u8, u8),

    /// Frame kind tag outside the known set
    #[error("Unknown frame kind tag: {0:#04x}")]
    UnknownKind(u8),

    /// Codec tag outside the known set
    #[error("Unknown codec tag: {0:#04x}")]
    UnknownCodec(u8),

    /// Declared frame length exceeds the cap for its kind
    #[error("Declared {kind} frame length {declared} exceeds the cap of {max} bytes")]
    LengthOverflow {
        /// Kind of the offending frame
        kind: FrameKind,
        /// Declared `E + P` length
        declared: usize,
        /// Cap for this kind
        max: usize,
    },

    /// Not enough bytes to decode the requested structure
    #[error("Buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall {
        /// Bytes required by the decoder
        required: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Typed-metadata item stream is not well formed
    #[error("Malformed metadata stream: {0}")]
    InvalidMetadata(String),

    /// Control document could not be parsed
    #[error("Invalid control document: {0}")]
    InvalidControl(String),

    /// Invalid parameter supplied by the caller
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The frame pool has no buffer available
    #[error("Frame pool exhausted")]
    PoolExhausted,
}
