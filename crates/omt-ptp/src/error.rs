use thiserror::Error;

/// A type alias for handling `Result`s with `PtpError`
pub type Result<T> = std::result::Result<T, PtpError>;

/// Errors raised by the PTP subsystem
#[derive(Error, Debug)]
pub enum PtpError {
    /// Datagram shorter than the structure being decoded
    #[error("Truncated PTP message: required {required} bytes, got {available}")]
    Truncated {
        /// Bytes required by the decoder
        required: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Not a PTPv2 message
    #[error("Unsupported PTP version: {0}")]
    UnsupportedVersion(u8),

    /// Message type this follower does not recognize
    #[error("Unknown PTP message type: {0:#03x}")]
    UnknownMessageType(u8),

    /// Socket-level failure
    #[error("PTP socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Follower is already running
    #[error("PTP follower already started")]
    AlreadyStarted,
}
