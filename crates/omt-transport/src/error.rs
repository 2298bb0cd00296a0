use thiserror::Error;

/// A type alias for handling `Result`s with `TransportError`
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in the transport layer
#[derive(Error, Debug)]
pub enum TransportError {
    /// Wire-protocol violation from `omt-core`
    #[error("Protocol error: {0}")]
    Protocol(#[from] omt_core::Error),

    /// Stream-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// QUIC connection failed or was lost
    #[error("Connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    /// QUIC connect attempt could not even start
    #[error("Connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    /// TLS configuration failure
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Self-signed certificate generation failed
    #[error("Certificate error: {0}")]
    Certificate(#[from] rcgen::RcgenError),

    /// No free UDP port in the scan range
    #[error("No free port in {start}-{end}")]
    PortRangeExhausted {
        /// First port tried
        start: u16,
        /// Last port tried
        end: u16,
    },

    /// Codec construction or processing failed
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid endpoint configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The channel is no longer usable
    #[error("Channel disconnected")]
    Disconnected,
}
