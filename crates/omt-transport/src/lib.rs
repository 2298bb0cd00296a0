//! QUIC transport layer for the OMT media protocol.
//!
//! A [`Sender`] listens for connections and fans encoded frames out to
//! every subscribed [`Channel`]; a [`Receiver`] connects, subscribes and
//! surfaces decoded media to the consumer. Channel state machines are
//! transport-agnostic (generic over stream halves); this crate binds them
//! to QUIC bidirectional streams with TLS 1.3.

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod receiver;
pub mod sender;
mod tls;

pub use channel::Channel;
pub use codec::{
    AudioDecoder, AudioEncoder, CodecFactory, PassthroughFactory, VideoDecoder, VideoEncoder,
};
pub use config::{PoolConfig, ReceiverConfig, SenderConfig};
pub use error::{Result, TransportError};
pub use events::ChannelEvent;
pub use receiver::{AudioFrame, MediaFrame, MetadataFrame, Receiver, VideoFrame};
pub use sender::{OutboundAudio, OutboundVideo, Sender};

/// ALPN protocol identifier.
pub const ALPN: &[u8] = b"omt";

/// Default UDP listen port.
pub const DEFAULT_PORT: u16 = 6400;

/// Last port of the dynamic scan range.
pub const PORT_RANGE_END: u16 = 6600;

/// Application error code for aborted streams ("OMT").
pub const STREAM_CLOSE_CODE: u32 = 0x4F4D54;

/// Application error code for closed connections.
pub const CONNECTION_CLOSE_CODE: u32 = 0x4F4D_5400;
