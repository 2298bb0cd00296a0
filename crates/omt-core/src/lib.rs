//! Core wire protocol for the OMT media transport.
//!
//! This crate contains everything that touches bytes but not sockets: the
//! frame model and its wire codec, the reusable frame pool, the typed
//! binary metadata container, the control-document surface, and per-channel
//! statistics. Transport integration lives in `omt-transport`.

pub mod codec;
pub mod control;
pub mod error;
pub mod frame;
pub mod meta;
pub mod pool;
pub mod stats;

pub use codec::{read_header, write_header, CommonHeader, FRAME_HEADER_SIZE};
pub use control::{ControlDocument, SenderInfo};
pub use error::{Error, Result};
pub use frame::{
    AudioHeader, Codec, ColorSpace, Frame, FrameKind, FrameRate, KindMask, Quality, Tally,
    VideoFlags, VideoHeader,
};
pub use meta::{
    AfdBarData, FrameRateIndex, MetadataItem, MetadataReader, MetadataWriter, SpliceMarker,
    Timecode, METADATA_MAGIC,
};
pub use pool::{FramePool, PooledBuffer};
pub use stats::ChannelStatistics;

/// Largest extended-header-plus-payload length accepted for a video frame.
pub const MAX_VIDEO_FRAME: usize = 64 * 1024 * 1024;

/// Largest extended-header-plus-payload length accepted for an audio frame.
pub const MAX_AUDIO_FRAME: usize = 1024 * 1024;

/// Largest extended-header-plus-payload length accepted for a metadata frame.
pub const MAX_METADATA_FRAME: usize = 1024 * 1024;

/// Maximum queued metadata frames per channel before the oldest is dropped.
pub const METADATA_QUEUE_LIMIT: usize = 128;

/// Returns the `E + P` cap for the given frame kind.
pub fn max_frame_len(kind: FrameKind) -> usize {
    match kind {
        FrameKind::Video => MAX_VIDEO_FRAME,
        FrameKind::Audio => MAX_AUDIO_FRAME,
        FrameKind::Metadata => MAX_METADATA_FRAME,
    }
}
