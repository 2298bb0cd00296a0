//! Frame model: kinds, codec tags, extended headers and the assembled
//! [`Frame`] that travels between channel and consumer.
//!
//! A `Frame` owns one pooled buffer holding the complete wire image
//! (`common header | extended header | payload`), so sending a frame is a
//! single contiguous write and receiving one never re-copies the payload.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::codec::{self, CommonHeader, FRAME_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::pool::{FramePool, PooledBuffer};

/// Frame kinds carried on the wire. A closed set: the kind tags both the
/// header and the subscription mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Video frame (compressed or raw)
    Video,
    /// Multi-channel audio frame
    Audio,
    /// Metadata frame (control XML or typed item stream)
    Metadata,
}

impl FrameKind {
    /// Wire tag for this kind
    pub fn to_wire(self) -> u8 {
        match self {
            FrameKind::Video => 1,
            FrameKind::Audio => 2,
            FrameKind::Metadata => 3,
        }
    }

    /// Parse a wire tag. Tags outside the set are fatal for the channel.
    pub fn from_wire(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(FrameKind::Video),
            2 => Ok(FrameKind::Audio),
            3 => Ok(FrameKind::Metadata),
            other => Err(Error::UnknownKind(other)),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Video => write!(f, "video"),
            FrameKind::Audio => write!(f, "audio"),
            FrameKind::Metadata => write!(f, "metadata"),
        }
    }
}

/// A set of frame kinds, kept per channel as the peer's subscription mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KindMask(u8);

impl KindMask {
    /// The empty mask
    pub const NONE: KindMask = KindMask(0);

    /// Mask containing every kind
    pub const ALL: KindMask = KindMask(0b111);

    fn bit(kind: FrameKind) -> u8 {
        1 << (kind.to_wire() - 1)
    }

    /// Whether `kind` is in the set
    pub fn contains(self, kind: FrameKind) -> bool {
        self.0 & Self::bit(kind) != 0
    }

    /// Add `kind` to the set
    pub fn insert(&mut self, kind: FrameKind) {
        self.0 |= Self::bit(kind);
    }

    /// Remove `kind` from the set
    pub fn remove(&mut self, kind: FrameKind) {
        self.0 &= !Self::bit(kind);
    }

    /// Whether the set is empty
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Codec tags carried in the frame header. A fixed enum on the wire; there
/// is no codec negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Raw planar/packed samples, no compression
    Raw,
    /// VMX1 mezzanine video
    Vmx1,
    /// AV1 video
    Av1,
    /// Opus audio
    Opus,
    /// Planar 32-bit float audio passthrough
    PlanarFloat,
}

impl Codec {
    /// Wire tag for this codec
    pub fn to_wire(self) -> u8 {
        match self {
            Codec::Raw => 0x00,
            Codec::Vmx1 => 0x01,
            Codec::Av1 => 0x02,
            Codec::Opus => 0x10,
            Codec::PlanarFloat => 0x11,
        }
    }

    /// Parse a wire tag
    pub fn from_wire(tag: u8) -> Result<Self> {
        match tag {
            0x00 => Ok(Codec::Raw),
            0x01 => Ok(Codec::Vmx1),
            0x02 => Ok(Codec::Av1),
            0x10 => Ok(Codec::Opus),
            0x11 => Ok(Codec::PlanarFloat),
            other => Err(Error::UnknownCodec(other)),
        }
    }

    /// Whether payloads with this tag are already compressed and can be
    /// fanned out without re-encoding.
    pub fn is_compressed(self) -> bool {
        matches!(self, Codec::Vmx1 | Codec::Av1 | Codec::Opus)
    }
}

/// Encoder profile hint advertised by a receiving peer. Ordered: the sender
/// honours the highest hint across all connected channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Quality {
    /// Let the sender decide
    #[default]
    Default,
    /// Lowest bitrate profile
    Low,
    /// Balanced profile
    Medium,
    /// Highest quality profile
    High,
}

impl Quality {
    /// Name used in the `SuggestedQuality` control document
    pub fn as_name(self) -> &'static str {
        match self {
            Quality::Default => "Default",
            Quality::Low => "Low",
            Quality::Medium => "Medium",
            Quality::High => "High",
        }
    }

    /// Parse the name used in the `SuggestedQuality` control document
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Default" => Some(Quality::Default),
            "Low" => Some(Quality::Low),
            "Medium" => Some(Quality::Medium),
            "High" => Some(Quality::High),
            _ => None,
        }
    }
}

/// On-air state of a source in a production switcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    /// Source is cued on the preview bus
    pub preview: bool,
    /// Source is live on the program bus
    pub program: bool,
}

impl Tally {
    /// Both flags clear
    pub const NONE: Tally = Tally { preview: false, program: false };

    pub fn new(preview: bool, program: bool) -> Self {
        Self { preview, program }
    }
}

/// Colorspace of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    /// ITU-R BT.601 (SD)
    Bt601,
    /// ITU-R BT.709 (HD)
    #[default]
    Bt709,
    /// ITU-R BT.2020 (UHD)
    Bt2020,
}

impl ColorSpace {
    fn to_wire(self) -> u32 {
        match self {
            ColorSpace::Bt601 => 0,
            ColorSpace::Bt709 => 1,
            ColorSpace::Bt2020 => 2,
        }
    }

    fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ColorSpace::Bt601),
            1 => Ok(ColorSpace::Bt709),
            2 => Ok(ColorSpace::Bt2020),
            other => Err(Error::InvalidParameter(format!(
                "unknown colorspace tag {other}"
            ))),
        }
    }
}

/// Per-frame video flag bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoFlags(u32);

impl VideoFlags {
    /// Payload carries an alpha plane
    pub const ALPHA: VideoFlags = VideoFlags(1 << 0);
    /// Frame is interlaced (two woven fields)
    pub const INTERLACED: VideoFlags = VideoFlags(1 << 1);
    /// Samples are more than 8 bits deep
    pub const HIGH_BIT_DEPTH: VideoFlags = VideoFlags(1 << 2);
    /// Frame is a reduced-fidelity preview encode
    pub const PREVIEW: VideoFlags = VideoFlags(1 << 3);

    /// Raw bit value
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Reconstruct from raw bits; unknown bits are preserved
    pub fn from_bits(bits: u32) -> Self {
        VideoFlags(bits)
    }

    /// Whether all bits of `other` are set in `self`
    pub fn contains(self, other: VideoFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set all bits of `other`
    pub fn insert(&mut self, other: VideoFlags) {
        self.0 |= other.0;
    }

    /// Clear all bits of `other`
    pub fn remove(&mut self, other: VideoFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for VideoFlags {
    type Output = VideoFlags;
    fn bitor(self, rhs: VideoFlags) -> VideoFlags {
        VideoFlags(self.0 | rhs.0)
    }
}

/// Frame rate as a rational number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRate {
    /// Numerator, e.g. 30000
    pub num: u32,
    /// Denominator, e.g. 1001
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Nominal interval between frames in 100 ns units.
    pub fn interval_100ns(&self) -> i64 {
        if self.num == 0 {
            return 0;
        }
        (10_000_000i64 * self.den as i64) / self.num as i64
    }
}

/// Video extended header, 36 bytes on the wire (little-endian).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoHeader {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame rate
    pub frame_rate: FrameRate,
    /// Display aspect ratio (e.g. 16/9)
    pub aspect_ratio: f32,
    /// Flag bitset
    pub flags: VideoFlags,
    /// Colorspace
    pub colorspace: ColorSpace,
    /// Codec (mirrors the common-header tag)
    pub codec: Codec,
}

impl VideoHeader {
    /// Wire size including the frame-metadata trailer length field.
    pub const WIRE_SIZE: usize = 36;

    /// Serialize, appending the trailer length recorded by the sender.
    pub fn write(&self, buf: &mut impl BufMut, metadata_len: u32) {
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        buf.put_u32_le(self.frame_rate.num);
        buf.put_u32_le(self.frame_rate.den);
        buf.put_f32_le(self.aspect_ratio);
        buf.put_u32_le(self.flags.bits());
        buf.put_u32_le(self.colorspace.to_wire());
        buf.put_u32_le(self.codec.to_wire() as u32);
        buf.put_u32_le(metadata_len);
    }

    /// Parse from the extended-header bytes. Returns the header and the
    /// frame-metadata trailer length.
    pub fn parse(buf: &mut impl Buf) -> Result<(Self, u32)> {
        if buf.remaining() < Self::WIRE_SIZE {
            return Err(Error::BufferTooSmall {
                required: Self::WIRE_SIZE,
                available: buf.remaining(),
            });
        }
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let num = buf.get_u32_le();
        let den = buf.get_u32_le();
        let aspect_ratio = buf.get_f32_le();
        let flags = VideoFlags::from_bits(buf.get_u32_le());
        let colorspace = ColorSpace::from_wire(buf.get_u32_le())?;
        let codec = Codec::from_wire(buf.get_u32_le() as u8)?;
        let metadata_len = buf.get_u32_le();
        Ok((
            Self {
                width,
                height,
                frame_rate: FrameRate::new(num, den),
                aspect_ratio,
                flags,
                colorspace,
                codec,
            },
            metadata_len,
        ))
    }
}

/// Audio extended header, 24 bytes on the wire (little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u32,
    /// Samples per channel in this frame
    pub samples_per_channel: u32,
    /// Bitmask of channels that carry signal
    pub channel_mask: u32,
    /// Codec (mirrors the common-header tag)
    pub codec: Codec,
}

impl AudioHeader {
    /// Wire size including the frame-metadata trailer length field.
    pub const WIRE_SIZE: usize = 24;

    /// Serialize, appending the trailer length recorded by the sender.
    pub fn write(&self, buf: &mut impl BufMut, metadata_len: u32) {
        buf.put_u32_le(self.sample_rate);
        buf.put_u32_le(self.channels);
        buf.put_u32_le(self.samples_per_channel);
        buf.put_u32_le(self.channel_mask);
        buf.put_u32_le(self.codec.to_wire() as u32);
        buf.put_u32_le(metadata_len);
    }

    /// Parse from the extended-header bytes. Returns the header and the
    /// frame-metadata trailer length.
    pub fn parse(buf: &mut impl Buf) -> Result<(Self, u32)> {
        if buf.remaining() < Self::WIRE_SIZE {
            return Err(Error::BufferTooSmall {
                required: Self::WIRE_SIZE,
                available: buf.remaining(),
            });
        }
        let sample_rate = buf.get_u32_le();
        let channels = buf.get_u32_le();
        let samples_per_channel = buf.get_u32_le();
        let channel_mask = buf.get_u32_le();
        let codec = Codec::from_wire(buf.get_u32_le() as u8)?;
        let metadata_len = buf.get_u32_le();
        Ok((
            Self {
                sample_rate,
                channels,
                samples_per_channel,
                channel_mask,
                codec,
            },
            metadata_len,
        ))
    }
}

/// An assembled frame backed by one pooled buffer holding the complete wire
/// image. Dropping the frame returns the buffer to its originating pool.
#[derive(Debug)]
pub struct Frame {
    kind: FrameKind,
    codec: Codec,
    preview: bool,
    timestamp: i64,
    video: Option<VideoHeader>,
    audio: Option<AudioHeader>,
    metadata_len: usize,
    ext_len: usize,
    payload_len: usize,
    data: PooledBuffer,
}

impl Frame {
    /// Assemble a video frame: `payload` is the (possibly compressed) media
    /// bytes and `frame_metadata` the per-frame trailer appended after them.
    pub fn build_video(
        pool: &Arc<FramePool>,
        header: &VideoHeader,
        timestamp: i64,
        payload: &[u8],
        frame_metadata: &[u8],
    ) -> Result<Frame> {
        let payload_len = payload.len() + frame_metadata.len();
        Self::check_cap(FrameKind::Video, VideoHeader::WIRE_SIZE, payload_len)?;

        let mut data = pool.acquire().ok_or(Error::PoolExhausted)?;
        data.clear();
        let common = CommonHeader {
            kind: FrameKind::Video,
            codec: header.codec,
            ext_len: VideoHeader::WIRE_SIZE as u16,
            payload_len: payload_len as u32,
            preview: header.flags.contains(VideoFlags::PREVIEW),
            timestamp: timestamp as u32,
        };
        codec::write_header(&mut *data, &common);
        header.write(&mut *data, frame_metadata.len() as u32);
        data.put_slice(payload);
        data.put_slice(frame_metadata);

        Ok(Frame {
            kind: FrameKind::Video,
            codec: header.codec,
            preview: common.preview,
            timestamp,
            video: Some(*header),
            audio: None,
            metadata_len: frame_metadata.len(),
            ext_len: VideoHeader::WIRE_SIZE,
            payload_len,
            data,
        })
    }

    /// Assemble an audio frame.
    pub fn build_audio(
        pool: &Arc<FramePool>,
        header: &AudioHeader,
        timestamp: i64,
        payload: &[u8],
        frame_metadata: &[u8],
    ) -> Result<Frame> {
        let payload_len = payload.len() + frame_metadata.len();
        Self::check_cap(FrameKind::Audio, AudioHeader::WIRE_SIZE, payload_len)?;

        let mut data = pool.acquire().ok_or(Error::PoolExhausted)?;
        data.clear();
        let common = CommonHeader {
            kind: FrameKind::Audio,
            codec: header.codec,
            ext_len: AudioHeader::WIRE_SIZE as u16,
            payload_len: payload_len as u32,
            preview: false,
            timestamp: timestamp as u32,
        };
        codec::write_header(&mut *data, &common);
        header.write(&mut *data, frame_metadata.len() as u32);
        data.put_slice(payload);
        data.put_slice(frame_metadata);

        Ok(Frame {
            kind: FrameKind::Audio,
            codec: header.codec,
            preview: false,
            timestamp,
            video: None,
            audio: Some(*header),
            metadata_len: frame_metadata.len(),
            ext_len: AudioHeader::WIRE_SIZE,
            payload_len,
            data,
        })
    }

    /// Assemble a metadata frame from an XML document or typed item stream.
    pub fn build_metadata(pool: &Arc<FramePool>, timestamp: i64, payload: &[u8]) -> Result<Frame> {
        Self::check_cap(FrameKind::Metadata, 0, payload.len())?;

        let mut data = pool.acquire().ok_or(Error::PoolExhausted)?;
        data.clear();
        let common = CommonHeader {
            kind: FrameKind::Metadata,
            codec: Codec::Raw,
            ext_len: 0,
            payload_len: payload.len() as u32,
            preview: false,
            timestamp: timestamp as u32,
        };
        codec::write_header(&mut *data, &common);
        data.put_slice(payload);

        Ok(Frame {
            kind: FrameKind::Metadata,
            codec: Codec::Raw,
            preview: false,
            timestamp,
            video: None,
            audio: None,
            metadata_len: 0,
            ext_len: 0,
            payload_len: payload.len(),
            data,
        })
    }

    /// Parse a complete wire image (`16 + E + P` bytes) already read into a
    /// pooled buffer.
    pub fn from_wire(data: PooledBuffer) -> Result<Frame> {
        let bytes = &data[..];
        let common = codec::read_header(&mut &bytes[..])?;
        let total = FRAME_HEADER_SIZE + common.ext_len as usize + common.payload_len as usize;
        if bytes.len() < total {
            return Err(Error::BufferTooSmall {
                required: total,
                available: bytes.len(),
            });
        }

        let mut ext = &bytes[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + common.ext_len as usize];
        let (video, audio, metadata_len) = match common.kind {
            FrameKind::Video => {
                let (header, meta) = VideoHeader::parse(&mut ext)?;
                (Some(header), None, meta as usize)
            }
            FrameKind::Audio => {
                let (header, meta) = AudioHeader::parse(&mut ext)?;
                (None, Some(header), meta as usize)
            }
            FrameKind::Metadata => (None, None, 0),
        };

        let payload_len = common.payload_len as usize;
        if metadata_len > payload_len {
            return Err(Error::InvalidParameter(format!(
                "frame-metadata trailer {metadata_len} exceeds payload {payload_len}"
            )));
        }

        Ok(Frame {
            kind: common.kind,
            codec: common.codec,
            preview: common.preview,
            timestamp: common.timestamp as i64,
            video,
            audio,
            metadata_len,
            ext_len: common.ext_len as usize,
            payload_len,
            data,
        })
    }

    fn check_cap(kind: FrameKind, ext_len: usize, payload_len: usize) -> Result<()> {
        let declared = ext_len + payload_len;
        let max = crate::max_frame_len(kind);
        if declared > max {
            return Err(Error::LengthOverflow { kind, declared, max });
        }
        Ok(())
    }

    /// Frame kind
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Codec tag from the common header
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Preview-mode flag
    pub fn preview(&self) -> bool {
        self.preview
    }

    /// Timestamp in 100 ns units
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Video extended header, if this is a video frame
    pub fn video(&self) -> Option<&VideoHeader> {
        self.video.as_ref()
    }

    /// Audio extended header, if this is an audio frame
    pub fn audio(&self) -> Option<&AudioHeader> {
        self.audio.as_ref()
    }

    /// Complete wire image: `header | extended header | payload`
    pub fn wire_bytes(&self) -> &[u8] {
        &self.data[..self.wire_len()]
    }

    /// Total on-wire length, `16 + E + P`
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.ext_len + self.payload_len
    }

    /// Full payload (`P` bytes), media plus any frame-metadata trailer
    pub fn payload(&self) -> &[u8] {
        let start = FRAME_HEADER_SIZE + self.ext_len;
        &self.data[start..start + self.payload_len]
    }

    /// Media portion of the payload (trailer excluded)
    pub fn media(&self) -> &[u8] {
        let payload = self.payload();
        &payload[..payload.len() - self.metadata_len]
    }

    /// Per-frame metadata trailer appended by the sender
    pub fn frame_metadata(&self) -> &[u8] {
        let payload = self.payload();
        &payload[payload.len() - self.metadata_len..]
    }

    /// Length of the frame-metadata trailer
    pub fn metadata_len(&self) -> usize {
        self.metadata_len
    }

    /// Stamp the per-channel preview flag into the wire image.
    pub fn set_preview(&mut self, preview: bool) {
        self.preview = preview;
        self.data[10] = preview as u8;
    }

    /// Re-stamp the timestamp (100 ns units) into the wire image.
    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
        let wire = (timestamp as u64 & u32::MAX as u64) as u32;
        self.data[12..16].copy_from_slice(&wire.to_le_bytes());
    }

    /// Tear the frame down to its backing buffer so the receive loop can
    /// reuse it without a round trip through the pool.
    pub fn into_buffer(self) -> PooledBuffer {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> Arc<FramePool> {
        FramePool::new(4, 1024, true)
    }

    fn test_video_header() -> VideoHeader {
        VideoHeader {
            width: 1920,
            height: 1080,
            frame_rate: FrameRate::new(30000, 1001),
            aspect_ratio: 16.0 / 9.0,
            flags: VideoFlags::default(),
            colorspace: ColorSpace::Bt709,
            codec: Codec::Vmx1,
        }
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [FrameKind::Video, FrameKind::Audio, FrameKind::Metadata] {
            assert_eq!(FrameKind::from_wire(kind.to_wire()).unwrap(), kind);
        }
        assert!(matches!(FrameKind::from_wire(9), Err(Error::UnknownKind(9))));
    }

    #[test]
    fn test_kind_mask() {
        let mut mask = KindMask::NONE;
        assert!(mask.is_empty());

        mask.insert(FrameKind::Video);
        assert!(mask.contains(FrameKind::Video));
        assert!(!mask.contains(FrameKind::Audio));

        mask.insert(FrameKind::Audio);
        mask.remove(FrameKind::Video);
        assert!(!mask.contains(FrameKind::Video));
        assert!(mask.contains(FrameKind::Audio));
    }

    #[test]
    fn test_quality_ordering() {
        assert!(Quality::High > Quality::Medium);
        assert!(Quality::Medium > Quality::Low);
        assert!(Quality::Low > Quality::Default);
        assert_eq!(Quality::from_name("Medium"), Some(Quality::Medium));
        assert_eq!(Quality::from_name("medium"), None);
    }

    #[test]
    fn test_frame_rate_interval() {
        // 30 fps is a 3.333 ms interval
        assert_eq!(FrameRate::new(30, 1).interval_100ns(), 333_333);
        // NTSC 29.97
        assert_eq!(FrameRate::new(30000, 1001).interval_100ns(), 333_666);
    }

    #[test]
    fn test_video_frame_round_trip() {
        let pool = test_pool();
        let header = test_video_header();
        let payload = vec![0xAB; 256];
        let meta = vec![0xCD; 16];

        let frame =
            Frame::build_video(&pool, &header, 1_234_567, &payload, &meta).unwrap();
        assert_eq!(frame.wire_len(), 16 + VideoHeader::WIRE_SIZE + 256 + 16);

        // Re-parse the wire image as a receiver would
        let mut buf = pool.acquire().unwrap();
        buf.clear();
        buf.extend_from_slice(frame.wire_bytes());
        let parsed = Frame::from_wire(buf).unwrap();

        assert_eq!(parsed.kind(), FrameKind::Video);
        assert_eq!(parsed.codec(), Codec::Vmx1);
        assert_eq!(parsed.timestamp(), 1_234_567);
        assert_eq!(parsed.video(), Some(&header));
        assert_eq!(parsed.media(), &payload[..]);
        assert_eq!(parsed.frame_metadata(), &meta[..]);
    }

    #[test]
    fn test_audio_frame_round_trip() {
        let pool = test_pool();
        let header = AudioHeader {
            sample_rate: 48_000,
            channels: 2,
            samples_per_channel: 480,
            channel_mask: 0b11,
            codec: Codec::PlanarFloat,
        };
        let samples = vec![0u8; 480 * 2 * 4];

        let frame = Frame::build_audio(&pool, &header, 42, &samples, &[]).unwrap();
        let mut buf = pool.acquire().unwrap();
        buf.clear();
        buf.extend_from_slice(frame.wire_bytes());
        let parsed = Frame::from_wire(buf).unwrap();

        assert_eq!(parsed.audio(), Some(&header));
        assert_eq!(parsed.media().len(), samples.len());
        assert!(parsed.frame_metadata().is_empty());
    }

    #[test]
    fn test_preview_stamp_patches_wire() {
        let pool = test_pool();
        let mut frame =
            Frame::build_video(&pool, &test_video_header(), 0, &[1, 2, 3], &[]).unwrap();
        assert!(!frame.preview());

        frame.set_preview(true);
        assert_eq!(frame.wire_bytes()[10], 1);

        let mut buf = pool.acquire().unwrap();
        buf.clear();
        buf.extend_from_slice(frame.wire_bytes());
        assert!(Frame::from_wire(buf).unwrap().preview());
    }

    #[test]
    fn test_length_cap_enforced() {
        let pool = FramePool::new(1, 64, true);
        let payload = vec![0u8; crate::MAX_METADATA_FRAME + 1];
        let err = Frame::build_metadata(&pool, 0, &payload).unwrap_err();
        assert!(matches!(err, Error::LengthOverflow { kind: FrameKind::Metadata, .. }));
    }
}
