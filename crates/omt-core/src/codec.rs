//! Common-header wire codec.
//!
//! The 16-byte little-endian header in front of every frame:
//!
//! ```text
//! offset  size  field
//!      0     2  magic "OM"
//!      2     1  frame kind
//!      3     1  codec tag
//!      4     2  extended-header length E
//!      6     4  payload length P
//!     10     1  preview flag
//!     11     1  reserved
//!     12     4  timestamp, 100 ns units
//! ```
//!
//! The total frame wire length is `16 + E + P`. These functions are pure
//! over the supplied buffer and never allocate.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::frame::{Codec, FrameKind};

/// Size in bytes of the common frame header on the wire.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Magic bytes identifying the framing.
pub const MAGIC: [u8; 2] = *b"OM";

/// Decoded common frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    /// Frame kind
    pub kind: FrameKind,
    /// Codec tag
    pub codec: Codec,
    /// Extended-header length `E`
    pub ext_len: u16,
    /// Payload length `P`
    pub payload_len: u32,
    /// Preview-mode flag
    pub preview: bool,
    /// Timestamp in 100 ns units (low 32 bits of the session clock)
    pub timestamp: u32,
}

impl CommonHeader {
    /// Total on-wire frame length, `16 + E + P`.
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.ext_len as usize + self.payload_len as usize
    }
}

/// Write the 16-byte common header. The caller owns the offset: the header
/// lands at the buffer's current write position.
pub fn write_header(buf: &mut impl BufMut, header: &CommonHeader) {
    buf.put_slice(&MAGIC);
    buf.put_u8(header.kind.to_wire());
    buf.put_u8(header.codec.to_wire());
    buf.put_u16_le(header.ext_len);
    buf.put_u32_le(header.payload_len);
    buf.put_u8(header.preview as u8);
    buf.put_u8(0);
    buf.put_u32_le(header.timestamp);
}

/// Read and validate a 16-byte common header.
///
/// Errors: [`Error::MagicMismatch`], [`Error::UnknownKind`],
/// [`Error::UnknownCodec`], and [`Error::LengthOverflow`] when the declared
/// `E + P` exceeds the cap for the kind.
pub fn read_header(buf: &mut impl Buf) -> Result<CommonHeader> {
    if buf.remaining() < FRAME_HEADER_SIZE {
        return Err(Error::BufferTooSmall {
            required: FRAME_HEADER_SIZE,
            available: buf.remaining(),
        });
    }

    let m0 = buf.get_u8();
    let m1 = buf.get_u8();
    if [m0, m1] != MAGIC {
        return Err(Error::MagicMismatch(m0, m1));
    }

    let kind = FrameKind::from_wire(buf.get_u8())?;
    let codec = Codec::from_wire(buf.get_u8())?;
    let ext_len = buf.get_u16_le();
    let payload_len = buf.get_u32_le();
    let preview = buf.get_u8() != 0;
    let _reserved = buf.get_u8();
    let timestamp = buf.get_u32_le();

    let declared = ext_len as usize + payload_len as usize;
    let max = crate::max_frame_len(kind);
    if declared > max {
        return Err(Error::LengthOverflow { kind, declared, max });
    }

    Ok(CommonHeader {
        kind,
        codec,
        ext_len,
        payload_len,
        preview,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn sample_header() -> CommonHeader {
        CommonHeader {
            kind: FrameKind::Video,
            codec: Codec::Vmx1,
            ext_len: 36,
            payload_len: 4096,
            preview: true,
            timestamp: 0xDEAD_BEEF,
        }
    }

    #[test]
    fn test_header_round_trip() {
        let header = sample_header();
        let mut buf = BytesMut::new();
        write_header(&mut buf, &header);
        assert_eq!(buf.len(), FRAME_HEADER_SIZE);

        let parsed = read_header(&mut &buf[..]).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.frame_len(), 16 + 36 + 4096);
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let header = CommonHeader {
            kind: FrameKind::Audio,
            codec: Codec::Opus,
            ext_len: 0x0102,
            payload_len: 0x0A0B0C0D,
            preview: false,
            timestamp: 0x11223344,
        };
        let mut buf = BytesMut::new();
        write_header(&mut buf, &header);

        assert_eq!(&buf[0..2], b"OM");
        assert_eq!(buf[2], 2); // audio
        assert_eq!(buf[3], 0x10); // opus
        assert_eq!(&buf[4..6], &[0x02, 0x01]);
        assert_eq!(&buf[6..10], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(buf[10], 0);
        assert_eq!(buf[11], 0);
        assert_eq!(&buf[12..16], &[0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = BytesMut::new();
        write_header(&mut buf, &sample_header());
        buf[0] = b'X';
        assert!(matches!(
            read_header(&mut &buf[..]),
            Err(Error::MagicMismatch(b'X', b'M'))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut buf = BytesMut::new();
        write_header(&mut buf, &sample_header());
        buf[2] = 7;
        assert!(matches!(read_header(&mut &buf[..]), Err(Error::UnknownKind(7))));
    }

    #[test]
    fn test_overlong_frame_rejected() {
        let mut buf = BytesMut::new();
        let header = CommonHeader {
            kind: FrameKind::Metadata,
            codec: Codec::Raw,
            ext_len: 0,
            payload_len: (crate::MAX_METADATA_FRAME + 1) as u32,
            preview: false,
            timestamp: 0,
        };
        write_header(&mut buf, &header);
        assert!(matches!(
            read_header(&mut &buf[..]),
            Err(Error::LengthOverflow { kind: FrameKind::Metadata, .. })
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let buf = [0u8; 10];
        assert!(matches!(
            read_header(&mut &buf[..]),
            Err(Error::BufferTooSmall { required: 16, available: 10 })
        ));
    }
}
