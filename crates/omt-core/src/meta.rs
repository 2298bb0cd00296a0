//! Typed binary metadata container.
//!
//! Metadata-frame payloads carry either a UTF-8 XML document or a typed
//! item stream. The stream starts with the `0xFD` magic byte (invalid as
//! the first byte of UTF-8 text) followed by items of
//! `[u16 type][u16 len][len bytes]`, both integers little-endian.
//!
//! Reserved item types cover timecode, closed captions, SCTE-104 splice
//! markers, AFD/bar data and tally. Readers take the first item of a
//! requested type in wire order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::frame::Tally;

/// First payload byte of a typed item stream.
pub const METADATA_MAGIC: u8 = 0xFD;

/// Reserved item type identifiers.
pub mod item_type {
    /// SMPTE timecode
    pub const TIMECODE: u16 = 0x0001;
    /// CEA-608 caption data (opaque)
    pub const CEA608: u16 = 0x0002;
    /// CEA-708 caption data (opaque)
    pub const CEA708: u16 = 0x0003;
    /// SCTE-104 splice marker
    pub const SCTE104: u16 = 0x0004;
    /// Active format description and bar data
    pub const AFD_BARS: u16 = 0x0005;
    /// Tally state
    pub const TALLY: u16 = 0x0006;
    /// First identifier of the user range
    pub const USER_BASE: u16 = 0x0100;
    /// First identifier of the vendor range
    pub const VENDOR_BASE: u16 = 0x8000;
    /// XML document embedded as an item
    pub const CUSTOM_XML: u16 = 0xFFFF;
}

/// Whether a metadata payload is a typed item stream (as opposed to XML).
pub fn is_typed(payload: &[u8]) -> bool {
    payload.first() == Some(&METADATA_MAGIC)
}

/// One item of a typed stream, borrowing its payload from the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataItem<'a> {
    /// Item type identifier
    pub item_type: u16,
    /// Raw item payload
    pub payload: &'a [u8],
}

/// Iterator over the items of a typed stream.
///
/// Yields an error once and then stops if an item's declared length runs
/// past the end of the payload.
pub struct MetadataReader<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> MetadataReader<'a> {
    /// Open a typed stream. Fails if the payload does not start with the
    /// `0xFD` magic.
    pub fn new(payload: &'a [u8]) -> Result<Self> {
        match payload.split_first() {
            Some((&METADATA_MAGIC, rest)) => Ok(Self { rest, failed: false }),
            _ => Err(Error::InvalidMetadata("missing 0xFD magic".into())),
        }
    }

    /// Find the first item with the given type, in wire order.
    pub fn find(payload: &'a [u8], item_type: u16) -> Option<&'a [u8]> {
        let reader = Self::new(payload).ok()?;
        for item in reader {
            match item {
                Ok(item) if item.item_type == item_type => return Some(item.payload),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }
}

impl<'a> Iterator for MetadataReader<'a> {
    type Item = Result<MetadataItem<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < 4 {
            self.failed = true;
            return Some(Err(Error::InvalidMetadata(format!(
                "truncated item header: {} bytes left",
                self.rest.len()
            ))));
        }
        let mut cursor = self.rest;
        let item_type = cursor.get_u16_le();
        let len = cursor.get_u16_le() as usize;
        if cursor.len() < len {
            self.failed = true;
            return Some(Err(Error::InvalidMetadata(format!(
                "item {item_type:#06x} declares {len} bytes, {} left",
                cursor.len()
            ))));
        }
        let (payload, rest) = cursor.split_at(len);
        self.rest = rest;
        Some(Ok(MetadataItem { item_type, payload }))
    }
}

/// Builder for typed item streams.
///
/// `new` starts a fresh buffer with the magic byte; `append_to` extends a
/// buffer already known to begin with one.
pub struct MetadataWriter {
    buf: BytesMut,
}

impl MetadataWriter {
    /// Start a new stream.
    pub fn new() -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(METADATA_MAGIC);
        Self { buf }
    }

    /// Append one item without re-writing the magic. The buffer must begin
    /// with a typed stream.
    pub fn append_to(buf: BytesMut) -> Result<Self> {
        if buf.first() != Some(&METADATA_MAGIC) {
            return Err(Error::InvalidMetadata(
                "append target does not start with 0xFD".into(),
            ));
        }
        Ok(Self { buf })
    }

    /// Append a raw item.
    pub fn push(&mut self, item_type: u16, payload: &[u8]) -> Result<&mut Self> {
        if payload.len() > u16::MAX as usize {
            return Err(Error::InvalidParameter(format!(
                "item payload of {} bytes exceeds u16 length",
                payload.len()
            )));
        }
        self.buf.put_u16_le(item_type);
        self.buf.put_u16_le(payload.len() as u16);
        self.buf.put_slice(payload);
        Ok(self)
    }

    /// Append a timecode item.
    pub fn push_timecode(&mut self, tc: &Timecode) -> Result<&mut Self> {
        self.push(item_type::TIMECODE, &tc.to_bytes())
    }

    /// Append an SCTE-104 splice marker item.
    pub fn push_splice(&mut self, splice: &SpliceMarker) -> Result<&mut Self> {
        self.push(item_type::SCTE104, &splice.to_bytes())
    }

    /// Append an AFD/bar-data item.
    pub fn push_afd(&mut self, afd: &AfdBarData) -> Result<&mut Self> {
        self.push(item_type::AFD_BARS, &afd.to_bytes())
    }

    /// Append a tally item.
    pub fn push_tally(&mut self, tally: Tally) -> Result<&mut Self> {
        self.push(item_type::TALLY, &[tally.preview as u8, tally.program as u8])
    }

    /// Finish the stream.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for MetadataWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Nominal frame rate carried in the timecode flags (bits 3-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRateIndex {
    /// 24 fps (film)
    Fps24 = 0,
    /// 25 fps (PAL)
    Fps25 = 1,
    /// 30 fps (NTSC)
    Fps30 = 2,
    /// 60 fps
    Fps60 = 3,
}

impl FrameRateIndex {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => FrameRateIndex::Fps24,
            1 => FrameRateIndex::Fps25,
            2 => FrameRateIndex::Fps30,
            _ => FrameRateIndex::Fps60,
        }
    }
}

/// SMPTE timecode item (type 0x0001), 5 bytes on the wire:
/// `HH MM SS FF flags` with flag bit 0 drop-frame, bit 1 color-frame,
/// bit 2 field-mark, bits 3-4 the frame-rate index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub drop_frame: bool,
    pub color_frame: bool,
    pub field_mark: bool,
    pub rate: FrameRateIndex,
}

impl Timecode {
    fn to_bytes(self) -> [u8; 5] {
        let flags = self.drop_frame as u8
            | (self.color_frame as u8) << 1
            | (self.field_mark as u8) << 2
            | (self.rate as u8) << 3;
        [self.hours, self.minutes, self.seconds, self.frames, flags]
    }

    fn from_bytes(payload: &[u8]) -> Result<Self> {
        if payload.len() < 5 {
            return Err(Error::BufferTooSmall {
                required: 5,
                available: payload.len(),
            });
        }
        let flags = payload[4];
        Ok(Self {
            hours: payload[0],
            minutes: payload[1],
            seconds: payload[2],
            frames: payload[3],
            drop_frame: flags & 0b1 != 0,
            color_frame: flags & 0b10 != 0,
            field_mark: flags & 0b100 != 0,
            rate: FrameRateIndex::from_bits(flags >> 3),
        })
    }

    /// First timecode item of a typed stream, if any.
    pub fn find(payload: &[u8]) -> Option<Timecode> {
        MetadataReader::find(payload, item_type::TIMECODE)
            .and_then(|bytes| Self::from_bytes(bytes).ok())
    }
}

/// SCTE-104 splice marker item (type 0x0004), 10 bytes on the wire:
/// op u8, splice-event-id u32 LE, PTS offset u32 LE, auto-return u8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceMarker {
    /// Splice operation code
    pub op: u8,
    /// Splice event identifier
    pub splice_event_id: u32,
    /// PTS offset of the splice point
    pub pts_offset: u32,
    /// Whether the splice automatically returns
    pub auto_return: bool,
}

impl SpliceMarker {
    fn to_bytes(self) -> [u8; 10] {
        let mut bytes = [0u8; 10];
        bytes[0] = self.op;
        bytes[1..5].copy_from_slice(&self.splice_event_id.to_le_bytes());
        bytes[5..9].copy_from_slice(&self.pts_offset.to_le_bytes());
        bytes[9] = self.auto_return as u8;
        bytes
    }

    fn from_bytes(payload: &[u8]) -> Result<Self> {
        if payload.len() < 10 {
            return Err(Error::BufferTooSmall {
                required: 10,
                available: payload.len(),
            });
        }
        Ok(Self {
            op: payload[0],
            splice_event_id: u32::from_le_bytes(payload[1..5].try_into().expect("4 bytes")),
            pts_offset: u32::from_le_bytes(payload[5..9].try_into().expect("4 bytes")),
            auto_return: payload[9] != 0,
        })
    }

    /// First splice marker of a typed stream, if any.
    pub fn find(payload: &[u8]) -> Option<SpliceMarker> {
        MetadataReader::find(payload, item_type::SCTE104)
            .and_then(|bytes| Self::from_bytes(bytes).ok())
    }
}

/// AFD and bar data item (type 0x0005), 6 bytes on the wire:
/// AFD code u8, aspect u8, bar-top u16 LE, bar-bottom u16 LE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AfdBarData {
    /// Active format description code
    pub afd: u8,
    /// Coded-frame aspect flag
    pub aspect: u8,
    /// Top bar line
    pub bar_top: u16,
    /// Bottom bar line
    pub bar_bottom: u16,
}

impl AfdBarData {
    fn to_bytes(self) -> [u8; 6] {
        let mut bytes = [0u8; 6];
        bytes[0] = self.afd;
        bytes[1] = self.aspect;
        bytes[2..4].copy_from_slice(&self.bar_top.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.bar_bottom.to_le_bytes());
        bytes
    }

    fn from_bytes(payload: &[u8]) -> Result<Self> {
        if payload.len() < 6 {
            return Err(Error::BufferTooSmall {
                required: 6,
                available: payload.len(),
            });
        }
        Ok(Self {
            afd: payload[0],
            aspect: payload[1],
            bar_top: u16::from_le_bytes(payload[2..4].try_into().expect("2 bytes")),
            bar_bottom: u16::from_le_bytes(payload[4..6].try_into().expect("2 bytes")),
        })
    }

    /// First AFD/bar-data item of a typed stream, if any.
    pub fn find(payload: &[u8]) -> Option<AfdBarData> {
        MetadataReader::find(payload, item_type::AFD_BARS)
            .and_then(|bytes| Self::from_bytes(bytes).ok())
    }
}

/// First tally item of a typed stream, if any.
pub fn find_tally(payload: &[u8]) -> Option<Tally> {
    let bytes = MetadataReader::find(payload, item_type::TALLY)?;
    if bytes.len() < 2 {
        return None;
    }
    Some(Tally::new(bytes[0] != 0, bytes[1] != 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timecode_wire_bytes() {
        let tc = Timecode {
            hours: 10,
            minutes: 20,
            seconds: 30,
            frames: 15,
            drop_frame: true,
            color_frame: false,
            field_mark: false,
            rate: FrameRateIndex::Fps30,
        };
        let mut writer = MetadataWriter::new();
        writer.push_timecode(&tc).unwrap();
        let wire = writer.finish();

        assert_eq!(
            &wire[..],
            &[0xFD, 0x01, 0x00, 0x05, 0x00, 0x0A, 0x14, 0x1E, 0x0F, 0x11]
        );
        assert_eq!(Timecode::find(&wire), Some(tc));
    }

    #[test]
    fn test_tally_wire_bytes() {
        let mut writer = MetadataWriter::new();
        writer.push_tally(Tally::new(true, false)).unwrap();
        let wire = writer.finish();

        assert_eq!(&wire[..], &[0xFD, 0x06, 0x00, 0x02, 0x00, 0x01, 0x00]);
        assert_eq!(find_tally(&wire), Some(Tally::new(true, false)));
    }

    #[test]
    fn test_splice_wire_bytes() {
        let splice = SpliceMarker {
            op: 0,
            splice_event_id: 0xDEADBEEF,
            pts_offset: 0x00010000,
            auto_return: true,
        };
        let mut writer = MetadataWriter::new();
        writer.push_splice(&splice).unwrap();
        let wire = writer.finish();

        // 5-byte container prefix (magic + type + length), then the payload
        assert_eq!(&wire[..5], &[0xFD, 0x04, 0x00, 0x0A, 0x00]);
        assert_eq!(
            &wire[5..],
            &[0x00, 0xEF, 0xBE, 0xAD, 0xDE, 0x00, 0x00, 0x01, 0x00, 0x01]
        );
        assert_eq!(SpliceMarker::find(&wire), Some(splice));
    }

    #[test]
    fn test_item_sequence_round_trip() {
        let mut writer = MetadataWriter::new();
        writer.push(0x0100, b"user data").unwrap();
        writer.push(item_type::CEA608, &[0x12, 0x34]).unwrap();
        writer.push(0x8000, &[]).unwrap();
        let wire = writer.finish();

        let items: Vec<_> = MetadataReader::new(&wire)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].item_type, 0x0100);
        assert_eq!(items[0].payload, b"user data");
        assert_eq!(items[1].item_type, item_type::CEA608);
        assert_eq!(items[1].payload, &[0x12, 0x34]);
        assert_eq!(items[2].item_type, 0x8000);
        assert!(items[2].payload.is_empty());
    }

    #[test]
    fn test_first_item_of_type_wins() {
        let mut writer = MetadataWriter::new();
        writer
            .push_tally(Tally::new(true, true))
            .unwrap()
            .push_tally(Tally::new(false, false))
            .unwrap();
        let wire = writer.finish();

        assert_eq!(find_tally(&wire), Some(Tally::new(true, true)));
    }

    #[test]
    fn test_append_to_existing_stream() {
        let mut writer = MetadataWriter::new();
        writer.push(0x0100, b"a").unwrap();
        let first = writer.finish();

        let mut writer = MetadataWriter::append_to(BytesMut::from(&first[..])).unwrap();
        writer.push(0x0101, b"b").unwrap();
        let wire = writer.finish();

        let items: Vec<_> = MetadataReader::new(&wire)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(items.len(), 2);
        // Only one magic byte at the front
        assert_eq!(wire.iter().filter(|&&b| b == 0xFD).count(), 1);
    }

    #[test]
    fn test_truncated_item_is_error() {
        // Declares 16 payload bytes but provides 2
        let wire = [0xFD, 0x01, 0x00, 0x10, 0x00, 0xAA, 0xBB];
        let results: Vec<_> = MetadataReader::new(&wire).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_xml_payload_is_not_typed() {
        assert!(!is_typed(b"<xml/>"));
        assert!(is_typed(&[0xFD]));
        assert!(MetadataReader::new(b"<xml/>").is_err());
    }
}
