//! IEEE 1588-2008 message codec.
//!
//! PTP is big-endian on the wire, unlike the media framing. Only the
//! message types a follower needs are decoded: Sync, FollowUp, DelayReq,
//! DelayResp and Announce. Everything else parses as `Other` and is
//! ignored by the follower.

use crate::error::{PtpError, Result};

/// PTP event-message UDP port (Sync, DelayReq).
pub const EVENT_PORT: u16 = 319;

/// PTP general-message UDP port (FollowUp, DelayResp, Announce).
pub const GENERAL_PORT: u16 = 320;

/// IPv4 multicast group for the default PTP profile.
pub const MULTICAST_GROUP: std::net::Ipv4Addr = std::net::Ipv4Addr::new(224, 0, 1, 129);

/// Size of the common PTP header.
pub const PTP_HEADER_SIZE: usize = 34;

/// Size of an on-wire PTP timestamp (48-bit seconds + 32-bit nanoseconds).
pub const TIMESTAMP_SIZE: usize = 10;

/// Two-step flag in the first flags byte: origin timestamps arrive in a
/// separate FollowUp message.
pub const FLAG_TWO_STEP: u8 = 0x02;

/// Message types recognized by the follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Sync,
    DelayReq,
    FollowUp,
    DelayResp,
    Announce,
}

impl MessageType {
    /// Low nibble of the first header byte.
    pub fn from_nibble(nibble: u8) -> Result<Self> {
        match nibble {
            0x0 => Ok(MessageType::Sync),
            0x1 => Ok(MessageType::DelayReq),
            0x8 => Ok(MessageType::FollowUp),
            0x9 => Ok(MessageType::DelayResp),
            0xB => Ok(MessageType::Announce),
            other => Err(PtpError::UnknownMessageType(other)),
        }
    }

    fn to_nibble(self) -> u8 {
        match self {
            MessageType::Sync => 0x0,
            MessageType::DelayReq => 0x1,
            MessageType::FollowUp => 0x8,
            MessageType::DelayResp => 0x9,
            MessageType::Announce => 0xB,
        }
    }
}

/// 10-byte `(clock identity, port number)` uniquely identifying a PTP
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortIdentity(pub [u8; 10]);

impl PortIdentity {
    /// EUI-64 expansion of an interface MAC address with port number 1:
    /// `mac[0..3] | FF FE | mac[3..6] | 00 01`.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut id = [0u8; 10];
        id[0..3].copy_from_slice(&mac[0..3]);
        id[3] = 0xFF;
        id[4] = 0xFE;
        id[5..8].copy_from_slice(&mac[3..6]);
        id[8..10].copy_from_slice(&1u16.to_be_bytes());
        Self(id)
    }

    /// Random clock identity with port number 1, for hosts where the
    /// interface MAC is unavailable.
    pub fn random() -> Self {
        let mut id = [0u8; 10];
        let clock_id: [u8; 8] = rand::random();
        id[0..8].copy_from_slice(&clock_id);
        id[8..10].copy_from_slice(&1u16.to_be_bytes());
        Self(id)
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 10 {
            return Err(PtpError::Truncated {
                required: 10,
                available: bytes.len(),
            });
        }
        let mut id = [0u8; 10];
        id.copy_from_slice(&bytes[..10]);
        Ok(Self(id))
    }
}

/// On-wire PTP timestamp: 48-bit seconds and 32-bit nanoseconds, both
/// big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PtpTimestamp {
    /// Seconds since the PTP epoch
    pub seconds: u64,
    /// Nanoseconds within the second
    pub nanoseconds: u32,
}

impl PtpTimestamp {
    /// Convert to the transport's 100 ns tick count:
    /// `seconds * 10^7 + nanoseconds / 100`.
    pub fn to_hundred_ns(&self) -> i64 {
        self.seconds as i64 * 10_000_000 + (self.nanoseconds / 100) as i64
    }

    /// Build from a 100 ns tick count. Lossless for any non-negative tick
    /// value below `2^48 * 10^7`.
    pub fn from_hundred_ns(ticks: i64) -> Self {
        Self {
            seconds: (ticks / 10_000_000) as u64,
            nanoseconds: ((ticks % 10_000_000) * 100) as u32,
        }
    }

    /// Parse the 10-byte wire form.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TIMESTAMP_SIZE {
            return Err(PtpError::Truncated {
                required: TIMESTAMP_SIZE,
                available: bytes.len(),
            });
        }
        let seconds = (u16::from_be_bytes([bytes[0], bytes[1]]) as u64) << 32
            | u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as u64;
        let nanoseconds = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        Ok(Self { seconds, nanoseconds })
    }

    /// Write the 10-byte wire form.
    pub fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&((self.seconds >> 32) as u16).to_be_bytes());
        out[2..6].copy_from_slice(&(self.seconds as u32).to_be_bytes());
        out[6..10].copy_from_slice(&self.nanoseconds.to_be_bytes());
    }
}

/// Decoded 34-byte common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtpHeader {
    /// Message type from the low nibble of byte 0
    pub message_type: MessageType,
    /// PTP version from the low nibble of byte 1
    pub version: u8,
    /// Declared message length
    pub message_length: u16,
    /// Domain number
    pub domain: u8,
    /// Both flag bytes
    pub flags: [u8; 2],
    /// Correction field: nanoseconds scaled by 2^16
    pub correction: i64,
    /// Identity of the sending port
    pub source_port: PortIdentity,
    /// Sequence number of this message
    pub sequence_id: u16,
}

impl PtpHeader {
    /// Whether the sender uses two-step Sync/FollowUp pairs.
    pub fn two_step(&self) -> bool {
        self.flags[0] & FLAG_TWO_STEP != 0
    }

    /// Correction field converted to 100 ns ticks.
    pub fn correction_hundred_ns(&self) -> i64 {
        (self.correction >> 16) / 100
    }

    /// Parse the common header from the front of a datagram.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PTP_HEADER_SIZE {
            return Err(PtpError::Truncated {
                required: PTP_HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let version = bytes[1] & 0x0F;
        if version != 2 {
            return Err(PtpError::UnsupportedVersion(version));
        }
        let message_type = MessageType::from_nibble(bytes[0] & 0x0F)?;
        let message_length = u16::from_be_bytes([bytes[2], bytes[3]]);
        let domain = bytes[4];
        let flags = [bytes[6], bytes[7]];
        let correction = i64::from_be_bytes(bytes[8..16].try_into().expect("8 bytes"));
        let source_port = PortIdentity::parse(&bytes[20..30])?;
        let sequence_id = u16::from_be_bytes([bytes[30], bytes[31]]);
        Ok(Self {
            message_type,
            version,
            message_length,
            domain,
            flags,
            correction,
            source_port,
            sequence_id,
        })
    }
}

/// Message body variants the follower acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtpBody {
    /// Sync: origin timestamp (authoritative only for one-step masters)
    Sync { origin: PtpTimestamp },
    /// FollowUp: precise origin timestamp of the matching Sync
    FollowUp { origin: PtpTimestamp },
    /// DelayResp: when the master received our DelayReq, and whose request
    /// it answers
    DelayResp {
        receive: PtpTimestamp,
        requesting_port: PortIdentity,
    },
    /// Announce and other messages the follower ignores
    Other,
}

/// A decoded PTP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtpMessage {
    pub header: PtpHeader,
    pub body: PtpBody,
}

impl PtpMessage {
    /// Decode one datagram.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = PtpHeader::parse(bytes)?;
        let body = match header.message_type {
            MessageType::Sync => PtpBody::Sync {
                origin: PtpTimestamp::parse(&bytes[PTP_HEADER_SIZE..])?,
            },
            MessageType::FollowUp => PtpBody::FollowUp {
                origin: PtpTimestamp::parse(&bytes[PTP_HEADER_SIZE..])?,
            },
            MessageType::DelayResp => {
                let receive = PtpTimestamp::parse(&bytes[PTP_HEADER_SIZE..])?;
                let requesting_port =
                    PortIdentity::parse(&bytes[PTP_HEADER_SIZE + TIMESTAMP_SIZE..])?;
                PtpBody::DelayResp {
                    receive,
                    requesting_port,
                }
            }
            MessageType::DelayReq | MessageType::Announce => PtpBody::Other,
        };
        Ok(Self { header, body })
    }
}

/// Build a DelayReq datagram (header plus zeroed origin timestamp).
pub fn build_delay_req(domain: u8, port: PortIdentity, sequence_id: u16) -> [u8; 44] {
    let mut out = [0u8; 44];
    out[0] = MessageType::DelayReq.to_nibble();
    out[1] = 2; // PTPv2
    out[2..4].copy_from_slice(&44u16.to_be_bytes());
    out[4] = domain;
    // flags, correction and reserved stay zero
    out[20..30].copy_from_slice(&port.0);
    out[30..32].copy_from_slice(&sequence_id.to_be_bytes());
    out[32] = 0x01; // control field: DelayReq
    out[33] = 0x7F; // logMessageInterval: unspecified
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_datagram(domain: u8, seq: u16, two_step: bool, origin: PtpTimestamp) -> Vec<u8> {
        let mut out = vec![0u8; 44];
        out[0] = 0x0;
        out[1] = 2;
        out[2..4].copy_from_slice(&44u16.to_be_bytes());
        out[4] = domain;
        if two_step {
            out[6] = FLAG_TWO_STEP;
        }
        out[20..30].copy_from_slice(&[1, 2, 3, 0xFF, 0xFE, 4, 5, 6, 0, 1]);
        out[30..32].copy_from_slice(&seq.to_be_bytes());
        origin.write(&mut out[34..44]);
        out
    }

    #[test]
    #[allow(arithmetic_overflow)]
    fn test_timestamp_round_trip() {
        let cases: [i64; 5] = [
            0,
            1,
            9_999_999,
            1_700_000_000 * 10_000_000 + 123,
            (1u64 << 47) as i64 * 10_000_000 + 9_999_999,
        ];
        for ticks in cases {
            let ts = PtpTimestamp::from_hundred_ns(ticks);
            assert_eq!(ts.to_hundred_ns(), ticks, "ticks={ticks}");
        }
    }

    #[test]
    fn test_timestamp_wire_round_trip() {
        let ts = PtpTimestamp {
            seconds: 0x0000_1234_5678_9ABC,
            nanoseconds: 999_999_900,
        };
        let mut wire = [0u8; 10];
        ts.write(&mut wire);
        assert_eq!(PtpTimestamp::parse(&wire).unwrap(), ts);
        // Seconds are the first 48 bits, big-endian
        assert_eq!(&wire[0..6], &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
    }

    #[test]
    fn test_sub_tick_nanoseconds_truncate() {
        let ts = PtpTimestamp { seconds: 1, nanoseconds: 150 };
        // 150 ns is one full tick plus 50 ns that cannot be represented
        assert_eq!(ts.to_hundred_ns(), 10_000_001);
    }

    #[test]
    fn test_parse_sync() {
        let origin = PtpTimestamp { seconds: 100, nanoseconds: 500 };
        let wire = sync_datagram(3, 0x1234, true, origin);
        let msg = PtpMessage::parse(&wire).unwrap();

        assert_eq!(msg.header.message_type, MessageType::Sync);
        assert_eq!(msg.header.domain, 3);
        assert_eq!(msg.header.sequence_id, 0x1234);
        assert!(msg.header.two_step());
        assert_eq!(msg.body, PtpBody::Sync { origin });
    }

    #[test]
    fn test_correction_conversion() {
        let mut wire = sync_datagram(0, 1, false, PtpTimestamp::default());
        // 5000 ns scaled by 2^16
        wire[8..16].copy_from_slice(&(5_000i64 << 16).to_be_bytes());
        let msg = PtpMessage::parse(&wire).unwrap();
        assert_eq!(msg.header.correction_hundred_ns(), 50);
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut wire = sync_datagram(0, 1, false, PtpTimestamp::default());
        wire[1] = 1;
        assert!(matches!(
            PtpMessage::parse(&wire),
            Err(PtpError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut wire = sync_datagram(0, 1, false, PtpTimestamp::default());
        wire[0] = 0x5;
        assert!(matches!(
            PtpMessage::parse(&wire),
            Err(PtpError::UnknownMessageType(0x5))
        ));
    }

    #[test]
    fn test_delay_req_layout() {
        let port = PortIdentity::from_mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let wire = build_delay_req(7, port, 42);

        let msg = PtpMessage::parse(&wire).unwrap();
        assert_eq!(msg.header.message_type, MessageType::DelayReq);
        assert_eq!(msg.header.domain, 7);
        assert_eq!(msg.header.sequence_id, 42);
        assert_eq!(msg.header.source_port, port);
        assert_eq!(msg.header.message_length, 44);
    }

    #[test]
    fn test_port_identity_from_mac() {
        let port = PortIdentity::from_mac([0x00, 0x1B, 0x21, 0x3C, 0x4D, 0x5E]);
        assert_eq!(
            port.0,
            [0x00, 0x1B, 0x21, 0xFF, 0xFE, 0x3C, 0x4D, 0x5E, 0x00, 0x01]
        );
    }

    #[test]
    fn test_delay_resp_matching_fields() {
        let ours = PortIdentity::random();
        let mut wire = vec![0u8; 54];
        wire[0] = 0x9;
        wire[1] = 2;
        wire[2..4].copy_from_slice(&54u16.to_be_bytes());
        wire[30..32].copy_from_slice(&9u16.to_be_bytes());
        PtpTimestamp { seconds: 10, nanoseconds: 0 }.write(&mut wire[34..44]);
        wire[44..54].copy_from_slice(&ours.0);

        let msg = PtpMessage::parse(&wire).unwrap();
        match msg.body {
            PtpBody::DelayResp { receive, requesting_port } => {
                assert_eq!(receive.seconds, 10);
                assert_eq!(requesting_port, ours);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
