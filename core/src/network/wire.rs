//! Wire format: TLV frames exchanged over UDP.
//!
//! Every frame starts with a 4-byte header: `type (u8) | version (u8) |
//! length (u16, big-endian)`, where `length` counts the bytes following the
//! header. All multi-byte integers on the wire are big-endian. Decoding is
//! explicit and bounds-checked; a datagram may carry trailing bytes beyond
//! the declared length and they are ignored.

use std::fmt;

/// Protocol version carried in every frame header. Frames with any other
/// version are dropped.
pub const PROTOCOL_VERSION: u8 = 0;

/// UDP port the daemon binds and sends to.
pub const LANTERN_PORT: u16 = 0x4242;

/// Receiver buffer ceiling. Datagrams larger than this are dropped.
pub const MAX_PAYLOAD: usize = 65535;

/// Size of the common frame header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Size of a push-data frame up to its first record: header + tx_id + seqno.
pub const PUSH_HEADER_LEN: usize = FRAME_HEADER_LEN + 4;

/// Size of a dataset record up to its payload:
/// `source (6) | type (1) | version (1) | length (2)`.
pub const RECORD_HEADER_LEN: usize = 10;

/// A 6-byte hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Frame type byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Dataset records, part of a numbered transaction.
    PushData = 0,
    /// Empty announcement of master role, sent to the multicast group.
    AnnounceMaster = 1,
    /// Ask the receiver to push datasets of one type back.
    Request = 2,
    /// Transaction terminator; seqno carries the total data-packet count.
    StatusTxEnd = 3,
    /// Reserved. Never emitted; dropped on receipt.
    StatusError = 4,
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::PushData),
            1 => Ok(FrameType::AnnounceMaster),
            2 => Ok(FrameType::Request),
            3 => Ok(FrameType::StatusTxEnd),
            4 => Ok(FrameType::StatusError),
            _ => Err(()),
        }
    }
}

/// One dataset record inside a push-data frame:
/// `source (6) | type (1) | version (1) | length (2 BE) | payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    /// Hardware address of the node that originated the payload.
    pub source: MacAddr,
    /// Application-chosen data type tag.
    pub data_type: u8,
    /// Application-chosen payload version.
    pub version: u8,
    /// Opaque payload, shorter than 2^16 bytes.
    pub payload: Vec<u8>,
}

impl DataRecord {
    /// Encoded size of this record including its header.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.payload.len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.source.octets());
        out.push(self.data_type);
        out.push(self.version);
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
    }
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    PushData {
        tx_id: u16,
        seqno: u16,
        records: Vec<DataRecord>,
    },
    AnnounceMaster,
    Request {
        requested_type: u8,
        tx_id: u16,
    },
    StatusTxEnd {
        tx_id: u16,
        /// Total number of data packets in the transaction.
        seqno: u16,
    },
}

/// Errors when decoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Input shorter than the header, or shorter than `4 + length`.
    TooShort,
    /// Input exceeds the receiver ceiling.
    TooLarge,
    /// Frame carries an incompatible protocol version.
    Version(u8),
    /// Unknown frame type byte.
    UnknownType(u8),
    /// Known but reserved frame type.
    Reserved(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort => write!(f, "frame too short"),
            DecodeError::TooLarge => write!(f, "frame exceeds receive buffer"),
            DecodeError::Version(v) => write!(f, "incompatible protocol version: {}", v),
            DecodeError::UnknownType(t) => write!(f, "unknown frame type: {}", t),
            DecodeError::Reserved(t) => write!(f, "reserved frame type: {}", t),
        }
    }
}

impl std::error::Error for DecodeError {}

impl Frame {
    /// Encode the frame as `header | body`.
    ///
    /// Callers are responsible for keeping the body under 2^16 bytes; the
    /// push transmitter packs against [`MAX_PAYLOAD`] so this holds by
    /// construction.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + 8);
        match self {
            Frame::PushData {
                tx_id,
                seqno,
                records,
            } => {
                let body_len: usize =
                    4 + records.iter().map(DataRecord::encoded_len).sum::<usize>();
                debug_assert!(body_len <= u16::MAX as usize);
                out.push(FrameType::PushData as u8);
                out.push(PROTOCOL_VERSION);
                out.extend_from_slice(&(body_len as u16).to_be_bytes());
                out.extend_from_slice(&tx_id.to_be_bytes());
                out.extend_from_slice(&seqno.to_be_bytes());
                for record in records {
                    record.encode_into(&mut out);
                }
            }
            Frame::AnnounceMaster => {
                out.push(FrameType::AnnounceMaster as u8);
                out.push(PROTOCOL_VERSION);
                out.extend_from_slice(&0u16.to_be_bytes());
            }
            Frame::Request {
                requested_type,
                tx_id,
            } => {
                out.push(FrameType::Request as u8);
                out.push(PROTOCOL_VERSION);
                out.extend_from_slice(&3u16.to_be_bytes());
                out.push(*requested_type);
                out.extend_from_slice(&tx_id.to_be_bytes());
            }
            Frame::StatusTxEnd { tx_id, seqno } => {
                out.push(FrameType::StatusTxEnd as u8);
                out.push(PROTOCOL_VERSION);
                out.extend_from_slice(&4u16.to_be_bytes());
                out.extend_from_slice(&tx_id.to_be_bytes());
                out.extend_from_slice(&seqno.to_be_bytes());
            }
        }
        out
    }

    /// Decode one frame from the front of `bytes`.
    ///
    /// Trailing bytes beyond the declared length are tolerated and ignored.
    /// Inside a push-data body, a truncated record tail is discarded
    /// silently.
    pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
        if bytes.len() > MAX_PAYLOAD {
            return Err(DecodeError::TooLarge);
        }
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(DecodeError::TooShort);
        }

        let frame_type = bytes[0];
        let version = bytes[1];
        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

        if bytes.len() < FRAME_HEADER_LEN + length {
            return Err(DecodeError::TooShort);
        }
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::Version(version));
        }

        let body = &bytes[FRAME_HEADER_LEN..FRAME_HEADER_LEN + length];

        match FrameType::try_from(frame_type) {
            Ok(FrameType::PushData) => {
                if body.len() < 4 {
                    return Err(DecodeError::TooShort);
                }
                let tx_id = u16::from_be_bytes([body[0], body[1]]);
                let seqno = u16::from_be_bytes([body[2], body[3]]);
                Ok(Frame::PushData {
                    tx_id,
                    seqno,
                    records: decode_records(&body[4..]),
                })
            }
            Ok(FrameType::AnnounceMaster) => Ok(Frame::AnnounceMaster),
            Ok(FrameType::Request) => {
                if body.len() < 3 {
                    return Err(DecodeError::TooShort);
                }
                Ok(Frame::Request {
                    requested_type: body[0],
                    tx_id: u16::from_be_bytes([body[1], body[2]]),
                })
            }
            Ok(FrameType::StatusTxEnd) => {
                if body.len() < 4 {
                    return Err(DecodeError::TooShort);
                }
                Ok(Frame::StatusTxEnd {
                    tx_id: u16::from_be_bytes([body[0], body[1]]),
                    seqno: u16::from_be_bytes([body[2], body[3]]),
                })
            }
            Ok(FrameType::StatusError) => Err(DecodeError::Reserved(frame_type)),
            Err(()) => Err(DecodeError::UnknownType(frame_type)),
        }
    }
}

/// Parse dataset records left to right. Stops silently when the remainder is
/// shorter than a record header or than the record's declared payload.
fn decode_records(mut body: &[u8]) -> Vec<DataRecord> {
    let mut records = Vec::new();
    while body.len() >= RECORD_HEADER_LEN {
        let payload_len = u16::from_be_bytes([body[8], body[9]]) as usize;
        if RECORD_HEADER_LEN + payload_len > body.len() {
            break;
        }
        let mut source = [0u8; 6];
        source.copy_from_slice(&body[..6]);
        records.push(DataRecord {
            source: MacAddr::new(source),
            data_type: body[6],
            version: body[7],
            payload: body[RECORD_HEADER_LEN..RECORD_HEADER_LEN + payload_len].to_vec(),
        });
        body = &body[RECORD_HEADER_LEN + payload_len..];
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seed: u8, payload: &[u8]) -> DataRecord {
        DataRecord {
            source: MacAddr::new([seed; 6]),
            data_type: 64,
            version: 1,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_announce_roundtrip() {
        let encoded = Frame::AnnounceMaster.encode();
        assert_eq!(encoded, vec![1, PROTOCOL_VERSION, 0, 0]);
        assert_eq!(Frame::decode(&encoded).unwrap(), Frame::AnnounceMaster);
    }

    #[test]
    fn test_request_roundtrip() {
        let frame = Frame::Request {
            requested_type: 66,
            tx_id: 0xBEEF,
        };
        let encoded = frame.encode();
        assert_eq!(encoded.len(), FRAME_HEADER_LEN + 3);
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_txend_roundtrip() {
        let frame = Frame::StatusTxEnd { tx_id: 7, seqno: 3 };
        let encoded = frame.encode();
        assert_eq!(encoded.len(), FRAME_HEADER_LEN + 4);
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_push_data_roundtrip() {
        let frame = Frame::PushData {
            tx_id: 42,
            seqno: 0,
            records: vec![record(0xAA, b"hello"), record(0xBB, b"")],
        };
        let encoded = frame.encode();
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_push_data_bitwise_layout() {
        let frame = Frame::PushData {
            tx_id: 0x0102,
            seqno: 0x0304,
            records: vec![record(0xAA, b"hi")],
        };
        let encoded = frame.encode();
        // header: type 0, version, length = 4 + 12
        assert_eq!(&encoded[..4], &[0, PROTOCOL_VERSION, 0, 16]);
        // tx block, big-endian
        assert_eq!(&encoded[4..8], &[0x01, 0x02, 0x03, 0x04]);
        // record: mac, type, version, length, payload
        assert_eq!(&encoded[8..14], &[0xAA; 6]);
        assert_eq!(&encoded[14..16], &[64, 1]);
        assert_eq!(&encoded[16..18], &[0, 2]);
        assert_eq!(&encoded[18..], b"hi");
    }

    #[test]
    fn test_truncated_record_tail_discarded() {
        let frame = Frame::PushData {
            tx_id: 1,
            seqno: 0,
            records: vec![record(0xAA, b"abcd"), record(0xBB, b"efgh")],
        };
        let mut encoded = frame.encode();
        // Chop the second record's payload short and fix the frame length so
        // the header still matches the buffer.
        encoded.truncate(encoded.len() - 2);
        let body_len = (encoded.len() - FRAME_HEADER_LEN) as u16;
        encoded[2..4].copy_from_slice(&body_len.to_be_bytes());

        match Frame::decode(&encoded).unwrap() {
            Frame::PushData { records, .. } => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].payload, b"abcd");
            }
            other => panic!("expected PushData, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_push_data() {
        let frame = Frame::PushData {
            tx_id: 9,
            seqno: 2,
            records: vec![],
        };
        let encoded = frame.encode();
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(Frame::decode(&[]), Err(DecodeError::TooShort));
        assert_eq!(Frame::decode(&[1, 0]), Err(DecodeError::TooShort));
        // Header declares more body than the buffer holds.
        assert_eq!(Frame::decode(&[1, 0, 0, 5]), Err(DecodeError::TooShort));
    }

    #[test]
    fn test_trailing_bytes_tolerated() {
        let mut encoded = Frame::AnnounceMaster.encode();
        encoded.extend_from_slice(&[0xDE, 0xAD]);
        assert_eq!(Frame::decode(&encoded).unwrap(), Frame::AnnounceMaster);
    }

    #[test]
    fn test_version_mismatch() {
        let mut encoded = Frame::AnnounceMaster.encode();
        encoded[1] = PROTOCOL_VERSION.wrapping_add(1);
        assert!(matches!(
            Frame::decode(&encoded),
            Err(DecodeError::Version(_))
        ));
    }

    #[test]
    fn test_unknown_and_reserved_types() {
        assert_eq!(
            Frame::decode(&[200, 0, 0, 0]),
            Err(DecodeError::UnknownType(200))
        );
        assert_eq!(Frame::decode(&[4, 0, 0, 0]), Err(DecodeError::Reserved(4)));
    }

    #[test]
    fn test_mac_display() {
        let mac = MacAddr::new([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:01");
    }
}
