//! Heartbeat wire format.
//!
//! A heartbeat datagram is a fixed 12-byte header followed by the
//! JSON-encoded Detection. The header is #[repr(C, packed)] with zerocopy
//! derives so it can be read straight out of a receive buffer.
//!
//!   magic    4 bytes  "PLSE"
//!   version  1 byte   WIRE_VERSION
//!   flags    1 byte   reserved, must be zero
//!   reserved 2 bytes  must be zero
//!   length   4 bytes  payload length, big-endian

use static_assertions::assert_eq_size;
use thiserror::Error;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::detection::Detection;

/// Link-local all-nodes group heartbeats are sent to.
pub const MULTICAST_ADDR: &str = "ff02::1";

/// Default UDP port for heartbeats.
pub const HEARTBEAT_PORT: u16 = 9400;

pub const MAGIC: [u8; 4] = *b"PLSE";

pub const WIRE_VERSION: u8 = 0x01;

/// Largest payload that still fits a single UDP datagram with the header.
pub const MAX_PAYLOAD: usize = 65_000;

#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct HeartbeatHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub flags: u8,
    pub reserved: [u8; 2],
    /// Big-endian on the wire. Use `payload_len()` to read it.
    pub length: u32,
}

assert_eq_size!(HeartbeatHeader, [u8; 12]);

pub const HEADER_LEN: usize = std::mem::size_of::<HeartbeatHeader>();

impl HeartbeatHeader {
    pub fn new(payload_len: u32) -> Self {
        Self {
            magic: MAGIC,
            version: WIRE_VERSION,
            flags: 0,
            reserved: [0; 2],
            length: payload_len.to_be(),
        }
    }

    pub fn payload_len(&self) -> usize {
        let raw = self.length;
        u32::from_be(raw) as usize
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("datagram shorter than the heartbeat header ({0} bytes)")]
    Truncated(usize),
    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),
    #[error("payload length {declared} exceeds datagram ({available} bytes available)")]
    LengthMismatch { declared: usize, available: usize },
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD}-byte limit")]
    TooLarge(usize),
    #[error("payload is not a valid detection: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Encode a detection as one heartbeat datagram.
pub fn encode(detection: &Detection) -> Result<Vec<u8>, WireError> {
    let payload = serde_json::to_vec(detection)?;
    if payload.len() > MAX_PAYLOAD {
        return Err(WireError::TooLarge(payload.len()));
    }
    let header = HeartbeatHeader::new(payload.len() as u32);
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode one heartbeat datagram. Trailing bytes after the payload are ignored.
pub fn decode(buf: &[u8]) -> Result<Detection, WireError> {
    let header = HeartbeatHeader::read_from_prefix(buf).ok_or(WireError::Truncated(buf.len()))?;
    if header.magic != MAGIC {
        return Err(WireError::BadMagic(header.magic));
    }
    if header.version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(header.version));
    }
    let declared = header.payload_len();
    if declared > MAX_PAYLOAD {
        return Err(WireError::TooLarge(declared));
    }
    let available = buf.len() - HEADER_LEN;
    if declared > available {
        return Err(WireError::LengthMismatch {
            declared,
            available,
        });
    }
    Ok(serde_json::from_slice(&buf[HEADER_LEN..HEADER_LEN + declared])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::locator::{EndpointMetadata, Locator};

    fn sample() -> Detection {
        Detection::new(
            Identity::new(Some("d1"), "node-a", "proc"),
            vec![EndpointMetadata::new(
                Locator::new("socket", "10.0.0.1", 4446),
                ["sub1", "sub2"],
            )],
        )
    }

    #[test]
    fn header_is_twelve_bytes() {
        assert_eq!(HEADER_LEN, 12);
    }

    #[test]
    fn decoded_detection_keeps_payload() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(&bytes[..4], b"PLSE");

        let back = decode(&bytes).unwrap();
        assert_eq!(back, sample());
        assert!(back.same_endpoints(&sample()));
        assert_eq!(back.identity().process(), "proc");
    }

    #[test]
    fn rejects_short_datagram() {
        assert!(matches!(decode(&[0u8; 5]), Err(WireError::Truncated(5))));
    }

    #[test]
    fn rejects_foreign_magic() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(WireError::BadMagic(_))));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[4] = 0x7f;
        assert!(matches!(
            decode(&bytes),
            Err(WireError::UnsupportedVersion(0x7f))
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let bytes = encode(&sample()).unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            decode(cut),
            Err(WireError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_garbage_payload() {
        let payload = b"{not json";
        let mut bytes = HeartbeatHeader::new(payload.len() as u32).as_bytes().to_vec();
        bytes.extend_from_slice(payload);
        assert!(matches!(decode(&bytes), Err(WireError::Payload(_))));
    }
}
