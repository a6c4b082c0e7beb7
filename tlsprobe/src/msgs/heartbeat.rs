//! RFC 6520 heartbeat messages. The `payload_length` field is encoded as
//! declared, not as measured, so a probe can deliberately mismatch it.

use crate::codec::{Codec, DecodeError, Reader};
use crate::msgs::enums::HeartbeatMessageType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub typ: HeartbeatMessageType,
    /// Declared length; may differ from `payload.len()` on purpose.
    pub payload_length: u16,
    pub payload: Vec<u8>,
    pub padding: Vec<u8>,
}

impl HeartbeatPayload {
    pub fn request(payload: Vec<u8>, payload_length: u16, padding: Vec<u8>) -> Self {
        HeartbeatPayload {
            typ: HeartbeatMessageType::Request,
            payload_length,
            payload,
            padding,
        }
    }
}

impl Codec for HeartbeatPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.typ.encode(bytes);
        self.payload_length.encode(bytes);
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.padding);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let typ = HeartbeatMessageType::read(reader)?;
        let payload_length = u16::read(reader)?;
        // A response to the heartbleed probe may declare more bytes than it
        // carries; hand back whatever is actually there.
        let available = reader.left().min(payload_length as usize);
        let payload = reader.take(available)?.to_vec();
        let padding = reader.rest().to_vec();
        Ok(HeartbeatPayload {
            typ,
            payload_length,
            payload,
            padding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_length_is_encoded_as_declared() {
        let hb = HeartbeatPayload::request(b"abc".to_vec(), 4, Vec::new());
        let encoding = hb.get_encoding();
        assert_eq!(encoding, vec![1, 0, 4, b'a', b'b', b'c']);
    }

    #[test]
    fn short_response_keeps_declared_length() {
        let parsed = HeartbeatPayload::read_bytes(&[2, 0, 4, b'a', b'b', b'c']).unwrap();
        assert_eq!(parsed.typ, HeartbeatMessageType::Response);
        assert_eq!(parsed.payload_length, 4);
        assert_eq!(parsed.payload, b"abc");
    }

    #[test]
    fn response_round_trip() {
        let hb = HeartbeatPayload {
            typ: HeartbeatMessageType::Response,
            payload_length: 3,
            payload: b"abc".to_vec(),
            padding: vec![0; 16],
        };
        let parsed = HeartbeatPayload::read_bytes(&hb.get_encoding()).unwrap();
        assert_eq!(parsed, hb);
    }
}
