use crate::codec::{encode_u24, read_u24, Codec, DecodeError, Reader};

/// An opaque run of bytes filling the rest of its enclosing structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Payload(bytes.into())
    }

    pub fn empty() -> Self {
        Payload(Vec::new())
    }
}

impl Codec for Payload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Payload(reader.rest().to_vec()))
    }
}

/// Opaque bytes with a one-byte length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadU8(pub Vec<u8>);

impl PayloadU8 {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        PayloadU8(bytes.into())
    }

    pub fn empty() -> Self {
        PayloadU8(Vec::new())
    }
}

impl Codec for PayloadU8 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        debug_assert!(self.0.len() <= 0xff);
        (self.0.len() as u8).encode(bytes);
        bytes.extend_from_slice(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let length = u8::read(reader)? as usize;
        reader.take(length).map(|slice| PayloadU8(slice.to_vec()))
    }
}

/// Opaque bytes with a two-byte length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadU16(pub Vec<u8>);

impl PayloadU16 {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        PayloadU16(bytes.into())
    }

    pub fn empty() -> Self {
        PayloadU16(Vec::new())
    }
}

impl Codec for PayloadU16 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        debug_assert!(self.0.len() <= 0xffff);
        (self.0.len() as u16).encode(bytes);
        bytes.extend_from_slice(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let length = u16::read(reader)? as usize;
        reader.take(length).map(|slice| PayloadU16(slice.to_vec()))
    }
}

/// Opaque bytes with a three-byte length prefix (certificates).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadU24(pub Vec<u8>);

impl PayloadU24 {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        PayloadU24(bytes.into())
    }
}

impl Codec for PayloadU24 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        encode_u24(self.0.len(), bytes);
        bytes.extend_from_slice(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let length = read_u24(reader)?;
        reader.take(length).map(|slice| PayloadU24(slice.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_payloads_round_trip() {
        let p = PayloadU16::new(vec![1, 2, 3]);
        let encoding = p.get_encoding();
        assert_eq!(encoding, vec![0, 3, 1, 2, 3]);
        assert_eq!(PayloadU16::read_bytes(&encoding).unwrap(), p);

        let p = PayloadU24::new(vec![9; 5]);
        assert_eq!(PayloadU24::read_bytes(&p.get_encoding()).unwrap(), p);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        assert!(PayloadU8::read_bytes(&[4, 1, 2]).is_err());
    }
}
