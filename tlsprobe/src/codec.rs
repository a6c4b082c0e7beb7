//! Length-driven encoding primitives. Every TLS structure carries an
//! explicit length, so parsing never guesses; running past a length is a
//! decode error, not a panic.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError(pub &'static str);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decode error: {}", self.0)
    }
}

/// A cursor over a borrowed buffer, bounded by the enclosing length field.
pub struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn init(bytes: &'a [u8]) -> Reader<'a> {
        Reader {
            buffer: bytes,
            offset: 0,
        }
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buffer[self.offset..];
        self.offset = self.buffer.len();
        rest
    }

    pub fn take(&mut self, length: usize) -> Result<&'a [u8], DecodeError> {
        if self.left() < length {
            return Err(DecodeError("message truncated"));
        }
        let slice = &self.buffer[self.offset..self.offset + length];
        self.offset += length;
        Ok(slice)
    }

    pub fn any_left(&self) -> bool {
        self.offset < self.buffer.len()
    }

    pub fn left(&self) -> usize {
        self.buffer.len() - self.offset
    }

    pub fn used(&self) -> usize {
        self.offset
    }

    /// A sub-reader bounded by an inner length field.
    pub fn sub(&mut self, length: usize) -> Result<Reader<'a>, DecodeError> {
        self.take(length).map(Reader::init)
    }
}

pub trait Codec: Sized {
    fn encode(&self, bytes: &mut Vec<u8>);
    fn read(reader: &mut Reader) -> Result<Self, DecodeError>;

    fn get_encoding(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.encode(&mut bytes);
        bytes
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::read(&mut Reader::init(bytes))
    }
}

impl Codec for u8 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        reader.take(1).map(|slice| slice[0])
    }
}

impl Codec for u16 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.to_be_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        reader
            .take(2)
            .map(|slice| u16::from_be_bytes([slice[0], slice[1]]))
    }
}

impl Codec for u32 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.to_be_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        reader
            .take(4)
            .map(|slice| u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }
}

pub fn encode_u24(value: usize, bytes: &mut Vec<u8>) {
    debug_assert!(value < 1 << 24);
    bytes.push((value >> 16) as u8);
    bytes.push((value >> 8) as u8);
    bytes.push(value as u8);
}

pub fn read_u24(reader: &mut Reader) -> Result<usize, DecodeError> {
    reader
        .take(3)
        .map(|slice| ((slice[0] as usize) << 16) | ((slice[1] as usize) << 8) | slice[2] as usize)
}

/// Encode a list with a one-byte length prefix.
pub fn encode_vec_u8<T: Codec>(bytes: &mut Vec<u8>, items: &[T]) {
    let mut body = Vec::new();
    for item in items {
        item.encode(&mut body);
    }
    debug_assert!(body.len() <= 0xff);
    (body.len() as u8).encode(bytes);
    bytes.append(&mut body);
}

/// Encode a list with a two-byte length prefix.
pub fn encode_vec_u16<T: Codec>(bytes: &mut Vec<u8>, items: &[T]) {
    let mut body = Vec::new();
    for item in items {
        item.encode(&mut body);
    }
    debug_assert!(body.len() <= 0xffff);
    (body.len() as u16).encode(bytes);
    bytes.append(&mut body);
}

/// Encode a list with a three-byte length prefix.
pub fn encode_vec_u24<T: Codec>(bytes: &mut Vec<u8>, items: &[T]) {
    let mut body = Vec::new();
    for item in items {
        item.encode(&mut body);
    }
    encode_u24(body.len(), bytes);
    bytes.append(&mut body);
}

pub fn read_vec_u8<T: Codec>(reader: &mut Reader) -> Result<Vec<T>, DecodeError> {
    let length = u8::read(reader)? as usize;
    let mut sub = reader.sub(length)?;
    let mut items = Vec::new();
    while sub.any_left() {
        items.push(T::read(&mut sub)?);
    }
    Ok(items)
}

pub fn read_vec_u16<T: Codec>(reader: &mut Reader) -> Result<Vec<T>, DecodeError> {
    let length = u16::read(reader)? as usize;
    let mut sub = reader.sub(length)?;
    let mut items = Vec::new();
    while sub.any_left() {
        items.push(T::read(&mut sub)?);
    }
    Ok(items)
}

pub fn read_vec_u24<T: Codec>(reader: &mut Reader) -> Result<Vec<T>, DecodeError> {
    let length = read_u24(reader)?;
    let mut sub = reader.sub(length)?;
    let mut items = Vec::new();
    while sub.any_left() {
        items.push(T::read(&mut sub)?);
    }
    Ok(items)
}
