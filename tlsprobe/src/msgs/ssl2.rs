//! Just enough SSL 2.0 to probe for it: serialise a ClientHello with
//! 3-byte cipher kinds and dissect the ServerHello. A full SSLv2 handshake
//! is never attempted.

use crate::codec::{Codec, DecodeError, Reader};

pub const SSL2_VERSION: u16 = 0x0002;

/// The classic SSLv2 cipher kinds offered when probing.
pub const SSL2_CIPHER_KINDS: [u32; 7] = [
    0x010080, // SSL_CK_RC4_128_WITH_MD5
    0x020080, // SSL_CK_RC4_128_EXPORT40_WITH_MD5
    0x030080, // SSL_CK_RC2_128_CBC_WITH_MD5
    0x040080, // SSL_CK_RC2_128_CBC_EXPORT40_WITH_MD5
    0x050080, // SSL_CK_IDEA_128_CBC_WITH_MD5
    0x060040, // SSL_CK_DES_64_CBC_WITH_MD5
    0x0700c0, // SSL_CK_DES_192_EDE3_CBC_WITH_MD5
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ssl2ClientHello {
    pub cipher_kinds: Vec<u32>,
    pub session_id: Vec<u8>,
    pub challenge: Vec<u8>,
}

impl Ssl2ClientHello {
    pub fn new(challenge: Vec<u8>) -> Self {
        Ssl2ClientHello {
            cipher_kinds: SSL2_CIPHER_KINDS.to_vec(),
            session_id: Vec::new(),
            challenge,
        }
    }

    /// The full SSLv2 record: 2-byte length with the high bit set, then
    /// the hello body.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        1u8.encode(&mut body); // msg-type CLIENT-HELLO
        SSL2_VERSION.encode(&mut body);
        ((self.cipher_kinds.len() * 3) as u16).encode(&mut body);
        (self.session_id.len() as u16).encode(&mut body);
        (self.challenge.len() as u16).encode(&mut body);
        for kind in &self.cipher_kinds {
            body.push((kind >> 16) as u8);
            body.push((kind >> 8) as u8);
            body.push(*kind as u8);
        }
        body.extend_from_slice(&self.session_id);
        body.extend_from_slice(&self.challenge);

        let mut record = Vec::with_capacity(body.len() + 2);
        record.extend_from_slice(&(0x8000u16 | body.len() as u16).to_be_bytes());
        record.extend_from_slice(&body);
        record
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ssl2ServerHello {
    pub session_id_hit: u8,
    pub certificate_type: u8,
    pub version: u16,
    pub certificate: Vec<u8>,
    pub cipher_kinds: Vec<u32>,
    pub connection_id: Vec<u8>,
}

impl Ssl2ServerHello {
    /// Parse an SSLv2 ServerHello out of raw socket bytes. `Ok(None)`
    /// means the peer did not answer in SSLv2 (e.g. a TLS alert).
    pub fn read(buffer: &[u8]) -> Result<Option<Ssl2ServerHello>, DecodeError> {
        if buffer.len() < 2 || buffer[0] & 0x80 == 0 {
            return Ok(None);
        }
        let length = (u16::from_be_bytes([buffer[0], buffer[1]]) & 0x7fff) as usize;
        let mut reader = Reader::init(&buffer[2..]);
        if reader.left() < length {
            return Err(DecodeError("ssl2 record truncated"));
        }

        let msg_type = u8::read(&mut reader)?;
        if msg_type != 4 {
            return Ok(None);
        }
        let session_id_hit = u8::read(&mut reader)?;
        let certificate_type = u8::read(&mut reader)?;
        let version = u16::read(&mut reader)?;
        let certificate_len = u16::read(&mut reader)? as usize;
        let cipher_specs_len = u16::read(&mut reader)? as usize;
        let connection_id_len = u16::read(&mut reader)? as usize;
        let certificate = reader.take(certificate_len)?.to_vec();
        if cipher_specs_len % 3 != 0 {
            return Err(DecodeError("ssl2 cipher spec length not a multiple of 3"));
        }
        let specs = reader.take(cipher_specs_len)?;
        let cipher_kinds = specs
            .chunks(3)
            .map(|kind| ((kind[0] as u32) << 16) | ((kind[1] as u32) << 8) | kind[2] as u32)
            .collect();
        let connection_id = reader.take(connection_id_len)?.to_vec();

        Ok(Some(Ssl2ServerHello {
            session_id_hit,
            certificate_type,
            version,
            certificate,
            cipher_kinds,
            connection_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_hello_layout() {
        let hello = Ssl2ClientHello::new(vec![0xaa; 16]);
        let wire = hello.encode();
        assert_eq!(wire[0] & 0x80, 0x80);
        let length = (u16::from_be_bytes([wire[0], wire[1]]) & 0x7fff) as usize;
        assert_eq!(length, wire.len() - 2);
        assert_eq!(wire[2], 1); // CLIENT-HELLO
        assert_eq!(&wire[3..5], &[0x00, 0x02]);
        // cipher specs length
        assert_eq!(&wire[5..7], &[0x00, 21]);
    }

    #[test]
    fn server_hello_round_trip() {
        let mut body = vec![
            4,    // SERVER-HELLO
            0,    // session id hit
            1,    // certificate type
            0, 2, // version
            0, 3, // certificate length
            0, 6, // cipher specs length
            0, 2, // connection id length
        ];
        body.extend_from_slice(&[0xde, 0xad, 0xbe]); // certificate
        body.extend_from_slice(&[0x01, 0x00, 0x80, 0x07, 0x00, 0xc0]);
        body.extend_from_slice(&[0x42, 0x43]);
        let mut wire = (0x8000u16 | body.len() as u16).to_be_bytes().to_vec();
        wire.extend_from_slice(&body);

        let hello = Ssl2ServerHello::read(&wire).unwrap().unwrap();
        assert_eq!(hello.version, 2);
        assert_eq!(hello.cipher_kinds, vec![0x010080, 0x0700c0]);
        assert_eq!(hello.certificate, vec![0xde, 0xad, 0xbe]);
    }

    #[test]
    fn tls_answer_is_not_ssl2() {
        // a TLS alert record
        assert_eq!(Ssl2ServerHello::read(&[21, 3, 1, 0, 2, 2, 40]).unwrap(), None);
    }
}
