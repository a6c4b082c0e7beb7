//! Handshake message bodies. Encoding is canonical; decoding is
//! length-driven and rejects truncation, but leaves all semantic checks
//! (offered versus selected values) to the state machine.

use crate::codec::{
    encode_u24, encode_vec_u16, encode_vec_u24, read_u24, read_vec_u16, read_vec_u24, Codec,
    DecodeError, Reader,
};
use crate::msgs::base::{Payload, PayloadU16, PayloadU24, PayloadU8};
use crate::msgs::enums::{
    CertificateStatusType, CompressionMethod, ExtensionType, HandshakeType, KeyUpdateRequest,
    SignatureScheme, Version,
};
use crate::msgs::extensions::{find_extension, ClientExtension, ServerExtension};
use crate::suites::CipherSuite;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; 32]);

/// Magic server random marking a HelloRetryRequest (RFC 8446, 4.1.3).
pub const HELLO_RETRY_REQUEST_RANDOM: Random = Random([
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8,
    0x91, 0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8,
    0x33, 0x9c,
]);

impl Random {
    pub fn from_slice(bytes: &[u8]) -> Option<Random> {
        <[u8; 32]>::try_from(bytes).ok().map(Random)
    }
}

impl Codec for Random {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let slice = reader.take(32)?;
        let mut data = [0u8; 32];
        data.copy_from_slice(slice);
        Ok(Random(data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId {
    len: usize,
    data: [u8; 32],
}

impl SessionId {
    pub fn empty() -> Self {
        SessionId {
            len: 0,
            data: [0; 32],
        }
    }

    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > 32 {
            return None;
        }
        let mut data = [0u8; 32];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(SessionId {
            len: bytes.len(),
            data,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl Codec for SessionId {
    fn encode(&self, bytes: &mut Vec<u8>) {
        (self.len as u8).encode(bytes);
        bytes.extend_from_slice(self.as_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let len = u8::read(reader)? as usize;
        if len > 32 {
            return Err(DecodeError("session id too long"));
        }
        let slice = reader.take(len)?;
        let mut data = [0u8; 32];
        data[..len].copy_from_slice(slice);
        Ok(SessionId { len, data })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloPayload {
    pub client_version: Version,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<CompressionMethod>,
    pub extensions: Vec<ClientExtension>,
}

impl ClientHelloPayload {
    pub fn get_extension(&self, typ: ExtensionType) -> Option<&ClientExtension> {
        find_extension(&self.extensions, typ)
    }
}

impl Codec for ClientHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.client_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        encode_vec_u16(bytes, &self.cipher_suites);
        let mut compressions = Vec::new();
        for compression in &self.compression_methods {
            compression.encode(&mut compressions);
        }
        (compressions.len() as u8).encode(bytes);
        bytes.append(&mut compressions);
        // SSL3-era hellos have no extensions block at all
        if !self.extensions.is_empty() {
            encode_vec_u16(bytes, &self.extensions);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let client_version = Version::read(reader)?;
        let random = Random::read(reader)?;
        let session_id = SessionId::read(reader)?;
        let cipher_suites = read_vec_u16(reader)?;
        let compression_len = u8::read(reader)? as usize;
        let mut compression_methods = Vec::new();
        let mut sub = reader.sub(compression_len)?;
        while sub.any_left() {
            compression_methods.push(CompressionMethod::read(&mut sub)?);
        }
        let extensions = if reader.any_left() {
            read_vec_u16(reader)?
        } else {
            Vec::new()
        };
        Ok(ClientHelloPayload {
            client_version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
            extensions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHelloPayload {
    pub legacy_version: Version,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: CompressionMethod,
    pub extensions: Vec<ServerExtension>,
}

impl ServerHelloPayload {
    pub fn get_extension(&self, typ: ExtensionType) -> Option<&ServerExtension> {
        find_extension(&self.extensions, typ)
    }

    pub fn is_hello_retry(&self) -> bool {
        self.random == HELLO_RETRY_REQUEST_RANDOM
    }

    /// The selected version: supported_versions when present, the legacy
    /// field otherwise.
    pub fn selected_version(&self) -> Version {
        match self.get_extension(ExtensionType::SupportedVersions) {
            Some(ServerExtension::SupportedVersions(version)) => *version,
            _ => self.legacy_version,
        }
    }
}

impl Codec for ServerHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.legacy_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suite.encode(bytes);
        self.compression_method.encode(bytes);
        if !self.extensions.is_empty() {
            encode_vec_u16(bytes, &self.extensions);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let legacy_version = Version::read(reader)?;
        let random = Random::read(reader)?;
        let session_id = SessionId::read(reader)?;
        let cipher_suite = CipherSuite::read(reader)?;
        let compression_method = CompressionMethod::read(reader)?;
        let extensions = if reader.any_left() {
            read_vec_u16(reader)?
        } else {
            Vec::new()
        };
        Ok(ServerHelloPayload {
            legacy_version,
            random,
            session_id,
            cipher_suite,
            compression_method,
            extensions,
        })
    }
}

/// TLS <= 1.2: a bare list of DER certificates.
pub type CertificatePayload = Vec<PayloadU24>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub cert: PayloadU24,
    pub extensions: Vec<ServerExtension>,
}

impl Codec for CertificateEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.cert.encode(bytes);
        encode_vec_u16(bytes, &self.extensions);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let cert = PayloadU24::read(reader)?;
        let extensions = read_vec_u16(reader)?;
        Ok(CertificateEntry { cert, extensions })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePayload13 {
    pub context: PayloadU8,
    pub entries: Vec<CertificateEntry>,
}

impl CertificatePayload13 {
    pub fn der_chain(&self) -> Vec<Vec<u8>> {
        self.entries.iter().map(|entry| entry.cert.0.clone()).collect()
    }
}

impl Codec for CertificatePayload13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.context.encode(bytes);
        encode_vec_u24(bytes, &self.entries);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let context = PayloadU8::read(reader)?;
        let entries = read_vec_u24(reader)?;
        Ok(CertificatePayload13 { context, entries })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    pub scheme: SignatureScheme,
    pub signature: PayloadU16,
}

impl Codec for DigitallySigned {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.scheme.encode(bytes);
        self.signature.encode(bytes);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let scheme = SignatureScheme::read(reader)?;
        let signature = PayloadU16::read(reader)?;
        Ok(DigitallySigned { scheme, signature })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicketPayload {
    pub lifetime_hint: u32,
    pub ticket: PayloadU16,
}

impl Codec for NewSessionTicketPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.lifetime_hint.encode(bytes);
        self.ticket.encode(bytes);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let lifetime_hint = u32::read(reader)?;
        let ticket = PayloadU16::read(reader)?;
        Ok(NewSessionTicketPayload {
            lifetime_hint,
            ticket,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicketPayload13 {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: PayloadU8,
    pub ticket: PayloadU16,
    pub extensions: Vec<ServerExtension>,
}

impl Codec for NewSessionTicketPayload13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.lifetime.encode(bytes);
        self.age_add.encode(bytes);
        self.nonce.encode(bytes);
        self.ticket.encode(bytes);
        encode_vec_u16(bytes, &self.extensions);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let lifetime = u32::read(reader)?;
        let age_add = u32::read(reader)?;
        let nonce = PayloadU8::read(reader)?;
        let ticket = PayloadU16::read(reader)?;
        let extensions = read_vec_u16(reader)?;
        Ok(NewSessionTicketPayload13 {
            lifetime,
            age_add,
            nonce,
            ticket,
            extensions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStatusPayload {
    pub typ: CertificateStatusType,
    pub response: PayloadU24,
}

impl Codec for CertificateStatusPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.typ.encode(bytes);
        self.response.encode(bytes);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let typ = CertificateStatusType::read(reader)?;
        let response = PayloadU24::read(reader)?;
        Ok(CertificateStatusPayload { typ, response })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakePayload {
    HelloRequest,
    ClientHello(ClientHelloPayload),
    ServerHello(ServerHelloPayload),
    NewSessionTicket(NewSessionTicketPayload),
    NewSessionTicket13(NewSessionTicketPayload13),
    EncryptedExtensions(Vec<ServerExtension>),
    Certificate(CertificatePayload),
    Certificate13(CertificatePayload13),
    ServerKeyExchange(Payload),
    CertificateRequest(Payload),
    ServerHelloDone,
    CertificateVerify(DigitallySigned),
    ClientKeyExchange(Payload),
    Finished(Payload),
    CertificateStatus(CertificateStatusPayload),
    KeyUpdate(KeyUpdateRequest),
    EndOfEarlyData,
    MessageHash(Payload),
    Unknown { typ: HandshakeType, payload: Payload },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessagePayload {
    pub typ: HandshakeType,
    pub payload: HandshakePayload,
}

impl HandshakeMessagePayload {
    pub fn new(typ: HandshakeType, payload: HandshakePayload) -> Self {
        HandshakeMessagePayload { typ, payload }
    }

    pub fn encode(&self, bytes: &mut Vec<u8>) {
        self.typ.encode(bytes);
        let mut body = Vec::new();
        match &self.payload {
            HandshakePayload::HelloRequest
            | HandshakePayload::ServerHelloDone
            | HandshakePayload::EndOfEarlyData => {}
            HandshakePayload::ClientHello(payload) => payload.encode(&mut body),
            HandshakePayload::ServerHello(payload) => payload.encode(&mut body),
            HandshakePayload::NewSessionTicket(payload) => payload.encode(&mut body),
            HandshakePayload::NewSessionTicket13(payload) => payload.encode(&mut body),
            HandshakePayload::EncryptedExtensions(extensions) => {
                encode_vec_u16(&mut body, extensions)
            }
            HandshakePayload::Certificate(certs) => encode_vec_u24(&mut body, certs),
            HandshakePayload::Certificate13(payload) => payload.encode(&mut body),
            HandshakePayload::ServerKeyExchange(payload) => payload.encode(&mut body),
            HandshakePayload::CertificateRequest(payload) => payload.encode(&mut body),
            HandshakePayload::CertificateVerify(signed) => signed.encode(&mut body),
            HandshakePayload::ClientKeyExchange(payload) => payload.encode(&mut body),
            HandshakePayload::Finished(payload) => payload.encode(&mut body),
            HandshakePayload::CertificateStatus(payload) => payload.encode(&mut body),
            HandshakePayload::KeyUpdate(request) => request.encode(&mut body),
            HandshakePayload::MessageHash(payload) => payload.encode(&mut body),
            HandshakePayload::Unknown { payload, .. } => payload.encode(&mut body),
        }
        encode_u24(body.len(), bytes);
        bytes.append(&mut body);
    }

    pub fn get_encoding(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.encode(&mut bytes);
        bytes
    }

    /// Parse one handshake message. `version` disambiguates the payloads
    /// that changed shape in TLS 1.3.
    pub fn read_version(reader: &mut Reader, version: Version) -> Result<Self, DecodeError> {
        let typ = HandshakeType::read(reader)?;
        let length = read_u24(reader)?;
        let mut sub = reader.sub(length)?;

        let payload = match typ {
            HandshakeType::HelloRequest => HandshakePayload::HelloRequest,
            HandshakeType::ClientHello => {
                HandshakePayload::ClientHello(ClientHelloPayload::read(&mut sub)?)
            }
            HandshakeType::ServerHello => {
                HandshakePayload::ServerHello(ServerHelloPayload::read(&mut sub)?)
            }
            HandshakeType::NewSessionTicket if version == Version::Tls13 => {
                HandshakePayload::NewSessionTicket13(NewSessionTicketPayload13::read(&mut sub)?)
            }
            HandshakeType::NewSessionTicket => {
                HandshakePayload::NewSessionTicket(NewSessionTicketPayload::read(&mut sub)?)
            }
            HandshakeType::EncryptedExtensions => {
                HandshakePayload::EncryptedExtensions(read_vec_u16(&mut sub)?)
            }
            HandshakeType::Certificate if version == Version::Tls13 => {
                HandshakePayload::Certificate13(CertificatePayload13::read(&mut sub)?)
            }
            HandshakeType::Certificate => HandshakePayload::Certificate(read_vec_u24(&mut sub)?),
            HandshakeType::ServerKeyExchange => {
                HandshakePayload::ServerKeyExchange(Payload::read(&mut sub)?)
            }
            HandshakeType::CertificateRequest => {
                HandshakePayload::CertificateRequest(Payload::read(&mut sub)?)
            }
            HandshakeType::ServerHelloDone => HandshakePayload::ServerHelloDone,
            HandshakeType::CertificateVerify => {
                HandshakePayload::CertificateVerify(DigitallySigned::read(&mut sub)?)
            }
            HandshakeType::ClientKeyExchange => {
                HandshakePayload::ClientKeyExchange(Payload::read(&mut sub)?)
            }
            HandshakeType::Finished => HandshakePayload::Finished(Payload::read(&mut sub)?),
            HandshakeType::CertificateStatus => {
                HandshakePayload::CertificateStatus(CertificateStatusPayload::read(&mut sub)?)
            }
            HandshakeType::KeyUpdate => {
                HandshakePayload::KeyUpdate(KeyUpdateRequest::read(&mut sub)?)
            }
            HandshakeType::EndOfEarlyData => HandshakePayload::EndOfEarlyData,
            HandshakeType::MessageHash => HandshakePayload::MessageHash(Payload::read(&mut sub)?),
            HandshakeType::Unknown(_) => HandshakePayload::Unknown {
                typ,
                payload: Payload::read(&mut sub)?,
            },
        };

        if sub.any_left() {
            return Err(DecodeError("trailing bytes in handshake message"));
        }
        Ok(HandshakeMessagePayload { typ, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::enums::NamedGroup;
    use crate::msgs::extensions::KeyShareEntry;

    fn sample_client_hello() -> ClientHelloPayload {
        ClientHelloPayload {
            client_version: Version::Tls12,
            random: Random([7; 32]),
            session_id: SessionId::empty(),
            cipher_suites: vec![
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV,
            ],
            compression_methods: vec![CompressionMethod::Null],
            extensions: vec![
                ClientExtension::SupportedVersions(vec![0x0303]),
                ClientExtension::SupportedGroups(vec![NamedGroup::X25519]),
            ],
        }
    }

    #[test]
    fn client_hello_round_trip() {
        let hello = sample_client_hello();
        let msg = HandshakeMessagePayload::new(
            HandshakeType::ClientHello,
            HandshakePayload::ClientHello(hello.clone()),
        );
        let encoding = msg.get_encoding();
        assert_eq!(encoding[0], 1);
        let parsed =
            HandshakeMessagePayload::read_version(&mut Reader::init(&encoding), Version::Tls12)
                .unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.get_encoding(), encoding);
    }

    #[test]
    fn truncated_handshake_is_rejected() {
        let msg = HandshakeMessagePayload::new(
            HandshakeType::ClientHello,
            HandshakePayload::ClientHello(sample_client_hello()),
        );
        let encoding = msg.get_encoding();
        let truncated = &encoding[..encoding.len() - 1];
        assert!(HandshakeMessagePayload::read_version(
            &mut Reader::init(truncated),
            Version::Tls12
        )
        .is_err());
    }

    #[test]
    fn server_hello_selected_version() {
        let mut hello = ServerHelloPayload {
            legacy_version: Version::Tls12,
            random: Random([1; 32]),
            session_id: SessionId::new(&[9; 8]).unwrap(),
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            compression_method: CompressionMethod::Null,
            extensions: vec![ServerExtension::KeyShare(KeyShareEntry::new(
                NamedGroup::X25519,
                vec![0; 32],
            ))],
        };
        assert_eq!(hello.selected_version(), Version::Tls12);
        hello
            .extensions
            .push(ServerExtension::SupportedVersions(Version::Tls13));
        assert_eq!(hello.selected_version(), Version::Tls13);
        assert!(!hello.is_hello_retry());

        let encoding = hello.get_encoding();
        assert_eq!(ServerHelloPayload::read_bytes(&encoding).unwrap(), hello);
    }

    #[test]
    fn tickets_parse_by_version() {
        let ticket12 = NewSessionTicketPayload {
            lifetime_hint: 7200,
            ticket: PayloadU16::new(vec![3; 16]),
        };
        let msg = HandshakeMessagePayload::new(
            HandshakeType::NewSessionTicket,
            HandshakePayload::NewSessionTicket(ticket12),
        );
        let encoding = msg.get_encoding();
        let parsed =
            HandshakeMessagePayload::read_version(&mut Reader::init(&encoding), Version::Tls12)
                .unwrap();
        assert_eq!(parsed, msg);

        let ticket13 = NewSessionTicketPayload13 {
            lifetime: 7200,
            age_add: 0x11223344,
            nonce: PayloadU8::new(vec![0, 1]),
            ticket: PayloadU16::new(vec![5; 32]),
            extensions: Vec::new(),
        };
        let msg = HandshakeMessagePayload::new(
            HandshakeType::NewSessionTicket,
            HandshakePayload::NewSessionTicket13(ticket13),
        );
        let encoding = msg.get_encoding();
        let parsed =
            HandshakeMessagePayload::read_version(&mut Reader::init(&encoding), Version::Tls13)
                .unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn ssl3_hello_without_extensions() {
        let hello = ClientHelloPayload {
            client_version: Version::Ssl30,
            random: Random([0; 32]),
            session_id: SessionId::empty(),
            cipher_suites: vec![CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA],
            compression_methods: vec![CompressionMethod::Null],
            extensions: Vec::new(),
        };
        let encoding = hello.get_encoding();
        // version + random + sid len + suites(2 + 2) + compressions(1 + 1)
        assert_eq!(encoding.len(), 2 + 32 + 1 + 4 + 2);
        assert_eq!(ClientHelloPayload::read_bytes(&encoding).unwrap(), hello);
    }
}
