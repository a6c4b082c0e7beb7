use crate::codec::{Codec, DecodeError, Reader};
use crate::msgs::alert::AlertMessagePayload;
use crate::msgs::base::Payload;
use crate::msgs::ccs::ChangeCipherSpecPayload;
use crate::msgs::enums::{ContentType, HandshakeType, HeartbeatMessageType, Version};
use crate::msgs::handshake::{HandshakeMessagePayload, HandshakePayload};
use crate::msgs::heartbeat::HeartbeatPayload;

/// One record as it appears on the wire: header plus (possibly protected)
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueMessage {
    pub typ: ContentType,
    pub version: Version,
    pub payload: Vec<u8>,
}

impl OpaqueMessage {
    /// Maximum plaintext fragment per record.
    pub const MAX_FRAGMENT: usize = 16384;
    /// Maximum protected payload: fragment plus record overhead.
    pub const MAX_PAYLOAD: usize = 16384 + 2048;
    pub const HEADER_LEN: usize = 5;

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::HEADER_LEN + self.payload.len());
        self.typ.encode(&mut bytes);
        self.version.encode(&mut bytes);
        (self.payload.len() as u16).encode(&mut bytes);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Pop one record off the front of `buffer`. `Ok(None)` means more
    /// bytes are needed; the `usize` is how many bytes were consumed.
    pub fn read(buffer: &[u8]) -> Result<Option<(OpaqueMessage, usize)>, DecodeError> {
        if buffer.len() < Self::HEADER_LEN {
            return Ok(None);
        }
        let mut reader = Reader::init(buffer);
        let typ = ContentType::read(&mut reader)?;
        if matches!(typ, ContentType::Unknown(_)) {
            return Err(DecodeError("unknown record content type"));
        }
        let version = Version::read(&mut reader)?;
        let length = u16::read(&mut reader)? as usize;
        if length > Self::MAX_PAYLOAD {
            return Err(DecodeError("record payload too long"));
        }
        if reader.left() < length {
            return Ok(None);
        }
        let payload = reader.take(length)?.to_vec();
        Ok(Some((
            OpaqueMessage {
                typ,
                version,
                payload,
            },
            Self::HEADER_LEN + length,
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Alert(AlertMessagePayload),
    Handshake(HandshakeMessagePayload),
    ChangeCipherSpec(ChangeCipherSpecPayload),
    ApplicationData(Payload),
    Heartbeat(HeartbeatPayload),
}

/// A parsed plaintext message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: Version,
    pub payload: MessagePayload,
}

impl Message {
    pub fn content_type(&self) -> ContentType {
        match &self.payload {
            MessagePayload::Alert(_) => ContentType::Alert,
            MessagePayload::Handshake(_) => ContentType::Handshake,
            MessagePayload::ChangeCipherSpec(_) => ContentType::ChangeCipherSpec,
            MessagePayload::ApplicationData(_) => ContentType::ApplicationData,
            MessagePayload::Heartbeat(_) => ContentType::Heartbeat,
        }
    }

    pub fn handshake(version: Version, payload: HandshakeMessagePayload) -> Self {
        Message {
            version,
            payload: MessagePayload::Handshake(payload),
        }
    }

    pub fn alert(version: Version, alert: AlertMessagePayload) -> Self {
        Message {
            version,
            payload: MessagePayload::Alert(alert),
        }
    }

    pub fn change_cipher_spec(version: Version) -> Self {
        Message {
            version,
            payload: MessagePayload::ChangeCipherSpec(ChangeCipherSpecPayload),
        }
    }

    pub fn application_data(version: Version, data: Vec<u8>) -> Self {
        Message {
            version,
            payload: MessagePayload::ApplicationData(Payload::new(data)),
        }
    }

    pub fn heartbeat(version: Version, payload: HeartbeatPayload) -> Self {
        Message {
            version,
            payload: MessagePayload::Heartbeat(payload),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match &self.payload {
            MessagePayload::Alert(_) => MessageKind::Alert,
            MessagePayload::ChangeCipherSpec(_) => MessageKind::ChangeCipherSpec,
            MessagePayload::ApplicationData(_) => MessageKind::ApplicationData,
            MessagePayload::Heartbeat(hb) => match hb.typ {
                HeartbeatMessageType::Response => MessageKind::HeartbeatResponse,
                _ => MessageKind::HeartbeatRequest,
            },
            MessagePayload::Handshake(hs) => match &hs.payload {
                HandshakePayload::HelloRequest => MessageKind::HelloRequest,
                HandshakePayload::ClientHello(_) => MessageKind::ClientHello,
                HandshakePayload::ServerHello(_) => MessageKind::ServerHello,
                HandshakePayload::NewSessionTicket(_)
                | HandshakePayload::NewSessionTicket13(_) => MessageKind::NewSessionTicket,
                HandshakePayload::EncryptedExtensions(_) => MessageKind::EncryptedExtensions,
                HandshakePayload::Certificate(_) | HandshakePayload::Certificate13(_) => {
                    MessageKind::Certificate
                }
                HandshakePayload::ServerKeyExchange(_) => MessageKind::ServerKeyExchange,
                HandshakePayload::CertificateRequest(_) => MessageKind::CertificateRequest,
                HandshakePayload::ServerHelloDone => MessageKind::ServerHelloDone,
                HandshakePayload::CertificateVerify(_) => MessageKind::CertificateVerify,
                HandshakePayload::ClientKeyExchange(_) => MessageKind::ClientKeyExchange,
                HandshakePayload::Finished(_) => MessageKind::Finished,
                HandshakePayload::CertificateStatus(_) => MessageKind::CertificateStatus,
                HandshakePayload::KeyUpdate(_) => MessageKind::KeyUpdate,
                HandshakePayload::EndOfEarlyData
                | HandshakePayload::MessageHash(_)
                | HandshakePayload::Unknown { .. } => MessageKind::Other,
            },
        }
    }
}

/// The classification `Connection::wait` works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    HelloRequest,
    ClientHello,
    ServerHello,
    NewSessionTicket,
    EncryptedExtensions,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    CertificateStatus,
    KeyUpdate,
    ChangeCipherSpec,
    Alert,
    ApplicationData,
    HeartbeatRequest,
    HeartbeatResponse,
    Other,
    /// Matches whatever arrives next.
    Any,
}

impl MessageKind {
    pub fn matches(self, message: &Message) -> bool {
        self == MessageKind::Any || message.kind() == self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::enums::{AlertDescription, AlertLevel};

    #[test]
    fn opaque_read_needs_full_record() {
        let msg = OpaqueMessage {
            typ: ContentType::Handshake,
            version: Version::Tls10,
            payload: vec![1, 2, 3, 4],
        };
        let wire = msg.encode();
        assert_eq!(wire[..5], [22, 3, 1, 0, 4]);

        assert_eq!(OpaqueMessage::read(&wire[..3]).unwrap(), None);
        assert_eq!(OpaqueMessage::read(&wire[..7]).unwrap(), None);
        let (parsed, used) = OpaqueMessage::read(&wire).unwrap().unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(used, wire.len());
    }

    #[test]
    fn oversized_record_is_rejected() {
        let mut wire = vec![23, 3, 3];
        wire.extend_from_slice(&(OpaqueMessage::MAX_PAYLOAD as u16 + 1).to_be_bytes());
        assert!(OpaqueMessage::read(&wire).is_err());
    }

    #[test]
    fn kinds_classify() {
        let alert = Message::alert(
            Version::Tls12,
            AlertMessagePayload {
                level: AlertLevel::Warning,
                description: AlertDescription::CloseNotify,
            },
        );
        assert!(MessageKind::Alert.matches(&alert));
        assert!(MessageKind::Any.matches(&alert));
        assert!(!MessageKind::ServerHello.matches(&alert));
    }
}
