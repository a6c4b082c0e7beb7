//! Hello extensions. Client extensions are what the scanner emits, server
//! extensions are what it dissects; anything it cannot interpret is
//! retained verbatim under `Unknown` so the workers can still detect its
//! presence and the bytes round-trip exactly.

use crate::codec::{
    encode_vec_u16, encode_vec_u8, read_vec_u16, read_vec_u8, Codec, DecodeError, Reader,
};
use crate::msgs::base::{Payload, PayloadU16, PayloadU8};
use crate::msgs::enums::{
    ECPointFormat, ExtensionType, HeartbeatMode, NamedGroup, PskKeyExchangeMode, ServerNameType,
    SignatureScheme, Version,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub payload: PayloadU16,
}

impl KeyShareEntry {
    pub fn new(group: NamedGroup, share: impl Into<Vec<u8>>) -> Self {
        KeyShareEntry {
            group,
            payload: PayloadU16::new(share),
        }
    }
}

impl Codec for KeyShareEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.group.encode(bytes);
        self.payload.encode(bytes);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let group = NamedGroup::read(reader)?;
        let payload = PayloadU16::read(reader)?;
        Ok(KeyShareEntry { group, payload })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskIdentity {
    pub identity: PayloadU16,
    pub obfuscated_ticket_age: u32,
}

impl Codec for PskIdentity {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.identity.encode(bytes);
        self.obfuscated_ticket_age.encode(bytes);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let identity = PayloadU16::read(reader)?;
        let obfuscated_ticket_age = u32::read(reader)?;
        Ok(PskIdentity {
            identity,
            obfuscated_ticket_age,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresharedKeyOffer {
    pub identities: Vec<PskIdentity>,
    pub binders: Vec<PayloadU8>,
}

impl PresharedKeyOffer {
    /// Length of the binders section including its two length bytes; the
    /// transcript for binder computation ends right before it.
    pub fn binders_encoding_len(&self) -> usize {
        2 + self
            .binders
            .iter()
            .map(|binder| binder.0.len() + 1)
            .sum::<usize>()
    }
}

impl Codec for PresharedKeyOffer {
    fn encode(&self, bytes: &mut Vec<u8>) {
        encode_vec_u16(bytes, &self.identities);
        encode_vec_u16(bytes, &self.binders);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let identities = read_vec_u16(reader)?;
        let binders = read_vec_u16(reader)?;
        Ok(PresharedKeyOffer {
            identities,
            binders,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientExtension {
    ServerName(String),
    SupportedGroups(Vec<NamedGroup>),
    ECPointFormats(Vec<ECPointFormat>),
    SignatureAlgorithms(Vec<SignatureScheme>),
    /// Raw wire values so GREASE versions can be interspersed.
    SupportedVersions(Vec<u16>),
    KeyShare(Vec<KeyShareEntry>),
    PskKeyExchangeModes(Vec<PskKeyExchangeMode>),
    /// Must be the last extension of the hello.
    PresharedKey(PresharedKeyOffer),
    /// Empty body requests a ticket, otherwise offers one.
    SessionTicket(Vec<u8>),
    ExtendedMasterSecret,
    EncryptThenMac,
    RenegotiationInfo(PayloadU8),
    StatusRequest,
    StatusRequestV2,
    Heartbeat(HeartbeatMode),
    Padding(usize),
    Grease(u16),
    Unknown { typ: u16, payload: Payload },
}

impl ClientExtension {
    pub fn get_type(&self) -> u16 {
        match self {
            ClientExtension::ServerName(_) => ExtensionType::ServerName.to_wire(),
            ClientExtension::SupportedGroups(_) => ExtensionType::SupportedGroups.to_wire(),
            ClientExtension::ECPointFormats(_) => ExtensionType::ECPointFormats.to_wire(),
            ClientExtension::SignatureAlgorithms(_) => {
                ExtensionType::SignatureAlgorithms.to_wire()
            }
            ClientExtension::SupportedVersions(_) => ExtensionType::SupportedVersions.to_wire(),
            ClientExtension::KeyShare(_) => ExtensionType::KeyShare.to_wire(),
            ClientExtension::PskKeyExchangeModes(_) => {
                ExtensionType::PskKeyExchangeModes.to_wire()
            }
            ClientExtension::PresharedKey(_) => ExtensionType::PreSharedKey.to_wire(),
            ClientExtension::SessionTicket(_) => ExtensionType::SessionTicket.to_wire(),
            ClientExtension::ExtendedMasterSecret => {
                ExtensionType::ExtendedMasterSecret.to_wire()
            }
            ClientExtension::EncryptThenMac => ExtensionType::EncryptThenMac.to_wire(),
            ClientExtension::RenegotiationInfo(_) => ExtensionType::RenegotiationInfo.to_wire(),
            ClientExtension::StatusRequest => ExtensionType::StatusRequest.to_wire(),
            ClientExtension::StatusRequestV2 => ExtensionType::StatusRequestV2.to_wire(),
            ClientExtension::Heartbeat(_) => ExtensionType::Heartbeat.to_wire(),
            ClientExtension::Padding(_) => ExtensionType::Padding.to_wire(),
            ClientExtension::Grease(typ) => *typ,
            ClientExtension::Unknown { typ, .. } => *typ,
        }
    }

    fn body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            ClientExtension::ServerName(name) => {
                let mut entry = Vec::new();
                ServerNameType::HostName.encode(&mut entry);
                PayloadU16::new(name.as_bytes()).encode(&mut entry);
                (entry.len() as u16).encode(&mut body);
                body.extend_from_slice(&entry);
            }
            ClientExtension::SupportedGroups(groups) => encode_vec_u16(&mut body, groups),
            ClientExtension::ECPointFormats(formats) => encode_vec_u8(&mut body, formats),
            ClientExtension::SignatureAlgorithms(schemes) => encode_vec_u16(&mut body, schemes),
            ClientExtension::SupportedVersions(versions) => encode_vec_u8(&mut body, versions),
            ClientExtension::KeyShare(entries) => encode_vec_u16(&mut body, entries),
            ClientExtension::PskKeyExchangeModes(modes) => encode_vec_u8(&mut body, modes),
            ClientExtension::PresharedKey(offer) => offer.encode(&mut body),
            ClientExtension::SessionTicket(ticket) => body.extend_from_slice(ticket),
            ClientExtension::ExtendedMasterSecret | ClientExtension::EncryptThenMac => {}
            ClientExtension::RenegotiationInfo(data) => data.encode(&mut body),
            ClientExtension::StatusRequest => {
                // OCSP, no responder ids, no request extensions
                1u8.encode(&mut body);
                0u16.encode(&mut body);
                0u16.encode(&mut body);
            }
            ClientExtension::StatusRequestV2 => {
                // one ocsp_multi item with an empty request
                let mut item = Vec::new();
                2u8.encode(&mut item);
                4u16.encode(&mut item);
                0u16.encode(&mut item);
                0u16.encode(&mut item);
                (item.len() as u16).encode(&mut body);
                body.extend_from_slice(&item);
            }
            ClientExtension::Heartbeat(mode) => mode.encode(&mut body),
            ClientExtension::Padding(length) => body.resize(*length, 0),
            ClientExtension::Grease(_) => {}
            ClientExtension::Unknown { payload, .. } => payload.encode(&mut body),
        }
        body
    }
}

impl Codec for ClientExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);
        let body = self.body();
        (body.len() as u16).encode(bytes);
        bytes.extend_from_slice(&body);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let typ = u16::read(reader)?;
        let body = PayloadU16::read(reader)?.0;
        let mut sub = Reader::init(&body);

        let parsed = match ExtensionType::from_wire(typ) {
            ExtensionType::SupportedGroups => {
                read_vec_u16(&mut sub).map(ClientExtension::SupportedGroups)
            }
            ExtensionType::ECPointFormats => {
                read_vec_u8(&mut sub).map(ClientExtension::ECPointFormats)
            }
            ExtensionType::SignatureAlgorithms => {
                read_vec_u16(&mut sub).map(ClientExtension::SignatureAlgorithms)
            }
            ExtensionType::SupportedVersions => {
                read_vec_u8(&mut sub).map(ClientExtension::SupportedVersions)
            }
            ExtensionType::KeyShare => read_vec_u16(&mut sub).map(ClientExtension::KeyShare),
            ExtensionType::PskKeyExchangeModes => {
                read_vec_u8(&mut sub).map(ClientExtension::PskKeyExchangeModes)
            }
            ExtensionType::PreSharedKey => {
                PresharedKeyOffer::read(&mut sub).map(ClientExtension::PresharedKey)
            }
            ExtensionType::SessionTicket => {
                Ok(ClientExtension::SessionTicket(sub.rest().to_vec()))
            }
            ExtensionType::ExtendedMasterSecret if body.is_empty() => {
                Ok(ClientExtension::ExtendedMasterSecret)
            }
            ExtensionType::EncryptThenMac if body.is_empty() => {
                Ok(ClientExtension::EncryptThenMac)
            }
            ExtensionType::RenegotiationInfo => {
                PayloadU8::read(&mut sub).map(ClientExtension::RenegotiationInfo)
            }
            ExtensionType::Heartbeat => HeartbeatMode::read(&mut sub).map(ClientExtension::Heartbeat),
            _ => Err(DecodeError("uninterpreted extension")),
        };

        // Anything unparsed (or with spare bytes) is retained verbatim.
        match parsed {
            Ok(ext) if !sub.any_left() => Ok(ext),
            _ => Ok(ClientExtension::Unknown {
                typ,
                payload: Payload::new(body),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerExtension {
    ServerNameAck,
    SupportedGroups(Vec<NamedGroup>),
    ECPointFormats(Vec<ECPointFormat>),
    KeyShare(KeyShareEntry),
    /// A bare group in the key_share slot is a HelloRetryRequest.
    KeyShareHelloRetry(NamedGroup),
    PresharedKey(u16),
    SupportedVersions(Version),
    SessionTicketAck,
    ExtendedMasterSecretAck,
    EncryptThenMacAck,
    RenegotiationInfo(PayloadU8),
    StatusRequestAck,
    Heartbeat(HeartbeatMode),
    /// NewSessionTicket only: max_early_data_size.
    EarlyData(u32),
    Unknown { typ: u16, payload: Payload },
}

impl ServerExtension {
    pub fn get_type(&self) -> u16 {
        match self {
            ServerExtension::ServerNameAck => ExtensionType::ServerName.to_wire(),
            ServerExtension::SupportedGroups(_) => ExtensionType::SupportedGroups.to_wire(),
            ServerExtension::ECPointFormats(_) => ExtensionType::ECPointFormats.to_wire(),
            ServerExtension::KeyShare(_) | ServerExtension::KeyShareHelloRetry(_) => {
                ExtensionType::KeyShare.to_wire()
            }
            ServerExtension::PresharedKey(_) => ExtensionType::PreSharedKey.to_wire(),
            ServerExtension::SupportedVersions(_) => ExtensionType::SupportedVersions.to_wire(),
            ServerExtension::SessionTicketAck => ExtensionType::SessionTicket.to_wire(),
            ServerExtension::ExtendedMasterSecretAck => {
                ExtensionType::ExtendedMasterSecret.to_wire()
            }
            ServerExtension::EncryptThenMacAck => ExtensionType::EncryptThenMac.to_wire(),
            ServerExtension::RenegotiationInfo(_) => ExtensionType::RenegotiationInfo.to_wire(),
            ServerExtension::StatusRequestAck => ExtensionType::StatusRequest.to_wire(),
            ServerExtension::Heartbeat(_) => ExtensionType::Heartbeat.to_wire(),
            ServerExtension::EarlyData(_) => ExtensionType::EarlyData.to_wire(),
            ServerExtension::Unknown { typ, .. } => *typ,
        }
    }

    fn body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            ServerExtension::ServerNameAck
            | ServerExtension::SessionTicketAck
            | ServerExtension::ExtendedMasterSecretAck
            | ServerExtension::EncryptThenMacAck
            | ServerExtension::StatusRequestAck => {}
            ServerExtension::SupportedGroups(groups) => encode_vec_u16(&mut body, groups),
            ServerExtension::ECPointFormats(formats) => encode_vec_u8(&mut body, formats),
            ServerExtension::KeyShare(entry) => entry.encode(&mut body),
            ServerExtension::KeyShareHelloRetry(group) => group.encode(&mut body),
            ServerExtension::PresharedKey(index) => index.encode(&mut body),
            ServerExtension::SupportedVersions(version) => version.encode(&mut body),
            ServerExtension::RenegotiationInfo(data) => data.encode(&mut body),
            ServerExtension::Heartbeat(mode) => mode.encode(&mut body),
            ServerExtension::EarlyData(max) => max.encode(&mut body),
            ServerExtension::Unknown { payload, .. } => payload.encode(&mut body),
        }
        body
    }
}

impl Codec for ServerExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);
        let body = self.body();
        (body.len() as u16).encode(bytes);
        bytes.extend_from_slice(&body);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let typ = u16::read(reader)?;
        let body = PayloadU16::read(reader)?.0;
        let mut sub = Reader::init(&body);

        let parsed = match ExtensionType::from_wire(typ) {
            ExtensionType::ServerName if body.is_empty() => Ok(ServerExtension::ServerNameAck),
            ExtensionType::SupportedGroups => {
                read_vec_u16(&mut sub).map(ServerExtension::SupportedGroups)
            }
            ExtensionType::ECPointFormats => {
                read_vec_u8(&mut sub).map(ServerExtension::ECPointFormats)
            }
            ExtensionType::KeyShare if body.len() == 2 => {
                NamedGroup::read(&mut sub).map(ServerExtension::KeyShareHelloRetry)
            }
            ExtensionType::KeyShare => KeyShareEntry::read(&mut sub).map(ServerExtension::KeyShare),
            ExtensionType::PreSharedKey => u16::read(&mut sub).map(ServerExtension::PresharedKey),
            ExtensionType::SupportedVersions => {
                Version::read(&mut sub).map(ServerExtension::SupportedVersions)
            }
            ExtensionType::SessionTicket if body.is_empty() => {
                Ok(ServerExtension::SessionTicketAck)
            }
            ExtensionType::ExtendedMasterSecret if body.is_empty() => {
                Ok(ServerExtension::ExtendedMasterSecretAck)
            }
            ExtensionType::EncryptThenMac if body.is_empty() => {
                Ok(ServerExtension::EncryptThenMacAck)
            }
            ExtensionType::RenegotiationInfo => {
                PayloadU8::read(&mut sub).map(ServerExtension::RenegotiationInfo)
            }
            ExtensionType::StatusRequest if body.is_empty() => {
                Ok(ServerExtension::StatusRequestAck)
            }
            ExtensionType::Heartbeat => HeartbeatMode::read(&mut sub).map(ServerExtension::Heartbeat),
            ExtensionType::EarlyData if body.len() == 4 => {
                u32::read(&mut sub).map(ServerExtension::EarlyData)
            }
            _ => Err(DecodeError("uninterpreted extension")),
        };

        match parsed {
            Ok(ext) if !sub.any_left() => Ok(ext),
            _ => Ok(ServerExtension::Unknown {
                typ,
                payload: Payload::new(body),
            }),
        }
    }
}

/// First extension of the given type, by wire id.
pub fn find_extension<'a, T>(extensions: &'a [T], typ: ExtensionType) -> Option<&'a T>
where
    T: ExtensionId,
{
    extensions.iter().find(|ext| ext.type_id() == typ.to_wire())
}

pub trait ExtensionId {
    fn type_id(&self) -> u16;
}

impl ExtensionId for ClientExtension {
    fn type_id(&self) -> u16 {
        self.get_type()
    }
}

impl ExtensionId for ServerExtension {
    fn type_id(&self) -> u16 {
        self.get_type()
    }
}
