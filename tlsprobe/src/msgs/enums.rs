//! Wire enums. Every enum keeps unknown registry values in an `Unknown`
//! variant so a server's answer always round-trips to its exact input
//! bytes.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::{Codec, DecodeError, Reader};

fn parse_unknown(text: &str) -> Option<u16> {
    text.strip_prefix("Unknown(")?
        .strip_suffix(')')?
        .parse()
        .ok()
}

macro_rules! wire_enum_u8 {
    ($name:ident { $($variant:ident => $value:literal,)+ }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            Unknown(u8),
        }

        impl $name {
            pub fn to_wire(self) -> u8 {
                match self {
                    $($name::$variant => $value,)+
                    $name::Unknown(value) => value,
                }
            }

            pub fn from_wire(value: u8) -> Self {
                match value {
                    $($value => $name::$variant,)+
                    other => $name::Unknown(other),
                }
            }
        }

        impl Codec for $name {
            fn encode(&self, bytes: &mut Vec<u8>) {
                self.to_wire().encode(bytes);
            }

            fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
                u8::read(reader).map(Self::from_wire)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&format_args!("{:?}", self))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                match text.as_str() {
                    $(stringify!($variant) => Ok($name::$variant),)+
                    other => parse_unknown(other)
                        .map(|value| $name::from_wire(value as u8))
                        .ok_or_else(|| D::Error::custom(format!("unknown value {:?}", other))),
                }
            }
        }
    };
}

macro_rules! wire_enum_u16 {
    ($name:ident { $($variant:ident => $value:literal,)+ }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            Unknown(u16),
        }

        impl $name {
            pub fn to_wire(self) -> u16 {
                match self {
                    $($name::$variant => $value,)+
                    $name::Unknown(value) => value,
                }
            }

            pub fn from_wire(value: u16) -> Self {
                match value {
                    $($value => $name::$variant,)+
                    other => $name::Unknown(other),
                }
            }
        }

        impl Codec for $name {
            fn encode(&self, bytes: &mut Vec<u8>) {
                self.to_wire().encode(bytes);
            }

            fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
                u16::read(reader).map(Self::from_wire)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&format_args!("{:?}", self))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                match text.as_str() {
                    $(stringify!($variant) => Ok($name::$variant),)+
                    other => parse_unknown(other)
                        .map($name::from_wire)
                        .ok_or_else(|| D::Error::custom(format!("unknown value {:?}", other))),
                }
            }
        }
    };
}

/// Protocol versions in their negotiation order. The `Ord` instance is the
/// total order used for min/max version decisions; the wire values live in
/// `to_wire`/`from_wire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    Ssl20,
    Ssl30,
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl Version {
    pub fn to_wire(self) -> u16 {
        match self {
            Version::Ssl20 => 0x0002,
            Version::Ssl30 => 0x0300,
            Version::Tls10 => 0x0301,
            Version::Tls11 => 0x0302,
            Version::Tls12 => 0x0303,
            Version::Tls13 => 0x0304,
        }
    }

    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0x0002 => Some(Version::Ssl20),
            0x0300 => Some(Version::Ssl30),
            0x0301 => Some(Version::Tls10),
            0x0302 => Some(Version::Tls11),
            0x0303 => Some(Version::Tls12),
            0x0304 => Some(Version::Tls13),
            _ => None,
        }
    }

    pub fn all() -> [Version; 6] {
        [
            Version::Ssl20,
            Version::Ssl30,
            Version::Tls10,
            Version::Tls11,
            Version::Tls12,
            Version::Tls13,
        ]
    }

    pub fn tls_only() -> [Version; 4] {
        [Version::Tls10, Version::Tls11, Version::Tls12, Version::Tls13]
    }

    /// The version stamped on outbound records: intolerant middleboxes
    /// choke on anything above TLS 1.2.
    pub fn record_layer(self) -> Version {
        self.min(Version::Tls12)
    }
}

impl Codec for Version {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.to_wire().encode(bytes);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        Version::from_wire(u16::read(reader)?).ok_or(DecodeError("unknown protocol version"))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let name = match self {
            Version::Ssl20 => "SSL20",
            Version::Ssl30 => "SSL30",
            Version::Tls10 => "TLS10",
            Version::Tls11 => "TLS11",
            Version::Tls12 => "TLS12",
            Version::Tls13 => "TLS13",
        };
        serializer.serialize_str(name)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        match text.as_str() {
            "SSL20" => Ok(Version::Ssl20),
            "SSL30" => Ok(Version::Ssl30),
            "TLS10" => Ok(Version::Tls10),
            "TLS11" => Ok(Version::Tls11),
            "TLS12" => Ok(Version::Tls12),
            "TLS13" => Ok(Version::Tls13),
            other => Err(D::Error::custom(format!("unknown version {:?}", other))),
        }
    }
}

wire_enum_u8!(ContentType {
    ChangeCipherSpec => 20,
    Alert => 21,
    Handshake => 22,
    ApplicationData => 23,
    Heartbeat => 24,
});

wire_enum_u8!(HandshakeType {
    HelloRequest => 0,
    ClientHello => 1,
    ServerHello => 2,
    NewSessionTicket => 4,
    EndOfEarlyData => 5,
    EncryptedExtensions => 8,
    Certificate => 11,
    ServerKeyExchange => 12,
    CertificateRequest => 13,
    ServerHelloDone => 14,
    CertificateVerify => 15,
    ClientKeyExchange => 16,
    Finished => 20,
    CertificateStatus => 22,
    KeyUpdate => 24,
    MessageHash => 254,
});

wire_enum_u8!(AlertLevel {
    Warning => 1,
    Fatal => 2,
});

wire_enum_u8!(AlertDescription {
    CloseNotify => 0,
    UnexpectedMessage => 10,
    BadRecordMac => 20,
    DecryptionFailed => 21,
    RecordOverflow => 22,
    DecompressionFailure => 30,
    HandshakeFailure => 40,
    BadCertificate => 42,
    UnsupportedCertificate => 43,
    CertificateRevoked => 44,
    CertificateExpired => 45,
    CertificateUnknown => 46,
    IllegalParameter => 47,
    UnknownCa => 48,
    AccessDenied => 49,
    DecodeError => 50,
    DecryptError => 51,
    ProtocolVersion => 70,
    InsufficientSecurity => 71,
    InternalError => 80,
    InappropriateFallback => 86,
    UserCanceled => 90,
    NoRenegotiation => 100,
    MissingExtension => 109,
    UnsupportedExtension => 110,
    UnrecognisedName => 112,
    BadCertificateStatusResponse => 113,
    UnknownPskIdentity => 115,
    CertificateRequired => 116,
    NoApplicationProtocol => 120,
});

wire_enum_u8!(CompressionMethod {
    Null => 0,
    Deflate => 1,
    Lsz => 64,
});

wire_enum_u8!(ECPointFormat {
    Uncompressed => 0,
    AnsiX962CompressedPrime => 1,
    AnsiX962CompressedChar2 => 2,
});

wire_enum_u8!(HeartbeatMode {
    PeerAllowedToSend => 1,
    PeerNotAllowedToSend => 2,
});

wire_enum_u8!(HeartbeatMessageType {
    Request => 1,
    Response => 2,
});

wire_enum_u8!(PskKeyExchangeMode {
    PskKe => 0,
    PskDheKe => 1,
});

wire_enum_u8!(KeyUpdateRequest {
    UpdateNotRequested => 0,
    UpdateRequested => 1,
});

wire_enum_u8!(CertificateStatusType {
    Ocsp => 1,
    OcspMulti => 2,
});

wire_enum_u8!(ServerNameType {
    HostName => 0,
});

wire_enum_u16!(ExtensionType {
    ServerName => 0,
    MaxFragmentLength => 1,
    StatusRequest => 5,
    SupportedGroups => 10,
    ECPointFormats => 11,
    SignatureAlgorithms => 13,
    Heartbeat => 15,
    ALProtocolNegotiation => 16,
    StatusRequestV2 => 17,
    SignedCertificateTimestamp => 18,
    Padding => 21,
    EncryptThenMac => 22,
    ExtendedMasterSecret => 23,
    SessionTicket => 35,
    PreSharedKey => 41,
    EarlyData => 42,
    SupportedVersions => 43,
    Cookie => 44,
    PskKeyExchangeModes => 45,
    CertificateAuthorities => 47,
    SignatureAlgorithmsCert => 50,
    KeyShare => 51,
    RenegotiationInfo => 0xff01,
});

wire_enum_u16!(NamedGroup {
    Sect163k1 => 1,
    Sect163r2 => 3,
    Sect233k1 => 6,
    Sect233r1 => 7,
    Sect283k1 => 9,
    Sect283r1 => 10,
    Sect409k1 => 11,
    Sect409r1 => 12,
    Sect571k1 => 13,
    Sect571r1 => 14,
    Secp224r1 => 21,
    Secp256k1 => 22,
    Secp256r1 => 23,
    Secp384r1 => 24,
    Secp521r1 => 25,
    BrainpoolP256r1 => 26,
    BrainpoolP384r1 => 27,
    BrainpoolP512r1 => 28,
    X25519 => 29,
    X448 => 30,
    Ffdhe2048 => 256,
    Ffdhe3072 => 257,
    Ffdhe4096 => 258,
    Ffdhe6144 => 259,
    Ffdhe8192 => 260,
});

wire_enum_u16!(SignatureScheme {
    RsaPkcs1Sha1 => 0x0201,
    EcdsaSha1 => 0x0203,
    RsaPkcs1Sha256 => 0x0401,
    EcdsaNistp256Sha256 => 0x0403,
    RsaPkcs1Sha384 => 0x0501,
    EcdsaNistp384Sha384 => 0x0503,
    RsaPkcs1Sha512 => 0x0601,
    EcdsaNistp521Sha512 => 0x0603,
    RsaPssRsaeSha256 => 0x0804,
    RsaPssRsaeSha384 => 0x0805,
    RsaPssRsaeSha512 => 0x0806,
    Ed25519 => 0x0807,
    Ed448 => 0x0808,
});
