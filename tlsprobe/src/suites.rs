//! Static cipher-suite registry: 16-bit id to (key exchange, bulk cipher,
//! hash) plus the bulk/MAC descriptors the record layer works from.
//! Unknown ids parse fine but are unsupported for a handshake.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::{Codec, DecodeError, Reader};
use crate::crypto::hash::HashAlgorithm;
use crate::msgs::enums::Version;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CipherSuite(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KeyExchangeMethod {
    Rsa,
    DheRsa,
    DheDss,
    DhAnon,
    EcdheRsa,
    EcdheEcdsa,
    EcdhAnon,
    Tls13,
}

impl KeyExchangeMethod {
    /// A ServerKeyExchange message is part of the server's flight.
    pub fn sends_server_key_exchange(self) -> bool {
        !matches!(self, KeyExchangeMethod::Rsa | KeyExchangeMethod::Tls13)
    }

    /// Anonymous methods carry no certificate and no signature.
    pub fn is_anonymous(self) -> bool {
        matches!(self, KeyExchangeMethod::DhAnon | KeyExchangeMethod::EcdhAnon)
    }

    pub fn is_ecdhe(self) -> bool {
        matches!(
            self,
            KeyExchangeMethod::EcdheRsa | KeyExchangeMethod::EcdheEcdsa | KeyExchangeMethod::EcdhAnon
        )
    }

    pub fn is_dhe(self) -> bool {
        matches!(
            self,
            KeyExchangeMethod::DheRsa | KeyExchangeMethod::DheDss | KeyExchangeMethod::DhAnon
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CipherType {
    Stream,
    Block,
    Aead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkAlgorithm {
    Rc4_128,
    Aes128Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes256Gcm,
    Aes128Ccm,
    Aes128Ccm8,
    ChaCha20Poly1305,
}

/// Record-protection parameters of a bulk cipher. `iv_len` is the length
/// derived from the key block: the full CBC IV, the 4-byte AEAD salt for
/// GCM/CCM, the full 12-byte nonce for ChaCha20.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkCipher {
    pub algorithm: BulkAlgorithm,
    pub typ: CipherType,
    pub enc_key_len: usize,
    pub block_size: usize,
    pub iv_len: usize,
    pub tag_len: usize,
}

pub static BULK_RC4_128: BulkCipher = BulkCipher {
    algorithm: BulkAlgorithm::Rc4_128,
    typ: CipherType::Stream,
    enc_key_len: 16,
    block_size: 0,
    iv_len: 0,
    tag_len: 0,
};

pub static BULK_AES_128_CBC: BulkCipher = BulkCipher {
    algorithm: BulkAlgorithm::Aes128Cbc,
    typ: CipherType::Block,
    enc_key_len: 16,
    block_size: 16,
    iv_len: 16,
    tag_len: 0,
};

pub static BULK_AES_256_CBC: BulkCipher = BulkCipher {
    algorithm: BulkAlgorithm::Aes256Cbc,
    typ: CipherType::Block,
    enc_key_len: 32,
    block_size: 16,
    iv_len: 16,
    tag_len: 0,
};

pub static BULK_AES_128_GCM: BulkCipher = BulkCipher {
    algorithm: BulkAlgorithm::Aes128Gcm,
    typ: CipherType::Aead,
    enc_key_len: 16,
    block_size: 16,
    iv_len: 4,
    tag_len: 16,
};

pub static BULK_AES_256_GCM: BulkCipher = BulkCipher {
    algorithm: BulkAlgorithm::Aes256Gcm,
    typ: CipherType::Aead,
    enc_key_len: 32,
    block_size: 16,
    iv_len: 4,
    tag_len: 16,
};

pub static BULK_AES_128_CCM: BulkCipher = BulkCipher {
    algorithm: BulkAlgorithm::Aes128Ccm,
    typ: CipherType::Aead,
    enc_key_len: 16,
    block_size: 16,
    iv_len: 4,
    tag_len: 16,
};

pub static BULK_AES_128_CCM_8: BulkCipher = BulkCipher {
    algorithm: BulkAlgorithm::Aes128Ccm8,
    typ: CipherType::Aead,
    enc_key_len: 16,
    block_size: 16,
    iv_len: 4,
    tag_len: 8,
};

pub static BULK_CHACHA20_POLY1305: BulkCipher = BulkCipher {
    algorithm: BulkAlgorithm::ChaCha20Poly1305,
    typ: CipherType::Aead,
    enc_key_len: 32,
    block_size: 0,
    iv_len: 12,
    tag_len: 16,
};

/// MAC parameters; for AEAD suites the MAC key length is forced to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mac {
    pub hash: HashAlgorithm,
    pub mac_len: usize,
    pub mac_key_len: usize,
}

impl Mac {
    pub fn hmac(hash: HashAlgorithm) -> Mac {
        Mac {
            hash,
            mac_len: hash.output_len(),
            mac_key_len: hash.output_len(),
        }
    }

    pub fn aead(hash: HashAlgorithm) -> Mac {
        Mac {
            hash,
            mac_len: 0,
            mac_key_len: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SuiteDescription {
    pub suite: CipherSuite,
    pub name: &'static str,
    pub kx: KeyExchangeMethod,
    pub bulk: &'static BulkCipher,
    pub hash: HashAlgorithm,
}

impl SuiteDescription {
    /// The PRF hash for TLS 1.2 and the HKDF hash for TLS 1.3.
    pub fn prf_hash(&self) -> HashAlgorithm {
        match self.hash {
            HashAlgorithm::Sha384 => HashAlgorithm::Sha384,
            _ => HashAlgorithm::Sha256,
        }
    }

    pub fn mac(&self) -> Mac {
        match self.bulk.typ {
            CipherType::Aead => Mac::aead(self.hash),
            _ => Mac::hmac(self.hash),
        }
    }

    /// Lowest protocol version the suite is defined for.
    pub fn min_version(&self) -> Version {
        if self.kx == KeyExchangeMethod::Tls13 {
            return Version::Tls13;
        }
        if self.bulk.typ == CipherType::Aead
            || matches!(self.hash, HashAlgorithm::Sha256 | HashAlgorithm::Sha384)
        {
            return Version::Tls12;
        }
        Version::Ssl30
    }

    pub fn usable_with(&self, version: Version) -> bool {
        if self.kx == KeyExchangeMethod::Tls13 {
            version == Version::Tls13
        } else {
            version >= self.min_version() && version <= Version::Tls12
        }
    }
}

macro_rules! suites {
    ($( $value:literal, $name:ident, $kx:ident, $bulk:ident, $hash:ident; )+) => {
        impl CipherSuite {
            $( pub const $name: CipherSuite = CipherSuite($value); )+
        }

        static SUITE_TABLE: &[SuiteDescription] = &[
            $( SuiteDescription {
                suite: CipherSuite($value),
                name: stringify!($name),
                kx: KeyExchangeMethod::$kx,
                bulk: &$bulk,
                hash: HashAlgorithm::$hash,
            }, )+
        ];
    };
}

suites! {
    // TLS 1.3
    0x1301, TLS13_AES_128_GCM_SHA256, Tls13, BULK_AES_128_GCM, Sha256;
    0x1302, TLS13_AES_256_GCM_SHA384, Tls13, BULK_AES_256_GCM, Sha384;
    0x1303, TLS13_CHACHA20_POLY1305_SHA256, Tls13, BULK_CHACHA20_POLY1305, Sha256;
    0x1304, TLS13_AES_128_CCM_SHA256, Tls13, BULK_AES_128_CCM, Sha256;
    0x1305, TLS13_AES_128_CCM_8_SHA256, Tls13, BULK_AES_128_CCM_8, Sha256;
    // static RSA
    0x0004, TLS_RSA_WITH_RC4_128_MD5, Rsa, BULK_RC4_128, Md5;
    0x0005, TLS_RSA_WITH_RC4_128_SHA, Rsa, BULK_RC4_128, Sha1;
    0x002f, TLS_RSA_WITH_AES_128_CBC_SHA, Rsa, BULK_AES_128_CBC, Sha1;
    0x0035, TLS_RSA_WITH_AES_256_CBC_SHA, Rsa, BULK_AES_256_CBC, Sha1;
    0x003c, TLS_RSA_WITH_AES_128_CBC_SHA256, Rsa, BULK_AES_128_CBC, Sha256;
    0x003d, TLS_RSA_WITH_AES_256_CBC_SHA256, Rsa, BULK_AES_256_CBC, Sha256;
    0x009c, TLS_RSA_WITH_AES_128_GCM_SHA256, Rsa, BULK_AES_128_GCM, Sha256;
    0x009d, TLS_RSA_WITH_AES_256_GCM_SHA384, Rsa, BULK_AES_256_GCM, Sha384;
    // ephemeral finite-field DH
    0x0032, TLS_DHE_DSS_WITH_AES_128_CBC_SHA, DheDss, BULK_AES_128_CBC, Sha1;
    0x0033, TLS_DHE_RSA_WITH_AES_128_CBC_SHA, DheRsa, BULK_AES_128_CBC, Sha1;
    0x0038, TLS_DHE_DSS_WITH_AES_256_CBC_SHA, DheDss, BULK_AES_256_CBC, Sha1;
    0x0039, TLS_DHE_RSA_WITH_AES_256_CBC_SHA, DheRsa, BULK_AES_256_CBC, Sha1;
    0x0040, TLS_DHE_DSS_WITH_AES_128_CBC_SHA256, DheDss, BULK_AES_128_CBC, Sha256;
    0x0067, TLS_DHE_RSA_WITH_AES_128_CBC_SHA256, DheRsa, BULK_AES_128_CBC, Sha256;
    0x006a, TLS_DHE_DSS_WITH_AES_256_CBC_SHA256, DheDss, BULK_AES_256_CBC, Sha256;
    0x006b, TLS_DHE_RSA_WITH_AES_256_CBC_SHA256, DheRsa, BULK_AES_256_CBC, Sha256;
    0x009e, TLS_DHE_RSA_WITH_AES_128_GCM_SHA256, DheRsa, BULK_AES_128_GCM, Sha256;
    0x009f, TLS_DHE_RSA_WITH_AES_256_GCM_SHA384, DheRsa, BULK_AES_256_GCM, Sha384;
    0x00a2, TLS_DHE_DSS_WITH_AES_128_GCM_SHA256, DheDss, BULK_AES_128_GCM, Sha256;
    0xccaa, TLS_DHE_RSA_WITH_CHACHA20_POLY1305_SHA256, DheRsa, BULK_CHACHA20_POLY1305, Sha256;
    // anonymous finite-field DH
    0x0018, TLS_DH_ANON_WITH_RC4_128_MD5, DhAnon, BULK_RC4_128, Md5;
    0x0034, TLS_DH_ANON_WITH_AES_128_CBC_SHA, DhAnon, BULK_AES_128_CBC, Sha1;
    0x003a, TLS_DH_ANON_WITH_AES_256_CBC_SHA, DhAnon, BULK_AES_256_CBC, Sha1;
    0x006c, TLS_DH_ANON_WITH_AES_128_CBC_SHA256, DhAnon, BULK_AES_128_CBC, Sha256;
    0x006d, TLS_DH_ANON_WITH_AES_256_CBC_SHA256, DhAnon, BULK_AES_256_CBC, Sha256;
    0x00a6, TLS_DH_ANON_WITH_AES_128_GCM_SHA256, DhAnon, BULK_AES_128_GCM, Sha256;
    0x00a7, TLS_DH_ANON_WITH_AES_256_GCM_SHA384, DhAnon, BULK_AES_256_GCM, Sha384;
    // ephemeral elliptic-curve DH
    0xc009, TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA, EcdheEcdsa, BULK_AES_128_CBC, Sha1;
    0xc00a, TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA, EcdheEcdsa, BULK_AES_256_CBC, Sha1;
    0xc011, TLS_ECDHE_RSA_WITH_RC4_128_SHA, EcdheRsa, BULK_RC4_128, Sha1;
    0xc013, TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA, EcdheRsa, BULK_AES_128_CBC, Sha1;
    0xc014, TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA, EcdheRsa, BULK_AES_256_CBC, Sha1;
    0xc023, TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256, EcdheEcdsa, BULK_AES_128_CBC, Sha256;
    0xc024, TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384, EcdheEcdsa, BULK_AES_256_CBC, Sha384;
    0xc027, TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256, EcdheRsa, BULK_AES_128_CBC, Sha256;
    0xc028, TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384, EcdheRsa, BULK_AES_256_CBC, Sha384;
    0xc02b, TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, EcdheEcdsa, BULK_AES_128_GCM, Sha256;
    0xc02c, TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384, EcdheEcdsa, BULK_AES_256_GCM, Sha384;
    0xc02f, TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, EcdheRsa, BULK_AES_128_GCM, Sha256;
    0xc030, TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384, EcdheRsa, BULK_AES_256_GCM, Sha384;
    0xc0ac, TLS_ECDHE_ECDSA_WITH_AES_128_CCM, EcdheEcdsa, BULK_AES_128_CCM, Sha256;
    0xc0ae, TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8, EcdheEcdsa, BULK_AES_128_CCM_8, Sha256;
    0xcca8, TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256, EcdheRsa, BULK_CHACHA20_POLY1305, Sha256;
    0xcca9, TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256, EcdheEcdsa, BULK_CHACHA20_POLY1305, Sha256;
    // anonymous elliptic-curve DH
    0xc016, TLS_ECDH_ANON_WITH_RC4_128_SHA, EcdhAnon, BULK_RC4_128, Sha1;
    0xc018, TLS_ECDH_ANON_WITH_AES_128_CBC_SHA, EcdhAnon, BULK_AES_128_CBC, Sha1;
    0xc019, TLS_ECDH_ANON_WITH_AES_256_CBC_SHA, EcdhAnon, BULK_AES_256_CBC, Sha1;
}

impl CipherSuite {
    // Signalling values; never part of the enumeration set.
    pub const TLS_EMPTY_RENEGOTIATION_INFO_SCSV: CipherSuite = CipherSuite(0x00ff);
    pub const TLS_FALLBACK_SCSV: CipherSuite = CipherSuite(0x5600);

    pub fn describe(self) -> Option<&'static SuiteDescription> {
        static BY_ID: Lazy<HashMap<u16, &'static SuiteDescription>> = Lazy::new(|| {
            SUITE_TABLE.iter().map(|desc| (desc.suite.0, desc)).collect()
        });
        BY_ID.get(&self.0).copied()
    }
}

impl fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.describe() {
            Some(desc) => f.write_str(desc.name),
            None if *self == CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV => {
                f.write_str("TLS_EMPTY_RENEGOTIATION_INFO_SCSV")
            }
            None if *self == CipherSuite::TLS_FALLBACK_SCSV => f.write_str("TLS_FALLBACK_SCSV"),
            None => write!(f, "TLS_UNKNOWN_0x{:04x}", self.0),
        }
    }
}

impl Codec for CipherSuite {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.0.encode(bytes);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        u16::read(reader).map(CipherSuite)
    }
}

impl Serialize for CipherSuite {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:?}", self))
    }
}

impl<'de> Deserialize<'de> for CipherSuite {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        static BY_NAME: Lazy<HashMap<&'static str, u16>> = Lazy::new(|| {
            SUITE_TABLE.iter().map(|desc| (desc.name, desc.suite.0)).collect()
        });
        let text = String::deserialize(deserializer)?;
        if let Some(id) = BY_NAME.get(text.as_str()) {
            return Ok(CipherSuite(*id));
        }
        match text.as_str() {
            "TLS_EMPTY_RENEGOTIATION_INFO_SCSV" => Ok(CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV),
            "TLS_FALLBACK_SCSV" => Ok(CipherSuite::TLS_FALLBACK_SCSV),
            other => other
                .strip_prefix("TLS_UNKNOWN_0x")
                .and_then(|hex| u16::from_str_radix(hex, 16).ok())
                .map(CipherSuite)
                .ok_or_else(|| D::Error::custom(format!("unknown cipher suite {:?}", other))),
        }
    }
}

/// Every registered suite, in binary order.
pub fn all_suites() -> Vec<CipherSuite> {
    let mut suites: Vec<CipherSuite> = SUITE_TABLE.iter().map(|desc| desc.suite).collect();
    suites.sort();
    suites
}

/// Registered suites usable with the given protocol version.
pub fn suites_for_version(version: Version) -> Vec<CipherSuite> {
    all_suites()
        .into_iter()
        .filter(|suite| {
            suite
                .describe()
                .map(|desc| desc.usable_with(version))
                .unwrap_or(false)
        })
        .collect()
}

pub fn filter_cipher_suites<F>(suites: &[CipherSuite], predicate: F) -> Vec<CipherSuite>
where
    F: Fn(&SuiteDescription) -> bool,
{
    suites
        .iter()
        .copied()
        .filter(|suite| suite.describe().map(&predicate).unwrap_or(false))
        .collect()
}

/// RFC 8701 reserved values, one per slot family.
pub const GREASE_VALUES: [u16; 16] = [
    0x0a0a, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a, 0x9a9a, 0xaaaa,
    0xbaba, 0xcaca, 0xdada, 0xeaea, 0xfafa,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup() {
        let desc = CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
            .describe()
            .unwrap();
        assert_eq!(desc.kx, KeyExchangeMethod::EcdheRsa);
        assert_eq!(desc.bulk.typ, CipherType::Aead);
        assert_eq!(desc.hash, HashAlgorithm::Sha256);
        assert!(CipherSuite(0x4711).describe().is_none());
    }

    #[test]
    fn aead_suites_have_zero_mac_key_len() {
        for desc in SUITE_TABLE {
            if desc.bulk.typ == CipherType::Aead {
                assert_eq!(desc.mac().mac_key_len, 0, "{}", desc.name);
                assert_eq!(desc.mac().mac_len, 0, "{}", desc.name);
            } else {
                assert_eq!(desc.mac().mac_key_len, desc.hash.output_len());
            }
        }
    }

    #[test]
    fn version_applicability() {
        let legacy = CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA.describe().unwrap();
        assert!(legacy.usable_with(Version::Tls10));
        assert!(legacy.usable_with(Version::Tls12));
        assert!(!legacy.usable_with(Version::Tls13));

        let modern = CipherSuite::TLS13_AES_128_GCM_SHA256.describe().unwrap();
        assert!(modern.usable_with(Version::Tls13));
        assert!(!modern.usable_with(Version::Tls12));

        let gcm = CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
            .describe()
            .unwrap();
        assert!(!gcm.usable_with(Version::Tls11));
        assert!(gcm.usable_with(Version::Tls12));
    }

    #[test]
    fn prf_hash_follows_the_suite_hash() {
        assert_eq!(
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384
                .describe()
                .unwrap()
                .prf_hash(),
            HashAlgorithm::Sha384
        );
        assert_eq!(
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA
                .describe()
                .unwrap()
                .prf_hash(),
            HashAlgorithm::Sha256
        );
    }

    #[test]
    fn names_render() {
        assert_eq!(
            format!("{:?}", CipherSuite::TLS_FALLBACK_SCSV),
            "TLS_FALLBACK_SCSV"
        );
        assert_eq!(format!("{:?}", CipherSuite(0xbeef)), "TLS_UNKNOWN_0xbeef");
    }
}
