//! The caller-facing client: configuration knobs, ClientHello policy
//! presets and the resumption caches. Workers reshape the profile between
//! connections; a `Connection` reads it but never writes it.

use probe::caps::RecordedRng;
use probe::recorder::SharedRecorder;

use crate::connection::Connection;
use crate::crypto::hash::HashAlgorithm;
use crate::error::TlsError;
use crate::msgs::enums::{
    CompressionMethod, HeartbeatMode, NamedGroup, PskKeyExchangeMode, SignatureScheme, Version,
};
use crate::record::RecordLayer;
use crate::sock::Socket;
use crate::suites::{self, CipherSuite};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStateId {
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub version: Version,
    pub master_secret: Vec<u8>,
    pub extended_master_secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStateTicket {
    pub ticket: Vec<u8>,
    pub lifetime_hint: u32,
    pub cipher_suite: CipherSuite,
    pub version: Version,
    pub master_secret: Vec<u8>,
    pub extended_master_secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tls13Psk {
    pub psk: Vec<u8>,
    pub ticket: Vec<u8>,
    pub lifetime: u32,
    pub age_add: u32,
    pub hash: HashAlgorithm,
    pub cipher_suite: CipherSuite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Id(SessionStateId),
    Ticket(SessionStateTicket),
    Psk(Tls13Psk),
}

impl SessionState {
    pub fn id(
        session_id: Vec<u8>,
        cipher_suite: CipherSuite,
        version: Version,
        master_secret: Vec<u8>,
        extended_master_secret: bool,
    ) -> SessionState {
        SessionState::Id(SessionStateId {
            session_id,
            cipher_suite,
            version,
            master_secret,
            extended_master_secret,
        })
    }

    pub fn ticket(
        ticket: Vec<u8>,
        lifetime_hint: u32,
        cipher_suite: CipherSuite,
        version: Version,
        master_secret: Vec<u8>,
        extended_master_secret: bool,
    ) -> SessionState {
        SessionState::Ticket(SessionStateTicket {
            ticket,
            lifetime_hint,
            cipher_suite,
            version,
            master_secret,
            extended_master_secret,
        })
    }
}

/// One boolean per GREASE slot family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GreaseSlots {
    pub cipher_suites: bool,
    pub extensions: bool,
    pub groups: bool,
    pub signature_algorithms: bool,
    pub versions: bool,
    pub psk_modes: bool,
}

#[derive(Debug, Clone)]
pub struct ClientProfile {
    pub versions: Vec<Version>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<CompressionMethod>,
    pub supported_groups: Vec<NamedGroup>,
    pub signature_algorithms: Vec<SignatureScheme>,
    pub key_shares: Vec<NamedGroup>,
    pub psk_key_exchange_modes: Vec<PskKeyExchangeMode>,
    pub server_name: Option<String>,
    pub support_sni: bool,
    pub support_supported_versions: bool,
    pub support_encrypt_then_mac: bool,
    pub support_extended_master_secret: bool,
    pub support_session_id: bool,
    pub support_session_ticket: bool,
    pub support_status_request: bool,
    pub support_status_request_v2: bool,
    pub support_secure_renegotiation: bool,
    pub support_scsv_renegotiation: bool,
    pub fallback_scsv: bool,
    pub support_psk: bool,
    pub heartbeat_mode: Option<HeartbeatMode>,
    pub pad_to: Option<usize>,
    pub grease: GreaseSlots,
    pub session_id_cache: Option<SessionStateId>,
    pub ticket_cache: Option<SessionStateTicket>,
    pub psk_cache: Option<Tls13Psk>,
}

impl ClientProfile {
    fn base() -> ClientProfile {
        ClientProfile {
            versions: Vec::new(),
            cipher_suites: Vec::new(),
            compression_methods: vec![CompressionMethod::Null],
            supported_groups: Vec::new(),
            signature_algorithms: Vec::new(),
            key_shares: Vec::new(),
            psk_key_exchange_modes: Vec::new(),
            server_name: None,
            support_sni: false,
            support_supported_versions: false,
            support_encrypt_then_mac: false,
            support_extended_master_secret: false,
            support_session_id: false,
            support_session_ticket: false,
            support_status_request: false,
            support_status_request_v2: false,
            support_secure_renegotiation: false,
            support_scsv_renegotiation: false,
            fallback_scsv: false,
            support_psk: false,
            heartbeat_mode: None,
            pad_to: None,
            grease: GreaseSlots::default(),
            session_id_cache: None,
            ticket_cache: None,
            psk_cache: None,
        }
    }

    /// SSL30..TLS12, every registered pre-1.3 suite, minimal extensions.
    pub fn legacy() -> ClientProfile {
        let mut profile = ClientProfile::base();
        profile.versions = vec![
            Version::Ssl30,
            Version::Tls10,
            Version::Tls11,
            Version::Tls12,
        ];
        profile.cipher_suites = suites::suites_for_version(Version::Tls12);
        profile.supported_groups = vec![
            NamedGroup::X25519,
            NamedGroup::Secp256r1,
            NamedGroup::Secp384r1,
            NamedGroup::Secp521r1,
        ];
        profile.signature_algorithms = broad_signature_algorithms();
        profile
    }

    /// TLS10..TLS12 with the common interoperable suites.
    pub fn interoperability() -> ClientProfile {
        let mut profile = ClientProfile::base();
        profile.versions = vec![Version::Tls10, Version::Tls11, Version::Tls12];
        profile.cipher_suites = vec![
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA,
        ];
        profile.supported_groups = vec![
            NamedGroup::X25519,
            NamedGroup::Secp256r1,
            NamedGroup::Secp384r1,
        ];
        profile.signature_algorithms = broad_signature_algorithms();
        profile.support_supported_versions = true;
        profile.support_extended_master_secret = true;
        profile.support_session_ticket = true;
        profile
    }

    /// TLS12 only, AEAD suites only.
    pub fn modern() -> ClientProfile {
        let mut profile = ClientProfile::base();
        profile.versions = vec![Version::Tls12];
        profile.cipher_suites = vec![
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        ];
        profile.supported_groups = vec![
            NamedGroup::X25519,
            NamedGroup::Secp256r1,
            NamedGroup::Secp384r1,
        ];
        profile.signature_algorithms = vec![
            SignatureScheme::EcdsaNistp256Sha256,
            SignatureScheme::EcdsaNistp384Sha384,
            SignatureScheme::RsaPssRsaeSha256,
            SignatureScheme::RsaPssRsaeSha384,
            SignatureScheme::RsaPkcs1Sha256,
            SignatureScheme::RsaPkcs1Sha384,
        ];
        profile.support_supported_versions = true;
        profile
    }

    /// TLS13 only: the mandatory AEAD suites and an X25519 share.
    pub fn tls13() -> ClientProfile {
        let mut profile = ClientProfile::base();
        profile.versions = vec![Version::Tls13];
        profile.cipher_suites = vec![
            CipherSuite::TLS13_AES_128_GCM_SHA256,
            CipherSuite::TLS13_AES_256_GCM_SHA384,
            CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
        ];
        profile.supported_groups = vec![NamedGroup::X25519];
        profile.key_shares = vec![NamedGroup::X25519];
        profile.signature_algorithms = vec![
            SignatureScheme::EcdsaNistp256Sha256,
            SignatureScheme::EcdsaNistp384Sha384,
            SignatureScheme::RsaPssRsaeSha256,
            SignatureScheme::RsaPssRsaeSha384,
            SignatureScheme::RsaPssRsaeSha512,
            SignatureScheme::Ed25519,
        ];
        profile.psk_key_exchange_modes = vec![PskKeyExchangeMode::PskDheKe];
        profile.support_supported_versions = true;
        profile
    }
}

fn broad_signature_algorithms() -> Vec<SignatureScheme> {
    vec![
        SignatureScheme::Ed25519,
        SignatureScheme::EcdsaNistp384Sha384,
        SignatureScheme::EcdsaNistp256Sha256,
        SignatureScheme::EcdsaNistp521Sha512,
        SignatureScheme::RsaPssRsaeSha256,
        SignatureScheme::RsaPssRsaeSha384,
        SignatureScheme::RsaPssRsaeSha512,
        SignatureScheme::RsaPkcs1Sha256,
        SignatureScheme::RsaPkcs1Sha384,
        SignatureScheme::RsaPkcs1Sha512,
        SignatureScheme::EcdsaSha1,
        SignatureScheme::RsaPkcs1Sha1,
    ]
}

pub struct Client {
    pub profile: ClientProfile,
    pub host: String,
    pub port: u16,
    pub sni: Option<String>,
    recorder: SharedRecorder,
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16, recorder: SharedRecorder) -> Client {
        let host = host.into();
        Client {
            profile: ClientProfile::interoperability(),
            sni: Some(host.clone()),
            host,
            port,
            recorder,
        }
    }

    /// Back to the default profile; caches survive so resumption can be
    /// probed across resets.
    pub fn reset_profile(&mut self) {
        let session_id_cache = self.profile.session_id_cache.take();
        let ticket_cache = self.profile.ticket_cache.take();
        let psk_cache = self.profile.psk_cache.take();
        self.profile = ClientProfile::interoperability();
        self.profile.session_id_cache = session_id_cache;
        self.profile.ticket_cache = ticket_cache;
        self.profile.psk_cache = psk_cache;
    }

    pub fn get_sni(&self) -> Option<&str> {
        self.sni.as_deref()
    }

    pub fn save_session(&mut self, session: SessionState) {
        match session {
            SessionState::Id(state) => self.profile.session_id_cache = Some(state),
            SessionState::Ticket(state) => self.profile.ticket_cache = Some(state),
            SessionState::Psk(state) => self.profile.psk_cache = Some(state),
        }
    }

    /// Open a scoped connection for one handshake and application phase.
    pub fn create_connection(&self) -> Result<Connection<'_>, TlsError> {
        let socket = Socket::new(self.host.clone(), self.port, self.recorder.clone());
        let record_layer = RecordLayer::new(socket, RecordedRng::new(self.recorder.clone()));
        Ok(Connection::new(
            &self.profile,
            self.recorder.clone(),
            record_layer,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_have_the_promised_shape() {
        let legacy = ClientProfile::legacy();
        assert!(legacy.versions.contains(&Version::Ssl30));
        assert!(!legacy.support_supported_versions);
        assert!(legacy.cipher_suites.len() > 20);

        let modern = ClientProfile::modern();
        assert_eq!(modern.versions, vec![Version::Tls12]);
        assert!(modern
            .cipher_suites
            .iter()
            .all(|suite| suite.describe().map(|desc| desc.bulk.tag_len > 0).unwrap_or(false)));

        let tls13 = ClientProfile::tls13();
        assert_eq!(tls13.versions, vec![Version::Tls13]);
        assert_eq!(tls13.key_shares, vec![NamedGroup::X25519]);
        assert_eq!(tls13.cipher_suites.len(), 3);
    }

    #[test]
    fn reset_keeps_resumption_caches() {
        let recorder = probe::recorder::Recorder::shared();
        let mut client = Client::new("localhost", 44330, recorder);
        client.profile.versions = vec![Version::Tls12];
        client.save_session(SessionState::id(
            vec![1, 2, 3],
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            Version::Tls12,
            vec![0; 48],
            false,
        ));
        client.reset_profile();
        assert!(client.profile.session_id_cache.is_some());
        assert_eq!(
            client.profile.versions,
            ClientProfile::interoperability().versions
        );
    }
}
