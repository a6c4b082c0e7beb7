//! The client-side handshake state machine. A `Connection` owns one record
//! layer and one socket for its lifetime; on an abnormal exit it emits a
//! FATAL alert first and the socket is closed unconditionally.

use std::time::Duration;

use smallvec::SmallVec;

use probe::caps::{Clock, RecordedClock, RecordedRng, Rng};
use probe::recorder::SharedRecorder;

use crate::client::{ClientProfile, SessionState, Tls13Psk};
use crate::crypto::hash::{HashAlgorithm, HashCtx};
use crate::crypto::pubkey::{self, SubjectPublicKey};
use crate::error::TlsError;
use crate::kx::{self, DhKeyExchange, EcdhKeyExchange, KeyExchange, KeyShare, RsaKeyExchange};
use crate::msgs::alert::AlertMessagePayload;
use crate::msgs::base::{Payload, PayloadU16, PayloadU8};
use crate::codec::{Codec, Reader};
use crate::msgs::ccs::ChangeCipherSpecPayload;
use crate::msgs::enums::{
    AlertDescription, AlertLevel, CompressionMethod, ContentType, ExtensionType, HandshakeType,
    NamedGroup, Version,
};
use crate::msgs::extensions::{
    ClientExtension, KeyShareEntry, PresharedKeyOffer, PskIdentity, ServerExtension,
};
use crate::msgs::handshake::{
    CertificateStatusPayload, ClientHelloPayload, HandshakeMessagePayload, HandshakePayload,
    NewSessionTicketPayload, NewSessionTicketPayload13, Random, ServerHelloPayload, SessionId,
};
use crate::msgs::heartbeat::HeartbeatPayload;
use crate::msgs::message::{Message, MessageKind, MessagePayload};
use crate::record::state::{RecordState, StateUpdateParams};
use crate::record::{MessageBlock, RecordLayer};
use crate::schedule13::{self, KeySchedule13};
use crate::suites::{CipherSuite, CipherType, KeyExchangeMethod, SuiteDescription, GREASE_VALUES};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

fn fatal(description: AlertDescription, message: impl Into<String>) -> TlsError {
    TlsError::Fatal {
        description,
        message: message.into(),
    }
}

/// The last received message of each named kind.
#[derive(Default)]
pub struct MessageStore {
    pub client_hello: Option<ClientHelloPayload>,
    pub server_hello: Option<ServerHelloPayload>,
    pub server_certificate: Option<Vec<Vec<u8>>>,
    pub certificate_status: Option<CertificateStatusPayload>,
    pub server_key_exchange: Option<Vec<u8>>,
    pub certificate_request: bool,
    pub server_hello_done: bool,
    pub encrypted_extensions: Option<Vec<ServerExtension>>,
    pub new_session_ticket: Option<NewSessionTicketPayload>,
    pub new_session_ticket13: Option<NewSessionTicketPayload13>,
    pub server_finished: Option<Vec<u8>>,
    pub server_alert: Option<AlertMessagePayload>,
    pub heartbeat_response: Option<HeartbeatPayload>,
}

/// Rolling hash of the handshake transcript. Bytes are buffered until the
/// ServerHello fixes the algorithm; TLS 1.0/1.1 keep MD5 and SHA-1 side by
/// side.
pub struct TranscriptHash {
    pending: Option<Vec<u8>>,
    single: Option<HashCtx>,
    legacy: Option<(HashCtx, HashCtx)>,
}

impl TranscriptHash {
    pub fn new() -> TranscriptHash {
        TranscriptHash {
            pending: Some(Vec::new()),
            single: None,
            legacy: None,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(pending) = &mut self.pending {
            pending.extend_from_slice(data);
        } else if let Some(ctx) = &mut self.single {
            ctx.update(data);
        } else if let Some((md5, sha1)) = &mut self.legacy {
            md5.update(data);
            sha1.update(data);
        }
    }

    /// Fix the hash algorithm and drain the buffered bytes into it.
    pub fn select(&mut self, version: Version, prf_hash: HashAlgorithm) {
        let pending = self.pending.take().unwrap_or_default();
        if version <= Version::Tls11 {
            let mut md5 = HashCtx::new(HashAlgorithm::Md5);
            let mut sha1 = HashCtx::new(HashAlgorithm::Sha1);
            md5.update(&pending);
            sha1.update(&pending);
            self.legacy = Some((md5, sha1));
        } else {
            let mut ctx = HashCtx::new(prf_hash);
            ctx.update(&pending);
            self.single = Some(ctx);
        }
    }

    /// Digest of everything fed so far (MD5 || SHA-1 before TLS 1.2).
    pub fn current(&self) -> Vec<u8> {
        if let Some(ctx) = &self.single {
            ctx.current()
        } else if let Some((md5, sha1)) = &self.legacy {
            let mut digest = md5.current();
            digest.extend_from_slice(&sha1.current());
            digest
        } else {
            Vec::new()
        }
    }

    pub fn reset(&mut self) {
        *self = TranscriptHash::new();
    }
}

/// Negotiated parameters and secrets of one connection.
pub struct SecurityParameters {
    pub version: Version,
    pub cipher_suite: CipherSuite,
    pub suite: Option<&'static SuiteDescription>,
    pub client_random: Vec<u8>,
    pub server_random: Vec<u8>,
    pub master_secret: SmallVec<[u8; 48]>,
    pub encrypt_then_mac: bool,
    pub extended_master_secret: bool,
    pub resumed: bool,
}

impl SecurityParameters {
    fn new() -> SecurityParameters {
        SecurityParameters {
            version: Version::Tls12,
            cipher_suite: CipherSuite(0),
            suite: None,
            client_random: Vec::new(),
            server_random: Vec::new(),
            master_secret: SmallVec::new(),
            encrypt_then_mac: false,
            extended_master_secret: false,
            resumed: false,
        }
    }
}

struct PendingStates {
    write: Option<StateUpdateParams>,
    read: Option<StateUpdateParams>,
}

pub struct Connection<'a> {
    profile: &'a ClientProfile,
    recorder: SharedRecorder,
    rng: RecordedRng,
    clock: RecordedClock,
    record_layer: RecordLayer,
    pub msg: MessageStore,
    pub sec: SecurityParameters,
    transcript: TranscriptHash,
    queued_msg: Option<Message>,
    hs_buffer: Vec<u8>,
    record_layer_version: Version,
    client_version_sent: Version,
    version_locked: bool,
    kx: Option<KeyExchange>,
    offered_shares: Vec<KeyShare>,
    offered_psk: Option<Tls13Psk>,
    psk_accepted: bool,
    schedule: Option<KeySchedule13>,
    client_hs_traffic: Vec<u8>,
    server_hs_traffic: Vec<u8>,
    resumption_master: Vec<u8>,
    application_transcript: Vec<u8>,
    pending: PendingStates,
    server_cert_key: Option<SubjectPublicKey>,
    cert_verify_transcript: Vec<u8>,
    client_cert_requested: bool,
    pub handshake_completed: bool,
    pub stapling_status: bool,
    pub hello_retry: bool,
    pub client_verify_data: Vec<u8>,
    pub server_verify_data: Vec<u8>,
    renegotiating: bool,
    new_session: Option<SessionState>,
    pub timeout: Duration,
}

impl<'a> Connection<'a> {
    pub fn new(
        profile: &'a ClientProfile,
        recorder: SharedRecorder,
        record_layer: RecordLayer,
    ) -> Connection<'a> {
        log::debug!("new TLS connection created");
        Connection {
            profile,
            rng: RecordedRng::new(recorder.clone()),
            clock: RecordedClock::new(recorder.clone()),
            recorder,
            record_layer,
            msg: MessageStore::default(),
            sec: SecurityParameters::new(),
            transcript: TranscriptHash::new(),
            queued_msg: None,
            hs_buffer: Vec::new(),
            record_layer_version: Version::Tls10,
            client_version_sent: Version::Tls12,
            version_locked: false,
            kx: None,
            offered_shares: Vec::new(),
            offered_psk: None,
            psk_accepted: false,
            schedule: None,
            client_hs_traffic: Vec::new(),
            server_hs_traffic: Vec::new(),
            resumption_master: Vec::new(),
            application_transcript: Vec::new(),
            pending: PendingStates {
                write: None,
                read: None,
            },
            server_cert_key: None,
            cert_verify_transcript: Vec::new(),
            client_cert_requested: false,
            handshake_completed: false,
            stapling_status: false,
            hello_retry: false,
            client_verify_data: Vec::new(),
            server_verify_data: Vec::new(),
            renegotiating: false,
            new_session: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// On an abnormal exit the FATAL alert goes out first, then the socket
    /// is closed. Normal exits just close.
    fn guard<T>(&mut self, result: Result<T, TlsError>) -> Result<T, TlsError> {
        if let Err(TlsError::Fatal { description, .. }) = &result {
            let description = *description;
            let _ = self.emit_alert(AlertLevel::Fatal, description);
            self.record_layer.close_socket();
        }
        result
    }

    pub fn take_new_session(&mut self) -> Option<SessionState> {
        self.new_session.take()
    }

    /// Whether the server accepted the offered pre-shared key.
    pub fn psk_accepted(&self) -> bool {
        self.psk_accepted
    }

    // ----- sending -----

    fn send_handshake_message(&mut self, payload: HandshakeMessagePayload) -> Result<(), TlsError> {
        let encoded = payload.get_encoding();
        self.transcript.update(&encoded);
        self.record_layer.send_message(MessageBlock {
            content_type: ContentType::Handshake,
            version: self.record_layer_version,
            fragment: encoded,
        })
    }

    /// Send an already-built message; workers use this for crafted probes.
    pub fn send(&mut self, message: Message) -> Result<(), TlsError> {
        let result = self.send_inner(message);
        self.guard(result)
    }

    fn send_inner(&mut self, message: Message) -> Result<(), TlsError> {
        let fragment = match &message.payload {
            MessagePayload::Handshake(hs) => {
                let hs = hs.clone();
                self.send_handshake_message(hs)?;
                return self.record_layer.flush();
            }
            MessagePayload::Alert(alert) => alert.get_encoding(),
            MessagePayload::ChangeCipherSpec(ccs) => ccs.get_encoding(),
            MessagePayload::ApplicationData(data) => data.0.clone(),
            MessagePayload::Heartbeat(hb) => hb.get_encoding(),
        };
        self.record_layer.send_message(MessageBlock {
            content_type: message.content_type(),
            version: self.record_layer_version,
            fragment,
        })?;
        self.record_layer.flush()
    }

    fn emit_alert(&mut self, level: AlertLevel, description: AlertDescription) -> Result<(), TlsError> {
        let alert = AlertMessagePayload { level, description };
        self.record_layer.send_message(MessageBlock {
            content_type: ContentType::Alert,
            version: self.record_layer_version,
            fragment: alert.get_encoding(),
        })?;
        self.record_layer.flush()
    }

    pub fn send_alert(
        &mut self,
        level: AlertLevel,
        description: AlertDescription,
    ) -> Result<(), TlsError> {
        self.emit_alert(level, description)
    }

    /// An out-of-order CCS, as the injection probe wants it.
    pub fn send_change_cipher_spec(&mut self) -> Result<(), TlsError> {
        self.record_layer.send_message(MessageBlock {
            content_type: ContentType::ChangeCipherSpec,
            version: self.record_layer_version,
            fragment: ChangeCipherSpecPayload.get_encoding(),
        })?;
        self.record_layer.flush()
    }

    pub fn send_heartbeat_request(&mut self, payload: HeartbeatPayload) -> Result<(), TlsError> {
        self.record_layer.send_message(MessageBlock {
            content_type: ContentType::Heartbeat,
            version: self.record_layer_version,
            fragment: payload.get_encoding(),
        })?;
        self.record_layer.flush()
    }

    // ----- ClientHello synthesis -----

    fn grease(&self, slot: usize) -> u16 {
        // deterministic slot values; tolerance matters, unpredictability
        // does not
        GREASE_VALUES[(slot * 3) % GREASE_VALUES.len()]
    }

    fn offered_session_id(&mut self) -> Result<SessionId, TlsError> {
        if self.profile.support_session_id {
            if let Some(cached) = &self.profile.session_id_cache {
                return SessionId::new(&cached.session_id)
                    .ok_or_else(|| fatal(AlertDescription::InternalError, "cached id too long"));
            }
        }
        if self.profile.support_session_ticket && self.profile.ticket_cache.is_some() {
            // a fresh id so the server's echo reveals ticket acceptance
            let id = self.rng.random_bytes("session_id", 32)?;
            return SessionId::new(&id)
                .ok_or_else(|| fatal(AlertDescription::InternalError, "bad session id"));
        }
        Ok(SessionId::empty())
    }

    fn build_extensions(&mut self, max_version: Version) -> Result<Vec<ClientExtension>, TlsError> {
        let profile = self.profile;
        let mut extensions = Vec::new();

        if profile.grease.extensions {
            extensions.push(ClientExtension::Grease(self.grease(1)));
        }
        if profile.support_sni {
            if let Some(name) = &profile.server_name {
                extensions.push(ClientExtension::ServerName(name.clone()));
            }
        }
        if profile.support_supported_versions && max_version >= Version::Tls12 {
            let mut versions: Vec<u16> = Vec::new();
            if profile.grease.versions {
                versions.push(self.grease(2));
            }
            let mut offered = profile.versions.clone();
            offered.sort();
            for version in offered.iter().rev() {
                versions.push(version.to_wire());
            }
            extensions.push(ClientExtension::SupportedVersions(versions));
        }
        if !profile.signature_algorithms.is_empty() && max_version >= Version::Tls12 {
            let mut schemes = profile.signature_algorithms.clone();
            if profile.grease.signature_algorithms {
                schemes.insert(0, crate::msgs::enums::SignatureScheme::Unknown(self.grease(3)));
            }
            extensions.push(ClientExtension::SignatureAlgorithms(schemes));
        }
        if !profile.supported_groups.is_empty() {
            let mut groups = profile.supported_groups.clone();
            if profile.grease.groups {
                groups.insert(0, NamedGroup::Unknown(self.grease(4)));
            }
            extensions.push(ClientExtension::SupportedGroups(groups));
            extensions.push(ClientExtension::ECPointFormats(vec![
                crate::msgs::enums::ECPointFormat::Uncompressed,
            ]));
        }
        if profile.support_encrypt_then_mac {
            extensions.push(ClientExtension::EncryptThenMac);
        }
        if profile.support_extended_master_secret {
            extensions.push(ClientExtension::ExtendedMasterSecret);
        }
        if profile.support_session_ticket {
            let ticket = profile
                .ticket_cache
                .as_ref()
                .map(|cached| cached.ticket.clone())
                .unwrap_or_default();
            extensions.push(ClientExtension::SessionTicket(ticket));
        }
        if let Some(mode) = profile.heartbeat_mode {
            extensions.push(ClientExtension::Heartbeat(mode));
        }
        if profile.support_status_request {
            extensions.push(ClientExtension::StatusRequest);
        }
        if profile.support_status_request_v2 {
            extensions.push(ClientExtension::StatusRequestV2);
        }
        if profile.support_secure_renegotiation {
            let data = if self.renegotiating {
                self.client_verify_data.clone()
            } else {
                Vec::new()
            };
            extensions.push(ClientExtension::RenegotiationInfo(PayloadU8::new(data)));
        }
        if max_version == Version::Tls13 && !profile.psk_key_exchange_modes.is_empty() {
            let mut modes = profile.psk_key_exchange_modes.clone();
            if profile.grease.psk_modes {
                modes.insert(
                    0,
                    crate::msgs::enums::PskKeyExchangeMode::Unknown(self.grease(5) as u8),
                );
            }
            extensions.push(ClientExtension::PskKeyExchangeModes(modes));
        }
        if max_version == Version::Tls13 && !profile.key_shares.is_empty() {
            self.offered_shares.clear();
            let mut entries = Vec::new();
            for group in &profile.key_shares {
                let share = KeyShare::generate(*group, &mut self.rng)?;
                entries.push(KeyShareEntry::new(*group, share.public.clone()));
                self.offered_shares.push(share);
            }
            extensions.push(ClientExtension::KeyShare(entries));
        }
        if let Some(length) = profile.pad_to {
            extensions.push(ClientExtension::Padding(length));
        }
        // pre_shared_key must come last; appended by the hello builder
        Ok(extensions)
    }

    /// Synthesise and send the ClientHello for the current profile.
    pub fn send_client_hello(&mut self) -> Result<(), TlsError> {
        let result = self.send_client_hello_inner();
        self.guard(result)
    }

    fn send_client_hello_inner(&mut self) -> Result<(), TlsError> {
        let payload = self.build_client_hello()?;

        // a (re)negotiation starts a fresh transcript
        self.transcript.reset();
        self.version_locked = false;
        self.handshake_completed = false;

        if let HandshakePayload::ClientHello(hello) = &payload.payload {
            self.msg.client_hello = Some(hello.clone());
        }
        self.send_handshake_message(payload)?;
        self.record_layer.flush()
    }

    /// Synthesise the ClientHello for the current profile without sending
    /// it.
    fn build_client_hello(&mut self) -> Result<HandshakeMessagePayload, TlsError> {
        let profile = self.profile;
        let max_version = profile
            .versions
            .iter()
            .max()
            .copied()
            .ok_or_else(|| fatal(AlertDescription::InternalError, "no versions configured"))?;

        // legacy field capped at TLS 1.2; TLS 1.3 travels in
        // supported_versions only
        let client_version = max_version.min(Version::Tls12);
        self.client_version_sent = client_version;

        let timestamp = self.clock.now()? as u32;
        let mut random = timestamp.to_be_bytes().to_vec();
        random.extend_from_slice(&self.rng.random_bytes("client_random", 28)?);
        self.recorder
            .borrow_mut()
            .trace_bytes("client_random", &random)
            .map_err(TlsError::from)?;
        self.sec.client_random = random.clone();

        let session_id = self.offered_session_id()?;

        let mut cipher_suites = Vec::new();
        if profile.grease.cipher_suites {
            cipher_suites.push(CipherSuite(self.grease(0)));
        }
        if profile.support_scsv_renegotiation {
            cipher_suites.push(CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV);
        }
        if profile.fallback_scsv {
            cipher_suites.push(CipherSuite::TLS_FALLBACK_SCSV);
        }
        cipher_suites.extend_from_slice(&profile.cipher_suites);

        let mut extensions = self.build_extensions(max_version)?;
        let psk = if max_version == Version::Tls13 && profile.support_psk {
            profile.psk_cache.clone()
        } else {
            None
        };
        if let Some(psk) = &psk {
            extensions.push(ClientExtension::PresharedKey(PresharedKeyOffer {
                identities: vec![PskIdentity {
                    identity: PayloadU16::new(psk.ticket.clone()),
                    obfuscated_ticket_age: psk.age_add,
                }],
                binders: vec![PayloadU8::new(vec![0u8; psk.hash.output_len()])],
            }));
        }

        let hello = ClientHelloPayload {
            client_version,
            random: Random::from_slice(&random)
                .ok_or_else(|| fatal(AlertDescription::InternalError, "bad random length"))?,
            session_id,
            cipher_suites,
            compression_methods: profile.compression_methods.clone(),
            extensions,
        };

        let mut payload = HandshakeMessagePayload::new(
            HandshakeType::ClientHello,
            HandshakePayload::ClientHello(hello),
        );
        if let Some(psk) = &psk {
            self.fill_binder(&mut payload, psk)?;
        }
        self.offered_psk = psk;
        Ok(payload)
    }

    /// Compute the PSK binder over the truncated hello and patch it in.
    fn fill_binder(
        &mut self,
        payload: &mut HandshakeMessagePayload,
        psk: &Tls13Psk,
    ) -> Result<(), TlsError> {
        let offer_len = match &payload.payload {
            HandshakePayload::ClientHello(hello) => match hello.extensions.last() {
                Some(ClientExtension::PresharedKey(offer)) => offer.binders_encoding_len(),
                _ => return Err(fatal(AlertDescription::InternalError, "psk offer not last")),
            },
            _ => return Err(fatal(AlertDescription::InternalError, "not a client hello")),
        };
        let encoded = payload.get_encoding();
        let truncated = &encoded[..encoded.len() - offer_len];
        let mut transcript = HashCtx::new(psk.hash);
        transcript.update(truncated);

        let schedule = KeySchedule13::new(psk.hash, Some(&psk.psk))?;
        let binder_key = schedule.resumption_binder_key()?;
        let finished_key = schedule13::finished_key(psk.hash, &binder_key)?;
        let binder =
            schedule13::finished_verify_data(psk.hash, &finished_key, &transcript.finalize())?;
        self.recorder
            .borrow_mut()
            .trace_bytes("binder", &binder)
            .map_err(TlsError::from)?;

        if let HandshakePayload::ClientHello(hello) = &mut payload.payload {
            if let Some(ClientExtension::PresharedKey(offer)) = hello.extensions.last_mut() {
                offer.binders = vec![PayloadU8::new(binder)];
            }
        }
        Ok(())
    }

    // ----- receiving -----

    /// Wait for the next message of the requested kind; anything else is a
    /// fatal `unexpected_message`.
    pub fn wait(&mut self, kind: MessageKind) -> Result<Message, TlsError> {
        let timeout = self.timeout;
        self.wait_timeout(kind, timeout)
    }

    pub fn wait_timeout(&mut self, kind: MessageKind, timeout: Duration) -> Result<Message, TlsError> {
        let result = self.wait_inner(kind, false, timeout);
        match self.guard(result)? {
            Some(message) => Ok(message),
            None => Err(fatal(AlertDescription::InternalError, "wait returned nothing")),
        }
    }

    /// Like `wait`, but a non-matching message is queued for the next wait
    /// instead of failing.
    pub fn wait_optional(&mut self, kind: MessageKind) -> Result<Option<Message>, TlsError> {
        let timeout = self.timeout;
        let result = self.wait_inner(kind, true, timeout);
        self.guard(result)
    }

    fn wait_inner(
        &mut self,
        kind: MessageKind,
        optional: bool,
        timeout: Duration,
    ) -> Result<Option<Message>, TlsError> {
        let message = match self.queued_msg.take() {
            Some(message) => message,
            None => self.next_message(kind, timeout)?,
        };

        if kind.matches(&message) {
            Ok(Some(message))
        } else if optional {
            self.queued_msg = Some(message);
            Ok(None)
        } else {
            Err(fatal(
                AlertDescription::UnexpectedMessage,
                format!("unexpected message: {:?}, expected {:?}", message.kind(), kind),
            ))
        }
    }

    fn next_message(&mut self, kind: MessageKind, timeout: Duration) -> Result<Message, TlsError> {
        loop {
            // a complete buffered handshake message first
            if self.hs_buffer.len() >= 4 {
                let length = ((self.hs_buffer[1] as usize) << 16)
                    | ((self.hs_buffer[2] as usize) << 8)
                    | self.hs_buffer[3] as usize;
                if self.hs_buffer.len() >= 4 + length {
                    let raw: Vec<u8> = self.hs_buffer.drain(..4 + length).collect();
                    let message = self.parse_handshake(&raw)?;
                    self.store_received(&message)?;
                    return Ok(message);
                }
            }

            let (content_type, version, fragment) = self.record_layer.wait_fragment(timeout)?;
            if self.version_locked
                && content_type != ContentType::Alert
                && version != self.record_layer_version
            {
                return Err(fatal(
                    AlertDescription::ProtocolVersion,
                    "record version changed after negotiation",
                ));
            }
            match content_type {
                ContentType::Handshake => {
                    self.hs_buffer.extend_from_slice(&fragment);
                }
                ContentType::Alert => {
                    let alert = AlertMessagePayload::read_bytes(&fragment)?;
                    self.msg.server_alert = Some(alert);
                    if alert.level == AlertLevel::Fatal
                        || alert.description == AlertDescription::CloseNotify
                    {
                        return Err(TlsError::PeerAlert {
                            level: alert.level,
                            description: alert.description,
                        });
                    }
                    if matches!(kind, MessageKind::Alert | MessageKind::Any) {
                        return Ok(Message::alert(version, alert));
                    }
                    log::debug!("ignoring warning alert {:?}", alert.description);
                }
                ContentType::ChangeCipherSpec => {
                    ChangeCipherSpecPayload::read_bytes(&fragment)?;
                    if self.sec.version == Version::Tls13 && self.version_locked {
                        // middlebox compatibility; semantically ignored
                        continue;
                    }
                    if let Some(params) = self.pending.read.take() {
                        self.record_layer.update_read_state(RecordState::new(params)?);
                    }
                    return Ok(Message::change_cipher_spec(version));
                }
                ContentType::ApplicationData => {
                    return Ok(Message::application_data(version, fragment));
                }
                ContentType::Heartbeat => {
                    let heartbeat = HeartbeatPayload::read_bytes(&fragment)?;
                    let message = Message::heartbeat(version, heartbeat.clone());
                    self.msg.heartbeat_response = Some(heartbeat);
                    return Ok(message);
                }
                ContentType::Unknown(_) => {
                    return Err(fatal(AlertDescription::DecodeError, "unknown content type"));
                }
            }
        }
    }

    fn parse_handshake(&mut self, raw: &[u8]) -> Result<Message, TlsError> {
        let parse_version = if self.version_locked {
            self.sec.version
        } else {
            Version::Tls12
        };
        let payload = HandshakeMessagePayload::read_version(&mut Reader::init(raw), parse_version)?;

        // Finished and CertificateVerify are checked against the transcript
        // as it stood before them
        let before = self.transcript.current();
        if payload.typ != HandshakeType::HelloRequest {
            self.transcript.update(raw);
        }
        match &payload.payload {
            HandshakePayload::Finished(finished) => {
                self.verify_peer_finished(&finished.0, &before)?;
            }
            HandshakePayload::CertificateVerify(_) => {
                self.cert_verify_transcript = before;
            }
            _ => {}
        }
        Ok(Message::handshake(self.sec.version, payload))
    }

    fn store_received(&mut self, message: &Message) -> Result<(), TlsError> {
        let payload = match &message.payload {
            MessagePayload::Handshake(payload) => payload,
            _ => return Ok(()),
        };
        match &payload.payload {
            HandshakePayload::ServerHello(hello) => {
                // stored first so workers can dissect it even when the
                // processing below aborts the handshake
                self.msg.server_hello = Some(hello.clone());
                self.process_server_hello(hello)?;
            }
            HandshakePayload::Certificate(certs) => {
                let chain: Vec<Vec<u8>> = certs.iter().map(|cert| cert.0.clone()).collect();
                self.process_certificate(&chain)?;
            }
            HandshakePayload::Certificate13(payload) => {
                let chain = payload.der_chain();
                self.process_certificate(&chain)?;
                let stapled = payload.entries.iter().any(|entry| {
                    entry
                        .extensions
                        .iter()
                        .any(|ext| ext.get_type() == ExtensionType::StatusRequest.to_wire())
                });
                if stapled {
                    self.stapling_status = true;
                }
            }
            HandshakePayload::CertificateStatus(status) => {
                self.stapling_status = true;
                self.msg.certificate_status = Some(status.clone());
            }
            HandshakePayload::ServerKeyExchange(ske) => {
                let ske = ske.0.clone();
                self.process_server_key_exchange(&ske)?;
                self.msg.server_key_exchange = Some(ske);
            }
            HandshakePayload::CertificateRequest(_) => {
                self.msg.certificate_request = true;
                self.client_cert_requested = true;
            }
            HandshakePayload::ServerHelloDone => {
                self.msg.server_hello_done = true;
            }
            HandshakePayload::CertificateVerify(signed) => {
                let signed = signed.clone();
                self.process_certificate_verify(&signed)?;
            }
            HandshakePayload::EncryptedExtensions(extensions) => {
                self.msg.encrypted_extensions = Some(extensions.clone());
            }
            HandshakePayload::NewSessionTicket(ticket) => {
                self.msg.new_session_ticket = Some(ticket.clone());
            }
            HandshakePayload::NewSessionTicket13(ticket) => {
                self.msg.new_session_ticket13 = Some(ticket.clone());
            }
            HandshakePayload::Finished(finished) => {
                self.msg.server_finished = Some(finished.0.clone());
            }
            _ => {}
        }
        Ok(())
    }

    // ----- ServerHello processing -----

    fn process_server_hello(&mut self, hello: &ServerHelloPayload) -> Result<(), TlsError> {
        let version = hello.selected_version();
        if !self.profile.versions.contains(&version) {
            return Err(fatal(
                AlertDescription::ProtocolVersion,
                format!("server selected unoffered version {:?}", version),
            ));
        }

        let offered = self
            .msg
            .client_hello
            .as_ref()
            .map(|hello| hello.cipher_suites.clone())
            .unwrap_or_default();
        if !offered.contains(&hello.cipher_suite) {
            return Err(fatal(
                AlertDescription::IllegalParameter,
                format!("server selected unoffered suite {:?}", hello.cipher_suite),
            ));
        }
        let suite = hello.cipher_suite.describe().ok_or_else(|| {
            fatal(
                AlertDescription::IllegalParameter,
                "server selected a reserved or unknown suite",
            )
        })?;
        if hello.compression_method != CompressionMethod::Null {
            return Err(fatal(
                AlertDescription::IllegalParameter,
                "server selected a compression method",
            ));
        }

        self.sec.version = version;
        self.sec.cipher_suite = hello.cipher_suite;
        self.sec.suite = Some(suite);
        self.sec.server_random = hello.random.0.to_vec();
        self.recorder
            .borrow_mut()
            .trace_bytes("server_random", &self.sec.server_random)
            .map_err(TlsError::from)?;
        self.record_layer_version = version.record_layer();
        self.version_locked = true;
        self.transcript.select(version, suite.prf_hash());

        if hello.is_hello_retry() {
            self.hello_retry = true;
            return Ok(());
        }

        if version == Version::Tls13 {
            return self.process_server_hello_tls13(hello, suite);
        }

        // feature extensions only count when they were offered
        self.sec.encrypt_then_mac = self.profile.support_encrypt_then_mac
            && suite.bulk.typ == CipherType::Block
            && hello.get_extension(ExtensionType::EncryptThenMac).is_some();
        self.sec.extended_master_secret = self.profile.support_extended_master_secret
            && hello
                .get_extension(ExtensionType::ExtendedMasterSecret)
                .is_some();

        self.kx = Some(match suite.kx {
            KeyExchangeMethod::Rsa => KeyExchange::Rsa(RsaKeyExchange::new()),
            KeyExchangeMethod::DheRsa | KeyExchangeMethod::DheDss | KeyExchangeMethod::DhAnon => {
                KeyExchange::Dhe(DhKeyExchange::new())
            }
            KeyExchangeMethod::EcdheRsa
            | KeyExchangeMethod::EcdheEcdsa
            | KeyExchangeMethod::EcdhAnon => KeyExchange::Ecdhe(EcdhKeyExchange::new()),
            KeyExchangeMethod::Tls13 => {
                return Err(fatal(
                    AlertDescription::IllegalParameter,
                    "TLS 1.3 suite below TLS 1.3",
                ))
            }
        });

        self.check_resumption(hello, suite)
    }

    fn check_resumption(
        &mut self,
        hello: &ServerHelloPayload,
        suite: &'static SuiteDescription,
    ) -> Result<(), TlsError> {
        let offered_id = self
            .msg
            .client_hello
            .as_ref()
            .map(|ch| ch.session_id)
            .unwrap_or_else(SessionId::empty);
        if offered_id.is_empty() || hello.session_id.as_bytes() != offered_id.as_bytes() {
            return Ok(());
        }

        let cached = if let Some(cached) = &self.profile.session_id_cache {
            Some((cached.cipher_suite, cached.version, cached.master_secret.clone(), cached.extended_master_secret))
        } else {
            self.profile.ticket_cache.as_ref().map(|cached| {
                (
                    cached.cipher_suite,
                    cached.version,
                    cached.master_secret.clone(),
                    cached.extended_master_secret,
                )
            })
        };
        let (cached_suite, cached_version, master, cached_ems) = match cached {
            Some(state) => state,
            None => return Ok(()),
        };

        if cached_suite != hello.cipher_suite || cached_version != self.sec.version {
            return Err(fatal(
                AlertDescription::HandshakeFailure,
                "resumption with different parameters",
            ));
        }
        if cached_ems != self.sec.extended_master_secret {
            // RFC 7627: the EMS bit must survive resumption
            return Err(fatal(
                AlertDescription::HandshakeFailure,
                "extended_master_secret flipped on resumption",
            ));
        }

        self.sec.resumed = true;
        self.sec.master_secret = SmallVec::from_vec(master);
        self.install_tls12_pending_states(suite)?;
        Ok(())
    }

    fn process_server_hello_tls13(
        &mut self,
        hello: &ServerHelloPayload,
        suite: &'static SuiteDescription,
    ) -> Result<(), TlsError> {
        let entry = match hello.get_extension(ExtensionType::KeyShare) {
            Some(ServerExtension::KeyShare(entry)) => entry.clone(),
            _ => {
                return Err(fatal(
                    AlertDescription::MissingExtension,
                    "no key_share in the server hello",
                ))
            }
        };
        let share = self
            .offered_shares
            .iter()
            .find(|share| share.group == entry.group)
            .ok_or_else(|| {
                fatal(
                    AlertDescription::IllegalParameter,
                    "server selected an unoffered group",
                )
            })?;
        let shared_secret = share.agree(&entry.payload.0)?;

        self.psk_accepted = matches!(
            hello.get_extension(ExtensionType::PreSharedKey),
            Some(ServerExtension::PresharedKey(0))
        );
        let psk = if self.psk_accepted {
            self.offered_psk.as_ref().map(|psk| psk.psk.clone())
        } else {
            None
        };

        let mut schedule = KeySchedule13::new(suite.prf_hash(), psk.as_deref())?;
        schedule.into_handshake(&shared_secret)?;

        let transcript_hash = self.transcript.current();
        self.client_hs_traffic = schedule.client_handshake_traffic_secret(&transcript_hash)?;
        self.server_hs_traffic = schedule.server_handshake_traffic_secret(&transcript_hash)?;
        {
            let mut recorder = self.recorder.borrow_mut();
            recorder
                .trace_bytes("c_hs_traffic", &self.client_hs_traffic)
                .map_err(TlsError::from)?;
            recorder
                .trace_bytes("s_hs_traffic", &self.server_hs_traffic)
                .map_err(TlsError::from)?;
        }

        let read = self.tls13_state(suite, &self.server_hs_traffic.clone())?;
        let write = self.tls13_state(suite, &self.client_hs_traffic.clone())?;
        self.record_layer.update_read_state(read);
        self.record_layer.update_write_state(write);
        self.schedule = Some(schedule);
        Ok(())
    }

    fn tls13_state(
        &mut self,
        suite: &'static SuiteDescription,
        traffic_secret: &[u8],
    ) -> Result<RecordState, TlsError> {
        let (key, iv) =
            schedule13::traffic_keys(suite.prf_hash(), traffic_secret, suite.bulk.enc_key_len)?;
        RecordState::new(StateUpdateParams {
            version: Version::Tls13,
            cipher: suite.bulk,
            mac: suite.mac(),
            enc_key: key,
            mac_key: Vec::new(),
            iv,
            compression: CompressionMethod::Null,
            encrypt_then_mac: false,
            implicit_iv: false,
            tls13: true,
        })
    }

    // ----- certificates and server key exchange -----

    fn process_certificate(&mut self, chain: &[Vec<u8>]) -> Result<(), TlsError> {
        if let Some(suite) = self.sec.suite {
            if suite.kx.is_anonymous() {
                return Err(fatal(
                    AlertDescription::UnexpectedMessage,
                    "certificate with an anonymous key exchange",
                ));
            }
        }
        if let Some(leaf) = chain.first() {
            let info = pubkey::parse_certificate(leaf)
                .map_err(|err| fatal(AlertDescription::BadCertificate, err))?;
            log::debug!("server certificate subject: {}", info.subject);
            self.server_cert_key = Some(info.public_key);
        }
        self.msg.server_certificate = Some(chain.to_vec());
        Ok(())
    }

    fn process_server_key_exchange(&mut self, ske: &[u8]) -> Result<(), TlsError> {
        let suite = self
            .sec
            .suite
            .ok_or_else(|| fatal(AlertDescription::UnexpectedMessage, "key exchange before hello"))?;
        let anonymous = suite.kx.is_anonymous();
        match &mut self.kx {
            Some(KeyExchange::Ecdhe(kx)) => {
                let params = kx::parse_ecdhe_params(ske, self.sec.version, anonymous)?;
                if !anonymous {
                    let key = self.server_cert_key.as_ref().ok_or_else(|| {
                        fatal(AlertDescription::HandshakeFailure, "no server certificate")
                    })?;
                    kx::verify_ske_signature(
                        &params.signature,
                        key,
                        &self.sec.client_random,
                        &self.sec.server_random,
                        &params.raw_params,
                    )?;
                }
                kx.consume_server_params(params);
            }
            Some(KeyExchange::Dhe(kx)) => {
                let params = kx::parse_dhe_params(ske, self.sec.version, anonymous)?;
                if !anonymous {
                    let key = self.server_cert_key.as_ref().ok_or_else(|| {
                        fatal(AlertDescription::HandshakeFailure, "no server certificate")
                    })?;
                    kx::verify_ske_signature(
                        &params.signature,
                        key,
                        &self.sec.client_random,
                        &self.sec.server_random,
                        &params.raw_params,
                    )?;
                }
                kx.consume_server_params(params);
            }
            _ => {
                return Err(fatal(
                    AlertDescription::UnexpectedMessage,
                    "key exchange not expected for this suite",
                ))
            }
        }
        Ok(())
    }

    fn process_certificate_verify(
        &mut self,
        signed: &crate::msgs::handshake::DigitallySigned,
    ) -> Result<(), TlsError> {
        let key = self
            .server_cert_key
            .as_ref()
            .ok_or_else(|| fatal(AlertDescription::HandshakeFailure, "no server certificate"))?;
        // RFC 8446, 4.4.3: 64 spaces, context string, NUL, transcript hash
        let mut message = vec![0x20u8; 64];
        message.extend_from_slice(b"TLS 1.3, server CertificateVerify");
        message.push(0);
        message.extend_from_slice(&self.cert_verify_transcript);
        pubkey::verify_signature(signed.scheme, key, &message, &signed.signature.0).map_err(|_| {
            fatal(
                AlertDescription::DecryptError,
                "certificate verify signature does not verify",
            )
        })
    }

    // ----- Finished handling -----

    fn verify_peer_finished(&mut self, received: &[u8], transcript: &[u8]) -> Result<(), TlsError> {
        let expected = if self.sec.version == Version::Tls13 {
            let suite = self
                .sec
                .suite
                .ok_or_else(|| fatal(AlertDescription::InternalError, "no suite negotiated"))?;
            let key = schedule13::finished_key(suite.prf_hash(), &self.server_hs_traffic)?;
            schedule13::finished_verify_data(suite.prf_hash(), &key, transcript)?
        } else {
            let suite = self
                .sec
                .suite
                .ok_or_else(|| fatal(AlertDescription::InternalError, "no suite negotiated"))?;
            kx::finished_verify_data(
                self.sec.version,
                suite.prf_hash(),
                &self.sec.master_secret,
                b"server finished",
                transcript,
            )
        };
        {
            let mut recorder = self.recorder.borrow_mut();
            recorder
                .trace_bytes("verify_data_finished_rec", received)
                .map_err(TlsError::from)?;
            recorder
                .trace_bytes("verify_data_finished_calc", &expected)
                .map_err(TlsError::from)?;
        }
        if received != expected {
            // a mismatch always fails the handshake
            return Err(fatal(
                AlertDescription::BadRecordMac,
                "peer finished verify_data mismatch",
            ));
        }
        self.server_verify_data = expected;
        Ok(())
    }

    // ----- client flight (TLS <= 1.2) -----

    fn install_tls12_pending_states(
        &mut self,
        suite: &'static SuiteDescription,
    ) -> Result<(), TlsError> {
        let mac = suite.mac();
        let block = kx::key_block(
            self.sec.version,
            suite.prf_hash(),
            &self.sec.master_secret,
            &self.sec.client_random,
            &self.sec.server_random,
            mac.mac_key_len,
            suite.bulk.enc_key_len,
            suite.bulk.iv_len,
        );
        {
            let mut recorder = self.recorder.borrow_mut();
            recorder
                .trace_bytes("client_write_key", &block.client_key)
                .map_err(TlsError::from)?;
            recorder
                .trace_bytes("server_write_key", &block.server_key)
                .map_err(TlsError::from)?;
        }
        let implicit_iv =
            self.sec.version <= Version::Tls10 && suite.bulk.typ == CipherType::Block;
        let explicit_cbc_iv =
            self.sec.version >= Version::Tls11 && suite.bulk.typ == CipherType::Block;
        let make = |enc_key: Vec<u8>, mac_key: Vec<u8>, iv: Vec<u8>| StateUpdateParams {
            version: self.sec.version,
            cipher: suite.bulk,
            mac,
            enc_key,
            mac_key,
            // explicit-IV CBC draws a fresh IV per record; the key-block IV
            // is unused there
            iv: if explicit_cbc_iv { vec![0; suite.bulk.iv_len] } else { iv },
            compression: CompressionMethod::Null,
            encrypt_then_mac: self.sec.encrypt_then_mac,
            implicit_iv,
            tls13: false,
        };
        self.pending.write = Some(make(block.client_key, block.client_mac, block.client_iv));
        self.pending.read = Some(make(block.server_key, block.server_mac, block.server_iv));
        Ok(())
    }

    /// Agree on the premaster, emit the ClientKeyExchange and derive the
    /// connection keys.
    pub fn send_client_key_exchange(&mut self) -> Result<(), TlsError> {
        let result = self.send_client_key_exchange_inner();
        self.guard(result)
    }

    fn send_client_key_exchange_inner(&mut self) -> Result<(), TlsError> {
        let suite = self
            .sec
            .suite
            .ok_or_else(|| fatal(AlertDescription::InternalError, "no suite negotiated"))?;
        if !suite.kx.is_anonymous()
            && suite.kx != KeyExchangeMethod::Tls13
            && self.server_cert_key.is_none()
        {
            return Err(fatal(
                AlertDescription::HandshakeFailure,
                "authenticated key exchange without a server certificate",
            ));
        }

        let client_version_sent = self.client_version_sent;
        let (premaster, body) = match &mut self.kx {
            Some(KeyExchange::Rsa(kx)) => {
                let premaster = kx.agree_on_premaster_secret(client_version_sent, &mut self.rng)?;
                let key = self.server_cert_key.as_ref().ok_or_else(|| {
                    fatal(AlertDescription::HandshakeFailure, "no server certificate")
                })?;
                let body = kx.client_key_exchange(key, &self.recorder)?;
                (premaster, body)
            }
            Some(KeyExchange::Dhe(kx)) => {
                let premaster = kx.agree_on_premaster_secret(&mut self.rng)?;
                (premaster, kx.client_key_exchange()?)
            }
            Some(KeyExchange::Ecdhe(kx)) => {
                let premaster = kx.agree_on_premaster_secret(&mut self.rng)?;
                (premaster, kx.client_key_exchange()?)
            }
            None => {
                return Err(fatal(
                    AlertDescription::InternalError,
                    "no key exchange configured",
                ))
            }
        };
        self.recorder
            .borrow_mut()
            .trace_bytes("pre_master_secret", &premaster)
            .map_err(TlsError::from)?;

        self.send_handshake_message(HandshakeMessagePayload::new(
            HandshakeType::ClientKeyExchange,
            HandshakePayload::ClientKeyExchange(Payload::new(body)),
        ))?;

        // EMS binds the master secret to the transcript including the
        // ClientKeyExchange just sent
        let master = if self.sec.extended_master_secret {
            kx::extended_master_secret(
                self.sec.version,
                suite.prf_hash(),
                &premaster,
                &self.transcript.current(),
            )
        } else {
            kx::master_secret(
                self.sec.version,
                suite.prf_hash(),
                &premaster,
                &self.sec.client_random,
                &self.sec.server_random,
            )
        };
        self.recorder
            .borrow_mut()
            .trace_bytes("master_secret", &master)
            .map_err(TlsError::from)?;
        self.sec.master_secret = SmallVec::from_vec(master);

        self.install_tls12_pending_states(suite)
    }

    /// Send the CCS; the pending write state becomes current for the next
    /// message (the Finished).
    pub fn send_ccs_and_activate(&mut self) -> Result<(), TlsError> {
        self.record_layer.send_message(MessageBlock {
            content_type: ContentType::ChangeCipherSpec,
            version: self.record_layer_version,
            fragment: ChangeCipherSpecPayload.get_encoding(),
        })?;
        if let Some(params) = self.pending.write.take() {
            self.record_layer.update_write_state(RecordState::new(params)?);
        }
        Ok(())
    }

    pub fn send_finished(&mut self) -> Result<(), TlsError> {
        let result = self.send_finished_inner();
        self.guard(result)
    }

    fn send_finished_inner(&mut self) -> Result<(), TlsError> {
        let suite = self
            .sec
            .suite
            .ok_or_else(|| fatal(AlertDescription::InternalError, "no suite negotiated"))?;
        let transcript_hash = self.transcript.current();
        let verify_data = if self.sec.version == Version::Tls13 {
            let key = schedule13::finished_key(suite.prf_hash(), &self.client_hs_traffic)?;
            schedule13::finished_verify_data(suite.prf_hash(), &key, &transcript_hash)?
        } else {
            kx::finished_verify_data(
                self.sec.version,
                suite.prf_hash(),
                &self.sec.master_secret,
                b"client finished",
                &transcript_hash,
            )
        };
        self.recorder
            .borrow_mut()
            .trace_bytes("verify_data_finished_sent", &verify_data)
            .map_err(TlsError::from)?;
        self.client_verify_data = verify_data.clone();

        self.send_handshake_message(HandshakeMessagePayload::new(
            HandshakeType::Finished,
            HandshakePayload::Finished(Payload::new(verify_data)),
        ))?;
        self.record_layer.flush()?;

        if self.sec.version == Version::Tls13 {
            // switch the write side to application keys; the read side
            // switched when the server finished
            let transcript_hash = self.transcript.current();
            let application_transcript = self.application_transcript.clone();
            let schedule = self
                .schedule
                .as_ref()
                .ok_or_else(|| fatal(AlertDescription::InternalError, "no key schedule"))?;
            self.resumption_master = schedule.resumption_master_secret(&transcript_hash)?;
            let client_ap = schedule.client_application_traffic_secret(&application_transcript)?;
            let write = self.tls13_state(suite, &client_ap)?;
            self.record_layer.update_write_state(write);
        }
        Ok(())
    }

    // ----- the one-shot handshake -----

    pub fn handshake(&mut self) -> Result<(), TlsError> {
        let result = self.handshake_inner();
        self.guard(result)
    }

    fn handshake_inner(&mut self) -> Result<(), TlsError> {
        self.send_client_hello_inner()?;
        self.wait_inner(MessageKind::ServerHello, false, self.timeout)?;
        if self.hello_retry {
            return Err(fatal(
                AlertDescription::HandshakeFailure,
                "server asked for a retry hello",
            ));
        }

        if self.sec.version == Version::Tls13 {
            self.handshake13()?;
        } else if self.sec.resumed {
            self.handshake_abbreviated()?;
        } else {
            self.handshake_full()?;
        }

        self.handshake_completed = true;
        self.collect_session();
        log::debug!(
            "handshake completed: {:?} with {:?}",
            self.sec.version,
            self.sec.cipher_suite
        );
        Ok(())
    }

    fn handshake_full(&mut self) -> Result<(), TlsError> {
        let suite = self
            .sec
            .suite
            .ok_or_else(|| fatal(AlertDescription::InternalError, "no suite negotiated"))?;

        self.wait_inner(MessageKind::Certificate, true, self.timeout)?;
        self.wait_inner(MessageKind::CertificateStatus, true, self.timeout)?;
        if suite.kx.sends_server_key_exchange() {
            self.wait_inner(MessageKind::ServerKeyExchange, false, self.timeout)?;
        }
        self.wait_inner(MessageKind::CertificateRequest, true, self.timeout)?;
        self.wait_inner(MessageKind::ServerHelloDone, false, self.timeout)?;

        if self.client_cert_requested {
            // no client credentials configured: an empty certificate list
            self.send_handshake_message(HandshakeMessagePayload::new(
                HandshakeType::Certificate,
                HandshakePayload::Certificate(Vec::new()),
            ))?;
        }
        self.send_client_key_exchange_inner()?;
        self.send_ccs_and_activate()?;
        self.send_finished_inner()?;

        let expects_ticket = self
            .msg
            .server_hello
            .as_ref()
            .map(|hello| hello.get_extension(ExtensionType::SessionTicket).is_some())
            .unwrap_or(false);
        if expects_ticket {
            self.wait_inner(MessageKind::NewSessionTicket, false, self.timeout)?;
        }
        self.wait_inner(MessageKind::ChangeCipherSpec, false, self.timeout)?;
        self.wait_inner(MessageKind::Finished, false, self.timeout)?;
        Ok(())
    }

    fn handshake_abbreviated(&mut self) -> Result<(), TlsError> {
        let expects_ticket = self
            .msg
            .server_hello
            .as_ref()
            .map(|hello| hello.get_extension(ExtensionType::SessionTicket).is_some())
            .unwrap_or(false);
        if expects_ticket {
            self.wait_inner(MessageKind::NewSessionTicket, false, self.timeout)?;
        }
        self.wait_inner(MessageKind::ChangeCipherSpec, false, self.timeout)?;
        self.wait_inner(MessageKind::Finished, false, self.timeout)?;
        self.send_ccs_and_activate()?;
        self.send_finished_inner()?;
        Ok(())
    }

    fn handshake13(&mut self) -> Result<(), TlsError> {
        self.wait_inner(MessageKind::EncryptedExtensions, false, self.timeout)?;
        if !self.psk_accepted {
            self.wait_inner(MessageKind::CertificateRequest, true, self.timeout)?;
            self.wait_inner(MessageKind::Certificate, false, self.timeout)?;
            self.wait_inner(MessageKind::CertificateVerify, false, self.timeout)?;
        }
        self.wait_inner(MessageKind::Finished, false, self.timeout)?;

        // the server switches to application keys after its Finished
        let suite = self
            .sec
            .suite
            .ok_or_else(|| fatal(AlertDescription::InternalError, "no suite negotiated"))?;
        let transcript_hash = self.transcript.current();
        self.application_transcript = transcript_hash.clone();
        let server_ap = {
            let schedule = self
                .schedule
                .as_mut()
                .ok_or_else(|| fatal(AlertDescription::InternalError, "no key schedule"))?;
            schedule.into_master()?;
            schedule.server_application_traffic_secret(&transcript_hash)?
        };
        let read = self.tls13_state(suite, &server_ap)?;
        self.record_layer.update_read_state(read);

        // middlebox-compatibility CCS, then our Finished under the
        // handshake keys
        self.send_change_cipher_spec()?;
        self.send_finished_inner()?;
        Ok(())
    }

    fn collect_session(&mut self) {
        if self.sec.version == Version::Tls13 {
            return;
        }
        let master = self.sec.master_secret.to_vec();
        if let Some(ticket) = &self.msg.new_session_ticket {
            if !ticket.ticket.0.is_empty() {
                self.new_session = Some(SessionState::ticket(
                    ticket.ticket.0.clone(),
                    ticket.lifetime_hint,
                    self.sec.cipher_suite,
                    self.sec.version,
                    master,
                    self.sec.extended_master_secret,
                ));
                return;
            }
        }
        if let Some(hello) = &self.msg.server_hello {
            if !hello.session_id.is_empty() && !self.sec.resumed {
                self.new_session = Some(SessionState::id(
                    hello.session_id.as_bytes().to_vec(),
                    self.sec.cipher_suite,
                    self.sec.version,
                    master,
                    self.sec.extended_master_secret,
                ));
            }
        }
    }

    /// Wait for a post-handshake NewSessionTicket and turn it into a
    /// resumption PSK.
    pub fn wait_tls13_ticket(&mut self, timeout: Duration) -> Result<Option<Tls13Psk>, TlsError> {
        if self.sec.version != Version::Tls13 || !self.handshake_completed {
            return Ok(None);
        }
        match self.wait_inner(MessageKind::NewSessionTicket, true, timeout) {
            Ok(Some(_)) => {}
            Ok(None) | Err(TlsError::Timeout) => return Ok(None),
            Err(err) => {
                self.guard::<()>(Err(err))?;
                return Ok(None);
            }
        }
        let ticket = match &self.msg.new_session_ticket13 {
            Some(ticket) => ticket.clone(),
            None => return Ok(None),
        };
        let suite = self
            .sec
            .suite
            .ok_or_else(|| fatal(AlertDescription::InternalError, "no suite negotiated"))?;
        let psk = schedule13::resumption_psk(
            suite.prf_hash(),
            &self.resumption_master,
            &ticket.nonce.0,
        )?;
        Ok(Some(Tls13Psk {
            psk,
            ticket: ticket.ticket.0.clone(),
            lifetime: ticket.lifetime,
            age_add: ticket.age_add,
            hash: suite.prf_hash(),
            cipher_suite: self.sec.cipher_suite,
        }))
    }

    /// Renegotiate on the established connection (TLS <= 1.2).
    pub fn renegotiate(&mut self) -> Result<(), TlsError> {
        self.renegotiating = true;
        let result = self.handshake_inner();
        self.renegotiating = false;
        self.guard(result)
    }

    pub fn close(&mut self) {
        self.record_layer.close_socket();
    }
}

impl Drop for Connection<'_> {
    fn drop(&mut self) {
        // the socket never outlives the connection
        self.record_layer.close_socket();
        log::debug!("TLS connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientProfile};
    use crate::msgs::enums::ECPointFormat;
    use probe::recorder::Recorder;

    fn connection(profile: &ClientProfile) -> Connection<'_> {
        let recorder = Recorder::shared();
        let socket = crate::sock::Socket::new("host.invalid", 443, recorder.clone());
        let record_layer = RecordLayer::new(socket, RecordedRng::new(recorder.clone()));
        Connection::new(profile, recorder, record_layer)
    }

    fn hello_of(payload: &HandshakeMessagePayload) -> &ClientHelloPayload {
        match &payload.payload {
            HandshakePayload::ClientHello(hello) => hello,
            other => panic!("not a client hello: {:?}", other),
        }
    }

    #[test]
    fn modern_hello_extension_order() {
        let profile = ClientProfile::modern();
        let mut conn = connection(&profile);
        let payload = conn.build_client_hello().unwrap();
        let hello = hello_of(&payload);

        assert_eq!(hello.client_version, Version::Tls12);
        assert!(hello.session_id.is_empty());
        assert_eq!(hello.compression_methods, vec![CompressionMethod::Null]);

        let types: Vec<u16> = hello.extensions.iter().map(|ext| ext.get_type()).collect();
        assert_eq!(
            types,
            vec![
                ExtensionType::SupportedVersions.to_wire(),
                ExtensionType::SignatureAlgorithms.to_wire(),
                ExtensionType::SupportedGroups.to_wire(),
                ExtensionType::ECPointFormats.to_wire(),
            ]
        );
        match hello.get_extension(ExtensionType::SupportedVersions) {
            Some(ClientExtension::SupportedVersions(versions)) => {
                assert_eq!(versions, &vec![Version::Tls12.to_wire()]);
            }
            other => panic!("unexpected supported_versions: {:?}", other),
        }
        match hello.get_extension(ExtensionType::ECPointFormats) {
            Some(ClientExtension::ECPointFormats(formats)) => {
                assert_eq!(formats, &vec![ECPointFormat::Uncompressed]);
            }
            other => panic!("unexpected ec_point_formats: {:?}", other),
        }
    }

    #[test]
    fn hello_synthesis_replays_bit_exactly() {
        let profile = ClientProfile::modern();
        let recorder = Recorder::shared();
        recorder.borrow_mut().record();
        let socket = crate::sock::Socket::new("host.invalid", 443, recorder.clone());
        let record_layer = RecordLayer::new(socket, RecordedRng::new(recorder.clone()));
        let mut conn = Connection::new(&profile, recorder.clone(), record_layer);
        let payload = conn.build_client_hello().unwrap();
        let first = hello_of(&payload).random;

        // replaying rebuilds the identical hello: time and entropy are both
        // injected
        recorder.borrow_mut().replay();
        let socket = crate::sock::Socket::new("host.invalid", 443, recorder.clone());
        let record_layer = RecordLayer::new(socket, RecordedRng::new(recorder.clone()));
        let mut twin = Connection::new(&profile, recorder, record_layer);
        let replayed = twin.build_client_hello().unwrap();
        assert_eq!(hello_of(&replayed).random, first);
        assert_eq!(replayed.get_encoding(), payload.get_encoding());
    }

    #[test]
    fn tls13_hello_carries_shares_and_modes() {
        let profile = ClientProfile::tls13();
        let mut conn = connection(&profile);
        let payload = conn.build_client_hello().unwrap();
        let hello = hello_of(&payload);

        // the legacy version field is capped at TLS 1.2
        assert_eq!(hello.client_version, Version::Tls12);
        match hello.get_extension(ExtensionType::SupportedVersions) {
            Some(ClientExtension::SupportedVersions(versions)) => {
                assert_eq!(versions, &vec![Version::Tls13.to_wire()]);
            }
            other => panic!("unexpected supported_versions: {:?}", other),
        }
        match hello.get_extension(ExtensionType::KeyShare) {
            Some(ClientExtension::KeyShare(entries)) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].group, NamedGroup::X25519);
                assert_eq!(entries[0].payload.0.len(), 32);
            }
            other => panic!("unexpected key_share: {:?}", other),
        }
        assert!(hello
            .get_extension(ExtensionType::PskKeyExchangeModes)
            .is_some());
    }

    #[test]
    fn grease_values_intersperse() {
        let mut profile = ClientProfile::tls13();
        profile.grease = crate::client::GreaseSlots {
            cipher_suites: true,
            extensions: true,
            groups: true,
            signature_algorithms: true,
            versions: true,
            psk_modes: true,
        };
        let mut conn = connection(&profile);
        let payload = conn.build_client_hello().unwrap();
        let hello = hello_of(&payload);

        let is_grease = |value: u16| GREASE_VALUES.contains(&value);
        assert!(is_grease(hello.cipher_suites[0].0));
        assert!(is_grease(hello.extensions[0].get_type()));
        match hello.get_extension(ExtensionType::SupportedGroups) {
            Some(ClientExtension::SupportedGroups(groups)) => {
                assert!(matches!(groups[0], NamedGroup::Unknown(v) if is_grease(v)));
            }
            other => panic!("unexpected supported_groups: {:?}", other),
        }
        match hello.get_extension(ExtensionType::SupportedVersions) {
            Some(ClientExtension::SupportedVersions(versions)) => {
                assert!(is_grease(versions[0]));
                assert!(versions.contains(&Version::Tls13.to_wire()));
            }
            other => panic!("unexpected supported_versions: {:?}", other),
        }
        // every slot uses a distinct reserved value
        let ext_grease = hello.extensions[0].get_type();
        assert_ne!(hello.cipher_suites[0].0, ext_grease);
    }

    #[test]
    fn scsv_values_are_prepended() {
        let mut profile = ClientProfile::modern();
        profile.support_scsv_renegotiation = true;
        profile.fallback_scsv = true;
        let mut conn = connection(&profile);
        let payload = conn.build_client_hello().unwrap();
        let hello = hello_of(&payload);
        assert_eq!(
            hello.cipher_suites[0],
            CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV
        );
        assert_eq!(hello.cipher_suites[1], CipherSuite::TLS_FALLBACK_SCSV);
        assert_eq!(hello.cipher_suites.len(), profile.cipher_suites.len() + 2);
    }

    #[test]
    fn psk_offer_is_last_with_a_real_binder() {
        let mut profile = ClientProfile::tls13();
        profile.support_psk = true;
        profile.psk_cache = Some(Tls13Psk {
            psk: vec![0x42; 32],
            ticket: vec![0x99; 16],
            lifetime: 7200,
            age_add: 0x11223344,
            hash: HashAlgorithm::Sha256,
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
        });
        let mut conn = connection(&profile);
        let payload = conn.build_client_hello().unwrap();
        let hello = hello_of(&payload);

        match hello.extensions.last() {
            Some(ClientExtension::PresharedKey(offer)) => {
                assert_eq!(offer.identities.len(), 1);
                assert_eq!(offer.identities[0].obfuscated_ticket_age, 0x11223344);
                assert_eq!(offer.binders.len(), 1);
                assert_eq!(offer.binders[0].0.len(), 32);
                assert_ne!(offer.binders[0].0, vec![0u8; 32]);
            }
            other => panic!("pre_shared_key not last: {:?}", other),
        }
    }

    #[test]
    fn transcript_buffers_until_the_hash_is_known() {
        let mut transcript = TranscriptHash::new();
        transcript.update(b"client hello bytes");
        transcript.select(Version::Tls12, HashAlgorithm::Sha256);
        transcript.update(b" and server hello bytes");
        assert_eq!(
            transcript.current(),
            HashAlgorithm::Sha256.digest(b"client hello bytes and server hello bytes")
        );
    }

    #[test]
    fn legacy_transcript_concatenates_md5_and_sha1() {
        let mut transcript = TranscriptHash::new();
        transcript.update(b"flight");
        transcript.select(Version::Tls10, HashAlgorithm::Sha256);
        let digest = transcript.current();
        assert_eq!(digest.len(), 36);
        assert_eq!(&digest[..16], HashAlgorithm::Md5.digest(b"flight").as_slice());
        assert_eq!(&digest[16..], HashAlgorithm::Sha1.digest(b"flight").as_slice());
    }

    #[test]
    fn session_id_is_offered_from_the_cache() {
        let mut profile = ClientProfile::interoperability();
        profile.support_session_id = true;
        profile.session_id_cache = Some(crate::client::SessionStateId {
            session_id: vec![7; 32],
            cipher_suite: CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            version: Version::Tls12,
            master_secret: vec![0; 48],
            extended_master_secret: false,
        });
        let mut conn = connection(&profile);
        let payload = conn.build_client_hello().unwrap();
        assert_eq!(hello_of(&payload).session_id.as_bytes(), &[7u8; 32][..]);
    }

    /// Record a synthesised hello plus a crafted server answer, then
    /// drive the connection through the replay: the emitted bytes must
    /// match the recording and the state machine must lock the server's
    /// choices.
    #[test]
    fn hello_flight_replays_against_a_recorded_server() {
        let profile = ClientProfile::modern();
        let recorder = Recorder::shared();
        recorder.borrow_mut().record();

        let socket = crate::sock::Socket::new("host.invalid", 443, recorder.clone());
        let record_layer = RecordLayer::new(socket, RecordedRng::new(recorder.clone()));
        let mut pilot = Connection::new(&profile, recorder.clone(), record_layer);
        let hello = pilot.build_client_hello().unwrap();

        // what the wire would carry: one plaintext handshake record
        let record = crate::msgs::message::OpaqueMessage {
            typ: ContentType::Handshake,
            version: Version::Tls10,
            payload: hello.get_encoding(),
        };
        assert!(recorder.borrow_mut().socket_sendall(&record.encode()).unwrap());

        // the server's answer
        let server_hello = ServerHelloPayload {
            legacy_version: Version::Tls12,
            random: Random([0xab; 32]),
            session_id: SessionId::empty(),
            cipher_suite: profile.cipher_suites[0],
            compression_method: CompressionMethod::Null,
            extensions: Vec::new(),
        };
        let answer = crate::msgs::message::OpaqueMessage {
            typ: ContentType::Handshake,
            version: Version::Tls12,
            payload: HandshakeMessagePayload::new(
                HandshakeType::ServerHello,
                HandshakePayload::ServerHello(server_hello),
            )
            .get_encoding(),
        };
        recorder
            .borrow_mut()
            .trace_socket_recv(Some(&answer.encode()))
            .unwrap();
        recorder.borrow_mut().trace_bytes("server_random", &[0xab; 32]).unwrap();

        // the replayed twin emits the identical hello and accepts the
        // recorded answer
        recorder.borrow_mut().replay();
        let socket = crate::sock::Socket::new("host.invalid", 443, recorder.clone());
        let record_layer = RecordLayer::new(socket, RecordedRng::new(recorder.clone()));
        let mut conn = Connection::new(&profile, recorder, record_layer);
        conn.send_client_hello().unwrap();
        let message = conn.wait(MessageKind::ServerHello).unwrap();
        assert_eq!(message.kind(), MessageKind::ServerHello);
        assert_eq!(conn.sec.version, Version::Tls12);
        assert_eq!(conn.sec.cipher_suite, profile.cipher_suites[0]);
        assert!(conn.sec.suite.is_some());
    }

    #[test]
    fn unoffered_suite_in_the_answer_is_fatal() {
        let profile = ClientProfile::modern();
        let recorder = Recorder::shared();
        recorder.borrow_mut().record();

        let socket = crate::sock::Socket::new("host.invalid", 443, recorder.clone());
        let record_layer = RecordLayer::new(socket, RecordedRng::new(recorder.clone()));
        let mut pilot = Connection::new(&profile, recorder.clone(), record_layer);
        let hello = pilot.build_client_hello().unwrap();
        let record = crate::msgs::message::OpaqueMessage {
            typ: ContentType::Handshake,
            version: Version::Tls10,
            payload: hello.get_encoding(),
        };
        assert!(recorder.borrow_mut().socket_sendall(&record.encode()).unwrap());

        let server_hello = ServerHelloPayload {
            legacy_version: Version::Tls12,
            random: Random([0xab; 32]),
            session_id: SessionId::empty(),
            // never offered by the modern preset
            cipher_suite: CipherSuite::TLS_RSA_WITH_RC4_128_MD5,
            compression_method: CompressionMethod::Null,
            extensions: Vec::new(),
        };
        let answer = crate::msgs::message::OpaqueMessage {
            typ: ContentType::Handshake,
            version: Version::Tls12,
            payload: HandshakeMessagePayload::new(
                HandshakeType::ServerHello,
                HandshakePayload::ServerHello(server_hello),
            )
            .get_encoding(),
        };
        recorder
            .borrow_mut()
            .trace_socket_recv(Some(&answer.encode()))
            .unwrap();
        recorder.borrow_mut().trace_bytes("server_random", &[0xab; 32]).unwrap();
        // the connection emits a fatal illegal_parameter alert on its way
        // out; the record version is still the initial one because the
        // hello was rejected before the lock
        let alert = crate::msgs::message::OpaqueMessage {
            typ: ContentType::Alert,
            version: Version::Tls10,
            payload: vec![
                AlertLevel::Fatal.to_wire(),
                AlertDescription::IllegalParameter.to_wire(),
            ],
        };
        assert!(recorder.borrow_mut().socket_sendall(&alert.encode()).unwrap());

        recorder.borrow_mut().replay();
        let socket = crate::sock::Socket::new("host.invalid", 443, recorder.clone());
        let record_layer = RecordLayer::new(socket, RecordedRng::new(recorder.clone()));
        let mut conn = Connection::new(&profile, recorder, record_layer);
        conn.send_client_hello().unwrap();
        let err = conn.wait(MessageKind::ServerHello).unwrap_err();
        assert!(matches!(
            err,
            TlsError::Fatal {
                description: AlertDescription::IllegalParameter,
                ..
            }
        ));
    }

    #[test]
    fn client_is_usable_end_to_end_for_synthesis() {
        let recorder = Recorder::shared();
        let mut client = Client::new("localhost", 44330, recorder);
        client.profile = ClientProfile::modern();
        let conn = client.create_connection().unwrap();
        drop(conn);
    }
}
