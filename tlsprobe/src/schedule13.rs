//! The TLS 1.3 key schedule (RFC 8446 section 7.1): HKDF over the
//! negotiated hash, expand-label derivations, finished keys, resumption
//! PSKs and binder keys.

use ring::hkdf::{self, KeyType, Prk};
use ring::hmac;

use crate::crypto::hash::HashAlgorithm;
use crate::error::TlsError;
use crate::msgs::enums::AlertDescription;

struct OkmLen(usize);

impl KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

fn algorithms(hash: HashAlgorithm) -> Result<(hkdf::Algorithm, hmac::Algorithm), TlsError> {
    match hash {
        HashAlgorithm::Sha256 => Ok((hkdf::HKDF_SHA256, hmac::HMAC_SHA256)),
        HashAlgorithm::Sha384 => Ok((hkdf::HKDF_SHA384, hmac::HMAC_SHA384)),
        _ => Err(TlsError::fatal(
            AlertDescription::InternalError,
            "unsupported hkdf hash",
        )),
    }
}

fn extract(hash: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Result<Vec<u8>, TlsError> {
    // HKDF-Extract is HMAC(salt, ikm); done through hmac so the secret
    // bytes stay observable for tracing
    let (_, hmac_alg) = algorithms(hash)?;
    let key = hmac::Key::new(hmac_alg, salt);
    Ok(hmac::sign(&key, ikm).as_ref().to_vec())
}

fn expand(
    hash: HashAlgorithm,
    secret: &[u8],
    info: &[&[u8]],
    out_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let (hkdf_alg, _) = algorithms(hash)?;
    let prk = Prk::new_less_safe(hkdf_alg, secret);
    let okm = prk
        .expand(info, OkmLen(out_len))
        .map_err(|_| TlsError::fatal(AlertDescription::InternalError, "hkdf expand"))?;
    let mut out = vec![0u8; out_len];
    okm.fill(&mut out)
        .map_err(|_| TlsError::fatal(AlertDescription::InternalError, "hkdf fill"))?;
    Ok(out)
}

pub fn hkdf_expand_label(
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out_len: usize,
) -> Result<Vec<u8>, TlsError> {
    const LABEL_PREFIX: &[u8] = b"tls13 ";
    let output_len = u16::to_be_bytes(out_len as u16);
    let label_len = u8::to_be_bytes((LABEL_PREFIX.len() + label.len()) as u8);
    let context_len = u8::to_be_bytes(context.len() as u8);

    let info = &[
        &output_len[..],
        &label_len[..],
        LABEL_PREFIX,
        label,
        &context_len[..],
        context,
    ];
    expand(hash, secret, info, out_len)
}

pub fn derive_secret(
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, TlsError> {
    hkdf_expand_label(hash, secret, label, transcript_hash, hash.output_len())
}

/// The secret ladder: early -> handshake -> master, with the traffic and
/// finished derivations hanging off it.
pub struct KeySchedule13 {
    hash: HashAlgorithm,
    current: Vec<u8>,
}

impl KeySchedule13 {
    /// early_secret = HKDF-Extract(0, PSK or 0).
    pub fn new(hash: HashAlgorithm, psk: Option<&[u8]>) -> Result<KeySchedule13, TlsError> {
        let zeros = vec![0u8; hash.output_len()];
        let ikm = psk.unwrap_or(&zeros);
        let current = extract(hash, &zeros, ikm)?;
        Ok(KeySchedule13 { hash, current })
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn current_secret(&self) -> &[u8] {
        &self.current
    }

    fn derived(&self) -> Result<Vec<u8>, TlsError> {
        let empty_hash = self.hash.digest(b"");
        derive_secret(self.hash, &self.current, b"derived", &empty_hash)
    }

    /// handshake_secret = HKDF-Extract(Derive-Secret(., "derived", ""), ECDHE).
    pub fn into_handshake(&mut self, shared_secret: &[u8]) -> Result<(), TlsError> {
        let salt = self.derived()?;
        self.current = extract(self.hash, &salt, shared_secret)?;
        Ok(())
    }

    /// master_secret = HKDF-Extract(Derive-Secret(., "derived", ""), 0).
    pub fn into_master(&mut self) -> Result<(), TlsError> {
        let salt = self.derived()?;
        let zeros = vec![0u8; self.hash.output_len()];
        self.current = extract(self.hash, &salt, &zeros)?;
        Ok(())
    }

    pub fn client_handshake_traffic_secret(
        &self,
        transcript_hash: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        derive_secret(self.hash, &self.current, b"c hs traffic", transcript_hash)
    }

    pub fn server_handshake_traffic_secret(
        &self,
        transcript_hash: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        derive_secret(self.hash, &self.current, b"s hs traffic", transcript_hash)
    }

    pub fn client_application_traffic_secret(
        &self,
        transcript_hash: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        derive_secret(self.hash, &self.current, b"c ap traffic", transcript_hash)
    }

    pub fn server_application_traffic_secret(
        &self,
        transcript_hash: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        derive_secret(self.hash, &self.current, b"s ap traffic", transcript_hash)
    }

    pub fn resumption_master_secret(&self, transcript_hash: &[u8]) -> Result<Vec<u8>, TlsError> {
        derive_secret(self.hash, &self.current, b"res master", transcript_hash)
    }

    /// binder_key = Derive-Secret(early_secret, "res binder", "").
    pub fn resumption_binder_key(&self) -> Result<Vec<u8>, TlsError> {
        let empty_hash = self.hash.digest(b"");
        derive_secret(self.hash, &self.current, b"res binder", &empty_hash)
    }
}

/// Per-epoch record protection material.
pub fn traffic_keys(
    hash: HashAlgorithm,
    traffic_secret: &[u8],
    key_len: usize,
) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
    let key = hkdf_expand_label(hash, traffic_secret, b"key", b"", key_len)?;
    let iv = hkdf_expand_label(hash, traffic_secret, b"iv", b"", 12)?;
    Ok((key, iv))
}

pub fn finished_key(hash: HashAlgorithm, traffic_secret: &[u8]) -> Result<Vec<u8>, TlsError> {
    hkdf_expand_label(hash, traffic_secret, b"finished", b"", hash.output_len())
}

/// verify_data = HMAC(finished_key, transcript_hash).
pub fn finished_verify_data(
    hash: HashAlgorithm,
    finished_key: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, TlsError> {
    let (_, hmac_alg) = algorithms(hash)?;
    let key = hmac::Key::new(hmac_alg, finished_key);
    Ok(hmac::sign(&key, transcript_hash).as_ref().to_vec())
}

/// PSK for a received NewSessionTicket.
pub fn resumption_psk(
    hash: HashAlgorithm,
    resumption_master: &[u8],
    ticket_nonce: &[u8],
) -> Result<Vec<u8>, TlsError> {
    hkdf_expand_label(
        hash,
        resumption_master,
        b"resumption",
        ticket_nonce,
        hash.output_len(),
    )
}
