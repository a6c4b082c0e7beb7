//! Key exchange: ServerKeyExchange dissection, per-method premaster
//! agreement and the TLS <= 1.2 key schedule. Ephemeral private values are
//! derived from recorder-injectable bytes so a replay reproduces every
//! secret bit-exactly.

use num_bigint::BigUint;
use probe::caps::Rng;

use crate::codec::{Codec, Reader};
use crate::crypto::hash::HashAlgorithm;
use crate::crypto::prf::{prf_tls10, prf_tls12};
use crate::crypto::pubkey::{
    self, SubjectPublicKey,
};
use crate::error::TlsError;
use crate::msgs::base::{PayloadU16, PayloadU8};
use crate::msgs::enums::{AlertDescription, NamedGroup, SignatureScheme, Version};
use crate::msgs::handshake::DigitallySigned;

fn fatal(description: AlertDescription, message: &str) -> TlsError {
    TlsError::fatal(description, message)
}

/// Signature trailing the server's key-exchange parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkeSignature {
    /// Anonymous key exchange: nothing to verify.
    None,
    /// TLS 1.2: explicit signature algorithm.
    Tls12(DigitallySigned),
    /// TLS <= 1.1: algorithm implied by the certificate key.
    Legacy(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdheServerParams {
    pub curve: NamedGroup,
    pub public: Vec<u8>,
    /// The bytes the signature covers.
    pub raw_params: Vec<u8>,
    pub signature: SkeSignature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DheServerParams {
    pub p: Vec<u8>,
    pub g: Vec<u8>,
    pub server_public: Vec<u8>,
    pub raw_params: Vec<u8>,
    pub signature: SkeSignature,
}

fn read_ske_signature(
    reader: &mut Reader,
    version: Version,
    anonymous: bool,
) -> Result<SkeSignature, TlsError> {
    if anonymous {
        return Ok(SkeSignature::None);
    }
    if version >= Version::Tls12 {
        Ok(SkeSignature::Tls12(DigitallySigned::read(reader)?))
    } else {
        Ok(SkeSignature::Legacy(PayloadU16::read(reader)?.0))
    }
}

/// Dissect an ECDHE ServerKeyExchange (named-curve form only).
pub fn parse_ecdhe_params(
    payload: &[u8],
    version: Version,
    anonymous: bool,
) -> Result<EcdheServerParams, TlsError> {
    let mut reader = Reader::init(payload);
    let curve_type = u8::read(&mut reader)?;
    if curve_type != 3 {
        return Err(fatal(
            AlertDescription::IllegalParameter,
            "only the named_curve form is supported",
        ));
    }
    let curve = NamedGroup::read(&mut reader)?;
    let public = PayloadU8::read(&mut reader)?.0;
    let raw_params = payload[..reader.used()].to_vec();
    let signature = read_ske_signature(&mut reader, version, anonymous)?;
    Ok(EcdheServerParams {
        curve,
        public,
        raw_params,
        signature,
    })
}

/// Dissect a finite-field DHE ServerKeyExchange.
pub fn parse_dhe_params(
    payload: &[u8],
    version: Version,
    anonymous: bool,
) -> Result<DheServerParams, TlsError> {
    let mut reader = Reader::init(payload);
    let p = PayloadU16::read(&mut reader)?.0;
    let g = PayloadU16::read(&mut reader)?.0;
    let server_public = PayloadU16::read(&mut reader)?.0;
    let raw_params = payload[..reader.used()].to_vec();
    let signature = read_ske_signature(&mut reader, version, anonymous)?;
    Ok(DheServerParams {
        p,
        g,
        server_public,
        raw_params,
        signature,
    })
}

/// Check a ServerKeyExchange signature over client_random || server_random
/// || params against the server certificate's key.
pub fn verify_ske_signature(
    signature: &SkeSignature,
    key: &SubjectPublicKey,
    client_random: &[u8],
    server_random: &[u8],
    raw_params: &[u8],
) -> Result<(), TlsError> {
    let mut message = Vec::with_capacity(64 + raw_params.len());
    message.extend_from_slice(client_random);
    message.extend_from_slice(server_random);
    message.extend_from_slice(raw_params);

    let verified = match signature {
        SkeSignature::None => Ok(()),
        SkeSignature::Tls12(signed) => {
            pubkey::verify_signature(signed.scheme, key, &message, &signed.signature.0)
        }
        SkeSignature::Legacy(sig) => match key.kind {
            pubkey::PublicKeyKind::Rsa => pubkey::verify_signature_md5sha1(key, &message, sig),
            pubkey::PublicKeyKind::Ec => {
                pubkey::verify_signature(SignatureScheme::EcdsaSha1, key, &message, sig)
            }
            _ => Err(()),
        },
    };
    verified.map_err(|_| {
        fatal(
            AlertDescription::DecryptError,
            "server key exchange signature does not verify",
        )
    })
}

/// An ephemeral share for one named group, built from recorder-injected
/// bytes.
pub struct KeyShare {
    pub group: NamedGroup,
    pub public: Vec<u8>,
    secret: GroupSecret,
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("group", &self.group)
            .field("public", &self.public)
            .finish()
    }
}

enum GroupSecret {
    X25519(x25519_dalek::StaticSecret),
    P256(p256::SecretKey),
    P384(p384::SecretKey),
}

impl KeyShare {
    pub fn generate(group: NamedGroup, rng: &mut dyn Rng) -> Result<KeyShare, TlsError> {
        match group {
            NamedGroup::X25519 => {
                let seed = rng.random_bytes("ec_seed", 32)?;
                let seed: [u8; 32] = seed
                    .try_into()
                    .map_err(|_| fatal(AlertDescription::InternalError, "short x25519 seed"))?;
                let secret = x25519_dalek::StaticSecret::from(seed);
                let public = x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec();
                Ok(KeyShare {
                    group,
                    public,
                    secret: GroupSecret::X25519(secret),
                })
            }
            NamedGroup::Secp256r1 => {
                // reject-and-retry until the bytes form a valid scalar; every
                // candidate is injected, so a replay walks the same path
                for _ in 0..64 {
                    let seed = rng.random_bytes("ec_seed", 32)?;
                    if let Ok(secret) = p256::SecretKey::from_be_bytes(&seed) {
                        let public = secret.public_key().to_sec1_bytes_uncompressed();
                        return Ok(KeyShare {
                            group,
                            public,
                            secret: GroupSecret::P256(secret),
                        });
                    }
                }
                Err(fatal(AlertDescription::InternalError, "no valid p256 scalar"))
            }
            NamedGroup::Secp384r1 => {
                for _ in 0..64 {
                    let seed = rng.random_bytes("ec_seed", 48)?;
                    if let Ok(secret) = p384::SecretKey::from_be_bytes(&seed) {
                        let public = secret.public_key().to_sec1_bytes_uncompressed();
                        return Ok(KeyShare {
                            group,
                            public,
                            secret: GroupSecret::P384(secret),
                        });
                    }
                }
                Err(fatal(AlertDescription::InternalError, "no valid p384 scalar"))
            }
            other => Err(fatal(
                AlertDescription::HandshakeFailure,
                &format!("no key share support for {:?}", other),
            )),
        }
    }

    pub fn agree(&self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        let bad_point = || fatal(AlertDescription::IllegalParameter, "malformed peer key share");
        match &self.secret {
            GroupSecret::X25519(secret) => {
                let peer: [u8; 32] = peer_public.try_into().map_err(|_| bad_point())?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
                Ok(shared.as_bytes().to_vec())
            }
            GroupSecret::P256(secret) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public).map_err(|_| bad_point())?;
                let shared =
                    p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
            GroupSecret::P384(secret) => {
                let peer = p384::PublicKey::from_sec1_bytes(peer_public).map_err(|_| bad_point())?;
                let shared =
                    p384::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
        }
    }
}

trait Sec1Uncompressed {
    fn to_sec1_bytes_uncompressed(&self) -> Vec<u8>;
}

impl Sec1Uncompressed for p256::PublicKey {
    fn to_sec1_bytes_uncompressed(&self) -> Vec<u8> {
        use p256::elliptic_curve::sec1::ToEncodedPoint;
        self.to_encoded_point(false).as_bytes().to_vec()
    }
}

impl Sec1Uncompressed for p384::PublicKey {
    fn to_sec1_bytes_uncompressed(&self) -> Vec<u8> {
        use p384::elliptic_curve::sec1::ToEncodedPoint;
        self.to_encoded_point(false).as_bytes().to_vec()
    }
}

/// RSA key transport: 48-byte premaster carrying the offered version.
pub struct RsaKeyExchange {
    premaster: Option<Vec<u8>>,
}

impl RsaKeyExchange {
    pub fn new() -> Self {
        RsaKeyExchange { premaster: None }
    }

    pub fn agree_on_premaster_secret(
        &mut self,
        client_version_sent: Version,
        rng: &mut dyn Rng,
    ) -> Result<Vec<u8>, TlsError> {
        let mut premaster = client_version_sent.to_wire().to_be_bytes().to_vec();
        premaster.extend_from_slice(&rng.random_bytes("pms_rsa", 46)?);
        self.premaster = Some(premaster.clone());
        Ok(premaster)
    }

    /// The ClientKeyExchange body: length-prefixed PKCS#1 v1.5 ciphertext.
    /// Padding is non-deterministic, hence the recorder injection.
    pub fn client_key_exchange(
        &self,
        server_key: &SubjectPublicKey,
        recorder: &probe::recorder::SharedRecorder,
    ) -> Result<Vec<u8>, TlsError> {
        let premaster = self
            .premaster
            .as_ref()
            .ok_or_else(|| fatal(AlertDescription::InternalError, "premaster not agreed yet"))?;
        let fresh = pubkey::rsa_encrypt_pkcs1(server_key, premaster)
            .map_err(|err| fatal(AlertDescription::InternalError, &err))?;
        let ciphertext = recorder
            .borrow_mut()
            .inject_bytes("rsa_enciphered", fresh)
            .map_err(TlsError::from)?;
        Ok(PayloadU16::new(ciphertext).get_encoding())
    }
}

/// Finite-field DHE against server-supplied parameters.
pub struct DhKeyExchange {
    params: Option<DheServerParams>,
    client_public: Option<Vec<u8>>,
}

impl DhKeyExchange {
    pub fn new() -> Self {
        DhKeyExchange {
            params: None,
            client_public: None,
        }
    }

    pub fn consume_server_params(&mut self, params: DheServerParams) {
        self.params = Some(params);
    }

    pub fn agree_on_premaster_secret(&mut self, rng: &mut dyn Rng) -> Result<Vec<u8>, TlsError> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| fatal(AlertDescription::InternalError, "no server dh params"))?;
        let p = BigUint::from_bytes_be(&params.p);
        let g = BigUint::from_bytes_be(&params.g);
        let server_public = BigUint::from_bytes_be(&params.server_public);
        if p < BigUint::from(5u8) {
            return Err(fatal(AlertDescription::IllegalParameter, "dh prime too small"));
        }

        let seed = rng.random_bytes("dh_private", params.p.len())?;
        let x = BigUint::from_bytes_be(&seed) % (&p - 2u8) + 1u8;
        let client_public = g.modpow(&x, &p);
        let shared = server_public.modpow(&x, &p);

        // pad the client share to the prime length, strip leading zeros off
        // the premaster (RFC 5246, 8.1.2)
        let mut public_bytes = client_public.to_bytes_be();
        while public_bytes.len() < params.p.len() {
            public_bytes.insert(0, 0);
        }
        self.client_public = Some(public_bytes);
        Ok(shared.to_bytes_be())
    }

    pub fn client_key_exchange(&self) -> Result<Vec<u8>, TlsError> {
        let public = self
            .client_public
            .as_ref()
            .ok_or_else(|| fatal(AlertDescription::InternalError, "premaster not agreed yet"))?;
        Ok(PayloadU16::new(public.clone()).get_encoding())
    }
}

/// Ephemeral ECDH over the server-chosen named curve.
pub struct EcdhKeyExchange {
    params: Option<EcdheServerParams>,
    share: Option<KeyShare>,
}

impl EcdhKeyExchange {
    pub fn new() -> Self {
        EcdhKeyExchange {
            params: None,
            share: None,
        }
    }

    pub fn consume_server_params(&mut self, params: EcdheServerParams) {
        self.params = Some(params);
    }

    pub fn selected_curve(&self) -> Option<NamedGroup> {
        self.params.as_ref().map(|params| params.curve)
    }

    pub fn agree_on_premaster_secret(&mut self, rng: &mut dyn Rng) -> Result<Vec<u8>, TlsError> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| fatal(AlertDescription::InternalError, "no server ecdh params"))?;
        let share = KeyShare::generate(params.curve, rng)?;
        let shared = share.agree(&params.public)?;
        self.share = Some(share);
        Ok(shared)
    }

    /// The ClientKeyExchange body: length-prefixed uncompressed point.
    pub fn client_key_exchange(&self) -> Result<Vec<u8>, TlsError> {
        let share = self
            .share
            .as_ref()
            .ok_or_else(|| fatal(AlertDescription::InternalError, "premaster not agreed yet"))?;
        Ok(PayloadU8::new(share.public.clone()).get_encoding())
    }
}

pub enum KeyExchange {
    Rsa(RsaKeyExchange),
    Dhe(DhKeyExchange),
    Ecdhe(EcdhKeyExchange),
}

// ----- TLS <= 1.2 key schedule -----

fn prf(
    version: Version,
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
    out_len: usize,
) -> Vec<u8> {
    if version >= Version::Tls12 {
        prf_tls12(hash, secret, label, seed, out_len)
    } else {
        prf_tls10(secret, label, seed, out_len)
    }
}

pub fn master_secret(
    version: Version,
    prf_hash: HashAlgorithm,
    premaster: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Vec<u8> {
    let mut seed = client_random.to_vec();
    seed.extend_from_slice(server_random);
    prf(version, prf_hash, premaster, b"master secret", &seed, 48)
}

/// RFC 7627: bind the master secret to the transcript instead of the
/// randoms.
pub fn extended_master_secret(
    version: Version,
    prf_hash: HashAlgorithm,
    premaster: &[u8],
    session_hash: &[u8],
) -> Vec<u8> {
    prf(
        version,
        prf_hash,
        premaster,
        b"extended master secret",
        session_hash,
        48,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    pub client_mac: Vec<u8>,
    pub server_mac: Vec<u8>,
    pub client_key: Vec<u8>,
    pub server_key: Vec<u8>,
    pub client_iv: Vec<u8>,
    pub server_iv: Vec<u8>,
}

pub fn key_block(
    version: Version,
    prf_hash: HashAlgorithm,
    master: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    mac_key_len: usize,
    enc_key_len: usize,
    iv_len: usize,
) -> KeyBlock {
    // note the swapped randoms relative to the master secret derivation
    let mut seed = server_random.to_vec();
    seed.extend_from_slice(client_random);
    let total = 2 * (mac_key_len + enc_key_len + iv_len);
    let block = prf(version, prf_hash, master, b"key expansion", &seed, total);

    let mut offset = 0;
    let mut split = |len: usize| {
        let part = block[offset..offset + len].to_vec();
        offset += len;
        part
    };
    KeyBlock {
        client_mac: split(mac_key_len),
        server_mac: split(mac_key_len),
        client_key: split(enc_key_len),
        server_key: split(enc_key_len),
        client_iv: split(iv_len),
        server_iv: split(iv_len),
    }
}

pub fn finished_verify_data(
    version: Version,
    prf_hash: HashAlgorithm,
    master: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Vec<u8> {
    prf(version, prf_hash, master, label, transcript_hash, 12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe::error::Error;

    struct CountingRng(u8);

    impl Rng for CountingRng {
        fn random_bytes(&mut self, _name: &'static str, len: usize) -> Result<Vec<u8>, Error> {
            self.0 = self.0.wrapping_add(1);
            Ok(vec![self.0; len])
        }
    }

    #[test]
    fn x25519_shares_agree() {
        let mut rng = CountingRng(0);
        let alice = KeyShare::generate(NamedGroup::X25519, &mut rng).unwrap();
        let bob = KeyShare::generate(NamedGroup::X25519, &mut rng).unwrap();
        assert_eq!(
            alice.agree(&bob.public).unwrap(),
            bob.agree(&alice.public).unwrap()
        );
    }

    #[test]
    fn p256_shares_agree() {
        let mut rng = CountingRng(10);
        let alice = KeyShare::generate(NamedGroup::Secp256r1, &mut rng).unwrap();
        let bob = KeyShare::generate(NamedGroup::Secp256r1, &mut rng).unwrap();
        assert_eq!(alice.public.len(), 65);
        assert_eq!(alice.public[0], 0x04);
        assert_eq!(
            alice.agree(&bob.public).unwrap(),
            bob.agree(&alice.public).unwrap()
        );
    }

    #[test]
    fn unsupported_group_is_reported() {
        let mut rng = CountingRng(0);
        let err = KeyShare::generate(NamedGroup::X448, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            TlsError::Fatal {
                description: AlertDescription::HandshakeFailure,
                ..
            }
        ));
    }

    #[test]
    fn dhe_agreement_with_toy_prime() {
        // p = 0xfb (251, prime), g = 2: enough to check the arithmetic
        let params = DheServerParams {
            p: vec![0xfb],
            g: vec![0x02],
            server_public: BigUint::from(2u8)
                .modpow(&BigUint::from(17u8), &BigUint::from(251u16))
                .to_bytes_be(),
            raw_params: Vec::new(),
            signature: SkeSignature::None,
        };
        let mut kx = DhKeyExchange::new();
        kx.consume_server_params(params);
        let premaster = kx
            .agree_on_premaster_secret(&mut CountingRng(3))
            .unwrap();
        assert!(!premaster.is_empty());
        let cke = kx.client_key_exchange().unwrap();
        // u16 length prefix plus the padded share
        assert_eq!(cke[..2], [0, 1]);
    }

    #[test]
    fn ecdhe_ske_parses_and_round_trips() {
        let mut payload = vec![3u8]; // named_curve
        NamedGroup::X25519.encode(&mut payload);
        PayloadU8::new(vec![0xaa; 32]).encode(&mut payload);
        let params_len = payload.len();
        DigitallySigned {
            scheme: SignatureScheme::RsaPssRsaeSha256,
            signature: PayloadU16::new(vec![0x55; 64]),
        }
        .encode(&mut payload);

        let parsed = parse_ecdhe_params(&payload, Version::Tls12, false).unwrap();
        assert_eq!(parsed.curve, NamedGroup::X25519);
        assert_eq!(parsed.public, vec![0xaa; 32]);
        assert_eq!(parsed.raw_params, payload[..params_len].to_vec());
        assert!(matches!(parsed.signature, SkeSignature::Tls12(_)));
    }

    #[test]
    fn dhe_ske_parses_legacy_signature() {
        let mut payload = Vec::new();
        PayloadU16::new(vec![0xfb]).encode(&mut payload);
        PayloadU16::new(vec![0x02]).encode(&mut payload);
        PayloadU16::new(vec![0x42]).encode(&mut payload);
        PayloadU16::new(vec![0x99; 128]).encode(&mut payload);

        let parsed = parse_dhe_params(&payload, Version::Tls10, false).unwrap();
        assert_eq!(parsed.p, vec![0xfb]);
        assert!(matches!(parsed.signature, SkeSignature::Legacy(sig) if sig.len() == 128));
    }

    #[test]
    fn key_block_split_order() {
        let block = key_block(
            Version::Tls12,
            HashAlgorithm::Sha256,
            &[7; 48],
            &[1; 32],
            &[2; 32],
            20,
            16,
            16,
        );
        assert_eq!(block.client_mac.len(), 20);
        assert_eq!(block.server_mac.len(), 20);
        assert_eq!(block.client_key.len(), 16);
        assert_eq!(block.server_key.len(), 16);
        assert_eq!(block.client_iv.len(), 16);
        assert_eq!(block.server_iv.len(), 16);

        // the six parts are the contiguous split of the expanded block
        let mut seed = vec![2u8; 32];
        seed.extend_from_slice(&[1; 32]);
        let raw = prf_tls12(HashAlgorithm::Sha256, &[7; 48], b"key expansion", &seed, 104);
        let mut joined = Vec::new();
        for part in [
            &block.client_mac,
            &block.server_mac,
            &block.client_key,
            &block.server_key,
            &block.client_iv,
            &block.server_iv,
        ] {
            joined.extend_from_slice(part);
        }
        assert_eq!(joined, raw);
    }

    #[test]
    fn aead_key_block_has_no_mac_keys() {
        let block = key_block(
            Version::Tls12,
            HashAlgorithm::Sha256,
            &[7; 48],
            &[1; 32],
            &[2; 32],
            0,
            16,
            4,
        );
        assert!(block.client_mac.is_empty());
        assert!(block.server_mac.is_empty());
        assert_eq!(block.client_iv.len(), 4);
    }

    #[test]
    fn master_secret_is_48_bytes_for_all_versions() {
        for version in [Version::Tls10, Version::Tls11, Version::Tls12] {
            let master = master_secret(
                version,
                HashAlgorithm::Sha256,
                &[3; 48],
                &[1; 32],
                &[2; 32],
            );
            assert_eq!(master.len(), 48);
        }
    }
}
