//! Certificate parsing and asymmetric operations: signature checks over
//! ServerKeyExchange/CertificateVerify and RSA key transport. Path
//! validation and revocation are somebody else's job.

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use ring::signature as ring_sig;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{PaddingScheme, PublicKey as _, RsaPublicKey};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::crypto::hash::HashAlgorithm;
use crate::msgs::enums::SignatureScheme;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyKind {
    Rsa,
    Ec,
    Ed25519,
    Other,
}

/// The bits of the subjectPublicKey field, plus their flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPublicKey {
    pub kind: PublicKeyKind,
    pub bits: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: i64,
    pub not_after: i64,
    pub self_signed: bool,
    pub public_key: SubjectPublicKey,
}

/// Parse a DER certificate. Only the fields the scanner reports and the
/// public key are extracted.
pub fn parse_certificate(der: &[u8]) -> Result<CertificateInfo, String> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|err| format!("certificate parsing: {}", err))?;

    let spki = cert.public_key();
    let oid = spki.algorithm.algorithm.to_id_string();
    let kind = match oid.as_str() {
        "1.2.840.113549.1.1.1" => PublicKeyKind::Rsa,
        "1.2.840.10045.2.1" => PublicKeyKind::Ec,
        "1.3.101.112" => PublicKeyKind::Ed25519,
        _ => PublicKeyKind::Other,
    };

    Ok(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        not_before: cert.validity().not_before.timestamp(),
        not_after: cert.validity().not_after.timestamp(),
        self_signed: cert.subject() == cert.issuer(),
        public_key: SubjectPublicKey {
            kind,
            bits: spki.subject_public_key.data.to_vec(),
        },
    })
}

/// Verify a TLS 1.2 style signature (explicit signature algorithm).
pub fn verify_signature(
    scheme: SignatureScheme,
    key: &SubjectPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), ()> {
    match scheme {
        SignatureScheme::RsaPkcs1Sha1 => {
            ring_verify(&ring_sig::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY, key, message, signature)
        }
        SignatureScheme::RsaPkcs1Sha256 => {
            ring_verify(&ring_sig::RSA_PKCS1_2048_8192_SHA256, key, message, signature)
        }
        SignatureScheme::RsaPkcs1Sha384 => {
            ring_verify(&ring_sig::RSA_PKCS1_2048_8192_SHA384, key, message, signature)
        }
        SignatureScheme::RsaPkcs1Sha512 => {
            ring_verify(&ring_sig::RSA_PKCS1_2048_8192_SHA512, key, message, signature)
        }
        SignatureScheme::RsaPssRsaeSha256 => {
            ring_verify(&ring_sig::RSA_PSS_2048_8192_SHA256, key, message, signature)
        }
        SignatureScheme::RsaPssRsaeSha384 => {
            ring_verify(&ring_sig::RSA_PSS_2048_8192_SHA384, key, message, signature)
        }
        SignatureScheme::RsaPssRsaeSha512 => {
            ring_verify(&ring_sig::RSA_PSS_2048_8192_SHA512, key, message, signature)
        }
        SignatureScheme::Ed25519 => ring_verify(&ring_sig::ED25519, key, message, signature),
        SignatureScheme::EcdsaSha1 => {
            ecdsa_verify_p256(key, &HashAlgorithm::Sha1.digest(message), signature)
        }
        SignatureScheme::EcdsaNistp256Sha256 => {
            ecdsa_verify_p256(key, &HashAlgorithm::Sha256.digest(message), signature)
        }
        SignatureScheme::EcdsaNistp384Sha384 => {
            ecdsa_verify_p384(key, &HashAlgorithm::Sha384.digest(message), signature)
        }
        _ => Err(()),
    }
}

/// TLS <= 1.1 ServerKeyExchange signature for RSA certificates: PKCS#1
/// v1.5 over MD5(msg) || SHA1(msg), without a DigestInfo prefix.
pub fn verify_signature_md5sha1(
    key: &SubjectPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), ()> {
    let mut digest = HashAlgorithm::Md5.digest(message);
    digest.extend_from_slice(&HashAlgorithm::Sha1.digest(message));
    let public = RsaPublicKey::from_pkcs1_der(&key.bits).map_err(|_| ())?;
    public
        .verify(PaddingScheme::new_pkcs1v15_sign(None), &digest, signature)
        .map_err(|_| ())
}

/// PKCS#1 v1.5 key transport. The padding is random, hence the caller must
/// route the ciphertext through the recorder.
pub fn rsa_encrypt_pkcs1(key: &SubjectPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, String> {
    let public = RsaPublicKey::from_pkcs1_der(&key.bits)
        .map_err(|err| format!("rsa public key: {}", err))?;
    public
        .encrypt(
            &mut rand::rngs::OsRng,
            PaddingScheme::new_pkcs1v15_encrypt(),
            plaintext,
        )
        .map_err(|err| format!("rsa encrypt: {}", err))
}

fn ring_verify(
    algorithm: &'static dyn ring_sig::VerificationAlgorithm,
    key: &SubjectPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), ()> {
    ring_sig::UnparsedPublicKey::new(algorithm, &key.bits)
        .verify(message, signature)
        .map_err(|_| ())
}

fn ecdsa_verify_p256(key: &SubjectPublicKey, digest: &[u8], signature: &[u8]) -> Result<(), ()> {
    let verifying = p256::ecdsa::VerifyingKey::from_sec1_bytes(&key.bits).map_err(|_| ())?;
    let signature = p256::ecdsa::Signature::from_der(signature).map_err(|_| ())?;
    verifying.verify_prehash(digest, &signature).map_err(|_| ())
}

fn ecdsa_verify_p384(key: &SubjectPublicKey, digest: &[u8], signature: &[u8]) -> Result<(), ()> {
    let verifying = p384::ecdsa::VerifyingKey::from_sec1_bytes(&key.bits).map_err(|_| ())?;
    let signature = p384::ecdsa::Signature::from_der(signature).map_err(|_| ())?;
    verifying.verify_prehash(digest, &signature).map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPublicKey;
    use rsa::RsaPrivateKey;

    fn test_key() -> (RsaPrivateKey, SubjectPublicKey) {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let bits = RsaPublicKey::from(&private)
            .to_pkcs1_der()
            .unwrap()
            .as_ref()
            .to_vec();
        (
            private,
            SubjectPublicKey {
                kind: PublicKeyKind::Rsa,
                bits,
            },
        )
    }

    #[test]
    fn rsa_key_transport_round_trip() {
        let (private, public) = test_key();
        let pms = vec![3u8; 48];
        let ciphertext = rsa_encrypt_pkcs1(&public, &pms).unwrap();
        let plaintext = private
            .decrypt(PaddingScheme::new_pkcs1v15_encrypt(), &ciphertext)
            .unwrap();
        assert_eq!(plaintext, pms);
    }

    #[test]
    fn md5sha1_signature_verifies() {
        let (private, public) = test_key();
        let message = b"server params and randoms";
        let mut digest = HashAlgorithm::Md5.digest(message);
        digest.extend_from_slice(&HashAlgorithm::Sha1.digest(message));
        let signature = private
            .sign(PaddingScheme::new_pkcs1v15_sign(None), &digest)
            .unwrap();
        assert!(verify_signature_md5sha1(&public, message, &signature).is_ok());
        assert!(verify_signature_md5sha1(&public, b"tampered", &signature).is_err());
    }

    #[test]
    fn unsupported_scheme_is_an_error() {
        let key = SubjectPublicKey {
            kind: PublicKeyKind::Other,
            bits: vec![0; 8],
        };
        assert!(verify_signature(SignatureScheme::Ed448, &key, b"msg", &[0; 64]).is_err());
    }
}
