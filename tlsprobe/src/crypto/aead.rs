//! AEAD seal/open. GCM and ChaCha20-Poly1305 come from ring; ring has no
//! CCM, so the CCM modes run on the RustCrypto implementation.

use ccm::aead::generic_array::GenericArray;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::consts::{U12, U16, U8};
use ccm::Ccm;
use ring::aead;

use crate::suites::BulkAlgorithm;

type Aes128Ccm = Ccm<aes::Aes128, U16, U12>;
type Aes128Ccm8 = Ccm<aes::Aes128, U8, U12>;

pub enum AeadCipher {
    Ring(aead::LessSafeKey),
    Ccm(Box<Aes128Ccm>),
    Ccm8(Box<Aes128Ccm8>),
}

impl AeadCipher {
    pub fn new(algorithm: BulkAlgorithm, key: &[u8]) -> Result<AeadCipher, ()> {
        let ring_alg = match algorithm {
            BulkAlgorithm::Aes128Gcm => Some(&aead::AES_128_GCM),
            BulkAlgorithm::Aes256Gcm => Some(&aead::AES_256_GCM),
            BulkAlgorithm::ChaCha20Poly1305 => Some(&aead::CHACHA20_POLY1305),
            _ => None,
        };
        if let Some(alg) = ring_alg {
            let key = aead::UnboundKey::new(alg, key).map_err(|_| ())?;
            return Ok(AeadCipher::Ring(aead::LessSafeKey::new(key)));
        }
        match algorithm {
            BulkAlgorithm::Aes128Ccm => {
                let cipher = Aes128Ccm::new_from_slice(key).map_err(|_| ())?;
                Ok(AeadCipher::Ccm(Box::new(cipher)))
            }
            BulkAlgorithm::Aes128Ccm8 => {
                let cipher = Aes128Ccm8::new_from_slice(key).map_err(|_| ())?;
                Ok(AeadCipher::Ccm8(Box::new(cipher)))
            }
            _ => Err(()),
        }
    }

    /// Returns ciphertext with the tag appended.
    pub fn seal(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, ()> {
        let mut buffer = plaintext.to_vec();
        match self {
            AeadCipher::Ring(key) => {
                let nonce = aead::Nonce::try_assume_unique_for_key(nonce).map_err(|_| ())?;
                let tag = key
                    .seal_in_place_separate_tag(nonce, aead::Aad::from(aad), &mut buffer)
                    .map_err(|_| ())?;
                buffer.extend_from_slice(tag.as_ref());
            }
            AeadCipher::Ccm(cipher) => {
                let tag = cipher
                    .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut buffer)
                    .map_err(|_| ())?;
                buffer.extend_from_slice(tag.as_slice());
            }
            AeadCipher::Ccm8(cipher) => {
                let tag = cipher
                    .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut buffer)
                    .map_err(|_| ())?;
                buffer.extend_from_slice(tag.as_slice());
            }
        }
        Ok(buffer)
    }

    /// Open ciphertext-with-tag; any mismatch is reported, never unpacked.
    pub fn open(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, ()> {
        match self {
            AeadCipher::Ring(key) => {
                let nonce = aead::Nonce::try_assume_unique_for_key(nonce).map_err(|_| ())?;
                let mut buffer = ciphertext.to_vec();
                let plaintext = key
                    .open_in_place(nonce, aead::Aad::from(aad), &mut buffer)
                    .map_err(|_| ())?;
                let len = plaintext.len();
                buffer.truncate(len);
                Ok(buffer)
            }
            AeadCipher::Ccm(cipher) => {
                open_detached(ciphertext, 16, |buffer, tag| {
                    cipher
                        .decrypt_in_place_detached(
                            GenericArray::from_slice(nonce),
                            aad,
                            buffer,
                            GenericArray::from_slice(tag),
                        )
                        .map_err(|_| ())
                })
            }
            AeadCipher::Ccm8(cipher) => {
                open_detached(ciphertext, 8, |buffer, tag| {
                    cipher
                        .decrypt_in_place_detached(
                            GenericArray::from_slice(nonce),
                            aad,
                            buffer,
                            GenericArray::from_slice(tag),
                        )
                        .map_err(|_| ())
                })
            }
        }
    }
}

fn open_detached<F>(ciphertext: &[u8], tag_len: usize, decrypt: F) -> Result<Vec<u8>, ()>
where
    F: FnOnce(&mut Vec<u8>, &[u8]) -> Result<(), ()>,
{
    if ciphertext.len() < tag_len {
        return Err(());
    }
    let split = ciphertext.len() - tag_len;
    let mut buffer = ciphertext[..split].to_vec();
    decrypt(&mut buffer, &ciphertext[split..])?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(algorithm: BulkAlgorithm, key_len: usize, tag_len: usize) {
        let cipher = AeadCipher::new(algorithm, &vec![0x42; key_len]).unwrap();
        let nonce = [0x24; 12];
        let aad = [0, 0, 0, 0, 0, 0, 0, 1, 22, 3, 3, 0, 5];
        let plaintext = b"finished";

        let sealed = cipher.seal(&nonce, &aad, plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + tag_len);
        assert_eq!(cipher.open(&nonce, &aad, &sealed).unwrap(), plaintext);

        // a flipped ciphertext bit must not open
        let mut tampered = sealed.clone();
        tampered[0] ^= 1;
        assert!(cipher.open(&nonce, &aad, &tampered).is_err());

        // a different AAD must not open either
        let mut aad2 = aad;
        aad2[7] ^= 1;
        assert!(cipher.open(&nonce, &aad2, &sealed).is_err());
    }

    #[test]
    fn gcm_round_trip() {
        round_trip(BulkAlgorithm::Aes128Gcm, 16, 16);
        round_trip(BulkAlgorithm::Aes256Gcm, 32, 16);
    }

    #[test]
    fn chacha_round_trip() {
        round_trip(BulkAlgorithm::ChaCha20Poly1305, 32, 16);
    }

    #[test]
    fn ccm_round_trip() {
        round_trip(BulkAlgorithm::Aes128Ccm, 16, 16);
        round_trip(BulkAlgorithm::Aes128Ccm8, 16, 8);
    }

    #[test]
    fn cbc_algorithms_are_not_aead() {
        assert!(AeadCipher::new(BulkAlgorithm::Aes128Cbc, &[0; 16]).is_err());
    }
}
