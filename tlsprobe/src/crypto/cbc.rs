//! CBC block ciphers and the RC4 stream cipher. TLS does its own padding,
//! so the block modes run without any.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use rc4::{KeyInit, Rc4};

use crate::suites::BulkAlgorithm;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Encrypt a block-aligned buffer.
pub fn cbc_encrypt(
    algorithm: BulkAlgorithm,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, ()> {
    if data.len() % 16 != 0 {
        return Err(());
    }
    let mut buffer = data.to_vec();
    let len = buffer.len();
    match algorithm {
        BulkAlgorithm::Aes128Cbc => {
            Aes128CbcEnc::new_from_slices(key, iv)
                .map_err(|_| ())?
                .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
                .map_err(|_| ())?;
        }
        BulkAlgorithm::Aes256Cbc => {
            Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|_| ())?
                .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
                .map_err(|_| ())?;
        }
        _ => return Err(()),
    }
    Ok(buffer)
}

pub fn cbc_decrypt(
    algorithm: BulkAlgorithm,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, ()> {
    if data.is_empty() || data.len() % 16 != 0 {
        return Err(());
    }
    let mut buffer = data.to_vec();
    match algorithm {
        BulkAlgorithm::Aes128Cbc => {
            Aes128CbcDec::new_from_slices(key, iv)
                .map_err(|_| ())?
                .decrypt_padded_mut::<NoPadding>(&mut buffer)
                .map_err(|_| ())?;
        }
        BulkAlgorithm::Aes256Cbc => {
            Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| ())?
                .decrypt_padded_mut::<NoPadding>(&mut buffer)
                .map_err(|_| ())?;
        }
        _ => return Err(()),
    }
    Ok(buffer)
}

/// RC4 keystream state; carried across records for the lifetime of a
/// cipher state.
pub struct StreamCipherState {
    cipher: Rc4<rc4::consts::U16>,
}

impl StreamCipherState {
    pub fn new(key: &[u8]) -> Result<StreamCipherState, ()> {
        let cipher = Rc4::new_from_slice(key).map_err(|_| ())?;
        Ok(StreamCipherState { cipher })
    }

    pub fn process(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}
