//! One direction of the record layer: the cipher state in effect from one
//! key change to the next. States are replaced, never rebuilt in place; the
//! sequence number of a fresh state starts at zero.

use probe::caps::Rng;

use crate::crypto::aead::AeadCipher;
use crate::crypto::cbc::{cbc_decrypt, cbc_encrypt, StreamCipherState};
use crate::error::TlsError;
use crate::msgs::enums::{AlertDescription, CompressionMethod, ContentType, Version};
use crate::suites::{BulkCipher, CipherType, Mac};

/// Everything needed to install a new read or write state.
pub struct StateUpdateParams {
    pub version: Version,
    pub cipher: &'static BulkCipher,
    pub mac: Mac,
    pub enc_key: Vec<u8>,
    pub mac_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub compression: CompressionMethod,
    pub encrypt_then_mac: bool,
    /// TLS <= 1.0 CBC: the IV is the previous record's last ciphertext
    /// block.
    pub implicit_iv: bool,
    pub tls13: bool,
}

enum Crypter {
    Stream(StreamCipherState),
    Block,
    Aead(AeadCipher),
}

pub struct RecordState {
    cipher: &'static BulkCipher,
    mac: Mac,
    enc_key: Vec<u8>,
    mac_key: Vec<u8>,
    iv: Vec<u8>,
    encrypt_then_mac: bool,
    implicit_iv: bool,
    tls13: bool,
    crypter: Crypter,
    /// CBC residue when the IV is implicit.
    chained_iv: Vec<u8>,
    seq: u64,
}

impl RecordState {
    pub fn new(params: StateUpdateParams) -> Result<RecordState, TlsError> {
        if params.compression != CompressionMethod::Null {
            return Err(TlsError::fatal(
                AlertDescription::HandshakeFailure,
                "compression is not supported",
            ));
        }
        let crypter = match params.cipher.typ {
            CipherType::Stream => Crypter::Stream(
                StreamCipherState::new(&params.enc_key)
                    .map_err(|_| internal("stream cipher setup"))?,
            ),
            CipherType::Block => Crypter::Block,
            CipherType::Aead => Crypter::Aead(
                AeadCipher::new(params.cipher.algorithm, &params.enc_key)
                    .map_err(|_| internal("aead setup"))?,
            ),
        };
        Ok(RecordState {
            cipher: params.cipher,
            mac: params.mac,
            chained_iv: params.iv.clone(),
            enc_key: params.enc_key,
            mac_key: params.mac_key,
            iv: params.iv,
            encrypt_then_mac: params.encrypt_then_mac,
            implicit_iv: params.implicit_iv,
            tls13: params.tls13,
            crypter,
            seq: 0,
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_tls13(&self) -> bool {
        self.tls13
    }

    fn record_mac(&self, typ: ContentType, version: Version, data: &[u8]) -> Vec<u8> {
        let mut header = Vec::with_capacity(13);
        header.extend_from_slice(&self.seq.to_be_bytes());
        header.push(typ.to_wire());
        header.extend_from_slice(&version.to_wire().to_be_bytes());
        header.extend_from_slice(&(data.len() as u16).to_be_bytes());
        self.mac.hash.hmac_parts(&self.mac_key, &[&header, data])
    }

    fn tls13_nonce(&self) -> Vec<u8> {
        let mut nonce = self.iv.clone();
        for (slot, byte) in nonce.iter_mut().rev().zip(self.seq.to_be_bytes().iter().rev()) {
            *slot ^= byte;
        }
        nonce
    }

    /// Protect one plaintext fragment; returns the outer content type and
    /// the record payload.
    pub fn seal(
        &mut self,
        rng: &mut dyn Rng,
        typ: ContentType,
        version: Version,
        fragment: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        let result = if self.tls13 {
            self.seal_tls13(typ, fragment)
        } else {
            match self.cipher.typ {
                CipherType::Stream => self.seal_stream(typ, version, fragment),
                CipherType::Block => self.seal_block(rng, typ, version, fragment),
                CipherType::Aead => self.seal_aead(typ, version, fragment),
            }
        };
        if result.is_ok() {
            self.seq += 1;
        }
        result
    }

    /// Unprotect one record payload; returns the (inner) content type and
    /// the plaintext fragment.
    pub fn open(
        &mut self,
        typ: ContentType,
        version: Version,
        payload: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        let result = if self.tls13 {
            self.open_tls13(typ, payload)
        } else {
            match self.cipher.typ {
                CipherType::Stream => self.open_stream(typ, version, payload),
                CipherType::Block => self.open_block(typ, version, payload),
                CipherType::Aead => self.open_aead(typ, version, payload),
            }
        };
        if result.is_ok() {
            self.seq += 1;
        }
        result
    }

    fn seal_stream(
        &mut self,
        typ: ContentType,
        version: Version,
        fragment: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        let mac = self.record_mac(typ, version, fragment);
        let mut data = fragment.to_vec();
        data.extend_from_slice(&mac);
        if let Crypter::Stream(cipher) = &mut self.crypter {
            cipher.process(&mut data);
        }
        Ok((typ, data))
    }

    fn open_stream(
        &mut self,
        typ: ContentType,
        version: Version,
        payload: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        let mut data = payload.to_vec();
        if let Crypter::Stream(cipher) = &mut self.crypter {
            cipher.process(&mut data);
        }
        if data.len() < self.mac.mac_len {
            return Err(bad_mac("record shorter than its MAC"));
        }
        let mac_start = data.len() - self.mac.mac_len;
        let mac = data.split_off(mac_start);
        if self.record_mac(typ, version, &data) != mac {
            return Err(bad_mac("stream record MAC mismatch"));
        }
        Ok((typ, data))
    }

    fn pad(&self, data: &mut Vec<u8>) {
        let block = self.cipher.block_size;
        let pad_len = (block - (data.len() + 1) % block) % block;
        for _ in 0..=pad_len {
            data.push(pad_len as u8);
        }
    }

    fn unpad(&self, data: &mut Vec<u8>) -> Result<(), TlsError> {
        let pad_len = *data.last().ok_or_else(|| bad_mac("empty block record"))? as usize;
        if data.len() < pad_len + 1 {
            return Err(bad_mac("padding longer than record"));
        }
        if data[data.len() - 1 - pad_len..].iter().any(|b| *b as usize != pad_len) {
            return Err(bad_mac("inconsistent padding"));
        }
        data.truncate(data.len() - pad_len - 1);
        Ok(())
    }

    fn next_iv(&mut self, rng: &mut dyn Rng) -> Result<Vec<u8>, TlsError> {
        if self.implicit_iv {
            Ok(self.chained_iv.clone())
        } else {
            rng.random_bytes("record_iv", self.cipher.iv_len)
                .map_err(TlsError::from)
        }
    }

    fn seal_block(
        &mut self,
        rng: &mut dyn Rng,
        typ: ContentType,
        version: Version,
        fragment: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        let iv = self.next_iv(rng)?;
        let mut payload;
        if self.encrypt_then_mac {
            let mut data = fragment.to_vec();
            self.pad(&mut data);
            let ciphertext = cbc_encrypt(self.cipher.algorithm, &self.enc_key, &iv, &data)
                .map_err(|_| internal("cbc encrypt"))?;
            payload = Vec::new();
            if !self.implicit_iv {
                payload.extend_from_slice(&iv);
            }
            payload.extend_from_slice(&ciphertext);
            let mac = self.record_mac(typ, version, &payload);
            payload.extend_from_slice(&mac);
        } else {
            let mut data = fragment.to_vec();
            data.extend_from_slice(&self.record_mac(typ, version, fragment));
            self.pad(&mut data);
            let ciphertext = cbc_encrypt(self.cipher.algorithm, &self.enc_key, &iv, &data)
                .map_err(|_| internal("cbc encrypt"))?;
            payload = Vec::new();
            if !self.implicit_iv {
                payload.extend_from_slice(&iv);
            }
            payload.extend_from_slice(&ciphertext);
        }
        if self.implicit_iv {
            let block = self.cipher.block_size;
            let cipher_end = if self.encrypt_then_mac {
                payload.len() - self.mac.mac_len
            } else {
                payload.len()
            };
            self.chained_iv = payload[cipher_end - block..cipher_end].to_vec();
        }
        Ok((typ, payload))
    }

    fn open_block(
        &mut self,
        typ: ContentType,
        version: Version,
        payload: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        let block = self.cipher.block_size;
        let mut payload = payload.to_vec();

        let mac = if self.encrypt_then_mac {
            if payload.len() < self.mac.mac_len {
                return Err(bad_mac("record shorter than its MAC"));
            }
            let mac_start = payload.len() - self.mac.mac_len;
            let mac = payload.split_off(mac_start);
            if self.record_mac(typ, version, &payload) != mac {
                return Err(bad_mac("encrypt-then-mac record MAC mismatch"));
            }
            None
        } else {
            // checked after decryption
            Some(())
        };

        let iv = if self.implicit_iv {
            self.chained_iv.clone()
        } else {
            if payload.len() < block {
                return Err(bad_mac("record shorter than its IV"));
            }
            let rest = payload.split_off(block);
            let iv = payload;
            payload = rest;
            iv
        };
        if self.implicit_iv {
            let end = payload.len();
            if end < block {
                return Err(bad_mac("short cbc record"));
            }
            self.chained_iv = payload[end - block..].to_vec();
        }

        let mut data = cbc_decrypt(self.cipher.algorithm, &self.enc_key, &iv, &payload)
            .map_err(|_| bad_mac("cbc decrypt"))?;
        self.unpad(&mut data)?;

        if mac.is_some() {
            if data.len() < self.mac.mac_len {
                return Err(bad_mac("record shorter than its MAC"));
            }
            let mac_start = data.len() - self.mac.mac_len;
            let mac = data.split_off(mac_start);
            if self.record_mac(typ, version, &data) != mac {
                return Err(bad_mac("block record MAC mismatch"));
            }
        }
        Ok((typ, data))
    }

    fn aead_nonce_tls12(&self, explicit: &[u8]) -> Vec<u8> {
        if self.cipher.iv_len == 12 {
            // ChaCha20-Poly1305: full nonce XOR padded sequence number
            let mut nonce = self.iv.clone();
            for (slot, byte) in nonce.iter_mut().rev().zip(explicit.iter().rev()) {
                *slot ^= byte;
            }
            nonce
        } else {
            let mut nonce = self.iv.clone();
            nonce.extend_from_slice(explicit);
            nonce
        }
    }

    fn seal_aead(
        &mut self,
        typ: ContentType,
        version: Version,
        fragment: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        let explicit = self.seq.to_be_bytes();
        let nonce = self.aead_nonce_tls12(&explicit);

        let mut aad = Vec::with_capacity(13);
        aad.extend_from_slice(&self.seq.to_be_bytes());
        aad.push(typ.to_wire());
        aad.extend_from_slice(&version.to_wire().to_be_bytes());
        aad.extend_from_slice(&(fragment.len() as u16).to_be_bytes());

        let sealed = match &self.crypter {
            Crypter::Aead(cipher) => cipher
                .seal(&nonce, &aad, fragment)
                .map_err(|_| internal("aead seal"))?,
            _ => return Err(internal("not an aead state")),
        };

        let mut payload = Vec::new();
        if self.cipher.iv_len != 12 {
            payload.extend_from_slice(&explicit);
        }
        payload.extend_from_slice(&sealed);
        Ok((typ, payload))
    }

    fn open_aead(
        &mut self,
        typ: ContentType,
        version: Version,
        payload: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        let (nonce, ciphertext) = if self.cipher.iv_len != 12 {
            if payload.len() < 8 {
                return Err(bad_mac("aead record shorter than its nonce"));
            }
            (self.aead_nonce_tls12(&payload[..8]), &payload[8..])
        } else {
            (self.aead_nonce_tls12(&self.seq.to_be_bytes()), payload)
        };

        if ciphertext.len() < self.cipher.tag_len {
            return Err(bad_mac("aead record shorter than its tag"));
        }
        let mut aad = Vec::with_capacity(13);
        aad.extend_from_slice(&self.seq.to_be_bytes());
        aad.push(typ.to_wire());
        aad.extend_from_slice(&version.to_wire().to_be_bytes());
        aad.extend_from_slice(&((ciphertext.len() - self.cipher.tag_len) as u16).to_be_bytes());

        match &self.crypter {
            Crypter::Aead(cipher) => cipher
                .open(&nonce, &aad, ciphertext)
                .map(|plaintext| (typ, plaintext))
                .map_err(|_| bad_mac("aead open")),
            _ => Err(internal("not an aead state")),
        }
    }

    fn seal_tls13(
        &mut self,
        typ: ContentType,
        fragment: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        let mut inner = fragment.to_vec();
        inner.push(typ.to_wire());

        let mut aad = Vec::with_capacity(5);
        aad.push(ContentType::ApplicationData.to_wire());
        aad.extend_from_slice(&Version::Tls12.to_wire().to_be_bytes());
        aad.extend_from_slice(&((inner.len() + self.cipher.tag_len) as u16).to_be_bytes());

        let nonce = self.tls13_nonce();
        match &self.crypter {
            Crypter::Aead(cipher) => cipher
                .seal(&nonce, &aad, &inner)
                .map(|sealed| (ContentType::ApplicationData, sealed))
                .map_err(|_| internal("aead seal")),
            _ => Err(internal("not an aead state")),
        }
    }

    fn open_tls13(
        &mut self,
        typ: ContentType,
        payload: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        if typ != ContentType::ApplicationData {
            return Err(TlsError::fatal(
                AlertDescription::UnexpectedMessage,
                "unprotected record under TLS 1.3 keys",
            ));
        }
        let mut aad = Vec::with_capacity(5);
        aad.push(ContentType::ApplicationData.to_wire());
        aad.extend_from_slice(&Version::Tls12.to_wire().to_be_bytes());
        aad.extend_from_slice(&(payload.len() as u16).to_be_bytes());

        let nonce = self.tls13_nonce();
        let mut inner = match &self.crypter {
            Crypter::Aead(cipher) => cipher
                .open(&nonce, &aad, payload)
                .map_err(|_| bad_mac("aead open"))?,
            _ => return Err(internal("not an aead state")),
        };

        // strip the zero padding, then the real content type
        while inner.last() == Some(&0) {
            inner.pop();
        }
        let typ = inner
            .pop()
            .map(ContentType::from_wire)
            .ok_or_else(|| bad_mac("all-padding inner plaintext"))?;
        Ok((typ, inner))
    }
}

fn bad_mac(message: &str) -> TlsError {
    TlsError::fatal(AlertDescription::BadRecordMac, message)
}

fn internal(message: &str) -> TlsError {
    TlsError::fatal(AlertDescription::InternalError, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suites::{
        Mac as SuiteMac, BULK_AES_128_CBC, BULK_AES_128_GCM, BULK_CHACHA20_POLY1305, BULK_RC4_128,
    };
    use probe::caps::RecordedRng;
    use probe::error::Error;
    use probe::recorder::Recorder;

    struct FixedRng;

    impl Rng for FixedRng {
        fn random_bytes(&mut self, _name: &'static str, len: usize) -> Result<Vec<u8>, Error> {
            Ok(vec![0x11; len])
        }
    }

    fn block_params(encrypt_then_mac: bool, implicit_iv: bool) -> StateUpdateParams {
        StateUpdateParams {
            version: Version::Tls12,
            cipher: &BULK_AES_128_CBC,
            mac: SuiteMac::hmac(crate::crypto::hash::HashAlgorithm::Sha1),
            enc_key: vec![1; 16],
            mac_key: vec![2; 20],
            iv: vec![3; 16],
            compression: CompressionMethod::Null,
            encrypt_then_mac,
            implicit_iv,
            tls13: false,
        }
    }

    fn pair(params: impl Fn() -> StateUpdateParams) -> (RecordState, RecordState) {
        (
            RecordState::new(params()).unwrap(),
            RecordState::new(params()).unwrap(),
        )
    }

    #[test]
    fn cbc_mac_then_encrypt_round_trip() {
        let (mut write, mut read) = pair(|| block_params(false, false));
        let fragment = b"hello handshake".to_vec();
        let (typ, payload) = write
            .seal(&mut FixedRng, ContentType::Handshake, Version::Tls12, &fragment)
            .unwrap();
        assert_eq!(typ, ContentType::Handshake);
        assert_eq!(payload.len() % 16, 0);
        let (typ, plain) = read
            .open(ContentType::Handshake, Version::Tls12, &payload)
            .unwrap();
        assert_eq!(typ, ContentType::Handshake);
        assert_eq!(plain, fragment);
    }

    #[test]
    fn cbc_encrypt_then_mac_round_trip_and_tamper() {
        let (mut write, mut read) = pair(|| block_params(true, false));
        let fragment = vec![0xabu8; 100];
        let (_, mut payload) = write
            .seal(&mut FixedRng, ContentType::ApplicationData, Version::Tls12, &fragment)
            .unwrap();
        // EtM payload = iv + ciphertext + mac; not block aligned overall
        assert_eq!((payload.len() - 20) % 16, 0);

        let (_, plain) = read
            .open(ContentType::ApplicationData, Version::Tls12, &payload)
            .unwrap();
        assert_eq!(plain, fragment);

        let mut read2 = RecordState::new(block_params(true, false)).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 1;
        let err = read2
            .open(ContentType::ApplicationData, Version::Tls12, &payload)
            .unwrap_err();
        assert!(matches!(
            err,
            TlsError::Fatal {
                description: AlertDescription::BadRecordMac,
                ..
            }
        ));
    }

    #[test]
    fn implicit_iv_chains_across_records() {
        let make = || {
            let mut p = block_params(false, true);
            p.version = Version::Tls10;
            p
        };
        let (mut write, mut read) = pair(make);
        for n in 0u8..3 {
            let fragment = vec![n; 40];
            let (_, payload) = write
                .seal(&mut FixedRng, ContentType::Handshake, Version::Tls10, &fragment)
                .unwrap();
            let (_, plain) = read
                .open(ContentType::Handshake, Version::Tls10, &payload)
                .unwrap();
            assert_eq!(plain, fragment);
        }
        assert_eq!(write.seq(), 3);
        assert_eq!(read.seq(), 3);
    }

    fn aead_params(cipher: &'static BulkCipher, tls13: bool) -> StateUpdateParams {
        StateUpdateParams {
            version: if tls13 { Version::Tls13 } else { Version::Tls12 },
            cipher,
            mac: SuiteMac::aead(crate::crypto::hash::HashAlgorithm::Sha256),
            enc_key: vec![6; cipher.enc_key_len],
            mac_key: Vec::new(),
            iv: vec![7; if tls13 { 12 } else { cipher.iv_len }],
            compression: CompressionMethod::Null,
            encrypt_then_mac: false,
            implicit_iv: false,
            tls13,
        }
    }

    #[test]
    fn gcm_tls12_round_trip() {
        let (mut write, mut read) = pair(|| aead_params(&BULK_AES_128_GCM, false));
        let fragment = b"key exchange".to_vec();
        let (_, payload) = write
            .seal(&mut FixedRng, ContentType::Handshake, Version::Tls12, &fragment)
            .unwrap();
        // explicit nonce + ciphertext + tag
        assert_eq!(payload.len(), 8 + fragment.len() + 16);
        let (_, plain) = read
            .open(ContentType::Handshake, Version::Tls12, &payload)
            .unwrap();
        assert_eq!(plain, fragment);
    }

    #[test]
    fn chacha_tls12_has_no_explicit_nonce() {
        let (mut write, mut read) = pair(|| aead_params(&BULK_CHACHA20_POLY1305, false));
        let fragment = vec![0x55u8; 32];
        let (_, payload) = write
            .seal(&mut FixedRng, ContentType::ApplicationData, Version::Tls12, &fragment)
            .unwrap();
        assert_eq!(payload.len(), fragment.len() + 16);
        let (_, plain) = read
            .open(ContentType::ApplicationData, Version::Tls12, &payload)
            .unwrap();
        assert_eq!(plain, fragment);
    }

    #[test]
    fn tls13_inner_type_round_trip() {
        let (mut write, mut read) = pair(|| aead_params(&BULK_AES_128_GCM, true));
        let fragment = b"encrypted extensions".to_vec();
        let (outer, payload) = write
            .seal(&mut FixedRng, ContentType::Handshake, Version::Tls13, &fragment)
            .unwrap();
        assert_eq!(outer, ContentType::ApplicationData);
        let (inner, plain) = read
            .open(ContentType::ApplicationData, Version::Tls13, &payload)
            .unwrap();
        assert_eq!(inner, ContentType::Handshake);
        assert_eq!(plain, fragment);
    }

    #[test]
    fn rc4_state_round_trip() {
        let make = || StateUpdateParams {
            version: Version::Tls10,
            cipher: &BULK_RC4_128,
            mac: SuiteMac::hmac(crate::crypto::hash::HashAlgorithm::Sha1),
            enc_key: vec![9; 16],
            mac_key: vec![8; 20],
            iv: Vec::new(),
            compression: CompressionMethod::Null,
            encrypt_then_mac: false,
            implicit_iv: false,
            tls13: false,
        };
        let (mut write, mut read) = pair(make);
        for _ in 0..2 {
            let fragment = b"stream data".to_vec();
            let (_, payload) = write
                .seal(&mut FixedRng, ContentType::ApplicationData, Version::Tls10, &fragment)
                .unwrap();
            let (_, plain) = read
                .open(ContentType::ApplicationData, Version::Tls10, &payload)
                .unwrap();
            assert_eq!(plain, fragment);
        }
    }

    #[test]
    fn explicit_iv_is_recorder_interposed() {
        let recorder = Recorder::shared();
        recorder.borrow_mut().record();
        let mut rng = RecordedRng::new(recorder.clone());
        let mut write = RecordState::new(block_params(false, false)).unwrap();
        let (_, first) = write
            .seal(&mut rng, ContentType::Handshake, Version::Tls12, b"abc")
            .unwrap();

        // replaying regenerates the identical record
        recorder.borrow_mut().replay();
        let mut write = RecordState::new(block_params(false, false)).unwrap();
        let (_, second) = write
            .seal(&mut rng, ContentType::Handshake, Version::Tls12, b"abc")
            .unwrap();
        assert_eq!(first, second);
    }
}
