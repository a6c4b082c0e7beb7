//! Hash and HMAC surface, generic over every digest the protocol versions
//! need (the TLS 1.0 PRF still wants MD5).

use hmac::{Hmac, Mac};
use md5::Md5;
use serde::{Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut ctx = HashCtx::new(self);
        ctx.update(data);
        ctx.finalize()
    }

    pub fn hmac(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        self.hmac_parts(key, &[data])
    }

    pub fn hmac_parts(self, key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        macro_rules! mac {
            ($digest:ty) => {{
                let mut mac = <Hmac<$digest> as Mac>::new_from_slice(key)
                    .expect("hmac accepts any key length");
                for part in parts {
                    mac.update(part);
                }
                mac.finalize().into_bytes().to_vec()
            }};
        }
        match self {
            HashAlgorithm::Md5 => mac!(Md5),
            HashAlgorithm::Sha1 => mac!(Sha1),
            HashAlgorithm::Sha256 => mac!(Sha256),
            HashAlgorithm::Sha384 => mac!(Sha384),
            HashAlgorithm::Sha512 => mac!(Sha512),
        }
    }
}

impl Serialize for HashAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:?}", self))
    }
}

/// Incremental hash with cheap intermediate digests, as the transcript
/// needs.
#[derive(Clone)]
pub enum HashCtx {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl HashCtx {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => HashCtx::Md5(Md5::new()),
            HashAlgorithm::Sha1 => HashCtx::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HashCtx::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => HashCtx::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => HashCtx::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            HashCtx::Md5(ctx) => ctx.update(data),
            HashCtx::Sha1(ctx) => ctx.update(data),
            HashCtx::Sha256(ctx) => ctx.update(data),
            HashCtx::Sha384(ctx) => ctx.update(data),
            HashCtx::Sha512(ctx) => ctx.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            HashCtx::Md5(ctx) => ctx.finalize().to_vec(),
            HashCtx::Sha1(ctx) => ctx.finalize().to_vec(),
            HashCtx::Sha256(ctx) => ctx.finalize().to_vec(),
            HashCtx::Sha384(ctx) => ctx.finalize().to_vec(),
            HashCtx::Sha512(ctx) => ctx.finalize().to_vec(),
        }
    }

    /// Digest of everything fed so far without consuming the context.
    pub fn current(&self) -> Vec<u8> {
        self.clone().finalize()
    }
}
