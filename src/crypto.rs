//! Cryptographic primitives shared by the secrets manager and the field
//! encryption service.
//!
//! - PBKDF2-HMAC-SHA256 key derivation into a 256-bit key
//! - AES-256-GCM with a random 96-bit nonce and the tag kept separate from
//!   the ciphertext, matching how records persist `iv` and `auth_tag`
//! - SHA-256 content hashing as lowercase hex

use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::num::NonZeroU32;
use thiserror::Error;
use tracing::{debug, error};
use zeroize::Zeroizing;

/// Length of derived keys in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// Size of AES-256-GCM nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Size of AES-256-GCM tag in bytes
pub const TAG_LEN: usize = 16;

/// Iteration count used for every passphrase derivation
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Errors from the low-level primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("PBKDF2 iteration count must be non-zero")]
    InvalidIterations,

    #[error("Key derivation task failed: {0}")]
    KeyDerivation(String),

    #[error("Failed to generate random bytes")]
    Random,

    #[error("Invalid nonce length: expected {expected} bytes, got {actual} bytes")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("Invalid authentication tag length: expected {expected} bytes, got {actual} bytes")]
    InvalidTagLength { expected: usize, actual: usize },

    #[error("Failed to encrypt data")]
    Seal,

    /// Wrong key, wrong associated data, or tampered ciphertext/nonce/tag.
    #[error("Authenticated decryption failed")]
    Open,
}

/// A 256-bit symmetric key wiped from memory on drop.
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Fresh random key, used when no key material is configured in development.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        SystemRandom::new().fill(&mut bytes[..]).map_err(|_| CryptoError::Random)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derive a key from `secret` with PBKDF2-HMAC-SHA256.
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32) -> Result<DerivedKey, CryptoError> {
    let iterations = NonZeroU32::new(iterations).ok_or(CryptoError::InvalidIterations)?;
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, salt, secret, &mut out[..]);
    Ok(DerivedKey(out))
}

/// Run [`derive_key`] on the blocking pool so 100k iterations never stall a runtime worker.
pub async fn derive_key_blocking(
    secret: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    iterations: u32,
) -> Result<DerivedKey, CryptoError> {
    tokio::task::spawn_blocking(move || derive_key(&secret, &salt, iterations))
        .await
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?
}

/// Ciphertext with its nonce and detached GCM tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_LEN]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_LEN]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Encrypt `plaintext` under `key` with a freshly generated nonce.
///
/// `aad` is authenticated but not encrypted; pass `&[]` for none.
pub fn seal(key: &DerivedKey, plaintext: &[u8], aad: &[u8]) -> Result<SealedBox, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new().fill(&mut nonce).map_err(|_| {
        error!("Failed to generate random nonce");
        CryptoError::Random
    })?;

    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes()).map_err(|_| CryptoError::Seal)?;
    let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce));

    let mut ciphertext = plaintext.to_vec();
    let tag = sealing_key
        .seal_in_place_separate_tag(Aad::from(aad), &mut ciphertext)
        .map_err(|_| CryptoError::Seal)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_ref());

    debug!(ciphertext_len = ciphertext.len(), "Sealed payload");
    Ok(SealedBox { ciphertext, nonce, tag: tag_bytes })
}

/// Authenticate and decrypt. Any flipped bit in ciphertext, nonce or tag yields [`CryptoError::Open`].
pub fn open(
    key: &DerivedKey,
    ciphertext: &[u8],
    nonce: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| CryptoError::InvalidNonceLength {
        expected: NONCE_LEN,
        actual: nonce.len(),
    })?;
    if tag.len() != TAG_LEN {
        return Err(CryptoError::InvalidTagLength { expected: TAG_LEN, actual: tag.len() });
    }

    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes()).map_err(|_| CryptoError::Open)?;
    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce));

    let mut buffer = Zeroizing::new(Vec::with_capacity(ciphertext.len() + TAG_LEN));
    buffer.extend_from_slice(ciphertext);
    buffer.extend_from_slice(tag);

    let plaintext_len = opening_key
        .open_in_place(Aad::from(aad), buffer.as_mut_slice())
        .map_err(|_| CryptoError::Open)?
        .len();
    buffer.truncate(plaintext_len);
    Ok(buffer)
}

/// SHA-256 digest as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> DerivedKey {
        DerivedKey::from_bytes([0x42u8; KEY_LEN])
    }

    #[test]
    fn test_pbkdf2_is_deterministic_and_salted() {
        let a = derive_key(b"correct horse", b"salt-a", 1_000).unwrap();
        let b = derive_key(b"correct horse", b"salt-a", 1_000).unwrap();
        let c = derive_key(b"correct horse", b"salt-b", 1_000).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_pbkdf2_rejects_zero_iterations() {
        assert_eq!(derive_key(b"x", b"y", 0).unwrap_err(), CryptoError::InvalidIterations);
    }

    #[test]
    fn test_pbkdf2_known_vector() {
        // RFC 7914 section 11 PBKDF2-HMAC-SHA256 vector, first 32 bytes
        let key = derive_key(b"passwd", b"salt", 1).unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[tokio::test]
    async fn test_blocking_derivation_matches_inline() {
        let inline = derive_key(b"phrase", b"salt", 2_000).unwrap();
        let blocking =
            derive_key_blocking(Zeroizing::new(b"phrase".to_vec()), b"salt".to_vec(), 2_000)
                .await
                .unwrap();
        assert_eq!(inline.as_bytes(), blocking.as_bytes());
    }

    #[test]
    fn test_seal_open_roundtrip_with_aad() {
        let key = test_key();
        let sealed = seal(&key, b"s3cr3t", b"JWT_SECRET").unwrap();
        assert_eq!(sealed.ciphertext.len(), 6);

        let opened = open(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag, b"JWT_SECRET").unwrap();
        assert_eq!(opened.as_slice(), b"s3cr3t");
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key();
        let sealed = seal(&key, b"s3cr3t", b"JWT_SECRET").unwrap();
        let result = open(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag, b"OTHER");
        assert_eq!(result.unwrap_err(), CryptoError::Open);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&test_key(), b"payload", &[]).unwrap();
        let other = DerivedKey::from_bytes([0x24u8; KEY_LEN]);
        assert!(open(&other, &sealed.ciphertext, &sealed.nonce, &sealed.tag, &[]).is_err());
    }

    #[test]
    fn test_nonces_are_unique() {
        let key = test_key();
        let a = seal(&key, b"same", &[]).unwrap();
        let b = seal(&key, b"same", &[]).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_length_checks() {
        let key = test_key();
        let sealed = seal(&key, b"x", &[]).unwrap();
        assert!(matches!(
            open(&key, &sealed.ciphertext, &[0u8; 8], &sealed.tag, &[]),
            Err(CryptoError::InvalidNonceLength { expected: 12, actual: 8 })
        ));
        assert!(matches!(
            open(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag[..4], &[]),
            Err(CryptoError::InvalidTagLength { expected: 16, actual: 4 })
        ));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(sha256_hex(b"").len(), 64);
    }

    #[test]
    fn test_debug_redacts_key() {
        assert_eq!(format!("{:?}", test_key()), "DerivedKey([REDACTED])");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = test_key();
            let sealed = seal(&key, &plaintext, b"aad").unwrap();
            let opened = open(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag, b"aad").unwrap();
            prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
        }

        #[test]
        fn prop_any_bit_flip_is_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 1..128),
            target in 0usize..3,
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = test_key();
            let mut sealed = seal(&key, &plaintext, &[]).unwrap();
            let flip = 1u8 << bit;
            match target {
                0 => { let i = index.index(sealed.ciphertext.len()); sealed.ciphertext[i] ^= flip; }
                1 => { let i = index.index(NONCE_LEN); sealed.nonce[i] ^= flip; }
                _ => { let i = index.index(TAG_LEN); sealed.tag[i] ^= flip; }
            }
            let result = open(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag, &[]);
            prop_assert_eq!(result.unwrap_err(), CryptoError::Open);
        }
    }
}
