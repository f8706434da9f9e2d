//! Cryptographic primitives shared by the credential store, the encrypted
//! configuration and the secure log sink.
//!
//! - PBKDF2-HMAC-SHA256 key derivation
//! - AES-GCM (128 or 256 bit key) with detached, optionally truncated tags
//! - constant-time comparison
//! - lowercase hex codec

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{AeadInPlace, KeyInit, Nonce, Tag};
use aes_gcm::aes::{Aes128, Aes256};
use aes_gcm::AesGcm;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

pub const DEFAULT_ITERATIONS: u32 = 100_000;
pub const DERIVED_KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("system randomness unavailable")]
    RandomnessUnavailable,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("authentication failed (tag mismatch or corrupted input)")]
    AuthenticationFailed,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
}

/// Sealed output of [`aead_encrypt`]: ciphertext and the detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    if len == 0 {
        return Err(CryptoError::InvalidParameter(
            "random length must be > 0".into(),
        ));
    }
    let mut out = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut out)
        .map_err(|_| CryptoError::RandomnessUnavailable)?;
    Ok(out)
}

pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    length: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::InvalidParameter(
            "iterations must be > 0".into(),
        ));
    }
    if length == 0 {
        return Err(CryptoError::InvalidParameter(
            "derived key length must be > 0".into(),
        ));
    }
    let mut key = Zeroizing::new(vec![0u8; length]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key);
    Ok(key)
}

/// Length-checked, branch-free comparison. Only the length leaks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    std::hint::black_box(diff) == 0
}

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn from_hex(text: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(text).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// True for a non-empty string made only of ASCII hex digits.
pub fn is_hex(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_hexdigit())
}

// One concrete GCM instantiation per supported (key, iv) shape.
type Aes128Gcm12 = AesGcm<Aes128, U12>;
type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Aes256Gcm12 = AesGcm<Aes256, U12>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

macro_rules! with_gcm {
    ($key:expr, $iv:expr, $func:ident($($arg:expr),*)) => {
        match ($key.len(), $iv.len()) {
            (16, 12) => $func::<Aes128Gcm12>($($arg),*),
            (16, 16) => $func::<Aes128Gcm16>($($arg),*),
            (32, 12) => $func::<Aes256Gcm12>($($arg),*),
            (32, 16) => $func::<Aes256Gcm16>($($arg),*),
            (16 | 32, 0) => Err(CryptoError::InvalidParameter("IV is empty".into())),
            (16 | 32, n) => Err(CryptoError::InvalidParameter(format!(
                "unsupported IV length {n}; expected 12 or 16 bytes"
            ))),
            (n, _) => Err(CryptoError::InvalidParameter(format!(
                "unsupported key length {n}; expected 16 or 32 bytes"
            ))),
        }
    };
}

pub fn aead_encrypt(
    key: &[u8],
    plaintext: &[u8],
    iv: &[u8],
    tag_len: usize,
) -> Result<Sealed, CryptoError> {
    if tag_len == 0 || tag_len > TAG_LEN {
        return Err(CryptoError::InvalidParameter(format!(
            "tag length {tag_len} outside [1, {TAG_LEN}]"
        )));
    }
    let mut buffer = plaintext.to_vec();
    let full_tag = with_gcm!(key, iv, seal_detached(key, iv, &mut buffer))?;
    Ok(Sealed {
        ciphertext: buffer,
        tag: full_tag[..tag_len].to_vec(),
    })
}

/// Opens `ciphertext` against a detached tag of 1..=16 bytes. Truncated tags
/// are checked by recomputing the full tag over the same ciphertext; the
/// plaintext is only released after that check passes.
///
/// Every failure, including a key or IV of the wrong shape, is reported as
/// [`CryptoError::AuthenticationFailed`].
pub fn aead_decrypt(
    key: &[u8],
    ciphertext: &[u8],
    iv: &[u8],
    tag: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if tag.is_empty() || tag.len() > TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    let malformed = |_: CryptoError| CryptoError::AuthenticationFailed;
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    if tag.len() == TAG_LEN {
        with_gcm!(key, iv, open_detached(key, iv, &mut buffer, tag)).map_err(malformed)?;
        return Ok(buffer);
    }

    // CTR is symmetric, so sealing the ciphertext yields the candidate plaintext.
    with_gcm!(key, iv, seal_detached(key, iv, &mut buffer)).map_err(malformed)?;
    let mut reseal = buffer.to_vec();
    let expected = with_gcm!(key, iv, seal_detached(key, iv, &mut reseal)).map_err(malformed)?;
    reseal.zeroize();
    if !constant_time_eq(&expected[..tag.len()], tag) {
        return Err(CryptoError::AuthenticationFailed);
    }
    Ok(buffer)
}

fn seal_detached<G>(key: &[u8], iv: &[u8], buffer: &mut [u8]) -> Result<Vec<u8>, CryptoError>
where
    G: KeyInit + AeadInPlace,
{
    let cipher = G::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidParameter("key length rejected".into()))?;
    let tag: Tag<G> = cipher
        .encrypt_in_place_detached(Nonce::<G>::from_slice(iv), b"", buffer)
        .map_err(|_| CryptoError::InvalidParameter("plaintext too long".into()))?;
    Ok(tag.to_vec())
}

fn open_detached<G>(
    key: &[u8],
    iv: &[u8],
    buffer: &mut [u8],
    tag: &[u8],
) -> Result<(), CryptoError>
where
    G: KeyInit + AeadInPlace,
{
    let cipher = G::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidParameter("key length rejected".into()))?;
    cipher
        .decrypt_in_place_detached(
            Nonce::<G>::from_slice(iv),
            b"",
            buffer,
            Tag::<G>::from_slice(tag),
        )
        .map_err(|_| {
            buffer.zeroize();
            CryptoError::AuthenticationFailed
        })
}
