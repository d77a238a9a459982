//! Message encryption for web push (RFC 8291, `aes128gcm` content coding).
//!
//! Every message gets a fresh ephemeral P-256 key and salt. The content key
//! and nonce are derived with HKDF-SHA256 from the ECDH secret shared with the
//! subscription's `p256dh` key, mixed with its `auth` secret.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hkdf::Hkdf;
use p256::PublicKey;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use super::PushKeys;

/// Record size advertised in the header. A message is always one record.
const RECORD_SIZE: u32 = 4096;

/// Uncompressed SEC1 encoding of a P-256 point.
const PUBLIC_KEY_LEN: usize = 65;

const SALT_LEN: usize = 16;
const AUTH_SECRET_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// Padding delimiter of the last (and only) record.
const LAST_RECORD: u8 = 0x02;

const KEY_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// Largest plaintext that fits one record with its delimiter and tag.
pub const MAX_PLAINTEXT: usize = RECORD_SIZE as usize - TAG_LEN - 1;

/// Bytes preceding the ciphertext: salt, record size, key id length, key id.
pub const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncryptionError {
    /// The subscription's keys cannot be used; it will never accept a message.
    #[error("invalid subscription key: {0}")]
    InvalidKey(String),

    #[error("payload of {0} bytes does not fit one record")]
    TooLarge(usize),

    #[error("encryption failed: {0}")]
    Cipher(String),
}

/// Decode base64url, tolerating padding and the standard alphabet some
/// browsers' key exports use.
pub fn decode_base64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = value
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    URL_SAFE_NO_PAD.decode(normalized)
}

/// Encrypt `plaintext` for the subscription holding `keys`.
///
/// Returns the complete request body.
///
/// # Errors
///
/// - `InvalidKey` if `p256dh` is not a P-256 point or `auth` is not 16 bytes
/// - `TooLarge` if the plaintext does not fit one record
pub fn encrypt(keys: &PushKeys, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if plaintext.len() > MAX_PLAINTEXT {
        return Err(EncryptionError::TooLarge(plaintext.len()));
    }

    let ua_public = decode_base64url(&keys.p256dh)
        .ok()
        .and_then(|bytes| PublicKey::from_sec1_bytes(&bytes).ok())
        .ok_or_else(|| EncryptionError::InvalidKey("p256dh is not a P-256 public key".to_string()))?;
    let auth = decode_base64url(&keys.auth)
        .ok()
        .filter(|bytes| bytes.len() == AUTH_SECRET_LEN)
        .ok_or_else(|| EncryptionError::InvalidKey("auth is not a 16-byte secret".to_string()))?;

    let as_secret = EphemeralSecret::random(&mut OsRng);
    let as_public = as_secret.public_key().to_encoded_point(false);
    let shared = as_secret.diffie_hellman(&ua_public);

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    seal(
        shared.raw_secret_bytes().as_slice(),
        &auth,
        ua_public.to_encoded_point(false).as_bytes(),
        as_public.as_bytes(),
        &salt,
        plaintext,
    )
}

/// Derive the content encryption key and nonce.
fn derive(
    ecdh_secret: &[u8],
    auth: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8],
) -> Result<([u8; 16], [u8; 12]), EncryptionError> {
    let mut key_info = Vec::with_capacity(KEY_INFO_PREFIX.len() + 2 * PUBLIC_KEY_LEN);
    key_info.extend_from_slice(KEY_INFO_PREFIX);
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(as_public);

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth), ecdh_secret)
        .expand(&key_info, &mut ikm)
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;

    let prk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut cek = [0u8; 16];
    prk.expand(CEK_INFO, &mut cek)
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;
    let mut nonce = [0u8; 12];
    prk.expand(NONCE_INFO, &mut nonce)
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;

    Ok((cek, nonce))
}

fn seal(
    ecdh_secret: &[u8],
    auth: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8; SALT_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let (cek, nonce) = derive(ecdh_secret, auth, ua_public, as_public, salt)?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD);

    let cipher =
        Aes128Gcm::new_from_slice(&cek).map_err(|e| EncryptionError::Cipher(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;

    let key_id_len =
        u8::try_from(as_public.len()).map_err(|e| EncryptionError::Cipher(e.to_string()))?;
    let mut body = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    body.extend_from_slice(salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(key_id_len);
    body.extend_from_slice(as_public);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}
