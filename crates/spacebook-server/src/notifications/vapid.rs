//! VAPID application server identification (RFC 8292).
//!
//! Each push request carries an ES256 JWT whose audience is the push
//! service's origin, signed with the server's P-256 key.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use p256::SecretKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use serde::Serialize;

use super::NotificationError;
use super::encryption::decode_base64url;

/// Token lifetime. Push services reject anything over 24 hours.
const TOKEN_LIFETIME_SECS: i64 = 12 * 60 * 60;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

/// Signs per-audience VAPID tokens.
pub struct VapidSigner {
    encoding_key: EncodingKey,
    public_key: String,
    subject: String,
}

impl std::fmt::Debug for VapidSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidSigner")
            .field("public_key", &self.public_key)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl VapidSigner {
    /// Build a signer from the base64url raw private scalar.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Transport` if the key is not a P-256
    /// private key.
    pub fn from_base64(private_key: &str, subject: &str) -> Result<Self, NotificationError> {
        let secret = decode_base64url(private_key)
            .ok()
            .and_then(|raw| SecretKey::from_slice(&raw).ok())
            .ok_or_else(|| {
                NotificationError::Transport("VAPID private key is not a P-256 key".to_string())
            })?;
        let der = secret
            .to_pkcs8_der()
            .map_err(|e| NotificationError::Transport(format!("VAPID key encoding: {e}")))?;

        Ok(Self {
            encoding_key: EncodingKey::from_ec_der(der.as_bytes()),
            public_key: URL_SAFE_NO_PAD
                .encode(secret.public_key().to_encoded_point(false).as_bytes()),
            subject: subject.to_string(),
        })
    }

    /// Application server public key, base64url (the browser's
    /// `applicationServerKey`).
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// `Authorization` header value for a request to `endpoint` at `now`.
    ///
    /// # Errors
    ///
    /// `InvalidEndpoint` if the endpoint is not an absolute URL; `Signing` if
    /// the token cannot be produced.
    pub fn authorization(&self, endpoint: &str, now: i64) -> Result<String, VapidError> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| VapidError::InvalidEndpoint(e.to_string()))?;
        let audience = url.origin().ascii_serialization();
        if audience == "null" {
            return Err(VapidError::InvalidEndpoint(format!("{endpoint} has no origin")));
        }

        let claims = Claims {
            aud: &audience,
            exp: now.saturating_add(TOKEN_LIFETIME_SECS),
            sub: &self.subject,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.encoding_key)
            .map_err(|e| VapidError::Signing(e.to_string()))?;

        Ok(format!("vapid t={token}, k={}", self.public_key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VapidError {
    #[error("invalid push endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("VAPID signing failed: {0}")]
    Signing(String),
}
