//! Push delivery transport.
//!
//! [`PushTransport`] is the single deliver-or-fail primitive the dispatcher
//! relies on. [`WebPushClient`] encrypts each payload for the subscription's
//! keys and POSTs it to the push service endpoint with a VAPID token.

use async_trait::async_trait;
use reqwest::StatusCode;
use spacebook_core::config::PushConfig;
use spacebook_core::db::unix_timestamp;
use tracing::{debug, info, warn};

use super::encryption::{self, EncryptionError, decode_base64url};
use super::vapid::{VapidError, VapidSigner};
use super::{NotificationError, PushKeys};

/// Why a single delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The push service says the subscription is gone for good.
    #[error("subscription gone (status {status})")]
    Permanent { status: u16 },

    /// The subscription's endpoint or keys can never be delivered to.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// Anything that may succeed on a later attempt.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. } | Self::InvalidSubscription(_))
    }
}

impl From<EncryptionError> for DeliveryError {
    fn from(e: EncryptionError) -> Self {
        match e {
            EncryptionError::InvalidKey(_) => Self::InvalidSubscription(e.to_string()),
            EncryptionError::TooLarge(_) | EncryptionError::Cipher(_) => {
                Self::Transient(e.to_string())
            }
        }
    }
}

impl From<VapidError> for DeliveryError {
    fn from(e: VapidError) -> Self {
        match e {
            VapidError::InvalidEndpoint(_) => Self::InvalidSubscription(e.to_string()),
            VapidError::Signing(_) => Self::Transient(e.to_string()),
        }
    }
}

/// Map a push service response status to a delivery outcome.
///
/// 404 and 410 mean the subscription no longer exists.
pub fn classify_status(status: StatusCode) -> Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(DeliveryError::Permanent {
            status: status.as_u16(),
        }),
        other => Err(DeliveryError::Transient(format!(
            "push service returned {}",
            other.as_u16()
        ))),
    }
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Deliver `payload` (a JSON document) to one subscription endpoint.
    async fn deliver(
        &self,
        endpoint: &str,
        keys: &PushKeys,
        payload: &str,
    ) -> Result<(), DeliveryError>;
}

/// Web push client.
///
/// Disabled when no usable VAPID private key is configured: every delivery
/// then fails transiently and the rest of the server keeps working.
#[derive(Debug)]
pub struct WebPushClient {
    inner: Option<Enabled>,
    ttl_secs: u32,
}

#[derive(Debug)]
struct Enabled {
    http: reqwest::Client,
    vapid: VapidSigner,
}

impl WebPushClient {
    /// Build a client from push configuration.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Transport` if the HTTP client cannot be
    /// constructed. Malformed or mismatched VAPID keys disable delivery
    /// instead.
    pub fn from_config(config: &PushConfig) -> Result<Self, NotificationError> {
        let Some(private_key) = &config.vapid_private_key else {
            warn!("VAPID private key not configured; web push delivery disabled");
            return Ok(Self::disabled());
        };

        let vapid = match VapidSigner::from_base64(private_key, &config.vapid_subject) {
            Ok(vapid) => vapid,
            Err(e) => {
                warn!(error = %e, "Invalid VAPID private key; web push delivery disabled");
                return Ok(Self::disabled());
            }
        };
        if let Some(public_key) = &config.vapid_public_key
            && decode_base64url(public_key).ok() != decode_base64url(vapid.public_key()).ok()
        {
            warn!("vapid_public_key does not match vapid_private_key; web push delivery disabled");
            return Ok(Self::disabled());
        }

        // reqwest is built without a bundled crypto provider; install ring
        // (no-op if one is already installed).
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(config.recipient_timeout())
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        info!(
            subject = %config.vapid_subject,
            public_key = %vapid.public_key(),
            "Web push client initialized"
        );

        Ok(Self {
            inner: Some(Enabled { http, vapid }),
            ttl_secs: config.ttl_secs,
        })
    }

    pub const fn disabled() -> Self {
        Self {
            inner: None,
            ttl_secs: 0,
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// The application server key browsers subscribe with, if enabled.
    pub fn public_key(&self) -> Option<&str> {
        self.inner.as_ref().map(|inner| inner.vapid.public_key())
    }
}

#[async_trait]
impl PushTransport for WebPushClient {
    async fn deliver(
        &self,
        endpoint: &str,
        keys: &PushKeys,
        payload: &str,
    ) -> Result<(), DeliveryError> {
        let Some(Enabled { http, vapid }) = &self.inner else {
            return Err(DeliveryError::Transient("push delivery disabled".to_string()));
        };

        let authorization = vapid.authorization(endpoint, unix_timestamp())?;
        let body = encryption::encrypt(keys, payload.as_bytes())?;

        let response = http
            .post(endpoint)
            .header("Authorization", authorization)
            .header("TTL", self.ttl_secs.to_string())
            .header("Urgency", "normal")
            .header("Content-Encoding", "aes128gcm")
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let outcome = classify_status(response.status());
        if let Err(e) = &outcome {
            debug!(endpoint = %endpoint, error = %e, "Push service rejected delivery");
        }
        outcome
    }
}
