//! Capability codec

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::ReservationCapability;

const TOKEN_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Minimum secret length accepted by [`CapabilityCodec::new`]
pub const MIN_SECRET_LEN: usize = 32;

/// Tolerated clock skew between instances for `issued_at`
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Authentication failure, malformed input or a lapsed window
    #[error("capability expired or invalid")]
    ExpiredOrInvalid,

    #[error("failed to seal capability: {0}")]
    Seal(String),

    #[error("token secret must be at least {MIN_SECRET_LEN} characters")]
    InvalidSecret,
}

#[derive(Serialize, Deserialize)]
struct SealedCapability {
    #[serde(flatten)]
    payload: ReservationCapability,
    expires_at: DateTime<Utc>,
}

/// Authenticated encoder/decoder for reservation capabilities.
///
/// Cheap to clone; the cipher is shared.
#[derive(Clone)]
pub struct CapabilityCodec {
    cipher: Arc<Aes256Gcm>,
}

impl std::fmt::Debug for CapabilityCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityCodec").finish_non_exhaustive()
    }
}

impl CapabilityCodec {
    /// Build a codec from the service secret. The AES key is SHA-256 of the
    /// secret, so any secret of sufficient length is accepted.
    pub fn new(secret: &str) -> Result<Self, CodecError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CodecError::InvalidSecret);
        }

        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CodecError::InvalidSecret)?;

        Ok(Self {
            cipher: Arc::new(cipher),
        })
    }

    /// Seal `payload`; the token stops decoding `ttl` after `payload.issued_at`.
    pub fn encode(
        &self,
        payload: &ReservationCapability,
        ttl: Duration,
    ) -> Result<String, CodecError> {
        let sealed = SealedCapability {
            payload: payload.clone(),
            expires_at: payload.issued_at + ttl,
        };
        let plaintext =
            serde_json::to_vec(&sealed).map_err(|e| CodecError::Seal(e.to_string()))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| CodecError::Seal(e.to_string()))?;

        let mut bytes = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        bytes.push(TOKEN_VERSION);
        bytes.extend_from_slice(&nonce);
        bytes.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Open a token, enforcing both the embedded expiry and the caller's `ttl`
    /// measured from the issue time.
    pub fn decode(&self, token: &str, ttl: Duration) -> Result<ReservationCapability, CodecError> {
        self.decode_at(token, ttl, Utc::now())
    }

    /// [`decode`](Self::decode) against an explicit clock.
    pub fn decode_at(
        &self,
        token: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReservationCapability, CodecError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| CodecError::ExpiredOrInvalid)?;

        if bytes.len() <= 1 + NONCE_LEN || bytes[0] != TOKEN_VERSION {
            return Err(CodecError::ExpiredOrInvalid);
        }

        let nonce = Nonce::from_slice(&bytes[1..1 + NONCE_LEN]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &bytes[1 + NONCE_LEN..])
            .map_err(|_| CodecError::ExpiredOrInvalid)?;

        let sealed: SealedCapability =
            serde_json::from_slice(&plaintext).map_err(|_| CodecError::ExpiredOrInvalid)?;

        let issued_at = sealed.payload.issued_at;
        if issued_at > now + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            return Err(CodecError::ExpiredOrInvalid);
        }
        if now > sealed.expires_at || now > issued_at + ttl {
            return Err(CodecError::ExpiredOrInvalid);
        }

        Ok(sealed.payload)
    }
}
