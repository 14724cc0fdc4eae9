//! Envelope authentication.
//!
//! Outer envelope: `{origin, signed_msg, resolve_id}`. `signed_msg` is the
//! NaCl signed-message layout, `base64(signature[64] || payload)`, where the
//! payload is the UTF-8 JSON text of the inner message.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{SIGNATURE_LENGTH, Signature, Signer, SigningKey};
use modhub_core::protocol::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AuthError;
use crate::keys::KeyStore;

/// Whether signatures are checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationMode {
    /// Every envelope must verify.
    Enforced,
    /// Non-production only: frames are taken as already-authentic inner messages.
    InsecureSkip,
}

/// Outer wire envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Claimed sender.
    pub origin: String,
    /// `base64(signature || payload)`.
    pub signed_msg: String,
    /// Correlation token, mirrored from the inner message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_id: Option<String>,
}

impl Envelope {
    /// Sign `inner` as `origin`.
    ///
    /// `resolve_id` is lifted from the inner message when it has one.
    pub fn seal(origin: &str, key: &SigningKey, inner: &Fields) -> Self {
        let payload = Value::Object(inner.clone()).to_string();
        let signature = key.sign(payload.as_bytes());
        let mut signed = Vec::with_capacity(SIGNATURE_LENGTH + payload.len());
        signed.extend_from_slice(&signature.to_bytes());
        signed.extend_from_slice(payload.as_bytes());
        Self {
            origin: origin.to_owned(),
            signed_msg: STANDARD.encode(signed),
            resolve_id: inner
                .get("resolve_id")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }

    /// Wire text.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A rejected frame.
#[derive(Debug)]
pub struct AuthFailure {
    /// Outer `resolve_id`, when the frame carried one.
    pub resolve_id: Option<String>,
    /// Internal reason. Log it, never send it.
    pub error: AuthError,
}

/// Verifies inbound frames against the [`KeyStore`].
#[derive(Clone, Debug)]
pub struct Authenticator {
    keys: Arc<KeyStore>,
    mode: VerificationMode,
}

impl Authenticator {
    /// Create an authenticator.
    pub fn new(keys: Arc<KeyStore>, mode: VerificationMode) -> Self {
        Self { keys, mode }
    }

    /// Current verification mode.
    pub fn mode(&self) -> VerificationMode {
        self.mode
    }

    /// Key store in use.
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Authenticate one frame and return the inner message.
    pub fn verify(&self, frame: &str) -> Result<Fields, AuthFailure> {
        let outer = match serde_json::from_str::<Value>(frame) {
            Ok(Value::Object(outer)) => outer,
            Ok(_) => return Err(reject(None, AuthError::Malformed("envelope is not an object".into()))),
            Err(e) => return Err(reject(None, AuthError::Malformed(e.to_string()))),
        };
        let resolve_id = outer
            .get("resolve_id")
            .and_then(Value::as_str)
            .map(str::to_owned);

        if self.mode == VerificationMode::InsecureSkip {
            return Ok(outer);
        }

        self.verify_outer(&outer)
            .map_err(|error| reject(resolve_id, error))
    }

    fn verify_outer(&self, outer: &Fields) -> Result<Fields, AuthError> {
        let origin = outer
            .get("origin")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::Malformed("missing origin".into()))?;
        let signed_msg = outer
            .get("signed_msg")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::Malformed("missing signed_msg".into()))?;

        let key = self
            .keys
            .get(origin)
            .ok_or_else(|| AuthError::UnknownOrigin(origin.to_owned()))?;

        let signed = STANDARD
            .decode(signed_msg)
            .map_err(|e| AuthError::Malformed(format!("signed_msg is not base64: {e}")))?;
        if signed.len() < SIGNATURE_LENGTH {
            return Err(AuthError::Malformed(format!(
                "signed_msg shorter than {SIGNATURE_LENGTH} bytes"
            )));
        }
        let (sig_bytes, payload) = signed.split_at(SIGNATURE_LENGTH);
        let signature = Signature::from_slice(sig_bytes).map_err(|_| AuthError::BadSignature)?;
        key.verify_strict(payload, &signature)
            .map_err(|_| AuthError::BadSignature)?;

        let inner = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(inner)) => inner,
            Ok(_) => return Err(AuthError::Malformed("payload is not an object".into())),
            Err(e) => return Err(AuthError::Malformed(format!("payload: {e}"))),
        };

        let inner_origin = inner.get("origin").and_then(Value::as_str).unwrap_or("");
        if inner_origin != origin {
            return Err(AuthError::OriginMismatch {
                outer: origin.to_owned(),
                inner: inner_origin.to_owned(),
            });
        }
        Ok(inner)
    }
}

fn reject(resolve_id: Option<String>, error: AuthError) -> AuthFailure {
    AuthFailure { resolve_id, error }
}
