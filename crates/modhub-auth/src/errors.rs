//! Auth error types.

/// Why an envelope was rejected.
///
/// Only ever logged. On the wire every variant collapses into the same
/// `signature_verification_error` response.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Outer or inner JSON, base64 or signature framing is broken.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// No verification key for the claimed origin.
    #[error("unknown origin '{0}'")]
    UnknownOrigin(String),

    /// The signature does not verify against the origin's key.
    #[error("signature does not verify")]
    BadSignature,

    /// The signed payload claims a different origin than the envelope.
    #[error("inner origin '{inner}' does not match envelope origin '{outer}'")]
    OriginMismatch {
        /// Origin on the outer envelope.
        outer: String,
        /// Origin inside the signed payload.
        inner: String,
    },
}

/// Errors loading the key store.
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The key file is not a JSON object of strings.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A key entry does not decode to an Ed25519 public key.
    #[error("invalid verify key for module '{module}': {reason}")]
    InvalidKey {
        /// Module the key belongs to.
        module: String,
        /// What was wrong with it.
        reason: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_mismatch_display() {
        let err = AuthError::OriginMismatch {
            outer: "a".into(),
            inner: "b".into(),
        };
        assert_eq!(
            err.to_string(),
            "inner origin 'b' does not match envelope origin 'a'"
        );
    }

    #[test]
    fn invalid_key_display() {
        let err = KeyStoreError::InvalidKey {
            module: "crud".into(),
            reason: "expected 32 bytes".into(),
        };
        assert!(err.to_string().contains("crud"));
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err = KeyStoreError::from(io_err);
        assert!(err.to_string().contains("not found"));
    }
}
