//! Module verification keys.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{PUBLIC_KEY_LENGTH, VerifyingKey};
use tracing::info;

use crate::errors::KeyStoreError;

/// Immutable map from module identity to its verification key.
///
/// Loaded once at startup and shared; there is no runtime mutation.
#[derive(Clone, Debug, Default)]
pub struct KeyStore {
    keys: HashMap<String, VerifyingKey>,
}

impl KeyStore {
    /// Build from already-decoded keys.
    pub fn from_keys(keys: impl IntoIterator<Item = (String, VerifyingKey)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Build from base64-encoded keys, rejecting the whole set if any entry is bad.
    pub fn from_encoded<I, K, V>(entries: I) -> Result<Self, KeyStoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut keys = HashMap::new();
        for (module, encoded) in entries {
            let module = module.into();
            let key = decode_verifying_key(encoded.as_ref()).map_err(|reason| {
                KeyStoreError::InvalidKey {
                    module: module.clone(),
                    reason,
                }
            })?;
            let _ = keys.insert(module, key);
        }
        Ok(Self { keys })
    }

    /// Load `{ "<module>": "<base64 verify key>", ... }` from disk.
    pub fn from_json_file(path: &Path) -> Result<Self, KeyStoreError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: BTreeMap<String, String> = serde_json::from_str(&raw)?;
        let store = Self::from_encoded(entries)?;
        info!(path = %path.display(), modules = store.len(), "loaded verify keys");
        Ok(store)
    }

    /// Key for `module`, if it is known.
    pub fn get(&self, module: &str) -> Option<&VerifyingKey> {
        self.keys.get(module)
    }

    /// Known module identities, sorted.
    pub fn modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are loaded.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Decode a standard-base64 Ed25519 public key.
pub fn decode_verifying_key(encoded: &str) -> Result<VerifyingKey, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("not base64: {e}"))?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected {PUBLIC_KEY_LENGTH} bytes, got {}", b.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| format!("not a valid curve point: {e}"))
}

/// Encode a public key the way the key file stores it.
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    STANDARD.encode(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use std::io::Write;

    fn key(seed: u8) -> VerifyingKey {
        SigningKey::from_bytes(&[seed; 32]).verifying_key()
    }

    #[test]
    fn encode_decode_key() {
        let k = key(1);
        assert_eq!(decode_verifying_key(&encode_verifying_key(&k)).unwrap(), k);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_verifying_key(&STANDARD.encode([0u8; 16])).unwrap_err();
        assert!(err.contains("expected 32 bytes"));
    }

    #[test]
    fn decode_rejects_non_base64() {
        assert!(decode_verifying_key("***").unwrap_err().contains("base64"));
    }

    #[test]
    fn from_encoded_fails_whole_set_on_one_bad_key() {
        let err = KeyStore::from_encoded([
            ("good", encode_verifying_key(&key(2))),
            ("bad", "AAAA".to_string()),
        ])
        .unwrap_err();
        assert!(matches!(err, KeyStoreError::InvalidKey { module, .. } if module == "bad"));
    }

    #[test]
    fn lookup_by_module() {
        let store = KeyStore::from_keys([("crud".to_string(), key(3))]);
        assert_eq!(store.get("crud"), Some(&key(3)));
        assert!(store.get("other").is_none());
        assert_eq!(store.modules(), ["crud"]);
    }

    #[test]
    fn loads_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"crud": "{}", "executor": "{}"}}"#,
            encode_verifying_key(&key(4)),
            encode_verifying_key(&key(5))
        )
        .unwrap();
        let store = KeyStore::from_json_file(file.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("executor"), Some(&key(5)));
    }

    #[test]
    fn json_file_must_be_object_of_strings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"crud": 42}}"#).unwrap();
        let err = KeyStore::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, KeyStoreError::Json(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = KeyStore::from_json_file(Path::new("/nonexistent/keys.json")).unwrap_err();
        assert!(matches!(err, KeyStoreError::Io(_)));
    }
}
