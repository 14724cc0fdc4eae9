//! # modhub-auth
//!
//! Everything the hub needs to decide who sent a message and who is logged in.
//!
//! - [`keys::KeyStore`]: module identity to Ed25519 verification key, read-only
//! - [`signing::Authenticator`]: verifies outer envelopes and yields the inner message
//! - [`token_cache::TokenCache`]: session tokens with sliding expiration

#![deny(unsafe_code)]

pub mod errors;
pub mod keys;
pub mod signing;
pub mod token_cache;

pub use errors::{AuthError, KeyStoreError};
pub use keys::KeyStore;
pub use signing::{AuthFailure, Authenticator, Envelope, VerificationMode};
pub use token_cache::{CacheEntry, Clock, ManualClock, SessionUser, SystemClock, TokenCache};
