//! # modhub-core
//!
//! Shared vocabulary for the module communication hub.
//!
//! - [`protocol`]: inner message header, the closed [`protocol::Request`] set and
//!   per-type required-field validation
//! - [`response`]: response builder producing the `<type>_response` wire shape
//! - [`errors`]: hub error taxonomy with stable machine-readable reasons
//! - [`ids`]: connection identifiers
//! - [`users`] / [`templates`]: collaborator interfaces consumed by the hub,
//!   with reference implementations

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;
pub mod response;
pub mod templates;
pub mod users;

pub use errors::{CollaboratorError, HubError};
pub use ids::ConnectionId;
pub use protocol::{MessageHeader, Request, RequestKind};
pub use response::Response;
