//! Hub core: connection registry and protocol dispatch.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `registry` | Live connections, authenticated identities, running-module table |
//! | `dispatcher` | Authenticate, validate and execute one inbound frame |

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{Hub, PLATFORM_MODULE};
pub use registry::{AttachError, ConnectionRegistry, RunningModule};
