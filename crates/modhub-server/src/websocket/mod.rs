//! WebSocket connection management, heartbeat and fan-out.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-connection send queue and liveness state |
//! | `session` | Read/write loops for one module, upgrade through disconnect |
//! | `broadcast` | Fan-out to every authenticated connection and point-to-point forwarding |
//! | `heartbeat` | Disconnects modules that stop answering Pings |
//!
//! ## Data Flow
//!
//! `session` → `Hub::handle_frame` → reply enqueued on the sender's `connection`.
//! Broadcasts and forwards go through `broadcast` onto other connections' queues.

pub mod broadcast;
pub mod connection;
pub mod heartbeat;
pub mod session;
