//! # modhub-server
//!
//! Axum HTTP + `WebSocket` server for the module hub.
//!
//! Modules attach at `GET /websocket?module=<identity>` and exchange signed
//! envelopes. Each inbound frame is authenticated against the key store,
//! validated and dispatched by [`hub::Hub`]; replies, broadcasts and forwards
//! are enqueued on per-connection bounded channels.
//!
//! - [`server`]: `HubServer`, routes, listen and graceful shutdown
//! - [`hub`]: connection registry and protocol dispatcher
//! - [`websocket`]: session loops, heartbeat, fan-out
//! - [`health`], [`metrics`], [`shutdown`], [`config`]

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use hub::Hub;
pub use server::HubServer;
