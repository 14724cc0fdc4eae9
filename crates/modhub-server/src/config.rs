//! Server configuration.

use std::time::Duration;

use modhub_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the hub server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent module connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this many seconds without a reply.
    pub heartbeat_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 20,
            heartbeat_timeout_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Reply deadline.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            max_message_size: s.max_message_size,
            send_queue_capacity: s.send_queue_capacity,
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            heartbeat_timeout_secs: s.heartbeat_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_ephemeral_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_heartbeat() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(20));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn from_settings_copies_every_field() {
        let settings = ServerSettings {
            host: "10.0.0.1".into(),
            port: 9000,
            max_connections: 3,
            max_message_size: 512,
            send_queue_capacity: 8,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 15,
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.max_message_size, 512);
        assert_eq!(cfg.send_queue_capacity, 8);
        assert_eq!(cfg.heartbeat_interval_secs, 5);
        assert_eq!(cfg.heartbeat_timeout_secs, 15);
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"0.0.0.0","port":3000,"max_connections":5,"max_message_size":512,"send_queue_capacity":4,"heartbeat_interval_secs":10,"heartbeat_timeout_secs":30}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.send_queue_capacity, 4);
    }
}
