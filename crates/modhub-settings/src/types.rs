//! Settings schema.
//!
//! Every struct is `#[serde(default)]` and camelCase, so a settings file only
//! needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Network and connection limits.
    pub server: ServerSettings,
    /// Signature verification and session tokens.
    pub auth: AuthSettings,
    /// Template storage.
    pub templates: TemplateSettings,
    /// User directory source.
    pub users: UserSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HubSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be > 0".into(),
            ));
        }
        if s.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be > 0".into(),
            ));
        }
        if s.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be > 0".into(),
            ));
        }
        if s.heartbeat_timeout_secs <= s.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutSecs ({}) must exceed heartbeatIntervalSecs ({})",
                s.heartbeat_timeout_secs, s.heartbeat_interval_secs
            )));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "auth.tokenTtlSecs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP and WebSocket port.
    pub port: u16,
    /// Maximum number of simultaneous module connections.
    pub max_connections: usize,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Outbound messages buffered per connection before drops start.
    pub send_queue_capacity: usize,
    /// Seconds between Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a Pong before the connection is closed.
    pub heartbeat_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            max_connections: 256,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 20,
            heartbeat_timeout_secs: 60,
        }
    }
}

impl ServerSettings {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Pong deadline.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Authentication settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// JSON file mapping module name to base64 verify key.
    pub verify_keys_path: String,
    /// Accept unsigned frames. Never enable outside tests.
    pub insecure_skip_verification: bool,
    /// Sliding session TTL in seconds.
    pub token_ttl_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            verify_keys_path: "verify_keys.json".to_string(),
            insecure_skip_verification: false,
            token_ttl_secs: 3600,
        }
    }
}

impl AuthSettings {
    /// Session TTL.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Template storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateSettings {
    /// Directory holding template files.
    pub directory: String,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            directory: "templates".to_string(),
        }
    }
}

/// User directory settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    /// JSON array of user records. No file means an empty directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_path: Option<String>,
}

/// Log level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level (most verbose).
    Trace,
    /// Debug-level.
    Debug,
    /// Info-level (default).
    #[default]
    Info,
    /// Warning-level.
    Warn,
    /// Error-level.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}
