//! Daemon configuration.
//!
//! Loaded from a TOML file. Every key has a default, so an empty file (or
//! no file at all) yields a working daemon listening on
//! [`DEFAULT_LISTEN_ADDR`].
//!
//! ```toml
//! listen = "0.0.0.0:7878"
//!
//! [hub]
//! echo = false
//! write_timeout_ms = 2000
//!
//! [websocket]
//! listen = "0.0.0.0:8080"
//! path = "/ws"
//!
//! [[auth.tokens]]
//! token = "s3cret"
//! principal = "alice"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use clich_protocol::MAX_FRAME_SIZE;

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7878";

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CLICH_CONFIG";

/// Environment variable overriding `listen`
pub const LISTEN_ENV: &str = "CLICH_LISTEN";

/// Default WebSocket upgrade route
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Socket address the TCP listener binds to
    pub listen: String,

    /// Broadcast hub tuning
    pub hub: HubConfig,

    /// Optional WebSocket listener
    pub websocket: WebSocketConfig,

    /// Admission credentials
    pub auth: AuthConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            hub: HubConfig::default(),
            websocket: WebSocketConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Reads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces the listen address when an override is given.
    pub fn with_listen_override(mut self, listen: Option<String>) -> Self {
        if let Some(listen) = listen.filter(|l| !l.trim().is_empty()) {
            self.listen = listen;
        }
        self
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "listen",
                reason: "must not be empty".to_string(),
            });
        }
        self.hub.validate()?;
        self.websocket.validate()?;
        self.auth.validate()
    }
}

/// Broadcast hub tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Relay a sender's frames back to the sender itself
    pub echo: bool,

    /// Upper bound for delivering one frame to one peer
    pub write_timeout_ms: u64,

    /// Upper bound for receiving the identity handshake
    pub handshake_timeout_ms: u64,

    /// Disconnect peers that send nothing for this long (disabled when unset)
    pub idle_timeout_secs: Option<u64>,

    /// Largest accepted frame, in bytes
    pub max_frame_size: usize,

    /// Largest number of simultaneously registered connections
    pub max_connections: usize,

    /// Cap on in-flight outbound writes across all fan-outs
    pub max_concurrent_writes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            echo: true,
            write_timeout_ms: 5_000,
            handshake_timeout_ms: 10_000,
            idle_timeout_secs: None,
            max_frame_size: MAX_FRAME_SIZE,
            max_connections: 1_024,
            max_concurrent_writes: 256,
        }
    }
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("hub.write_timeout_ms", self.write_timeout_ms as usize),
            ("hub.handshake_timeout_ms", self.handshake_timeout_ms as usize),
            ("hub.max_frame_size", self.max_frame_size),
            ("hub.max_connections", self.max_connections),
            ("hub.max_concurrent_writes", self.max_concurrent_writes),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                key: "hub.idle_timeout_secs",
                reason: "must be greater than zero (omit to disable)".to_string(),
            });
        }
        Ok(())
    }
}

/// WebSocket listener. Disabled unless `listen` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebSocketConfig {
    /// Socket address the WebSocket listener binds to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// Upgrade route
    pub path: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            listen: None,
            path: DEFAULT_WS_PATH.to_string(),
        }
    }
}

impl WebSocketConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                key: "websocket.listen",
                reason: "must not be empty (omit to disable)".to_string(),
            });
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "websocket.path",
                reason: "must start with '/'".to_string(),
            });
        }
        Ok(())
    }
}

/// Admission credentials.
///
/// An empty token table means no verification: client identity claims are
/// trusted as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub tokens: Vec<TokenEntry>,
}

impl AuthConfig {
    /// Returns true if admissions must present a verified credential.
    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for entry in &self.tokens {
            if entry.token.is_empty() || entry.principal.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "auth.tokens",
                    reason: "token and principal must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// One accepted bearer token and the principal it authenticates.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenEntry {
    pub token: String,
    pub principal: String,
    #[serde(default)]
    pub admin: bool,
}

impl std::fmt::Debug for TokenEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEntry")
            .field("token", &"[REDACTED]")
            .field("principal", &self.principal)
            .field("admin", &self.admin)
            .finish()
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = DaemonConfig::from_toml_str("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.listen, DEFAULT_LISTEN_ADDR);
        assert!(config.hub.echo);
        assert_eq!(config.hub.max_frame_size, MAX_FRAME_SIZE);
        assert!(config.hub.idle_timeout().is_none());
        assert!(config.websocket.listen.is_none());
        assert_eq!(config.websocket.path, DEFAULT_WS_PATH);
        assert!(!config.auth.is_enabled());
    }

    #[test]
    fn test_websocket_section() {
        let config = DaemonConfig::from_toml_str(
            "[websocket]\nlisten = \"127.0.0.1:8080\"\npath = \"/chat\"\n",
        )
        .unwrap();
        assert_eq!(config.websocket.listen.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(config.websocket.path, "/chat");

        let err = DaemonConfig::from_toml_str("[websocket]\npath = \"ws\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "websocket.path", .. }));
    }

    #[test]
    fn test_partial_hub_section() {
        let config = DaemonConfig::from_toml_str(
            r#"
            listen = "0.0.0.0:9000"

            [hub]
            echo = false
            write_timeout_ms = 250
            idle_timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.listen, "0.0.0.0:9000");
        assert!(!config.hub.echo);
        assert_eq!(config.hub.write_timeout(), Duration::from_millis(250));
        assert_eq!(config.hub.idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.hub.max_connections, 1_024);
    }

    #[test]
    fn test_auth_tokens() {
        let config = DaemonConfig::from_toml_str(
            r#"
            [[auth.tokens]]
            token = "abc"
            principal = "alice"

            [[auth.tokens]]
            token = "def"
            principal = "root"
            admin = true
            "#,
        )
        .unwrap();

        assert!(config.auth.is_enabled());
        assert_eq!(config.auth.tokens.len(), 2);
        assert!(config.auth.tokens.iter().any(|t| t.principal == "root" && t.admin));
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let entry = TokenEntry {
            token: "hunter2".to_string(),
            principal: "alice".to_string(),
            admin: false,
        };
        let debug = format!("{entry:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("alice"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = DaemonConfig::from_toml_str("[hub]\nbogus = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let err = DaemonConfig::from_toml_str("[hub]\nmax_concurrent_writes = 0\n").unwrap_err();
        assert!(err.to_string().contains("hub.max_concurrent_writes"));

        let err = DaemonConfig::from_toml_str("[hub]\nidle_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("hub.idle_timeout_secs"));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let err = DaemonConfig::from_toml_str(
            "[[auth.tokens]]\ntoken = \"\"\nprincipal = \"alice\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "auth.tokens", .. }));
    }

    #[test]
    fn test_listen_override() {
        let config = DaemonConfig::default().with_listen_override(Some("[::1]:1".to_string()));
        assert_eq!(config.listen, "[::1]:1");

        let config = DaemonConfig::default().with_listen_override(Some("  ".to_string()));
        assert_eq!(config.listen, DEFAULT_LISTEN_ADDR);

        let config = DaemonConfig::default().with_listen_override(None);
        assert_eq!(config.listen, DEFAULT_LISTEN_ADDR);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[hub]\nmax_connections = 3").unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.hub.max_connections, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = DaemonConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("missing.toml"));
    }
}
