//! Manager configuration

use crate::{
    constants::{
        DEFAULT_AMI_HOST, DEFAULT_AMI_PORT, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_PING_INTERVAL_MS,
        DEFAULT_RECONNECT_DELAY_MS,
    },
    encoding::TextEncoding,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Connection settings for a [`Manager`](crate::Manager).
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use asterisk_ami_tokio::ManagerConfig;
///
/// let config = ManagerConfig {
///     host: "pbx.example.com".into(),
///     username: Some("admin".into()),
///     secret: Some("s3cret".into()),
///     ..Default::default()
/// };
/// assert_eq!(config.port, 5038);
/// assert!(config.has_credentials());
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Wrap the connection in TLS
    pub ssl: bool,
    /// Charset of the manager stream
    pub encoding: TextEncoding,
    /// Login username; with `secret`, triggers login on every connect
    pub username: Option<String>,
    /// Login secret
    pub secret: Option<String>,
    /// Keepalive `Ping` interval; zero disables it
    pub ping_interval_ms: u64,
    /// Delay before reconnecting after a failure or loss
    pub reconnect_delay_ms: u64,
    /// Transport establishment timeout
    pub connect_timeout_ms: u64,
    /// Default per-action timeout; `None` waits until the connection closes.
    /// Clamped to [`MAX_ACTION_TIMEOUT_MS`](crate::constants::MAX_ACTION_TIMEOUT_MS).
    pub action_timeout_ms: Option<u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_AMI_HOST.to_string(),
            port: DEFAULT_AMI_PORT,
            ssl: false,
            encoding: TextEncoding::default(),
            username: None,
            secret: None,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            action_timeout_ms: None,
        }
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("encoding", &self.encoding)
            .field("username", &self.username)
            .field(
                "secret",
                &self
                    .secret
                    .as_ref()
                    .map(|_| "[REDACTED]"),
            )
            .field("ping_interval_ms", &self.ping_interval_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("action_timeout_ms", &self.action_timeout_ms)
            .finish()
    }
}

impl ManagerConfig {
    /// Config for `host:port` with everything else defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set login credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.secret = Some(secret.into());
        self
    }

    /// Both username and secret are set.
    pub fn has_credentials(&self) -> bool {
        self.username
            .is_some()
            && self
                .secret
                .is_some()
    }

    /// Keepalive interval, `None` when disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    /// Reconnect delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Transport establishment timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default action timeout.
    pub fn action_timeout(&self) -> Option<Duration> {
        self.action_timeout_ms
            .map(Duration::from_millis)
    }
}
