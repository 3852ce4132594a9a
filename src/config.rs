//! Connection configuration

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::rustls;

use crate::{
    constants::{DEFAULT_AMI_PORT, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RECONNECT_DELAY_MS},
    error::{AmiError, AmiResult},
};

fn default_port() -> u16 {
    DEFAULT_AMI_PORT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_events() -> bool {
    true
}

/// TLS parameters for a manager connection.
///
/// Chosen once when the client starts; every reconnect attempt uses the same
/// settings.
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<rustls::ClientConfig>,
    server_name: Option<String>,
}

impl TlsConfig {
    /// Use the given rustls client configuration. The certificate is checked
    /// against the configured host unless [`with_server_name`](Self::with_server_name)
    /// overrides it.
    pub fn new(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            client_config,
            server_name: None,
        }
    }

    /// Verify the server certificate against this name instead of the host.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub(crate) fn client_config(&self) -> Arc<rustls::ClientConfig> {
        self.client_config
            .clone()
    }

    pub(crate) fn server_name(&self) -> Option<&str> {
        self.server_name
            .as_deref()
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Settings for [`AmiClient::start`](crate::AmiClient::start).
///
/// ```
/// use asterisk_ami_tokio::AmiConfig;
///
/// let config = AmiConfig::new("pbx.example.com", "admin", "s3cret")
///     .with_reconnect_delay_ms(1000)
///     .with_name("pbx-1");
/// assert_eq!(config.port, 5038);
/// assert_eq!(config.source(), "pbx-1");
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct AmiConfig {
    /// Host name or address of the switch.
    pub host: String,
    /// Manager port. Default: 5038.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Manager user name.
    pub username: String,
    /// Manager secret.
    pub secret: String,
    /// TCP connect timeout in milliseconds. Default: 2000.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Delay before reconnecting after a failure or drop. Default: 5000.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Ask the switch to send unsolicited events (`Events: on`). Default: true.
    #[serde(default = "default_events")]
    pub events: bool,
    /// Connection identifier stamped as the `source` of every message.
    /// Defaults to `host:port`.
    #[serde(default)]
    pub name: Option<String>,
    /// Plaintext TCP when `None`.
    #[serde(skip)]
    pub tls: Option<TlsConfig>,
}

impl AmiConfig {
    /// Plaintext configuration with default port and timings.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_AMI_PORT,
            username: username.into(),
            secret: secret.into(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            events: true,
            name: None,
            tls: None,
        }
    }

    /// Set the manager port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the TCP connect timeout.
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_delay_ms = ms;
        self
    }

    /// Turn unsolicited events on or off at login.
    pub fn with_events(mut self, events: bool) -> Self {
        self.events = events;
        self
    }

    /// Override the connection identifier.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Connect over TLS.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// The identifier used as `source` on events and responses.
    pub fn source(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// Reject settings the connection could never use.
    ///
    /// Values that end up on the wire must not contain line breaks, or the
    /// login would smuggle extra keys; the host and user name must be set.
    pub fn validate(&self) -> AmiResult<()> {
        let fields = [
            ("host", &self.host),
            ("username", &self.username),
            ("secret", &self.secret),
        ];
        for (field, value) in fields {
            if value.contains(|c| c == '\r' || c == '\n') {
                return Err(AmiError::InvalidConfig {
                    message: format!("{} must not contain line breaks", field),
                });
            }
        }
        if self
            .host
            .is_empty()
            || self
                .username
                .is_empty()
        {
            return Err(AmiError::InvalidConfig {
                message: "host and username must be set".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl std::fmt::Debug for AmiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("events", &self.events)
            .field("name", &self.name)
            .field("tls", &self.tls)
            .finish()
    }
}
