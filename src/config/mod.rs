//! Transport configuration and the process-wide configuration resolver.
//!
//! A `MailConfig` is built per-call or once at process start, is immutable
//! after construction, and is borrowed by the gateway for the duration of a
//! single send. `install_default` publishes a process-wide default exactly
//! once; `resolve` prefers an explicit per-call configuration and falls back
//! to the default.

use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::message::Address;

/// Default SMTP port (submission with STARTTLS).
pub const DEFAULT_PORT: u16 = 587;

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for individual commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// TLS mode for transport sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// No TLS (insecure, not recommended).
    None,
    /// Opportunistic STARTTLS (default).
    #[default]
    StartTls,
    /// Required STARTTLS (fail if not offered).
    StartTlsRequired,
    /// Implicit TLS (port 465).
    Implicit,
}

/// Transport configuration for one or more sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS mode.
    #[serde(default)]
    pub tls: TlsMode,
    /// Authentication username.
    pub username: Option<String>,
    /// Authentication password (never serialized).
    #[serde(skip)]
    pub password: Option<SecretString>,
    /// Default sender applied when a message carries none.
    pub from: Option<Address>,
    /// Connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Command timeout.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Client identifier for EHLO.
    pub client_id: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}
fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

impl MailConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> MailConfigBuilder {
        MailConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MailResult<()> {
        if self.host.is_empty() {
            return Err(MailError::configuration("Host is required"));
        }

        if self.port == 0 {
            return Err(MailError::configuration("Port must be non-zero"));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(MailError::configuration(
                "Username and password must be set together",
            ));
        }

        Ok(())
    }

    /// Returns the full server address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if authentication is configured.
    pub fn has_auth(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Returns the configured password, if any.
    pub fn password_value(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret().as_str())
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("localhost")
    }
}

/// Builder for transport configuration.
#[derive(Debug, Default)]
pub struct MailConfigBuilder {
    host: Option<String>,
    port: u16,
    tls: TlsMode,
    username: Option<String>,
    password: Option<SecretString>,
    from: Option<Address>,
    connect_timeout: Duration,
    command_timeout: Duration,
    client_id: Option<String>,
}

impl MailConfigBuilder {
    /// Sets the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets plain credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the TLS mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls = mode;
        self
    }

    /// Disables TLS (insecure).
    pub fn no_tls(mut self) -> Self {
        self.tls = TlsMode::None;
        self
    }

    /// Sets the default sender applied when a message carries none.
    pub fn from(mut self, address: impl Into<Address>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> MailResult<MailConfig> {
        let config = MailConfig {
            host: self
                .host
                .ok_or_else(|| MailError::configuration("Host is required"))?,
            port: if self.port == 0 { DEFAULT_PORT } else { self.port },
            tls: self.tls,
            username: self.username,
            password: self.password,
            from: self.from,
            connect_timeout: if self.connect_timeout == Duration::ZERO {
                DEFAULT_CONNECT_TIMEOUT
            } else {
                self.connect_timeout
            },
            command_timeout: if self.command_timeout == Duration::ZERO {
                DEFAULT_COMMAND_TIMEOUT
            } else {
                self.command_timeout
            },
            client_id: self.client_id,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Process-wide default configuration, written once at startup.
static DEFAULT_CONFIG: OnceLock<MailConfig> = OnceLock::new();

/// Installs the process-wide default configuration.
///
/// Returns an error if a default was already installed; the default is
/// immutable for the lifetime of the process.
pub fn install_default(config: MailConfig) -> MailResult<()> {
    DEFAULT_CONFIG
        .set(config)
        .map_err(|_| MailError::configuration("Default mail configuration already installed"))
}

/// Returns the process-wide default configuration, if installed.
pub fn default_config() -> Option<&'static MailConfig> {
    DEFAULT_CONFIG.get()
}

/// Resolves the configuration for one send.
///
/// An explicit configuration is used as-is; otherwise the process default is
/// returned. Fails with `ConfigurationMissing` when neither exists.
pub fn resolve(explicit: Option<&MailConfig>) -> MailResult<Cow<'_, MailConfig>> {
    if let Some(config) = explicit {
        return Ok(Cow::Borrowed(config));
    }

    default_config().map(|c| Cow::Borrowed(c)).ok_or_else(|| {
        MailError::new(
            MailErrorKind::ConfigurationMissing,
            "No explicit configuration supplied and no process default installed",
        )
    })
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
