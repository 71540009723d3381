//! Error types for the mail gateway.
//!
//! Internal operations propagate `MailError` with `?`; the dispatch gateway
//! is the recovery boundary and converts every error into a `DispatchResult`
//! value. `MailError::failure_kind()` collapses the internal taxonomy onto
//! the coarse-grained kinds surfaced to callers.

use std::fmt;
use thiserror::Error;

/// Result type for mail operations.
pub type MailResult<T> = Result<T, MailError>;

/// Internal error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailErrorKind {
    // Message errors
    /// Sender address is missing or invalid.
    InvalidSender,
    /// Recipient address is missing or invalid.
    InvalidRecipient,
    /// Message has neither a text nor an HTML part.
    MissingBody,
    /// Invalid header name or value.
    InvalidHeader,
    /// MIME encoding failed.
    EncodingFailed,

    // Configuration errors
    /// No explicit configuration and no process default installed.
    ConfigurationMissing,
    /// Configuration is invalid.
    ConfigurationInvalid,

    // Template errors
    /// No template found for the requested id in any candidate language.
    TemplateNotFound,
    /// A placeholder in the template has no value in the render context.
    UnresolvedPlaceholder,
    /// Template source is malformed (e.g. unterminated placeholder).
    TemplateMalformed,

    // Connection errors
    /// Connection was refused.
    ConnectionRefused,
    /// Connection was reset.
    ConnectionReset,
    /// Connect timed out.
    ConnectTimeout,
    /// Read timed out.
    ReadTimeout,
    /// Write timed out.
    WriteTimeout,

    // TLS errors
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// STARTTLS required but not offered by the server.
    StarttlsNotSupported,

    // Authentication errors
    /// Credentials were rejected.
    CredentialsInvalid,
    /// Server requires authentication and none was configured.
    AuthenticationRequired,

    // Protocol errors
    /// Response could not be parsed.
    InvalidResponse,
    /// Server returned an unexpected reply code.
    UnexpectedResponse,
    /// Server is shutting down (421).
    ServerShutdown,
    /// Server rejected a recipient.
    RecipientRejected,
    /// Message exceeds the server size limit.
    MessageTooLarge,

    /// Unknown or internal error.
    Unknown,
}

impl MailErrorKind {
    /// Returns true if a caller-layered retry policy could reasonably retry
    /// this kind. The gateway itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MailErrorKind::ConnectTimeout
                | MailErrorKind::ReadTimeout
                | MailErrorKind::WriteTimeout
                | MailErrorKind::ConnectionReset
                | MailErrorKind::ServerShutdown
        )
    }
}

impl fmt::Display for MailErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailErrorKind::InvalidSender => write!(f, "Invalid sender address"),
            MailErrorKind::InvalidRecipient => write!(f, "Invalid recipient address"),
            MailErrorKind::MissingBody => write!(f, "Message body is empty"),
            MailErrorKind::InvalidHeader => write!(f, "Invalid header"),
            MailErrorKind::EncodingFailed => write!(f, "Encoding failed"),
            MailErrorKind::ConfigurationMissing => write!(f, "No mail configuration available"),
            MailErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
            MailErrorKind::TemplateNotFound => write!(f, "Template not found"),
            MailErrorKind::UnresolvedPlaceholder => write!(f, "Unresolved template placeholder"),
            MailErrorKind::TemplateMalformed => write!(f, "Malformed template"),
            MailErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            MailErrorKind::ConnectionReset => write!(f, "Connection reset"),
            MailErrorKind::ConnectTimeout => write!(f, "Connect timeout"),
            MailErrorKind::ReadTimeout => write!(f, "Read timeout"),
            MailErrorKind::WriteTimeout => write!(f, "Write timeout"),
            MailErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            MailErrorKind::StarttlsNotSupported => write!(f, "STARTTLS not supported"),
            MailErrorKind::CredentialsInvalid => write!(f, "Invalid credentials"),
            MailErrorKind::AuthenticationRequired => write!(f, "Authentication required"),
            MailErrorKind::InvalidResponse => write!(f, "Invalid server response"),
            MailErrorKind::UnexpectedResponse => write!(f, "Unexpected response"),
            MailErrorKind::ServerShutdown => write!(f, "Server shutting down"),
            MailErrorKind::RecipientRejected => write!(f, "Recipient rejected"),
            MailErrorKind::MessageTooLarge => write!(f, "Message too large"),
            MailErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Transport failure subkinds surfaced in dispatch results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFailure {
    /// Connecting or TLS negotiation failed.
    Connect,
    /// Authentication was rejected or required but unavailable.
    Auth,
    /// A connect, read, or write timeout elapsed.
    Timeout,
    /// The server rejected one or more recipients.
    RecipientRejected,
    /// Any other server-side rejection or protocol violation.
    Protocol,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Connect => write!(f, "connect"),
            TransportFailure::Auth => write!(f, "auth"),
            TransportFailure::Timeout => write!(f, "timeout"),
            TransportFailure::RecipientRejected => write!(f, "rejected-recipient"),
            TransportFailure::Protocol => write!(f, "protocol"),
        }
    }
}

/// Failure kinds surfaced to callers in a dispatch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Message invariants were violated; no transport session was opened.
    InvalidMessage,
    /// No usable configuration was supplied or installed.
    ConfigurationMissing,
    /// No template matched the requested id and language chain.
    TemplateNotFound,
    /// Template substitution failed.
    RenderError,
    /// Transport-layer failure with its subkind.
    Transport(TransportFailure),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidMessage => write!(f, "invalid-message"),
            FailureKind::ConfigurationMissing => write!(f, "configuration-missing"),
            FailureKind::TemplateNotFound => write!(f, "template-not-found"),
            FailureKind::RenderError => write!(f, "render-error"),
            FailureKind::Transport(sub) => write!(f, "transport-error/{}", sub),
        }
    }
}

/// Mail error with kind, diagnostic, and optional server reply code.
#[derive(Error, Debug)]
pub struct MailError {
    kind: MailErrorKind,
    message: String,
    smtp_code: Option<u16>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MailError {
    /// Creates a new error.
    pub fn new(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> MailErrorKind {
        self.kind
    }

    /// Returns the diagnostic message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns true if a caller-layered retry could reasonably retry this.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return matches!(code, 421 | 450 | 451 | 452);
        }
        self.kind.is_retryable()
    }

    /// Maps the internal kind onto the public failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self.kind {
            MailErrorKind::InvalidSender
            | MailErrorKind::InvalidRecipient
            | MailErrorKind::MissingBody
            | MailErrorKind::InvalidHeader
            | MailErrorKind::EncodingFailed => FailureKind::InvalidMessage,

            MailErrorKind::ConfigurationMissing | MailErrorKind::ConfigurationInvalid => {
                FailureKind::ConfigurationMissing
            }

            MailErrorKind::TemplateNotFound => FailureKind::TemplateNotFound,
            MailErrorKind::UnresolvedPlaceholder | MailErrorKind::TemplateMalformed => {
                FailureKind::RenderError
            }

            MailErrorKind::ConnectionRefused
            | MailErrorKind::ConnectionReset
            | MailErrorKind::TlsHandshakeFailed
            | MailErrorKind::StarttlsNotSupported => {
                FailureKind::Transport(TransportFailure::Connect)
            }

            MailErrorKind::ConnectTimeout
            | MailErrorKind::ReadTimeout
            | MailErrorKind::WriteTimeout => FailureKind::Transport(TransportFailure::Timeout),

            MailErrorKind::CredentialsInvalid | MailErrorKind::AuthenticationRequired => {
                FailureKind::Transport(TransportFailure::Auth)
            }

            MailErrorKind::RecipientRejected => {
                FailureKind::Transport(TransportFailure::RecipientRejected)
            }

            MailErrorKind::InvalidResponse
            | MailErrorKind::UnexpectedResponse
            | MailErrorKind::ServerShutdown
            | MailErrorKind::MessageTooLarge
            | MailErrorKind::Unknown => FailureKind::Transport(TransportFailure::Protocol),
        }
    }

    // Convenience constructors

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::ConnectionRefused, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::CredentialsInvalid, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::InvalidResponse, message)
    }

    /// Creates a message validation error.
    pub fn message_error(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::ConfigurationInvalid, message)
    }

    /// Creates a template lookup error.
    pub fn template_not_found(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::TemplateNotFound, message)
    }

    /// Creates a render error.
    pub fn render(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates an error from a server reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let msg = message.into();
        let kind = match code {
            421 => MailErrorKind::ServerShutdown,
            530 => MailErrorKind::AuthenticationRequired,
            535 => MailErrorKind::CredentialsInvalid,
            550 | 551 | 553 => MailErrorKind::RecipientRejected,
            552 => MailErrorKind::MessageTooLarge,
            _ if (400..600).contains(&code) => MailErrorKind::UnexpectedResponse,
            _ => MailErrorKind::Unknown,
        };
        Self::new(kind, msg).with_smtp_code(code)
    }
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        Ok(())
    }
}
