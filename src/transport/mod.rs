//! Transport layer: the session provider seam and the SMTP implementation.
//!
//! A `Transport` opens one exclusive `Session` per send; sessions are not
//! pooled or shared. The SMTP implementation runs over tokio TCP with
//! STARTTLS or implicit TLS (rustls) and PLAIN/LOGIN authentication.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::auth::{self, AuthMethod};
use crate::config::{MailConfig, TlsMode};
use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::message::Address;
use crate::protocol::{codes, Capabilities, SmtpCommand, SmtpResponse};

/// Transport envelope: sender and recipients, distinct from the displayed
/// headers in the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope sender (MAIL FROM).
    pub from: Address,
    /// Envelope recipients (RCPT TO), in to/cc/bcc order.
    pub recipients: Vec<Address>,
}

/// Session provider collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a transport session for the given configuration.
    async fn open(&self, config: &MailConfig) -> MailResult<Box<dyn Session>>;
}

/// One exclusive transport session.
#[async_trait]
pub trait Session: Send {
    /// Transmits the envelope and prepared content.
    async fn transmit(&mut self, envelope: &Envelope, content: &[u8]) -> MailResult<()>;

    /// Closes the session gracefully. Idempotent.
    async fn close(&mut self) -> MailResult<()>;
}

/// SMTP transport: opens one `SmtpSession` per send.
#[derive(Debug, Default, Clone)]
pub struct SmtpTransport;

impl SmtpTransport {
    /// Creates a new SMTP transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn open(&self, config: &MailConfig) -> MailResult<Box<dyn Session>> {
        let session = SmtpSession::connect(config).await?;
        Ok(Box::new(session))
    }
}

/// Stream that can be plain TCP or TLS.
enum SessionStream {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<tokio_rustls::client::TlsStream<TcpStream>>),
    /// Transient placeholder while upgrading to TLS.
    Detached,
}

/// SMTP session over a single TCP/TLS connection.
pub struct SmtpSession {
    stream: SessionStream,
    command_timeout: Duration,
    capabilities: Capabilities,
    host: String,
    tls_enabled: bool,
    closed: bool,
}

impl fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSession")
            .field("host", &self.host)
            .field("tls_enabled", &self.tls_enabled)
            .field("closed", &self.closed)
            .finish()
    }
}

impl SmtpSession {
    /// Connects, greets, negotiates TLS, and authenticates per the
    /// configuration.
    pub async fn connect(config: &MailConfig) -> MailResult<Self> {
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| MailError::timeout(MailErrorKind::ConnectTimeout, "Connect timed out"))?
            .map_err(|e| Self::map_io_error(e, &address))?;

        stream.set_nodelay(true).ok();

        let mut session = Self {
            stream: SessionStream::Plain(BufReader::new(stream)),
            command_timeout: config.command_timeout,
            capabilities: Capabilities::default(),
            host: config.host.clone(),
            tls_enabled: false,
            closed: false,
        };

        // Implicit TLS wraps the connection before the greeting.
        if config.tls == TlsMode::Implicit {
            session.upgrade_tls().await?;
        }

        let greeting = session.read_response().await?;
        if !greeting.is_success() {
            return Err(greeting.to_error());
        }

        session.greet(config.client_id()).await?;

        if !session.tls_enabled
            && matches!(config.tls, TlsMode::StartTls | TlsMode::StartTlsRequired)
        {
            session.negotiate_starttls(config).await?;
        }

        if config.has_auth() {
            session.authenticate(config).await?;
        }

        Ok(session)
    }

    /// Sends EHLO (falling back to HELO) and records the capabilities.
    async fn greet(&mut self, client_id: &str) -> MailResult<()> {
        let response = self
            .send_command(&SmtpCommand::Ehlo(client_id.to_string()))
            .await?;

        if response.is_success() {
            self.capabilities = Capabilities::from_ehlo_response(&response);
            return Ok(());
        }

        let response = self
            .send_command(&SmtpCommand::Helo(client_id.to_string()))
            .await?;
        if !response.is_success() {
            return Err(response.to_error());
        }
        self.capabilities = Capabilities::default();
        Ok(())
    }

    /// Negotiates STARTTLS when offered; fails only in required mode.
    async fn negotiate_starttls(&mut self, config: &MailConfig) -> MailResult<()> {
        if !self.capabilities.starttls {
            if config.tls == TlsMode::StartTlsRequired {
                return Err(MailError::new(
                    MailErrorKind::StarttlsNotSupported,
                    "Server does not offer STARTTLS",
                ));
            }
            return Ok(());
        }

        let response = self.send_command(&SmtpCommand::StartTls).await?;
        if !response.is_success() {
            if config.tls == TlsMode::StartTlsRequired {
                return Err(response.to_error());
            }
            return Ok(());
        }

        self.upgrade_tls().await?;

        // Capabilities must be re-read after the TLS handshake.
        self.greet(config.client_id()).await
    }

    /// Performs the TLS handshake over the current plain stream.
    async fn upgrade_tls(&mut self) -> MailResult<()> {
        use rustls::pki_types::ServerName;

        let tcp_stream = match std::mem::replace(&mut self.stream, SessionStream::Detached) {
            SessionStream::Plain(reader) => reader.into_inner(),
            other => {
                self.stream = other;
                return Err(MailError::tls("Connection is already using TLS"));
            }
        };

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|_| MailError::tls(format!("Invalid server name: {}", self.host)))?;

        let tls_stream = timeout(
            Duration::from_secs(30),
            connector.connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| MailError::timeout(MailErrorKind::ConnectTimeout, "TLS handshake timed out"))?
        .map_err(|e| MailError::tls(format!("TLS handshake failed: {}", e)))?;

        self.stream = SessionStream::Tls(BufReader::new(tls_stream));
        self.tls_enabled = true;
        Ok(())
    }

    /// Authenticates with PLAIN when offered, otherwise LOGIN.
    async fn authenticate(&mut self, config: &MailConfig) -> MailResult<()> {
        let username = config.username.as_deref().unwrap_or_default().to_string();
        let password = config.password_value().unwrap_or_default().to_string();

        let method = if self.capabilities.auth_mechanisms.contains(&AuthMethod::Plain) {
            AuthMethod::Plain
        } else if self.capabilities.auth_mechanisms.contains(&AuthMethod::Login) {
            AuthMethod::Login
        } else {
            return Err(MailError::authentication(
                "Server offers no supported AUTH mechanism",
            ));
        };

        tracing::debug!(host = %self.host, %method, "authenticating");

        match method {
            AuthMethod::Plain => {
                let response = self
                    .send_command(&SmtpCommand::Auth {
                        mechanism: "PLAIN".to_string(),
                        initial_response: Some(auth::plain_initial_response(&username, &password)),
                    })
                    .await?;
                if response.code != codes::AUTH_SUCCESS {
                    return Err(response.to_error());
                }
            }
            AuthMethod::Login => {
                let response = self
                    .send_command(&SmtpCommand::Auth {
                        mechanism: "LOGIN".to_string(),
                        initial_response: None,
                    })
                    .await?;
                if response.code != codes::AUTH_CONTINUE {
                    return Err(response.to_error());
                }

                self.send_line(&auth::login_username(&username)).await?;
                let response = self.read_response().await?;
                if response.code != codes::AUTH_CONTINUE {
                    return Err(response.to_error());
                }

                self.send_line(&auth::login_password(&password)).await?;
                let response = self.read_response().await?;
                if response.code != codes::AUTH_SUCCESS {
                    return Err(response.to_error());
                }
            }
        }

        Ok(())
    }

    /// Sends a command and reads the reply.
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse> {
        tracing::debug!(command = %command_for_log(command), "sending SMTP command");
        self.send_line(&command.to_smtp_string()).await?;
        self.read_response().await
    }

    /// Sends one CRLF-terminated line.
    async fn send_line(&mut self, line: &str) -> MailResult<()> {
        let data = format!("{}\r\n", line);
        self.send_raw(data.as_bytes()).await
    }

    /// Writes raw bytes with the command timeout.
    async fn send_raw(&mut self, data: &[u8]) -> MailResult<()> {
        let command_timeout = self.command_timeout;
        match &mut self.stream {
            SessionStream::Plain(stream) => {
                write_all(stream.get_mut(), data, command_timeout).await
            }
            SessionStream::Tls(stream) => write_all(stream.get_mut(), data, command_timeout).await,
            SessionStream::Detached => Err(MailError::protocol("Session stream detached")),
        }
    }

    /// Reads one (possibly multiline) reply.
    async fn read_response(&mut self) -> MailResult<SmtpResponse> {
        let command_timeout = self.command_timeout;
        let response = match &mut self.stream {
            SessionStream::Plain(stream) => read_response_inner(stream, command_timeout).await?,
            SessionStream::Tls(stream) => read_response_inner(stream, command_timeout).await?,
            SessionStream::Detached => {
                return Err(MailError::protocol("Session stream detached"))
            }
        };

        tracing::debug!(code = response.code, message = %response.first_message(), "received SMTP reply");
        Ok(response)
    }

    /// Maps IO errors at connect time.
    fn map_io_error(error: io::Error, address: &str) -> MailError {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => MailError::new(
                MailErrorKind::ConnectionRefused,
                format!("Connection refused to {}", address),
            ),
            io::ErrorKind::TimedOut => {
                MailError::timeout(MailErrorKind::ConnectTimeout, "Connect timed out")
            }
            io::ErrorKind::ConnectionReset => MailError::new(
                MailErrorKind::ConnectionReset,
                "Connection reset by server",
            ),
            _ => MailError::connection(format!("Connection error: {}", error)),
        }
    }
}

#[async_trait]
impl Session for SmtpSession {
    async fn transmit(&mut self, envelope: &Envelope, content: &[u8]) -> MailResult<()> {
        let mail_from = SmtpCommand::MailFrom {
            address: envelope.from.to_smtp(),
            size: Some(content.len()),
        };

        let response = self.send_command(&mail_from).await?;
        if !response.is_success() {
            return Err(response.to_error());
        }

        for recipient in &envelope.recipients {
            let response = self
                .send_command(&SmtpCommand::RcptTo {
                    address: recipient.to_smtp(),
                })
                .await?;
            if !response.is_success() {
                // Abort the transaction so the connection stays usable for
                // a clean QUIT.
                let _ = self.send_command(&SmtpCommand::Rset).await;
                return Err(MailError::new(
                    MailErrorKind::RecipientRejected,
                    format!(
                        "Recipient {} rejected: {}",
                        recipient.email,
                        response.full_message()
                    ),
                )
                .with_smtp_code(response.code));
            }
        }

        let response = self.send_command(&SmtpCommand::Data).await?;
        if response.code != codes::START_MAIL_INPUT {
            return Err(response.to_error());
        }

        self.send_raw(content).await?;

        let response = self.read_response().await?;
        if !response.is_success() {
            return Err(response.to_error());
        }

        Ok(())
    }

    async fn close(&mut self) -> MailResult<()> {
        if !self.closed {
            let _ = self.send_command(&SmtpCommand::Quit).await;
            self.closed = true;
        }
        Ok(())
    }
}

/// Redacts AUTH payloads from command logs.
fn command_for_log(command: &SmtpCommand) -> String {
    match command {
        SmtpCommand::Auth { mechanism, .. } => format!("AUTH {} ***", mechanism),
        other => other.to_smtp_string(),
    }
}

/// Reads lines until a complete (possibly multiline) reply is assembled.
async fn read_response_inner<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    timeout_duration: Duration,
) -> MailResult<SmtpResponse> {
    let mut lines = Vec::new();

    loop {
        let mut line = String::new();

        let read = timeout(timeout_duration, reader.read_line(&mut line))
            .await
            .map_err(|_| MailError::timeout(MailErrorKind::ReadTimeout, "Read timed out"))?
            .map_err(|e| MailError::protocol(format!("Read error: {}", e)))?;

        if read == 0 {
            return Err(MailError::new(
                MailErrorKind::ConnectionReset,
                "Server closed connection",
            ));
        }

        let line = line.trim_end().to_string();

        // Continuation lines carry a hyphen after the code.
        let is_continuation = line.len() >= 4 && line.as_bytes()[3] == b'-';
        lines.push(line);

        if !is_continuation {
            break;
        }
    }

    SmtpResponse::parse(&lines)
}

/// Writes and flushes with the command timeout.
async fn write_all<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    timeout_duration: Duration,
) -> MailResult<()> {
    timeout(timeout_duration, writer.write_all(data))
        .await
        .map_err(|_| MailError::timeout(MailErrorKind::WriteTimeout, "Write timed out"))?
        .map_err(|e| MailError::protocol(format!("Write error: {}", e)))?;

    timeout(timeout_duration, writer.flush())
        .await
        .map_err(|_| MailError::timeout(MailErrorKind::WriteTimeout, "Flush timed out"))?
        .map_err(|e| MailError::protocol(format!("Flush error: {}", e)))?;

    Ok(())
}
