//! SMTP protocol model: command formatting and reply parsing.
//!
//! Covers the RFC 5321 subset the dispatch path needs, including multiline
//! replies and EHLO capability parsing.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{MailError, MailResult};

/// SMTP commands issued by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO fallback.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// MAIL FROM command opening a transaction.
    MailFrom {
        /// Sender address in angle-bracket form.
        address: String,
        /// SIZE parameter (optional).
        size: Option<usize>,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address in angle-bracket form.
        address: String,
    },
    /// DATA command.
    Data,
    /// Reset the current transaction.
    Rset,
    /// No operation (keepalive).
    Noop,
    /// Quit the connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for the wire (without trailing CRLF).
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            SmtpCommand::MailFrom { address, size } => {
                let mut cmd = format!("MAIL FROM:{}", address);
                if let Some(s) = size {
                    cmd.push_str(&format!(" SIZE={}", s));
                }
                cmd
            }
            SmtpCommand::RcptTo { address } => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Rset => "RSET".to_string(),
            SmtpCommand::Noop => "NOOP".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_smtp_string())
    }
}

/// Server reply.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Reply code (e.g., 250, 354, 550).
    pub code: u16,
    /// Reply message lines.
    pub message: Vec<String>,
    /// Whether this was a multiline reply.
    pub is_multiline: bool,
}

impl SmtpResponse {
    /// Creates a single-line response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: vec![message.into()],
            is_multiline: false,
        }
    }

    /// Parses a reply from raw lines.
    pub fn parse(lines: &[String]) -> MailResult<Self> {
        if lines.is_empty() {
            return Err(MailError::protocol("Empty response"));
        }

        let mut messages = Vec::new();
        let mut code = 0u16;

        for (i, line) in lines.iter().enumerate() {
            // Never index: a hostile reply may put a multibyte character
            // where the code or separator is expected.
            let parsed_code: u16 = line
                .get(..3)
                .and_then(|code| code.parse().ok())
                .ok_or_else(|| MailError::protocol(format!("Invalid reply code: {}", line)))?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(MailError::protocol(
                    "Inconsistent reply codes in multiline response",
                ));
            }

            // The byte after the code must be a space or a continuation
            // hyphen when anything follows.
            let message = match line.as_bytes().get(3) {
                None => String::new(),
                Some(b' ') | Some(b'-') => line.get(4..).unwrap_or("").to_string(),
                Some(_) => {
                    return Err(MailError::protocol(format!(
                        "Invalid separator after reply code: {}",
                        line
                    )))
                }
            };
            messages.push(message);
        }

        Ok(Self {
            code,
            message: messages,
            is_multiline: lines.len() > 1,
        })
    }

    /// Returns true for a 2xx reply.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true for a 3xx intermediate reply.
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(String::as_str).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts a non-success reply into an error.
    pub fn to_error(&self) -> MailError {
        MailError::from_smtp_response(self.code, self.full_message())
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// Server capabilities advertised in the EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Maximum message size.
    pub size: Option<usize>,
    /// Supported authentication mechanisms.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// STARTTLS offered.
    pub starttls: bool,
    /// 8BITMIME supported.
    pub eight_bit_mime: bool,
    /// Raw capability strings.
    pub raw: Vec<String>,
}

impl Capabilities {
    /// Parses capabilities from an EHLO reply.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in &response.message {
            let line = line.trim().to_uppercase();
            caps.raw.push(line.clone());

            let (capability, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));

            match capability {
                "SIZE" => caps.size = params.parse().ok(),
                "AUTH" => {
                    for mech in params.split_whitespace() {
                        if let Some(method) = AuthMethod::from_capability(mech) {
                            caps.auth_mechanisms.insert(method);
                        }
                    }
                }
                "STARTTLS" => caps.starttls = true,
                "8BITMIME" => caps.eight_bit_mime = true,
                _ => {}
            }
        }

        caps
    }

    /// Returns true if any authentication mechanism is available.
    pub fn has_auth(&self) -> bool {
        !self.auth_mechanisms.is_empty()
    }
}

/// Reply codes for common operations.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Service unavailable.
    pub const SERVICE_UNAVAILABLE: u16 = 421;
    /// Authentication failed.
    pub const AUTH_FAILED: u16 = 535;
    /// Mailbox unavailable.
    pub const MAILBOX_UNAVAILABLE: u16 = 550;
    /// Message too big.
    pub const MESSAGE_TOO_BIG: u16 = 552;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_formatting() {
        assert_eq!(
            SmtpCommand::Ehlo("localhost".to_string()).to_smtp_string(),
            "EHLO localhost"
        );
        assert_eq!(SmtpCommand::StartTls.to_smtp_string(), "STARTTLS");
        assert_eq!(
            SmtpCommand::MailFrom {
                address: "<test@example.com>".to_string(),
                size: Some(1024),
            }
            .to_smtp_string(),
            "MAIL FROM:<test@example.com> SIZE=1024"
        );
        assert_eq!(
            SmtpCommand::RcptTo {
                address: "<to@example.com>".to_string(),
            }
            .to_smtp_string(),
            "RCPT TO:<to@example.com>"
        );
    }

    #[test]
    fn test_response_parse() {
        let lines = vec!["250 OK".to_string()];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_success());
        assert_eq!(response.first_message(), "OK");

        let lines = vec![
            "250-smtp.example.com Hello".to_string(),
            "250-SIZE 10485760".to_string(),
            "250 STARTTLS".to_string(),
        ];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_multiline);
        assert_eq!(response.message.len(), 3);
    }

    #[test]
    fn test_response_parse_errors() {
        assert!(SmtpResponse::parse(&[]).is_err());
        assert!(SmtpResponse::parse(&["xy".to_string()]).is_err());
        assert!(SmtpResponse::parse(&["abc hello".to_string()]).is_err());
        assert!(SmtpResponse::parse(&["250-a".to_string(), "354 b".to_string()]).is_err());
    }

    #[test]
    fn test_response_parse_multibyte_reply_is_error_not_panic() {
        // A multibyte character straddling the code/separator positions must
        // come back as a protocol error, never unwind.
        let err = SmtpResponse::parse(&["250\u{e9}".to_string()]).unwrap_err();
        assert_eq!(err.kind(), crate::errors::MailErrorKind::InvalidResponse);

        assert!(SmtpResponse::parse(&["25\u{e9} hello".to_string()]).is_err());
        assert!(SmtpResponse::parse(&["\u{e9}50 hello".to_string()]).is_err());
    }

    #[test]
    fn test_response_parse_separator() {
        // Only space or hyphen may follow the reply code.
        assert!(SmtpResponse::parse(&["250xOK".to_string()]).is_err());

        let response = SmtpResponse::parse(&["250".to_string()]).unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(response.first_message(), "");

        let response = SmtpResponse::parse(&["250-".to_string(), "250 ".to_string()]).unwrap();
        assert_eq!(response.message, vec!["", ""]);
    }

    #[test]
    fn test_capabilities_parse() {
        let response = SmtpResponse {
            code: 250,
            message: vec![
                "smtp.example.com".to_string(),
                "SIZE 10485760".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
                "STARTTLS".to_string(),
                "8BITMIME".to_string(),
            ],
            is_multiline: true,
        };

        let caps = Capabilities::from_ehlo_response(&response);
        assert_eq!(caps.size, Some(10_485_760));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::Plain));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::Login));
        assert!(caps.starttls);
        assert!(caps.eight_bit_mime);
        assert!(caps.has_auth());
    }
}
