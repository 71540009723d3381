//! SMTP authentication: PLAIN (RFC 4616) and LOGIN.
//!
//! These are the mechanisms the gateway negotiates from configured
//! username/password credentials; both transmit the secret and therefore
//! prefer a TLS-protected session.

use std::fmt;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Authentication mechanisms supported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication (obsolete but widely deployed).
    Login,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
        }
    }

    /// Parses a mechanism from an EHLO capability token.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Builds the PLAIN initial response: base64("\0user\0password").
pub fn plain_initial_response(username: &str, password: &str) -> String {
    let payload = format!("\0{}\0{}", username, password);
    BASE64.encode(payload.as_bytes())
}

/// Encodes the username line for LOGIN.
pub fn login_username(username: &str) -> String {
    BASE64.encode(username.as_bytes())
}

/// Encodes the password line for LOGIN.
pub fn login_password(password: &str) -> String {
    BASE64.encode(password.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_initial_response() {
        let encoded = plain_initial_response("user", "pass");
        let decoded = BASE64.decode(encoded).unwrap();
        assert_eq!(decoded, b"\0user\0pass");
    }

    #[test]
    fn test_login_encoding() {
        assert_eq!(login_username("user"), BASE64.encode(b"user"));
        assert_eq!(login_password("pass"), BASE64.encode(b"pass"));
    }

    #[test]
    fn test_from_capability() {
        assert_eq!(AuthMethod::from_capability("plain"), Some(AuthMethod::Plain));
        assert_eq!(AuthMethod::from_capability("LOGIN"), Some(AuthMethod::Login));
        assert_eq!(AuthMethod::from_capability("CRAM-MD5"), None);
    }
}
