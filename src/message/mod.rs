//! Message model for the mail gateway.
//!
//! A `Message` is a builder-accumulated description of an email. Nothing is
//! validated at construction time; `Message::validate()` enforces the
//! dispatch invariants (sender present, at least one recipient, at least one
//! non-empty body part) and is called by the gateway before any transport
//! session is opened.

use std::collections::HashMap;
use std::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::{MailError, MailErrorKind, MailResult};

/// Email address with optional display name.
///
/// Parsing is lenient and never fails; shape validation happens at dispatch
/// via [`Address::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "Ana Doe").
    pub name: Option<String>,
    /// Email address (e.g., "ana@example.org").
    pub email: String,
}

impl Address {
    /// Creates a new address from a bare email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Creates a new address with a display name.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parses an address from a string (e.g., "Ana Doe <ana@example.org>").
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
            if start < end {
                let name = s[..start].trim().trim_matches('"');
                let email = s[start + 1..end].trim();
                if name.is_empty() {
                    return Self::new(email);
                }
                return Self::with_name(name, email);
            }
        }

        Self::new(s)
    }

    /// Parses a comma-separated list of addresses, skipping empty entries.
    pub fn parse_list(s: &str) -> Vec<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Validates the address shape against RFC 5321 limits.
    pub fn validate(&self, kind: MailErrorKind) -> MailResult<()> {
        let email = &self.email;

        if email.is_empty() {
            return Err(MailError::message_error(kind, "Email address cannot be empty"));
        }

        if email.len() > 254 {
            return Err(MailError::message_error(
                kind,
                "Email address too long (max 254 characters)",
            ));
        }

        let at_count = email.chars().filter(|c| *c == '@').count();
        if at_count != 1 {
            return Err(MailError::message_error(
                kind,
                format!("Email address must contain exactly one @: {}", email),
            ));
        }

        let (local, domain) = email.split_once('@').unwrap_or(("", ""));

        if local.is_empty() || local.len() > 64 {
            return Err(MailError::message_error(
                kind,
                format!("Local part must be 1-64 characters: {}", email),
            ));
        }

        if domain.is_empty() {
            return Err(MailError::message_error(
                kind,
                format!("Domain cannot be empty: {}", email),
            ));
        }

        if email.chars().any(|c| c.is_control()) {
            return Err(MailError::message_error(
                kind,
                "Email address cannot contain control characters",
            ));
        }

        Ok(())
    }

    /// Formats the address for SMTP MAIL FROM/RCPT TO commands.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }

    /// Formats the address for message headers.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) => {
                if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') {
                    format!("\"{}\" <{}>", name, self.email)
                } else {
                    format!("{} <{}>", name, self.email)
                }
            }
            None => self.email.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::parse(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address::parse(&s)
    }
}

/// File attachment: name, content type, and byte content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename shown to the recipient.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Binary content.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates a new attachment with an explicit content type.
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Creates an attachment with the content type guessed from the filename.
    pub fn from_file(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();
        Self::new(filename, content_type, data)
    }
}

/// Complete mail message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Sender address. May be absent until dispatch if the configuration
    /// carries a default sender.
    pub from: Option<Address>,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// CC recipients.
    pub cc: Vec<Address>,
    /// BCC recipients.
    pub bcc: Vec<Address>,
    /// Reply-to address.
    pub reply_to: Option<Address>,
    /// Subject line.
    pub subject: String,
    /// Plain text part.
    pub text: Option<String>,
    /// HTML part.
    pub html: Option<String>,
    /// Ordered attachments.
    pub attachments: Vec<Attachment>,
    /// Additional headers.
    pub headers: HashMap<String, String>,
    /// Message ID (generated at encoding time if not set).
    pub message_id: Option<String>,
}

impl Message {
    /// Creates a new message builder.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Returns all recipients (to + cc + bcc) in envelope order.
    pub fn all_recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Returns the count of all recipients.
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Returns true if the message has both text and HTML parts.
    pub fn is_multipart_alternative(&self) -> bool {
        self.has_text() && self.has_html()
    }

    /// Returns true if the text part is present and non-empty.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Returns true if the HTML part is present and non-empty.
    pub fn has_html(&self) -> bool {
        self.html.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// Checks the dispatch invariants.
    ///
    /// Requires a valid sender, at least one valid recipient, and at least
    /// one non-empty body part. An empty-string part counts as absent.
    pub fn validate(&self) -> MailResult<()> {
        let from = self.from.as_ref().ok_or_else(|| {
            MailError::message_error(MailErrorKind::InvalidSender, "Sender address is required")
        })?;
        from.validate(MailErrorKind::InvalidSender)?;

        if self.recipient_count() == 0 {
            return Err(MailError::message_error(
                MailErrorKind::InvalidRecipient,
                "At least one recipient is required",
            ));
        }

        for recipient in self.all_recipients() {
            recipient.validate(MailErrorKind::InvalidRecipient)?;
        }

        if !self.has_text() && !self.has_html() {
            return Err(MailError::message_error(
                MailErrorKind::MissingBody,
                "Message body is required (text or HTML part)",
            ));
        }

        Ok(())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self
            .from
            .as_ref()
            .map(|a| a.email.clone())
            .unwrap_or_default();
        let to: Vec<&str> = self.to.iter().map(|a| a.email.as_str()).collect();
        write!(
            f,
            "from=[{}] to=[{}] subject=[{}]",
            from,
            to.join(","),
            self.subject
        )
    }
}

/// Builder for mail messages.
///
/// Accumulates fields without validating them; invalid input surfaces as
/// `InvalidMessage` at dispatch time, never here.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Sets the sender address.
    pub fn from(mut self, address: impl Into<Address>) -> Self {
        self.message.from = Some(address.into());
        self
    }

    /// Adds a primary recipient.
    pub fn to(mut self, address: impl Into<Address>) -> Self {
        self.message.to.push(address.into());
        self
    }

    /// Adds primary recipients from a comma-separated list.
    pub fn to_list(mut self, addresses: &str) -> Self {
        self.message.to.extend(Address::parse_list(addresses));
        self
    }

    /// Adds a CC recipient.
    pub fn cc(mut self, address: impl Into<Address>) -> Self {
        self.message.cc.push(address.into());
        self
    }

    /// Adds CC recipients from a comma-separated list.
    pub fn cc_list(mut self, addresses: &str) -> Self {
        self.message.cc.extend(Address::parse_list(addresses));
        self
    }

    /// Adds a BCC recipient.
    pub fn bcc(mut self, address: impl Into<Address>) -> Self {
        self.message.bcc.push(address.into());
        self
    }

    /// Adds BCC recipients from a comma-separated list.
    pub fn bcc_list(mut self, addresses: &str) -> Self {
        self.message.bcc.extend(Address::parse_list(addresses));
        self
    }

    /// Sets the reply-to address.
    pub fn reply_to(mut self, address: impl Into<Address>) -> Self {
        self.message.reply_to = Some(address.into());
        self
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = subject.into();
        self
    }

    /// Sets the plain text part.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.message.text = Some(text.into());
        self
    }

    /// Sets the HTML part.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.message.html = Some(html.into());
        self
    }

    /// Adds an attachment.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.message.attachments.push(attachment);
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the message ID.
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message.message_id = Some(id.into());
        self
    }

    /// Finishes building. Infallible; invariants are checked at dispatch.
    pub fn build(self) -> Message {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_address_parse() {
        let addr = Address::parse("test@example.com");
        assert_eq!(addr.email, "test@example.com");
        assert!(addr.name.is_none());

        let addr = Address::parse("Ana Doe <ana@example.org>");
        assert_eq!(addr.email, "ana@example.org");
        assert_eq!(addr.name, Some("Ana Doe".to_string()));

        let addr = Address::parse("\"Doe, Ana\" <ana@example.org>");
        assert_eq!(addr.email, "ana@example.org");
        assert_eq!(addr.name, Some("Doe, Ana".to_string()));
    }

    #[test]
    fn test_address_parse_list() {
        let list = Address::parse_list("a@x.org, b@y.org,, c@z.org");
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].email, "a@x.org");
        assert_eq!(list[2].email, "c@z.org");

        assert!(Address::parse_list("").is_empty());
        assert!(Address::parse_list(" , ").is_empty());
    }

    #[rstest]
    #[case("test@example.com", true)]
    #[case("test.name@sub.example.com", true)]
    #[case("", false)]
    #[case("no-at-sign", false)]
    #[case("two@@signs.com", false)]
    #[case("@no-local.com", false)]
    #[case("no-domain@", false)]
    fn test_address_validation(#[case] email: &str, #[case] valid: bool) {
        let result = Address::new(email).validate(MailErrorKind::InvalidSender);
        assert_eq!(result.is_ok(), valid, "email: {:?}", email);
    }

    #[test]
    fn test_builder_accumulates_without_validation() {
        // Builder never rejects; validation happens at dispatch.
        let message = Message::builder()
            .from("not-an-address")
            .to("also-not-an-address")
            .build();

        assert!(message.validate().is_err());
    }

    #[test]
    fn test_valid_message() {
        let message = Message::builder()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Test")
            .text("Hello!")
            .build();

        assert!(message.validate().is_ok());
        assert_eq!(message.recipient_count(), 1);
        assert_eq!(message.subject, "Test");
    }

    #[test]
    fn test_validate_missing_fields() {
        // Missing sender
        let message = Message::builder()
            .to("test@example.com")
            .text("Hello")
            .build();
        assert_eq!(
            message.validate().unwrap_err().kind(),
            MailErrorKind::InvalidSender
        );

        // Missing recipients
        let message = Message::builder()
            .from("test@example.com")
            .text("Hello")
            .build();
        assert_eq!(
            message.validate().unwrap_err().kind(),
            MailErrorKind::InvalidRecipient
        );

        // Missing body
        let message = Message::builder()
            .from("test@example.com")
            .to("test@example.com")
            .build();
        assert_eq!(
            message.validate().unwrap_err().kind(),
            MailErrorKind::MissingBody
        );

        // Empty-string parts count as absent
        let message = Message::builder()
            .from("test@example.com")
            .to("test@example.com")
            .text("")
            .html("")
            .build();
        assert_eq!(
            message.validate().unwrap_err().kind(),
            MailErrorKind::MissingBody
        );
    }

    #[test]
    fn test_all_recipients_order() {
        let message = Message::builder()
            .from("s@x.org")
            .to("to@x.org")
            .cc("cc@x.org")
            .bcc("bcc@x.org")
            .text("hi")
            .build();

        let emails: Vec<&str> = message.all_recipients().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, vec!["to@x.org", "cc@x.org", "bcc@x.org"]);
    }

    #[test]
    fn test_attachment_content_type_guess() {
        let attachment = Attachment::from_file("report.pdf", vec![1, 2, 3]);
        assert_eq!(attachment.content_type, "application/pdf");

        let attachment = Attachment::from_file("unknown.zzz", vec![]);
        assert_eq!(attachment.content_type, "application/octet-stream");
    }
}
