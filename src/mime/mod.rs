//! MIME encoding of messages.
//!
//! Produces RFC 5322 output: RFC 2047 header encoding, quoted-printable
//! bodies, base64 attachments, multipart/alternative for text+html and
//! multipart/mixed when attachments are present, plus dot-stuffing for the
//! DATA phase.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::message::{Attachment, Message};

/// Content types emitted by the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    /// Plain text.
    TextPlain,
    /// HTML content.
    TextHtml,
    /// Alternative representations (text + HTML).
    MultipartAlternative(String),
    /// Body plus attachments.
    MultipartMixed(String),
}

impl ContentType {
    /// Returns the MIME type string for the Content-Type header.
    pub fn mime_type(&self) -> String {
        match self {
            ContentType::TextPlain => "text/plain; charset=utf-8".to_string(),
            ContentType::TextHtml => "text/html; charset=utf-8".to_string(),
            ContentType::MultipartAlternative(boundary) => {
                format!("multipart/alternative; boundary=\"{}\"", boundary)
            }
            ContentType::MultipartMixed(boundary) => {
                format!("multipart/mixed; boundary=\"{}\"", boundary)
            }
        }
    }
}

/// MIME encoder for mail messages.
pub struct MimeEncoder {
    date: DateTime<Utc>,
    domain: String,
}

impl MimeEncoder {
    /// Creates a new encoder; `domain` is used for generated message IDs.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            domain: domain.into(),
        }
    }

    /// Encodes a message to RFC 5322 format.
    ///
    /// The caller is expected to have validated the message; a message with
    /// no body parts encodes as an empty text part.
    pub fn encode(&self, message: &Message) -> MailResult<Vec<u8>> {
        let mut output = Vec::new();

        let message_id = message
            .message_id
            .clone()
            .unwrap_or_else(|| self.generate_message_id());

        self.write_header(&mut output, "Date", &self.format_date())?;
        if let Some(from) = &message.from {
            self.write_header(&mut output, "From", &from.to_header())?;
        }

        if !message.to.is_empty() {
            let to_list: Vec<String> = message.to.iter().map(|a| a.to_header()).collect();
            self.write_header(&mut output, "To", &to_list.join(", "))?;
        }

        if !message.cc.is_empty() {
            let cc_list: Vec<String> = message.cc.iter().map(|a| a.to_header()).collect();
            self.write_header(&mut output, "Cc", &cc_list.join(", "))?;
        }

        // BCC recipients appear in the envelope only, never in headers.

        if let Some(reply_to) = &message.reply_to {
            self.write_header(&mut output, "Reply-To", &reply_to.to_header())?;
        }

        self.write_header(&mut output, "Subject", &self.encode_header(&message.subject))?;
        self.write_header(&mut output, "Message-ID", &format!("<{}>", message_id))?;

        for (name, value) in &message.headers {
            self.write_header(&mut output, name, &self.encode_header(value))?;
        }

        self.write_header(&mut output, "MIME-Version", "1.0")?;

        if message.attachments.is_empty() {
            self.write_body(&mut output, message)?;
        } else {
            let mixed_boundary = self.generate_boundary();
            self.write_header(
                &mut output,
                "Content-Type",
                &ContentType::MultipartMixed(mixed_boundary.clone()).mime_type(),
            )?;
            output.extend_from_slice(b"\r\n");

            output.extend_from_slice(format!("--{}\r\n", mixed_boundary).as_bytes());
            self.write_body(&mut output, message)?;
            output.extend_from_slice(b"\r\n");

            for attachment in &message.attachments {
                output.extend_from_slice(format!("--{}\r\n", mixed_boundary).as_bytes());
                self.write_attachment(&mut output, attachment)?;
            }

            output.extend_from_slice(format!("--{}--\r\n", mixed_boundary).as_bytes());
        }

        Ok(output)
    }

    /// Writes the body: alternative parts when both text and HTML are set,
    /// otherwise a single part.
    fn write_body(&self, output: &mut Vec<u8>, message: &Message) -> MailResult<()> {
        if message.is_multipart_alternative() {
            let alt_boundary = self.generate_boundary();
            self.write_header(
                output,
                "Content-Type",
                &ContentType::MultipartAlternative(alt_boundary.clone()).mime_type(),
            )?;
            output.extend_from_slice(b"\r\n");

            // Alternative parts in increasing order of preference: text first.
            output.extend_from_slice(format!("--{}\r\n", alt_boundary).as_bytes());
            self.write_text_part(output, ContentType::TextPlain, message.text.as_deref().unwrap_or(""))?;
            output.extend_from_slice(format!("--{}\r\n", alt_boundary).as_bytes());
            self.write_text_part(output, ContentType::TextHtml, message.html.as_deref().unwrap_or(""))?;
            output.extend_from_slice(format!("--{}--\r\n", alt_boundary).as_bytes());
        } else if message.has_html() {
            self.write_text_part(output, ContentType::TextHtml, message.html.as_deref().unwrap_or(""))?;
        } else {
            self.write_text_part(output, ContentType::TextPlain, message.text.as_deref().unwrap_or(""))?;
        }

        Ok(())
    }

    /// Writes a single quoted-printable text part.
    fn write_text_part(
        &self,
        output: &mut Vec<u8>,
        content_type: ContentType,
        body: &str,
    ) -> MailResult<()> {
        self.write_header(output, "Content-Type", &content_type.mime_type())?;
        self.write_header(output, "Content-Transfer-Encoding", "quoted-printable")?;
        output.extend_from_slice(b"\r\n");
        output.extend_from_slice(&quoted_printable::encode(body.as_bytes()));
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Writes a base64 attachment part.
    fn write_attachment(&self, output: &mut Vec<u8>, attachment: &Attachment) -> MailResult<()> {
        self.write_header(
            output,
            "Content-Type",
            &format!("{}; name=\"{}\"", attachment.content_type, attachment.filename),
        )?;
        self.write_header(output, "Content-Transfer-Encoding", "base64")?;
        self.write_header(
            output,
            "Content-Disposition",
            &format!("attachment; filename=\"{}\"", attachment.filename),
        )?;
        output.extend_from_slice(b"\r\n");

        let encoded = BASE64.encode(&attachment.data);
        for chunk in encoded.as_bytes().chunks(76) {
            output.extend_from_slice(chunk);
            output.extend_from_slice(b"\r\n");
        }

        Ok(())
    }

    /// Writes a folded header line.
    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> MailResult<()> {
        if name.chars().any(|c| c.is_control() || c == ':') {
            return Err(MailError::message_error(
                MailErrorKind::InvalidHeader,
                format!("Invalid header name: {}", name),
            ));
        }

        let header = format!("{}: {}", name, value);
        output.extend_from_slice(fold_header(&header).as_bytes());
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Encodes a header value using RFC 2047 when it is not printable ASCII.
    fn encode_header(&self, value: &str) -> String {
        if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
            return value.to_string();
        }

        format!("=?UTF-8?B?{}?=", BASE64.encode(value.as_bytes()))
    }

    /// Generates a unique message ID.
    pub fn generate_message_id(&self) -> String {
        format!("{}.{}@{}", Uuid::new_v4(), self.date.timestamp(), self.domain)
    }

    /// Generates a unique multipart boundary.
    fn generate_boundary(&self) -> String {
        format!("----=_Part_{}", Uuid::new_v4().simple())
    }

    /// Formats the Date header value.
    fn format_date(&self) -> String {
        self.date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
    }

    /// Prepares DATA content: dot-stuffing plus the terminating sequence.
    pub fn prepare_data_content(encoded: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(encoded.len() + 8);
        let mut at_line_start = true;

        for &byte in encoded {
            if at_line_start && byte == b'.' {
                output.push(b'.');
            }
            output.push(byte);
            at_line_start = byte == b'\n';
        }

        if !output.ends_with(b"\r\n") {
            if output.ends_with(b"\n") {
                output.pop();
            }
            output.extend_from_slice(b"\r\n");
        }

        output.extend_from_slice(b".\r\n");
        output
    }
}

impl Default for MimeEncoder {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Folds a header line at 78 characters with continuation indents.
fn fold_header(header: &str) -> String {
    if header.len() <= 78 {
        return header.to_string();
    }

    let mut result = String::new();
    let mut current_line = String::new();

    for word in header.split(' ') {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= 76 {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            result.push_str(&current_line);
            result.push_str("\r\n ");
            current_line = word.to_string();
        }
    }

    result.push_str(&current_line);
    result
}
