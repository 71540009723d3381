//! Mock transport and message fixtures for testing.
//!
//! The mock records every open/transmit/close call so tests can assert the
//! exact session sequence a dispatch produced, and supports programmed
//! failures at either the open or the transmit step.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::MailConfig;
use crate::errors::{MailError, MailResult};
use crate::message::{Attachment, Message};
use crate::transport::{Envelope, Session, Transport};

/// Shared call recorder for a mock transport and its sessions.
#[derive(Debug, Default)]
pub struct MockRecorder {
    opens: AtomicUsize,
    transmits: AtomicUsize,
    closes: AtomicUsize,
    transmitted: Mutex<Vec<(Envelope, Vec<u8>)>>,
}

impl MockRecorder {
    /// Number of sessions opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of transmit calls (including failed ones).
    pub fn transmit_count(&self) -> usize {
        self.transmits.load(Ordering::SeqCst)
    }

    /// Number of close calls.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Returns the envelopes and contents successfully transmitted.
    pub fn transmitted(&self) -> Vec<(Envelope, Vec<u8>)> {
        self.transmitted.lock().unwrap().clone()
    }

    /// Returns the last transmitted envelope, if any.
    pub fn last_envelope(&self) -> Option<Envelope> {
        self.transmitted
            .lock()
            .unwrap()
            .last()
            .map(|(envelope, _)| envelope.clone())
    }
}

/// Mock transport with programmable failures.
#[derive(Debug, Default)]
pub struct MockTransport {
    recorder: Arc<MockRecorder>,
    fail_open: Mutex<Option<MailError>>,
    fail_transmit: Arc<Mutex<Option<MailError>>>,
}

impl MockTransport {
    /// Creates a transport that accepts every send.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared call recorder.
    pub fn recorder(&self) -> Arc<MockRecorder> {
        Arc::clone(&self.recorder)
    }

    /// Programs the next open to fail.
    pub fn fail_next_open(&self, error: MailError) {
        *self.fail_open.lock().unwrap() = Some(error);
    }

    /// Programs the next transmit to fail.
    pub fn fail_next_transmit(&self, error: MailError) {
        *self.fail_transmit.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _config: &MailConfig) -> MailResult<Box<dyn Session>> {
        if let Some(error) = self.fail_open.lock().unwrap().take() {
            return Err(error);
        }

        self.recorder.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            recorder: Arc::clone(&self.recorder),
            fail_transmit: Arc::clone(&self.fail_transmit),
        }))
    }
}

/// Session handed out by `MockTransport`.
#[derive(Debug)]
pub struct MockSession {
    recorder: Arc<MockRecorder>,
    fail_transmit: Arc<Mutex<Option<MailError>>>,
}

#[async_trait]
impl Session for MockSession {
    async fn transmit(&mut self, envelope: &Envelope, content: &[u8]) -> MailResult<()> {
        self.recorder.transmits.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.fail_transmit.lock().unwrap().take() {
            return Err(error);
        }

        self.recorder
            .transmitted
            .lock()
            .unwrap()
            .push((envelope.clone(), content.to_vec()));
        Ok(())
    }

    async fn close(&mut self) -> MailResult<()> {
        self.recorder.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Creates a minimal valid configuration for tests.
pub fn test_config() -> MailConfig {
    MailConfig::builder()
        .host("smtp.example.com")
        .build()
        .expect("test config")
}

/// Creates a minimal valid text message.
pub fn test_message() -> Message {
    Message::builder()
        .from("sender@example.com")
        .to("recipient@example.com")
        .subject("Test Subject")
        .text("Test body")
        .build()
}

/// Creates a message with both text and HTML parts.
pub fn test_message_html() -> Message {
    Message::builder()
        .from("sender@example.com")
        .to("recipient@example.com")
        .subject("Test Subject")
        .text("Plain text version")
        .html("<html><body><h1>HTML version</h1></body></html>")
        .build()
}

/// Creates a message with an attachment.
pub fn test_message_with_attachment() -> Message {
    Message::builder()
        .from("sender@example.com")
        .to("recipient@example.com")
        .subject("Test with Attachment")
        .text("See attached")
        .attachment(Attachment::new(
            "test.txt",
            "text/plain",
            b"Hello, World!".to_vec(),
        ))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MailErrorKind;
    use crate::message::Address;

    #[tokio::test]
    async fn test_mock_records_sequence() {
        let transport = MockTransport::new();
        let recorder = transport.recorder();

        let mut session = transport.open(&test_config()).await.unwrap();
        let envelope = Envelope {
            from: Address::new("a@x.org"),
            recipients: vec![Address::new("b@y.org")],
        };
        session.transmit(&envelope, b"content").await.unwrap();
        session.close().await.unwrap();

        assert_eq!(recorder.open_count(), 1);
        assert_eq!(recorder.transmit_count(), 1);
        assert_eq!(recorder.close_count(), 1);
        assert_eq!(recorder.last_envelope().unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_mock_programmed_failures() {
        let transport = MockTransport::new();
        transport.fail_next_open(MailError::connection("refused"));
        assert!(transport.open(&test_config()).await.is_err());

        // The failure is consumed; the next open succeeds.
        assert!(transport.open(&test_config()).await.is_ok());

        transport.fail_next_transmit(MailError::new(
            MailErrorKind::UnexpectedResponse,
            "554 rejected",
        ));
        let mut session = transport.open(&test_config()).await.unwrap();
        let envelope = Envelope {
            from: Address::new("a@x.org"),
            recipients: vec![Address::new("b@y.org")],
        };
        assert!(session.transmit(&envelope, b"content").await.is_err());
    }

    #[test]
    fn test_fixtures_are_valid() {
        assert!(test_message().validate().is_ok());
        assert!(test_message_html().validate().is_ok());
        assert!(test_message_with_attachment().validate().is_ok());
    }
}
