//! The dispatch gateway: validate, connect, transmit, close.
//!
//! `Gateway::send` is the recovery boundary of the crate. It never returns
//! an error: every outcome, including transport faults, is reported as a
//! `DispatchResult` value carrying the failure kind, the phase that failed,
//! and a diagnostic. One send owns one exclusive session; nothing is
//! retried, pooled, or shared between calls.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{self, MailConfig};
use crate::errors::{FailureKind, MailError};
use crate::message::Message;
use crate::mime::MimeEncoder;
use crate::transport::{Envelope, Session, SmtpTransport, Transport};

/// Phase of a dispatch at which a failure occurred.
///
/// A send moves `Validating -> Connecting -> Sending -> Closed`; the
/// terminal state is carried by the `DispatchResult` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    /// Resolving configuration and checking message invariants.
    Validating,
    /// Opening the transport session.
    Connecting,
    /// Transmitting envelope and content.
    Sending,
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchPhase::Validating => write!(f, "validating"),
            DispatchPhase::Connecting => write!(f, "connecting"),
            DispatchPhase::Sending => write!(f, "sending"),
        }
    }
}

/// Details of a successful dispatch.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Client-generated message ID.
    pub message_id: String,
    /// Envelope recipient count.
    pub recipients: usize,
    /// Total dispatch duration.
    pub duration: Duration,
}

/// Details of a failed dispatch.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    /// Failure kind from the public taxonomy.
    pub kind: FailureKind,
    /// Phase at which the dispatch failed.
    pub phase: DispatchPhase,
    /// Human-readable diagnostic.
    pub diagnostic: String,
}

/// Outcome of one dispatch, always returned as data.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// The message was handed to the server.
    Delivered(Delivery),
    /// The dispatch failed cleanly.
    Failed(DispatchFailure),
}

impl DispatchResult {
    /// Returns true on success.
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchResult::Delivered(_))
    }

    /// Returns the failure details, if any.
    pub fn failure(&self) -> Option<&DispatchFailure> {
        match self {
            DispatchResult::Delivered(_) => None,
            DispatchResult::Failed(failure) => Some(failure),
        }
    }

    /// Returns the failure kind, if any.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(|f| f.kind)
    }

    /// Returns the diagnostic, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        self.failure().map(|f| f.diagnostic.as_str())
    }

    /// Scripting-facing sentinel: `0` for success, `-1` for any failure.
    ///
    /// All failure kinds collapse to the same sentinel at this outermost
    /// boundary; callers needing the kind inspect the result directly.
    pub fn status_code(&self) -> i32 {
        match self {
            DispatchResult::Delivered(_) => 0,
            DispatchResult::Failed(_) => -1,
        }
    }

    pub(crate) fn from_error(error: &MailError, phase: DispatchPhase) -> Self {
        DispatchResult::Failed(DispatchFailure {
            kind: error.failure_kind(),
            phase,
            diagnostic: error.to_string(),
        })
    }
}

/// Mail dispatch gateway.
///
/// Holds the transport collaborator and nothing else; safe to share across
/// tasks and invoke concurrently.
pub struct Gateway {
    transport: Arc<dyn Transport>,
}

impl Gateway {
    /// Creates a gateway over the real SMTP transport.
    pub fn new() -> Self {
        Self::with_transport(Arc::new(SmtpTransport::new()))
    }

    /// Creates a gateway over a custom transport (e.g. a mock).
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Dispatches one message.
    ///
    /// Resolves configuration (explicit beats the process default), checks
    /// the message invariants before any network call, then performs one
    /// open/transmit/close sequence. The session is closed even when the
    /// transmit fails.
    pub async fn send(&self, message: &Message, explicit: Option<&MailConfig>) -> DispatchResult {
        let start = Instant::now();

        // Validating
        let config = match config::resolve(explicit) {
            Ok(config) => config,
            Err(error) => {
                tracing::error!(%error, "dispatch failed resolving configuration");
                return DispatchResult::from_error(&error, DispatchPhase::Validating);
            }
        };

        let mut message = apply_config_defaults(message, &config);

        if let Err(error) = message.validate() {
            tracing::error!(%error, message = %message, "dispatch rejected invalid message");
            return DispatchResult::from_error(&error, DispatchPhase::Validating);
        }

        // validate() guarantees the sender is present.
        let from = match message.from.clone() {
            Some(from) => from,
            None => {
                let error = MailError::message_error(
                    crate::errors::MailErrorKind::InvalidSender,
                    "Sender address is required",
                );
                return DispatchResult::from_error(&error, DispatchPhase::Validating);
            }
        };

        let encoder = MimeEncoder::new(config.host.as_str());

        // Stamp the ID before encoding so the Message-ID header and the
        // delivery report agree.
        let message_id = match &message.message_id {
            Some(id) => id.clone(),
            None => {
                let id = encoder.generate_message_id();
                message.to_mut().message_id = Some(id.clone());
                id
            }
        };

        let encoded = match encoder.encode(&message) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::error!(%error, message = %message, "dispatch failed encoding message");
                return DispatchResult::from_error(&error, DispatchPhase::Validating);
            }
        };
        let content = MimeEncoder::prepare_data_content(&encoded);

        let envelope = Envelope {
            from,
            recipients: message.all_recipients().cloned().collect(),
        };

        // Connecting
        let mut session = match self.transport.open(&config).await {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(%error, host = %config.host, "dispatch failed opening session");
                return DispatchResult::from_error(&error, DispatchPhase::Connecting);
            }
        };

        // Sending
        let transmit_result = session.transmit(&envelope, &content).await;

        // The session is closed on both paths; a close failure after a
        // successful transmit does not fail the dispatch.
        close_session(&mut session).await;

        match transmit_result {
            Ok(()) => {
                let delivery = Delivery {
                    message_id,
                    recipients: envelope.recipients.len(),
                    duration: start.elapsed(),
                };
                tracing::debug!(
                    message_id = %delivery.message_id,
                    recipients = delivery.recipients,
                    "message dispatched"
                );
                DispatchResult::Delivered(delivery)
            }
            Err(error) => {
                tracing::error!(%error, message = %message, "dispatch failed transmitting");
                DispatchResult::from_error(&error, DispatchPhase::Sending)
            }
        }
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Fills message fields the configuration provides defaults for.
fn apply_config_defaults<'a>(message: &'a Message, config: &MailConfig) -> Cow<'a, Message> {
    if message.from.is_none() && config.from.is_some() {
        let mut filled = message.clone();
        filled.from = config.from.clone();
        return Cow::Owned(filled);
    }
    Cow::Borrowed(message)
}

async fn close_session(session: &mut Box<dyn Session>) {
    if let Err(error) = session.close().await {
        tracing::warn!(%error, "failed to close transport session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{MailError, MailErrorKind, TransportFailure};
    use crate::mocks::{test_config, test_message, MockTransport};
    use crate::message::Message;

    fn mock_gateway() -> (Gateway, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let gateway = Gateway::with_transport(Arc::clone(&transport) as Arc<dyn Transport>);
        (gateway, transport)
    }

    #[tokio::test]
    async fn test_send_success_sequence() {
        let (gateway, transport) = mock_gateway();
        let recorder = transport.recorder();

        let result = gateway.send(&test_message(), Some(&test_config())).await;

        assert!(result.is_success());
        assert_eq!(result.status_code(), 0);
        assert_eq!(recorder.open_count(), 1);
        assert_eq!(recorder.transmit_count(), 1);
        assert_eq!(recorder.close_count(), 1);

        let envelope = recorder.last_envelope().unwrap();
        assert_eq!(envelope.from.email, "sender@example.com");
        assert_eq!(envelope.recipients.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_body_rejected_without_transport() {
        let (gateway, transport) = mock_gateway();
        let recorder = transport.recorder();

        let message = Message::builder()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("no body")
            .build();

        let result = gateway.send(&message, Some(&test_config())).await;

        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidMessage));
        assert_eq!(result.failure().unwrap().phase, DispatchPhase::Validating);
        assert_eq!(recorder.open_count(), 0);
        assert_eq!(recorder.transmit_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_sender_and_recipients_rejected() {
        let (gateway, transport) = mock_gateway();
        let recorder = transport.recorder();

        let message = Message::builder().text("body").build();
        let result = gateway.send(&message, Some(&test_config())).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidMessage));

        let message = Message::builder().from("a@x.org").text("body").build();
        let result = gateway.send(&message, Some(&test_config())).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidMessage));

        assert_eq!(recorder.open_count(), 0);
    }

    #[tokio::test]
    async fn test_configuration_missing() {
        // No explicit config, and the test process never installs a default.
        let (gateway, transport) = mock_gateway();
        let recorder = transport.recorder();

        let result = gateway.send(&test_message(), None).await;

        assert_eq!(
            result.failure_kind(),
            Some(FailureKind::ConfigurationMissing)
        );
        assert_eq!(result.status_code(), -1);
        assert!(!result.diagnostic().unwrap().is_empty());
        assert_eq!(recorder.open_count(), 0);
    }

    #[tokio::test]
    async fn test_transmit_failure_still_closes_session() {
        let (gateway, transport) = mock_gateway();
        let recorder = transport.recorder();

        transport.fail_next_transmit(MailError::from_smtp_response(554, "Transaction failed"));

        let result = gateway.send(&test_message(), Some(&test_config())).await;

        let failure = result.failure().unwrap();
        assert!(matches!(failure.kind, FailureKind::Transport(_)));
        assert_eq!(failure.phase, DispatchPhase::Sending);
        assert!(!failure.diagnostic.is_empty());

        assert_eq!(recorder.open_count(), 1);
        assert_eq!(recorder.transmit_count(), 1);
        // close still invoked: no leaked session
        assert_eq!(recorder.close_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (gateway, transport) = mock_gateway();
        let recorder = transport.recorder();

        transport.fail_next_open(MailError::connection("Connection refused to smtp:587"));

        let result = gateway.send(&test_message(), Some(&test_config())).await;

        assert_eq!(
            result.failure_kind(),
            Some(FailureKind::Transport(TransportFailure::Connect))
        );
        assert_eq!(result.failure().unwrap().phase, DispatchPhase::Connecting);
        assert_eq!(recorder.transmit_count(), 0);
        assert_eq!(recorder.close_count(), 0);
    }

    #[tokio::test]
    async fn test_recipient_rejection_surfaced() {
        let (gateway, transport) = mock_gateway();

        transport.fail_next_transmit(
            MailError::new(MailErrorKind::RecipientRejected, "Recipient rejected")
                .with_smtp_code(550),
        );

        let result = gateway.send(&test_message(), Some(&test_config())).await;
        assert_eq!(
            result.failure_kind(),
            Some(FailureKind::Transport(TransportFailure::RecipientRejected))
        );
    }

    #[tokio::test]
    async fn test_default_sender_from_config() {
        let (gateway, transport) = mock_gateway();
        let recorder = transport.recorder();

        let config = MailConfig::builder()
            .host("smtp.example.com")
            .from("wiki@example.org")
            .build()
            .unwrap();

        let message = Message::builder()
            .to("recipient@example.com")
            .subject("defaults")
            .text("body")
            .build();

        let result = gateway.send(&message, Some(&config)).await;
        assert!(result.is_success());
        assert_eq!(
            recorder.last_envelope().unwrap().from.email,
            "wiki@example.org"
        );
    }

    #[tokio::test]
    async fn test_envelope_includes_bcc() {
        let (gateway, transport) = mock_gateway();
        let recorder = transport.recorder();

        let message = Message::builder()
            .from("s@x.org")
            .to("to@x.org")
            .cc("cc@x.org")
            .bcc("bcc@x.org")
            .subject("env")
            .text("body")
            .build();

        gateway.send(&message, Some(&test_config())).await;

        let envelope = recorder.last_envelope().unwrap();
        let emails: Vec<&str> = envelope.recipients.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, vec!["to@x.org", "cc@x.org", "bcc@x.org"]);

        // Content must not reveal the BCC recipient.
        let (_, content) = recorder.transmitted().pop().unwrap();
        assert!(!String::from_utf8_lossy(&content).contains("bcc@x.org"));
    }

    #[tokio::test]
    async fn test_delivery_reports_message_id() {
        let (gateway, _transport) = mock_gateway();

        let mut message = test_message();
        message.message_id = Some("fixed-id@example.com".to_string());

        match gateway.send(&message, Some(&test_config())).await {
            DispatchResult::Delivered(delivery) => {
                assert_eq!(delivery.message_id, "fixed-id@example.com");
                assert_eq!(delivery.recipients, 1);
            }
            DispatchResult::Failed(failure) => panic!("unexpected failure: {:?}", failure),
        }
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_independent() {
        let (gateway, transport) = mock_gateway();
        let recorder = transport.recorder();
        let gateway = Arc::new(gateway);
        let config = Arc::new(test_config());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gateway = Arc::clone(&gateway);
            let config = Arc::clone(&config);
            handles.push(tokio::spawn(async move {
                gateway.send(&test_message(), Some(&config)).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }
        assert_eq!(recorder.open_count(), 8);
        assert_eq!(recorder.close_count(), 8);
    }
}
