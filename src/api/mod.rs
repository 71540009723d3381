//! Scripting-oriented facade over the gateway.
//!
//! `MailSenderApi` bundles the gateway and a template renderer behind
//! coarse-grained operations (text, HTML, templated) suited to embedding in
//! a scripting host. Every operation returns a `DispatchResult`; scripts
//! that only care about success read `status_code()` (`0`/`-1`), richer
//! callers inspect the failure kind and diagnostic.

use std::sync::Arc;

use crate::config::MailConfig;
use crate::gateway::{DispatchPhase, DispatchResult, Gateway};
use crate::message::{Attachment, Message, MessageBuilder};
use crate::template::{InMemoryTemplateStore, RenderContext, TemplateRenderer, TemplateStore};
use crate::transport::Transport;

/// High-level mail sending API.
pub struct MailSenderApi<S = InMemoryTemplateStore> {
    gateway: Gateway,
    renderer: TemplateRenderer<S>,
    config: Option<MailConfig>,
}

impl MailSenderApi<InMemoryTemplateStore> {
    /// Creates an API over the real SMTP transport with an empty in-memory
    /// template store using `en` as the base language.
    pub fn new() -> Self {
        Self::with_store(InMemoryTemplateStore::new("en"))
    }
}

impl Default for MailSenderApi<InMemoryTemplateStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TemplateStore> MailSenderApi<S> {
    /// Creates an API over the real SMTP transport and the given store.
    pub fn with_store(store: S) -> Self {
        Self {
            gateway: Gateway::new(),
            renderer: TemplateRenderer::new(store),
            config: None,
        }
    }

    /// Creates an API over a custom transport (e.g. a mock).
    pub fn with_transport(transport: Arc<dyn Transport>, store: S) -> Self {
        Self {
            gateway: Gateway::with_transport(transport),
            renderer: TemplateRenderer::new(store),
            config: None,
        }
    }

    /// Sets the configuration this API uses for every send.
    ///
    /// Without one, sends fall back to the process default configuration.
    pub fn with_config(mut self, config: MailConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Returns a builder for composing a message field by field.
    pub fn create_message(&self) -> MessageBuilder {
        Message::builder()
    }

    /// Sends a plain text message.
    pub async fn send_text_message(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> DispatchResult {
        let message = Message::builder()
            .from(from)
            .to_list(to)
            .subject(subject)
            .text(body)
            .build();
        self.gateway.send(&message, self.config.as_ref()).await
    }

    /// Sends a plain text message with copy lists and attachments.
    /// Recipient arguments are comma-separated lists; empty strings mean
    /// none.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_text_message_with_attachments(
        &self,
        from: &str,
        to: &str,
        cc: &str,
        bcc: &str,
        subject: &str,
        body: &str,
        attachments: Vec<Attachment>,
    ) -> DispatchResult {
        let mut builder = Message::builder()
            .from(from)
            .to_list(to)
            .cc_list(cc)
            .bcc_list(bcc)
            .subject(subject)
            .text(body);
        for attachment in attachments {
            builder = builder.attachment(attachment);
        }
        self.gateway.send(&builder.build(), self.config.as_ref()).await
    }

    /// Sends an HTML message with an optional plain text alternative and
    /// attachments. Recipient arguments are comma-separated lists; empty
    /// strings mean none.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_html_message(
        &self,
        from: &str,
        to: &str,
        cc: &str,
        bcc: &str,
        subject: &str,
        html: &str,
        alternative: Option<&str>,
        attachments: Vec<Attachment>,
    ) -> DispatchResult {
        let mut builder = Message::builder()
            .from(from)
            .to_list(to)
            .cc_list(cc)
            .bcc_list(bcc)
            .subject(subject)
            .html(html);
        if let Some(text) = alternative {
            builder = builder.text(text);
        }
        for attachment in attachments {
            builder = builder.attachment(attachment);
        }
        self.gateway.send(&builder.build(), self.config.as_ref()).await
    }

    /// Renders a stored template and sends the result.
    ///
    /// The requested language falls back to the store's base language when
    /// no exact match exists. A render failure never reaches the transport.
    pub async fn send_message_from_template(
        &self,
        from: &str,
        to: &str,
        cc: &str,
        bcc: &str,
        language: &str,
        template_id: &str,
        context: &RenderContext,
    ) -> DispatchResult {
        let rendered = match self.renderer.render(template_id, language, context).await {
            Ok(rendered) => rendered,
            Err(error) => {
                tracing::error!(%error, template_id, language, "template dispatch failed");
                return DispatchResult::from_error(&error, DispatchPhase::Validating);
            }
        };

        let mut message = rendered;
        // The template may carry its own sender; an explicit one wins.
        if !from.is_empty() {
            message.from = Some(from.into());
        }
        message.to = crate::message::Address::parse_list(to);
        message.cc = crate::message::Address::parse_list(cc);
        message.bcc = crate::message::Address::parse_list(bcc);

        self.gateway.send(&message, self.config.as_ref()).await
    }

    /// Sends a pre-built message, with an optional per-call configuration
    /// overriding the API's own.
    pub async fn send(&self, message: &Message, config: Option<&MailConfig>) -> DispatchResult {
        self.gateway
            .send(message, config.or(self.config.as_ref()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use crate::mocks::MockTransport;
    use crate::template::TemplateSource;

    fn mock_api(store: InMemoryTemplateStore) -> (MailSenderApi, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let api = MailSenderApi::with_transport(Arc::clone(&transport) as Arc<dyn Transport>, store)
            .with_config(crate::mocks::test_config());
        (api, transport)
    }

    fn unconfigured_api() -> (MailSenderApi, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let api = MailSenderApi::with_transport(
            Arc::clone(&transport) as Arc<dyn Transport>,
            InMemoryTemplateStore::new("en"),
        );
        (api, transport)
    }

    fn welcome_store() -> InMemoryTemplateStore {
        let mut store = InMemoryTemplateStore::new("en");
        store.insert(
            "welcome",
            "en",
            TemplateSource {
                subject: "Welcome, {{name}}".to_string(),
                text: Some("Hello {{name}}, your account is ready.".to_string()),
                html: None,
                from: Some("noreply@example.org".into()),
            },
        );
        store.insert(
            "welcome",
            "fr",
            TemplateSource {
                subject: "Bienvenue, {{name}}".to_string(),
                text: Some("Bonjour {{name}}, votre compte est prêt.".to_string()),
                html: None,
                from: Some("noreply@example.org".into()),
            },
        );
        store
    }

    #[tokio::test]
    async fn test_send_text_message_without_config_fails_cleanly() {
        let (api, transport) = unconfigured_api();
        let recorder = transport.recorder();

        let result = api
            .send_text_message("a@x.org", "b@y.org", "hi", "body")
            .await;

        // No process default installed in tests.
        assert_eq!(result.status_code(), -1);
        assert_eq!(
            result.failure_kind(),
            Some(FailureKind::ConfigurationMissing)
        );
        assert_eq!(recorder.open_count(), 0);
    }

    #[tokio::test]
    async fn test_send_text_message_with_copies_and_attachment() {
        let (api, transport) = mock_api(InMemoryTemplateStore::new("en"));
        let recorder = transport.recorder();

        let result = api
            .send_text_message_with_attachments(
                "a@x.org",
                "to@x.org",
                "cc@x.org",
                "bcc@x.org",
                "report",
                "see attached",
                vec![Attachment::new("notes.txt", "text/plain", b"data".to_vec())],
            )
            .await;

        assert!(result.is_success());
        let envelope = recorder.last_envelope().unwrap();
        assert_eq!(envelope.recipients.len(), 3);

        let (_, content) = recorder.transmitted().pop().unwrap();
        let content = String::from_utf8_lossy(&content);
        assert!(content.contains("multipart/mixed"));
        assert!(content.contains("notes.txt"));
    }

    #[tokio::test]
    async fn test_send_with_explicit_config() {
        let (api, transport) = mock_api(InMemoryTemplateStore::new("en"));
        let recorder = transport.recorder();

        let message = api
            .create_message()
            .from("a@x.org")
            .to_list("b@y.org, c@z.org")
            .subject("hi")
            .text("body")
            .build();

        let result = api.send(&message, Some(&crate::mocks::test_config())).await;
        assert_eq!(result.status_code(), 0);
        assert_eq!(recorder.last_envelope().unwrap().recipients.len(), 2);
    }

    #[tokio::test]
    async fn test_send_message_from_template_french() {
        let (api, transport) = mock_api(welcome_store());
        let recorder = transport.recorder();

        let context = RenderContext::new().set("name", "Ana");
        let message = api
            .renderer
            .render("welcome", "fr", &context)
            .await
            .unwrap();
        assert_eq!(message.subject, "Bienvenue, Ana");

        let result = api
            .send_message_from_template(
                "",
                "ana@example.org",
                "",
                "",
                "fr",
                "welcome",
                &context,
            )
            .await;
        assert!(result.is_success());

        // Template sender used when no explicit sender is given.
        let envelope = recorder.last_envelope().unwrap();
        assert_eq!(envelope.from.email, "noreply@example.org");
        assert_eq!(envelope.recipients[0].email, "ana@example.org");
    }

    #[tokio::test]
    async fn test_template_language_fallback_to_base() {
        let (api, _transport) = mock_api(welcome_store());

        let context = RenderContext::new().set("name", "Ana");
        let result = api
            .send_message_from_template(
                "",
                "ana@example.org",
                "",
                "",
                "de",
                "welcome",
                &context,
            )
            .await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_template_not_found_never_reaches_transport() {
        let (api, transport) = mock_api(welcome_store());
        let recorder = transport.recorder();

        let context = RenderContext::new();
        let result = api
            .send_message_from_template("", "a@x.org", "", "", "en", "missing", &context)
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::TemplateNotFound));
        assert_eq!(recorder.open_count(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_never_reaches_transport() {
        let (api, transport) = mock_api(welcome_store());
        let recorder = transport.recorder();

        // Context is missing the `name` value the template requires.
        let context = RenderContext::new();
        let result = api
            .send_message_from_template("", "a@x.org", "", "", "fr", "welcome", &context)
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::RenderError));
        assert!(!result.diagnostic().unwrap().is_empty());
        assert_eq!(recorder.open_count(), 0);
    }
}
