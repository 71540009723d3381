//! Template rendering: named templates plus a language and a variable
//! context produce a populated `Message`.
//!
//! Lookup policy is deterministic: exact language match, then the store's
//! base language, then `TemplateNotFound`. Substitution replaces
//! `{{variable}}` placeholders from the render context; a placeholder with
//! no value fails the whole render with `RenderError` rather than producing
//! a partially substituted message.

use std::collections::HashMap;
use async_trait::async_trait;

use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::message::{Address, Message};

/// Variable context for one render. Not retained afterwards.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    values: HashMap<String, String>,
}

impl RenderContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Returns the value for a variable, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RenderContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Stored template source for one id and language.
#[derive(Debug, Clone, Default)]
pub struct TemplateSource {
    /// Subject line with placeholders.
    pub subject: String,
    /// Plain text body with placeholders.
    pub text: Option<String>,
    /// HTML body with placeholders.
    pub html: Option<String>,
    /// Sender override for messages rendered from this template.
    pub from: Option<Address>,
}

/// Template/document store collaborator.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Looks up a template by id and language. Returns `None` when the
    /// combination does not exist; the renderer drives the fallback chain.
    async fn lookup(&self, template_id: &str, language: &str) -> Option<TemplateSource>;

    /// Returns the base language used as the deterministic fallback.
    fn base_language(&self) -> &str;
}

/// In-memory template store keyed by (id, language).
#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    templates: HashMap<(String, String), TemplateSource>,
    base_language: String,
}

impl InMemoryTemplateStore {
    /// Creates an empty store with the given base language.
    pub fn new(base_language: impl Into<String>) -> Self {
        Self {
            templates: HashMap::new(),
            base_language: base_language.into(),
        }
    }

    /// Registers a template for an id and language.
    pub fn insert(
        &mut self,
        template_id: impl Into<String>,
        language: impl Into<String>,
        source: TemplateSource,
    ) {
        self.templates
            .insert((template_id.into(), language.into()), source);
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn lookup(&self, template_id: &str, language: &str) -> Option<TemplateSource> {
        self.templates
            .get(&(template_id.to_string(), language.to_string()))
            .cloned()
    }

    fn base_language(&self) -> &str {
        &self.base_language
    }
}

/// Renders named templates into messages.
pub struct TemplateRenderer<S> {
    store: S,
}

impl<S: TemplateStore> TemplateRenderer<S> {
    /// Creates a renderer over a template store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Renders a template into a message.
    ///
    /// Addresses (to/cc/bcc) are not part of the template; the caller sets
    /// them on the returned message or through the scripting facade.
    pub async fn render(
        &self,
        template_id: &str,
        language: &str,
        context: &RenderContext,
    ) -> MailResult<Message> {
        let source = self.lookup_with_fallback(template_id, language).await?;

        let subject = substitute(&source.subject, context)?;
        let text = source
            .text
            .as_deref()
            .map(|t| substitute(t, context))
            .transpose()?;
        let html = source
            .html
            .as_deref()
            .map(|h| substitute(h, context))
            .transpose()?;

        let mut builder = Message::builder().subject(subject);
        if let Some(from) = source.from {
            builder = builder.from(from);
        }
        if let Some(text) = text {
            builder = builder.text(text);
        }
        if let Some(html) = html {
            builder = builder.html(html);
        }

        Ok(builder.build())
    }

    /// Exact language match, then base language, then `TemplateNotFound`.
    async fn lookup_with_fallback(
        &self,
        template_id: &str,
        language: &str,
    ) -> MailResult<TemplateSource> {
        if let Some(source) = self.store.lookup(template_id, language).await {
            return Ok(source);
        }

        let base = self.store.base_language();
        if base != language {
            if let Some(source) = self.store.lookup(template_id, base).await {
                tracing::debug!(
                    template_id,
                    requested = language,
                    fallback = base,
                    "template language fallback"
                );
                return Ok(source);
            }
        }

        Err(MailError::template_not_found(format!(
            "No template [{}] for language [{}] or base language [{}]",
            template_id, language, base
        )))
    }
}

/// Substitutes `{{name}}` placeholders from the context.
///
/// Fails on the first placeholder without a value and on an unterminated
/// `{{`; literal text passes through unchanged.
fn substitute(template: &str, context: &RenderContext) -> MailResult<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find("}}").ok_or_else(|| {
            MailError::render(
                MailErrorKind::TemplateMalformed,
                format!("Unterminated placeholder near: {{{{{}", truncate(after, 24)),
            )
        })?;

        let name = after[..end].trim();
        let value = context.get(name).ok_or_else(|| {
            MailError::render(
                MailErrorKind::UnresolvedPlaceholder,
                format!("No value for placeholder [{}]", name),
            )
        })?;

        output.push_str(value);
        rest = &after[end + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
