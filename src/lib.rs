//! # Mail Dispatch Gateway
//!
//! An async mail dispatch gateway with:
//! - Builder-composed messages validated only at dispatch time
//! - Explicit or process-default SMTP configuration
//! - Language-aware message templates with placeholder substitution
//! - A gateway boundary that reports every outcome as a value, never an error
//! - SMTP transport with STARTTLS/implicit TLS and PLAIN/LOGIN auth
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mail_gateway::{Gateway, MailConfig, Message};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = MailConfig::builder()
//!         .host("smtp.example.com")
//!         .port(587)
//!         .credentials("user@example.com", "password")
//!         .build()
//!         .unwrap();
//!
//!     let message = Message::builder()
//!         .from("sender@example.com")
//!         .to("recipient@example.com")
//!         .subject("Hello from Rust!")
//!         .text("This is a test email.")
//!         .build();
//!
//!     let result = Gateway::new().send(&message, Some(&config)).await;
//!     if !result.is_success() {
//!         eprintln!("dispatch failed: {:?}", result.diagnostic());
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod message;

// Templates
pub mod template;

// Protocol layer
pub mod protocol;

// Authentication
pub mod auth;

// MIME encoding
pub mod mime;

// Transport layer
pub mod transport;

// Dispatch gateway
pub mod gateway;

// Scripting facade
pub mod api;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use api::MailSenderApi;
pub use config::{install_default, MailConfig, MailConfigBuilder, TlsMode};
pub use errors::{FailureKind, MailError, MailErrorKind, MailResult, TransportFailure};
pub use gateway::{Delivery, DispatchFailure, DispatchPhase, DispatchResult, Gateway};
pub use message::{Address, Attachment, Message, MessageBuilder};
pub use template::{
    InMemoryTemplateStore, RenderContext, TemplateRenderer, TemplateSource, TemplateStore,
};
pub use transport::{Envelope, Session, SmtpTransport, Transport};
