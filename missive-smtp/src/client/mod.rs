//! SMTP client for relaying mail through a configured smarthost.
//!
//! This module provides the client half of an SMTP conversation. It supports:
//!
//! - Plain TCP and TLS connections
//! - STARTTLS upgrade
//! - AUTH PLAIN and AUTH LOGIN
//! - NOOP keep-alives for long-lived sessions
//! - Response inspection for assertions
//!
//! # Examples
//!
//! ```no_run
//! use missive_smtp::client::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("smtp.example.com:587", "smtp.example.com".into()).await?;
//! client.read_greeting().await?;
//! client.ehlo("client.example.com").await?;
//! client.starttls().await?;
//! client.ehlo("client.example.com").await?;
//! client.auth_plain("sender@example.com", "app-password").await?;
//!
//! let message = MessageBuilder::new()
//!     .from("sender@example.com")
//!     .to("recipient@example.com")
//!     .subject("Hello")
//!     .body("This is the message body")
//!     .build()?;
//!
//! client.mail_from("sender@example.com", None).await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! let response = client.send_data(&message).await?;
//! assert!(response.is_success());
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod message;
mod response;

pub use client::SmtpClient;
pub use error::{ClientError, Result};
pub use message::MessageBuilder;
pub use response::{Response, ResponseLine};
