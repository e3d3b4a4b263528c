//! Plain-text email message builder.

use std::{collections::HashMap, io::Write};

use super::error::{ClientError, Result};

/// Builder for constructing plain-text email messages.
///
/// This builder handles:
/// - Email headers (From, To, Cc, Subject, custom)
/// - Plain text body content
/// - CRLF line endings and the blank line separating headers from body
///
/// # Examples
///
/// ```
/// use missive_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .body("This is the message body")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    subject: Option<String>,
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl MessageBuilder {
    /// Creates a new empty message builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header.
    ///
    /// Accepts either a bare address or a `Display Name <address>` form.
    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    /// Adds a recipient to the Cc header.
    #[must_use]
    pub fn cc(mut self, email: impl Into<String>) -> Self {
        self.cc.push(email.into());
        self
    }

    /// Sets the Subject header.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header.
    ///
    /// Note: Use the specific methods (from, to, subject) for standard headers
    /// as they provide better validation and formatting.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the message body content.
    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self
    }

    /// Builds the final message text.
    ///
    /// # Errors
    ///
    /// Returns an error if the assembled message is not valid UTF-8.
    pub fn build(self) -> Result<String> {
        let mut message = Vec::with_capacity(1024);

        if let Some(from) = &self.from {
            write!(&mut message, "From: {from}\r\n")?;
        }

        if !self.to.is_empty() {
            write!(&mut message, "To: {}\r\n", self.to.join(", "))?;
        }

        if !self.cc.is_empty() {
            write!(&mut message, "Cc: {}\r\n", self.cc.join(", "))?;
        }

        if let Some(subject) = &self.subject {
            write!(&mut message, "Subject: {subject}\r\n")?;
        }

        for (name, value) in &self.headers {
            write!(&mut message, "{name}: {value}\r\n")?;
        }

        write!(&mut message, "MIME-Version: 1.0\r\n")?;
        write!(&mut message, "Content-Type: text/plain; charset=utf-8\r\n")?;

        // Blank line between headers and body
        write!(&mut message, "\r\n")?;

        if let Some(body) = &self.body {
            write!(&mut message, "{body}")?;
        }

        String::from_utf8(message).map_err(|e| ClientError::Utf8Error(e.utf8_error()))
    }
}
