//! SMTP client implementation with support for TLS and STARTTLS.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use missive_common::{outgoing, tracing};

use super::error::{ClientError, Result};
use super::response::Response;

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// An SMTP client connection that can be either plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl ClientConnection {
    /// Sends data over the connection.
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    /// Reads data from the connection into the provided buffer.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    /// Upgrades a plain connection to TLS.
    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => {
                let mut root_store = RootCertStore::empty();

                // Add system certificates
                let certs = rustls_native_certs::load_native_certs();
                for cert in certs.certs {
                    root_store.add(cert).map_err(|e| {
                        ClientError::TlsError(format!("Failed to add certificate: {e}"))
                    })?;
                }
                // Log errors but don't fail if some certs couldn't be loaded
                if !certs.errors.is_empty() {
                    tracing::warn!(?certs.errors, "Some certificates could not be loaded");
                }

                let mut config = ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth();

                // For testing purposes, allow invalid certificates if requested
                if accept_invalid_certs {
                    config
                        .dangerous()
                        .set_certificate_verifier(Arc::new(NoVerifier));
                }

                let connector = TlsConnector::from(Arc::new(config));
                let server_name = ServerName::try_from(domain.to_string())
                    .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ClientError::TlsError(e.to_string()))?;

                Ok(Self::Tls(tls_stream))
            }
            Self::Tls(_) => Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            )),
        }
    }
}

/// A certificate verifier that accepts all certificates (for testing only).
#[derive(Debug)]
struct NoVerifier;

impl tokio_rustls::rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[tokio_rustls::rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::ServerCertVerified,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<tokio_rustls::rustls::SignatureScheme> {
        vec![
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA256,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            tokio_rustls::rustls::SignatureScheme::ED25519,
        ]
    }
}

/// An SMTP client for sending commands and receiving responses.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    responses: Vec<Response>,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Creates a new SMTP client by connecting to the specified address.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(addr: &str, server_domain: String) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Io)?;

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            responses: Vec::new(),
            server_domain,
            accept_invalid_certs: false,
        })
    }

    /// Sets whether to accept invalid TLS certificates.
    ///
    /// This is useful for testing with self-signed certificates.
    /// Default is `false` for security. Set to `true` for testing only.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Reads the initial server greeting (220 response).
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is invalid.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Sends a command to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        let data = format!("{command}\r\n");
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(data.as_bytes())
            .await?;
        Ok(())
    }

    /// Sends a raw command and reads the response.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// Sends EHLO with the specified domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// Sends HELO with the specified domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// Authenticates with AUTH PLAIN using the given credentials.
    ///
    /// The identity and credential are sent as a single base64-encoded
    /// initial response (RFC 4616).
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails at the wire level; an
    /// unsuccessful status code is returned as a normal `Response` for the
    /// caller to classify.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = base64_encode(format!("\0{username}\0{password}").as_bytes());
        self.command(&format!("AUTH PLAIN {token}")).await
    }

    /// Authenticates with AUTH LOGIN, answering the username and password
    /// challenges in turn.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::UnexpectedResponse` if the server does not issue
    /// the expected 334 challenges.
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<Response> {
        let challenge = self.command("AUTH LOGIN").await?;
        if challenge.code != 334 {
            return Err(ClientError::UnexpectedResponse {
                code: challenge.code,
                message: challenge.message(),
            });
        }

        let challenge = self.command(&base64_encode(username.as_bytes())).await?;
        if challenge.code != 334 {
            return Err(ClientError::UnexpectedResponse {
                code: challenge.code,
                message: challenge.message(),
            });
        }

        self.command(&base64_encode(password.as_bytes())).await
    }

    /// Sends MAIL FROM command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str, size: Option<usize>) -> Result<Response> {
        let cmd = if let Some(sz) = size {
            format!("MAIL FROM:<{from}> SIZE={sz}")
        } else {
            format!("MAIL FROM:<{from}>")
        };
        self.command(&cmd).await
    }

    /// Sends RCPT TO command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// Sends DATA command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the message data followed by a dot on its own line.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;

        let payload = encode_data(data);

        outgoing!("Sending {} bytes of message data", payload.len());

        connection.send(&payload).await?;

        // Send end-of-data marker
        connection.send(b".\r\n").await?;

        self.read_response().await
    }

    /// Sends NOOP, typically to keep an idle session alive.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn noop(&mut self) -> Result<Response> {
        self.command("NOOP").await
    }

    /// Sends QUIT command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Sends STARTTLS command and upgrades the connection to TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS fails or TLS upgrade fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            let domain = self.server_domain.clone();
            let accept_invalid = self.accept_invalid_certs;

            // Take ownership of the connection and upgrade it
            if let Some(old_connection) = self.connection.take() {
                self.connection =
                    Some(old_connection.upgrade_to_tls(&domain, accept_invalid).await?);
            } else {
                return Err(ClientError::ConnectionClosed);
            }
        }

        Ok(response)
    }

    /// Sends RSET command to reset the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// Returns all responses received so far.
    #[must_use]
    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    /// Returns the last response received, if any.
    #[must_use]
    pub fn last_response(&self) -> Option<&Response> {
        self.responses.last()
    }

    /// Reads a complete SMTP response from the server.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the response is malformed.
    async fn read_response(&mut self) -> Result<Response> {
        loop {
            // Try to parse a complete response from the buffer
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                // Remove consumed bytes from buffer
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                self.responses.push(response.clone());

                return Ok(response);
            }

            // Need more data - read from connection
            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Prepares message text for the DATA phase per RFC 5321 section 4.5.2.
///
/// Bare LF becomes CRLF, and lines starting with a dot get a second dot so
/// the end-of-data marker can never appear inside the body. The output
/// always ends with CRLF.
fn encode_data(data: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);

    // A trailing newline already terminates the last line; keep split from
    // producing a spurious empty line for it.
    let data = data
        .strip_suffix('\n')
        .map_or(data, |d| d.strip_suffix('\r').unwrap_or(d));

    for line in data.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push(b'.');
        }
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out
}

/// Encodes data as base64 for AUTH exchanges.
///
/// Single line, no wrapping: SASL initial responses and challenge replies
/// must fit on the command line.
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut result = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let mut buf = [0u8; 3];
        buf[..chunk.len()].copy_from_slice(chunk);

        let b1 = (buf[0] >> 2) as usize;
        let b2 = (((buf[0] & 0x03) << 4) | (buf[1] >> 4)) as usize;
        let b3 = (((buf[1] & 0x0F) << 2) | (buf[2] >> 6)) as usize;
        let b4 = (buf[2] & 0x3F) as usize;

        result.push(ALPHABET[b1] as char);
        result.push(ALPHABET[b2] as char);

        if chunk.len() > 1 {
            result.push(ALPHABET[b3] as char);
        } else {
            result.push('=');
        }

        if chunk.len() > 2 {
            result.push(ALPHABET[b4] as char);
        } else {
            result.push('=');
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_encoding() {
        assert_eq!(base64_encode(b"Hello World"), "SGVsbG8gV29ybGQ=");
        assert_eq!(base64_encode(b"a"), "YQ==");
        assert_eq!(base64_encode(b"ab"), "YWI=");
        assert_eq!(base64_encode(b""), "");
    }

    #[test]
    fn test_encode_data_normalizes_bare_lf() {
        assert_eq!(encode_data("one\ntwo"), b"one\r\ntwo\r\n");
        assert_eq!(encode_data("one\r\ntwo\r\n"), b"one\r\ntwo\r\n");
        assert_eq!(encode_data("no newline"), b"no newline\r\n");
    }

    #[test]
    fn test_encode_data_stuffs_leading_dots() {
        assert_eq!(encode_data(".\n"), b"..\r\n");
        assert_eq!(
            encode_data("before\r\n.\r\nafter"),
            b"before\r\n..\r\nafter\r\n"
        );
        assert_eq!(encode_data(".hidden command"), b"..hidden command\r\n");
    }

    #[test]
    fn test_encode_data_keeps_intentional_blank_lines() {
        assert_eq!(encode_data("para one\n\npara two\n"), b"para one\r\n\r\npara two\r\n");
    }

    #[test]
    fn test_base64_plain_credentials() {
        let token = base64_encode(b"\0sender@example.com\0hunter2");
        assert_eq!(token, "AHNlbmRlckBleGFtcGxlLmNvbQBodW50ZXIy");
        assert!(!token.contains('\r'));
        assert!(!token.contains('\n'));
    }
}
