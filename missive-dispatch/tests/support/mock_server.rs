//! Mock SMTP relay for wire-level dispatch tests
//!
//! A configurable in-process relay that:
#![allow(dead_code)] // Test utility module - not all methods used in every test
//! - Answers the command sequence the relay transport issues (EHLO, AUTH,
//!   MAIL FROM, RCPT TO, DATA, NOOP, RSET, QUIT)
//! - Rejects chosen recipient addresses to exercise per-record failure
//! - Records every command for verification
//!
//! # Example
//!
//! ```rust,no_run
//! use support::mock_server::MockRelay;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let relay = MockRelay::builder()
//!     .with_auth_capability("AUTH PLAIN LOGIN")
//!     .reject_recipient("bounce@example.com")
//!     .build()
//!     .await?;
//!
//! // relay.addr() is now accepting plaintext SMTP sessions
//!
//! relay.shutdown();
//! # Ok(())
//! # }
//! ```

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// SMTP command observed by the mock relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    /// EHLO with the client's HELO name
    Ehlo(String),
    /// AUTH PLAIN with its base64 initial response
    AuthPlain(String),
    /// AUTH LOGIN with the base64 username and password answers
    AuthLogin { username: String, password: String },
    /// MAIL FROM with the raw argument
    MailFrom(String),
    /// RCPT TO with the bare address
    RcptTo(String),
    /// DATA command
    Data,
    /// Message content received after DATA
    MessageContent(String),
    /// Idle keep-alive
    Noop,
    /// Transaction reset after a failed send
    Rset,
    /// Session teardown
    Quit,
    /// Anything else
    Other(String),
}

/// Static relay behaviour, set once through the builder
#[derive(Clone)]
struct RelayConfig {
    greeting: (u16, String),
    /// Capability lines advertised after the HELO name line
    capabilities: Vec<String>,
    auth_response: (u16, String),
    mail_from_response: (u16, String),
    rcpt_to_response: (u16, String),
    data_end_response: (u16, String),
    /// Addresses answered with a 550 at RCPT TO
    rejected_recipients: Vec<String>,
    /// Silently close the connection after this many commands
    drop_after_commands: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            greeting: (220, "mock relay ready".to_string()),
            capabilities: vec!["SIZE 35882577".to_string()],
            auth_response: (235, "Accepted".to_string()),
            mail_from_response: (250, "OK".to_string()),
            rcpt_to_response: (250, "OK".to_string()),
            data_end_response: (250, "OK: queued".to_string()),
            rejected_recipients: Vec::new(),
            drop_after_commands: None,
        }
    }
}

/// Mock SMTP relay listening on a random local port
pub struct MockRelay {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<RelayCommand>>>,
    shutdown: Arc<AtomicBool>,
}

impl MockRelay {
    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            config: RelayConfig::default(),
        }
    }

    /// Address the relay is listening on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every command received so far, in arrival order
    pub async fn commands(&self) -> Vec<RelayCommand> {
        self.commands.read().await.clone()
    }

    /// Count of MAIL FROM transactions started
    pub async fn transactions_started(&self) -> usize {
        self.commands
            .read()
            .await
            .iter()
            .filter(|c| matches!(c, RelayCommand::MailFrom(_)))
            .count()
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<RelayConfig>,
        commands: Arc<RwLock<Vec<RelayCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut seen = 0usize;

        write_line(
            &mut writer,
            &format!("{} {}", config.greeting.0, config.greeting.1),
        )
        .await?;

        loop {
            if let Some(limit) = config.drop_after_commands
                && seen >= limit
            {
                return Ok(());
            }

            line.clear();
            let bytes = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await;
            let Ok(Ok(bytes)) = bytes else {
                return Ok(());
            };
            if bytes == 0 {
                return Ok(());
            }
            seen += 1;

            let cmd_line = line.trim().to_string();
            let upper = cmd_line.to_ascii_uppercase();

            if let Some(helo_name) = upper.strip_prefix("EHLO ") {
                commands
                    .write()
                    .await
                    .push(RelayCommand::Ehlo(helo_name.to_ascii_lowercase()));

                let mut caps = vec!["mock.relay".to_string()];
                caps.extend(config.capabilities.iter().cloned());
                for cap in &caps[..caps.len() - 1] {
                    write_line(&mut writer, &format!("250-{cap}")).await?;
                }
                write_line(&mut writer, &format!("250 {}", caps[caps.len() - 1])).await?;
            } else if let Some(token) = cmd_line.strip_prefix("AUTH PLAIN ") {
                commands
                    .write()
                    .await
                    .push(RelayCommand::AuthPlain(token.to_string()));
                let (code, msg) = &config.auth_response;
                write_line(&mut writer, &format!("{code} {msg}")).await?;
            } else if upper == "AUTH LOGIN" {
                write_line(&mut writer, "334 VXNlcm5hbWU6").await?;
                let username = read_trimmed(&mut reader).await?;
                write_line(&mut writer, "334 UGFzc3dvcmQ6").await?;
                let password = read_trimmed(&mut reader).await?;
                commands
                    .write()
                    .await
                    .push(RelayCommand::AuthLogin { username, password });
                let (code, msg) = &config.auth_response;
                write_line(&mut writer, &format!("{code} {msg}")).await?;
            } else if let Some(arg) = upper.strip_prefix("MAIL FROM:") {
                commands
                    .write()
                    .await
                    .push(RelayCommand::MailFrom(arg.to_ascii_lowercase()));
                let (code, msg) = &config.mail_from_response;
                write_line(&mut writer, &format!("{code} {msg}")).await?;
            } else if upper.starts_with("RCPT TO:") {
                let address = cmd_line[8..].trim().trim_matches(['<', '>']).to_string();
                commands
                    .write()
                    .await
                    .push(RelayCommand::RcptTo(address.clone()));

                if config.rejected_recipients.contains(&address) {
                    write_line(&mut writer, "550 No such user here").await?;
                } else {
                    let (code, msg) = &config.rcpt_to_response;
                    write_line(&mut writer, &format!("{code} {msg}")).await?;
                }
            } else if upper == "DATA" {
                commands.write().await.push(RelayCommand::Data);
                write_line(&mut writer, "354 Start mail input; end with <CRLF>.<CRLF>").await?;

                let mut content = String::new();
                loop {
                    let data_line = read_trimmed(&mut reader).await?;
                    if data_line == "." {
                        break;
                    }
                    // Undo transparency stuffing the way a real relay would.
                    content.push_str(data_line.strip_prefix('.').unwrap_or(&data_line));
                    content.push('\n');
                }
                commands
                    .write()
                    .await
                    .push(RelayCommand::MessageContent(content));
                let (code, msg) = &config.data_end_response;
                write_line(&mut writer, &format!("{code} {msg}")).await?;
            } else if upper == "NOOP" {
                commands.write().await.push(RelayCommand::Noop);
                write_line(&mut writer, "250 OK").await?;
            } else if upper == "RSET" {
                commands.write().await.push(RelayCommand::Rset);
                write_line(&mut writer, "250 OK").await?;
            } else if upper == "QUIT" {
                commands.write().await.push(RelayCommand::Quit);
                write_line(&mut writer, "221 Bye").await?;
                return Ok(());
            } else {
                commands.write().await.push(RelayCommand::Other(cmd_line));
                write_line(&mut writer, "500 Unknown command").await?;
            }
        }
    }
}

async fn write_line(
    writer: &mut (impl AsyncWriteExt + Unpin),
    line: &str,
) -> std::io::Result<()> {
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    writer.flush().await
}

async fn read_trimmed(
    reader: &mut (impl AsyncBufReadExt + Unpin),
) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line.trim().to_string())
}

/// Builder for configuring a [`MockRelay`]
pub struct MockRelayBuilder {
    config: RelayConfig,
}

impl MockRelayBuilder {
    /// Set the greeting line
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = (code, message.into());
        self
    }

    /// Advertise an AUTH capability line in the EHLO response
    #[must_use]
    pub fn with_auth_capability(mut self, line: impl Into<String>) -> Self {
        self.config.capabilities.push(line.into());
        self
    }

    /// Set the response to a completed AUTH exchange
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = (code, message.into());
        self
    }

    /// Set the MAIL FROM response
    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = (code, message.into());
        self
    }

    /// Answer RCPT TO for this address with a 550
    #[must_use]
    pub fn reject_recipient(mut self, address: impl Into<String>) -> Self {
        self.config.rejected_recipients.push(address.into());
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = (code, message.into());
        self
    }

    /// Silently drop the connection after N commands
    #[must_use]
    pub const fn with_drop_after_commands(mut self, count: usize) -> Self {
        self.config.drop_after_commands = Some(count);
        self
    }

    /// Bind to a random local port and start serving
    ///
    /// # Errors
    ///
    /// Returns an error if no port can be bound
    pub async fn build(self) -> Result<MockRelay, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_config = Arc::clone(&config);
        let accept_commands = Arc::clone(&commands);
        let accept_shutdown = Arc::clone(&shutdown);

        tokio::spawn(async move {
            loop {
                if accept_shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let accepted = timeout(Duration::from_millis(100), listener.accept()).await;
                if let Ok(Ok((stream, _peer))) = accepted {
                    let config = Arc::clone(&accept_config);
                    let commands = Arc::clone(&accept_commands);

                    tokio::spawn(async move {
                        if let Err(e) = MockRelay::handle_client(stream, config, commands).await {
                            tracing::debug!("Mock relay client error: {}", e);
                        }
                    });
                }
            }
        });

        Ok(MockRelay {
            addr,
            commands,
            shutdown,
        })
    }
}
