//! Configuration types for the dispatch engine.

use serde::{Deserialize, Serialize};

/// SMTP operation timeout configuration
///
/// Configures timeout durations for each wire operation against the relay to
/// prevent hung connections and ensure timely failure detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Timeout for initial connection establishment and greeting
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Timeout for EHLO/HELO commands
    ///
    /// Default: 30 seconds
    #[serde(default = "default_ehlo_timeout")]
    pub ehlo_secs: u64,

    /// Timeout for STARTTLS command and TLS upgrade
    ///
    /// Default: 30 seconds
    #[serde(default = "default_starttls_timeout")]
    pub starttls_secs: u64,

    /// Timeout for the AUTH exchange
    ///
    /// Default: 30 seconds
    #[serde(default = "default_auth_timeout")]
    pub auth_secs: u64,

    /// Timeout for MAIL FROM command
    ///
    /// Default: 30 seconds
    #[serde(default = "default_mail_from_timeout")]
    pub mail_from_secs: u64,

    /// Timeout for RCPT TO command
    ///
    /// Default: 30 seconds
    #[serde(default = "default_rcpt_to_timeout")]
    pub rcpt_to_secs: u64,

    /// Timeout for DATA command and message transmission
    ///
    /// This is longer than other timeouts to accommodate large messages.
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Timeout for NOOP keep-alive pings
    ///
    /// Default: 10 seconds
    #[serde(default = "default_noop_timeout")]
    pub noop_secs: u64,

    /// Timeout for QUIT command
    ///
    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            ehlo_secs: default_ehlo_timeout(),
            starttls_secs: default_starttls_timeout(),
            auth_secs: default_auth_timeout(),
            mail_from_secs: default_mail_from_timeout(),
            rcpt_to_secs: default_rcpt_to_timeout(),
            data_secs: default_data_timeout(),
            noop_secs: default_noop_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_ehlo_timeout() -> u64 {
    30
}

const fn default_starttls_timeout() -> u64 {
    30
}

const fn default_auth_timeout() -> u64 {
    30
}

const fn default_mail_from_timeout() -> u64 {
    30
}

const fn default_rcpt_to_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_noop_timeout() -> u64 {
    10
}

const fn default_quit_timeout() -> u64 {
    10
}

/// Per-job submission parameters
///
/// Carries the sender identity, the relay credential, and an optional
/// inter-send delay override. The credential is redacted from `Debug` output
/// so it never leaks into logs.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    /// Envelope sender and From header address.
    pub from_address: String,

    /// Display name for the From header, omitted when absent.
    #[serde(default)]
    pub from_display_name: Option<String>,

    /// Relay password (app password). `None` skips AUTH entirely, which only
    /// makes sense against unauthenticated test relays.
    #[serde(default)]
    pub credential: Option<String>,

    /// Per-job override of the dispatcher's inter-send delay, in seconds.
    #[serde(default)]
    pub inter_send_delay_secs: Option<u64>,
}

impl std::fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobConfig")
            .field("from_address", &self.from_address)
            .field("from_display_name", &self.from_display_name)
            .field(
                "credential",
                &self.credential.as_ref().map(|_| "<redacted>"),
            )
            .field("inter_send_delay_secs", &self.inter_send_delay_secs)
            .finish()
    }
}

impl JobConfig {
    /// The From header value: `Display Name <address>`, or the bare address
    #[must_use]
    pub fn from_header(&self) -> String {
        match self.from_display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => {
                format!("{name} <{}>", self.from_address)
            }
            _ => self.from_address.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_timeout_defaults() {
        let timeouts: SmtpTimeouts = ron::from_str("()").unwrap();
        assert_eq!(timeouts.connect_secs, 30);
        assert_eq!(timeouts.data_secs, 120);
        assert_eq!(timeouts.noop_secs, 10);
        assert_eq!(timeouts.quit_secs, 10);
    }

    #[test]
    fn test_timeout_overrides() {
        let timeouts: SmtpTimeouts = ron::from_str("(connect_secs: 5, data_secs: 60)").unwrap();
        assert_eq!(timeouts.connect_secs, 5);
        assert_eq!(timeouts.data_secs, 60);
        assert_eq!(timeouts.ehlo_secs, 30);
    }

    #[test]
    fn test_job_config_redacts_credential() {
        let config = JobConfig {
            from_address: "sender@example.com".into(),
            from_display_name: Some("Sender".into()),
            credential: Some("hunter2".into()),
            inter_send_delay_secs: None,
        };

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_from_header_forms() {
        let mut config = JobConfig {
            from_address: "sender@example.com".into(),
            from_display_name: Some("Jane Doe".into()),
            credential: None,
            inter_send_delay_secs: None,
        };
        assert_eq!(config.from_header(), "Jane Doe <sender@example.com>");

        config.from_display_name = None;
        assert_eq!(config.from_header(), "sender@example.com");

        config.from_display_name = Some("   ".into());
        assert_eq!(config.from_header(), "sender@example.com");
    }
}
