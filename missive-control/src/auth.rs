//! Authentication for the control socket
//!
//! Token-based authentication using SHA-256 hashed bearer tokens. Only the
//! hashes live in configuration, so a leaked config file does not leak the
//! tokens themselves.

use hex::encode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Authentication configuration for the control socket
///
/// When enabled, every control request must carry a bearer token whose
/// SHA-256 hash matches one of the configured hashes. When disabled, access
/// control falls back to the socket's filesystem permissions (mode 0600).
///
/// # Example Configuration
///
/// ```ron
/// control_auth: (
///     enabled: true,
///     token_hashes: [
///         // SHA-256 hash of the operator token
///         "4c5dc9b7708905f77f5e5d16316b5dfb425e68cb326dcd55a860e90a7707031e",
///     ],
/// )
/// ```
///
/// Generate a hash with `echo -n "your-secret-token" | sha256sum`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlAuthConfig {
    /// Enable or disable authentication
    #[serde(default)]
    pub enabled: bool,

    /// Valid bearer tokens (SHA-256 hashes, 64-character hex strings)
    #[serde(default)]
    pub token_hashes: Vec<String>,
}

impl ControlAuthConfig {
    /// Check if authentication is required
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        self.enabled
    }

    /// Validate a plaintext bearer token against the configured hashes.
    ///
    /// Always passes when authentication is disabled.
    #[must_use]
    pub fn validate_token(&self, token: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let hash = encode(hasher.finalize());

        self.token_hashes.iter().any(|h| h == &hash)
    }

    /// Validate the token carried by a request, if any.
    ///
    /// # Errors
    ///
    /// Returns an error message if authentication is enabled and the token is
    /// missing or does not match.
    pub fn validate_token_option(&self, token: Option<&str>) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }

        match token {
            None => Err("Authentication required but no token provided".to_string()),
            Some(t) => {
                if self.validate_token(t) {
                    Ok(())
                } else {
                    Err("Invalid authentication token".to_string())
                }
            }
        }
    }
}
