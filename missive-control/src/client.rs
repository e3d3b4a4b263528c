//! Client for connecting to the control socket

use std::{path::Path, time::Duration};

use tokio::net::UnixStream;
use tracing::{debug, trace};

use crate::{
    ControlError, Request, Response, Result,
    codec::{self, MAX_RESPONSE_SIZE},
};

/// Client for communicating with the missive control server
///
/// Connections are one-shot: the server answers a single request per
/// connection, so the client connects fresh for each command.
pub struct ControlClient {
    socket_path: String,
    timeout: Duration,
}

impl ControlClient {
    /// Create a new control client with the given socket path
    #[must_use]
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request and receive a response
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Connection fails
    /// - Protocol error occurs
    /// - Request times out
    /// - Server returns an error
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        // Apply timeout to the entire request/response cycle
        tokio::time::timeout(self.timeout, self.send_request_inner(request))
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    async fn send_request_inner(&self, request: Request) -> Result<Response> {
        debug!("Connecting to control socket: {}", self.socket_path);
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        trace!("Sending request: {request:?}");
        codec::write_frame(&mut stream, &request).await?;

        let response: Response = codec::read_frame(&mut stream, MAX_RESPONSE_SIZE).await?;
        trace!("Received response: {response:?}");

        if !response.is_version_compatible() {
            return Err(ControlError::VersionMismatch {
                client: crate::PROTOCOL_VERSION,
                server: response.version,
            });
        }

        if let crate::ResponsePayload::Error(ref err) = response.payload {
            return Err(ControlError::ServerError(err.clone()));
        }

        Ok(response)
    }

    /// Check if the control server is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the socket doesn't exist
    pub fn check_socket_exists(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);
        if !path.exists() {
            return Err(ControlError::InvalidSocketPath(format!(
                "Socket does not exist: {}",
                self.socket_path
            )));
        }
        Ok(())
    }
}
