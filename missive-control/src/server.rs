//! Control server implementation

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    ControlError, Request, Response, Result,
    codec::{self, MAX_REQUEST_SIZE},
};

/// How long a single request/response exchange may take before the
/// connection is abandoned
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler trait for processing control requests
///
/// Implement this trait to handle specific command types
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a request and return a response
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be processed
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

/// Control server for managing a missive instance via Unix domain socket
pub struct ControlServer {
    socket_path: String,
    handler: Arc<dyn CommandHandler>,
}

impl ControlServer {
    /// Create a new control server
    ///
    /// # Errors
    ///
    /// Returns an error if the socket path is empty
    pub fn new(socket_path: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        let socket_path = socket_path.into();
        if socket_path.is_empty() {
            return Err(ControlError::InvalidSocketPath(
                "socket path must not be empty".to_string(),
            ));
        }

        Ok(Self {
            socket_path,
            handler,
        })
    }

    /// Start the control server
    ///
    /// This function runs until a shutdown signal is received. Each accepted
    /// connection carries one request/response exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another live instance owns the socket
    /// - The socket cannot be bound
    /// - A fatal I/O error occurs
    pub async fn serve(
        &self,
        mut shutdown: broadcast::Receiver<missive_common::Signal>,
    ) -> Result<()> {
        let listener = self.bind().await?;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = Arc::clone(&self.handler);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    error!("Error handling control connection: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Error accepting control connection: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(missive_common::Signal::Shutdown | missive_common::Signal::Finalised) => {
                            info!("Control server shutting down");
                            break;
                        }
                        Err(e) => {
                            error!("Control server shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        let socket_path = Path::new(&self.socket_path);
        if socket_path.exists() {
            debug!("Removing socket file: {}", self.socket_path);
            let _ = tokio::fs::remove_file(socket_path).await;
        }

        Ok(())
    }

    /// Claim the socket path and bind the listener.
    ///
    /// A leftover socket file is probed with a connect: answered means a
    /// sibling instance is alive, refused means a crashed process left it
    /// behind and it is safe to reclaim.
    async fn bind(&self) -> Result<UnixListener> {
        let socket_path = Path::new(&self.socket_path);
        if socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ControlError::SocketInUse(self.socket_path.clone()));
            }

            info!("Removing stale socket file: {}", self.socket_path);
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // rw------- so only the owning user can drive the dispatcher
        #[cfg(unix)]
        {
            let metadata = tokio::fs::metadata(&self.socket_path).await?;
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(&self.socket_path, perms).await?;
            info!(
                "Control socket created with mode 0600 (owner only): {}",
                self.socket_path
            );
        }
        #[cfg(not(unix))]
        {
            info!("Control server listening on: {}", self.socket_path);
        }

        Ok(listener)
    }

    /// Handle a single client connection: one request, one response
    async fn handle_connection(
        mut stream: UnixStream,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        let request: Request =
            tokio::time::timeout(CONNECTION_TIMEOUT, codec::read_frame(&mut stream, MAX_REQUEST_SIZE))
                .await
                .map_err(|_| ControlError::Timeout)??;

        trace!("Received request: {request:?}");

        // Handler failures become error responses, never dropped connections
        let response = match handler.handle_request(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Error handling request: {e}");
                Response::error(e.to_string())
            }
        };

        trace!("Sending response: {response:?}");

        tokio::time::timeout(CONNECTION_TIMEOUT, codec::write_frame(&mut stream, &response))
            .await
            .map_err(|_| ControlError::Timeout)??;

        Ok(())
    }
}
