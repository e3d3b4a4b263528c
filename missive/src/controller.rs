use std::sync::{Arc, LazyLock};

use missive_common::{Signal, internal, logging};
use missive_control::{ControlAuthConfig, ControlServer, DEFAULT_CONTROL_SOCKET};
use missive_dispatch::Dispatcher;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::control_handler::MissiveControlHandler;

#[derive(Deserialize)]
pub struct Missive {
    #[serde(alias = "dispatch", default)]
    dispatcher: Dispatcher,
    #[serde(alias = "control", default)]
    control: ControlConfig,
}

/// Control-plane settings: where the socket lives and who may use it.
#[derive(Debug, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_socket")]
    pub socket_path: String,
    #[serde(default)]
    pub auth: ControlAuthConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_control_socket(),
            auth: ControlAuthConfig::default(),
        }
    }
}

fn default_control_socket() -> String {
    DEFAULT_CONTROL_SOCKET.to_string()
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Missive {
    /// Run this controller, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if the dispatcher's progress store
    /// fails to initialise, or if the control socket cannot be bound.
    pub async fn run(mut self) -> anyhow::Result<()> {
        logging::init();
        self.dispatcher.init()?;

        internal!(level = INFO, "Controller running");

        let dispatcher = Arc::new(self.dispatcher);
        let handler = Arc::new(MissiveControlHandler::new(
            Arc::clone(&dispatcher),
            self.control.auth,
        ));
        let control = ControlServer::new(self.control.socket_path, handler)?;

        let ret = tokio::select! {
            r = dispatcher.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(Into::into)
            }
            r = control.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(Into::into)
            }
            r = shutdown() => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}

#[cfg(test)]
mod test {
    use super::Missive;

    #[test]
    fn config_defaults() {
        let missive: Missive = ron::from_str("()").expect("empty config should parse");

        assert_eq!(missive.control.socket_path, "/tmp/missive.sock");
        assert!(!missive.control.auth.requires_auth());
    }

    #[test]
    fn config_overrides() {
        let missive: Missive = ron::from_str(
            r#"(
                dispatch: (
                    relay_host: "relay.example.com",
                    relay_port: 2525,
                ),
                control: (
                    socket_path: "/run/missive/control.sock",
                    auth: (
                        enabled: true,
                        token_hashes: ["deadbeef"],
                    ),
                ),
            )"#,
        )
        .expect("config should parse");

        assert_eq!(missive.dispatcher.relay_host, "relay.example.com");
        assert_eq!(missive.dispatcher.relay_port, 2525);
        assert_eq!(missive.control.socket_path, "/run/missive/control.sock");
        assert!(missive.control.auth.requires_auth());
    }
}
