//! Service-manager liveness notifications.
//!
//! Speaks the systemd notify protocol (READY=1 / WATCHDOG=1 datagrams to
//! `$NOTIFY_SOCKET`). Silently disabled when the socket is absent, so the
//! process runs unchanged outside a service manager.

use tracing::{debug, info, warn};

use crate::error::RuntimeResult;

/// Notify-socket client. All sends are best-effort.
pub struct ServiceNotifier {
    #[cfg(unix)]
    socket: Option<(std::os::unix::net::UnixDatagram, String)>,
    #[cfg(not(unix))]
    socket: Option<()>,
}

impl ServiceNotifier {
    /// Create from the environment. Disabled when `NOTIFY_SOCKET` is unset.
    pub fn from_env() -> Self {
        #[cfg(unix)]
        {
            let socket = match std::env::var("NOTIFY_SOCKET") {
                Ok(path) if !path.is_empty() => {
                    match std::os::unix::net::UnixDatagram::unbound() {
                        Ok(sock) => {
                            info!(path = %path, "service-manager notifications enabled");
                            Some((sock, path))
                        }
                        Err(e) => {
                            warn!(?e, "failed to open notify socket, notifications disabled");
                            None
                        }
                    }
                }
                _ => {
                    debug!("NOTIFY_SOCKET not set, notifications disabled");
                    None
                }
            };
            Self { socket }
        }
        #[cfg(not(unix))]
        {
            Self { socket: None }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.socket.is_some()
    }

    /// Tell the service manager the process is ready.
    pub fn notify_ready(&self) -> RuntimeResult<()> {
        self.send("READY=1")
    }

    /// Periodic liveness ping.
    pub fn notify_watchdog(&self) -> RuntimeResult<()> {
        self.send("WATCHDOG=1")
    }

    /// Announce shutdown.
    pub fn notify_stopping(&self) -> RuntimeResult<()> {
        self.send("STOPPING=1")
    }

    #[cfg(unix)]
    fn send(&self, payload: &str) -> RuntimeResult<()> {
        if let Some((sock, path)) = &self.socket {
            sock.send_to(payload.as_bytes(), path)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn send(&self, _payload: &str) -> RuntimeResult<()> {
        Ok(())
    }
}
