//! Relay accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::signaling::relay::attendance::{AttendanceLog, TracingAttendanceLog};
use crate::signaling::relay::handler::{handle_connection, RelayState};
use crate::signaling::relay::rooms::RoomRegistry;

/// A bound signaling relay. `bind` then `serve`; tests bind port 0 and read
/// the ephemeral address back with [`RelayServer::local_addr`].
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Bind with the default attendance hook (structured log lines).
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_attendance(addr, Arc::new(TracingAttendanceLog)).await
    }

    /// Bind with a custom attendance hook, the seam the training service's
    /// business layer plugs into.
    pub async fn bind_with_attendance(
        addr: &str,
        attendance: Arc<dyn AttendanceLog>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind relay on {}: {}", addr, e)))?;
        Ok(Self {
            listener,
            state: Arc::new(RelayState {
                registry: RoomRegistry::new(),
                attendance,
            }),
        })
    }

    /// The bound address, for clients of an ephemeral-port relay.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::Transport(format!("relay has no local address: {}", e)))
    }

    /// Accept connections until the task is dropped or aborted. Each
    /// connection runs in its own task; one misbehaving client never stalls
    /// the accept loop.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "signaling relay listening");
        loop {
            let (stream, remote) = self
                .listener
                .accept()
                .await
                .map_err(|e| Error::Transport(format!("relay accept failed: {}", e)))?;
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, state).await {
                    debug!(%remote, error = %e, "relay connection ended with error");
                }
            });
        }
    }
}
