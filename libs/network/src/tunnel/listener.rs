//! Tunnel Listener
//!
//! Accepts inbound tunnel connections and runs one accepted session per
//! peer. Accepted sessions do not reconnect; when a connection drops, the
//! connecting side re-establishes it.

use super::{LinkState, Tunnel, TunnelConfig};
use cells::Domain;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use types::{CellError, Result};

/// Listening side of the tunnel transport.
pub struct TunnelListener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accepted: Arc<Mutex<Vec<Arc<Tunnel>>>>,
}

impl TunnelListener {
    /// Bind and start accepting. Each accepted connection handshakes and
    /// then serves as the route to the connecting domain.
    pub async fn bind(domain: Domain, bind_addr: &str, config: TunnelConfig) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| CellError::io("failed to bind tunnel listener", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CellError::io("failed to read local address", e))?;
        info!(domain = %domain.name(), addr = %local_addr, "tunnel listener bound");

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let accepted: Arc<Mutex<Vec<Arc<Tunnel>>>> = Arc::new(Mutex::new(Vec::new()));

        let tunnels = accepted.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    incoming = listener.accept() => match incoming {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "tunnel connection accepted");
                            let tunnel = Tunnel::accepted(
                                domain.clone(),
                                stream,
                                format!("accept-{}", peer),
                                config.clone(),
                            );
                            let mut tunnels = tunnels.lock();
                            tunnels.retain(|t| {
                                !matches!(t.state(), LinkState::Dead | LinkState::Disconnected)
                            });
                            tunnels.push(tunnel);
                        }
                        Err(e) => {
                            warn!(error = %e, "tunnel accept failed");
                        }
                    }
                }
            }
            // Listener is going away; tear down the sessions it accepted.
            for tunnel in tunnels.lock().drain(..) {
                tunnel.shutdown();
            }
            debug!("tunnel listener stopped");
        });

        Ok(Self {
            local_addr,
            shutdown,
            accepted,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Currently live accepted tunnels.
    pub fn accepted_count(&self) -> usize {
        self.accepted
            .lock()
            .iter()
            .filter(|t| t.state() == LinkState::Connected)
            .count()
    }

    /// Stop accepting and shut down all accepted sessions.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
