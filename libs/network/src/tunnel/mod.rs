//! Tunnel / Link Supervisor
//!
//! A tunnel is a supervised point-to-point TCP connection carrying one
//! envelope per frame between two domains. The connector side owns the
//! state machine
//! `Disconnected → Resolving? → Connecting → Connected → RetryWait → …`;
//! a lost connection re-enters `RetryWait` with capped exponential
//! backoff, never `Dead`. `Dead` is reached only by explicit shutdown.
//! The acceptor side runs a single session per inbound connection and
//! leaves re-establishment to the connector.
//!
//! On connect both sides exchange a handshake frame naming their domain,
//! then the tunnel registers itself as the route to the peer and publishes
//! a link-up event for the routing manager.

mod listener;
mod queue;

pub use listener::TunnelListener;

use crate::backoff::BackoffPolicy;
use crate::location::LocationClient;
use async_trait::async_trait;
use cells::{Domain, Link, LinkEvent};
use codec::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};
use parking_lot::RwLock;
use queue::OutboundQueue;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use types::{CellError, CellPath, Envelope, Payload, Result};

/// Link supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Resolving,
    Connecting,
    Connected,
    RetryWait,
    Dead,
}

/// Where a connector tunnel finds its peer.
#[derive(Debug, Clone)]
pub enum TunnelTarget {
    /// Fixed `host:port`.
    Static(String),
    /// Domain whose address is resolved through the location directory
    /// before every connection attempt.
    Named {
        domain: String,
        locator: LocationClient,
    },
}

/// Tunnel tuning knobs.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Outbound queue bound. Producers block when it is full.
    pub queue_capacity: usize,
    /// Reconnection backoff schedule.
    pub backoff: BackoffPolicy,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Maximum frame size accepted in either direction.
    pub max_frame_bytes: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 512,
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// A supervised link to one peer domain.
pub struct Tunnel {
    name: String,
    state: RwLock<LinkState>,
    peer_domain: RwLock<Option<String>>,
    queue: OutboundQueue,
    shutdown: watch::Sender<bool>,
    retries: AtomicU32,
}

impl Tunnel {
    fn new(name: String, queue_capacity: usize) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            name,
            state: RwLock::new(LinkState::Disconnected),
            peer_domain: RwLock::new(None),
            queue: OutboundQueue::new(queue_capacity),
            shutdown,
            retries: AtomicU32::new(0),
        })
    }

    /// Start a connector tunnel. Returns immediately; the supervisor task
    /// establishes and maintains the connection in the background.
    pub fn connect(
        domain: Domain,
        name: impl Into<String>,
        target: TunnelTarget,
        config: TunnelConfig,
    ) -> Arc<Tunnel> {
        let tunnel = Tunnel::new(name.into(), config.queue_capacity);
        let supervisor = tunnel.clone();
        tokio::spawn(async move {
            run_connector(supervisor, domain, target, config).await;
        });
        tunnel
    }

    /// Run a single session over an already accepted connection.
    pub(crate) fn accepted(
        domain: Domain,
        stream: TcpStream,
        name: String,
        config: TunnelConfig,
    ) -> Arc<Tunnel> {
        let tunnel = Tunnel::new(name, config.queue_capacity);
        let session = tunnel.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = session.shutdown.subscribe();
            match run_session(&session, &domain, stream, &config, true, &mut shutdown_rx).await {
                SessionEnd::Shutdown => session.set_state(LinkState::Dead),
                SessionEnd::Failed(e) => {
                    debug!(link = %session.name, error = %e, "accepted tunnel session ended");
                    // The connector re-establishes; this side is done but
                    // was not explicitly shut down.
                    session.set_state(LinkState::Disconnected);
                }
            }
            session.queue.close();
        });
        tunnel
    }

    /// Explicitly shut the tunnel down. The supervisor withdraws routes,
    /// publishes a link-down event, and ends in `Dead`.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Current supervisor state.
    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    /// Envelopes waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Reconnection attempts since the last successful connect.
    pub fn retry_count(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
    }

    async fn retry_wait(&self, config: &TunnelConfig, shutdown_rx: &mut watch::Receiver<bool>) {
        self.set_state(LinkState::RetryWait);
        let retry = self.retries.fetch_add(1, Ordering::Relaxed);
        let delay = config.backoff.delay(retry);
        debug!(
            link = %self.name,
            retry = retry + 1,
            delay_ms = delay.as_millis() as u64,
            "waiting before reconnect"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}

#[async_trait]
impl Link for Tunnel {
    fn name(&self) -> &str {
        &self.name
    }

    fn peer_domain(&self) -> Option<String> {
        self.peer_domain.read().clone()
    }

    fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Enqueue for transmission. Blocks while the queue is full; succeeds
    /// even while the connection is re-establishing, in which case the
    /// envelope goes out after reconnect.
    async fn forward(&self, envelope: Envelope) -> Result<()> {
        if self.state() == LinkState::Dead {
            return Err(CellError::link_down(&self.name));
        }
        self.queue.push(envelope).await
    }
}

enum SessionEnd {
    Shutdown,
    Failed(CellError),
}

async fn run_connector(
    tunnel: Arc<Tunnel>,
    domain: Domain,
    target: TunnelTarget,
    config: TunnelConfig,
) {
    let mut shutdown_rx = tunnel.shutdown.subscribe();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let addr = match &target {
            TunnelTarget::Static(addr) => addr.clone(),
            TunnelTarget::Named {
                domain: peer,
                locator,
            } => {
                tunnel.set_state(LinkState::Resolving);
                match locator.resolve(peer).await {
                    Ok((host, port)) => format!("{}:{}", host, port),
                    Err(e) => {
                        debug!(link = %tunnel.name, peer = %peer, error = %e, "resolve failed");
                        tunnel.retry_wait(&config, &mut shutdown_rx).await;
                        continue;
                    }
                }
            }
        };

        tunnel.set_state(LinkState::Connecting);
        let stream =
            match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!(link = %tunnel.name, addr = %addr, error = %e, "connect failed");
                    tunnel.retry_wait(&config, &mut shutdown_rx).await;
                    continue;
                }
                Err(_) => {
                    debug!(link = %tunnel.name, addr = %addr, "connect timed out");
                    tunnel.retry_wait(&config, &mut shutdown_rx).await;
                    continue;
                }
            };

        match run_session(&tunnel, &domain, stream, &config, false, &mut shutdown_rx).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Failed(e) => {
                warn!(link = %tunnel.name, error = %e, "tunnel connection lost");
                tunnel.retry_wait(&config, &mut shutdown_rx).await;
            }
        }
    }

    tunnel.set_state(LinkState::Dead);
    tunnel.queue.close();
    // Clean up whatever routes still point here, e.g. when shutdown
    // arrived during a retry wait.
    let withdrawn = domain.withdraw_link(&tunnel.name);
    if !withdrawn.is_empty() {
        if let Some(peer) = tunnel.peer_domain() {
            domain.publish_link_event(LinkEvent::Down {
                link: tunnel.name.clone(),
                domain: peer,
            });
        }
    }
    info!(link = %tunnel.name, "tunnel shut down");
}

/// Handshake, route registration, and the I/O loops for one connection.
async fn run_session(
    tunnel: &Arc<Tunnel>,
    domain: &Domain,
    stream: TcpStream,
    config: &TunnelConfig,
    acceptor: bool,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(link = %tunnel.name, error = %e, "failed to set TCP_NODELAY");
    }
    let peer_addr = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, config.max_frame_bytes);
    let mut writer = FrameWriter::new(write_half, config.max_frame_bytes);

    // Both sides send their handshake first, then read the peer's.
    let hello = Envelope::new(
        CellPath::empty(),
        Payload::Handshake {
            domain: domain.name().to_string(),
        },
    );
    if let Err(e) = writer.write(&hello).await {
        return SessionEnd::Failed(e);
    }
    let peer = match reader.read().await {
        Ok(envelope) => match envelope.payload {
            Payload::Handshake { domain } => domain,
            _ => {
                return SessionEnd::Failed(CellError::decode(
                    "first frame was not a handshake".to_string(),
                ))
            }
        },
        Err(e) => return SessionEnd::Failed(e),
    };

    tunnel.retries.store(0, Ordering::Relaxed);
    *tunnel.peer_domain.write() = Some(peer.clone());
    tunnel.set_state(LinkState::Connected);
    domain.register_route(&peer, tunnel.clone());
    domain.publish_link_event(LinkEvent::Up {
        link: tunnel.name.clone(),
        domain: peer.clone(),
    });
    info!(link = %tunnel.name, peer = %peer, addr = ?peer_addr, "tunnel connected");

    let outcome = run_io(tunnel, domain, &mut reader, &mut writer, shutdown_rx).await;

    // A connector that merely lost its connection keeps the direct peer
    // route: envelopes sent meanwhile queue behind the reconnect instead
    // of failing. Explicit shutdown, and the acceptor side (which never
    // reconnects), withdraw it.
    if acceptor || matches!(outcome, SessionEnd::Shutdown) {
        domain.withdraw_link(&tunnel.name);
    }
    domain.publish_link_event(LinkEvent::Down {
        link: tunnel.name.clone(),
        domain: peer.clone(),
    });
    outcome
}

async fn run_io(
    tunnel: &Arc<Tunnel>,
    domain: &Domain,
    reader: &mut FrameReader<OwnedReadHalf>,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let queue = &tunnel.queue;

    let write_loop = async {
        loop {
            let Some(envelope) = queue.front().await else {
                return CellError::queue_closed("tunnel outbound queue");
            };
            if let Err(e) = writer.write(&envelope).await {
                // Not committed: the envelope stays queued and is resent
                // after reconnect.
                return e;
            }
            queue.commit();
        }
    };

    let read_loop = async {
        loop {
            match reader.read().await {
                Ok(envelope) => {
                    if let Err(e) = domain.route(envelope).await {
                        debug!(link = %tunnel.name, error = %e, "inbound envelope undeliverable");
                    }
                }
                Err(e) => return e,
            }
        }
    };

    tokio::select! {
        _ = shutdown_rx.changed() => SessionEnd::Shutdown,
        error = write_loop => SessionEnd::Failed(error),
        error = read_loop => SessionEnd::Failed(error),
    }
}
