//! Link Seam
//!
//! A link carries envelopes to exactly one peer domain. The concrete
//! implementation (a TCP tunnel) lives in the network crate; the domain
//! registry only needs this trait to hand envelopes off and the event
//! stream to learn about connectivity changes.

use async_trait::async_trait;
use types::{Envelope, Result};

/// A point-to-point transport to a peer domain.
///
/// `forward` enqueues for transmission in FIFO order. The queue is bounded
/// and blocks the producer when full; envelopes accepted while the link is
/// re-establishing its connection are delivered after reconnection.
#[async_trait]
pub trait Link: Send + Sync {
    /// Process-unique link name.
    fn name(&self) -> &str;

    /// Domain on the far end, once the handshake has identified it.
    fn peer_domain(&self) -> Option<String>;

    /// Whether the link currently has an established connection.
    fn is_connected(&self) -> bool;

    /// Accept an envelope for transmission to the peer.
    async fn forward(&self, envelope: Envelope) -> Result<()>;
}

/// Connectivity change published by a link to its domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Connection established and handshake complete.
    Up { link: String, domain: String },
    /// Connection lost or link shut down.
    Down { link: String, domain: String },
}
