//! Message Envelopes
//!
//! The unit every layer of the substrate exchanges: an id, a path, and a
//! tagged payload. Payload kinds the substrate itself understands (handshake
//! frames, route advertisements, delivery failures) are explicit variants;
//! everything an application cell sends rides in the opaque byte variant
//! with a caller-chosen type tag.

use crate::address::CellAddress;
use crate::id::MessageId;
use crate::path::CellPath;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Why an envelope could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    /// No routing entry for the destination domain.
    NoRoute,
    /// Domain reached, but no cell with that name.
    DestinationNotFound,
}

/// Message payload, dispatched by pattern matching on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Opaque application bytes with a caller-chosen type tag.
    Bytes { tag: String, data: Vec<u8> },

    /// Plain text, used by diagnostic and administrative cells.
    Text(String),

    /// First frame on a tunnel in either direction, naming the sender's
    /// domain.
    Handshake { domain: String },

    /// Domains reachable through the link this advertisement arrived on.
    RouteAdvertisement { domains: Vec<String> },

    /// Sent back along a reverted path when an envelope could not be
    /// delivered.
    DeliveryFailure { code: FailureCode, detail: String },

    /// Link liveness probe.
    Ping,

    /// Answer to [`Payload::Ping`].
    Pong,

    /// Local control event: a link came up. Never leaves the process.
    LinkUp { link: String, domain: String },

    /// Local control event: a link went down. Never leaves the process.
    LinkDown { link: String, domain: String },
}

impl Payload {
    /// Convenience constructor for the opaque byte variant.
    pub fn bytes(tag: impl Into<String>, data: Vec<u8>) -> Self {
        Payload::Bytes {
            tag: tag.into(),
            data,
        }
    }
}

/// The message unit exchanged between cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifier assigned at creation, stable across forwarding hops.
    pub id: MessageId,

    /// Id of the most recent request in the chain. Equals `id` on a
    /// request; on a reply it is the id of the request being answered.
    pub last_id: MessageId,

    /// Route and cursor.
    pub path: CellPath,

    /// Message content.
    pub payload: Payload,

    /// Creation time, nanoseconds since the Unix epoch.
    pub created_at: u64,

    /// Whether this envelope answers an earlier request.
    pub is_reply: bool,
}

impl Envelope {
    /// New request envelope over an explicit path.
    pub fn new(path: CellPath, payload: Payload) -> Self {
        let id = MessageId::new();
        Self {
            id,
            last_id: id,
            path,
            payload,
            created_at: now_nanos(),
            is_reply: false,
        }
    }

    /// New request from `source` to `destination`, with the source recorded
    /// as the first hop so a reply can retrace the route.
    pub fn request(source: CellAddress, destination: CellPath, payload: Payload) -> Self {
        Self::new(CellPath::outbound(source, destination), payload)
    }

    /// Build the reply to this envelope: the path is reverted and advanced
    /// past the responder, `last_id` is set to this envelope's id, and a
    /// fresh id is assigned.
    pub fn into_reply(&self, payload: Payload) -> Envelope {
        let mut path = self.path.revert();
        path.advance();
        Envelope {
            id: MessageId::new(),
            last_id: self.id,
            path,
            payload,
            created_at: now_nanos(),
            is_reply: true,
        }
    }

    /// Age of the envelope in nanoseconds, saturating at zero.
    pub fn age_nanos(&self) -> u64 {
        now_nanos().saturating_sub(self.created_at)
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> CellAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_request_records_source() {
        let env = Envelope::request(
            addr("client@doors"),
            CellPath::single(addr("pool@store")),
            Payload::Text("hello".into()),
        );
        assert_eq!(env.id, env.last_id);
        assert!(!env.is_reply);
        assert_eq!(env.path.current().unwrap(), &addr("pool@store"));
        assert_eq!(env.path.first().unwrap(), &addr("client@doors"));
        // Stamped at creation.
        assert!(env.age_nanos() < 60 * 1_000_000_000);
    }

    #[test]
    fn test_reply_correlates_and_retargets() {
        let request = Envelope::request(
            addr("client@doors"),
            CellPath::single(addr("pool@store")),
            Payload::Text("hello".into()),
        );
        let reply = request.into_reply(Payload::Text("world".into()));

        assert!(reply.is_reply);
        assert_eq!(reply.last_id, request.id);
        assert_ne!(reply.id, request.id);
        assert_eq!(reply.path.current().unwrap(), &addr("client@doors"));
    }
}
