//! Error Taxonomy
//!
//! One error type spans the substrate: routing failures surface to senders
//! through `send_and_wait`, transport failures stay inside the tunnel's
//! reconnect loop, and creation errors are fatal for the cell being created
//! but never for the hosting process.

use thiserror::Error;

/// Result type alias for substrate operations.
pub type Result<T> = std::result::Result<T, CellError>;

/// Errors raised by the cell substrate.
#[derive(Debug, Error)]
pub enum CellError {
    /// Destination domain has no routing entry and no default route.
    #[error("no route to domain '{domain}'")]
    NoRoute { domain: String },

    /// `send_and_wait` deadline exceeded.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Domain reachable but the named cell does not exist, or it was
    /// killed while a caller was waiting on it.
    #[error("destination '{address}' not found")]
    DestinationNotFound { address: String },

    /// Link exists but is shutting down or already dead.
    #[error("link '{link}' is down")]
    LinkDown { link: String },

    /// Frame or payload could not be decoded.
    #[error("decode failed: {reason}")]
    Decode { reason: String },

    /// A cell with this name already exists in the domain.
    #[error("cell '{name}' is already registered")]
    DuplicateRegistration { name: String },

    /// Malformed address or path syntax, fatal at cell creation time.
    #[error("bad address '{input}': {reason}")]
    BadAddress { input: String, reason: String },

    /// An internal queue or mailbox was closed while sending.
    #[error("queue closed: {context}")]
    QueueClosed { context: String },

    /// Underlying I/O failure.
    #[error("i/o error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl CellError {
    pub fn no_route(domain: impl Into<String>) -> Self {
        Self::NoRoute {
            domain: domain.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn destination_not_found(address: impl ToString) -> Self {
        Self::DestinationNotFound {
            address: address.to_string(),
        }
    }

    pub fn link_down(link: impl Into<String>) -> Self {
        Self::LinkDown { link: link.into() }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub fn duplicate_registration(name: impl Into<String>) -> Self {
        Self::DuplicateRegistration { name: name.into() }
    }

    pub fn bad_address(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadAddress {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn queue_closed(context: impl Into<String>) -> Self {
        Self::QueueClosed {
            context: context.into(),
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Short category label for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NoRoute { .. } => "no_route",
            Self::Timeout { .. } => "timeout",
            Self::DestinationNotFound { .. } => "destination_not_found",
            Self::LinkDown { .. } => "link_down",
            Self::Decode { .. } => "decode",
            Self::DuplicateRegistration { .. } => "duplicate_registration",
            Self::BadAddress { .. } => "bad_address",
            Self::QueueClosed { .. } => "queue_closed",
            Self::Io { .. } => "io",
        }
    }
}
