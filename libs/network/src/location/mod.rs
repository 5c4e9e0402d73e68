//! Location Directory
//!
//! A small directory service mapping domain names to their current network
//! address. Domains register at startup; tunnels configured with a domain
//! name instead of a fixed address resolve through it before connecting.
//!
//! The wire protocol is one JSON object per line in each direction.

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};

pub use client::LocationClient;
pub use server::LocationServer;

/// Request sent to the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum LocationRequest {
    /// Advertise where a domain can be reached. Re-registering refreshes
    /// the record.
    Register {
        domain: String,
        host: String,
        port: u16,
    },
    /// Look up a domain's current address.
    Resolve { domain: String },
    /// Drop a domain's record.
    Unregister { domain: String },
}

/// Response from the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LocationResponse {
    pub(crate) fn ok() -> Self {
        Self {
            ok: true,
            host: None,
            port: None,
            error: None,
        }
    }

    pub(crate) fn found(host: String, port: u16) -> Self {
        Self {
            ok: true,
            host: Some(host),
            port: Some(port),
            error: None,
        }
    }

    pub(crate) fn not_found() -> Self {
        Self {
            ok: false,
            host: None,
            port: None,
            error: Some("not-found".into()),
        }
    }

    pub(crate) fn bad_request(detail: String) -> Self {
        Self {
            ok: false,
            host: None,
            port: None,
            error: Some(detail),
        }
    }
}
