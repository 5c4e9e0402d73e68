//! Core value types for the cell messaging substrate.
//!
//! Everything a message is made of lives here: the globally unique
//! [`MessageId`], the `name@domain` [`CellAddress`], the multi-hop
//! [`CellPath`] with its reversible cursor, and the [`Envelope`] that
//! carries a [`Payload`] between cells. Higher layers (the cell runtime,
//! tunnels, routing) depend on this crate and nothing here depends on them.

pub mod address;
pub mod envelope;
pub mod error;
pub mod id;
pub mod path;

pub use address::CellAddress;
pub use envelope::{Envelope, FailureCode, Payload};
pub use error::{CellError, Result};
pub use id::MessageId;
pub use path::CellPath;

/// Cell name that addresses every cell of a domain at once.
pub const BROADCAST_CELL: &str = "*";
