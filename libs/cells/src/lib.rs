//! Cell Runtime and Domain Registry
//!
//! The actor layer of the substrate. A [`Domain`] hosts named cells, each
//! with a private FIFO mailbox drained by its own worker task, so cell
//! state never needs internal locking. The domain routes envelopes: local
//! destinations go to a mailbox (or resolve a pending reply waiter),
//! remote destinations go to the [`Link`] selected from the routing table.
//!
//! Request/reply correlation uses a registry of one-shot completion
//! channels keyed by message id: `send_and_wait` registers, routes, and
//! awaits with a deadline; the delivery path fulfills. Late replies find
//! no waiter and are discarded.

pub mod cell;
pub mod context;
pub mod domain;
pub mod link;
pub mod metrics;
pub mod routes;

pub use cell::{Cell, CellState};
pub use context::CellContext;
pub use domain::Domain;
pub use link::{Link, LinkEvent};
pub use metrics::{DomainMetrics, DomainStats};
pub use routes::RouteTable;
