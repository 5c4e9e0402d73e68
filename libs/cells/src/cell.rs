//! Cell Behavior and Lifecycle

use crate::context::CellContext;
use async_trait::async_trait;
use types::{Envelope, Result};

/// Lifecycle state of a registered cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// Registered, `on_start` not yet complete.
    Created,
    /// Processing messages.
    Running,
    /// Kill requested, `on_stop` running.
    Stopping,
    /// Terminal. The mailbox is discarded and the name can be reused.
    Dead,
}

/// Behavior of a cell.
///
/// Delivery is strictly sequential per cell: `on_message` is never invoked
/// concurrently with itself for the same cell, so implementations keep
/// plain mutable state. An error returned from `on_message` is logged and
/// the cell keeps running; an error from `on_start` aborts registration.
#[async_trait]
pub trait Cell: Send + 'static {
    /// Called once before the first message.
    async fn on_start(&mut self, _ctx: &CellContext) -> Result<()> {
        Ok(())
    }

    /// Handle one envelope from the mailbox.
    async fn on_message(&mut self, ctx: &CellContext, envelope: Envelope) -> Result<()>;

    /// Called once after the worker loop ends.
    async fn on_stop(&mut self, _ctx: &CellContext) {}
}
