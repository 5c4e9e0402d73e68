//! Cell Context
//!
//! Handed to every lifecycle and message callback. Wraps the domain with
//! the cell's own identity so sends record the correct source hop, and
//! tracks background tasks so they die with the cell.

use crate::domain::Domain;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use types::{CellAddress, CellPath, Envelope, Payload, Result};

type TaskList = Arc<Mutex<Vec<(String, JoinHandle<()>)>>>;

/// Per-cell handle on the domain.
#[derive(Clone)]
pub struct CellContext {
    domain: Domain,
    name: String,
    tasks: TaskList,
}

impl CellContext {
    pub(crate) fn new(domain: Domain, name: String, tasks: TaskList) -> Self {
        Self {
            domain,
            name,
            tasks,
        }
    }

    /// This cell's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The hosting domain.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// This cell's fully qualified address.
    pub fn address(&self) -> CellAddress {
        CellAddress::qualified(self.name.clone(), self.domain.name().to_string())
    }

    /// Fire-and-forget send to a textual destination path.
    ///
    /// Routing and delivery failures are logged and dropped; only a
    /// malformed destination is an error.
    pub async fn send(&self, destination: &str, payload: Payload) -> Result<()> {
        let destination: CellPath = destination.parse()?;
        self.send_envelope(Envelope::request(self.address(), destination, payload))
            .await;
        Ok(())
    }

    /// Fire-and-forget send of a prepared envelope.
    pub async fn send_envelope(&self, envelope: Envelope) {
        if let Err(e) = self.domain.route(envelope).await {
            debug!(cell = %self.name, error = %e, "fire-and-forget send dropped");
        }
    }

    /// Send a request and suspend this caller until the reply arrives or
    /// the timeout elapses. Other cells, and other callers within this
    /// cell's spawned tasks, are never blocked by this wait.
    pub async fn send_and_wait(
        &self,
        destination: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Envelope> {
        let destination: CellPath = destination.parse()?;
        let envelope = Envelope::request(self.address(), destination, payload);
        self.domain.send_and_wait(&self.name, envelope, timeout).await
    }

    /// Reply to a received request along its reverted path.
    pub async fn reply(&self, request: &Envelope, payload: Payload) -> Result<()> {
        self.domain.route(request.into_reply(payload)).await
    }

    /// Start a background task scoped to this cell. The task is aborted
    /// when the cell is killed.
    pub fn spawn<F>(&self, label: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|(_, task)| !task.is_finished());
        tasks.push((label.to_string(), handle));
    }
}
