//! Domain Registry
//!
//! One `Domain` per process: the table of local cells, the routing table,
//! and the pending-reply registry. `route` is the single decision point
//! every envelope passes through, whether it was produced locally or
//! arrived over a tunnel: deliver to a local mailbox, resolve a waiter,
//! or forward to the link that reaches the destination domain.

use crate::cell::{Cell, CellState};
use crate::context::CellContext;
use crate::link::{Link, LinkEvent};
use crate::metrics::{DomainMetrics, DomainStats};
use crate::routes::RouteTable;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::{
    CellError, Envelope, FailureCode, MessageId, Payload, Result, BROADCAST_CELL,
};

const LINK_EVENT_CAPACITY: usize = 64;

/// Handle on a process-wide domain. Cheap to clone; all clones share the
/// same registry state.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

struct DomainInner {
    name: String,
    cells: DashMap<String, CellHandle>,
    routes: RwLock<RouteTable>,
    waiters: DashMap<MessageId, ReplyWaiter>,
    link_events: broadcast::Sender<LinkEvent>,
    metrics: DomainMetrics,
}

/// Runtime handle for one registered cell.
struct CellHandle {
    mailbox: mpsc::UnboundedSender<Envelope>,
    state: Arc<RwLock<CellState>>,
    shutdown: watch::Sender<bool>,
    tasks: Arc<Mutex<Vec<(String, JoinHandle<()>)>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// One pending `send_and_wait` call.
struct ReplyWaiter {
    caller: String,
    dest_cell: Option<String>,
    tx: oneshot::Sender<Result<Envelope>>,
}

/// Outcome of a single dispatch attempt. On failure the envelope is handed
/// back when it is still available so a delivery-failure reply can be
/// generated from it.
struct DispatchFailure {
    envelope: Option<Envelope>,
    error: CellError,
}

impl Domain {
    /// Create a domain with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        info!(domain = %name, "creating domain");
        let (link_events, _) = broadcast::channel(LINK_EVENT_CAPACITY);
        Self {
            inner: Arc::new(DomainInner {
                name,
                cells: DashMap::new(),
                routes: RwLock::new(RouteTable::new()),
                waiters: DashMap::new(),
                link_events,
                metrics: DomainMetrics::default(),
            }),
        }
    }

    /// Domain name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // ------------------------------------------------------------------
    // Cell lifecycle
    // ------------------------------------------------------------------

    /// Register a cell and run its `on_start` hook. Returns once the cell
    /// is `Running`, or the hook's error, in which case nothing remains
    /// registered. A duplicate name is a configuration error.
    pub async fn register<C: Cell>(&self, name: &str, cell: C) -> Result<()> {
        validate_cell_name(name)?;

        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (started_tx, started_rx) = oneshot::channel();
        let state = Arc::new(RwLock::new(CellState::Created));
        let tasks = Arc::new(Mutex::new(Vec::new()));

        let handle = CellHandle {
            mailbox: mailbox_tx,
            state: state.clone(),
            shutdown: shutdown_tx,
            tasks: tasks.clone(),
            worker: Mutex::new(None),
        };

        match self.inner.cells.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(CellError::duplicate_registration(name));
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }

        let ctx = CellContext::new(self.clone(), name.to_string(), tasks);
        let worker = tokio::spawn(run_cell(
            Box::new(cell),
            ctx,
            mailbox_rx,
            shutdown_rx,
            state,
            started_tx,
        ));
        if let Some(entry) = self.inner.cells.get(name) {
            *entry.worker.lock() = Some(worker);
        }

        match started_rx.await {
            Ok(Ok(())) => {
                DomainMetrics::incr(&self.inner.metrics.cells_registered);
                info!(domain = %self.inner.name, cell = name, "cell started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.inner.cells.remove(name);
                error!(domain = %self.inner.name, cell = name, error = %e, "cell failed to start");
                Err(e)
            }
            Err(_) => {
                self.inner.cells.remove(name);
                Err(CellError::queue_closed(format!(
                    "worker for cell '{}' ended before startup",
                    name
                )))
            }
        }
    }

    /// Kill a cell. Idempotent: killing an unknown or already dead cell is
    /// a no-op. Pending `send_and_wait` calls made by the cell, and calls
    /// addressed to it, fail immediately with a destination-gone error
    /// instead of waiting for their timeouts.
    pub async fn kill(&self, name: &str) -> Result<()> {
        let Some((_, handle)) = self.inner.cells.remove(name) else {
            return Ok(());
        };

        *handle.state.write() = CellState::Stopping;
        let _ = handle.shutdown.send(true);

        for (label, task) in handle.tasks.lock().drain(..) {
            debug!(cell = name, task = %label, "aborting cell task");
            task.abort();
        }

        self.fail_waiters_for(name);

        // Give on_stop a moment to run, then cut the worker loose.
        let worker = handle.worker.lock().take();
        if let Some(worker) = worker {
            if tokio::time::timeout(Duration::from_secs(1), worker)
                .await
                .is_err()
            {
                warn!(cell = name, "cell worker did not stop in time");
            }
        }

        DomainMetrics::incr(&self.inner.metrics.cells_killed);
        info!(domain = %self.inner.name, cell = name, "cell killed");
        Ok(())
    }

    fn fail_waiters_for(&self, name: &str) {
        let stale: Vec<MessageId> = self
            .inner
            .waiters
            .iter()
            .filter(|entry| {
                entry.caller == name || entry.dest_cell.as_deref() == Some(name)
            })
            .map(|entry| *entry.key())
            .collect();
        for id in stale {
            if let Some((_, waiter)) = self.inner.waiters.remove(&id) {
                let _ = waiter.tx.send(Err(CellError::destination_not_found(name)));
            }
        }
    }

    /// Names of all registered cells.
    pub fn cell_names(&self) -> Vec<String> {
        self.inner.cells.iter().map(|e| e.key().clone()).collect()
    }

    /// State of a registered cell.
    pub fn cell_state(&self, name: &str) -> Option<CellState> {
        self.inner.cells.get(name).map(|e| *e.state.read())
    }

    /// Kill every cell in the domain.
    pub async fn shutdown(&self) {
        for name in self.cell_names() {
            let _ = self.kill(&name).await;
        }
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Route an envelope one step: deliver locally, resolve a waiter, or
    /// forward over a link. Undeliverable requests additionally produce a
    /// delivery-failure reply along the reverted path so a remote sender's
    /// waiter can fail before its timeout.
    pub async fn route(&self, envelope: Envelope) -> Result<()> {
        DomainMetrics::incr(&self.inner.metrics.messages_routed);
        match self.dispatch(envelope).await {
            Ok(()) => Ok(()),
            Err(failure) => {
                DomainMetrics::incr(&self.inner.metrics.delivery_failures);
                if let Some(undelivered) = failure.envelope {
                    self.notify_sender(&undelivered, &failure.error).await;
                }
                Err(failure.error)
            }
        }
    }

    async fn dispatch(&self, envelope: Envelope) -> std::result::Result<(), DispatchFailure> {
        let mut envelope = envelope;
        loop {
            let Some(target) = envelope.path.current().cloned() else {
                return Err(DispatchFailure {
                    error: CellError::destination_not_found("<empty path>"),
                    envelope: Some(envelope),
                });
            };

            if !target.is_local_to(&self.inner.name) {
                let domain = target.domain_or(&self.inner.name).to_string();
                let link = self.inner.routes.read().lookup(&domain);
                return match link {
                    Some(link) => match link.forward(envelope).await {
                        Ok(()) => {
                            DomainMetrics::incr(&self.inner.metrics.messages_forwarded);
                            Ok(())
                        }
                        // The link consumed the envelope; no failure reply
                        // can be generated, the sender times out instead.
                        Err(e) => Err(DispatchFailure {
                            error: e,
                            envelope: None,
                        }),
                    },
                    None => Err(DispatchFailure {
                        error: CellError::no_route(&domain),
                        envelope: Some(envelope),
                    }),
                };
            }

            if envelope.is_reply {
                // A reply transiting this domain on a multi-hop path moves
                // on to its next hop; only at the final hop does it resolve
                // a waiter.
                if !envelope.path.at_final_hop() {
                    envelope.path.advance();
                    continue;
                }
                self.resolve_reply(envelope);
                return Ok(());
            }

            if target.cell() == BROADCAST_CELL {
                for entry in self.inner.cells.iter() {
                    if entry.mailbox.send(envelope.clone()).is_err() {
                        debug!(cell = %entry.key(), "broadcast to closed mailbox skipped");
                    }
                }
                DomainMetrics::incr(&self.inner.metrics.messages_delivered);
                return Ok(());
            }

            return match self.inner.cells.get(target.cell()) {
                Some(handle) => match handle.mailbox.send(envelope) {
                    Ok(()) => {
                        DomainMetrics::incr(&self.inner.metrics.messages_delivered);
                        Ok(())
                    }
                    Err(send_error) => Err(DispatchFailure {
                        error: CellError::destination_not_found(&target),
                        envelope: Some(send_error.0),
                    }),
                },
                None => Err(DispatchFailure {
                    error: CellError::destination_not_found(&target),
                    envelope: Some(envelope),
                }),
            };
        }
    }

    /// Resolve a reply against the pending-reply registry. A reply with no
    /// matching waiter is a late arrival and is discarded.
    fn resolve_reply(&self, envelope: Envelope) {
        match self.inner.waiters.remove(&envelope.last_id) {
            Some((_, waiter)) => {
                let outcome = match &envelope.payload {
                    Payload::DeliveryFailure { code, detail } => {
                        Err(failure_to_error(*code, detail))
                    }
                    _ => Ok(envelope),
                };
                let _ = waiter.tx.send(outcome);
                DomainMetrics::incr(&self.inner.metrics.replies_matched);
            }
            None => {
                DomainMetrics::incr(&self.inner.metrics.late_replies_discarded);
                debug!(
                    domain = %self.inner.name,
                    last_id = %envelope.last_id,
                    "discarding reply with no pending waiter"
                );
            }
        }
    }

    /// Send a delivery-failure reply back along the reverted path of an
    /// undeliverable request. Failures of the notification itself are
    /// logged and dropped.
    async fn notify_sender(&self, undelivered: &Envelope, error: &CellError) {
        if undelivered.is_reply || undelivered.path.len() < 2 {
            return;
        }
        let (code, detail) = match error {
            CellError::NoRoute { domain } => (FailureCode::NoRoute, domain.clone()),
            CellError::DestinationNotFound { address } => {
                (FailureCode::DestinationNotFound, address.clone())
            }
            _ => return,
        };
        let reply = undelivered.into_reply(Payload::DeliveryFailure { code, detail });
        if let Err(failure) = self.dispatch(reply).await {
            debug!(
                domain = %self.inner.name,
                error = %failure.error,
                "delivery-failure reply dropped"
            );
        }
    }

    // ------------------------------------------------------------------
    // Request/reply
    // ------------------------------------------------------------------

    /// Send a request on behalf of `caller` and wait for its reply. Always
    /// returns within the timeout plus scheduling slack: a matching reply,
    /// a routing error detected locally, a destination-gone failure when
    /// the awaited cell is killed, or a timeout.
    pub async fn send_and_wait(
        &self,
        caller: &str,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope> {
        let id = envelope.id;
        let dest_cell = envelope
            .path
            .current()
            .filter(|a| a.is_local_to(&self.inner.name))
            .map(|a| a.cell().to_string());

        let (tx, rx) = oneshot::channel();
        self.inner.waiters.insert(
            id,
            ReplyWaiter {
                caller: caller.to_string(),
                dest_cell,
                tx,
            },
        );

        if let Err(e) = self.route(envelope).await {
            self.inner.waiters.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CellError::queue_closed("reply channel dropped")),
            Err(_) => {
                self.inner.waiters.remove(&id);
                DomainMetrics::incr(&self.inner.metrics.timeouts);
                Err(CellError::timeout(timeout.as_millis() as u64))
            }
        }
    }

    // ------------------------------------------------------------------
    // Routing table and links
    // ------------------------------------------------------------------

    /// Install an exact route to a domain.
    pub fn register_route(&self, domain: &str, link: Arc<dyn Link>) {
        debug!(domain = %self.inner.name, dest = domain, link = link.name(), "route installed");
        self.inner.routes.write().insert(domain, link);
    }

    /// Install the default (uplink) route.
    pub fn set_default_route(&self, link: Arc<dyn Link>) {
        debug!(domain = %self.inner.name, link = link.name(), "default route installed");
        self.inner.routes.write().set_default(link);
    }

    /// Remove the exact route to a domain.
    pub fn remove_route(&self, domain: &str) {
        self.inner.routes.write().remove(domain);
    }

    /// Remove every route through the named link. Returns the withdrawn
    /// domains.
    pub fn withdraw_link(&self, link_name: &str) -> Vec<String> {
        let withdrawn = self.inner.routes.write().withdraw_link(link_name);
        if !withdrawn.is_empty() {
            debug!(
                domain = %self.inner.name,
                link = link_name,
                routes = withdrawn.len(),
                "routes withdrawn"
            );
        }
        withdrawn
    }

    /// Domain-to-link-name pairs for every exact routing entry.
    pub fn route_entries(&self) -> Vec<(String, String)> {
        self.inner.routes.read().entries()
    }

    /// Every distinct link in the routing table.
    pub fn links(&self) -> Vec<Arc<dyn Link>> {
        self.inner.routes.read().links()
    }

    /// The link that exactly routes to a domain.
    pub fn link_for(&self, domain: &str) -> Option<Arc<dyn Link>> {
        self.inner.routes.read().lookup_exact(domain)
    }

    /// Subscribe to link up/down events.
    pub fn subscribe_links(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.link_events.subscribe()
    }

    /// Publish a link event to all subscribers. Called by links on
    /// connect, disconnect, and shutdown.
    pub fn publish_link_event(&self, event: LinkEvent) {
        let _ = self.inner.link_events.send(event);
    }

    /// Metrics snapshot.
    pub fn stats(&self) -> DomainStats {
        self.inner.metrics.snapshot()
    }
}

fn failure_to_error(code: FailureCode, detail: &str) -> CellError {
    match code {
        FailureCode::NoRoute => CellError::NoRoute {
            domain: detail.to_string(),
        },
        FailureCode::DestinationNotFound => CellError::DestinationNotFound {
            address: detail.to_string(),
        },
    }
}

fn validate_cell_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CellError::bad_address(name, "empty cell name"));
    }
    if name == BROADCAST_CELL {
        return Err(CellError::bad_address(name, "reserved broadcast name"));
    }
    if name.contains('@') || name.contains(':') {
        return Err(CellError::bad_address(name, "cell name contains '@' or ':'"));
    }
    Ok(())
}

async fn run_cell(
    mut cell: Box<dyn Cell>,
    ctx: CellContext,
    mut mailbox: mpsc::UnboundedReceiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    state: Arc<RwLock<CellState>>,
    started: oneshot::Sender<Result<()>>,
) {
    if let Err(e) = cell.on_start(&ctx).await {
        *state.write() = CellState::Dead;
        let _ = started.send(Err(e));
        return;
    }
    *state.write() = CellState::Running;
    let _ = started.send(Ok(()));

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = mailbox.recv() => match received {
                Some(envelope) => {
                    if let Err(e) = cell.on_message(&ctx, envelope).await {
                        error!(
                            cell = %ctx.name(),
                            error = %e,
                            category = e.category(),
                            "message handling failed"
                        );
                    }
                }
                None => break,
            }
        }
    }

    *state.write() = CellState::Stopping;
    cell.on_stop(&ctx).await;
    *state.write() = CellState::Dead;
    debug!(cell = %ctx.name(), "cell worker stopped");
}
