//! Routing Manager
//!
//! A cell (conventionally named `routing`) that keeps multi-domain
//! topologies converging without manual configuration beyond the static
//! links: every connected link advertises the set of domains reachable
//! through it, advertisements are merged into the domain's routing table,
//! and the merged table is re-advertised to the other links. Routes
//! learned through a link are withdrawn when it goes down.
//!
//! Advertisements are split-horizon: the set sent over a link never
//! contains routes learned through that same link, so two domains cannot
//! feed each other phantom reachability after a withdrawal.

use async_trait::async_trait;
use cells::{Cell, CellContext, Domain, LinkEvent};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use types::{CellAddress, CellPath, Envelope, Payload, Result};

/// Conventional cell name for the routing manager.
pub const ROUTING_CELL: &str = "routing";

/// Distance-vector route exchange between connected domains.
pub struct RoutingManager {
    advertise_interval: Duration,
    /// Routes installed from advertisements: domain name to the link name
    /// it was learned through. Direct tunnel routes are never in here.
    learned: HashMap<String, String>,
}

impl RoutingManager {
    pub fn new() -> Self {
        Self {
            advertise_interval: Duration::from_secs(10),
            learned: HashMap::new(),
        }
    }

    /// Override the periodic advertisement interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.advertise_interval = interval;
        self
    }

    fn install(&mut self, ctx: &CellContext, advertiser: &str, domains: Vec<String>) -> bool {
        let domain = ctx.domain();
        let Some(link) = domain.link_for(advertiser) else {
            debug!(advertiser = %advertiser, "advertisement from domain with no direct link");
            return false;
        };

        let mut changed = false;
        for name in domains {
            if name == domain.name() || name == advertiser {
                continue;
            }
            // A route that exists but was never learned is a direct tunnel
            // route; advertisements do not override those. A learned route
            // is kept until withdrawn, so advertisements cannot make the
            // table flap between equally good links.
            if self.learned.contains_key(&name) || domain.link_for(&name).is_some() {
                continue;
            }
            domain.register_route(&name, link.clone());
            self.learned.insert(name.clone(), link.name().to_string());
            info!(
                domain = %domain.name(),
                dest = %name,
                via = %advertiser,
                "route learned"
            );
            changed = true;
        }
        changed
    }

    fn withdraw_via(&mut self, ctx: &CellContext, link: &str) -> bool {
        let lost: Vec<String> = self
            .learned
            .iter()
            .filter(|(_, via)| via.as_str() == link)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &lost {
            self.learned.remove(name);
            ctx.domain().remove_route(name);
            info!(domain = %ctx.domain().name(), dest = %name, "route withdrawn");
        }
        !lost.is_empty()
    }
}

impl Default for RoutingManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cell for RoutingManager {
    async fn on_start(&mut self, ctx: &CellContext) -> Result<()> {
        // Link events arrive on a broadcast channel; feed them through the
        // mailbox so handling stays sequential with advertisements.
        let mut events = ctx.domain().subscribe_links();
        let domain = ctx.domain().clone();
        let me = ctx.address();
        ctx.spawn("link-events", async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    // A lagged subscriber skips ahead; the periodic
                    // advertisement cycle repairs anything missed.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let payload = match event {
                    LinkEvent::Up { link, domain } => Payload::LinkUp { link, domain },
                    LinkEvent::Down { link, domain } => Payload::LinkDown { link, domain },
                };
                let envelope = Envelope::new(CellPath::single(me.clone()), payload);
                let _ = domain.route(envelope).await;
            }
        });

        let domain = ctx.domain().clone();
        let interval = self.advertise_interval;
        ctx.spawn("advertise", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup order
            // does not matter.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                advertise_all(&domain).await;
            }
        });

        Ok(())
    }

    async fn on_message(&mut self, ctx: &CellContext, envelope: Envelope) -> Result<()> {
        match envelope.payload {
            Payload::LinkUp { ref domain, .. } => {
                let peer = domain.clone();
                debug!(peer = %peer, "link up, advertising");
                advertise_to(ctx.domain(), &peer).await;
                Ok(())
            }
            Payload::LinkDown { ref link, .. } => {
                let link = link.clone();
                if self.withdraw_via(ctx, &link) {
                    advertise_all(ctx.domain()).await;
                }
                Ok(())
            }
            Payload::RouteAdvertisement { ref domains } => {
                let Some(advertiser) = envelope
                    .path
                    .first()
                    .map(|a| a.domain_or(ctx.domain().name()).to_string())
                else {
                    return Ok(());
                };
                if self.install(ctx, &advertiser, domains.clone()) {
                    advertise_all(ctx.domain()).await;
                }
                Ok(())
            }
            Payload::Ping => ctx.reply(&envelope, Payload::Pong).await,
            _ => Ok(()),
        }
    }
}

/// The reachability set to advertise over the link named `via_link`:
/// the local domain plus every exact route not learned through that link,
/// minus the peer itself.
fn advertisement_for(domain: &Domain, peer: &str, via_link: &str) -> Vec<String> {
    let mut set = vec![domain.name().to_string()];
    for (dest, link_name) in domain.route_entries() {
        if dest == peer || link_name == via_link {
            continue;
        }
        set.push(dest);
    }
    set.sort();
    set.dedup();
    set
}

/// Advertise the local reachability set to the routing manager of `peer`.
async fn advertise_to(domain: &Domain, peer: &str) {
    let Some(link) = domain.link_for(peer) else {
        return;
    };
    let set = advertisement_for(domain, peer, link.name());
    let envelope = Envelope::request(
        CellAddress::qualified(ROUTING_CELL, domain.name().to_string()),
        CellPath::single(CellAddress::qualified(ROUTING_CELL, peer.to_string())),
        Payload::RouteAdvertisement { domains: set },
    );
    if let Err(e) = domain.route(envelope).await {
        debug!(peer = %peer, error = %e, "advertisement dropped");
    }
}

/// Advertise to every directly connected peer.
async fn advertise_all(domain: &Domain) {
    let peers: Vec<String> = domain
        .links()
        .iter()
        .filter_map(|link| link.peer_domain())
        .collect();
    for peer in peers {
        advertise_to(domain, &peer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cells::Link;
    use std::sync::Arc;

    struct StubLink {
        name: String,
        peer: String,
    }

    #[async_trait]
    impl Link for StubLink {
        fn name(&self) -> &str {
            &self.name
        }
        fn peer_domain(&self) -> Option<String> {
            Some(self.peer.clone())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn forward(&self, _envelope: Envelope) -> Result<()> {
            Ok(())
        }
    }

    fn stub(name: &str, peer: &str) -> Arc<dyn Link> {
        Arc::new(StubLink {
            name: name.into(),
            peer: peer.into(),
        })
    }

    #[test]
    fn test_advertisement_excludes_peer_and_its_link() {
        let domain = Domain::new("hub");
        domain.register_route("doors", stub("l-doors", "doors"));
        domain.register_route("store", stub("l-store", "store"));
        // Learned through the doors link.
        domain.register_route("far", stub("l-doors", "doors"));

        let set = advertisement_for(&domain, "doors", "l-doors");
        assert_eq!(set, vec!["hub".to_string(), "store".to_string()]);

        let set = advertisement_for(&domain, "store", "l-store");
        assert_eq!(
            set,
            vec!["doors".to_string(), "far".to_string(), "hub".to_string()]
        );
    }
}
