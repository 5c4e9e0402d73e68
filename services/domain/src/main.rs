//! domaind - one cell domain per process
//!
//! Starts a domain, wires up the transport configured on the command
//! line (tunnel listener, static and directory-resolved connectors, an
//! optional uplink default route, the routing manager, location
//! registration), and runs until interrupted.
//!
//! Examples:
//!
//! ```text
//! # A hub that accepts tunnels and routes between its leaves.
//! domaind --name hub --listen 11711 --routed
//!
//! # A leaf that only knows its uplink.
//! domaind --name doors --uplink hub-host:11711 --routed
//!
//! # A dynamically scheduled domain registering with the directory.
//! domaind --name pool-7 --listen 0 --lm dir-host:11710 --routed
//! ```

use anyhow::{bail, Context, Result};
use cells::Domain;
use clap::Parser;
use network::routing::ROUTING_CELL;
use network::{
    BackoffPolicy, LocationClient, RoutingManager, Tunnel, TunnelConfig, TunnelListener,
    TunnelTarget,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "domaind", version, about = "Start a cell domain process")]
struct Args {
    /// Domain name.
    #[arg(long)]
    name: String,

    /// Accept tunnel connections on this address. A bare port binds all
    /// interfaces; `0` picks an ephemeral port.
    #[arg(long)]
    listen: Option<String>,

    /// Connect a tunnel to a peer at `host:port`. Repeatable.
    #[arg(long = "connect", value_name = "HOST:PORT")]
    connect: Vec<String>,

    /// Install a static route: envelopes for DOMAIN leave through the
    /// tunnel connected with `--connect HOST:PORT`. Repeatable.
    #[arg(long = "route", value_name = "DOMAIN=HOST:PORT")]
    route: Vec<String>,

    /// Connect a tunnel to a named domain resolved through the location
    /// directory. Repeatable; requires --lm.
    #[arg(long = "connect-domain", value_name = "DOMAIN")]
    connect_domain: Vec<String>,

    /// Connect a tunnel to `host:port` and install it as the default
    /// (uplink) route for all unmatched destinations.
    #[arg(long, value_name = "HOST:PORT")]
    uplink: Option<String>,

    /// Run a routing manager cell so reachability is learned from and
    /// advertised to connected domains.
    #[arg(long)]
    routed: bool,

    /// Location directory address.
    #[arg(long, value_name = "HOST:PORT")]
    lm: Option<String>,

    /// Abort startup if location registration fails, instead of retrying
    /// in the background.
    #[arg(long)]
    lm_strict: bool,

    /// Address to advertise in the location directory. Defaults to
    /// 127.0.0.1 with the listener's port.
    #[arg(long, value_name = "HOST:PORT")]
    advertise: Option<String>,

    /// Routing advertisement interval in seconds.
    #[arg(long, default_value_t = 10)]
    advertise_interval: u64,

    /// Log filter, overriding RUST_LOG.
    #[arg(long, value_name = "FILTER")]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let domain = Domain::new(args.name.clone());
    let config = TunnelConfig::default();

    let listener = match &args.listen {
        Some(listen) => {
            let bind_addr = normalize_listen_addr(listen);
            Some(
                TunnelListener::bind(domain.clone(), &bind_addr, config.clone())
                    .await
                    .with_context(|| format!("failed to listen on {}", bind_addr))?,
            )
        }
        None => None,
    };

    let locator = args.lm.as_deref().map(LocationClient::new);

    let mut lenient_registration = None;
    if let Some(locator) = &locator {
        let (host, port) = advertised_address(&args, listener.as_ref())?;
        if args.lm_strict {
            locator
                .register(&args.name, &host, port)
                .await
                .context("strict location registration failed")?;
            info!(domain = %args.name, host = %host, port, "registered with location directory");
        } else {
            lenient_registration =
                Some(locator.register_lenient(&args.name, &host, port, BackoffPolicy::default()));
        }
    }

    if args.routed {
        let manager =
            RoutingManager::new().with_interval(Duration::from_secs(args.advertise_interval));
        domain.register(ROUTING_CELL, manager).await?;
    }

    let mut tunnels: Vec<Arc<Tunnel>> = Vec::new();
    let mut connectors: HashMap<String, Arc<Tunnel>> = HashMap::new();

    for target in &args.connect {
        let tunnel = Tunnel::connect(
            domain.clone(),
            format!("link-{}", target),
            TunnelTarget::Static(target.clone()),
            config.clone(),
        );
        connectors.insert(target.clone(), tunnel.clone());
        tunnels.push(tunnel);
    }

    for route in &args.route {
        let Some((dest, target)) = route.split_once('=') else {
            bail!("--route must be DOMAIN=HOST:PORT, got '{}'", route);
        };
        let Some(tunnel) = connectors.get(target) else {
            bail!("--route {} refers to '{}', which has no --connect", route, target);
        };
        domain.register_route(dest, tunnel.clone());
    }

    for peer in &args.connect_domain {
        let Some(locator) = &locator else {
            bail!("--connect-domain requires --lm");
        };
        tunnels.push(Tunnel::connect(
            domain.clone(),
            format!("link-{}", peer),
            TunnelTarget::Named {
                domain: peer.clone(),
                locator: locator.clone(),
            },
            config.clone(),
        ));
    }

    if let Some(uplink) = &args.uplink {
        let tunnel = Tunnel::connect(
            domain.clone(),
            "uplink",
            TunnelTarget::Static(uplink.clone()),
            config.clone(),
        );
        domain.set_default_route(tunnel.clone());
        tunnels.push(tunnel);
    }

    info!(
        domain = %args.name,
        listening = ?listener.as_ref().map(|l| l.local_addr()),
        tunnels = tunnels.len(),
        routed = args.routed,
        "domain running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for interrupt")?;
    info!(domain = %args.name, "shutting down");

    if let Some(handle) = lenient_registration {
        handle.abort();
    }
    if let Some(locator) = &locator {
        let _ = locator.unregister(&args.name).await;
    }
    for tunnel in &tunnels {
        tunnel.shutdown();
    }
    if let Some(listener) = &listener {
        listener.shutdown();
    }
    domain.shutdown().await;

    Ok(())
}

/// `11711` means every interface; `host:port` is used as given.
fn normalize_listen_addr(listen: &str) -> String {
    if listen.contains(':') {
        listen.to_string()
    } else {
        format!("0.0.0.0:{}", listen)
    }
}

/// The `host:port` to publish in the location directory.
fn advertised_address(args: &Args, listener: Option<&TunnelListener>) -> Result<(String, u16)> {
    if let Some(advertise) = &args.advertise {
        let (host, port) = advertise
            .rsplit_once(':')
            .context("--advertise must be host:port")?;
        let port: u16 = port.parse().context("--advertise port is not a number")?;
        return Ok((host.to_string(), port));
    }
    let listener = listener.context("--lm without --advertise requires --listen")?;
    Ok(("127.0.0.1".to_string(), listener.local_addr().port()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_listen_addr() {
        assert_eq!(normalize_listen_addr("11711"), "0.0.0.0:11711");
        assert_eq!(normalize_listen_addr("10.0.0.7:11711"), "10.0.0.7:11711");
    }
}
