//! Location Directory Server

use super::{LocationRequest, LocationResponse};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use types::{CellError, Result};

/// One registered domain address.
#[derive(Debug, Clone)]
pub struct LocationRecord {
    pub host: String,
    pub port: u16,
    registered_at: Instant,
}

/// TCP directory server holding domain-to-address records.
pub struct LocationServer {
    local_addr: SocketAddr,
    records: Arc<DashMap<String, LocationRecord>>,
    shutdown: watch::Sender<bool>,
}

impl LocationServer {
    /// Bind and start serving. A `ttl` of `None` keeps records until they
    /// are unregistered; otherwise records not refreshed within the ttl
    /// expire.
    pub async fn bind(bind_addr: &str, ttl: Option<Duration>) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| CellError::io("failed to bind location server", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CellError::io("failed to read local address", e))?;
        info!(addr = %local_addr, "location server listening");

        let records: Arc<DashMap<String, LocationRecord>> = Arc::new(DashMap::new());
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        if let Some(ttl) = ttl {
            let records = records.clone();
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                let mut sweep = tokio::time::interval(ttl / 2);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = sweep.tick() => {
                            records.retain(|domain, record| {
                                let live = record.registered_at.elapsed() < ttl;
                                if !live {
                                    debug!(domain = %domain, "expiring location record");
                                }
                                live
                            });
                        }
                    }
                }
            });
        }

        let accept_records = records.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let records = accept_records.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, records, ttl).await {
                                    debug!(peer = %peer, error = %e, "location connection ended");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "location accept failed");
                        }
                    }
                }
            }
            debug!("location server stopped");
        });

        Ok(Self {
            local_addr,
            records,
            shutdown,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn serve_connection(
    stream: TcpStream,
    records: Arc<DashMap<String, LocationRecord>>,
    ttl: Option<Duration>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<LocationRequest>(&line) {
            Ok(request) => apply(&records, ttl, request),
            Err(e) => LocationResponse::bad_request(format!("malformed request: {}", e)),
        };
        let mut body = serde_json::to_vec(&response).unwrap_or_default();
        body.push(b'\n');
        write_half.write_all(&body).await?;
    }
    Ok(())
}

fn apply(
    records: &DashMap<String, LocationRecord>,
    ttl: Option<Duration>,
    request: LocationRequest,
) -> LocationResponse {
    match request {
        LocationRequest::Register { domain, host, port } => {
            debug!(domain = %domain, host = %host, port = port, "location registered");
            records.insert(
                domain,
                LocationRecord {
                    host,
                    port,
                    registered_at: Instant::now(),
                },
            );
            LocationResponse::ok()
        }
        LocationRequest::Resolve { domain } => match records.get(&domain) {
            Some(record) => {
                let expired = ttl.is_some_and(|ttl| record.registered_at.elapsed() >= ttl);
                if expired {
                    drop(record);
                    records.remove(&domain);
                    LocationResponse::not_found()
                } else {
                    LocationResponse::found(record.host.clone(), record.port)
                }
            }
            None => LocationResponse::not_found(),
        },
        LocationRequest::Unregister { domain } => {
            records.remove(&domain);
            LocationResponse::ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationClient;

    #[tokio::test]
    async fn test_register_resolve_unregister() {
        let server = LocationServer::bind("127.0.0.1:0", None).await.unwrap();
        let client = LocationClient::new(server.local_addr().to_string());

        client.register("store", "10.0.0.7", 11711).await.unwrap();
        assert_eq!(server.record_count(), 1);
        let (host, port) = client.resolve("store").await.unwrap();
        assert_eq!(host, "10.0.0.7");
        assert_eq!(port, 11711);

        client.unregister("store").await.unwrap();
        assert!(client.resolve("store").await.is_err());
        assert_eq!(server.record_count(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_resolve_unknown_domain_is_not_found() {
        let server = LocationServer::bind("127.0.0.1:0", None).await.unwrap();
        let client = LocationClient::new(server.local_addr().to_string());
        assert!(client.resolve("ghost").await.is_err());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_records_expire_after_ttl() {
        let server = LocationServer::bind("127.0.0.1:0", Some(Duration::from_millis(100)))
            .await
            .unwrap();
        let client = LocationClient::new(server.local_addr().to_string());

        client.register("store", "10.0.0.7", 11711).await.unwrap();
        assert!(client.resolve("store").await.is_ok());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(client.resolve("store").await.is_err());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_reregistration_replaces_address() {
        let server = LocationServer::bind("127.0.0.1:0", None).await.unwrap();
        let client = LocationClient::new(server.local_addr().to_string());

        client.register("store", "10.0.0.7", 11711).await.unwrap();
        client.register("store", "10.0.0.8", 11712).await.unwrap();
        let (host, port) = client.resolve("store").await.unwrap();
        assert_eq!(host, "10.0.0.8");
        assert_eq!(port, 11712);
        server.shutdown();
    }
}
