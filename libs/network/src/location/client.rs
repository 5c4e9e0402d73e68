//! Location Directory Client

use super::{LocationRequest, LocationResponse};
use crate::backoff::BackoffPolicy;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{CellError, Result};

/// Client for a [`super::LocationServer`]. One connection per request; the
/// protocol is a single JSON line each way.
#[derive(Debug, Clone)]
pub struct LocationClient {
    server: String,
}

impl LocationClient {
    /// `server` is the directory's `host:port`.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }

    /// Advertise where `domain` can be reached. In strict mode callers
    /// abort startup on an error from this; lenient registration is
    /// [`LocationClient::register_lenient`].
    pub async fn register(&self, domain: &str, host: &str, port: u16) -> Result<()> {
        let response = self
            .call(&LocationRequest::Register {
                domain: domain.to_string(),
                host: host.to_string(),
                port,
            })
            .await?;
        if response.ok {
            Ok(())
        } else {
            Err(CellError::decode(format!(
                "location register rejected: {}",
                response.error.unwrap_or_default()
            )))
        }
    }

    /// Keep retrying registration in the background while startup
    /// proceeds. The returned handle can be aborted at shutdown.
    pub fn register_lenient(
        &self,
        domain: &str,
        host: &str,
        port: u16,
        backoff: BackoffPolicy,
    ) -> JoinHandle<()> {
        let client = self.clone();
        let domain = domain.to_string();
        let host = host.to_string();
        tokio::spawn(async move {
            let mut retry = 0u32;
            loop {
                match client.register(&domain, &host, port).await {
                    Ok(()) => {
                        info!(domain = %domain, "location registration succeeded");
                        return;
                    }
                    Err(e) => {
                        let delay = backoff.delay(retry);
                        warn!(
                            domain = %domain,
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "location registration failed, retrying"
                        );
                        retry = retry.saturating_add(1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }

    /// Look up the current address of a domain.
    pub async fn resolve(&self, domain: &str) -> Result<(String, u16)> {
        let response = self
            .call(&LocationRequest::Resolve {
                domain: domain.to_string(),
            })
            .await?;
        match (response.ok, response.host, response.port) {
            (true, Some(host), Some(port)) => Ok((host, port)),
            _ => Err(CellError::no_route(domain)),
        }
    }

    /// Drop a domain's record.
    pub async fn unregister(&self, domain: &str) -> Result<()> {
        self.call(&LocationRequest::Unregister {
            domain: domain.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn call(&self, request: &LocationRequest) -> Result<LocationResponse> {
        let stream = TcpStream::connect(&self.server)
            .await
            .map_err(|e| CellError::io("failed to connect to location server", e))?;
        let (read_half, mut write_half) = stream.into_split();

        let mut body = serde_json::to_vec(request)
            .map_err(|e| CellError::decode(format!("location request encoding failed: {}", e)))?;
        body.push(b'\n');
        write_half
            .write_all(&body)
            .await
            .map_err(|e| CellError::io("failed to send location request", e))?;

        let mut line = String::new();
        let mut reader = BufReader::new(read_half);
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| CellError::io("failed to read location response", e))?;
        if line.is_empty() {
            return Err(CellError::queue_closed("location server closed connection"));
        }
        debug!(server = %self.server, response = %line.trim(), "location response");
        serde_json::from_str(&line)
            .map_err(|e| CellError::decode(format!("malformed location response: {}", e)))
    }
}
