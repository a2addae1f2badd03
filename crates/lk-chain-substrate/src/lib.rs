use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use lk_chain_client::{ClientFlavor, ClientOptions, NodeClient, NodeClientFactory};
use lk_crypto::Signer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 15;
const DEFAULT_HEALTH_FAILURES: u32 = 3;

/// JSON-RPC over HTTP node client factory for Substrate nodes.
///
/// Reads `LINK_RPC_HEALTH_INTERVAL_SECS` (default: 15) and
/// `LINK_RPC_HEALTH_FAILURES` (default: 3) from environment at construction
/// time. The health probe drives [`NodeClient::closed`]: a client counts as
/// gone once that many consecutive probes fail.
pub struct SubstrateRpcFactory {
    http: reqwest::Client,
    health_interval: Duration,
    health_failures: u32,
}

impl Default for SubstrateRpcFactory {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SubstrateRpcFactory {
    pub fn new(health_interval: Option<Duration>) -> Self {
        let health_interval = health_interval.unwrap_or_else(|| {
            let secs = std::env::var("LINK_RPC_HEALTH_INTERVAL_SECS")
                .ok()
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_HEALTH_INTERVAL_SECS);
            Duration::from_secs(secs)
        });
        let health_failures = std::env::var("LINK_RPC_HEALTH_FAILURES")
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|failures| *failures > 0)
            .unwrap_or(DEFAULT_HEALTH_FAILURES);
        Self {
            http: reqwest::Client::new(),
            health_interval,
            health_failures,
        }
    }
}

#[async_trait]
impl NodeClientFactory for SubstrateRpcFactory {
    async fn connect(&self, endpoint: &str, options: &ClientOptions) -> Result<Arc<dyn NodeClient>> {
        let url = http_endpoint(endpoint)?;
        let (shutdown, _) = watch::channel(false);
        let client = SubstrateRpcClient {
            endpoint: endpoint.to_owned(),
            url,
            http: self.http.clone(),
            flavor: options.flavor,
            request_timeout: options.request_timeout,
            health_interval: self.health_interval,
            health_failures: self.health_failures,
            next_id: AtomicU64::new(1),
            shutdown,
            signer: RwLock::new(None),
        };

        let chain_name: String = client
            .call(probe_method(options.flavor), serde_json::json!([]))
            .await
            .with_context(|| format!("substrate probe against {endpoint}"))?;
        info!("node client ready at {} ({})", endpoint, chain_name);

        Ok(Arc::new(client))
    }
}

// ── JSON-RPC envelope ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

pub struct SubstrateRpcClient {
    endpoint: String,
    url: String,
    http: reqwest::Client,
    flavor: ClientFlavor,
    request_timeout: Duration,
    health_interval: Duration,
    health_failures: u32,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
    signer: RwLock<Option<Arc<dyn Signer>>>,
}

impl SubstrateRpcClient {
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(&self.url)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{method} transport"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("{method} HTTP {status}: {text}");
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("{method} parse"))?;

        if let Some(err) = body.error {
            bail!("{method} rpc error {}: {}", err.code, err.message);
        }
        body.result.ok_or_else(|| anyhow!("{method} returned no result"))
    }
}

#[async_trait]
impl NodeClient for SubstrateRpcClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        !*self.shutdown.borrow()
    }

    fn set_signer(&self, signer: Option<Arc<dyn Signer>>) {
        if let Ok(mut guard) = self.signer.write() {
            *guard = signer;
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.shutdown.send_replace(true);
        Ok(())
    }

    async fn closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.health_interval);
        let mut streak = FailureStreak::new(self.health_failures);
        ticker.tick().await;

        loop {
            if *shutdown.borrow_and_update() {
                return;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let probe = self
                        .call::<serde_json::Value>(health_method(self.flavor), serde_json::json!([]))
                        .await;
                    match probe {
                        Ok(_) => {
                            streak.observe(true);
                        }
                        Err(err) if streak.observe(false) => {
                            warn!(
                                "node at {} stopped answering after {} probes: {:#}",
                                self.endpoint, self.health_failures, err
                            );
                            self.shutdown.send_replace(true);
                            return;
                        }
                        Err(err) => debug!("health probe against {} failed: {:#}", self.endpoint, err),
                    }
                }
            }
        }
    }
}

/// Counts consecutive failed health probes.
struct FailureStreak {
    limit: u32,
    misses: u32,
}

impl FailureStreak {
    fn new(limit: u32) -> Self {
        Self { limit: limit.max(1), misses: 0 }
    }

    /// Returns true once `limit` probes in a row have failed.
    fn observe(&mut self, healthy: bool) -> bool {
        if healthy {
            self.misses = 0;
        } else {
            self.misses += 1;
        }
        self.misses >= self.limit
    }
}

fn probe_method(flavor: ClientFlavor) -> &'static str {
    match flavor {
        ClientFlavor::Legacy => "system_chain",
        ClientFlavor::Modern => "chainSpec_v1_chainName",
    }
}

fn health_method(flavor: ClientFlavor) -> &'static str {
    match flavor {
        ClientFlavor::Legacy => "system_health",
        ClientFlavor::Modern => "chainSpec_v1_genesisHash",
    }
}

/// Maps a websocket RPC url onto the HTTP endpoint the same node serves.
pub fn http_endpoint(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let url = if let Some(rest) = endpoint.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("ws://") {
        format!("http://{rest}")
    } else if endpoint.starts_with("https://") || endpoint.starts_with("http://") {
        endpoint.to_owned()
    } else {
        bail!("unsupported rpc endpoint scheme: {endpoint}");
    };
    Ok(url)
}
