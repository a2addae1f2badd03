use lk_api_types::{ChainDescriptor, ChainId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{ChainRegistry, ClientOptions, ConnectionError, NodeClient, NodeClientFactory};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One live client bound to exactly one chain.
///
/// Clones share the same underlying client and closed flag, so closing any
/// clone closes them all, and only the first close reaches the client.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: Uuid,
    chain: ChainDescriptor,
    client: Arc<dyn NodeClient>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    pub fn new(chain: ChainDescriptor, client: Arc<dyn NodeClient>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                chain,
                client,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn chain(&self) -> &ChainDescriptor {
        &self.inner.chain
    }

    pub fn endpoint(&self) -> &str {
        self.inner.client.endpoint()
    }

    pub fn client(&self) -> &Arc<dyn NodeClient> {
        &self.inner.client
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        !self.is_closed() && self.inner.client.is_connected()
    }

    pub fn is_bound_to(&self, chain: &ChainId) -> bool {
        &self.inner.chain.id == chain
    }

    /// Closes the client. Returns `false` if the handle was already closed.
    pub async fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.inner.client.set_signer(None);
        if let Err(err) = self.inner.client.disconnect().await {
            warn!(
                "node client {} for {} did not disconnect cleanly: {:#}",
                self.inner.id, self.inner.chain.id, err
            );
        }
        info!("closed connection {} to {}", self.inner.id, self.endpoint());
        true
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("chain", &self.inner.chain.id)
            .field("endpoint", &self.endpoint())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The suspending half of connection management: resolves chains and opens
/// new handles without touching whichever handle is current.
#[derive(Clone)]
pub struct Connector {
    registry: Arc<ChainRegistry>,
    factory: Arc<dyn NodeClientFactory>,
    request_timeout: Duration,
}

impl Connector {
    pub fn new(registry: Arc<ChainRegistry>, factory: Arc<dyn NodeClientFactory>) -> Self {
        Self {
            registry,
            factory,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn resolve(&self, chain: &ChainId) -> Result<ChainDescriptor, ConnectionError> {
        self.registry.resolve(chain)
    }

    pub async fn open(&self, chain: &ChainDescriptor) -> Result<ConnectionHandle, ConnectionError> {
        let Some(endpoint) = chain.primary_endpoint() else {
            return Err(ConnectionError::Initialization {
                chain: chain.id.clone(),
                cause: "chain has no rpc endpoints".to_owned(),
            });
        };

        let options = ClientOptions::for_chain(chain, self.request_timeout);
        info!("opening {:?} node client for {} at {}", options.flavor, chain.id, endpoint);

        let client = self
            .factory
            .connect(endpoint, &options)
            .await
            .map_err(|err| ConnectionError::Initialization {
                chain: chain.id.clone(),
                cause: format!("{err:#}"),
            })?;

        Ok(ConnectionHandle::new(chain.clone(), client))
    }
}

/// Owns the current connection handle.
pub struct ConnectionManager {
    connector: Connector,
    current: Option<ConnectionHandle>,
}

impl ConnectionManager {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector,
            current: None,
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn current(&self) -> Option<&ConnectionHandle> {
        self.current.as_ref()
    }

    /// Returns the current handle if it is open and bound to `chain`.
    pub fn reusable(&self, chain: &ChainId) -> Option<&ConnectionHandle> {
        self.current
            .as_ref()
            .filter(|handle| handle.is_open() && handle.is_bound_to(chain))
    }

    /// Makes `handle` current and closes the handle it replaces.
    pub async fn install(&mut self, handle: ConnectionHandle) {
        let previous = self.current.replace(handle);
        if let Some(previous) = previous {
            Self::teardown(&previous).await;
        }
    }

    /// Removes and closes the current handle, if any.
    pub async fn close_current(&mut self) {
        if let Some(handle) = self.current.take() {
            Self::teardown(&handle).await;
        }
    }

    pub async fn initialize(&mut self, chain: &ChainId) -> Result<ConnectionHandle, ConnectionError> {
        let descriptor = self.connector.resolve(chain)?;
        match self.connector.open(&descriptor).await {
            Ok(handle) => {
                self.install(handle.clone()).await;
                Ok(handle)
            }
            Err(err) => {
                self.close_current().await;
                Err(err)
            }
        }
    }

    pub async fn ensure_connected(&mut self, chain: &ChainId) -> Result<ConnectionHandle, ConnectionError> {
        if let Some(handle) = self.reusable(chain) {
            return Ok(handle.clone());
        }
        self.initialize(chain).await
    }

    pub async fn teardown(handle: &ConnectionHandle) {
        handle.close().await;
    }
}
