use anyhow::Result;
use async_trait::async_trait;
use lk_api_types::{ChainDescriptor, ChainId};
use lk_crypto::Signer;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod connection;
mod registry;

pub use connection::{ConnectionHandle, ConnectionManager, Connector};
pub use registry::{ChainRegistry, DEVELOPMENT};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("unknown chain: {0}")]
    UnknownChain(ChainId),
    #[error("failed to initialize node client for {chain}: {cause}")]
    Initialization { chain: ChainId, cause: String },
}

/// Which RPC surface the node client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFlavor {
    /// Legacy `system_*`/`state_*` JSON-RPC, used against local contract nodes.
    Legacy,
    /// The newer `chainHead`/`chainSpec` JSON-RPC API.
    Modern,
}

impl ClientFlavor {
    pub fn for_chain(chain: &ChainDescriptor) -> Self {
        if chain.id.0 == DEVELOPMENT {
            Self::Legacy
        } else {
            Self::Modern
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub flavor: ClientFlavor,
    pub request_timeout: Duration,
}

impl ClientOptions {
    pub fn for_chain(chain: &ChainDescriptor, request_timeout: Duration) -> Self {
        Self {
            flavor: ClientFlavor::for_chain(chain),
            request_timeout,
        }
    }
}

/// A live client bound to one node endpoint.
#[async_trait]
pub trait NodeClient: Send + Sync {
    fn endpoint(&self) -> &str;
    fn is_connected(&self) -> bool;
    fn set_signer(&self, signer: Option<Arc<dyn Signer>>);
    async fn disconnect(&self) -> Result<()>;
    /// Resolves once the transport is gone, whether it dropped or was disconnected.
    async fn closed(&self);
}

#[async_trait]
pub trait NodeClientFactory: Send + Sync {
    async fn connect(&self, endpoint: &str, options: &ClientOptions) -> Result<Arc<dyn NodeClient>>;
}
