use anyhow::Result;
use async_trait::async_trait;
use lk_api_types::{Account, WalletId};
use lk_crypto::Signer;
use std::sync::Arc;
use thiserror::Error;

mod manager;

pub use manager::{
    AccountSubscription, ActiveWallet, EnabledWallet, WalletOpener, WalletSessionManager,
    subscribe_accounts,
};

pub const POLKADOT_JS: &str = "polkadot-js";
pub const SUBWALLET_JS: &str = "subwallet-js";
pub const TALISMAN: &str = "talisman";
pub const NIGHTLY_CONNECT: &str = "nightly-connect";

pub type AccountsCallback = Box<dyn Fn(Vec<Account>) + Send + Sync>;
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("no compatible wallet extension detected")]
    NoExtensionDetected,
    #[error("wallet {wallet} rejected the connection: {reason}")]
    EnableRejected { wallet: WalletId, reason: String },
}

/// Whether a connect was started automatically or by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    /// Automatic connect at startup; remote adapters must not prompt.
    Initial,
    #[default]
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletDescriptor {
    pub id: WalletId,
    pub name: String,
    /// Opens its own pairing UI instead of reading an injected extension.
    pub remote_adapter: bool,
}

impl WalletDescriptor {
    pub fn known() -> Vec<WalletDescriptor> {
        vec![
            Self::new(POLKADOT_JS, "Polkadot{.js}", false),
            Self::new(SUBWALLET_JS, "SubWallet", false),
            Self::new(TALISMAN, "Talisman", false),
            Self::new(NIGHTLY_CONNECT, "Nightly Connect", true),
        ]
    }

    pub fn resolve(id: &WalletId) -> WalletDescriptor {
        Self::known()
            .into_iter()
            .find(|wallet| &wallet.id == id)
            .unwrap_or_else(|| Self::new(&id.0, &id.0, false))
    }

    fn new(id: &str, name: &str, remote_adapter: bool) -> Self {
        Self {
            id: WalletId::new(id),
            name: name.to_owned(),
            remote_adapter,
        }
    }
}

/// The environment that injects wallet extensions.
#[async_trait]
pub trait WalletHost: Send + Sync {
    fn is_installed(&self, wallet: &WalletId) -> bool;
    async fn enable(&self, wallet: &WalletId, app_name: &str) -> Result<Arc<dyn InjectedExtension>>;
}

/// An extension after a successful enable handshake.
#[async_trait]
pub trait InjectedExtension: Send + Sync {
    fn wallet_id(&self) -> &WalletId;
    fn signer(&self) -> Arc<dyn Signer>;
    /// Registers `on_update`, which receives the full account list on every change.
    fn subscribe_accounts(&self, on_update: AccountsCallback) -> Unsubscribe;

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
