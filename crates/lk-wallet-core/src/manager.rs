use lk_api_types::WalletId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::{
    AccountsCallback, ConnectMode, InjectedExtension, Unsubscribe, WalletDescriptor, WalletError,
    WalletHost,
};

/// A cancellable account subscription.
///
/// Cancelling is idempotent and stops forwarding updates immediately, even if
/// the extension delivers a late callback. Dropping the subscription cancels it.
pub struct AccountSubscription {
    live: Arc<AtomicBool>,
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl AccountSubscription {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.live.store(false, Ordering::Release);
        let unsubscribe = match self.unsubscribe.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }
}

impl Drop for AccountSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub fn subscribe_accounts(extension: &dyn InjectedExtension, on_update: AccountsCallback) -> AccountSubscription {
    let live = Arc::new(AtomicBool::new(true));
    let gate = live.clone();
    let unsubscribe = extension.subscribe_accounts(Box::new(move |accounts| {
        if gate.load(Ordering::Acquire) {
            on_update(accounts);
        }
    }));

    AccountSubscription {
        live,
        unsubscribe: Mutex::new(Some(unsubscribe)),
    }
}

#[derive(Clone)]
pub struct EnabledWallet {
    pub descriptor: WalletDescriptor,
    pub extension: Arc<dyn InjectedExtension>,
}

impl fmt::Debug for EnabledWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnabledWallet")
            .field("wallet", &self.descriptor.id)
            .finish()
    }
}

pub struct ActiveWallet {
    pub enabled: EnabledWallet,
    pub subscription: AccountSubscription,
}

/// Detects installed wallets and performs the enable handshake.
///
/// Holds no session state, so clones can run handshakes off the owner's task.
#[derive(Clone)]
pub struct WalletOpener {
    host: Arc<dyn WalletHost>,
    app_name: Arc<str>,
    supported: Arc<[WalletDescriptor]>,
}

impl WalletOpener {
    pub fn new(host: Arc<dyn WalletHost>, app_name: &str, supported: Vec<WalletDescriptor>) -> Self {
        Self {
            host,
            app_name: Arc::from(app_name),
            supported: Arc::from(supported),
        }
    }

    /// Supported wallets the host currently reports as installed.
    ///
    /// Installation is re-checked on every call.
    pub fn list_available(&self, mode: ConnectMode) -> impl Iterator<Item = &WalletDescriptor> + '_ {
        self.supported.iter().filter(move |wallet| {
            if mode == ConnectMode::Initial && wallet.remote_adapter {
                return false;
            }
            self.host.is_installed(&wallet.id)
        })
    }

    /// Picks `preferred` when it is available, otherwise the first available wallet.
    pub fn choose(&self, preferred: Option<&WalletId>, mode: ConnectMode) -> Result<WalletDescriptor, WalletError> {
        let mut available = self.list_available(mode).peekable();
        let first = available.peek().copied().cloned();
        let chosen = match preferred {
            Some(id) => available.find(|wallet| &wallet.id == id).cloned().or(first),
            None => first,
        };
        chosen.ok_or(WalletError::NoExtensionDetected)
    }

    pub async fn open(&self, preferred: Option<WalletId>, mode: ConnectMode) -> Result<EnabledWallet, WalletError> {
        let descriptor = self.choose(preferred.as_ref(), mode)?;
        info!("enabling wallet {} for {}", descriptor.id, self.app_name);

        let extension = self
            .host
            .enable(&descriptor.id, &self.app_name)
            .await
            .map_err(|err| WalletError::EnableRejected {
                wallet: descriptor.id.clone(),
                reason: format!("{err:#}"),
            })?;

        Ok(EnabledWallet { descriptor, extension })
    }
}

/// Owns the active extension and its account subscription.
pub struct WalletSessionManager {
    opener: WalletOpener,
    active: Option<ActiveWallet>,
}

impl WalletSessionManager {
    pub fn new(opener: WalletOpener) -> Self {
        Self { opener, active: None }
    }

    pub fn opener(&self) -> &WalletOpener {
        &self.opener
    }

    pub fn active(&self) -> Option<&ActiveWallet> {
        self.active.as_ref()
    }

    pub fn active_wallet_id(&self) -> Option<&WalletId> {
        self.active.as_ref().map(|active| &active.enabled.descriptor.id)
    }

    /// Cancels the previous subscription, then subscribes to `enabled`.
    pub fn activate(&mut self, enabled: EnabledWallet, on_update: AccountsCallback) -> &EnabledWallet {
        if let Some(previous) = self.active.take() {
            previous.subscription.cancel();
            debug!("cancelled account subscription of {}", previous.enabled.descriptor.id);
        }

        let subscription = subscribe_accounts(enabled.extension.as_ref(), on_update);
        info!("subscribed to accounts of {}", enabled.descriptor.id);
        &self.active.insert(ActiveWallet { enabled, subscription }).enabled
    }

    pub async fn enable(
        &mut self,
        preferred: Option<WalletId>,
        mode: ConnectMode,
        on_update: AccountsCallback,
    ) -> Result<&EnabledWallet, WalletError> {
        let enabled = self.opener.open(preferred, mode).await?;
        Ok(self.activate(enabled, on_update))
    }

    /// Cancels the subscription and lets the extension release its pairing.
    pub async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.subscription.cancel();
        if let Err(err) = active.enabled.extension.disconnect().await {
            warn!(
                "wallet {} did not disconnect cleanly: {:#}",
                active.enabled.descriptor.id, err
            );
        }
        info!("wallet {} torn down", active.enabled.descriptor.id);
    }
}
