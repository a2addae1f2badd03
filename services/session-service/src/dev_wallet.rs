use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{Json, extract::State};
use lk_api_types::{Account, DevAccountRequestBody, WalletId};
use lk_crypto::{DevKeypair, DevKeyring, Signer};
use lk_wallet_core::{AccountsCallback, InjectedExtension, Unsubscribe, WalletHost};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

use crate::{ApiResult, AppState, bad_request};

type Listener = Arc<dyn Fn(Vec<Account>) + Send + Sync>;

/// Wallet host backed by an in-process development keyring.
///
/// It reports a single wallet as installed and hands every caller the same
/// extension, so accounts added at runtime reach the live subscription.
pub(crate) struct DevWalletHost {
    extension: Arc<DevExtension>,
}

impl DevWalletHost {
    pub(crate) fn from_uris(wallet: &str, uris: &[String]) -> Result<Self> {
        let keyring = DevKeyring::from_uris(uris.iter().map(String::as_str))?;
        Ok(Self {
            extension: Arc::new(DevExtension {
                id: WalletId::new(wallet),
                keyring: Arc::new(keyring),
                listeners: Arc::default(),
                next_listener: AtomicU64::new(0),
            }),
        })
    }

    pub(crate) fn wallet_id(&self) -> &WalletId {
        &self.extension.id
    }

    /// Adds `pair` to the keyring and pushes the new account list to subscribers.
    pub(crate) fn add_account(&self, pair: DevKeypair) -> Result<Account> {
        let address = self.extension.keyring.insert(pair)?;
        let accounts = self.extension.accounts();
        let account = accounts
            .iter()
            .find(|account| account.address == address)
            .cloned()
            .ok_or_else(|| anyhow!("account {address} missing after insert"))?;
        self.extension.notify(accounts);
        info!("dev wallet added account {}", address);
        Ok(account)
    }
}

#[async_trait]
impl WalletHost for DevWalletHost {
    fn is_installed(&self, wallet: &WalletId) -> bool {
        wallet == &self.extension.id
    }

    async fn enable(&self, wallet: &WalletId, app_name: &str) -> Result<Arc<dyn InjectedExtension>> {
        if !self.is_installed(wallet) {
            return Err(anyhow!("wallet {wallet} is not installed"));
        }
        info!("dev wallet {} enabled for {}", wallet, app_name);
        let extension: Arc<dyn InjectedExtension> = self.extension.clone();
        Ok(extension)
    }
}

struct DevExtension {
    id: WalletId,
    keyring: Arc<DevKeyring>,
    listeners: Arc<Mutex<HashMap<u64, Listener>>>,
    next_listener: AtomicU64,
}

impl DevExtension {
    fn accounts(&self) -> Vec<Account> {
        self.keyring.accounts(&self.id.0)
    }

    fn notify(&self, accounts: Vec<Account>) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(accounts.clone());
        }
    }
}

#[async_trait]
impl InjectedExtension for DevExtension {
    fn wallet_id(&self) -> &WalletId {
        &self.id
    }

    fn signer(&self) -> Arc<dyn Signer> {
        self.keyring.clone()
    }

    fn subscribe_accounts(&self, on_update: AccountsCallback) -> Unsubscribe {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::from(on_update);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, listener.clone());
        listener(self.accounts());

        let listeners = self.listeners.clone();
        Box::new(move || {
            listeners.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        })
    }
}

pub(crate) async fn dev_add_account(
    State(state): State<AppState>,
    Json(request): Json<DevAccountRequestBody>,
) -> ApiResult<Account> {
    let pair = match request.uri.as_deref().map(str::trim) {
        Some(uri) if !uri.is_empty() => DevKeypair::from_uri(uri).map_err(|err| bad_request(&format!("{err:#}")))?,
        Some(_) => return Err(bad_request("uri cannot be blank")),
        None => DevKeypair::new_random(),
    };
    let pair = match request.name {
        Some(name) => pair.with_name(name),
        None => pair,
    };

    let account = state
        .dev_wallet
        .add_account(pair)
        .map_err(|err| bad_request(&format!("{err:#}")))?;
    Ok(Json(account))
}
