use anyhow::{Context, Result};
use lk_api_types::{ChainId, ContractDeployment, WalletId};
use lk_chain_client::DEVELOPMENT;
use lk_wallet_core::WalletDescriptor;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name presented to wallet extensions during the enable handshake.
    pub app_name: String,
    pub default_chain: ChainId,
    /// Wallets the application accepts, in preference order. Empty means every known wallet.
    pub supported_wallets: Vec<WalletId>,
    pub connect_on_init: bool,
    pub reconnect_on_drop: bool,
    pub request_timeout: Duration,
    pub deployments: Vec<ContractDeployment>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_name: "link!".to_owned(),
            default_chain: ChainId::new(DEVELOPMENT),
            supported_wallets: Vec::new(),
            connect_on_init: false,
            reconnect_on_drop: false,
            request_timeout: Duration::from_secs(30),
            deployments: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Reads `LINK_*` variables, falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let supported_wallets = env_var("LINK_SUPPORTED_WALLETS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(WalletId::new)
                    .collect()
            })
            .unwrap_or_default();

        let request_timeout = match env_var("LINK_RPC_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .with_context(|| format!("LINK_RPC_TIMEOUT_SECS is not a number: {raw}"))?,
            ),
            None => defaults.request_timeout,
        };

        let deployments = match env_var("LINK_DEPLOYMENTS") {
            Some(raw) => serde_json::from_str(&raw).context("LINK_DEPLOYMENTS is not a valid deployment list")?,
            None => Vec::new(),
        };

        Ok(Self {
            app_name: env_var("LINK_APP_NAME").unwrap_or(defaults.app_name),
            default_chain: env_var("LINK_DEFAULT_CHAIN")
                .map(ChainId)
                .unwrap_or(defaults.default_chain),
            supported_wallets,
            connect_on_init: env_flag("LINK_CONNECT_ON_INIT").unwrap_or(defaults.connect_on_init),
            reconnect_on_drop: env_flag("LINK_RECONNECT_ON_DROP").unwrap_or(defaults.reconnect_on_drop),
            request_timeout,
            deployments,
        })
    }

    pub fn wallet_descriptors(&self) -> Vec<WalletDescriptor> {
        if self.supported_wallets.is_empty() {
            return WalletDescriptor::known();
        }
        self.supported_wallets.iter().map(WalletDescriptor::resolve).collect()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    env_var(name).map(|value| parse_flag(&value))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
