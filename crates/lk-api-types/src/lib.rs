use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChainId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WalletId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WalletAddress(pub String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl WalletAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An account as reported by a wallet extension.
///
/// Two accounts are the same account when their addresses match; the display
/// metadata may change between updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub address: WalletAddress,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl Account {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: WalletAddress(address.into()),
            name: None,
            source: None,
        }
    }

    pub fn named(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(address)
        }
    }

    pub fn same_address(&self, other: &Account) -> bool {
        self.address == other.address
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub id: ChainId,
    pub name: String,
    /// Ordered endpoint list, the first entry is the primary.
    pub rpc_urls: Vec<String>,
    pub ss58_prefix: u16,
    pub testnet: bool,
}

impl ChainDescriptor {
    pub fn primary_endpoint(&self) -> Option<&str> {
        self.rpc_urls.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractDeployment {
    pub contract_id: String,
    pub network_id: ChainId,
    pub address: WalletAddress,
}

// ── HTTP surface ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionView {
    pub handle_id: String,
    pub endpoint: String,
    pub chain: ChainId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorView {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub status: ConnectionStatus,
    pub active_chain: ChainDescriptor,
    pub connection: Option<ConnectionView>,
    pub wallet: Option<WalletId>,
    pub accounts: Vec<Account>,
    pub active_account: Option<Account>,
    pub has_signer: bool,
    pub error: Option<ErrorView>,
    pub last_selected: Option<WalletAddress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectRequestBody {
    pub chain: Option<String>,
    pub wallet: Option<String>,
    pub preferred_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisconnectRequestBody {
    #[serde(default)]
    pub close_transport: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchChainRequestBody {
    pub chain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectAccountRequestBody {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletView {
    pub id: WalletId,
    pub name: String,
    pub remote_adapter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevAccountRequestBody {
    /// Derivation URI such as `//Charlie`; a random key is generated when absent.
    pub uri: Option<String>,
    pub name: Option<String>,
}
