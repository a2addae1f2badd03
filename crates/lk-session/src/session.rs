use lk_api_types::{
    Account, ChainDescriptor, ConnectionStatus, ConnectionView, SessionView, WalletAddress, WalletId,
};
use lk_chain_client::ConnectionHandle;
use lk_crypto::Signer;
use std::fmt;
use std::sync::Arc;

use crate::SessionError;

/// One published state of the session. Snapshots are immutable once published.
#[derive(Clone)]
pub struct Session {
    pub status: ConnectionStatus,
    pub active_chain: ChainDescriptor,
    pub connection: Option<ConnectionHandle>,
    pub wallet: Option<WalletId>,
    /// In the order the extension reported them.
    pub accounts: Vec<Account>,
    pub active_account: Option<Account>,
    pub signer: Option<Arc<dyn Signer>>,
    pub error: Option<SessionError>,
    pub last_selected: Option<WalletAddress>,
}

impl Session {
    pub fn new(active_chain: ChainDescriptor, last_selected: Option<WalletAddress>) -> Self {
        Self {
            status: ConnectionStatus::Idle,
            active_chain,
            connection: None,
            wallet: None,
            accounts: Vec::new(),
            active_account: None,
            signer: None,
            error: None,
            last_selected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// `connected` needs a handle bound to the active chain, and the active
    /// account must be one of the listed accounts.
    pub fn is_consistent(&self) -> bool {
        let connection_ok = match (&self.status, &self.connection) {
            (ConnectionStatus::Connected, Some(handle)) => handle.is_bound_to(&self.active_chain.id),
            (ConnectionStatus::Connected, None) => false,
            _ => true,
        };
        let account_ok = self
            .active_account
            .as_ref()
            .is_none_or(|active| self.accounts.iter().any(|account| account.same_address(active)));
        connection_ok && account_ok
    }

    pub(crate) fn clear_wallet(&mut self) {
        self.wallet = None;
        self.accounts.clear();
        self.active_account = None;
        self.signer = None;
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            status: self.status,
            active_chain: self.active_chain.clone(),
            connection: self.connection.as_ref().map(|handle| ConnectionView {
                handle_id: handle.id().to_string(),
                endpoint: handle.endpoint().to_owned(),
                chain: handle.chain().id.clone(),
            }),
            wallet: self.wallet.clone(),
            accounts: self.accounts.clone(),
            active_account: self.active_account.clone(),
            has_signer: self.signer.is_some(),
            error: self.error.as_ref().map(SessionError::view),
            last_selected: self.last_selected.clone(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status)
            .field("active_chain", &self.active_chain.id)
            .field("connection", &self.connection)
            .field("wallet", &self.wallet)
            .field("accounts", &self.accounts.len())
            .field("active_account", &self.active_account.as_ref().map(|a| &a.address))
            .field("has_signer", &self.signer.is_some())
            .field("error", &self.error)
            .finish()
    }
}
