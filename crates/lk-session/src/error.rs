use lk_api_types::{ChainId, ErrorView, WalletAddress, WalletId};
use lk_chain_client::ConnectionError;
use lk_wallet_core::WalletError;
use thiserror::Error;

/// Every failure the session can surface, either to a caller or in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown chain: {0}")]
    UnknownChain(ChainId),
    #[error("failed to initialize node client for {chain}: {cause}")]
    Initialization { chain: ChainId, cause: String },
    #[error("no compatible wallet extension detected")]
    NoExtensionDetected,
    #[error("wallet {wallet} rejected the connection: {reason}")]
    EnableRejected { wallet: WalletId, reason: String },
    #[error("connection to {0} was lost")]
    SubscriptionLost(ChainId),
    #[error("account {0} is not available")]
    AccountNotFound(WalletAddress),
    #[error("superseded by a newer session request")]
    Superseded,
    #[error("session has been disposed")]
    Disposed,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownChain(_) => "unknown_chain",
            Self::Initialization { .. } => "initialization_error",
            Self::NoExtensionDetected => "no_extension_detected",
            Self::EnableRejected { .. } => "enable_rejected",
            Self::SubscriptionLost(_) => "subscription_lost",
            Self::AccountNotFound(_) => "account_not_found",
            Self::Superseded => "superseded",
            Self::Disposed => "disposed",
        }
    }

    pub fn view(&self) -> ErrorView {
        ErrorView {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }
}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::UnknownChain(chain) => Self::UnknownChain(chain),
            ConnectionError::Initialization { chain, cause } => Self::Initialization { chain, cause },
        }
    }
}

impl From<WalletError> for SessionError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::NoExtensionDetected => Self::NoExtensionDetected,
            WalletError::EnableRejected { wallet, reason } => Self::EnableRejected { wallet, reason },
        }
    }
}
