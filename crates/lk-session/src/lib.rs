mod config;
mod error;
mod manager;
mod reconciler;
mod session;
mod store;

#[cfg(test)]
mod testing;

pub use config::SessionConfig;
pub use error::SessionError;
pub use manager::{SessionDeps, SessionHandle, SessionManager};
pub use reconciler::{ConnectRequest, select_active_account};
pub use session::Session;
pub use store::{ObserverGuard, SessionStore, SessionSubscription};
