//! The session state machine.
//!
//! The reconciler is owned by a single actor task and is the only code that
//! mutates the session. Anything that may suspend (opening a node client, the
//! wallet handshake) runs in a spawned attempt tagged with an attempt
//! generation. Its result comes back as a [`SessionEvent`] and is applied only
//! if no newer request has bumped the generation since; otherwise whatever the
//! attempt opened is closed and the result is dropped.

use lk_api_types::{Account, ChainDescriptor, ChainId, ConnectionStatus, WalletAddress, WalletId};
use lk_chain_client::{ConnectionHandle, ConnectionManager, Connector};
use lk_storage::{AccountMemory, LastAccountRecord};
use lk_wallet_core::{ConnectMode, EnabledWallet, WalletOpener, WalletSessionManager};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Session, SessionConfig, SessionError, SessionStore};

pub(crate) type Reply = oneshot::Sender<Result<Arc<Session>, SessionError>>;

/// Parameters of a `connect` call. Unset fields fall back to the current
/// chain, the first available wallet, and the remembered account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub chain: Option<ChainId>,
    pub wallet: Option<WalletId>,
    pub preferred_address: Option<WalletAddress>,
    pub(crate) intent: ConnectIntent,
}

impl ConnectRequest {
    pub fn chain(mut self, chain: ChainId) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn wallet(mut self, wallet: WalletId) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn preferred_address(mut self, address: WalletAddress) -> Self {
        self.preferred_address = Some(address);
        self
    }

    pub(crate) fn startup(connect_on_init: bool) -> Self {
        Self {
            intent: if connect_on_init {
                ConnectIntent::Initial
            } else {
                ConnectIntent::NodeOnly
            },
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum ConnectIntent {
    #[default]
    Explicit,
    Initial,
    NodeOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WalletPlan {
    Skip,
    Enable {
        preferred: Option<WalletId>,
        mode: ConnectMode,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttemptPlan {
    chain: ChainId,
    wallet: WalletPlan,
    preferred_address: Option<WalletAddress>,
}

struct InFlight {
    generation: u64,
    plan: AttemptPlan,
    waiters: Vec<Reply>,
}

pub(crate) struct AttemptOutcome {
    generation: u64,
    chain: ChainDescriptor,
    connection: Result<Option<ConnectionHandle>, SessionError>,
    wallet: Option<Result<EnabledWallet, SessionError>>,
}

pub(crate) enum SessionEvent {
    AttemptFinished(AttemptOutcome),
    AccountsUpdated { generation: u64, accounts: Vec<Account> },
    TransportLost { handle_id: Uuid },
}

/// Picks the active account: the preferred address, else the previously
/// active address, else the first account. `None` only for an empty list.
pub fn select_active_account(
    accounts: &[Account],
    preferred: Option<&WalletAddress>,
    previous: Option<&WalletAddress>,
) -> Option<Account> {
    let by_address = |address: &WalletAddress| accounts.iter().find(|account| &account.address == address);
    preferred
        .and_then(by_address)
        .or_else(|| previous.and_then(by_address))
        .or_else(|| accounts.first())
        .cloned()
}

pub(crate) struct Reconciler {
    config: Arc<SessionConfig>,
    connections: ConnectionManager,
    wallets: WalletSessionManager,
    memory: Arc<dyn AccountMemory>,
    store: SessionStore,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Session,
    generation: u64,
    wallet_generation: u64,
    preferred_address: Option<WalletAddress>,
    in_flight: Option<InFlight>,
    pending_attempts: usize,
}

impl Reconciler {
    pub(crate) fn new(
        config: Arc<SessionConfig>,
        connections: ConnectionManager,
        wallets: WalletSessionManager,
        memory: Arc<dyn AccountMemory>,
        store: SessionStore,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let state = store.snapshot().as_ref().clone();
        Self {
            config,
            connections,
            wallets,
            memory,
            store,
            events,
            state,
            generation: 0,
            wallet_generation: 0,
            preferred_address: None,
            in_flight: None,
            pending_attempts: 0,
        }
    }

    pub(crate) fn pending_attempts(&self) -> usize {
        self.pending_attempts
    }

    fn publish(&self) -> Arc<Session> {
        debug_assert!(self.state.is_consistent(), "inconsistent session: {:?}", self.state);
        self.store.publish(self.state.clone())
    }

    fn record_failure(&mut self, err: SessionError) -> SessionError {
        self.state.status = ConnectionStatus::Error;
        self.state.error = Some(err.clone());
        err
    }

    fn reject(&mut self, err: SessionError, reply: Option<Reply>) {
        warn!("session request rejected: {}", err);
        let err = self.record_failure(err);
        self.publish();
        if let Some(reply) = reply {
            let _ = reply.send(Err(err));
        }
    }

    // ── Requests ─────────────────────────────────────────────────────

    pub(crate) fn connect(&mut self, request: ConnectRequest, reply: Option<Reply>) {
        let chain_id = request
            .chain
            .unwrap_or_else(|| self.state.active_chain.id.clone());
        let chain = match self.connections.connector().resolve(&chain_id) {
            Ok(chain) => chain,
            Err(err) => return self.reject(err.into(), reply),
        };

        let wallet = match request.intent {
            ConnectIntent::NodeOnly => WalletPlan::Skip,
            ConnectIntent::Initial => WalletPlan::Enable {
                preferred: request.wallet,
                mode: ConnectMode::Initial,
            },
            ConnectIntent::Explicit => WalletPlan::Enable {
                preferred: request.wallet,
                mode: ConnectMode::Explicit,
            },
        };
        self.begin(chain, wallet, request.preferred_address, reply);
    }

    /// Moves to `chain`, re-enabling the wallet that is active (or being enabled).
    pub(crate) fn switch_chain(&mut self, chain: ChainId, reply: Option<Reply>) {
        let chain = match self.connections.connector().resolve(&chain) {
            Ok(chain) => chain,
            Err(err) => return self.reject(err.into(), reply),
        };

        let wallet = match self.wallets.active_wallet_id() {
            Some(id) => WalletPlan::Enable {
                preferred: Some(id.clone()),
                mode: ConnectMode::Explicit,
            },
            None => self
                .in_flight
                .as_ref()
                .map(|in_flight| in_flight.plan.wallet.clone())
                .unwrap_or(WalletPlan::Skip),
        };
        self.begin(chain, wallet, None, reply);
    }

    pub(crate) async fn select_account(&mut self, address: WalletAddress) -> Result<Arc<Session>, SessionError> {
        let Some(account) = self
            .state
            .accounts
            .iter()
            .find(|account| account.address == address)
            .cloned()
        else {
            let err = SessionError::AccountNotFound(address);
            self.state.error = Some(err.clone());
            self.publish();
            return Err(err);
        };

        self.preferred_address = None;
        self.set_active_account(Some(account)).await;
        if self.state.connection.is_some() && self.in_flight.is_none() {
            self.state.status = ConnectionStatus::Connected;
        }
        Ok(self.publish())
    }

    pub(crate) async fn disconnect(&mut self, close_transport: bool) -> Arc<Session> {
        self.supersede_in_flight(SessionError::Superseded);
        self.teardown(close_transport).await;
        self.state.error = None;
        info!(
            "session disconnected (transport {})",
            if close_transport { "closed" } else { "kept" }
        );
        self.publish()
    }

    pub(crate) async fn shutdown(&mut self) {
        self.supersede_in_flight(SessionError::Disposed);
        self.teardown(true).await;
        self.state.error = None;
        self.publish();
        info!("session disposed");
    }

    fn begin(
        &mut self,
        chain: ChainDescriptor,
        wallet: WalletPlan,
        preferred_address: Option<WalletAddress>,
        reply: Option<Reply>,
    ) {
        let plan = AttemptPlan {
            chain: chain.id.clone(),
            wallet,
            preferred_address,
        };

        if let Some(in_flight) = self.in_flight.as_mut() {
            if in_flight.plan == plan {
                debug!("joining in-flight attempt {}", in_flight.generation);
                in_flight.waiters.extend(reply);
                return;
            }
        }

        self.supersede_in_flight(SessionError::Superseded);
        self.generation += 1;
        let generation = self.generation;
        let open_connection = self.connections.reusable(&chain.id).is_none();
        info!(
            "attempt {} connecting to {} ({} connection)",
            generation,
            chain.id,
            if open_connection { "new" } else { "reused" }
        );

        self.state.status = ConnectionStatus::Connecting;
        self.state.error = None;
        self.publish();

        self.spawn_attempt(generation, chain, open_connection, plan.wallet.clone());
        self.pending_attempts += 1;
        self.in_flight = Some(InFlight {
            generation,
            plan,
            waiters: reply.into_iter().collect(),
        });
    }

    fn supersede_in_flight(&mut self, reason: SessionError) {
        self.generation += 1;
        if let Some(in_flight) = self.in_flight.take() {
            debug!("attempt {} superseded: {}", in_flight.generation, reason);
            for waiter in in_flight.waiters {
                let _ = waiter.send(Err(reason.clone()));
            }
        }
    }

    fn spawn_attempt(&self, generation: u64, chain: ChainDescriptor, open_connection: bool, wallet: WalletPlan) {
        let connector = self.connections.connector().clone();
        let opener = self.wallets.opener().clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = run_attempt(generation, chain, open_connection, wallet, connector, opener).await;
            let _ = events.send(SessionEvent::AttemptFinished(outcome));
        });
    }

    // ── Events ───────────────────────────────────────────────────────

    pub(crate) async fn apply_attempt(&mut self, outcome: AttemptOutcome) {
        self.pending_attempts = self.pending_attempts.saturating_sub(1);
        let Some(in_flight) = self
            .in_flight
            .take_if(|in_flight| in_flight.generation == outcome.generation)
        else {
            discard(outcome).await;
            return;
        };

        let result = self.apply_current(in_flight.plan, outcome).await;
        let snapshot = self.publish();
        for waiter in in_flight.waiters {
            let _ = waiter.send(result.clone().map(|()| snapshot.clone()));
        }
    }

    async fn apply_current(&mut self, plan: AttemptPlan, outcome: AttemptOutcome) -> Result<(), SessionError> {
        let AttemptOutcome {
            chain,
            connection,
            wallet,
            ..
        } = outcome;

        match connection {
            Err(err) => {
                warn!("connecting to {} failed: {}", chain.id, err);
                self.drop_wallet_layer().await;
                self.connections.close_current().await;
                self.state.connection = None;
                return Err(self.record_failure(err));
            }
            Ok(Some(handle)) => {
                if !handle.is_bound_to(&self.state.active_chain.id) {
                    self.state.accounts.clear();
                    self.state.active_account = None;
                }
                self.connections.install(handle.clone()).await;
                self.watch_transport(&handle);
                self.state.active_chain = chain;
                self.state.connection = Some(handle);
            }
            Ok(None) => {}
        }

        match wallet {
            None => {}
            Some(Err(err)) => {
                warn!("wallet handshake failed: {}", err);
                self.drop_wallet_layer().await;
                return Err(self.record_failure(err));
            }
            Some(Ok(enabled)) => self.activate_wallet(enabled, plan.preferred_address),
        }

        self.state.error = None;
        self.state.status = match &self.state.connection {
            Some(_) => ConnectionStatus::Connected,
            None => ConnectionStatus::Idle,
        };
        Ok(())
    }

    pub(crate) async fn accounts_updated(&mut self, generation: u64, accounts: Vec<Account>) {
        if generation != self.wallet_generation || self.wallets.active().is_none() {
            debug!("dropping account update from stale subscription {}", generation);
            return;
        }

        let previous = self
            .state
            .active_account
            .as_ref()
            .map(|account| account.address.clone())
            .or_else(|| self.state.last_selected.clone());
        let active = select_active_account(&accounts, self.preferred_address.as_ref(), previous.as_ref());

        self.state.accounts = accounts;
        self.set_active_account(active).await;
        if self.state.active_account.is_some() && self.state.connection.is_some() && self.in_flight.is_none() {
            self.state.status = ConnectionStatus::Connected;
        }
        self.publish();
    }

    pub(crate) async fn transport_lost(&mut self, handle_id: Uuid) {
        let Some(handle) = self
            .connections
            .current()
            .filter(|handle| handle.id() == handle_id && !handle.is_closed())
            .cloned()
        else {
            debug!("ignoring transport loss of stale connection {}", handle_id);
            return;
        };

        let chain = handle.chain().clone();
        warn!("lost connection {} to {}", handle_id, chain.id);

        let wallet = self.wallets.active_wallet_id().cloned();
        self.supersede_in_flight(SessionError::SubscriptionLost(chain.id.clone()));
        self.teardown(true).await;
        self.record_failure(SessionError::SubscriptionLost(chain.id.clone()));
        self.publish();

        if self.config.reconnect_on_drop {
            let wallet = match wallet {
                Some(id) => WalletPlan::Enable {
                    preferred: Some(id),
                    mode: ConnectMode::Explicit,
                },
                None => WalletPlan::Skip,
            };
            info!("reconnecting to {}", chain.id);
            self.begin(chain, wallet, None, None);
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn teardown(&mut self, close_transport: bool) {
        self.drop_wallet_layer().await;
        if close_transport {
            self.connections.close_current().await;
            self.state.connection = None;
        }
        self.state.status = match &self.state.connection {
            Some(handle) if handle.is_open() => ConnectionStatus::Connected,
            _ => ConnectionStatus::Idle,
        };
    }

    async fn drop_wallet_layer(&mut self) {
        self.wallets.teardown().await;
        self.wallet_generation += 1;
        self.preferred_address = None;
        if let Some(handle) = &self.state.connection {
            handle.client().set_signer(None);
        }
        self.state.clear_wallet();
    }

    fn activate_wallet(&mut self, enabled: EnabledWallet, preferred_address: Option<WalletAddress>) {
        self.wallet_generation += 1;
        let generation = self.wallet_generation;
        let wallet_id = enabled.descriptor.id.clone();
        let signer = enabled.extension.signer();

        if self.state.wallet.as_ref() != Some(&wallet_id) {
            self.state.accounts.clear();
            self.state.active_account = None;
        }

        let events = self.events.clone();
        self.wallets.activate(
            enabled,
            Box::new(move |accounts| {
                let _ = events.send(SessionEvent::AccountsUpdated { generation, accounts });
            }),
        );

        if let Some(handle) = &self.state.connection {
            handle.client().set_signer(Some(signer.clone()));
        }
        self.preferred_address = preferred_address;
        self.state.wallet = Some(wallet_id);
        self.state.signer = Some(signer);
    }

    async fn set_active_account(&mut self, active: Option<Account>) {
        let changed = match (&self.state.active_account, &active) {
            (Some(current), Some(next)) => !current.same_address(next),
            (None, None) => false,
            _ => true,
        };
        self.state.active_account = active;

        let Some(account) = self.state.active_account.as_ref().filter(|_| changed) else {
            return;
        };
        self.state.last_selected = Some(account.address.clone());

        let record = LastAccountRecord {
            app_name: self.config.app_name.clone(),
            address: account.address.clone(),
            chain: self.state.active_chain.id.clone(),
            remembered_at_epoch_ms: epoch_ms(),
        };
        if let Err(err) = self.memory.remember(&record).await {
            warn!("could not remember last account {}: {:#}", record.address, err);
        }
    }

    fn watch_transport(&self, handle: &ConnectionHandle) {
        let handle = handle.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            handle.client().closed().await;
            if !handle.is_closed() {
                let _ = events.send(SessionEvent::TransportLost { handle_id: handle.id() });
            }
        });
    }
}

async fn run_attempt(
    generation: u64,
    chain: ChainDescriptor,
    open_connection: bool,
    wallet: WalletPlan,
    connector: Connector,
    opener: WalletOpener,
) -> AttemptOutcome {
    let connection = if open_connection {
        let target = chain.clone();
        match tokio::spawn(async move { connector.open(&target).await }).await {
            Ok(Ok(handle)) => Ok(Some(handle)),
            Ok(Err(err)) => Err(SessionError::from(err)),
            Err(join_err) => Err(SessionError::Initialization {
                chain: chain.id.clone(),
                cause: format!("node client task failed: {join_err}"),
            }),
        }
    } else {
        Ok(None)
    };

    let wallet = match (&connection, wallet) {
        (Err(_), _) | (_, WalletPlan::Skip) => None,
        (Ok(_), WalletPlan::Enable { preferred, mode }) => {
            let requested = preferred.clone().unwrap_or_else(|| WalletId::new("unknown"));
            let result = match tokio::spawn(async move { opener.open(preferred, mode).await }).await {
                Ok(result) => result.map_err(SessionError::from),
                Err(join_err) => Err(SessionError::EnableRejected {
                    wallet: requested,
                    reason: format!("wallet task failed: {join_err}"),
                }),
            };
            Some(result)
        }
    };

    AttemptOutcome {
        generation,
        chain,
        connection,
        wallet,
    }
}

async fn discard(outcome: AttemptOutcome) {
    debug!("discarding result of superseded attempt {}", outcome.generation);
    if let Ok(Some(handle)) = outcome.connection {
        ConnectionManager::teardown(&handle).await;
    }
}

fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}
