use lk_api_types::{ChainDescriptor, ChainId, ContractDeployment, WalletAddress};
use lk_chain_client::{ChainRegistry, ConnectionManager, Connector, NodeClientFactory};
use lk_storage::AccountMemory;
use lk_wallet_core::{ConnectMode, WalletDescriptor, WalletHost, WalletOpener, WalletSessionManager};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::reconciler::{Reconciler, Reply, SessionEvent};
use crate::{
    ConnectRequest, ObserverGuard, Session, SessionConfig, SessionError, SessionStore, SessionSubscription,
};

const COMMAND_BUFFER: usize = 64;

enum Command {
    Connect { request: ConnectRequest, reply: Option<Reply> },
    SwitchChain { chain: ChainId, reply: Reply },
    Disconnect { close_transport: bool, reply: Reply },
    SelectAccount { address: WalletAddress, reply: Reply },
    Dispose { reply: oneshot::Sender<()> },
}

impl Command {
    fn reject(self, err: SessionError) {
        let reply = match self {
            Command::Connect { reply, .. } => reply,
            Command::SwitchChain { reply, .. }
            | Command::Disconnect { reply, .. }
            | Command::SelectAccount { reply, .. } => Some(reply),
            Command::Dispose { reply } => {
                let _ = reply.send(());
                None
            }
        };
        if let Some(reply) = reply {
            let _ = reply.send(Err(err));
        }
    }
}

/// External collaborators of a session.
pub struct SessionDeps {
    pub registry: ChainRegistry,
    pub factory: Arc<dyn NodeClientFactory>,
    pub host: Arc<dyn WalletHost>,
    pub memory: Arc<dyn AccountMemory>,
}

pub struct SessionManager;

impl SessionManager {
    /// Starts the session actor.
    ///
    /// The default chain must be registered. The first connect (node only, or
    /// node and wallet when `connect_on_init` is set) runs in the background;
    /// its outcome shows up in the snapshot.
    pub async fn create(config: SessionConfig, deps: SessionDeps) -> Result<SessionHandle, SessionError> {
        let registry = Arc::new(deps.registry);
        let connector =
            Connector::new(registry.clone(), deps.factory).with_request_timeout(config.request_timeout);
        let default_chain = connector.resolve(&config.default_chain)?;

        let last_selected = match deps.memory.recall(&config.app_name).await {
            Ok(record) => record.map(|record| record.address),
            Err(err) => {
                warn!("could not recall last account for {}: {:#}", config.app_name, err);
                None
            }
        };

        let opener = WalletOpener::new(deps.host, &config.app_name, config.wallet_descriptors());
        let store = SessionStore::new(Session::new(default_chain, last_selected));
        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, events_rx) = mpsc::unbounded_channel();

        let config = Arc::new(config);
        let reconciler = Reconciler::new(
            config.clone(),
            ConnectionManager::new(connector),
            WalletSessionManager::new(opener.clone()),
            deps.memory,
            store.clone(),
            events,
        );
        tokio::spawn(run(reconciler, commands_rx, events_rx));

        let handle = SessionHandle {
            commands,
            store,
            opener,
            registry,
            deployments: config.deployments.clone().into(),
        };
        handle
            .commands
            .send(Command::Connect {
                request: ConnectRequest::startup(config.connect_on_init),
                reply: None,
            })
            .await
            .map_err(|_| SessionError::Disposed)?;

        info!(
            "session for {} started on {} (auto connect: {})",
            config.app_name, config.default_chain, config.connect_on_init
        );
        Ok(handle)
    }
}

async fn run(
    mut reconciler: Reconciler,
    mut commands: mpsc::Receiver<Command>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connect { request, reply }) => reconciler.connect(request, reply),
                Some(Command::SwitchChain { chain, reply }) => reconciler.switch_chain(chain, Some(reply)),
                Some(Command::Disconnect { close_transport, reply }) => {
                    let snapshot = reconciler.disconnect(close_transport).await;
                    let _ = reply.send(Ok(snapshot));
                }
                Some(Command::SelectAccount { address, reply }) => {
                    let result = reconciler.select_account(address).await;
                    let _ = reply.send(result);
                }
                Some(Command::Dispose { reply }) => {
                    reconciler.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                None => {
                    reconciler.shutdown().await;
                    break;
                }
            },
            Some(event) = events.recv() => match event {
                SessionEvent::AttemptFinished(outcome) => reconciler.apply_attempt(outcome).await,
                SessionEvent::AccountsUpdated { generation, accounts } => {
                    reconciler.accounts_updated(generation, accounts).await;
                }
                SessionEvent::TransportLost { handle_id } => reconciler.transport_lost(handle_id).await,
            },
        }
    }

    commands.close();
    while let Ok(command) = commands.try_recv() {
        command.reject(SessionError::Disposed);
    }

    // Attempts still running may hold open handles; wait for them so they get closed.
    while reconciler.pending_attempts() > 0 {
        match events.recv().await {
            Some(SessionEvent::AttemptFinished(outcome)) => reconciler.apply_attempt(outcome).await,
            Some(_) => {}
            None => break,
        }
    }
    info!("session actor stopped");
}

/// Cheap, cloneable access to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    store: SessionStore,
    opener: WalletOpener,
    registry: Arc<ChainRegistry>,
    deployments: Arc<[ContractDeployment]>,
}

impl SessionHandle {
    /// Connects the node and enables a wallet. Resolves once the attempt has
    /// been applied; accounts arrive later through the subscription.
    pub async fn connect(&self, request: ConnectRequest) -> Result<Arc<Session>, SessionError> {
        self.request(|reply| Command::Connect {
            request,
            reply: Some(reply),
        })
        .await
    }

    pub async fn switch_chain(&self, chain: ChainId) -> Result<Arc<Session>, SessionError> {
        self.request(|reply| Command::SwitchChain { chain, reply }).await
    }

    /// Drops the wallet layer. With `close_transport` the node connection is closed too.
    pub async fn disconnect(&self, close_transport: bool) -> Result<Arc<Session>, SessionError> {
        self.request(|reply| Command::Disconnect { close_transport, reply })
            .await
    }

    pub async fn select_account(&self, address: WalletAddress) -> Result<Arc<Session>, SessionError> {
        self.request(|reply| Command::SelectAccount { address, reply }).await
    }

    pub fn snapshot(&self) -> Arc<Session> {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> SessionSubscription {
        self.store.subscribe()
    }

    pub fn observe<F>(&self, observer: F) -> ObserverGuard
    where
        F: FnMut(Arc<Session>) + Send + 'static,
    {
        self.store.observe(observer)
    }

    pub fn available_wallets(&self) -> Vec<WalletDescriptor> {
        self.opener.list_available(ConnectMode::Explicit).cloned().collect()
    }

    pub fn chains(&self) -> Vec<ChainDescriptor> {
        self.registry.chains()
    }

    /// Looks up the deployment of `contract_id` on the active chain.
    pub fn deployment(&self, contract_id: &str) -> Option<ContractDeployment> {
        let session = self.snapshot();
        self.deployments
            .iter()
            .find(|deployment| deployment.contract_id == contract_id && deployment.network_id == session.active_chain.id)
            .cloned()
    }

    /// Closes the session. Later requests fail with `Disposed`.
    pub async fn dispose(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Dispose { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    async fn request<F>(&self, build: F) -> Result<Arc<Session>, SessionError>
    where
        F: FnOnce(Reply) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Disposed)?;
        response.await.unwrap_or(Err(SessionError::Disposed))
    }
}
