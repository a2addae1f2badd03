//! In-process doubles for the node client and wallet host.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use lk_api_types::{Account, ChainDescriptor, ChainId, ConnectionStatus, WalletAddress, WalletId};
use lk_chain_client::{ChainRegistry, ClientOptions, NodeClient, NodeClientFactory};
use lk_crypto::Signer;
use lk_storage::InMemoryAccountMemory;
use lk_wallet_core::{AccountsCallback, InjectedExtension, NIGHTLY_CONNECT, POLKADOT_JS, TALISMAN, Unsubscribe, WalletHost};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

use crate::{Session, SessionConfig, SessionDeps, SessionHandle, SessionManager};

pub(crate) const ALPHA: &str = "ws://alpha.test:9944";
pub(crate) const BETA: &str = "ws://beta.test:9944";

pub(crate) struct MockClient {
    endpoint: String,
    closed: watch::Sender<bool>,
    disconnects: AtomicUsize,
    signer: Mutex<Option<Arc<dyn Signer>>>,
}

impl MockClient {
    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn has_signer(&self) -> bool {
        self.signer.lock().unwrap().is_some()
    }

    /// Simulates the node going away.
    pub(crate) fn drop_transport(&self) {
        self.closed.send_replace(true);
    }
}

#[async_trait]
impl NodeClient for MockClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        !*self.closed.borrow()
    }

    fn set_signer(&self, signer: Option<Arc<dyn Signer>>) {
        *self.signer.lock().unwrap() = signer;
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
        Ok(())
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Per-key queues of pending releases for held calls.
#[derive(Default)]
struct Gates(Mutex<HashMap<String, VecDeque<oneshot::Receiver<()>>>>);

impl Gates {
    fn hold(&self, key: &str) -> oneshot::Sender<()> {
        let (open, gate) = oneshot::channel();
        self.0.lock().unwrap().entry(key.to_owned()).or_default().push_back(gate);
        open
    }

    async fn pass(&self, key: &str) {
        let gate = self.0.lock().unwrap().get_mut(key).and_then(VecDeque::pop_front);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }
}

#[derive(Default)]
pub(crate) struct MockFactory {
    clients: Mutex<Vec<Arc<MockClient>>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    gates: Gates,
    attempts: AtomicUsize,
}

impl MockFactory {
    pub(crate) fn fail(&self, endpoint: &str) {
        self.failing.lock().unwrap().insert(endpoint.to_owned());
    }

    pub(crate) fn recover(&self, endpoint: &str) {
        self.failing.lock().unwrap().remove(endpoint);
    }

    /// Makes every connect to `endpoint` panic inside the factory.
    pub(crate) fn panic_on(&self, endpoint: &str) {
        self.panicking.lock().unwrap().insert(endpoint.to_owned());
    }

    /// Holds the next connect to `endpoint` until the returned sender fires.
    pub(crate) fn gate(&self, endpoint: &str) -> oneshot::Sender<()> {
        self.gates.hold(endpoint)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn clients_for(&self, endpoint: &str) -> Vec<Arc<MockClient>> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .filter(|client| client.endpoint == endpoint)
            .cloned()
            .collect()
    }

    /// The most recently opened client for `endpoint`.
    pub(crate) fn client(&self, endpoint: &str) -> Arc<MockClient> {
        self.clients_for(endpoint).pop().expect("a client was opened")
    }
}

#[async_trait]
impl NodeClientFactory for MockFactory {
    async fn connect(&self, endpoint: &str, _options: &ClientOptions) -> Result<Arc<dyn NodeClient>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.gates.pass(endpoint).await;
        let panics = self.panicking.lock().unwrap().contains(endpoint);
        if panics {
            panic!("node client for {endpoint} blew up");
        }
        if self.failing.lock().unwrap().contains(endpoint) {
            bail!("connection refused by {endpoint}");
        }

        let (closed, _) = watch::channel(false);
        let client = Arc::new(MockClient {
            endpoint: endpoint.to_owned(),
            closed,
            disconnects: AtomicUsize::new(0),
            signer: Mutex::new(None),
        });
        self.clients.lock().unwrap().push(client.clone());
        let client: Arc<dyn NodeClient> = client;
        Ok(client)
    }
}

struct MockSigner;

#[async_trait]
impl Signer for MockSigner {
    async fn sign_raw(&self, _address: &WalletAddress, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(payload.to_vec())
    }
}

type Subscribers = Arc<Mutex<Vec<(u64, Arc<dyn Fn(Vec<Account>) + Send + Sync>)>>>;

pub(crate) struct MockExtension {
    id: WalletId,
    accounts: Mutex<Vec<Account>>,
    subscribers: Subscribers,
    next_subscriber: AtomicU64,
    unsubscribes: Arc<AtomicUsize>,
    disconnects: AtomicUsize,
}

impl MockExtension {
    fn new(id: &str, accounts: Vec<Account>) -> Self {
        Self {
            id: WalletId::new(id),
            accounts: Mutex::new(accounts),
            subscribers: Arc::default(),
            next_subscriber: AtomicU64::new(0),
            unsubscribes: Arc::default(),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Replaces the account list and notifies every live subscriber.
    pub(crate) fn set_accounts(&self, accounts: Vec<Account>) {
        *self.accounts.lock().unwrap() = accounts.clone();
        let subscribers: Vec<_> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in subscribers {
            callback(accounts.clone());
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub(crate) fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InjectedExtension for MockExtension {
    fn wallet_id(&self) -> &WalletId {
        &self.id
    }

    fn signer(&self) -> Arc<dyn Signer> {
        Arc::new(MockSigner)
    }

    fn subscribe_accounts(&self, on_update: AccountsCallback) -> Unsubscribe {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let callback: Arc<dyn Fn(Vec<Account>) + Send + Sync> = Arc::from(on_update);
        self.subscribers.lock().unwrap().push((id, callback.clone()));

        let current = self.accounts.lock().unwrap().clone();
        callback(current);

        let subscribers = self.subscribers.clone();
        let unsubscribes = self.unsubscribes.clone();
        Box::new(move || {
            subscribers.lock().unwrap().retain(|(subscriber, _)| *subscriber != id);
            unsubscribes.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One shared extension per wallet, the way a browser injects them.
#[derive(Default)]
pub(crate) struct MockHost {
    extensions: Mutex<HashMap<String, Arc<MockExtension>>>,
    rejecting: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    gates: Gates,
    enables: AtomicUsize,
}

impl MockHost {
    pub(crate) fn install(&self, wallet: &str, accounts: Vec<Account>) {
        self.extensions
            .lock()
            .unwrap()
            .insert(wallet.to_owned(), Arc::new(MockExtension::new(wallet, accounts)));
    }

    pub(crate) fn reject(&self, wallet: &str) {
        self.rejecting.lock().unwrap().insert(wallet.to_owned());
    }

    pub(crate) fn panic_on(&self, wallet: &str) {
        self.panicking.lock().unwrap().insert(wallet.to_owned());
    }

    /// Holds the next enable of `wallet` until the returned sender fires.
    pub(crate) fn gate(&self, wallet: &str) -> oneshot::Sender<()> {
        self.gates.hold(wallet)
    }

    pub(crate) fn extension(&self, wallet: &str) -> Arc<MockExtension> {
        self.extensions
            .lock()
            .unwrap()
            .get(wallet)
            .cloned()
            .expect("wallet is installed")
    }

    pub(crate) fn enables(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletHost for MockHost {
    fn is_installed(&self, wallet: &WalletId) -> bool {
        self.extensions.lock().unwrap().contains_key(&wallet.0)
    }

    async fn enable(&self, wallet: &WalletId, _app_name: &str) -> Result<Arc<dyn InjectedExtension>> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        self.gates.pass(&wallet.0).await;
        let panics = self.panicking.lock().unwrap().contains(&wallet.0);
        if panics {
            panic!("extension {wallet} crashed during enable");
        }
        if self.rejecting.lock().unwrap().contains(&wallet.0) {
            bail!("user rejected the request");
        }
        let extension: Arc<dyn InjectedExtension> = self
            .extensions
            .lock()
            .unwrap()
            .get(&wallet.0)
            .cloned()
            .with_context(|| format!("{wallet} is not installed"))?;
        Ok(extension)
    }
}

fn chain(id: &str, endpoint: &str) -> ChainDescriptor {
    ChainDescriptor {
        id: ChainId::new(id),
        name: id.to_owned(),
        rpc_urls: vec![endpoint.to_owned()],
        ss58_prefix: 42,
        testnet: true,
    }
}

pub(crate) fn config() -> SessionConfig {
    SessionConfig {
        app_name: "link-test".to_owned(),
        default_chain: ChainId::new("alpha"),
        supported_wallets: [POLKADOT_JS, TALISMAN, NIGHTLY_CONNECT]
            .into_iter()
            .map(WalletId::new)
            .collect(),
        ..SessionConfig::default()
    }
}

#[derive(Default)]
pub(crate) struct Setup {
    pub factory: MockFactory,
    pub host: MockHost,
    pub memory: InMemoryAccountMemory,
}

pub(crate) struct Fixture {
    pub session: SessionHandle,
    pub factory: Arc<MockFactory>,
    pub host: Arc<MockHost>,
    pub memory: Arc<InMemoryAccountMemory>,
}

pub(crate) async fn fixture(config: SessionConfig, prepare: impl FnOnce(&MockHost)) -> Result<Fixture> {
    let setup = Setup::default();
    prepare(&setup.host);
    fixture_with(config, setup).await
}

/// Starts a session over `setup` and waits for the startup attempt to settle.
pub(crate) async fn fixture_with(config: SessionConfig, setup: Setup) -> Result<Fixture> {
    let mut registry = ChainRegistry::default();
    registry.register(chain("alpha", ALPHA));
    registry.register(chain("beta", BETA));

    let factory = Arc::new(setup.factory);
    let host = Arc::new(setup.host);
    let memory = Arc::new(setup.memory);
    let session = SessionManager::create(
        config,
        SessionDeps {
            registry,
            factory: factory.clone(),
            host: host.clone(),
            memory: memory.clone(),
        },
    )
    .await?;

    wait(&session, |s| {
        matches!(s.status, ConnectionStatus::Connected | ConnectionStatus::Error)
    })
    .await?;

    Ok(Fixture {
        session,
        factory,
        host,
        memory,
    })
}

/// Waits up to two seconds for a snapshot matching `predicate`.
pub(crate) async fn wait<F>(session: &SessionHandle, predicate: F) -> Result<Arc<Session>>
where
    F: FnMut(&Session) -> bool,
{
    let mut subscription = session.subscribe();
    tokio::time::timeout(Duration::from_secs(2), subscription.wait_for(predicate))
        .await
        .context("timed out waiting for session state")?
        .context("session store closed")
}

pub(crate) async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
