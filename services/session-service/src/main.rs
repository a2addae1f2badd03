use anyhow::Context;
use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use lk_api_types::ErrorView;
use lk_chain_client::ChainRegistry;
use lk_chain_substrate::SubstrateRpcFactory;
use lk_session::{SessionConfig, SessionDeps, SessionError, SessionHandle, SessionManager};
use lk_storage::{AccountMemory, InMemoryAccountMemory, RocksDbAccountMemory};
use lk_wallet_core::POLKADOT_JS;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

mod dev_wallet;
mod session_routes;

use dev_wallet::DevWalletHost;

const DEFAULT_DEV_ACCOUNTS: &str = "//Alice,//Bob";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorView>)>;

#[derive(Clone)]
struct AppState {
    session: SessionHandle,
    dev_wallet: Arc<DevWalletHost>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SessionConfig::from_env()?;

    let dev_accounts: Vec<String> = env_var("LINK_DEV_ACCOUNTS")
        .unwrap_or_else(|| DEFAULT_DEV_ACCOUNTS.to_owned())
        .split(',')
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(str::to_owned)
        .collect();
    let dev_wallet = Arc::new(DevWalletHost::from_uris(POLKADOT_JS, &dev_accounts)?);

    let memory: Arc<dyn AccountMemory> = match env_var("LINK_STATE_PATH") {
        Some(path) => {
            info!("remembering accounts in RocksDB at {}", path);
            Arc::new(RocksDbAccountMemory::open_default(&path)?)
        }
        None => Arc::new(InMemoryAccountMemory::default()),
    };

    let session = SessionManager::create(
        config,
        SessionDeps {
            registry: ChainRegistry::with_defaults(),
            factory: Arc::new(SubstrateRpcFactory::new(None)),
            host: dev_wallet.clone(),
            memory,
        },
    )
    .await?;

    let _observer = session.observe(|snapshot| {
        info!(
            "session {:?} on {} (wallet: {}, account: {})",
            snapshot.status,
            snapshot.active_chain.id,
            snapshot.wallet.as_ref().map_or("none", |wallet| wallet.0.as_str()),
            snapshot
                .active_account
                .as_ref()
                .map_or("none", |account| account.address.0.as_str()),
        );
        if let Some(err) = &snapshot.error {
            warn!("session error [{}]: {}", err.code(), err);
        }
    });

    let app = router(AppState {
        session: session.clone(),
        dev_wallet,
    });

    let addr: SocketAddr = env_var("LINK_LISTEN_ADDR")
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned())
        .parse()
        .context("LINK_LISTEN_ADDR is not a socket address")?;
    info!("session-service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.dispose().await;
    info!("session-service stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/chains", get(session_routes::list_chains))
        .route("/wallets", get(session_routes::list_wallets))
        .route("/session", get(session_routes::get_session))
        .route("/session/connect", post(session_routes::connect))
        .route("/session/disconnect", post(session_routes::disconnect))
        .route("/session/switch-chain", post(session_routes::switch_chain))
        .route("/session/account", post(session_routes::select_account))
        .route("/session/deployments/{contract_id}", get(session_routes::deployment))
        .route("/dev/accounts", post(dev_wallet::dev_add_account))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            warn!("cannot listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "session-service",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "session-service",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn session_error(err: SessionError) -> (StatusCode, Json<ErrorView>) {
    let status = match err {
        SessionError::UnknownChain(_) | SessionError::AccountNotFound(_) => StatusCode::BAD_REQUEST,
        SessionError::NoExtensionDetected | SessionError::EnableRejected { .. } | SessionError::Superseded => {
            StatusCode::CONFLICT
        }
        SessionError::Initialization { .. } | SessionError::SubscriptionLost(_) => StatusCode::BAD_GATEWAY,
        SessionError::Disposed => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(err.view()))
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorView>) {
    error_response(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: &str) -> (StatusCode, Json<ErrorView>) {
    error_response(StatusCode::NOT_FOUND, "not_found", message)
}

fn error_response(status: StatusCode, code: &str, message: &str) -> (StatusCode, Json<ErrorView>) {
    (
        status,
        Json(ErrorView {
            code: code.to_owned(),
            message: message.to_owned(),
        }),
    )
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
