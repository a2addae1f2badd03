use axum::{
    Json,
    extract::{Path, State},
};
use lk_api_types::{
    ChainDescriptor, ChainId, ConnectRequestBody, ContractDeployment, DisconnectRequestBody,
    SelectAccountRequestBody, SessionView, SwitchChainRequestBody, WalletAddress, WalletId, WalletView,
};
use lk_session::ConnectRequest;

use crate::{ApiResult, AppState, bad_request, not_found, session_error};

pub(crate) async fn list_chains(State(state): State<AppState>) -> Json<Vec<ChainDescriptor>> {
    Json(state.session.chains())
}

pub(crate) async fn list_wallets(State(state): State<AppState>) -> Json<Vec<WalletView>> {
    let wallets = state
        .session
        .available_wallets()
        .into_iter()
        .map(|wallet| WalletView {
            id: wallet.id,
            name: wallet.name,
            remote_adapter: wallet.remote_adapter,
        })
        .collect();
    Json(wallets)
}

pub(crate) async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session.snapshot().view())
}

pub(crate) async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequestBody>,
) -> ApiResult<SessionView> {
    let mut connect = ConnectRequest::default();
    if let Some(chain) = non_blank(request.chain) {
        connect = connect.chain(ChainId(chain));
    }
    if let Some(wallet) = non_blank(request.wallet) {
        connect = connect.wallet(WalletId(wallet));
    }
    if let Some(address) = non_blank(request.preferred_address) {
        connect = connect.preferred_address(WalletAddress(address));
    }

    let session = state.session.connect(connect).await.map_err(session_error)?;
    Ok(Json(session.view()))
}

pub(crate) async fn disconnect(
    State(state): State<AppState>,
    Json(request): Json<DisconnectRequestBody>,
) -> ApiResult<SessionView> {
    let session = state
        .session
        .disconnect(request.close_transport)
        .await
        .map_err(session_error)?;
    Ok(Json(session.view()))
}

pub(crate) async fn switch_chain(
    State(state): State<AppState>,
    Json(request): Json<SwitchChainRequestBody>,
) -> ApiResult<SessionView> {
    if request.chain.trim().is_empty() {
        return Err(bad_request("chain is required"));
    }

    let session = state
        .session
        .switch_chain(ChainId(request.chain.trim().to_owned()))
        .await
        .map_err(session_error)?;
    Ok(Json(session.view()))
}

pub(crate) async fn select_account(
    State(state): State<AppState>,
    Json(request): Json<SelectAccountRequestBody>,
) -> ApiResult<SessionView> {
    if request.address.trim().is_empty() {
        return Err(bad_request("address is required"));
    }

    let session = state
        .session
        .select_account(WalletAddress(request.address.trim().to_owned()))
        .await
        .map_err(session_error)?;
    Ok(Json(session.view()))
}

pub(crate) async fn deployment(
    State(state): State<AppState>,
    Path(contract_id): Path<String>,
) -> ApiResult<ContractDeployment> {
    state
        .session
        .deployment(&contract_id)
        .map(Json)
        .ok_or_else(|| not_found("contract is not deployed on the active chain"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
