//! HTTP API for faucet service

use crate::config::TokenInfo;
use crate::error::FaucetResult;
use crate::identity::ClientIpSource;
use crate::service::{loggable, ClaimOutcome, ClaimRequest, FaucetService, TransferReceipt};
use crate::views::{PageContext, PageRenderer};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use serde::Deserialize;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Receipts waiting to be shown, one per client.
const RECEIPT_CAPACITY: u64 = 10_000;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FaucetService>,
    pub token: Arc<TokenInfo>,
    pub ip_source: ClientIpSource,
    pages: Arc<PageRenderer>,
    receipts: Cache<String, Arc<TransferReceipt>>,
    throttle: Arc<DefaultDirectRateLimiter>,
}

impl AppState {
    pub fn new(
        service: Arc<FaucetService>,
        token: TokenInfo,
        ip_source: ClientIpSource,
        burst_per_minute: NonZeroU32,
        receipt_ttl: Duration,
    ) -> FaucetResult<Self> {
        Ok(Self {
            service,
            token: Arc::new(token),
            ip_source,
            pages: Arc::new(PageRenderer::new()?),
            receipts: Cache::builder()
                .max_capacity(RECEIPT_CAPACITY)
                .time_to_live(receipt_ttl)
                .build(),
            throttle: Arc::new(RateLimiter::direct(Quota::per_minute(burst_per_minute))),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AskForm {
    pub address_to: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/index", get(index_handler))
        .route("/ask", post(ask_handler))
        .route("/success", get(success_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler(State(state): State<AppState>) -> FaucetResult<Html<String>> {
    render_index(&state, PageContext::default()).await
}

/// Claim handler
async fn ask_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<AskForm>,
) -> Response {
    let client_ip = state.ip_source.client_ip(&headers, peer).to_string();
    let address_to = form.address_to.unwrap_or_default();

    // Shed floods before they touch the ledger; no quota is spent.
    if state.throttle.check().is_err() {
        warn!("Claim from {} shed by burst throttle", client_ip);
        return render_index(
            &state,
            PageContext {
                message: Some("The faucet is busy. Please try again in a minute.".to_string()),
                error: true,
                address_to,
                ..Default::default()
            },
        )
        .await
        .into_response();
    }

    info!("Claim request from {}: address={}", client_ip, loggable(&address_to));

    let request = ClaimRequest {
        address_to: Some(address_to.clone()),
        client_ip: client_ip.clone(),
    };

    match state.service.ask(&request).await {
        ClaimOutcome::Success(receipt) => {
            state.receipts.insert(client_ip, Arc::new(receipt)).await;
            Redirect::to("/success").into_response()
        }
        ClaimOutcome::Unavailable { .. } => Redirect::to("/").into_response(),
        outcome => render_index(
            &state,
            PageContext {
                message: Some(outcome.message()),
                error: true,
                address_to,
                ..Default::default()
            },
        )
        .await
        .into_response(),
    }
}

/// Shows the client's last receipt once, then forgets it.
async fn success_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let client_ip = state.ip_source.client_ip(&headers, peer).to_string();

    match state.receipts.remove(&client_ip).await {
        Some(receipt) => {
            let status = state.service.status().await;
            state
                .pages
                .success(&state.token, &status, &receipt)
                .into_response()
        }
        None => Redirect::to("/").into_response(),
    }
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> FaucetResult<impl IntoResponse> {
    let body = state.service.metrics().encode()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

async fn render_index(state: &AppState, mut ctx: PageContext) -> FaucetResult<Html<String>> {
    let status = state.service.status().await;
    ctx.come_back = !status.can_dispense();
    state.pages.index(&state.token, &status, &ctx)
}
