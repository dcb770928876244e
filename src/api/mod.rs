//! HTTP API for health checks, chain listing and dispatching messages

use crate::chain::ChainSummary;
use crate::config::ApiConfig;
use crate::coordination::{
    ChainId, DispatchCoordinator, DispatchOutcome, DispatchRequest, ProgressEvent, ProgressLog,
};
use crate::error::DispatchError;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DispatchCoordinator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/dispatch", post(dispatch))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, coordinator: Arc<DispatchCoordinator>) -> Result<()> {
    let app = router(AppState { coordinator });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - every registered chain answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = state.coordinator.registry().health_check().await;
    let ready = chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            details: chain_health
                .into_iter()
                .map(|(chain, healthy)| ChainHealth { chain, healthy })
                .collect(),
        }),
    )
}

async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    Json(ChainsResponse {
        chains: state.coordinator.registry().chains(),
        delivery_timeout_ms: state.coordinator.delivery_timeout().as_millis() as u64,
    })
}

/// Run one dispatch and return its outcome with the progress it reported
///
/// If the client disconnects the handler future is dropped, which releases
/// any open delivery subscription.
async fn dispatch(
    State(state): State<AppState>,
    Json(body): Json<DispatchBody>,
) -> impl IntoResponse {
    let request = DispatchRequest::new(body.source, body.destination, body.message);
    let progress = ProgressLog::new();

    match state.coordinator.dispatch(&request, &progress).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(DispatchResponse {
                request_id: request.id(),
                outcome: Some(outcome),
                error: None,
                progress: progress.events(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(DispatchResponse {
                request_id: request.id(),
                outcome: None,
                error: Some(ErrorBody {
                    kind: e.kind(),
                    message: e.to_string(),
                }),
                progress: progress.events(),
            }),
        ),
    }
}

fn error_status(error: &DispatchError) -> StatusCode {
    match error {
        e if e.is_preflight() => StatusCode::BAD_REQUEST,
        DispatchError::SubmissionFailed { .. } | DispatchError::InclusionFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        DispatchError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Request and response types

#[derive(Debug, Deserialize)]
struct DispatchBody {
    source: String,
    destination: String,
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain: ChainId,
    healthy: bool,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<ChainSummary>,
    delivery_timeout_ms: u64,
}

#[derive(Serialize)]
struct DispatchResponse {
    request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<DispatchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    progress: Vec<ProgressEvent>,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}
