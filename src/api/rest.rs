// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. `/health` and the inbound webhook
// require no bearer token (the webhook instead verifies its own HMAC
// signature); every other endpoint requires a valid Bearer token via the
// `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::db::repo;
use crate::ingest::{self, IngestOutcome};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/webhook", post(webhook))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/signals/:id", get(signal_detail))
        .route("/api/v1/metrics/counters", get(counters))
        .route("/api/v1/metrics/recent-events", get(recent_events))
        .route("/api/v1/metrics/engine-decisions", get(engine_decisions))
        .route("/api/v1/errors", get(errors))
        .route("/api/v1/feature-flags", get(get_feature_flags))
        .route("/api/v1/feature-flags", post(set_feature_flags))
        .route("/api/v1/admin/adaptive-tuner/run", post(run_adaptive_tuner))
        .route("/api/v1/bias-events", post(bias_event))
        .route("/api/v1/bias-state/:symbol", get(bias_state))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Inbound webhook (public; HMAC-verified by the ingestor itself)
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "status")]
enum WebhookResponse {
    #[serde(rename = "ACCEPTED")]
    Accepted {
        signal_id: Uuid,
        experiment_id: Option<Uuid>,
        variant: crate::types::Variant,
        processing_time_ms: i64,
    },
    #[serde(rename = "DUPLICATE")]
    Duplicate { signal_id: Option<Uuid> },
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "INVALID_PAYLOAD")]
    InvalidPayload { errors: Vec<String> },
    #[serde(rename = "ERROR")]
    Error { error: String },
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let started = std::time::Instant::now();
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok());
    let request_id = Uuid::new_v4().to_string();

    let (hmac_secret, dedup_window_secs, policy_version, split_percentage) = {
        let config = state.runtime_config.read();
        (
            config.hmac_secret.clone(),
            config.signal_dedup_window_secs,
            config.policy_version.clone(),
            config.split_percentage,
        )
    };

    let outcome = ingest::ingest(
        &state.pool,
        &body,
        signature,
        &hmac_secret,
        &request_id,
        dedup_window_secs,
        &policy_version,
        split_percentage,
    )
    .await;

    match outcome {
        Ok(IngestOutcome::Accepted { signal_id, variant_hint }) => (
            StatusCode::CREATED,
            Json(WebhookResponse::Accepted {
                signal_id,
                experiment_id: None,
                variant: variant_hint,
                processing_time_ms: started.elapsed().as_millis() as i64,
            }),
        )
            .into_response(),
        Ok(IngestOutcome::Duplicate { signal_id }) => {
            (StatusCode::OK, Json(WebhookResponse::Duplicate { signal_id })).into_response()
        }
        Ok(IngestOutcome::InvalidSignature) => (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse::InvalidSignature),
        )
            .into_response(),
        Ok(IngestOutcome::InvalidPayload(errors)) => (
            StatusCode::BAD_REQUEST,
            Json(WebhookResponse::InvalidPayload { errors }),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, request_id = %request_id, "webhook ingestion failed");
            state.push_error_with_code(Some(e.reason_code()), format!("webhook ingest: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse::Error { error: e.to_string() }),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Signal detail (authenticated)
// =============================================================================

async fn signal_detail(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match repo::find_signal_audit(&state.pool, id).await {
        Ok(Some(audit)) => Json(audit).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "signal not found" })),
        )
            .into_response(),
        Err(e) => {
            state.push_error_with_code(Some(e.reason_code()), format!("signal detail: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Monitoring (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct WindowQuery {
    #[serde(default = "default_window_hours")]
    hours: i64,
}

fn default_window_hours() -> i64 {
    24
}

async fn counters(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WindowQuery>,
) -> impl IntoResponse {
    let signals = repo::signal_counts_by_status(&state.pool, q.hours).await;
    let orders = repo::order_counts_by_status(&state.pool, q.hours).await;
    let webhooks = repo::webhook_counts_by_status(&state.pool, q.hours).await;

    match (signals, orders, webhooks) {
        (Ok(signals), Ok(orders), Ok(webhooks)) => Json(serde_json::json!({
            "window_hours": q.hours,
            "signals_by_status": signals.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
            "orders_by_status": orders.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
            "webhooks_by_status": webhooks.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
        }))
        .into_response(),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            state.push_error_with_code(Some(e.reason_code()), format!("counters query: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct RecentEventsQuery {
    #[serde(default = "default_recent_limit")]
    limit: i64,
}

fn default_recent_limit() -> i64 {
    50
}

async fn recent_events(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<RecentEventsQuery>,
) -> impl IntoResponse {
    match repo::recent_signals(&state.pool, q.limit).await {
        Ok(signals) => Json(serde_json::json!({ "signals": signals })).into_response(),
        Err(e) => {
            state.push_error_with_code(Some(e.reason_code()), format!("recent events query: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn engine_decisions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WindowQuery>,
) -> impl IntoResponse {
    match repo::engine_decision_metrics(&state.pool, q.hours).await {
        Ok(metrics) => Json(serde_json::json!({ "window_hours": q.hours, "engines": metrics })).into_response(),
        Err(e) => {
            state.push_error_with_code(Some(e.reason_code()), format!("engine decisions query: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn errors(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.recent_errors())
}

// =============================================================================
// Feature flags (authenticated)
// =============================================================================

async fn get_feature_flags(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.feature_flags_snapshot())
}

#[derive(Deserialize)]
struct FeatureFlagUpdate {
    name: String,
    enabled: bool,
}

async fn set_feature_flags(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(update): Json<FeatureFlagUpdate>,
) -> impl IntoResponse {
    match state.set_feature_flag(&update.name, update.enabled).await {
        Ok(()) => {
            info!(name = %update.name, enabled = update.enabled, "feature flag updated");
            Json(state.feature_flags_snapshot()).into_response()
        }
        Err(e) => {
            state.push_error_with_code(Some(e.reason_code()), format!("set feature flag: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Bias-state aggregator ingestion (authenticated)
// =============================================================================
//
// Upstream engines (MTF bias, gamma overlay) push raw bias payloads here.
// The schema validator in `bias::schema` rejects anything malformed before
// it ever reaches the store; a gamma payload is merged onto the symbol's
// existing state instead of ingested as its own unified state.

async fn bias_event(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if let Some(gamma_regime) = body.get("gamma_regime") {
        let gamma = crate::bias::GammaOverlay {
            gamma_regime: gamma_regime.as_str().unwrap_or_default().to_string(),
            zero_gamma_level: body.get("zero_gamma_level").and_then(|v| v.as_f64()).unwrap_or(0.0),
            distance_atrs: body.get("distance_atrs").and_then(|v| v.as_f64()).unwrap_or(0.0),
        };
        let symbol = match body.get("symbol").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": "gamma payload missing symbol" })),
                )
                    .into_response()
            }
        };
        let mut current = match state.bias_store.get(&symbol) {
            Some(s) => s,
            None => {
                return (
                    StatusCode::CONFLICT,
                    Json(serde_json::json!({ "error": "no existing bias state for symbol; send the MTF payload first" })),
                )
                    .into_response()
            }
        };
        crate::bias::gamma::merge(&mut current, gamma);
        state.bias_store.put(current.clone());
        state.increment_version();
        return Json(current).into_response();
    }

    match state.bias_store.ingest(&body) {
        Ok(unified) => {
            state.increment_version();
            Json(unified).into_response()
        }
        Err(e) => {
            warn!(error = %e, "bias event rejected");
            state.push_error_with_code(Some(e.reason_code()), format!("bias event ingest: {e}"));
            let status = match &e {
                crate::error::PipelineError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn bias_state(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    match state.bias_store.get(&symbol) {
        Some(unified) => Json(unified).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no bias state for symbol" })),
        )
            .into_response(),
    }
}

// =============================================================================
// Admin: force an adaptive-tuner pass outside its daily schedule
// =============================================================================

async fn run_adaptive_tuner(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tuner = crate::adaptive_tuner::AdaptiveTuner {
        pool: state.pool.clone(),
        lookback_days: 30,
    };
    let config = state.runtime_config.read().clone();
    match tuner.run(&config, true).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            state.push_error_with_code(Some(e.reason_code()), format!("adaptive tuner run: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
