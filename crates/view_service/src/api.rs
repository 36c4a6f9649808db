//! HTTP API handlers for the view service.

use crate::service::{ViewOutcome, ViewTrackingService};
use crate::types::{EntityType, TrendingEntry, ViewEvent};
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ViewTrackingService>,
    /// Optional analytics sink for counted views.
    pub events: Option<mpsc::UnboundedSender<ViewEvent>>,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/views/increment", post(increment_handler))
        .route("/views/bulk", post(bulk_counts_handler))
        .route("/views/trending", get(trending_handler))
        .route("/views/{entity_type}/{listing_id}", get(view_count_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncrementRequest {
    entity_type: String,
    listing_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IncrementResponse {
    entity_type: String,
    listing_id: String,
    view_count: i64,
    counted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkCountsRequest {
    entity_type: String,
    listing_ids: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkCountsResponse {
    entity_type: String,
    counts: HashMap<String, i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewCountResponse {
    entity_type: String,
    listing_id: String,
    view_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrendingQuery {
    entity_type: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrendingResponse {
    entries: Vec<TrendingEntry>,
    count: usize,
}

fn invalid_entity_type(value: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: format!("Unknown entity type: {}", value),
            code: "INVALID_ENTITY_TYPE".to_string(),
        }),
    )
}

fn bad_request(message: String, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        }),
    )
}

/// Resolve the client address, preferring the first `x-forwarded-for` entry
/// when the service sits behind a proxy.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    peer.ip().to_string()
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Record one view. Always `202 Accepted` for well-formed requests: filtered
/// or degraded views still answer with the current count.
async fn increment_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<IncrementRequest>,
) -> Result<(StatusCode, Json<IncrementResponse>), (StatusCode, Json<ErrorResponse>)> {
    let entity_type: EntityType = req
        .entity_type
        .parse()
        .map_err(|_| invalid_entity_type(&req.entity_type))?;
    if req.listing_id.trim().is_empty() {
        return Err(bad_request(
            "listingId must not be empty".to_string(),
            "INVALID_LISTING_ID",
        ));
    }

    let ip = client_ip(&headers, peer);
    let ua = user_agent(&headers);
    let outcome: ViewOutcome = state
        .service
        .record_view(entity_type, &req.listing_id, &ip, &ua)
        .await;

    if let (Some(sender), Some(event)) = (&state.events, outcome.event) {
        if sender.send(event).is_err() {
            error!("view event channel closed, dropping analytics event");
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IncrementResponse {
            entity_type: entity_type.as_str().to_string(),
            listing_id: outcome.listing_id,
            view_count: outcome.view_count,
            counted: outcome.counted,
            skipped: outcome.skipped.map(|r| r.as_str().to_string()),
        }),
    ))
}

/// Counts for a batch of listings. Every requested id appears in the
/// response, defaulting to 0.
async fn bulk_counts_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkCountsRequest>,
) -> Result<Json<BulkCountsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let entity_type: EntityType = req
        .entity_type
        .parse()
        .map_err(|_| invalid_entity_type(&req.entity_type))?;
    let max = state.service.config().max_bulk_ids;
    if req.listing_ids.len() > max {
        return Err(bad_request(
            format!("Too many listing ids: {} (max {})", req.listing_ids.len(), max),
            "TOO_MANY_IDS",
        ));
    }

    let counts = state
        .service
        .get_bulk_view_counts(entity_type, &req.listing_ids)
        .await;

    Ok(Json(BulkCountsResponse {
        entity_type: entity_type.as_str().to_string(),
        counts,
    }))
}

/// Current count for one listing.
async fn view_count_handler(
    State(state): State<Arc<AppState>>,
    Path((entity_type, listing_id)): Path<(String, String)>,
) -> Result<Json<ViewCountResponse>, (StatusCode, Json<ErrorResponse>)> {
    let entity: EntityType = entity_type
        .parse()
        .map_err(|_| invalid_entity_type(&entity_type))?;

    let view_count = state.service.get_view_count(entity, &listing_id).await;

    Ok(Json(ViewCountResponse {
        entity_type: entity.as_str().to_string(),
        listing_id: crate::types::canonical_listing_id(listing_id.trim()),
        view_count,
    }))
}

/// Top trending listings, optionally scoped to one entity type.
async fn trending_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendingQuery>,
) -> Result<Json<TrendingResponse>, (StatusCode, Json<ErrorResponse>)> {
    let entity_type = match &query.entity_type {
        Some(value) => Some(
            value
                .parse::<EntityType>()
                .map_err(|_| invalid_entity_type(value))?,
        ),
        None => None,
    };

    let entries = state.service.get_trending(entity_type, query.limit).await;
    let count = entries.len();

    Ok(Json(TrendingResponse { entries, count }))
}
