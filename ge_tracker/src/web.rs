//! HTTP API for price lookups, history, search and status
//!
//! Thin adapter over [`PriceService`]: validates input, maps `NotFound` to 404
//! and everything else to 500.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::error::TrackerError;
use crate::models::{HistoryPoint, Item, SystemStatus};
use crate::search::MIN_QUERY_LEN;
use crate::service::PriceService;

const MAX_ITEM_NAME_LEN: usize = 100;

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: Arc<PriceService>,
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }),
    )
}

fn map_error(err: TrackerError) -> ApiError {
    match err {
        TrackerError::NotFound(name) => {
            api_error(StatusCode::NOT_FOUND, format!("Item not found: {}", name))
        }
        other => {
            log::error!("Request failed: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Item names: 1-100 chars of letters, digits, spaces and `-'()`
fn validate_item_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Item name must not be empty"));
    }
    if name.chars().count() > MAX_ITEM_NAME_LEN {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Item name too long (max {} characters)", MAX_ITEM_NAME_LEN),
        ));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '\'' | '(' | ')'));
    if !valid {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Item name contains invalid characters",
        ));
    }
    Ok(())
}

/// Parse a numeric query parameter, treating garbage as absent
fn lenient<T: std::str::FromStr>(raw: Option<&str>) -> Option<T> {
    raw.and_then(|value| value.trim().parse().ok())
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<String>,
}

#[derive(Deserialize)]
struct HistoryParams {
    hours: Option<String>,
}

#[derive(Serialize)]
struct PriceBody {
    item: String,
    id: i64,
    price: i64,
    high: f64,
    low: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct HistoryBody {
    item: String,
    hours: u32,
    history: Vec<HistoryPoint>,
}

/// GET /api/price/{item}
async fn price_handler(
    State(state): State<AppState>,
    Path(item): Path<String>,
) -> ApiResult<PriceBody> {
    validate_item_name(&item)?;

    let price = state.service.get_price(&item).await.map_err(map_error)?;
    Ok(ApiResponse::ok(PriceBody {
        item: price.item.name,
        id: price.item.id,
        price: price.price,
        high: price.high,
        low: price.low,
        timestamp: price.timestamp,
    }))
}

/// GET /api/price/{item}/history?hours={hours}
async fn history_handler(
    State(state): State<AppState>,
    Path(item): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<HistoryBody> {
    validate_item_name(&item)?;

    let config = state.service.config();
    let hours = config.clamp_history_hours(lenient::<i64>(params.hours.as_deref()).map(|h| {
        u32::try_from(h.max(0)).unwrap_or(u32::MAX)
    }));

    let history = state
        .service
        .get_price_history(&item, hours)
        .await
        .map_err(map_error)?;

    Ok(ApiResponse::ok(HistoryBody {
        item,
        hours,
        history,
    }))
}

/// GET /api/search?q={query}&limit={limit}
async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<Item>> {
    let query = params.q.unwrap_or_default();
    if query.chars().count() < MIN_QUERY_LEN {
        return Ok(ApiResponse::ok(Vec::new()));
    }

    let limit = state
        .service
        .config()
        .clamp_search_limit(lenient(params.limit.as_deref()));

    let items = state
        .service
        .search_items(&query, limit)
        .await
        .map_err(map_error)?;
    Ok(ApiResponse::ok(items))
}

/// GET /api/status
async fn status_handler(State(state): State<AppState>) -> ApiResult<SystemStatus> {
    let status = state.service.get_system_status().map_err(map_error)?;
    Ok(ApiResponse::ok(status))
}

/// Build the web server router
pub fn create_router(service: Arc<PriceService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/api/price/{item}", get(price_handler))
        .route("/api/price/{item}/history", get(history_handler))
        .route("/api/search", get(search_handler))
        .route("/api/status", get(status_handler))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
///
/// Binds to 0.0.0.0 (all interfaces) to work with Docker port mapping.
pub async fn serve(
    service: Arc<PriceService>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router(service);
    let addr = format!("0.0.0.0:{}", port);

    log::info!("HTTP API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
#[path = "web_tests.rs"]
mod tests;
