//! REST API endpoints for the IndexGateway
//!
//! Pull access to the latest snapshot and composition of each product, plus a health
//! report. Endpoints never return partial data: without a snapshot they answer 404.

use crate::registry::{ProductHealth, ProductRegistry};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

/// Custom rejection carrying a prepared error body
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl warp::reject::Reject for ApiError {}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    pub timestamp: String,
}

/// Error detail
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    fn new(code: &str, message: &str, details: Option<serde_json::Value>) -> Self {
        Self {
            error: ErrorDetail { code: code.to_string(), message: message.to_string(), details },
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Health report
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub products: Vec<ProductHealth>,
}

fn unknown_token(token: &str) -> warp::Rejection {
    warp::reject::custom(ApiError {
        status: StatusCode::NOT_FOUND,
        body: ErrorResponse::new(
            "UNKNOWN_TOKEN",
            "Unknown index token",
            Some(serde_json::Value::String(token.to_string())),
        ),
    })
}

fn no_data(token: &str) -> warp::Rejection {
    warp::reject::custom(ApiError {
        status: StatusCode::NOT_FOUND,
        body: ErrorResponse::new(
            "NO_DATA",
            "No data available",
            Some(serde_json::Value::String(token.to_string())),
        ),
    })
}

/// Latest snapshot of a product
pub async fn get_current_price(
    token: String,
    registry: Arc<ProductRegistry>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let endpoint = registry.get(&token).ok_or_else(|| unknown_token(&token))?;

    match endpoint.product.latest().await {
        Some(snapshot) => Ok(warp::reply::json(snapshot.as_ref())),
        None => Err(no_data(&token)),
    }
}

/// Token/weight view of the latest snapshot
pub async fn get_composition(
    token: String,
    registry: Arc<ProductRegistry>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let endpoint = registry.get(&token).ok_or_else(|| unknown_token(&token))?;

    match endpoint.product.composition().await {
        Some(composition) => Ok(warp::reply::json(&composition)),
        None => Err(no_data(&token)),
    }
}

pub async fn get_health(registry: Arc<ProductRegistry>) -> Result<impl warp::Reply, Infallible> {
    let mut products = Vec::with_capacity(registry.len());
    for endpoint in registry.endpoints() {
        products.push(endpoint.health().await);
    }

    let status = if products.iter().all(|p| p.snapshot_available) { "healthy" } else { "degraded" };

    Ok(warp::reply::json(&HealthResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        products,
    }))
}

/// Turn rejections into JSON error bodies
pub async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let (status, body) = if let Some(api_error) = err.find::<ApiError>() {
        (
            api_error.status,
            ErrorResponse::new(
                &api_error.body.error.code,
                &api_error.body.error.message,
                api_error.body.error.details.clone(),
            ),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorResponse::new("METHOD_NOT_ALLOWED", "Method not allowed", None),
        )
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, ErrorResponse::new("NOT_FOUND", "Not found", None))
    } else {
        tracing::error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new("INTERNAL_ERROR", "Internal server error", None),
        )
    };

    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}

/// Create REST API routes
pub fn create_routes(
    registry: Arc<ProductRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let registry_filter = warp::any().map(move || registry.clone());

    // Current price endpoint
    let current_price = warp::path!("api" / String / "current-price")
        .and(warp::get())
        .and(registry_filter.clone())
        .and_then(get_current_price);

    // Composition endpoint
    let composition = warp::path!("api" / String / "composition" / "balance")
        .and(warp::get())
        .and(registry_filter.clone())
        .and_then(get_composition);

    // Health check endpoint
    let health = warp::path!("health").and(warp::get()).and(registry_filter).and_then(get_health);

    current_price.or(composition).or(health).recover(handle_rejection).with(
        warp::cors()
            .allow_any_origin()
            .allow_headers(vec!["content-type"])
            .allow_methods(vec!["GET", "OPTIONS"]),
    )
}
