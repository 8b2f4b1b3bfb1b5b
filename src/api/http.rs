use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::error::ValidationError;
use crate::logging::{ErrorLogger, LogContext};
use crate::models::{validate_address, Block, Transaction};
use crate::service::IndexingService;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Server error: {0}")]
    Server(String),
}

/// Response structure for subscribe endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub data: bool,
    pub message: String,
}

/// Response structure for current_block endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentBlockResponse {
    pub current_block: u64,
}

/// Response structure for subscriptions endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<String>,
}

/// Query parameters for address-keyed endpoints
#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub address: Option<String>,
}

/// Query parameters for scan endpoint
#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    pub blocknumber: Option<String>,
}

/// Error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn error_response(status: StatusCode, error: &str, message: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message,
        }),
    )
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IndexingService>,
}

/// Build the router with all routes, CORS and request logging
pub fn create_router(service: Arc<IndexingService>) -> Router {
    let app_state = AppState { service };

    Router::new()
        .route("/subscribe", get(subscribe))
        .route("/transactions", get(get_transactions))
        .route("/current_block", get(get_current_block))
        .route("/scan", get(scan_block))
        .route("/subscriptions", get(get_subscriptions))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(log_requests))
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state)
}

/// HTTP API server
pub struct ApiServer {
    service: Arc<IndexingService>,
    pub bind_address: String,
}

impl ApiServer {
    /// Create a new API server instance
    pub fn new(service: Arc<IndexingService>, bind_address: String) -> Self {
        Self {
            service,
            bind_address,
        }
    }

    /// Serve until `shutdown` is cancelled, then drain in-flight requests
    pub async fn start(&self, shutdown: CancellationToken) -> Result<(), ApiError> {
        let app = create_router(self.service.clone());

        let listener = TcpListener::bind(&self.bind_address)
            .await
            .map_err(|e| ApiError::Server(format!("Failed to bind to {}: {}", self.bind_address, e)))?;

        log::info!("HTTP API server starting on {}", self.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ApiError::Server(format!("Server error: {}", e)))?;

        log::info!("HTTP API server stopped");
        Ok(())
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    log::info!("Started {} {}", method, path);
    let response = next.run(request).await;
    log::info!(
        "Completed {} {} {} in {:?}",
        method,
        path,
        response.status().as_u16(),
        start.elapsed()
    );

    response
}

fn required_address(query: AddressQuery) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    let address = query
        .address
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "invalid_parameter",
                "Address required".to_string(),
            )
        })?;

    validate_address(&address)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, "invalid_parameter", e.to_string()))?;
    Ok(address)
}

/// GET /subscribe?address= - Start tracking an address
pub async fn subscribe(
    Query(query): Query<AddressQuery>,
    State(state): State<AppState>,
) -> ApiResult<SubscribeResponse> {
    let address = required_address(query)?;

    let created = state.service.try_subscribe(&address).map_err(|e| {
        ErrorLogger::log_error(&e, Some(LogContext::new("api", "subscribe").with_address(&address)));
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("Failed to subscribe address {}", address),
        )
    })?;

    let message = if created {
        format!("Subscribed to address {}", address)
    } else {
        format!("Already subscribed to address {}", address)
    };
    Ok(Json(SubscribeResponse {
        data: created,
        message,
    }))
}

/// GET /transactions?address= - Transactions recorded for a subscribed address
pub async fn get_transactions(
    Query(query): Query<AddressQuery>,
    State(state): State<AppState>,
) -> ApiResult<Vec<Transaction>> {
    let address = required_address(query)?;
    Ok(Json(state.service.get_transactions(&address)))
}

/// GET /current_block - Last fully indexed block
pub async fn get_current_block(State(state): State<AppState>) -> Json<CurrentBlockResponse> {
    Json(CurrentBlockResponse {
        current_block: state.service.get_current_block(),
    })
}

/// GET /scan?blocknumber= - Fetch a block from the node without indexing it
pub async fn scan_block(
    Query(query): Query<ScanQuery>,
    State(state): State<AppState>,
) -> ApiResult<Block> {
    let raw = query.blocknumber.unwrap_or_default();
    let number = raw.trim().parse::<u64>().map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_parameter",
            ValidationError::InvalidBlockNumber(raw.clone()).to_string(),
        )
    })?;

    match state.service.scan_block(&CancellationToken::new(), number).await {
        Ok(block) => Ok(Json(block)),
        Err(e) => {
            ErrorLogger::log_error(&e, Some(LogContext::new("api", "scan_block").with_block_number(number)));
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "scan_failed",
                format!("Failed to scan block {}", number),
            ))
        }
    }
}

/// GET /subscriptions - All subscribed addresses
pub async fn get_subscriptions(State(state): State<AppState>) -> ApiResult<SubscriptionsResponse> {
    match state.service.get_subscriptions() {
        Ok(subscriptions) => Ok(Json(SubscriptionsResponse { subscriptions })),
        Err(e) => {
            log::error!("Failed to list subscriptions: {}", e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                format!("Failed to list subscriptions: {}", e),
            ))
        }
    }
}

async fn not_found() -> (StatusCode, Json<ErrorResponse>) {
    error_response(StatusCode::NOT_FOUND, "not_found", "Not found".to_string())
}
