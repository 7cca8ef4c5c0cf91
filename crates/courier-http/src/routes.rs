//! HTTP route handlers.
//!
//! - `GET /send?number=..&message=..` delivers a text message
//! - `GET /status` reports whether the session is connected

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use courier_core::{GatewayError, StatusReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::SharedState;

const SEND_SUCCESS_MESSAGE: &str = "Message sent successfully";

/// Response format for `/send`.
#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The normalized recipient address (if sent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResponse {
    fn sent(to: String) -> Self {
        Self {
            success: true,
            message: Some(SEND_SUCCESS_MESSAGE.to_string()),
            to: Some(to),
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            message: None,
            to: None,
            error: Some(error),
        }
    }
}

/// Query string for `/send`. Both fields are checked by the gateway.
#[derive(Debug, Deserialize)]
pub struct SendParams {
    pub number: Option<String>,
    pub message: Option<String>,
}

fn error_status(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::SendFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handler for GET /send
pub async fn send_handler(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<SendParams>,
) -> (StatusCode, Json<SendResponse>) {
    log::debug!("HTTP send to {:?}", params.number);

    match state
        .gateway
        .send(params.number.as_deref(), params.message.as_deref())
        .await
    {
        Ok(receipt) => (StatusCode::OK, Json(SendResponse::sent(receipt.to))),
        Err(e) => (error_status(&e), Json(SendResponse::failed(e.to_string()))),
    }
}

/// Handler for GET /status
pub async fn status_handler(State(state): State<Arc<SharedState>>) -> Json<StatusReport> {
    Json(state.gateway.status())
}
