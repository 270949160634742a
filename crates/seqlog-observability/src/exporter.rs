use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};

use crate::metrics::REGISTRY;

/// Renders every registered metric in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Handler for Prometheus metrics endpoint
pub async fn metrics_handler() -> Response {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Create metrics router
pub fn create_metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}
