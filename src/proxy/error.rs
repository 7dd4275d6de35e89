//! Gateway error types and response handling

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};

/// Errors that terminate a request
///
/// Rate-limited and not-found upstream responses are not errors: once the
/// fallback/retry budget is spent they are relayed to the client verbatim.
#[derive(Debug)]
pub(crate) enum ProxyError {
    /// Malformed framing, unparseable request line, or invalid JSON body
    BadRequest(String),
    /// Could not connect to the upstream
    UpstreamUnreachable(String),
    /// Upstream sent bytes that are not recognizable HTTP
    UpstreamProtocol(String),
    /// The bridge could not reconstruct a valid response
    Internal(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let (status, message) = match self {
            ProxyError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ProxyError::UpstreamUnreachable(msg) => (StatusCode::BAD_GATEWAY, msg),
            ProxyError::UpstreamProtocol(msg) => (StatusCode::BAD_GATEWAY, msg),
            ProxyError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        tracing::error!("Gateway error: {} - {}", status, message);

        Response::builder()
            .status(status)
            .header("connection", "close")
            .body(Body::from(message))
            .unwrap_or_else(|_| Response::new(Body::from("Internal error building error response")))
    }
}
