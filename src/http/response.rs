//! Reply to HTTP response mapping.
//!
//! # Responsibilities
//! - Render reply bodies as JSON with the reply's status
//! - Map [`ReplyError`] to HTTP status codes (timeout → 504)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::backend::ReplyError;
use crate::protocol::Envelope;

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY)
}

/// Response for the single resolution of a backend request.
pub fn reply_response(result: Result<Envelope, ReplyError>) -> Response {
    match result {
        Ok(reply) => {
            let code = reply.status_code.map(status).unwrap_or(StatusCode::OK);
            (code, Json(reply.body)).into_response()
        }
        Err(ReplyError::Backend { status: code, reply }) => (status(code), Json(reply.body)).into_response(),
        Err(e) => error_response(status(e.status_code()), &e.to_string()),
    }
}

/// JSON error body `{ "error": message }`.
pub fn error_response(code: StatusCode, message: &str) -> Response {
    (code, Json(json!({ "error": message }))).into_response()
}
