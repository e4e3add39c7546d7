use crate::errors::ServerError;
use astra::{Body, Response, ResponseBuilder};
use serde_json::json;

pub type ResultResp = Result<Response, ServerError>;

/// Convert a ServerError into a JSON error response. Callers never see raw
/// transport or SQL detail beyond the error's own message.
pub fn error_to_response(err: ServerError) -> Response {
    let status = match &err {
        ServerError::NotFound => 404,
        ServerError::Validation(_) => 400,
        ServerError::InvalidState(_) => 409,
        ServerError::SyncBusy => 409,
        ServerError::Upstream(_) => 502,
        ServerError::DbError(_) | ServerError::InternalError => 500,
    };
    json_error_response(status, &err.to_string())
}

pub fn json_error_response(status: u16, message: &str) -> Response {
    let body = json!({ "error": message }).to_string();

    ResponseBuilder::new()
        .status(status)
        .header("Content-Type", mime::APPLICATION_JSON.as_ref())
        .body(Body::from(body))
        .unwrap()
}
