//! API Error Handling
//!
//! Core errors carry a fieldless kind; the status code of each kind is
//! looked up in [`STATUS_TABLE`], anything missing from it is a 500.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use volley_core::{Error, ErrorKind};

/// Message of a synchronous run that reached no host
pub const ERR_NO_MATCH: &str = "no hosts match that target";

/// Status code of each error kind
pub const STATUS_TABLE: &[(ErrorKind, StatusCode)] = &[
    (ErrorKind::Conflict, StatusCode::CONFLICT),
    (ErrorKind::NotFound, StatusCode::NOT_FOUND),
    (ErrorKind::NoMatch, StatusCode::NOT_FOUND),
    (ErrorKind::Delete, StatusCode::BAD_REQUEST),
    (ErrorKind::Invalid, StatusCode::BAD_REQUEST),
    (ErrorKind::NotSupported, StatusCode::INTERNAL_SERVER_ERROR),
];

pub fn status_for(kind: ErrorKind) -> StatusCode {
    STATUS_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, status)| *status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// API error type
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    /// Request that could not even be decoded
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Core(err) => {
                let status = status_for(err.kind());
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", err);
                }
                (status, err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Core(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::NoMatch), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Delete), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::NotSupported),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(ErrorKind::Prepare),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_response_status() {
        let response = ApiError::from(Error::NotFound("no such jid x".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::BadRequest("bad json".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
