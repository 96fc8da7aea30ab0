//! API error type
//!
//! Wraps [`AuthError`] and adds the few failures that belong to handlers
//! rather than the security layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use salonbook_auth::{AuthError, ErrorResponse};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0} not found")]
    NotFound(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Auth(err) => err.into_response(),
            Self::NotFound(what) => {
                let message = format!("{} not found", what);
                let body = ErrorResponse::new(message.clone(), "resource", vec![message]);
                (StatusCode::NOT_FOUND, Json(body)).into_response()
            }
        }
    }
}
