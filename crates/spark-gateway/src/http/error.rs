//! Error to HTTP response mapping.
//!
//! The two API surfaces share the same error kinds but render different
//! bodies: the primary surface responds with `{"error": ...}`, the
//! numeric-id surface with `{"msg": ...}`. The status code is derived from
//! the error kind alone, never from the message.

use axum::{Json, response::IntoResponse, response::Response};
use serde_json::json;

use crate::{
    error::{ErrorKind, error_chain},
    http::auth::AuthError,
    service::ServiceError,
};

/// An error response on the primary application surface.
#[derive(Clone, Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self {
            kind: error.kind(),
            message: error_chain(&error),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        Self {
            kind: error.kind(),
            message: error_chain(&error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.kind.status_code(), Json(json!({ "error": self.message }))).into_response()
    }
}

/// An error response on the numeric-id surface.
#[derive(Clone, Debug)]
pub struct LivyApiError {
    kind: ErrorKind,
    message: String,
}

impl LivyApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<crate::livy::BatchError> for LivyApiError {
    fn from(error: crate::livy::BatchError) -> Self {
        Self {
            kind: error.kind(),
            message: error_chain(&error),
        }
    }
}

impl From<AuthError> for LivyApiError {
    fn from(error: AuthError) -> Self {
        Self {
            kind: error.kind(),
            message: error_chain(&error),
        }
    }
}

impl IntoResponse for LivyApiError {
    fn into_response(self) -> Response {
        (self.kind.status_code(), Json(json!({ "msg": self.message }))).into_response()
    }
}
