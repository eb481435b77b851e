//! The pluggable authentication middleware chain.
//!
//! The chain is an ordered list of middlewares built from config blobs. Each
//! middleware inspects the request headers and either resolves a user,
//! rejects the request, or passes through without touching the user. The
//! chain terminates in the `IsAuthed` gate: a request that reaches the
//! handlers always carries a non-empty user.
//!
//! All regular expressions and header names are compiled when the chain is
//! constructed, which doubles as startup config validation.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use snafu::Snafu;

use crate::{
    config::MiddlewareConfig,
    error::ErrorKind,
    http::error::{ApiError, LivyApiError},
};

mod middleware;

pub use middleware::{AuthMiddleware, HeaderAuth, RegexAllow, RegexDeny, ServiceTokenAuth};

pub type Result<T, E = AuthError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum AuthError {
    #[snafu(display("authentication required"))]
    Unauthenticated,

    #[snafu(display("authenticated user must not be empty"))]
    EmptyUser,

    #[snafu(display("user {user:?} does not match any allow pattern"))]
    NotAllowed { user: String },

    #[snafu(display("user {user:?} is denied"))]
    Denied { user: String },

    #[snafu(display("authorization header is not decodable basic auth"))]
    MalformedBasicAuth,

    #[snafu(display("header {header:?} is present without {token_header:?}"))]
    MissingServiceToken { header: String, token_header: String },

    #[snafu(display("service token for user {user:?} does not match"))]
    TokenMismatch { user: String },

    #[snafu(display("service user {user:?} is not configured"))]
    UnknownServiceUser { user: String },

    #[snafu(display("invalid regex {pattern:?} in middleware configuration"))]
    InvalidRegex {
        source: regex::Error,
        pattern: String,
    },

    #[snafu(display("invalid header name {header:?} in middleware configuration"))]
    InvalidHeaderName {
        source: axum::http::header::InvalidHeaderName,
        header: String,
    },
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Unauthenticated
            | AuthError::MissingServiceToken { .. }
            | AuthError::TokenMismatch { .. } => ErrorKind::Unauthorized,
            AuthError::EmptyUser => ErrorKind::BadRequest,
            AuthError::NotAllowed { .. }
            | AuthError::Denied { .. }
            | AuthError::MalformedBasicAuth
            | AuthError::UnknownServiceUser { .. } => ErrorKind::Forbidden,
            AuthError::InvalidRegex { .. } | AuthError::InvalidHeaderName { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

/// The authenticated user, attached to the request extensions once the chain
/// resolves it.
#[derive(Clone, Debug)]
pub struct AuthedUser(pub String);

/// An ordered middleware chain ending in the `IsAuthed` gate.
#[derive(Debug)]
pub struct AuthChain {
    middlewares: Vec<AuthMiddleware>,
}

impl AuthChain {
    /// Builds the chain, compiling every regex and header name. Invalid
    /// middleware config fails here, before the server starts serving.
    pub fn from_config(configs: &[MiddlewareConfig]) -> Result<Self> {
        let middlewares = configs
            .iter()
            .map(AuthMiddleware::from_config)
            .collect::<Result<_>>()?;

        Ok(Self { middlewares })
    }

    /// Runs the chain over the request headers and applies the `IsAuthed`
    /// gate: no user resolves to 401, an empty user to 400.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String> {
        let mut user = None;

        for middleware in &self.middlewares {
            middleware.apply(headers, &mut user)?;
        }

        match user {
            None => UnauthenticatedSnafu.fail(),
            Some(user) if user.is_empty() => EmptyUserSnafu.fail(),
            Some(user) => Ok(user),
        }
    }
}

/// Axum middleware guarding the primary application surface.
pub async fn authenticate_api(
    State(chain): State<Arc<AuthChain>>,
    mut request: Request,
    next: Next,
) -> Response {
    match chain.authenticate(request.headers()) {
        Ok(user) => {
            request.extensions_mut().insert(AuthedUser(user));
            next.run(request).await
        }
        Err(error) => ApiError::from(error).into_response(),
    }
}

/// Axum middleware guarding the numeric-id surface; identical chain, but
/// failures render in that surface's error body shape.
pub async fn authenticate_livy(
    State(chain): State<Arc<AuthChain>>,
    mut request: Request,
    next: Next,
) -> Response {
    match chain.authenticate(request.headers()) {
        Ok(user) => {
            request.extensions_mut().insert(AuthedUser(user));
            next.run(request).await
        }
        Err(error) => LivyApiError::from(error).into_response(),
    }
}

/// Extracts the user from a `Authorization: Basic` header, if one is present.
/// A present but undecodable basic header is an error; any other scheme (or
/// no header at all) is `None`.
fn basic_user(headers: &HeaderMap) -> Result<Option<String>> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let Ok(value) = value.to_str() else {
        return Ok(None);
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Ok(None);
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::MalformedBasicAuth)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MalformedBasicAuth)?;

    let (user, _password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));

    Ok(Some(user.to_owned()))
}
