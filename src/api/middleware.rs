//! Request authentication, actor resolution and page-token preconditions.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::handlers::{AppError, ErrorBody};
use crate::designer::ConcurrencyToken;
use crate::error::PageError;
use crate::providers::StaticIdentity;

/// Header naming the user on whose behalf a request acts.
pub const ACTOR_HEADER: &str = "X-Actor";

const ANONYMOUS: &str = "anonymous";

/// Security configuration for the HTTP surface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityConfig {
    /// Bearer key required on every route except health.
    pub api_key: Option<String>,
    /// Allowed CORS origins. Permissive when `None`.
    pub cors_origins: Option<Vec<String>>,
}

impl SecurityConfig {
    /// No authentication, permissive CORS (local development and tests).
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            cors_origins: None,
        }
    }

    pub fn with_cors_origins(origins: Vec<String>) -> Self {
        Self {
            api_key: None,
            cors_origins: Some(origins),
        }
    }
}

/// Authentication middleware that checks for a valid bearer key.
///
/// Only the key is checked here. Who the request acts for comes separately
/// from [`Actor`], and `/health` is mounted outside this layer so probes
/// never need a key.
pub async fn auth_middleware(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected_key = match &config.api_key {
        Some(key) => key,
        None => return Ok(next.run(request).await),
    };

    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header.map(|h| h.strip_prefix("Bearer ")) {
        Some(Some(token)) if token == expected_key => Ok(next.run(request).await),
        Some(Some(_)) => {
            tracing::warn!("Invalid API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        Some(None) => {
            tracing::warn!("Invalid Authorization header format");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("Missing Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// The acting user, taken from the `X-Actor` header.
///
/// Missing or blank headers resolve to `anonymous`; the value is only used
/// for audit fields, never for authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    pub fn identity(&self) -> StaticIdentity {
        StaticIdentity::new(self.0.clone())
    }

    fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(name) => Self(name.to_string()),
            None => Self(ANONYMOUS.to_string()),
        }
    }
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|h| h.to_str().ok());
        Ok(Self::from_header(value))
    }
}

/// The page token a mutating request was built against, from `If-Match`.
///
/// Accepts the quoted form handed out in `ETag` as well as the bare token.
/// A request without one is refused with `428 Precondition Required`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfMatch(pub ConcurrencyToken);

impl IfMatch {
    fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        let raw = raw.strip_prefix("W/").unwrap_or(raw);
        Ok(Self(raw.trim_matches('"').parse()?))
    }
}

/// `ETag` value for a page token.
pub fn etag(token: ConcurrencyToken) -> String {
    format!("\"{token}\"")
}

impl<S> FromRequestParts<S> for IfMatch
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(header::IF_MATCH) else {
            tracing::warn!(path = %parts.uri.path(), "Mutation without If-Match token");
            let body = ErrorBody {
                error: "send the page token in an If-Match header".to_string(),
                code: "TOKEN_REQUIRED".to_string(),
            };
            return Err((StatusCode::PRECONDITION_REQUIRED, Json(body)).into_response());
        };
        let raw = value.to_str().map_err(|_| {
            AppError(PageError::Invalid("If-Match is not valid text".to_string())).into_response()
        })?;
        Self::parse(raw).map_err(IntoResponse::into_response)
    }
}
