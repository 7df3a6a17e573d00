//! Operator authentication
//!
//! Token issuance lives outside this server; all we consume is a yes/no
//! capability check on the incoming request.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::handlers::collect;
use crate::{AppError, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // Operator name
    pub role: String, // Operator role
    pub exp: usize,   // Expiration timestamp
    pub iat: usize,   // Issued at
}

/// Operator context extracted from the session token
#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub subject: String,
    pub role: String,
}

/// Result of the capability check, cached in request extensions so the
/// token is decoded once per request
#[derive(Debug, Clone)]
pub struct Identity(pub Option<OperatorContext>);

/// The capability check guarding operator routes
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Option<OperatorContext>;
}

/// HS256 JWT from `Authorization: Bearer` or the session cookie
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
    session_cookie: String,
}

impl JwtAuthenticator {
    pub fn new(config: &Config) -> Self {
        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation: Validation::default(),
            session_cookie: config.session_cookie.clone(),
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<OperatorContext> {
        let token = extract_bearer_token(headers).or_else(|| {
            CookieJar::from_headers(headers)
                .get(&self.session_cookie)
                .map(|c| c.value().to_string())
        })?;

        let claims = decode::<Claims>(&token, &self.key, &self.validation).ok()?.claims;
        if claims.role != "operator" && claims.role != "admin" {
            tracing::warn!("Operator role required but {} has role '{}'", claims.sub, claims.role);
            return None;
        }

        Some(OperatorContext {
            subject: claims.sub,
            role: claims.role,
        })
    }
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    auth_header.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

/// Middleware: operator routes. Anyone else is baited like every other probe.
pub async fn require_operator(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match state.gatekeeper.identify(req.extensions(), req.headers()) {
        Some(operator) => {
            req.extensions_mut().insert(Identity(Some(operator.clone())));
            req.extensions_mut().insert(operator);
            next.run(req).await
        }
        None => {
            req.extensions_mut().insert(Identity(None));
            collect::dispatch(&state, req).await
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for OperatorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
