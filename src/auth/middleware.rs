use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization, Cookie},
    TypedHeader,
};
use std::sync::Arc;

use super::AuthContext;
use crate::app::AppState;
use crate::error::ErrorResponse;

/// Cookie carrying the session token for browser clients.
pub const SESSION_COOKIE: &str = "session_token";

/// Extractor that requires authentication.
///
/// The token is read from `Authorization: Bearer`, falling back to the
/// `session_token` cookie.
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

impl std::ops::Deref for RequireAuth {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingToken => "Missing authorization token",
            AuthError::InvalidToken => "Invalid or expired token",
        };

        let body = ErrorResponse {
            code: "UNAUTHORIZED".to_string(),
            detail: message.to_string(),
            request_id: None,
        };

        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let bearer = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|TypedHeader(auth)| auth.token().to_string());

        let token = match bearer {
            Some(token) => token,
            None => TypedHeader::<Cookie>::from_request_parts(parts, state)
                .await
                .ok()
                .and_then(|TypedHeader(cookie)| cookie.get(SESSION_COOKIE).map(str::to_string))
                .ok_or(AuthError::MissingToken)?,
        };

        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = state.jwt.verify_token(&token).map_err(|e| {
            tracing::warn!(error = %e, "JWT verification failed");
            AuthError::InvalidToken
        })?;

        let context = AuthContext::from_claims(&claims).map_err(|e| {
            tracing::warn!(error = %e, "Failed to build auth context");
            AuthError::InvalidToken
        })?;

        Ok(RequireAuth(context))
    }
}
