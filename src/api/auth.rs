use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::error::ApiError;
use crate::auth::{self, LoginForm, RegisterForm, REGISTERED_NOTICE};
use crate::db::{AuthUser, Session};
use crate::ui::SESSION_COOKIE;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
    pub is_admin: bool,
    pub redirect_to: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: AuthUser,
    pub message: &'static str,
}

/// Token from `Authorization: Bearer`, else from the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

/// A live session resolved from the request.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        state
            .backend
            .get_session(&token)
            .await?
            .map(CurrentSession)
            .ok_or_else(|| ApiError::unauthorized("Your session has expired. Please login again"))
    }
}

/// Login endpoint
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(form): Json<LoginForm>,
) -> Result<Json<LoginResponse>, ApiError> {
    let outcome = auth::login(state.backend.as_ref(), &form).await?;

    Ok(Json(LoginResponse {
        access_token: outcome.session.access_token,
        expires_at: outcome.session.expires_at,
        user: outcome.session.user,
        is_admin: outcome.is_admin,
        redirect_to: outcome.destination,
        message: outcome.notice,
    }))
}

/// Registration endpoint
///
/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(form): Json<RegisterForm>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let user = auth::register(state.backend.as_ref(), &form).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            message: REGISTERED_NOTICE,
        }),
    ))
}

/// Logout endpoint
///
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
) -> Result<StatusCode, ApiError> {
    auth::logout(state.backend.as_ref(), &session.access_token).await?;
    Ok(StatusCode::NO_CONTENT)
}
