use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::auth::CurrentSession;
use super::error::ApiError;
use super::validation::validate_search_query;
use crate::db::FarmerProfile;
use crate::listing;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FarmerQuery {
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FarmersResponse {
    pub query: String,
    pub total: usize,
    pub matched: usize,
    pub farmers: Vec<FarmerProfile>,
    /// Set when nothing matched the query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// Farmer directory with optional search
///
/// GET /api/farmers?q=
pub async fn list(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<FarmerQuery>,
) -> Result<Json<FarmersResponse>, ApiError> {
    validate_search_query(&query.q).map_err(|e| ApiError::validation_field("q", e))?;

    if !state.backend.is_admin(&session, &session.user.id).await? {
        warn!(user_id = %session.user.id, "Non-admin requested farmer directory");
        return Err(ApiError::forbidden("Admin access required"));
    }

    let directory =
        listing::farmer_directory(state.backend.as_ref(), &session, query.q.as_deref()).await?;

    Ok(Json(FarmersResponse {
        message: directory.empty_message(),
        matched: directory.farmers.len(),
        query: directory.query,
        total: directory.total,
        farmers: directory.farmers,
    }))
}
