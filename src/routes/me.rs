use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::error::ApiResult;

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Option<String>,
    pub tenant_id: Option<Uuid>,
}

/// Get current authenticated user info
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<Json<MeResponse>> {
    let tenant_id = state.store.active_tenant(auth.user_id).await?;

    Ok(Json(MeResponse {
        user_id: auth.user_id,
        email: auth.email.clone(),
        role: auth.role.clone(),
        tenant_id,
    }))
}
