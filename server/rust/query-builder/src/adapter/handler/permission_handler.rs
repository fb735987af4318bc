use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::adapter::handler::error::{AppError, CODE_NOT_FOUND};
use crate::adapter::handler::AppState;
use crate::adapter::presenter::response::ListResponse;
use crate::domain::entity::{PermissionType, QueryBuilderPermission, Requester};
use crate::usecase::AddPermissionInput;

fn default_allowed() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddPermissionRequest {
    pub user_id: Option<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub role_id: Option<String>,
    pub permission_type: PermissionType,
    #[serde(default = "default_allowed")]
    pub is_allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionRequest {
    pub is_allowed: bool,
}

/// 権限レコードが指定した定義に属することを確認する。
async fn load_owned_permission(
    state: &AppState,
    query_builder_id: Uuid,
    permission_id: Uuid,
) -> Result<QueryBuilderPermission, AppError> {
    let permission = state.permission_uc.get_permission(permission_id).await?;
    if permission.query_builder_id != query_builder_id {
        return Err(AppError::not_found(
            CODE_NOT_FOUND,
            &format!("Permission '{}' not found", permission_id),
        ));
    }
    Ok(permission)
}

pub async fn list_permissions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    requester: Requester,
) -> Result<Json<ListResponse<QueryBuilderPermission>>, AppError> {
    state
        .manage_uc
        .authorize_permission_management(id, &requester)
        .await?;
    let permissions = state.permission_uc.get_permissions(id).await?;
    Ok(Json(ListResponse::new(permissions)))
}

pub async fn add_permission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    requester: Requester,
    Json(req): Json<AddPermissionRequest>,
) -> Result<(StatusCode, Json<QueryBuilderPermission>), AppError> {
    req.validate()?;
    state
        .manage_uc
        .authorize_permission_management(id, &requester)
        .await?;
    let saved = state
        .permission_uc
        .add_permission(AddPermissionInput {
            query_builder_id: id,
            user_id: req.user_id,
            role_id: req.role_id,
            permission_type: req.permission_type,
            is_allowed: req.is_allowed,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn update_permission(
    State(state): State<AppState>,
    Path((id, permission_id)): Path<(Uuid, Uuid)>,
    requester: Requester,
    Json(req): Json<UpdatePermissionRequest>,
) -> Result<Json<QueryBuilderPermission>, AppError> {
    state
        .manage_uc
        .authorize_permission_management(id, &requester)
        .await?;
    load_owned_permission(&state, id, permission_id).await?;
    let updated = state
        .permission_uc
        .update_permission(permission_id, req.is_allowed)
        .await?;
    Ok(Json(updated))
}

pub async fn remove_permission(
    State(state): State<AppState>,
    Path((id, permission_id)): Path<(Uuid, Uuid)>,
    requester: Requester,
) -> Result<StatusCode, AppError> {
    state
        .manage_uc
        .authorize_permission_management(id, &requester)
        .await?;
    load_owned_permission(&state, id, permission_id).await?;
    state.permission_uc.remove_permission(permission_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
