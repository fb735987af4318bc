use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::adapter::handler::error::AppError;
use crate::adapter::handler::AppState;
use crate::domain::entity::{ColumnInfo, RelationInfo, Requester, TableInfo};

#[derive(Debug, Deserialize)]
pub struct SchemaQuery {
    pub schema: Option<String>,
}

// スキーマ参照は要求者が識別できれば許可する

pub async fn list_tables(
    State(state): State<AppState>,
    _requester: Requester,
    Query(query): Query<SchemaQuery>,
) -> Result<Json<Vec<TableInfo>>, AppError> {
    let tables = state.schema_uc.get_tables(query.schema.as_deref()).await?;
    Ok(Json(tables))
}

pub async fn list_columns(
    State(state): State<AppState>,
    Path(table): Path<String>,
    _requester: Requester,
    Query(query): Query<SchemaQuery>,
) -> Result<Json<Vec<ColumnInfo>>, AppError> {
    let columns = state
        .schema_uc
        .get_columns(&table, query.schema.as_deref())
        .await?;
    Ok(Json(columns))
}

pub async fn list_relations(
    State(state): State<AppState>,
    Path(table): Path<String>,
    _requester: Requester,
    Query(query): Query<SchemaQuery>,
) -> Result<Json<Vec<RelationInfo>>, AppError> {
    let relations = state
        .schema_uc
        .get_relations(&table, query.schema.as_deref())
        .await?;
    Ok(Json(relations))
}

pub async fn list_databases(
    State(state): State<AppState>,
    _requester: Requester,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.schema_uc.get_databases().await?))
}

pub async fn list_schemas(
    State(state): State<AppState>,
    _requester: Requester,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.schema_uc.get_schemas().await?))
}
