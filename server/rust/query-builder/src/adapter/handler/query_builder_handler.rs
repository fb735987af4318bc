use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::adapter::handler::error::AppError;
use crate::adapter::handler::AppState;
use crate::adapter::presenter::response::ListResponse;
use crate::domain::entity::{
    AvailableColumn, CalculatedFieldInput, ColumnInput, CreateQueryBuilder, JoinInput, JoinType,
    QueryBuilder, QueryExecutionParams, QueryExecutionResult, QueryFilter, Requester, SortOrder,
    UpdateQueryBuilder,
};
use crate::usecase::ExecuteQueryError;

const DEFAULT_DATABASE: &str = "default";
const DEFAULT_DATA_TYPE: &str = "text";

fn default_true() -> bool {
    true
}

/// 省略時は `None`、明示的な null は `Some(None)` として受け取る。
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, Validate)]
pub struct ColumnRequest {
    #[validate(length(min = 1, max = 63))]
    pub table_name: String,
    #[validate(length(min = 1, max = 63))]
    pub column_name: String,
    #[serde(default)]
    #[validate(length(max = 63))]
    pub alias: String,
    #[validate(length(max = 255))]
    pub label: Option<String>,
    pub description: Option<String>,
    pub data_type: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default = "default_true")]
    pub is_visible: bool,
    #[serde(default = "default_true")]
    pub is_filterable: bool,
    #[serde(default = "default_true")]
    pub is_sortable: bool,
    #[serde(default)]
    pub display_order: i32,
    pub format: Option<Value>,
    pub aggregation: Option<Value>,
}

impl From<ColumnRequest> for ColumnInput {
    fn from(r: ColumnRequest) -> Self {
        ColumnInput {
            label: r.label.unwrap_or_else(|| r.column_name.clone()),
            table_name: r.table_name,
            column_name: r.column_name,
            alias: r.alias,
            description: r.description,
            data_type: r.data_type.unwrap_or_else(|| DEFAULT_DATA_TYPE.to_string()),
            is_primary_key: r.is_primary_key,
            is_foreign_key: r.is_foreign_key,
            is_visible: r.is_visible,
            is_filterable: r.is_filterable,
            is_sortable: r.is_sortable,
            display_order: r.display_order,
            format: r.format,
            aggregation: r.aggregation,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct JoinRequest {
    #[validate(length(min = 1, max = 63))]
    pub from_table: String,
    #[validate(length(min = 1, max = 63))]
    pub from_column: String,
    #[validate(length(min = 1, max = 63))]
    pub to_table: String,
    #[validate(length(min = 1, max = 63))]
    pub to_column: String,
    pub join_type: Option<JoinType>,
    #[validate(length(min = 1, max = 63))]
    pub alias: Option<String>,
    #[serde(default)]
    pub display_order: i32,
}

impl From<JoinRequest> for JoinInput {
    fn from(r: JoinRequest) -> Self {
        JoinInput {
            from_table: r.from_table,
            from_column: r.from_column,
            to_table: r.to_table,
            to_column: r.to_column,
            join_type: r.join_type.unwrap_or(JoinType::Left),
            alias: r.alias,
            display_order: r.display_order,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CalculatedFieldRequest {
    #[validate(length(min = 1, max = 63))]
    pub name: String,
    #[validate(length(max = 255))]
    pub label: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 1000))]
    pub expression: String,
    pub data_type: Option<String>,
    #[serde(default = "default_true")]
    pub is_visible: bool,
    #[serde(default)]
    pub display_order: i32,
    pub format: Option<Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl From<CalculatedFieldRequest> for CalculatedFieldInput {
    fn from(r: CalculatedFieldRequest) -> Self {
        CalculatedFieldInput {
            label: r.label.unwrap_or_else(|| r.name.clone()),
            name: r.name,
            description: r.description,
            expression: r.expression,
            data_type: r.data_type.unwrap_or_else(|| "number".to_string()),
            is_visible: r.is_visible,
            display_order: r.display_order,
            format: r.format,
            dependencies: r.dependencies,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQueryBuilderRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub database: Option<String>,
    #[validate(length(min = 1, max = 63))]
    pub main_table: String,
    #[serde(default)]
    pub is_public: bool,
    #[validate(range(min = 1))]
    pub max_rows: Option<i32>,
    pub settings: Option<Value>,
    pub layout: Option<Value>,
    #[serde(default)]
    #[validate(nested)]
    pub columns: Vec<ColumnRequest>,
    #[serde(default)]
    #[validate(nested)]
    pub joins: Vec<JoinRequest>,
    #[serde(default)]
    #[validate(nested)]
    pub calculated_fields: Vec<CalculatedFieldRequest>,
}

impl CreateQueryBuilderRequest {
    fn into_input(self, default_max_rows: i32) -> CreateQueryBuilder {
        CreateQueryBuilder {
            name: self.name,
            description: self.description,
            database: self.database.unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            main_table: self.main_table,
            is_public: self.is_public,
            max_rows: self.max_rows.unwrap_or(default_max_rows),
            settings: self.settings.unwrap_or_else(|| serde_json::json!({})),
            layout: self.layout.unwrap_or_else(|| serde_json::json!({})),
            columns: self.columns.into_iter().map(Into::into).collect(),
            joins: self.joins.into_iter().map(Into::into).collect(),
            calculated_fields: self.calculated_fields.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateQueryBuilderRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[validate(length(min = 1, max = 100))]
    pub database: Option<String>,
    #[validate(length(min = 1, max = 63))]
    pub main_table: Option<String>,
    pub is_public: Option<bool>,
    #[validate(range(min = 1))]
    pub max_rows: Option<i32>,
    pub settings: Option<Value>,
    pub layout: Option<Value>,
    #[validate(nested)]
    pub columns: Option<Vec<ColumnRequest>>,
    #[validate(nested)]
    pub joins: Option<Vec<JoinRequest>>,
    #[validate(nested)]
    pub calculated_fields: Option<Vec<CalculatedFieldRequest>>,
}

impl From<UpdateQueryBuilderRequest> for UpdateQueryBuilder {
    fn from(r: UpdateQueryBuilderRequest) -> Self {
        UpdateQueryBuilder {
            name: r.name,
            description: r.description,
            database: r.database,
            main_table: r.main_table,
            is_public: r.is_public,
            max_rows: r.max_rows,
            settings: r.settings,
            layout: r.layout,
            columns: r.columns.map(|c| c.into_iter().map(Into::into).collect()),
            joins: r.joins.map(|j| j.into_iter().map(Into::into).collect()),
            calculated_fields: r
                .calculated_fields
                .map(|f| f.into_iter().map(Into::into).collect()),
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ExecuteQueryRequest {
    #[validate(range(min = 1))]
    pub page: Option<i64>,
    #[validate(range(min = 1))]
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
}

impl From<ExecuteQueryRequest> for QueryExecutionParams {
    fn from(r: ExecuteQueryRequest) -> Self {
        QueryExecutionParams {
            page: r.page,
            page_size: r.page_size,
            sort_by: r.sort_by,
            sort_order: r.sort_order,
            filters: r.filters,
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    requester: Requester,
    Json(req): Json<CreateQueryBuilderRequest>,
) -> Result<(StatusCode, Json<QueryBuilder>), AppError> {
    req.validate()?;
    let created = state
        .manage_uc
        .create(req.into_input(state.default_max_rows), &requester)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn find_all(
    State(state): State<AppState>,
    requester: Requester,
) -> Result<Json<ListResponse<QueryBuilder>>, AppError> {
    let items = state.manage_uc.find_all(&requester).await?;
    Ok(Json(ListResponse::new(items)))
}

pub async fn find_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    requester: Requester,
) -> Result<Json<QueryBuilder>, AppError> {
    let query_builder = state.manage_uc.find_one(id, &requester).await?;
    Ok(Json(query_builder))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    requester: Requester,
    Json(req): Json<UpdateQueryBuilderRequest>,
) -> Result<Json<QueryBuilder>, AppError> {
    req.validate()?;
    let updated = state.manage_uc.update(id, req.into(), &requester).await?;
    Ok(Json(updated))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    requester: Requester,
) -> Result<StatusCode, AppError> {
    state.manage_uc.remove(id, &requester).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn duplicate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    requester: Requester,
) -> Result<(StatusCode, Json<QueryBuilder>), AppError> {
    let copy = state.manage_uc.duplicate(id, &requester).await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

/// ボディ省略時は既定のページング・ソートで実行する。
pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    requester: Requester,
    body: Option<Json<ExecuteQueryRequest>>,
) -> Result<Json<QueryExecutionResult>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    req.validate()?;

    let start = std::time::Instant::now();
    let result = state.execute_uc.execute(id, req.into(), &requester).await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(ExecuteQueryError::Forbidden) => "denied",
        Err(ExecuteQueryError::Validation(_)) => "invalid",
        Err(ExecuteQueryError::NotFound(_)) => "not_found",
        Err(ExecuteQueryError::Internal(_)) => "error",
    };
    state
        .metrics
        .record_query_execution(outcome, start.elapsed().as_secs_f64());
    Ok(Json(result?))
}

pub async fn available_columns(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    requester: Requester,
) -> Result<Json<Vec<AvailableColumn>>, AppError> {
    let columns = state.available_columns_uc.execute(id, &requester).await?;
    Ok(Json(columns))
}
