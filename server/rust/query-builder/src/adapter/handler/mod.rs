pub mod error;
pub mod health_handler;
pub mod permission_handler;
pub mod query_builder_handler;
pub mod schema_handler;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::adapter::middleware::auth::{auth_middleware, QueryBuilderAuthState};
use crate::adapter::middleware::metrics::track_http_metrics;
use crate::infrastructure::metrics::Metrics;
use crate::usecase;

#[derive(Clone)]
pub struct AppState {
    pub manage_uc: Arc<usecase::ManageQueryBuildersUseCase>,
    pub permission_uc: Arc<usecase::QueryBuilderPermissionUseCase>,
    pub execute_uc: Arc<usecase::ExecuteQueryUseCase>,
    pub available_columns_uc: Arc<usecase::GetAvailableColumnsUseCase>,
    pub schema_uc: Arc<usecase::IntrospectSchemaUseCase>,
    pub metrics: Arc<Metrics>,
    pub auth_state: Option<QueryBuilderAuthState>,
    /// readyz で疎通確認に使う。テストでは None。
    pub db_pool: Option<PgPool>,
    /// 作成時に max_rows が省略された場合の値
    pub default_max_rows: i32,
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/healthz", get(health_handler::healthz))
        .route("/readyz", get(health_handler::readyz))
        .route("/metrics", get(health_handler::metrics_handler));

    let api_routes = Router::new()
        .route(
            "/api/v1/query-builder",
            get(query_builder_handler::find_all).post(query_builder_handler::create),
        )
        .route(
            "/api/v1/query-builder/{id}",
            get(query_builder_handler::find_one)
                .patch(query_builder_handler::update)
                .delete(query_builder_handler::remove),
        )
        .route(
            "/api/v1/query-builder/{id}/duplicate",
            post(query_builder_handler::duplicate),
        )
        .route(
            "/api/v1/query-builder/{id}/execute",
            post(query_builder_handler::execute),
        )
        .route(
            "/api/v1/query-builder/{id}/columns",
            get(query_builder_handler::available_columns),
        )
        .route(
            "/api/v1/query-builder/{id}/permissions",
            get(permission_handler::list_permissions).post(permission_handler::add_permission),
        )
        .route(
            "/api/v1/query-builder/{id}/permissions/{permission_id}",
            patch(permission_handler::update_permission)
                .delete(permission_handler::remove_permission),
        )
        .route("/api/v1/schema/tables", get(schema_handler::list_tables))
        .route(
            "/api/v1/schema/tables/{table}/columns",
            get(schema_handler::list_columns),
        )
        .route(
            "/api/v1/schema/tables/{table}/relations",
            get(schema_handler::list_relations),
        )
        .route("/api/v1/schema/databases", get(schema_handler::list_databases))
        .route("/api/v1/schema/schemas", get(schema_handler::list_schemas));

    let api_routes = if let Some(ref auth_state) = state.auth_state {
        api_routes.layer(from_fn_with_state(auth_state.clone(), auth_middleware))
    } else {
        // 認証なし（開発環境用）。要求者は X-User-Id / X-User-Roles ヘッダーで指定する
        api_routes
    };

    public_routes
        .merge(api_routes)
        .layer(from_fn_with_state(state.metrics.clone(), track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
