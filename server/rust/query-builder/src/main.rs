use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use k1s0_query_builder_server::adapter;
use k1s0_query_builder_server::domain;
use k1s0_query_builder_server::infrastructure;
use k1s0_query_builder_server::usecase;

use adapter::handler::{self, AppState};
use adapter::middleware::auth::QueryBuilderAuthState;
use infrastructure::config::Config;
use infrastructure::persistence::{
    PostgresQueryRunner, PostgresSchemaIntrospector, QueryBuilderPermissionPostgresRepository,
    QueryBuilderPostgresRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Config
    let cfg = Config::load()?;

    // 2. Telemetry
    infrastructure::telemetry::init_telemetry(&cfg.app, &cfg.telemetry)?;
    info!(
        service = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        "starting query builder server"
    );

    // 3. Database
    let db_cfg = cfg
        .database
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("database configuration is required"))?;
    let pool = infrastructure::database::create_pool(db_cfg).await?;
    info!(max_connections = db_cfg.max_connections, "database connected");
    if db_cfg.run_migrations {
        infrastructure::database::run_migrations(&pool).await?;
        info!("database migrations applied");
    }

    // 4. Metrics
    let metrics = Arc::new(infrastructure::metrics::Metrics::new("query_builder")?);

    // 5. Repositories
    let query_builder_repo: Arc<dyn domain::repository::QueryBuilderRepository> =
        Arc::new(QueryBuilderPostgresRepository::new(pool.clone()));
    let permission_repo: Arc<dyn domain::repository::QueryBuilderPermissionRepository> =
        Arc::new(QueryBuilderPermissionPostgresRepository::new(pool.clone()));
    let introspector: Arc<dyn domain::repository::SchemaIntrospector> =
        Arc::new(PostgresSchemaIntrospector::new(pool.clone()));
    let runner: Arc<dyn domain::repository::QueryRunner> =
        Arc::new(PostgresQueryRunner::new(pool.clone()));

    // 6. Use Cases
    let schema = cfg.query.introspection_schema.clone();
    let column_policy = cfg.query.column_policy();
    let permission_uc = Arc::new(usecase::QueryBuilderPermissionUseCase::new(
        query_builder_repo.clone(),
        permission_repo,
    ));
    let manage_uc = Arc::new(usecase::ManageQueryBuildersUseCase::new(
        query_builder_repo.clone(),
        permission_uc.clone(),
    ));
    let execute_uc = Arc::new(usecase::ExecuteQueryUseCase::new(
        query_builder_repo,
        permission_uc.clone(),
        introspector.clone(),
        runner,
        schema.clone(),
        usecase::QueryLimits {
            default_page_size: cfg.query.default_page_size,
            hard_max_rows: cfg.query.hard_max_rows,
        },
    )
    .with_column_policy(column_policy.clone()));
    let available_columns_uc = Arc::new(usecase::GetAvailableColumnsUseCase::new(
        manage_uc.clone(),
        introspector.clone(),
        schema.clone(),
    )
    .with_column_policy(column_policy.clone()));
    let schema_uc = Arc::new(
        usecase::IntrospectSchemaUseCase::new(introspector, schema)
            .with_column_policy(column_policy),
    );

    // 7. Auth
    let auth_state = cfg.auth.as_ref().map(QueryBuilderAuthState::new);
    if auth_state.is_none() {
        tracing::warn!("auth is not configured; requester identity is taken from X-User-Id headers");
    }

    // 8. AppState + Router
    let state = AppState {
        manage_uc,
        permission_uc,
        execute_uc,
        available_columns_uc,
        schema_uc,
        metrics,
        auth_state,
        db_pool: Some(pool.clone()),
        default_max_rows: cfg.query.default_max_rows,
    };
    let app = handler::router(state);

    // 9. Start REST server
    let rest_addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    info!("REST server listening on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    infrastructure::telemetry::shutdown();
    info!("query builder server exited");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
