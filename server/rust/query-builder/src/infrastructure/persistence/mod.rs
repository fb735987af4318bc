pub mod permission_postgres;
pub mod query_builder_postgres;
pub mod query_runner_postgres;
pub mod schema_introspector_postgres;

pub use permission_postgres::QueryBuilderPermissionPostgresRepository;
pub use query_builder_postgres::QueryBuilderPostgresRepository;
pub use query_runner_postgres::PostgresQueryRunner;
pub use schema_introspector_postgres::PostgresSchemaIntrospector;
