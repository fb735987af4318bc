pub mod permission_repository;
pub mod query_builder_repository;
pub mod query_runner;
pub mod schema_introspector;

pub use permission_repository::QueryBuilderPermissionRepository;
pub use query_builder_repository::QueryBuilderRepository;
pub use query_runner::{QueryRunner, Row};
pub use schema_introspector::SchemaIntrospector;
