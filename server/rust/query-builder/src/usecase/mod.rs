pub mod execute_query;
pub mod get_available_columns;
pub mod introspect_schema;
pub mod manage_query_builders;
pub mod query_builder_permission;

pub use execute_query::{ExecuteQueryError, ExecuteQueryUseCase, QueryLimits};
pub use get_available_columns::GetAvailableColumnsUseCase;
pub use introspect_schema::{IntrospectSchemaUseCase, SchemaError};
pub use manage_query_builders::{ManageQueryBuildersUseCase, QueryBuilderError};
pub use query_builder_permission::{
    AddPermissionInput, PermissionError, QueryBuilderPermissionUseCase,
};
