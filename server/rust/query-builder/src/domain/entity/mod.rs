pub mod query_builder;
pub mod query_builder_permission;
pub mod query_execution;
pub mod requester;
pub mod schema_info;

pub use query_builder::{
    CalculatedFieldInput, ColumnInput, CreateQueryBuilder, JoinInput, JoinType, QueryBuilder,
    QueryBuilderCalculatedField, QueryBuilderColumn, QueryBuilderJoin, UpdateQueryBuilder,
    MAX_NAME_LEN,
};
pub use query_builder_permission::{PermissionType, QueryBuilderPermission};
pub use query_execution::{
    FilterOperator, QueryExecutionParams, QueryExecutionResult, QueryFilter, ResultColumn,
    SortOrder,
};
pub use requester::Requester;
pub use schema_info::{
    is_internal_schema, is_internal_table, AvailableColumn, ColumnInfo, RelationInfo, TableInfo,
    SERVICE_SCHEMA,
};
