pub mod column_policy;
pub mod expression;
pub mod identifier;
pub mod permission_resolver;
pub mod sql_builder;
