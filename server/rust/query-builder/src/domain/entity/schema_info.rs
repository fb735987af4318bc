use serde::Serialize;

/// ライブカタログから取得したテーブル情報。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub table_name: String,
    pub schema_name: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default_value: Option<String>,
    pub max_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub referenced_table: Option<String>,
    pub referenced_column: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationInfo {
    pub constraint_name: String,
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
}

/// 利用可能カラム一覧の要素。どのテーブルのカラムかを併せて返す。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableColumn {
    pub table_name: String,
    #[serde(flatten)]
    pub column: ColumnInfo,
}

const INTERNAL_TABLES: &[&str] = &[
    "_sqlx_migrations",
    "migrations",
    "typeorm_metadata",
    "query-result-cache",
    "__diesel_schema_migrations",
    "schema_migrations",
];

/// マイグレーション管理用などの内部テーブルかどうかを判定する。
pub fn is_internal_table(name: &str) -> bool {
    INTERNAL_TABLES.contains(&name) || name.ends_with("_migrations") || name.starts_with("__")
}

/// クエリビルダー定義そのものを保持するスキーマ。
pub const SERVICE_SCHEMA: &str = "query_builder";

/// 参照を許可しないスキーマ（定義保存用とシステムカタログ）かどうかを判定する。
pub fn is_internal_schema(name: &str) -> bool {
    name.eq_ignore_ascii_case(SERVICE_SCHEMA)
        || name.eq_ignore_ascii_case("information_schema")
        || name.to_ascii_lowercase().starts_with("pg_")
}
