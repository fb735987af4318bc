use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 定義名の最大文字数（name カラムは VARCHAR(255)）。
pub const MAX_NAME_LEN: usize = 255;

const COPY_SUFFIX: &str = " (Copy)";

/// 結合種別。SQL の JOIN キーワードに対応する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
        }
    }

    pub fn sql_keyword(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INNER" => Ok(JoinType::Inner),
            "LEFT" => Ok(JoinType::Left),
            "RIGHT" => Ok(JoinType::Right),
            "FULL" => Ok(JoinType::Full),
            other => anyhow::bail!("invalid join type: {}", other),
        }
    }
}

/// QueryBuilder は保存済みクエリ定義を表す。
/// 参照するテーブル・カラム名は保存時ではなく実行時にカタログと照合される。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryBuilder {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub database: String,
    pub main_table: String,
    pub is_public: bool,
    pub max_rows: i32,
    pub settings: serde_json::Value,
    pub layout: serde_json::Value,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub columns: Vec<QueryBuilderColumn>,
    pub joins: Vec<QueryBuilderJoin>,
    pub calculated_fields: Vec<QueryBuilderCalculatedField>,
}

impl QueryBuilder {
    pub fn new(input: CreateQueryBuilder, created_by: Uuid) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            name: input.name,
            description: input.description,
            database: input.database,
            main_table: input.main_table,
            is_public: input.is_public,
            max_rows: input.max_rows,
            settings: input.settings,
            layout: input.layout,
            created_by,
            created_at: now,
            updated_at: now,
            columns: input.columns.into_iter().map(|c| c.into_column(id)).collect(),
            joins: input.joins.into_iter().map(|j| j.into_join(id)).collect(),
            calculated_fields: input
                .calculated_fields
                .into_iter()
                .map(|f| f.into_calculated_field(id))
                .collect(),
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.created_by == user_id
    }

    /// 複製用の入力を組み立てる。名前に " (Copy)" を付け、非公開にする。
    /// 付与後に上限を超える場合は元の名前を文字単位で切り詰める。
    pub fn to_duplicate_input(&self) -> CreateQueryBuilder {
        let keep = MAX_NAME_LEN - COPY_SUFFIX.chars().count();
        let base: String = self.name.chars().take(keep).collect();
        CreateQueryBuilder {
            name: format!("{base}{COPY_SUFFIX}"),
            description: self.description.clone(),
            database: self.database.clone(),
            main_table: self.main_table.clone(),
            is_public: false,
            max_rows: self.max_rows,
            settings: self.settings.clone(),
            layout: self.layout.clone(),
            columns: self.columns.iter().map(QueryBuilderColumn::to_input).collect(),
            joins: self.joins.iter().map(QueryBuilderJoin::to_input).collect(),
            calculated_fields: self
                .calculated_fields
                .iter()
                .map(QueryBuilderCalculatedField::to_input)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryBuilderColumn {
    pub id: Uuid,
    pub query_builder_id: Uuid,
    pub table_name: String,
    pub column_name: String,
    pub alias: String,
    pub label: String,
    pub description: Option<String>,
    pub data_type: String,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub is_visible: bool,
    pub is_filterable: bool,
    pub is_sortable: bool,
    pub display_order: i32,
    pub format: Option<serde_json::Value>,
    pub aggregation: Option<serde_json::Value>,
}

impl QueryBuilderColumn {
    /// 結果セット上の列名。alias が空の場合はカラム名を用いる。
    pub fn output_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.column_name
        } else {
            &self.alias
        }
    }

    pub fn to_input(&self) -> ColumnInput {
        ColumnInput {
            table_name: self.table_name.clone(),
            column_name: self.column_name.clone(),
            alias: self.alias.clone(),
            label: self.label.clone(),
            description: self.description.clone(),
            data_type: self.data_type.clone(),
            is_primary_key: self.is_primary_key,
            is_foreign_key: self.is_foreign_key,
            is_visible: self.is_visible,
            is_filterable: self.is_filterable,
            is_sortable: self.is_sortable,
            display_order: self.display_order,
            format: self.format.clone(),
            aggregation: self.aggregation.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryBuilderJoin {
    pub id: Uuid,
    pub query_builder_id: Uuid,
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub join_type: JoinType,
    pub alias: Option<String>,
    pub display_order: i32,
}

impl QueryBuilderJoin {
    pub fn to_input(&self) -> JoinInput {
        JoinInput {
            from_table: self.from_table.clone(),
            from_column: self.from_column.clone(),
            to_table: self.to_table.clone(),
            to_column: self.to_column.clone(),
            join_type: self.join_type,
            alias: self.alias.clone(),
            display_order: self.display_order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryBuilderCalculatedField {
    pub id: Uuid,
    pub query_builder_id: Uuid,
    pub name: String,
    pub label: String,
    pub description: Option<String>,
    pub expression: String,
    pub data_type: String,
    pub is_visible: bool,
    pub display_order: i32,
    pub format: Option<serde_json::Value>,
    pub dependencies: Vec<String>,
}

impl QueryBuilderCalculatedField {
    pub fn to_input(&self) -> CalculatedFieldInput {
        CalculatedFieldInput {
            name: self.name.clone(),
            label: self.label.clone(),
            description: self.description.clone(),
            expression: self.expression.clone(),
            data_type: self.data_type.clone(),
            is_visible: self.is_visible,
            display_order: self.display_order,
            format: self.format.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

/// カラム定義の入力。ID は永続化時に新規採番される。
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInput {
    pub table_name: String,
    pub column_name: String,
    pub alias: String,
    pub label: String,
    pub description: Option<String>,
    pub data_type: String,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub is_visible: bool,
    pub is_filterable: bool,
    pub is_sortable: bool,
    pub display_order: i32,
    pub format: Option<serde_json::Value>,
    pub aggregation: Option<serde_json::Value>,
}

impl ColumnInput {
    pub fn into_column(self, query_builder_id: Uuid) -> QueryBuilderColumn {
        QueryBuilderColumn {
            id: Uuid::new_v4(),
            query_builder_id,
            table_name: self.table_name,
            column_name: self.column_name,
            alias: self.alias,
            label: self.label,
            description: self.description,
            data_type: self.data_type,
            is_primary_key: self.is_primary_key,
            is_foreign_key: self.is_foreign_key,
            is_visible: self.is_visible,
            is_filterable: self.is_filterable,
            is_sortable: self.is_sortable,
            display_order: self.display_order,
            format: self.format,
            aggregation: self.aggregation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinInput {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub join_type: JoinType,
    pub alias: Option<String>,
    pub display_order: i32,
}

impl JoinInput {
    pub fn into_join(self, query_builder_id: Uuid) -> QueryBuilderJoin {
        QueryBuilderJoin {
            id: Uuid::new_v4(),
            query_builder_id,
            from_table: self.from_table,
            from_column: self.from_column,
            to_table: self.to_table,
            to_column: self.to_column,
            join_type: self.join_type,
            alias: self.alias,
            display_order: self.display_order,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedFieldInput {
    pub name: String,
    pub label: String,
    pub description: Option<String>,
    pub expression: String,
    pub data_type: String,
    pub is_visible: bool,
    pub display_order: i32,
    pub format: Option<serde_json::Value>,
    pub dependencies: Vec<String>,
}

impl CalculatedFieldInput {
    pub fn into_calculated_field(self, query_builder_id: Uuid) -> QueryBuilderCalculatedField {
        QueryBuilderCalculatedField {
            id: Uuid::new_v4(),
            query_builder_id,
            name: self.name,
            label: self.label,
            description: self.description,
            expression: self.expression,
            data_type: self.data_type,
            is_visible: self.is_visible,
            display_order: self.display_order,
            format: self.format,
            dependencies: self.dependencies,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateQueryBuilder {
    pub name: String,
    pub description: Option<String>,
    pub database: String,
    pub main_table: String,
    pub is_public: bool,
    pub max_rows: i32,
    pub settings: serde_json::Value,
    pub layout: serde_json::Value,
    pub columns: Vec<ColumnInput>,
    pub joins: Vec<JoinInput>,
    pub calculated_fields: Vec<CalculatedFieldInput>,
}

/// 部分更新。サブコレクションは指定された場合に丸ごと置き換える。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateQueryBuilder {
    pub name: Option<String>,
    /// `Some(None)` で説明を消去する。
    pub description: Option<Option<String>>,
    pub database: Option<String>,
    pub main_table: Option<String>,
    pub is_public: Option<bool>,
    pub max_rows: Option<i32>,
    pub settings: Option<serde_json::Value>,
    pub layout: Option<serde_json::Value>,
    pub columns: Option<Vec<ColumnInput>>,
    pub joins: Option<Vec<JoinInput>>,
    pub calculated_fields: Option<Vec<CalculatedFieldInput>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_column(name: &str) -> ColumnInput {
        ColumnInput {
            table_name: "orders".to_string(),
            column_name: name.to_string(),
            alias: name.to_string(),
            label: name.to_string(),
            description: None,
            data_type: "integer".to_string(),
            is_primary_key: false,
            is_foreign_key: false,
            is_visible: true,
            is_filterable: true,
            is_sortable: true,
            display_order: 0,
            format: None,
            aggregation: None,
        }
    }

    fn sample_input() -> CreateQueryBuilder {
        CreateQueryBuilder {
            name: "Orders".to_string(),
            description: Some("open orders".to_string()),
            database: "default".to_string(),
            main_table: "orders".to_string(),
            is_public: true,
            max_rows: 500,
            settings: serde_json::json!({"theme": "dark"}),
            layout: serde_json::json!({}),
            columns: vec![sample_column("id"), sample_column("total")],
            joins: vec![JoinInput {
                from_table: "orders".to_string(),
                from_column: "client_id".to_string(),
                to_table: "clients".to_string(),
                to_column: "id".to_string(),
                join_type: JoinType::Left,
                alias: None,
                display_order: 0,
            }],
            calculated_fields: vec![CalculatedFieldInput {
                name: "vat".to_string(),
                label: "VAT".to_string(),
                description: None,
                expression: "total * 0.2".to_string(),
                data_type: "number".to_string(),
                is_visible: true,
                display_order: 0,
                format: None,
                dependencies: vec!["total".to_string()],
            }],
        }
    }

    #[test]
    fn test_new_assigns_parent_id_to_children() {
        let user = Uuid::new_v4();
        let qb = QueryBuilder::new(sample_input(), user);
        assert_eq!(qb.created_by, user);
        assert_eq!(qb.columns.len(), 2);
        assert!(qb.columns.iter().all(|c| c.query_builder_id == qb.id));
        assert!(qb.joins.iter().all(|j| j.query_builder_id == qb.id));
        assert!(qb
            .calculated_fields
            .iter()
            .all(|f| f.query_builder_id == qb.id));
        assert!(qb.is_owned_by(user));
        assert!(!qb.is_owned_by(Uuid::new_v4()));
    }

    #[test]
    fn test_duplicate_input_is_private_and_renamed() {
        let qb = QueryBuilder::new(sample_input(), Uuid::new_v4());
        let dup = qb.to_duplicate_input();
        assert_eq!(dup.name, "Orders (Copy)");
        assert!(!dup.is_public);
        assert_eq!(dup.max_rows, 500);
        assert_eq!(dup.columns, qb.columns.iter().map(QueryBuilderColumn::to_input).collect::<Vec<_>>());

        let copy = QueryBuilder::new(dup, Uuid::new_v4());
        assert_ne!(copy.id, qb.id);
        assert_ne!(copy.columns[0].id, qb.columns[0].id);
        assert_eq!(copy.columns[0].column_name, qb.columns[0].column_name);
    }

    #[test]
    fn test_duplicate_name_stays_within_limit() {
        let mut input = sample_input();
        input.name = "あ".repeat(MAX_NAME_LEN);
        let qb = QueryBuilder::new(input, Uuid::new_v4());

        let dup = qb.to_duplicate_input();
        assert_eq!(dup.name.chars().count(), MAX_NAME_LEN);
        assert!(dup.name.ends_with(" (Copy)"));
        assert!(dup.name.starts_with(&"あ".repeat(MAX_NAME_LEN - 7)));

        // 上限ちょうどに収まる名前は切り詰めない
        let mut input = sample_input();
        input.name = "a".repeat(MAX_NAME_LEN - 7);
        let dup = QueryBuilder::new(input, Uuid::new_v4()).to_duplicate_input();
        assert_eq!(dup.name, format!("{} (Copy)", "a".repeat(MAX_NAME_LEN - 7)));
    }

    #[test]
    fn test_output_name_falls_back_to_column_name() {
        let mut col = sample_column("total").into_column(Uuid::new_v4());
        assert_eq!(col.output_name(), "total");
        col.alias = String::new();
        assert_eq!(col.output_name(), "total");
        col.alias = "amount".to_string();
        assert_eq!(col.output_name(), "amount");
    }

    #[test]
    fn test_join_type_parse_and_keyword() {
        assert_eq!("left".parse::<JoinType>().unwrap(), JoinType::Left);
        assert_eq!("FULL".parse::<JoinType>().unwrap(), JoinType::Full);
        assert!("CROSS".parse::<JoinType>().is_err());
        assert_eq!(JoinType::Full.sql_keyword(), "FULL OUTER JOIN");
        assert_eq!(JoinType::Inner.to_string(), "INNER");
    }
}
