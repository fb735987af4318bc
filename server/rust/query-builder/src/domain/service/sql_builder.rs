//! 保存済みクエリ定義からパラメータ化 SELECT を組み立てる。
//!
//! テーブル・カラム名はすべて識別子として構文検証したうえで、ライブカタログに
//! 存在することを確認してから引用符付きで埋め込む。フィルタ値と LIMIT/OFFSET は
//! 常にバインドパラメータとして渡す。

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::domain::entity::{
    ColumnInfo, FilterOperator, QueryBuilder, QueryExecutionParams, QueryFilter,
};
use crate::domain::service::column_policy::ColumnPolicy;
use crate::domain::service::identifier::{is_valid_identifier, quote_identifier};

/// テーブル名 -> カラム情報。実行時に introspection で取得したもの。
pub type Catalog = HashMap<String, Vec<ColumnInfo>>;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Number(f64),
    Bool(bool),
    TextList(Vec<String>),
    NumberList(Vec<f64>),
}

/// 投影される列。hidden な列も計算フィールドの入力として投影される。
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    pub name: String,
    pub label: String,
    pub data_type: String,
    pub is_visible: bool,
}

/// 組み立て済みクエリ。
/// `params` は `count_sql` と `data_sql` の双方で `$1..$n` に対応する。
/// `data_sql` では続く `$n+1`, `$n+2` に `limit`, `offset` をバインドする。
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub data_sql: String,
    pub count_sql: String,
    pub params: Vec<SqlParam>,
    pub limit: i64,
    pub offset: i64,
    pub columns: Vec<ProjectedColumn>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SqlBuildError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {table}.{column}")]
    UnknownColumn { table: String, column: String },
    #[error("table '{0}' is not part of the query")]
    TableNotInQuery(String),
    #[error("duplicate column alias: {0}")]
    DuplicateAlias(String),
    #[error("column '{0}' cannot be filtered")]
    NotFilterable(String),
    #[error("column '{0}' cannot be sorted")]
    NotSortable(String),
    #[error("invalid value for filter on '{column}': {reason}")]
    InvalidFilterValue { column: String, reason: String },
    #[error("column '{table}.{column}' is not accessible")]
    RestrictedColumn { table: String, column: String },
    #[error("table '{0}' requires a tenant")]
    MissingTenant(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Numeric,
    Boolean,
    Text,
}

fn value_kind(data_type: &str) -> ValueKind {
    match data_type.to_ascii_lowercase().as_str() {
        "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" | "real"
        | "double precision" | "float4" | "float8" | "numeric" | "decimal" => ValueKind::Numeric,
        "boolean" | "bool" => ValueKind::Boolean,
        _ => ValueKind::Text,
    }
}

/// 投影時の式。ドライバで直接デコードできない型はキャストする。
fn projection_expr(qualified: &str, data_type: &str) -> String {
    match data_type.to_ascii_lowercase().as_str() {
        "smallint" | "integer" | "bigint" | "real" | "double precision" | "boolean" | "text"
        | "character varying" | "character" | "uuid" | "json" | "jsonb" | "date"
        | "timestamp with time zone" | "timestamp without time zone" | "name" => {
            qualified.to_string()
        }
        "numeric" | "decimal" => format!("{qualified}::double precision"),
        _ => format!("{qualified}::text"),
    }
}

struct TableSource {
    table: String,
    alias: Option<String>,
    sql_alias: String,
}

impl TableSource {
    fn matches(&self, name: &str) -> bool {
        self.alias.as_deref() == Some(name) || self.table == name
    }
}

struct ResolvedColumn {
    qualified: String,
    kind: ValueKind,
    is_filterable: bool,
    is_sortable: bool,
}

pub struct SqlBuilder<'a> {
    schema: &'a str,
    catalog: &'a Catalog,
    policy: Option<&'a ColumnPolicy>,
    tenant_id: Option<&'a str>,
    sources: Vec<TableSource>,
    params: Vec<SqlParam>,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(schema: &'a str, catalog: &'a Catalog) -> Self {
        Self {
            schema,
            catalog,
            policy: None,
            tenant_id: None,
            sources: Vec::new(),
            params: Vec::new(),
        }
    }

    /// 機密カラムの拒否とテナントによる絞り込みを有効にする。
    #[must_use]
    pub fn with_policy(mut self, policy: &'a ColumnPolicy, tenant_id: Option<&'a str>) -> Self {
        self.policy = Some(policy);
        self.tenant_id = tenant_id;
        self
    }

    fn is_restricted(&self, column: &str) -> bool {
        self.policy.is_some_and(|p| p.is_restricted(column))
    }

    fn check_accessible(&self, table: &str, column: &str) -> Result<(), SqlBuildError> {
        if self.is_restricted(column) {
            return Err(SqlBuildError::RestrictedColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        Ok(())
    }

    /// テナントカラムを持つテーブルに対する絞り込み条件。対象外なら None。
    fn tenant_condition(
        &mut self,
        table: &str,
        sql_alias: &str,
    ) -> Result<Option<String>, SqlBuildError> {
        let columns = self.table_columns(table)?;
        let Some(tenant_column) = self.policy.and_then(ColumnPolicy::tenant_column) else {
            return Ok(None);
        };
        let Some(info) = columns
            .iter()
            .find(|c| c.column_name.eq_ignore_ascii_case(tenant_column))
        else {
            return Ok(None);
        };
        let tenant = self
            .tenant_id
            .ok_or_else(|| SqlBuildError::MissingTenant(table.to_string()))?;
        let p = self.push_param(SqlParam::Text(tenant.to_string()));
        Ok(Some(format!(
            "{}.{}::text = {}",
            quote_identifier(sql_alias),
            quote_identifier(&info.column_name),
            p
        )))
    }

    fn check_identifier(name: &str) -> Result<(), SqlBuildError> {
        if is_valid_identifier(name) {
            Ok(())
        } else {
            Err(SqlBuildError::InvalidIdentifier(name.to_string()))
        }
    }

    fn table_columns(&self, table: &str) -> Result<&'a [ColumnInfo], SqlBuildError> {
        Self::check_identifier(table)?;
        match self.catalog.get(table) {
            Some(columns) if !columns.is_empty() => Ok(columns.as_slice()),
            _ => Err(SqlBuildError::UnknownTable(table.to_string())),
        }
    }

    fn column_info(&self, table: &str, column: &str) -> Result<&'a ColumnInfo, SqlBuildError> {
        Self::check_identifier(column)?;
        self.table_columns(table)?
            .iter()
            .find(|c| c.column_name == column)
            .ok_or_else(|| SqlBuildError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    fn qualified_table(&self, table: &str) -> String {
        format!("{}.{}", quote_identifier(self.schema), quote_identifier(table))
    }

    fn source(&self, name: &str) -> Result<&TableSource, SqlBuildError> {
        self.sources
            .iter()
            .find(|s| s.alias.as_deref() == Some(name))
            .or_else(|| self.sources.iter().find(|s| s.matches(name)))
            .ok_or_else(|| SqlBuildError::TableNotInQuery(name.to_string()))
    }

    fn push_param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    /// 定義と実行パラメータから SELECT を組み立てる。
    pub fn build(
        mut self,
        definition: &QueryBuilder,
        params: &QueryExecutionParams,
        limit: i64,
        offset: i64,
    ) -> Result<BuiltQuery, SqlBuildError> {
        Self::check_identifier(self.schema)?;

        // FROM / JOIN
        let main_columns = self.table_columns(&definition.main_table)?;
        self.sources.push(TableSource {
            table: definition.main_table.clone(),
            alias: None,
            sql_alias: "t0".to_string(),
        });
        let mut from_sql = format!(
            "{} AS {}",
            self.qualified_table(&definition.main_table),
            quote_identifier("t0")
        );

        let mut joins: Vec<_> = definition.joins.iter().collect();
        joins.sort_by_key(|j| j.display_order);
        for (i, join) in joins.into_iter().enumerate() {
            if let Some(alias) = &join.alias {
                Self::check_identifier(alias)?;
            }
            self.column_info(&join.to_table, &join.to_column)?;
            self.check_accessible(&join.to_table, &join.to_column)?;
            let from = self.source(&join.from_table)?;
            let from_alias = from.sql_alias.clone();
            let from_table = from.table.clone();
            self.column_info(&from_table, &join.from_column)?;
            self.check_accessible(&from_table, &join.from_column)?;

            let sql_alias = format!("t{}", i + 1);
            from_sql.push_str(&format!(
                " {} {} AS {} ON {}.{} = {}.{}",
                join.join_type.sql_keyword(),
                self.qualified_table(&join.to_table),
                quote_identifier(&sql_alias),
                quote_identifier(&from_alias),
                quote_identifier(&join.from_column),
                quote_identifier(&sql_alias),
                quote_identifier(&join.to_column),
            ));
            // 結合先の絞り込みは ON 句に置き、外部結合の意味を保つ
            if let Some(condition) = self.tenant_condition(&join.to_table, &sql_alias)? {
                from_sql.push_str(&format!(" AND {condition}"));
            }
            self.sources.push(TableSource {
                table: join.to_table.clone(),
                alias: join.alias.clone(),
                sql_alias,
            });
        }

        // SELECT 列
        let mut projections = Vec::new();
        let mut projected = Vec::new();
        let mut resolved: HashMap<String, ResolvedColumn> = HashMap::new();
        let mut seen = HashSet::new();

        let mut columns: Vec<_> = definition.columns.iter().collect();
        columns.sort_by_key(|c| c.display_order);
        if columns.is_empty() {
            // カラム未指定の場合はメインテーブルの全カラムを返す
            for info in main_columns {
                if self.is_restricted(&info.column_name) {
                    continue;
                }
                Self::check_identifier(&info.column_name)?;
                let qualified = format!(
                    "{}.{}",
                    quote_identifier("t0"),
                    quote_identifier(&info.column_name)
                );
                projections.push(format!(
                    "{} AS {}",
                    projection_expr(&qualified, &info.data_type),
                    quote_identifier(&info.column_name)
                ));
                projected.push(ProjectedColumn {
                    name: info.column_name.clone(),
                    label: info.column_name.clone(),
                    data_type: info.data_type.clone(),
                    is_visible: true,
                });
                resolved.insert(
                    info.column_name.clone(),
                    ResolvedColumn {
                        qualified,
                        kind: value_kind(&info.data_type),
                        is_filterable: true,
                        is_sortable: true,
                    },
                );
            }
        }
        for column in columns {
            let source = self.source(&column.table_name)?;
            let sql_alias = source.sql_alias.clone();
            let table = source.table.clone();
            let info = self.column_info(&table, &column.column_name)?;
            self.check_accessible(&table, &column.column_name)?;

            let name = column.output_name().to_string();
            Self::check_identifier(&name)?;
            if !seen.insert(name.clone()) {
                return Err(SqlBuildError::DuplicateAlias(name));
            }

            let qualified = format!(
                "{}.{}",
                quote_identifier(&sql_alias),
                quote_identifier(&column.column_name)
            );
            projections.push(format!(
                "{} AS {}",
                projection_expr(&qualified, &info.data_type),
                quote_identifier(&name)
            ));
            projected.push(ProjectedColumn {
                name: name.clone(),
                label: if column.label.is_empty() {
                    name.clone()
                } else {
                    column.label.clone()
                },
                data_type: info.data_type.clone(),
                is_visible: column.is_visible,
            });
            resolved.insert(
                name,
                ResolvedColumn {
                    qualified,
                    kind: value_kind(&info.data_type),
                    is_filterable: column.is_filterable,
                    is_sortable: column.is_sortable,
                },
            );
        }

        // WHERE
        let mut conditions = Vec::new();
        if let Some(condition) = self.tenant_condition(&definition.main_table, "t0")? {
            conditions.push(condition);
        }
        for filter in &params.filters {
            let column = resolved
                .get(&filter.column)
                .ok_or_else(|| SqlBuildError::NotFilterable(filter.column.clone()))?;
            if !column.is_filterable {
                return Err(SqlBuildError::NotFilterable(filter.column.clone()));
            }
            let qualified = column.qualified.clone();
            let kind = column.kind;
            conditions.push(self.filter_condition(filter, &qualified, kind)?);
        }
        let where_sql = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        // ORDER BY
        let order_sql = match &params.sort_by {
            Some(sort_by) => {
                let column = resolved
                    .get(sort_by)
                    .filter(|c| c.is_sortable)
                    .ok_or_else(|| SqlBuildError::NotSortable(sort_by.clone()))?;
                format!(" ORDER BY {} {}", column.qualified, params.sort_order.as_sql())
            }
            None => String::new(),
        };

        let count_sql = format!("SELECT COUNT(*) FROM {from_sql}{where_sql}");
        let n = self.params.len();
        let data_sql = format!(
            "SELECT {} FROM {}{}{} LIMIT ${} OFFSET ${}",
            projections.join(", "),
            from_sql,
            where_sql,
            order_sql,
            n + 1,
            n + 2
        );

        Ok(BuiltQuery {
            data_sql,
            count_sql,
            params: self.params,
            limit,
            offset,
            columns: projected,
        })
    }

    fn filter_condition(
        &mut self,
        filter: &QueryFilter,
        qualified: &str,
        kind: ValueKind,
    ) -> Result<String, SqlBuildError> {
        let invalid = |reason: &str| SqlBuildError::InvalidFilterValue {
            column: filter.column.clone(),
            reason: reason.to_string(),
        };
        let lhs = match kind {
            ValueKind::Text => format!("{qualified}::text"),
            _ => qualified.to_string(),
        };

        match filter.operator {
            FilterOperator::IsNull => Ok(format!("{qualified} IS NULL")),
            FilterOperator::IsNotNull => Ok(format!("{qualified} IS NOT NULL")),
            FilterOperator::Like | FilterOperator::ILike => {
                let pattern = scalar_text(&filter.value).ok_or_else(|| invalid("expected a string"))?;
                let keyword = if filter.operator == FilterOperator::Like {
                    "LIKE"
                } else {
                    "ILIKE"
                };
                let p = self.push_param(SqlParam::Text(pattern));
                Ok(format!("{qualified}::text {keyword} {p}"))
            }
            FilterOperator::In | FilterOperator::NotIn => {
                let items = filter
                    .value
                    .as_array()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| invalid("expected a non-empty array"))?;
                let param = match kind {
                    ValueKind::Numeric => SqlParam::NumberList(
                        items
                            .iter()
                            .map(scalar_number)
                            .collect::<Option<Vec<_>>>()
                            .ok_or_else(|| invalid("expected numbers"))?,
                    ),
                    ValueKind::Boolean | ValueKind::Text => SqlParam::TextList(
                        items
                            .iter()
                            .map(scalar_text)
                            .collect::<Option<Vec<_>>>()
                            .ok_or_else(|| invalid("expected scalar values"))?,
                    ),
                };
                let lhs = match kind {
                    ValueKind::Numeric => qualified.to_string(),
                    _ => format!("{qualified}::text"),
                };
                let p = self.push_param(param);
                if filter.operator == FilterOperator::In {
                    Ok(format!("{lhs} = ANY({p})"))
                } else {
                    Ok(format!("NOT ({lhs} = ANY({p}))"))
                }
            }
            FilterOperator::Between => {
                let bounds = filter
                    .value
                    .as_array()
                    .filter(|a| a.len() == 2)
                    .ok_or_else(|| invalid("expected an array of two values"))?;
                let low = scalar_param(&bounds[0], kind).ok_or_else(|| invalid("invalid lower bound"))?;
                let high = scalar_param(&bounds[1], kind).ok_or_else(|| invalid("invalid upper bound"))?;
                let a = self.push_param(low);
                let b = self.push_param(high);
                Ok(format!("{lhs} BETWEEN {a} AND {b}"))
            }
            op => {
                let sql_op = op.comparison_sql().ok_or_else(|| invalid("unsupported operator"))?;
                let param = scalar_param(&filter.value, kind).ok_or_else(|| invalid("expected a scalar value"))?;
                let p = self.push_param(param);
                Ok(format!("{lhs} {sql_op} {p}"))
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn scalar_param(value: &Value, kind: ValueKind) -> Option<SqlParam> {
    match kind {
        ValueKind::Numeric => scalar_number(value).map(SqlParam::Number),
        ValueKind::Boolean => match value {
            Value::Bool(b) => Some(SqlParam::Bool(*b)),
            Value::String(s) if s == "true" || s == "false" => Some(SqlParam::Bool(s == "true")),
            _ => None,
        },
        ValueKind::Text => scalar_text(value).map(SqlParam::Text),
    }
}
