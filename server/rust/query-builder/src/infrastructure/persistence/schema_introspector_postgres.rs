use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::entity::{ColumnInfo, RelationInfo, TableInfo};
use crate::domain::repository::SchemaIntrospector;

/// information_schema と pg_catalog からスキーマ情報を取得する。
pub struct PostgresSchemaIntrospector {
    pool: PgPool,
}

impl PostgresSchemaIntrospector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TableRow {
    table_name: String,
    schema_name: String,
    comment: Option<String>,
}

impl From<TableRow> for TableInfo {
    fn from(r: TableRow) -> Self {
        TableInfo {
            table_name: r.table_name,
            schema_name: r.schema_name,
            comment: r.comment,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ColumnRow {
    column_name: String,
    data_type: String,
    is_nullable: bool,
    default_value: Option<String>,
    max_length: Option<i32>,
    numeric_precision: Option<i32>,
    numeric_scale: Option<i32>,
    is_primary_key: bool,
    referenced_table: Option<String>,
    referenced_column: Option<String>,
    comment: Option<String>,
}

impl From<ColumnRow> for ColumnInfo {
    fn from(r: ColumnRow) -> Self {
        ColumnInfo {
            column_name: r.column_name,
            data_type: r.data_type,
            is_nullable: r.is_nullable,
            default_value: r.default_value,
            max_length: r.max_length,
            numeric_precision: r.numeric_precision,
            numeric_scale: r.numeric_scale,
            is_primary_key: r.is_primary_key,
            is_foreign_key: r.referenced_table.is_some(),
            referenced_table: r.referenced_table,
            referenced_column: r.referenced_column,
            comment: r.comment,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RelationRow {
    constraint_name: String,
    source_table: String,
    source_column: String,
    target_table: String,
    target_column: String,
}

impl From<RelationRow> for RelationInfo {
    fn from(r: RelationRow) -> Self {
        RelationInfo {
            constraint_name: r.constraint_name,
            source_table: r.source_table,
            source_column: r.source_column,
            target_table: r.target_table,
            target_column: r.target_column,
        }
    }
}

const LIST_TABLES_SQL: &str = r"
SELECT t.table_name::text AS table_name,
       t.table_schema::text AS schema_name,
       obj_description(format('%I.%I', t.table_schema, t.table_name)::regclass, 'pg_class') AS comment
FROM information_schema.tables t
WHERE t.table_schema = $1
  AND t.table_type = 'BASE TABLE'
  AND t.table_name NOT LIKE '%\_migrations'
  AND t.table_name NOT LIKE '\_\_%'
  AND t.table_name NOT IN ('migrations', 'typeorm_metadata', 'query-result-cache')
ORDER BY t.table_name
";

const LIST_COLUMNS_SQL: &str = r"
SELECT c.column_name::text AS column_name,
       c.data_type::text AS data_type,
       (c.is_nullable = 'YES') AS is_nullable,
       c.column_default::text AS default_value,
       c.character_maximum_length::int4 AS max_length,
       c.numeric_precision::int4 AS numeric_precision,
       c.numeric_scale::int4 AS numeric_scale,
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage kcu
             ON kcu.constraint_name = tc.constraint_name
            AND kcu.table_schema = tc.table_schema
            AND kcu.table_name = tc.table_name
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND kcu.column_name = c.column_name
       ) AS is_primary_key,
       fk.target_table AS referenced_table,
       fk.target_column AS referenced_column,
       pg_catalog.col_description(a.attrelid, a.attnum) AS comment
FROM information_schema.columns c
JOIN pg_catalog.pg_attribute a
  ON a.attrelid = format('%I.%I', c.table_schema, c.table_name)::regclass
 AND a.attname = c.column_name
LEFT JOIN LATERAL (
    SELECT ccu.table_name::text AS target_table,
           ccu.column_name::text AS target_column
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_name = tc.constraint_name
     AND kcu.table_schema = tc.table_schema
    JOIN information_schema.constraint_column_usage ccu
      ON ccu.constraint_name = tc.constraint_name
     AND ccu.constraint_schema = tc.constraint_schema
    WHERE tc.constraint_type = 'FOREIGN KEY'
      AND tc.table_schema = c.table_schema
      AND tc.table_name = c.table_name
      AND kcu.column_name = c.column_name
    LIMIT 1
) fk ON true
WHERE c.table_schema = $1 AND c.table_name = $2
ORDER BY c.ordinal_position
";

const LIST_RELATIONS_SQL: &str = r"
SELECT tc.constraint_name::text AS constraint_name,
       kcu.table_name::text AS source_table,
       kcu.column_name::text AS source_column,
       ccu.table_name::text AS target_table,
       ccu.column_name::text AS target_column
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name
 AND kcu.table_schema = tc.table_schema
JOIN information_schema.constraint_column_usage ccu
  ON ccu.constraint_name = tc.constraint_name
 AND ccu.constraint_schema = tc.constraint_schema
WHERE tc.constraint_type = 'FOREIGN KEY'
  AND tc.table_schema = $1
  AND (kcu.table_name = $2 OR ccu.table_name = $2)
ORDER BY tc.constraint_name, kcu.ordinal_position
";

#[async_trait]
impl SchemaIntrospector for PostgresSchemaIntrospector {
    async fn list_tables(&self, schema: &str) -> anyhow::Result<Vec<TableInfo>> {
        let rows = sqlx::query_as::<_, TableRow>(LIST_TABLES_SQL)
            .bind(schema)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_columns(&self, schema: &str, table: &str) -> anyhow::Result<Vec<ColumnInfo>> {
        let rows = sqlx::query_as::<_, ColumnRow>(LIST_COLUMNS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_relations(
        &self,
        schema: &str,
        table: &str,
    ) -> anyhow::Result<Vec<RelationInfo>> {
        let rows = sqlx::query_as::<_, RelationRow>(LIST_RELATIONS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_databases(&self) -> anyhow::Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT datname::text FROM pg_catalog.pg_database \
             WHERE NOT datistemplate AND datname <> 'postgres' ORDER BY datname",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn list_schemas(&self) -> anyhow::Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT schema_name::text FROM information_schema.schemata \
             WHERE schema_name NOT IN ('pg_catalog', 'information_schema') \
               AND schema_name NOT LIKE 'pg\\_toast%' \
               AND schema_name NOT LIKE 'pg\\_temp%' \
             ORDER BY schema_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }
}
