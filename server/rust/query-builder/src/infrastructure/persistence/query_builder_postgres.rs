use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::domain::entity::{
    QueryBuilder, QueryBuilderCalculatedField, QueryBuilderColumn, QueryBuilderJoin,
    UpdateQueryBuilder,
};
use crate::domain::repository::QueryBuilderRepository;

pub struct QueryBuilderPostgresRepository {
    pool: PgPool,
}

impl QueryBuilderPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueryBuilderRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    database: String,
    main_table: String,
    is_public: bool,
    max_rows: i32,
    settings: serde_json::Value,
    layout: serde_json::Value,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QueryBuilderRow> for QueryBuilder {
    fn from(r: QueryBuilderRow) -> Self {
        QueryBuilder {
            id: r.id,
            name: r.name,
            description: r.description,
            database: r.database,
            main_table: r.main_table,
            is_public: r.is_public,
            max_rows: r.max_rows,
            settings: r.settings,
            layout: r.layout,
            created_by: r.created_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
            columns: Vec::new(),
            joins: Vec::new(),
            calculated_fields: Vec::new(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ColumnRow {
    id: Uuid,
    query_builder_id: Uuid,
    table_name: String,
    column_name: String,
    alias: String,
    label: String,
    description: Option<String>,
    data_type: String,
    is_primary_key: bool,
    is_foreign_key: bool,
    is_visible: bool,
    is_filterable: bool,
    is_sortable: bool,
    display_order: i32,
    format: Option<serde_json::Value>,
    aggregation: Option<serde_json::Value>,
}

impl From<ColumnRow> for QueryBuilderColumn {
    fn from(r: ColumnRow) -> Self {
        QueryBuilderColumn {
            id: r.id,
            query_builder_id: r.query_builder_id,
            table_name: r.table_name,
            column_name: r.column_name,
            alias: r.alias,
            label: r.label,
            description: r.description,
            data_type: r.data_type,
            is_primary_key: r.is_primary_key,
            is_foreign_key: r.is_foreign_key,
            is_visible: r.is_visible,
            is_filterable: r.is_filterable,
            is_sortable: r.is_sortable,
            display_order: r.display_order,
            format: r.format,
            aggregation: r.aggregation,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JoinRow {
    id: Uuid,
    query_builder_id: Uuid,
    from_table: String,
    from_column: String,
    to_table: String,
    to_column: String,
    join_type: String,
    alias: Option<String>,
    display_order: i32,
}

impl TryFrom<JoinRow> for QueryBuilderJoin {
    type Error = anyhow::Error;

    fn try_from(r: JoinRow) -> Result<Self, Self::Error> {
        Ok(QueryBuilderJoin {
            id: r.id,
            query_builder_id: r.query_builder_id,
            from_table: r.from_table,
            from_column: r.from_column,
            to_table: r.to_table,
            to_column: r.to_column,
            join_type: r.join_type.parse()?,
            alias: r.alias,
            display_order: r.display_order,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CalculatedFieldRow {
    id: Uuid,
    query_builder_id: Uuid,
    name: String,
    label: String,
    description: Option<String>,
    expression: String,
    data_type: String,
    is_visible: bool,
    display_order: i32,
    format: Option<serde_json::Value>,
    dependencies: Json<Vec<String>>,
}

impl From<CalculatedFieldRow> for QueryBuilderCalculatedField {
    fn from(r: CalculatedFieldRow) -> Self {
        QueryBuilderCalculatedField {
            id: r.id,
            query_builder_id: r.query_builder_id,
            name: r.name,
            label: r.label,
            description: r.description,
            expression: r.expression,
            data_type: r.data_type,
            is_visible: r.is_visible,
            display_order: r.display_order,
            format: r.format,
            dependencies: r.dependencies.0,
        }
    }
}

const SELECT_QUERY_BUILDER: &str = "SELECT id, name, description, database, main_table, is_public, max_rows, \
     settings, layout, created_by, created_at, updated_at \
     FROM query_builder.query_builders";

async fn insert_columns(
    conn: &mut PgConnection,
    columns: &[QueryBuilderColumn],
) -> anyhow::Result<()> {
    for c in columns {
        sqlx::query(
            "INSERT INTO query_builder.query_builder_columns \
             (id, query_builder_id, table_name, column_name, alias, label, description, data_type, \
              is_primary_key, is_foreign_key, is_visible, is_filterable, is_sortable, display_order, \
              format, aggregation) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(c.id)
        .bind(c.query_builder_id)
        .bind(&c.table_name)
        .bind(&c.column_name)
        .bind(&c.alias)
        .bind(&c.label)
        .bind(&c.description)
        .bind(&c.data_type)
        .bind(c.is_primary_key)
        .bind(c.is_foreign_key)
        .bind(c.is_visible)
        .bind(c.is_filterable)
        .bind(c.is_sortable)
        .bind(c.display_order)
        .bind(&c.format)
        .bind(&c.aggregation)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_joins(conn: &mut PgConnection, joins: &[QueryBuilderJoin]) -> anyhow::Result<()> {
    for j in joins {
        sqlx::query(
            "INSERT INTO query_builder.query_builder_joins \
             (id, query_builder_id, from_table, from_column, to_table, to_column, join_type, alias, display_order) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(j.id)
        .bind(j.query_builder_id)
        .bind(&j.from_table)
        .bind(&j.from_column)
        .bind(&j.to_table)
        .bind(&j.to_column)
        .bind(j.join_type.as_str())
        .bind(&j.alias)
        .bind(j.display_order)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_calculated_fields(
    conn: &mut PgConnection,
    fields: &[QueryBuilderCalculatedField],
) -> anyhow::Result<()> {
    for f in fields {
        sqlx::query(
            "INSERT INTO query_builder.query_builder_calculated_fields \
             (id, query_builder_id, name, label, description, expression, data_type, is_visible, \
              display_order, format, dependencies) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(f.id)
        .bind(f.query_builder_id)
        .bind(&f.name)
        .bind(&f.label)
        .bind(&f.description)
        .bind(&f.expression)
        .bind(&f.data_type)
        .bind(f.is_visible)
        .bind(f.display_order)
        .bind(&f.format)
        .bind(Json(&f.dependencies))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

impl QueryBuilderPostgresRepository {
    /// 指定した定義群のサブコレクションを読み込んで埋める。
    async fn load_children(&self, query_builders: &mut [QueryBuilder]) -> anyhow::Result<()> {
        if query_builders.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = query_builders.iter().map(|q| q.id).collect();

        let column_rows = sqlx::query_as::<_, ColumnRow>(
            "SELECT id, query_builder_id, table_name, column_name, alias, label, description, data_type, \
             is_primary_key, is_foreign_key, is_visible, is_filterable, is_sortable, display_order, \
             format, aggregation \
             FROM query_builder.query_builder_columns \
             WHERE query_builder_id = ANY($1) ORDER BY display_order, id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let join_rows = sqlx::query_as::<_, JoinRow>(
            "SELECT id, query_builder_id, from_table, from_column, to_table, to_column, join_type, \
             alias, display_order \
             FROM query_builder.query_builder_joins \
             WHERE query_builder_id = ANY($1) ORDER BY display_order, id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let field_rows = sqlx::query_as::<_, CalculatedFieldRow>(
            "SELECT id, query_builder_id, name, label, description, expression, data_type, is_visible, \
             display_order, format, dependencies \
             FROM query_builder.query_builder_calculated_fields \
             WHERE query_builder_id = ANY($1) ORDER BY display_order, id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut columns: HashMap<Uuid, Vec<QueryBuilderColumn>> = HashMap::new();
        for row in column_rows {
            columns.entry(row.query_builder_id).or_default().push(row.into());
        }
        let mut joins: HashMap<Uuid, Vec<QueryBuilderJoin>> = HashMap::new();
        for row in join_rows {
            joins
                .entry(row.query_builder_id)
                .or_default()
                .push(QueryBuilderJoin::try_from(row)?);
        }
        let mut fields: HashMap<Uuid, Vec<QueryBuilderCalculatedField>> = HashMap::new();
        for row in field_rows {
            fields.entry(row.query_builder_id).or_default().push(row.into());
        }

        for qb in query_builders.iter_mut() {
            qb.columns = columns.remove(&qb.id).unwrap_or_default();
            qb.joins = joins.remove(&qb.id).unwrap_or_default();
            qb.calculated_fields = fields.remove(&qb.id).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl QueryBuilderRepository for QueryBuilderPostgresRepository {
    async fn find_all(&self) -> anyhow::Result<Vec<QueryBuilder>> {
        let rows = sqlx::query_as::<_, QueryBuilderRow>(&format!(
            "{SELECT_QUERY_BUILDER} ORDER BY updated_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut query_builders: Vec<QueryBuilder> = rows.into_iter().map(Into::into).collect();
        self.load_children(&mut query_builders).await?;
        Ok(query_builders)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<QueryBuilder>> {
        let row = sqlx::query_as::<_, QueryBuilderRow>(&format!("{SELECT_QUERY_BUILDER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut query_builders = vec![QueryBuilder::from(row)];
        self.load_children(&mut query_builders).await?;
        Ok(query_builders.pop())
    }

    async fn create(&self, qb: &QueryBuilder) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO query_builder.query_builders \
             (id, name, description, database, main_table, is_public, max_rows, settings, layout, \
              created_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(qb.id)
        .bind(&qb.name)
        .bind(&qb.description)
        .bind(&qb.database)
        .bind(&qb.main_table)
        .bind(qb.is_public)
        .bind(qb.max_rows)
        .bind(&qb.settings)
        .bind(&qb.layout)
        .bind(qb.created_by)
        .bind(qb.created_at)
        .bind(qb.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_columns(&mut tx, &qb.columns).await?;
        insert_joins(&mut tx, &qb.joins).await?;
        insert_calculated_fields(&mut tx, &qb.calculated_fields).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, id: Uuid, input: &UpdateQueryBuilder) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE query_builder.query_builders SET \
             name = COALESCE($2, name), \
             description = CASE WHEN $10 THEN $3 ELSE description END, \
             database = COALESCE($4, database), \
             main_table = COALESCE($5, main_table), \
             is_public = COALESCE($6, is_public), \
             max_rows = COALESCE($7, max_rows), \
             settings = COALESCE($8, settings), \
             layout = COALESCE($9, layout), \
             updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.description.clone().flatten())
        .bind(&input.database)
        .bind(&input.main_table)
        .bind(input.is_public)
        .bind(input.max_rows)
        .bind(&input.settings)
        .bind(&input.layout)
        .bind(input.description.is_some())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // 指定されたサブコレクションは削除してから再挿入する（同一トランザクション内）
        if let Some(columns) = &input.columns {
            sqlx::query("DELETE FROM query_builder.query_builder_columns WHERE query_builder_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let columns: Vec<_> = columns.iter().cloned().map(|c| c.into_column(id)).collect();
            insert_columns(&mut tx, &columns).await?;
        }
        if let Some(joins) = &input.joins {
            sqlx::query("DELETE FROM query_builder.query_builder_joins WHERE query_builder_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let joins: Vec<_> = joins.iter().cloned().map(|j| j.into_join(id)).collect();
            insert_joins(&mut tx, &joins).await?;
        }
        if let Some(fields) = &input.calculated_fields {
            sqlx::query(
                "DELETE FROM query_builder.query_builder_calculated_fields WHERE query_builder_id = $1",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            let fields: Vec<_> = fields
                .iter()
                .cloned()
                .map(|f| f.into_calculated_field(id))
                .collect();
            insert_calculated_fields(&mut tx, &fields).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM query_builder.query_builders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
