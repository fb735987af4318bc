use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::domain::entity::is_internal_schema;
use crate::domain::service::column_policy::ColumnPolicy;
use crate::domain::service::identifier::is_valid_identifier;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    /// CONFIG_PATH (既定: config/config.yaml) から設定を読み込む。
    pub fn load() -> anyhow::Result<Self> {
        let path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path, e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(content)?;
        cfg.query.validate()?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(default = "default_password")]
    pub password: SecretString,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}?sslmode={}",
            self.user,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.name,
            self.ssl_mode
        )
    }
}

/// JWT 検証設定。省略時は開発用ヘッダーで要求者を識別する。
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub trace_endpoint: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            trace_endpoint: None,
            sample_rate: default_sample_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_max_rows")]
    pub default_max_rows: i32,
    #[serde(default = "default_hard_max_rows")]
    pub hard_max_rows: i64,
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
    /// introspection と実行の対象スキーマ
    #[serde(default = "default_introspection_schema")]
    pub introspection_schema: String,
    /// 選択・一覧表示を禁止するカラム名（大文字小文字は区別しない）
    #[serde(default = "default_sensitive_columns")]
    pub sensitive_columns: Vec<String>,
    /// 設定時、このカラムを持つテーブルは要求者のテナントで絞り込む
    #[serde(default)]
    pub tenant_column: Option<String>,
}

impl QueryConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.default_max_rows <= 0 || self.hard_max_rows <= 0 || self.default_page_size <= 0 {
            anyhow::bail!("query row limits must be positive");
        }
        if i64::from(self.default_max_rows) > self.hard_max_rows {
            anyhow::bail!("query.default_max_rows must not exceed query.hard_max_rows");
        }
        if !is_valid_identifier(&self.introspection_schema)
            || is_internal_schema(&self.introspection_schema)
        {
            anyhow::bail!(
                "query.introspection_schema '{}' is not allowed",
                self.introspection_schema
            );
        }
        if let Some(column) = &self.tenant_column {
            if !is_valid_identifier(column) {
                anyhow::bail!("query.tenant_column '{}' is not a valid identifier", column);
            }
        }
        Ok(())
    }

    pub fn column_policy(&self) -> ColumnPolicy {
        ColumnPolicy::new(&self.sensitive_columns, self.tenant_column.clone())
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_max_rows: default_max_rows(),
            hard_max_rows: default_hard_max_rows(),
            default_page_size: default_page_size(),
            introspection_schema: default_introspection_schema(),
            sensitive_columns: default_sensitive_columns(),
            tenant_column: None,
        }
    }
}

fn default_version() -> String { "0.1.0".to_string() }
fn default_environment() -> String { "development".to_string() }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8120 }
fn default_db_port() -> u16 { 5432 }
fn default_password() -> SecretString { SecretString::new(String::new()) }
fn default_ssl_mode() -> String { "disable".to_string() }
fn default_max_connections() -> u32 { 25 }
fn default_acquire_timeout() -> u64 { 5 }
fn default_run_migrations() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_sample_rate() -> f64 { 1.0 }
fn default_max_rows() -> i32 { 1000 }
fn default_hard_max_rows() -> i64 { 10_000 }
fn default_page_size() -> i64 { 50 }
fn default_introspection_schema() -> String { "public".to_string() }

fn default_sensitive_columns() -> Vec<String> {
    [
        "password",
        "password_hash",
        "password_digest",
        "secret",
        "api_key",
        "access_token",
        "refresh_token",
        "token_hash",
        "totp_secret",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}
