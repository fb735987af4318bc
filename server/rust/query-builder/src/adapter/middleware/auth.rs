use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::Deserialize;
use uuid::Uuid;

use crate::adapter::handler::error::AppError;
use crate::domain::entity::Requester;
use crate::infrastructure::config::AuthConfig;

/// 開発環境（認証なし）で要求者を指定するヘッダー
pub const DEV_USER_ID_HEADER: &str = "x-user-id";
pub const DEV_USER_ROLES_HEADER: &str = "x-user-roles";
pub const DEV_TENANT_ID_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// 検証済みトークンの Claims。
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// ユーザーの一意識別子（UUID）
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
    /// 所属テナント（会社）ID
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl Claims {
    pub fn realm_roles(&self) -> &[String] {
        self.realm_access
            .as_ref()
            .map(|ra| ra.roles.as_slice())
            .unwrap_or(&[])
    }
}

/// HS256 共有鍵で Bearer トークンを検証する。
#[derive(Clone)]
pub struct QueryBuilderAuthState {
    decoding_key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl QueryBuilderAuthState {
    pub fn new(cfg: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[cfg.issuer.as_str()]);
        validation.set_audience(&[cfg.audience.as_str()]);
        Self {
            decoding_key: Arc::new(DecodingKey::from_secret(
                cfg.jwt_secret.expose_secret().as_bytes(),
            )),
            validation: Arc::new(validation),
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}

pub async fn auth_middleware(
    State(state): State<QueryBuilderAuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)
        .ok_or_else(|| AppError::unauthorized("SYS_AUTH_MISSING_TOKEN", "Missing bearer token"))?;

    let claims = state.verify_token(&token).map_err(|e| {
        tracing::debug!(error = %e, "token verification failed");
        AppError::unauthorized("SYS_AUTH_TOKEN_INVALID", "Invalid or expired token")
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

fn extract_bearer_token(req: &Request<Body>) -> Option<String> {
    let header = req.headers().get("Authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// 認証ミドルウェアが格納した Claims、または開発用ヘッダーから要求者を取り出す。
impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(claims) = parts.extensions.get::<Claims>() {
            let user_id = Uuid::parse_str(&claims.sub).map_err(|_| {
                AppError::unauthorized("SYS_AUTH_TOKEN_INVALID", "Token subject is not a valid user id")
            })?;
            return Ok(Requester::new(user_id, claims.realm_roles().to_vec())
                .with_tenant(claims.tenant_id.clone()));
        }

        let user_id = parts
            .headers
            .get(DEV_USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| {
                AppError::unauthorized("SYS_AUTH_MISSING_TOKEN", "Missing requester identity")
            })?;
        let roles = parts
            .headers
            .get(DEV_USER_ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let tenant_id = parts
            .headers
            .get(DEV_TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string());
        Ok(Requester::new(user_id, roles).with_tenant(tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use secrecy::SecretString;

    fn auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: SecretString::new("test-secret".to_string()),
            issuer: "https://auth.example.com/realms/k1s0".to_string(),
            audience: "k1s0-api".to_string(),
        }
    }

    fn token(sub: &str, aud: &str) -> String {
        let exp = chrono::Utc::now().timestamp() + 600;
        let claims = serde_json::json!({
            "sub": sub,
            "iss": "https://auth.example.com/realms/k1s0",
            "aud": aud,
            "exp": exp,
            "realm_access": { "roles": ["sys_operator"] },
        });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_extract_bearer_token_valid() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.headers_mut()
            .insert("Authorization", HeaderValue::from_static("Bearer my-token"));
        assert_eq!(extract_bearer_token(&req), Some("my-token".to_string()));
    }

    #[test]
    fn test_extract_bearer_token_missing() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_bearer_token(&req), None);
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.headers_mut()
            .insert("Authorization", HeaderValue::from_static("Basic abc123"));
        assert_eq!(extract_bearer_token(&req), None);
    }

    #[test]
    fn test_verify_token() {
        let state = QueryBuilderAuthState::new(&auth_config());
        let user = Uuid::new_v4().to_string();
        let claims = state.verify_token(&token(&user, "k1s0-api")).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.realm_roles(), ["sys_operator".to_string()]);
    }

    #[test]
    fn test_verify_token_wrong_audience() {
        let state = QueryBuilderAuthState::new(&auth_config());
        assert!(state.verify_token(&token("u", "other-api")).is_err());
    }

    #[tokio::test]
    async fn test_requester_from_dev_headers() {
        let user = Uuid::new_v4();
        let req = Request::builder()
            .header(DEV_USER_ID_HEADER, user.to_string())
            .header(DEV_USER_ROLES_HEADER, "sys_auditor, sys_operator,")
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        let requester = Requester::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(requester.user_id, user);
        assert_eq!(requester.roles, vec!["sys_auditor", "sys_operator"]);
        assert_eq!(requester.tenant_id, None);
    }

    #[tokio::test]
    async fn test_requester_tenant_from_dev_header() {
        let req = Request::builder()
            .header(DEV_USER_ID_HEADER, Uuid::new_v4().to_string())
            .header(DEV_TENANT_ID_HEADER, " company-42 ")
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        let requester = Requester::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(requester.tenant_id.as_deref(), Some("company-42"));
    }

    #[tokio::test]
    async fn test_requester_tenant_from_claims() {
        let user = Uuid::new_v4();
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": user.to_string(),
            "exp": 0,
            "tenant_id": "company-7",
        }))
        .unwrap();
        let mut req = Request::builder().body(()).unwrap();
        req.extensions_mut().insert(claims);
        let (mut parts, _) = req.into_parts();
        let requester = Requester::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(requester.user_id, user);
        assert_eq!(requester.tenant_id.as_deref(), Some("company-7"));
    }

    #[tokio::test]
    async fn test_requester_missing_identity() {
        let req = Request::builder().body(()).unwrap();
        let (mut parts, _) = req.into_parts();
        let err = Requester::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }
}
