use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::adapter::presenter::response::{ErrorDetail, ErrorResponse};
use crate::usecase::{ExecuteQueryError, PermissionError, QueryBuilderError, SchemaError};

pub const CODE_NOT_FOUND: &str = "SYS_QB_NOT_FOUND";
pub const CODE_PERMISSION_DENIED: &str = "SYS_QB_PERMISSION_DENIED";
pub const CODE_VALIDATION_FAILED: &str = "SYS_QB_VALIDATION_FAILED";
pub const CODE_INTERNAL_ERROR: &str = "SYS_QB_INTERNAL_ERROR";

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        }
    }

    pub fn not_found(code: &str, message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn bad_request(code: &str, message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(code: &str, message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(code: &str, message: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    /// 内部エラーの詳細はログにのみ出力し、レスポンスには含めない。
    pub fn internal(message: &str) -> Self {
        tracing::error!(error = %message, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            CODE_INTERNAL_ERROR,
            "An internal error occurred",
        )
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                request_id: Some(uuid::Uuid::new_v4().to_string()),
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(&err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let details = serde_json::to_value(&err).unwrap_or(serde_json::Value::Null);
        Self::bad_request(CODE_VALIDATION_FAILED, "Request validation failed").with_details(details)
    }
}

impl From<QueryBuilderError> for AppError {
    fn from(err: QueryBuilderError) -> Self {
        match err {
            QueryBuilderError::NotFound(id) => {
                Self::not_found(CODE_NOT_FOUND, &format!("Query builder '{}' not found", id))
            }
            QueryBuilderError::Forbidden => {
                Self::forbidden(CODE_PERMISSION_DENIED, "Permission denied")
            }
            QueryBuilderError::Validation(msg) => Self::bad_request(CODE_VALIDATION_FAILED, &msg),
            QueryBuilderError::Internal(msg) => Self::internal(&msg),
        }
    }
}

impl From<PermissionError> for AppError {
    fn from(err: PermissionError) -> Self {
        match err {
            PermissionError::QueryBuilderNotFound(id) => {
                Self::not_found(CODE_NOT_FOUND, &format!("Query builder '{}' not found", id))
            }
            PermissionError::NotFound(id) => {
                Self::not_found(CODE_NOT_FOUND, &format!("Permission '{}' not found", id))
            }
            PermissionError::Validation(msg) => Self::bad_request(CODE_VALIDATION_FAILED, &msg),
            PermissionError::Internal(msg) => Self::internal(&msg),
        }
    }
}

impl From<ExecuteQueryError> for AppError {
    fn from(err: ExecuteQueryError) -> Self {
        match err {
            ExecuteQueryError::NotFound(id) => {
                Self::not_found(CODE_NOT_FOUND, &format!("Query builder '{}' not found", id))
            }
            ExecuteQueryError::Forbidden => {
                Self::forbidden(CODE_PERMISSION_DENIED, &ExecuteQueryError::Forbidden.to_string())
            }
            ExecuteQueryError::Validation(msg) => Self::bad_request(CODE_VALIDATION_FAILED, &msg),
            ExecuteQueryError::Internal(msg) => Self::internal(&msg),
        }
    }
}

impl From<SchemaError> for AppError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::InvalidIdentifier(name) => Self::bad_request(
                CODE_VALIDATION_FAILED,
                &format!("Invalid identifier: {}", name),
            ),
            SchemaError::RestrictedSchema(name) => Self::bad_request(
                CODE_VALIDATION_FAILED,
                &format!("Schema '{}' is not accessible", name),
            ),
            SchemaError::Internal(msg) => Self::internal(&msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_query_builder_error_mapping() {
        let id = Uuid::new_v4();
        let e: AppError = QueryBuilderError::NotFound(id).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.code, CODE_NOT_FOUND);

        let e: AppError = QueryBuilderError::Forbidden.into();
        assert_eq!(e.status, StatusCode::FORBIDDEN);
        assert_eq!(e.code, CODE_PERMISSION_DENIED);

        let e: AppError = QueryBuilderError::Validation("name is required".to_string()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.message, "name is required");
    }

    #[test]
    fn test_internal_error_hides_details() {
        let e: AppError = ExecuteQueryError::Internal("connection refused".to_string()).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code, CODE_INTERNAL_ERROR);
        assert!(!e.message.contains("connection refused"));
    }

    #[test]
    fn test_execute_forbidden_message() {
        let e: AppError = ExecuteQueryError::Forbidden.into();
        assert_eq!(e.status, StatusCode::FORBIDDEN);
        assert_eq!(e.message, "You do not have permission to execute this query");
    }

    #[test]
    fn test_permission_not_found_mapping() {
        let e: AppError = PermissionError::NotFound(Uuid::new_v4()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert!(e.message.starts_with("Permission"));
    }

    #[test]
    fn test_restricted_schema_mapping() {
        let e: AppError = SchemaError::RestrictedSchema("query_builder".to_string()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.code, CODE_VALIDATION_FAILED);
    }
}
