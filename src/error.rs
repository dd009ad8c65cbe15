use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

/// The error type of the HTTP layer.
///
/// Everything a handler can fail with ends up here and is rendered as a JSON
/// body of the form `{ "error": { "code", "message", "details"? }, "status", "timestamp" }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Unexpected failures; the client only sees an error id.
    #[error("Internal error: {0}")]
    Internal(#[source] anyhow::Error),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// The scan worker or the database is not accepting work.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// A single request field failed validation.
    #[error("Validation error on field '{field}': {message}")]
    ValidationError { field: String, message: String },
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::InvalidInput(_) | AppError::ValidationError { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::ValidationError { .. } => "VALIDATION_ERROR",
        }
    }

    // (client message, details); server-side failures are logged here and kept out of the body
    fn public_parts(self) -> (String, Option<Value>) {
        match self {
            AppError::Internal(e) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!("Internal error {}: {:?}", error_id, e);
                ("An internal server error occurred".to_string(), Some(json!({ "error_id": error_id.to_string() })))
            }
            AppError::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                ("A database error occurred".to_string(), None)
            }
            AppError::ValidationError { field, message } => (
                format!("Validation failed for field '{}'", field),
                Some(json!({ "field": field, "message": message })),
            ),
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::ServiceUnavailable(msg)
            | AppError::InvalidInput(msg) => (msg, None),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (message, details) = self.public_parts();

        let mut body = json!({
            "error": { "code": code, "message": message },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // store errors arrive wrapped; keep the sqlx mapping for them
        match err.downcast::<sqlx::Error>() {
            Ok(db_err) => db_err.into(),
            Err(err) => AppError::Internal(err),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record not found".to_string()),
            sqlx::Error::PoolTimedOut => AppError::ServiceUnavailable("catalog database is busy".to_string()),
            sqlx::Error::Database(db_err) => AppError::Database(db_err.message().to_string()),
            other => AppError::Database(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub trait OptionExt<T> {
    /// `None` becomes `AppError::NotFound("<entity> not found")`.
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}

/// Request validation helpers.
pub mod validation {
    use super::{AppError, AppResult};
    use crate::providers::ProviderKind;
    use crate::types::ScanRequest;

    /// Rejects ids that can never exist (`<= 0`).
    pub fn validate_ids(ids: &[i64], field: &str) -> AppResult<()> {
        match ids.iter().find(|id| **id <= 0) {
            Some(bad) => Err(AppError::ValidationError {
                field: field.to_string(),
                message: format!("ids must be positive, got {}", bad),
            }),
            None => Ok(()),
        }
    }

    /// Every requested provider name must be a known provider.
    pub fn validate_provider_names(names: &[String]) -> AppResult<()> {
        for name in names {
            name.parse::<ProviderKind>()
                .map_err(|e| AppError::ValidationError { field: "apis".to_string(), message: e.to_string() })?;
        }
        Ok(())
    }

    pub fn validate_scan_request(req: &ScanRequest) -> AppResult<()> {
        validate_ids(&req.platforms, "platforms")?;
        validate_ids(&req.roms, "roms")?;
        validate_provider_names(&req.apis)
    }
}
