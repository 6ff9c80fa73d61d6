use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Code reported for request bodies rejected by `validator`.
pub const VALIDATION_ERROR_CODE: u32 = 20001;

/// Code reported for failures the caller cannot act on.
pub const INTERNAL_ERROR_CODE: u32 = 10000;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request ({code}): {message}")]
    BadRequest { code: u32, message: String },

    #[error("Not found ({code}): {message}")]
    NotFound { code: u32, message: String },

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn bad_request(code: u32, message: impl Into<String>) -> Self {
        AppError::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: u32, message: impl Into<String>) -> Self {
        AppError::NotFound {
            code,
            message: message.into(),
        }
    }

    /// Numeric protocol code carried in the `{error: {code, message}}` body.
    pub fn code(&self) -> u32 {
        match self {
            AppError::ValidationError(_) => VALIDATION_ERROR_CODE,
            AppError::BadRequest { code, .. } | AppError::NotFound { code, .. } => *code,
            AppError::InternalError(_)
            | AppError::ServiceUnavailable
            | AppError::ConfigError(_) => INTERNAL_ERROR_CODE,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

/// Body of every error response: `{"error": {"code": .., "message": ..}}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        let message = match &self {
            AppError::ValidationError(err) => format!("Validation error: {}", err),
            AppError::BadRequest { message, .. } | AppError::NotFound { message, .. } => {
                message.clone()
            }
            AppError::InternalError(err) => {
                // Log the full error but don't expose it to clients
                tracing::error!(error = ?err, "Internal error");
                "Internal server error".to_string()
            }
            AppError::ServiceUnavailable => "Service unavailable".to_string(),
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                "Configuration error".to_string()
            }
        };

        (
            status,
            Json(ErrorEnvelope {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}
