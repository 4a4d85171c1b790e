use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

/// Failure taxonomy for every operation in the system.
///
/// Authorization and validation failures are returned synchronously to the
/// caller and are never partially applied. There is no fatal variant: every
/// failure is scoped to the one operation that produced it.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No identity, or an invalid one, for an identity-requiring operation.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated but not permitted (not a member, not admin, not owner,
    /// not the sender).
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Group, message, or member id does not resolve.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Malformed payload, e.g. empty message content or a duplicate
    /// membership add.
    #[error("{0}")]
    InvalidArgument(String),

    /// A conditional update lost a race. Callers retry or, for the
    /// lastMessage pointer, drop it on the floor (a newer value won).
    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error(transparent)]
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            tracing::error!(error = %err, "internal error");
        }
        let status = self.status();
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(anyhow::Error::from(err))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(anyhow::Error::from(err))
    }
}
