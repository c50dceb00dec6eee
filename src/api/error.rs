//! HTTP error mapping: every domain error kind becomes a status code and
//! a `{"error": {"code", "message"}}` envelope. Storage-level messages are
//! sanitized before leaving the process.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::errors::TxError;

pub struct ApiError(pub TxError);

impl From<TxError> for ApiError {
    fn from(err: TxError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TxError::NotFound(..) => StatusCode::NOT_FOUND,
            TxError::Validation(_)
            | TxError::IllegalTransition { .. }
            | TxError::CircularDependency(_)
            | TxError::HasChildren(_) => StatusCode::BAD_REQUEST,
            TxError::AlreadyClaimed(_) | TxError::StaleData(_) => StatusCode::CONFLICT,
            TxError::PoolAtCapacity(_) | TxError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TxError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TxError::Database(_) | TxError::Io(_) | TxError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.0.is_public() {
            self.0.to_string()
        } else {
            error!(error = %self.0, "internal error");
            "Internal server error".to_string()
        };
        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Handler result alias.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(TxError::NotFound("task", "tx-abc123".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(TxError::Validation("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(TxError::AlreadyClaimed("tx-abc123".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(TxError::ServiceUnavailable("offline".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(TxError::Unauthorized("no key".into())).status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
