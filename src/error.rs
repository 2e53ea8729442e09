//! Error Types
//! API エラー分類（機械可読な kind + メッセージ）

use axum::{http::StatusCode, response::IntoResponse, response::Json};
use serde::Serialize;
use tracing::warn;

/// OTP 検証失敗の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpError {
    None,
    AlreadyVerified,
    Expired,
    Mismatch,
}

impl OtpError {
    pub fn reason(&self) -> &'static str {
        match self {
            OtpError::None => "none",
            OtpError::AlreadyVerified => "already_verified",
            OtpError::Expired => "expired",
            OtpError::Mismatch => "mismatch",
        }
    }
}

/// API エラー分類
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Validation(String),
    #[error("Invalid payment signature")]
    SignatureInvalid,
    #[error("OTP verification failed: {}", .0.reason())]
    Otp(OtpError),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(anyhow::anyhow!("DB error: {}", e))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::InvalidState(_) => "invalid_state",
            ApiError::Validation(_) => "validation_error",
            ApiError::SignatureInvalid => "signature_invalid",
            ApiError::Otp(_) => "otp_error",
            ApiError::Conflict(_) => "conflict",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidState(_)
            | ApiError::Validation(_)
            | ApiError::SignatureInvalid
            | ApiError::Otp(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        // 内部エラーの詳細はログにのみ残し、クライアントへは出さない
        let message = match &self {
            ApiError::Internal(e) => {
                warn!("Internal error: {:#}", e);
                "Server error".to_string()
            }
            other => other.to_string(),
        };
        warn!("API Error: {} ({})", message, self.kind());
        let reason = match &self {
            ApiError::Otp(e) => Some(e.reason()),
            _ => None,
        };
        let body = ErrorBody {
            success: false,
            error: self.kind(),
            message,
            reason,
        };
        (self.status(), Json(body)).into_response()
    }
}
