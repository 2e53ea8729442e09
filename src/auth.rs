//! Actor Extraction
//! 認証ミドルウェア（上流）が付与するヘッダーから操作主体を解決する。
//! コアは x-user-id / x-user-role / x-store-id を信頼する。

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

pub mod role {
    pub const USER: &str = "user";
    pub const MANAGER: &str = "petshop_manager";
    pub const ADMIN: &str = "admin";
}

/// 操作主体（明示的に各オペレーションへ渡す）
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub role: String,
    pub store_id: Option<String>,
}

impl Actor {
    pub fn is_manager(&self) -> bool {
        self.role == role::MANAGER || self.role == role::ADMIN
    }

    /// マネージャーの可視範囲を制限する店舗フィルタ。
    /// admin は全店舗、manager は自店舗のみ。
    pub fn store_filter(&self) -> Option<&str> {
        if self.role == role::ADMIN {
            None
        } else {
            self.store_id.as_deref()
        }
    }

    /// マネージャー権限を要求
    pub fn require_manager(&self) -> Result<(), ApiError> {
        if self.is_manager() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Manager role required".to_string()))
        }
    }
}

fn header_str(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_str(parts, "x-user-id")
            .ok_or_else(|| ApiError::Forbidden("Missing x-user-id header".to_string()))?;
        let role = header_str(parts, "x-user-role").unwrap_or_else(|| role::USER.to_string());
        let store_id = header_str(parts, "x-store-id");
        Ok(Actor {
            user_id,
            role,
            store_id,
        })
    }
}
