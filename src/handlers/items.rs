//! Inventory API Handlers
//! /api/items エンドポイント - 販売在庫の管理

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::Actor;
use crate::error::ApiError;
use crate::history::{self, event_type, HistoryEntry};
use crate::models::{item_status, CreateItemRequest, PetItem, PetItemResponse};
use crate::pricing::{PetAttributes, PricingRule};
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct ItemListResponse {
    pub success: bool,
    pub items: Vec<PetItemResponse>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct ItemDetailResponse {
    pub success: bool,
    pub item: PetItemResponse,
}

#[derive(Serialize)]
pub struct ItemHistoryResponse {
    pub success: bool,
    pub history: Vec<HistoryEntry>,
    pub total: usize,
}

// ========================================
// Query Parameters
// ========================================

#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub status: Option<String>,
    pub store_id: Option<String>,
}

// ========================================
// Handlers
// ========================================

/// POST /api/items - 在庫アイテム作成（マネージャー）
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<ItemDetailResponse>), ApiError> {
    actor.require_manager()?;
    let store_id = actor
        .store_id
        .clone()
        .ok_or_else(|| ApiError::Validation("Manager has no store assigned".to_string()))?;

    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }

    // pet_code 重複チェック
    if let Some(code) = &req.pet_code {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT item_id FROM pet_items WHERE pet_code = ?")
                .bind(code)
                .fetch_optional(&state.db)
                .await?;
        if existing.is_some() {
            return Err(ApiError::Conflict(format!("pet_code already exists: {}", code)));
        }
    }

    // 価格未指定なら価格ルールから算出
    let price = match req.price {
        Some(p) if p > 0 => p,
        _ => price_from_rules(&state, &store_id, &req).await?,
    };

    let now = chrono::Utc::now().timestamp();
    let item_id = Uuid::new_v4().to_string();
    let status = if req.list_for_sale {
        item_status::AVAILABLE_FOR_SALE
    } else {
        item_status::IN_PETSHOP
    };
    let image_keys = serde_json::to_string(&req.image_keys).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(r#"
        INSERT INTO pet_items (
            item_id, store_id, pet_code, name, species, breed, gender,
            age_months, size, color, description, price, status,
            view_count, image_keys, is_active, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 1, ?, ?, ?)
    "#)
    .bind(&item_id)
    .bind(&store_id)
    .bind(&req.pet_code)
    .bind(&req.name)
    .bind(&req.species)
    .bind(&req.breed)
    .bind(&req.gender)
    .bind(req.age_months)
    .bind(&req.size)
    .bind(&req.color)
    .bind(&req.description)
    .bind(price)
    .bind(status)
    .bind(&image_keys)
    .bind(&actor.user_id)
    .bind(now)
    .bind(now)
    .execute(&state.db)
    .await?;

    history::log_event(
        &state.db,
        &item_id,
        event_type::ITEM_CREATED,
        &format!("Pet '{}' added to inventory at price {}", req.name, price),
        &actor,
        None,
        Some(&store_id),
    )
    .await?;

    if req.list_for_sale {
        history::log_event(
            &state.db,
            &item_id,
            event_type::LISTED_FOR_SALE,
            "Pet listed for sale",
            &actor,
            None,
            Some(&store_id),
        )
        .await?;
    }

    let item: PetItem = sqlx::query_as("SELECT * FROM pet_items WHERE item_id = ?")
        .bind(&item_id)
        .fetch_one(&state.db)
        .await?;

    info!("Item created: item_id={}, store={}, status={}", item_id, store_id, status);

    Ok((
        StatusCode::CREATED,
        Json(ItemDetailResponse {
            success: true,
            item: PetItemResponse::from_item(&item),
        }),
    ))
}

/// GET /api/items - 在庫一覧取得
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListItemsQuery>,
) -> Result<Json<ItemListResponse>, ApiError> {
    let items: Vec<PetItem> = match (&query.store_id, &query.status) {
        (Some(store), Some(status)) => {
            sqlx::query_as(
                "SELECT * FROM pet_items WHERE store_id = ? AND status = ? AND is_active = 1 ORDER BY created_at DESC",
            )
            .bind(store)
            .bind(status)
            .fetch_all(&state.db)
            .await
        }
        (Some(store), None) => {
            sqlx::query_as(
                "SELECT * FROM pet_items WHERE store_id = ? AND is_active = 1 ORDER BY created_at DESC",
            )
            .bind(store)
            .fetch_all(&state.db)
            .await
        }
        (None, Some(status)) => {
            sqlx::query_as(
                "SELECT * FROM pet_items WHERE status = ? AND is_active = 1 ORDER BY created_at DESC",
            )
            .bind(status)
            .fetch_all(&state.db)
            .await
        }
        (None, None) => {
            sqlx::query_as("SELECT * FROM pet_items WHERE is_active = 1 ORDER BY created_at DESC")
                .fetch_all(&state.db)
                .await
        }
    }?;

    let responses: Vec<PetItemResponse> = items.iter().map(PetItemResponse::from_item).collect();
    let total = responses.len();
    Ok(Json(ItemListResponse {
        success: true,
        items: responses,
        total,
    }))
}

/// GET /api/items/:item_id - 在庫詳細取得（閲覧カウンタ加算）
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<String>,
) -> Result<Json<ItemDetailResponse>, ApiError> {
    let item: Option<PetItem> =
        sqlx::query_as("SELECT * FROM pet_items WHERE item_id = ? AND is_active = 1")
            .bind(&item_id)
            .fetch_optional(&state.db)
            .await?;

    let mut item = item.ok_or_else(|| ApiError::NotFound("Item not found".to_string()))?;

    sqlx::query("UPDATE pet_items SET view_count = view_count + 1 WHERE item_id = ?")
        .bind(&item_id)
        .execute(&state.db)
        .await?;
    item.view_count += 1;

    Ok(Json(ItemDetailResponse {
        success: true,
        item: PetItemResponse::from_item(&item),
    }))
}

/// GET /api/items/:item_id/history - ペット履歴取得（マネージャー）
pub async fn get_item_history(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(item_id): Path<String>,
) -> Result<Json<ItemHistoryResponse>, ApiError> {
    actor.require_manager()?;

    let item: Option<PetItem> = sqlx::query_as("SELECT * FROM pet_items WHERE item_id = ?")
        .bind(&item_id)
        .fetch_optional(&state.db)
        .await?;
    let item = item.ok_or_else(|| ApiError::NotFound("Item not found".to_string()))?;

    // 店舗スコープ
    if let Some(store) = actor.store_filter() {
        if item.store_id != store {
            return Err(ApiError::Forbidden(
                "Item does not belong to your store".to_string(),
            ));
        }
    }

    let history: Vec<HistoryEntry> =
        sqlx::query_as("SELECT * FROM pet_history WHERE item_id = ? ORDER BY id ASC")
            .bind(&item_id)
            .fetch_all(&state.db)
            .await?;

    let total = history.len();
    Ok(Json(ItemHistoryResponse {
        success: true,
        history,
        total,
    }))
}

// ========================================
// Helper Functions
// ========================================

/// 店舗の価格ルールから価格を算出する（価格未指定時のみ）
async fn price_from_rules(
    state: &AppState,
    store_id: &str,
    req: &CreateItemRequest,
) -> Result<i64, ApiError> {
    let (species, breed) = match (&req.species, &req.breed) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            return Err(ApiError::Validation(
                "price is required when no pricing rule applies".to_string(),
            ))
        }
    };

    let row: Option<(i64, String)> = sqlx::query_as(
        "SELECT base_price, rule FROM pricing_rules WHERE store_id = ? AND species = ? AND breed = ? AND is_active = 1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(store_id)
    .bind(species)
    .bind(breed)
    .fetch_optional(&state.db)
    .await?;

    let (base_price, rule_json) = row.ok_or_else(|| {
        ApiError::Validation("price is required when no pricing rule applies".to_string())
    })?;

    let rule: PricingRule = serde_json::from_str(&rule_json)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Corrupt pricing rule: {}", e)))?;

    let attrs = PetAttributes {
        age_months: req.age_months.unwrap_or(0),
        size: req.size.clone(),
        gender: req.gender.clone(),
        special_attributes: Vec::new(),
    };
    let month = chrono::Datelike::month(&chrono::Utc::now());
    Ok(rule.calculate_price(base_price, &attrs, month))
}
