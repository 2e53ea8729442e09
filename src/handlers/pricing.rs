//! Pricing API Handlers
//! /api/pricing エンドポイント - 店舗別価格ルール

use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::Actor;
use crate::error::ApiError;
use crate::pricing::{PetAttributes, PricingRule};
use crate::AppState;

// ========================================
// Request / Response Types
// ========================================

#[derive(Debug, Deserialize)]
pub struct CreatePricingRuleRequest {
    pub species: String,
    pub breed: String,
    pub base_price: i64,
    pub rule: PricingRule,
}

#[derive(Serialize)]
pub struct PricingRuleCreateResponse {
    pub success: bool,
    pub rule_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CalculatePriceRequest {
    pub species: String,
    pub breed: String,
    pub attributes: PetAttributes,
}

#[derive(Serialize)]
pub struct CalculatePriceResponse {
    pub success: bool,
    pub calculated_price: i64,
    pub base_price: i64,
    pub rule_id: String,
}

// ========================================
// Handlers
// ========================================

/// POST /api/pricing/rules - 価格ルール作成（マネージャー）
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreatePricingRuleRequest>,
) -> Result<(StatusCode, Json<PricingRuleCreateResponse>), ApiError> {
    actor.require_manager()?;
    let store_id = actor
        .store_id
        .clone()
        .ok_or_else(|| ApiError::Validation("Manager has no store assigned".to_string()))?;

    if req.base_price <= 0 {
        return Err(ApiError::Validation("base_price must be positive".to_string()));
    }

    let rule_id = Uuid::new_v4().to_string();
    let rule_json = serde_json::to_string(&req.rule)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Rule serialization failed: {}", e)))?;

    sqlx::query(r#"
        INSERT INTO pricing_rules (rule_id, store_id, species, breed, base_price, rule, is_active, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
    "#)
    .bind(&rule_id)
    .bind(&store_id)
    .bind(&req.species)
    .bind(&req.breed)
    .bind(req.base_price)
    .bind(&rule_json)
    .bind(&actor.user_id)
    .bind(chrono::Utc::now().timestamp())
    .execute(&state.db)
    .await?;

    info!("Pricing rule created: rule_id={}, store={}, {}/{}", rule_id, store_id, req.species, req.breed);

    Ok((
        StatusCode::CREATED,
        Json(PricingRuleCreateResponse {
            success: true,
            rule_id,
        }),
    ))
}

/// POST /api/pricing/calculate - 属性から価格を算出（マネージャー）
pub async fn calculate_price(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CalculatePriceRequest>,
) -> Result<Json<CalculatePriceResponse>, ApiError> {
    actor.require_manager()?;
    let store_id = actor
        .store_id
        .clone()
        .ok_or_else(|| ApiError::Validation("Manager has no store assigned".to_string()))?;

    let row: Option<(String, i64, String)> = sqlx::query_as(
        "SELECT rule_id, base_price, rule FROM pricing_rules WHERE store_id = ? AND species = ? AND breed = ? AND is_active = 1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(&store_id)
    .bind(&req.species)
    .bind(&req.breed)
    .fetch_optional(&state.db)
    .await?;

    let (rule_id, base_price, rule_json) = row.ok_or_else(|| {
        ApiError::NotFound("No pricing rule found for this pet combination".to_string())
    })?;

    let rule: PricingRule = serde_json::from_str(&rule_json)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Corrupt pricing rule: {}", e)))?;

    let month = chrono::Datelike::month(&chrono::Utc::now());
    let calculated_price = rule.calculate_price(base_price, &req.attributes, month);

    Ok(Json(CalculatePriceResponse {
        success: true,
        calculated_price,
        base_price,
        rule_id,
    }))
}
