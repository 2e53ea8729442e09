//! テスト共通ヘルパー（インメモリDB、Actor、署名）
#![allow(dead_code)]

use std::sync::Arc;

use axum::extract::{Json, State};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::sqlite::SqlitePoolOptions;

use petshop_reserve_api::auth::{role, Actor};
use petshop_reserve_api::db;
use petshop_reserve_api::handlers::items;
use petshop_reserve_api::models::CreateItemRequest;
use petshop_reserve_api::payment::SandboxGateway;
use petshop_reserve_api::AppState;

pub const SECRET: &str = "test_secret";

pub async fn setup_state() -> Arc<AppState> {
    // インメモリSQLiteは接続ごとに別DBになるため、単一接続で固定する
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::create_schema(&pool).await.expect("schema");

    let dir = std::env::temp_dir().join(format!("petshop-test-{}", uuid::Uuid::new_v4()));
    Arc::new(AppState {
        db: pool,
        gateway: Arc::new(SandboxGateway),
        payment_secret: SECRET.to_string(),
        base_data_dir: dir,
    })
}

pub fn user(id: &str) -> Actor {
    Actor {
        user_id: id.to_string(),
        role: role::USER.to_string(),
        store_id: None,
    }
}

pub fn manager(id: &str, store: &str) -> Actor {
    Actor {
        user_id: id.to_string(),
        role: role::MANAGER.to_string(),
        store_id: Some(store.to_string()),
    }
}

/// 正しいコールバック署名を計算する
pub fn sign(order_id: &str, payment_id: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// 販売可能なアイテムを1件登録して item_id を返す
pub async fn seed_item(state: &Arc<AppState>, store: &str, price: i64) -> String {
    let req = CreateItemRequest {
        name: "Milo".to_string(),
        pet_code: None,
        species: Some("dog".to_string()),
        breed: Some("beagle".to_string()),
        gender: Some("male".to_string()),
        age_months: Some(10),
        size: Some("medium".to_string()),
        color: None,
        description: None,
        price: Some(price),
        list_for_sale: true,
        image_keys: vec![],
    };
    let (_, Json(res)) = items::create_item(State(state.clone()), manager("mgr-1", store), Json(req))
        .await
        .expect("create item");
    res.item.item_id
}

pub async fn item_status_of(state: &Arc<AppState>, item_id: &str) -> String {
    sqlx::query_scalar("SELECT status FROM pet_items WHERE item_id = ?")
        .bind(item_id)
        .fetch_one(&state.db)
        .await
        .expect("item status")
}
