//! Petshop Reservation API Server
//! 予約・購入申請・受け渡しを扱うAPIサーバーのエントリポイント

use axum::{
    extract::DefaultBodyLimit,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use petshop_reserve_api::handlers::{applications, items, pricing, reservations};
use petshop_reserve_api::payment::SandboxGateway;
use petshop_reserve_api::{db, AppConfig, AppState};

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

/// ヘルスチェック
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "petshop-reserve-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログ初期化
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env();
    let pool = db::init_db(&config.db_path).await?;

    let state = Arc::new(AppState {
        db: pool,
        gateway: Arc::new(SandboxGateway),
        payment_secret: config.payment_secret.clone(),
        base_data_dir: config.base_data_dir.clone(),
    });

    // ルーター構築
    let app = Router::new()
        .route("/api/health", get(health_check))
        // アイテム
        .route("/api/items", post(items::create_item).get(items::list_items))
        .route("/api/items/:id", get(items::get_item))
        .route("/api/items/:id/history", get(items::get_item_history))
        // 価格ルール
        .route("/api/pricing/rules", post(pricing::create_rule))
        .route("/api/pricing/calculate", post(pricing::calculate_price))
        // 予約（ユーザー）
        .route(
            "/api/reservations",
            post(reservations::create_reservation).get(reservations::list_my_reservations),
        )
        .route("/api/reservations/:id", get(reservations::get_reservation))
        .route("/api/reservations/:id/cancel", post(reservations::cancel_reservation))
        .route(
            "/api/reservations/:id/confirm-purchase",
            post(reservations::confirm_purchase),
        )
        .route(
            "/api/reservations/:id/payment/create-order",
            post(reservations::create_payment_order),
        )
        .route(
            "/api/reservations/:id/payment/verify",
            post(reservations::verify_payment),
        )
        // 予約（マネージャー）
        .route(
            "/api/manager/reservations",
            get(reservations::manager_list_reservations),
        )
        .route("/api/reservations/:id/review", post(reservations::review_reservation))
        .route(
            "/api/reservations/:id/status",
            post(reservations::update_reservation_status),
        )
        // 購入申請（ユーザー）
        .route(
            "/api/applications",
            post(applications::submit_application).get(applications::list_my_applications),
        )
        .route("/api/applications/:id", get(applications::get_application))
        .route("/api/applications/:id/cancel", post(applications::cancel_application))
        .route(
            "/api/applications/:id/payment/create-order",
            post(applications::create_payment_order),
        )
        .route(
            "/api/applications/:id/payment/verify",
            post(applications::verify_payment),
        )
        .route(
            "/api/applications/:id/handover/verify-otp",
            post(applications::verify_otp),
        )
        // 購入申請（マネージャー）
        .route(
            "/api/manager/applications",
            get(applications::manager_list_applications),
        )
        .route("/api/applications/:id/approve", post(applications::approve_application))
        .route("/api/applications/:id/reject", post(applications::reject_application))
        .route(
            "/api/applications/:id/handover/schedule",
            post(applications::schedule_handover),
        )
        .route(
            "/api/applications/:id/handover/regenerate-otp",
            post(applications::regenerate_otp),
        )
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB まで許可
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("🚀 Petshop Reserve API Server listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
