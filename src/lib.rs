//! Pet Shop Reserve API
//! ペットショップ在庫の予約〜所有権移転ライフサイクルを扱うコア。

use std::path::PathBuf;
use std::sync::Arc;

pub mod auth;
pub mod db;
pub mod error;
pub mod handlers;
pub mod history;
pub mod models;
pub mod otp;
pub mod payment;
pub mod pricing;

use payment::PaymentGateway;

// ========================================
// 設定
// ========================================

#[derive(Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub base_data_dir: PathBuf,
    pub payment_secret: String,
    pub bind_addr: String,
}

impl AppConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("DATABASE_PATH").unwrap_or_else(|_| "petshop.db".to_string()),
            base_data_dir: std::env::var("BASE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/data/petshop")),
            payment_secret: std::env::var("PAYMENT_KEY_SECRET")
                .unwrap_or_else(|_| "test_secret".to_string()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
        }
    }
}

// ========================================
// アプリケーション状態
// ========================================

pub struct AppState {
    pub db: db::DbPool,
    pub gateway: Arc<dyn PaymentGateway>,
    pub payment_secret: String,
    pub base_data_dir: PathBuf,
}
