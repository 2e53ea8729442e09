//! Database Module
//! SQLite を使用した pet_items / reservations / purchase_applications の管理

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use anyhow::Result;
use tracing::info;

/// データベース接続プール
pub type DbPool = Pool<Sqlite>;

/// データベースを初期化
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    // SQLite接続文字列
    let db_url = format!("sqlite:{}?mode=rwc", db_path);

    info!("Initializing database: {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // スキーマ作成
    create_schema(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// スキーマ作成
pub async fn create_schema(pool: &DbPool) -> Result<()> {
    // pet_items テーブル（販売在庫）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS pet_items (
            item_id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            store_name TEXT,
            pet_code TEXT,
            name TEXT NOT NULL,
            species TEXT,
            breed TEXT,
            gender TEXT,
            age_months INTEGER,
            size TEXT,
            color TEXT,
            description TEXT,
            price INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'in_petshop',
            buyer_id TEXT,
            sold_at INTEGER,
            view_count INTEGER NOT NULL DEFAULT 0,
            image_keys TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_by TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_pet_items_pet_code ON pet_items(pet_code)")
        .execute(pool)
        .await?;

    // reservations テーブル（簡易予約フロー）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS reservations (
            reservation_id TEXT PRIMARY KEY,
            reservation_code TEXT NOT NULL,
            item_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            reservation_type TEXT NOT NULL DEFAULT 'reservation',
            status TEXT NOT NULL DEFAULT 'pending',
            contact_phone TEXT,
            contact_email TEXT,
            visit_date TEXT,
            delivery_method TEXT,
            delivery_address TEXT,
            notes TEXT,
            reviewed_by TEXT,
            reviewed_at INTEGER,
            review_notes TEXT,
            payment_order_id TEXT,
            payment_id TEXT,
            payment_amount INTEGER,
            payment_status TEXT,
            paid_at INTEGER,
            handover_completed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES pet_items(item_id)
        )
    "#)
    .execute(pool)
    .await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_reservations_code ON reservations(reservation_code)")
        .execute(pool)
        .await?;

    // reservation_timeline テーブル（追記専用のステータス履歴）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS reservation_timeline (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reservation_id TEXT NOT NULL,
            status TEXT NOT NULL,
            changed_at INTEGER NOT NULL,
            changed_by TEXT NOT NULL,
            notes TEXT,
            FOREIGN KEY (reservation_id) REFERENCES reservations(reservation_id)
        )
    "#)
    .execute(pool)
    .await?;

    // purchase_applications テーブル（OTP付き購入申請フロー）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS purchase_applications (
            application_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            selected_gender TEXT,
            full_name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            address TEXT,
            purpose TEXT,
            photo_key TEXT,
            photo_sha256 TEXT,
            document_keys TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            reviewed_by TEXT,
            review_date INTEGER,
            approval_notes TEXT,
            rejection_reason TEXT,
            payment_amount INTEGER NOT NULL,
            payment_currency TEXT NOT NULL DEFAULT 'INR',
            gateway_order_id TEXT,
            gateway_payment_id TEXT,
            payment_status TEXT,
            payment_date INTEGER,
            otp_code TEXT,
            otp_generated_at INTEGER,
            otp_expires_at INTEGER,
            otp_verified INTEGER NOT NULL DEFAULT 0,
            otp_verified_at INTEGER,
            scheduled_handover_date TEXT,
            scheduled_handover_time TEXT,
            handover_location TEXT,
            handover_completed_by TEXT,
            handover_completed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES pet_items(item_id)
        )
    "#)
    .execute(pool)
    .await?;

    // application_status_history テーブル（追記専用）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS application_status_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            application_id TEXT NOT NULL,
            status TEXT NOT NULL,
            changed_at INTEGER NOT NULL,
            changed_by TEXT NOT NULL,
            notes TEXT,
            FOREIGN KEY (application_id) REFERENCES purchase_applications(application_id)
        )
    "#)
    .execute(pool)
    .await?;

    // pet_history テーブル（ペット単位の監査ログ、不変）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS pet_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            description TEXT NOT NULL,
            performed_by TEXT NOT NULL,
            performed_by_role TEXT NOT NULL,
            detail TEXT,
            store_id TEXT,
            created_at INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // pricing_rules テーブル（店舗別の価格ルール）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS pricing_rules (
            rule_id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            species TEXT NOT NULL,
            breed TEXT NOT NULL,
            base_price INTEGER NOT NULL,
            rule TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_by TEXT,
            created_at INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // インデックス作成
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pet_items_store ON pet_items(store_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pet_items_status ON pet_items(status)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reservations_user ON reservations(user_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reservations_item ON reservations(item_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reservations_status ON reservations(status)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_timeline_reservation ON reservation_timeline(reservation_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_applications_user ON purchase_applications(user_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_applications_item ON purchase_applications(item_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_applications_order ON purchase_applications(gateway_order_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_app_history_application ON application_status_history(application_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pet_history_item ON pet_history(item_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pricing_rules_store ON pricing_rules(store_id)")
        .execute(pool).await?;

    Ok(())
}
