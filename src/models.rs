//! Data Models
//! PetItem, Reservation, PurchaseApplication などのデータ構造定義

use serde::{Deserialize, Serialize};

// ========================================
// Status Constants
// ========================================

/// 在庫アイテムのステータス
pub mod item_status {
    pub const IN_PETSHOP: &str = "in_petshop";
    pub const AVAILABLE_FOR_SALE: &str = "available_for_sale";
    pub const RESERVED: &str = "reserved";
    pub const SOLD: &str = "sold";
}

/// 予約のステータス
pub mod reservation_status {
    pub const PENDING: &str = "pending";
    pub const MANAGER_REVIEW: &str = "manager_review";
    pub const APPROVED: &str = "approved";
    pub const REJECTED: &str = "rejected";
    pub const GOING_TO_BUY: &str = "going_to_buy";
    pub const PAYMENT_PENDING: &str = "payment_pending";
    pub const PAID: &str = "paid";
    pub const READY_PICKUP: &str = "ready_pickup";
    pub const DELIVERED: &str = "delivered";
    pub const AT_OWNER: &str = "at_owner";
    pub const CANCELLED: &str = "cancelled";

    /// ユーザーがキャンセル可能なステータス
    pub const CANCELLABLE: &[&str] = &[
        PENDING,
        MANAGER_REVIEW,
        APPROVED,
        GOING_TO_BUY,
        PAYMENT_PENDING,
    ];

    /// マネージャーレビュー対象のステータス
    pub const REVIEWABLE: &[&str] = &[PENDING, MANAGER_REVIEW];

    /// 決済オーダー作成を許可するステータス
    pub const PAYABLE: &[&str] = &[APPROVED, GOING_TO_BUY, PAYMENT_PENDING];

    /// 完了扱いの所有状態
    pub const COMPLETED: &[&str] = &[DELIVERED, AT_OWNER];
}

/// 購入申請のステータス
pub mod application_status {
    pub const PENDING: &str = "pending";
    pub const UNDER_REVIEW: &str = "under_review";
    pub const APPROVED: &str = "approved";
    pub const REJECTED: &str = "rejected";
    pub const PAYMENT_PENDING: &str = "payment_pending";
    pub const PAID: &str = "paid";
    pub const SCHEDULED: &str = "scheduled";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";

    /// マネージャーレビュー対象のステータス
    pub const REVIEWABLE: &[&str] = &[PENDING, UNDER_REVIEW];

    /// 同一アイテムへの重複申請とみなすステータス
    pub const ACTIVE: &[&str] = &[
        PENDING,
        UNDER_REVIEW,
        APPROVED,
        PAYMENT_PENDING,
        PAID,
        SCHEDULED,
    ];

    /// キャンセル可能（completed/rejected/cancelled 以外）
    pub const CANCELLABLE: &[&str] = &[
        PENDING,
        UNDER_REVIEW,
        APPROVED,
        PAYMENT_PENDING,
        PAID,
        SCHEDULED,
    ];
}

/// 決済処理のステータス
pub mod payment_status {
    pub const PROCESSING: &str = "processing";
    pub const SUCCESS: &str = "success";
}

// ========================================
// PetItem
// ========================================

/// PetItem (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PetItem {
    pub item_id: String,
    pub store_id: String,
    pub store_name: Option<String>,
    pub pet_code: Option<String>,
    pub name: String,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub gender: Option<String>,
    pub age_months: Option<i64>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub price: i64,
    pub status: String,
    pub buyer_id: Option<String>,
    pub sold_at: Option<i64>,
    pub view_count: i64,
    pub image_keys: Option<String>, // JSON配列
    pub is_active: i64,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// PetItem 作成リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub name: String,
    pub pet_code: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub gender: Option<String>,
    pub age_months: Option<i64>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    #[serde(default)]
    pub list_for_sale: bool,
    #[serde(default)]
    pub image_keys: Vec<String>,
}

/// PetItem レスポンス（API返却用）
#[derive(Debug, Serialize)]
pub struct PetItemResponse {
    pub item_id: String,
    pub store_id: String,
    pub store_name: Option<String>,
    pub pet_code: Option<String>,
    pub name: String,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub gender: Option<String>,
    pub age_months: Option<i64>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub price: i64,
    pub status: String,
    pub buyer_id: Option<String>,
    pub sold_at: Option<i64>,
    pub view_count: i64,
    pub image_keys: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PetItemResponse {
    pub fn from_item(item: &PetItem) -> Self {
        let image_keys = item
            .image_keys
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        Self {
            item_id: item.item_id.clone(),
            store_id: item.store_id.clone(),
            store_name: item.store_name.clone(),
            pet_code: item.pet_code.clone(),
            name: item.name.clone(),
            species: item.species.clone(),
            breed: item.breed.clone(),
            gender: item.gender.clone(),
            age_months: item.age_months,
            size: item.size.clone(),
            color: item.color.clone(),
            description: item.description.clone(),
            price: item.price,
            status: item.status.clone(),
            buyer_id: item.buyer_id.clone(),
            sold_at: item.sold_at,
            view_count: item.view_count,
            image_keys,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

// ========================================
// Reservation
// ========================================

/// Reservation (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reservation {
    pub reservation_id: String,
    pub reservation_code: String,
    pub item_id: String,
    pub user_id: String,
    pub reservation_type: String,
    pub status: String,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub visit_date: Option<String>,
    pub delivery_method: Option<String>,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<i64>,
    pub review_notes: Option<String>,
    pub payment_order_id: Option<String>,
    pub payment_id: Option<String>,
    pub payment_amount: Option<i64>,
    pub payment_status: Option<String>,
    pub paid_at: Option<i64>,
    pub handover_completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Timeline エントリ (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimelineEntry {
    pub id: i64,
    pub reservation_id: String,
    pub status: String,
    pub changed_at: i64,
    pub changed_by: String,
    pub notes: Option<String>,
}

/// Reservation 作成リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub item_id: String,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub visit_date: Option<String>,
    pub notes: Option<String>,
}

/// マネージャーレビューリクエスト
#[derive(Debug, Deserialize)]
pub struct ReviewReservationRequest {
    pub action: String, // "approve" | "reject"
    pub review_notes: Option<String>,
}

/// マネージャーステータス更新リクエスト
#[derive(Debug, Deserialize)]
pub struct UpdateReservationStatusRequest {
    pub status: String,
    pub notes: Option<String>,
}

/// Reservation レスポンス（timeline 同梱）
#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub timeline: Vec<TimelineEntry>,
}

// ========================================
// PurchaseApplication
// ========================================

/// PurchaseApplication (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PurchaseApplication {
    pub application_id: String,
    pub user_id: String,
    pub item_id: String,
    pub selected_gender: Option<String>,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub purpose: Option<String>,
    pub photo_key: Option<String>,
    pub photo_sha256: Option<String>,
    pub document_keys: Option<String>, // JSON配列
    pub status: String,
    pub reviewed_by: Option<String>,
    pub review_date: Option<i64>,
    pub approval_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub payment_amount: i64, // 最小通貨単位（paise）
    pub payment_currency: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub payment_status: Option<String>,
    pub payment_date: Option<i64>,
    #[serde(skip_serializing)]
    pub otp_code: Option<String>,
    pub otp_generated_at: Option<i64>,
    pub otp_expires_at: Option<i64>,
    pub otp_verified: i64,
    pub otp_verified_at: Option<i64>,
    pub scheduled_handover_date: Option<String>,
    pub scheduled_handover_time: Option<String>,
    pub handover_location: Option<String>,
    pub handover_completed_by: Option<String>,
    pub handover_completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// StatusHistory エントリ (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub application_id: String,
    pub status: String,
    pub changed_at: i64,
    pub changed_by: String,
    pub notes: Option<String>,
}

/// 申請レビュー（reject）リクエスト
#[derive(Debug, Deserialize)]
pub struct RejectApplicationRequest {
    pub rejection_reason: Option<String>,
}

/// 申請レビュー（approve）リクエスト
#[derive(Debug, Deserialize)]
pub struct ApproveApplicationRequest {
    pub approval_notes: Option<String>,
}

/// 受け渡しスケジュールリクエスト
#[derive(Debug, Deserialize)]
pub struct ScheduleHandoverRequest {
    pub scheduled_date: String,
    pub scheduled_time: String,
    pub location: Option<String>,
}

/// OTP検証リクエスト
#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub code: String,
}

/// PurchaseApplication レスポンス（statusHistory 同梱）
#[derive(Debug, Serialize)]
pub struct ApplicationResponse {
    #[serde(flatten)]
    pub application: PurchaseApplication,
    pub status_history: Vec<StatusHistoryEntry>,
}

// ========================================
// Payment
// ========================================

/// 決済オーダー作成リクエスト（予約フロー用）
#[derive(Debug, Deserialize)]
pub struct CreatePaymentOrderRequest {
    pub delivery_method: Option<String>, // "pickup" | "delivery"
    pub delivery_address: Option<String>,
}

/// 決済オーダー作成レスポンス
#[derive(Debug, Serialize)]
pub struct PaymentOrderResponse {
    pub success: bool,
    pub order_id: String,
    pub amount: i64, // 最小通貨単位
    pub currency: String,
}

/// 決済検証リクエスト
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}
