//! Pet History Module
//! ペット単位の追記専用監査ログ。書き込み後は不変。
//! 自由形式メタデータの代わりにイベント種別ごとのタグ付きユニオンを持つ。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Sqlite;

use crate::auth::Actor;

/// イベント種別（閉じた列挙）
pub mod event_type {
    pub const ITEM_CREATED: &str = "item_created";
    pub const LISTED_FOR_SALE: &str = "listed_for_sale";
    pub const PRICE_UPDATED: &str = "price_updated";
    pub const STATUS_CHANGED: &str = "status_changed";
    pub const RESERVATION_CREATED: &str = "reservation_created";
    pub const RESERVATION_APPROVED: &str = "reservation_approved";
    pub const RESERVATION_REJECTED: &str = "reservation_rejected";
    pub const RESERVATION_CONFIRMED: &str = "reservation_confirmed";
    pub const RESERVATION_CANCELLED: &str = "reservation_cancelled";
    pub const APPLICATION_SUBMITTED: &str = "application_submitted";
    pub const APPLICATION_APPROVED: &str = "application_approved";
    pub const APPLICATION_REJECTED: &str = "application_rejected";
    pub const APPLICATION_CANCELLED: &str = "application_cancelled";
    pub const PAYMENT_ORDER_CREATED: &str = "payment_order_created";
    pub const PAYMENT_COMPLETED: &str = "payment_completed";
    pub const HANDOVER_SCHEDULED: &str = "handover_scheduled";
    pub const HANDOVER_OTP_GENERATED: &str = "handover_otp_generated";
    pub const HANDOVER_COMPLETED: &str = "handover_completed";
    pub const OWNERSHIP_TRANSFERRED: &str = "ownership_transferred";
}

/// イベント種別ごとの構造化詳細
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryDetail {
    Payment {
        amount: i64,
        currency: String,
        order_id: String,
        payment_id: String,
    },
    Delivery {
        method: String,
        address: Option<String>,
    },
    Handover {
        scheduled_date: String,
        scheduled_time: String,
        location: Option<String>,
    },
    Transfer {
        previous_owner: Option<String>,
        new_owner: String,
        transfer_price: i64,
    },
    StatusChange {
        from: String,
        to: String,
    },
}

/// History エントリ (DB row)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub id: i64,
    pub item_id: String,
    pub event_type: String,
    pub description: String,
    pub performed_by: String,
    pub performed_by_role: String,
    pub detail: Option<String>, // JSON (HistoryDetail)
    pub store_id: Option<String>,
    pub created_at: i64,
}

/// イベントを記録する。トランザクション内からも呼べるよう Executor を取る。
pub async fn log_event<'e, E>(
    exec: E,
    item_id: &str,
    event_type: &str,
    description: &str,
    actor: &Actor,
    detail: Option<&HistoryDetail>,
    store_id: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let detail_json = detail.and_then(|d| serde_json::to_string(d).ok());
    sqlx::query(
        r#"
        INSERT INTO pet_history (item_id, event_type, description, performed_by, performed_by_role, detail, store_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item_id)
    .bind(event_type)
    .bind(description)
    .bind(&actor.user_id)
    .bind(&actor.role)
    .bind(detail_json)
    .bind(store_id)
    .bind(Utc::now().timestamp())
    .execute(exec)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_serializes_with_kind_tag() {
        let detail = HistoryDetail::Payment {
            amount: 50_000,
            currency: "INR".to_string(),
            order_id: "order_abc".to_string(),
            payment_id: "pay_xyz".to_string(),
        };
        let json = serde_json::to_string(&detail).unwrap();
        assert!(json.contains(r#""kind":"payment""#));

        let back: HistoryDetail = serde_json::from_str(&json).unwrap();
        match back {
            HistoryDetail::Payment { amount, .. } => assert_eq!(amount, 50_000),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
