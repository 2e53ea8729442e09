//! Reservation API Handlers
//! /api/reservations エンドポイント - 予約〜受け渡しのステートマシン
//!
//! pending → manager_review → approved | rejected
//! approved → going_to_buy → payment_pending → paid → ready_pickup → delivered | at_owner
//! 終端前の任意のステータスから cancelled へ遷移可。
//! reject / cancel は必ずアイテムを available_for_sale へ戻す。

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::Actor;
use crate::error::ApiError;
use crate::history::{self, event_type, HistoryDetail};
use crate::models::{
    item_status, payment_status, reservation_status, CreatePaymentOrderRequest,
    CreateReservationRequest, PaymentOrderResponse, PetItem, Reservation, ReservationResponse,
    ReviewReservationRequest, TimelineEntry, UpdateReservationStatusRequest, VerifyPaymentRequest,
};
use crate::payment;
use crate::AppState;

/// 配送手数料（宅配選択時のみ）
const DELIVERY_CHARGE: i64 = 500;
/// 税率（GST 18%）
const TAX_RATE: f64 = 0.18;

// ========================================
// Response Types
// ========================================

#[derive(Debug, Serialize)]
pub struct ReservationDetailResponse {
    pub success: bool,
    pub reservation: ReservationResponse,
}

#[derive(Serialize)]
pub struct ReservationListResponse {
    pub success: bool,
    pub reservations: Vec<Reservation>,
    pub total: usize,
}

// ========================================
// Query Parameters
// ========================================

#[derive(Debug, Deserialize)]
pub struct ListReservationsQuery {
    pub status: Option<String>,
}

// ========================================
// Handlers (user)
// ========================================

/// POST /api/reservations - 予約作成
pub async fn create_reservation(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationDetailResponse>), ApiError> {
    if req.item_id.trim().is_empty() {
        return Err(ApiError::Validation("item_id is required".to_string()));
    }

    let item: Option<PetItem> =
        sqlx::query_as("SELECT * FROM pet_items WHERE item_id = ? AND is_active = 1")
            .bind(&req.item_id)
            .fetch_optional(&state.db)
            .await?;
    let item = item.ok_or_else(|| ApiError::NotFound("Item not found".to_string()))?;

    if item.status != item_status::AVAILABLE_FOR_SALE {
        return Err(ApiError::InvalidState(
            "Item not available for reservation".to_string(),
        ));
    }

    let now = chrono::Utc::now().timestamp();
    let reservation_id = Uuid::new_v4().to_string();
    let reservation_code = generate_reservation_code();

    let mut tx = state.db.begin().await?;

    // 条件付き更新で同時予約を排除する。status が available_for_sale の
    // 行だけを reserved に倒し、0件なら他の予約に先を越されている。
    let flipped = sqlx::query(
        "UPDATE pet_items SET status = ?, updated_at = ? WHERE item_id = ? AND status = ?",
    )
    .bind(item_status::RESERVED)
    .bind(now)
    .bind(&req.item_id)
    .bind(item_status::AVAILABLE_FOR_SALE)
    .execute(&mut *tx)
    .await?;

    if flipped.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "Item was just reserved by another user".to_string(),
        ));
    }

    sqlx::query(r#"
        INSERT INTO reservations (
            reservation_id, reservation_code, item_id, user_id, reservation_type,
            status, contact_phone, contact_email, visit_date, notes,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, 'reservation', ?, ?, ?, ?, ?, ?, ?)
    "#)
    .bind(&reservation_id)
    .bind(&reservation_code)
    .bind(&req.item_id)
    .bind(&actor.user_id)
    .bind(reservation_status::PENDING)
    .bind(&req.contact_phone)
    .bind(&req.contact_email)
    .bind(&req.visit_date)
    .bind(&req.notes)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    append_timeline(
        &mut tx,
        &reservation_id,
        reservation_status::PENDING,
        &actor.user_id,
        "Reservation created",
        now,
    )
    .await?;

    history::log_event(
        &mut *tx,
        &req.item_id,
        event_type::RESERVATION_CREATED,
        &format!("Reservation {} created", reservation_code),
        &actor,
        None,
        Some(&item.store_id),
    )
    .await?;

    tx.commit().await?;

    info!(
        "Reservation created: reservation_id={}, code={}, item={}",
        reservation_id, reservation_code, req.item_id
    );

    let response = load_reservation(&state, &reservation_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ReservationDetailResponse {
            success: true,
            reservation: response,
        }),
    ))
}

/// GET /api/reservations - 自分の予約一覧
pub async fn list_my_reservations(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListReservationsQuery>,
) -> Result<Json<ReservationListResponse>, ApiError> {
    let reservations: Vec<Reservation> = if let Some(status) = &query.status {
        sqlx::query_as(
            "SELECT * FROM reservations WHERE user_id = ? AND status = ? ORDER BY created_at DESC",
        )
        .bind(&actor.user_id)
        .bind(status)
        .fetch_all(&state.db)
        .await
    } else {
        sqlx::query_as("SELECT * FROM reservations WHERE user_id = ? ORDER BY created_at DESC")
            .bind(&actor.user_id)
            .fetch_all(&state.db)
            .await
    }?;

    let total = reservations.len();
    Ok(Json(ReservationListResponse {
        success: true,
        reservations,
        total,
    }))
}

/// GET /api/reservations/:id - 予約詳細（所有ユーザーまたはマネージャー）
pub async fn get_reservation(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<ReservationDetailResponse>, ApiError> {
    let reservation = find_reservation_for_actor(&state, &actor, &id).await?;
    let response = load_reservation(&state, &reservation.reservation_id).await?;
    Ok(Json(ReservationDetailResponse {
        success: true,
        reservation: response,
    }))
}

/// POST /api/reservations/:id/cancel - 予約キャンセル（ユーザー）
pub async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<ReservationDetailResponse>, ApiError> {
    let reservation = find_owned_reservation(&state, &actor, &id).await?;

    if !reservation_status::CANCELLABLE.contains(&reservation.status.as_str()) {
        return Err(ApiError::InvalidState(format!(
            "Reservation cannot be cancelled from status: {}",
            reservation.status
        )));
    }

    let now = chrono::Utc::now().timestamp();
    let mut tx = state.db.begin().await?;

    transition(
        &mut tx,
        &reservation.reservation_id,
        reservation_status::CANCELLED,
        &actor.user_id,
        "Reservation cancelled by user",
        now,
    )
    .await?;
    release_item(&mut tx, &reservation.item_id, now).await?;

    history::log_event(
        &mut *tx,
        &reservation.item_id,
        event_type::RESERVATION_CANCELLED,
        &format!("Reservation {} cancelled by user", reservation.reservation_code),
        &actor,
        None,
        None,
    )
    .await?;

    tx.commit().await?;

    info!("Reservation cancelled: reservation_id={}", id);

    let response = load_reservation(&state, &id).await?;
    Ok(Json(ReservationDetailResponse {
        success: true,
        reservation: response,
    }))
}

/// POST /api/reservations/:id/confirm-purchase - 購入意思の確認（approved → going_to_buy）
pub async fn confirm_purchase(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<ReservationDetailResponse>, ApiError> {
    let reservation = find_owned_reservation(&state, &actor, &id).await?;

    if reservation.status != reservation_status::APPROVED {
        return Err(ApiError::InvalidState(format!(
            "Purchase can only be confirmed from approved (status={})",
            reservation.status
        )));
    }

    let now = chrono::Utc::now().timestamp();
    let mut tx = state.db.begin().await?;
    transition(
        &mut tx,
        &id,
        reservation_status::GOING_TO_BUY,
        &actor.user_id,
        "User confirmed purchase intent",
        now,
    )
    .await?;
    history::log_event(
        &mut *tx,
        &reservation.item_id,
        event_type::RESERVATION_CONFIRMED,
        &format!("Buyer confirmed purchase for {}", reservation.reservation_code),
        &actor,
        None,
        None,
    )
    .await?;
    tx.commit().await?;

    let response = load_reservation(&state, &id).await?;
    Ok(Json(ReservationDetailResponse {
        success: true,
        reservation: response,
    }))
}

/// POST /api/reservations/:id/payment/create-order - 決済オーダー作成
pub async fn create_payment_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<CreatePaymentOrderRequest>,
) -> Result<Json<PaymentOrderResponse>, ApiError> {
    let reservation = find_owned_reservation(&state, &actor, &id).await?;

    if reservation.status == reservation_status::PAID
        || reservation_status::COMPLETED.contains(&reservation.status.as_str())
    {
        return Err(ApiError::InvalidState("Reservation already paid".to_string()));
    }
    if !reservation_status::PAYABLE.contains(&reservation.status.as_str()) {
        return Err(ApiError::InvalidState(format!(
            "Reservation not ready for payment (status={})",
            reservation.status
        )));
    }

    let item: PetItem = sqlx::query_as("SELECT * FROM pet_items WHERE item_id = ?")
        .bind(&reservation.item_id)
        .fetch_one(&state.db)
        .await?;

    if item.price <= 0 {
        return Err(ApiError::Validation(
            "Item price not set for this reservation".to_string(),
        ));
    }

    // 合計 = ペット価格 + 配送手数料 + 税（ルピー）。ゲートウェイへは paise で渡す。
    let delivery = matches!(req.delivery_method.as_deref(), Some("delivery"));
    let delivery_charges = if delivery { DELIVERY_CHARGE } else { 0 };
    let taxes = (item.price as f64 * TAX_RATE).round() as i64;
    let total = item.price + delivery_charges + taxes;
    let amount_minor = total * 100;

    let receipt = format!(
        "rcpt_{}_{}",
        &reservation.reservation_id[..8],
        chrono::Utc::now().timestamp() % 1_000_000
    );
    let order = state.gateway.create_order(amount_minor, "INR", &receipt)?;

    let now = chrono::Utc::now().timestamp();
    let mut tx = state.db.begin().await?;

    sqlx::query(r#"
        UPDATE reservations SET
            payment_order_id = ?, payment_amount = ?, payment_status = ?,
            delivery_method = ?, delivery_address = ?, updated_at = ?
        WHERE reservation_id = ?
    "#)
    .bind(&order.order_id)
    .bind(amount_minor)
    .bind(payment_status::PROCESSING)
    .bind(&req.delivery_method)
    .bind(&req.delivery_address)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    if reservation.status != reservation_status::PAYMENT_PENDING {
        transition(
            &mut tx,
            &id,
            reservation_status::PAYMENT_PENDING,
            &actor.user_id,
            "Payment order created",
            now,
        )
        .await?;
    }

    let delivery_detail = req.delivery_method.as_ref().map(|method| HistoryDetail::Delivery {
        method: method.clone(),
        address: req.delivery_address.clone(),
    });
    history::log_event(
        &mut *tx,
        &reservation.item_id,
        event_type::PAYMENT_ORDER_CREATED,
        &format!("Payment order {} created for {} paise", order.order_id, amount_minor),
        &actor,
        delivery_detail.as_ref(),
        None,
    )
    .await?;

    tx.commit().await?;

    info!(
        "Payment order created: reservation_id={}, order_id={}, amount={}",
        id, order.order_id, amount_minor
    );

    Ok(Json(PaymentOrderResponse {
        success: true,
        order_id: order.order_id,
        amount: amount_minor,
        currency: order.currency,
    }))
}

/// POST /api/reservations/:id/payment/verify - 決済コールバック検証
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<ReservationDetailResponse>, ApiError> {
    let reservation = find_owned_reservation(&state, &actor, &id).await?;

    if reservation.status != reservation_status::PAYMENT_PENDING {
        return Err(ApiError::InvalidState(format!(
            "Payment can only be recorded from payment_pending (status={})",
            reservation.status
        )));
    }
    if reservation.payment_order_id.as_deref() != Some(req.order_id.as_str()) {
        return Err(ApiError::Validation(
            "order_id does not match this reservation".to_string(),
        ));
    }

    // 署名不一致なら状態は一切変更しない
    if !payment::verify_signature(
        &req.order_id,
        &req.payment_id,
        &req.signature,
        &state.payment_secret,
    ) {
        return Err(ApiError::SignatureInvalid);
    }

    let now = chrono::Utc::now().timestamp();
    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE reservations SET payment_id = ?, payment_status = ?, paid_at = ?, updated_at = ? WHERE reservation_id = ?",
    )
    .bind(&req.payment_id)
    .bind(payment_status::SUCCESS)
    .bind(now)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    transition(
        &mut tx,
        &id,
        reservation_status::PAID,
        &actor.user_id,
        "Payment verified",
        now,
    )
    .await?;

    history::log_event(
        &mut *tx,
        &reservation.item_id,
        event_type::PAYMENT_COMPLETED,
        &format!(
            "Payment of {} paise completed for {}",
            reservation.payment_amount.unwrap_or(0),
            reservation.reservation_code
        ),
        &actor,
        Some(&HistoryDetail::Payment {
            amount: reservation.payment_amount.unwrap_or(0),
            currency: "INR".to_string(),
            order_id: req.order_id.clone(),
            payment_id: req.payment_id.clone(),
        }),
        None,
    )
    .await?;

    tx.commit().await?;

    info!("Payment verified: reservation_id={}, payment_id={}", id, req.payment_id);

    let response = load_reservation(&state, &id).await?;
    Ok(Json(ReservationDetailResponse {
        success: true,
        reservation: response,
    }))
}

// ========================================
// Handlers (manager)
// ========================================

/// GET /api/manager/reservations - 店舗の予約一覧
pub async fn manager_list_reservations(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListReservationsQuery>,
) -> Result<Json<ReservationListResponse>, ApiError> {
    actor.require_manager()?;

    // 店舗フィルタは在庫テーブル経由で適用する
    let reservations: Vec<Reservation> = match (actor.store_filter(), &query.status) {
        (Some(store), Some(status)) => {
            sqlx::query_as(
                r#"
                SELECT r.* FROM reservations r
                JOIN pet_items i ON i.item_id = r.item_id
                WHERE i.store_id = ? AND r.status = ?
                ORDER BY r.created_at DESC
                "#,
            )
            .bind(store)
            .bind(status)
            .fetch_all(&state.db)
            .await
        }
        (Some(store), None) => {
            sqlx::query_as(
                r#"
                SELECT r.* FROM reservations r
                JOIN pet_items i ON i.item_id = r.item_id
                WHERE i.store_id = ?
                ORDER BY r.created_at DESC
                "#,
            )
            .bind(store)
            .fetch_all(&state.db)
            .await
        }
        (None, Some(status)) => {
            sqlx::query_as("SELECT * FROM reservations WHERE status = ? ORDER BY created_at DESC")
                .bind(status)
                .fetch_all(&state.db)
                .await
        }
        (None, None) => {
            sqlx::query_as("SELECT * FROM reservations ORDER BY created_at DESC")
                .fetch_all(&state.db)
                .await
        }
    }?;

    let total = reservations.len();
    Ok(Json(ReservationListResponse {
        success: true,
        reservations,
        total,
    }))
}

/// POST /api/reservations/:id/review - マネージャーレビュー（approve/reject）
pub async fn review_reservation(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<ReviewReservationRequest>,
) -> Result<Json<ReservationDetailResponse>, ApiError> {
    actor.require_manager()?;

    if req.action != "approve" && req.action != "reject" {
        return Err(ApiError::Validation(
            "action must be either approve or reject".to_string(),
        ));
    }

    let reservation = find_reservation_in_store(&state, &actor, &id).await?;

    if !reservation_status::REVIEWABLE.contains(&reservation.status.as_str()) {
        return Err(ApiError::InvalidState(
            "Reservation is not in a reviewable state".to_string(),
        ));
    }

    let now = chrono::Utc::now().timestamp();
    let notes = req.review_notes.clone().unwrap_or_default();
    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE reservations SET reviewed_by = ?, reviewed_at = ?, review_notes = ?, updated_at = ? WHERE reservation_id = ?",
    )
    .bind(&actor.user_id)
    .bind(now)
    .bind(&notes)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    if req.action == "approve" {
        transition(
            &mut tx,
            &id,
            reservation_status::APPROVED,
            &actor.user_id,
            &notes,
            now,
        )
        .await?;
        history::log_event(
            &mut *tx,
            &reservation.item_id,
            event_type::RESERVATION_APPROVED,
            &format!("Reservation {} approved", reservation.reservation_code),
            &actor,
            None,
            None,
        )
        .await?;
    } else {
        transition(
            &mut tx,
            &id,
            reservation_status::REJECTED,
            &actor.user_id,
            &notes,
            now,
        )
        .await?;
        // 却下は必ずアイテムを販売可能へ戻す
        release_item(&mut tx, &reservation.item_id, now).await?;
        history::log_event(
            &mut *tx,
            &reservation.item_id,
            event_type::RESERVATION_REJECTED,
            &format!("Reservation {} rejected", reservation.reservation_code),
            &actor,
            None,
            None,
        )
        .await?;
    }

    tx.commit().await?;

    info!("Reservation reviewed: reservation_id={}, action={}", id, req.action);

    let response = load_reservation(&state, &id).await?;
    Ok(Json(ReservationDetailResponse {
        success: true,
        reservation: response,
    }))
}

/// POST /api/reservations/:id/status - マネージャーによる進行
/// paid → ready_pickup → delivered | at_owner。cancelled も可。
pub async fn update_reservation_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<UpdateReservationStatusRequest>,
) -> Result<Json<ReservationDetailResponse>, ApiError> {
    actor.require_manager()?;
    let reservation = find_reservation_in_store(&state, &actor, &id).await?;

    let valid = match req.status.as_str() {
        reservation_status::READY_PICKUP => reservation.status == reservation_status::PAID,
        reservation_status::DELIVERED | reservation_status::AT_OWNER => {
            reservation.status == reservation_status::READY_PICKUP
        }
        reservation_status::CANCELLED => {
            reservation_status::CANCELLABLE.contains(&reservation.status.as_str())
        }
        _ => {
            return Err(ApiError::Validation(format!(
                "Invalid target status: {}",
                req.status
            )))
        }
    };
    if !valid {
        return Err(ApiError::InvalidState(format!(
            "Cannot move reservation from {} to {}",
            reservation.status, req.status
        )));
    }

    let now = chrono::Utc::now().timestamp();
    let notes = req.notes.clone().unwrap_or_default();
    let mut tx = state.db.begin().await?;

    transition(&mut tx, &id, &req.status, &actor.user_id, &notes, now).await?;

    match req.status.as_str() {
        reservation_status::READY_PICKUP => {
            history::log_event(
                &mut *tx,
                &reservation.item_id,
                event_type::STATUS_CHANGED,
                "Pet ready for pickup",
                &actor,
                Some(&HistoryDetail::StatusChange {
                    from: reservation.status.clone(),
                    to: req.status.clone(),
                }),
                None,
            )
            .await?;
        }
        reservation_status::CANCELLED => {
            release_item(&mut tx, &reservation.item_id, now).await?;
            history::log_event(
                &mut *tx,
                &reservation.item_id,
                event_type::RESERVATION_CANCELLED,
                &format!("Reservation {} cancelled by manager", reservation.reservation_code),
                &actor,
                None,
                None,
            )
            .await?;
        }
        reservation_status::DELIVERED | reservation_status::AT_OWNER => {
            // 受け渡し完了 = 所有権移転。アイテムを sold にし買主を記録する。
            sqlx::query(
                "UPDATE pet_items SET status = ?, buyer_id = ?, sold_at = ?, updated_at = ? WHERE item_id = ?",
            )
            .bind(item_status::SOLD)
            .bind(&reservation.user_id)
            .bind(now)
            .bind(now)
            .bind(&reservation.item_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE reservations SET handover_completed_at = ?, updated_at = ? WHERE reservation_id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

            history::log_event(
                &mut *tx,
                &reservation.item_id,
                event_type::OWNERSHIP_TRANSFERRED,
                &format!("Pet ownership transferred to user {}", reservation.user_id),
                &actor,
                Some(&HistoryDetail::Transfer {
                    previous_owner: None,
                    new_owner: reservation.user_id.clone(),
                    transfer_price: reservation.payment_amount.unwrap_or(0),
                }),
                None,
            )
            .await?;
        }
        _ => {}
    }

    tx.commit().await?;

    info!("Reservation status updated: reservation_id={}, status={}", id, req.status);

    let response = load_reservation(&state, &id).await?;
    Ok(Json(ReservationDetailResponse {
        success: true,
        reservation: response,
    }))
}

// ========================================
// Helper Functions
// ========================================

fn generate_reservation_code() -> String {
    let random_bytes: [u8; 5] = rand::thread_rng().gen();
    let encoded = base32::encode(base32::Alphabet::Crockford, &random_bytes);
    format!("RSV_{}", &encoded[..8])
}

/// ステータス遷移＝本体更新とタイムライン追記を常に対で行う
async fn transition(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    reservation_id: &str,
    status: &str,
    changed_by: &str,
    notes: &str,
    now: i64,
) -> Result<(), ApiError> {
    sqlx::query("UPDATE reservations SET status = ?, updated_at = ? WHERE reservation_id = ?")
        .bind(status)
        .bind(now)
        .bind(reservation_id)
        .execute(&mut **tx)
        .await?;
    append_timeline(tx, reservation_id, status, changed_by, notes, now).await?;
    Ok(())
}

async fn append_timeline(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    reservation_id: &str,
    status: &str,
    changed_by: &str,
    notes: &str,
    now: i64,
) -> Result<(), ApiError> {
    sqlx::query(
        "INSERT INTO reservation_timeline (reservation_id, status, changed_at, changed_by, notes) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(reservation_id)
    .bind(status)
    .bind(now)
    .bind(changed_by)
    .bind(notes)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// 保持中のアイテムを販売可能へ戻す（reserved の場合のみ）
async fn release_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    item_id: &str,
    now: i64,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE pet_items SET status = ?, updated_at = ? WHERE item_id = ? AND status = ?",
    )
    .bind(item_status::AVAILABLE_FOR_SALE)
    .bind(now)
    .bind(item_id)
    .bind(item_status::RESERVED)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn find_owned_reservation(
    state: &AppState,
    actor: &Actor,
    id: &str,
) -> Result<Reservation, ApiError> {
    let reservation: Option<Reservation> =
        sqlx::query_as("SELECT * FROM reservations WHERE reservation_id = ? AND user_id = ?")
            .bind(id)
            .bind(&actor.user_id)
            .fetch_optional(&state.db)
            .await?;
    reservation.ok_or_else(|| ApiError::NotFound("Reservation not found".to_string()))
}

/// マネージャーは自店舗スコープ、ユーザーは自分の予約のみ
async fn find_reservation_for_actor(
    state: &AppState,
    actor: &Actor,
    id: &str,
) -> Result<Reservation, ApiError> {
    if actor.is_manager() {
        find_reservation_in_store(state, actor, id).await
    } else {
        find_owned_reservation(state, actor, id).await
    }
}

async fn find_reservation_in_store(
    state: &AppState,
    actor: &Actor,
    id: &str,
) -> Result<Reservation, ApiError> {
    let reservation: Option<Reservation> =
        sqlx::query_as("SELECT * FROM reservations WHERE reservation_id = ?")
            .bind(id)
            .fetch_optional(&state.db)
            .await?;
    let reservation =
        reservation.ok_or_else(|| ApiError::NotFound("Reservation not found".to_string()))?;

    if let Some(store) = actor.store_filter() {
        let item_store: Option<(String,)> =
            sqlx::query_as("SELECT store_id FROM pet_items WHERE item_id = ?")
                .bind(&reservation.item_id)
                .fetch_optional(&state.db)
                .await?;
        match item_store {
            Some((s,)) if s == store => {}
            _ => {
                return Err(ApiError::Forbidden(
                    "Reservation does not belong to your store".to_string(),
                ))
            }
        }
    }
    Ok(reservation)
}

async fn load_reservation(state: &AppState, id: &str) -> Result<ReservationResponse, ApiError> {
    let reservation: Reservation =
        sqlx::query_as("SELECT * FROM reservations WHERE reservation_id = ?")
            .bind(id)
            .fetch_one(&state.db)
            .await?;
    let timeline: Vec<TimelineEntry> =
        sqlx::query_as("SELECT * FROM reservation_timeline WHERE reservation_id = ? ORDER BY id ASC")
            .bind(id)
            .fetch_all(&state.db)
            .await?;
    Ok(ReservationResponse {
        reservation,
        timeline,
    })
}
