//! Purchase Application API Handlers
//! /api/applications エンドポイント - 購入申請〜OTP受け渡しのステートマシン
//!
//! pending → under_review → approved | rejected
//! approved → payment_pending → paid → scheduled → completed
//! 終端前の任意のステータスから cancelled へ遷移可。
//! 受け渡し完了は OTP 検証成功によってのみ到達する。

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::auth::Actor;
use crate::error::ApiError;
use crate::history::{self, event_type, HistoryDetail};
use crate::models::{
    application_status, item_status, payment_status, ApplicationResponse,
    ApproveApplicationRequest, PaymentOrderResponse, PetItem, PurchaseApplication,
    RejectApplicationRequest, ScheduleHandoverRequest, StatusHistoryEntry, VerifyOtpRequest,
    VerifyPaymentRequest,
};
use crate::otp;
use crate::payment;
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Debug, Serialize)]
pub struct ApplicationDetailResponse {
    pub success: bool,
    pub application: ApplicationResponse,
}

#[derive(Serialize)]
pub struct ApplicationListResponse {
    pub success: bool,
    pub applications: Vec<PurchaseApplication>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct OtpResponse {
    pub success: bool,
    pub otp_expires_at: i64,
}

// ========================================
// Query Parameters
// ========================================

#[derive(Debug, Deserialize)]
pub struct ListApplicationsQuery {
    pub status: Option<String>,
}

// ========================================
// Handlers (user)
// ========================================

/// POST /api/applications - 購入申請の提出（multipart: 項目 + 写真 + 書類）
pub async fn submit_application(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApplicationDetailResponse>), ApiError> {
    let application_id = Uuid::new_v4().to_string();

    let mut item_id = String::new();
    let mut selected_gender: Option<String> = None;
    let mut full_name = String::new();
    let mut phone: Option<String> = None;
    let mut email: Option<String> = None;
    let mut address: Option<String> = None;
    let mut purpose: Option<String> = None;
    let mut photo: Option<(String, Vec<u8>)> = None;
    let mut documents: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "item_id" => item_id = read_text(field).await?,
            "selected_gender" => selected_gender = Some(read_text(field).await?),
            "full_name" => full_name = read_text(field).await?,
            "phone" => phone = Some(read_text(field).await?),
            "email" => email = Some(read_text(field).await?),
            "address" => address = Some(read_text(field).await?),
            "purpose" => purpose = Some(read_text(field).await?),
            "photo" => {
                let filename = field.file_name().unwrap_or("photo").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Read error: {}", e)))?;
                photo = Some((filename, bytes.to_vec()));
            }
            "documents" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Read error: {}", e)))?;
                documents.push((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    if item_id.trim().is_empty() {
        return Err(ApiError::Validation("item_id is required".to_string()));
    }
    if full_name.trim().is_empty() {
        return Err(ApiError::Validation("full_name is required".to_string()));
    }

    let item: Option<PetItem> =
        sqlx::query_as("SELECT * FROM pet_items WHERE item_id = ? AND is_active = 1")
            .bind(&item_id)
            .fetch_optional(&state.db)
            .await?;
    let item = item.ok_or_else(|| ApiError::NotFound("Item not found".to_string()))?;

    if item.status != item_status::AVAILABLE_FOR_SALE {
        return Err(ApiError::InvalidState(
            "Item not available for application".to_string(),
        ));
    }

    // 同一ユーザー・同一アイテムへの進行中申請は重複とみなす
    let placeholders = vec!["?"; application_status::ACTIVE.len()].join(", ");
    let dup_sql = format!(
        "SELECT COUNT(*) FROM purchase_applications WHERE user_id = ? AND item_id = ? AND status IN ({})",
        placeholders
    );
    let mut dup_query = sqlx::query_scalar::<_, i64>(&dup_sql)
        .bind(&actor.user_id)
        .bind(&item_id);
    for status in application_status::ACTIVE {
        dup_query = dup_query.bind(*status);
    }
    let duplicates = dup_query.fetch_one(&state.db).await?;
    if duplicates > 0 {
        return Err(ApiError::Conflict(
            "You already have an active application for this pet".to_string(),
        ));
    }

    // 申請時点の価格を最小通貨単位で確定する（以後の価格改定に影響されない）
    let payment_amount = item.price * 100;
    let now = chrono::Utc::now().timestamp();

    let mut tx = state.db.begin().await?;

    // 条件付き更新で同時申請を排除する
    let flipped = sqlx::query(
        "UPDATE pet_items SET status = ?, updated_at = ? WHERE item_id = ? AND status = ?",
    )
    .bind(item_status::RESERVED)
    .bind(now)
    .bind(&item_id)
    .bind(item_status::AVAILABLE_FOR_SALE)
    .execute(&mut *tx)
    .await?;

    if flipped.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "Item was just reserved by another user".to_string(),
        ));
    }

    // ホールドが取れてからファイルを保存する。以降の失敗時は
    // ディレクトリごと削除してロールバックと揃える。
    let app_dir = state
        .base_data_dir
        .join("applications")
        .join(&application_id);
    let (photo_key, photo_sha256, document_keys_json) =
        match save_attachments(&state, &application_id, &app_dir, photo.as_ref(), &documents)
            .await
        {
            Ok(saved) => saved,
            Err(e) => {
                let _ = fs::remove_dir_all(&app_dir).await;
                return Err(e);
            }
        };

    let persisted: Result<(), ApiError> = async {
        sqlx::query(r#"
            INSERT INTO purchase_applications (
                application_id, user_id, item_id, selected_gender, full_name,
                phone, email, address, purpose,
                photo_key, photo_sha256, document_keys,
                status, payment_amount, payment_currency,
                otp_verified, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'INR', 0, ?, ?)
        "#)
        .bind(&application_id)
        .bind(&actor.user_id)
        .bind(&item_id)
        .bind(&selected_gender)
        .bind(&full_name)
        .bind(&phone)
        .bind(&email)
        .bind(&address)
        .bind(&purpose)
        .bind(&photo_key)
        .bind(&photo_sha256)
        .bind(&document_keys_json)
        .bind(application_status::PENDING)
        .bind(payment_amount)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        append_status_history(
            &mut tx,
            &application_id,
            application_status::PENDING,
            &actor.user_id,
            "Application submitted",
            now,
        )
        .await?;

        history::log_event(
            &mut *tx,
            &item_id,
            event_type::APPLICATION_SUBMITTED,
            &format!("Purchase application submitted by {}", full_name),
            &actor,
            None,
            Some(&item.store_id),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
    .await;

    if let Err(e) = persisted {
        let _ = fs::remove_dir_all(&app_dir).await;
        return Err(e);
    }

    info!(
        "Application submitted: application_id={}, item={}, amount={}",
        application_id, item_id, payment_amount
    );

    let response = load_application(&state, &application_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApplicationDetailResponse {
            success: true,
            application: response,
        }),
    ))
}

/// GET /api/applications - 自分の申請一覧
pub async fn list_my_applications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListApplicationsQuery>,
) -> Result<Json<ApplicationListResponse>, ApiError> {
    let applications: Vec<PurchaseApplication> = if let Some(status) = &query.status {
        sqlx::query_as(
            "SELECT * FROM purchase_applications WHERE user_id = ? AND status = ? ORDER BY created_at DESC",
        )
        .bind(&actor.user_id)
        .bind(status)
        .fetch_all(&state.db)
        .await
    } else {
        sqlx::query_as(
            "SELECT * FROM purchase_applications WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(&actor.user_id)
        .fetch_all(&state.db)
        .await
    }?;

    let total = applications.len();
    Ok(Json(ApplicationListResponse {
        success: true,
        applications,
        total,
    }))
}

/// GET /api/applications/:id - 申請詳細
pub async fn get_application(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<ApplicationDetailResponse>, ApiError> {
    if actor.is_manager() {
        find_application_in_store(&state, &actor, &id).await?;
    } else {
        find_owned_application(&state, &actor, &id).await?;
    }
    let response = load_application(&state, &id).await?;
    Ok(Json(ApplicationDetailResponse {
        success: true,
        application: response,
    }))
}

/// POST /api/applications/:id/cancel - 申請キャンセル（ユーザー）
pub async fn cancel_application(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<ApplicationDetailResponse>, ApiError> {
    let application = find_owned_application(&state, &actor, &id).await?;

    if !application_status::CANCELLABLE.contains(&application.status.as_str()) {
        return Err(ApiError::InvalidState(format!(
            "Application cannot be cancelled from status: {}",
            application.status
        )));
    }

    let now = chrono::Utc::now().timestamp();
    let mut tx = state.db.begin().await?;

    transition(
        &mut tx,
        &id,
        application_status::CANCELLED,
        &actor.user_id,
        "Application cancelled by user",
        now,
    )
    .await?;
    release_item(&mut tx, &application.item_id, now).await?;

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::APPLICATION_CANCELLED,
        "Purchase application cancelled by applicant",
        &actor,
        None,
        None,
    )
    .await?;

    tx.commit().await?;

    info!("Application cancelled: application_id={}", id);

    let response = load_application(&state, &id).await?;
    Ok(Json(ApplicationDetailResponse {
        success: true,
        application: response,
    }))
}

/// POST /api/applications/:id/payment/create-order - 決済オーダー作成
pub async fn create_payment_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<PaymentOrderResponse>, ApiError> {
    let application = find_owned_application(&state, &actor, &id).await?;

    match application.status.as_str() {
        application_status::APPROVED | application_status::PAYMENT_PENDING => {}
        application_status::PAID
        | application_status::SCHEDULED
        | application_status::COMPLETED => {
            return Err(ApiError::InvalidState("Application already paid".to_string()))
        }
        other => {
            return Err(ApiError::InvalidState(format!(
                "Payment requires an approved application (status={})",
                other
            )))
        }
    }

    let receipt = format!(
        "rcpt_{}_{}",
        &application.application_id[..8],
        chrono::Utc::now().timestamp() % 1_000_000
    );
    let order = state.gateway.create_order(
        application.payment_amount,
        &application.payment_currency,
        &receipt,
    )?;

    let now = chrono::Utc::now().timestamp();
    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE purchase_applications SET gateway_order_id = ?, payment_status = ?, updated_at = ? WHERE application_id = ?",
    )
    .bind(&order.order_id)
    .bind(payment_status::PROCESSING)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    if application.status != application_status::PAYMENT_PENDING {
        transition(
            &mut tx,
            &id,
            application_status::PAYMENT_PENDING,
            &actor.user_id,
            "Payment order created",
            now,
        )
        .await?;
    }

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::PAYMENT_ORDER_CREATED,
        &format!(
            "Payment order {} created for {} {}",
            order.order_id, application.payment_amount, application.payment_currency
        ),
        &actor,
        None,
        None,
    )
    .await?;

    tx.commit().await?;

    info!(
        "Payment order created: application_id={}, order_id={}",
        id, order.order_id
    );

    Ok(Json(PaymentOrderResponse {
        success: true,
        order_id: order.order_id,
        amount: application.payment_amount,
        currency: order.currency,
    }))
}

/// POST /api/applications/:id/payment/verify - 決済コールバック検証
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<ApplicationDetailResponse>, ApiError> {
    let application = find_owned_application(&state, &actor, &id).await?;

    if application.status != application_status::PAYMENT_PENDING {
        return Err(ApiError::InvalidState(format!(
            "Payment can only be recorded from payment_pending (status={})",
            application.status
        )));
    }
    if application.gateway_order_id.as_deref() != Some(req.order_id.as_str()) {
        return Err(ApiError::Validation(
            "order_id does not match this application".to_string(),
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
        "UPDATE purchase_applications SET gateway_payment_id = ?, payment_status = ?, payment_date = ?, updated_at = ? WHERE application_id = ?",
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
        application_status::PAID,
        &actor.user_id,
        "Payment verified",
        now,
    )
    .await?;

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::PAYMENT_COMPLETED,
        &format!(
            "Payment of {} {} completed",
            application.payment_amount, application.payment_currency
        ),
        &actor,
        Some(&HistoryDetail::Payment {
            amount: application.payment_amount,
            currency: application.payment_currency.clone(),
            order_id: req.order_id.clone(),
            payment_id: req.payment_id.clone(),
        }),
        None,
    )
    .await?;

    tx.commit().await?;

    info!(
        "Payment verified: application_id={}, payment_id={}",
        id, req.payment_id
    );

    let response = load_application(&state, &id).await?;
    Ok(Json(ApplicationDetailResponse {
        success: true,
        application: response,
    }))
}

/// POST /api/applications/:id/handover/verify-otp - OTP検証（受け渡し完了）
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<Json<ApplicationDetailResponse>, ApiError> {
    // マネージャーが店頭で入力するケースとユーザー自身のケースの両方を許す
    let application = if actor.is_manager() {
        find_application_in_store(&state, &actor, &id).await?
    } else {
        find_owned_application(&state, &actor, &id).await?
    };

    // OTPの状態を先に判定する。完了済み申請への再入力は
    // already_verified として返る。
    let now = chrono::Utc::now().timestamp();
    otp::verify_otp(
        application.otp_code.as_deref(),
        application.otp_expires_at,
        application.otp_verified != 0,
        &req.code,
        now,
    )
    .map_err(ApiError::Otp)?;

    if application.status != application_status::SCHEDULED {
        return Err(ApiError::InvalidState(format!(
            "Handover is not scheduled for this application (status={})",
            application.status
        )));
    }

    // OTP成功 = 受け渡し完了 + 所有権移転を同一トランザクションで確定する
    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        UPDATE purchase_applications SET
            otp_verified = 1, otp_verified_at = ?,
            handover_completed_by = ?, handover_completed_at = ?, updated_at = ?
        WHERE application_id = ?
        "#,
    )
    .bind(now)
    .bind(&actor.user_id)
    .bind(now)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    transition(
        &mut tx,
        &id,
        application_status::COMPLETED,
        &actor.user_id,
        "Handover completed via OTP",
        now,
    )
    .await?;

    sqlx::query(
        "UPDATE pet_items SET status = ?, buyer_id = ?, sold_at = ?, updated_at = ? WHERE item_id = ?",
    )
    .bind(item_status::SOLD)
    .bind(&application.user_id)
    .bind(now)
    .bind(now)
    .bind(&application.item_id)
    .execute(&mut *tx)
    .await?;

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::HANDOVER_COMPLETED,
        "Handover completed with OTP verification",
        &actor,
        None,
        None,
    )
    .await?;

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::OWNERSHIP_TRANSFERRED,
        &format!("Pet ownership transferred to user {}", application.user_id),
        &actor,
        Some(&HistoryDetail::Transfer {
            previous_owner: None,
            new_owner: application.user_id.clone(),
            transfer_price: application.payment_amount,
        }),
        None,
    )
    .await?;

    tx.commit().await?;

    info!("Handover completed: application_id={}", id);

    let response = load_application(&state, &id).await?;
    Ok(Json(ApplicationDetailResponse {
        success: true,
        application: response,
    }))
}

// ========================================
// Handlers (manager)
// ========================================

/// GET /api/manager/applications - 店舗の申請一覧
pub async fn manager_list_applications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListApplicationsQuery>,
) -> Result<Json<ApplicationListResponse>, ApiError> {
    actor.require_manager()?;

    let applications: Vec<PurchaseApplication> = match (actor.store_filter(), &query.status) {
        (Some(store), Some(status)) => {
            sqlx::query_as(
                r#"
                SELECT a.* FROM purchase_applications a
                JOIN pet_items i ON i.item_id = a.item_id
                WHERE i.store_id = ? AND a.status = ?
                ORDER BY a.created_at DESC
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
                SELECT a.* FROM purchase_applications a
                JOIN pet_items i ON i.item_id = a.item_id
                WHERE i.store_id = ?
                ORDER BY a.created_at DESC
                "#,
            )
            .bind(store)
            .fetch_all(&state.db)
            .await
        }
        (None, Some(status)) => {
            sqlx::query_as(
                "SELECT * FROM purchase_applications WHERE status = ? ORDER BY created_at DESC",
            )
            .bind(status)
            .fetch_all(&state.db)
            .await
        }
        (None, None) => {
            sqlx::query_as("SELECT * FROM purchase_applications ORDER BY created_at DESC")
                .fetch_all(&state.db)
                .await
        }
    }?;

    let total = applications.len();
    Ok(Json(ApplicationListResponse {
        success: true,
        applications,
        total,
    }))
}

/// POST /api/applications/:id/approve - 申請承認
pub async fn approve_application(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<ApproveApplicationRequest>,
) -> Result<Json<ApplicationDetailResponse>, ApiError> {
    actor.require_manager()?;
    let application = find_application_in_store(&state, &actor, &id).await?;

    if !application_status::REVIEWABLE.contains(&application.status.as_str()) {
        return Err(ApiError::InvalidState(
            "Application is not in a reviewable state".to_string(),
        ));
    }

    let now = chrono::Utc::now().timestamp();
    let notes = req.approval_notes.clone().unwrap_or_default();
    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE purchase_applications SET reviewed_by = ?, review_date = ?, approval_notes = ?, updated_at = ? WHERE application_id = ?",
    )
    .bind(&actor.user_id)
    .bind(now)
    .bind(&notes)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    transition(
        &mut tx,
        &id,
        application_status::APPROVED,
        &actor.user_id,
        &notes,
        now,
    )
    .await?;

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::APPLICATION_APPROVED,
        "Purchase application approved",
        &actor,
        None,
        None,
    )
    .await?;

    tx.commit().await?;

    info!("Application approved: application_id={}", id);

    let response = load_application(&state, &id).await?;
    Ok(Json(ApplicationDetailResponse {
        success: true,
        application: response,
    }))
}

/// POST /api/applications/:id/reject - 申請却下（理由必須）
pub async fn reject_application(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<RejectApplicationRequest>,
) -> Result<Json<ApplicationDetailResponse>, ApiError> {
    actor.require_manager()?;

    let reason = match req.rejection_reason.as_deref() {
        Some(r) if !r.trim().is_empty() => r.to_string(),
        _ => {
            return Err(ApiError::Validation(
                "rejection_reason is required".to_string(),
            ))
        }
    };

    let application = find_application_in_store(&state, &actor, &id).await?;

    if !application_status::REVIEWABLE.contains(&application.status.as_str()) {
        return Err(ApiError::InvalidState(
            "Application is not in a reviewable state".to_string(),
        ));
    }

    let now = chrono::Utc::now().timestamp();
    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE purchase_applications SET reviewed_by = ?, review_date = ?, rejection_reason = ?, updated_at = ? WHERE application_id = ?",
    )
    .bind(&actor.user_id)
    .bind(now)
    .bind(&reason)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    transition(
        &mut tx,
        &id,
        application_status::REJECTED,
        &actor.user_id,
        &reason,
        now,
    )
    .await?;
    // 却下は必ずアイテムを販売可能へ戻す
    release_item(&mut tx, &application.item_id, now).await?;

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::APPLICATION_REJECTED,
        &format!("Purchase application rejected: {}", reason),
        &actor,
        None,
        None,
    )
    .await?;

    tx.commit().await?;

    info!("Application rejected: application_id={}", id);

    let response = load_application(&state, &id).await?;
    Ok(Json(ApplicationDetailResponse {
        success: true,
        application: response,
    }))
}

/// POST /api/applications/:id/handover/schedule - 受け渡し日程の確定とOTP発行
pub async fn schedule_handover(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<ScheduleHandoverRequest>,
) -> Result<Json<ApplicationDetailResponse>, ApiError> {
    actor.require_manager()?;

    if req.scheduled_date.trim().is_empty() || req.scheduled_time.trim().is_empty() {
        return Err(ApiError::Validation(
            "scheduled_date and scheduled_time are required".to_string(),
        ));
    }

    let application = find_application_in_store(&state, &actor, &id).await?;

    if application.status != application_status::PAID {
        return Err(ApiError::InvalidState(format!(
            "Handover can only be scheduled after payment (status={})",
            application.status
        )));
    }

    let issued = otp::generate_otp();
    let now = chrono::Utc::now().timestamp();
    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        UPDATE purchase_applications SET
            scheduled_handover_date = ?, scheduled_handover_time = ?, handover_location = ?,
            otp_code = ?, otp_generated_at = ?, otp_expires_at = ?, otp_verified = 0,
            otp_verified_at = NULL, updated_at = ?
        WHERE application_id = ?
        "#,
    )
    .bind(&req.scheduled_date)
    .bind(&req.scheduled_time)
    .bind(&req.location)
    .bind(&issued.code)
    .bind(issued.generated_at)
    .bind(issued.expires_at)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    transition(
        &mut tx,
        &id,
        application_status::SCHEDULED,
        &actor.user_id,
        "Handover scheduled",
        now,
    )
    .await?;

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::HANDOVER_SCHEDULED,
        &format!(
            "Handover scheduled for {} {}",
            req.scheduled_date, req.scheduled_time
        ),
        &actor,
        Some(&HistoryDetail::Handover {
            scheduled_date: req.scheduled_date.clone(),
            scheduled_time: req.scheduled_time.clone(),
            location: req.location.clone(),
        }),
        None,
    )
    .await?;

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::HANDOVER_OTP_GENERATED,
        "Handover OTP generated",
        &actor,
        None,
        None,
    )
    .await?;

    tx.commit().await?;

    info!(
        "Handover scheduled: application_id={}, date={} {}",
        id, req.scheduled_date, req.scheduled_time
    );

    let response = load_application(&state, &id).await?;
    Ok(Json(ApplicationDetailResponse {
        success: true,
        application: response,
    }))
}

/// POST /api/applications/:id/handover/regenerate-otp - OTP再発行
pub async fn regenerate_otp(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<OtpResponse>, ApiError> {
    actor.require_manager()?;
    let application = find_application_in_store(&state, &actor, &id).await?;

    if application.status != application_status::SCHEDULED {
        return Err(ApiError::InvalidState(
            "OTP can only be regenerated for a scheduled handover".to_string(),
        ));
    }
    if application.otp_verified != 0 {
        return Err(ApiError::InvalidState(
            "Handover already verified".to_string(),
        ));
    }

    let issued = otp::generate_otp();
    let now = chrono::Utc::now().timestamp();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "UPDATE purchase_applications SET otp_code = ?, otp_generated_at = ?, otp_expires_at = ?, updated_at = ? WHERE application_id = ?",
    )
    .bind(&issued.code)
    .bind(issued.generated_at)
    .bind(issued.expires_at)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    history::log_event(
        &mut *tx,
        &application.item_id,
        event_type::HANDOVER_OTP_GENERATED,
        "Handover OTP regenerated",
        &actor,
        None,
        None,
    )
    .await?;
    tx.commit().await?;

    info!("OTP regenerated: application_id={}", id);

    Ok(Json(OtpResponse {
        success: true,
        otp_expires_at: issued.expires_at,
    }))
}

// ========================================
// Helper Functions
// ========================================

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("Read error: {}", e)))
}

/// 添付ファイルを保存し (photo_key, photo_sha256, document_keys JSON) を返す
async fn save_attachments(
    state: &AppState,
    application_id: &str,
    app_dir: &std::path::Path,
    photo: Option<&(String, Vec<u8>)>,
    documents: &[(String, Vec<u8>)],
) -> Result<(Option<String>, Option<String>, String), ApiError> {
    fs::create_dir_all(app_dir)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create application dir: {}", e))?;

    let mut photo_key: Option<String> = None;
    let mut photo_sha256: Option<String> = None;
    if let Some((filename, bytes)) = photo {
        let digest = hex::encode(Sha256::digest(bytes));
        let key = stored_key(application_id, &digest, filename);
        fs::write(state.base_data_dir.join(&key), bytes)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to save photo: {}", e))?;
        photo_key = Some(key);
        photo_sha256 = Some(digest);
    }

    let mut document_keys: Vec<String> = Vec::new();
    for (filename, bytes) in documents {
        let digest = hex::encode(Sha256::digest(bytes));
        let key = stored_key(application_id, &digest, filename);
        fs::write(state.base_data_dir.join(&key), bytes)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to save document: {}", e))?;
        document_keys.push(key);
    }
    let document_keys_json = serde_json::to_string(&document_keys)
        .map_err(|e| anyhow::anyhow!("Failed to serialize document keys: {}", e))?;

    Ok((photo_key, photo_sha256, document_keys_json))
}

/// 保存キー: applications/{id}/{sha256先頭16桁}_{ファイル名}
fn stored_key(application_id: &str, digest: &str, filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("applications/{}/{}_{}", application_id, &digest[..16], safe)
}

/// ステータス遷移＝本体更新と履歴追記を常に対で行う
async fn transition(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    application_id: &str,
    status: &str,
    changed_by: &str,
    notes: &str,
    now: i64,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE purchase_applications SET status = ?, updated_at = ? WHERE application_id = ?",
    )
    .bind(status)
    .bind(now)
    .bind(application_id)
    .execute(&mut **tx)
    .await?;
    append_status_history(tx, application_id, status, changed_by, notes, now).await?;
    Ok(())
}

async fn append_status_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    application_id: &str,
    status: &str,
    changed_by: &str,
    notes: &str,
    now: i64,
) -> Result<(), ApiError> {
    sqlx::query(
        "INSERT INTO application_status_history (application_id, status, changed_at, changed_by, notes) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(application_id)
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

async fn find_owned_application(
    state: &AppState,
    actor: &Actor,
    id: &str,
) -> Result<PurchaseApplication, ApiError> {
    let application: Option<PurchaseApplication> = sqlx::query_as(
        "SELECT * FROM purchase_applications WHERE application_id = ? AND user_id = ?",
    )
    .bind(id)
    .bind(&actor.user_id)
    .fetch_optional(&state.db)
    .await?;
    application.ok_or_else(|| ApiError::NotFound("Application not found".to_string()))
}

async fn find_application_in_store(
    state: &AppState,
    actor: &Actor,
    id: &str,
) -> Result<PurchaseApplication, ApiError> {
    let application: Option<PurchaseApplication> =
        sqlx::query_as("SELECT * FROM purchase_applications WHERE application_id = ?")
            .bind(id)
            .fetch_optional(&state.db)
            .await?;
    let application =
        application.ok_or_else(|| ApiError::NotFound("Application not found".to_string()))?;

    if let Some(store) = actor.store_filter() {
        let item_store: Option<(String,)> =
            sqlx::query_as("SELECT store_id FROM pet_items WHERE item_id = ?")
                .bind(&application.item_id)
                .fetch_optional(&state.db)
                .await?;
        match item_store {
            Some((s,)) if s == store => {}
            _ => {
                return Err(ApiError::Forbidden(
                    "Application does not belong to your store".to_string(),
                ))
            }
        }
    }
    Ok(application)
}

async fn load_application(state: &AppState, id: &str) -> Result<ApplicationResponse, ApiError> {
    let application: PurchaseApplication =
        sqlx::query_as("SELECT * FROM purchase_applications WHERE application_id = ?")
            .bind(id)
            .fetch_one(&state.db)
            .await?;
    let status_history: Vec<StatusHistoryEntry> = sqlx::query_as(
        "SELECT * FROM application_status_history WHERE application_id = ? ORDER BY id ASC",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;
    Ok(ApplicationResponse {
        application,
        status_history,
    })
}
