//! 購入申請〜OTP受け渡しの結合テスト

mod common;

use axum::body::Body;
use axum::extract::{FromRequest, Json, Multipart, Path, State};
use axum::http::{header, Request};

use petshop_reserve_api::error::{ApiError, OtpError};
use petshop_reserve_api::handlers::applications::{self, ApplicationDetailResponse};
use petshop_reserve_api::models::{
    application_status, item_status, ApproveApplicationRequest, RejectApplicationRequest,
    ScheduleHandoverRequest, VerifyOtpRequest, VerifyPaymentRequest,
};
use petshop_reserve_api::AppState;

use common::{item_status_of, manager, seed_item, setup_state, sign, user};

const BOUNDARY: &str = "test-boundary-7f9c2e";

fn text_part(name: &str, value: &str) -> String {
    format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
        BOUNDARY, name, value
    )
}

fn file_part(name: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
        BOUNDARY, name, filename
    )
    .into_bytes();
    part.extend_from_slice(bytes);
    part.extend_from_slice(b"\r\n");
    part
}

async fn multipart_from(body: Vec<u8>) -> Multipart {
    let request = Request::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    Multipart::from_request(request, &()).await.unwrap()
}

/// item_id に対する申請の multipart ボディを組み立てて提出する
async fn submit(
    state: &std::sync::Arc<AppState>,
    actor: petshop_reserve_api::auth::Actor,
    item_id: &str,
) -> Result<ApplicationDetailResponse, ApiError> {
    let mut body = Vec::new();
    body.extend_from_slice(text_part("item_id", item_id).as_bytes());
    body.extend_from_slice(text_part("full_name", "Asha Rao").as_bytes());
    body.extend_from_slice(text_part("phone", "9000000001").as_bytes());
    body.extend_from_slice(text_part("purpose", "family pet").as_bytes());
    body.extend_from_slice(&file_part("photo", "me.jpg", b"jpeg-bytes"));
    body.extend_from_slice(&file_part("documents", "id-proof.pdf", b"pdf-bytes"));
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    let multipart = multipart_from(body).await;
    applications::submit_application(State(state.clone()), actor, multipart)
        .await
        .map(|(_, Json(res))| res)
}

async fn otp_code_of(state: &std::sync::Arc<AppState>, application_id: &str) -> Option<String> {
    sqlx::query_scalar("SELECT otp_code FROM purchase_applications WHERE application_id = ?")
        .bind(application_id)
        .fetch_one(&state.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn submit_reserves_item_and_freezes_price() {
    let state = setup_state().await;
    let item_id = seed_item(&state, "store-1", 25_000).await;

    let res = submit(&state, user("user-1"), &item_id).await.unwrap();
    let app = &res.application.application;
    assert_eq!(app.status, application_status::PENDING);
    // 申請時点の価格 25000ルピー = 2500000 paise で確定
    assert_eq!(app.payment_amount, 2_500_000);
    assert_eq!(app.payment_currency, "INR");
    assert_eq!(res.application.status_history.len(), 1);
    assert_eq!(item_status_of(&state, &item_id).await, item_status::RESERVED);

    // 添付ファイルはダイジェスト入りキーで保存される
    let photo_key = app.photo_key.clone().expect("photo key");
    assert!(app.photo_sha256.is_some());
    assert!(state.base_data_dir.join(&photo_key).exists());

    // アイテムが押さえられた後の申請は弾かれ、ファイルも残らない
    let err = submit(&state, user("user-2"), &item_id).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)));
    let saved_dirs = std::fs::read_dir(state.base_data_dir.join("applications"))
        .unwrap()
        .count();
    assert_eq!(saved_dirs, 1);
}

#[tokio::test]
async fn reject_requires_reason_and_releases_item() {
    let state = setup_state().await;
    let item_id = seed_item(&state, "store-1", 25_000).await;
    let mgr = manager("mgr-1", "store-1");

    let res = submit(&state, user("user-1"), &item_id).await.unwrap();
    let aid = res.application.application.application_id.clone();

    // 理由なしの却下は validation エラー
    let err = applications::reject_application(
        State(state.clone()),
        mgr.clone(),
        Path(aid.clone()),
        Json(RejectApplicationRequest {
            rejection_reason: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let Json(rejected) = applications::reject_application(
        State(state.clone()),
        mgr,
        Path(aid),
        Json(RejectApplicationRequest {
            rejection_reason: Some("incomplete documents".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        rejected.application.application.status,
        application_status::REJECTED
    );
    assert_eq!(
        item_status_of(&state, &item_id).await,
        item_status::AVAILABLE_FOR_SALE
    );
}

#[tokio::test]
async fn full_handover_flow_with_otp() {
    let state = setup_state().await;
    let item_id = seed_item(&state, "store-1", 25_000).await;
    let buyer = user("user-1");
    let mgr = manager("mgr-1", "store-1");

    let res = submit(&state, buyer.clone(), &item_id).await.unwrap();
    let aid = res.application.application.application_id.clone();

    // 承認
    let Json(approved) = applications::approve_application(
        State(state.clone()),
        mgr.clone(),
        Path(aid.clone()),
        Json(ApproveApplicationRequest {
            approval_notes: Some("home visit done".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        approved.application.application.status,
        application_status::APPROVED
    );

    // 支払い前のスケジュールは不可
    let err = applications::schedule_handover(
        State(state.clone()),
        mgr.clone(),
        Path(aid.clone()),
        Json(ScheduleHandoverRequest {
            scheduled_date: "2026-09-05".to_string(),
            scheduled_time: "11:00".to_string(),
            location: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)));

    // 決済オーダー → 署名検証で paid
    let Json(order) = applications::create_payment_order(
        State(state.clone()),
        buyer.clone(),
        Path(aid.clone()),
    )
    .await
    .unwrap();
    assert_eq!(order.amount, 2_500_000);

    // 偽署名は拒否され payment_pending のまま
    let err = applications::verify_payment(
        State(state.clone()),
        buyer.clone(),
        Path(aid.clone()),
        Json(VerifyPaymentRequest {
            order_id: order.order_id.clone(),
            payment_id: "pay_app_1".to_string(),
            signature: "deadbeef".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::SignatureInvalid));
    let status: String =
        sqlx::query_scalar("SELECT status FROM purchase_applications WHERE application_id = ?")
            .bind(&aid)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(status, application_status::PAYMENT_PENDING);

    let Json(paid) = applications::verify_payment(
        State(state.clone()),
        buyer.clone(),
        Path(aid.clone()),
        Json(VerifyPaymentRequest {
            order_id: order.order_id.clone(),
            payment_id: "pay_app_1".to_string(),
            signature: sign(&order.order_id, "pay_app_1"),
        }),
    )
    .await
    .unwrap();
    assert_eq!(paid.application.application.status, application_status::PAID);

    // 受け渡しスケジュール確定でOTP発行
    let Json(scheduled) = applications::schedule_handover(
        State(state.clone()),
        mgr.clone(),
        Path(aid.clone()),
        Json(ScheduleHandoverRequest {
            scheduled_date: "2026-09-05".to_string(),
            scheduled_time: "11:00".to_string(),
            location: Some("store-1 front desk".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        scheduled.application.application.status,
        application_status::SCHEDULED
    );
    let code = otp_code_of(&state, &aid).await.expect("otp issued");
    assert_eq!(code.len(), 6);

    // 間違ったコードは mismatch、状態は変わらない
    let err = applications::verify_otp(
        State(state.clone()),
        mgr.clone(),
        Path(aid.clone()),
        Json(VerifyOtpRequest {
            code: "000000".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Otp(OtpError::Mismatch)));
    assert_eq!(item_status_of(&state, &item_id).await, item_status::RESERVED);

    // 正しいコードで受け渡し完了 + 所有権移転
    let Json(done) = applications::verify_otp(
        State(state.clone()),
        mgr.clone(),
        Path(aid.clone()),
        Json(VerifyOtpRequest { code: code.clone() }),
    )
    .await
    .unwrap();
    let app = &done.application.application;
    assert_eq!(app.status, application_status::COMPLETED);
    assert_eq!(app.otp_verified, 1);
    assert!(app.handover_completed_at.is_some());
    assert_eq!(item_status_of(&state, &item_id).await, item_status::SOLD);

    let buyer_id: Option<String> =
        sqlx::query_scalar("SELECT buyer_id FROM pet_items WHERE item_id = ?")
            .bind(&item_id)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(buyer_id.as_deref(), Some("user-1"));

    // 完了後に同じコードを再入力しても already_verified で拒否される
    let err = applications::verify_otp(
        State(state.clone()),
        mgr,
        Path(aid),
        Json(VerifyOtpRequest { code }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Otp(OtpError::AlreadyVerified)));
}

#[tokio::test]
async fn expired_otp_is_rejected_until_regenerated() {
    let state = setup_state().await;
    let item_id = seed_item(&state, "store-1", 25_000).await;
    let buyer = user("user-1");
    let mgr = manager("mgr-1", "store-1");

    let res = submit(&state, buyer.clone(), &item_id).await.unwrap();
    let aid = res.application.application.application_id.clone();

    applications::approve_application(
        State(state.clone()),
        mgr.clone(),
        Path(aid.clone()),
        Json(ApproveApplicationRequest {
            approval_notes: None,
        }),
    )
    .await
    .unwrap();

    let Json(order) = applications::create_payment_order(
        State(state.clone()),
        buyer.clone(),
        Path(aid.clone()),
    )
    .await
    .unwrap();
    applications::verify_payment(
        State(state.clone()),
        buyer,
        Path(aid.clone()),
        Json(VerifyPaymentRequest {
            order_id: order.order_id.clone(),
            payment_id: "pay_app_2".to_string(),
            signature: sign(&order.order_id, "pay_app_2"),
        }),
    )
    .await
    .unwrap();

    applications::schedule_handover(
        State(state.clone()),
        mgr.clone(),
        Path(aid.clone()),
        Json(ScheduleHandoverRequest {
            scheduled_date: "2026-09-05".to_string(),
            scheduled_time: "11:00".to_string(),
            location: None,
        }),
    )
    .await
    .unwrap();
    let code = otp_code_of(&state, &aid).await.unwrap();

    // 有効期限を過去にずらすと正しいコードでも expired
    sqlx::query("UPDATE purchase_applications SET otp_expires_at = ? WHERE application_id = ?")
        .bind(chrono::Utc::now().timestamp() - 10)
        .bind(&aid)
        .execute(&state.db)
        .await
        .unwrap();

    let err = applications::verify_otp(
        State(state.clone()),
        mgr.clone(),
        Path(aid.clone()),
        Json(VerifyOtpRequest { code }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Otp(OtpError::Expired)));

    // 再発行で新しい有効なコードに置き換わる
    applications::regenerate_otp(State(state.clone()), mgr.clone(), Path(aid.clone()))
        .await
        .unwrap();
    let new_code = otp_code_of(&state, &aid).await.unwrap();
    assert_eq!(new_code.len(), 6);

    let Json(done) = applications::verify_otp(
        State(state.clone()),
        mgr,
        Path(aid),
        Json(VerifyOtpRequest { code: new_code }),
    )
    .await
    .unwrap();
    assert_eq!(
        done.application.application.status,
        application_status::COMPLETED
    );
}

#[tokio::test]
async fn user_cancel_releases_item() {
    let state = setup_state().await;
    let item_id = seed_item(&state, "store-1", 25_000).await;

    let res = submit(&state, user("user-1"), &item_id).await.unwrap();
    let aid = res.application.application.application_id.clone();

    let Json(cancelled) = applications::cancel_application(
        State(state.clone()),
        user("user-1"),
        Path(aid),
    )
    .await
    .unwrap();
    assert_eq!(
        cancelled.application.application.status,
        application_status::CANCELLED
    );
    assert_eq!(
        item_status_of(&state, &item_id).await,
        item_status::AVAILABLE_FOR_SALE
    );
}
