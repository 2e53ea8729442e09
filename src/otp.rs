//! OTP Module
//! 受け渡し時の6桁ワンタイムコード。24時間有効、一回限り。

use chrono::{Duration, Utc};
use rand::Rng;

use crate::error::OtpError;

/// OTPの有効期間（秒）
pub const OTP_VALIDITY_SECS: i64 = 24 * 60 * 60;

/// 発行済みOTPの状態（purchase_applications の otp_* カラムに対応）
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub code: String,
    pub generated_at: i64,
    pub expires_at: i64,
}

/// 6桁OTPを生成（[100000, 999999] の一様乱数）
pub fn generate_otp() -> IssuedOtp {
    let code: u32 = rand::thread_rng().gen_range(100_000..=999_999);
    let now = Utc::now();
    IssuedOtp {
        code: code.to_string(),
        generated_at: now.timestamp(),
        expires_at: (now + Duration::seconds(OTP_VALIDITY_SECS)).timestamp(),
    }
}

/// 入力コードを検証する。
/// 期限切れは expires_at を厳密に超えた時点から。コードは文字列完全一致。
pub fn verify_otp(
    stored_code: Option<&str>,
    expires_at: Option<i64>,
    already_verified: bool,
    entered: &str,
    now: i64,
) -> Result<(), OtpError> {
    let stored = match stored_code {
        Some(c) => c,
        None => return Err(OtpError::None),
    };
    if already_verified {
        return Err(OtpError::AlreadyVerified);
    }
    match expires_at {
        Some(exp) if now > exp => return Err(OtpError::Expired),
        None => return Err(OtpError::None),
        _ => {}
    }
    if stored != entered {
        return Err(OtpError::Mismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_otp_is_six_digits() {
        for _ in 0..100 {
            let otp = generate_otp();
            assert_eq!(otp.code.len(), 6);
            let n: u32 = otp.code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
            assert_eq!(otp.expires_at - otp.generated_at, OTP_VALIDITY_SECS);
        }
    }

    #[test]
    fn verify_accepts_exact_code_once() {
        let now = 1_000_000;
        assert!(verify_otp(Some("123456"), Some(now + 100), false, "123456", now).is_ok());
        // 検証済みフラグが立った後は同じコードでも失敗
        assert_eq!(
            verify_otp(Some("123456"), Some(now + 100), true, "123456", now),
            Err(OtpError::AlreadyVerified)
        );
    }

    #[test]
    fn verify_rejects_mismatch() {
        let now = 1_000_000;
        assert_eq!(
            verify_otp(Some("123456"), Some(now + 100), false, "123457", now),
            Err(OtpError::Mismatch)
        );
    }

    #[test]
    fn verify_rejects_expired_even_with_correct_code() {
        let now = 1_000_000;
        // expires_at を厳密に超えた時点で期限切れ
        assert!(verify_otp(Some("123456"), Some(now), false, "123456", now).is_ok());
        assert_eq!(
            verify_otp(Some("123456"), Some(now - 1), false, "123456", now),
            Err(OtpError::Expired)
        );
    }

    #[test]
    fn verify_without_issued_otp_fails() {
        assert_eq!(
            verify_otp(None, None, false, "123456", 0),
            Err(OtpError::None)
        );
    }
}
