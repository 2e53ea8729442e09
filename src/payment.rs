//! Payment Gateway Adapter
//! オーダー作成と署名付きコールバックの検証。
//! 署名は HMAC-SHA256(secret, "order_id|payment_id") の hex ダイジェスト。

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// ゲートウェイ側で作成されたオーダー
#[derive(Debug, Clone)]
pub struct GatewayOrder {
    pub order_id: String,
    pub amount: i64, // 最小通貨単位（paise）
    pub currency: String,
}

/// 決済ゲートウェイのインターフェース
pub trait PaymentGateway: Send + Sync {
    fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> anyhow::Result<GatewayOrder>;
}

/// サンドボックスゲートウェイ。
/// ネットワークを使わずローカルでオーダーIDを払い出す。
/// 署名検証の契約（HMAC-SHA256）は本番と同一。
pub struct SandboxGateway;

impl PaymentGateway for SandboxGateway {
    fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        _receipt: &str,
    ) -> anyhow::Result<GatewayOrder> {
        if amount_minor <= 0 {
            anyhow::bail!("order amount must be positive: {}", amount_minor);
        }
        let random_bytes: [u8; 8] = rand::thread_rng().gen();
        let encoded = base32::encode(base32::Alphabet::Crockford, &random_bytes);
        Ok(GatewayOrder {
            order_id: format!("order_{}", &encoded[..12]),
            amount: amount_minor,
            currency: currency.to_string(),
        })
    }
}

/// コールバック署名を検証する。
/// 期待値は HMAC-SHA256(secret, "order_id|payment_id") の hex、バイト単位で完全一致。
pub fn verify_signature(order_id: &str, payment_id: &str, signature: &str, secret: &str) -> bool {
    expected_signature(order_id, payment_id, secret) == signature
}

fn expected_signature(order_id: &str, payment_id: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_order_has_prefixed_id() {
        let order = SandboxGateway
            .create_order(50_000, "INR", "rcpt_1")
            .unwrap();
        assert!(order.order_id.starts_with("order_"));
        assert_eq!(order.amount, 50_000);
        assert_eq!(order.currency, "INR");
    }

    #[test]
    fn sandbox_rejects_non_positive_amount() {
        assert!(SandboxGateway.create_order(0, "INR", "rcpt_1").is_err());
        assert!(SandboxGateway.create_order(-100, "INR", "rcpt_1").is_err());
    }

    #[test]
    fn only_exact_hmac_hex_is_accepted() {
        let sig = expected_signature("order_abc", "pay_xyz", "secret");
        assert!(verify_signature("order_abc", "pay_xyz", &sig, "secret"));

        // 1文字変えただけで必ず失敗する
        for i in 0..sig.len() {
            let mut mutated: Vec<char> = sig.chars().collect();
            mutated[i] = if mutated[i] == '0' { '1' } else { '0' };
            let mutated: String = mutated.into_iter().collect();
            assert!(!verify_signature("order_abc", "pay_xyz", &mutated, "secret"));
        }
    }

    #[test]
    fn signature_binds_order_and_payment_ids() {
        let sig = expected_signature("order_abc", "pay_xyz", "secret");
        assert!(!verify_signature("order_abd", "pay_xyz", &sig, "secret"));
        assert!(!verify_signature("order_abc", "pay_xyw", &sig, "secret"));
        assert!(!verify_signature("order_abc", "pay_xyz", &sig, "other"));
    }
}
