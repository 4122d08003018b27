use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Webhook signatures older than this are rejected outright.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("timestamp outside tolerance")]
    StaleTimestamp,
}

/// Payment-provider client: checkout-session creation plus webhook
/// signature verification.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    price_id: String,
    app_url: String,
}

impl StripeClient {
    pub fn new(secret_key: String, price_id: String, app_url: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            price_id,
            app_url,
        }
    }

    /// Creates a subscription checkout session and returns its hosted URL.
    /// The caller's external identity id travels in the session metadata so
    /// the webhook can resolve the user later.
    pub async fn create_checkout_session(
        &self,
        customer_email: &str,
        external_id: &str,
    ) -> Result<String, String> {
        let success_url = format!("{}/payment?success=true", self.app_url);
        let cancel_url = format!("{}/payment?success=false", self.app_url);

        let params = [
            ("mode", "subscription"),
            ("payment_method_types[0]", "card"),
            ("line_items[0][price]", self.price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("metadata[externalId]", external_id),
            ("customer_email", customer_email),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
        ];

        let response = self
            .client
            .post("https://api.stripe.com/v1/checkout/sessions")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| format!("Checkout session request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Checkout session API returned {}: {}", status, body));
        }

        let session: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse checkout session response: {}", e))?;

        session["url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "Checkout session response had no url".to_string())
    }
}

/// Verifies a `t=<unix>,v1=<hex hmac>` signature header against the raw
/// request body. The signed payload is `"{t}.{body}"`.
pub fn verify_webhook_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<String> = Vec::new();

    for part in signature_header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            return Err(WebhookError::MalformedHeader);
        };
        match key.trim() {
            "t" => {
                timestamp = Some(
                    value
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| WebhookError::MalformedHeader)?,
                );
            }
            "v1" => candidates.push(value.trim().to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::StaleTimestamp);
    }

    let expected = sign_payload(payload, secret, timestamp);
    if candidates.iter().any(|c| constant_time_eq(c, &expected)) {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &str = r#"{"type":"checkout.session.completed"}"#;

    #[test]
    fn test_valid_signature_accepted() {
        let now = 1_700_000_000;
        let header = format!("t={},v1={}", now, sign_payload(PAYLOAD, SECRET, now));
        assert_eq!(verify_webhook_signature(PAYLOAD, &header, SECRET, now), Ok(()));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let now = 1_700_000_000;
        let header = format!("t={},v1={}", now, sign_payload(PAYLOAD, SECRET, now));
        let tampered = r#"{"type":"checkout.session.expired"}"#;
        assert_eq!(
            verify_webhook_signature(tampered, &header, SECRET, now),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = 1_700_000_000;
        let header = format!("t={},v1={}", now, sign_payload(PAYLOAD, "whsec_other", now));
        assert_eq!(
            verify_webhook_signature(PAYLOAD, &header, SECRET, now),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let signed_at = 1_700_000_000;
        let header = format!("t={},v1={}", signed_at, sign_payload(PAYLOAD, SECRET, signed_at));
        assert_eq!(
            verify_webhook_signature(PAYLOAD, &header, SECRET, signed_at + SIGNATURE_TOLERANCE_SECS + 1),
            Err(WebhookError::StaleTimestamp)
        );
    }

    #[test]
    fn test_malformed_header_rejected() {
        let now = 1_700_000_000;
        assert_eq!(
            verify_webhook_signature(PAYLOAD, "not-a-signature", SECRET, now),
            Err(WebhookError::MalformedHeader)
        );
        assert_eq!(
            verify_webhook_signature(PAYLOAD, "t=abc,v1=deadbeef", SECRET, now),
            Err(WebhookError::MalformedHeader)
        );
        assert_eq!(
            verify_webhook_signature(PAYLOAD, &format!("t={}", now), SECRET, now),
            Err(WebhookError::MalformedHeader)
        );
    }

    #[test]
    fn test_second_candidate_signature_accepted() {
        let now = 1_700_000_000;
        let header = format!(
            "t={},v1={},v1={}",
            now,
            "0".repeat(64),
            sign_payload(PAYLOAD, SECRET, now)
        );
        assert_eq!(verify_webhook_signature(PAYLOAD, &header, SECRET, now), Ok(()));
    }
}
