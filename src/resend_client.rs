use reqwest::Client;
use serde_json::json;

/// Transactional email client. Only used for the subscription confirmation
/// mail; a failure here is logged and never fails the webhook.
#[derive(Debug, Clone)]
pub struct ResendClient {
    client: Client,
    api_key: String,
    from: String,
}

impl ResendClient {
    pub fn new(api_key: String, from: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            from,
        }
    }

    pub async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), String> {
        let response = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "html": html,
            }))
            .send()
            .await
            .map_err(|e| format!("Email request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Email API returned {}: {}", status, body));
        }

        Ok(())
    }
}
