use crate::handlers::current_user;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::{Claims, ErrorResponse};
use crate::models::billing::CheckoutResponse;
use crate::services::authz::{role_can, Capability};
use crate::stripe_client::verify_webhook_signature;
use crate::AppState;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use std::sync::Arc;

pub fn billing_routes() -> Router {
    let protected = Router::new()
        .route("/api/billing/checkout", post(create_checkout))
        .layer(axum::middleware::from_fn(auth_middleware));

    // Webhook authenticity comes from the signature, not a session
    let public = Router::new().route("/api/stripe/webhook", post(stripe_webhook));

    protected.merge(public)
}

async fn create_checkout(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<CheckoutResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    if !role_can(user.role, Capability::ManageBilling) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Unauthorized")),
        ));
    }

    if user.company_id.is_none() {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Unauthorized")),
        ));
    }

    let client = match &state.stripe_client {
        Some(client) => client,
        None => {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("Billing is not configured")),
            ));
        }
    };

    let url = client
        .create_checkout_session(&user.email, &user.external_id)
        .await
        .map_err(|e| {
            tracing::error!("Checkout session creation failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::new("Failed to create checkout session")),
            )
        })?;

    Ok(Json(CheckoutResponse { url }))
}

/// Subscription-lifecycle webhook. On checkout completion the paying user's
/// plan flips to PRO and a confirmation email goes out; the email is best
/// effort and never fails the webhook.
async fn stripe_webhook(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<&'static str, (StatusCode, &'static str)> {
    let secret = match &state.stripe_webhook_secret {
        Some(secret) => secret,
        None => {
            tracing::error!("Received webhook but STRIPE_WEBHOOK_SECRET is not set");
            return Err((StatusCode::BAD_REQUEST, "Webhook Error"));
        }
    };

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let signature = match signature {
        Some(signature) => signature,
        None => {
            tracing::warn!("Webhook request without a signature header");
            return Err((StatusCode::BAD_REQUEST, "Webhook Error"));
        }
    };

    if let Err(e) = verify_webhook_signature(&body, signature, secret, chrono::Utc::now().timestamp()) {
        tracing::warn!("Webhook signature verification failed: {}", e);
        return Err((StatusCode::BAD_REQUEST, "Webhook Error"));
    }

    let event: serde_json::Value = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Webhook payload is not valid JSON: {}", e);
            return Err((StatusCode::BAD_REQUEST, "Webhook Error"));
        }
    };

    if event["type"] == "checkout.session.completed" {
        let session = &event["data"]["object"];

        let external_id = match session["metadata"]["externalId"].as_str() {
            Some(external_id) => external_id,
            None => {
                tracing::warn!("checkout.session.completed without externalId metadata");
                return Err((StatusCode::BAD_REQUEST, "Webhook Error"));
            }
        };

        let customer_id = session["customer"].as_str();

        let updated = sqlx::query(
            "UPDATE subscriptions SET plan = 'PRO', customer_id = $1, updated_at = NOW()
             FROM users
             WHERE subscriptions.user_id = users.id AND users.external_id = $2",
        )
        .bind(customer_id)
        .bind(external_id)
        .execute(&state.db_pool)
        .await;

        if let Err(e) = updated {
            tracing::error!("Failed to upgrade subscription for {}: {}", external_id, e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Webhook Error"));
        }

        if let Some(email) = session["customer_email"].as_str() {
            if let Some(resend) = &state.resend_client {
                let result = resend
                    .send_email(
                        email,
                        "🎉 Subscription Confirmed!",
                        "<h1>Thanks for subscribing to PRO 🚀</h1>\
                         <p>Your premium features are now active. Enjoy!</p>",
                    )
                    .await;

                if let Err(e) = result {
                    tracing::error!("Failed to send confirmation email: {}", e);
                }
            }
        }

        tracing::info!("Subscription upgraded to PRO for user: {}", external_id);
    }

    Ok("Webhook received")
}
