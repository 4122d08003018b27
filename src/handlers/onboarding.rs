use crate::handlers::internal_error;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::{Claims, ErrorResponse};
use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSellerPayload {
    pub company_name: String,
    pub company_website: Option<String>,
    pub company_logo: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBuyerPayload {
    pub invitation_code: String,
}

#[derive(Debug, Serialize)]
pub struct OnboardingResponse {
    pub success: bool,
}

pub fn onboarding_routes() -> Router {
    Router::new()
        .route("/api/onboarding/seller", post(create_seller))
        .route("/api/onboarding/buyer", post(create_buyer))
        .layer(axum::middleware::from_fn(auth_middleware))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

async fn already_onboarded(
    pool: &sqlx::PgPool,
    external_id: &str,
) -> Result<bool, (StatusCode, Json<ErrorResponse>)> {
    let existing = sqlx::query("SELECT id FROM users WHERE external_id = $1")
        .bind(external_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| internal_error("checking existing user", e))?;

    Ok(existing.is_some())
}

/// Seller onboarding creates the company, the SELLER user and its default
/// FREE subscription in one transaction.
async fn create_seller(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateSellerPayload>,
) -> Result<Json<OnboardingResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.company_name.trim().is_empty() || payload.company_name.len() > 100 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Company name is required")),
        ));
    }

    let website = non_empty(payload.company_website);
    if let Some(ref website) = website {
        if !is_url(website) {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Invalid website URL")),
            ));
        }
    }

    let logo = non_empty(payload.company_logo);
    if let Some(ref logo) = logo {
        if !is_url(logo) {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Invalid logo URL")),
            ));
        }
    }

    if claims.given_name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("First name is missing from the identity profile")),
        ));
    }

    if already_onboarded(&state.db_pool, &claims.sub).await? {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("User is already onboarded")),
        ));
    }

    let result: Result<(), sqlx::Error> = async {
        let mut tx = state.db_pool.begin().await?;

        let company_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO companies (name, website, logo) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(payload.company_name.trim())
        .bind(&website)
        .bind(&logo)
        .fetch_one(&mut *tx)
        .await?;

        let user_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO users (external_id, firstname, lastname, email, role, company_id)
             VALUES ($1, $2, $3, $4, 'SELLER', $5)
             RETURNING id",
        )
        .bind(&claims.sub)
        .bind(claims.given_name.trim())
        .bind(&claims.family_name)
        .bind(&claims.email)
        .bind(company_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO subscriptions (user_id) VALUES ($1)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }
    .await;

    if let Err(e) = result {
        tracing::error!("Error creating seller: {}", e);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to create seller. Please try again later.")),
        ));
    }

    Ok(Json(OnboardingResponse { success: true }))
}

/// Buyer onboarding redeems an invitation code. The conditional UPDATE on
/// `used` gates the user insert inside the same transaction, so concurrent
/// redemptions of one code cannot both succeed.
async fn create_buyer(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateBuyerPayload>,
) -> Result<Json<OnboardingResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.invitation_code.len() != 6 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invitation code must be 6 characters long")),
        ));
    }

    if claims.given_name.trim().is_empty()
        || claims.family_name.as_deref().map_or(true, |name| name.trim().is_empty())
    {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "First and last name are missing from the identity profile",
            )),
        ));
    }

    if already_onboarded(&state.db_pool, &claims.sub).await? {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("User is already onboarded")),
        ));
    }

    let mut tx = state
        .db_pool
        .begin()
        .await
        .map_err(|e| internal_error("starting redemption", e))?;

    let redeemed = sqlx::query(
        "UPDATE codes SET used = TRUE, updated_at = NOW()
         WHERE code = $1 AND used = FALSE
         RETURNING company_id",
    )
    .bind(&payload.invitation_code)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| internal_error("redeeming invitation code", e))?;

    let company_id: Option<Uuid> = match redeemed {
        Some(row) => row.get("company_id"),
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Invalid invitation code")),
            ));
        }
    };

    let company_id = match company_id {
        Some(company_id) => company_id,
        None => {
            tracing::error!(
                "Invitation code {} has no company attached",
                payload.invitation_code
            );
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to create buyer. Please try again later.")),
            ));
        }
    };

    let inserted = sqlx::query(
        "INSERT INTO users (external_id, firstname, lastname, email, role, company_id)
         VALUES ($1, $2, $3, $4, 'BUYER', $5)",
    )
    .bind(&claims.sub)
    .bind(claims.given_name.trim())
    .bind(&claims.family_name)
    .bind(&claims.email)
    .bind(company_id)
    .execute(&mut *tx)
    .await;

    if let Err(e) = inserted {
        tracing::error!("Error creating buyer: {}", e);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to create buyer. Please try again later.")),
        ));
    }

    tx.commit()
        .await
        .map_err(|e| internal_error("committing redemption", e))?;

    Ok(Json(OnboardingResponse { success: true }))
}
