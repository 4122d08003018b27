pub mod billing;
pub mod chat;
pub mod codes;
pub mod customers;
pub mod onboarding;
pub mod requests;
pub mod upload;

use axum::{http::StatusCode, response::Json};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::auth::{Claims, ErrorResponse};
use crate::models::user::User;

/// Cursor query string shared by every paginated list endpoint.
#[derive(Debug, Deserialize)]
pub struct CursorQuery {
    pub cursor: Option<Uuid>,
}

/// Resolves the database user behind the authenticated identity. Every
/// handler resolves once and passes the value on; nothing reads ambient
/// session state after this point.
pub(crate) async fn current_user(
    pool: &PgPool,
    claims: &Claims,
) -> Result<User, (StatusCode, Json<ErrorResponse>)> {
    match sqlx::query_as::<_, User>(
        "SELECT id, external_id, firstname, lastname, email, image, role, company_id, created_at, updated_at
         FROM users WHERE external_id = $1",
    )
    .bind(&claims.sub)
    .fetch_optional(pool)
    .await
    {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("User not found in database")),
        )),
        Err(e) => Err(internal_error("resolving current user", e)),
    }
}

pub(crate) fn internal_error(
    context: &str,
    e: impl std::fmt::Display,
) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("Database error {}: {}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error")),
    )
}
