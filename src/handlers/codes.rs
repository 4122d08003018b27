use crate::handlers::{current_user, internal_error, CursorQuery};
use crate::middleware::auth::auth_middleware;
use crate::models::auth::{Claims, ErrorResponse};
use crate::models::code::{Code, CodesResponse};
use crate::services::authz::{role_can, Capability};
use crate::utils::{generate_invitation_code, split_page};
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

const CODES_PAGE_SIZE: usize = 5;

pub fn code_routes() -> Router {
    Router::new()
        .route("/api/seller/codes", get(list_codes))
        .route("/api/seller/codes", post(generate_code))
        .route("/api/seller/codes/:id", delete(delete_code))
        .layer(axum::middleware::from_fn(auth_middleware))
}

async fn generate_code(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Code>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    if !role_can(user.role, Capability::ManageCodes) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(
                "Unauthorized: User does not have permission to generate codes",
            )),
        ));
    }

    // Collisions are ~1/900000 per draw; retry until the value is free.
    let code = loop {
        let candidate = generate_invitation_code();

        let existing = sqlx::query("SELECT id FROM codes WHERE code = $1")
            .bind(&candidate)
            .fetch_optional(&state.db_pool)
            .await
            .map_err(|e| internal_error("checking code uniqueness", e))?;

        if existing.is_none() {
            break candidate;
        }
    };

    let new_code = sqlx::query_as::<_, Code>(
        "INSERT INTO codes (code, company_id) VALUES ($1, $2)
         RETURNING id, code, used, company_id, created_at, updated_at",
    )
    .bind(&code)
    .bind(user.company_id)
    .fetch_one(&state.db_pool)
    .await
    .map_err(|e| internal_error("creating invitation code", e))?;

    Ok(Json(new_code))
}

async fn list_codes(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<CursorQuery>,
) -> Result<Json<CodesResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    if !role_can(user.role, Capability::ManageCodes) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Only sellers can view invitation codes")),
        ));
    }

    let company_id = match user.company_id {
        Some(company_id) => company_id,
        None => {
            return Err((
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new("User does not belong to a company")),
            ));
        }
    };

    let anchor = match query.cursor {
        Some(cursor_id) => {
            let row = sqlx::query("SELECT created_at FROM codes WHERE id = $1")
                .bind(cursor_id)
                .fetch_optional(&state.db_pool)
                .await
                .map_err(|e| internal_error("resolving cursor", e))?;

            match row {
                Some(row) => Some(row.get::<chrono::DateTime<chrono::Utc>, _>("created_at")),
                None => {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        Json(ErrorResponse::new("Invalid cursor")),
                    ));
                }
            }
        }
        None => None,
    };

    let rows = sqlx::query_as::<_, Code>(
        "SELECT id, code, used, company_id, created_at, updated_at
         FROM codes
         WHERE company_id = $1
           AND ($3::uuid IS NULL OR (created_at, id) <= ($2::timestamptz, $3::uuid))
         ORDER BY created_at DESC, id DESC
         LIMIT $4",
    )
    .bind(company_id)
    .bind(anchor)
    .bind(query.cursor)
    .bind((CODES_PAGE_SIZE + 1) as i64)
    .fetch_all(&state.db_pool)
    .await
    .map_err(|e| internal_error("listing invitation codes", e))?;

    let (codes, next_cursor) = split_page(rows, CODES_PAGE_SIZE, |c| c.id);

    Ok(Json(CodesResponse { codes, next_cursor }))
}

async fn delete_code(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(code_id): Path<Uuid>,
) -> Result<Json<Code>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    if !role_can(user.role, Capability::ManageCodes) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Unauthorized: Only sellers can delete codes")),
        ));
    }

    let deleted = sqlx::query_as::<_, Code>(
        "DELETE FROM codes WHERE id = $1
         RETURNING id, code, used, company_id, created_at, updated_at",
    )
    .bind(code_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(|e| internal_error("deleting invitation code", e))?;

    match deleted {
        Some(code) => Ok(Json(code)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Code not found or already deleted")),
        )),
    }
}
