use crate::handlers::{current_user, internal_error, CursorQuery};
use crate::middleware::auth::auth_middleware;
use crate::models::auth::{Claims, ErrorResponse};
use crate::models::user::{User, UsersResponse};
use crate::services::authz::{role_can, Capability};
use crate::utils::split_page;
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use sqlx::Row;
use std::sync::Arc;

const CUSTOMER_PAGE_SIZE: usize = 3;

pub fn customer_routes() -> Router {
    Router::new()
        .route("/api/seller/customers", get(list_customers))
        .route("/api/sellers", get(list_company_sellers))
        .layer(axum::middleware::from_fn(auth_middleware))
}

/// BUYER roster of the caller's company, surname ascending. Surnames are
/// optional, so the sort key coalesces them to the empty string and breaks
/// ties on id to keep the keyset stable.
async fn list_customers(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<CursorQuery>,
) -> Result<Json<UsersResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    if !role_can(user.role, Capability::ViewCustomers) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Only sellers can view company customers")),
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

    let anchor_lastname = match query.cursor {
        Some(cursor_id) => {
            let row = sqlx::query("SELECT lastname FROM users WHERE id = $1")
                .bind(cursor_id)
                .fetch_optional(&state.db_pool)
                .await
                .map_err(|e| internal_error("resolving cursor", e))?;

            match row {
                Some(row) => row.get::<Option<String>, _>("lastname"),
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

    let rows = sqlx::query_as::<_, User>(
        "SELECT id, external_id, firstname, lastname, email, image, role, company_id, created_at, updated_at
         FROM users
         WHERE company_id = $1 AND role = 'BUYER'
           AND ($3::uuid IS NULL OR (COALESCE(lastname, ''), id) >= (COALESCE($2::varchar, ''), $3::uuid))
         ORDER BY COALESCE(lastname, '') ASC, id ASC
         LIMIT $4",
    )
    .bind(company_id)
    .bind(anchor_lastname)
    .bind(query.cursor)
    .bind((CUSTOMER_PAGE_SIZE + 1) as i64)
    .fetch_all(&state.db_pool)
    .await
    .map_err(|e| internal_error("listing customers", e))?;

    let (users, next_cursor) = split_page(rows, CUSTOMER_PAGE_SIZE, |u| u.id);

    Ok(Json(UsersResponse { users, next_cursor }))
}

/// SELLER directory of the caller's company; feeds the new-request form.
async fn list_company_sellers(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    let company_id = match user.company_id {
        Some(company_id) => company_id,
        None => {
            return Err((
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new("User does not belong to a company")),
            ));
        }
    };

    let sellers = sqlx::query_as::<_, User>(
        "SELECT id, external_id, firstname, lastname, email, image, role, company_id, created_at, updated_at
         FROM users
         WHERE company_id = $1 AND role = 'SELLER'
         ORDER BY COALESCE(lastname, '') ASC, id ASC",
    )
    .bind(company_id)
    .fetch_all(&state.db_pool)
    .await
    .map_err(|e| internal_error("listing company sellers", e))?;

    Ok(Json(json!({ "sellers": sellers })))
}
