use crate::handlers::{current_user, internal_error, CursorQuery};
use crate::middleware::auth::auth_middleware;
use crate::models::auth::{Claims, ErrorResponse};
use crate::models::company::Company;
use crate::models::request::{
    BikeRequest, BikeRequestDetail, BikeRequestListItem, BikeRequestsResponse, BikeStatus,
    CreateBikeRequestPayload, CreateBikeRequestResponse, DecideRequestPayload,
    DecideRequestResponse,
};
use crate::models::user::{User, UserRole, UserSummary, UserWithCompany};
use crate::services::authz::{role_can, Capability};
use crate::utils::split_page;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

const BUYER_PAGE_SIZE: usize = 4;
const SELLER_PAGE_SIZE: usize = 5;

pub fn request_routes() -> Router {
    Router::new()
        .route("/api/requests", post(create_request))
        .route("/api/requests/:id", get(get_request))
        .route("/api/requests/:id/status", patch(decide_request))
        .route("/api/buyer/requests", get(list_buyer_requests))
        .route("/api/seller/requests", get(list_seller_requests))
        .layer(axum::middleware::from_fn(auth_middleware))
}

async fn create_request(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateBikeRequestPayload>,
) -> Result<Json<CreateBikeRequestResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.bike_model.trim().is_empty() || payload.reason.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Bike model and reason are required")),
        ));
    }

    let user = current_user(&state.db_pool, &claims).await?;

    if !role_can(user.role, Capability::CreateRequest) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("You are not allowed to create bike requests")),
        ));
    }

    let seller_role = sqlx::query_scalar::<_, UserRole>("SELECT role FROM users WHERE id = $1")
        .bind(payload.seller_id)
        .fetch_optional(&state.db_pool)
        .await
        .map_err(|e| internal_error("looking up seller", e))?;

    let seller_role = match seller_role {
        Some(role) => role,
        None => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Seller not found in database")),
            ));
        }
    };

    if seller_role != UserRole::Seller {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Selected user is not a seller")),
        ));
    }

    // Requests may target any seller; company membership is only enforced
    // when the request is decided.
    let bike_request = sqlx::query_as::<_, BikeRequest>(
        "INSERT INTO bike_requests (bike_model, reason, url, buyer_id, seller_id)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, bike_model, reason, notes, url, status, buyer_id, seller_id, decided_by, created_at, updated_at",
    )
    .bind(&payload.bike_model)
    .bind(&payload.reason)
    .bind(&payload.url)
    .bind(user.id)
    .bind(payload.seller_id)
    .fetch_one(&state.db_pool)
    .await
    .map_err(|e| internal_error("creating bike request", e))?;

    Ok(Json(CreateBikeRequestResponse {
        success: true,
        bike_request,
    }))
}

async fn decide_request(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<DecideRequestPayload>,
) -> Result<Json<DecideRequestResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.status == BikeStatus::Pending {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Status must be APPROVED or REJECTED")),
        ));
    }

    let user = current_user(&state.db_pool, &claims).await?;

    if !role_can(user.role, Capability::DecideRequest) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Only sellers can decide bike requests")),
        ));
    }

    let buyer_company = sqlx::query(
        "SELECT b.company_id FROM bike_requests r
         JOIN users b ON b.id = r.buyer_id
         WHERE r.id = $1",
    )
    .bind(request_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(|e| internal_error("loading bike request", e))?;

    let buyer_company: Option<Uuid> = match buyer_company {
        Some(row) => row.get("company_id"),
        None => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Bike request not found in database")),
            ));
        }
    };

    if user.company_id.is_none() || buyer_company != user.company_id {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("You are not authorized to update this request")),
        ));
    }

    // Decisions are terminal: the conditional update loses the race against
    // a concurrent decision and against re-decides, and keeps seller_id as
    // the original addressee while decided_by records who acted.
    let updated = sqlx::query_as::<_, BikeRequest>(
        "UPDATE bike_requests
         SET status = $1, notes = $2, decided_by = $3, updated_at = NOW()
         WHERE id = $4 AND status = 'PENDING'
         RETURNING id, bike_model, reason, notes, url, status, buyer_id, seller_id, decided_by, created_at, updated_at",
    )
    .bind(payload.status)
    .bind(&payload.notes)
    .bind(user.id)
    .bind(request_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(|e| internal_error("updating bike request", e))?;

    let request = match updated {
        Some(request) => request,
        None => {
            return Err((
                StatusCode::CONFLICT,
                Json(ErrorResponse::new("Request has already been decided")),
            ));
        }
    };

    Ok(Json(DecideRequestResponse {
        success: true,
        message: format!("Request {} successfully!", payload.status),
        request,
    }))
}

async fn list_buyer_requests(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<CursorQuery>,
) -> Result<Json<BikeRequestsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;
    list_requests_for(&state.db_pool, BUYER_LIST_SQL, user.id, query.cursor, BUYER_PAGE_SIZE).await
}

async fn list_seller_requests(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<CursorQuery>,
) -> Result<Json<BikeRequestsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;
    list_requests_for(&state.db_pool, SELLER_LIST_SQL, user.id, query.cursor, SELLER_PAGE_SIZE).await
}

const BUYER_LIST_SQL: &str = "
    SELECT r.id, r.bike_model, r.reason, r.notes, r.url, r.status, r.buyer_id, r.seller_id, r.decided_by,
           r.created_at, r.updated_at,
           b.id AS buyer_row_id, b.external_id AS buyer_external_id, b.firstname AS buyer_firstname,
           b.lastname AS buyer_lastname, b.email AS buyer_email, b.image AS buyer_image,
           b.role AS buyer_role, b.company_id AS buyer_company_id,
           b.created_at AS buyer_created_at, b.updated_at AS buyer_updated_at,
           c.id AS company_row_id, c.name AS company_name, c.website AS company_website,
           c.logo AS company_logo, c.created_at AS company_created_at, c.updated_at AS company_updated_at,
           s.firstname AS seller_firstname, s.lastname AS seller_lastname, s.email AS seller_email
    FROM bike_requests r
    JOIN users b ON b.id = r.buyer_id
    LEFT JOIN companies c ON c.id = b.company_id
    JOIN users s ON s.id = r.seller_id
    WHERE r.buyer_id = $1
      AND ($3::uuid IS NULL OR (r.created_at, r.id) <= ($2::timestamptz, $3::uuid))
    ORDER BY r.created_at DESC, r.id DESC
    LIMIT $4";

const SELLER_LIST_SQL: &str = "
    SELECT r.id, r.bike_model, r.reason, r.notes, r.url, r.status, r.buyer_id, r.seller_id, r.decided_by,
           r.created_at, r.updated_at,
           b.id AS buyer_row_id, b.external_id AS buyer_external_id, b.firstname AS buyer_firstname,
           b.lastname AS buyer_lastname, b.email AS buyer_email, b.image AS buyer_image,
           b.role AS buyer_role, b.company_id AS buyer_company_id,
           b.created_at AS buyer_created_at, b.updated_at AS buyer_updated_at,
           c.id AS company_row_id, c.name AS company_name, c.website AS company_website,
           c.logo AS company_logo, c.created_at AS company_created_at, c.updated_at AS company_updated_at,
           s.firstname AS seller_firstname, s.lastname AS seller_lastname, s.email AS seller_email
    FROM bike_requests r
    JOIN users b ON b.id = r.buyer_id
    LEFT JOIN companies c ON c.id = b.company_id
    JOIN users s ON s.id = r.seller_id
    WHERE r.seller_id = $1
      AND ($3::uuid IS NULL OR (r.created_at, r.id) <= ($2::timestamptz, $3::uuid))
    ORDER BY r.created_at DESC, r.id DESC
    LIMIT $4";

/// Keyset page over one party's requests. The cursor is the id of the first
/// row of the requested page; its creation time anchors the window so pages
/// stay contiguous while new requests arrive at the head.
async fn list_requests_for(
    pool: &PgPool,
    sql: &str,
    party_id: Uuid,
    cursor: Option<Uuid>,
    page_size: usize,
) -> Result<Json<BikeRequestsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let anchor = match cursor {
        Some(cursor_id) => {
            let row = sqlx::query("SELECT created_at FROM bike_requests WHERE id = $1")
                .bind(cursor_id)
                .fetch_optional(pool)
                .await
                .map_err(|e| internal_error("resolving cursor", e))?;

            match row {
                Some(row) => Some((row.get::<chrono::DateTime<chrono::Utc>, _>("created_at"), cursor_id)),
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

    let rows = sqlx::query(sql)
        .bind(party_id)
        .bind(anchor.map(|a| a.0))
        .bind(anchor.map(|a| a.1))
        .bind((page_size + 1) as i64)
        .fetch_all(pool)
        .await
        .map_err(|e| internal_error("listing bike requests", e))?;

    let items: Vec<BikeRequestListItem> = rows.iter().map(map_request_row).collect();
    let (bike_requests, next_cursor) = split_page(items, page_size, |item| item.request.id);

    Ok(Json(BikeRequestsResponse {
        bike_requests,
        next_cursor,
    }))
}

async fn get_request(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<BikeRequestDetail>, (StatusCode, Json<ErrorResponse>)> {
    let _user = current_user(&state.db_pool, &claims).await?;

    let row = sqlx::query(
        "SELECT r.id, r.bike_model, r.reason, r.notes, r.url, r.status, r.buyer_id, r.seller_id, r.decided_by,
                r.created_at, r.updated_at,
                b.id AS buyer_row_id, b.external_id AS buyer_external_id, b.firstname AS buyer_firstname,
                b.lastname AS buyer_lastname, b.email AS buyer_email, b.image AS buyer_image,
                b.role AS buyer_role, b.company_id AS buyer_company_id,
                b.created_at AS buyer_created_at, b.updated_at AS buyer_updated_at,
                c.id AS company_row_id, c.name AS company_name, c.website AS company_website,
                c.logo AS company_logo, c.created_at AS company_created_at, c.updated_at AS company_updated_at,
                s.id AS seller_row_id, s.external_id AS seller_external_id, s.firstname AS seller_firstname,
                s.lastname AS seller_lastname, s.email AS seller_email, s.image AS seller_image,
                s.role AS seller_role, s.company_id AS seller_company_id,
                s.created_at AS seller_created_at, s.updated_at AS seller_updated_at
         FROM bike_requests r
         JOIN users b ON b.id = r.buyer_id
         LEFT JOIN companies c ON c.id = b.company_id
         JOIN users s ON s.id = r.seller_id
         WHERE r.id = $1",
    )
    .bind(request_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(|e| internal_error("loading bike request", e))?;

    let row = match row {
        Some(row) => row,
        None => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Bike request not found")),
            ));
        }
    };

    let detail = BikeRequestDetail {
        request: map_request_fields(&row),
        buyer: map_buyer(&row),
        seller: User {
            id: row.get("seller_row_id"),
            external_id: row.get("seller_external_id"),
            firstname: row.get("seller_firstname"),
            lastname: row.get("seller_lastname"),
            email: row.get("seller_email"),
            image: row.get("seller_image"),
            role: row.get("seller_role"),
            company_id: row.get("seller_company_id"),
            created_at: row.get("seller_created_at"),
            updated_at: row.get("seller_updated_at"),
        },
    };

    Ok(Json(detail))
}

fn map_request_fields(row: &PgRow) -> BikeRequest {
    BikeRequest {
        id: row.get("id"),
        bike_model: row.get("bike_model"),
        reason: row.get("reason"),
        notes: row.get("notes"),
        url: row.get("url"),
        status: row.get("status"),
        buyer_id: row.get("buyer_id"),
        seller_id: row.get("seller_id"),
        decided_by: row.get("decided_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn map_buyer(row: &PgRow) -> UserWithCompany {
    let company = row
        .get::<Option<Uuid>, _>("company_row_id")
        .map(|company_id| Company {
            id: company_id,
            name: row.get("company_name"),
            website: row.get("company_website"),
            logo: row.get("company_logo"),
            created_at: row.get("company_created_at"),
            updated_at: row.get("company_updated_at"),
        });

    UserWithCompany {
        user: User {
            id: row.get("buyer_row_id"),
            external_id: row.get("buyer_external_id"),
            firstname: row.get("buyer_firstname"),
            lastname: row.get("buyer_lastname"),
            email: row.get("buyer_email"),
            image: row.get("buyer_image"),
            role: row.get("buyer_role"),
            company_id: row.get("buyer_company_id"),
            created_at: row.get("buyer_created_at"),
            updated_at: row.get("buyer_updated_at"),
        },
        company,
    }
}

fn map_request_row(row: &PgRow) -> BikeRequestListItem {
    BikeRequestListItem {
        request: map_request_fields(row),
        buyer: map_buyer(row),
        seller: UserSummary {
            firstname: row.get("seller_firstname"),
            lastname: row.get("seller_lastname"),
            email: row.get("seller_email"),
        },
    }
}
