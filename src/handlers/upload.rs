use crate::handlers::{current_user, internal_error};
use crate::middleware::auth::auth_middleware;
use crate::models::auth::{Claims, ErrorResponse};
use crate::models::request::ImageUploadResponse;
use crate::AppState;
use axum::{
    extract::{multipart::Multipart, DefaultBodyLimit, Extension, Path},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

/// One image per request, half a megabyte at most.
const MAX_IMAGE_BYTES: usize = 512 * 1024;

const UPLOAD_DIR: &str = "uploads";

pub fn upload_routes() -> Router {
    Router::new()
        .route("/api/requests/:id/image", post(upload_request_image))
        .layer(axum::middleware::from_fn(auth_middleware))
        // A little headroom over the image cap for multipart framing
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 16 * 1024))
}

/// Sniffs the image type from its leading bytes; the client-supplied
/// content type is not trusted.
fn image_extension(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("png")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("gif")
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

async fn upload_request_image(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<ImageUploadResponse>, (StatusCode, Json<ErrorResponse>)> {
    let _user = current_user(&state.db_pool, &claims).await?;

    let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM bike_requests WHERE id = $1")
        .bind(request_id)
        .fetch_optional(&state.db_pool)
        .await
        .map_err(|e| internal_error("loading bike request", e))?;

    if exists.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Bike request not found")),
        ));
    }

    let field = multipart
        .next_field()
        .await
        .map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Invalid multipart payload")),
            )
        })?;

    let field = match field {
        Some(field) => field,
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("An image file is required")),
            ));
        }
    };

    let data = field.bytes().await.map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Failed to read uploaded file")),
        )
    })?;

    if data.len() > MAX_IMAGE_BYTES {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Image must be 512KB or smaller")),
        ));
    }

    let extension = match image_extension(&data) {
        Some(extension) => extension,
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Only jpeg, png, webp and gif images are allowed")),
            ));
        }
    };

    if let Err(e) = fs::create_dir_all(UPLOAD_DIR).await {
        tracing::error!("Failed to create upload directory: {}", e);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to store uploaded file")),
        ));
    }

    let stored_name = format!("{}.{}", Uuid::new_v4(), extension);
    let file_path = format!("{}/{}", UPLOAD_DIR, stored_name);

    if let Err(e) = fs::write(&file_path, &data).await {
        tracing::error!("Failed to write uploaded file {}: {}", file_path, e);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to store uploaded file")),
        ));
    }

    let url = format!("/uploads/{}", stored_name);

    // The upload already succeeded; losing the attach write leaves the file
    // reachable by its URL, so the result is still returned to the caller.
    if let Err(e) = sqlx::query("UPDATE bike_requests SET url = $1, updated_at = NOW() WHERE id = $2")
        .bind(&url)
        .bind(request_id)
        .execute(&state.db_pool)
        .await
    {
        tracing::error!("Failed to attach uploaded image to request {}: {}", request_id, e);
    }

    Ok(Json(ImageUploadResponse {
        success: true,
        url,
        size: data.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_sniffing() {
        assert_eq!(image_extension(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), Some("jpg"));
        assert_eq!(
            image_extension(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00]),
            Some("png")
        );
        assert_eq!(image_extension(b"GIF89a......"), Some("gif"));

        let mut webp = Vec::new();
        webp.extend_from_slice(b"RIFF");
        webp.extend_from_slice(&[0x24, 0x00, 0x00, 0x00]);
        webp.extend_from_slice(b"WEBP");
        assert_eq!(image_extension(&webp), Some("webp"));

        assert_eq!(image_extension(b"%PDF-1.4"), None);
        assert_eq!(image_extension(b""), None);
        assert_eq!(image_extension(b"RIFF1234WAVE"), None);
    }

    #[test]
    fn test_size_cap_is_512kb() {
        assert_eq!(MAX_IMAGE_BYTES, 524_288);
    }
}
