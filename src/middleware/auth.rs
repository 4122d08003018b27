use crate::models::auth::{Claims, ErrorResponse};
use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, DecodingKey, Validation};

/// Verifies a token minted by the external identity provider and returns
/// its claims. Expiry is checked by the default validation.
pub fn verify_identity_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret =
        std::env::var("IDENTITY_JWT_SECRET").unwrap_or_else(|_| "default_secret".to_string());

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(data.claims)
}

pub async fn auth_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, impl IntoResponse> {
    let auth_header = match headers.get("Authorization") {
        Some(header) => header,
        None => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Missing Authorization header")),
            ));
        }
    };

    let auth_str = match auth_header.to_str() {
        Ok(value) => value,
        Err(_) => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Invalid Authorization header format")),
            ));
        }
    };

    let token = match auth_str.strip_prefix("Bearer ") {
        Some(token) => token,
        None => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "Invalid Authorization header format. Expected 'Bearer <token>'",
                )),
            ));
        }
    };

    let claims = match verify_identity_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("Identity token verification failed: {}", e);
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Invalid or expired token")),
            ));
        }
    };

    // Handlers read the authenticated identity from request extensions and
    // resolve the database user from it explicitly.
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
