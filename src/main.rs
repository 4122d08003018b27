use axum::{routing::get, Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

mod db;
mod handlers;
mod middleware;
mod models;
mod openai_client;
mod resend_client;
mod services;
mod stripe_client;
mod utils;

/// Shared application state: the connection pool plus the external-service
/// clients that were configured at startup.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub openai_client: Option<openai_client::OpenAiClient>,
    pub stripe_client: Option<stripe_client::StripeClient>,
    pub stripe_webhook_secret: Option<String>,
    pub resend_client: Option<resend_client::ResendClient>,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    // Uploaded request images live on local disk and are served statically
    if let Err(e) = std::fs::create_dir_all("uploads") {
        tracing::warn!("Failed to create uploads directory: {}", e);
    } else {
        tracing::info!("Uploads directory ready");
    }

    let db_pool = db::create_pool()
        .await
        .expect("Failed to create database pool.");

    // Initialize the chat-completion client if an API key is provided
    let openai_client = match std::env::var("OPENAI_API_KEY").ok() {
        Some(api_key) if !api_key.is_empty() => {
            tracing::info!("Initializing chat completion client (gpt-4o)...");
            Some(openai_client::OpenAiClient::new(api_key))
        }
        _ => {
            tracing::warn!("OPENAI_API_KEY not found. The AI assistant will be disabled.");
            None
        }
    };

    let app_url = std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    // Initialize the payment client if credentials are provided
    let stripe_client = match (
        std::env::var("STRIPE_SECRET_KEY").ok(),
        std::env::var("STRIPE_PRICE_ID").ok(),
    ) {
        (Some(secret_key), Some(price_id)) if !secret_key.is_empty() => {
            tracing::info!("Initializing payment client...");
            Some(stripe_client::StripeClient::new(secret_key, price_id, app_url.clone()))
        }
        _ => {
            tracing::warn!("STRIPE_SECRET_KEY or STRIPE_PRICE_ID not found. Billing will be disabled.");
            None
        }
    };

    let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").ok();
    if stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not found. Subscription webhooks will be rejected.");
    }

    // Initialize the transactional email client if an API key is provided
    let resend_client = match std::env::var("RESEND_API_KEY").ok() {
        Some(api_key) if !api_key.is_empty() => {
            let from = std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "BikePortal <no-reply@bikeportal.example>".to_string());
            tracing::info!("Initializing transactional email client...");
            Some(resend_client::ResendClient::new(api_key, from))
        }
        _ => {
            tracing::warn!("RESEND_API_KEY not found. Confirmation emails will be skipped.");
            None
        }
    };

    let shared_state = Arc::new(AppState {
        db_pool,
        openai_client,
        stripe_client,
        stripe_webhook_secret,
        resend_client,
    });

    let app = Router::new()
        .merge(handlers::onboarding::onboarding_routes())
        .merge(handlers::requests::request_routes())
        .merge(handlers::customers::customer_routes())
        .merge(handlers::codes::code_routes())
        .merge(handlers::chat::chat_routes())
        .merge(handlers::billing::billing_routes())
        .merge(handlers::upload::upload_routes())
        .nest_service("/uploads", ServeDir::new("uploads"))
        .route("/api/status", get(api_status))
        .layer(axum::middleware::from_fn(middleware::logging::request_logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state.clone()));

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());

    // ConnectInfo feeds the per-IP rate limiter
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .unwrap();
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,bike_portal=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,bike_portal=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for production (easier for log aggregation)
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("BikePortal starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) { "development" } else { "production" }
    );

    Ok(())
}

async fn api_status(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::response::Json<serde_json::Value> {
    use serde_json::json;

    let db_status = match sqlx::query("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let ai_status = if state.openai_client.is_some() { "configured" } else { "not_configured" };
    let billing_status = if state.stripe_client.is_some() { "configured" } else { "not_configured" };
    let email_status = if state.resend_client.is_some() { "configured" } else { "not_configured" };

    axum::response::Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": db_status,
            "ai_assistant": ai_status,
            "billing": billing_status,
            "email": email_status
        }
    }))
}
