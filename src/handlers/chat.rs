use crate::handlers::{current_user, internal_error};
use crate::middleware::auth::auth_middleware;
use crate::middleware::rate_limit::{ai_rate_limit_middleware, shield_middleware};
use crate::models::auth::{Claims, ErrorResponse};
use crate::models::billing::{Subscription, SubscriptionPlan};
use crate::models::chat::{
    AiMessageResponse, Conversation, ConversationResponse, Message, MessageRole,
    SendMessagePayload,
};
use crate::openai_client::ChatMessage;
use crate::services::authz::{role_can, Capability};
use crate::services::company_snapshot::{build_system_prompt, load_company_snapshot};
use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Chat context window: the last messages sent to the completion API.
const HISTORY_LIMIT: i64 = 10;

pub fn chat_routes() -> Router {
    let ai = Router::new()
        .route("/api/ai", post(send_message))
        .layer(axum::middleware::from_fn(ai_rate_limit_middleware))
        .layer(axum::middleware::from_fn(shield_middleware));

    let conversation = Router::new().route("/api/ai/conversation", get(get_conversation));

    ai.merge(conversation)
        .layer(axum::middleware::from_fn(auth_middleware))
}

/// Lazily creates the caller's (company, seller) conversation on first
/// visit and returns it with its full message history.
async fn get_conversation(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConversationResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    if !role_can(user.role, Capability::UseAssistant) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Only sellers can talk to the AI")),
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

    let conversation_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO conversations (company_id, seller_id) VALUES ($1, $2)
         ON CONFLICT (company_id, seller_id) DO UPDATE SET updated_at = NOW()
         RETURNING id",
    )
    .bind(company_id)
    .bind(user.id)
    .fetch_one(&state.db_pool)
    .await
    .map_err(|e| internal_error("loading conversation", e))?;

    let messages = sqlx::query_as::<_, Message>(
        "SELECT id, conversation_id, content, role, created_at
         FROM messages WHERE conversation_id = $1
         ORDER BY created_at ASC",
    )
    .bind(conversation_id)
    .fetch_all(&state.db_pool)
    .await
    .map_err(|e| internal_error("loading conversation messages", e))?;

    Ok(Json(ConversationResponse {
        id: conversation_id,
        messages,
    }))
}

async fn send_message(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<Json<AiMessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.content.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Message content cannot be empty")),
        ));
    }

    let user = current_user(&state.db_pool, &claims).await?;

    if !role_can(user.role, Capability::UseAssistant) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Only sellers can talk to the AI")),
        ));
    }

    let subscription = sqlx::query_as::<_, Subscription>(
        "SELECT id, user_id, plan, customer_id, created_at, updated_at
         FROM subscriptions WHERE user_id = $1",
    )
    .bind(user.id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(|e| internal_error("loading subscription", e))?;

    if subscription.map(|s| s.plan) == Some(SubscriptionPlan::Free) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Upgrade your plan to use the AI chatbot")),
        ));
    }

    let conversation = sqlx::query_as::<_, Conversation>(
        "SELECT id, company_id, seller_id, created_at, updated_at
         FROM conversations WHERE id = $1",
    )
    .bind(payload.conversation_id)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(|e| internal_error("loading conversation", e))?;

    let conversation = match conversation {
        Some(conversation) => conversation,
        None => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Conversation not found")),
            ));
        }
    };

    if conversation.seller_id != user.id {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("You are not authorized to use this conversation")),
        ));
    }

    let history = sqlx::query_as::<_, Message>(
        "SELECT id, conversation_id, content, role, created_at
         FROM messages WHERE conversation_id = $1
         ORDER BY created_at ASC
         LIMIT $2",
    )
    .bind(conversation.id)
    .bind(HISTORY_LIMIT)
    .fetch_all(&state.db_pool)
    .await
    .map_err(|e| internal_error("loading conversation history", e))?;

    // Snapshot is rebuilt from scratch on every turn; rosters are small.
    let snapshot = load_company_snapshot(&state.db_pool, conversation.company_id)
        .await
        .map_err(|e| internal_error("loading company snapshot", e))?;

    let snapshot = match snapshot {
        Some(snapshot) => snapshot,
        None => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Company data not found")),
            ));
        }
    };

    sqlx::query("INSERT INTO messages (conversation_id, content, role) VALUES ($1, $2, 'USER')")
        .bind(conversation.id)
        .bind(payload.content.trim())
        .execute(&state.db_pool)
        .await
        .map_err(|e| internal_error("saving user message", e))?;

    let client = match &state.openai_client {
        Some(client) => client,
        None => {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("The AI assistant is not configured")),
            ));
        }
    };

    let mut prompt_messages = Vec::with_capacity(history.len() + 2);
    prompt_messages.push(ChatMessage::new("system", build_system_prompt(&snapshot)));
    for message in &history {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Ai => "assistant",
        };
        prompt_messages.push(ChatMessage::new(role, message.content.clone()));
    }
    prompt_messages.push(ChatMessage::new("user", payload.content.trim()));

    let ai_content = match client.chat_completion(&prompt_messages).await {
        Ok(content) => content.unwrap_or_else(|| "Sorry, I couldn't understand that.".to_string()),
        Err(e) => {
            tracing::error!("Chat completion failed: {}", e);
            return Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::new("Failed to generate AI response")),
            ));
        }
    };

    let ai_message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages (conversation_id, content, role) VALUES ($1, $2, 'AI')
         RETURNING id, conversation_id, content, role, created_at",
    )
    .bind(conversation.id)
    .bind(&ai_content)
    .fetch_one(&state.db_pool)
    .await
    .map_err(|e| internal_error("saving AI message", e))?;

    Ok(Json(AiMessageResponse {
        id: ai_message.id,
        content: ai_message.content,
        sender: ai_message.role,
        timestamp: ai_message.created_at,
    }))
}
