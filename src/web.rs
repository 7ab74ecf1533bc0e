use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::db::{ConversationStatus, SenderRole};
use crate::error::LeadBoxError;
use crate::runtime::AppState;

// --- Webhook query params for verification ---

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    #[serde(rename = "hub.mode", default)]
    hub_mode: Option<String>,
    #[serde(rename = "hub.verify_token", default)]
    hub_verify_token: Option<String>,
    #[serde(rename = "hub.challenge", default)]
    hub_challenge: Option<String>,
}

// --- Messenger webhook payload types ---

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    object: Option<String>,
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Deserialize)]
struct MessagingEvent {
    sender: Option<EventSender>,
    message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
struct EventSender {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(default)]
    mid: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

// --- Webhook verification (GET /webhook) ---

async fn verify_webhook(
    Query(params): Query<WebhookQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if params.hub_mode.as_deref() == Some("subscribe")
        && !state.config.verify_token.is_empty()
        && params.hub_verify_token.as_deref() == Some(&state.config.verify_token)
    {
        if let Some(challenge) = params.hub_challenge {
            info!("Webhook verified");
            return (StatusCode::OK, challenge);
        }
    }
    (StatusCode::FORBIDDEN, "Forbidden".to_string())
}

// --- Incoming messages (POST /webhook) ---

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> impl IntoResponse {
    if payload.object.as_deref() != Some("page") {
        return (StatusCode::NOT_FOUND, "Not a page event");
    }

    // Storage only; drafting never runs inline with a delivery.
    for entry in &payload.entry {
        for event in &entry.messaging {
            let (Some(sender), Some(message)) = (&event.sender, &event.message) else {
                continue;
            };
            let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
            else {
                continue;
            };
            if let Err(e) = ingest_webhook_message(&state, &sender.id, message.mid.as_deref(), text)
            {
                error!("Webhook: failed to store message from {}: {e}", sender.id);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        }
    }

    (StatusCode::OK, "EVENT_RECEIVED")
}

fn ingest_webhook_message(
    state: &AppState,
    psid: &str,
    mid: Option<&str>,
    text: &str,
) -> Result<(), LeadBoxError> {
    let now = Utc::now().to_rfc3339();
    let conversation_id = state.db.upsert_conversation_from_webhook(psid, text, &now)?;
    match mid {
        Some(mid) => {
            state
                .db
                .upsert_remote_message(&conversation_id, mid, text, SenderRole::User, &now)?
        }
        None => {
            state
                .db
                .insert_local_message(&conversation_id, text, SenderRole::User, &now)?;
        }
    }
    info!(
        "Webhook: stored message from {psid}: {}",
        text.chars().take(100).collect::<String>()
    );
    Ok(())
}

// --- Error mapping ---

fn error_response(e: &LeadBoxError) -> Response {
    let status = match e {
        LeadBoxError::MissingAccessToken | LeadBoxError::Config(_) => StatusCode::BAD_REQUEST,
        LeadBoxError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LeadBoxError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        LeadBoxError::GraphApi(_) | LeadBoxError::TextGen(_) | LeadBoxError::Http(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "error": e.to_string(), "code": e.code() })),
    )
        .into_response()
}

// --- Sync trigger (POST /api/sync) ---

async fn trigger_sync(State(state): State<Arc<AppState>>) -> Response {
    match crate::sync::run_sync(&state).await {
        Ok(report) => Json(json!({
            "success": true,
            "count": report.conversations_synced,
            "skipped": report.threads_skipped,
            "pages_fetched": report.pages_fetched,
            "page_error": report.page_error,
            "thread_errors": report.thread_errors,
            "message": format!("Synced {} conversations.", report.conversations_synced),
        }))
        .into_response(),
        Err(e) => {
            error!("Sync failed: {e}");
            error_response(&e)
        }
    }
}

// --- Scheduled follow-up trigger (POST /api/followup/run) ---

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get("authorization")?.to_str().ok()?.trim();
    let mut parts = raw.splitn(2, char::is_whitespace);
    let scheme = parts.next()?.trim();
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    parts.next().map(str::trim).filter(|t| !t.is_empty())
}

async fn trigger_followups(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let secret = state.config.followup_secret.as_str();
    if secret.is_empty() || bearer_token(&headers) != Some(secret) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    match crate::followup::run_followups(&state, Utc::now()).await {
        Ok(report) => Json(json!({
            "success": true,
            "scanned": report.scanned,
            "processed": report.drafted,
            "failures": report.failures,
        }))
        .into_response(),
        Err(e) => {
            error!("Follow-up run failed: {e}");
            error_response(&e)
        }
    }
}

// --- Conversation reads + operator send ---

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    status: Option<String>,
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Response {
    let status = match params.status.as_deref() {
        Some(raw) => match ConversationStatus::parse(raw) {
            Some(s) => Some(s),
            None => {
                return error_response(&LeadBoxError::InvalidInput(format!(
                    "unknown status: {raw}"
                )))
            }
        },
        None => None,
    };

    match state.db.list_conversations(status) {
        Ok(conversations) => Json(json!({ "conversations": conversations })).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Response {
    match state.db.get_conversation(&conversation_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(&LeadBoxError::ConversationNotFound(conversation_id));
        }
        Err(e) => return error_response(&e),
    }

    match state.db.get_all_messages(&conversation_id) {
        Ok(messages) => {
            // Listing a conversation counts as reading it.
            let _ = state.db.mark_conversation_read(&conversation_id);
            Json(json!({ "messages": messages })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct SendBody {
    text: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(body): Json<SendBody>,
) -> Response {
    match crate::send::send_operator_message(&state, &conversation_id, &body.text).await {
        Ok(message_id) => {
            Json(json!({ "success": true, "message_id": message_id })).into_response()
        }
        Err(e) => {
            error!("Send to {conversation_id} failed: {e}");
            error_response(&e)
        }
    }
}

async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

// --- Router / server ---

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", get(verify_webhook).post(handle_webhook))
        .route("/api/health", get(health))
        .route("/api/sync", post(trigger_sync))
        .route("/api/followup/run", post(trigger_followups))
        .route("/api/conversations", get(list_conversations))
        .route(
            "/api/conversations/:id/messages",
            get(list_messages).post(send_message),
        )
        .with_state(state)
}

pub async fn start_web_server(state: Arc<AppState>) {
    let addr = format!("{}:{}", state.config.web_host, state.config.web_port);
    let app = build_router(state);

    info!("Webhook server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind webhook server on {addr}: {e}");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Webhook server error: {e}");
    }
}
