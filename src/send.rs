use chrono::Utc;
use tracing::info;

use crate::error::LeadBoxError;
use crate::runtime::AppState;

/// Operator-initiated send. The message is persisted only after the remote
/// platform acknowledges it with a message id; on rejection the caller gets
/// the error and local state is untouched, so any optimistic echo it showed
/// can be retracted.
pub async fn send_operator_message(
    state: &AppState,
    conversation_id: &str,
    text: &str,
) -> Result<String, LeadBoxError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LeadBoxError::InvalidInput("message body is empty".into()));
    }

    let conversation = state
        .db
        .get_conversation(conversation_id)?
        .ok_or_else(|| LeadBoxError::ConversationNotFound(conversation_id.to_string()))?;
    let token = state
        .db
        .get_access_token(&state.config.operator_account_id)?
        .ok_or(LeadBoxError::MissingAccessToken)?;

    let message_id = state
        .messenger
        .send_text(&token, &conversation.psid, trimmed)
        .await?;

    let now = Utc::now().to_rfc3339();
    state
        .db
        .record_outbound_send(conversation_id, &message_id, trimmed, &now)?;

    info!(
        "Sent message {message_id} to {} ({})",
        conversation.psid, conversation_id
    );
    Ok(message_id)
}
