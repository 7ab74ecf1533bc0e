use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{ConversationStatus, Database, SenderRole, SyncUpsert};
use crate::error::LeadBoxError;
use crate::graph::{Messenger, RemoteMessage, RemoteThread};
use crate::runtime::AppState;

/// Classify a message sender against the thread's known participants.
///
/// The counterparty id is always available (it keys the thread), so that
/// comparison is the primary signal; the page id, when known, confirms the
/// other side. A sender matching neither resolves to `Page`: treating an
/// unattributable message as the counterparty would re-arm follow-up
/// drafting, so the fallback fails closed.
pub fn resolve_sender_role(
    sender_id: Option<&str>,
    counterparty_psid: &str,
    page_id: Option<&str>,
) -> SenderRole {
    match sender_id {
        Some(id) if id == counterparty_psid => SenderRole::User,
        Some(id) if page_id == Some(id) => SenderRole::Page,
        // Unresolvable sender: policy fallback, not a silent default.
        _ => SenderRole::Page,
    }
}

/// Normalize a remote timestamp to UTC RFC 3339 so stored values compare
/// lexicographically. Graph emits `+0000` offsets, which strict RFC 3339
/// parsing rejects.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).to_rfc3339());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc).to_rfc3339());
    }
    None
}

// --- Pagination driver ---

#[derive(Debug, Default)]
pub struct FetchedPages {
    pub threads: Vec<RemoteThread>,
    pub pages_fetched: usize,
    /// Set when a page errored; the threads gathered before it are kept.
    pub page_error: Option<String>,
}

/// Walk the conversations edge, at most `max_pages` requests. A remote
/// error is a stop condition, not a failure: partial results are strictly
/// better than none.
pub async fn fetch_all_threads(
    messenger: &dyn Messenger,
    first_url: String,
    max_pages: usize,
) -> FetchedPages {
    let mut out = FetchedPages::default();
    let mut url = first_url;

    for _ in 0..max_pages {
        let page = match messenger.fetch_conversations(&url).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Sync: page {} failed, keeping partial results: {e}", out.pages_fetched + 1);
                out.page_error = Some(e.to_string());
                break;
            }
        };
        out.pages_fetched += 1;
        out.threads.extend(page.data);

        match page.paging.and_then(|p| p.next) {
            Some(next) => url = next,
            None => break,
        }
    }

    out
}

// --- Conversation reconciler ---

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn preview_of(message: &RemoteMessage) -> String {
    non_empty(message.message.as_deref())
        .unwrap_or("[Attachment]")
        .to_string()
}

/// Merge one remote thread into storage. Returns the conversation's local
/// id, or `None` when the thread cannot be keyed (no counterparty in the
/// participant list) — a soft skip, never a sync-aborting error.
pub fn reconcile_thread(
    db: &Database,
    thread: &RemoteThread,
    page_id: &str,
    message_limit: usize,
) -> Result<Option<String>, LeadBoxError> {
    let Some(counterparty) = thread
        .senders
        .as_ref()
        .and_then(|s| s.data.iter().find(|s| s.id != page_id))
    else {
        return Ok(None);
    };

    // Deterministic newest-first order regardless of what the edge returned.
    let mut messages: Vec<&RemoteMessage> = thread
        .messages
        .as_ref()
        .map(|m| m.data.iter().collect())
        .unwrap_or_default();
    messages.sort_by_key(|m| {
        std::cmp::Reverse(m.created_time.as_deref().and_then(normalize_timestamp))
    });

    // Participant-list names are sometimes generic; the name on the newest
    // counterparty message is the more reliable one and wins outright.
    let mut customer_name = non_empty(counterparty.name.as_deref()).map(str::to_string);
    if let Some(msg_name) = messages
        .iter()
        .find(|m| {
            resolve_sender_role(
                m.from.as_ref().map(|f| f.id.as_str()),
                &counterparty.id,
                Some(page_id),
            ) == SenderRole::User
        })
        .and_then(|m| non_empty(m.from.as_ref().and_then(|f| f.name.as_deref())))
    {
        customer_name = Some(msg_name.to_string());
    }

    let newest = messages.first();
    let last_message_by = newest.map(|m| {
        resolve_sender_role(
            m.from.as_ref().map(|f| f.id.as_str()),
            &counterparty.id,
            Some(page_id),
        )
    });
    let last_message_preview = newest.map(|m| preview_of(m));

    // Newest message time is more precise than the thread's updated-time.
    let last_interaction_at = newest
        .and_then(|m| m.created_time.as_deref().and_then(normalize_timestamp))
        .or_else(|| thread.updated_time.as_deref().and_then(normalize_timestamp))
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    let status = match last_message_by {
        Some(SenderRole::User) => ConversationStatus::NeedsFollowUp,
        _ => ConversationStatus::Active,
    };

    let conversation_id = db.upsert_conversation_from_sync(&SyncUpsert {
        psid: counterparty.id.clone(),
        customer_name,
        status,
        last_interaction_at,
        last_message_by,
        last_message_preview,
    })?;

    // Bounded to the most recent, applied oldest-first so per-conversation
    // write order matches corrected chronology.
    for message in messages.iter().take(message_limit).rev() {
        let role = resolve_sender_role(
            message.from.as_ref().map(|f| f.id.as_str()),
            &counterparty.id,
            Some(page_id),
        );
        let created_at = message
            .created_time
            .as_deref()
            .and_then(normalize_timestamp)
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        db.upsert_remote_message(
            &conversation_id,
            &message.id,
            &preview_of(message),
            role,
            &created_at,
        )?;
    }

    Ok(Some(conversation_id))
}

// --- Sync driver ---

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub conversations_synced: usize,
    pub threads_skipped: usize,
    pub pages_fetched: usize,
    pub page_error: Option<String>,
    pub thread_errors: Vec<String>,
}

/// One full pull-and-reconcile pass. Fails outright only on configuration
/// problems (no stored token) or an unreachable identity call; per-thread
/// failures are collected into the report and the pass continues.
pub async fn run_sync(state: &AppState) -> Result<SyncReport, LeadBoxError> {
    let token = state
        .db
        .get_access_token(&state.config.operator_account_id)?
        .ok_or(LeadBoxError::MissingAccessToken)?;

    let identity = state.messenger.page_identity(&token).await?;
    info!("Sync: acting as page {} ({:?})", identity.id, identity.name);

    let first_url = state.messenger.first_page_url(
        &token,
        state.config.sync_page_size,
        state.config.thread_message_limit,
    );
    let fetched = fetch_all_threads(
        state.messenger.as_ref(),
        first_url,
        state.config.sync_max_pages,
    )
    .await;

    info!(
        "Sync: processing {} threads from {} page(s)",
        fetched.threads.len(),
        fetched.pages_fetched
    );

    let mut report = SyncReport {
        pages_fetched: fetched.pages_fetched,
        page_error: fetched.page_error,
        ..Default::default()
    };

    for thread in &fetched.threads {
        match reconcile_thread(
            &state.db,
            thread,
            &identity.id,
            state.config.thread_message_limit,
        ) {
            Ok(Some(_)) => report.conversations_synced += 1,
            Ok(None) => {
                report.threads_skipped += 1;
                warn!("Sync: thread {} has no counterparty, skipped", thread.id);
            }
            Err(e) => {
                warn!("Sync: thread {} failed: {e}", thread.id);
                report.thread_errors.push(format!("{}: {e}", thread.id));
            }
        }
    }

    Ok(report)
}
