use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{Conversation, ConversationStatus, SenderRole, StoredMessage};
use crate::error::LeadBoxError;
use crate::runtime::AppState;

#[derive(Debug, Clone)]
pub struct FollowUpCandidate {
    pub conversation_id: String,
    pub display_name: String,
}

fn elapsed_hours(last_interaction_at: &str, now: DateTime<Utc>) -> Option<f64> {
    let then = DateTime::parse_from_rfc3339(last_interaction_at).ok()?;
    Some((now - then.with_timezone(&Utc)).num_milliseconds() as f64 / 3_600_000.0)
}

/// Select conversations due for an automated follow-up: the counterparty
/// spoke last, no auto-reply has gone out since, and the quiet time sits
/// inside the closed [min, max] hour window. Both bounds are inclusive;
/// anything past the upper bound is left for the next scheduled cycle
/// rather than risking duplicate drafts across adjacent runs.
pub fn find_due_followups(
    conversations: &[Conversation],
    now: DateTime<Utc>,
    min_hours: f64,
    max_hours: f64,
) -> Vec<FollowUpCandidate> {
    conversations
        .iter()
        .filter(|c| c.status == ConversationStatus::NeedsFollowUp)
        .filter(|c| !c.auto_reply_sent)
        .filter(|c| c.last_message_by == Some(SenderRole::User))
        .filter(|c| {
            // Unparseable timestamps never qualify.
            elapsed_hours(&c.last_interaction_at, now)
                .map(|h| h >= min_hours && h <= max_hours)
                .unwrap_or(false)
        })
        .map(|c| FollowUpCandidate {
            conversation_id: c.id.clone(),
            display_name: c
                .customer_name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
        })
        .collect()
}

/// The chronological transcript is the literal prompt payload; each line is
/// tagged with who spoke.
pub fn render_prompt(display_name: &str, history: &[StoredMessage], locale: &str) -> String {
    let transcript = history
        .iter()
        .map(|m| {
            let tag = match m.sender_role {
                SenderRole::Page => "Agent",
                SenderRole::User => "Client",
            };
            format!("{tag}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are following up with {display_name}, a lead who went quiet.\n\n\
         Conversation so far:\n{transcript}\n\n\
         Write exactly one short, casual, friendly follow-up sentence in {locale} \
         asking whether they still have questions. Avoid generic filler phrases."
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftedFollowUp {
    pub conversation_id: String,
    pub response: String,
}

#[derive(Debug, Default, Serialize)]
pub struct FollowUpReport {
    pub scanned: usize,
    pub drafted: Vec<DraftedFollowUp>,
    pub failures: Vec<String>,
}

/// One scheduled drafting pass. Idempotent: every successful draft flips
/// the conversation's suppression state, so re-running immediately selects
/// nothing new. Generation failures skip the candidate and the pass
/// continues.
pub async fn run_followups(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<FollowUpReport, LeadBoxError> {
    let leads = state
        .db
        .list_conversations(Some(ConversationStatus::NeedsFollowUp))?;
    let candidates = find_due_followups(
        &leads,
        now,
        state.config.followup_min_hours,
        state.config.followup_max_hours,
    );

    let mut report = FollowUpReport {
        scanned: leads.len(),
        ..Default::default()
    };

    for candidate in candidates {
        let history = state
            .db
            .get_recent_messages(&candidate.conversation_id, state.config.followup_history_limit)?;
        let prompt = render_prompt(
            &candidate.display_name,
            &history,
            &state.config.followup_locale,
        );

        let draft = match state.llm.generate(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(
                    "Follow-up: generation failed for {}: {e}",
                    candidate.conversation_id
                );
                report
                    .failures
                    .push(format!("{}: {e}", candidate.conversation_id));
                continue;
            }
        };
        if draft.is_empty() {
            warn!(
                "Follow-up: empty draft for {}, skipped",
                candidate.conversation_id
            );
            report
                .failures
                .push(format!("{}: empty draft", candidate.conversation_id));
            continue;
        }

        let now_str = Utc::now().to_rfc3339();
        if let Err(e) = state
            .db
            .record_auto_reply(&candidate.conversation_id, &draft, &now_str)
        {
            warn!(
                "Follow-up: failed to persist draft for {}: {e}",
                candidate.conversation_id
            );
            report
                .failures
                .push(format!("{}: {e}", candidate.conversation_id));
            continue;
        }

        info!(
            "Follow-up: drafted for {} ({})",
            candidate.conversation_id, candidate.display_name
        );
        report.drafted.push(DraftedFollowUp {
            conversation_id: candidate.conversation_id,
            response: draft,
        });
    }

    Ok(report)
}
