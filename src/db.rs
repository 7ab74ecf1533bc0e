use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

use crate::error::LeadBoxError;

pub struct Database {
    conn: Mutex<Connection>,
}

/// Who wrote a message: the external customer or the operator's page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRole {
    /// The counterparty (customer) side of the conversation.
    User,
    /// The operator's own page.
    Page,
}

impl Serialize for SenderRole {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::User => "user",
            SenderRole::Page => "page",
        }
    }

    /// Parse a stored label. The alias table covers the older schema
    /// generation (`client`/`me`) alongside the current one.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" | "client" => Some(SenderRole::User),
            "page" | "me" => Some(SenderRole::Page),
            _ => None,
        }
    }
}

/// Closed status enum. Stored labels are the current generation; the alias
/// table maps the retired generation (`unsold`/`sold`/`follow-up`/`new`)
/// onto it so old rows and old callers keep parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Active,
    Archived,
    NeedsFollowUp,
}

impl Serialize for ConversationStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
            ConversationStatus::NeedsFollowUp => "needs_follow_up",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" | "unsold" | "new" => Some(ConversationStatus::Active),
            "archived" | "sold" => Some(ConversationStatus::Archived),
            "needs_follow_up" | "follow-up" | "follow_up" => Some(ConversationStatus::NeedsFollowUp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub psid: String,
    pub customer_name: Option<String>,
    pub status: ConversationStatus,
    pub last_interaction_at: String,
    pub last_message_by: Option<SenderRole>,
    pub last_message_preview: Option<String>,
    pub unread_count: i64,
    pub auto_reply_sent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub meta_message_id: Option<String>,
    pub content: String,
    pub sender_role: SenderRole,
    pub created_at: String,
}

/// Conversation fields derived from one reconciled remote thread.
#[derive(Debug, Clone)]
pub struct SyncUpsert {
    pub psid: String,
    pub customer_name: Option<String>,
    pub status: ConversationStatus,
    pub last_interaction_at: String,
    pub last_message_by: Option<SenderRole>,
    pub last_message_preview: Option<String>,
}

fn bad_label(idx: usize, label: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown label: {label}").into(),
    )
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let status_raw: String = row.get(3)?;
    let status = ConversationStatus::parse(&status_raw).ok_or_else(|| bad_label(3, &status_raw))?;
    let last_by_raw: Option<String> = row.get(5)?;
    let last_message_by = match last_by_raw {
        Some(s) => Some(SenderRole::parse(&s).ok_or_else(|| bad_label(5, &s))?),
        None => None,
    };
    Ok(Conversation {
        id: row.get(0)?,
        psid: row.get(1)?,
        customer_name: row.get(2)?,
        status,
        last_interaction_at: row.get(4)?,
        last_message_by,
        last_message_preview: row.get(6)?,
        unread_count: row.get(7)?,
        auto_reply_sent: row.get::<_, i64>(8)? != 0,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role_raw: String = row.get(4)?;
    let sender_role = SenderRole::parse(&role_raw).ok_or_else(|| bad_label(4, &role_raw))?;
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        meta_message_id: row.get(2)?,
        content: row.get(3)?,
        sender_role,
        created_at: row.get(5)?,
    })
}

const CONVERSATION_COLS: &str = "id, psid, customer_name, status, last_interaction_at, \
     last_message_by, last_message_preview, unread_count, auto_reply_sent";
const MESSAGE_COLS: &str =
    "id, conversation_id, meta_message_id, content, sender_type, created_at";

impl Database {
    pub fn new(data_dir: &str) -> Result<Self, LeadBoxError> {
        let db_path = Path::new(data_dir).join("leadbox.db");
        std::fs::create_dir_all(data_dir)?;

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        // SQLite's standard default is foreign_keys=OFF; some bundled builds
        // compile it ON. The data layer is written against the standard default
        // (message inserts are guarded by the subsequent conversation UPDATE
        // affecting 0 rows), so pin it explicitly for a consistent environment.
        conn.execute_batch("PRAGMA foreign_keys=OFF;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                psid TEXT NOT NULL UNIQUE,
                customer_name TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                last_interaction_at TEXT NOT NULL,
                last_message_by TEXT,
                last_message_preview TEXT,
                unread_count INTEGER NOT NULL DEFAULT 0,
                auto_reply_sent INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_status_interaction
                ON conversations(status, last_interaction_at);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                meta_message_id TEXT UNIQUE,
                content TEXT NOT NULL,
                sender_type TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
                ON messages(conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS settings (
                account_id TEXT PRIMARY KEY,
                page_access_token TEXT,
                updated_at TEXT NOT NULL
            );",
        )?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    // --- Conversations ---

    /// Upsert from a reconciled remote thread, keyed by psid. Derived fields
    /// (status, last-by, preview, timestamp, auto-reply flag) only move
    /// forward: a remote snapshot older than what is already stored leaves
    /// them alone, so a locally persisted draft survives a stale sync pass.
    /// The unread counter is reset either way (a sync is operator-initiated).
    /// Returns the conversation's local id.
    pub fn upsert_conversation_from_sync(&self, upd: &SyncUpsert) -> Result<String, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO conversations
                (id, psid, customer_name, status, last_interaction_at,
                 last_message_by, last_message_preview, unread_count, auto_reply_sent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0)
             ON CONFLICT(psid) DO UPDATE SET
                customer_name = COALESCE(excluded.customer_name, customer_name),
                status = CASE WHEN excluded.last_interaction_at >= conversations.last_interaction_at
                    THEN excluded.status ELSE conversations.status END,
                last_message_by = CASE WHEN excluded.last_interaction_at >= conversations.last_interaction_at
                    THEN excluded.last_message_by ELSE conversations.last_message_by END,
                last_message_preview = CASE WHEN excluded.last_interaction_at >= conversations.last_interaction_at
                    THEN excluded.last_message_preview ELSE conversations.last_message_preview END,
                auto_reply_sent = CASE WHEN excluded.last_interaction_at >= conversations.last_interaction_at
                        AND excluded.last_message_by = 'user'
                    THEN 0 ELSE conversations.auto_reply_sent END,
                last_interaction_at = MAX(excluded.last_interaction_at, conversations.last_interaction_at),
                unread_count = 0",
            params![
                id,
                upd.psid,
                upd.customer_name,
                upd.status.as_str(),
                upd.last_interaction_at,
                upd.last_message_by.map(|r| r.as_str()),
                upd.last_message_preview,
            ],
        )?;
        let actual_id: String = conn.query_row(
            "SELECT id FROM conversations WHERE psid = ?1",
            params![upd.psid],
            |row| row.get(0),
        )?;
        Ok(actual_id)
    }

    /// Upsert from one inbound webhook message. The event is by definition
    /// the newest thing we know about the thread: the counterparty spoke,
    /// the operator owes a reply, the unread counter grows, and any earlier
    /// auto-reply suppression is re-armed.
    pub fn upsert_conversation_from_webhook(
        &self,
        psid: &str,
        preview: &str,
        now: &str,
    ) -> Result<String, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO conversations
                (id, psid, customer_name, status, last_interaction_at,
                 last_message_by, last_message_preview, unread_count, auto_reply_sent)
             VALUES (?1, ?2, NULL, 'needs_follow_up', ?3, 'user', ?4, 1, 0)
             ON CONFLICT(psid) DO UPDATE SET
                status = 'needs_follow_up',
                last_interaction_at = excluded.last_interaction_at,
                last_message_by = 'user',
                last_message_preview = excluded.last_message_preview,
                unread_count = conversations.unread_count + 1,
                auto_reply_sent = 0",
            params![id, psid, now, preview],
        )?;
        let actual_id: String = conn.query_row(
            "SELECT id FROM conversations WHERE psid = ?1",
            params![psid],
            |row| row.get(0),
        )?;
        Ok(actual_id)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"),
            params![id],
            conversation_from_row,
        );
        match result {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_conversation_by_psid(&self, psid: &str) -> Result<Option<Conversation>, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE psid = ?1"),
            params![psid],
            conversation_from_row,
        );
        match result {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recently active first.
    pub fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let rows = match status {
            Some(s) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CONVERSATION_COLS} FROM conversations
                     WHERE status = ?1
                     ORDER BY last_interaction_at DESC"
                ))?;
                let rows = stmt
                    .query_map(params![s.as_str()], conversation_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CONVERSATION_COLS} FROM conversations
                     ORDER BY last_interaction_at DESC"
                ))?;
                let rows = stmt
                    .query_map([], conversation_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    pub fn mark_conversation_read(&self, id: &str) -> Result<bool, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
            params![id],
        )?;
        Ok(rows > 0)
    }

    // --- Messages ---

    /// Upsert a message that carries a remote message id. A repeat write
    /// with the same remote id updates the row instead of duplicating it.
    pub fn upsert_remote_message(
        &self,
        conversation_id: &str,
        meta_message_id: &str,
        content: &str,
        sender_role: SenderRole,
        created_at: &str,
    ) -> Result<(), LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO messages (id, conversation_id, meta_message_id, content, sender_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(meta_message_id) DO UPDATE SET
                content = excluded.content,
                sender_type = excluded.sender_type,
                created_at = excluded.created_at",
            params![
                id,
                conversation_id,
                meta_message_id,
                content,
                sender_role.as_str(),
                created_at,
            ],
        )?;
        Ok(())
    }

    /// Insert a message with no remote id (a synthesized local echo).
    pub fn insert_local_message(
        &self,
        conversation_id: &str,
        content: &str,
        sender_role: SenderRole,
        created_at: &str,
    ) -> Result<String, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO messages (id, conversation_id, meta_message_id, content, sender_type, created_at)
             VALUES (?1, ?2, NULL, ?3, ?4, ?5)",
            params![id, conversation_id, content, sender_role.as_str(), created_at],
        )?;
        Ok(id)
    }

    pub fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;
        let messages = stmt
            .query_map(params![conversation_id, limit as i64], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // Reverse so oldest first
        let mut messages = messages;
        messages.reverse();
        Ok(messages)
    }

    pub fn get_all_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC"
        ))?;
        let messages = stmt
            .query_map(params![conversation_id], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    // --- Drafting / outbound (transactional pairs) ---

    /// Persist an auto-drafted follow-up and flip the suppression state in
    /// one transaction. A draft row without the flag would re-draft next
    /// run; the flag without the row would silently drop the reply.
    pub fn record_auto_reply(
        &self,
        conversation_id: &str,
        content: &str,
        now: &str,
    ) -> Result<String, LeadBoxError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO messages (id, conversation_id, meta_message_id, content, sender_type, created_at)
             VALUES (?1, ?2, NULL, ?3, 'page', ?4)",
            params![id, conversation_id, content, now],
        )?;
        let rows = tx.execute(
            "UPDATE conversations SET
                auto_reply_sent = 1,
                status = 'active',
                last_interaction_at = ?2,
                last_message_by = 'page',
                last_message_preview = ?3
             WHERE id = ?1",
            params![conversation_id, now, content],
        )?;
        if rows == 0 {
            return Err(LeadBoxError::ConversationNotFound(
                conversation_id.to_string(),
            ));
        }
        tx.commit()?;
        Ok(id)
    }

    /// Persist a remotely acknowledged operator send (message row keyed by
    /// the returned remote id + conversation derived fields) atomically.
    pub fn record_outbound_send(
        &self,
        conversation_id: &str,
        meta_message_id: &str,
        content: &str,
        now: &str,
    ) -> Result<(), LeadBoxError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO messages (id, conversation_id, meta_message_id, content, sender_type, created_at)
             VALUES (?1, ?2, ?3, ?4, 'page', ?5)
             ON CONFLICT(meta_message_id) DO UPDATE SET
                content = excluded.content,
                created_at = excluded.created_at",
            params![id, conversation_id, meta_message_id, content, now],
        )?;
        let rows = tx.execute(
            "UPDATE conversations SET
                status = 'active',
                last_interaction_at = ?2,
                last_message_by = 'page',
                last_message_preview = ?3
             WHERE id = ?1",
            params![conversation_id, now, content],
        )?;
        if rows == 0 {
            return Err(LeadBoxError::ConversationNotFound(
                conversation_id.to_string(),
            ));
        }
        tx.commit()?;
        Ok(())
    }

    // --- Settings ---

    pub fn set_access_token(&self, account_id: &str, token: &str) -> Result<(), LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO settings (account_id, page_access_token, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id) DO UPDATE SET
                page_access_token = ?2,
                updated_at = ?3",
            params![account_id, token, now],
        )?;
        Ok(())
    }

    pub fn get_access_token(&self, account_id: &str) -> Result<Option<String>, LeadBoxError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT page_access_token FROM settings WHERE account_id = ?1",
            params![account_id],
            |row| row.get::<_, Option<String>>(0),
        );
        match result {
            Ok(token) => Ok(token.filter(|t| !t.trim().is_empty())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Database, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("leadbox_test_{}", uuid::Uuid::new_v4()));
        let db = Database::new(dir.to_str().unwrap()).unwrap();
        (db, dir)
    }

    fn cleanup(dir: &std::path::Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    fn sync_upsert(psid: &str, ts: &str) -> SyncUpsert {
        SyncUpsert {
            psid: psid.into(),
            customer_name: Some("Ana".into()),
            status: ConversationStatus::NeedsFollowUp,
            last_interaction_at: ts.into(),
            last_message_by: Some(SenderRole::User),
            last_message_preview: Some("Hi".into()),
        }
    }

    #[test]
    fn test_new_database_creates_tables() {
        let (db, dir) = test_db();
        assert!(db.list_conversations(None).unwrap().is_empty());
        assert!(db.get_access_token("default").unwrap().is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_sync_upsert_is_idempotent_on_psid() {
        let (db, dir) = test_db();
        let id1 = db
            .upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        let id2 = db
            .upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        assert_eq!(id1, id2);
        assert_eq!(db.list_conversations(None).unwrap().len(), 1);
        cleanup(&dir);
    }

    #[test]
    fn test_sync_upsert_preserves_name_when_absent() {
        let (db, dir) = test_db();
        db.upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        let mut upd = sync_upsert("P1", "2024-01-02T00:00:00+00:00");
        upd.customer_name = None;
        db.upsert_conversation_from_sync(&upd).unwrap();
        let conv = db.get_conversation_by_psid("P1").unwrap().unwrap();
        assert_eq!(conv.customer_name.as_deref(), Some("Ana"));
        cleanup(&dir);
    }

    #[test]
    fn test_sync_upsert_ignores_stale_derived_fields() {
        let (db, dir) = test_db();
        db.upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-02T00:00:00+00:00"))
            .unwrap();
        let id = db.get_conversation_by_psid("P1").unwrap().unwrap().id;
        // Operator drafts a reply (newest known message is now local).
        db.record_auto_reply(&id, "draft", "2024-01-03T00:00:00+00:00")
            .unwrap();

        // A stale remote snapshot must not clobber the draft-derived state.
        db.upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-02T00:00:00+00:00"))
            .unwrap();
        let conv = db.get_conversation(&id).unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::Active);
        assert_eq!(conv.last_message_by, Some(SenderRole::Page));
        assert_eq!(conv.last_interaction_at, "2024-01-03T00:00:00+00:00");
        assert!(conv.auto_reply_sent);

        // A genuinely newer counterparty message moves state forward again.
        db.upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-04T00:00:00+00:00"))
            .unwrap();
        let conv = db.get_conversation(&id).unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::NeedsFollowUp);
        assert!(!conv.auto_reply_sent);
        cleanup(&dir);
    }

    #[test]
    fn test_webhook_upsert_increments_unread_and_rearms() {
        let (db, dir) = test_db();
        let id1 = db
            .upsert_conversation_from_webhook("P1", "hello", "2024-01-01T00:00:00+00:00")
            .unwrap();
        let id2 = db
            .upsert_conversation_from_webhook("P1", "anyone?", "2024-01-01T01:00:00+00:00")
            .unwrap();
        assert_eq!(id1, id2);

        let conv = db.get_conversation_by_psid("P1").unwrap().unwrap();
        assert_eq!(conv.unread_count, 2);
        assert_eq!(conv.status, ConversationStatus::NeedsFollowUp);
        assert_eq!(conv.last_message_by, Some(SenderRole::User));
        assert_eq!(conv.last_message_preview.as_deref(), Some("anyone?"));
        assert!(!conv.auto_reply_sent);
        cleanup(&dir);
    }

    #[test]
    fn test_sync_upsert_resets_unread() {
        let (db, dir) = test_db();
        db.upsert_conversation_from_webhook("P1", "hello", "2024-01-01T00:00:00+00:00")
            .unwrap();
        db.upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:01+00:00"))
            .unwrap();
        let conv = db.get_conversation_by_psid("P1").unwrap().unwrap();
        assert_eq!(conv.unread_count, 0);
        cleanup(&dir);
    }

    #[test]
    fn test_remote_message_dedup_later_write_wins() {
        let (db, dir) = test_db();
        let conv_id = db
            .upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:00+00:00"))
            .unwrap();

        db.upsert_remote_message(&conv_id, "M9", "original", SenderRole::User, "2024-01-01T00:00:00+00:00")
            .unwrap();
        db.upsert_remote_message(&conv_id, "M9", "edited", SenderRole::User, "2024-01-01T00:00:00+00:00")
            .unwrap();

        let messages = db.get_all_messages(&conv_id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "edited");
        assert_eq!(messages[0].meta_message_id.as_deref(), Some("M9"));
        cleanup(&dir);
    }

    #[test]
    fn test_local_messages_allow_many_null_remote_ids() {
        let (db, dir) = test_db();
        let conv_id = db
            .upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        db.insert_local_message(&conv_id, "one", SenderRole::Page, "2024-01-01T00:00:01+00:00")
            .unwrap();
        db.insert_local_message(&conv_id, "two", SenderRole::Page, "2024-01-01T00:00:02+00:00")
            .unwrap();
        assert_eq!(db.get_all_messages(&conv_id).unwrap().len(), 2);
        cleanup(&dir);
    }

    #[test]
    fn test_get_recent_messages_ordering_and_limit() {
        let (db, dir) = test_db();
        let conv_id = db
            .upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        for i in 0..5 {
            db.upsert_remote_message(
                &conv_id,
                &format!("M{i}"),
                &format!("message {i}"),
                SenderRole::User,
                &format!("2024-01-01T00:00:0{i}+00:00"),
            )
            .unwrap();
        }

        // Limit to 3 - the 3 most recent, reversed to oldest-first
        let messages = db.get_recent_messages(&conv_id, 3).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "message 2");
        assert_eq!(messages[2].content, "message 4");
        cleanup(&dir);
    }

    #[test]
    fn test_record_auto_reply_is_atomic_pair() {
        let (db, dir) = test_db();
        let conv_id = db
            .upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:00+00:00"))
            .unwrap();

        db.record_auto_reply(&conv_id, "Mai aveti intrebari?", "2024-01-02T00:00:00+00:00")
            .unwrap();

        let conv = db.get_conversation(&conv_id).unwrap().unwrap();
        assert!(conv.auto_reply_sent);
        assert_eq!(conv.status, ConversationStatus::Active);
        assert_eq!(conv.last_message_by, Some(SenderRole::Page));
        assert_eq!(conv.last_message_preview.as_deref(), Some("Mai aveti intrebari?"));

        let messages = db.get_all_messages(&conv_id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_role, SenderRole::Page);
        assert!(messages[0].meta_message_id.is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_record_auto_reply_unknown_conversation_persists_nothing() {
        let (db, dir) = test_db();
        let err = db
            .record_auto_reply("nope", "text", "2024-01-02T00:00:00+00:00")
            .unwrap_err();
        assert!(matches!(err, LeadBoxError::ConversationNotFound(_)));
        // The transaction rolled back: no orphan message row appears anywhere.
        assert!(db.get_all_messages("nope").unwrap().is_empty());
        cleanup(&dir);
    }

    #[test]
    fn test_record_outbound_send_updates_conversation() {
        let (db, dir) = test_db();
        let conv_id = db
            .upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:00+00:00"))
            .unwrap();

        db.record_outbound_send(&conv_id, "m_remote_1", "On our way!", "2024-01-02T00:00:00+00:00")
            .unwrap();

        let conv = db.get_conversation(&conv_id).unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::Active);
        assert_eq!(conv.last_message_by, Some(SenderRole::Page));
        assert_eq!(conv.last_message_preview.as_deref(), Some("On our way!"));

        let messages = db.get_all_messages(&conv_id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].meta_message_id.as_deref(), Some("m_remote_1"));
        cleanup(&dir);
    }

    #[test]
    fn test_list_conversations_filters_and_orders() {
        let (db, dir) = test_db();
        db.upsert_conversation_from_sync(&sync_upsert("P1", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        let mut active = sync_upsert("P2", "2024-01-03T00:00:00+00:00");
        active.status = ConversationStatus::Active;
        active.last_message_by = Some(SenderRole::Page);
        db.upsert_conversation_from_sync(&active).unwrap();
        db.upsert_conversation_from_sync(&sync_upsert("P3", "2024-01-02T00:00:00+00:00"))
            .unwrap();

        let all = db.list_conversations(None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].psid, "P2"); // most recent first

        let needs = db
            .list_conversations(Some(ConversationStatus::NeedsFollowUp))
            .unwrap();
        assert_eq!(needs.len(), 2);
        assert_eq!(needs[0].psid, "P3");
        assert_eq!(needs[1].psid, "P1");
        cleanup(&dir);
    }

    #[test]
    fn test_mark_conversation_read() {
        let (db, dir) = test_db();
        let id = db
            .upsert_conversation_from_webhook("P1", "hi", "2024-01-01T00:00:00+00:00")
            .unwrap();
        assert!(db.mark_conversation_read(&id).unwrap());
        assert_eq!(db.get_conversation(&id).unwrap().unwrap().unread_count, 0);
        assert!(!db.mark_conversation_read("nope").unwrap());
        cleanup(&dir);
    }

    #[test]
    fn test_set_and_get_access_token() {
        let (db, dir) = test_db();
        assert!(db.get_access_token("default").unwrap().is_none());
        db.set_access_token("default", "EAAB-token").unwrap();
        assert_eq!(
            db.get_access_token("default").unwrap().as_deref(),
            Some("EAAB-token")
        );
        // Overwrite
        db.set_access_token("default", "EAAB-rotated").unwrap();
        assert_eq!(
            db.get_access_token("default").unwrap().as_deref(),
            Some("EAAB-rotated")
        );
        // Blank token counts as absent
        db.set_access_token("default", "  ").unwrap();
        assert!(db.get_access_token("default").unwrap().is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_status_parse_accepts_legacy_labels() {
        assert_eq!(
            ConversationStatus::parse("unsold"),
            Some(ConversationStatus::Active)
        );
        assert_eq!(
            ConversationStatus::parse("new"),
            Some(ConversationStatus::Active)
        );
        assert_eq!(
            ConversationStatus::parse("sold"),
            Some(ConversationStatus::Archived)
        );
        assert_eq!(
            ConversationStatus::parse("follow-up"),
            Some(ConversationStatus::NeedsFollowUp)
        );
        assert_eq!(ConversationStatus::parse("closed"), None);
    }

    #[test]
    fn test_sender_role_parse_accepts_legacy_labels() {
        assert_eq!(SenderRole::parse("client"), Some(SenderRole::User));
        assert_eq!(SenderRole::parse("me"), Some(SenderRole::Page));
        assert_eq!(SenderRole::parse("user"), Some(SenderRole::User));
        assert_eq!(SenderRole::parse("page"), Some(SenderRole::Page));
        assert_eq!(SenderRole::parse("bot"), None);
    }
}
