use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::LeadBoxError;

// --- Conversations edge payload ---

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsPage {
    #[serde(default)]
    pub data: Vec<RemoteThread>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteThread {
    pub id: String,
    #[serde(default)]
    pub updated_time: Option<String>,
    #[serde(default)]
    pub senders: Option<SendersEdge>,
    #[serde(default)]
    pub messages: Option<MessagesEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendersEdge {
    #[serde(default)]
    pub data: Vec<RemoteSender>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSender {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesEdge {
    #[serde(default)]
    pub data: Vec<RemoteMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub from: Option<RemoteSender>,
    #[serde(default)]
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageIdentity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

// --- Error envelope (Graph reports errors in the body, sometimes with 200) ---

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

impl GraphErrorDetail {
    fn render(&self) -> String {
        let mut out = self.message.clone();
        if let Some(t) = &self.error_type {
            out = format!("{t}: {out}");
        }
        if let Some(c) = self.code {
            out = format!("{out} (code {c})");
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: String,
}

/// Decode a Graph response body, preferring the error envelope. Errors come
/// back with 4xx statuses but occasionally ride a 200, so the body is the
/// source of truth.
fn decode_graph_body<T: serde::de::DeserializeOwned>(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<T, LeadBoxError> {
    if let Ok(env) = serde_json::from_str::<GraphErrorEnvelope>(body) {
        return Err(LeadBoxError::GraphApi(env.error.render()));
    }
    if !status.is_success() {
        return Err(LeadBoxError::GraphApi(format!("HTTP {status}: {body}")));
    }
    serde_json::from_str(body)
        .map_err(|e| LeadBoxError::GraphApi(format!("Failed to parse response: {e}\nBody: {body}")))
}

// --- Messenger platform seam ---

#[async_trait]
pub trait Messenger: Send + Sync {
    /// "Who am I": the page's own id, needed to classify message senders.
    async fn page_identity(&self, access_token: &str) -> Result<PageIdentity, LeadBoxError>;

    /// Fetch one page of the conversations edge by absolute URL.
    async fn fetch_conversations(&self, url: &str) -> Result<ConversationsPage, LeadBoxError>;

    /// URL for the first conversations page; subsequent pages come from the
    /// opaque paging.next cursor.
    fn first_page_url(&self, access_token: &str, page_size: usize, message_limit: usize) -> String;

    /// Send a text message; returns the remote message id on acceptance.
    async fn send_text(
        &self,
        access_token: &str,
        psid: &str,
        text: &str,
    ) -> Result<String, LeadBoxError>;
}

pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(base_url: &str) -> Self {
        GraphClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Messenger for GraphClient {
    async fn page_identity(&self, access_token: &str) -> Result<PageIdentity, LeadBoxError> {
        let url = format!(
            "{}/me?fields=id,name&access_token={}",
            self.base_url,
            urlencoding::encode(access_token)
        );
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode_graph_body(status, &body)
    }

    async fn fetch_conversations(&self, url: &str) -> Result<ConversationsPage, LeadBoxError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode_graph_body(status, &body)
    }

    fn first_page_url(&self, access_token: &str, page_size: usize, message_limit: usize) -> String {
        format!(
            "{}/me/conversations?fields=id,updated_time,senders,messages.limit({}){{id,message,from,created_time}}&limit={}&access_token={}",
            self.base_url,
            message_limit,
            page_size,
            urlencoding::encode(access_token)
        )
    }

    async fn send_text(
        &self,
        access_token: &str,
        psid: &str,
        text: &str,
    ) -> Result<String, LeadBoxError> {
        let url = format!(
            "{}/me/messages?access_token={}",
            self.base_url,
            urlencoding::encode(access_token)
        );
        let body = json!({
            "recipient": { "id": psid },
            "messaging_type": "RESPONSE",
            "message": { "text": text },
        });
        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        let body = response.text().await?;
        let accepted: SendResponse = decode_graph_body(status, &body)?;
        Ok(accepted.message_id)
    }
}
