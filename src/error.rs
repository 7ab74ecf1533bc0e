use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeadBoxError {
    #[error("Missing page access token. Store one with `leadbox token <value>`.")]
    MissingAccessToken,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Graph API error: {0}")]
    GraphApi(String),

    #[error("Text generation error: {0}")]
    TextGen(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LeadBoxError {
    /// Stable machine-checkable code, surfaced in API error payloads so a
    /// caller can distinguish "fix your configuration" from "retry later".
    pub fn code(&self) -> &'static str {
        match self {
            LeadBoxError::MissingAccessToken => "MISSING_TOKEN",
            LeadBoxError::Config(_) => "CONFIG",
            LeadBoxError::InvalidInput(_) => "INVALID_INPUT",
            LeadBoxError::ConversationNotFound(_) => "NOT_FOUND",
            LeadBoxError::GraphApi(_) => "GRAPH_API",
            LeadBoxError::TextGen(_) => "TEXT_GEN",
            LeadBoxError::Database(_) => "DATABASE",
            LeadBoxError::Http(_) => "HTTP",
            LeadBoxError::Json(_) => "JSON",
            LeadBoxError::Io(_) => "IO",
        }
    }
}
