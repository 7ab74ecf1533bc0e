use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::LeadBoxError;

fn default_verify_token() -> String {
    String::new()
}
fn default_followup_secret() -> String {
    String::new()
}
fn default_operator_account_id() -> String {
    "default".into()
}
fn default_graph_api_base() -> String {
    "https://graph.facebook.com/v19.0".into()
}
fn default_llm_provider() -> String {
    "gemini".into()
}
fn default_llm_api_key() -> String {
    String::new()
}
fn default_llm_model() -> String {
    String::new()
}
fn default_followup_locale() -> String {
    "Romanian".into()
}
fn default_data_dir() -> String {
    "./leadbox.data".into()
}
fn default_web_host() -> String {
    "127.0.0.1".into()
}
fn default_web_port() -> u16 {
    8090
}
fn default_sync_max_pages() -> usize {
    6
}
fn default_sync_page_size() -> usize {
    50
}
fn default_thread_message_limit() -> usize {
    5
}
fn default_followup_min_hours() -> f64 {
    18.0
}
fn default_followup_max_hours() -> f64 {
    23.0
}
fn default_followup_history_limit() -> usize {
    10
}
fn default_followup_interval_mins() -> u64 {
    0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Shared secret echoed back during the webhook verification handshake.
    #[serde(default = "default_verify_token")]
    pub verify_token: String,
    /// Bearer secret protecting the scheduled follow-up trigger.
    #[serde(default = "default_followup_secret")]
    pub followup_secret: String,
    /// Settings row holding the page access token for this deployment.
    #[serde(default = "default_operator_account_id")]
    pub operator_account_id: String,
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default = "default_llm_api_key")]
    pub llm_api_key: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_base_url: Option<String>,
    /// Language the drafted follow-up sentence is written in.
    #[serde(default = "default_followup_locale")]
    pub followup_locale: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_web_host")]
    pub web_host: String,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default = "default_sync_max_pages")]
    pub sync_max_pages: usize,
    #[serde(default = "default_sync_page_size")]
    pub sync_page_size: usize,
    /// Nested messages fetched and upserted per thread on sync.
    #[serde(default = "default_thread_message_limit")]
    pub thread_message_limit: usize,
    #[serde(default = "default_followup_min_hours")]
    pub followup_min_hours: f64,
    #[serde(default = "default_followup_max_hours")]
    pub followup_max_hours: f64,
    #[serde(default = "default_followup_history_limit")]
    pub followup_history_limit: usize,
    /// In-process follow-up scan interval. 0 disables the ticker; an
    /// external cron hitting /api/followup/run is the canonical trigger.
    #[serde(default = "default_followup_interval_mins")]
    pub followup_interval_mins: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            verify_token: default_verify_token(),
            followup_secret: default_followup_secret(),
            operator_account_id: default_operator_account_id(),
            graph_api_base: default_graph_api_base(),
            llm_provider: default_llm_provider(),
            llm_api_key: default_llm_api_key(),
            llm_model: default_llm_model(),
            llm_base_url: None,
            followup_locale: default_followup_locale(),
            data_dir: default_data_dir(),
            web_host: default_web_host(),
            web_port: default_web_port(),
            sync_max_pages: default_sync_max_pages(),
            sync_page_size: default_sync_page_size(),
            thread_message_limit: default_thread_message_limit(),
            followup_min_hours: default_followup_min_hours(),
            followup_max_hours: default_followup_max_hours(),
            followup_history_limit: default_followup_history_limit(),
            followup_interval_mins: default_followup_interval_mins(),
        }
    }
}

impl Config {
    pub fn resolve_config_path() -> Result<Option<PathBuf>, LeadBoxError> {
        // 1. Check LEADBOX_CONFIG env var for custom path
        if let Ok(custom) = std::env::var("LEADBOX_CONFIG") {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(LeadBoxError::Config(format!(
                "LEADBOX_CONFIG points to non-existent file: {custom}"
            )));
        }

        if std::path::Path::new("./leadbox.config.yaml").exists() {
            return Ok(Some(PathBuf::from("./leadbox.config.yaml")));
        }
        if std::path::Path::new("./leadbox.config.yml").exists() {
            return Ok(Some(PathBuf::from("./leadbox.config.yml")));
        }
        Ok(None)
    }

    /// Load config from YAML file.
    pub fn load() -> Result<Self, LeadBoxError> {
        let yaml_path = Self::resolve_config_path()?;

        if let Some(path) = yaml_path {
            let path_str = path.to_string_lossy().to_string();
            let content = std::fs::read_to_string(&path)
                .map_err(|e| LeadBoxError::Config(format!("Failed to read {path_str}: {e}")))?;
            return Self::from_yaml_str(&content)
                .map_err(|e| LeadBoxError::Config(format!("Failed to load {path_str}: {e}")));
        }

        Err(LeadBoxError::Config(
            "No leadbox.config.yaml found in the working directory.".into(),
        ))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, LeadBoxError> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| LeadBoxError::Config(format!("Failed to parse config: {e}")))?;
        config.post_deserialize()?;
        Ok(config)
    }

    /// Apply post-deserialization normalization and validation.
    pub fn post_deserialize(&mut self) -> Result<(), LeadBoxError> {
        self.llm_provider = self.llm_provider.trim().to_lowercase();

        // Apply provider-specific default model if empty
        if self.llm_model.is_empty() {
            self.llm_model = match self.llm_provider.as_str() {
                "gemini" => "gemini-2.5-flash".into(),
                _ => "gpt-4o-mini".into(),
            };
        }

        self.graph_api_base = self.graph_api_base.trim_end_matches('/').to_string();

        if self.sync_max_pages == 0 {
            return Err(LeadBoxError::Config(
                "sync_max_pages must be at least 1".into(),
            ));
        }
        if self.sync_page_size == 0 {
            return Err(LeadBoxError::Config(
                "sync_page_size must be at least 1".into(),
            ));
        }
        if self.thread_message_limit == 0 {
            return Err(LeadBoxError::Config(
                "thread_message_limit must be at least 1".into(),
            ));
        }
        if self.followup_min_hours < 0.0 || self.followup_max_hours < self.followup_min_hours {
            return Err(LeadBoxError::Config(format!(
                "invalid follow-up window: [{}, {}] hours",
                self.followup_min_hours, self.followup_max_hours
            )));
        }
        if self.followup_history_limit == 0 {
            return Err(LeadBoxError::Config(
                "followup_history_limit must be at least 1".into(),
            ));
        }

        Ok(())
    }
}
