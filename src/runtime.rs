use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::config::Config;
use crate::db::Database;
use crate::followup::run_followups;
use crate::graph::{GraphClient, Messenger};
use crate::llm::TextGenerator;

pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub llm: Box<dyn TextGenerator>,
    pub messenger: Arc<dyn Messenger>,
}

pub async fn run(config: Config, db: Database) -> anyhow::Result<()> {
    let messenger: Arc<dyn Messenger> = Arc::new(GraphClient::new(&config.graph_api_base));
    let llm = crate::llm::create_provider(&config);

    let state = Arc::new(AppState {
        config,
        db: Arc::new(db),
        llm,
        messenger,
    });

    if state.config.followup_interval_mins > 0 {
        spawn_followup_scheduler(state.clone());
    }

    let web_state = state.clone();
    info!(
        "Starting webhook server on {}:{}",
        state.config.web_host, state.config.web_port
    );
    tokio::spawn(async move {
        crate::web::start_web_server(web_state).await;
    });

    info!("Runtime active; waiting for Ctrl-C");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow!("Failed to listen for Ctrl-C: {e}"))?;
    Ok(())
}

/// Optional in-process trigger for the drafting pass. The run is idempotent,
/// so overlapping with an external cron hitting /api/followup/run is safe.
pub fn spawn_followup_scheduler(state: Arc<AppState>) {
    tokio::spawn(async move {
        info!(
            "Follow-up scheduler started (every {} min)",
            state.config.followup_interval_mins
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(
            state.config.followup_interval_mins * 60,
        ));
        // If a pass falls behind, skip missed ticks instead of bursting.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match run_followups(&state, Utc::now()).await {
                Ok(report) => {
                    if !report.drafted.is_empty() || !report.failures.is_empty() {
                        info!(
                            "Follow-up scheduler: {} drafted, {} failed (scanned {})",
                            report.drafted.len(),
                            report.failures.len(),
                            report.scanned
                        );
                    }
                }
                Err(e) => error!("Follow-up scheduler run failed: {e}"),
            }
        }
    });
}

#[cfg(test)]
impl AppState {
    pub fn for_tests(config: Config, db: Database, messenger: Box<dyn Messenger>) -> AppState {
        AppState {
            config,
            db: Arc::new(db),
            llm: Box::new(test_support::FixedText("ok")),
            messenger: Arc::from(messenger),
        }
    }

    pub fn for_tests_with_llm(
        config: Config,
        db: Database,
        llm: Box<dyn TextGenerator>,
    ) -> AppState {
        AppState {
            config,
            db: Arc::new(db),
            llm,
            messenger: Arc::new(test_support::StubMessenger::sending_ok()),
        }
    }
}
