use clap::{Parser, Subcommand};
use tracing::info;

use leadbox::config::Config;
use leadbox::db::Database;
use leadbox::{followup, logging, runtime, sync};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    name = "leadbox",
    version = VERSION,
    about = "Messenger lead CRM: sync, webhook ingestion, auto follow-up drafting"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Start the webhook/API server (and the optional follow-up ticker)
    Start,
    /// Pull remote conversations once and reconcile them into storage
    Sync,
    /// Run one follow-up eligibility scan and drafting pass
    Followup,
    /// Store the page access token for the operator account
    Token { value: String },
    /// Show version
    Version,
}

fn print_version() {
    println!("leadbox {VERSION}");
}

fn build_state(config: Config, db: Database) -> runtime::AppState {
    let messenger = std::sync::Arc::new(leadbox::graph::GraphClient::new(&config.graph_api_base));
    let llm = leadbox::llm::create_provider(&config);
    runtime::AppState {
        config,
        db: std::sync::Arc::new(db),
        llm,
        messenger,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_console_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(MainCommand::Start) => {
            let config = Config::load()?;
            let db = Database::new(&config.data_dir)?;
            runtime::run(config, db).await
        }
        Some(MainCommand::Sync) => {
            let config = Config::load()?;
            let db = Database::new(&config.data_dir)?;
            let state = build_state(config, db);
            let report = sync::run_sync(&state).await?;
            info!(
                "Synced {} conversations ({} skipped, {} page(s) fetched)",
                report.conversations_synced, report.threads_skipped, report.pages_fetched
            );
            if let Some(err) = &report.page_error {
                info!("Stopped early on a remote error: {err}");
            }
            for err in &report.thread_errors {
                info!("Thread failed: {err}");
            }
            Ok(())
        }
        Some(MainCommand::Followup) => {
            let config = Config::load()?;
            let db = Database::new(&config.data_dir)?;
            let state = build_state(config, db);
            let report = followup::run_followups(&state, chrono::Utc::now()).await?;
            info!(
                "Follow-up pass: {} drafted, {} failed (scanned {})",
                report.drafted.len(),
                report.failures.len(),
                report.scanned
            );
            for drafted in &report.drafted {
                println!("{}: {}", drafted.conversation_id, drafted.response);
            }
            Ok(())
        }
        Some(MainCommand::Token { value }) => {
            let config = Config::load()?;
            let db = Database::new(&config.data_dir)?;
            db.set_access_token(&config.operator_account_id, &value)?;
            println!("Access token stored for account '{}'.", config.operator_account_id);
            Ok(())
        }
        Some(MainCommand::Version) => {
            print_version();
            Ok(())
        }
    }
}
