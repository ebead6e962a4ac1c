//! Jira Cloud backup runner
//!
//! Triggers (or finds) a Jira backup export, waits for it, streams the archive to S3
//! and reports the outcome to Slack.

// jirabackup/src/main.rs
mod backup;
mod config;
mod errors;
mod jira;
mod notify;
mod telemetry;

use anyhow::{Context, Result};
use config::{AppConfig, ProcessEnv, SsmParameterStore};
use std::process::ExitCode;
use tracing::{error, info};

/// Main entry point; one invocation is one backup run.
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    telemetry::init();

    match run_app().await {
        Ok(key) => {
            info!(%key, "✅ Jira backup completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<String> {
    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;

    let parameters = SsmParameterStore::new(&sdk_config);
    let app_config = AppConfig::load(&ProcessEnv, &parameters)
        .await
        .context("Failed to load configuration")?;

    info!(
        mode = ?app_config.jira.trigger_mode,
        site = %app_config.jira.site,
        bucket = %app_config.storage.bucket,
        "🚀 Starting Jira backup"
    );

    backup::run_backup_flow(&app_config, &sdk_config)
        .await
        .context("Backup process failed")
}
