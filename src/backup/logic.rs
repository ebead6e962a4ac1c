// jirabackup/src/backup/logic.rs
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{error, info};

use super::s3_upload::{ByteChunks, ObjectSink};
use crate::config::{AppConfig, StorageConfig, TriggerMode};
use crate::errors::{BackupError, Result};
use crate::jira::JiraClient;
use crate::notify::SlackNotifier;

pub const FREQUENCY_LIMIT_MESSAGE: &str =
    ":warning: Jira backup failed due to frequency limitation(every 48 hours)";

/// `<prefix>/<YYYYMMDDHHMMSS>.zip`
pub fn upload_key(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}/{}.zip", prefix, at.format("%Y%m%d%H%M%S"))
}

/// One backup run: find or start the export job, wait for it, archive it to S3.
pub struct BackupRunner {
    jira: JiraClient,
    notifier: SlackNotifier,
    sink: Arc<dyn ObjectSink>,
    trigger_mode: TriggerMode,
    storage: StorageConfig,
    clock: fn() -> DateTime<Utc>,
}

impl BackupRunner {
    pub fn new(app_config: &AppConfig, sink: Arc<dyn ObjectSink>) -> Result<Self> {
        Ok(Self {
            jira: JiraClient::new(&app_config.jira)?,
            notifier: SlackNotifier::new(app_config.slack.clone())?,
            sink,
            trigger_mode: app_config.jira.trigger_mode,
            storage: app_config.storage.clone(),
            clock: Utc::now,
        })
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the whole flow and returns the key the archive was stored under.
    pub async fn run(&self) -> Result<String> {
        let task_id = match self.trigger_mode {
            TriggerMode::Trigger => self.trigger_backup().await?,
            TriggerMode::Lookup => {
                let task_id = self.jira.last_task_id().await?;
                info!(%task_id, "Last backup task id");
                task_id
            }
        };

        let url = self.jira.poll_progress(&task_id).await?;
        info!(%url, "The backup download url is ready");
        self.stream_to_storage(&url).await
    }

    /// Jira refusing a new export is almost always the 48h throttle, so the channel hears about it.
    async fn trigger_backup(&self) -> Result<String> {
        match self.jira.trigger_backup().await {
            Err(err) if err.status().is_some() => {
                let _ = self.notifier.notify(FREQUENCY_LIMIT_MESSAGE).await;
                Err(err)
            }
            other => other,
        }
    }

    pub async fn stream_to_storage(&self, url: &str) -> Result<String> {
        let bucket = &self.storage.bucket;
        let key = upload_key(&self.storage.prefix, (self.clock)());
        info!(%bucket, %key, "Streaming to S3");

        // No notification on this path, only the trigger failure is announced.
        let response = match self.jira.open_download(url).await {
            Ok(response) => response,
            Err(err) => {
                error!(%url, error = %err, "Get download file failed");
                return Err(err);
            }
        };

        let body: ByteChunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();

        let bytes = self
            .sink
            .put_stream(bucket, &key, body)
            .await
            .map_err(|source| BackupError::Storage {
                bucket: bucket.clone(),
                key: key.clone(),
                source: source.into(),
            })?;

        info!(%bucket, %key, bytes, "Stream done");
        let _ = self
            .notifier
            .notify(&format!(":white_check_mark: Jira backup is completed {key}"))
            .await;
        Ok(key)
    }
}
