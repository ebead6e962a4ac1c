mod logic;
pub(crate) mod s3_upload;

use aws_config::SdkConfig;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::errors::Result;
use logic::BackupRunner;
use s3_upload::S3ObjectSink;

/// Public entry point for the backup process.
/// Wires the S3 sink into a [`BackupRunner`] and returns the key the archive landed under.
pub async fn run_backup_flow(app_config: &AppConfig, sdk_config: &SdkConfig) -> Result<String> {
    let sink = Arc::new(S3ObjectSink::new(sdk_config, &app_config.storage));
    let runner = BackupRunner::new(app_config, sink)?;
    runner.run().await
}
