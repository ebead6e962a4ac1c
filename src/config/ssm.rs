// jirabackup/src/config/ssm.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ssm as ssm;

use super::ParameterStore;

/// Reads (decrypted) SecureString parameters from AWS Systems Manager.
pub struct SsmParameterStore {
    client: ssm::Client,
}

impl SsmParameterStore {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: ssm::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_parameter(&self, path: &str) -> Result<String> {
        let output = self
            .client
            .get_parameter()
            .name(path)
            .with_decryption(true)
            .send()
            .await
            .map_err(|err| anyhow::anyhow!("{}", ssm::error::DisplayErrorContext(err)))
            .with_context(|| format!("GetParameter failed for {path}"))?;

        output
            .parameter()
            .and_then(|p| p.value())
            .map(str::to_string)
            .with_context(|| format!("Parameter {path} has no value"))
    }
}
