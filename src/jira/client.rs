// jirabackup/src/jira/client.rs
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

use super::models::{JobStatus, ProgressResponse, RunBackupRequest, RunBackupResponse};
use crate::config::JiraConfig;
use crate::errors::{BackupError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backup export endpoints of one Jira Cloud site.
#[derive(Debug, Clone)]
struct Endpoints {
    run_backup: String,
    last_task_id: String,
    progress: Url,
    servlet: String,
}

impl Endpoints {
    /// `site` is a bare host (`acme.atlassian.net`) or a full origin (`http://127.0.0.1:8080`).
    fn from_site(site: &str) -> Result<Self> {
        let site = site.trim().trim_end_matches('/');
        let origin = if site.starts_with("http://") || site.starts_with("https://") {
            site.to_string()
        } else {
            format!("https://{site}")
        };
        let export = format!("{origin}/rest/backup/1/export");
        let progress = Url::parse(&format!("{export}/getProgress"))
            .map_err(|err| BackupError::Config(format!("JIRA_SITE '{site}' is not a valid host: {err}")))?;

        Ok(Self {
            run_backup: format!("{export}/runbackup"),
            last_task_id: format!("{export}/lastTaskId"),
            progress,
            servlet: format!("{origin}/plugins/servlet"),
        })
    }
}

/// Client for Jira's cloud backup API, authenticated with basic auth.
pub struct JiraClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    user: String,
    api_token: String,
    include_attachments: bool,
    poll_interval: Duration,
    max_poll_attempts: Option<u32>,
}

impl JiraClient {
    pub fn new(config: &JiraConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoints: Endpoints::from_site(&config.site)?,
            user: config.user.clone(),
            api_token: config.api_token.clone(),
            include_attachments: config.include_attachments,
            poll_interval: config.poll_interval,
            max_poll_attempts: config.max_poll_attempts,
        })
    }

    /// Starts a new cloud export and returns its task id.
    ///
    /// Jira only allows one export per 48 hours, so a rejection here is usually throttling.
    pub async fn trigger_backup(&self) -> Result<String> {
        let url = &self.endpoints.run_backup;
        let payload = RunBackupRequest::new(self.include_attachments);

        let response = self
            .http
            .post(url)
            .basic_auth(&self.user, Some(&self.api_token))
            .json(&payload)
            .send()
            .await?;

        let response = match ensure_ok(url, response).await {
            Ok(response) => response,
            Err(err) => {
                error!(%url, ?payload, "Backup process failed to start");
                return Err(err);
            }
        };

        let body = response.text().await?;
        let decoded: RunBackupResponse = decode(url, &body)?;
        let task_id = decoded.task_id().ok_or_else(|| BackupError::Decode {
            url: url.clone(),
            source: <serde_json::Error as serde::de::Error>::custom("taskId is missing or empty"),
        })?;

        info!(%task_id, "Backup process successfully started");
        Ok(task_id)
    }

    /// Id of the most recent export task, whoever started it.
    pub async fn last_task_id(&self) -> Result<String> {
        let url = &self.endpoints.last_task_id;
        let response = self
            .http
            .get(url)
            .basic_auth(&self.user, Some(&self.api_token))
            .send()
            .await?;
        let response = ensure_ok(url, response).await?;

        let body = response.text().await?;
        let task_id = body.trim();
        if task_id.is_empty() {
            return Err(BackupError::NoTaskId { url: url.clone() });
        }

        info!(%task_id, "Last task id");
        Ok(task_id.to_string())
    }

    /// One progress check for `task_id`.
    pub async fn job_status(&self, task_id: &str) -> Result<JobStatus> {
        let mut url = self.endpoints.progress.clone();
        url.query_pairs_mut().append_pair("taskId", task_id);
        let url_str = url.to_string();

        let response = self
            .http
            .get(url)
            .basic_auth(&self.user, Some(&self.api_token))
            .send()
            .await?;
        let response = ensure_ok(&url_str, response).await?;

        let body = response.text().await?;
        debug!(%task_id, %body, "progress response");
        let raw: ProgressResponse = decode(&url_str, &body)?;
        Ok(raw.into())
    }

    /// Waits for `task_id` to finish and returns the archive download URL.
    ///
    /// Polls every `poll_interval`, forever unless `max_poll_attempts` is set.
    pub async fn poll_progress(&self, task_id: &str) -> Result<String> {
        info!(%task_id, "Start to check task status");
        tokio::time::sleep(self.poll_interval).await;

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let status = self.job_status(task_id).await?;
            let snapshot = status.snapshot();
            info!(
                %task_id,
                status = %snapshot.status,
                progress = %snapshot.progress,
                description = %snapshot.description,
                "Current status"
            );

            match status {
                JobStatus::Complete { result_token, .. } => {
                    let download_url = self.download_url(&result_token);
                    info!(%download_url, "Download url");
                    return Ok(download_url);
                }
                JobStatus::Pending(_) => {
                    if let Some(max) = self.max_poll_attempts {
                        if attempts >= max {
                            return Err(BackupError::PollLimitExceeded {
                                task_id: task_id.to_string(),
                                attempts,
                            });
                        }
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    pub fn download_url(&self, result_token: &str) -> String {
        format!("{}/{}", self.endpoints.servlet, result_token.trim_start_matches('/'))
    }

    /// Issues the archive GET and returns the response once its status is 200.
    /// The body has not been read yet.
    pub async fn open_download(&self, url: &str) -> Result<Response> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.user, Some(&self.api_token))
            .send()
            .await?;
        ensure_ok(url, response).await
    }
}

async fn ensure_ok(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackupError::Request {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

fn decode<T: serde::de::DeserializeOwned>(url: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|source| BackupError::Decode {
        url: url.to_string(),
        source,
    })
}
