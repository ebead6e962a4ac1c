// jirabackup/src/jira/models.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST .../runbackup`. Jira expects the flags as strings.
#[derive(Debug, Serialize)]
pub(crate) struct RunBackupRequest {
    #[serde(rename = "cbAttachments")]
    pub cb_attachments: String,
    #[serde(rename = "exportToCloud")]
    pub export_to_cloud: String,
}

impl RunBackupRequest {
    pub fn new(include_attachments: bool) -> Self {
        Self {
            cb_attachments: include_attachments.to_string(),
            export_to_cloud: "true".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunBackupResponse {
    #[serde(rename = "taskId")]
    pub task_id: Value,
}

impl RunBackupResponse {
    /// Jira has returned the id both as a JSON string and as a number.
    pub fn task_id(&self) -> Option<String> {
        match &self.task_id {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Raw body of `GET .../getProgress`.
#[derive(Debug, Deserialize)]
pub(crate) struct ProgressResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: String,
    pub progress: String,
    pub description: String,
}

/// Latest known state of an export job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending(JobSnapshot),
    Complete {
        snapshot: JobSnapshot,
        result_token: String,
    },
}

impl JobStatus {
    pub fn snapshot(&self) -> &JobSnapshot {
        match self {
            JobStatus::Pending(snapshot) => snapshot,
            JobStatus::Complete { snapshot, .. } => snapshot,
        }
    }
}

impl From<ProgressResponse> for JobStatus {
    fn from(raw: ProgressResponse) -> Self {
        let snapshot = JobSnapshot {
            status: raw.status.unwrap_or_default(),
            progress: match raw.progress {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
            description: raw.description.unwrap_or_default(),
        };
        match raw.result {
            Some(result_token) => JobStatus::Complete {
                snapshot,
                result_token,
            },
            None => JobStatus::Pending(snapshot),
        }
    }
}
