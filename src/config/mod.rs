// jirabackup/src/config/mod.rs
//! Run configuration.
//!
//! Everything the run needs is read once, validated, and handed to the runner as an
//! [`AppConfig`]. Values come from the environment first; the Jira credentials and the
//! Slack webhook fall back to the SSM Parameter Store under `SSM_PREFIX`.

mod ssm;

pub use ssm::SsmParameterStore;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::errors::{BackupError, Result};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_KEY_PREFIX: &str = "jira";
pub const DEFAULT_SLACK_ICON: &str = ":atlassian-jra:";
pub const DEFAULT_PART_SIZE_MB: u64 = 8;
/// S3 rejects multipart parts below 5 MiB (except the last one).
pub const MIN_PART_SIZE_MB: u64 = 5;
/// S3's ceiling for a single part, 5 GiB.
pub const MAX_PART_SIZE_MB: u64 = 5120;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Source of plain settings, normally the process environment.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from `std::env`.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Secret store consulted when a value is missing from the environment.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_parameter(&self, path: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Start a new export job (`CREATE_BACKUP=enabled`).
    Trigger,
    /// Archive the job Jira (or a Jira automation rule) started last.
    Lookup,
}

#[derive(Clone)]
pub struct JiraConfig {
    pub site: String,
    pub user: String,
    pub api_token: String,
    pub include_attachments: bool,
    pub trigger_mode: TriggerMode,
    pub poll_interval: Duration,
    /// `None` polls until Jira reports a result.
    pub max_poll_attempts: Option<u32>,
}

impl fmt::Debug for JiraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JiraConfig")
            .field("site", &self.site)
            .field("user", &self.user)
            .field("api_token", &"***")
            .field("include_attachments", &self.include_attachments)
            .field("trigger_mode", &self.trigger_mode)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub prefix: String,
    pub part_size: usize,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Empty disables delivery; messages are only logged.
    pub webhook_url: String,
    pub channel: String,
    pub username: String,
    pub icon_emoji: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jira: JiraConfig,
    pub storage: StorageConfig,
    pub slack: SlackConfig,
}

impl AppConfig {
    pub async fn load(env: &dyn EnvSource, params: &dyn ParameterStore) -> Result<Self> {
        let resolver = Resolver {
            env,
            params,
            ssm_prefix: env.var("SSM_PREFIX").filter(|p| !p.trim().is_empty()),
        };

        let site = resolver.secret("JIRA_SITE", "site").await?;
        let user = resolver.secret("JIRA_USER", "user").await?;
        let api_token = resolver.secret("JIRA_API_TOKEN", "api-token").await?;
        let webhook_url = resolver.optional_secret("JIRA_SLACK_URL", "slack-url").await?;

        let poll_interval_secs = parse_number(
            "POLL_INTERVAL_SECS",
            env.var("POLL_INTERVAL_SECS"),
            DEFAULT_POLL_INTERVAL_SECS,
        )?;
        if poll_interval_secs == 0 {
            return Err(BackupError::Config("POLL_INTERVAL_SECS must be at least 1".into()));
        }

        let jira = JiraConfig {
            site: non_empty("JIRA_SITE", site)?,
            user: non_empty("JIRA_USER", user)?,
            api_token: non_empty("JIRA_API_TOKEN", api_token)?,
            include_attachments: parse_bool("INCLUDE_ATTACHMENTS", env.var("INCLUDE_ATTACHMENTS"), true)?,
            trigger_mode: parse_trigger_mode(env.var("CREATE_BACKUP"))?,
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_poll_attempts: match parse_number::<u32>("MAX_POLL_ATTEMPTS", env.var("MAX_POLL_ATTEMPTS"), 0)? {
                0 => None,
                n => Some(n),
            },
        };

        let part_size_mb = parse_number("UPLOAD_PART_SIZE_MB", env.var("UPLOAD_PART_SIZE_MB"), DEFAULT_PART_SIZE_MB)?;
        if !(MIN_PART_SIZE_MB..=MAX_PART_SIZE_MB).contains(&part_size_mb) {
            return Err(BackupError::Config(format!(
                "UPLOAD_PART_SIZE_MB must be between {MIN_PART_SIZE_MB} and {MAX_PART_SIZE_MB}, got {part_size_mb}"
            )));
        }
        let part_size = part_size_mb
            .checked_mul(1024 * 1024)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| {
                BackupError::Config(format!("UPLOAD_PART_SIZE_MB={part_size_mb} does not fit in memory on this platform"))
            })?;
        let max_concurrency = parse_number(
            "UPLOAD_MAX_CONCURRENCY",
            env.var("UPLOAD_MAX_CONCURRENCY"),
            DEFAULT_MAX_CONCURRENCY,
        )?;
        if max_concurrency == 0 {
            return Err(BackupError::Config("UPLOAD_MAX_CONCURRENCY must be at least 1".into()));
        }

        let storage = StorageConfig {
            bucket: non_empty("BACKUP_S3", env.var("BACKUP_S3").unwrap_or_default())?,
            prefix: env
                .var("BACKUP_PREFIX")
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            part_size,
            max_concurrency,
        };

        let slack = if webhook_url.trim().is_empty() {
            SlackConfig {
                webhook_url: String::new(),
                channel: env.var("SLACK_CHANNEL").unwrap_or_default(),
                username: env.var("SLACK_USERNAME").unwrap_or_default(),
                icon_emoji: slack_icon(env),
            }
        } else {
            SlackConfig {
                webhook_url,
                channel: non_empty("SLACK_CHANNEL", env.var("SLACK_CHANNEL").unwrap_or_default())?,
                username: non_empty("SLACK_USERNAME", env.var("SLACK_USERNAME").unwrap_or_default())?,
                icon_emoji: slack_icon(env),
            }
        };

        Ok(AppConfig { jira, storage, slack })
    }
}

struct Resolver<'a> {
    env: &'a dyn EnvSource,
    params: &'a dyn ParameterStore,
    ssm_prefix: Option<String>,
}

impl Resolver<'_> {
    /// Environment first, then `{SSM_PREFIX}/{name}`.
    async fn secret(&self, env_key: &str, name: &str) -> Result<String> {
        if let Some(value) = self.env.var(env_key) {
            return Ok(value);
        }
        let prefix = self.ssm_prefix.as_deref().ok_or_else(|| {
            BackupError::Config(format!("{env_key} must be set (or SSM_PREFIX to read it from the parameter store)"))
        })?;
        self.fetch(prefix, name).await
    }

    /// Like [`Self::secret`], but resolves to an empty string when neither source is configured.
    async fn optional_secret(&self, env_key: &str, name: &str) -> Result<String> {
        if let Some(value) = self.env.var(env_key) {
            return Ok(value);
        }
        match self.ssm_prefix.as_deref() {
            Some(prefix) => self.fetch(prefix, name).await,
            None => Ok(String::new()),
        }
    }

    async fn fetch(&self, prefix: &str, name: &str) -> Result<String> {
        let path = format!("{}/{}", prefix.trim_end_matches('/'), name);
        tracing::debug!(%path, "reading parameter from store");
        self.params
            .get_parameter(&path)
            .await
            .map_err(|err| BackupError::Config(format!("Unable to fetch parameter [{path}]: {err:#}")))
    }
}

fn non_empty(key: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BackupError::Config(format!("{key} must be set and non-empty")));
    }
    Ok(trimmed.to_string())
}

fn slack_icon(env: &dyn EnvSource) -> String {
    env.var("SLACK_ICON")
        .filter(|icon| !icon.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SLACK_ICON.to_string())
}

fn parse_bool(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(BackupError::Config(format!("{key} must be 'true' or 'false', got '{v}'"))),
    }
}

fn parse_trigger_mode(raw: Option<String>) -> Result<TriggerMode> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(TriggerMode::Lookup),
        Some(v) if v.eq_ignore_ascii_case("enabled") => Ok(TriggerMode::Trigger),
        Some(v) if v.eq_ignore_ascii_case("disabled") => Ok(TriggerMode::Lookup),
        Some(v) => Err(BackupError::Config(format!(
            "CREATE_BACKUP must be 'enabled' or 'disabled', got '{v}'"
        ))),
    }
}

fn parse_number<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|err| BackupError::Config(format!("{key} is not a valid number ('{v}'): {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub(crate) struct MapEnv(pub HashMap<String, String>);

    impl MapEnv {
        pub(crate) fn new(pairs: &[(&str, &str)]) -> Self {
            MapEnv(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        }
    }

    impl EnvSource for MapEnv {
        fn var(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    #[derive(Default)]
    pub(crate) struct MapStore {
        values: HashMap<String, String>,
        pub(crate) requested: Mutex<Vec<String>>,
    }

    impl MapStore {
        fn with(pairs: &[(&str, &str)]) -> Self {
            MapStore {
                values: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                requested: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl ParameterStore for MapStore {
        async fn get_parameter(&self, path: &str) -> anyhow::Result<String> {
            self.requested.lock().unwrap().push(path.to_string());
            self.values
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("ParameterNotFound: {path}"))
        }
    }

    fn base_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("JIRA_SITE", "acme.atlassian.net"),
            ("JIRA_USER", "ops@acme.test"),
            ("JIRA_API_TOKEN", "secret-token"),
            ("BACKUP_S3", "acme-backups"),
        ]
    }

    #[tokio::test]
    async fn test_load_defaults_from_env_only() -> anyhow::Result<()> {
        let store = MapStore::default();
        let config = AppConfig::load(&MapEnv::new(&base_env()), &store).await?;

        assert_eq!(config.jira.site, "acme.atlassian.net");
        assert!(config.jira.include_attachments);
        assert_eq!(config.jira.trigger_mode, TriggerMode::Lookup);
        assert_eq!(config.jira.poll_interval, Duration::from_secs(2));
        assert_eq!(config.jira.max_poll_attempts, None);
        assert_eq!(config.storage.prefix, "jira");
        assert_eq!(config.storage.part_size, 8 * 1024 * 1024);
        assert_eq!(config.storage.max_concurrency, 4);
        assert_eq!(config.slack.webhook_url, "");
        assert_eq!(config.slack.icon_emoji, ":atlassian-jra:");
        assert!(store.requested.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_site_without_ssm_prefix_fails_fast() {
        let env = MapEnv::new(&[("JIRA_USER", "u"), ("JIRA_API_TOKEN", "t"), ("BACKUP_S3", "b")]);
        let err = AppConfig::load(&env, &MapStore::default()).await.unwrap_err();
        assert!(matches!(err, BackupError::Config(ref msg) if msg.contains("JIRA_SITE")));
    }

    #[tokio::test]
    async fn test_empty_required_value_is_rejected() {
        let mut pairs = base_env();
        pairs.retain(|(k, _)| *k != "BACKUP_S3");
        pairs.push(("BACKUP_S3", "  "));
        let err = AppConfig::load(&MapEnv::new(&pairs), &MapStore::default()).await.unwrap_err();
        assert!(matches!(err, BackupError::Config(ref msg) if msg.contains("BACKUP_S3")));
    }

    #[tokio::test]
    async fn test_secrets_fall_back_to_parameter_store() -> anyhow::Result<()> {
        let env = MapEnv::new(&[
            ("SSM_PREFIX", "/ops/jira/"),
            ("JIRA_SITE", "acme.atlassian.net"),
            ("BACKUP_S3", "acme-backups"),
            ("SLACK_CHANNEL", "#backups"),
            ("SLACK_USERNAME", "backup-bot"),
        ]);
        let store = MapStore::with(&[
            ("/ops/jira/user", "ssm-user"),
            ("/ops/jira/api-token", "ssm-token"),
            ("/ops/jira/slack-url", "https://hooks.slack.test/T000"),
        ]);

        let config = AppConfig::load(&env, &store).await?;

        assert_eq!(config.jira.user, "ssm-user");
        assert_eq!(config.jira.api_token, "ssm-token");
        assert_eq!(config.slack.webhook_url, "https://hooks.slack.test/T000");
        assert_eq!(
            *store.requested.lock().unwrap(),
            vec!["/ops/jira/user", "/ops/jira/api-token", "/ops/jira/slack-url"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_parameter_store_failure_names_the_path() {
        let env = MapEnv::new(&[("SSM_PREFIX", "/ops/jira"), ("BACKUP_S3", "b")]);
        let err = AppConfig::load(&env, &MapStore::default()).await.unwrap_err();
        assert!(matches!(err, BackupError::Config(ref msg) if msg.contains("[/ops/jira/site]")));
    }

    #[tokio::test]
    async fn test_webhook_requires_channel_and_username() {
        let mut pairs = base_env();
        pairs.push(("JIRA_SLACK_URL", "https://hooks.slack.test/T000"));
        let err = AppConfig::load(&MapEnv::new(&pairs), &MapStore::default()).await.unwrap_err();
        assert!(matches!(err, BackupError::Config(ref msg) if msg.contains("SLACK_CHANNEL")));
    }

    #[tokio::test]
    async fn test_flags_and_limits_are_parsed() -> anyhow::Result<()> {
        let mut pairs = base_env();
        pairs.extend([
            ("INCLUDE_ATTACHMENTS", "False"),
            ("CREATE_BACKUP", "enabled"),
            ("POLL_INTERVAL_SECS", "15"),
            ("MAX_POLL_ATTEMPTS", "40"),
            ("UPLOAD_PART_SIZE_MB", "16"),
            ("UPLOAD_MAX_CONCURRENCY", "2"),
            ("BACKUP_PREFIX", "/atlassian/"),
        ]);
        let config = AppConfig::load(&MapEnv::new(&pairs), &MapStore::default()).await?;

        assert!(!config.jira.include_attachments);
        assert_eq!(config.jira.trigger_mode, TriggerMode::Trigger);
        assert_eq!(config.jira.poll_interval, Duration::from_secs(15));
        assert_eq!(config.jira.max_poll_attempts, Some(40));
        assert_eq!(config.storage.part_size, 16 * 1024 * 1024);
        assert_eq!(config.storage.max_concurrency, 2);
        assert_eq!(config.storage.prefix, "atlassian");
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_values_are_rejected() {
        for (key, value) in [
            ("CREATE_BACKUP", "yes"),
            ("INCLUDE_ATTACHMENTS", "maybe"),
            ("POLL_INTERVAL_SECS", "soon"),
            ("POLL_INTERVAL_SECS", "0"),
            ("UPLOAD_PART_SIZE_MB", "5121"),
            ("UPLOAD_PART_SIZE_MB", "17592186044416"),
            ("UPLOAD_PART_SIZE_MB", "1"),
            ("UPLOAD_MAX_CONCURRENCY", "0"),
        ] {
            let mut pairs = base_env();
            pairs.push((key, value));
            let result = AppConfig::load(&MapEnv::new(&pairs), &MapStore::default()).await;
            assert!(
                matches!(result, Err(BackupError::Config(ref msg)) if msg.contains(key)),
                "{key}={value} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_part_size_bounds_are_inclusive() -> anyhow::Result<()> {
        for (value, expected) in [("5", 5 * 1024 * 1024), ("5120", 5120 * 1024 * 1024)] {
            let mut pairs = base_env();
            pairs.push(("UPLOAD_PART_SIZE_MB", value));
            let config = AppConfig::load(&MapEnv::new(&pairs), &MapStore::default()).await?;
            assert_eq!(config.storage.part_size, expected);
        }
        Ok(())
    }

    #[test]
    fn test_debug_output_hides_api_token() {
        let jira = JiraConfig {
            site: "acme.atlassian.net".into(),
            user: "ops".into(),
            api_token: "secret-token".into(),
            include_attachments: true,
            trigger_mode: TriggerMode::Lookup,
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: None,
        };
        assert!(!format!("{jira:?}").contains("secret-token"));
    }
}
