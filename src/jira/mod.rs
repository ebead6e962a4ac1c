// jirabackup/src/jira/mod.rs
pub(crate) mod client;
pub(crate) mod models;

pub use client::JiraClient;
