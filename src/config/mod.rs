//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;
pub mod workflow;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

pub use workflow::WorkflowConfig;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub devops: Option<DevOpsConfig>,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub environment: String,
    pub workflow_config: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// Azure DevOps connection settings. Present only when org, project and
/// token are all set.
#[derive(Debug, Clone)]
pub struct DevOpsConfig {
    pub organization: String,
    pub project: String,
    pub pat: SecretString,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let devops = match (
            optional_var("AZURE_DEVOPS_ORG"),
            optional_var("AZURE_DEVOPS_PROJECT"),
            optional_var("AZURE_DEVOPS_PAT"),
        ) {
            (Some(organization), Some(project), Some(pat)) => Some(DevOpsConfig {
                organization,
                project,
                pat: SecretString::from(pat),
            }),
            _ => None,
        };

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            devops,
            poll_interval: Duration::from_secs(parsed_var("POLL_INTERVAL_SECS", 3)?),
            shutdown_grace: Duration::from_secs(parsed_var("SHUTDOWN_GRACE_SECS", 5)?),
            environment: optional_var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            workflow_config: optional_var("WORKFLOW_CONFIG").map(PathBuf::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The workflow settings: from `WORKFLOW_CONFIG` if set, else defaults.
    pub fn load_workflow(&self) -> Result<WorkflowConfig> {
        match &self.workflow_config {
            Some(path) => WorkflowConfig::load(path),
            None => Ok(WorkflowConfig::default()),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        None => Ok(default),
    }
}
