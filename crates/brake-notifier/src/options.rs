// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Static notifier options.
//!
//! These are supplied by the host application and act as the fallback whenever the remote
//! configuration is silent about a category. [`NotifierOptions::from_env`] derives them from
//! the process environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::filter::RedactKey;
use crate::remote_config::Category;

/// Default error and APM intake host.
pub const DEFAULT_HOST: &str = "https://api.airbrake.io";
/// Default location of the remote config payloads.
pub const DEFAULT_REMOTE_CONFIG_BASE_URL: &str =
    "https://v1-staging-notifier-configs.s3.amazonaws.com";
/// Default upper bound on a single config fetch.
pub const DEFAULT_REMOTE_CONFIG_TIMEOUT: Duration = Duration::from_secs(10);

const ENV_PROJECT_ID: &str = "BRAKE_PROJECT_ID";
const ENV_PROJECT_KEY: &str = "BRAKE_PROJECT_KEY";
const ENV_ENVIRONMENT: &str = "BRAKE_ENVIRONMENT";
const ENV_REVISION: &str = "BRAKE_REVISION";
const ENV_HOST: &str = "BRAKE_HOST";
const ENV_APM_HOST: &str = "BRAKE_APM_HOST";
const ENV_REMOTE_CONFIG_BASE_URL: &str = "BRAKE_REMOTE_CONFIG_BASE_URL";
const ENV_REMOTE_CONFIG_TIMEOUT_SECS: &str = "BRAKE_REMOTE_CONFIG_TIMEOUT_SECS";
const ENV_DISABLE_REMOTE_CONFIG: &str = "BRAKE_DISABLE_REMOTE_CONFIG";
const ENV_DISABLE_ERROR_NOTIFICATIONS: &str = "BRAKE_DISABLE_ERROR_NOTIFICATIONS";
const ENV_DISABLE_APM: &str = "BRAKE_DISABLE_APM";
/// Comma separated; entries wrapped in slashes (`/_token$/`) are regular expressions.
const ENV_KEYS_BLOCKLIST: &str = "BRAKE_KEYS_BLOCKLIST";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BRAKE_PROJECT_ID environment variable is not set")]
    MissingProjectId,
    #[error("invalid BRAKE_PROJECT_ID value: {0}")]
    InvalidProjectId(String),
    #[error("invalid BRAKE_REMOTE_CONFIG_TIMEOUT_SECS value: {0}")]
    InvalidTimeout(String),
    #[error("invalid blocklist pattern: {0}")]
    InvalidBlocklistPattern(#[from] regex::Error),
}

/// Static notifier configuration. Remote config overrides parts of it at runtime.
#[derive(Debug, Clone)]
pub struct NotifierOptions {
    pub project_id: i64,
    pub project_key: String,
    /// Copied into every notice context under `environment`.
    pub environment: Option<String>,
    /// Copied into every notice context under `revision`.
    pub revision: Option<String>,
    /// Error notice intake host.
    pub host: String,
    /// APM intake host.
    pub apm_host: String,
    pub remote_config_base_url: String,
    /// Timeout applied to every config fetch.
    pub remote_config_timeout: Duration,
    /// When set the poller is never started and the static options stay authoritative.
    pub disable_remote_config: bool,
    pub disable_error_notifications: bool,
    pub disable_apm: bool,
    /// Keys whose values are replaced with `[Filtered]` in every notice.
    pub keys_blocklist: Vec<RedactKey>,
}

impl Default for NotifierOptions {
    fn default() -> Self {
        Self {
            project_id: 0,
            project_key: String::new(),
            environment: None,
            revision: None,
            host: DEFAULT_HOST.to_string(),
            apm_host: DEFAULT_HOST.to_string(),
            remote_config_base_url: DEFAULT_REMOTE_CONFIG_BASE_URL.to_string(),
            remote_config_timeout: DEFAULT_REMOTE_CONFIG_TIMEOUT,
            disable_remote_config: false,
            disable_error_notifications: false,
            disable_apm: false,
            keys_blocklist: Vec::new(),
        }
    }
}

impl NotifierOptions {
    /// Builds options from the current process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_iter(env::vars())
    }

    /// Builds options from explicit key/value pairs.
    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| map.get(key).and_then(|value| non_empty(value));

        let project_id = get(ENV_PROJECT_ID).ok_or(ConfigError::MissingProjectId)?;
        let project_id = project_id
            .parse::<i64>()
            .map_err(|_| ConfigError::InvalidProjectId(project_id.clone()))?;

        let remote_config_timeout = match get(ENV_REMOTE_CONFIG_TIMEOUT_SECS) {
            Some(secs) => secs
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::InvalidTimeout(secs))?,
            None => DEFAULT_REMOTE_CONFIG_TIMEOUT,
        };

        let keys_blocklist = match get(ENV_KEYS_BLOCKLIST) {
            Some(list) => parse_blocklist(&list)?,
            None => Vec::new(),
        };

        let defaults = Self::default();
        Ok(Self {
            project_id,
            project_key: get(ENV_PROJECT_KEY).unwrap_or_default(),
            environment: get(ENV_ENVIRONMENT),
            revision: get(ENV_REVISION),
            host: get(ENV_HOST).unwrap_or(defaults.host),
            apm_host: get(ENV_APM_HOST).unwrap_or(defaults.apm_host),
            remote_config_base_url: get(ENV_REMOTE_CONFIG_BASE_URL)
                .unwrap_or(defaults.remote_config_base_url),
            remote_config_timeout,
            disable_remote_config: parse_bool(map.get(ENV_DISABLE_REMOTE_CONFIG), false),
            disable_error_notifications: parse_bool(
                map.get(ENV_DISABLE_ERROR_NOTIFICATIONS),
                false,
            ),
            disable_apm: parse_bool(map.get(ENV_DISABLE_APM), false),
            keys_blocklist,
        })
    }

    /// Static enablement of a category, used when remote config has no matching setting.
    pub fn category_enabled(&self, category: Category) -> bool {
        match category {
            Category::Errors => !self.disable_error_notifications,
            Category::Apm => !self.disable_apm,
        }
    }

    /// Static intake host of a category.
    pub fn category_host(&self, category: Category) -> &str {
        match category {
            Category::Errors => &self.host,
            Category::Apm => &self.apm_host,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_bool(value: Option<&String>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

fn parse_blocklist(list: &str) -> Result<Vec<RedactKey>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| RedactKey::parse(entry).map_err(ConfigError::from))
        .collect()
}
