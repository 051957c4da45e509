// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Server-controlled notifier configuration.
//!
//! [`RemoteConfig`] holds the latest [`ConfigSnapshot`] fetched by the poller and derives the
//! effective values (poll interval, config route, per-category enablement and endpoint) from
//! it, falling back to the static [`NotifierOptions`] whenever the snapshot is silent.
//!
//! The snapshot is replaced wholesale behind a lock and handed out as an `Arc`, so a reader
//! either sees the previous snapshot or the new one, never a mix of both.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::options::NotifierOptions;

/// How often the config API is polled when the snapshot does not say otherwise.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Version segment of the config route.
pub const API_VERSION: &str = "2020-06-18";

/// A reporting feature that remote configuration can toggle and redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Errors,
    Apm,
}

impl Category {
    /// Setting name used for this category in the config payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Errors => "errors",
            Self::Apm => "apm",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category entry of a config payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSetting {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub enabled: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub endpoint: String,
}

/// Config payload as returned by the config API. Missing fields take their zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    #[serde(deserialize_with = "null_as_default")]
    pub project_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub updated_at: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub poll_sec: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub config_route: String,
    #[serde(deserialize_with = "null_as_default")]
    pub settings: Vec<RemoteSetting>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ConfigSnapshot {
    /// Poll interval carried by this snapshot, or [`DEFAULT_INTERVAL`] when it is not positive.
    pub fn interval(&self) -> Duration {
        match u64::try_from(self.poll_sec) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_INTERVAL,
        }
    }

    /// First setting whose name equals the category. The whole list is scanned.
    pub fn setting(&self, category: Category) -> Option<&RemoteSetting> {
        self.settings
            .iter()
            .find(|setting| setting.name == category.as_str())
    }
}

/// Holds the current snapshot and the static options it falls back to.
pub struct RemoteConfig {
    options: Arc<NotifierOptions>,
    snapshot: RwLock<Arc<ConfigSnapshot>>,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("project_id", &self.options.project_id)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl RemoteConfig {
    /// Creates a store holding an empty snapshot.
    pub fn new(options: Arc<NotifierOptions>) -> Self {
        Self {
            options,
            snapshot: RwLock::new(Arc::new(ConfigSnapshot::default())),
        }
    }

    /// Static options consulted whenever the snapshot is silent about a value.
    pub fn options(&self) -> &NotifierOptions {
        &self.options
    }

    /// Returns the current snapshot. All fields come from the same fetch.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swaps in a freshly fetched snapshot and returns the one it replaced.
    pub(crate) fn replace(&self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(snapshot))
    }

    /// Poll interval of the current snapshot, see [`ConfigSnapshot::interval`].
    pub fn interval(&self) -> Duration {
        self.snapshot().interval()
    }

    /// Base URL polled when the snapshot has no route override.
    pub fn base_url(&self) -> &str {
        &self.options.remote_config_base_url
    }

    /// URL of the config payload.
    ///
    /// The snapshot's route override wins over `base_host`. Trailing slashes and dashes on
    /// either are dropped before the versioned path is appended.
    pub fn config_route(&self, base_host: &str) -> String {
        let snapshot = self.snapshot();
        let base = if snapshot.config_route.is_empty() {
            base_host
        } else {
            snapshot.config_route.as_str()
        };
        format!(
            "{}/{API_VERSION}/config/{}/config.json",
            base.trim_end_matches(|c: char| c == '/' || c == '-'),
            self.options.project_id
        )
    }

    /// Whether the category should be reported at all.
    pub fn enabled(&self, category: Category) -> bool {
        self.enabled_in(&self.snapshot(), category)
    }

    /// Host events of this category are sent to.
    ///
    /// A non-empty endpoint in the matching setting overrides the static host; an empty one
    /// or a missing setting keeps it.
    pub fn endpoint_host(&self, category: Category) -> String {
        self.endpoint_host_in(&self.snapshot(), category)
    }

    /// Host for `category` when it is enabled, `None` otherwise.
    ///
    /// Both answers come from one snapshot, so a concurrent replacement can never pair the
    /// enablement of one fetch with the endpoint of another.
    pub fn route(&self, category: Category) -> Option<String> {
        let snapshot = self.snapshot();
        self.enabled_in(&snapshot, category)
            .then(|| self.endpoint_host_in(&snapshot, category))
    }

    fn enabled_in(&self, snapshot: &ConfigSnapshot, category: Category) -> bool {
        match snapshot.setting(category) {
            Some(setting) => setting.enabled,
            None => self.options.category_enabled(category),
        }
    }

    fn endpoint_host_in(&self, snapshot: &ConfigSnapshot, category: Category) -> String {
        match snapshot.setting(category) {
            Some(setting) if !setting.endpoint.is_empty() => setting.endpoint.clone(),
            _ => self.options.category_host(category).to_string(),
        }
    }
}
