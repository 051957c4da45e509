// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Notifier wiring.
//!
//! The [`Notifier`] runs every outgoing notice through its [`FilterChain`], asks the
//! [`RemoteConfig`] whether error notifications are enabled and which host they go to, and
//! hands the notice to a [`Transport`]. Independently, its [`ConfigPoller`] keeps the remote
//! config fresh in the background.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::filter::{
    EnvironmentFilter, FilterChain, KeyRedactionFilter, NoticeFilter, SearchPathFilter,
    VcsRevisionFilter,
};
use crate::http::FetchError;
use crate::notice::Notice;
use crate::options::NotifierOptions;
use crate::poller::ConfigPoller;
use crate::remote_config::{Category, RemoteConfig};
use crate::vcs::GitReader;

/// Delivers notices to the intake. Batching and retries live behind this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, host: &str, notice: &Notice) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("failed to build remote config client: {0}")]
    RemoteConfigClient(#[from] FetchError),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

/// What happened to a notice handed to [`Notifier::notify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Delivered to the transport, addressed to this host.
    Sent { host: String },
    /// A filter dropped the notice.
    Filtered,
    /// Remote or static configuration has error notifications turned off.
    Disabled,
}

/// Filters notices and sends them where the remote config says, while polling it.
pub struct Notifier {
    options: Arc<NotifierOptions>,
    remote_config: Arc<RemoteConfig>,
    poller: ConfigPoller,
    filters: RwLock<FilterChain>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("project_id", &self.options.project_id)
            .field("poller", &self.poller)
            .finish()
    }
}

impl Notifier {
    /// Builds a notifier with the default filters installed, in this order: environment and
    /// revision enrichment, search path rewriting, revision backfill from git, and key
    /// redaction when a blocklist is configured.
    pub fn new(
        options: NotifierOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, NotifierError> {
        let options = Arc::new(options);
        let remote_config = Arc::new(RemoteConfig::new(Arc::clone(&options)));
        let poller = ConfigPoller::new(Arc::clone(&remote_config))?;

        let mut filters = FilterChain::new();
        filters.push(EnvironmentFilter::from_options(&options));
        filters.push(SearchPathFilter);
        filters.push(VcsRevisionFilter::new(GitReader));
        if !options.keys_blocklist.is_empty() {
            filters.push(KeyRedactionFilter::new(options.keys_blocklist.clone()));
        }

        Ok(Self {
            options,
            remote_config,
            poller,
            filters: RwLock::new(filters),
            transport,
        })
    }

    /// Static options this notifier was built with.
    pub fn options(&self) -> &NotifierOptions {
        &self.options
    }

    /// Store holding the latest remote config snapshot.
    pub fn remote_config(&self) -> &Arc<RemoteConfig> {
        &self.remote_config
    }

    /// Poller keeping [`Notifier::remote_config`] fresh.
    pub fn poller(&self) -> &ConfigPoller {
        &self.poller
    }

    /// Appends a filter after every filter already installed.
    pub fn add_filter<F>(&self, filter: F)
    where
        F: NoticeFilter + 'static,
    {
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(filter);
    }

    /// Starts polling remote config unless it is disabled in the options.
    ///
    /// Waits for the first fetch; its failure is logged by the poller and otherwise ignored,
    /// leaving the static options in effect.
    pub async fn start(&self) {
        if self.options.disable_remote_config {
            info!("Remote config disabled, using static notifier options");
            return;
        }
        let _ = self.poller.poll(log_effective_config).await;
    }

    /// Stops remote config polling.
    pub fn stop(&self) {
        self.poller.stop_polling();
    }

    /// Stops remote config polling and waits for the poller task to exit.
    pub async fn close(&self) {
        self.poller.shutdown().await;
    }

    /// Host to send events of `category` to, or `None` when the category is disabled.
    pub fn route(&self, category: Category) -> Option<String> {
        self.remote_config.route(category)
    }

    /// Runs the filters over `notice` without sending it.
    pub fn filter(&self, notice: Notice) -> Option<Notice> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(notice)
    }

    /// Filters the notice and, when error notifications are enabled, sends it.
    pub async fn notify(&self, notice: Notice) -> Result<NotifyOutcome, NotifyError> {
        let Some(notice) = self.filter(notice) else {
            debug!("Notice dropped by filter");
            return Ok(NotifyOutcome::Filtered);
        };
        let Some(host) = self.route(Category::Errors) else {
            debug!("Error notifications disabled, notice not sent");
            return Ok(NotifyOutcome::Disabled);
        };

        self.transport
            .send(&host, &notice)
            .await
            .map_err(NotifyError::Transport)?;
        Ok(NotifyOutcome::Sent { host })
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.poller.stop_polling();
    }
}

fn log_effective_config(remote_config: &RemoteConfig) {
    let snapshot = remote_config.snapshot();
    debug!(
        "Remote config applied (updated_at {}): interval {:?}, errors enabled {} via {}, apm enabled {} via {}",
        snapshot.updated_at,
        snapshot.interval(),
        remote_config.enabled(Category::Errors),
        remote_config.endpoint_host(Category::Errors),
        remote_config.enabled(Category::Apm),
        remote_config.endpoint_host(Category::Apm),
    );
}
