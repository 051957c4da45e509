// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{
    env,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use brake_notifier::{Category, ConfigPoller, NotifierOptions, RemoteConfig};

/// Effective settings derived from the current snapshot, compared between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Effective {
    interval: Duration,
    errors: (bool, String),
    apm: (bool, String),
}

impl Effective {
    fn read(remote_config: &RemoteConfig) -> Self {
        let category = |c| (remote_config.enabled(c), remote_config.endpoint_host(c));
        Self {
            interval: remote_config.interval(),
            errors: category(Category::Errors),
            apm: category(Category::Apm),
        }
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("BRAKE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let options = match NotifierOptions::from_env() {
        Ok(options) => Arc::new(options),
        Err(e) => {
            error!("Error loading notifier options: {e}");
            return;
        }
    };

    if options.disable_remote_config {
        info!("Remote config is disabled, nothing to watch");
        return;
    }

    let remote_config = Arc::new(RemoteConfig::new(Arc::clone(&options)));
    let poller = match ConfigPoller::new(Arc::clone(&remote_config)) {
        Ok(poller) => poller,
        Err(e) => {
            error!("Error creating remote config poller: {e}");
            return;
        }
    };

    info!(
        "Watching remote config at {}",
        remote_config.config_route(remote_config.base_url())
    );

    let last: Mutex<Option<Effective>> = Mutex::new(None);
    let _ = poller
        .poll(move |remote_config| {
            let current = Effective::read(remote_config);
            let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_ref() == Some(&current) {
                return;
            }
            info!(
                "Remote config: interval {:?}, errors enabled={} host={}, apm enabled={} host={}",
                current.interval, current.errors.0, current.errors.1, current.apm.0, current.apm.1,
            );
            *last = Some(current);
        })
        .await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Unable to listen for shutdown signal: {e}"),
    }

    poller.shutdown().await;
    info!("Remote config poller stopped");
}
