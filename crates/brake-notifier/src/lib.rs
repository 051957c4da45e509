// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side runtime for an error notifier.
//!
//! The crate keeps a process-wide view of the notifier's remote configuration fresh by polling
//! it in the background, and runs outgoing notices through an ordered filter pipeline before
//! they are handed to a transport.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod filter;
pub mod http;
pub mod notice;
pub mod notifier;
pub mod options;
pub mod poller;
pub mod remote_config;
pub mod vcs;

pub use filter::{
    filter_by_key, EnvironmentFilter, FilterChain, Filtered, KeyRedactionFilter, NoticeFilter,
    RedactKey, SearchPathFilter, VcsRevisionFilter, FILTERED,
};
pub use http::{ConfigClient, FetchError};
pub use notice::{Notice, NoticeError, Params, StackFrame};
pub use notifier::{Notifier, NotifierError, NotifyError, NotifyOutcome, Transport};
pub use options::{ConfigError, NotifierOptions};
pub use poller::{ConfigPoller, PollerState};
pub use remote_config::{Category, ConfigSnapshot, RemoteConfig, RemoteSetting};
pub use vcs::{GitReader, LastCheckout, VcsError, VcsReader};
