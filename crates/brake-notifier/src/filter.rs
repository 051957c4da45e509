// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Notice filter pipeline.
//!
//! A [`FilterChain`] is an ordered list of [`NoticeFilter`]s. Each filter takes the notice by
//! value and either hands it on ([`Filtered::Keep`]) or discards it ([`Filtered::Drop`]); the
//! chain stops at the first drop. Insertion order is significant: later filters only see what
//! earlier ones returned.

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;

use crate::notice::{Notice, Params};
use crate::options::NotifierOptions;
use crate::vcs::{GitReader, VcsReader};

/// Replacement written over redacted values.
pub const FILTERED: &str = "[Filtered]";

/// Context key holding the search path roots used to shorten backtrace file names.
pub const SEARCH_PATH_KEY: &str = "searchPath";
/// Prefix substituted for `{root}/src` in backtrace file names.
pub const SEARCH_PATH_PLACEHOLDER: &str = "/SRCROOT";

pub const ENVIRONMENT_KEY: &str = "environment";
pub const REVISION_KEY: &str = "revision";
pub const ROOT_DIRECTORY_KEY: &str = "rootDirectory";
pub const LAST_CHECKOUT_KEY: &str = "lastCheckout";

/// Result of running one filter over a notice.
#[derive(Debug)]
pub enum Filtered {
    Keep(Notice),
    Drop,
}

impl From<Option<Notice>> for Filtered {
    fn from(notice: Option<Notice>) -> Self {
        match notice {
            Some(notice) => Self::Keep(notice),
            None => Self::Drop,
        }
    }
}

/// One step of the pipeline. Closures `Fn(Notice) -> Option<Notice>` are filters too.
pub trait NoticeFilter: Send + Sync {
    fn apply(&self, notice: Notice) -> Filtered;
}

impl<F> NoticeFilter for F
where
    F: Fn(Notice) -> Option<Notice> + Send + Sync,
{
    fn apply(&self, notice: Notice) -> Filtered {
        self(notice).into()
    }
}

/// Ordered filters applied to every outgoing notice.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn NoticeFilter>>,
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl FilterChain {
    /// Creates an empty chain, which keeps every notice.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter; it runs after every filter already in the chain.
    pub fn push<F>(&mut self, filter: F)
    where
        F: NoticeFilter + 'static,
    {
        self.filters.push(Box::new(filter));
    }

    /// Number of installed filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether no filter is installed.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs every filter in order. Returns `None` as soon as one of them drops the notice.
    pub fn apply(&self, notice: Notice) -> Option<Notice> {
        self.filters
            .iter()
            .try_fold(notice, |notice, filter| match filter.apply(notice) {
                Filtered::Keep(notice) => Some(notice),
                Filtered::Drop => None,
            })
    }
}

/// Copies the configured environment name and revision into the notice context.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentFilter {
    environment: Option<String>,
    revision: Option<String>,
}

impl EnvironmentFilter {
    /// Empty values are treated as unset.
    pub fn new(environment: Option<String>, revision: Option<String>) -> Self {
        Self {
            environment: environment.filter(|value| !value.is_empty()),
            revision: revision.filter(|value| !value.is_empty()),
        }
    }

    /// Takes the environment and revision from static options.
    pub fn from_options(options: &NotifierOptions) -> Self {
        Self::new(options.environment.clone(), options.revision.clone())
    }
}

impl NoticeFilter for EnvironmentFilter {
    fn apply(&self, mut notice: Notice) -> Filtered {
        if let Some(environment) = &self.environment {
            notice.set_context(ENVIRONMENT_KEY, environment.as_str());
        }
        if let Some(revision) = &self.revision {
            notice.set_context(REVISION_KEY, revision.as_str());
        }
        Filtered::Keep(notice)
    }
}

/// Key selecting values to redact.
#[derive(Debug, Clone)]
pub enum RedactKey {
    /// Matches a key by equality.
    Exact(String),
    /// Matches every key the expression finds a match in.
    Pattern(Regex),
}

impl RedactKey {
    /// Parses a textual key. `/expr/` is compiled as a pattern, anything else is exact.
    pub fn parse(key: &str) -> Result<Self, regex::Error> {
        match key
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(expr) => Regex::new(expr).map(Self::Pattern),
            None => Ok(Self::Exact(key.to_string())),
        }
    }

    /// Whether `key` is selected for redaction.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Pattern(regex) => regex.is_match(key),
        }
    }
}

impl From<&str> for RedactKey {
    fn from(key: &str) -> Self {
        Self::Exact(key.to_string())
    }
}

impl From<String> for RedactKey {
    fn from(key: String) -> Self {
        Self::Exact(key)
    }
}

impl From<Regex> for RedactKey {
    fn from(regex: Regex) -> Self {
        Self::Pattern(regex)
    }
}

/// Replaces the value of every matching key in `values` with [`FILTERED`].
pub fn filter_by_key(values: &mut Params, key: &RedactKey) {
    for (name, value) in values.iter_mut() {
        if key.matches(name) {
            *value = Value::from(FILTERED);
        }
    }
}

/// Redacts matching keys in the context, environment, and session of every notice.
#[derive(Debug, Clone)]
pub struct KeyRedactionFilter {
    keys: Vec<RedactKey>,
}

impl KeyRedactionFilter {
    /// Builds a filter redacting every key in `keys`.
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<RedactKey>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl NoticeFilter for KeyRedactionFilter {
    fn apply(&self, mut notice: Notice) -> Filtered {
        for key in &self.keys {
            filter_by_key(&mut notice.env, key);
            filter_by_key(&mut notice.context, key);
            filter_by_key(&mut notice.session, key);
        }
        Filtered::Keep(notice)
    }
}

/// Rewrites backtrace file names below `{root}/src` to start with [`SEARCH_PATH_PLACEHOLDER`].
///
/// Roots come from the [`SEARCH_PATH_KEY`] context entry, delimited the way `PATH` is on the
/// current platform. The first matching root wins for each frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchPathFilter;

impl NoticeFilter for SearchPathFilter {
    fn apply(&self, mut notice: Notice) -> Filtered {
        let Some(search_path) = notice.context_str(SEARCH_PATH_KEY) else {
            return Filtered::Keep(notice);
        };
        let prefixes: Vec<String> = std::env::split_paths(search_path)
            .map(|root| root.join("src").to_string_lossy().into_owned())
            .collect();

        for error in &mut notice.errors {
            for frame in &mut error.backtrace {
                if let Some(prefix) = prefixes.iter().find(|p| frame.file.starts_with(p.as_str())) {
                    frame.file = format!(
                        "{SEARCH_PATH_PLACEHOLDER}{}",
                        &frame.file[prefix.len()..]
                    );
                }
            }
        }
        Filtered::Keep(notice)
    }
}

/// Fills `revision` and `lastCheckout` from the repository at the `rootDirectory` context
/// entry when the notice has no revision yet. Lookup failures leave the notice untouched.
#[derive(Debug, Clone, Default)]
pub struct VcsRevisionFilter<R = GitReader> {
    reader: R,
}

impl<R: VcsReader> VcsRevisionFilter<R> {
    /// Uses `reader` to look up repository metadata.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: VcsReader> NoticeFilter for VcsRevisionFilter<R> {
    fn apply(&self, mut notice: Notice) -> Filtered {
        let root: PathBuf = match notice.context_str(ROOT_DIRECTORY_KEY) {
            Some(root) if !root.is_empty() => Path::new(root).to_path_buf(),
            _ => return Filtered::Keep(notice),
        };
        if notice
            .context_str(REVISION_KEY)
            .is_some_and(|revision| !revision.is_empty())
        {
            return Filtered::Keep(notice);
        }

        if let Ok(checkout) = self.reader.last_checkout(&root) {
            notice.set_context(LAST_CHECKOUT_KEY, checkout.to_value());
        }
        if let Ok(revision) = self.reader.revision(&root) {
            notice.set_context(REVISION_KEY, revision);
        }
        Filtered::Keep(notice)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::notice::StackFrame;
    use crate::vcs::{LastCheckout, VcsError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn chain_applies_filters_in_insertion_order() {
        let mut chain = FilterChain::new();
        chain.push(|mut notice: Notice| {
            notice.set_context("step", "first");
            Some(notice)
        });
        chain.push(|mut notice: Notice| {
            let seen = notice.context_str("step").unwrap_or_default().to_string();
            notice.set_context("step", format!("{seen},second"));
            Some(notice)
        });

        let notice = chain.apply(Notice::new("E", "m")).unwrap();
        assert_eq!(notice.context_str("step"), Some("first,second"));
    }

    #[test]
    fn chain_stops_at_first_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let after_drop = Arc::clone(&calls);

        let mut chain = FilterChain::new();
        chain.push(|_: Notice| -> Option<Notice> { None });
        chain.push(move |notice: Notice| {
            after_drop.fetch_add(1, Ordering::SeqCst);
            Some(notice)
        });

        assert!(chain.apply(Notice::new("E", "m")).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_chain_keeps_notice() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());
        let notice = Notice::new("E", "m");
        assert_eq!(chain.apply(notice.clone()), Some(notice));
    }

    #[test]
    fn environment_filter_sets_context() {
        let filter = EnvironmentFilter::new(Some("production".into()), Some("abc123".into()));
        let Filtered::Keep(notice) = filter.apply(Notice::new("E", "m")) else {
            panic!("environment filter dropped the notice");
        };
        assert_eq!(notice.context_str(ENVIRONMENT_KEY), Some("production"));
        assert_eq!(notice.context_str(REVISION_KEY), Some("abc123"));
    }

    #[test]
    fn environment_filter_skips_empty_values() {
        let filter = EnvironmentFilter::new(Some(String::new()), None);
        let Filtered::Keep(notice) = filter.apply(Notice::new("E", "m")) else {
            panic!("environment filter dropped the notice");
        };
        assert!(notice.context.get(ENVIRONMENT_KEY).is_none());
        assert!(notice.context.get(REVISION_KEY).is_none());
    }

    #[test]
    fn environment_filter_is_idempotent() {
        let mut once = FilterChain::new();
        once.push(EnvironmentFilter::new(Some("staging".into()), Some("r1".into())));
        let mut twice = FilterChain::new();
        twice.push(EnvironmentFilter::new(Some("staging".into()), Some("r1".into())));
        twice.push(EnvironmentFilter::new(Some("staging".into()), Some("r1".into())));

        let notice = Notice::new("E", "m");
        assert_eq!(once.apply(notice.clone()), twice.apply(notice));
    }

    #[test]
    fn filter_by_exact_key() {
        let mut values = params(&[("password", "x"), ("other", "y")]);
        filter_by_key(&mut values, &RedactKey::from("password"));
        assert_eq!(values, params(&[("password", FILTERED), ("other", "y")]));
    }

    #[test]
    fn filter_by_pattern_key() {
        let mut values = params(&[
            ("api_token", "a"),
            ("session_token", "b"),
            ("token_count", "c"),
        ]);
        filter_by_key(&mut values, &RedactKey::parse("/_token$/").unwrap());
        assert_eq!(
            values,
            params(&[
                ("api_token", FILTERED),
                ("session_token", FILTERED),
                ("token_count", "c"),
            ])
        );
    }

    #[test]
    fn redact_key_parse_rejects_invalid_pattern() {
        assert!(RedactKey::parse("/(unclosed/").is_err());
        assert!(matches!(RedactKey::parse("/").unwrap(), RedactKey::Exact(k) if k == "/"));
    }

    #[test]
    fn redaction_filter_covers_all_maps() {
        let mut notice = Notice::new("E", "m");
        notice.context = params(&[("password", "c")]);
        notice.env = params(&[("password", "e"), ("PATH", "/bin")]);
        notice.session = params(&[("password", "s")]);

        let filter = KeyRedactionFilter::new(["password"]);
        let Filtered::Keep(notice) = filter.apply(notice) else {
            panic!("redaction filter dropped the notice");
        };
        assert_eq!(notice.context, params(&[("password", FILTERED)]));
        assert_eq!(notice.env, params(&[("password", FILTERED), ("PATH", "/bin")]));
        assert_eq!(notice.session, params(&[("password", FILTERED)]));
    }

    #[test]
    fn search_path_filter_rewrites_first_matching_root() {
        let search_path = std::env::join_paths(["/home/dev/one", "/home/dev/two"]).unwrap();
        let mut notice = Notice::new("E", "m").with_backtrace(vec![
            StackFrame::new("/home/dev/two/src/app/main.rs", 10, "main"),
            StackFrame::new("/home/dev/one/src/lib.rs", 3, "run"),
            StackFrame::new("/usr/lib/other.rs", 1, "other"),
        ]);
        notice.set_context(SEARCH_PATH_KEY, search_path.to_string_lossy().into_owned());

        let Filtered::Keep(notice) = SearchPathFilter.apply(notice) else {
            panic!("search path filter dropped the notice");
        };
        let files: Vec<&str> = notice.errors[0]
            .backtrace
            .iter()
            .map(|frame| frame.file.as_str())
            .collect();
        assert_eq!(
            files,
            vec!["/SRCROOT/app/main.rs", "/SRCROOT/lib.rs", "/usr/lib/other.rs"]
        );
    }

    #[test]
    fn search_path_filter_ignores_notice_without_search_path() {
        let notice = Notice::new("E", "m").with_backtrace(vec![StackFrame::new("/x/src/a.rs", 1, "f")]);
        let Filtered::Keep(filtered) = SearchPathFilter.apply(notice.clone()) else {
            panic!("search path filter dropped the notice");
        };
        assert_eq!(filtered, notice);
    }

    struct StubReader {
        revision: Result<String, ()>,
        checkout: Result<LastCheckout, ()>,
        calls: AtomicUsize,
    }

    impl StubReader {
        fn ok() -> Self {
            Self {
                revision: Ok("deadbeef".to_string()),
                checkout: Ok(LastCheckout {
                    username: "Jane".to_string(),
                    email: "jane@example.com".to_string(),
                    revision: "deadbeef".to_string(),
                    time: 1_600_000_000,
                }),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                revision: Err(()),
                checkout: Err(()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl VcsReader for StubReader {
        fn last_checkout(&self, _root: &Path) -> Result<LastCheckout, VcsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.checkout
                .clone()
                .map_err(|_| VcsError::Malformed("no checkout".to_string()))
        }

        fn revision(&self, _root: &Path) -> Result<String, VcsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.revision
                .clone()
                .map_err(|_| VcsError::Malformed("no revision".to_string()))
        }
    }

    #[test]
    fn vcs_filter_backfills_revision_and_checkout() {
        let mut notice = Notice::new("E", "m");
        notice.set_context(ROOT_DIRECTORY_KEY, "/srv/app");

        let Filtered::Keep(notice) = VcsRevisionFilter::new(StubReader::ok()).apply(notice) else {
            panic!("vcs filter dropped the notice");
        };
        assert_eq!(notice.context_str(REVISION_KEY), Some("deadbeef"));
        assert_eq!(
            notice.context.get(LAST_CHECKOUT_KEY),
            Some(&json!({
                "username": "Jane",
                "email": "jane@example.com",
                "revision": "deadbeef",
                "time": 1_600_000_000,
            }))
        );
    }

    #[test]
    fn vcs_filter_keeps_existing_revision() {
        let reader = StubReader::ok();
        let filter = VcsRevisionFilter::new(reader);
        let mut notice = Notice::new("E", "m");
        notice.set_context(ROOT_DIRECTORY_KEY, "/srv/app");
        notice.set_context(REVISION_KEY, "configured");

        let Filtered::Keep(notice) = filter.apply(notice) else {
            panic!("vcs filter dropped the notice");
        };
        assert_eq!(notice.context_str(REVISION_KEY), Some("configured"));
        assert!(notice.context.get(LAST_CHECKOUT_KEY).is_none());
        assert_eq!(filter.reader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn vcs_filter_skips_notice_without_root() {
        let filter = VcsRevisionFilter::new(StubReader::ok());
        let notice = Notice::new("E", "m");
        let Filtered::Keep(filtered) = filter.apply(notice.clone()) else {
            panic!("vcs filter dropped the notice");
        };
        assert_eq!(filtered, notice);
        assert_eq!(filter.reader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn vcs_filter_failures_leave_notice_unchanged() {
        let mut notice = Notice::new("E", "m");
        notice.set_context(ROOT_DIRECTORY_KEY, "/srv/app");

        let Filtered::Keep(filtered) =
            VcsRevisionFilter::new(StubReader::failing()).apply(notice.clone())
        else {
            panic!("vcs filter dropped the notice");
        };
        assert_eq!(filtered, notice);
    }
}
