// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Version-control metadata lookup used to backfill notice revisions.
//!
//! [`GitReader`] reads the repository files directly instead of shelling out, so a missing
//! `git` binary is indistinguishable from a missing repository: both simply yield an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed repository metadata: {0}")]
    Malformed(String),
    #[error("unresolved ref: {0}")]
    MissingRef(String),
}

/// Author and time of the most recent checkout recorded in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastCheckout {
    pub username: String,
    pub email: String,
    pub revision: String,
    /// Unix timestamp, seconds.
    pub time: i64,
}

impl LastCheckout {
    /// Representation stored in the notice context.
    pub fn to_value(&self) -> Value {
        json!({
            "username": self.username,
            "email": self.email,
            "revision": self.revision,
            "time": self.time,
        })
    }
}

/// Source of repository metadata for a project root.
pub trait VcsReader: Send + Sync {
    fn last_checkout(&self, root: &Path) -> Result<LastCheckout, VcsError>;
    fn revision(&self, root: &Path) -> Result<String, VcsError>;
}

/// Reads metadata from the `.git` directory below a root.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitReader;

impl GitReader {
    fn git_dir(root: &Path) -> PathBuf {
        root.join(".git")
    }

    fn resolve_ref(git_dir: &Path, reference: &str) -> Result<String, VcsError> {
        match fs::read_to_string(git_dir.join(reference)) {
            Ok(hash) => return Ok(hash.trim().to_string()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let packed = match fs::read_to_string(git_dir.join("packed-refs")) {
            Ok(packed) => packed,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VcsError::MissingRef(reference.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        packed
            .lines()
            .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
            .filter_map(|line| line.split_once(' '))
            .find(|(_, name)| name.trim() == reference)
            .map(|(hash, _)| hash.to_string())
            .ok_or_else(|| VcsError::MissingRef(reference.to_string()))
    }
}

impl VcsReader for GitReader {
    /// Parses the last entry of `.git/logs/HEAD`:
    /// `<old> <new> <name> <<email>> <unix time> <tz>\t<message>`.
    fn last_checkout(&self, root: &Path) -> Result<LastCheckout, VcsError> {
        let log = fs::read_to_string(Self::git_dir(root).join("logs").join("HEAD"))?;
        let line = log
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| VcsError::Malformed("empty HEAD log".to_string()))?;
        parse_reflog_line(line)
    }

    fn revision(&self, root: &Path) -> Result<String, VcsError> {
        let git_dir = Self::git_dir(root);
        let head = fs::read_to_string(git_dir.join("HEAD"))?;
        let head = head.trim();

        let hash = match head.strip_prefix("ref:") {
            Some(reference) => Self::resolve_ref(&git_dir, reference.trim())?,
            None => head.to_string(),
        };
        if hash.is_empty() {
            return Err(VcsError::Malformed("empty revision".to_string()));
        }
        Ok(hash)
    }
}

fn parse_reflog_line(line: &str) -> Result<LastCheckout, VcsError> {
    let malformed = || VcsError::Malformed(line.to_string());

    let entry = line.split('\t').next().unwrap_or(line);
    let mut fields = entry.splitn(3, ' ');
    let _previous = fields.next().ok_or_else(malformed)?;
    let revision = fields.next().ok_or_else(malformed)?;
    let rest = fields.next().ok_or_else(malformed)?;

    let (username, rest) = rest.split_once(" <").ok_or_else(malformed)?;
    let (email, rest) = rest.split_once('>').ok_or_else(malformed)?;
    let time = rest
        .split_whitespace()
        .next()
        .and_then(|secs| secs.parse::<i64>().ok())
        .ok_or_else(malformed)?;

    Ok(LastCheckout {
        username: username.to_string(),
        email: email.to_string(),
        revision: revision.to_string(),
        time,
    })
}
