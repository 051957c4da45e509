// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the remote config API.
//!
//! The config payloads live in an object store. A request the store cannot serve comes back
//! as an XML document rather than JSON, which is reported as a [`FetchError::BackendRejection`]
//! carrying the raw body.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::remote_config::ConfigSnapshot;

const XML_PREFIX: &str = "<?xml";

/// Everything that can go wrong while fetching a config snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS, timeout, or body read failure.
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    /// The storage backend answered with an XML error document.
    #[error("{0}")]
    BackendRejection(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("unhandled status {status}: {body}")]
    UnhandledStatus { status: u16, body: String },
    #[error("parseConfig failed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Fetches config snapshots over HTTPS.
#[derive(Debug, Clone)]
pub struct ConfigClient {
    client: Client,
}

impl ConfigClient {
    /// Builds a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Fetches and decodes the snapshot served at `url`.
    pub async fn fetch(&self, url: &str) -> Result<ConfigSnapshot, FetchError> {
        debug!("Fetching remote config from {url}");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        parse_response(status, &body)
    }
}

/// Classifies a config API response.
pub(crate) fn parse_response(status: StatusCode, body: &str) -> Result<ConfigSnapshot, FetchError> {
    if body.starts_with(XML_PREFIX) {
        return Err(FetchError::BackendRejection(body.to_string()));
    }

    match status {
        StatusCode::OK => Ok(serde_json::from_str(body)?),
        StatusCode::NOT_FOUND => Err(FetchError::NotFound(body.to_string())),
        StatusCode::FORBIDDEN => Err(FetchError::Forbidden(body.to_string())),
        status => Err(FetchError::UnhandledStatus {
            status: status.as_u16(),
            body: body.to_string(),
        }),
    }
}
