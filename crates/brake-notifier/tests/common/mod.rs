// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use brake_notifier::{Notice, NotifierOptions, Transport};
use serde_json::json;

pub const PROJECT_ID: i64 = 12345;
pub const CONFIG_PATH: &str = "/2020-06-18/config/12345/config.json";
pub const STATIC_HOST: &str = "https://errors.example.com";

/// Options polling `base_url`, with everything else left at its default.
pub fn options(base_url: &str) -> NotifierOptions {
    NotifierOptions {
        project_id: PROJECT_ID,
        project_key: "key".to_string(),
        host: STATIC_HOST.to_string(),
        remote_config_base_url: base_url.to_string(),
        ..Default::default()
    }
}

/// A config payload whose every field is derived from `generation`, so a reader can tell
/// whether the fields it sees were fetched together.
pub fn generation_body(generation: i64) -> String {
    json!({
        "project_id": PROJECT_ID,
        "updated_at": generation,
        "poll_sec": 600 + generation,
        "settings": [
            {
                "name": "errors",
                "enabled": generation % 2 == 0,
                "endpoint": format!("https://gen-{generation}.example.com"),
            },
            {
                "name": "apm",
                "enabled": true,
                "endpoint": format!("https://apm-gen-{generation}.example.com"),
            },
        ],
    })
    .to_string()
}

/// Records every notice it is asked to send.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(String, Notice)>>,
}

impl RecordingTransport {
    pub fn hosts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(host, _)| host.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, host: &str, notice: &Notice) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((host.to_string(), notice.clone()));
        Ok(())
    }
}
