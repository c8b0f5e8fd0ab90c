// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! REST client of the supervision backend
//!
//! Events are posted as JSON to `<base_url>/api/user/addAlarmEvent`:
//!
//! ```json
//! { "id": 1, "alarmRuleId": 6, "alarmType": "Smoke", "confidence": 0.82,
//!   "picFilePath": "assets/images/alarm/alarm12.jpg" }
//! ```
//!
//! The backend answers `{"success": true, "data": {"data": {"eventID": 42}}}`. Anything
//! else (non 200/201 status, `success: false`, missing event id) is a failed report.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{AlarmEvent, EventId, EventSink, ReportError};
use crate::config::EventSinkConfig;

const ADD_ALARM_EVENT_PATH: &str = "/api/user/addAlarmEvent";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddAlarmEventRequest<'a> {
    id: u32,
    alarm_rule_id: u8,
    alarm_type: &'a str,
    confidence: f64,
    pic_file_path: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn event_id(&self) -> Option<EventId> {
        let id = self.data.as_ref()?.get("data")?.get("eventID")?;
        id.as_u64()
            .or_else(|| id.as_str().and_then(|s| s.trim().parse().ok()))
    }
}

/// Counters of reported events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportStats {
    pub successes: u64,
    pub failures: u64,
}

/// Event sink posting to the supervision backend.
pub struct HttpEventSink {
    client: reqwest::Client,
    endpoint: String,
    pic_path_prefix: String,
    image_dir: Option<PathBuf>,
    sequence: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl HttpEventSink {
    pub fn new(config: &EventSinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client for the event backend")?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                ADD_ALARM_EVENT_PATH
            ),
            pic_path_prefix: config.pic_path_prefix.trim_end_matches('/').to_string(),
            image_dir: config.image_dir.as_ref().map(PathBuf::from),
            sequence: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> ReportStats {
        ReportStats {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    async fn post_event(&self, event: &AlarmEvent) -> Result<EventId, ReportError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let body = AddAlarmEventRequest {
            id: event.camera_id,
            alarm_rule_id: event.alarm_rule_id,
            alarm_type: &event.alarm_type,
            confidence: (event.confidence * 100.0).round() / 100.0,
            pic_file_path: format!("{}/alarm{}.jpg", self.pic_path_prefix, sequence),
        };
        debug!("POST {} {:?}", self.endpoint, body);

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(ReportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ApiResponse = serde_json::from_str(&text)
            .map_err(|e| ReportError::MalformedResponse(e.to_string()))?;
        if !parsed.success {
            return Err(ReportError::Rejected(parsed.message.unwrap_or(text)));
        }
        parsed
            .event_id()
            .ok_or_else(|| ReportError::MalformedResponse("missing data.data.eventID".to_string()))
    }

    async fn save_image(&self, event_id: EventId, image: &[u8]) {
        let Some(dir) = &self.image_dir else {
            return;
        };
        let path = dir.join(format!("alarm{event_id}.jpg"));
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, image).await
        }
        .await;
        match result {
            Ok(()) => debug!("Alarm image saved to {}", path.display()),
            Err(e) => warn!("Failed to save alarm image {}: {}", path.display(), e),
        }
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn report(&self, event: &AlarmEvent) -> Result<EventId, ReportError> {
        match self.post_event(event).await {
            Ok(event_id) => {
                let successes = self.successes.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    "Alarm event {} stored (rule {}, {} reported so far)",
                    event_id, event.alarm_rule_id, successes
                );
                if let Some(image) = &event.image {
                    self.save_image(event_id, image).await;
                }
                Ok(event_id)
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Alarm event report failed (rule {}, {} failures so far): {}",
                    event.alarm_rule_id, failures, e
                );
                Err(e)
            }
        }
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}
