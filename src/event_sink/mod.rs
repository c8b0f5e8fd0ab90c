// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Alarm event reporting
//!
//! An [`EventSink`] forwards accepted alarms to the supervision backend and returns
//! the event id it assigned. The pipeline only records an alarm as fired once a sink
//! returned an id.
//!
//! Two sinks are provided:
//! - [`HttpEventSink`] posts events to the backend REST API
//! - [`LogEventSink`] logs events and numbers them locally, used when no backend is
//!   configured

pub mod http;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use thiserror::Error;

pub use http::HttpEventSink;

/// Identifier assigned by the backend to a stored event.
pub type EventId = u64;

/// Alarm occurrence sent to the backend.
#[derive(Debug, Clone)]
pub struct AlarmEvent {
    pub camera_id: u32,
    pub alarm_rule_id: u8,
    pub alarm_type: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// Encoded frame image, stored alongside the event when available.
    pub image: Option<Arc<Vec<u8>>>,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("event backend unreachable: {0}")]
    Transport(String),

    #[error("event backend answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("event rejected by backend: {0}")]
    Rejected(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        ReportError::Transport(err.to_string())
    }
}

/// Destination of alarm events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Report one event, returning the id assigned to it.
    async fn report(&self, event: &AlarmEvent) -> Result<EventId, ReportError>;

    /// Sink description for logs.
    fn describe(&self) -> String;
}

/// Sink that only logs events.
#[derive(Debug, Default)]
pub struct LogEventSink {
    next_id: AtomicU64,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventSink for LogEventSink {
    async fn report(&self, event: &AlarmEvent) -> Result<EventId, ReportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "Alarm event #{}: camera {}, rule {} ({}), confidence {:.2}, at {}",
            id,
            event.camera_id,
            event.alarm_rule_id,
            event.alarm_type,
            event.confidence,
            event.timestamp.to_rfc3339()
        );
        Ok(id)
    }

    fn describe(&self) -> String {
        "local event log".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> AlarmEvent {
        AlarmEvent {
            camera_id: 1,
            alarm_rule_id: 6,
            alarm_type: "Smoke".to_string(),
            confidence: 0.8,
            timestamp: Utc::now(),
            image: None,
        }
    }

    #[tokio::test]
    async fn test_log_sink_numbers_events() {
        let sink = LogEventSink::new();
        assert_eq!(sink.report(&event()).await.unwrap(), 1);
        assert_eq!(sink.report(&event()).await.unwrap(), 2);
    }
}
