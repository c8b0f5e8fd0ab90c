// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-frame telemetry broadcast
//!
//! Every processed frame produces a [`FrameTelemetry`] message delivered to each
//! subscriber through its own bounded queue. Publishing never waits: a full queue
//! drops the new message for that subscriber, a closed queue removes the subscriber.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::detection::{BoundingBox, DetectionFrame};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryDetection {
    pub class_id: u8,
    pub label: &'static str,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// Summary of one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameTelemetry {
    pub camera_id: u32,
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    /// Smoothed fill ratio in percent.
    pub fill_ratio: Option<f64>,
    pub detections: Vec<TelemetryDetection>,
    /// Alarm keys reported for this frame.
    pub alarms: Vec<String>,
}

impl FrameTelemetry {
    pub fn from_frame(
        camera_id: u32,
        frame: &DetectionFrame,
        fill_ratio: Option<f64>,
        alarms: Vec<String>,
    ) -> Self {
        Self {
            camera_id,
            frame_index: frame.frame_index,
            timestamp: Utc::now(),
            fill_ratio,
            detections: frame
                .detections
                .iter()
                .map(|d| TelemetryDetection {
                    class_id: d.class.id(),
                    label: d.class.label(),
                    confidence: d.confidence(),
                    bbox: d.bbox,
                })
                .collect(),
            alarms,
        }
    }
}

/// Delivery result of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    pub pruned: usize,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<FrameTelemetry>,
}

/// Fan-out of frame telemetry to any number of subscribers.
pub struct TelemetryHub {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
}

impl TelemetryHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            capacity: queue_capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dropped_total: AtomicU64::new(0),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber, returning its id and receiving end.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<FrameTelemetry>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers().push(Subscriber { id, tx });
        debug!("Telemetry subscriber {} registered", id);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Messages dropped on full queues since creation.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn publish(&self, message: FrameTelemetry) -> PublishReport {
        let mut report = PublishReport::default();
        self.subscribers().retain(|subscriber| {
            match subscriber.tx.try_send(message.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    trace!("Telemetry queue of subscriber {} full", subscriber.id);
                    report.dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Telemetry subscriber {} gone", subscriber.id);
                    report.pruned += 1;
                    false
                }
            }
        });
        if report.dropped > 0 {
            self.dropped_total
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
        report
    }
}
