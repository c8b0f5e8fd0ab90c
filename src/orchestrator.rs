// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-frame alarm pipeline
//!
//! For every frame the [`Orchestrator`]:
//!
//! 1. updates the fill ratio tracker and, when it changed, publishes the ratio to the
//!    coal fill register
//! 2. reads the current PLC feature toggles from the shared snapshot
//! 3. runs the decision engine
//! 4. for each decision that passes the cooldown gate, raises the PLC alarm and
//!    reports the event; the cooldown is marked only after the report succeeded
//! 5. publishes frame telemetry
//!
//! The feature toggles are refreshed by [`run_config_poll_loop`], which runs alongside
//! the frame loop and only replaces the snapshot when the enable register changed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::RwLock;

use crate::alarm::{decide, AlarmKind, CooldownGate};
use crate::config::{Config, DetectionConfig};
use crate::detection::{DetectionClass, DetectionFrame};
use crate::event_sink::{AlarmEvent, EventId, EventSink};
use crate::fill_ratio::{FillRatioReading, FillRatioTracker};
use crate::modbus::plc_client::encode_alarm_value;
use crate::modbus::{FeatureToggles, PlcClient};
use crate::source::{DetectionSource, FrameSink};
use crate::telemetry::{FrameTelemetry, TelemetryHub};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Feature toggles shared between the poll loop and the frame loop.
pub type SharedToggles = Arc<RwLock<FeatureToggles>>;

/// Alarm accepted by the event sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedAlarm {
    pub kind: AlarmKind,
    pub event_id: EventId,
    pub confidence: f64,
}

/// What happened to one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub fill_ratio: FillRatioReading,
    pub decisions: usize,
    pub reported: Vec<ReportedAlarm>,
    pub suppressed: Vec<AlarmKind>,
    /// Alarms whose event report failed.
    pub failed: Vec<AlarmKind>,
}

/// Counters logged periodically by the frame loop.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub frames: u64,
    pub alarms_reported: u64,
    pub alarms_suppressed: u64,
    pub report_failures: u64,
    pub plc_write_failures: u64,
    pub class_counts: HashMap<DetectionClass, u64>,
    pub last_fill_ratio: Option<f64>,
}

pub struct Orchestrator {
    detection: DetectionConfig,
    publish_fill_ratio: bool,
    stats_interval: u64,
    plc: Arc<PlcClient>,
    sink: Arc<dyn EventSink>,
    toggles: SharedToggles,
    cooldown: Arc<CooldownGate>,
    fill: Arc<FillRatioTracker>,
    telemetry: Option<Arc<TelemetryHub>>,
    last_published_fill: Option<u16>,
    stats: PipelineStats,
    started: Instant,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        plc: Arc<PlcClient>,
        sink: Arc<dyn EventSink>,
        toggles: SharedToggles,
    ) -> Self {
        Self {
            detection: config.detection.clone(),
            publish_fill_ratio: config.alarm.publish_fill_ratio,
            stats_interval: config.daemon.stats_interval_frames.max(1),
            plc,
            sink,
            toggles,
            cooldown: Arc::new(CooldownGate::new(
                config.alarm.cooldown(),
                config.alarm.suppression_log_every,
            )),
            fill: Arc::new(FillRatioTracker::new()),
            telemetry: None,
            last_published_fill: None,
            stats: PipelineStats::default(),
            started: Instant::now(),
        }
    }

    pub fn with_telemetry(mut self, hub: Arc<TelemetryHub>) -> Self {
        self.telemetry = Some(hub);
        self
    }

    pub fn cooldown(&self) -> Arc<CooldownGate> {
        self.cooldown.clone()
    }

    pub fn fill_tracker(&self) -> Arc<FillRatioTracker> {
        self.fill.clone()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    async fn publish_fill_ratio(&mut self, ratio: f64) {
        let fraction = ratio / 100.0;
        let encoded = encode_alarm_value(AlarmKind::CoalFill, fraction, true);
        if self.last_published_fill == Some(encoded) {
            return;
        }
        match self.plc.send_alarm(AlarmKind::CoalFill, fraction, true).await {
            Ok(_) => self.last_published_fill = Some(encoded),
            Err(e) => {
                self.stats.plc_write_failures += 1;
                debug!("Fill ratio not published: {}", e);
            }
        }
    }

    /// Run one frame through the pipeline.
    pub async fn process_frame(&mut self, frame: &DetectionFrame, now: Instant) -> FrameOutcome {
        let camera_id = frame.camera_id.unwrap_or(self.detection.camera_id);
        let mut outcome = FrameOutcome {
            fill_ratio: self.fill.process(camera_id, &frame.detections),
            ..Default::default()
        };

        if self.publish_fill_ratio {
            if let Some(ratio) = outcome.fill_ratio.ratio {
                self.publish_fill_ratio(ratio).await;
            }
        }

        let detected = frame.class_set();
        let toggles = *self.toggles.read().await;
        let params = self.detection.decision_params(frame.width);
        let decisions = decide(&frame.detections, &detected, &toggles, &params);
        outcome.decisions = decisions.len();

        for decision in &decisions {
            let rule = decision.rule;
            let key = rule.kind.key();
            if !self.cooldown.try_acquire(key, now) {
                outcome.suppressed.push(rule.kind);
                continue;
            }

            let confidence = decision.confidence();
            info!(
                "{} detected on camera {} frame {} (confidence {:.2})",
                rule.name, camera_id, frame.frame_index, confidence
            );
            if let Err(e) = self.plc.send_alarm(rule.kind, confidence, true).await {
                self.stats.plc_write_failures += 1;
                warn!("Failed to raise PLC alarm '{}': {}", key, e);
            }

            let event = AlarmEvent {
                camera_id,
                alarm_rule_id: rule.id,
                alarm_type: rule.name.to_string(),
                confidence,
                timestamp: Utc::now(),
                image: frame.image.clone(),
            };
            match self.sink.report(&event).await {
                Ok(event_id) => {
                    self.cooldown.mark_fired(key, now);
                    outcome.reported.push(ReportedAlarm {
                        kind: rule.kind,
                        event_id,
                        confidence,
                    });
                }
                Err(e) => {
                    warn!("Alarm '{}' not reported, will retry: {}", key, e);
                    outcome.failed.push(rule.kind);
                }
            }
        }

        if let Some(hub) = &self.telemetry {
            let alarms = outcome
                .reported
                .iter()
                .map(|r| r.kind.key().to_string())
                .collect();
            hub.publish(FrameTelemetry::from_frame(
                camera_id,
                frame,
                outcome.fill_ratio.ratio,
                alarms,
            ));
        }

        self.record(frame, &outcome);
        outcome
    }

    fn record(&mut self, frame: &DetectionFrame, outcome: &FrameOutcome) {
        self.stats.frames += 1;
        for detection in &frame.detections {
            *self.stats.class_counts.entry(detection.class).or_default() += 1;
        }
        if outcome.fill_ratio.ratio.is_some() {
            self.stats.last_fill_ratio = outcome.fill_ratio.ratio;
        }
        self.stats.alarms_reported += outcome.reported.len() as u64;
        self.stats.alarms_suppressed += outcome.suppressed.len() as u64;
        self.stats.report_failures += outcome.failed.len() as u64;
        if self.stats.frames % self.stats_interval == 0 {
            self.log_stats();
        }
    }

    pub fn log_stats(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            self.stats.frames as f64 / elapsed
        } else {
            0.0
        };
        info!(
            "Processed {} frames ({:.1} fps): {} alarms reported, {} suppressed, {} report failures, {} PLC write failures",
            self.stats.frames,
            fps,
            self.stats.alarms_reported,
            self.stats.alarms_suppressed,
            self.stats.report_failures,
            self.stats.plc_write_failures
        );
        let counts: Vec<String> = DetectionClass::ALL
            .iter()
            .filter_map(|class| {
                self.stats
                    .class_counts
                    .get(class)
                    .map(|count| format!("{}={}", class.label(), count))
            })
            .collect();
        let fill = self
            .stats
            .last_fill_ratio
            .map_or_else(|| "N/A".to_string(), |r| format!("{r:.1}%"));
        info!("Detections: [{}], fill ratio {}", counts.join(", "), fill);
    }

    /// Clear every PLC alarm and close the PLC link.
    pub async fn shutdown(&self) {
        self.log_stats();
        self.plc.disconnect().await;
    }
}

/// Pull frames from `source` until it ends, `running` is cleared or the frame sink fails.
///
/// On exit all PLC alarms are cleared and `running` is cleared so that sibling tasks
/// stop too. Returns the number of processed frames.
pub async fn run_frame_loop(
    mut orchestrator: Orchestrator,
    mut source: Box<dyn DetectionSource>,
    mut frame_sink: Option<Box<dyn FrameSink>>,
    running: Arc<AtomicBool>,
) -> Result<u64> {
    info!("Frame loop started on {}", source.describe());
    let mut result = Ok(());

    while running.load(Ordering::SeqCst) {
        let frame = match source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Detection source ended");
                break;
            }
            Err(e) => {
                error!("Detection source failed: {:#}", e);
                result = Err(e);
                break;
            }
        };

        orchestrator.process_frame(&frame, Instant::now()).await;

        if let Some(sink) = frame_sink.as_mut() {
            if let Err(e) = sink.write_frame(&frame).await {
                error!("Output stream failed, stopping detection: {:#}", e);
                break;
            }
        }
    }

    orchestrator.shutdown().await;
    running.store(false, Ordering::SeqCst);
    let frames = orchestrator.stats().frames;
    info!("Frame loop stopped after {} frames", frames);
    result.map(|_| frames)
}

/// Refresh `toggles` from the PLC enable register every `interval`.
///
/// A failed read keeps the previous snapshot.
pub async fn run_config_poll_loop(
    plc: Arc<PlcClient>,
    toggles: SharedToggles,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        if let Some(updated) = plc.poll_for_change().await {
            *toggles.write().await = updated;
            info!(
                "Detection toggles: large lump {}, foreign object {}, personnel boundary {}, deviation {}",
                updated.large_lump,
                updated.foreign_object,
                updated.personnel_boundary,
                updated.deviation
            );
        }
    }
    debug!("Config poll loop stopped");
    Ok(())
}
