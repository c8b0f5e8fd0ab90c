// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! This module runs and manages the background tasks of the belt monitor:
//!
//! - Config poll loop refreshing the PLC feature toggles
//! - Frame loop turning detections into PLC alarms and events
//! - Telemetry writer appending frame telemetry to a JSON lines file
//! - Heartbeat logging the PLC link state
//!
//! All tasks share one `running` flag. The frame loop clears it when its source ends,
//! so the other tasks stop with it.
//!
//! ## Usage
//!
//! ```no_run
//! use belt_monitor::{config::Config, daemon::launch_daemon::Daemon, source::JsonLinesSource};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!     let source = JsonLinesSource::open("frames.jsonl").await?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config, Box::new(source), None).await?;
//!
//!     // Later, trigger a graceful shutdown
//!     daemon.shutdown();
//!
//!     // Wait for all tasks to complete
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::Config;
use crate::event_sink::{EventSink, HttpEventSink, LogEventSink};
use crate::modbus::{FeatureToggles, PlcClient};
use crate::orchestrator::{run_config_poll_loop, run_frame_loop, Orchestrator, SharedToggles};
use crate::source::{DetectionSource, FrameSink};
use crate::telemetry::TelemetryHub;

/// Granularity at which idle tasks check the running flag.
const IDLE_TICK: Duration = Duration::from_millis(200);

/// Represents a daemon task manager that coordinates the belt monitor services
///
/// # Fields
///
/// * `tasks` - Handles of the spawned tasks, awaited by [`Daemon::join`]
/// * `running` - Flag shared between tasks to coordinate shutdown
/// * `plc` - PLC client shared by the frame loop and the config poll loop
/// * `toggles` - Feature toggle snapshot, written only by the config poll loop
/// * `telemetry` - Telemetry hub, when telemetry is enabled
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    plc: Option<Arc<PlcClient>>,
    toggles: SharedToggles,
    telemetry: Option<Arc<TelemetryHub>>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// The running flag starts set and the toggle snapshot starts with every
    /// detection feature enabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use belt_monitor::daemon::launch_daemon::Daemon;
    ///
    /// let daemon = Daemon::new();
    /// assert!(daemon.is_running());
    /// ```
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            plc: None,
            toggles: Arc::new(RwLock::new(FeatureToggles::all_enabled())),
            telemetry: None,
        }
    }

    /// Launch all tasks with a PLC client built from `config.modbus`
    ///
    /// # Parameters
    ///
    /// * `config` - Application configuration
    /// * `source` - Detection source feeding the frame loop
    /// * `frame_sink` - Optional outbound stream receiving every processed frame
    ///
    /// # Errors
    ///
    /// Fails when the event sink or the telemetry output cannot be created. An
    /// unreachable PLC is not an error: the client reconnects with backoff.
    pub async fn launch(
        &mut self,
        config: &Config,
        source: Box<dyn DetectionSource>,
        frame_sink: Option<Box<dyn FrameSink>>,
    ) -> Result<()> {
        let plc = Arc::new(PlcClient::from_config(&config.modbus));
        self.launch_with_plc(config, plc, source, frame_sink).await
    }

    /// Launch all tasks around an existing PLC client
    pub async fn launch_with_plc(
        &mut self,
        config: &Config,
        plc: Arc<PlcClient>,
        source: Box<dyn DetectionSource>,
        frame_sink: Option<Box<dyn FrameSink>>,
    ) -> Result<()> {
        match plc.connect().await {
            Ok(()) => info!("Connected to PLC at {}", plc.endpoint().await),
            Err(e) => warn!("PLC unavailable at start-up, will keep retrying: {}", e),
        }
        match plc.enable_snapshot().await {
            Some(toggles) => *self.toggles.write().await = toggles,
            None => warn!("Enable register unreadable, starting with all detections enabled"),
        }
        self.plc = Some(plc.clone());

        let sink = build_event_sink(config)?;
        info!("Reporting alarm events to {}", sink.describe());

        let mut orchestrator = Orchestrator::new(config, plc.clone(), sink, self.toggles.clone());
        if config.telemetry.enabled {
            let hub = Arc::new(TelemetryHub::new(config.telemetry.queue_capacity));
            if let Some(path) = &config.telemetry.output_file {
                self.start_telemetry_writer(&hub, PathBuf::from(path)).await?;
            }
            orchestrator = orchestrator.with_telemetry(hub.clone());
            self.telemetry = Some(hub);
        }

        self.start_config_poll(plc.clone(), config.daemon.poll_interval());
        self.start_frame_loop(orchestrator, source, frame_sink);
        self.start_heartbeat(plc, config.daemon.heartbeat_interval());

        Ok(())
    }

    fn start_config_poll(&mut self, plc: Arc<PlcClient>, interval: Duration) {
        info!("Starting config poll loop every {} ms", interval.as_millis());
        let task = tokio::spawn(run_config_poll_loop(
            plc,
            self.toggles.clone(),
            interval,
            self.running.clone(),
        ));
        self.tasks.push(task);
    }

    fn start_frame_loop(
        &mut self,
        orchestrator: Orchestrator,
        source: Box<dyn DetectionSource>,
        frame_sink: Option<Box<dyn FrameSink>>,
    ) {
        info!("Starting frame loop");
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            run_frame_loop(orchestrator, source, frame_sink, running)
                .await
                .map(|_| ())
        });
        self.tasks.push(task);
    }

    /// Subscribe a consumer appending every telemetry message to `path` as a JSON line
    async fn start_telemetry_writer(&mut self, hub: &Arc<TelemetryHub>, path: PathBuf) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open telemetry output {:?}", path))?;
        let (id, mut rx) = hub.subscribe();
        info!("Writing frame telemetry to {}", path.display());

        let running = self.running.clone();
        let hub = hub.clone();
        let task = tokio::spawn(async move {
            let mut written = 0u64;
            while running.load(Ordering::SeqCst) {
                match time::timeout(IDLE_TICK, rx.recv()).await {
                    Ok(Some(message)) => {
                        let mut line = serde_json::to_string(&message)?;
                        line.push('\n');
                        file.write_all(line.as_bytes()).await?;
                        written += 1;
                    }
                    Ok(None) => break,
                    Err(_) => continue,
                }
            }
            while let Ok(message) = rx.try_recv() {
                let mut line = serde_json::to_string(&message)?;
                line.push('\n');
                file.write_all(line.as_bytes()).await?;
                written += 1;
            }
            file.flush().await?;
            hub.unsubscribe(id);
            debug!(
                "Telemetry writer stopped after {} messages ({} dropped)",
                written,
                hub.dropped_total()
            );
            Ok::<(), anyhow::Error>(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs the PLC link state periodically
    fn start_heartbeat(&mut self, plc: Arc<PlcClient>, interval: Duration) {
        info!("Starting heartbeat monitor");

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let mut last_beat = Instant::now();
            while running.load(Ordering::SeqCst) {
                time::sleep(IDLE_TICK).await;
                if last_beat.elapsed() < interval {
                    continue;
                }
                last_beat = Instant::now();
                let state = plc.connection_state().await;
                let active = plc.active_alarms().await;
                if state.connected {
                    debug!("Daemon heartbeat: PLC connected, {} active alarms", active.len());
                } else {
                    warn!(
                        "Daemon heartbeat: PLC disconnected ({} consecutive failures)",
                        state.consecutive_failures
                    );
                }
            }
            Ok(())
        });

        self.tasks.push(task);
    }

    /// `false` once a shutdown was requested or the frame loop ended
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn toggles(&self) -> SharedToggles {
        self.toggles.clone()
    }

    pub fn plc(&self) -> Option<Arc<PlcClient>> {
        self.plc.clone()
    }

    pub fn telemetry(&self) -> Option<Arc<TelemetryHub>> {
        self.telemetry.clone()
    }

    /// Stop all running tasks
    ///
    /// Tasks observe the flag at their next iteration. The frame loop clears every PLC
    /// alarm before it exits.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete
    ///
    /// Consumes the daemon. A task that panics or returns an error is logged; a task
    /// that does not finish within 5 seconds is abandoned with a warning.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("Task failed: {:#}", e),
                Ok(Err(e)) => error!("Task panicked: {}", e),
                Err(_) => warn!("Task did not complete within timeout period, may be hung"),
            }
        }
        Ok(())
    }
}

/// HTTP sink when enabled, log sink otherwise.
fn build_event_sink(config: &Config) -> Result<Arc<dyn EventSink>> {
    if config.event_sink.enabled {
        let sink = HttpEventSink::new(&config.event_sink)?;
        Ok(Arc::new(sink))
    } else {
        Ok(Arc::new(LogEventSink::new()))
    }
}
