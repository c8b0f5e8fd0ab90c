// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing of the daemon background loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Interval between two reads of the PLC enable register, in milliseconds.
    pub poll_interval_ms: u64,

    /// Statistics are logged every this many frames.
    pub stats_interval_frames: u64,

    /// Interval between heartbeat log lines, in seconds.
    pub heartbeat_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            stats_interval_frames: 100,
            heartbeat_interval_secs: 60,
        }
    }
}

impl DaemonConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
