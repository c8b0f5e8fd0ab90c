// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Alarm rate limiting and fill ratio publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Minimum delay between two reports of the same alarm, in minutes.
    pub cooldown_minutes: u64,

    /// One log line is written every this many suppressed alarms.
    pub suppression_log_every: u32,

    /// Write the smoothed fill ratio to the coal fill register.
    pub publish_fill_ratio: bool,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 30,
            suppression_log_every: 20,
            publish_fill_ratio: true,
        }
    }
}

impl AlarmConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes * 60)
    }
}
