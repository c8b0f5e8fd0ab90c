// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use serde::{Deserialize, Serialize};

/// Per-frame telemetry broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,

    /// Capacity of each subscriber queue. A full queue drops new messages.
    pub queue_capacity: usize,

    /// Optional JSON lines file receiving every telemetry message.
    #[serde(default)]
    pub output_file: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 10,
            output_file: None,
        }
    }
}
