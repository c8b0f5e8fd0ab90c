// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Detection thresholds and camera geometry

use serde::{Deserialize, Serialize};

use crate::alarm::DecisionParams;
use crate::detection::Region;

/// Thresholds applied to the vision model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Camera identifier reported with alarm events.
    pub camera_id: u32,

    /// Nominal frame width, used when a frame does not carry its own geometry.
    pub frame_width: u32,

    /// Nominal frame height.
    pub frame_height: u32,

    /// Minimum smoke confidence, `0.0..=1.0`.
    pub smoke_threshold: f64,

    /// A lump is large when wider than this fraction of the frame width.
    pub large_block_ratio: f64,

    /// Zone watched for personnel intrusion. Personnel alarms are off without it.
    #[serde(default)]
    pub person_region: Option<Region>,

    /// Scale applied to the belt-derived area threshold.
    #[serde(default = "default_belt_scale")]
    pub belt_scale: f64,
}

fn default_belt_scale() -> f64 {
    1.0
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            camera_id: 1,
            frame_width: 800,
            frame_height: 450,
            smoke_threshold: 0.5,
            large_block_ratio: 0.3,
            person_region: None,
            belt_scale: default_belt_scale(),
        }
    }
}

impl DetectionConfig {
    /// Decision parameters for a frame of the given width.
    pub fn decision_params(&self, frame_width: u32) -> DecisionParams {
        let width = if frame_width > 0 {
            frame_width
        } else {
            self.frame_width
        };
        DecisionParams {
            frame_width: f64::from(width),
            smoke_threshold: self.smoke_threshold,
            large_block_ratio: self.large_block_ratio,
            person_region: self.person_region,
        }
    }
}
