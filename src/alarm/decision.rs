// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-detection alarm decisions
//!
//! [`decide`] is a pure function of the detections, the set of classes present in the
//! frame, the PLC feature toggles and the geometry parameters. Each detection yields at
//! most one decision. Cooldown and reporting happen downstream.

use std::collections::HashSet;

use super::{rule_for_class, AlarmKind, AlarmRule};
use crate::detection::{BoundingBox, Detection, DetectionClass, Region};
use crate::modbus::register_map::FeatureToggles;

/// Thresholds and geometry used by the decision predicates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionParams {
    /// Width of the analysed frame in pixels.
    pub frame_width: f64,
    /// Minimum confidence for a smoke detection.
    pub smoke_threshold: f64,
    /// Fraction of the frame width a lump must exceed.
    pub large_block_ratio: f64,
    /// Zone watched for personnel intrusion. Without it no personnel alarm is raised.
    pub person_region: Option<Region>,
}

impl Default for DecisionParams {
    fn default() -> Self {
        Self {
            frame_width: 800.0,
            smoke_threshold: 0.5,
            large_block_ratio: 0.3,
            person_region: None,
        }
    }
}

/// A detection that qualifies for an alarm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmDecision<'a> {
    pub detection: &'a Detection,
    pub rule: &'static AlarmRule,
}

impl AlarmDecision<'_> {
    pub fn kind(&self) -> AlarmKind {
        self.rule.kind
    }

    pub fn confidence(&self) -> f64 {
        self.detection.confidence()
    }
}

pub fn smoke_should_report(confidence: f64, threshold: f64) -> bool {
    confidence >= threshold
}

/// A lump is large when its width exceeds `ratio` of the frame width.
pub fn large_lump_should_report(box_width: f64, frame_width: f64, ratio: f64) -> bool {
    if frame_width <= 0.0 || box_width <= 0.0 {
        return false;
    }
    box_width / frame_width > ratio
}

/// Personnel alarm fires when the box center lies inside the watched region.
pub fn personnel_should_report(bbox: &BoundingBox, region: Option<&Region>) -> bool {
    match region {
        Some(region) => {
            let (cx, cy) = bbox.center();
            region.contains(cx, cy)
        }
        None => false,
    }
}

/// Seeing both shafts means the belt runs centered.
pub fn deviation_should_report(detected: &HashSet<DetectionClass>) -> bool {
    !(detected.contains(&DetectionClass::LeftShaft)
        && detected.contains(&DetectionClass::RightShaft))
}

/// Decide which detections of a frame raise an alarm.
///
/// `detected` is the set of classes present anywhere in the frame; it is needed by the
/// deviation rule, which looks at both shafts together.
pub fn decide<'a>(
    detections: &'a [Detection],
    detected: &HashSet<DetectionClass>,
    toggles: &FeatureToggles,
    params: &DecisionParams,
) -> Vec<AlarmDecision<'a>> {
    detections
        .iter()
        .filter_map(|detection| {
            let rule = rule_for_class(detection.class)?;
            let report = match rule.kind {
                AlarmKind::Smoke => {
                    smoke_should_report(detection.confidence(), params.smoke_threshold)
                }
                AlarmKind::LargeLump => {
                    toggles.large_lump
                        && large_lump_should_report(
                            detection.bbox.width(),
                            params.frame_width,
                            params.large_block_ratio,
                        )
                }
                AlarmKind::Personnel => {
                    toggles.personnel_boundary
                        && personnel_should_report(
                            &detection.bbox,
                            params.person_region.as_ref(),
                        )
                }
                AlarmKind::ForeignObject => toggles.foreign_object,
                AlarmKind::Deviation => toggles.deviation && deviation_should_report(detected),
                AlarmKind::CoalFill => false,
            };
            report.then_some(AlarmDecision { detection, rule })
        })
        .collect()
}
