// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Belt fill ratio tracking
//!
//! For each camera the tracker keeps exponential moving averages of the belt box
//! dimensions and of the coal fill ratio:
//!
//! - belt dimensions: `avg = 0.2 * current + 0.8 * avg`, starting from zero
//! - fill ratio: `raw = coal_area / belt_area * 100`, seeded with the first valid raw
//!   ratio, then `smoothed = 0.8 * smoothed + 0.2 * raw`, clamped to `[0, 100]`
//!
//! A frame whose belt area is zero yields no ratio and leaves the smoothed value
//! untouched. The averaged belt dimensions also provide size thresholds for lump
//! detection, with fixed fallbacks until a belt has been seen.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::detection::{Detection, DetectionClass};

/// Weight of the current belt box in the dimension average.
pub const BELT_EMA_WEIGHT: f64 = 0.2;
/// Weight of the current raw ratio in the fill ratio average.
pub const RATIO_EMA_WEIGHT: f64 = 0.2;
/// Fraction of the belt used to derive lump thresholds.
pub const THRESHOLD_FRACTION: f64 = 0.3;
/// Area threshold used before any belt was detected.
pub const FALLBACK_AREA_THRESHOLD: f64 = 1000.0;
/// Width threshold used before any belt was detected.
pub const FALLBACK_WIDTH_THRESHOLD: f64 = 30.0;

/// Smoothed per-camera belt state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FillRatioState {
    pub smoothed_ratio: f64,
    pub avg_belt_height: f64,
    pub avg_belt_width: f64,
    pub belt_detected: bool,
    seeded: bool,
}

impl FillRatioState {
    /// `true` once a valid ratio has been recorded.
    pub fn has_ratio(&self) -> bool {
        self.seeded
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FillRatioReading {
    pub belt_area: f64,
    pub coal_area: f64,
    /// Smoothed ratio in percent, `None` when the belt area is zero.
    pub ratio: Option<f64>,
}

impl fmt::Display for FillRatioReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ratio {
            Some(ratio) => write!(f, "{ratio:.1}%"),
            None => f.write_str("N/A"),
        }
    }
}

/// Size thresholds derived from the averaged belt box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeltThresholds {
    pub area: f64,
    pub width: f64,
}

/// Fill ratio tracker shared between the frame loop and diagnostics.
#[derive(Debug, Default)]
pub struct FillRatioTracker {
    states: Mutex<HashMap<u32, FillRatioState>>,
}

impl FillRatioTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<u32, FillRatioState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update the camera state with the detections of one frame.
    pub fn process(&self, camera_id: u32, detections: &[Detection]) -> FillRatioReading {
        let mut belt_area = 0.0;
        let mut coal_area = 0.0;
        let mut last_belt = None;

        for detection in detections {
            match detection.class {
                DetectionClass::Belt => {
                    belt_area += detection.bbox.area();
                    last_belt = Some(detection.bbox);
                }
                DetectionClass::CoalFill => coal_area += detection.bbox.area(),
                _ => {}
            }
        }

        let mut states = self.states();
        if last_belt.is_none() && !states.contains_key(&camera_id) {
            return FillRatioReading {
                belt_area,
                coal_area,
                ratio: None,
            };
        }
        let state = states.entry(camera_id).or_default();

        if let Some(bbox) = last_belt {
            let (width, height) = (bbox.width().max(0.0), bbox.height().max(0.0));
            state.avg_belt_width =
                BELT_EMA_WEIGHT * width + (1.0 - BELT_EMA_WEIGHT) * state.avg_belt_width;
            state.avg_belt_height =
                BELT_EMA_WEIGHT * height + (1.0 - BELT_EMA_WEIGHT) * state.avg_belt_height;
            state.belt_detected = true;
        }

        if belt_area <= 0.0 {
            return FillRatioReading {
                belt_area,
                coal_area,
                ratio: None,
            };
        }

        let raw = coal_area / belt_area * 100.0;
        let smoothed = if state.seeded {
            (1.0 - RATIO_EMA_WEIGHT) * state.smoothed_ratio + RATIO_EMA_WEIGHT * raw
        } else {
            state.seeded = true;
            raw
        };
        state.smoothed_ratio = smoothed.clamp(0.0, 100.0);
        debug!(
            "Camera {}: belt area {:.0}, coal area {:.0}, raw {:.1}%, smoothed {:.1}%",
            camera_id, belt_area, coal_area, raw, state.smoothed_ratio
        );

        FillRatioReading {
            belt_area,
            coal_area,
            ratio: Some(state.smoothed_ratio),
        }
    }

    /// Current smoothed ratio of a camera.
    pub fn ratio(&self, camera_id: u32) -> Option<f64> {
        self.states()
            .get(&camera_id)
            .filter(|state| state.seeded)
            .map(|state| state.smoothed_ratio)
    }

    /// Smoothed ratios of every camera that has one.
    pub fn all_ratios(&self) -> HashMap<u32, f64> {
        self.states()
            .iter()
            .filter(|(_, state)| state.seeded)
            .map(|(camera, state)| (*camera, state.smoothed_ratio))
            .collect()
    }

    pub fn belt_dimensions(&self, camera_id: u32) -> Option<FillRatioState> {
        self.states().get(&camera_id).copied()
    }

    /// Lump thresholds scaled by `belt_scale`, with fallbacks before the belt is known.
    pub fn belt_thresholds(&self, camera_id: u32, belt_scale: f64) -> BeltThresholds {
        match self.states().get(&camera_id) {
            Some(state)
                if state.belt_detected
                    && state.avg_belt_width > 0.0
                    && state.avg_belt_height > 0.0 =>
            {
                BeltThresholds {
                    area: state.avg_belt_height
                        * state.avg_belt_width
                        * THRESHOLD_FRACTION
                        * belt_scale,
                    width: state.avg_belt_width * THRESHOLD_FRACTION,
                }
            }
            _ => BeltThresholds {
                area: FALLBACK_AREA_THRESHOLD,
                width: FALLBACK_WIDTH_THRESHOLD,
            },
        }
    }

    /// Forget one camera, or every camera with `None`.
    pub fn reset(&self, camera_id: Option<u32>) {
        let mut states = self.states();
        match camera_id {
            Some(camera) => {
                states.remove(&camera);
            }
            None => states.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;
    use approx::assert_relative_eq;

    fn boxed(class: DetectionClass, x2: f64, y2: f64) -> Detection {
        Detection::new(class, 0.9, BoundingBox::new(0.0, 0.0, x2, y2))
    }

    fn frame(belt: (f64, f64), coal: (f64, f64)) -> Vec<Detection> {
        vec![
            boxed(DetectionClass::Belt, belt.0, belt.1),
            boxed(DetectionClass::CoalFill, coal.0, coal.1),
        ]
    }

    #[test]
    fn test_first_ratio_seeds_smoothing() {
        let tracker = FillRatioTracker::new();
        // belt 1000, coal 250
        let reading = tracker.process(1, &frame((100.0, 10.0), (50.0, 5.0)));
        assert_eq!(reading.belt_area, 1000.0);
        assert_eq!(reading.coal_area, 250.0);
        assert_relative_eq!(reading.ratio.unwrap(), 25.0);

        let reading = tracker.process(1, &frame((100.0, 10.0), (50.0, 5.0)));
        assert_relative_eq!(reading.ratio.unwrap(), 25.0);
        assert_eq!(reading.to_string(), "25.0%");
    }

    #[test]
    fn test_smoothing_moves_toward_new_ratio() {
        let tracker = FillRatioTracker::new();
        tracker.process(1, &frame((100.0, 10.0), (50.0, 5.0)));
        // raw 50%
        let reading = tracker.process(1, &frame((100.0, 10.0), (100.0, 5.0)));
        assert_relative_eq!(reading.ratio.unwrap(), 0.8 * 25.0 + 0.2 * 50.0);
    }

    #[test]
    fn test_zero_belt_area_keeps_previous_value() {
        let tracker = FillRatioTracker::new();
        tracker.process(1, &frame((100.0, 10.0), (50.0, 5.0)));

        let degenerate = vec![
            Detection::new(
                DetectionClass::Belt,
                0.9,
                BoundingBox::new(10.0, 10.0, 10.0, 40.0),
            ),
            boxed(DetectionClass::CoalFill, 50.0, 5.0),
        ];
        let reading = tracker.process(1, &degenerate);
        assert_eq!(reading.ratio, None);
        assert_eq!(reading.to_string(), "N/A");
        assert_relative_eq!(tracker.ratio(1).unwrap(), 25.0);
    }

    #[test]
    fn test_ratio_is_clamped() {
        let tracker = FillRatioTracker::new();
        // coal larger than belt
        let reading = tracker.process(3, &frame((10.0, 10.0), (40.0, 40.0)));
        assert_eq!(reading.ratio, Some(100.0));
    }

    #[test]
    fn test_state_created_only_with_belt() {
        let tracker = FillRatioTracker::new();
        let reading = tracker.process(7, &[boxed(DetectionClass::CoalFill, 5.0, 5.0)]);
        assert_eq!(reading.ratio, None);
        assert!(tracker.belt_dimensions(7).is_none());
        assert!(tracker.all_ratios().is_empty());
    }

    #[test]
    fn test_belt_dimension_average_and_thresholds() {
        let tracker = FillRatioTracker::new();
        assert_eq!(
            tracker.belt_thresholds(1, 1.0),
            BeltThresholds {
                area: FALLBACK_AREA_THRESHOLD,
                width: FALLBACK_WIDTH_THRESHOLD
            }
        );

        tracker.process(1, &frame((100.0, 10.0), (50.0, 5.0)));
        let state = tracker.belt_dimensions(1).unwrap();
        assert!(state.belt_detected);
        assert_relative_eq!(state.avg_belt_width, 20.0);
        assert_relative_eq!(state.avg_belt_height, 2.0);
        let thresholds = tracker.belt_thresholds(1, 1.0);
        assert_relative_eq!(thresholds.area, 20.0 * 2.0 * 0.3);
        assert_relative_eq!(thresholds.width, 6.0);

        tracker.process(1, &frame((200.0, 20.0), (50.0, 5.0)));
        let state = tracker.belt_dimensions(1).unwrap();
        assert_relative_eq!(state.avg_belt_width, 56.0);
        assert_relative_eq!(state.avg_belt_height, 5.6);

        let thresholds = tracker.belt_thresholds(1, 2.0);
        assert_relative_eq!(thresholds.area, 56.0 * 5.6 * 0.3 * 2.0);
        assert_relative_eq!(thresholds.width, 56.0 * 0.3);
    }

    #[test]
    fn test_cameras_are_independent_and_resettable() {
        let tracker = FillRatioTracker::new();
        tracker.process(1, &frame((100.0, 10.0), (50.0, 5.0)));
        tracker.process(2, &frame((100.0, 10.0), (100.0, 5.0)));
        let ratios = tracker.all_ratios();
        assert_eq!(ratios.len(), 2);
        assert_relative_eq!(ratios[&2], 50.0);

        tracker.reset(Some(1));
        assert!(tracker.ratio(1).is_none());
        assert!(tracker.ratio(2).is_some());

        tracker.reset(None);
        assert!(tracker.all_ratios().is_empty());
    }
}
