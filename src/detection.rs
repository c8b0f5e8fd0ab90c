// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Detection records produced by the vision model
//!
//! A [`DetectionFrame`] carries every [`Detection`] found in one video frame together
//! with the frame geometry. Class identifiers follow the model's label table:
//!
//! | id | class            |
//! |----|------------------|
//! | 0  | belt             |
//! | 1  | coal fill        |
//! | 2  | large lump       |
//! | 3  | left shaft       |
//! | 4  | right shaft      |
//! | 5  | foreign object   |
//! | 6  | personnel        |
//! | 7  | smoke            |
//!
//! Decoding an unknown class id is an error rather than a silent skip.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a class id outside the label table is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown detection class id {0}")]
pub struct UnknownClassId(pub u8);

/// Object classes recognised by the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DetectionClass {
    Belt,
    CoalFill,
    LargeLump,
    LeftShaft,
    RightShaft,
    ForeignObject,
    Personnel,
    Smoke,
}

impl DetectionClass {
    /// Every class in label-table order.
    pub const ALL: [DetectionClass; 8] = [
        DetectionClass::Belt,
        DetectionClass::CoalFill,
        DetectionClass::LargeLump,
        DetectionClass::LeftShaft,
        DetectionClass::RightShaft,
        DetectionClass::ForeignObject,
        DetectionClass::Personnel,
        DetectionClass::Smoke,
    ];

    /// Numeric class id used by the model.
    pub fn id(self) -> u8 {
        match self {
            DetectionClass::Belt => 0,
            DetectionClass::CoalFill => 1,
            DetectionClass::LargeLump => 2,
            DetectionClass::LeftShaft => 3,
            DetectionClass::RightShaft => 4,
            DetectionClass::ForeignObject => 5,
            DetectionClass::Personnel => 6,
            DetectionClass::Smoke => 7,
        }
    }

    /// Look up a class by its numeric id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Human readable label.
    pub fn label(self) -> &'static str {
        match self {
            DetectionClass::Belt => "belt",
            DetectionClass::CoalFill => "coal_fill",
            DetectionClass::LargeLump => "large_lump",
            DetectionClass::LeftShaft => "left_shaft",
            DetectionClass::RightShaft => "right_shaft",
            DetectionClass::ForeignObject => "foreign_object",
            DetectionClass::Personnel => "personnel",
            DetectionClass::Smoke => "smoke",
        }
    }
}

impl TryFrom<u8> for DetectionClass {
    type Error = UnknownClassId;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or(UnknownClassId(id))
    }
}

impl From<DetectionClass> for u8 {
    fn from(class: DetectionClass) -> Self {
        class.id()
    }
}

impl fmt::Display for DetectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Axis aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Signed width, may be zero or negative for degenerate boxes.
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Area of the box, zero for degenerate boxes.
    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Rectangular zone of the image, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Region {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }
}

/// Wire representation of a detection, as found in recorded frame files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class_id: u8,
    pub confidence: f64,
    /// `[x1, y1, x2, y2]`
    pub bbox: [f64; 4],
}

/// A single object found by the vision model.
///
/// The confidence is always within `[0, 1]`; construction and decoding clamp it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DetectionRecord", into = "DetectionRecord")]
pub struct Detection {
    pub class: DetectionClass,
    confidence: f64,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class: DetectionClass, confidence: f64, bbox: BoundingBox) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            class,
            confidence,
            bbox,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

impl TryFrom<DetectionRecord> for Detection {
    type Error = UnknownClassId;

    fn try_from(record: DetectionRecord) -> Result<Self, Self::Error> {
        let class = DetectionClass::try_from(record.class_id)?;
        let [x1, y1, x2, y2] = record.bbox;
        Ok(Detection::new(
            class,
            record.confidence,
            BoundingBox::new(x1, y1, x2, y2),
        ))
    }
}

impl From<Detection> for DetectionRecord {
    fn from(detection: Detection) -> Self {
        let b = detection.bbox;
        DetectionRecord {
            class_id: detection.class.id(),
            confidence: detection.confidence,
            bbox: [b.x1, b.y1, b.x2, b.y2],
        }
    }
}

/// All detections of one video frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionFrame {
    /// Camera that produced the frame, the configured camera when absent.
    #[serde(default)]
    pub camera_id: Option<u32>,
    #[serde(default)]
    pub frame_index: u64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Encoded frame image attached to alarm events, if the source provides one.
    #[serde(skip)]
    pub image: Option<Arc<Vec<u8>>>,
}

impl DetectionFrame {
    pub fn new(camera_id: u32, frame_index: u64, width: u32, height: u32) -> Self {
        Self {
            camera_id: Some(camera_id),
            frame_index,
            width,
            height,
            detections: Vec::new(),
            image: None,
        }
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    /// Set of classes present in the frame.
    pub fn class_set(&self) -> HashSet<DetectionClass> {
        self.detections.iter().map(|d| d.class).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_ids_follow_label_table() {
        for (id, class) in DetectionClass::ALL.iter().enumerate() {
            assert_eq!(class.id() as usize, id);
            assert_eq!(DetectionClass::from_id(id as u8), Some(*class));
        }
        assert_eq!(DetectionClass::from_id(8), None);
        assert_eq!(DetectionClass::try_from(42), Err(UnknownClassId(42)));
    }

    #[test]
    fn test_confidence_is_clamped() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(Detection::new(DetectionClass::Smoke, 1.7, bbox).confidence(), 1.0);
        assert_eq!(Detection::new(DetectionClass::Smoke, -0.2, bbox).confidence(), 0.0);
        assert_eq!(
            Detection::new(DetectionClass::Smoke, f64::NAN, bbox).confidence(),
            0.0
        );
    }

    #[test]
    fn test_degenerate_box_has_no_area() {
        assert_eq!(BoundingBox::new(10.0, 10.0, 5.0, 20.0).area(), 0.0);
        assert_eq!(BoundingBox::new(0.0, 0.0, 100.0, 10.0).area(), 1000.0);
    }

    #[test]
    fn test_region_bounds_are_inclusive() {
        let region = Region {
            x1: 0.0,
            y1: 0.0,
            x2: 100.0,
            y2: 50.0,
        };
        assert!(region.contains(0.0, 0.0));
        assert!(region.contains(100.0, 50.0));
        assert!(!region.contains(100.5, 10.0));
    }

    #[test]
    fn test_frame_decoding_rejects_unknown_class() {
        let good = r#"{"camera_id":2,"frame_index":5,"width":800,"height":450,
            "detections":[{"class_id":7,"confidence":0.9,"bbox":[1,2,3,4]}]}"#;
        let frame: DetectionFrame = serde_json::from_str(good).unwrap();
        assert_eq!(frame.camera_id, Some(2));
        assert_eq!(frame.detections[0].class, DetectionClass::Smoke);
        assert_eq!(frame.detections[0].bbox.x2, 3.0);

        let bad = r#"{"width":800,"height":450,
            "detections":[{"class_id":9,"confidence":0.9,"bbox":[1,2,3,4]}]}"#;
        let err = serde_json::from_str::<DetectionFrame>(bad).unwrap_err();
        assert!(err.to_string().contains("unknown detection class id 9"));
    }
}
