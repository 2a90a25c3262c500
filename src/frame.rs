//! Per-frame input and output records.

use serde::{Deserialize, Serialize};

use crate::analysis::{AngleSet, Metrics};
use crate::pose::{LandmarkSet, RawBody};
use crate::rom::RomReport;
use crate::tracker::PersonId;

/// One frame of detector output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameInput {
    pub frame_index: u64,
    /// Seconds, source-defined epoch
    pub timestamp: f64,
    #[serde(default)]
    pub persons: Vec<RawBody>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonResult {
    pub person_id: PersonId,
    pub tracking_confidence: f32,
    /// Filtered positions, original confidences
    pub keypoints: LandmarkSet,
    pub angles: AngleSet,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub detected_persons: usize,
    pub average_confidence: f32,
    pub processing_fps: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameResult {
    pub frame_id: u64,
    pub timestamp: f64,
    pub processing_time_ms: f64,
    pub persons: Vec<PersonResult>,
    pub frame_metrics: FrameMetrics,
}

/// Frame result plus the ROM report when a test is active.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedFrame {
    pub result: FrameResult,
    pub rom: Option<RomReport>,
}

/// Builds the output record from already computed per-person parts.
pub struct FrameAssembler;

impl FrameAssembler {
    pub fn assemble(
        frame_id: u64,
        timestamp: f64,
        processing_time_ms: f64,
        persons: Vec<PersonResult>,
    ) -> FrameResult {
        let frame_metrics = Self::frame_metrics(&persons, processing_time_ms);
        FrameResult {
            frame_id,
            timestamp,
            processing_time_ms,
            persons,
            frame_metrics,
        }
    }

    pub fn frame_metrics(persons: &[PersonResult], processing_time_ms: f64) -> FrameMetrics {
        let average_confidence = if persons.is_empty() {
            0.0
        } else {
            persons.iter().map(|p| p.tracking_confidence).sum::<f32>() / persons.len() as f32
        };
        let processing_fps = if processing_time_ms > 0.0 {
            1000.0 / processing_time_ms
        } else {
            0.0
        };
        FrameMetrics {
            detected_persons: persons.len(),
            average_confidence,
            processing_fps,
        }
    }
}
