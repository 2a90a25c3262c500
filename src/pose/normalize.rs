use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::keypoint::{Keypoint, Landmark, LandmarkSet};
use crate::config::PoseConfig;
use crate::error::FrameError;

/// 外部検出器が出す1人分の生データ (名前 → キーポイント)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBody {
    #[serde(default)]
    pub keypoints: BTreeMap<String, Keypoint>,
}

impl RawBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, x: f32, y: f32, confidence: f32) -> Self {
        self.keypoints
            .insert(name.to_string(), Keypoint::new(x, y, confidence));
        self
    }
}

/// 検出器出力を正規のランドマーク表へ変換し、値域を検証する
#[derive(Debug, Clone)]
pub struct KeypointNormalizer {
    visibility_threshold: f32,
    min_visible_ratio: f32,
    min_average_confidence: f32,
}

impl KeypointNormalizer {
    pub fn from_config(config: &PoseConfig) -> Self {
        Self {
            visibility_threshold: config.visibility_threshold,
            min_visible_ratio: config.min_visible_ratio,
            min_average_confidence: config.min_average_confidence,
        }
    }

    /// フレーム内の全検出を変換する。
    ///
    /// 値域違反が1つでもあればフレームごと拒否する。品質が低いだけの検出は捨てる。
    pub fn normalize(
        &self,
        frame_index: u64,
        bodies: &[RawBody],
    ) -> Result<Vec<LandmarkSet>, FrameError> {
        let mut sets = Vec::with_capacity(bodies.len());
        for (i, body) in bodies.iter().enumerate() {
            let set = self.normalize_body(frame_index, body)?;
            if self.is_acceptable(&set) {
                sets.push(set);
            } else {
                tracing::debug!(frame_index, body = i, "dropping low-quality detection");
            }
        }
        Ok(sets)
    }

    pub fn normalize_body(&self, frame_index: u64, body: &RawBody) -> Result<LandmarkSet, FrameError> {
        let mut set = LandmarkSet::new();
        for (name, kp) in &body.keypoints {
            if !kp.x.is_finite() || !kp.y.is_finite() {
                return Err(FrameError::NonFiniteCoordinate {
                    frame_index,
                    landmark: name.clone(),
                });
            }
            if !(0.0..=1.0).contains(&kp.confidence) {
                return Err(FrameError::ConfidenceOutOfRange {
                    frame_index,
                    landmark: name.clone(),
                    confidence: kp.confidence,
                });
            }
            match Landmark::from_name(name) {
                Some(landmark) => set.insert(landmark, *kp),
                None => tracing::trace!(frame_index, name = %name, "ignoring unknown landmark"),
            }
        }

        // 派生点: 検出器が出していなければ中点で補う
        if set.get(Landmark::Neck).is_none() {
            if let Some(neck) = set.midpoint(Landmark::LeftShoulder, Landmark::RightShoulder) {
                set.insert(Landmark::Neck, neck);
            }
        }
        if set.get(Landmark::HipCenter).is_none() {
            if let Some(hip) = set.midpoint(Landmark::LeftHip, Landmark::RightHip) {
                set.insert(Landmark::HipCenter, hip);
            }
        }
        Ok(set)
    }

    /// 可視点の比率と平均信頼度で検出の品質を判定
    fn is_acceptable(&self, set: &LandmarkSet) -> bool {
        let total = set.len();
        if total == 0 {
            return false;
        }
        let (visible, sum) = set
            .iter()
            .filter(|(_, kp)| kp.is_valid(self.visibility_threshold))
            .fold((0usize, 0.0f32), |(n, s), (_, kp)| (n + 1, s + kp.confidence));
        if visible == 0 {
            return false;
        }
        let ratio = visible as f32 / total as f32;
        let average = sum / visible as f32;
        ratio >= self.min_visible_ratio && average >= self.min_average_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> KeypointNormalizer {
        KeypointNormalizer::from_config(&PoseConfig::default())
    }

    fn upper_body() -> RawBody {
        RawBody::new()
            .with("left_shoulder", 100.0, 100.0, 0.9)
            .with("right_shoulder", 140.0, 100.0, 0.7)
            .with("left_hip", 105.0, 200.0, 0.8)
            .with("right_hip", 135.0, 200.0, 0.8)
    }

    #[test]
    fn test_maps_names_and_derives_midpoints() {
        let set = normalizer().normalize_body(0, &upper_body()).unwrap();
        let neck = set.get(Landmark::Neck).unwrap();
        assert_eq!(neck.x, 120.0);
        assert!((neck.confidence - 0.8).abs() < 1e-6);
        let hip = set.get(Landmark::HipCenter).unwrap();
        assert_eq!(hip.y, 200.0);
    }

    #[test]
    fn test_keeps_detector_supplied_neck() {
        let body = upper_body().with("neck", 1.0, 2.0, 0.5);
        let set = normalizer().normalize_body(0, &body).unwrap();
        assert_eq!(set.get(Landmark::Neck).unwrap().x, 1.0);
    }

    #[test]
    fn test_alias_and_unknown_names() {
        let body = upper_body().with("left_toe", 1.0, 1.0, 0.9).with("tail", 0.0, 0.0, 0.9);
        let set = normalizer().normalize_body(0, &body).unwrap();
        assert!(set.get(Landmark::LeftFootIndex).is_some());
        assert_eq!(set.len(), 7);
    }

    #[test]
    fn test_rejects_non_finite_coordinate() {
        let body = upper_body().with("nose", f32::NAN, 0.0, 0.9);
        let err = normalizer().normalize(7, &[body]).unwrap_err();
        assert_eq!(
            err,
            FrameError::NonFiniteCoordinate {
                frame_index: 7,
                landmark: "nose".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_confidence_out_of_range() {
        let body = upper_body().with("nose", 1.0, 1.0, 1.5);
        assert!(matches!(
            normalizer().normalize(0, &[body]),
            Err(FrameError::ConfidenceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_drops_low_quality_detection() {
        let weak = RawBody::new()
            .with("left_hip", 0.0, 0.0, 0.1)
            .with("right_hip", 0.0, 0.0, 0.2)
            .with("nose", 0.0, 0.0, 0.35);
        let sets = normalizer().normalize(0, &[weak, upper_body(), RawBody::new()]).unwrap();
        assert_eq!(sets.len(), 1);
    }
}
