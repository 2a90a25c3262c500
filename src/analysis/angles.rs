use std::collections::BTreeMap;

use nalgebra::Vector2;
use serde::Serialize;

use crate::pose::{Landmark, LandmarkSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleKind {
    /// 3点 (A, B, C) の B における角度
    Joint,
    /// 2点 P1→P2 の基準軸に対する角度
    Segment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    None,
    Horizontal,
    Vertical,
}

/// 角度定義。プロセス全体で共有する読み取り専用データ
#[derive(Debug, Clone, Serialize)]
pub struct AngleDefinition {
    pub name: &'static str,
    pub kind: AngleKind,
    pub landmarks: &'static [Landmark],
    pub reference: Reference,
    pub convention: &'static str,
}

const EXTENSION: &str = "0-180 deg, 180 = full extension";
const HORIZONTAL: &str = "deg from +x axis, counter-clockwise positive (y up)";
const VERTICAL: &str = "deg from upward vertical, positive toward facing direction";

const fn joint(name: &'static str, landmarks: &'static [Landmark]) -> AngleDefinition {
    AngleDefinition {
        name,
        kind: AngleKind::Joint,
        landmarks,
        reference: Reference::None,
        convention: EXTENSION,
    }
}

const fn segment(name: &'static str, landmarks: &'static [Landmark]) -> AngleDefinition {
    AngleDefinition {
        name,
        kind: AngleKind::Segment,
        landmarks,
        reference: Reference::Horizontal,
        convention: HORIZONTAL,
    }
}

use Landmark::*;

static REGISTRY: [AngleDefinition; 24] = [
    joint("right_ankle", &[RightKnee, RightAnkle, RightFootIndex]),
    joint("left_ankle", &[LeftKnee, LeftAnkle, LeftFootIndex]),
    joint("right_knee", &[RightHip, RightKnee, RightAnkle]),
    joint("left_knee", &[LeftHip, LeftKnee, LeftAnkle]),
    joint("right_hip", &[RightKnee, RightHip, RightShoulder]),
    joint("left_hip", &[LeftKnee, LeftHip, LeftShoulder]),
    joint("right_shoulder", &[RightElbow, RightShoulder, RightHip]),
    joint("left_shoulder", &[LeftElbow, LeftShoulder, LeftHip]),
    joint("right_elbow", &[RightWrist, RightElbow, RightShoulder]),
    joint("left_elbow", &[LeftWrist, LeftElbow, LeftShoulder]),
    segment("right_foot", &[RightHeel, RightFootIndex]),
    segment("left_foot", &[LeftHeel, LeftFootIndex]),
    segment("right_shank", &[RightAnkle, RightKnee]),
    segment("left_shank", &[LeftAnkle, LeftKnee]),
    segment("right_thigh", &[RightKnee, RightHip]),
    segment("left_thigh", &[LeftKnee, LeftHip]),
    segment("pelvis", &[LeftHip, RightHip]),
    AngleDefinition {
        name: "trunk",
        kind: AngleKind::Segment,
        landmarks: &[HipCenter, Neck],
        reference: Reference::Vertical,
        convention: VERTICAL,
    },
    segment("shoulders", &[LeftShoulder, RightShoulder]),
    segment("right_arm", &[RightShoulder, RightElbow]),
    segment("left_arm", &[LeftShoulder, LeftElbow]),
    segment("right_forearm", &[RightElbow, RightWrist]),
    segment("left_forearm", &[LeftElbow, LeftWrist]),
    // 首: 体幹と同じく鉛直基準
    AngleDefinition {
        name: "neck",
        kind: AngleKind::Segment,
        landmarks: &[Neck, Nose],
        reference: Reference::Vertical,
        convention: VERTICAL,
    },
];

/// 全角度定義
pub fn registry() -> &'static [AngleDefinition] {
    &REGISTRY
}

pub fn lookup(name: &str) -> Option<&'static AngleDefinition> {
    REGISTRY.iter().find(|d| d.name == name)
}

/// 1人分の角度。欠損は None (JSON では null)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AngleSet {
    pub joint_angles: BTreeMap<&'static str, Option<f32>>,
    pub segment_angles: BTreeMap<&'static str, Option<f32>>,
}

impl AngleSet {
    /// 名前で引く (関節 → セグメントの順)
    pub fn get(&self, name: &str) -> Option<f32> {
        self.joint_angles
            .get(name)
            .or_else(|| self.segment_angles.get(name))
            .copied()
            .flatten()
    }
}

/// 被験者の向き (+1: 画像の +x 方向, -1: -x 方向)
///
/// 鼻と耳の中点、なければつま先とかかとの位置関係から推定する。
pub fn facing_direction(set: &LandmarkSet, threshold: f32) -> f32 {
    let ears: Vec<f32> = [LeftEar, RightEar]
        .iter()
        .filter_map(|lm| set.visible(*lm, threshold))
        .map(|kp| kp.x)
        .collect();
    if let Some(nose) = set.visible(Nose, threshold) {
        if !ears.is_empty() {
            let ear_x = ears.iter().sum::<f32>() / ears.len() as f32;
            let dx = nose.x - ear_x;
            if dx != 0.0 {
                return dx.signum();
            }
        }
    }

    let mut foot = 0.0;
    for (toe, heel) in [(LeftFootIndex, LeftHeel), (RightFootIndex, RightHeel)] {
        if let (Some(t), Some(h)) = (set.visible(toe, threshold), set.visible(heel, threshold)) {
            foot += t.x - h.x;
        }
    }
    if foot != 0.0 {
        foot.signum()
    } else {
        1.0
    }
}

/// 3点の B における角度 (deg, 0..=180)。長さ0のベクトルがあれば None
pub fn joint_angle(a: Vector2<f32>, b: Vector2<f32>, c: Vector2<f32>) -> Option<f32> {
    let ba = a - b;
    let bc = c - b;
    if ba.norm() == 0.0 || bc.norm() == 0.0 {
        return None;
    }
    Some(ba.perp(&bc).atan2(ba.dot(&bc)).abs().to_degrees())
}

/// 水平基準のセグメント角 (deg, -180..=180)。画像座標の y は下向きなので反転する
pub fn horizontal_angle(p1: Vector2<f32>, p2: Vector2<f32>) -> f32 {
    let d = p2 - p1;
    (-d.y).atan2(d.x).to_degrees()
}

/// 上向き鉛直からの角度 (deg)。facing 側に傾くと正
pub fn vertical_angle(p1: Vector2<f32>, p2: Vector2<f32>, facing: f32) -> f32 {
    let d = p2 - p1;
    (d.x * facing).atan2(-d.y).to_degrees()
}

/// 登録済み角度をまとめて計算する。入力に対して副作用なし
#[derive(Debug, Clone)]
pub struct AngleEngine {
    visibility_threshold: f32,
}

impl AngleEngine {
    pub fn new(visibility_threshold: f32) -> Self {
        Self {
            visibility_threshold,
        }
    }

    pub fn compute(&self, set: &LandmarkSet) -> AngleSet {
        let facing = facing_direction(set, self.visibility_threshold);
        let mut out = AngleSet::default();
        for def in registry() {
            let value = self.evaluate(def, set, facing);
            match def.kind {
                AngleKind::Joint => out.joint_angles.insert(def.name, value),
                AngleKind::Segment => out.segment_angles.insert(def.name, value),
            };
        }
        out
    }

    fn evaluate(&self, def: &AngleDefinition, set: &LandmarkSet, facing: f32) -> Option<f32> {
        let mut points = Vec::with_capacity(def.landmarks.len());
        for lm in def.landmarks {
            match set.visible(*lm, self.visibility_threshold) {
                Some(kp) => points.push(Vector2::new(kp.x, kp.y)),
                None => {
                    tracing::debug!(angle = def.name, landmark = %lm, "landmark missing");
                    return None;
                }
            }
        }
        match (def.kind, def.reference, points.as_slice()) {
            (AngleKind::Joint, _, [a, b, c]) => joint_angle(*a, *b, *c),
            (AngleKind::Segment, Reference::Vertical, [p1, p2]) => {
                Some(vertical_angle(*p1, *p2, facing))
            }
            (AngleKind::Segment, _, [p1, p2]) => Some(horizontal_angle(*p1, *p2)),
            _ => None,
        }
    }
}
