use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::analysis::AngleSet;
use crate::error::ConfigError;
use crate::pose::{Landmark, LandmarkSet};

/// 側面判定: 肩の水平距離が体幹長のこの割合未満
const PROFILE_RATIO: f32 = 0.35;
/// 正面判定: 肩の水平距離が体幹長のこの割合以上
const FRONTAL_RATIO: f32 = 0.5;
/// これ未満の膝角度は膝が曲がっているとみなす
const STRAIGHT_KNEE_DEG: f32 = 160.0;
const ELBOW_RANGE_DEG: (f32, f32) = (70.0, 110.0);

/// 対応している ROM テスト
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    /// 立位体前屈 (側面から体幹角を測る)
    LowerBackFlexion,
    /// Hawkins テスト (正面から左前腕の挙上角を測る)
    Hawkins,
}

impl TestType {
    pub fn name(self) -> &'static str {
        match self {
            Self::LowerBackFlexion => "lower_back_flexion",
            Self::Hawkins => "hawkins",
        }
    }

    /// 可動域を測る角度の名前
    pub fn driving_angle(self) -> &'static str {
        match self {
            Self::LowerBackFlexion => "trunk",
            Self::Hawkins => "left_forearm",
        }
    }

    /// 開始姿勢を取るための指示
    pub fn position_instruction(self) -> &'static str {
        match self {
            Self::LowerBackFlexion => {
                "Stand sideways to the camera with your whole body in view"
            }
            Self::Hawkins => "Face the camera with your left arm in view",
        }
    }

    /// 計測中の動作指示
    pub fn movement_instruction(self) -> &'static str {
        match self {
            Self::LowerBackFlexion => "Slowly bend forward as far as you comfortably can",
            Self::Hawkins => "Raise your left forearm, then rotate it slowly downward",
        }
    }

    /// 開始姿勢になっているか
    pub fn position_valid(self, set: &LandmarkSet, threshold: f32) -> bool {
        let Some((separation, torso)) = shoulder_geometry(set, threshold) else {
            return false;
        };
        match self {
            Self::LowerBackFlexion => {
                let (knee, ankle) = nearer_leg(set);
                let leg_visible = set.visible(knee, threshold).is_some()
                    && set.visible(ankle, threshold).is_some();
                separation < PROFILE_RATIO * torso && leg_visible
            }
            Self::Hawkins => {
                let arm_visible = [
                    Landmark::LeftShoulder,
                    Landmark::LeftElbow,
                    Landmark::LeftWrist,
                ]
                .iter()
                .all(|lm| set.visible(*lm, threshold).is_some());
                separation >= FRONTAL_RATIO * torso && arm_visible
            }
        }
    }

    /// 姿勢の注意。問題がなければ None
    pub fn posture_message(self, set: &LandmarkSet, angles: &AngleSet) -> Option<&'static str> {
        match self {
            Self::LowerBackFlexion => {
                let knee = match nearer_leg(set) {
                    (Landmark::LeftKnee, _) => {
                        angles.get("left_knee").or_else(|| angles.get("right_knee"))
                    }
                    _ => angles.get("right_knee").or_else(|| angles.get("left_knee")),
                };
                match knee {
                    Some(k) if k < STRAIGHT_KNEE_DEG => {
                        Some("Your knees are bending. Keep them straight")
                    }
                    _ => None,
                }
            }
            Self::Hawkins => match angles.get("left_elbow") {
                Some(e) if e < ELBOW_RANGE_DEG.0 || e > ELBOW_RANGE_DEG.1 => {
                    Some("Keep your left elbow bent at about 90 degrees")
                }
                _ => None,
            },
        }
    }
}

/// カメラに近い側 (膝の信頼度が高い方) の (膝, 足首)。同点は左
fn nearer_leg(set: &LandmarkSet) -> (Landmark, Landmark) {
    let conf = |lm| set.get(lm).map(|kp| kp.confidence).unwrap_or(0.0);
    if conf(Landmark::LeftKnee) >= conf(Landmark::RightKnee) {
        (Landmark::LeftKnee, Landmark::LeftAnkle)
    } else {
        (Landmark::RightKnee, Landmark::RightAnkle)
    }
}

/// (肩の水平距離, 首-腰中心の距離)
fn shoulder_geometry(set: &LandmarkSet, threshold: f32) -> Option<(f32, f32)> {
    let left = set.visible(Landmark::LeftShoulder, threshold)?;
    let right = set.visible(Landmark::RightShoulder, threshold)?;
    let neck = set.visible(Landmark::Neck, threshold)?;
    let hip = set.visible(Landmark::HipCenter, threshold)?;
    let torso = neck.point().distance(&hip.point());
    if torso <= 0.0 {
        return None;
    }
    Some(((left.x - right.x).abs(), torso))
}

impl FromStr for TestType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lower_back_flexion" | "lower_back" | "lowerback" => Ok(Self::LowerBackFlexion),
            "hawkins" => Ok(Self::Hawkins),
            _ => Err(ConfigError::UnknownTestType(s.to_string())),
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
