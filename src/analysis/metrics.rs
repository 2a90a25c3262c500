use serde::{Serialize, Serializer};

use super::angles::facing_direction;
use crate::config::MetricsConfig;
use crate::pose::{Landmark, LandmarkSet, Point};

/// 重心計算に使う体節と重み
const SEGMENT_WEIGHTS: [(Landmark, f32); 9] = [
    (Landmark::LeftHip, 0.15),
    (Landmark::RightHip, 0.15),
    (Landmark::LeftShoulder, 0.1),
    (Landmark::RightShoulder, 0.1),
    (Landmark::Neck, 0.2),
    (Landmark::LeftKnee, 0.075),
    (Landmark::RightKnee, 0.075),
    (Landmark::LeftAnkle, 0.075),
    (Landmark::RightAnkle, 0.075),
];

const HEAD: [Landmark; 5] = [
    Landmark::Nose,
    Landmark::LeftEye,
    Landmark::RightEye,
    Landmark::LeftEar,
    Landmark::RightEar,
];

const FEET: [Landmark; 6] = [
    Landmark::LeftAnkle,
    Landmark::RightAnkle,
    Landmark::LeftHeel,
    Landmark::RightHeel,
    Landmark::LeftFootIndex,
    Landmark::RightFootIndex,
];

const LEFT_SIDE: [Landmark; 6] = [
    Landmark::LeftEar,
    Landmark::LeftShoulder,
    Landmark::LeftElbow,
    Landmark::LeftHip,
    Landmark::LeftKnee,
    Landmark::LeftAnkle,
];

const RIGHT_SIDE: [Landmark; 6] = [
    Landmark::RightEar,
    Landmark::RightShoulder,
    Landmark::RightElbow,
    Landmark::RightHip,
    Landmark::RightKnee,
    Landmark::RightAnkle,
];

/// 肩幅/体幹長がこれ以上なら正面 (または背面)
const FRONTAL_RATIO: f32 = 0.5;
/// 左右の平均信頼度がこれ以上離れていれば見えている側とみなす
const SIDE_CONFIDENCE_MARGIN: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibleSide {
    Front,
    Back,
    Left,
    Right,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementDirection {
    LeftToRight,
    RightToLeft,
    Stationary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub height_pixels: f32,
    /// 可視点がなければ None。出力では {x: 0, y: 0}
    #[serde(serialize_with = "point_or_origin")]
    pub center_of_mass: Option<Point>,
    pub velocity: Point,
    pub visible_side: VisibleSide,
    pub movement_direction: MovementDirection,
}

fn point_or_origin<S: Serializer>(p: &Option<Point>, serializer: S) -> Result<S::Ok, S::Error> {
    p.unwrap_or_default().serialize(serializer)
}

/// フィルタ済みランドマークから身体メトリクスを求める
#[derive(Debug, Clone)]
pub struct MetricsComputer {
    visibility_threshold: f32,
    stationary_speed: f32,
}

impl MetricsComputer {
    pub fn new(config: &MetricsConfig, visibility_threshold: f32) -> Self {
        Self {
            visibility_threshold,
            stationary_speed: config.stationary_speed,
        }
    }

    /// `previous_center_of_mass` は同じ人物の直前フレームの重心、`dt` はその経過秒数
    pub fn compute(
        &self,
        set: &LandmarkSet,
        previous_center_of_mass: Option<Point>,
        dt: f64,
    ) -> Metrics {
        let center_of_mass = self.center_of_mass(set);
        let velocity = match (center_of_mass, previous_center_of_mass) {
            (Some(now), Some(prev)) if dt > 0.0 => Point::new(
                ((now.x - prev.x) as f64 / dt) as f32,
                ((now.y - prev.y) as f64 / dt) as f32,
            ),
            _ => Point::default(),
        };
        Metrics {
            height_pixels: self.height_pixels(set),
            center_of_mass,
            velocity,
            visible_side: self.visible_side(set),
            movement_direction: self.movement_direction(velocity.x),
        }
    }

    /// 頭頂側から足元までの縦の広がり。頭か足が見えなければ全可視点で測る
    pub fn height_pixels(&self, set: &LandmarkSet) -> f32 {
        let th = self.visibility_threshold;
        let top = HEAD
            .iter()
            .filter_map(|lm| set.visible(*lm, th))
            .map(|kp| kp.y)
            .reduce(f32::min);
        let bottom = FEET
            .iter()
            .filter_map(|lm| set.visible(*lm, th))
            .map(|kp| kp.y)
            .reduce(f32::max);
        let (top, bottom) = match (top, bottom) {
            (Some(t), Some(b)) => (t, b),
            _ => {
                let ys = set.iter().filter(|(_, kp)| kp.is_valid(th)).map(|(_, kp)| kp.y);
                let (min, max) = ys.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), y| {
                    (lo.min(y), hi.max(y))
                });
                if min > max {
                    return 0.0;
                }
                (min, max)
            }
        };
        (bottom - top).max(0.0)
    }

    /// 体節重み × 信頼度の加重重心。対象点がなければ可視点の平均
    pub fn center_of_mass(&self, set: &LandmarkSet) -> Option<Point> {
        let (sx, sy, sw) = SEGMENT_WEIGHTS
            .iter()
            .filter_map(|(lm, w)| set.visible(*lm, self.visibility_threshold).map(|kp| (kp, w * kp.confidence)))
            .fold((0.0f32, 0.0f32, 0.0f32), |(sx, sy, sw), (kp, w)| {
                (sx + kp.x * w, sy + kp.y * w, sw + w)
            });
        if sw > 0.0 {
            return Some(Point::new(sx / sw, sy / sw));
        }
        set.visible_centroid(self.visibility_threshold)
    }

    pub fn visible_side(&self, set: &LandmarkSet) -> VisibleSide {
        let th = self.visibility_threshold;
        let (left, right) = match (
            set.visible(Landmark::LeftShoulder, th),
            set.visible(Landmark::RightShoulder, th),
        ) {
            (Some(l), Some(r)) => (l, r),
            _ => return VisibleSide::Unknown,
        };

        let torso = match (set.visible(Landmark::Neck, th), set.visible(Landmark::HipCenter, th)) {
            (Some(n), Some(h)) => n.point().distance(&h.point()),
            _ => return VisibleSide::Unknown,
        };
        if torso <= 0.0 {
            return VisibleSide::Unknown;
        }

        // 正面向きなら被験者の左肩は画像の右側に映る
        let separation = left.x - right.x;
        if separation.abs() >= FRONTAL_RATIO * torso {
            return if separation > 0.0 {
                VisibleSide::Front
            } else {
                VisibleSide::Back
            };
        }

        let left_conf = mean_confidence(set, &LEFT_SIDE);
        let right_conf = mean_confidence(set, &RIGHT_SIDE);
        if left_conf - right_conf > SIDE_CONFIDENCE_MARGIN {
            return VisibleSide::Left;
        }
        if right_conf - left_conf > SIDE_CONFIDENCE_MARGIN {
            return VisibleSide::Right;
        }
        // +x を向いている被験者はカメラに右半身を見せる
        if facing_direction(set, th) > 0.0 {
            VisibleSide::Right
        } else {
            VisibleSide::Left
        }
    }

    pub fn movement_direction(&self, velocity_x: f32) -> MovementDirection {
        if velocity_x > self.stationary_speed {
            MovementDirection::LeftToRight
        } else if velocity_x < -self.stationary_speed {
            MovementDirection::RightToLeft
        } else {
            MovementDirection::Stationary
        }
    }
}

fn mean_confidence(set: &LandmarkSet, landmarks: &[Landmark]) -> f32 {
    let (sum, n) = landmarks
        .iter()
        .filter_map(|lm| set.get(*lm))
        .fold((0.0f32, 0usize), |(s, n), kp| (s + kp.confidence, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Keypoint;

    fn computer() -> MetricsComputer {
        MetricsComputer::new(&MetricsConfig::default(), 0.3)
    }

    /// 正面向きの立位
    fn make_frontal() -> LandmarkSet {
        let mut set = LandmarkSet::new();
        set.insert(Landmark::Nose, Keypoint::new(200.0, 50.0, 0.9));
        set.insert(Landmark::LeftShoulder, Keypoint::new(250.0, 120.0, 0.9));
        set.insert(Landmark::RightShoulder, Keypoint::new(150.0, 120.0, 0.9));
        set.insert(Landmark::Neck, Keypoint::new(200.0, 120.0, 0.9));
        set.insert(Landmark::LeftHip, Keypoint::new(230.0, 260.0, 0.9));
        set.insert(Landmark::RightHip, Keypoint::new(170.0, 260.0, 0.9));
        set.insert(Landmark::HipCenter, Keypoint::new(200.0, 260.0, 0.9));
        set.insert(Landmark::LeftAnkle, Keypoint::new(230.0, 450.0, 0.9));
        set.insert(Landmark::RightAnkle, Keypoint::new(170.0, 450.0, 0.9));
        set
    }

    /// 右向き (+x) の側面
    fn make_profile(left_conf: f32, right_conf: f32) -> LandmarkSet {
        let mut set = LandmarkSet::new();
        set.insert(Landmark::LeftShoulder, Keypoint::new(205.0, 120.0, left_conf));
        set.insert(Landmark::RightShoulder, Keypoint::new(195.0, 120.0, right_conf));
        set.insert(Landmark::Neck, Keypoint::new(200.0, 120.0, 0.9));
        set.insert(Landmark::HipCenter, Keypoint::new(200.0, 260.0, 0.9));
        set.insert(Landmark::Nose, Keypoint::new(230.0, 60.0, 0.9));
        set.insert(Landmark::RightEar, Keypoint::new(205.0, 60.0, 0.9));
        set
    }

    #[test]
    fn test_height_from_head_to_feet() {
        assert!((computer().height_pixels(&make_frontal()) - 400.0).abs() < 1e-4);
    }

    #[test]
    fn test_height_fallback_and_empty() {
        let mut set = LandmarkSet::new();
        assert_eq!(computer().height_pixels(&set), 0.0);
        set.insert(Landmark::LeftShoulder, Keypoint::new(0.0, 100.0, 0.9));
        set.insert(Landmark::LeftHip, Keypoint::new(0.0, 250.0, 0.9));
        set.insert(Landmark::LeftKnee, Keypoint::new(0.0, 900.0, 0.1));
        assert!((computer().height_pixels(&set) - 150.0).abs() < 1e-4);
    }

    #[test]
    fn test_center_of_mass_weighted() {
        let mut set = LandmarkSet::new();
        set.insert(Landmark::Neck, Keypoint::new(0.0, 0.0, 1.0));
        set.insert(Landmark::LeftHip, Keypoint::new(0.0, 100.0, 1.0));
        // 0.15 * 100 / (0.2 + 0.15)
        let com = computer().center_of_mass(&set).unwrap();
        assert!((com.y - 15.0 / 0.35).abs() < 1e-3);
    }

    #[test]
    fn test_center_of_mass_fallback_and_none() {
        let mut set = LandmarkSet::new();
        assert!(computer().center_of_mass(&set).is_none());
        set.insert(Landmark::Nose, Keypoint::new(10.0, 20.0, 0.9));
        set.insert(Landmark::LeftWrist, Keypoint::new(30.0, 40.0, 0.9));
        assert_eq!(computer().center_of_mass(&set), Some(Point::new(20.0, 30.0)));
    }

    #[test]
    fn test_velocity() {
        let set = make_frontal();
        let c = computer();
        let com = c.center_of_mass(&set).unwrap();
        let prev = Point::new(com.x - 10.0, com.y);

        let first = c.compute(&set, None, 0.1);
        assert_eq!(first.velocity, Point::default());
        assert_eq!(first.movement_direction, MovementDirection::Stationary);

        let moving = c.compute(&set, Some(prev), 0.1);
        assert!((moving.velocity.x - 100.0).abs() < 1e-2);
        assert_eq!(moving.movement_direction, MovementDirection::LeftToRight);

        let no_dt = c.compute(&set, Some(prev), 0.0);
        assert_eq!(no_dt.velocity, Point::default());
    }

    #[test]
    fn test_movement_dead_zone() {
        let c = computer();
        assert_eq!(c.movement_direction(20.0), MovementDirection::Stationary);
        assert_eq!(c.movement_direction(-20.5), MovementDirection::RightToLeft);
    }

    #[test]
    fn test_visible_side_front_and_back() {
        let c = computer();
        let mut set = make_frontal();
        assert_eq!(c.visible_side(&set), VisibleSide::Front);
        set.insert(Landmark::LeftShoulder, Keypoint::new(150.0, 120.0, 0.9));
        set.insert(Landmark::RightShoulder, Keypoint::new(250.0, 120.0, 0.9));
        assert_eq!(c.visible_side(&set), VisibleSide::Back);
    }

    #[test]
    fn test_visible_side_profile() {
        let c = computer();
        assert_eq!(c.visible_side(&make_profile(0.4, 0.9)), VisibleSide::Right);
        assert_eq!(c.visible_side(&make_profile(0.9, 0.4)), VisibleSide::Left);
        // 信頼度が拮抗していれば向きで決める
        assert_eq!(c.visible_side(&make_profile(0.8, 0.8)), VisibleSide::Right);
    }

    #[test]
    fn test_visible_side_unknown() {
        let mut set = make_frontal();
        set.remove(Landmark::RightShoulder);
        assert_eq!(computer().visible_side(&set), VisibleSide::Unknown);
    }

    #[test]
    fn test_serialize_missing_com_as_origin() {
        let m = computer().compute(&LandmarkSet::new(), None, 0.1);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["center_of_mass"]["x"], 0.0);
        assert_eq!(json["visible_side"], "unknown");
        assert_eq!(json["movement_direction"], "stationary");
    }
}
