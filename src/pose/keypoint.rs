use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// 正規化後のランドマーク語彙
///
/// MediaPipe の 33 点 + 派生点 (neck, hip_center)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum Landmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
    /// 両肩の中点
    Neck = 33,
    /// 両腰の中点
    HipCenter = 34,
}

impl Landmark {
    pub const COUNT: usize = 35;

    pub const ALL: [Landmark; Landmark::COUNT] = [
        Self::Nose,
        Self::LeftEyeInner,
        Self::LeftEye,
        Self::LeftEyeOuter,
        Self::RightEyeInner,
        Self::RightEye,
        Self::RightEyeOuter,
        Self::LeftEar,
        Self::RightEar,
        Self::MouthLeft,
        Self::MouthRight,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftPinky,
        Self::RightPinky,
        Self::LeftIndex,
        Self::RightIndex,
        Self::LeftThumb,
        Self::RightThumb,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
        Self::LeftHeel,
        Self::RightHeel,
        Self::LeftFootIndex,
        Self::RightFootIndex,
        Self::Neck,
        Self::HipCenter,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// 出力契約で使う snake_case 名
    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEyeInner => "left_eye_inner",
            Self::LeftEye => "left_eye",
            Self::LeftEyeOuter => "left_eye_outer",
            Self::RightEyeInner => "right_eye_inner",
            Self::RightEye => "right_eye",
            Self::RightEyeOuter => "right_eye_outer",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::MouthLeft => "mouth_left",
            Self::MouthRight => "mouth_right",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftPinky => "left_pinky",
            Self::RightPinky => "right_pinky",
            Self::LeftIndex => "left_index",
            Self::RightIndex => "right_index",
            Self::LeftThumb => "left_thumb",
            Self::RightThumb => "right_thumb",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
            Self::LeftHeel => "left_heel",
            Self::RightHeel => "right_heel",
            Self::LeftFootIndex => "left_foot_index",
            Self::RightFootIndex => "right_foot_index",
            Self::Neck => "neck",
            Self::HipCenter => "hip_center",
        }
    }

    /// 名前から引く。検出器ごとの別名 (left_toe 等) も受け付ける。
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "left_toe" => return Some(Self::LeftFootIndex),
            "right_toe" => return Some(Self::RightFootIndex),
            _ => {}
        }
        Self::ALL.iter().copied().find(|lm| lm.name() == name)
    }
}

impl std::fmt::Display for Landmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Landmark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// 画像上の点 (px)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// 単一キーポイント
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// X座標 (px)
    pub x: f32,
    /// Y座標 (px, 下が正)
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            confidence: 0.0,
        }
    }
}

/// 1人分のランドマーク表。欠損は None。
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: [Option<Keypoint>; Landmark::COUNT],
}

impl LandmarkSet {
    pub fn new() -> Self {
        Self {
            points: [None; Landmark::COUNT],
        }
    }

    pub fn get(&self, landmark: Landmark) -> Option<&Keypoint> {
        self.points[landmark as usize].as_ref()
    }

    /// 閾値以上の信頼度を持つ場合のみ返す
    pub fn visible(&self, landmark: Landmark, threshold: f32) -> Option<&Keypoint> {
        self.get(landmark).filter(|kp| kp.is_valid(threshold))
    }

    pub fn insert(&mut self, landmark: Landmark, keypoint: Keypoint) {
        self.points[landmark as usize] = Some(keypoint);
    }

    pub fn remove(&mut self, landmark: Landmark) -> Option<Keypoint> {
        self.points[landmark as usize].take()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Landmark, &Keypoint)> + '_ {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(i, kp)| kp.as_ref().map(|kp| (Landmark::ALL[i], kp)))
    }

    pub fn len(&self) -> usize {
        self.points.iter().filter(|kp| kp.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.points.iter().all(|kp| kp.is_none())
    }

    /// 存在する全キーポイントの平均信頼度
    pub fn average_confidence(&self) -> f32 {
        let (sum, count) = self
            .iter()
            .fold((0.0f32, 0usize), |(s, c), (_, kp)| (s + kp.confidence, c + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    }

    /// 閾値以上のキーポイントの重心
    pub fn visible_centroid(&self, threshold: f32) -> Option<Point> {
        centroid(self.iter().filter(|(_, kp)| kp.is_valid(threshold)).map(|(_, kp)| kp))
    }

    /// 全キーポイントの重心
    pub fn centroid(&self) -> Option<Point> {
        centroid(self.iter().map(|(_, kp)| kp))
    }

    /// 2点の中点。信頼度は平均。
    pub fn midpoint(&self, a: Landmark, b: Landmark) -> Option<Keypoint> {
        let a = self.get(a)?;
        let b = self.get(b)?;
        Some(Keypoint::new(
            (a.x + b.x) / 2.0,
            (a.y + b.y) / 2.0,
            (a.confidence + b.confidence) / 2.0,
        ))
    }
}

fn centroid<'a>(points: impl Iterator<Item = &'a Keypoint>) -> Option<Point> {
    let (sx, sy, n) = points.fold((0.0f32, 0.0f32, 0usize), |(sx, sy, n), kp| {
        (sx + kp.x, sy + kp.y, n + 1)
    });
    if n == 0 {
        None
    } else {
        Some(Point::new(sx / n as f32, sy / n as f32))
    }
}

impl Default for LandmarkSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for LandmarkSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (landmark, kp) in self.iter() {
            map.serialize_entry(landmark.name(), kp)?;
        }
        map.end()
    }
}
