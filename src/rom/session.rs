use serde::Serialize;

use super::test_type::TestType;
use crate::analysis::AngleSet;
use crate::config::RomConfig;
use crate::pose::LandmarkSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RomState {
    SearchingPosition,
    Ready,
    Measuring,
}

/// 1フレーム分の ROM 出力
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RomReport {
    pub test: TestType,
    pub is_ready: bool,
    /// テストが測っている角度 (体前屈なら体幹角)
    pub trunk_angle: Option<f32>,
    #[serde(rename = "ROM")]
    pub rom: [Option<f32>; 2],
    pub rom_range: f32,
    pub position_valid: bool,
    pub guidance: String,
    pub posture_message: Option<String>,
    pub ready_progress: f32,
    pub status: RomState,
}

/// 可動域テストの状態機械
///
/// SearchingPosition で開始姿勢が `min_valid_frames` 連続したら Ready、
/// 基準角から `movement_start_deg` 動いたら Measuring。
/// 最小/最大角は姿勢が有効なフレームでだけ外側へ広がる。
#[derive(Debug, Clone)]
pub struct RomSession {
    test_type: TestType,
    min_valid_frames: u32,
    grace_frames: u32,
    movement_start_deg: f32,
    visibility_threshold: f32,
    state: RomState,
    valid_run: u32,
    invalid_run: u32,
    baseline: Option<f32>,
    min_angle: Option<f32>,
    max_angle: Option<f32>,
    ready_progress: f32,
}

impl RomSession {
    pub fn new(test_type: TestType, config: &RomConfig, visibility_threshold: f32) -> Self {
        Self {
            test_type,
            min_valid_frames: config.min_valid_frames.max(1),
            grace_frames: config.grace_frames,
            movement_start_deg: config.movement_start_deg,
            visibility_threshold,
            state: RomState::SearchingPosition,
            valid_run: 0,
            invalid_run: 0,
            baseline: None,
            min_angle: None,
            max_angle: None,
            ready_progress: 0.0,
        }
    }

    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    pub fn state(&self) -> RomState {
        self.state
    }

    pub fn min_angle(&self) -> Option<f32> {
        self.min_angle
    }

    pub fn max_angle(&self) -> Option<f32> {
        self.max_angle
    }

    pub fn rom_range(&self) -> f32 {
        match (self.min_angle, self.max_angle) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0.0,
        }
    }

    /// 計測対象の人物 (なければ None) で1フレーム進める
    pub fn update(&mut self, subject: Option<(&LandmarkSet, &AngleSet)>) -> RomReport {
        let (position_valid, angle, posture) = match subject {
            Some((set, angles)) => (
                self.test_type.position_valid(set, self.visibility_threshold),
                angles.get(self.test_type.driving_angle()),
                self.test_type.posture_message(set, angles),
            ),
            None => (false, None, None),
        };
        self.step(position_valid, angle);

        RomReport {
            test: self.test_type,
            is_ready: self.state != RomState::SearchingPosition,
            trunk_angle: angle,
            rom: [self.min_angle, self.max_angle],
            rom_range: self.rom_range(),
            position_valid,
            guidance: self.guidance(subject.is_some(), position_valid),
            posture_message: posture.map(str::to_string),
            ready_progress: self.ready_progress,
            status: self.state,
        }
    }

    /// 姿勢判定と角度だけで状態を進める
    pub fn step(&mut self, position_valid: bool, angle: Option<f32>) {
        match self.state {
            RomState::SearchingPosition => {
                if position_valid {
                    self.valid_run += 1;
                } else {
                    self.valid_run = 0;
                }
                let progress = self.valid_run as f32 / self.min_valid_frames as f32 * 100.0;
                self.ready_progress = progress.min(100.0);
                if self.valid_run >= self.min_valid_frames {
                    self.state = RomState::Ready;
                    self.invalid_run = 0;
                    self.baseline = angle;
                    if let Some(a) = angle {
                        self.widen(a);
                    }
                    tracing::info!(test = %self.test_type, baseline = ?angle, "ROM test ready");
                }
            }
            RomState::Ready | RomState::Measuring => {
                if !position_valid {
                    self.invalid_run = self.invalid_run.saturating_add(1);
                    if self.invalid_run == self.grace_frames + 1 {
                        tracing::info!(test = %self.test_type, "subject left the test position");
                    }
                    return;
                }
                self.invalid_run = 0;
                let Some(a) = angle else {
                    return;
                };
                self.widen(a);
                if self.state == RomState::Ready {
                    match self.baseline {
                        None => self.baseline = Some(a),
                        Some(b) if (a - b).abs() >= self.movement_start_deg => {
                            self.state = RomState::Measuring;
                            tracing::info!(test = %self.test_type, angle = a, "ROM measurement started");
                        }
                        Some(_) => {}
                    }
                }
            }
        }
    }

    fn widen(&mut self, angle: f32) {
        self.min_angle = Some(self.min_angle.map_or(angle, |m| m.min(angle)));
        self.max_angle = Some(self.max_angle.map_or(angle, |m| m.max(angle)));
    }

    fn guidance(&self, subject_present: bool, position_valid: bool) -> String {
        if !subject_present {
            return "Step into the camera view".to_string();
        }
        match self.state {
            RomState::SearchingPosition if position_valid => "Hold this position".to_string(),
            RomState::SearchingPosition => self.test_type.position_instruction().to_string(),
            _ if self.invalid_run > self.grace_frames => format!(
                "Return to the starting position. {}",
                self.test_type.position_instruction()
            ),
            RomState::Ready => self.test_type.movement_instruction().to_string(),
            RomState::Measuring => "Measuring. Continue the movement".to_string(),
        }
    }

    /// 計測をやり直す。テスト種別は保持
    pub fn reset(&mut self) {
        *self = Self {
            test_type: self.test_type,
            min_valid_frames: self.min_valid_frames,
            grace_frames: self.grace_frames,
            movement_start_deg: self.movement_start_deg,
            visibility_threshold: self.visibility_threshold,
            state: RomState::SearchingPosition,
            valid_run: 0,
            invalid_run: 0,
            baseline: None,
            min_angle: None,
            max_angle: None,
            ready_progress: 0.0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(min_valid_frames: u32) -> RomSession {
        let config = RomConfig {
            min_valid_frames,
            grace_frames: 2,
            movement_start_deg: 5.0,
        };
        RomSession::new(TestType::LowerBackFlexion, &config, 0.3)
    }

    #[test]
    fn test_progress_accumulates() {
        let mut s = session(4);
        s.step(true, Some(0.0));
        assert!((s.ready_progress - 25.0).abs() < 1e-4);
        s.step(true, Some(0.0));
        assert!((s.ready_progress - 50.0).abs() < 1e-4);
        s.step(false, Some(0.0));
        assert_eq!(s.ready_progress, 0.0);
        assert_eq!(s.state(), RomState::SearchingPosition);
    }

    #[test]
    fn test_single_valid_frame_never_ready() {
        let mut s = session(3);
        for i in 0..20 {
            s.step(i % 3 == 0, Some(0.0));
            assert_eq!(s.state(), RomState::SearchingPosition);
        }
    }

    #[test]
    fn test_sustained_run_becomes_ready() {
        let mut s = session(3);
        for _ in 0..3 {
            s.step(true, Some(2.0));
        }
        assert_eq!(s.state(), RomState::Ready);
        assert_eq!(s.ready_progress, 100.0);
        assert_eq!(s.min_angle(), Some(2.0));
    }

    #[test]
    fn test_measuring_after_movement() {
        let mut s = session(1);
        s.step(true, Some(0.0));
        s.step(true, Some(4.0));
        assert_eq!(s.state(), RomState::Ready);
        s.step(true, Some(6.0));
        assert_eq!(s.state(), RomState::Measuring);
    }

    #[test]
    fn test_extrema_monotonic_and_only_when_valid() {
        let mut s = session(1);
        let samples = [
            (true, 0.0),
            (true, 20.0),
            (true, 10.0),
            (false, 90.0),
            (true, -5.0),
            (true, 15.0),
            (true, 45.0),
        ];
        let mut last_range = 0.0;
        let mut last = (f32::INFINITY, f32::NEG_INFINITY);
        for (valid, angle) in samples {
            s.step(valid, Some(angle));
            let lo = s.min_angle().unwrap();
            let hi = s.max_angle().unwrap();
            assert!(lo <= last.0 && hi >= last.1);
            assert!(hi >= lo);
            assert!(s.rom_range() >= last_range);
            last = (lo, hi);
            last_range = s.rom_range();
        }
        assert_eq!(s.min_angle(), Some(-5.0));
        assert_eq!(s.max_angle(), Some(45.0));
    }

    #[test]
    fn test_missing_angle_is_no_update() {
        let mut s = session(1);
        s.step(true, Some(10.0));
        s.step(true, None);
        assert_eq!(s.min_angle(), Some(10.0));
        assert_eq!(s.state(), RomState::Ready);
    }

    #[test]
    fn test_grace_period_guidance_keeps_extrema() {
        let mut s = session(1);
        s.step(true, Some(0.0));
        s.step(true, Some(30.0));
        let ready_guidance = s.guidance(true, true);
        s.step(false, None);
        s.step(false, None);
        assert_eq!(s.guidance(true, false), ready_guidance);
        s.step(false, None);
        assert!(s.guidance(true, false).starts_with("Return to the starting position"));
        assert_eq!(s.max_angle(), Some(30.0));
        assert_eq!(s.state(), RomState::Measuring);

        s.step(true, Some(31.0));
        assert_eq!(s.max_angle(), Some(31.0));
        assert!(!s.guidance(true, true).starts_with("Return"));
    }

    #[test]
    fn test_reset() {
        let mut s = session(1);
        s.step(true, Some(0.0));
        s.step(true, Some(30.0));
        s.reset();
        assert_eq!(s.state(), RomState::SearchingPosition);
        assert_eq!(s.min_angle(), None);
        assert_eq!(s.rom_range(), 0.0);
        assert_eq!(s.test_type(), TestType::LowerBackFlexion);
    }

    #[test]
    fn test_report_without_subject() {
        let mut s = session(3);
        let report = s.update(None);
        assert!(!report.position_valid);
        assert!(!report.is_ready);
        assert_eq!(report.trunk_angle, None);
        assert_eq!(report.guidance, "Step into the camera view");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["test"], "lower_back_flexion");
        assert_eq!(json["status"], "searching_position");
        assert!(json["ROM"][0].is_null());
        assert!(json["posture_message"].is_null());
    }
}
