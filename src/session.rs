//! Per-client analysis context: owns every piece of temporal state for one stream.

use std::collections::HashMap;
use std::time::Instant;

use crate::analysis::{AngleEngine, MetricsComputer};
use crate::config::Config;
use crate::error::{ConfigError, FrameError};
use crate::frame::{FrameAssembler, FrameInput, PersonResult, ProcessedFrame};
use crate::pose::{KeypointNormalizer, Point};
use crate::rom::{RomSession, TestType};
use crate::tracker::{PersonId, PersonTracker, SignalFilter};

/// Previous center of mass of a person, for velocity
#[derive(Debug, Clone, Copy)]
struct MotionState {
    center_of_mass: Option<Point>,
    timestamp: f64,
}

/// One analysis stream (a connected client or a replayed video).
///
/// Frames must arrive with strictly increasing `frame_index`. A frame that fails
/// validation is rejected before any state is touched.
pub struct AnalysisSession {
    config: Config,
    normalizer: KeypointNormalizer,
    tracker: PersonTracker,
    filter: SignalFilter,
    angles: AngleEngine,
    metrics: MetricsComputer,
    motion: HashMap<PersonId, MotionState>,
    rom: Option<RomSession>,
    last_frame: Option<u64>,
}

impl AnalysisSession {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let threshold = config.pose.visibility_threshold;
        Ok(Self {
            config: config.clone(),
            normalizer: KeypointNormalizer::from_config(&config.pose),
            tracker: PersonTracker::new(&config.tracker, threshold),
            filter: SignalFilter::new(config.filter.clone(), threshold),
            angles: AngleEngine::new(threshold),
            metrics: MetricsComputer::new(&config.metrics, threshold),
            motion: HashMap::new(),
            rom: None,
            last_frame: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &PersonTracker {
        &self.tracker
    }

    pub fn rom(&self) -> Option<&RomSession> {
        self.rom.as_ref()
    }

    /// Starts (or replaces) the ROM test for this session.
    pub fn start_test(&mut self, test_type: &str) -> Result<TestType, ConfigError> {
        let test_type: TestType = test_type.parse()?;
        self.rom = Some(RomSession::new(
            test_type,
            &self.config.rom,
            self.config.pose.visibility_threshold,
        ));
        tracing::info!(test = %test_type, "ROM test started");
        Ok(test_type)
    }

    /// Restarts the active test. No-op without one.
    pub fn reset_test(&mut self) {
        match self.rom.as_mut() {
            Some(rom) => {
                rom.reset();
                tracing::info!(test = %rom.test_type(), "ROM test reset");
            }
            None => tracing::debug!("reset requested with no active test"),
        }
    }

    pub fn end_test(&mut self) -> Option<TestType> {
        let ended = self.rom.take().map(|rom| rom.test_type());
        if let Some(test) = ended {
            tracing::info!(test = %test, "ROM test ended");
        }
        ended
    }

    pub fn process_frame(&mut self, input: &FrameInput) -> Result<ProcessedFrame, FrameError> {
        let started = Instant::now();

        if let Some(previous) = self.last_frame {
            if input.frame_index <= previous {
                return Err(FrameError::OutOfOrder {
                    previous,
                    got: input.frame_index,
                });
            }
        }
        if !input.timestamp.is_finite() {
            return Err(FrameError::InvalidTimestamp {
                frame_index: input.frame_index,
            });
        }
        let bodies = self.normalizer.normalize(input.frame_index, &input.persons)?;

        // validation done; state changes from here on
        self.last_frame = Some(input.frame_index);
        let assignment = self.tracker.assign(input.frame_index, bodies);
        for id in &assignment.evicted {
            self.filter.evict(*id);
            self.motion.remove(id);
        }

        let mut persons = Vec::with_capacity(assignment.persons.len());
        for assigned in assignment.persons {
            let filtered = self.filter.filter_landmarks(
                assigned.person_id,
                &assigned.landmarks,
                input.frame_index,
            );
            let angles = self.angles.compute(&filtered);
            let (previous, dt) = match self.motion.get(&assigned.person_id) {
                Some(state) => (state.center_of_mass, input.timestamp - state.timestamp),
                None => (None, 0.0),
            };
            let metrics = self.metrics.compute(&filtered, previous, dt);
            self.motion.insert(
                assigned.person_id,
                MotionState {
                    center_of_mass: metrics.center_of_mass,
                    timestamp: input.timestamp,
                },
            );
            persons.push(PersonResult {
                person_id: assigned.person_id,
                tracking_confidence: assigned.tracking_confidence,
                keypoints: filtered,
                angles,
                metrics,
            });
        }

        // ROM follows the lowest person_id in view
        let rom = self.rom.as_mut().map(|rom| {
            let subject = persons.first().map(|p| (&p.keypoints, &p.angles));
            rom.update(subject)
        });

        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let result =
            FrameAssembler::assemble(input.frame_index, input.timestamp, processing_time_ms, persons);
        Ok(ProcessedFrame { result, rom })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::pose::RawBody;
    use crate::rom::RomState;

    fn make_leg(ankle: (f32, f32)) -> RawBody {
        RawBody::new()
            .with("right_hip", 100.0, 100.0, 0.9)
            .with("right_knee", 100.0, 200.0, 0.9)
            .with("right_ankle", ankle.0, ankle.1, 0.9)
    }

    fn make_frame(frame_index: u64, persons: Vec<RawBody>) -> FrameInput {
        FrameInput {
            frame_index,
            timestamp: frame_index as f64 / 30.0,
            persons,
        }
    }

    /// 側面向きの立位。neck_x を前へずらすと体幹が傾く
    fn make_side_body(neck_x: f32) -> RawBody {
        RawBody::new()
            .with("nose", neck_x + 20.0, 60.0, 0.9)
            .with("right_ear", neck_x, 60.0, 0.9)
            .with("left_shoulder", neck_x + 5.0, 100.0, 0.6)
            .with("right_shoulder", neck_x - 5.0, 100.0, 0.9)
            .with("left_hip", 202.0, 250.0, 0.6)
            .with("right_hip", 198.0, 250.0, 0.9)
            .with("right_knee", 200.0, 350.0, 0.9)
            .with("right_ankle", 200.0, 450.0, 0.9)
    }

    fn session() -> AnalysisSession {
        AnalysisSession::new(&Config::default()).unwrap()
    }

    #[test]
    fn test_two_frame_knee_round_trip() {
        let mut s = session();
        let first = s.process_frame(&make_frame(0, vec![make_leg((100.0, 300.0))])).unwrap();
        let second = s.process_frame(&make_frame(1, vec![make_leg((200.0, 200.0))])).unwrap();

        let knee1 = first.result.persons[0].angles.get("right_knee").unwrap();
        let knee2 = second.result.persons[0].angles.get("right_knee").unwrap();
        assert!((knee1 - 180.0).abs() < 1.0, "got {}", knee1);
        assert!((knee2 - 90.0).abs() < 1.0, "got {}", knee2);
        assert_eq!(
            first.result.persons[0].person_id,
            second.result.persons[0].person_id
        );
        assert!(first.rom.is_none());
    }

    #[test]
    fn test_rejects_out_of_order_frame() {
        let mut s = session();
        s.process_frame(&make_frame(5, vec![make_leg((100.0, 300.0))])).unwrap();
        let err = s.process_frame(&make_frame(5, vec![])).unwrap_err();
        assert_eq!(err, FrameError::OutOfOrder { previous: 5, got: 5 });
        // 拒否されたフレームは状態を変えない
        let next = s.process_frame(&make_frame(6, vec![make_leg((100.0, 300.0))])).unwrap();
        assert_eq!(next.result.persons[0].person_id, 0);
    }

    #[test]
    fn test_rejected_frame_leaves_session_untouched() {
        let mut s = session();
        s.process_frame(&make_frame(0, vec![make_leg((100.0, 300.0))])).unwrap();
        let bad = make_frame(1, vec![make_leg((100.0, 300.0)).with("nose", f32::INFINITY, 0.0, 0.9)]);
        assert!(matches!(
            s.process_frame(&bad),
            Err(FrameError::NonFiniteCoordinate { .. })
        ));
        let mut nan_time = make_frame(1, vec![]);
        nan_time.timestamp = f64::NAN;
        assert_eq!(
            s.process_frame(&nan_time).unwrap_err(),
            FrameError::InvalidTimestamp { frame_index: 1 }
        );
        // frame 1 is still acceptable
        assert!(s.process_frame(&make_frame(1, vec![make_leg((100.0, 300.0))])).is_ok());
        assert_eq!(s.tracker().get(0).unwrap().history().len(), 2);
    }

    #[test]
    fn test_velocity_uses_timestamps() {
        let config = Config {
            filter: FilterConfig::None,
            ..Config::default()
        };
        let mut s = AnalysisSession::new(&config).unwrap();
        let shifted = |dx: f32| {
            RawBody::new()
                .with("right_hip", 100.0 + dx, 100.0, 0.9)
                .with("right_knee", 100.0 + dx, 200.0, 0.9)
        };
        let first = s.process_frame(&make_frame(0, vec![shifted(0.0)])).unwrap();
        assert_eq!(first.result.persons[0].metrics.velocity, Point::default());
        // 1/30 s で 3 px → 90 px/s
        let second = s.process_frame(&make_frame(1, vec![shifted(3.0)])).unwrap();
        let vx = second.result.persons[0].metrics.velocity.x;
        assert!((vx - 90.0).abs() < 0.1, "got {}", vx);
    }

    #[test]
    fn test_eviction_drops_filter_and_motion_state() {
        let mut config = Config::default();
        config.tracker.max_missed_frames = 2;
        let mut s = AnalysisSession::new(&config).unwrap();

        s.process_frame(&make_frame(0, vec![make_leg((100.0, 300.0))])).unwrap();
        assert!(s.filter.channel_count() > 0);
        assert!(s.motion.contains_key(&0));

        // 2フレームの欠落までは保持
        for frame in 1..=2 {
            s.process_frame(&make_frame(frame, vec![])).unwrap();
        }
        assert!(s.tracker().get(0).is_some());
        assert!(s.motion.contains_key(&0));

        // 3フレーム目で破棄され、付随する状態も消える
        s.process_frame(&make_frame(3, vec![])).unwrap();
        assert!(s.tracker().get(0).is_none());
        assert_eq!(s.filter.channel_count(), 0);
        assert!(s.motion.is_empty());

        // 同じ位置に戻っても新しい ID、速度はゼロから
        let back = s.process_frame(&make_frame(4, vec![make_leg((100.0, 300.0))])).unwrap();
        let person = &back.result.persons[0];
        assert_eq!(person.person_id, 1);
        assert_eq!(person.metrics.velocity, Point::default());
        assert!(s.motion.contains_key(&1));
    }

    #[test]
    fn test_frame_metrics_reported() {
        let mut s = session();
        let out = s
            .process_frame(&make_frame(0, vec![make_leg((100.0, 300.0)), make_leg((600.0, 300.0))]))
            .unwrap();
        let m = &out.result.frame_metrics;
        assert_eq!(m.detected_persons, 2);
        assert!((m.average_confidence - 0.9).abs() < 1e-6);
        assert!(out.result.processing_time_ms >= 0.0);
    }

    #[test]
    fn test_unknown_test_type() {
        let mut s = session();
        assert_eq!(
            s.start_test("squat"),
            Err(ConfigError::UnknownTestType("squat".to_string()))
        );
        assert!(s.rom().is_none());
    }

    #[test]
    fn test_reset_without_test_is_noop() {
        let mut s = session();
        s.reset_test();
        assert!(s.rom().is_none());
        assert_eq!(s.end_test(), None);
    }

    #[test]
    fn test_invalid_filter_config_rejected() {
        let config = Config {
            filter: FilterConfig::Median { window_size: 0 },
            ..Config::default()
        };
        assert!(matches!(
            AnalysisSession::new(&config),
            Err(ConfigError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_lower_back_session_flow() {
        let mut config = Config {
            filter: FilterConfig::None,
            ..Config::default()
        };
        config.rom.min_valid_frames = 3;
        let mut s = AnalysisSession::new(&config).unwrap();
        assert_eq!(s.start_test("lowerback"), Ok(TestType::LowerBackFlexion));

        let mut frame = 0;
        let mut last = None;
        for _ in 0..3 {
            last = s.process_frame(&make_frame(frame, vec![make_side_body(200.0)])).unwrap().rom;
            frame += 1;
        }
        let ready = last.take().unwrap();
        assert!(ready.is_ready);
        assert_eq!(ready.status, RomState::Ready);
        assert!(ready.trunk_angle.unwrap().abs() < 1.0);

        // 前屈: 首を前方 (+x) へ
        for neck_x in [230.0, 260.0, 290.0] {
            last = s.process_frame(&make_frame(frame, vec![make_side_body(neck_x)])).unwrap().rom;
            frame += 1;
        }
        let measuring = last.take().unwrap();
        assert_eq!(measuring.status, RomState::Measuring);
        assert!(measuring.rom_range > 20.0);
        let max = measuring.rom[1].unwrap();
        assert!(max > 20.0 && max <= measuring.trunk_angle.unwrap() + 1e-3);

        s.reset_test();
        let after = s.process_frame(&make_frame(frame, vec![make_side_body(200.0)])).unwrap().rom.unwrap();
        assert_eq!(after.status, RomState::SearchingPosition);
        assert_eq!(after.rom, [None, None]);
    }
}
