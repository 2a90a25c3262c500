use std::collections::VecDeque;

use crate::config::TrackerConfig;
use crate::pose::{Landmark, LandmarkSet, Point};

pub type PersonId = u32;

/// 追跡中の1人。PersonTracker だけが更新する。
#[derive(Debug, Clone)]
pub struct TrackedPerson {
    person_id: PersonId,
    history: VecDeque<(u64, LandmarkSet)>,
    confidence_ema: f32,
    last_seen_frame: u64,
    missed_frames: u64,
    anchor: Point,
}

impl TrackedPerson {
    pub fn person_id(&self) -> PersonId {
        self.person_id
    }

    /// 直近のランドマーク履歴 (古い順)
    pub fn history(&self) -> &VecDeque<(u64, LandmarkSet)> {
        &self.history
    }

    pub fn confidence_ema(&self) -> f32 {
        self.confidence_ema
    }

    pub fn last_seen_frame(&self) -> u64 {
        self.last_seen_frame
    }

    pub fn missed_frames(&self) -> u64 {
        self.missed_frames
    }

    pub fn anchor(&self) -> Point {
        self.anchor
    }
}

/// 1フレーム分の割り当て結果
#[derive(Debug, Clone)]
pub struct AssignedPerson {
    pub person_id: PersonId,
    pub landmarks: LandmarkSet,
    pub tracking_confidence: f32,
    pub is_new: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Assignment {
    /// person_id 昇順
    pub persons: Vec<AssignedPerson>,
    /// このフレームで破棄された人物
    pub evicted: Vec<PersonId>,
}

/// フレーム間で人物IDを維持するトラッカー
///
/// アンカー点 (腰中心、なければ可視点の重心) の距離で貪欲にマッチングする。
/// 距離の近いペアから確定させるので二重割り当ては起きない。
pub struct PersonTracker {
    match_distance: f32,
    max_missed_frames: u64,
    history_len: usize,
    ema_alpha: f32,
    visibility_threshold: f32,
    persons: Vec<TrackedPerson>,
    next_id: PersonId,
}

impl PersonTracker {
    pub fn new(config: &TrackerConfig, visibility_threshold: f32) -> Self {
        Self {
            match_distance: config.match_distance,
            max_missed_frames: config.max_missed_frames,
            history_len: config.history_len.max(1),
            ema_alpha: config.confidence_ema_alpha,
            visibility_threshold,
            persons: Vec::new(),
            next_id: 0,
        }
    }

    pub fn persons(&self) -> &[TrackedPerson] {
        &self.persons
    }

    pub fn get(&self, person_id: PersonId) -> Option<&TrackedPerson> {
        self.persons.iter().find(|p| p.person_id == person_id)
    }

    /// 代表点: 腰中心 → 可視点の重心 → 全点の重心
    pub fn anchor(&self, set: &LandmarkSet) -> Option<Point> {
        if let Some(hip) = set.visible(Landmark::HipCenter, self.visibility_threshold) {
            return Some(hip.point());
        }
        set.visible_centroid(self.visibility_threshold)
            .or_else(|| set.centroid())
    }

    pub fn assign(&mut self, frame_index: u64, bodies: Vec<LandmarkSet>) -> Assignment {
        let mut evicted = Vec::new();

        // このフレームを待たずに既に上限を超えている人物は先に捨てる
        let max_missed = self.max_missed_frames;
        self.persons.retain(|p| {
            let gap = frame_index.saturating_sub(p.last_seen_frame).saturating_sub(1);
            if gap > max_missed {
                evicted.push(p.person_id);
                false
            } else {
                true
            }
        });

        let anchors: Vec<Option<Point>> = bodies.iter().map(|b| self.anchor(b)).collect();

        // (距離, person_id, track index, body index)
        let mut pairs = Vec::new();
        for (ti, track) in self.persons.iter().enumerate() {
            for (bi, anchor) in anchors.iter().enumerate() {
                if let Some(anchor) = anchor {
                    let d = track.anchor.distance(anchor);
                    if d <= self.match_distance {
                        pairs.push((d, track.person_id, ti, bi));
                    }
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.3.cmp(&b.3))
        });

        let mut track_taken = vec![false; self.persons.len()];
        let mut body_match: Vec<Option<usize>> = vec![None; bodies.len()];
        for &(_, _, ti, bi) in &pairs {
            if track_taken[ti] || body_match[bi].is_some() {
                continue;
            }
            track_taken[ti] = true;
            body_match[bi] = Some(ti);
        }

        let mut assigned = Vec::with_capacity(bodies.len());
        for (bi, set) in bodies.into_iter().enumerate() {
            let mean_conf = set.average_confidence();
            let anchor = anchors[bi].unwrap_or_default();
            match body_match[bi] {
                Some(ti) => {
                    let alpha = self.ema_alpha;
                    let history_len = self.history_len;
                    let track = &mut self.persons[ti];
                    track.confidence_ema = alpha * mean_conf + (1.0 - alpha) * track.confidence_ema;
                    track.anchor = anchor;
                    track.last_seen_frame = frame_index;
                    track.missed_frames = 0;
                    track.history.push_back((frame_index, set.clone()));
                    while track.history.len() > history_len {
                        track.history.pop_front();
                    }
                    assigned.push(AssignedPerson {
                        person_id: track.person_id,
                        landmarks: set,
                        tracking_confidence: track.confidence_ema,
                        is_new: false,
                    });
                }
                None => {
                    let person_id = self.next_id;
                    self.next_id += 1;
                    tracing::info!(person_id, frame_index, "new person identified");
                    let mut history = VecDeque::with_capacity(self.history_len);
                    history.push_back((frame_index, set.clone()));
                    self.persons.push(TrackedPerson {
                        person_id,
                        history,
                        confidence_ema: mean_conf,
                        last_seen_frame: frame_index,
                        missed_frames: 0,
                        anchor,
                    });
                    track_taken.push(true);
                    assigned.push(AssignedPerson {
                        person_id,
                        landmarks: set,
                        tracking_confidence: mean_conf,
                        is_new: true,
                    });
                }
            }
        }

        // マッチしなかった人物はミスを数え、上限超過で破棄
        let mut index = 0;
        self.persons.retain_mut(|p| {
            let matched = track_taken[index];
            index += 1;
            if matched {
                return true;
            }
            p.missed_frames = frame_index.saturating_sub(p.last_seen_frame);
            if p.missed_frames > max_missed {
                evicted.push(p.person_id);
                false
            } else {
                true
            }
        });

        for id in &evicted {
            tracing::info!(person_id = *id, frame_index, "person evicted");
        }

        assigned.sort_by_key(|p| p.person_id);
        Assignment {
            persons: assigned,
            evicted,
        }
    }

    /// 全人物を破棄し、IDの払い出しもやり直す
    pub fn reset(&mut self) {
        self.persons.clear();
        self.next_id = 0;
    }
}
