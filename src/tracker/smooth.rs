use std::collections::{HashMap, VecDeque};

use super::butterworth::Butterworth;
use super::lerp::{fill_gaps, Sample};
use super::person::PersonId;
use crate::config::FilterConfig;
use crate::pose::{Keypoint, Landmark, LandmarkSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

/// 平滑化結果。窓が埋まるまでは生値 (filtered = false)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filtered {
    pub value: f32,
    pub filtered: bool,
}

impl Filtered {
    fn raw(value: f32) -> Self {
        Self {
            value,
            filtered: false,
        }
    }
}

/// (person, landmark, axis) ごとの履歴
struct Channel {
    samples: VecDeque<Sample>,
    last_frame: u64,
    butterworth: Option<Butterworth>,
    last_filled: Option<f32>,
}

/// 人物・ランドマーク・軸ごとのリングバッファで座標を平滑化する
///
/// 欠損 (低信頼度、または人物が見えなかったフレーム) は窓内で補間してから
/// フィルタにかける。信頼度は変更しない。
pub struct SignalFilter {
    config: FilterConfig,
    visibility_threshold: f32,
    channels: HashMap<(PersonId, Landmark, Axis), Channel>,
}

impl SignalFilter {
    pub fn new(config: FilterConfig, visibility_threshold: f32) -> Self {
        Self {
            config,
            visibility_threshold,
            channels: HashMap::new(),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    fn is_passthrough(&self) -> bool {
        matches!(self.config, FilterConfig::None) || self.config.window_size() <= 1
    }

    pub fn update(
        &mut self,
        person_id: PersonId,
        landmark: Landmark,
        axis: Axis,
        sample: Sample,
        frame_index: u64,
    ) -> Filtered {
        if self.is_passthrough() {
            return Filtered::raw(sample.value);
        }

        let capacity = self.config.window_size();
        let config = &self.config;
        let channel = self
            .channels
            .entry((person_id, landmark, axis))
            .or_insert_with(|| Channel {
                samples: VecDeque::with_capacity(capacity),
                last_frame: frame_index,
                butterworth: butterworth_for(config),
                last_filled: None,
            });

        // 見えなかったフレームを欠損として詰める
        if !channel.samples.is_empty() {
            let skipped = frame_index.saturating_sub(channel.last_frame).saturating_sub(1);
            for _ in 0..skipped.min(capacity as u64) {
                push_bounded(&mut channel.samples, Sample::missing(), capacity);
                if let (Some(bw), Some(held)) = (channel.butterworth.as_mut(), channel.last_filled) {
                    bw.filter(held);
                }
            }
        }
        channel.last_frame = frame_index;
        push_bounded(&mut channel.samples, sample, capacity);

        let filled = match fill_gaps(&channel.samples) {
            Some(filled) => filled,
            None => return Filtered::raw(sample.value),
        };
        let newest = filled.last().copied().unwrap_or(sample.value);
        channel.last_filled = Some(newest);

        let value = match &self.config {
            FilterConfig::Median { .. } => median(&filled),
            FilterConfig::Gaussian { sigma, .. } => half_gaussian(&filled, *sigma),
            FilterConfig::Butterworth { .. } => match channel.butterworth.as_mut() {
                Some(bw) => bw.filter(newest),
                None => newest,
            },
            FilterConfig::None => sample.value,
        };

        if channel.samples.len() < capacity {
            Filtered::raw(sample.value)
        } else {
            Filtered {
                value,
                filtered: true,
            }
        }
    }

    /// 1人分のランドマークを x/y それぞれ平滑化した新しい表を返す
    pub fn filter_landmarks(
        &mut self,
        person_id: PersonId,
        set: &LandmarkSet,
        frame_index: u64,
    ) -> LandmarkSet {
        let mut out = LandmarkSet::new();
        for (landmark, kp) in set.iter() {
            let valid = kp.is_valid(self.visibility_threshold);
            let x = self.update(person_id, landmark, Axis::X, Sample::new(kp.x, valid), frame_index);
            let y = self.update(person_id, landmark, Axis::Y, Sample::new(kp.y, valid), frame_index);
            out.insert(landmark, Keypoint::new(x.value, y.value, kp.confidence));
        }
        out
    }

    /// 人物の全チャネルを破棄
    pub fn evict(&mut self, person_id: PersonId) {
        self.channels.retain(|(id, _, _), _| *id != person_id);
    }

    pub fn reset(&mut self) {
        self.channels.clear();
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

fn butterworth_for(config: &FilterConfig) -> Option<Butterworth> {
    match *config {
        FilterConfig::Butterworth {
            cutoff_hz,
            order,
            sample_rate_hz,
            ..
        } => Some(Butterworth::new(order, cutoff_hz, sample_rate_hz)),
        _ => None,
    }
}

fn push_bounded(buf: &mut VecDeque<Sample>, sample: Sample, capacity: usize) {
    if buf.len() == capacity {
        buf.pop_front();
    }
    buf.push_back(sample);
}

pub(super) fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// 最新サンプルを中心とする片側ガウス重み平均
fn half_gaussian(values: &[f32], sigma: f32) -> f32 {
    let n = values.len();
    let (sum, weight) = values
        .iter()
        .enumerate()
        .fold((0.0f32, 0.0f32), |(s, w), (i, v)| {
            let d = (n - 1 - i) as f32;
            let k = (-(d * d) / (2.0 * sigma * sigma)).exp();
            (s + k * v, w + k)
        });
    if weight > 0.0 {
        sum / weight
    } else {
        values.last().copied().unwrap_or(0.0)
    }
}
