//! 系列全体を使うオフライン平滑化 (位相遅れなし)
//!
//! リアルタイムの `SignalFilter` は因果的で遅れが出る。録画を後処理する場合は
//! 前後のサンプルを両方使える。

use super::butterworth::Butterworth;
use super::smooth::median;
use crate::config::FilterConfig;

/// 設定に応じたゼロ位相フィルタを1系列にかける。`None` はそのまま返す
pub fn smooth_series(config: &FilterConfig, data: &[f32]) -> Vec<f32> {
    match *config {
        FilterConfig::None => data.to_vec(),
        FilterConfig::Median { window_size } => centered_median(data, window_size),
        FilterConfig::Gaussian { sigma, .. } => centered_gaussian(data, sigma),
        FilterConfig::Butterworth {
            cutoff_hz,
            order,
            sample_rate_hz,
            ..
        } => filtfilt(order, cutoff_hz, sample_rate_hz, data),
    }
}

/// Butterworth を順方向と逆方向にかける
///
/// 両端は奇対称に `3 * (order + 1)` サンプル延長する。それ以下の長さの系列は
/// 過渡応答が支配的になるので素通し。
pub fn filtfilt(order: usize, cutoff_hz: f32, sample_rate_hz: f32, data: &[f32]) -> Vec<f32> {
    let pad = 3 * (order + 1);
    let n = data.len();
    if n <= pad {
        return data.to_vec();
    }

    let (first, last) = (data[0], data[n - 1]);
    let mut extended = Vec::with_capacity(n + 2 * pad);
    extended.extend((1..=pad).rev().map(|i| 2.0 * first - data[i]));
    extended.extend_from_slice(data);
    extended.extend((1..=pad).map(|i| 2.0 * last - data[n - 1 - i]));

    let mut forward = Butterworth::new(order, cutoff_hz, sample_rate_hz);
    let mut pass: Vec<f32> = extended.iter().map(|&v| forward.filter(v)).collect();
    pass.reverse();
    let mut backward = Butterworth::new(order, cutoff_hz, sample_rate_hz);
    let mut pass: Vec<f32> = pass.iter().map(|&v| backward.filter(v)).collect();
    pass.reverse();

    pass[pad..pad + n].to_vec()
}

/// 中心揃えのメディアン。偶数の窓は奇数に広げ、端では窓を縮める
pub fn centered_median(data: &[f32], window_size: usize) -> Vec<f32> {
    let half = window_size / 2;
    if half == 0 {
        return data.to_vec();
    }
    let n = data.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            median(&data[lo..hi])
        })
        .collect()
}

/// 中心揃えのガウス平滑化。半径 4σ、端は鏡像で延長
pub fn centered_gaussian(data: &[f32], sigma: f32) -> Vec<f32> {
    let n = data.len();
    if n < 3 || sigma.is_nan() || sigma <= 0.0 {
        return data.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as isize;
    let kernel: Vec<f32> = (-radius..=radius)
        .map(|d| (-((d * d) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();

    (0..n as isize)
        .map(|i| {
            let sum: f32 = (-radius..=radius)
                .zip(&kernel)
                .map(|(d, k)| k * data[reflect(i + d, n)])
                .sum();
            sum / total
        })
        .collect()
}

/// (d c b a | a b c d | d c b a)
fn reflect(mut index: isize, len: usize) -> usize {
    let n = len as isize;
    loop {
        if index < 0 {
            index = -index - 1;
        } else if index >= n {
            index = 2 * n - index - 1;
        } else {
            return index as usize;
        }
    }
}
