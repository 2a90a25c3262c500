use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub rom: RomConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoseConfig {
    /// 可視判定の信頼度閾値 (これ未満は欠損扱い)
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f32,
    /// 可視キーポイント比率の下限。下回る検出は捨てる
    #[serde(default = "default_min_visible_ratio")]
    pub min_visible_ratio: f32,
    /// 可視キーポイント平均信頼度の下限
    #[serde(default = "default_min_average_confidence")]
    pub min_average_confidence: f32,
}

fn default_visibility_threshold() -> f32 { 0.3 }
fn default_min_visible_ratio() -> f32 { 0.3 }
fn default_min_average_confidence() -> f32 { 0.5 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: default_visibility_threshold(),
            min_visible_ratio: default_min_visible_ratio(),
            min_average_confidence: default_min_average_confidence(),
        }
    }
}

impl PoseConfig {
    /// いずれも [0, 1] の割合・信頼度
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("visibility_threshold", self.visibility_threshold),
            ("min_visible_ratio", self.min_visible_ratio),
            ("min_average_confidence", self.min_average_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidPose(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// 同一人物とみなすアンカー間の最大距離 (px)
    #[serde(default = "default_match_distance")]
    pub match_distance: f32,
    /// この連続ミスフレーム数を超えたら破棄
    #[serde(default = "default_max_missed_frames")]
    pub max_missed_frames: u64,
    /// 保持する履歴フレーム数
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    /// 追跡信頼度EMAの係数
    #[serde(default = "default_confidence_ema_alpha")]
    pub confidence_ema_alpha: f32,
}

fn default_match_distance() -> f32 { 100.0 }
fn default_max_missed_frames() -> u64 { 30 }
fn default_history_len() -> usize { 30 }
fn default_confidence_ema_alpha() -> f32 { 0.5 }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_distance: default_match_distance(),
            max_missed_frames: default_max_missed_frames(),
            history_len: default_history_len(),
            confidence_ema_alpha: default_confidence_ema_alpha(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_distance.is_finite() && self.match_distance > 0.0) {
            return Err(ConfigError::InvalidTracker(format!(
                "match_distance must be positive, got {}",
                self.match_distance
            )));
        }
        if self.history_len == 0 {
            return Err(ConfigError::InvalidTracker("history_len must be at least 1".into()));
        }
        if !(self.confidence_ema_alpha > 0.0 && self.confidence_ema_alpha <= 1.0) {
            return Err(ConfigError::InvalidTracker(format!(
                "confidence_ema_alpha must be in (0, 1], got {}",
                self.confidence_ema_alpha
            )));
        }
        Ok(())
    }
}

/// 座標平滑化フィルタの設定。アルゴリズムごとに必要なパラメータだけを持つ。
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterConfig {
    None,
    Median {
        #[serde(default = "default_window_size")]
        window_size: usize,
    },
    Gaussian {
        #[serde(default = "default_window_size")]
        window_size: usize,
        /// サンプル単位の標準偏差
        #[serde(default = "default_sigma")]
        sigma: f32,
    },
    Butterworth {
        /// この数のサンプルが揃うまで生値を通す
        #[serde(default = "default_butterworth_window")]
        window_size: usize,
        #[serde(default = "default_cutoff_hz")]
        cutoff_hz: f32,
        #[serde(default = "default_order")]
        order: usize,
        #[serde(default = "default_sample_rate_hz")]
        sample_rate_hz: f32,
    },
}

fn default_window_size() -> usize { 5 }
fn default_sigma() -> f32 { 1.0 }
fn default_butterworth_window() -> usize { 10 }
fn default_cutoff_hz() -> f32 { 6.0 }
fn default_order() -> usize { 4 }
fn default_sample_rate_hz() -> f32 { 30.0 }

impl Default for FilterConfig {
    fn default() -> Self {
        Self::Butterworth {
            window_size: default_butterworth_window(),
            cutoff_hz: default_cutoff_hz(),
            order: default_order(),
            sample_rate_hz: default_sample_rate_hz(),
        }
    }
}

impl FilterConfig {
    pub fn window_size(&self) -> usize {
        match *self {
            Self::None => 1,
            Self::Median { window_size }
            | Self::Gaussian { window_size, .. }
            | Self::Butterworth { window_size, .. } => window_size,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size() == 0 {
            return Err(ConfigError::InvalidFilter("window_size must be at least 1".into()));
        }
        match *self {
            Self::None | Self::Median { .. } => Ok(()),
            Self::Gaussian { sigma, .. } => {
                if sigma.is_finite() && sigma > 0.0 {
                    Ok(())
                } else {
                    Err(ConfigError::InvalidFilter(format!(
                        "gaussian sigma must be positive, got {sigma}"
                    )))
                }
            }
            Self::Butterworth {
                cutoff_hz,
                order,
                sample_rate_hz,
                ..
            } => {
                if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
                    return Err(ConfigError::InvalidFilter(format!(
                        "sample_rate_hz must be positive, got {sample_rate_hz}"
                    )));
                }
                if !(cutoff_hz.is_finite() && cutoff_hz > 0.0 && cutoff_hz < sample_rate_hz / 2.0)
                {
                    return Err(ConfigError::InvalidFilter(format!(
                        "cutoff_hz must be in (0, {}), got {cutoff_hz}",
                        sample_rate_hz / 2.0
                    )));
                }
                if order != 2 && order != 4 {
                    return Err(ConfigError::InvalidFilter(format!(
                        "butterworth order must be 2 or 4, got {order}"
                    )));
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    /// 水平速度がこれ以下なら stationary (px/s)
    #[serde(default = "default_stationary_speed")]
    pub stationary_speed: f32,
}

fn default_stationary_speed() -> f32 { 20.0 }

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            stationary_speed: default_stationary_speed(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RomConfig {
    /// READY までに必要な連続有効フレーム数
    #[serde(default = "default_min_valid_frames")]
    pub min_valid_frames: u32,
    /// 計測中に姿勢を外れてもガイダンスを出さない猶予フレーム数
    #[serde(default = "default_grace_frames")]
    pub grace_frames: u32,
    /// 基準角からこれだけ動いたら MEASURING (deg)
    #[serde(default = "default_movement_start_deg")]
    pub movement_start_deg: f32,
}

fn default_min_valid_frames() -> u32 { 15 }
fn default_grace_frames() -> u32 { 15 }
fn default_movement_start_deg() -> f32 { 5.0 }

impl Default for RomConfig {
    fn default() -> Self {
        Self {
            min_valid_frames: default_min_valid_frames(),
            grace_frames: default_grace_frames(),
            movement_start_deg: default_movement_start_deg(),
        }
    }
}

impl RomConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_valid_frames == 0 {
            return Err(ConfigError::InvalidRom("min_valid_frames must be at least 1".into()));
        }
        if !(self.movement_start_deg.is_finite() && self.movement_start_deg >= 0.0) {
            return Err(ConfigError::InvalidRom(format!(
                "movement_start_deg must be non-negative, got {}",
                self.movement_start_deg
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// 1フレームの最大サイズ (bytes)
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_listen_addr() -> String { "0.0.0.0:9100".to_string() }
fn default_max_message_bytes() -> usize { 1024 * 1024 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// 読めなければデフォルト設定を使う
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{:#}; using default config", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pose.validate()?;
        self.tracker.validate()?;
        self.filter.validate()?;
        self.rom.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pose.visibility_threshold, 0.3);
        assert_eq!(config.tracker.max_missed_frames, 30);
    }

    #[test]
    fn test_parse_tagged_filter() {
        let config: Config = toml::from_str(
            r#"
            [filter]
            kind = "gaussian"
            sigma = 2.0

            [tracker]
            match_distance = 50.0
            "#,
        )
        .unwrap();
        assert_eq!(
            config.filter,
            FilterConfig::Gaussian {
                window_size: 5,
                sigma: 2.0
            }
        );
        assert_eq!(config.tracker.match_distance, 50.0);
        assert_eq!(config.tracker.history_len, 30);
    }

    #[test]
    fn test_parse_none_filter() {
        let config: Config = toml::from_str("[filter]\nkind = \"none\"\n").unwrap();
        assert_eq!(config.filter, FilterConfig::None);
        assert_eq!(config.filter.window_size(), 1);
    }

    #[test]
    fn test_unknown_filter_kind_fails_to_parse() {
        assert!(toml::from_str::<Config>("[filter]\nkind = \"kalman\"\n").is_err());
    }

    #[test]
    fn test_filter_validation() {
        assert!(FilterConfig::Median { window_size: 0 }.validate().is_err());
        assert!(FilterConfig::Gaussian { window_size: 3, sigma: 0.0 }.validate().is_err());
        let nyquist = FilterConfig::Butterworth {
            window_size: 10,
            cutoff_hz: 15.0,
            order: 4,
            sample_rate_hz: 30.0,
        };
        assert!(nyquist.validate().is_err());
        let odd_order = FilterConfig::Butterworth {
            window_size: 10,
            cutoff_hz: 6.0,
            order: 3,
            sample_rate_hz: 30.0,
        };
        assert!(odd_order.validate().is_err());
        assert!(FilterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_pose_validation() {
        let mut config = Config::default();
        config.pose.visibility_threshold = f32::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPose(_))));

        let mut config = Config::default();
        config.pose.min_visible_ratio = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPose(_))));

        let mut config = Config::default();
        config.pose.min_average_confidence = -0.1;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPose(_))));

        let mut edge = PoseConfig::default();
        edge.visibility_threshold = 0.0;
        edge.min_visible_ratio = 1.0;
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_tracker_validation() {
        let mut config = TrackerConfig::default();
        config.match_distance = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTracker(_))));
    }
}
