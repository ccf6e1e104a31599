//! Configuration structures for the balancing runs.
//!
//! Every run takes one immutable configuration value. Fields carry serde
//! defaults so a TOML file only needs to name what it changes.

use crate::error::{Error, Result};
use crate::types::ImageSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Class names used when a configuration does not provide its own
pub const DEFAULT_CLASS_NAMES: [&str; 8] = [
    "Cardboard",
    "Glass",
    "Metal",
    "Mixed Waste",
    "Organic Waste",
    "Paper",
    "Plastic",
    "Textiles",
];

fn default_class_names() -> Vec<String> {
    DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
}

/// How boxes of classes other than the one being balanced are treated
/// by geometric transforms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OtherBoxPolicy {
    /// Move other-class boxes through the same geometric operations
    #[default]
    Transform,
    /// Keep other-class boxes at their source pixel coordinates, clipped
    /// to the output image
    PassThrough,
}

/// How an image's keep probability is derived from its classes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionRule {
    /// Minimum surplus ratio over the image's classes
    #[default]
    MostRestrictive,
    /// Maximum surplus ratio, so any class at or below target keeps the image
    ProtectScarce,
}

impl std::fmt::Display for RetentionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionRule::MostRestrictive => write!(f, "most_restrictive"),
            RetentionRule::ProtectScarce => write!(f, "protect_scarce"),
        }
    }
}

/// Configuration for the augmentation (upsampling) run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Corpus root containing `train/` and optionally `val/` or `validation/`
    pub input_dir: PathBuf,
    /// Root the balanced corpus is written to
    pub output_dir: PathBuf,
    /// Annotation count every class is raised to
    pub target_per_class: usize,
    /// Ordered class names, index = class id
    pub class_names: Vec<String>,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Size every synthesized image is resized to
    pub canonical_size: ImageSize,
    /// Attempt ceiling as a multiple of the samples a class needs
    pub max_attempts_factor: usize,
    /// Fraction of train carved out when the input has no validation split
    pub validation_ratio: f32,
    /// Optional wall-clock budget per synthesis attempt
    pub attempt_timeout_ms: Option<u64>,
    /// Treatment of non-target boxes during geometric transforms
    pub other_boxes: OtherBoxPolicy,
    /// Extension (and therefore encoding) of synthesized images
    pub output_extension: String,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("balanced_data"),
            target_per_class: 500,
            class_names: default_class_names(),
            seed: 42,
            canonical_size: ImageSize::canonical(),
            max_attempts_factor: 3,
            validation_ratio: 0.2,
            attempt_timeout_ms: None,
            other_boxes: OtherBoxPolicy::default(),
            output_extension: "jpg".to_string(),
        }
    }
}

impl BalanceConfig {
    /// Rejects values no run can make sense of
    pub fn validate(&self) -> Result<()> {
        if self.target_per_class == 0 {
            return Err(Error::Config("target_per_class must be positive".to_string()));
        }
        if self.canonical_size.is_empty() {
            return Err(Error::Config(format!(
                "canonical_size must be non-empty, got {}",
                self.canonical_size
            )));
        }
        if self.max_attempts_factor == 0 {
            return Err(Error::Config("max_attempts_factor must be at least 1".to_string()));
        }
        if !(self.validation_ratio > 0.0 && self.validation_ratio < 1.0) {
            return Err(Error::Config(format!(
                "validation_ratio must be in (0, 1), got {}",
                self.validation_ratio
            )));
        }
        if !matches!(
            self.output_extension.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png"
        ) {
            return Err(Error::Config(format!(
                "unsupported output_extension: {}",
                self.output_extension
            )));
        }
        Ok(())
    }

    /// Wall-clock budget for a single synthesis attempt, if one is configured
    pub fn attempt_budget(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration for the downsampling run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownsampleConfig {
    /// Corpus root to downsample (usually a balanced corpus)
    pub input_dir: PathBuf,
    /// Root the downsampled corpus is written to
    pub output_dir: PathBuf,
    /// Image count ceiling per class
    pub target_per_class: usize,
    /// Ordered class names, index = class id
    pub class_names: Vec<String>,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Keep-probability rule for images with several classes
    pub retention_rule: RetentionRule,
}

impl Default for DownsampleConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("balanced_data"),
            output_dir: PathBuf::from("balanced_final"),
            target_per_class: 800,
            class_names: default_class_names(),
            seed: 42,
            retention_rule: RetentionRule::default(),
        }
    }
}

impl DownsampleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_per_class == 0 {
            return Err(Error::Config("target_per_class must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_balance_config() {
        let config = BalanceConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.target_per_class, 500);
        assert_eq!(config.max_attempts_factor, 3);
        assert_eq!(config.class_names.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_balance_config_validation() {
        let zero_target = BalanceConfig {
            target_per_class: 0,
            ..Default::default()
        };
        assert!(zero_target.validate().is_err());

        let bad_ratio = BalanceConfig {
            validation_ratio: 1.0,
            ..Default::default()
        };
        assert!(bad_ratio.validate().is_err());

        let bad_ext = BalanceConfig {
            output_extension: "gif".to_string(),
            ..Default::default()
        };
        assert!(bad_ext.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: BalanceConfig = toml::from_str(
            r#"
            target_per_class = 300
            other_boxes = "pass_through"

            [canonical_size]
            width = 320
            height = 320
            "#,
        )
        .unwrap();
        assert_eq!(config.target_per_class, 300);
        assert_eq!(config.other_boxes, OtherBoxPolicy::PassThrough);
        assert_eq!(config.canonical_size, ImageSize::new(320, 320));
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_attempt_budget() {
        assert_eq!(BalanceConfig::default().attempt_budget(), None);

        let bounded = BalanceConfig {
            attempt_timeout_ms: Some(250),
            ..Default::default()
        };
        assert_eq!(bounded.attempt_budget(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_default_downsample_config() {
        let config = DownsampleConfig::default();
        assert_eq!(config.target_per_class, 800);
        assert_eq!(config.retention_rule, RetentionRule::MostRestrictive);
        assert_eq!(RetentionRule::ProtectScarce.to_string(), "protect_scarce");
    }
}
