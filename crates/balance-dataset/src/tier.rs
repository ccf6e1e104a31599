//! Augmentation intensity tiers and per-class plans.
//!
//! A tier is picked from the deficiency ratio `target / current` of a class
//! and maps to a fixed recipe of probabilistic transform steps.

use balance_core::ClassId;
use serde::Serialize;

use crate::statistics::ClassHistogram;

/// One transform operation with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    /// Resize to the executor's canonical size
    Resize,
    HorizontalFlip,
    VerticalFlip,
    /// Rotation by a uniformly drawn multiple of 90 degrees
    RandomRotate90,
    /// Affine shift (fraction of size), scale (+/- fraction) and rotation (+/- degrees)
    ShiftScaleRotate {
        shift_limit: f64,
        scale_limit: f64,
        rotate_limit: f64,
    },
    /// Brightness offset and contrast gain limits, both as +/- fractions
    BrightnessContrast {
        brightness_limit: f32,
        contrast_limit: f32,
    },
    /// Hue shift in half-degree units, saturation and value shifts in 0..255 units
    HueSaturationValue {
        hue_shift: i32,
        sat_shift: i32,
        val_shift: i32,
    },
    /// Box blur with an odd kernel drawn from 3..=blur_limit
    Blur { blur_limit: u32 },
    /// Contrast limited adaptive histogram equalization on the luma channel
    Clahe { clip_limit: f32, tile_grid: u32 },
}

impl TransformOp {
    /// True for operations that move pixels and therefore boxes
    pub fn is_geometric(&self) -> bool {
        matches!(
            self,
            TransformOp::Resize
                | TransformOp::HorizontalFlip
                | TransformOp::VerticalFlip
                | TransformOp::RandomRotate90
                | TransformOp::ShiftScaleRotate { .. }
        )
    }
}

/// A recipe entry: an operation applied with a given probability
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransformStep {
    pub op: TransformOp,
    pub probability: f64,
}

const fn step(op: TransformOp, probability: f64) -> TransformStep {
    TransformStep { op, probability }
}

pub static HEAVY_RECIPE: [TransformStep; 9] = [
    step(TransformOp::Resize, 1.0),
    step(TransformOp::HorizontalFlip, 0.7),
    step(TransformOp::VerticalFlip, 0.3),
    step(TransformOp::RandomRotate90, 0.3),
    step(
        TransformOp::ShiftScaleRotate {
            shift_limit: 0.2,
            scale_limit: 0.3,
            rotate_limit: 45.0,
        },
        0.7,
    ),
    step(
        TransformOp::BrightnessContrast {
            brightness_limit: 0.4,
            contrast_limit: 0.4,
        },
        0.7,
    ),
    step(
        TransformOp::HueSaturationValue {
            hue_shift: 30,
            sat_shift: 40,
            val_shift: 30,
        },
        0.7,
    ),
    step(TransformOp::Blur { blur_limit: 5 }, 0.3),
    step(
        TransformOp::Clahe {
            clip_limit: 4.0,
            tile_grid: 8,
        },
        0.5,
    ),
];

pub static MODERATE_RECIPE: [TransformStep; 5] = [
    step(TransformOp::Resize, 1.0),
    step(TransformOp::HorizontalFlip, 0.5),
    step(
        TransformOp::ShiftScaleRotate {
            shift_limit: 0.1,
            scale_limit: 0.2,
            rotate_limit: 30.0,
        },
        0.5,
    ),
    step(
        TransformOp::BrightnessContrast {
            brightness_limit: 0.2,
            contrast_limit: 0.2,
        },
        0.5,
    ),
    step(
        TransformOp::HueSaturationValue {
            hue_shift: 20,
            sat_shift: 30,
            val_shift: 20,
        },
        0.5,
    ),
];

pub static LIGHT_RECIPE: [TransformStep; 3] = [
    step(TransformOp::Resize, 1.0),
    step(TransformOp::HorizontalFlip, 0.3),
    step(
        TransformOp::BrightnessContrast {
            brightness_limit: 0.1,
            contrast_limit: 0.1,
        },
        0.3,
    ),
];

/// Augmentation intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AugmentationTier {
    Heavy,
    Moderate,
    Light,
}

impl AugmentationTier {
    /// Ordered transform steps of this tier
    pub fn recipe(&self) -> &'static [TransformStep] {
        match self {
            AugmentationTier::Heavy => &HEAVY_RECIPE,
            AugmentationTier::Moderate => &MODERATE_RECIPE,
            AugmentationTier::Light => &LIGHT_RECIPE,
        }
    }
}

impl std::fmt::Display for AugmentationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AugmentationTier::Heavy => write!(f, "heavy"),
            AugmentationTier::Moderate => write!(f, "moderate"),
            AugmentationTier::Light => write!(f, "light"),
        }
    }
}

/// Picks the tier for a deficiency ratio, `None` when no augmentation is needed
pub fn select_tier(ratio: f64) -> Option<AugmentationTier> {
    if ratio > 5.0 {
        Some(AugmentationTier::Heavy)
    } else if ratio > 2.0 {
        Some(AugmentationTier::Moderate)
    } else if ratio > 1.0 {
        Some(AugmentationTier::Light)
    } else {
        None
    }
}

/// Balancing decision for one class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassPlan {
    pub class_id: ClassId,
    pub current_count: usize,
    pub target_count: usize,
    /// `target / current`, absent when the class has no samples
    pub deficiency_ratio: Option<f64>,
    pub tier: Option<AugmentationTier>,
    /// Samples to synthesize
    pub needed: usize,
}

impl ClassPlan {
    pub fn new(class_id: ClassId, current_count: usize, target_count: usize) -> Self {
        let deficiency_ratio =
            (current_count > 0).then(|| target_count as f64 / current_count as f64);
        let tier = deficiency_ratio.and_then(select_tier);
        Self {
            class_id,
            current_count,
            target_count,
            deficiency_ratio,
            tier,
            needed: target_count.saturating_sub(current_count),
        }
    }

    /// True when the class has no samples to augment from
    pub fn has_no_samples(&self) -> bool {
        self.current_count == 0
    }

    /// True when synthesis should run for this class
    pub fn requires_synthesis(&self) -> bool {
        self.tier.is_some() && self.needed > 0
    }
}

/// Plans for every class, computed once from a histogram snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct AugmentationPlan {
    pub classes: Vec<ClassPlan>,
}

impl AugmentationPlan {
    /// Builds plans for `class_ids` plus any class present in the histogram
    pub fn from_histogram(histogram: &ClassHistogram, target: usize, class_ids: &[ClassId]) -> Self {
        let mut ids: Vec<ClassId> = class_ids.iter().chain(histogram.keys()).copied().collect();
        ids.sort_unstable();
        ids.dedup();

        let classes = ids
            .into_iter()
            .map(|id| ClassPlan::new(id, histogram.get(&id).copied().unwrap_or(0), target))
            .collect();

        Self { classes }
    }

    pub fn get(&self, class_id: ClassId) -> Option<&ClassPlan> {
        self.classes.iter().find(|p| p.class_id == class_id)
    }

    /// Plans that will run synthesis
    pub fn deficient(&self) -> impl Iterator<Item = &ClassPlan> {
        self.classes.iter().filter(|p| p.requires_synthesis())
    }

    pub fn total_needed(&self) -> usize {
        self.deficient().map(|p| p.needed).sum()
    }
}
