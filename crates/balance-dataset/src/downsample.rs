//! Stochastic downsampling of over-represented classes.
//!
//! Every image is kept or dropped as a whole with one Bernoulli draw at a
//! keep probability derived from the surplus ratios of its classes.

use balance_core::{ClassId, Result, RetentionRule};
use indicatif::ProgressBar;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::corpus::{SamplePair, SplitDirs};
use crate::statistics::{ClassHistogram, DistributionAnalysis};

/// `target / current` when the class is over target, otherwise 1.0
pub fn surplus_ratio(current: usize, target: usize) -> f64 {
    if current > target {
        target as f64 / current as f64
    } else {
        1.0
    }
}

/// Surplus ratio of one class
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassRetention {
    pub current_count: usize,
    pub surplus_ratio: f64,
}

/// Retention decision for every class, computed once from an image histogram
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionPlan {
    pub target: usize,
    pub classes: BTreeMap<ClassId, ClassRetention>,
}

impl RetentionPlan {
    pub fn from_histogram(histogram: &ClassHistogram, target: usize) -> Self {
        let classes = histogram
            .iter()
            .map(|(&class_id, &current)| {
                (
                    class_id,
                    ClassRetention {
                        current_count: current,
                        surplus_ratio: surplus_ratio(current, target),
                    },
                )
            })
            .collect();
        Self { target, classes }
    }

    /// Surplus ratio of a class, 1.0 for classes the plan does not know
    pub fn ratio(&self, class_id: ClassId) -> f64 {
        self.classes.get(&class_id).map_or(1.0, |c| c.surplus_ratio)
    }

    /// Keep probability of an image with the given classes
    pub fn keep_probability(&self, classes: &[ClassId], rule: RetentionRule) -> f64 {
        let ratios = classes.iter().map(|&c| self.ratio(c));
        let probability = match rule {
            RetentionRule::MostRestrictive => ratios.fold(f64::INFINITY, f64::min),
            RetentionRule::ProtectScarce => ratios.fold(f64::NEG_INFINITY, f64::max),
        };
        if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            // no classes
            1.0
        }
    }

    pub fn over_target(&self) -> impl Iterator<Item = (&ClassId, &ClassRetention)> {
        self.classes.iter().filter(|(_, c)| c.surplus_ratio < 1.0)
    }
}

/// Result of a downsampling pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownsampleSummary {
    pub kept: usize,
    pub dropped: usize,
    /// Images kept per class
    pub kept_per_class: ClassHistogram,
    /// Images seen per class
    pub seen_per_class: ClassHistogram,
}

impl DownsampleSummary {
    /// Fraction of images of a class that were kept
    pub fn retention(&self, class_id: ClassId) -> Option<f64> {
        let seen = *self.seen_per_class.get(&class_id)?;
        let kept = self.kept_per_class.get(&class_id).copied().unwrap_or(0);
        (seen > 0).then(|| kept as f64 / seen as f64)
    }
}

/// Applies a retention plan to a split
pub struct Downsampler {
    plan: RetentionPlan,
    rule: RetentionRule,
    rng: ChaCha8Rng,
}

impl Downsampler {
    pub fn new(plan: RetentionPlan, rule: RetentionRule, seed: u64) -> Self {
        Self {
            plan,
            rule,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn plan(&self) -> &RetentionPlan {
        &self.plan
    }

    /// One Bernoulli draw for an image with the given classes
    pub fn keep(&mut self, classes: &[ClassId]) -> bool {
        let probability = self.plan.keep_probability(classes, self.rule);
        self.rng.gen::<f64>() < probability
    }

    /// Decides pairs in stem order and copies the retained ones into `output`.
    ///
    /// Background images (no annotations) have keep probability 1.0 and are always
    /// copied. Pairs missing from the analysis were not readable and are dropped.
    pub fn run(
        &mut self,
        pairs: &[SamplePair],
        analysis: &DistributionAnalysis,
        output: &SplitDirs,
        progress: &ProgressBar,
    ) -> Result<DownsampleSummary> {
        output.create()?;
        progress.set_length(pairs.len() as u64);
        progress.set_message("downsampling");

        let mut summary = DownsampleSummary::default();
        for pair in pairs {
            progress.inc(1);
            let Some(classes) = analysis.image_classes.get(&pair.stem) else {
                summary.dropped += 1;
                continue;
            };
            for class_id in classes {
                *summary.seen_per_class.entry(*class_id).or_insert(0) += 1;
            }

            if self.keep(classes) {
                pair.copy_to(output)?;
                summary.kept += 1;
                for class_id in classes {
                    *summary.kept_per_class.entry(*class_id).or_insert(0) += 1;
                }
            } else {
                debug!("Dropping {}", pair.stem);
                summary.dropped += 1;
            }
        }

        progress.finish_with_message("downsampling complete");
        info!("Kept {} images, dropped {}", summary.kept, summary.dropped);
        Ok(summary)
    }
}
