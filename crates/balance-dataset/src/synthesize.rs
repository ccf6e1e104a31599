//! Synthesis of new samples for deficient classes.
//!
//! Each deficient class repeatedly picks a source image containing the
//! class, transforms it and writes the result, until the class has enough
//! new samples or its attempt ceiling is reached.

use balance_core::{Annotation, ClassId};
use indicatif::ProgressBar;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use tracing::{debug, info, warn};

use crate::corpus::{ImageRecord, SamplePair, SplitDirs};
use crate::label;
use crate::statistics::DistributionAnalysis;
use crate::tier::{AugmentationPlan, AugmentationTier, ClassPlan};
use crate::transform::{BoxAugmenter, TransformFailure, TransformOutcome, TransformedSample};

/// Discarded attempts of one class, by cause
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub load_errors: usize,
    pub missing_target: usize,
    pub invalid_geometry: usize,
    pub numeric_errors: usize,
    pub no_target_boxes: usize,
    pub budget_exceeded: usize,
    pub write_errors: usize,
}

impl FailureCounts {
    pub fn record(&mut self, failure: &TransformFailure) {
        match failure {
            TransformFailure::InvalidGeometry(_) => self.invalid_geometry += 1,
            TransformFailure::NumericError(_) => self.numeric_errors += 1,
            TransformFailure::NoTargetBoxes => self.no_target_boxes += 1,
            TransformFailure::BudgetExceeded { .. } => self.budget_exceeded += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.load_errors
            + self.missing_target
            + self.invalid_geometry
            + self.numeric_errors
            + self.no_target_boxes
            + self.budget_exceeded
            + self.write_errors
    }
}

/// Outcome of synthesis for one class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSynthesis {
    pub class_id: ClassId,
    pub tier: Option<AugmentationTier>,
    pub needed: usize,
    pub created: usize,
    pub attempts: usize,
    pub failures: FailureCounts,
}

impl ClassSynthesis {
    fn skipped(plan: &ClassPlan) -> Self {
        Self {
            class_id: plan.class_id,
            tier: plan.tier,
            needed: plan.needed,
            created: 0,
            attempts: 0,
            failures: FailureCounts::default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.created >= self.needed
    }
}

/// Groups pairs by the classes their labels contain
pub fn sources_by_class(pairs: &[SamplePair], analysis: &DistributionAnalysis) -> BTreeMap<ClassId, Vec<SamplePair>> {
    let mut sources: BTreeMap<ClassId, Vec<SamplePair>> = BTreeMap::new();
    for pair in pairs {
        let Some(classes) = analysis.image_classes.get(&pair.stem) else {
            continue;
        };
        for class_id in classes {
            sources.entry(*class_id).or_default().push(pair.clone());
        }
    }
    sources
}

/// File stem of the `sequence`-th synthesized sample of `class_id` derived from `stem`
pub fn synthesized_stem(stem: &str, class_id: ClassId, sequence: usize) -> String {
    format!("{stem}_aug{class_id}_{sequence:04}")
}

/// Runs the select, prepare, transform and commit cycle per class
pub struct Synthesizer<'a, A: BoxAugmenter> {
    augmenter: &'a A,
    output: SplitDirs,
    seed: u64,
    max_attempts_factor: usize,
    extension: String,
}

impl<'a, A: BoxAugmenter> Synthesizer<'a, A> {
    pub fn new(augmenter: &'a A, output: SplitDirs, seed: u64) -> Self {
        Self {
            augmenter,
            output,
            seed,
            max_attempts_factor: 3,
            extension: "jpg".to_string(),
        }
    }

    pub fn with_max_attempts_factor(mut self, factor: usize) -> Self {
        self.max_attempts_factor = factor.max(1);
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Independent random stream per class
    fn class_rng(&self, class_id: ClassId) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(class_id as u64);
        rng
    }

    /// Synthesizes every deficient class of the plan in parallel
    pub fn run(
        &self,
        plan: &AugmentationPlan,
        sources: &BTreeMap<ClassId, Vec<SamplePair>>,
        progress: &ProgressBar,
    ) -> Vec<ClassSynthesis> {
        progress.set_length(plan.total_needed() as u64);
        progress.set_message("synthesizing");

        let deficient: Vec<&ClassPlan> = plan.deficient().collect();
        let results = deficient
            .par_iter()
            .map(|class_plan| {
                let class_sources = sources.get(&class_plan.class_id).map(Vec::as_slice).unwrap_or(&[]);
                let result = self.synthesize_class(class_plan, class_sources, progress);
                progress.inc(result.needed.saturating_sub(result.created) as u64);
                result
            })
            .collect();

        progress.finish_with_message("synthesis complete");
        results
    }

    /// Synthesizes samples for a single class
    pub fn synthesize_class(&self, plan: &ClassPlan, sources: &[SamplePair], progress: &ProgressBar) -> ClassSynthesis {
        let Some(tier) = plan.tier else {
            return ClassSynthesis::skipped(plan);
        };
        if sources.is_empty() {
            warn!("Class {}: no source images, skipping", plan.class_id);
            return ClassSynthesis::skipped(plan);
        }

        let mut rng = self.class_rng(plan.class_id);
        let recipe = tier.recipe();
        let max_attempts = plan.needed * self.max_attempts_factor;
        let mut result = ClassSynthesis::skipped(plan);

        info!(
            "Class {}: {} -> {} ({} tier, {} needed, ratio {:.2})",
            plan.class_id,
            plan.current_count,
            plan.target_count,
            tier,
            plan.needed,
            plan.deficiency_ratio.unwrap_or_default()
        );

        while result.created < plan.needed && result.attempts < max_attempts {
            result.attempts += 1;
            let pair = &sources[rng.gen_range(0..sources.len())];

            let record = match ImageRecord::load(pair) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Class {}: {}", plan.class_id, e);
                    result.failures.load_errors += 1;
                    continue;
                }
            };
            let (target, others) = record.partition(plan.class_id);
            if target.is_empty() {
                result.failures.missing_target += 1;
                continue;
            }

            let sample = match self.augmenter.apply(&record.image, &target, &others, recipe, &mut rng) {
                TransformOutcome::Success(sample) => sample,
                TransformOutcome::Failure(failure) => {
                    debug!("Class {}: attempt discarded: {}", plan.class_id, failure);
                    result.failures.record(&failure);
                    continue;
                }
            };

            let stem = synthesized_stem(&pair.stem, plan.class_id, result.created);
            match self.commit(&stem, plan.class_id, &sample) {
                Ok(()) => {
                    result.created += 1;
                    progress.inc(1);
                }
                Err(e) => {
                    warn!("Class {}: failed to write {}: {}", plan.class_id, stem, e);
                    result.failures.write_errors += 1;
                }
            }
        }

        if result.is_complete() {
            info!(
                "Class {}: created {} samples in {} attempts",
                plan.class_id, result.created, result.attempts
            );
        } else {
            warn!(
                "Class {}: created only {}/{} samples after {} attempts ({} failed)",
                plan.class_id,
                result.created,
                result.needed,
                result.attempts,
                result.failures.total()
            );
        }
        result
    }

    /// Writes image and label; the image is removed again if the label cannot be written
    fn commit(&self, stem: &str, class_id: ClassId, sample: &TransformedSample) -> balance_core::Result<()> {
        let image_path = self.output.image_path(stem, &self.extension);
        let label_path = self.output.label_path(stem);
        let size = sample.size();

        let annotations: Vec<Annotation> = sample
            .target_boxes
            .iter()
            .map(|bbox| Annotation::new(class_id, *bbox))
            .chain(sample.other_boxes.iter().copied())
            .collect();

        if let Err(e) = sample.image.save(&image_path) {
            let _ = fs::remove_file(&image_path);
            return Err(e.into());
        }
        if let Err(e) = label::write_label_file(&label_path, &annotations, size.width, size.height) {
            let _ = fs::remove_file(&image_path);
            return Err(e);
        }
        Ok(())
    }
}
