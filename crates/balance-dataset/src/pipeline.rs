//! End-to-end augmentation and downsampling runs over a corpus.

use balance_core::{BalanceConfig, ClassId, DownsampleConfig, Error, Result, Split};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::corpus::{scan_split, SamplePair, ScanReport, SplitDirs};
use crate::downsample::{DownsampleSummary, Downsampler, RetentionPlan};
use crate::manifest::DatasetManifest;
use crate::report::{RunReport, BALANCING_REPORT_FILE, DOWNSAMPLING_REPORT_FILE};
use crate::split::carve_validation;
use crate::statistics::{analyze, DistributionAnalysis};
use crate::synthesize::{sources_by_class, ClassSynthesis, Synthesizer};
use crate::tier::AugmentationPlan;
use crate::transform::BoxAugmenter;

/// Outcome of an augmentation run
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSummary {
    pub output_dir: PathBuf,
    pub original: DistributionAnalysis,
    pub resulting: DistributionAnalysis,
    pub plan: AugmentationPlan,
    pub syntheses: Vec<ClassSynthesis>,
    pub originals_copied: usize,
    pub validation_pairs: usize,
    /// True when validation was carved out of the input train split
    pub carved_validation: bool,
    pub manifest_path: PathBuf,
    pub report_path: PathBuf,
}

impl BalanceSummary {
    pub fn total_created(&self) -> usize {
        self.syntheses.iter().map(|s| s.created).sum()
    }
}

/// Outcome of a downsampling run
#[derive(Debug, Clone, Serialize)]
pub struct DownsampleRunSummary {
    pub output_dir: PathBuf,
    pub original: DistributionAnalysis,
    pub resulting: DistributionAnalysis,
    pub plan: RetentionPlan,
    pub summary: DownsampleSummary,
    pub validation_copied: usize,
    pub manifest_path: PathBuf,
    pub report_path: PathBuf,
}

fn ensure_input_root(root: &Path) -> Result<()> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!("Input directory not found: {}", root.display())));
    }
    Ok(())
}

fn configured_class_ids(class_names: &[String]) -> Vec<ClassId> {
    (0..class_names.len() as ClassId).collect()
}

/// Copies pairs into `dest` on the rayon pool, returning the copies in input order
pub fn copy_pairs(pairs: &[SamplePair], dest: &SplitDirs) -> Result<Vec<SamplePair>> {
    dest.create()?;
    pairs.par_iter().map(|pair| pair.copy_to(dest)).collect()
}

/// Scans and analyzes one split of a corpus
pub fn analyze_split(root: &Path, split: Split) -> Result<(ScanReport, DistributionAnalysis)> {
    ensure_input_root(root)?;
    let dirs = SplitDirs::locate(root, split)
        .ok_or_else(|| Error::NotFound(format!("No {} split under {}", split, root.display())))?;
    let scan = scan_split(&dirs)?;
    let analysis = analyze(&scan.pairs);
    Ok((scan, analysis))
}

/// Raises every deficient class of the train split to the configured target.
///
/// Originals are copied unchanged; synthesized samples are added next to them.
pub fn run_augmentation<A: BoxAugmenter>(
    config: &BalanceConfig,
    augmenter: &A,
    progress: &ProgressBar,
) -> Result<BalanceSummary> {
    config.validate()?;
    ensure_input_root(&config.input_dir)?;

    let input_train = SplitDirs::locate(&config.input_dir, Split::Train).ok_or_else(|| {
        Error::NotFound(format!("Train split not found under {}", config.input_dir.display()))
    })?;
    let train_scan = scan_split(&input_train)?;
    info!("Found {} paired train images in {}", train_scan.pairs.len(), input_train.root.display());

    let (train_pairs, validation_pairs, carved_validation) =
        match SplitDirs::locate(&config.input_dir, Split::Validation) {
            Some(dirs) => (train_scan.pairs, scan_split(&dirs)?.pairs, false),
            None => {
                let carve = carve_validation(&train_scan.pairs, config.validation_ratio, config.seed);
                warn!(
                    "No validation split found, moving {} of {} train images to validation",
                    carve.validation.len(),
                    carve.validation.len() + carve.train.len()
                );
                (carve.train, carve.validation, true)
            }
        };

    let out_train = SplitDirs::output(&config.output_dir, Split::Train);
    let out_val = SplitDirs::output(&config.output_dir, Split::Validation);
    out_train.create()?;
    out_val.create()?;

    let copied = copy_pairs(&train_pairs, &out_train)?;
    info!("Copied {} original train images", copied.len());

    let original = analyze(&train_pairs);
    let plan = AugmentationPlan::from_histogram(
        &original.annotation_histogram,
        config.target_per_class,
        &configured_class_ids(&config.class_names),
    );
    for class_plan in &plan.classes {
        if class_plan.has_no_samples() {
            warn!("Class {}: no samples, skipping", class_plan.class_id);
        } else if !class_plan.requires_synthesis() {
            info!(
                "Class {}: {} annotations, no augmentation needed",
                class_plan.class_id, class_plan.current_count
            );
        }
    }

    let sources = sources_by_class(&train_pairs, &original);
    let syntheses = Synthesizer::new(augmenter, out_train.clone(), config.seed)
        .with_max_attempts_factor(config.max_attempts_factor)
        .with_extension(config.output_extension.clone())
        .run(&plan, &sources, progress);

    let validation_copied = copy_pairs(&validation_pairs, &out_val)?;
    info!("Copied {} validation images", validation_copied.len());

    let resulting = analyze(&scan_split(&out_train)?.pairs);
    let observed = resulting.classes();
    let manifest_path = DatasetManifest::new(&config.output_dir, &config.class_names, observed).write()?;

    let report_path = config.output_dir.join(BALANCING_REPORT_FILE);
    RunReport {
        title: "Dataset balancing report",
        class_names: &config.class_names,
        unit: "annotations",
        original: &original.annotation_histogram,
        resulting: &resulting.annotation_histogram,
        syntheses: &syntheses,
        downsample: None,
    }
    .write(&report_path)?;

    let summary = BalanceSummary {
        output_dir: config.output_dir.clone(),
        original,
        resulting,
        plan,
        syntheses,
        originals_copied: copied.len(),
        validation_pairs: validation_copied.len(),
        carved_validation,
        manifest_path,
        report_path,
    };
    info!(
        "Balancing complete: {} samples created, output in {}",
        summary.total_created(),
        summary.output_dir.display()
    );
    Ok(summary)
}

/// Caps over-represented classes of the train split near the configured target
pub fn run_downsampling(config: &DownsampleConfig, progress: &ProgressBar) -> Result<DownsampleRunSummary> {
    config.validate()?;
    ensure_input_root(&config.input_dir)?;

    let out_train = SplitDirs::output(&config.output_dir, Split::Train);
    let out_val = SplitDirs::output(&config.output_dir, Split::Validation);
    fs::create_dir_all(&config.output_dir)?;

    let validation_copied = match SplitDirs::locate(&config.input_dir, Split::Validation) {
        Some(dirs) => copy_pairs(&scan_split(&dirs)?.pairs, &out_val)?.len(),
        None => {
            warn!("No validation split under {}", config.input_dir.display());
            0
        }
    };

    let train_pairs = match SplitDirs::locate(&config.input_dir, Split::Train) {
        Some(dirs) => scan_split(&dirs)?.pairs,
        None => {
            warn!("No train split under {}", config.input_dir.display());
            Vec::new()
        }
    };

    let original = analyze(&train_pairs);
    let plan = RetentionPlan::from_histogram(&original.image_histogram, config.target_per_class);
    for (class_id, retention) in plan.over_target() {
        info!(
            "Class {}: {} images, keep probability {:.3}",
            class_id, retention.current_count, retention.surplus_ratio
        );
    }

    let mut downsampler = Downsampler::new(plan, config.retention_rule, config.seed);
    let summary = downsampler.run(&train_pairs, &original, &out_train, progress)?;

    let resulting = analyze(&scan_split(&out_train)?.pairs);
    let manifest_path =
        DatasetManifest::new(&config.output_dir, &config.class_names, resulting.classes()).write()?;

    let report_path = config.output_dir.join(DOWNSAMPLING_REPORT_FILE);
    RunReport {
        title: "Dataset downsampling report",
        class_names: &config.class_names,
        unit: "images",
        original: &original.image_histogram,
        resulting: &resulting.image_histogram,
        syntheses: &[],
        downsample: Some(&summary),
    }
    .write(&report_path)?;

    Ok(DownsampleRunSummary {
        output_dir: config.output_dir.clone(),
        original,
        resulting,
        plan: downsampler.plan().clone(),
        summary,
        validation_copied,
        manifest_path,
        report_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::test_support::write_pair;
    use crate::transform::TransformExecutor;
    use balance_core::{ImageSize, OtherBoxPolicy};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn small_corpus(root: &Path, with_val: bool) {
        let train = SplitDirs::new(root.join("train"));
        for i in 0..6 {
            write_pair(&train, &format!("a{i}"), "0 0.5 0.5 0.6 0.6\n", (24, 24));
        }
        for i in 0..20 {
            write_pair(&train, &format!("b{i:02}"), "1 0.5 0.5 0.6 0.6\n", (24, 24));
        }
        if with_val {
            let val = SplitDirs::new(root.join("validation"));
            write_pair(&val, "v0", "0 0.5 0.5 0.2 0.2\n", (24, 24));
        }
    }

    fn balance_config(temp: &TempDir) -> BalanceConfig {
        BalanceConfig {
            input_dir: temp.path().join("in"),
            output_dir: temp.path().join("out"),
            target_per_class: 20,
            class_names: vec!["Glass".to_string(), "Metal".to_string()],
            canonical_size: ImageSize::new(32, 32),
            ..Default::default()
        }
    }

    fn stems(dirs: &SplitDirs) -> BTreeSet<String> {
        scan_split(dirs).unwrap().pairs.into_iter().map(|p| p.stem).collect()
    }

    #[test]
    fn test_run_augmentation_preserves_originals() {
        let temp = TempDir::new().unwrap();
        let config = balance_config(&temp);
        small_corpus(&config.input_dir, true);

        let executor = TransformExecutor::new(config.canonical_size, OtherBoxPolicy::Transform, None);
        let summary = run_augmentation(&config, &executor, &ProgressBar::hidden()).unwrap();

        let before = stems(&SplitDirs::new(config.input_dir.join("train")));
        let after = stems(&SplitDirs::output(&config.output_dir, Split::Train));
        assert!(before.is_subset(&after));
        assert_eq!(after.len(), before.len() + summary.total_created());

        assert!(!summary.carved_validation);
        assert_eq!(summary.validation_pairs, 1);
        assert_eq!(summary.originals_copied, 26);

        let class0 = summary.syntheses.iter().find(|s| s.class_id == 0).unwrap();
        assert_eq!(class0.needed, 14);
        assert!(class0.attempts <= 42);
        assert!(summary.plan.get(1).unwrap().tier.is_none());

        assert!(summary.manifest_path.exists());
        assert!(summary.report_path.exists());
        assert!(config.output_dir.join("val/images/v0.png").exists());
    }

    #[test]
    fn test_run_augmentation_carves_validation() {
        let temp = TempDir::new().unwrap();
        let config = balance_config(&temp);
        small_corpus(&config.input_dir, false);

        let executor = TransformExecutor::new(config.canonical_size, OtherBoxPolicy::Transform, None);
        let summary = run_augmentation(&config, &executor, &ProgressBar::hidden()).unwrap();
        assert!(summary.carved_validation);
        assert_eq!(summary.validation_pairs, 5);
        assert_eq!(summary.originals_copied, 21);

        let val = stems(&SplitDirs::output(&config.output_dir, Split::Validation));
        let train = stems(&SplitDirs::output(&config.output_dir, Split::Train));
        for stem in &val {
            assert!(!train.contains(stem));
            assert!(!train.iter().any(|t| t.starts_with(&format!("{stem}_aug"))));
        }
    }

    #[test]
    fn test_run_augmentation_missing_input_is_fatal() {
        let temp = TempDir::new().unwrap();
        let config = balance_config(&temp);
        let executor = TransformExecutor::default();
        let result = run_augmentation(&config, &executor, &ProgressBar::hidden());
        assert!(matches!(result, Err(Error::NotFound(_))));

        fs::create_dir_all(&config.input_dir).unwrap();
        let result = run_augmentation(&config, &executor, &ProgressBar::hidden());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_run_downsampling() {
        let temp = TempDir::new().unwrap();
        small_corpus(&temp.path().join("in"), true);
        let config = DownsampleConfig {
            input_dir: temp.path().join("in"),
            output_dir: temp.path().join("out"),
            target_per_class: 10,
            ..Default::default()
        };

        let result = run_downsampling(&config, &ProgressBar::hidden()).unwrap();
        assert_eq!(result.validation_copied, 1);
        assert_eq!(result.summary.kept + result.summary.dropped, 26);
        assert_eq!(result.summary.kept_per_class.get(&0), Some(&6));
        assert_eq!(result.resulting.image_histogram.get(&0), Some(&6));
        assert!(result.plan.ratio(1) < 1.0);
        assert!(result.report_path.ends_with(DOWNSAMPLING_REPORT_FILE));
        assert!(result.manifest_path.exists());
    }

    #[test]
    fn test_analyze_split_accepts_validation_alias() {
        let temp = TempDir::new().unwrap();
        small_corpus(temp.path(), true);
        let (scan, analysis) = analyze_split(temp.path(), Split::Validation).unwrap();
        assert_eq!(scan.pairs.len(), 1);
        assert_eq!(analysis.annotation_histogram.get(&0), Some(&1));
    }
}
