//! Per-class distribution statistics over a set of paired records.

use balance_core::ClassId;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::corpus::SamplePair;
use crate::label;

/// Mapping from class id to a count
pub type ClassHistogram = BTreeMap<ClassId, usize>;

/// Records excluded from the histograms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub unreadable_images: usize,
    pub unreadable_labels: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.unreadable_images + self.unreadable_labels
    }
}

/// Distribution of classes over one split
#[derive(Debug, Clone, Default, Serialize)]
pub struct DistributionAnalysis {
    /// Number of annotations per class
    pub annotation_histogram: ClassHistogram,
    /// Number of images containing the class at least once
    pub image_histogram: ClassHistogram,
    /// Distinct classes of every counted image, in ascending order
    pub image_classes: BTreeMap<String, Vec<ClassId>>,
    /// Images that contributed, including those without annotations
    pub images_counted: usize,
    pub skipped: SkipCounts,
}

impl DistributionAnalysis {
    /// All classes seen in at least one annotation
    pub fn classes(&self) -> Vec<ClassId> {
        self.annotation_histogram.keys().copied().collect()
    }

    pub fn total_annotations(&self) -> usize {
        self.annotation_histogram.values().sum()
    }

    /// Images whose label carried no annotations
    pub fn background_images(&self) -> usize {
        self.image_classes.values().filter(|c| c.is_empty()).count()
    }

    /// Ratio of the largest to the smallest annotation count
    pub fn imbalance_ratio(&self) -> Option<f64> {
        let max = self.annotation_histogram.values().max()?;
        let min = self.annotation_histogram.values().min()?;
        (*min > 0).then(|| *max as f64 / *min as f64)
    }

    /// Stems of images that contain `class_id`
    pub fn stems_with_class(&self, class_id: ClassId) -> impl Iterator<Item = &str> {
        self.image_classes
            .iter()
            .filter(move |(_, classes)| classes.binary_search(&class_id).is_ok())
            .map(|(stem, _)| stem.as_str())
    }
}

enum RecordScan {
    Counted { stem: String, classes: Vec<ClassId> },
    UnreadableImage,
    UnreadableLabel,
}

fn scan_record(pair: &SamplePair) -> RecordScan {
    let (width, height) = match image::image_dimensions(&pair.image_path) {
        Ok(dims) => dims,
        Err(e) => {
            warn!("Unreadable image {}: {}", pair.image_path.display(), e);
            return RecordScan::UnreadableImage;
        }
    };

    match label::read_label_file(&pair.label_path, width, height) {
        Ok(annotations) => RecordScan::Counted {
            stem: pair.stem.clone(),
            classes: annotations.iter().map(|a| a.class_id).collect(),
        },
        Err(e) => {
            warn!("{}", e);
            RecordScan::UnreadableLabel
        }
    }
}

/// Builds annotation and image histograms for the given pairs.
///
/// Only image headers are read. Records are scanned in parallel and merged
/// in input order.
pub fn analyze(pairs: &[SamplePair]) -> DistributionAnalysis {
    let scans: Vec<RecordScan> = pairs.par_iter().map(scan_record).collect();

    let mut analysis = DistributionAnalysis::default();
    for scan in scans {
        match scan {
            RecordScan::Counted { stem, classes } => {
                let mut distinct = BTreeSet::new();
                for class_id in classes {
                    *analysis.annotation_histogram.entry(class_id).or_insert(0) += 1;
                    distinct.insert(class_id);
                }
                for class_id in &distinct {
                    *analysis.image_histogram.entry(*class_id).or_insert(0) += 1;
                }
                analysis.images_counted += 1;
                analysis.image_classes.insert(stem, distinct.into_iter().collect());
            }
            RecordScan::UnreadableImage => analysis.skipped.unreadable_images += 1,
            RecordScan::UnreadableLabel => analysis.skipped.unreadable_labels += 1,
        }
    }

    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::test_support::write_pair;
    use crate::corpus::SplitDirs;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_analyze_histograms() {
        let temp = TempDir::new().unwrap();
        let dirs = SplitDirs::new(temp.path().join("train"));
        let pairs = vec![
            write_pair(&dirs, "a", "0 0.5 0.5 0.2 0.2\n0 0.2 0.2 0.1 0.1\n1 0.7 0.7 0.1 0.1\n", (16, 16)),
            write_pair(&dirs, "b", "1 0.5 0.5 0.2 0.2\n", (16, 16)),
            write_pair(&dirs, "c", "", (16, 16)),
        ];

        let analysis = analyze(&pairs);
        assert_eq!(analysis.annotation_histogram.get(&0), Some(&2));
        assert_eq!(analysis.annotation_histogram.get(&1), Some(&2));
        assert_eq!(analysis.image_histogram.get(&0), Some(&1));
        assert_eq!(analysis.image_histogram.get(&1), Some(&2));
        assert_eq!(analysis.images_counted, 3);
        assert_eq!(analysis.background_images(), 1);
        assert_eq!(analysis.image_classes["a"], vec![0, 1]);
        assert_eq!(analysis.classes(), vec![0, 1]);
        assert_eq!(analysis.total_annotations(), 4);
        assert_eq!(analysis.imbalance_ratio(), Some(1.0));

        let with_one: Vec<_> = analysis.stems_with_class(1).collect();
        assert_eq!(with_one, vec!["a", "b"]);
    }

    #[test]
    fn test_analyze_skips_unreadable_images() {
        let temp = TempDir::new().unwrap();
        let dirs = SplitDirs::new(temp.path().join("train"));
        let good = write_pair(&dirs, "good", "2 0.5 0.5 0.2 0.2\n", (8, 8));

        let bad_image = dirs.image_path("bad", "jpg");
        fs::write(&bad_image, b"not an image").unwrap();
        fs::write(dirs.label_path("bad"), "2 0.5 0.5 0.2 0.2\n").unwrap();
        let bad = SamplePair {
            stem: "bad".to_string(),
            image_path: bad_image,
            label_path: dirs.label_path("bad"),
        };

        let analysis = analyze(&[bad, good]);
        assert_eq!(analysis.images_counted, 1);
        assert_eq!(analysis.skipped.unreadable_images, 1);
        assert_eq!(analysis.annotation_histogram.get(&2), Some(&1));
    }

    #[test]
    fn test_imbalance_ratio_empty() {
        assert_eq!(DistributionAnalysis::default().imbalance_ratio(), None);
    }
}
