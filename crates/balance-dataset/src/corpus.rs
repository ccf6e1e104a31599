//! Corpus layout, image/label pairing and record loading.
//!
//! A split directory holds `images/<stem>.<ext>` and `labels/<stem>.txt`.
//! Only artifacts present on both sides form a record; the rest are counted
//! and skipped.

use balance_core::{Annotation, BoundingBox, ClassId, Error, ImageSize, Result, Split};
use image::RgbImage;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::label;

/// Image extensions recognized in a corpus (matched case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Returns true when the path carries a supported image extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

/// `images/` and `labels/` directories of one split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitDirs {
    pub root: PathBuf,
    pub images: PathBuf,
    pub labels: PathBuf,
}

impl SplitDirs {
    /// Creates the directory set rooted at `split_root`
    pub fn new(split_root: impl Into<PathBuf>) -> Self {
        let root = split_root.into();
        Self {
            images: root.join("images"),
            labels: root.join("labels"),
            root,
        }
    }

    /// Output directories of `split` under a corpus root
    pub fn output(corpus_root: &Path, split: Split) -> Self {
        Self::new(corpus_root.join(split.dir_name()))
    }

    /// Finds an existing input split under a corpus root.
    ///
    /// A split exists when its `images/` directory does.
    pub fn locate(corpus_root: &Path, split: Split) -> Option<Self> {
        split
            .input_dir_names()
            .iter()
            .map(|name| Self::new(corpus_root.join(name)))
            .find(|dirs| dirs.images.is_dir())
    }

    /// Creates both directories if missing
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.images)?;
        fs::create_dir_all(&self.labels)?;
        Ok(())
    }

    pub fn label_path(&self, stem: &str) -> PathBuf {
        self.labels.join(format!("{stem}.txt"))
    }

    pub fn image_path(&self, stem: &str, extension: &str) -> PathBuf {
        self.images.join(format!("{stem}.{extension}"))
    }
}

/// A paired image and label sharing a stem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePair {
    pub stem: String,
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}

impl SamplePair {
    /// Copies both files into `dest`, keeping their file names
    pub fn copy_to(&self, dest: &SplitDirs) -> Result<SamplePair> {
        let image_name = self
            .image_path
            .file_name()
            .ok_or_else(|| Error::InvalidArgument(format!("no file name: {}", self.image_path.display())))?;
        let image_path = dest.images.join(image_name);
        let label_path = dest.label_path(&self.stem);

        fs::copy(&self.image_path, &image_path)?;
        fs::copy(&self.label_path, &label_path)?;

        Ok(SamplePair {
            stem: self.stem.clone(),
            image_path,
            label_path,
        })
    }
}

/// Result of pairing one split
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Paired records sorted by stem
    pub pairs: Vec<SamplePair>,
    /// Images without a label
    pub unpaired_images: usize,
    /// Labels without an image
    pub unpaired_labels: usize,
    /// Extra images sharing a stem with an already paired image
    pub duplicate_stems: usize,
}

impl ScanReport {
    pub fn skipped(&self) -> usize {
        self.unpaired_images + self.unpaired_labels + self.duplicate_stems
    }
}

fn list_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && keep(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Pairs images and labels of one split by stem
pub fn scan_split(dirs: &SplitDirs) -> Result<ScanReport> {
    if !dirs.images.is_dir() {
        return Err(Error::NotFound(format!(
            "Image directory not found: {}",
            dirs.images.display()
        )));
    }

    let images = list_files(&dirs.images, is_image_file)?;
    let labels: BTreeMap<String, PathBuf> = list_files(&dirs.labels, |p| {
        p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
    })?
    .into_iter()
    .filter_map(|p| file_stem(&p).map(|stem| (stem, p)))
    .collect();

    let mut report = ScanReport::default();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for image_path in images {
        let Some(stem) = file_stem(&image_path) else { continue };
        if seen.contains(&stem) {
            debug!("Duplicate stem {} at {}", stem, image_path.display());
            report.duplicate_stems += 1;
            continue;
        }
        match labels.get(&stem) {
            Some(label_path) => {
                seen.insert(stem.clone());
                report.pairs.push(SamplePair {
                    stem,
                    image_path,
                    label_path: label_path.clone(),
                });
            }
            None => report.unpaired_images += 1,
        }
    }

    report.unpaired_labels = labels.keys().filter(|stem| !seen.contains(*stem)).count();
    report.pairs.sort_by(|a, b| a.stem.cmp(&b.stem));

    if report.skipped() > 0 {
        warn!(
            "{}: {} unpaired images, {} unpaired labels, {} duplicate stems skipped",
            dirs.root.display(),
            report.unpaired_images,
            report.unpaired_labels,
            report.duplicate_stems
        );
    }

    Ok(report)
}

/// A decoded image with its annotations
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub stem: String,
    pub image: RgbImage,
    pub annotations: Vec<Annotation>,
}

impl ImageRecord {
    /// Loads the pixel buffer and decodes the label of a pair
    pub fn load(pair: &SamplePair) -> Result<Self> {
        let image = image::open(&pair.image_path)
            .map_err(|e| {
                Error::Image(format!("Failed to load image {}: {}", pair.image_path.display(), e))
            })?
            .to_rgb8();
        let (width, height) = image.dimensions();
        let annotations = label::read_label_file(&pair.label_path, width, height)?;

        Ok(Self {
            stem: pair.stem.clone(),
            image,
            annotations,
        })
    }

    pub fn size(&self) -> ImageSize {
        let (width, height) = self.image.dimensions();
        ImageSize::new(width, height)
    }

    /// Splits annotations into the boxes of `class_id` and everything else
    pub fn partition(&self, class_id: ClassId) -> (Vec<BoundingBox>, Vec<Annotation>) {
        let mut target = Vec::new();
        let mut others = Vec::new();
        for ann in &self.annotations {
            if ann.class_id == class_id {
                target.push(ann.bbox);
            } else {
                others.push(*ann);
            }
        }
        (target, others)
    }
}
