//! Class-balancing engine for detection corpora.
//!
//! This crate provides label IO, corpus pairing, per-class statistics,
//! box-consistent augmentation and stochastic downsampling, plus the
//! end-to-end runs built from them.

pub mod corpus;
pub mod downsample;
pub mod label;
pub mod manifest;
pub mod pipeline;
pub mod report;
pub mod split;
pub mod statistics;
pub mod synthesize;
pub mod tier;
pub mod transform;

pub use corpus::{ImageRecord, SamplePair, ScanReport, SplitDirs};
pub use downsample::{DownsampleSummary, Downsampler, RetentionPlan};
pub use manifest::DatasetManifest;
pub use pipeline::{analyze_split, run_augmentation, run_downsampling, BalanceSummary, DownsampleRunSummary};
pub use statistics::{analyze, ClassHistogram, DistributionAnalysis};
pub use synthesize::{ClassSynthesis, FailureCounts, Synthesizer};
pub use tier::{select_tier, AugmentationPlan, AugmentationTier, ClassPlan, TransformOp, TransformStep};
pub use transform::{BoxAugmenter, TransformExecutor, TransformFailure, TransformOutcome, TransformedSample};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::corpus::*;
    pub use crate::downsample::*;
    pub use crate::pipeline::*;
    pub use crate::statistics::*;
    pub use crate::synthesize::*;
    pub use crate::tier::*;
    pub use crate::transform::*;
}
