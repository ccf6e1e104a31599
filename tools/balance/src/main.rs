//! Class-balancing tool for detection corpora.
//!
//! This tool provides three operations:
//! - Per-class distribution analysis of a split
//! - Augmentation of under-represented classes
//! - Downsampling of over-represented classes

use anyhow::{Context, Result};
use balance_core::{
    load_config, setup_cli_logging, BalanceConfig, DownsampleConfig, RetentionRule, Split,
    DEFAULT_CLASS_NAMES,
};
use balance_dataset::{analyze_split, run_augmentation, run_downsampling, TransformExecutor};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "balance")]
#[command(about = "Class balancing for detection datasets", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SplitArg {
    Train,
    Val,
}

impl From<SplitArg> for Split {
    fn from(arg: SplitArg) -> Self {
        match arg {
            SplitArg::Train => Split::Train,
            SplitArg::Val => Split::Validation,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the per-class distribution of a split
    Analyze {
        /// Corpus root containing train/ and val/
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Split to analyze
        #[arg(short, long, value_enum, default_value = "train")]
        split: SplitArg,

        /// Output file for statistics (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Synthesize samples until every class reaches the target
    Augment {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input corpus root
        #[arg(short, long)]
        input_dir: Option<PathBuf>,

        /// Output corpus root
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Target annotations per class
        #[arg(short, long)]
        target: Option<usize>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Number of parallel workers (default: num_cpus)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Randomly drop images of classes above the target
    Downsample {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input corpus root
        #[arg(short, long)]
        input_dir: Option<PathBuf>,

        /// Output corpus root
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Target images per class
        #[arg(short, long)]
        target: Option<usize>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Keep every image that contains a class at or below target
        #[arg(long)]
        protect_scarce: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_cli_logging(cli.verbose)?;

    match cli.command {
        Commands::Analyze {
            data_dir,
            split,
            output,
        } => analyze_dataset(&data_dir, split.into(), output.as_deref())?,

        Commands::Augment {
            config,
            input_dir,
            output_dir,
            target,
            seed,
            workers,
        } => {
            let mut config: BalanceConfig =
                load_config(config.as_deref()).context("Failed to load configuration")?;
            if let Some(dir) = input_dir {
                config.input_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if let Some(target) = target {
                config.target_per_class = target;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            augment_dataset(&config, workers)?
        }

        Commands::Downsample {
            config,
            input_dir,
            output_dir,
            target,
            seed,
            protect_scarce,
        } => {
            let mut config: DownsampleConfig =
                load_config(config.as_deref()).context("Failed to load configuration")?;
            if let Some(dir) = input_dir {
                config.input_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if let Some(target) = target {
                config.target_per_class = target;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if protect_scarce {
                config.retention_rule = RetentionRule::ProtectScarce;
            }
            downsample_dataset(&config)?
        }
    }

    Ok(())
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn class_name(class_id: u32) -> String {
    DEFAULT_CLASS_NAMES
        .get(class_id as usize)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("class_{class_id}"))
}

/// Analyze the class distribution of one split
fn analyze_dataset(data_dir: &Path, split: Split, output: Option<&Path>) -> Result<()> {
    info!("Analyzing {} split of {:?}", split, data_dir);

    let (scan, analysis) = analyze_split(data_dir, split)
        .with_context(|| format!("Failed to analyze {}", data_dir.display()))?;
    let total = analysis.total_annotations();

    println!("\nClass distribution ({split})\n");
    println!("{:<4} {:<20} {:>12} {:>8} {:>8}", "ID", "Class", "Annotations", "Images", "Share");
    println!("{}", "=".repeat(56));

    for (class_id, count) in &analysis.annotation_histogram {
        let images = analysis.image_histogram.get(class_id).copied().unwrap_or(0);
        println!(
            "{:<4} {:<20} {:>12} {:>8} {:>7.1}%",
            class_id,
            class_name(*class_id),
            count,
            images,
            100.0 * *count as f64 / total.max(1) as f64
        );
    }

    println!("{}", "=".repeat(56));
    println!("{:<25} {:>12} {:>8}", "TOTAL", total, analysis.images_counted);

    println!("\nSummary:");
    println!("  Paired images:       {}", scan.pairs.len());
    println!("  Background images:   {}", analysis.background_images());
    println!("  Unpaired (skipped):  {}", scan.skipped());
    println!("  Unreadable:          {}", analysis.skipped.total());
    match analysis.imbalance_ratio() {
        Some(ratio) => println!("  Imbalance ratio:     {ratio:.2}"),
        None => println!("  Imbalance ratio:     n/a"),
    }

    if let Some(output_path) = output {
        let stats = serde_json::json!({
            "split": split.to_string(),
            "paired_images": scan.pairs.len(),
            "unpaired_images": scan.unpaired_images,
            "unpaired_labels": scan.unpaired_labels,
            "duplicate_stems": scan.duplicate_stems,
            "imbalance_ratio": analysis.imbalance_ratio(),
            "analysis": analysis,
        });

        fs::write(output_path, serde_json::to_string_pretty(&stats)?)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        info!("Statistics saved to {:?}", output_path);
    }

    Ok(())
}

/// Raise deficient classes to the configured target
fn augment_dataset(config: &BalanceConfig, workers: Option<usize>) -> Result<()> {
    if let Some(n) = workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    info!(
        "Balancing {:?} -> {:?} (target {} per class, seed {})",
        config.input_dir, config.output_dir, config.target_per_class, config.seed
    );

    let executor = TransformExecutor::new(
        config.canonical_size,
        config.other_boxes,
        config.attempt_budget(),
    );
    let pb = progress_bar()?;
    let summary = run_augmentation(config, &executor, &pb).context("Augmentation failed")?;

    for synthesis in &summary.syntheses {
        info!(
            "  class {}: {}/{} created in {} attempts",
            synthesis.class_id, synthesis.created, synthesis.needed, synthesis.attempts
        );
    }
    info!("Manifest written to {:?}", summary.manifest_path);
    info!("Report written to {:?}", summary.report_path);
    Ok(())
}

/// Drop images of over-represented classes
fn downsample_dataset(config: &DownsampleConfig) -> Result<()> {
    info!(
        "Downsampling {:?} -> {:?} (target {} per class, rule {})",
        config.input_dir, config.output_dir, config.target_per_class, config.retention_rule
    );

    let pb = progress_bar()?;
    let result = run_downsampling(config, &pb).context("Downsampling failed")?;

    info!(
        "Kept {} images, dropped {}, copied {} validation images",
        result.summary.kept, result.summary.dropped, result.validation_copied
    );
    info!("Report written to {:?}", result.report_path);
    Ok(())
}
