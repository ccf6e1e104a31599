//! Human-readable run reports.

use balance_core::{ClassId, Result};
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::downsample::DownsampleSummary;
use crate::statistics::ClassHistogram;
use crate::synthesize::ClassSynthesis;

pub const BALANCING_REPORT_FILE: &str = "balancing_report.txt";
pub const DOWNSAMPLING_REPORT_FILE: &str = "downsampling_report.txt";

/// Before/after class distribution of a run plus its per-class outcome
#[derive(Debug, Clone)]
pub struct RunReport<'a> {
    pub title: &'a str,
    pub class_names: &'a [String],
    /// What the histograms count, e.g. "annotations" or "images"
    pub unit: &'a str,
    pub original: &'a ClassHistogram,
    pub resulting: &'a ClassHistogram,
    pub syntheses: &'a [ClassSynthesis],
    pub downsample: Option<&'a DownsampleSummary>,
}

impl RunReport<'_> {
    fn class_name(&self, class_id: ClassId) -> String {
        self.class_names
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    pub fn render(&self) -> String {
        self.render_at(Local::now())
    }

    pub fn render_at(&self, timestamp: DateTime<Local>) -> String {
        let mut out = String::new();
        let rule = "=".repeat(60);

        let _ = writeln!(out, "{}", self.title);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Generated: {}", timestamp.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out);

        let classes: BTreeSet<ClassId> = self.original.keys().chain(self.resulting.keys()).copied().collect();
        let _ = writeln!(out, "Class distribution ({})", self.unit);
        let _ = writeln!(out, "{:<4} {:<20} {:>10} {:>10} {:>8}", "ID", "Name", "Before", "After", "Change");
        for class_id in &classes {
            let before = self.original.get(class_id).copied().unwrap_or(0);
            let after = self.resulting.get(class_id).copied().unwrap_or(0);
            let _ = writeln!(
                out,
                "{:<4} {:<20} {:>10} {:>10} {:>+8}",
                class_id,
                self.class_name(*class_id),
                before,
                after,
                after as i64 - before as i64
            );
        }
        let total_before: usize = self.original.values().sum();
        let total_after: usize = self.resulting.values().sum();
        let _ = writeln!(out, "{:<25} {:>10} {:>10}", "Total", total_before, total_after);

        if !self.syntheses.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Synthesis");
            let _ = writeln!(out, "{:<4} {:<20} {:>9} {:>8} {:>8} {:>9}", "ID", "Name", "Tier", "Needed", "Created", "Attempts");
            for s in self.syntheses {
                let tier = s.tier.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
                let _ = writeln!(
                    out,
                    "{:<4} {:<20} {:>9} {:>8} {:>8} {:>9}",
                    s.class_id,
                    self.class_name(s.class_id),
                    tier,
                    s.needed,
                    s.created,
                    s.attempts
                );
            }
        }

        if let Some(summary) = self.downsample {
            let _ = writeln!(out);
            let _ = writeln!(out, "Downsampling: kept {} images, dropped {}", summary.kept, summary.dropped);
            for (class_id, seen) in &summary.seen_per_class {
                let kept = summary.kept_per_class.get(class_id).copied().unwrap_or(0);
                let _ = writeln!(
                    out,
                    "  {:<4} {:<20} {:>6}/{:<6} ({:.1}%)",
                    class_id,
                    self.class_name(*class_id),
                    kept,
                    seen,
                    100.0 * kept as f64 / (*seen).max(1) as f64
                );
            }
        }

        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }
}
