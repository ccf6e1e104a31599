//! Label codec for per-image detection label files.
//!
//! Each line holds `<class_id> <x_center> <y_center> <width> <height>` in
//! normalized `[0, 1]` units. Values are clamped before conversion so that
//! out-of-range inputs never turn into boxes larger than the image.

use balance_core::{Annotation, BoundingBox, ClassId, Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Smallest normalized width/height a record may carry
pub const MIN_EXTENT: f64 = 0.001;

/// One normalized label line after clamping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelRecord {
    pub class_id: ClassId,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl LabelRecord {
    /// Converts the record to a pixel rectangle, `None` if it has no area
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> Option<BoundingBox> {
        let w = image_width as f64;
        let h = image_height as f64;
        let bbox = BoundingBox::new(
            (self.x_center - self.width / 2.0).max(0.0) * w,
            (self.y_center - self.height / 2.0).max(0.0) * h,
            (self.x_center + self.width / 2.0).min(1.0) * w,
            (self.y_center + self.height / 2.0).min(1.0) * h,
        );
        bbox.is_valid().then_some(bbox)
    }
}

fn parse_line(line: &str) -> Option<LabelRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }

    let mut values = [0.0f64; 5];
    for (slot, field) in values.iter_mut().zip(&fields) {
        let value: f64 = field.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        *slot = value;
    }

    // Class ids are sometimes written as floats ("3.0").
    let class_id = values[0].trunc();
    if class_id < 0.0 || class_id > ClassId::MAX as f64 {
        return None;
    }

    Some(LabelRecord {
        class_id: class_id as ClassId,
        x_center: values[1].clamp(0.0, 1.0),
        y_center: values[2].clamp(0.0, 1.0),
        width: values[3].clamp(MIN_EXTENT, 1.0),
        height: values[4].clamp(MIN_EXTENT, 1.0),
    })
}

/// Parses label text into clamped normalized records.
///
/// Blank lines, lines with fewer than five fields and lines with
/// unparsable numbers are skipped.
pub fn parse_records(text: &str) -> Vec<LabelRecord> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| {
            let record = parse_line(line);
            if record.is_none() {
                debug!("Skipping malformed label line {}: {:?}", idx + 1, line);
            }
            record
        })
        .collect()
}

/// Decodes label text into pixel-space annotations for an image of the given size
pub fn decode(text: &str, image_width: u32, image_height: u32) -> Vec<Annotation> {
    parse_records(text)
        .into_iter()
        .filter_map(|record| {
            record
                .to_pixels(image_width, image_height)
                .map(|bbox| Annotation::new(record.class_id, bbox))
        })
        .collect()
}

/// Encodes pixel-space annotations as label text with 6-decimal precision
pub fn encode(annotations: &[Annotation], image_width: u32, image_height: u32) -> String {
    let w = image_width as f64;
    let h = image_height as f64;
    let mut out = String::with_capacity(annotations.len() * 40);

    for ann in annotations {
        let b = &ann.bbox;
        let x_center = (((b.xmin + b.xmax) / 2.0) / w).clamp(0.0, 1.0);
        let y_center = (((b.ymin + b.ymax) / 2.0) / h).clamp(0.0, 1.0);
        let width = (b.width() / w).clamp(MIN_EXTENT, 1.0);
        let height = (b.height() / h).clamp(MIN_EXTENT, 1.0);

        let _ = writeln!(
            out,
            "{} {:.6} {:.6} {:.6} {:.6}",
            ann.class_id, x_center, y_center, width, height
        );
    }

    out
}

/// Reads and decodes a label file
pub fn read_label_file(path: &Path, image_width: u32, image_height: u32) -> Result<Vec<Annotation>> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Dataset(format!("Failed to read label {}: {}", path.display(), e)))?;
    Ok(decode(&text, image_width, image_height))
}

/// Encodes and writes a label file
pub fn write_label_file(
    path: &Path,
    annotations: &[Annotation],
    image_width: u32,
    image_height: u32,
) -> Result<()> {
    fs::write(path, encode(annotations, image_width, image_height))?;
    Ok(())
}
