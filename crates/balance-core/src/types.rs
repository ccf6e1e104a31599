//! Core type definitions shared by the balancing engine.

use serde::{Deserialize, Serialize};

/// Detection class index as written in label files.
pub type ClassId = u32;

/// Axis-aligned rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    /// Creates a new box from its corner coordinates
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// True when every coordinate is finite
    pub fn is_finite(&self) -> bool {
        self.xmin.is_finite() && self.ymin.is_finite() && self.xmax.is_finite() && self.ymax.is_finite()
    }

    /// A box is valid when it is finite with strictly positive extent on both axes
    pub fn is_valid(&self) -> bool {
        self.is_finite() && self.xmax > self.xmin && self.ymax > self.ymin
    }

    /// Clips the box to `[0, width] x [0, height]`.
    ///
    /// Returns `None` when nothing with positive area is left, which also
    /// covers boxes lying entirely outside the image.
    pub fn clipped(&self, width: f64, height: f64) -> Option<Self> {
        if !self.is_finite() {
            return None;
        }
        let clipped = Self {
            xmin: self.xmin.clamp(0.0, width),
            ymin: self.ymin.clamp(0.0, height),
            xmax: self.xmax.clamp(0.0, width),
            ymax: self.ymax.clamp(0.0, height),
        };
        clipped.is_valid().then_some(clipped)
    }

    /// Corner points in clockwise order starting at the top-left
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.xmin, self.ymin),
            (self.xmax, self.ymin),
            (self.xmax, self.ymax),
            (self.xmin, self.ymax),
        ]
    }

    /// Smallest box enclosing all given points
    pub fn enclosing(points: &[(f64, f64)]) -> Self {
        let mut bbox = Self::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &(x, y) in points {
            bbox.xmin = bbox.xmin.min(x);
            bbox.ymin = bbox.ymin.min(y);
            bbox.xmax = bbox.xmax.max(x);
            bbox.ymax = bbox.ymax.max(y);
        }
        bbox
    }
}

/// One class-labeled bounding box within an image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub class_id: ClassId,
    pub bbox: BoundingBox,
}

impl Annotation {
    pub fn new(class_id: ClassId, bbox: BoundingBox) -> Self {
        Self { class_id, bbox }
    }
}

/// Image dimensions in pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Square canonical size used by the resize step of every recipe
    pub fn canonical() -> Self {
        Self::new(640, 640)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Corpus split
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Split {
    /// Training data
    Train,
    /// Validation data
    Validation,
}

impl Split {
    /// Directory name used when writing a corpus
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "val",
        }
    }

    /// Directory names accepted when reading a corpus, in lookup order
    pub fn input_dir_names(&self) -> &'static [&'static str] {
        match self {
            Split::Train => &["train"],
            Split::Validation => &["val", "validation"],
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Validation => write!(f, "validation"),
        }
    }
}
