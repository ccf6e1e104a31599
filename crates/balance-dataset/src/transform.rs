//! Box-consistent image transforms.
//!
//! Geometric steps move the pixel buffer and every tracked box together.
//! Photometric steps only touch pixels. After the last step boxes are
//! clipped to the image and empty ones are dropped.

use balance_core::{Annotation, BoundingBox, ImageSize, OtherBoxPolicy};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::tier::{TransformOp, TransformStep};

/// Reasons a single transform attempt is discarded
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformFailure {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("non-finite box coordinate after {0}")]
    NumericError(String),

    #[error("no target box survived the transform")]
    NoTargetBoxes,

    #[error("attempt exceeded its budget after {elapsed_ms} ms")]
    BudgetExceeded { elapsed_ms: u64 },
}

/// Image and boxes produced by a successful transform
#[derive(Debug, Clone)]
pub struct TransformedSample {
    pub image: RgbImage,
    pub target_boxes: Vec<BoundingBox>,
    pub other_boxes: Vec<Annotation>,
}

impl TransformedSample {
    pub fn size(&self) -> ImageSize {
        let (width, height) = self.image.dimensions();
        ImageSize::new(width, height)
    }
}

/// Result of one transform attempt
#[derive(Debug, Clone)]
pub enum TransformOutcome {
    Success(TransformedSample),
    Failure(TransformFailure),
}

impl TransformOutcome {
    pub fn into_result(self) -> std::result::Result<TransformedSample, TransformFailure> {
        match self {
            TransformOutcome::Success(sample) => Ok(sample),
            TransformOutcome::Failure(failure) => Err(failure),
        }
    }
}

/// Applies a recipe to an image and its boxes
pub trait BoxAugmenter: Send + Sync {
    fn apply(
        &self,
        image: &RgbImage,
        target_boxes: &[BoundingBox],
        other_boxes: &[Annotation],
        recipe: &[TransformStep],
        rng: &mut ChaCha8Rng,
    ) -> TransformOutcome;
}

/// The image-backed augmenter
#[derive(Debug, Clone)]
pub struct TransformExecutor {
    canonical_size: ImageSize,
    other_boxes: OtherBoxPolicy,
    budget: Option<Duration>,
}

impl TransformExecutor {
    pub fn new(canonical_size: ImageSize, other_boxes: OtherBoxPolicy, budget: Option<Duration>) -> Self {
        Self {
            canonical_size,
            other_boxes,
            budget,
        }
    }

    fn check_budget(&self, started: Instant) -> Result<(), TransformFailure> {
        match self.budget {
            Some(budget) if started.elapsed() > budget => Err(TransformFailure::BudgetExceeded {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            _ => Ok(()),
        }
    }

    fn run(
        &self,
        image: &RgbImage,
        target_boxes: &[BoundingBox],
        other_boxes: &[Annotation],
        recipe: &[TransformStep],
        rng: &mut ChaCha8Rng,
    ) -> Result<TransformedSample, TransformFailure> {
        let started = Instant::now();
        let mut work = Working {
            image: image.clone(),
            target: target_boxes.to_vec(),
            others: other_boxes.to_vec(),
            move_others: self.other_boxes == OtherBoxPolicy::Transform,
        };
        work.ensure_not_empty()?;

        for step in recipe {
            if rng.gen::<f64>() >= step.probability {
                continue;
            }
            work.apply(&step.op, self.canonical_size, rng)?;
            self.check_budget(started)?;
        }

        work.finish()
    }
}

impl Default for TransformExecutor {
    fn default() -> Self {
        Self::new(ImageSize::canonical(), OtherBoxPolicy::default(), None)
    }
}

impl BoxAugmenter for TransformExecutor {
    fn apply(
        &self,
        image: &RgbImage,
        target_boxes: &[BoundingBox],
        other_boxes: &[Annotation],
        recipe: &[TransformStep],
        rng: &mut ChaCha8Rng,
    ) -> TransformOutcome {
        match self.run(image, target_boxes, other_boxes, recipe, rng) {
            Ok(sample) => TransformOutcome::Success(sample),
            Err(failure) => TransformOutcome::Failure(failure),
        }
    }
}

/// Mutable state threaded through the steps of one attempt
struct Working {
    image: RgbImage,
    target: Vec<BoundingBox>,
    others: Vec<Annotation>,
    move_others: bool,
}

impl Working {
    fn dims(&self) -> (f64, f64) {
        let (w, h) = self.image.dimensions();
        (w as f64, h as f64)
    }

    fn ensure_not_empty(&self) -> Result<(), TransformFailure> {
        let (w, h) = self.image.dimensions();
        if w == 0 || h == 0 {
            return Err(TransformFailure::InvalidGeometry(format!("empty image {w}x{h}")));
        }
        Ok(())
    }

    fn map_boxes(&mut self, f: impl Fn(&BoundingBox) -> BoundingBox) {
        for bbox in &mut self.target {
            *bbox = f(bbox);
        }
        if self.move_others {
            for ann in &mut self.others {
                ann.bbox = f(&ann.bbox);
            }
        }
    }

    fn apply(&mut self, op: &TransformOp, canonical: ImageSize, rng: &mut ChaCha8Rng) -> Result<(), TransformFailure> {
        match *op {
            TransformOp::Resize => self.resize(canonical)?,
            TransformOp::HorizontalFlip => self.hflip(),
            TransformOp::VerticalFlip => self.vflip(),
            TransformOp::RandomRotate90 => {
                let k = rng.gen_range(0..4u8);
                self.rotate90(k);
            }
            TransformOp::ShiftScaleRotate {
                shift_limit,
                scale_limit,
                rotate_limit,
            } => {
                let dx = rng.gen_range(-shift_limit..=shift_limit);
                let dy = rng.gen_range(-shift_limit..=shift_limit);
                let scale = 1.0 + rng.gen_range(-scale_limit..=scale_limit);
                let angle = rng.gen_range(-rotate_limit..=rotate_limit);
                self.shift_scale_rotate(dx, dy, scale, angle)?;
            }
            TransformOp::BrightnessContrast {
                brightness_limit,
                contrast_limit,
            } => {
                let alpha = 1.0 + rng.gen_range(-contrast_limit..=contrast_limit);
                let beta = rng.gen_range(-brightness_limit..=brightness_limit);
                brightness_contrast(&mut self.image, alpha, beta);
            }
            TransformOp::HueSaturationValue {
                hue_shift,
                sat_shift,
                val_shift,
            } => {
                let dh = rng.gen_range(-hue_shift..=hue_shift);
                let ds = rng.gen_range(-sat_shift..=sat_shift);
                let dv = rng.gen_range(-val_shift..=val_shift);
                shift_hsv(&mut self.image, dh, ds, dv);
            }
            TransformOp::Blur { blur_limit } => {
                let kernels: Vec<u32> = (3..=blur_limit.max(3)).step_by(2).collect();
                let kernel = kernels[rng.gen_range(0..kernels.len())];
                self.image = imageops::blur(&self.image, kernel_sigma(kernel));
            }
            TransformOp::Clahe { clip_limit, tile_grid } => {
                clahe_luma(&mut self.image, clip_limit, tile_grid);
            }
        }

        if op.is_geometric() {
            self.ensure_finite(op)?;
        }
        Ok(())
    }

    fn ensure_finite(&self, op: &TransformOp) -> Result<(), TransformFailure> {
        let finite = self.target.iter().all(BoundingBox::is_finite)
            && self.others.iter().all(|a| a.bbox.is_finite());
        if finite {
            Ok(())
        } else {
            Err(TransformFailure::NumericError(format!("{op:?}")))
        }
    }

    fn resize(&mut self, size: ImageSize) -> Result<(), TransformFailure> {
        if size.is_empty() {
            return Err(TransformFailure::InvalidGeometry(format!("resize to {size}")));
        }
        let (w, h) = self.dims();
        let sx = size.width as f64 / w;
        let sy = size.height as f64 / h;
        self.image = imageops::resize(&self.image, size.width, size.height, FilterType::Triangle);
        self.map_boxes(|b| BoundingBox::new(b.xmin * sx, b.ymin * sy, b.xmax * sx, b.ymax * sy));
        Ok(())
    }

    fn hflip(&mut self) {
        let (w, _) = self.dims();
        self.image = imageops::flip_horizontal(&self.image);
        self.map_boxes(|b| BoundingBox::new(w - b.xmax, b.ymin, w - b.xmin, b.ymax));
    }

    fn vflip(&mut self) {
        let (_, h) = self.dims();
        self.image = imageops::flip_vertical(&self.image);
        self.map_boxes(|b| BoundingBox::new(b.xmin, h - b.ymax, b.xmax, h - b.ymin));
    }

    /// Rotates clockwise by `k` quarter turns
    fn rotate90(&mut self, k: u8) {
        let (w, h) = self.dims();
        match k % 4 {
            1 => {
                self.image = imageops::rotate90(&self.image);
                self.map_boxes(|b| BoundingBox::new(h - b.ymax, b.xmin, h - b.ymin, b.xmax));
            }
            2 => {
                self.image = imageops::rotate180(&self.image);
                self.map_boxes(|b| BoundingBox::new(w - b.xmax, h - b.ymax, w - b.xmin, h - b.ymin));
            }
            3 => {
                self.image = imageops::rotate270(&self.image);
                self.map_boxes(|b| BoundingBox::new(b.ymin, w - b.xmax, b.ymax, w - b.xmin));
            }
            _ => {}
        }
    }

    /// Affine warp about the image center, keeping the canvas size
    fn shift_scale_rotate(&mut self, dx: f64, dy: f64, scale: f64, angle_deg: f64) -> Result<(), TransformFailure> {
        let (w, h) = self.dims();
        let affine = Affine::about_center(w / 2.0, h / 2.0, dx * w, dy * h, scale, angle_deg);
        if !affine.is_invertible() {
            return Err(TransformFailure::InvalidGeometry(format!(
                "singular affine (scale {scale:.4}, angle {angle_deg:.2})"
            )));
        }
        let projection = Projection::from_matrix(affine.to_matrix())
            .ok_or_else(|| TransformFailure::InvalidGeometry("non-invertible projection".to_string()))?;

        self.image = warp(&self.image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]));
        self.map_boxes(|b| {
            let corners = b.corners().map(|(x, y)| affine.apply(x, y));
            BoundingBox::enclosing(&corners)
        });
        Ok(())
    }

    /// Clips every box to the final canvas and drops empty ones
    fn finish(self) -> Result<TransformedSample, TransformFailure> {
        self.ensure_not_empty()?;
        let (w, h) = self.dims();

        let target_boxes: Vec<BoundingBox> = self.target.iter().filter_map(|b| b.clipped(w, h)).collect();
        if target_boxes.is_empty() {
            return Err(TransformFailure::NoTargetBoxes);
        }
        let other_boxes = self
            .others
            .iter()
            .filter_map(|a| a.bbox.clipped(w, h).map(|bbox| Annotation::new(a.class_id, bbox)))
            .collect();

        Ok(TransformedSample {
            image: self.image,
            target_boxes,
            other_boxes,
        })
    }
}

/// 2x3 forward affine map in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
struct Affine {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Affine {
    /// Rotation and uniform scale about `(cx, cy)` followed by a `(tx, ty)` shift
    fn about_center(cx: f64, cy: f64, tx: f64, ty: f64, scale: f64, angle_deg: f64) -> Self {
        let theta = angle_deg.to_radians();
        let cos = scale * theta.cos();
        let sin = scale * theta.sin();
        Self {
            a: cos,
            b: -sin,
            c: cx + tx - cos * cx + sin * cy,
            d: sin,
            e: cos,
            f: cy + ty - sin * cx - cos * cy,
        }
    }

    fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > 1e-10 && [self.c, self.f].iter().all(|v| v.is_finite())
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x + self.b * y + self.c, self.d * x + self.e * y + self.f)
    }

    fn to_matrix(self) -> [f32; 9] {
        [
            self.a as f32,
            self.b as f32,
            self.c as f32,
            self.d as f32,
            self.e as f32,
            self.f as f32,
            0.0,
            0.0,
            1.0,
        ]
    }
}

/// Gaussian sigma matching a box kernel of size `kernel`
pub fn kernel_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// `x * alpha + beta * 255`, saturating
pub fn brightness_contrast(image: &mut RgbImage, alpha: f32, beta: f32) {
    let offset = beta * 255.0;
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as f32 * alpha + offset).round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max <= f32::EPSILON { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let hp = h.rem_euclid(360.0) / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    (r + m, g + m, b + m)
}

/// Shifts hue (half-degree units), saturation and value (0..255 units)
pub fn shift_hsv(image: &mut RgbImage, hue_shift: i32, sat_shift: i32, val_shift: i32) {
    if hue_shift == 0 && sat_shift == 0 && val_shift == 0 {
        return;
    }
    let dh = hue_shift as f32 * 2.0;
    let ds = sat_shift as f32 / 255.0;
    let dv = val_shift as f32 / 255.0;

    for pixel in image.pixels_mut() {
        let [r, g, b] = pixel.0.map(|c| c as f32 / 255.0);
        let (h, s, v) = rgb_to_hsv(r, g, b);
        let (r, g, b) = hsv_to_rgb(h + dh, (s + ds).clamp(0.0, 1.0), (v + dv).clamp(0.0, 1.0));
        pixel.0 = [r, g, b].map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8);
    }
}

/// Clipped, cumulative lookup table for one tile histogram
fn clahe_lut(histogram: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (value, bin) in histogram.iter().enumerate() {
        cumulative += bin;
        lut[value] = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// CLAHE applied to the luma channel of a YCbCr view of the image
pub fn clahe_luma(image: &mut RgbImage, clip_limit: f32, tile_grid: u32) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let grid = tile_grid.max(1);
    let tile_w = width.div_ceil(grid).max(1);
    let tile_h = height.div_ceil(grid).max(1);
    let tiles_x = width.div_ceil(tile_w) as usize;
    let tiles_y = height.div_ceil(tile_h) as usize;

    let mut luma = Vec::with_capacity((width * height) as usize);
    let mut chroma = Vec::with_capacity((width * height) as usize);
    for pixel in image.pixels() {
        let [r, g, b] = pixel.0.map(f32::from);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        luma.push(y.round().clamp(0.0, 255.0) as u8);
        chroma.push((
            128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b,
            128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b,
        ));
    }

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx as u32 * tile_w;
            let y0 = ty as u32 * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[luma[(y * width + x) as usize] as usize] += 1;
                }
            }
            luts[ty * tiles_x + tx] = clahe_lut(&mut histogram, (x1 - x0) * (y1 - y0), clip_limit);
        }
    }

    // Bilinear blend between the four nearest tile centers.
    let neighbours = |pos: u32, tile: u32, count: usize| {
        let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let lo = f.floor();
        let weight = f - lo;
        let clamp = |i: f32| (i.max(0.0) as usize).min(count - 1);
        (clamp(lo), clamp(lo + 1.0), weight)
    };

    for (idx, pixel) in image.pixels_mut().enumerate() {
        let x = idx as u32 % width;
        let y = idx as u32 / width;
        let (tx0, tx1, ax) = neighbours(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = neighbours(y, tile_h, tiles_y);
        let v = luma[idx] as usize;

        let top = luts[ty0 * tiles_x + tx0][v] as f32 * (1.0 - ax) + luts[ty0 * tiles_x + tx1][v] as f32 * ax;
        let bottom = luts[ty1 * tiles_x + tx0][v] as f32 * (1.0 - ax) + luts[ty1 * tiles_x + tx1][v] as f32 * ax;
        let y_eq = top * (1.0 - ay) + bottom * ay;

        let (cb, cr) = chroma[idx];
        let r = y_eq + 1.402 * (cr - 128.0);
        let g = y_eq - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0);
        let b = y_eq + 1.772 * (cb - 128.0);
        pixel.0 = [r, g, b].map(|c| c.round().clamp(0.0, 255.0) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::{AugmentationTier, HEAVY_RECIPE};
    use rand::SeedableRng;

    fn step(op: TransformOp) -> TransformStep {
        TransformStep { op, probability: 1.0 }
    }

    fn marked_image(width: u32, height: u32, mark: (u32, u32)) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        img.put_pixel(mark.0, mark.1, Rgb([255, 0, 0]));
        img
    }

    fn find_mark(img: &RgbImage) -> (u32, u32) {
        img.enumerate_pixels()
            .find(|(_, _, p)| p.0 == [255, 0, 0])
            .map(|(x, y, _)| (x, y))
            .unwrap()
    }

    fn contains(bbox: &BoundingBox, (x, y): (u32, u32)) -> bool {
        let (cx, cy) = (x as f64 + 0.5, y as f64 + 0.5);
        cx > bbox.xmin && cx < bbox.xmax && cy > bbox.ymin && cy < bbox.ymax
    }

    fn working(img: RgbImage, target: BoundingBox) -> Working {
        Working {
            image: img,
            target: vec![target],
            others: Vec::new(),
            move_others: true,
        }
    }

    #[test]
    fn test_hflip_moves_box_with_pixels() {
        let bbox = BoundingBox::new(10.0, 5.0, 30.0, 20.0);
        let mut work = working(marked_image(100, 50, (15, 10)), bbox);
        work.hflip();
        assert_eq!(work.target[0], BoundingBox::new(70.0, 5.0, 90.0, 20.0));
        assert!(contains(&work.target[0], find_mark(&work.image)));
    }

    #[test]
    fn test_vflip_moves_box_with_pixels() {
        let bbox = BoundingBox::new(10.0, 5.0, 30.0, 20.0);
        let mut work = working(marked_image(100, 50, (15, 10)), bbox);
        work.vflip();
        assert_eq!(work.target[0], BoundingBox::new(10.0, 30.0, 30.0, 45.0));
        assert!(contains(&work.target[0], find_mark(&work.image)));
    }

    #[test]
    fn test_rotate90_quarter_turns() {
        let bbox = BoundingBox::new(10.0, 5.0, 30.0, 20.0);
        for k in 0..4u8 {
            let mut work = working(marked_image(100, 50, (15, 10)), bbox);
            work.rotate90(k);
            let (w, h) = work.image.dimensions();
            if k % 2 == 1 {
                assert_eq!((w, h), (50, 100));
            } else {
                assert_eq!((w, h), (100, 50));
            }
            let mark = find_mark(&work.image);
            assert!(contains(&work.target[0], mark), "k={k} box {:?} mark {:?}", work.target[0], mark);
        }
    }

    #[test]
    fn test_rotate90_box_coordinates() {
        let bbox = BoundingBox::new(10.0, 5.0, 30.0, 20.0);
        let mut work = working(RgbImage::new(100, 50), bbox);
        work.rotate90(1);
        assert_eq!(work.target[0], BoundingBox::new(30.0, 10.0, 45.0, 30.0));

        let mut work = working(RgbImage::new(100, 50), bbox);
        work.rotate90(3);
        assert_eq!(work.target[0], BoundingBox::new(5.0, 70.0, 20.0, 90.0));
    }

    #[test]
    fn test_resize_scales_boxes() {
        let bbox = BoundingBox::new(10.0, 10.0, 20.0, 40.0);
        let mut work = working(RgbImage::new(100, 50), bbox);
        work.resize(ImageSize::new(50, 100)).unwrap();
        assert_eq!(work.image.dimensions(), (50, 100));
        assert_eq!(work.target[0], BoundingBox::new(5.0, 20.0, 10.0, 80.0));
    }

    #[test]
    fn test_identity_affine_keeps_boxes() {
        let bbox = BoundingBox::new(10.0, 10.0, 20.0, 40.0);
        let mut work = working(RgbImage::new(64, 64), bbox);
        work.shift_scale_rotate(0.0, 0.0, 1.0, 0.0).unwrap();
        let b = work.target[0];
        assert!((b.xmin - 10.0).abs() < 1e-9 && (b.ymax - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_affine_warp_moves_pixels_with_boxes() {
        let (w, h) = (200u32, 100u32);
        let mut img = RgbImage::new(w, h);
        for y in 20..50 {
            for x in 40..80 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let bbox = BoundingBox::new(40.0, 20.0, 80.0, 50.0);

        for (dx, dy, scale, angle) in [
            (0.2, 0.0, 1.0, 0.0),
            (0.1, 0.1, 1.2, 35.0),
            (-0.05, 0.05, 1.2, -40.0),
            (0.1, -0.1, 1.1, 30.0),
        ] {
            let mut work = working(img.clone(), bbox);
            work.shift_scale_rotate(dx, dy, scale, angle).unwrap();

            let lit: Vec<(u32, u32)> = work
                .image
                .enumerate_pixels()
                .filter(|(_, _, p)| p.0[0] > 127)
                .map(|(x, y, _)| (x, y))
                .collect();
            assert!(!lit.is_empty());
            let xmin = lit.iter().map(|p| p.0).min().unwrap() as f64;
            let ymin = lit.iter().map(|p| p.1).min().unwrap() as f64;
            let xmax = lit.iter().map(|p| p.0).max().unwrap() as f64 + 1.0;
            let ymax = lit.iter().map(|p| p.1).max().unwrap() as f64 + 1.0;

            let b = work.target[0].clipped(w as f64, h as f64).unwrap();
            let tolerance = 2.5;
            assert!((b.xmin - xmin).abs() <= tolerance, "xmin {} vs {xmin} at {angle}", b.xmin);
            assert!((b.ymin - ymin).abs() <= tolerance, "ymin {} vs {ymin} at {angle}", b.ymin);
            assert!((b.xmax - xmax).abs() <= tolerance, "xmax {} vs {xmax} at {angle}", b.xmax);
            assert!((b.ymax - ymax).abs() <= tolerance, "ymax {} vs {ymax} at {angle}", b.ymax);
        }
    }

    #[test]
    fn test_affine_rotation_envelope() {
        // 90 degrees about the center of a square maps the box onto its rotated footprint
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 20.0);
        let mut work = working(RgbImage::new(100, 100), bbox);
        work.shift_scale_rotate(0.0, 0.0, 1.0, 90.0).unwrap();
        let b = work.target[0];
        assert!((b.xmin - 80.0).abs() < 1e-6);
        assert!((b.xmax - 100.0).abs() < 1e-6);
        assert!((b.ymin - 0.0).abs() < 1e-6);
        assert!((b.ymax - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_singular_affine_is_invalid_geometry() {
        let bbox = BoundingBox::new(10.0, 10.0, 20.0, 40.0);
        let mut work = working(RgbImage::new(64, 64), bbox);
        let result = work.shift_scale_rotate(0.0, 0.0, 0.0, 10.0);
        assert!(matches!(result, Err(TransformFailure::InvalidGeometry(_))));
    }

    #[test]
    fn test_finish_drops_outside_boxes() {
        let mut work = working(RgbImage::new(50, 50), BoundingBox::new(60.0, 60.0, 70.0, 70.0));
        assert!(matches!(work.finish(), Err(TransformFailure::NoTargetBoxes)));

        work = working(RgbImage::new(50, 50), BoundingBox::new(-10.0, 40.0, 20.0, 70.0));
        work.others.push(Annotation::new(4, BoundingBox::new(100.0, 0.0, 120.0, 10.0)));
        let sample = work.finish().unwrap();
        assert_eq!(sample.target_boxes, vec![BoundingBox::new(0.0, 40.0, 20.0, 50.0)]);
        assert!(sample.other_boxes.is_empty());
    }

    #[test]
    fn test_heavy_recipe_yields_valid_boxes() {
        let executor = TransformExecutor::new(ImageSize::new(64, 64), OtherBoxPolicy::Transform, None);
        let image = RgbImage::from_fn(80, 60, |x, y| Rgb([(x * 3) as u8, (y * 4) as u8, 128]));
        let target = [BoundingBox::new(20.0, 15.0, 60.0, 45.0)];
        let others = [Annotation::new(1, BoundingBox::new(0.0, 0.0, 10.0, 10.0))];

        let mut successes = 0;
        for seed in 0..25 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            match executor.apply(&image, &target, &others, &HEAVY_RECIPE, &mut rng) {
                TransformOutcome::Success(sample) => {
                    successes += 1;
                    assert_eq!(sample.size(), ImageSize::new(64, 64));
                    let boxes = sample
                        .target_boxes
                        .iter()
                        .chain(sample.other_boxes.iter().map(|a| &a.bbox));
                    for b in boxes {
                        assert!(b.is_valid());
                        assert!(b.xmin >= 0.0 && b.ymin >= 0.0);
                        assert!(b.xmax <= 64.0 && b.ymax <= 64.0);
                    }
                }
                TransformOutcome::Failure(failure) => {
                    assert_eq!(failure, TransformFailure::NoTargetBoxes);
                }
            }
        }
        assert!(successes > 0);
    }

    #[test]
    fn test_same_seed_same_output() {
        let executor = TransformExecutor::new(ImageSize::new(32, 32), OtherBoxPolicy::Transform, None);
        let image = RgbImage::from_fn(40, 40, |x, y| Rgb([(x * 6) as u8, (y * 6) as u8, 0]));
        let target = [BoundingBox::new(5.0, 5.0, 35.0, 35.0)];
        let recipe = AugmentationTier::Moderate.recipe();

        let a = executor.apply(&image, &target, &[], recipe, &mut ChaCha8Rng::seed_from_u64(9));
        let b = executor.apply(&image, &target, &[], recipe, &mut ChaCha8Rng::seed_from_u64(9));
        match (a, b) {
            (TransformOutcome::Success(a), TransformOutcome::Success(b)) => {
                assert_eq!(a.target_boxes, b.target_boxes);
                assert_eq!(a.image, b.image);
            }
            (TransformOutcome::Failure(a), TransformOutcome::Failure(b)) => assert_eq!(a, b),
            _ => panic!("outcomes diverged for the same seed"),
        }
    }

    #[test]
    fn test_pass_through_keeps_other_boxes() {
        let executor = TransformExecutor::new(ImageSize::new(100, 50), OtherBoxPolicy::PassThrough, None);
        let image = RgbImage::new(100, 50);
        let target = [BoundingBox::new(10.0, 5.0, 30.0, 20.0)];
        let others = [Annotation::new(2, BoundingBox::new(50.0, 10.0, 60.0, 20.0))];
        let recipe = [step(TransformOp::Resize), step(TransformOp::HorizontalFlip)];

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let sample = executor
            .apply(&image, &target, &others, &recipe, &mut rng)
            .into_result()
            .unwrap();
        assert_eq!(sample.target_boxes[0], BoundingBox::new(70.0, 5.0, 90.0, 20.0));
        assert_eq!(sample.other_boxes[0], others[0]);
    }

    #[test]
    fn test_budget_exceeded() {
        let executor = TransformExecutor::new(ImageSize::new(64, 64), OtherBoxPolicy::Transform, Some(Duration::ZERO));
        let image = RgbImage::new(64, 64);
        let target = [BoundingBox::new(1.0, 1.0, 30.0, 30.0)];
        let recipe = [step(TransformOp::Clahe {
            clip_limit: 4.0,
            tile_grid: 8,
        })];
        let outcome = executor.apply(&image, &target, &[], &recipe, &mut ChaCha8Rng::seed_from_u64(0));
        assert!(matches!(
            outcome,
            TransformOutcome::Failure(TransformFailure::BudgetExceeded { .. })
        ));
    }

    #[test]
    fn test_empty_image_is_invalid_geometry() {
        let executor = TransformExecutor::default();
        let outcome = executor.apply(
            &RgbImage::new(0, 0),
            &[BoundingBox::new(0.0, 0.0, 1.0, 1.0)],
            &[],
            &[],
            &mut ChaCha8Rng::seed_from_u64(0),
        );
        assert!(matches!(outcome, TransformOutcome::Failure(TransformFailure::InvalidGeometry(_))));
    }

    #[test]
    fn test_brightness_contrast() {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([100, 200, 0]));
        brightness_contrast(&mut img, 1.0, 0.0);
        assert_eq!(img.get_pixel(0, 0).0, [100, 200, 0]);

        brightness_contrast(&mut img, 1.5, 0.1);
        assert_eq!(img.get_pixel(1, 1).0, [176, 255, 26]);
    }

    #[test]
    fn test_hsv_round_trip_and_hue_shift() {
        let mut img = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 77]));
        let original = img.clone();
        shift_hsv(&mut img, 0, 0, 0);
        assert_eq!(img, original);

        // 60 half-degrees = 120 degrees: pure red becomes pure green
        let mut red = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        shift_hsv(&mut red, 60, 0, 0);
        assert_eq!(red.get_pixel(0, 0).0, [0, 255, 0]);
    }

    #[test]
    fn test_kernel_sigma() {
        assert!((kernel_sigma(3) - 0.8).abs() < 1e-6);
        assert!((kernel_sigma(5) - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_clahe_keeps_gray_neutral() {
        let mut img = RgbImage::from_fn(64, 48, |x, y| {
            let v = (60 + (x + y) % 40) as u8;
            Rgb([v, v, v])
        });
        clahe_luma(&mut img, 4.0, 8);
        assert_eq!(img.dimensions(), (64, 48));
        for p in img.pixels() {
            let [r, g, b] = p.0;
            assert!(r.abs_diff(g) <= 1 && g.abs_diff(b) <= 1);
        }
    }

    #[test]
    fn test_clahe_lut_is_monotonic() {
        let mut histogram = [0u32; 256];
        histogram[10] = 500;
        histogram[200] = 12;
        let lut = clahe_lut(&mut histogram, 512, 4.0);
        assert!(lut.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(lut[255], 255);
    }
}
