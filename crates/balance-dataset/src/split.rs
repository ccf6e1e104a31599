//! Validation carve-out for corpora shipped without a validation split.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::corpus::SamplePair;

/// Train pairs split into the part kept for training and the carved validation part
#[derive(Debug, Clone, Default)]
pub struct Carve {
    pub train: Vec<SamplePair>,
    pub validation: Vec<SamplePair>,
}

/// Number of pairs routed to validation: `max(1, floor(n * ratio))`, capped at `n - 1`.
///
/// Splits with fewer than two pairs are left whole.
pub fn validation_count(total: usize, ratio: f32) -> usize {
    if total < 2 {
        return 0;
    }
    ((total as f64 * ratio as f64).floor() as usize).clamp(1, total - 1)
}

/// Randomly moves a `ratio` share of `pairs` into a validation set.
///
/// Both halves come back in stem order.
pub fn carve_validation(pairs: &[SamplePair], ratio: f32, seed: u64) -> Carve {
    let count = validation_count(pairs.len(), ratio);
    let mut shuffled = pairs.to_vec();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let mut validation = shuffled.split_off(shuffled.len() - count);
    let mut train = shuffled;
    train.sort_by(|a, b| a.stem.cmp(&b.stem));
    validation.sort_by(|a, b| a.stem.cmp(&b.stem));

    Carve { train, validation }
}
