use super::backend::Field;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Poisson};

const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// The noise generator for one frame.
///
/// With a base seed, every frame gets its own stream derived from `(seed, index)`, so the
/// noise a frame receives does not depend on which worker ran it or in which order.
pub fn frame_rng(seed: Option<u64>, index: usize) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed ^ (index as u64).wrapping_mul(SEED_STRIDE)),
        None => SmallRng::from_entropy(),
    }
}

/// Replaces each pixel of the ideal image by a Poisson count with mean `rate * ideal`.
///
/// `None` returns the field unchanged. Pixels whose mean is not positive become zero;
/// non-finite means are left as they are.
pub fn apply_shot_noise(ideal: Field, electrons_per_pixel: Option<f64>, rng: &mut SmallRng) -> Field {
    let Some(rate) = electrons_per_pixel else {
        return ideal;
    };
    ideal.map(|value| {
        let mean = rate * value;
        if !mean.is_finite() {
            return mean;
        }
        match Poisson::new(mean) {
            Ok(poisson) => poisson.sample(rng),
            Err(_) => 0.0,
        }
    })
}
