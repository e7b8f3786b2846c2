//! Xavier-uniform weight initialization from an explicit seed.

use rand::distributions::{Distribution, Uniform};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};
use crate::planner::{MemoryPlan, ParamBuffer};

/// Half-width `sqrt(6 / (fan_in + fan_out))` of the Xavier-uniform range.
pub fn xavier_limit(fan_in: usize, fan_out: usize) -> Result<f32> {
    let fans = fan_in + fan_out;
    if fans == 0 {
        return Err(Error::EmptyInput("xavier initialization"));
    }
    Ok((6.0 / fans as f64).sqrt() as f32)
}

/// Fills `values` with independent draws from `U[-L, L]`.
pub fn xavier_uniform<R: Rng + ?Sized>(
    values: &mut [f32],
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Result<()> {
    let limit = xavier_limit(fan_in, fan_out)?;
    let distribution = Uniform::new_inclusive(-limit, limit);
    for value in values.iter_mut() {
        *value = distribution.sample(rng);
    }
    Ok(())
}

/// Seeded initializer shared by every buffer of a plan.
///
/// One generator is threaded through all buffers in connection order, so
/// layers draw different weights while the whole network stays reproducible
/// from the seed.
#[derive(Debug, Clone)]
pub struct Initializer {
    seed: u64,
    rng: ChaCha8Rng,
}

impl Initializer {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn fill(&mut self, buffer: &mut ParamBuffer) -> Result<()> {
        let params = buffer.param_shape();
        xavier_uniform(
            buffer.weights_mut(),
            params.fan_in,
            params.fan_out,
            &mut self.rng,
        )
    }

    pub fn fill_plan(&mut self, plan: &mut MemoryPlan) -> Result<()> {
        for buffer in plan.buffers_mut() {
            self.fill(buffer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn draw(seed: u64, fan_in: usize, fan_out: usize) -> Vec<f32> {
        let mut values = vec![0.0; fan_in * fan_out];
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        xavier_uniform(&mut values, fan_in, fan_out, &mut rng).unwrap();
        values
    }

    #[test]
    fn limit_matches_formula() {
        let limit = xavier_limit(25, 30).unwrap();
        assert!((limit - (6.0f32 / 55.0).sqrt()).abs() < 1e-6);
        assert!(xavier_limit(0, 0).is_err());
    }

    #[test]
    fn same_seed_is_bit_identical() {
        assert_eq!(draw(7, 12, 9), draw(7, 12, 9));
    }

    #[test]
    fn different_seeds_differ() {
        assert_ne!(draw(1, 16, 16), draw(2, 16, 16));
    }

    #[test]
    fn successive_buffers_are_not_correlated() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut first = vec![0.0; 32];
        let mut second = vec![0.0; 32];
        xavier_uniform(&mut first, 4, 8, &mut rng).unwrap();
        xavier_uniform(&mut second, 4, 8, &mut rng).unwrap();
        assert_ne!(first, second);
    }

    proptest! {
        #[test]
        fn values_stay_in_range(seed in any::<u64>(), fan_in in 1usize..64, fan_out in 1usize..64) {
            let limit = xavier_limit(fan_in, fan_out).unwrap();
            for value in draw(seed, fan_in, fan_out) {
                prop_assert!(value >= -limit && value <= limit);
            }
        }
    }
}
