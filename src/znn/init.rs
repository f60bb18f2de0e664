// ============================
// Weight Initialization
// ============================

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Default)]
pub enum WeightInit {
    Zero,
    #[default]
    HeUniform, // ReLU layers
    HeNormal,
    XavierUniform, // softmax / sigmoid-ish heads
    XavierNormal,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Default)]
pub enum BiasInit {
    #[default]
    Zero,
    ZeroPointZeroOne,
}

enum SamplerKind {
    Zero,
    Uniform { limit: f32 },
    Gaussian(Normal<f32>),
}

/// Distribution parameters precalculated once per layer.
pub struct WeightSampler {
    kind: SamplerKind,
}

impl WeightInit {
    pub fn sampler(self, fan_in: usize, fan_out: usize) -> WeightSampler {
        assert!(fan_in > 0, "fan_in must be > 0");
        assert!(fan_out > 0, "fan_out must be > 0");
        let fan_in = fan_in as f32;
        let fan_out = fan_out as f32;

        let kind = match self {
            WeightInit::Zero => SamplerKind::Zero,
            WeightInit::HeUniform => SamplerKind::Uniform {
                limit: (6.0 / fan_in).sqrt(),
            },
            WeightInit::HeNormal => SamplerKind::Gaussian(
                Normal::new(0.0, (2.0 / fan_in).sqrt()).unwrap(),
            ),
            WeightInit::XavierUniform => SamplerKind::Uniform {
                limit: (6.0 / (fan_in + fan_out)).sqrt(),
            },
            WeightInit::XavierNormal => SamplerKind::Gaussian(
                Normal::new(0.0, (2.0 / (fan_in + fan_out)).sqrt()).unwrap(),
            ),
        };
        WeightSampler { kind }
    }
}

impl WeightSampler {
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> f32 {
        match &self.kind {
            SamplerKind::Zero => 0.0,
            SamplerKind::Uniform { limit } => rng.gen_range(-limit..*limit),
            SamplerKind::Gaussian(normal) => normal.sample(rng),
        }
    }
}

impl BiasInit {
    pub fn sample(self) -> f32 {
        match self {
            BiasInit::Zero => 0.0,
            BiasInit::ZeroPointZeroOne => 0.01,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(init: WeightInit, fan_in: usize, fan_out: usize, n: usize, seed: u64) -> Vec<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sampler = init.sampler(fan_in, fan_out);
        (0..n).map(|_| sampler.sample(&mut rng)).collect()
    }

    #[test]
    fn he_uniform_respects_limit() {
        let limit = (6.0f32 / 24.0).sqrt();
        let samples = draw(WeightInit::HeUniform, 24, 10, 4000, 7);
        assert!(samples.iter().all(|w| w.abs() < limit));
        // both halves of the range get hit
        assert!(samples.iter().any(|&w| w > limit * 0.5));
        assert!(samples.iter().any(|&w| w < -limit * 0.5));
    }

    #[test]
    fn he_normal_centers_on_zero() {
        let samples = draw(WeightInit::HeNormal, 50, 10, 8000, 11);
        let mean: f32 = samples.iter().sum::<f32>() / samples.len() as f32;
        assert!(mean.abs() < 0.02, "mean was {}", mean);
    }

    #[test]
    fn zero_init_is_all_zero() {
        let samples = draw(WeightInit::Zero, 8, 8, 16, 3);
        assert!(samples.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn same_seed_same_weights() {
        let a = draw(WeightInit::XavierUniform, 16, 16, 64, 42);
        let b = draw(WeightInit::XavierUniform, 16, 16, 64, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn bias_init_values() {
        assert_eq!(BiasInit::Zero.sample(), 0.0);
        assert_eq!(BiasInit::ZeroPointZeroOne.sample(), 0.01);
    }
}
