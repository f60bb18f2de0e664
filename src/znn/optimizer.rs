// ============================
// Optimizer
// ============================

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Adam with the stock hyperparameters. Moment buffers are
/// allocated on first sight of each parameter tensor, so the
/// caller must pass tensors in a stable order every step.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    t: u64,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Default for Adam {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }
}

impl Adam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestep(&self) -> u64 {
        self.t
    }

    /// One update over every `(parameter, gradient)` tensor pair.
    pub fn step(&mut self, params: Vec<(&mut [f32], &[f32])>) {
        self.t += 1;
        let bias_c1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_c2 = 1.0 - self.beta2.powi(self.t as i32);

        for (idx, (param, grad)) in params.into_iter().enumerate() {
            assert_eq!(
                param.len(),
                grad.len(),
                "parameter/gradient length mismatch at tensor {}",
                idx
            );
            if self.m.len() <= idx {
                self.m.push(vec![0.0; param.len()]);
                self.v.push(vec![0.0; param.len()]);
            }
            let m = &mut self.m[idx];
            let v = &mut self.v[idx];
            assert_eq!(m.len(), param.len(), "tensor {} changed size", idx);

            for i in 0..param.len() {
                let g = grad[i];
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
                let m_hat = m[i] / bias_c1;
                let v_hat = v[i] / bias_c2;
                param[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        }
    }
}
