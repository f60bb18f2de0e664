// ============================
// Convolution + Pooling
// ============================

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::znn::activation::{apply_activation, ActivationKind};
use crate::znn::init::{BiasInit, WeightInit};

/// 2-d convolution over channels-last rows: inputs and outputs
/// are flat `[h][w][c]`, weights flat `[kh][kw][in_c][out_c]`.
/// Stride 1 with zero-padded `same` borders, so spatial extents
/// pass through unchanged.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct Conv2D {
    pub in_h: usize,
    pub in_w: usize,
    pub in_c: usize,
    pub out_c: usize,
    pub kernel: usize,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
    pub weight_grads: Vec<f32>,
    pub bias_grads: Vec<f32>,
    pub activation: ActivationKind,
    // per-sample training caches
    inputs: Vec<f32>,
    weighted: Vec<f32>,
}

impl Conv2D {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_h: usize,
        in_w: usize,
        in_c: usize,
        out_c: usize,
        kernel: usize,
        weight_init: WeightInit,
        bias_init: BiasInit,
        seed: u64,
    ) -> Self {
        assert!(in_h > 0 && in_w > 0 && in_c > 0, "empty input shape");
        assert!(out_c > 0, "out_c must be > 0");
        assert!(kernel % 2 == 1, "same padding expects an odd kernel");

        let fan_in = kernel * kernel * in_c;
        let fan_out = kernel * kernel * out_c;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sampler = weight_init.sampler(fan_in, fan_out);
        let weights = (0..fan_in * out_c).map(|_| sampler.sample(&mut rng)).collect();

        Self {
            in_h,
            in_w,
            in_c,
            out_c,
            kernel,
            weights,
            biases: vec![bias_init.sample(); out_c],
            weight_grads: vec![0.0; fan_in * out_c],
            bias_grads: vec![0.0; out_c],
            activation: ActivationKind::ReLU,
            inputs: vec![0.0; in_h * in_w * in_c],
            weighted: vec![0.0; in_h * in_w * out_c],
        }
    }

    pub fn input_len(&self) -> usize {
        self.in_h * self.in_w * self.in_c
    }

    pub fn output_len(&self) -> usize {
        self.in_h * self.in_w * self.out_c
    }

    fn weight_index(&self, kh: usize, kw: usize, ic: usize, oc: usize) -> usize {
        ((kh * self.kernel + kw) * self.in_c + ic) * self.out_c + oc
    }

    fn compute_weighted(&self, inputs: &[f32], out_buf: &mut [f32]) {
        assert_eq!(inputs.len(), self.input_len(), "conv input length mismatch");
        assert_eq!(out_buf.len(), self.output_len());

        let (in_h, in_w, in_c, out_c, k) = (self.in_h, self.in_w, self.in_c, self.out_c, self.kernel);
        let pad = (k - 1) / 2;

        out_buf
            .par_chunks_mut(in_w * out_c)
            .enumerate()
            .for_each(|(oh, row)| {
                for ow in 0..in_w {
                    for oc in 0..out_c {
                        let mut acc = self.biases[oc];
                        for kh in 0..k {
                            let ih = oh as isize + kh as isize - pad as isize;
                            if ih < 0 || ih >= in_h as isize {
                                continue;
                            }
                            for kw in 0..k {
                                let iw = ow as isize + kw as isize - pad as isize;
                                if iw < 0 || iw >= in_w as isize {
                                    continue;
                                }
                                let in_base = (ih as usize * in_w + iw as usize) * in_c;
                                for ic in 0..in_c {
                                    acc += inputs[in_base + ic]
                                        * self.weights[self.weight_index(kh, kw, ic, oc)];
                                }
                            }
                        }
                        row[ow * out_c + oc] = acc;
                    }
                }
            });
    }

    pub fn forward(&self, inputs: &[f32]) -> Vec<f32> {
        let mut weighted = vec![0.0; self.output_len()];
        self.compute_weighted(inputs, &mut weighted);
        apply_activation(&weighted, self.activation)
    }

    pub fn forward_train(&mut self, inputs: &[f32]) -> Vec<f32> {
        self.inputs.clone_from_slice(inputs);
        let mut weighted = vec![0.0; self.output_len()];
        self.compute_weighted(inputs, &mut weighted);
        self.weighted.clone_from_slice(&weighted);
        apply_activation(&weighted, self.activation)
    }

    /// Accumulates weight/bias gradients from dL/d(output) and
    /// returns dL/d(input) by scattering through the kernel.
    pub fn backward(&mut self, d_out: &[f32]) -> Vec<f32> {
        assert_eq!(d_out.len(), self.output_len(), "gradient length mismatch");

        let mut node_values = d_out.to_vec();
        for (nv, &z) in node_values.iter_mut().zip(&self.weighted) {
            *nv *= self.activation.derivative(z);
        }

        let (in_h, in_w, in_c, out_c, k) = (self.in_h, self.in_w, self.in_c, self.out_c, self.kernel);
        let pad = (k - 1) / 2;
        let mut d_in = vec![0.0; self.input_len()];

        for oh in 0..in_h {
            for ow in 0..in_w {
                for oc in 0..out_c {
                    let nv = node_values[(oh * in_w + ow) * out_c + oc];
                    if nv == 0.0 {
                        continue;
                    }
                    self.bias_grads[oc] += nv;
                    for kh in 0..k {
                        let ih = oh as isize + kh as isize - pad as isize;
                        if ih < 0 || ih >= in_h as isize {
                            continue;
                        }
                        for kw in 0..k {
                            let iw = ow as isize + kw as isize - pad as isize;
                            if iw < 0 || iw >= in_w as isize {
                                continue;
                            }
                            let in_base = (ih as usize * in_w + iw as usize) * in_c;
                            for ic in 0..in_c {
                                let widx = ((kh * k + kw) * in_c + ic) * out_c + oc;
                                self.weight_grads[widx] += self.inputs[in_base + ic] * nv;
                                d_in[in_base + ic] += self.weights[widx] * nv;
                            }
                        }
                    }
                }
            }
        }
        d_in
    }

    pub fn zero_gradients(&mut self) {
        self.weight_grads.fill(0.0);
        self.bias_grads.fill(0.0);
    }

    pub fn scale_gradients(&mut self, factor: f32) {
        for g in &mut self.weight_grads {
            *g *= factor;
        }
        for g in &mut self.bias_grads {
            *g *= factor;
        }
    }

    pub fn parameters_mut(&mut self) -> Vec<(&mut [f32], &[f32])> {
        vec![
            (self.weights.as_mut_slice(), self.weight_grads.as_slice()),
            (self.biases.as_mut_slice(), self.bias_grads.as_slice()),
        ]
    }

    pub fn num_params(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

/// Max pooling with stride equal to the window and valid borders:
/// output extent per axis is `(in - pool) / pool + 1`, leftover
/// rows and columns are ignored.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct MaxPool2D {
    pub in_h: usize,
    pub in_w: usize,
    pub channels: usize,
    pub pool: usize,
    pub out_h: usize,
    pub out_w: usize,
    // flat input index of each output cell's max
    max_indices: Vec<usize>,
}

impl MaxPool2D {
    pub fn new(in_h: usize, in_w: usize, channels: usize, pool: usize) -> Self {
        assert!(pool > 0, "pool must be > 0");
        assert!(
            in_h >= pool && in_w >= pool,
            "pool {} does not fit {}x{}",
            pool,
            in_h,
            in_w
        );
        let out_h = (in_h - pool) / pool + 1;
        let out_w = (in_w - pool) / pool + 1;
        Self {
            in_h,
            in_w,
            channels,
            pool,
            out_h,
            out_w,
            max_indices: vec![0; out_h * out_w * channels],
        }
    }

    pub fn input_len(&self) -> usize {
        self.in_h * self.in_w * self.channels
    }

    pub fn output_len(&self) -> usize {
        self.out_h * self.out_w * self.channels
    }

    pub fn forward(&self, inputs: &[f32]) -> Vec<f32> {
        assert_eq!(inputs.len(), self.input_len(), "pool input length mismatch");
        let mut out = vec![0.0; self.output_len()];
        for oh in 0..self.out_h {
            for ow in 0..self.out_w {
                for c in 0..self.channels {
                    let (best, _) = self.window_max(inputs, oh, ow, c);
                    out[(oh * self.out_w + ow) * self.channels + c] = best;
                }
            }
        }
        out
    }

    pub fn forward_train(&mut self, inputs: &[f32]) -> Vec<f32> {
        assert_eq!(inputs.len(), self.input_len(), "pool input length mismatch");
        let mut out = vec![0.0; self.output_len()];
        for oh in 0..self.out_h {
            for ow in 0..self.out_w {
                for c in 0..self.channels {
                    let (best, best_idx) = self.window_max(inputs, oh, ow, c);
                    let out_idx = (oh * self.out_w + ow) * self.channels + c;
                    out[out_idx] = best;
                    self.max_indices[out_idx] = best_idx;
                }
            }
        }
        out
    }

    fn window_max(&self, inputs: &[f32], oh: usize, ow: usize, c: usize) -> (f32, usize) {
        let mut best = f32::NEG_INFINITY;
        let mut best_idx = 0;
        for ph in 0..self.pool {
            for pw in 0..self.pool {
                let ih = oh * self.pool + ph;
                let iw = ow * self.pool + pw;
                let idx = (ih * self.in_w + iw) * self.channels + c;
                if inputs[idx] > best {
                    best = inputs[idx];
                    best_idx = idx;
                }
            }
        }
        (best, best_idx)
    }

    /// Routes each output gradient back to the input cell that
    /// won its window.
    pub fn backward(&mut self, d_out: &[f32]) -> Vec<f32> {
        assert_eq!(d_out.len(), self.output_len(), "gradient length mismatch");
        let mut d_in = vec![0.0; self.input_len()];
        for (out_idx, &g) in d_out.iter().enumerate() {
            d_in[self.max_indices[out_idx]] += g;
        }
        d_in
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(in_h: usize, in_w: usize, in_c: usize, out_c: usize) -> Conv2D {
        Conv2D::new(
            in_h,
            in_w,
            in_c,
            out_c,
            3,
            WeightInit::HeUniform,
            BiasInit::Zero,
            17,
        )
    }

    #[test]
    fn same_padding_keeps_spatial_size() {
        let layer = conv(5, 5, 1, 2);
        let out = layer.forward(&vec![0.5; 25]);
        assert_eq!(out.len(), 5 * 5 * 2);
    }

    #[test]
    fn center_tap_kernel_is_identity() {
        let mut layer = conv(4, 4, 1, 1);
        layer.weights = vec![0.0; 9];
        let center = layer.weight_index(1, 1, 0, 0);
        layer.weights[center] = 1.0;
        layer.biases = vec![0.0];
        let inputs: Vec<f32> = (1..=16).map(|i| i as f32 * 0.1).collect();
        let out = layer.forward(&inputs);
        for (o, i) in out.iter().zip(&inputs) {
            assert!((o - i).abs() < 1e-6);
        }
    }

    #[test]
    fn borders_see_zero_padding() {
        let mut layer = conv(3, 3, 1, 1);
        layer.weights = vec![1.0; 9];
        layer.biases = vec![0.0];
        let out = layer.forward(&vec![1.0; 9]);
        // all-ones kernel over all-ones input counts live neighbors
        assert_eq!(out[4], 9.0); // center
        assert_eq!(out[0], 4.0); // corner
        assert_eq!(out[1], 6.0); // edge
    }

    #[test]
    fn conv_gradients_match_finite_differences() {
        let mut layer = conv(3, 3, 1, 2);
        for (i, w) in layer.weights.iter_mut().enumerate() {
            *w = 0.05 * (1 + i % 5) as f32;
        }
        layer.biases = vec![0.02, 0.03];
        let inputs: Vec<f32> = (0..9).map(|i| 0.2 + 0.05 * (i % 4) as f32).collect();

        let loss = |layer: &Conv2D, inputs: &[f32]| -> f32 {
            layer.forward(inputs).iter().map(|o| o * o).sum()
        };

        layer.zero_gradients();
        let out = layer.forward_train(&inputs);
        let d_out: Vec<f32> = out.iter().map(|o| 2.0 * o).collect();
        let d_in = layer.backward(&d_out);

        let h = 1e-3;
        for widx in 0..layer.weights.len() {
            let mut perturbed = layer.clone();
            perturbed.weights[widx] += h;
            let numeric = (loss(&perturbed, &inputs) - loss(&layer, &inputs)) / h;
            let analytic = layer.weight_grads[widx];
            assert!(
                (numeric - analytic).abs() < 0.05 * analytic.abs().max(1.0),
                "dW[{}] numeric {} vs analytic {}",
                widx,
                numeric,
                analytic
            );
        }
        for j in 0..inputs.len() {
            let mut bumped = inputs.clone();
            bumped[j] += h;
            let numeric = (loss(&layer, &bumped) - loss(&layer, &inputs)) / h;
            assert!(
                (numeric - d_in[j]).abs() < 0.05 * d_in[j].abs().max(1.0),
                "d_in[{}] numeric {} vs analytic {}",
                j,
                numeric,
                d_in[j]
            );
        }
    }

    #[test]
    fn pool_output_extents_floor() {
        assert_eq!(MaxPool2D::new(32, 32, 8, 3).out_h, 10);
        assert_eq!(MaxPool2D::new(10, 10, 16, 3).out_h, 3);
        assert_eq!(MaxPool2D::new(9, 9, 1, 3).out_h, 3);
    }

    #[test]
    fn pool_picks_window_max_and_routes_gradient() {
        let mut layer = MaxPool2D::new(6, 6, 1, 3);
        let mut inputs = vec![0.0f32; 36];
        // one spike per 3x3 window
        inputs[(1 * 6 + 1) * 1] = 5.0; // window (0,0)
        inputs[(0 * 6 + 4) * 1] = 3.0; // window (0,1)
        inputs[(5 * 6 + 2) * 1] = 2.0; // window (1,0)
        inputs[(4 * 6 + 4) * 1] = 7.0; // window (1,1)

        let out = layer.forward_train(&inputs);
        assert_eq!(out, vec![5.0, 3.0, 2.0, 7.0]);

        let d_in = layer.backward(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(d_in[7], 1.0);
        assert_eq!(d_in[4], 2.0);
        assert_eq!(d_in[32], 3.0);
        assert_eq!(d_in[28], 4.0);
        assert_eq!(d_in.iter().filter(|&&g| g != 0.0).count(), 4);
    }

    #[test]
    fn pool_treats_channels_independently() {
        let mut layer = MaxPool2D::new(3, 3, 2, 3);
        let mut inputs = vec![0.0f32; 18];
        inputs[(0 * 3 + 0) * 2] = 4.0; // channel 0 max at (0,0)
        inputs[(2 * 3 + 2) * 2 + 1] = 6.0; // channel 1 max at (2,2)
        let out = layer.forward_train(&inputs);
        assert_eq!(out, vec![4.0, 6.0]);
        let d_in = layer.backward(&[0.5, 0.25]);
        assert_eq!(d_in[0], 0.5);
        assert_eq!(d_in[17], 0.25);
    }
}
