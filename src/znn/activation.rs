// ============================
// Activation Functions
// ============================

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum_macros::Display;
#[cfg(feature = "simd")]
use wide::{f32x8, CmpGt};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
pub enum ActivationKind {
    #[default]
    ReLU,
    Softmax,
}

impl ActivationKind {
    pub fn activate(&self, x: f32) -> f32 {
        match self {
            ActivationKind::ReLU => relu(x),
            ActivationKind::Softmax => {
                unreachable!("Softmax needs full vector context, use apply_softmax()")
            }
        }
    }

    #[cfg(feature = "simd")]
    pub fn activate_simd(&self, x: f32x8) -> f32x8 {
        match self {
            ActivationKind::ReLU => relu_simd(x),
            ActivationKind::Softmax => {
                unreachable!("Softmax needs full vector context, use apply_softmax()")
            }
        }
    }

    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationKind::ReLU => relu_d(x),
            ActivationKind::Softmax => {
                unreachable!("Softmax derivative needs vector context")
            }
        }
    }

    #[cfg(feature = "simd")]
    pub fn derivative_simd(&self, x: f32x8) -> f32x8 {
        match self {
            ActivationKind::ReLU => relu_d_simd(x),
            ActivationKind::Softmax => {
                unreachable!("Softmax derivative needs vector context")
            }
        }
    }
}

/// Applies the full vector through a layer's activation. Softmax
/// is the one kind that cannot go element-wise.
pub fn apply_activation(values: &[f32], kind: ActivationKind) -> Vec<f32> {
    match kind {
        ActivationKind::Softmax => apply_softmax(values),
        _ => activate_elementwise(values, kind),
    }
}

#[cfg(not(feature = "simd"))]
fn activate_elementwise(values: &[f32], kind: ActivationKind) -> Vec<f32> {
    values.iter().map(|&x| kind.activate(x)).collect()
}

#[cfg(feature = "simd")]
fn activate_elementwise(values: &[f32], kind: ActivationKind) -> Vec<f32> {
    const CHUNK_SIZE: usize = 8;

    let mut result = Vec::with_capacity(values.len());
    let chunks = values.chunks_exact(CHUNK_SIZE);
    let remainder = chunks.remainder();

    for chunk in chunks {
        let activated = kind.activate_simd(f32x8::from(chunk));
        let out: [f32; CHUNK_SIZE] = activated.into();
        result.extend_from_slice(&out);
    }
    for &x in remainder {
        result.push(kind.activate(x));
    }
    result
}

#[cfg(feature = "simd")]
pub fn apply_softmax(layer_values: &[f32]) -> Vec<f32> {
    const CHUNK_SIZE: usize = 8;

    let max_val = layer_values
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);

    let mut exps = Vec::with_capacity(layer_values.len());
    let mut sum = 0.0f64;

    let chunks = layer_values.chunks_exact(CHUNK_SIZE);
    let remainder = chunks.remainder();
    for chunk in chunks {
        let e = (f32x8::from(chunk) - f32x8::splat(max_val)).exp();
        let arr: [f32; CHUNK_SIZE] = e.into();
        for val in arr {
            sum += val as f64;
        }
        exps.extend_from_slice(&arr);
    }
    for &val in remainder {
        let e = (val - max_val).exp();
        sum += e as f64;
        exps.push(e);
    }

    let sum = sum as f32;
    for e in &mut exps {
        *e /= sum;
    }
    exps
}

#[cfg(not(feature = "simd"))]
pub fn apply_softmax(layer_values: &[f32]) -> Vec<f32> {
    let max_val = layer_values
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    let sum: f64 = layer_values
        .iter()
        .map(|&v| (v - max_val).exp() as f64)
        .sum();

    layer_values
        .iter()
        .map(|&v| ((v - max_val).exp() as f64 / sum) as f32)
        .collect()
}

fn relu(in_value: f32) -> f32 {
    in_value.max(0.0)
}

#[cfg(feature = "simd")]
fn relu_simd(in_value: f32x8) -> f32x8 {
    in_value.max(f32x8::splat(0.0))
}

fn relu_d(in_value: f32) -> f32 {
    if in_value > 0.0 {
        1.0
    } else {
        0.0
    }
}

#[cfg(feature = "simd")]
fn relu_d_simd(x: f32x8) -> f32x8 {
    x.cmp_gt(f32x8::splat(0.0))
        .blend(f32x8::splat(1.0), f32x8::splat(0.0))
}
