// ============================
// Network
// ============================

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::znn::conv::{Conv2D, MaxPool2D};
use crate::znn::dense::DenseLayer;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub enum Layer {
    Dense(DenseLayer),
    Conv2D(Conv2D),
    MaxPool2D(MaxPool2D),
    Flatten { len: usize },
}

impl Layer {
    pub fn input_len(&self) -> usize {
        match self {
            Layer::Dense(l) => l.num_in,
            Layer::Conv2D(l) => l.input_len(),
            Layer::MaxPool2D(l) => l.input_len(),
            Layer::Flatten { len } => *len,
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            Layer::Dense(l) => l.num_out,
            Layer::Conv2D(l) => l.output_len(),
            Layer::MaxPool2D(l) => l.output_len(),
            Layer::Flatten { len } => *len,
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            Layer::Dense(l) => l.num_params(),
            Layer::Conv2D(l) => l.num_params(),
            _ => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Dense(_) => "dense",
            Layer::Conv2D(_) => "conv2d",
            Layer::MaxPool2D(_) => "max_pool2d",
            Layer::Flatten { .. } => "flatten",
        }
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        match self {
            Layer::Dense(l) => l.forward(input),
            Layer::Conv2D(l) => l.forward(input),
            Layer::MaxPool2D(l) => l.forward(input),
            Layer::Flatten { len } => {
                assert_eq!(input.len(), *len, "flatten length mismatch");
                input.to_vec()
            }
        }
    }

    fn forward_train(&mut self, input: &[f32]) -> Vec<f32> {
        match self {
            Layer::Dense(l) => l.forward_train(input),
            Layer::Conv2D(l) => l.forward_train(input),
            Layer::MaxPool2D(l) => l.forward_train(input),
            Layer::Flatten { len } => {
                assert_eq!(input.len(), *len, "flatten length mismatch");
                input.to_vec()
            }
        }
    }

    fn backward(&mut self, d_out: &[f32]) -> Vec<f32> {
        match self {
            Layer::Dense(l) => l.backward(d_out),
            Layer::Conv2D(l) => l.backward(d_out),
            Layer::MaxPool2D(l) => l.backward(d_out),
            Layer::Flatten { .. } => d_out.to_vec(),
        }
    }
}

/// An ordered stack of layers trained as one unit. Gradients
/// accumulate inside the layers; the trainer scales them and
/// hands the parameter views to the optimizer.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct Network {
    pub layers: Vec<Layer>,
    pub num_inputs: usize,
}

impl Network {
    pub fn new(num_inputs: usize, layers: Vec<Layer>) -> Self {
        assert!(!layers.is_empty(), "network needs at least one layer");
        let mut expected = num_inputs;
        for (i, layer) in layers.iter().enumerate() {
            assert_eq!(
                layer.input_len(),
                expected,
                "layer {} ({}) expects {} inputs, previous produces {}",
                i,
                layer.name(),
                layer.input_len(),
                expected
            );
            expected = layer.output_len();
        }
        Self { layers, num_inputs }
    }

    pub fn num_outputs(&self) -> usize {
        self.layers.last().map(Layer::output_len).unwrap_or(0)
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(Layer::num_params).sum()
    }

    /// One line per layer, for the startup log.
    pub fn describe(&self) -> String {
        let stages: Vec<String> = self
            .layers
            .iter()
            .map(|l| format!("{}({})", l.name(), l.output_len()))
            .collect();
        format!(
            "{} -> {} [{} params]",
            self.num_inputs,
            stages.join(" -> "),
            self.num_params()
        )
    }

    /// Inference pass: no dropout, no caches touched.
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        assert_eq!(input.len(), self.num_inputs, "network input length mismatch");
        let mut acc = self.layers[0].forward(input);
        for layer in &self.layers[1..] {
            acc = layer.forward(&acc);
        }
        acc
    }

    /// Training pass: layers cache what backward needs and apply
    /// their dropout masks.
    pub fn forward_train(&mut self, input: &[f32]) -> Vec<f32> {
        assert_eq!(input.len(), self.num_inputs, "network input length mismatch");
        let mut acc = input.to_vec();
        for layer in &mut self.layers {
            acc = layer.forward_train(&acc);
        }
        acc
    }

    /// Walks the stack in reverse from dL/d(output), accumulating
    /// parameter gradients along the way.
    pub fn backward(&mut self, d_output: Vec<f32>) {
        let mut acc = d_output;
        for layer in self.layers.iter_mut().rev() {
            acc = layer.backward(&acc);
        }
    }

    pub fn zero_gradients(&mut self) {
        for layer in &mut self.layers {
            match layer {
                Layer::Dense(l) => l.zero_gradients(),
                Layer::Conv2D(l) => l.zero_gradients(),
                _ => {}
            }
        }
    }

    pub fn scale_gradients(&mut self, factor: f32) {
        for layer in &mut self.layers {
            match layer {
                Layer::Dense(l) => l.scale_gradients(factor),
                Layer::Conv2D(l) => l.scale_gradients(factor),
                _ => {}
            }
        }
    }

    /// Every `(parameter, gradient)` tensor pair in layer order,
    /// stable across calls.
    pub fn parameters_mut(&mut self) -> Vec<(&mut [f32], &[f32])> {
        let mut params = Vec::new();
        for layer in &mut self.layers {
            match layer {
                Layer::Dense(l) => params.extend(l.parameters_mut()),
                Layer::Conv2D(l) => params.extend(l.parameters_mut()),
                _ => {}
            }
        }
        params
    }
}
