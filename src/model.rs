use crate::znn::{
    ActivationKind, BiasInit, Conv2D, DenseLayer, Layer, MaxPool2D, Network, WeightInit,
};

// ============================================================
// Model builders
// ============================================================

pub const NUM_CLASSES: usize = 10;
pub const NN_UNITS: usize = 64;
pub const MLP_DROPOUT_RATE: f32 = 0.0;
pub const CNN_DROPOUT_RATE: f32 = 0.5;

const CONV1_FILTERS: usize = 8;
const CONV2_FILTERS: usize = 16;
const CONV_KERNEL: usize = 3;
const POOL_SIZE: usize = 3;

fn hidden_dense(num_in: usize, dropout_rate: f32, seed: u64) -> Layer {
    Layer::Dense(DenseLayer::new(
        num_in,
        NN_UNITS,
        ActivationKind::ReLU,
        Some(dropout_rate),
        WeightInit::HeUniform,
        BiasInit::Zero,
        seed,
    ))
}

fn softmax_head(num_in: usize, seed: u64) -> Layer {
    Layer::Dense(DenseLayer::new(
        num_in,
        NUM_CLASSES,
        ActivationKind::Softmax,
        None,
        WeightInit::XavierUniform,
        BiasInit::Zero,
        seed,
    ))
}

/// Flatten, four ReLU blocks of `NN_UNITS` with (inert, rate 0)
/// dropout, softmax head.
pub fn build_mlp(input_shape: (usize, usize, usize)) -> Network {
    let (h, w, c) = input_shape;
    let flat = h * w * c;

    let mut layers = vec![Layer::Flatten { len: flat }];
    let mut num_in = flat;
    let mut seed = 0u64;
    for _ in 0..4 {
        layers.push(hidden_dense(num_in, MLP_DROPOUT_RATE, seed));
        num_in = NN_UNITS;
        seed += 1;
    }
    layers.push(softmax_head(num_in, seed));

    let net = Network::new(flat, layers);
    log::info!("mlp: {}", net.describe());
    net
}

/// Two conv/pool stages, flatten, two ReLU blocks with dropout
/// 0.5, softmax head. For 32x32 input the spatial flow is
/// 32 -> 32 -> 10 -> 10 -> 3, flattening to 144.
pub fn build_cnn(input_shape: (usize, usize, usize)) -> Network {
    let (h, w, c) = input_shape;

    let conv1 = Conv2D::new(
        h,
        w,
        c,
        CONV1_FILTERS,
        CONV_KERNEL,
        WeightInit::HeUniform,
        BiasInit::Zero,
        0,
    );
    let pool1 = MaxPool2D::new(h, w, CONV1_FILTERS, POOL_SIZE);
    let (h1, w1) = (pool1.out_h, pool1.out_w);
    let conv2 = Conv2D::new(
        h1,
        w1,
        CONV1_FILTERS,
        CONV2_FILTERS,
        CONV_KERNEL,
        WeightInit::HeUniform,
        BiasInit::Zero,
        1,
    );
    let pool2 = MaxPool2D::new(h1, w1, CONV2_FILTERS, POOL_SIZE);
    let flat = pool2.out_h * pool2.out_w * CONV2_FILTERS;

    let layers = vec![
        Layer::Conv2D(conv1),
        Layer::MaxPool2D(pool1),
        Layer::Conv2D(conv2),
        Layer::MaxPool2D(pool2),
        Layer::Flatten { len: flat },
        hidden_dense(flat, CNN_DROPOUT_RATE, 2),
        hidden_dense(NN_UNITS, CNN_DROPOUT_RATE, 3),
        softmax_head(NN_UNITS, 4),
    ];

    let net = Network::new(h * w * c, layers);
    log::info!("cnn: {}", net.describe());
    net
}
