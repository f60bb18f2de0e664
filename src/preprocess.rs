use ndarray::{Array1, Array4, Axis};

use crate::svhn::SvhnSplit;

// ============================================================
// Preprocessing
// ============================================================
// Raw splits come in as uint8 `[h, w, c, n]` with labels 1..=10.
// Training consumes f32 `[n, h, w, 1]` in [0, 1] with labels
// 0..=9.

/// u8 -> f32, scaled into the unit interval.
pub fn scale_pixels(images: &Array4<u8>) -> Array4<f32> {
    images.mapv(|v| v as f32 / 255.0)
}

/// Label 10 encodes the digit zero; everything else is itself.
pub fn remap_labels(labels: &Array1<u8>) -> Array1<u8> {
    labels.mapv(|y| if y == 10 { 0 } else { y })
}

/// Mean over the channel axis, keeping it at extent 1. A
/// single-channel tensor passes through unchanged.
pub fn grayscale(images: &Array4<f32>) -> Array4<f32> {
    assert!(
        images.shape()[2] > 0,
        "grayscale needs at least one channel"
    );
    images.mean_axis(Axis(2)).unwrap().insert_axis(Axis(2))
}

/// `[h, w, c, n]` -> `[n, h, w, c]`.
pub fn samples_to_front(images: Array4<f32>) -> Array4<f32> {
    images.permuted_axes([3, 0, 1, 2])
}

/// The whole chain: scale, grayscale, reorder axes, remap labels.
pub fn preprocess(split: &SvhnSplit) -> (Array4<f32>, Array1<u8>) {
    let scaled = scale_pixels(&split.images);
    let gray = grayscale(&scaled);
    let images = samples_to_front(gray);
    let labels = remap_labels(&split.labels);
    log::debug!(
        "preprocessed {} samples to {:?}",
        labels.len(),
        images.shape()
    );
    (images, labels)
}
