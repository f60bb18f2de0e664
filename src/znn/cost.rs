// ============================
// Cost Functions
// ============================

// Keeps ln() off exact zeros.
const EPSILON: f32 = 1e-12;

/// Sparse categorical cross-entropy over softmax probabilities
/// for a single sample: `-ln(p[class])`.
pub fn sparse_cross_entropy(probs: &[f32], class: usize) -> f32 {
    assert!(
        class < probs.len(),
        "class {} out of range for {} outputs",
        class,
        probs.len()
    );
    -probs[class].max(EPSILON).ln()
}

/// Gradient of the sparse cross-entropy with respect to the
/// softmax *logits*: `p - onehot(class)`. The softmax Jacobian is
/// already folded in, so the output layer must not apply its
/// activation derivative on top.
pub fn softmax_cross_entropy_grad(probs: &[f32], class: usize) -> Vec<f32> {
    assert!(
        class < probs.len(),
        "class {} out of range for {} outputs",
        class,
        probs.len()
    );
    let mut grad = probs.to_vec();
    grad[class] -= 1.0;
    grad
}
