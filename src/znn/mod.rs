// ============================
// Neural Network Substrate
// ============================
// From-scratch CPU layers, losses, init schemes and Adam. The
// training loop lives in `crate::training`; this module only
// knows how to push single samples forward and backward.

pub mod activation;
pub mod conv;
pub mod cost;
pub mod dense;
pub mod init;
pub mod network;
pub mod optimizer;

pub use activation::ActivationKind;
pub use conv::{Conv2D, MaxPool2D};
pub use dense::DenseLayer;
pub use init::{BiasInit, WeightInit};
pub use network::{Layer, Network};
pub use optimizer::Adam;
