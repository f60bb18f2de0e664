pub mod error;
pub mod mat;
pub mod model;
pub mod preprocess;
pub mod svhn;
pub mod training;
pub mod znn;

pub use error::{Result, ZError};
