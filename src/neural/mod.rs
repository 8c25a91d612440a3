//! Reference convolutional network.
//!
//! A small CPU implementation of a VGG-style feature extractor that
//! satisfies [`crate::evaluator::Network`]:
//! - 3x3 convolution + ReLU and 2x2 max pooling layers
//! - weights loaded from `.npz` archives or seeded for smoke runs
//! - backward pass to the input image only

pub mod architecture;
pub mod layer;
pub mod network;

pub use architecture::{Architecture, LayerSpec};
pub use layer::{Conv2d, MaxPool2d};
pub use network::{ConvNet, Layer};
