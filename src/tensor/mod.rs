//! Image tensors with explicit layout tracking and the elementwise operations
//! the optimizer is built from.

pub mod image_tensor;
pub mod operations;

pub use image_tensor::{ImageTensor, Layout, TensorStatistics};
pub use operations::{normalize_rms, weighted_sum};
