//! # Filter Visualizer
//!
//! Activation-maximization for convolutional network filters. Starting from
//! a noise image, gradient ascent on the pixels raises the mean activation of
//! one filter while a weighted blend of blur, decay and weak-gradient
//! clipping keeps the image coherent.
//!
//! ## Quick Start
//!
//! ```rust
//! use filter_visualizer::{Architecture, ConvNet, LayerId, MemorySink, Visualizer};
//! use filter_visualizer::ascent::GradientAscent;
//! # filter_visualizer::logging::redirect(None);
//!
//! let network = ConvNet::seeded(&Architecture::parse("conv1_1:4,pool1,conv2_1:8").unwrap(), 7);
//! let visualizer = Visualizer::new(GradientAscent::default(), 2, 16);
//!
//! let mut sink = MemorySink::default();
//! let results = visualizer
//!     .run(&network, &LayerId::from("conv2_1"), &[0, 1], &mut sink)
//!     .unwrap();
//! assert_eq!(results.len(), 2);
//! assert_eq!(sink.snapshots, vec![vec![0], vec![0, 1]]);
//! ```
//!
//! ## Core Modules
//!
//! - [`regularize`] - Blur, decay and clip-weak-gradient regularizers
//! - [`ascent`] - One regularized gradient ascent iteration
//! - [`visualize`] - Per-filter iteration driver and batch runner
//! - [`neural`] - Reference VGG-style network with input gradients
//! - [`render`] - Tensor to RGB conversion and contact sheets
//! - [`config`] - Visualizer configuration via TOML
//! - [`logging`] - JSON line-delimited logging

pub mod ascent;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod neural;
pub mod regularize;
pub mod render;
pub mod sink;
pub mod tensor;
pub mod visualize;

pub use ascent::{GradientAscent, StepOutcome};
pub use config::{ConfigError, VisualizerConfig};
pub use error::{Result, VizError};
pub use evaluator::{Evaluation, FilterObjective, LayerId, LossGradient, Network};
pub use neural::{Architecture, ConvNet};
pub use regularize::{Regularization, Regularizer};
pub use sink::{DirectorySink, MemorySink, ResultSink};
pub use tensor::{ImageTensor, Layout, TensorStatistics};
pub use visualize::{FilterVisualization, InitialImage, Visualizer};
