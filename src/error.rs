use crate::config::ConfigError;
use crate::tensor::Layout;

/// All errors produced while building, running or persisting a visualization.
#[derive(Debug, thiserror::Error)]
pub enum VizError {
    /// A caller-supplied value is outside its valid range (e.g. a filter index
    /// past the layer's channel count).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A tensor was handed to an operation expecting the other layout.
    #[error("layout mismatch: expected {expected}, got {got}")]
    LayoutMismatch { expected: Layout, got: Layout },

    /// Two tensors that must line up element for element do not.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },

    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    /// The loss/gradient evaluator could not produce a result.
    #[error("evaluator failed: {0}")]
    Evaluator(String),

    /// Network weights are missing, truncated or do not fit the architecture.
    #[error("weights error: {0}")]
    Weights(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl VizError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        VizError::InvalidParameter(msg.into())
    }

    pub fn evaluator(msg: impl Into<String>) -> Self {
        VizError::Evaluator(msg.into())
    }
}

/// Convenience result type used throughout the crate.
pub type Result<T> = std::result::Result<T, VizError>;
