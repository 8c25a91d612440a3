//! Image regularizers applied after each gradient ascent step.
//!
//! A [`Regularizer`] maps a channel-last (image, gradient) pair to a new
//! channel-last image of the same shape. A [`Regularization`] is an ordered
//! list of regularizers with normalized weights; its [`Regularization::blend`]
//! is the weighted sum of every regularizer's output.

pub mod blur;
pub mod clip;

use serde::Serialize;

use crate::config::ConfigError;
use crate::error::Result;
use crate::tensor::{weighted_sum, ImageTensor, Layout};

pub use blur::box_blur;
pub use clip::{channel_thresholds, clip_weak_gradient, percentile};

pub const DEFAULT_BLUR_SIZE: usize = 3;
pub const DEFAULT_DECAY: f32 = 0.8;
pub const DEFAULT_PERCENTILE: f32 = 50.0;
pub const DEFAULT_WEIGHTS: [f32; 3] = [2.0, 2.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Regularizer {
    /// Box blur over a `size x size` neighbourhood; ignores the gradient.
    Blur { size: usize },
    /// Scales the image toward zero; ignores the gradient.
    Decay { factor: f32 },
    /// Zeroes pixels whose gradient is at or below the per-channel percentile.
    ClipWeakGradient { percentile: f32 },
}

impl Regularizer {
    pub fn name(&self) -> &'static str {
        match self {
            Regularizer::Blur { .. } => "blur",
            Regularizer::Decay { .. } => "decay",
            Regularizer::ClipWeakGradient { .. } => "clip_weak_gradient",
        }
    }

    pub fn apply(&self, image: &ImageTensor, gradient: &ImageTensor) -> Result<ImageTensor> {
        image.ensure_layout(Layout::ChannelLast)?;
        image.ensure_same_shape(gradient)?;

        let output = match *self {
            Regularizer::Blur { size } => {
                ImageTensor::channel_last(box_blur(image.data(), size))
            }
            Regularizer::Decay { factor } => image.scaled(factor),
            Regularizer::ClipWeakGradient { percentile } => ImageTensor::channel_last(
                clip_weak_gradient(image.data(), gradient.data(), percentile),
            ),
        };
        Ok(output)
    }
}

/// Ordered (regularizer, weight) pairs with weights summing to one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Regularization {
    terms: Vec<(Regularizer, f32)>,
}

impl Regularization {
    /// Normalizes the raw weights. Fails when a weight is negative or not
    /// finite, or when they do not sum to a positive value.
    pub fn new(terms: Vec<(Regularizer, f32)>) -> std::result::Result<Self, ConfigError> {
        if terms.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one regularizer is required".into(),
            ));
        }
        if let Some((reg, w)) = terms.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Invalid(format!(
                "regularization weight for {} must be a non-negative number, got {w}",
                reg.name()
            )));
        }
        let total: f32 = terms.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Err(ConfigError::Invalid(
                "regularization weights must sum to a positive value".into(),
            ));
        }

        let terms = terms.into_iter().map(|(reg, w)| (reg, w / total)).collect();
        Ok(Self { terms })
    }

    /// Blur, decay and clip-weak-gradient, in that order.
    pub fn standard(
        blur_size: usize,
        decay: f32,
        percentile: f32,
        weights: [f32; 3],
    ) -> std::result::Result<Self, ConfigError> {
        Self::new(vec![
            (Regularizer::Blur { size: blur_size }, weights[0]),
            (Regularizer::Decay { factor: decay }, weights[1]),
            (Regularizer::ClipWeakGradient { percentile }, weights[2]),
        ])
    }

    pub fn weights(&self) -> Vec<f32> {
        self.terms.iter().map(|(_, w)| *w).collect()
    }

    /// Weighted sum of every regularizer applied to the same (image, gradient).
    pub fn blend(&self, image: &ImageTensor, gradient: &ImageTensor) -> Result<ImageTensor> {
        let candidates = self
            .terms
            .iter()
            .map(|(reg, _)| reg.apply(image, gradient))
            .collect::<Result<Vec<_>>>()?;
        let weighted: Vec<(f32, &ImageTensor)> = self
            .terms
            .iter()
            .zip(&candidates)
            .map(|((_, w), candidate)| (*w, candidate))
            .collect();
        weighted_sum(&weighted)
    }
}

impl Default for Regularization {
    fn default() -> Self {
        let total: f32 = DEFAULT_WEIGHTS.iter().sum();
        Self {
            terms: vec![
                (
                    Regularizer::Blur {
                        size: DEFAULT_BLUR_SIZE,
                    },
                    DEFAULT_WEIGHTS[0] / total,
                ),
                (
                    Regularizer::Decay {
                        factor: DEFAULT_DECAY,
                    },
                    DEFAULT_WEIGHTS[1] / total,
                ),
                (
                    Regularizer::ClipWeakGradient {
                        percentile: DEFAULT_PERCENTILE,
                    },
                    DEFAULT_WEIGHTS[2] / total,
                ),
            ],
        }
    }
}
