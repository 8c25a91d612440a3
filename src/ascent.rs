//! One gradient ascent iteration with regularization.

use serde::Serialize;

use crate::config::{ConfigError, VisualizerConfig};
use crate::error::Result;
use crate::evaluator::{Evaluation, LossGradient};
use crate::regularize::Regularization;
use crate::tensor::{ImageTensor, Layout};

pub const DEFAULT_STEP_SIZE: f32 = 0.9;

/// Result of a single [`GradientAscent::step`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Next image, channel-first, same shape as the input.
    pub image: ImageTensor,
    /// Loss evaluated at the input image.
    pub loss: f32,
}

/// Raw gradient step followed by a weighted blend of regularizers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradientAscent {
    step_size: f32,
    regularization: Regularization,
}

impl GradientAscent {
    pub fn new(step_size: f32, regularization: Regularization) -> Self {
        Self {
            step_size,
            regularization,
        }
    }

    pub fn from_config(config: &VisualizerConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(config.step_size, config.regularization()?))
    }

    /// Evaluates at `current`, steps along the gradient, regularizes in
    /// channel-last layout and returns the blend in channel-first layout.
    pub fn step<E>(&self, evaluator: &mut E, current: &ImageTensor) -> Result<StepOutcome>
    where
        E: LossGradient + ?Sized,
    {
        current.ensure_layout(Layout::ChannelFirst)?;
        let Evaluation { loss, gradient } = evaluator.evaluate(current)?;
        current.ensure_same_shape(&gradient)?;

        let stepped = current.scaled_add(self.step_size, &gradient)?;

        let gradient = gradient.to_channel_last()?;
        let stepped = stepped.to_channel_last()?;
        let blended = self.regularization.blend(&stepped, &gradient)?;

        Ok(StepOutcome {
            image: blended.to_channel_first()?,
            loss,
        })
    }
}

impl Default for GradientAscent {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_SIZE, Regularization::default())
    }
}
