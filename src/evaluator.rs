//! Loss/gradient evaluation seams.
//!
//! [`Network`] is the capability a trained classifier exposes: the mean
//! activation of one filter and its gradient with respect to the input.
//! [`LossGradient`] is what the optimizer consumes; [`FilterObjective`]
//! adapts one to the other and normalizes the gradient.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Result, VizError};
use crate::tensor::{normalize_rms, ImageTensor, Layout};

pub const DEFAULT_GRADIENT_EPSILON: f32 = 1e-5;

/// Loss value and gradient of the loss w.r.t. the evaluated image.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub loss: f32,
    pub gradient: ImageTensor,
}

/// A single forward and backward pass at a given channel-first image.
pub trait LossGradient {
    fn evaluate(&mut self, image: &ImageTensor) -> Result<Evaluation>;
}

impl<F> LossGradient for F
where
    F: FnMut(&ImageTensor) -> Result<Evaluation>,
{
    fn evaluate(&mut self, image: &ImageTensor) -> Result<Evaluation> {
        self(image)
    }
}

/// Identifies a layer by name or by position in the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LayerId {
    Name(String),
    Index(usize),
}

impl FromStr for LayerId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.parse::<usize>() {
            Ok(index) => LayerId::Index(index),
            Err(_) => LayerId::Name(s.to_string()),
        })
    }
}

impl From<&str> for LayerId {
    fn from(value: &str) -> Self {
        LayerId::Name(value.to_string())
    }
}

impl Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerId::Name(name) => f.write_str(name),
            LayerId::Index(index) => write!(f, "#{index}"),
        }
    }
}

/// A trained image classifier that can be differentiated w.r.t. its input.
pub trait Network {
    fn name(&self) -> &str {
        "network"
    }

    /// Channels the network expects in its input image.
    fn input_channels(&self) -> usize {
        3
    }

    /// Number of filters (output channels) of `layer`.
    fn channels(&self, layer: &LayerId) -> Result<usize>;

    /// Mean activation of `filter` in `layer` for a channel-first `image`,
    /// together with its gradient w.r.t. `image`.
    fn activation_gradient(
        &self,
        layer: &LayerId,
        filter: usize,
        image: &ImageTensor,
    ) -> Result<Evaluation>;
}

/// Maximization objective for one filter of one layer.
///
/// The gradient is divided by its RMS plus `epsilon`, so a fixed step size
/// means the same thing for every filter and layer.
pub struct FilterObjective<'a, N: Network + ?Sized> {
    network: &'a N,
    layer: LayerId,
    filter: usize,
    epsilon: f32,
}

impl<'a, N: Network + ?Sized> FilterObjective<'a, N> {
    /// Fails with `InvalidParameter` when `filter` is not a channel of `layer`.
    pub fn new(network: &'a N, layer: LayerId, filter: usize, epsilon: f32) -> Result<Self> {
        let channels = network.channels(&layer)?;
        if filter >= channels {
            return Err(VizError::invalid(format!(
                "filter index {filter} out of range for layer {layer} with {channels} channels"
            )));
        }
        Ok(Self {
            network,
            layer,
            filter,
            epsilon,
        })
    }
}

impl<N: Network + ?Sized> LossGradient for FilterObjective<'_, N> {
    fn evaluate(&mut self, image: &ImageTensor) -> Result<Evaluation> {
        image.ensure_layout(Layout::ChannelFirst)?;
        let Evaluation { loss, gradient } =
            self.network
                .activation_gradient(&self.layer, self.filter, image)?;
        image.ensure_same_shape(&gradient)?;
        Ok(Evaluation {
            loss,
            gradient: normalize_rms(&gradient, self.epsilon),
        })
    }
}
