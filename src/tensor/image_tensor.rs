use std::fmt::{self, Display};

use ndarray::{Array3, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{Result, VizError};

/// Axis ordering of an [`ImageTensor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Layout {
    /// (channels, height, width): what the network consumes.
    ChannelFirst,
    /// (height, width, channels): what the regularizers consume.
    ChannelLast,
}

impl Layout {
    pub fn name(&self) -> &'static str {
        match self {
            Layout::ChannelFirst => "channel-first",
            Layout::ChannelLast => "channel-last",
        }
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single image as a 3-D `f32` array tagged with its layout.
///
/// The tag travels with the data so that every switch between layouts is an
/// explicit transpose; operations that need one layout reject the other.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImageTensor {
    data: Array3<f32>,
    layout: Layout,
}

impl ImageTensor {
    pub fn new(data: Array3<f32>, layout: Layout) -> Self {
        let data = data.as_standard_layout().into_owned();
        Self { data, layout }
    }

    pub fn channel_first(data: Array3<f32>) -> Self {
        Self::new(data, Layout::ChannelFirst)
    }

    pub fn channel_last(data: Array3<f32>) -> Self {
        Self::new(data, Layout::ChannelLast)
    }

    /// Zero tensor with the given logical extent, arranged in `layout`.
    pub fn zeros(channels: usize, height: usize, width: usize, layout: Layout) -> Self {
        let data = match layout {
            Layout::ChannelFirst => Array3::zeros((channels, height, width)),
            Layout::ChannelLast => Array3::zeros((height, width, channels)),
        };
        Self { data, layout }
    }

    /// Channel-first noise image: every value is `mean + u * amplitude` with
    /// `u` drawn uniformly from `[0, 1)`.
    pub fn from_noise<R: Rng + ?Sized>(
        rng: &mut R,
        channels: usize,
        height: usize,
        width: usize,
        mean: f32,
        amplitude: f32,
    ) -> Self {
        let data = Array3::from_shape_fn((channels, height, width), |_| {
            mean + rng.random::<f32>() * amplitude
        });
        Self {
            data,
            layout: Layout::ChannelFirst,
        }
    }

    /// Deterministic variant of [`ImageTensor::from_noise`].
    pub fn from_seed(
        seed: u64,
        channels: usize,
        height: usize,
        width: usize,
        mean: f32,
        amplitude: f32,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_noise(&mut rng, channels, height, width, mean, amplitude)
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    /// Raw array dimensions in storage order.
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Logical (channels, height, width) regardless of layout.
    pub fn extent(&self) -> (usize, usize, usize) {
        let (a, b, c) = self.data.dim();
        match self.layout {
            Layout::ChannelFirst => (a, b, c),
            Layout::ChannelLast => (c, a, b),
        }
    }

    pub fn ensure_layout(&self, expected: Layout) -> Result<()> {
        if self.layout != expected {
            return Err(VizError::LayoutMismatch {
                expected,
                got: self.layout,
            });
        }
        Ok(())
    }

    /// Fails unless `other` has the same layout and storage dimensions.
    pub fn ensure_same_shape(&self, other: &ImageTensor) -> Result<()> {
        other.ensure_layout(self.layout)?;
        if self.dim() != other.dim() {
            return Err(VizError::ShapeMismatch {
                expected: self.dim(),
                got: other.dim(),
            });
        }
        Ok(())
    }

    /// (C, H, W) -> (H, W, C).
    pub fn to_channel_last(&self) -> Result<Self> {
        self.ensure_layout(Layout::ChannelFirst)?;
        let data = self.data.view().permuted_axes([1, 2, 0]);
        Ok(Self::new(data.to_owned(), Layout::ChannelLast))
    }

    /// (H, W, C) -> (C, H, W).
    pub fn to_channel_first(&self) -> Result<Self> {
        self.ensure_layout(Layout::ChannelLast)?;
        let data = self.data.view().permuted_axes([2, 0, 1]);
        Ok(Self::new(data.to_owned(), Layout::ChannelFirst))
    }

    pub fn scaled(&self, factor: f32) -> Self {
        let mut data = self.data.clone();
        data.par_mapv_inplace(|value| value * factor);
        Self {
            data,
            layout: self.layout,
        }
    }

    /// `self + alpha * other`, elementwise.
    pub fn scaled_add(&self, alpha: f32, other: &ImageTensor) -> Result<Self> {
        self.ensure_same_shape(other)?;
        let mut data = self.data.clone();
        Zip::from(&mut data)
            .and(&other.data)
            .par_for_each(|out, &rhs| *out += alpha * rhs);
        Ok(Self {
            data,
            layout: self.layout,
        })
    }

    pub fn statistics(&self) -> TensorStatistics {
        let count = self.data.len().max(1) as f32;
        let sum: f32 = self.data.par_iter().sum();
        let mean = sum / count;
        let min = self
            .data
            .par_iter()
            .cloned()
            .reduce(|| f32::INFINITY, f32::min);
        let max = self
            .data
            .par_iter()
            .cloned()
            .reduce(|| f32::NEG_INFINITY, f32::max);
        let variance = self
            .data
            .par_iter()
            .map(|value| {
                let diff = *value - mean;
                diff * diff
            })
            .sum::<f32>()
            / count;

        TensorStatistics {
            mean,
            std: variance.sqrt(),
            min,
            max,
        }
    }
}

impl Display for ImageTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.statistics();
        let (channels, height, width) = self.extent();
        write!(
            f,
            "ImageTensor {}x{}x{} ({}) mean={:.3} std={:.3} range=[{:.3}, {:.3}]",
            channels, height, width, self.layout, stats.mean, stats.std, stats.min, stats.max,
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TensorStatistics {
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
}
