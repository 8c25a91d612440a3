//! Iteration driver: one optimized image per requested filter.

use image::RgbImage;

use crate::ascent::GradientAscent;
use crate::config::VisualizerConfig;
use crate::error::{Result, VizError};
use crate::evaluator::{FilterObjective, LayerId, LossGradient, Network, DEFAULT_GRADIENT_EPSILON};
use crate::logging::{self, FilterRecord, StepRecord};
use crate::render;
use crate::sink::ResultSink;
use crate::tensor::{ImageTensor, Layout};

/// Where each filter's optimization starts.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialImage {
    /// Seeded uniform noise: `mean + u * amplitude`, `u` in `[0, 1)`.
    Noise { mean: f32, amplitude: f32 },
    /// The same channel-first image for every filter.
    Fixed(ImageTensor),
}

/// The finished optimization of one filter.
#[derive(Debug, Clone)]
pub struct FilterVisualization {
    pub filter_index: usize,
    /// Optimized channel-first tensor before post-processing.
    pub tensor: ImageTensor,
    /// Displayable rendering of `tensor`.
    pub image: RgbImage,
    /// Loss observed at the start of every iteration.
    pub losses: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct Visualizer {
    ascent: GradientAscent,
    iterations: usize,
    size: usize,
    seed: u64,
    gradient_epsilon: f32,
    initial: InitialImage,
}

impl Visualizer {
    pub fn new(ascent: GradientAscent, iterations: usize, size: usize) -> Self {
        Self {
            ascent,
            iterations,
            size,
            seed: 42,
            gradient_epsilon: DEFAULT_GRADIENT_EPSILON,
            initial: InitialImage::Noise {
                mean: 128.0,
                amplitude: 20.0,
            },
        }
    }

    /// Builds a visualizer from validated configuration, loading the initial
    /// image from disk when one is configured.
    pub fn from_config(config: &VisualizerConfig) -> Result<Self> {
        config.validate()?;
        let visualizer = Self::new(
            GradientAscent::from_config(config)?,
            config.iterations,
            config.size,
        )
        .with_seed(config.seed)
        .with_gradient_epsilon(config.gradient_epsilon)
        .with_noise(config.noise_mean, config.noise_amplitude);

        match &config.initial_image {
            Some(path) => visualizer.with_initial_image(render::load_image(path, config.size)?),
            None => Ok(visualizer),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_gradient_epsilon(mut self, epsilon: f32) -> Self {
        self.gradient_epsilon = epsilon;
        self
    }

    pub fn with_noise(mut self, mean: f32, amplitude: f32) -> Self {
        self.initial = InitialImage::Noise { mean, amplitude };
        self
    }

    /// Starts every filter from `image` instead of noise.
    pub fn with_initial_image(mut self, image: ImageTensor) -> Result<Self> {
        image.ensure_layout(Layout::ChannelFirst)?;
        let (channels, height, width) = image.dim();
        if (height, width) != (self.size, self.size) {
            return Err(VizError::ShapeMismatch {
                expected: (channels, self.size, self.size),
                got: (channels, height, width),
            });
        }
        self.initial = InitialImage::Fixed(image);
        Ok(self)
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn initial(&self) -> &InitialImage {
        &self.initial
    }

    /// Fresh starting tensor for `filter_index`. Noise is seeded with
    /// `seed + filter_index`, so each filter is reproducible on its own.
    pub fn initial_tensor(&self, filter_index: usize, channels: usize) -> ImageTensor {
        match &self.initial {
            InitialImage::Noise { mean, amplitude } => ImageTensor::from_seed(
                self.seed.wrapping_add(filter_index as u64),
                channels,
                self.size,
                self.size,
                *mean,
                *amplitude,
            ),
            InitialImage::Fixed(image) => image.clone(),
        }
    }

    /// Applies the ascent step exactly `iterations` times.
    ///
    /// Returns the final tensor and the loss seen at every iteration.
    pub fn optimize<E>(
        &self,
        evaluator: &mut E,
        initial: ImageTensor,
        filter_index: usize,
    ) -> Result<(ImageTensor, Vec<f32>)>
    where
        E: LossGradient + ?Sized,
    {
        let mut image = initial;
        let mut losses = Vec::with_capacity(self.iterations);
        for iteration in 0..self.iterations {
            let outcome = self.ascent.step(evaluator, &image)?;
            image = outcome.image;
            losses.push(outcome.loss);

            let stats = image.statistics();
            logging::log_step(&StepRecord {
                filter: filter_index,
                iteration,
                loss: outcome.loss,
                mean: stats.mean,
                std: stats.std,
                min: stats.min,
                max: stats.max,
            });
        }
        Ok((image, losses))
    }

    /// Maximizes the mean activation of `filter_index` in `layer`.
    ///
    /// An out-of-range filter, or a fixed initial image whose channel count
    /// differs from the network input, fails before any iteration runs.
    pub fn visualize_filter<N>(
        &self,
        network: &N,
        layer: &LayerId,
        filter_index: usize,
    ) -> Result<FilterVisualization>
    where
        N: Network + ?Sized,
    {
        let mut objective =
            FilterObjective::new(network, layer.clone(), filter_index, self.gradient_epsilon)?;
        let channels = network.input_channels();
        if let InitialImage::Fixed(image) = &self.initial {
            let (got, height, width) = image.dim();
            if got != channels {
                return Err(VizError::ShapeMismatch {
                    expected: (channels, height, width),
                    got: (got, height, width),
                });
            }
        }
        let initial = self.initial_tensor(filter_index, channels);
        let (tensor, losses) = self.optimize(&mut objective, initial, filter_index)?;
        let image = render::deprocess(&tensor)?;

        Ok(FilterVisualization {
            filter_index,
            tensor,
            image,
            losses,
        })
    }

    /// Visualizes `filters` in ascending order, handing the accumulated
    /// results to `sink` after each one.
    ///
    /// Results follow ascending, deduplicated filter order, not the order of
    /// `filters`. An error aborts the batch; filters finished before it stay
    /// persisted.
    pub fn run<N, S>(
        &self,
        network: &N,
        layer: &LayerId,
        filters: &[usize],
        sink: &mut S,
    ) -> Result<Vec<FilterVisualization>>
    where
        N: Network + ?Sized,
        S: ResultSink + ?Sized,
    {
        let mut order = filters.to_vec();
        order.sort_unstable();
        order.dedup();

        let mut results = Vec::with_capacity(order.len());
        for filter_index in order {
            let visualization = self.visualize_filter(network, layer, filter_index)?;
            let final_loss = visualization.losses.last().copied();
            results.push(visualization);
            sink.persist(&results)?;

            logging::log_filter(&FilterRecord {
                filter: filter_index,
                iterations: self.iterations,
                final_loss,
                completed: results.len(),
            });
        }
        Ok(results)
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new(GradientAscent::default(), 20, 128)
    }
}
