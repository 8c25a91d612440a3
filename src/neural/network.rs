//! Convolutional reference network.

use std::fs::File;
use std::path::Path;

use ndarray::{Array1, Array3, Array4};
use ndarray_npy::NpzReader;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, VizError};
use crate::evaluator::{Evaluation, LayerId, Network};
use crate::neural::architecture::{Architecture, LayerSpec};
use crate::neural::layer::{Conv2d, MaxPool2d};
use crate::tensor::{ImageTensor, Layout};

#[derive(Debug, Clone)]
pub enum Layer {
    Conv(Conv2d),
    Pool(MaxPool2d),
}

#[derive(Debug, Clone)]
struct NamedLayer {
    name: String,
    layer: Layer,
    /// Channels of this layer's output.
    channels: usize,
}

/// A feed-forward stack of named convolution and pooling layers.
///
/// Evaluates the mean activation of a single filter and back-propagates it
/// to the input image; the weights are never modified.
#[derive(Debug, Clone)]
pub struct ConvNet {
    input_channels: usize,
    layers: Vec<NamedLayer>,
}

impl ConvNet {
    /// Builds a network from explicit layers, checking that channel counts
    /// chain from one convolution to the next.
    pub fn from_layers(input_channels: usize, layers: Vec<(String, Layer)>) -> Result<Self> {
        let mut channels = input_channels;
        let mut named = Vec::with_capacity(layers.len());
        for (name, layer) in layers {
            if let Layer::Conv(conv) = &layer {
                if conv.in_channels() != channels {
                    return Err(VizError::Weights(format!(
                        "layer {name} expects {} input channels but receives {channels}",
                        conv.in_channels()
                    )));
                }
                channels = conv.out_channels();
            }
            named.push(NamedLayer {
                name,
                layer,
                channels,
            });
        }
        Ok(Self {
            input_channels,
            layers: named,
        })
    }

    /// Deterministic He-uniform weights and zero biases.
    pub fn seeded(architecture: &Architecture, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut channels = architecture.input_channels;
        let mut layers = Vec::with_capacity(architecture.layers.len());
        for spec in &architecture.layers {
            let layer = match spec {
                LayerSpec::Conv { out_channels, .. } => {
                    let fan_in = (channels * Conv2d::KERNEL * Conv2d::KERNEL) as f32;
                    let bound = (6.0 / fan_in).sqrt();
                    let weight = Array4::from_shape_fn(
                        (*out_channels, channels, Conv2d::KERNEL, Conv2d::KERNEL),
                        |_| rng.random_range(-bound..bound),
                    );
                    channels = *out_channels;
                    Layer::Conv(Conv2d {
                        weight,
                        bias: Array1::zeros(*out_channels),
                    })
                }
                LayerSpec::Pool { .. } => Layer::Pool(MaxPool2d),
            };
            layers.push(NamedLayer {
                name: spec.name().to_string(),
                layer,
                channels,
            });
        }
        Self {
            input_channels: architecture.input_channels,
            layers,
        }
    }

    /// Loads convolution weights from an `.npz` archive holding
    /// `<layer>.weight` with shape (out, in, 3, 3) and `<layer>.bias` with
    /// shape (out,) for every convolution in `architecture`.
    pub fn load_npz<P: AsRef<Path>>(path: P, architecture: &Architecture) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            VizError::Weights(format!("cannot open {}: {err}", path.display()))
        })?;
        let mut npz = NpzReader::new(file)
            .map_err(|err| VizError::Weights(format!("{}: {err}", path.display())))?;
        let names = npz
            .names()
            .map_err(|err| VizError::Weights(format!("{}: {err}", path.display())))?;
        let entry = |key: &str| -> Result<String> {
            names
                .iter()
                .find(|n| n.as_str() == key || n.strip_suffix(".npy") == Some(key))
                .cloned()
                .ok_or_else(|| {
                    VizError::Weights(format!("{} has no array '{key}'", path.display()))
                })
        };

        let mut layers = Vec::with_capacity(architecture.layers.len());
        for spec in &architecture.layers {
            let layer = match spec {
                LayerSpec::Conv { name, out_channels } => {
                    let weight: Array4<f32> = npz
                        .by_name(&entry(&format!("{name}.weight"))?)
                        .map_err(|err| VizError::Weights(format!("{name}.weight: {err}")))?;
                    let bias: Array1<f32> = npz
                        .by_name(&entry(&format!("{name}.bias"))?)
                        .map_err(|err| VizError::Weights(format!("{name}.bias: {err}")))?;
                    if weight.dim().0 != *out_channels {
                        return Err(VizError::Weights(format!(
                            "{name} has {} filters, architecture declares {out_channels}",
                            weight.dim().0
                        )));
                    }
                    Layer::Conv(Conv2d::new(weight, bias)?)
                }
                LayerSpec::Pool { .. } => Layer::Pool(MaxPool2d),
            };
            layers.push((spec.name().to_string(), layer));
        }
        Self::from_layers(architecture.input_channels, layers)
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    fn resolve(&self, layer: &LayerId) -> Result<usize> {
        let found = match layer {
            LayerId::Name(name) => self.layers.iter().position(|l| &l.name == name),
            LayerId::Index(index) => (*index < self.layers.len()).then_some(*index),
        };
        found.ok_or_else(|| VizError::UnknownLayer(layer.to_string()))
    }

    /// Activations from the input up to and including layer `until`:
    /// `[input, out_0, ..., out_until]`.
    fn forward(&self, input: Array3<f32>, until: usize) -> Vec<Array3<f32>> {
        let mut activations = Vec::with_capacity(until + 2);
        activations.push(input);
        for named in &self.layers[..=until] {
            let current = activations[activations.len() - 1].view();
            let next = match &named.layer {
                Layer::Conv(conv) => conv.forward(current),
                Layer::Pool(pool) => pool.forward(current),
            };
            activations.push(next);
        }
        activations
    }
}

impl Network for ConvNet {
    fn name(&self) -> &str {
        "convnet"
    }

    fn input_channels(&self) -> usize {
        self.input_channels
    }

    fn channels(&self, layer: &LayerId) -> Result<usize> {
        let index = self.resolve(layer)?;
        Ok(self.layers[index].channels)
    }

    fn activation_gradient(
        &self,
        layer: &LayerId,
        filter: usize,
        image: &ImageTensor,
    ) -> Result<Evaluation> {
        image.ensure_layout(Layout::ChannelFirst)?;
        let (channels, height, width) = image.dim();
        if channels != self.input_channels {
            return Err(VizError::ShapeMismatch {
                expected: (self.input_channels, height, width),
                got: (channels, height, width),
            });
        }
        let target = self.resolve(layer)?;
        let filters = self.layers[target].channels;
        if filter >= filters {
            return Err(VizError::invalid(format!(
                "filter index {filter} out of range for layer {layer} with {filters} channels"
            )));
        }

        let activations = self.forward(image.data().clone(), target);
        let output = &activations[target + 1];
        let (_, out_h, out_w) = output.dim();
        if out_h * out_w == 0 {
            return Err(VizError::evaluator(format!(
                "a {height}x{width} input leaves no spatial extent at layer {layer}"
            )));
        }
        let cells = (out_h * out_w) as f32;
        let loss = output.index_axis(ndarray::Axis(0), filter).sum() / cells;

        let mut grad = Array3::zeros(output.dim());
        grad.index_axis_mut(ndarray::Axis(0), filter).fill(1.0 / cells);
        for index in (0..=target).rev() {
            grad = match &self.layers[index].layer {
                Layer::Conv(conv) => conv.backward(&activations[index + 1], &grad),
                Layer::Pool(pool) => pool.backward(activations[index].view(), &grad),
            };
        }

        Ok(Evaluation {
            loss,
            gradient: ImageTensor::channel_first(grad),
        })
    }
}
