//! Named layer layouts for the reference network.

use serde::Serialize;

use crate::error::{Result, VizError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LayerSpec {
    /// 3x3 convolution + ReLU producing `out_channels` filters.
    Conv { name: String, out_channels: usize },
    /// 2x2 max pooling.
    Pool { name: String },
}

impl LayerSpec {
    pub fn name(&self) -> &str {
        match self {
            LayerSpec::Conv { name, .. } | LayerSpec::Pool { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Architecture {
    pub input_channels: usize,
    pub layers: Vec<LayerSpec>,
}

impl Architecture {
    /// VGG16 feature extractor with its conventional layer names.
    pub fn vgg16() -> Self {
        let blocks: [(usize, usize); 5] = [(2, 64), (2, 128), (3, 256), (3, 512), (3, 512)];
        let mut layers = Vec::new();
        for (block, (convs, channels)) in blocks.iter().enumerate() {
            for conv in 0..*convs {
                layers.push(LayerSpec::Conv {
                    name: format!("conv{}_{}", block + 1, conv + 1),
                    out_channels: *channels,
                });
            }
            layers.push(LayerSpec::Pool {
                name: format!("pool{}", block + 1),
            });
        }
        Self {
            input_channels: 3,
            layers,
        }
    }

    /// Parses a comma-separated layout such as `conv1_1:8,conv1_2:8,pool1`.
    ///
    /// `name:channels` declares a convolution, a bare name a pooling layer.
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.trim().eq_ignore_ascii_case("vgg16") {
            return Ok(Self::vgg16());
        }
        let mut layers = Vec::new();
        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let layer = match token.split_once(':') {
                Some((name, channels)) => {
                    let out_channels = channels.trim().parse::<usize>().map_err(|_| {
                        VizError::invalid(format!("bad channel count in layer spec '{token}'"))
                    })?;
                    if out_channels == 0 {
                        return Err(VizError::invalid(format!(
                            "layer '{name}' must have at least one channel"
                        )));
                    }
                    LayerSpec::Conv {
                        name: name.trim().to_string(),
                        out_channels,
                    }
                }
                None => LayerSpec::Pool {
                    name: token.to_string(),
                },
            };
            if layers.iter().any(|l: &LayerSpec| l.name() == layer.name()) {
                return Err(VizError::invalid(format!(
                    "duplicate layer name '{}'",
                    layer.name()
                )));
            }
            layers.push(layer);
        }
        if layers.is_empty() {
            return Err(VizError::invalid("architecture has no layers"));
        }
        Ok(Self {
            input_channels: 3,
            layers,
        })
    }
}
