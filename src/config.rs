//! Visualizer configuration via TOML files.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below. Command-line flags are applied on top by the binary.
//!
//! ```toml
//! [visualizer]
//! iterations = 20
//! num_filters = 16
//! size = 128
//! layer = "conv5_1"
//! weights_path = "vgg16_weights.npz"
//! # initial_image = "start.png"
//! seed = 42
//! output_dir = "filters"
//! margin = 5
//!
//! [ascent]
//! step_size = 0.9
//! gradient_epsilon = 1e-5
//! noise_mean = 128.0
//! noise_amplitude = 20.0
//!
//! [regularization]
//! blur_size = 3
//! decay = 0.8
//! percentile = 50.0
//! weights = [2.0, 2.0, 1.0]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use toml::value::Table;
use toml::Value;

use crate::ascent::DEFAULT_STEP_SIZE;
use crate::evaluator::DEFAULT_GRADIENT_EPSILON;
use crate::regularize::{
    Regularization, DEFAULT_BLUR_SIZE, DEFAULT_DECAY, DEFAULT_PERCENTILE, DEFAULT_WEIGHTS,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualizerConfig {
    /// Gradient ascent iterations per filter
    pub iterations: usize,
    /// Number of filters to visualize, starting from filter 0
    pub num_filters: usize,
    /// Width and height of the synthesized image
    pub size: usize,
    /// Layer whose filters are maximized
    pub layer: String,
    /// `.npz` archive holding the network weights
    pub weights_path: PathBuf,
    /// Optional starting image; seeded noise is used when absent
    pub initial_image: Option<PathBuf>,
    /// Base seed for the noise images
    pub seed: u64,
    /// Directory receiving per-filter images and the contact sheet
    pub output_dir: PathBuf,
    /// Gap in pixels between tiles of the contact sheet
    pub margin: usize,
    pub step_size: f32,
    pub gradient_epsilon: f32,
    pub noise_mean: f32,
    pub noise_amplitude: f32,
    pub blur_size: usize,
    pub decay: f32,
    pub percentile: f32,
    /// Raw blur, decay and clip weights, normalized at use
    pub weights: [f32; 3],
}

impl VisualizerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let value: Value =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let defaults = Self::default();
        let visualizer = section(&value, "visualizer");
        let ascent = section(&value, "ascent");
        let regularization = section(&value, "regularization");

        let weights = match regularization.get("weights") {
            None => defaults.weights,
            Some(raw) => {
                let items = raw
                    .as_array()
                    .ok_or_else(|| ConfigError::Parse("weights must be an array".into()))?;
                if items.len() != 3 {
                    return Err(ConfigError::Parse(format!(
                        "weights must hold exactly 3 values (blur, decay, clip), got {}",
                        items.len()
                    )));
                }
                let mut weights = [0.0f32; 3];
                for (slot, item) in weights.iter_mut().zip(items) {
                    *slot = number(item)
                        .ok_or_else(|| ConfigError::Parse("weights must be numbers".into()))?;
                }
                weights
            }
        };

        let config = Self {
            iterations: integer(&visualizer, "iterations")?.unwrap_or(defaults.iterations),
            num_filters: integer(&visualizer, "num_filters")?.unwrap_or(defaults.num_filters),
            size: integer(&visualizer, "size")?.unwrap_or(defaults.size),
            layer: string(&visualizer, "layer")?.unwrap_or(defaults.layer),
            weights_path: string(&visualizer, "weights_path")?
                .map(PathBuf::from)
                .unwrap_or(defaults.weights_path),
            initial_image: string(&visualizer, "initial_image")?.map(PathBuf::from),
            seed: integer(&visualizer, "seed")?.unwrap_or(defaults.seed),
            output_dir: string(&visualizer, "output_dir")?
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            margin: integer(&visualizer, "margin")?.unwrap_or(defaults.margin),
            step_size: float(&ascent, "step_size")?.unwrap_or(defaults.step_size),
            gradient_epsilon: float(&ascent, "gradient_epsilon")?
                .unwrap_or(defaults.gradient_epsilon),
            noise_mean: float(&ascent, "noise_mean")?.unwrap_or(defaults.noise_mean),
            noise_amplitude: float(&ascent, "noise_amplitude")?
                .unwrap_or(defaults.noise_amplitude),
            blur_size: integer(&regularization, "blur_size")?.unwrap_or(defaults.blur_size),
            decay: float(&regularization, "decay")?.unwrap_or(defaults.decay),
            percentile: float(&regularization, "percentile")?.unwrap_or(defaults.percentile),
            weights,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the optimizer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::Invalid("iterations must be at least 1".into()));
        }
        if self.size == 0 {
            return Err(ConfigError::Invalid("size must be at least 1".into()));
        }
        if self.blur_size == 0 || self.blur_size % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "blur_size must be a positive odd number, got {}",
                self.blur_size
            )));
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(ConfigError::Invalid(format!(
                "percentile must lie in [0, 100], got {}",
                self.percentile
            )));
        }
        if !self.decay.is_finite() || self.decay < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "decay must be non-negative, got {}",
                self.decay
            )));
        }
        if !self.step_size.is_finite() {
            return Err(ConfigError::Invalid("step_size must be finite".into()));
        }
        if !self.gradient_epsilon.is_finite() || self.gradient_epsilon <= 0.0 {
            return Err(ConfigError::Invalid(
                "gradient_epsilon must be positive".into(),
            ));
        }
        self.regularization().map(|_| ())
    }

    /// The blur, decay and clip regularizers with normalized weights.
    pub fn regularization(&self) -> Result<Regularization, ConfigError> {
        Regularization::standard(self.blur_size, self.decay, self.percentile, self.weights)
    }
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            iterations: 20,
            num_filters: 16,
            size: 128,
            layer: "conv5_1".to_string(),
            weights_path: PathBuf::from("vgg16_weights.npz"),
            initial_image: None,
            seed: 42,
            output_dir: PathBuf::from("filters"),
            margin: 5,
            step_size: DEFAULT_STEP_SIZE,
            gradient_epsilon: DEFAULT_GRADIENT_EPSILON,
            noise_mean: 128.0,
            noise_amplitude: 20.0,
            blur_size: DEFAULT_BLUR_SIZE,
            decay: DEFAULT_DECAY,
            percentile: DEFAULT_PERCENTILE,
            weights: DEFAULT_WEIGHTS,
        }
    }
}

fn section(value: &Value, name: &str) -> Table {
    value
        .get(name)
        .and_then(|v| v.as_table())
        .cloned()
        .unwrap_or_default()
}

fn number(value: &Value) -> Option<f32> {
    value
        .as_float()
        .map(|v| v as f32)
        .or_else(|| value.as_integer().map(|v| v as f32))
}

fn float(table: &Table, key: &str) -> Result<Option<f32>, ConfigError> {
    table
        .get(key)
        .map(|v| number(v).ok_or_else(|| ConfigError::Parse(format!("{key} must be a number"))))
        .transpose()
}

fn integer<T: TryFrom<i64>>(table: &Table, key: &str) -> Result<Option<T>, ConfigError> {
    table
        .get(key)
        .map(|v| {
            v.as_integer()
                .and_then(|i| T::try_from(i).ok())
                .ok_or_else(|| {
                    ConfigError::Parse(format!("{key} must be a non-negative integer"))
                })
        })
        .transpose()
}

fn string(table: &Table, key: &str) -> Result<Option<String>, ConfigError> {
    table
        .get(key)
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::Parse(format!("{key} must be a string")))
        })
        .transpose()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_missing() {
        let config = VisualizerConfig::from_str("").unwrap();
        assert_eq!(config, VisualizerConfig::default());
        assert_eq!(config.iterations, 20);
        assert_eq!(config.num_filters, 16);
        assert_eq!(config.size, 128);
        assert_eq!(config.layer, "conv5_1");
        assert!(config.initial_image.is_none());
    }

    #[test]
    fn parses_custom_values() {
        let toml = r#"
            [visualizer]
            iterations = 5
            num_filters = 4
            size = 64
            layer = "conv3_1"
            initial_image = "start.png"
            seed = 7

            [ascent]
            step_size = 1

            [regularization]
            decay = 0.5
            weights = [1, 0, 1]
        "#;
        let config = VisualizerConfig::from_str(toml).unwrap();
        assert_eq!(config.iterations, 5);
        assert_eq!(config.num_filters, 4);
        assert_eq!(config.size, 64);
        assert_eq!(config.layer, "conv3_1");
        assert_eq!(config.initial_image, Some(PathBuf::from("start.png")));
        assert_eq!(config.seed, 7);
        assert_eq!(config.step_size, 1.0);
        assert_eq!(config.decay, 0.5);
        assert_eq!(config.weights, [1.0, 0.0, 1.0]);
        assert_eq!(config.regularization().unwrap().weights(), vec![0.5, 0.0, 0.5]);
    }

    #[test]
    fn all_zero_weights_are_a_startup_error() {
        let err = VisualizerConfig::from_str("[regularization]\nweights = [0, 0, 0]").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            VisualizerConfig::from_str("[visualizer]\niterations = \"many\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            VisualizerConfig::from_str("[visualizer]\nsize = -3"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            VisualizerConfig::from_str("[regularization]\nweights = [1, 2]"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            VisualizerConfig::from_str("[regularization]\nblur_size = 4"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            VisualizerConfig::from_str("[regularization]\npercentile = 120.0"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
