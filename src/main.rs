use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueHint};

use filter_visualizer::{
    Architecture, ConvNet, DirectorySink, FilterVisualization, LayerId, Network, ResultSink,
    Visualizer, VisualizerConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "filter-visualizer",
    version,
    about = "Synthesize images that maximally activate convolutional filters"
)]
struct Cli {
    /// TOML configuration file; flags below override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Number of gradient ascent iterations
    #[arg(long)]
    iterations: Option<usize>,

    /// Path to an initial image (noise is used when absent)
    #[arg(long, value_hint = ValueHint::FilePath)]
    img: Option<PathBuf>,

    /// Path to the network weights (.npz)
    #[arg(long, value_hint = ValueHint::FilePath)]
    weights_path: Option<PathBuf>,

    /// Name (or index) of the layer to visualize
    #[arg(long)]
    layer: Option<String>,

    /// Number of filters to visualize, starting from filter 0
    #[arg(long)]
    num_filters: Option<usize>,

    /// Image width and height
    #[arg(long)]
    size: Option<usize>,

    /// Directory for the per-filter images and the contact sheet
    #[arg(long, value_hint = ValueHint::DirPath)]
    output_dir: Option<PathBuf>,

    /// Seed for the noise images
    #[arg(long)]
    seed: Option<u64>,

    /// Network layout, e.g. `vgg16` or `conv1_1:64,conv1_2:64,pool1`
    #[arg(long, default_value = "vgg16")]
    architecture: String,

    /// Use seeded random weights instead of loading a weights file
    #[arg(long)]
    random_weights: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<VisualizerConfig> {
        let mut config = match &self.config {
            Some(path) => VisualizerConfig::load_from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => VisualizerConfig::default(),
        };
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(img) = &self.img {
            config.initial_image = Some(img.clone());
        }
        if let Some(path) = &self.weights_path {
            config.weights_path = path.clone();
        }
        if let Some(layer) = &self.layer {
            config.layer = layer.clone();
        }
        if let Some(num_filters) = self.num_filters {
            config.num_filters = num_filters;
        }
        if let Some(size) = self.size {
            config.size = size;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Prints progress as each filter completes, then delegates.
struct ProgressSink<S> {
    inner: S,
    total: usize,
}

impl<S: ResultSink> ResultSink for ProgressSink<S> {
    fn persist(&mut self, results: &[FilterVisualization]) -> filter_visualizer::Result<()> {
        self.inner.persist(results)?;
        if let Some(last) = results.last() {
            println!(
                "Done with filter {} ({}/{}), final loss {:.4}",
                last.filter_index,
                results.len(),
                self.total,
                last.losses.last().copied().unwrap_or_default()
            );
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    let architecture = Architecture::parse(&cli.architecture)
        .with_context(|| format!("invalid architecture '{}'", cli.architecture))?;

    let network = if cli.random_weights {
        ConvNet::seeded(&architecture, config.seed)
    } else {
        ConvNet::load_npz(&config.weights_path, &architecture).with_context(|| {
            format!("failed to load weights from {}", config.weights_path.display())
        })?
    };

    let layer: LayerId = config
        .layer
        .parse()
        .unwrap_or_else(|_| LayerId::Name(config.layer.clone()));
    let channels = network
        .channels(&layer)
        .with_context(|| format!("layer {layer} not found in {:?}", network.layer_names()))?;
    if config.num_filters > channels {
        anyhow::bail!(
            "layer {layer} has {channels} filters, cannot visualize {}",
            config.num_filters
        );
    }

    let visualizer = Visualizer::from_config(&config).context("failed to build visualizer")?;
    let sink = DirectorySink::new(&config.output_dir, config.margin as u32).with_context(|| {
        format!("cannot create output directory {}", config.output_dir.display())
    })?;
    let mut sink = ProgressSink {
        inner: sink,
        total: config.num_filters,
    };

    println!(
        "Visualizing {} filters of {layer} in {} at {}x{} for {} iterations",
        config.num_filters,
        network.name(),
        config.size,
        config.size,
        config.iterations
    );
    let filters: Vec<usize> = (0..config.num_filters).collect();
    visualizer
        .run(&network, &layer, &filters, &mut sink)
        .context("visualization aborted")?;
    println!(
        "Saved results to {}",
        sink.inner.sheet_path().display()
    );
    Ok(())
}
