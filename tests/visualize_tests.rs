use std::cell::Cell;
use std::fs::File;

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array3, Array4};
use ndarray_npy::NpzWriter;

use filter_visualizer::{
    logging, Architecture, ConvNet, DirectorySink, Evaluation, GradientAscent, ImageTensor, LayerId,
    Layout, MemorySink, Network, Result, Visualizer, VizError,
};

/// Eight filters per layer, zero gradient everywhere.
struct ZeroGradient;

impl Network for ZeroGradient {
    fn channels(&self, _layer: &LayerId) -> Result<usize> {
        Ok(8)
    }

    fn activation_gradient(
        &self,
        _layer: &LayerId,
        _filter: usize,
        image: &ImageTensor,
    ) -> Result<Evaluation> {
        let (c, h, w) = image.dim();
        Ok(Evaluation {
            loss: 0.0,
            gradient: ImageTensor::zeros(c, h, w, Layout::ChannelFirst),
        })
    }
}

/// Fails once `fail_on` is requested; counts evaluations.
struct FailingNetwork {
    fail_on: usize,
    calls: Cell<usize>,
}

impl Network for FailingNetwork {
    fn channels(&self, _layer: &LayerId) -> Result<usize> {
        Ok(8)
    }

    fn activation_gradient(
        &self,
        layer: &LayerId,
        filter: usize,
        image: &ImageTensor,
    ) -> Result<Evaluation> {
        self.calls.set(self.calls.get() + 1);
        if filter == self.fail_on {
            return Err(VizError::evaluator(format!(
                "placeholder shape mismatch for filter {filter}"
            )));
        }
        ZeroGradient.activation_gradient(layer, filter, image)
    }
}

fn quiet() {
    logging::redirect(None);
}

fn zero_gradient(image: &ImageTensor) -> Result<Evaluation> {
    let (c, h, w) = image.dim();
    Ok(Evaluation {
        loss: 0.0,
        gradient: ImageTensor::zeros(c, h, w, Layout::ChannelFirst),
    })
}

#[test]
fn single_iteration_equals_one_step_on_seeded_noise() {
    quiet();
    let ascent = GradientAscent::default();
    let visualizer = Visualizer::new(ascent.clone(), 1, 10).with_seed(7);

    let result = visualizer
        .visualize_filter(&ZeroGradient, &LayerId::from("conv5_1"), 0)
        .unwrap();

    let initial = ImageTensor::from_seed(7, 3, 10, 10, 128.0, 20.0);
    let expected = ascent.step(&mut zero_gradient, &initial).unwrap().image;

    assert_eq!(result.filter_index, 0);
    assert_eq!(result.losses, vec![0.0]);
    assert_eq!(result.tensor.dim(), expected.dim());
    for (a, b) in result.tensor.data().iter().zip(expected.data().iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn uniform_image_with_zero_gradient_regression() {
    quiet();
    let uniform = ImageTensor::channel_first(Array3::from_elem((3, 4, 4), 128.0));
    let visualizer = Visualizer::new(GradientAscent::default(), 1, 4)
        .with_initial_image(uniform)
        .unwrap();

    let result = visualizer
        .visualize_filter(&ZeroGradient, &LayerId::from("conv1_1"), 0)
        .unwrap();

    let expected = 0.4 * 128.0 + 0.4 * (0.8 * 128.0) + 0.2 * 128.0;
    assert_abs_diff_eq!(expected, 117.76f32, epsilon = 1e-4);
    assert_eq!(result.tensor.dim(), (3, 4, 4));
    for value in result.tensor.data().iter() {
        assert_abs_diff_eq!(*value, expected, epsilon = 1e-3);
    }
}

#[test]
fn batch_runs_in_ascending_order_and_persists_each_step() {
    quiet();
    let visualizer = Visualizer::new(GradientAscent::default(), 2, 6);
    let mut sink = MemorySink::default();

    let results = visualizer
        .run(&ZeroGradient, &LayerId::from("conv1_1"), &[2, 0, 1, 0], &mut sink)
        .unwrap();

    let order: Vec<usize> = results.iter().map(|r| r.filter_index).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(sink.snapshots, vec![vec![0], vec![0, 1], vec![0, 1, 2]]);
    assert_eq!(sink.latest.len(), 3);
}

#[test]
fn evaluator_failure_keeps_completed_filters_on_disk() {
    quiet();
    let dir = tempfile::tempdir().unwrap();
    let mut sink = DirectorySink::new(dir.path(), 2).unwrap();
    let network = FailingNetwork {
        fail_on: 2,
        calls: Cell::new(0),
    };
    let visualizer = Visualizer::new(GradientAscent::default(), 3, 8);

    let err = visualizer
        .run(&network, &LayerId::from("conv1_1"), &[0, 1, 2, 3], &mut sink)
        .unwrap_err();
    assert!(matches!(err, VizError::Evaluator(_)));
    // Two completed filters of three iterations, then the failing call.
    assert_eq!(network.calls.get(), 7);

    assert!(sink.filter_path(0).exists());
    assert!(sink.filter_path(1).exists());
    assert!(!sink.filter_path(2).exists());
    let sheet = image::open(sink.sheet_path()).unwrap();
    // Two 8x8 tiles in a 2x2 grid with a 2 px margin.
    assert_eq!((sheet.width(), sheet.height()), (18, 18));
}

#[test]
fn out_of_range_filter_aborts_before_any_evaluation() {
    quiet();
    let network = FailingNetwork {
        fail_on: usize::MAX,
        calls: Cell::new(0),
    };
    let visualizer = Visualizer::new(GradientAscent::default(), 3, 8);
    let mut sink = MemorySink::default();
    let err = visualizer
        .run(&network, &LayerId::from("conv1_1"), &[8], &mut sink)
        .unwrap_err();
    assert!(matches!(err, VizError::InvalidParameter(_)));
    assert_eq!(network.calls.get(), 0);
    assert!(sink.snapshots.is_empty());
}

#[test]
fn seeded_convnet_visualizes_every_requested_filter() {
    quiet();
    let architecture = Architecture::parse("conv1_1:4,conv1_2:4,pool1,conv2_1:6").unwrap();
    let network = ConvNet::seeded(&architecture, 11);
    let visualizer = Visualizer::new(GradientAscent::default(), 3, 12).with_seed(5);
    let mut sink = MemorySink::default();

    let results = visualizer
        .run(&network, &LayerId::from("conv2_1"), &[0, 1, 2], &mut sink)
        .unwrap();

    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result.tensor.dim(), (3, 12, 12));
        assert_eq!(result.image.dimensions(), (12, 12));
        assert_eq!(result.losses.len(), 3);
        assert!(result.tensor.data().iter().all(|v| v.is_finite()));
    }
}

#[test]
fn layer_can_be_addressed_by_index() {
    quiet();
    let architecture = Architecture::parse("conv1_1:4,pool1").unwrap();
    let network = ConvNet::seeded(&architecture, 2);
    let layer: LayerId = "1".parse().unwrap();
    assert_eq!(network.channels(&layer).unwrap(), 4);
}

#[test]
fn weights_round_trip_through_npz() {
    quiet();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.npz");
    {
        let mut npz = NpzWriter::new(File::create(&path).unwrap());
        let weight = Array4::from_elem((2, 3, 3, 3), 1.0f32);
        let bias = Array1::from_elem(2, 0.5f32);
        npz.add_array("conv1_1.weight", &weight).unwrap();
        npz.add_array("conv1_1.bias", &bias).unwrap();
        npz.finish().unwrap();
    }

    let architecture = Architecture::parse("conv1_1:2,pool1").unwrap();
    let network = ConvNet::load_npz(&path, &architecture).unwrap();
    assert_eq!(network.layer_names(), vec!["conv1_1", "pool1"]);

    let image = ImageTensor::channel_first(Array3::from_elem((3, 4, 4), 1.0));
    let eval = network
        .activation_gradient(&LayerId::from("conv1_1"), 0, &image)
        .unwrap();
    // Mean of (3 * neighbours + 0.5) over the 4x4 map.
    assert_abs_diff_eq!(eval.loss, 300.0 / 16.0 + 0.5, epsilon = 1e-4);

    let wrong = Architecture::parse("conv1_1:4").unwrap();
    assert!(matches!(
        ConvNet::load_npz(&path, &wrong),
        Err(VizError::Weights(_))
    ));
    let missing = Architecture::parse("conv1_1:2,conv1_2:2").unwrap();
    assert!(matches!(
        ConvNet::load_npz(&path, &missing),
        Err(VizError::Weights(_))
    ));
}
