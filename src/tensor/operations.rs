use ndarray::Zip;
use rayon::prelude::*;

use super::ImageTensor;
use crate::error::{Result, VizError};

/// Sum of `weight * tensor` over all terms, in the order given.
///
/// All tensors must share layout and shape with the first term.
pub fn weighted_sum(terms: &[(f32, &ImageTensor)]) -> Result<ImageTensor> {
    let (_, first) = terms
        .first()
        .ok_or_else(|| VizError::invalid("weighted_sum needs at least one term"))?;
    let (a, b, c) = first.dim();
    let mut out = ImageTensor::new(ndarray::Array3::zeros((a, b, c)), first.layout());

    for (weight, tensor) in terms {
        out.ensure_same_shape(tensor)?;
        let weight = *weight;
        Zip::from(out.data_mut())
            .and(tensor.data())
            .par_for_each(|acc, &value| *acc += weight * value);
    }

    Ok(out)
}

/// Divides every element by the tensor's root-mean-square plus `epsilon`.
///
/// A zero tensor stays zero.
pub fn normalize_rms(tensor: &ImageTensor, epsilon: f32) -> ImageTensor {
    let count = tensor.data().len().max(1) as f32;
    let mean_square = tensor.data().par_iter().map(|v| v * v).sum::<f32>() / count;
    let scale = 1.0 / (mean_square.sqrt() + epsilon);
    tensor.scaled(scale)
}
