use ndarray::{Array3, Axis, Zip};

/// Value at percentile `q` (0..=100) of `values`, interpolating linearly
/// between the two closest ranks. `values` is sorted in place.
pub fn percentile(values: &mut [f32], q: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f32;
    Some(values[lower] + (values[upper] - values[lower]) * fraction)
}

/// Per-channel percentile thresholds of a (H, W, C) gradient.
///
/// `None` marks a channel whose gradient is constant: it carries no saliency
/// signal and is left untouched by [`clip_weak_gradient`].
pub fn channel_thresholds(gradient: &Array3<f32>, q: f32) -> Vec<Option<f32>> {
    gradient
        .axis_iter(Axis(2))
        .map(|plane| {
            let mut values: Vec<f32> = plane.iter().copied().collect();
            let first = *values.first()?;
            if values.iter().all(|v| *v == first) {
                return None;
            }
            percentile(&mut values, q)
        })
        .collect()
}

/// Zeroes every image element whose gradient at the same (row, col, channel)
/// is `<=` that channel's percentile threshold.
pub fn clip_weak_gradient(image: &Array3<f32>, gradient: &Array3<f32>, q: f32) -> Array3<f32> {
    let thresholds = channel_thresholds(gradient, q);
    let mut clipped = image.clone();
    Zip::indexed(&mut clipped)
        .and(gradient)
        .par_for_each(|(_, _, channel), value, &grad| {
            if let Some(threshold) = thresholds[channel] {
                if grad <= threshold {
                    *value = 0.0;
                }
            }
        });
    clipped
}
