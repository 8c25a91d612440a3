//! Layer kinds of the reference network with input-gradient backward passes.
//!
//! All tensors here are raw channel-first `(C, H, W)` arrays.

use ndarray::{s, Array1, Array3, Array4, ArrayView3, Zip};

use crate::error::{Result, VizError};

/// 3x3 convolution, stride 1, zero padding 1, followed by ReLU.
#[derive(Debug, Clone)]
pub struct Conv2d {
    /// (out_channels, in_channels, 3, 3)
    pub weight: Array4<f32>,
    /// (out_channels,)
    pub bias: Array1<f32>,
}

impl Conv2d {
    pub const KERNEL: usize = 3;

    pub fn new(weight: Array4<f32>, bias: Array1<f32>) -> Result<Self> {
        let (out_channels, _, kh, kw) = weight.dim();
        if kh != Self::KERNEL || kw != Self::KERNEL {
            return Err(VizError::Weights(format!(
                "expected 3x3 kernels, got {kh}x{kw}"
            )));
        }
        if bias.len() != out_channels {
            return Err(VizError::Weights(format!(
                "bias has {} entries for {out_channels} output channels",
                bias.len()
            )));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    /// Post-ReLU activation.
    pub fn forward(&self, input: ArrayView3<f32>) -> Array3<f32> {
        let (_, height, width) = input.dim();
        let mut output = Array3::zeros((self.out_channels(), height, width));

        Zip::from(output.outer_iter_mut())
            .and(self.weight.outer_iter())
            .and(&self.bias)
            .par_for_each(|mut plane, kernel, &bias| {
                plane.fill(bias);
                for (in_plane, taps) in input.outer_iter().zip(kernel.outer_iter()) {
                    for ky in 0..Self::KERNEL {
                        for kx in 0..Self::KERNEL {
                            let tap = taps[[ky, kx]];
                            if tap == 0.0 {
                                continue;
                            }
                            let (out_rows, in_rows) = shifted(ky, height);
                            let (out_cols, in_cols) = shifted(kx, width);
                            plane
                                .slice_mut(s![out_rows.0..out_rows.1, out_cols.0..out_cols.1])
                                .scaled_add(
                                    tap,
                                    &in_plane.slice(s![in_rows.0..in_rows.1, in_cols.0..in_cols.1]),
                                );
                        }
                    }
                }
                plane.mapv_inplace(|v| v.max(0.0));
            });

        output
    }

    /// Gradient w.r.t. the input given the post-ReLU `output` and the
    /// gradient flowing into it.
    pub fn backward(&self, output: &Array3<f32>, grad_output: &Array3<f32>) -> Array3<f32> {
        let (_, height, width) = output.dim();
        let mut grad_pre = grad_output.clone();
        Zip::from(&mut grad_pre)
            .and(output)
            .par_for_each(|g, &activation| {
                if activation <= 0.0 {
                    *g = 0.0;
                }
            });

        let mut grad_input = Array3::zeros((self.in_channels(), height, width));
        Zip::indexed(grad_input.outer_iter_mut()).par_for_each(|input_channel, mut plane| {
            for (out_channel, grad_plane) in grad_pre.outer_iter().enumerate() {
                for ky in 0..Self::KERNEL {
                    for kx in 0..Self::KERNEL {
                        let tap = self.weight[[out_channel, input_channel, ky, kx]];
                        if tap == 0.0 {
                            continue;
                        }
                        let (out_rows, in_rows) = shifted(ky, height);
                        let (out_cols, in_cols) = shifted(kx, width);
                        plane
                            .slice_mut(s![in_rows.0..in_rows.1, in_cols.0..in_cols.1])
                            .scaled_add(
                                tap,
                                &grad_plane.slice(s![out_rows.0..out_rows.1, out_cols.0..out_cols.1]),
                            );
                    }
                }
            }
        });

        grad_input
    }
}

/// Output and input index ranges touched by kernel tap `k` along an axis of
/// length `len` with padding 1: output `i` reads input `i + k - 1`.
fn shifted(k: usize, len: usize) -> ((usize, usize), (usize, usize)) {
    match k {
        0 => ((1.min(len), len), (0, len.saturating_sub(1))),
        1 => ((0, len), (0, len)),
        _ => ((0, len.saturating_sub(1)), (1.min(len), len)),
    }
}

/// 2x2 max pooling with stride 2; odd trailing rows/columns are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxPool2d;

impl MaxPool2d {
    pub fn forward(&self, input: ArrayView3<f32>) -> Array3<f32> {
        let (channels, height, width) = input.dim();
        let mut output = Array3::zeros((channels, height / 2, width / 2));
        Zip::indexed(&mut output).par_for_each(|(c, y, x), value| {
            *value = input
                .slice(s![c, 2 * y..2 * y + 2, 2 * x..2 * x + 2])
                .iter()
                .cloned()
                .fold(f32::NEG_INFINITY, f32::max);
        });
        output
    }

    /// Routes each output gradient to the first maximal input of its window.
    pub fn backward(&self, input: ArrayView3<f32>, grad_output: &Array3<f32>) -> Array3<f32> {
        let mut grad_input = Array3::zeros(input.dim());
        let (channels, out_h, out_w) = grad_output.dim();
        for c in 0..channels {
            for y in 0..out_h {
                for x in 0..out_w {
                    let mut best = (2 * y, 2 * x);
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let (row, col) = (2 * y + dy, 2 * x + dx);
                            if input[[c, row, col]] > input[[c, best.0, best.1]] {
                                best = (row, col);
                            }
                        }
                    }
                    grad_input[[c, best.0, best.1]] += grad_output[[c, y, x]];
                }
            }
        }
        grad_input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array4};

    fn ones_conv(in_channels: usize, out_channels: usize) -> Conv2d {
        Conv2d::new(
            Array4::from_elem((out_channels, in_channels, 3, 3), 1.0),
            Array1::zeros(out_channels),
        )
        .unwrap()
    }

    #[test]
    fn conv_counts_valid_neighbours() {
        let conv = ones_conv(3, 1);
        let input = Array3::from_elem((3, 4, 4), 1.0f32);
        let output = conv.forward(input.view());
        assert_eq!(output.dim(), (1, 4, 4));
        assert_eq!(output[[0, 0, 0]], 12.0);
        assert_eq!(output[[0, 0, 1]], 18.0);
        assert_eq!(output[[0, 1, 1]], 27.0);
    }

    #[test]
    fn conv_applies_relu() {
        let conv = Conv2d::new(
            Array4::from_elem((1, 1, 3, 3), -1.0),
            Array1::from_elem(1, 0.5),
        )
        .unwrap();
        let input = Array3::from_elem((1, 3, 3), 1.0f32);
        let output = conv.forward(input.view());
        assert!(output.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn conv_backward_matches_neighbour_counts() {
        let conv = ones_conv(2, 1);
        let input = Array3::from_elem((2, 4, 4), 1.0f32);
        let output = conv.forward(input.view());
        let grad_output = Array3::from_elem((1, 4, 4), 1.0f32);
        let grad_input = conv.backward(&output, &grad_output);
        assert_eq!(grad_input.dim(), (2, 4, 4));
        assert_eq!(grad_input[[0, 0, 0]], 4.0);
        assert_eq!(grad_input[[1, 0, 2]], 6.0);
        assert_eq!(grad_input[[0, 2, 2]], 9.0);
    }

    #[test]
    fn rejects_mismatched_bias() {
        let err = Conv2d::new(Array4::zeros((2, 1, 3, 3)), Array1::zeros(3)).unwrap_err();
        assert!(matches!(err, VizError::Weights(_)));
    }

    #[test]
    fn max_pool_routes_gradient_to_maximum() {
        let input = Array3::from_shape_vec((1, 2, 2), vec![1.0f32, 4.0, 3.0, 2.0]).unwrap();
        let pooled = MaxPool2d.forward(input.view());
        assert_eq!(pooled.dim(), (1, 1, 1));
        assert_eq!(pooled[[0, 0, 0]], 4.0);

        let grad = MaxPool2d.backward(input.view(), &Array3::from_elem((1, 1, 1), 1.0));
        assert_eq!(grad[[0, 0, 1]], 1.0);
        assert_eq!(grad.sum(), 1.0);
    }
}
