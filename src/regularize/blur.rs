use ndarray::{Array3, Zip};

/// Normalized box filter over the two spatial axes of a (H, W, C) array.
///
/// Each channel is smoothed independently with a `size x size` window whose
/// anchor sits at `size / 2`. Out-of-range taps mirror around the edge pixel
/// without repeating it (`dcb|abcd|cba`).
pub fn box_blur(image: &Array3<f32>, size: usize) -> Array3<f32> {
    if size <= 1 || image.is_empty() {
        return image.clone();
    }
    let horizontal = blur_axis(image, size, 1);
    blur_axis(&horizontal, size, 0)
}

fn blur_axis(input: &Array3<f32>, size: usize, axis: usize) -> Array3<f32> {
    let (height, width, _) = input.dim();
    let len = if axis == 0 { height } else { width };
    let before = (size / 2) as isize;
    let after = (size - 1) as isize - before;
    let norm = 1.0 / size as f32;

    let mut out = Array3::zeros(input.dim());
    Zip::indexed(&mut out).par_for_each(|(row, col, channel), value| {
        let centre = (if axis == 0 { row } else { col }) as isize;
        let mut sum = 0.0f32;
        for offset in -before..=after {
            let idx = reflect_101(centre + offset, len);
            sum += if axis == 0 {
                input[[idx, col, channel]]
            } else {
                input[[row, idx, channel]]
            };
        }
        *value = sum * norm;
    });
    out
}

/// Mirrors `index` into `0..len` without duplicating the border sample.
fn reflect_101(index: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let len = len as isize;
    let period = 2 * (len - 1);
    let wrapped = index.rem_euclid(period);
    let mirrored = if wrapped >= len { period - wrapped } else { wrapped };
    mirrored as usize
}
