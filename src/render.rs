//! Conversion between image tensors and displayable RGB images.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::Array3;

use crate::error::{Result, VizError};
use crate::tensor::{ImageTensor, Layout};

/// Spread of the standardized image around mid-gray before clipping.
const DISPLAY_SPREAD: f32 = 0.1;
const STD_EPSILON: f32 = 1e-5;

/// Turns an optimized channel-first tensor into an 8-bit RGB image.
///
/// The tensor is standardized, scaled to a 0.1 spread around 0.5, clipped to
/// `[0, 1]` and mapped onto `0..=255`.
pub fn deprocess(tensor: &ImageTensor) -> Result<RgbImage> {
    tensor.ensure_layout(Layout::ChannelFirst)?;
    let (channels, height, width) = tensor.dim();
    if channels != 3 {
        return Err(VizError::invalid(format!(
            "expected a 3-channel image, got {channels} channels"
        )));
    }

    let stats = tensor.statistics();
    let scale = DISPLAY_SPREAD / (stats.std + STD_EPSILON);
    let pixels: Vec<u8> = tensor
        .to_channel_last()?
        .data()
        .iter()
        .map(|value| {
            let unit = ((value - stats.mean) * scale + 0.5).clamp(0.0, 1.0);
            (unit * 255.0) as u8
        })
        .collect();

    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| VizError::invalid("pixel buffer does not match image dimensions"))
}

/// Loads an image from disk as a `(3, size, size)` channel-first tensor with
/// values in `0..=255`.
pub fn load_image<P: AsRef<Path>>(path: P, size: usize) -> Result<ImageTensor> {
    let rgb = image::open(path.as_ref())?.to_rgb8();
    let resized = imageops::resize(&rgb, size as u32, size as u32, FilterType::Triangle);
    let data = Array3::from_shape_fn((3, size, size), |(c, y, x)| {
        resized.get_pixel(x as u32, y as u32).0[c] as f32
    });
    Ok(ImageTensor::channel_first(data))
}

/// Square grid of equally sized tiles separated by `margin` black pixels.
///
/// The grid is `n x n` with `n = ceil(sqrt(len))`, filled row by row.
pub fn contact_sheet(tiles: &[RgbImage], margin: u32) -> Result<RgbImage> {
    let first = tiles
        .first()
        .ok_or_else(|| VizError::invalid("contact sheet needs at least one image"))?;
    let (tile_w, tile_h) = first.dimensions();
    if let Some(odd) = tiles.iter().find(|t| t.dimensions() != (tile_w, tile_h)) {
        return Err(VizError::invalid(format!(
            "contact sheet tiles must share a size: {}x{} vs {}x{}",
            tile_w,
            tile_h,
            odd.width(),
            odd.height()
        )));
    }

    let n = grid_side(tiles.len()) as u32;
    let width = n * tile_w + (n - 1) * margin;
    let height = n * tile_h + (n - 1) * margin;
    let mut sheet = ImageBuffer::from_pixel(width, height, Rgb([0, 0, 0]));

    for (i, tile) in tiles.iter().enumerate() {
        let row = i as u32 / n;
        let col = i as u32 % n;
        let x = col * (tile_w + margin);
        let y = row * (tile_h + margin);
        imageops::overlay(&mut sheet, tile, x as i64, y as i64);
    }

    Ok(sheet)
}

/// Side of the smallest square grid holding `count` tiles.
pub fn grid_side(count: usize) -> usize {
    let mut n = (count as f64).sqrt().floor() as usize;
    while n * n < count {
        n += 1;
    }
    n.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn deprocess_centres_on_mid_gray() {
        let data = Array3::from_shape_fn((3, 4, 5), |(c, y, x)| (c + y + x) as f32 * 10.0);
        let tensor = ImageTensor::channel_first(data);
        let image = deprocess(&tensor).unwrap();
        assert_eq!(image.dimensions(), (5, 4));

        let mean = image.pixels().flat_map(|p| p.0).map(f32::from).sum::<f32>()
            / (4 * 5 * 3) as f32;
        assert!((mean - 127.5).abs() < 2.0, "mean {mean}");
    }

    #[test]
    fn deprocess_of_constant_is_flat_gray() {
        let tensor = ImageTensor::channel_first(Array3::from_elem((3, 2, 2), 93.0));
        let image = deprocess(&tensor).unwrap();
        assert!(image.pixels().all(|p| p.0 == [127, 127, 127]));
    }

    #[test]
    fn deprocess_keeps_channel_order() {
        let mut data = Array3::zeros((3, 1, 1));
        data[[0, 0, 0]] = 10.0f32;
        data[[2, 0, 0]] = -10.0;
        let image = deprocess(&ImageTensor::channel_first(data)).unwrap();
        let [r, g, b] = image.get_pixel(0, 0).0;
        assert!(r > g && g > b);
    }

    #[test]
    fn deprocess_requires_rgb_channel_first() {
        let gray = ImageTensor::channel_first(Array3::zeros((1, 2, 2)));
        assert!(deprocess(&gray).is_err());
        let last = ImageTensor::channel_last(Array3::zeros((2, 2, 3)));
        assert!(matches!(
            deprocess(&last),
            Err(VizError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn load_image_resizes_to_square_channel_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("start.png");
        ImageBuffer::from_pixel(6, 4, Rgb([10u8, 20, 30]))
            .save(&path)
            .unwrap();

        let tensor = load_image(&path, 5).unwrap();
        assert_eq!(tensor.layout(), Layout::ChannelFirst);
        assert_eq!(tensor.dim(), (3, 5, 5));
        for (c, expected) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            assert!(tensor
                .data()
                .index_axis(ndarray::Axis(0), c)
                .iter()
                .all(|v| (v - expected).abs() < 1e-3));
        }
        assert!(load_image(dir.path().join("missing.png"), 5).is_err());
    }

    #[test]
    fn load_image_decodes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("start.jpg");
        ImageBuffer::from_pixel(16, 16, Rgb([200u8, 100, 50]))
            .save(&path)
            .unwrap();

        let tensor = load_image(&path, 8).unwrap();
        assert_eq!(tensor.dim(), (3, 8, 8));
        for (c, expected) in [200.0, 100.0, 50.0].into_iter().enumerate() {
            assert!(tensor
                .data()
                .index_axis(ndarray::Axis(0), c)
                .iter()
                .all(|v| (v - expected).abs() <= 4.0));
        }
    }

    #[test]
    fn grid_side_is_ceil_sqrt() {
        assert_eq!(grid_side(0), 1);
        assert_eq!(grid_side(1), 1);
        assert_eq!(grid_side(2), 2);
        assert_eq!(grid_side(4), 2);
        assert_eq!(grid_side(5), 3);
        assert_eq!(grid_side(16), 4);
    }

    #[test]
    fn contact_sheet_places_tiles_row_major() {
        let red = ImageBuffer::from_pixel(2, 2, Rgb([255, 0, 0]));
        let green = ImageBuffer::from_pixel(2, 2, Rgb([0, 255, 0]));
        let blue = ImageBuffer::from_pixel(2, 2, Rgb([0, 0, 255]));
        let sheet = contact_sheet(&[red, green, blue], 1).unwrap();
        assert_eq!(sheet.dimensions(), (5, 5));
        assert_eq!(sheet.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(sheet.get_pixel(2, 0).0, [0, 0, 0]);
        assert_eq!(sheet.get_pixel(3, 0).0, [0, 255, 0]);
        assert_eq!(sheet.get_pixel(0, 3).0, [0, 0, 255]);
        assert_eq!(sheet.get_pixel(4, 4).0, [0, 0, 0]);
    }

    #[test]
    fn contact_sheet_rejects_mixed_sizes() {
        let a = RgbImage::new(2, 2);
        let b = RgbImage::new(3, 2);
        assert!(contact_sheet(&[a, b], 0).is_err());
        assert!(contact_sheet(&[], 0).is_err());
    }
}
