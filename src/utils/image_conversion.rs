//! Conversions between `image` buffers and ndarray model tensors.

use crate::{Error, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Memory layout expected by a model input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[batch, height, width, channels]`
    Nhwc,
    /// `[batch, channels, height, width]`
    Nchw,
}

/// Per-channel `(x - mean) / std` normalization in 0..255 pixel units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// Same mean and std for every channel
    #[must_use]
    pub const fn uniform(mean: f32, std: f32) -> Self {
        Self {
            mean: [mean; 3],
            std: [std; 3],
        }
    }

    /// Distinct statistics per channel
    #[must_use]
    pub const fn per_channel(mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { mean, std }
    }

    fn apply(&self, value: u8, channel: usize) -> f32 {
        (f32::from(value) - self.mean[channel]) / self.std[channel]
    }
}

/// Resize an RGB image to `width x height` and pack it as a batch-of-one tensor
///
/// # Errors
///
/// Returns an error if the target size is empty or a normalization std is zero
#[allow(clippy::cast_possible_truncation)] // Indices come from a u32-sized buffer
pub fn rgb_to_tensor(
    image: &RgbImage,
    width: u32,
    height: u32,
    normalization: &Normalization,
    layout: TensorLayout,
) -> Result<Array4<f32>> {
    if width == 0 || height == 0 {
        return Err(Error::ModelInputError(format!(
            "Invalid tensor size {width}x{height}"
        )));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::InvalidInput("Cannot convert an empty image".to_string()));
    }
    if normalization.std.iter().any(|s| s.abs() < f32::EPSILON) {
        return Err(Error::ModelInputError("Normalization std must be non-zero".to_string()));
    }

    let resized;
    let source = if image.dimensions() == (width, height) {
        image
    } else {
        resized = imageops::resize(image, width, height, FilterType::Triangle);
        &resized
    };

    let nhwc = Array4::from_shape_fn(
        (1, height as usize, width as usize, 3),
        |(_, y, x, c)| normalization.apply(source.get_pixel(x as u32, y as u32)[c], c),
    );

    Ok(match layout {
        TensorLayout::Nhwc => nhwc,
        TensorLayout::Nchw => nhwc.permuted_axes([0, 3, 1, 2]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_tensor_shapes() {
        let image = RgbImage::from_pixel(40, 20, Rgb([128, 128, 128]));
        let norm = Normalization::uniform(128.0, 128.0);

        let nhwc = rgb_to_tensor(&image, 30, 30, &norm, TensorLayout::Nhwc).unwrap();
        assert_eq!(nhwc.shape(), &[1, 30, 30, 3]);
        assert!(nhwc.iter().all(|v| v.abs() < 1e-6));

        let nchw = rgb_to_tensor(&image, 30, 10, &norm, TensorLayout::Nchw).unwrap();
        assert_eq!(nchw.shape(), &[1, 3, 10, 30]);
    }

    #[test]
    fn test_per_channel_normalization() {
        let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 100]));
        let norm = Normalization::per_channel([0.0, 0.0, 50.0], [255.0, 1.0, 50.0]);
        let tensor = rgb_to_tensor(&image, 2, 2, &norm, TensorLayout::Nchw).unwrap();

        assert!((tensor[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 0, 0]].abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_inputs() {
        let image = RgbImage::new(4, 4);
        let norm = Normalization::uniform(0.0, 1.0);
        assert!(rgb_to_tensor(&image, 0, 4, &norm, TensorLayout::Nhwc).is_err());
        assert!(rgb_to_tensor(&RgbImage::new(0, 0), 4, 4, &norm, TensorLayout::Nhwc).is_err());
        assert!(rgb_to_tensor(&image, 4, 4, &Normalization::uniform(0.0, 0.0), TensorLayout::Nhwc).is_err());
    }
}
