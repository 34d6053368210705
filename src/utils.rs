//! Utility functions for pixel sampling and image warping.

pub mod image_conversion;
pub mod safe_cast;

use crate::geometry::Transform2D;
use crate::{Error, Result};
use image::{ImageBuffer, Pixel};
use nalgebra::Point2;
use safe_cast::f32_to_u8_saturate;

/// Largest output side accepted by [`warp_image`]
pub const MAX_WARP_DIMENSION: u32 = 8192;

/// Bilinear sample of every channel at a sub-pixel position.
///
/// Returns `None` outside `[0, width-1] x [0, height-1]`.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Coordinates are bounds-checked first
#[allow(clippy::cast_sign_loss)] // Coordinates are bounds-checked first
pub fn sample_bilinear<P>(image: &ImageBuffer<P, Vec<u8>>, x: f64, y: f64) -> Option<[f32; 4]>
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || !x.is_finite() || !y.is_finite() {
        return None;
    }
    let max_x = f64::from(width - 1);
    let max_y = f64::from(height - 1);
    if x < 0.0 || y < 0.0 || x > max_x || y > max_y {
        return None;
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (x - f64::from(x0)) as f32;
    let fy = (y - f64::from(y0)) as f32;

    let p00 = image.get_pixel(x0, y0).channels();
    let p10 = image.get_pixel(x1, y0).channels();
    let p01 = image.get_pixel(x0, y1).channels();
    let p11 = image.get_pixel(x1, y1).channels();

    let mut out = [0.0f32; 4];
    for (c, value) in out.iter_mut().enumerate().take(usize::from(P::CHANNEL_COUNT)) {
        let top = f32::from(p00[c]) * (1.0 - fx) + f32::from(p10[c]) * fx;
        let bottom = f32::from(p01[c]) * (1.0 - fx) + f32::from(p11[c]) * fx;
        *value = top * (1.0 - fy) + bottom * fy;
    }
    Some(out)
}

/// Resample `source` into a new `width x height` image through `output_from_source`.
///
/// Pixels whose pre-image falls outside the source stay black.
///
/// # Errors
///
/// Returns an error if the output size is empty or too large, or the
/// transform cannot be inverted
pub fn warp_image<P>(
    source: &ImageBuffer<P, Vec<u8>>,
    output_from_source: &Transform2D,
    width: u32,
    height: u32,
) -> Result<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8>,
{
    if width == 0 || height == 0 || width > MAX_WARP_DIMENSION || height > MAX_WARP_DIMENSION {
        return Err(Error::InvalidInput(format!(
            "Warp output {width}x{height} outside 1..={MAX_WARP_DIMENSION}"
        )));
    }
    let source_from_output = output_from_source
        .inverse()
        .ok_or_else(|| Error::InvalidInput("Warp transform is singular".to_string()))?;

    let channels = usize::from(P::CHANNEL_COUNT);
    let mut output = ImageBuffer::<P, Vec<u8>>::new(width, height);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let src = source_from_output.apply(Point2::new(f64::from(x), f64::from(y)));
        if let Some(sample) = sample_bilinear(source, src.x, src.y) {
            for (dst, value) in pixel.channels_mut().iter_mut().zip(&sample[..channels]) {
                *dst = f32_to_u8_saturate(*value);
            }
        }
    }
    Ok(output)
}
