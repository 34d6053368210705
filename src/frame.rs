//! Camera frames handed to the analysis pipeline.
//!
//! A [`Frame`] owns a packed RGB copy of the camera buffer plus the sensor
//! rotation relative to the display. Once built it is never mutated; the
//! pipeline moves it into the worker and drops it after analysis.

use crate::utils::safe_cast::usize_to_u32;
use crate::{Error, Result};
use image::{Rgb, RgbImage};

/// Fixed-point channel maximum of the BT.601 conversion (2^18 - 1)
const YUV_MAX_CHANNEL_VALUE: i32 = 262_143;

/// Camera frame with sensor orientation
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    rotation_degrees: i32,
}

impl Frame {
    /// Wrap an RGB image
    ///
    /// # Errors
    ///
    /// Returns an error if the image is empty or the rotation is not a multiple of 90
    pub fn new(image: RgbImage, rotation_degrees: i32) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidInput("Frame has no pixels".to_string()));
        }
        if rotation_degrees % 90 != 0 {
            return Err(Error::InvalidInput(format!(
                "Sensor rotation {rotation_degrees} is not a multiple of 90"
            )));
        }
        Ok(Self {
            image,
            rotation_degrees: rotation_degrees.rem_euclid(360),
        })
    }

    /// Copy a strided RGBA buffer; alpha is discarded
    ///
    /// # Errors
    ///
    /// Returns an error if the stride or buffer length does not cover the frame
    pub fn from_rgba(data: &[u8], width: u32, height: u32, row_stride: usize, rotation_degrees: i32) -> Result<Self> {
        let w = width as usize;
        let h = height as usize;
        if row_stride < w * 4 {
            return Err(Error::InvalidInput(format!(
                "Row stride {row_stride} shorter than {} bytes",
                w * 4
            )));
        }
        let required = if h == 0 { Some(0) } else { plane_extent(row_stride, h - 1, w * 4) };
        if required.map_or(true, |required| data.len() < required) {
            return Err(Error::InvalidInput(format!(
                "RGBA buffer of {} bytes too small for {width}x{height}",
                data.len()
            )));
        }

        let mut image = RgbImage::new(width, height);
        for (y, row) in image.rows_mut().enumerate() {
            let start = y * row_stride;
            for (pixel, src) in row.zip(data[start..start + w * 4].chunks_exact(4)) {
                *pixel = Rgb([src[0], src[1], src[2]]);
            }
        }
        Self::new(image, rotation_degrees)
    }

    /// Convert YUV 4:2:0 planes (any plane/pixel stride layout) to RGB
    ///
    /// # Errors
    ///
    /// Returns an error if a plane is too small for the given strides
    #[allow(clippy::too_many_arguments)]
    pub fn from_yuv420(
        y_plane: &[u8],
        u_plane: &[u8],
        v_plane: &[u8],
        width: u32,
        height: u32,
        y_row_stride: usize,
        uv_row_stride: usize,
        uv_pixel_stride: usize,
        rotation_degrees: i32,
    ) -> Result<Self> {
        let w = width as usize;
        let h = height as usize;
        if w == 0 || h == 0 {
            return Err(Error::InvalidInput("Frame has no pixels".to_string()));
        }
        let y_required = plane_extent(y_row_stride, h - 1, w);
        if y_row_stride < w || y_required.map_or(true, |required| y_plane.len() < required) {
            return Err(Error::InvalidInput("Y plane too small for frame".to_string()));
        }
        let last_uv = ((w - 1) >> 1)
            .checked_mul(uv_pixel_stride)
            .and_then(|tail| plane_extent(uv_row_stride, (h - 1) >> 1, tail));
        let Some(last_uv) = last_uv else {
            return Err(Error::InvalidInput("Chroma strides overflow".to_string()));
        };
        if uv_pixel_stride == 0 || u_plane.len() <= last_uv || v_plane.len() <= last_uv {
            return Err(Error::InvalidInput("Chroma planes too small for frame".to_string()));
        }

        let mut image = RgbImage::new(usize_to_u32(w)?, usize_to_u32(h)?);
        for (y, row) in image.rows_mut().enumerate() {
            let y_row = y_row_stride * y;
            let uv_row = uv_row_stride * (y >> 1);
            for (x, pixel) in row.enumerate() {
                let uv = uv_row + (x >> 1) * uv_pixel_stride;
                *pixel = yuv_to_rgb(y_plane[y_row + x], u_plane[uv], v_plane[uv]);
            }
        }
        Self::new(image, rotation_degrees)
    }

    /// RGB pixels
    #[must_use]
    pub const fn image(&self) -> &RgbImage {
        &self.image
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Sensor rotation in degrees, normalized to `0..360`
    #[must_use]
    pub const fn rotation_degrees(&self) -> i32 {
        self.rotation_degrees
    }
}

/// Fixed-point BT.601 video-range conversion
#[allow(clippy::cast_possible_truncation)] // Values are clamped to 0..=255 after the shift
#[allow(clippy::cast_sign_loss)] // Values are clamped to be non-negative
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let y = (i32::from(y) - 16).max(0);
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;

    let y1192 = 1192 * y;
    let r = (y1192 + 1634 * v).clamp(0, YUV_MAX_CHANNEL_VALUE);
    let g = (y1192 - 833 * v - 400 * u).clamp(0, YUV_MAX_CHANNEL_VALUE);
    let b = (y1192 + 2066 * u).clamp(0, YUV_MAX_CHANNEL_VALUE);

    Rgb([(r >> 10) as u8, (g >> 10) as u8, (b >> 10) as u8])
}

/// Bytes spanned by `rows` full strides plus a `tail`; `None` on overflow
fn plane_extent(row_stride: usize, rows: usize, tail: usize) -> Option<usize> {
    row_stride.checked_mul(rows)?.checked_add(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_validation() {
        let image = RgbImage::new(4, 4);
        assert!(Frame::new(image.clone(), 45).is_err());
        assert_eq!(Frame::new(image.clone(), -90).unwrap().rotation_degrees(), 270);
        assert_eq!(Frame::new(image, 450).unwrap().rotation_degrees(), 90);
        assert!(Frame::new(RgbImage::new(0, 3), 0).is_err());
    }

    #[test]
    fn test_from_rgba_with_padding() {
        // 2x2 frame with 4 bytes of row padding
        let stride = 12;
        let mut data = vec![0u8; stride * 2];
        data[0..4].copy_from_slice(&[10, 20, 30, 255]);
        data[stride + 4..stride + 8].copy_from_slice(&[40, 50, 60, 255]);

        let frame = Frame::from_rgba(&data, 2, 2, stride, 0).unwrap();
        assert_eq!(frame.image().get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(frame.image().get_pixel(1, 1), &Rgb([40, 50, 60]));

        assert!(Frame::from_rgba(&data, 2, 2, 4, 0).is_err());
        assert!(Frame::from_rgba(&data[..10], 2, 2, stride, 0).is_err());
    }

    #[test]
    fn test_yuv_gray_levels() {
        assert_eq!(yuv_to_rgb(16, 128, 128), Rgb([0, 0, 0]));
        let white = yuv_to_rgb(235, 128, 128);
        assert!(white.0.iter().all(|&c| c >= 254));
        let mid = yuv_to_rgb(126, 128, 128);
        assert_eq!(mid[0], mid[1]);
        assert_eq!(mid[1], mid[2]);
    }

    #[test]
    fn test_from_yuv420_interleaved_chroma() {
        // 4x2 frame, semi-planar chroma with pixel stride 2
        let y_plane = vec![235u8; 8];
        let uv = vec![128u8; 4];
        let frame = Frame::from_yuv420(&y_plane, &uv, &uv, 4, 2, 4, 4, 2, 90).unwrap();

        assert_eq!(frame.width(), 4);
        assert_eq!(frame.rotation_degrees(), 90);
        assert!(frame.image().pixels().all(|p| p[0] >= 254));

        assert!(Frame::from_yuv420(&y_plane[..5], &uv, &uv, 4, 2, 4, 4, 2, 0).is_err());
    }

    #[test]
    fn test_huge_strides_are_rejected() {
        let huge = usize::MAX / 2 + 1;
        assert!(matches!(
            Frame::from_rgba(&[0u8; 64], 1, 3, huge, 0),
            Err(Error::InvalidInput(_))
        ));

        let y_plane = vec![128u8; 16];
        let uv = vec![128u8; 8];
        assert!(matches!(
            Frame::from_yuv420(&y_plane, &uv, &uv, 4, 4, huge, 4, 2, 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Frame::from_yuv420(&y_plane, &uv, &uv, 4, 4, 4, huge, 2, 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Frame::from_yuv420(&y_plane, &uv, &uv, 4, 4, 4, 4, huge, 0),
            Err(Error::InvalidInput(_))
        ));
    }
}
