//! Safe casting utilities for pixel dimensions and intensities

use crate::{Error, Result};

/// Safely convert usize to u32 with overflow checking
///
/// # Errors
///
/// Returns an error if the value exceeds `u32::MAX`
pub fn usize_to_u32(value: usize) -> Result<u32> {
    value
        .try_into()
        .map_err(|_| Error::InvalidInput(format!("Value {value} too large to fit in u32")))
}

/// Round and clamp f64 to u32, mapping non-finite input to `min`
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Clamping ensures safe truncation
#[allow(clippy::cast_sign_loss)] // Clamped to a non-negative range first
pub fn f64_to_u32_clamp(value: f64, min: u32, max: u32) -> u32 {
    let (min, max) = if min <= max { (min, max) } else { (max, min) };

    if !value.is_finite() {
        return min;
    }

    let clamped = value.round().clamp(f64::from(min), f64::from(max));
    (clamped as u32).clamp(min, max)
}

/// Round and saturate an intensity to the u8 range
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Clamped to 0..=255 first
#[allow(clippy::cast_sign_loss)] // Clamped to 0..=255 first
pub fn f32_to_u8_saturate(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_usize_to_u32() {
        assert_eq!(usize_to_u32(42).unwrap(), 42);
        assert_eq!(usize_to_u32(u32::MAX as usize).unwrap(), u32::MAX);

        if std::mem::size_of::<usize>() > 4 {
            assert!(usize_to_u32(u32::MAX as usize + 1).is_err());
        }
    }

    #[test]
    fn test_f64_to_u32_clamp() {
        assert_eq!(f64_to_u32_clamp(36.78, 1, 8192), 37);
        assert_eq!(f64_to_u32_clamp(-5.0, 1, 8192), 1);
        assert_eq!(f64_to_u32_clamp(1e12, 1, 8192), 8192);
        assert_eq!(f64_to_u32_clamp(f64::NAN, 1, 8192), 1);
        assert_eq!(f64_to_u32_clamp(50.0, 100, 10), 50);
    }

    #[test]
    fn test_f32_to_u8_saturate() {
        assert_eq!(f32_to_u8_saturate(127.4), 127);
        assert_eq!(f32_to_u8_saturate(-3.0), 0);
        assert_eq!(f32_to_u8_saturate(300.0), 255);
        assert_eq!(f32_to_u8_saturate(f32::NAN), 0);
        assert_eq!(f32_to_u8_saturate(f32::INFINITY), 255);
    }

    proptest! {
        #[test]
        fn prop_f64_to_u32_clamp_within_bounds(value in any::<f64>(), a in 0u32..10_000, b in 0u32..10_000) {
            let result = f64_to_u32_clamp(value, a, b);
            prop_assert!(result >= a.min(b) && result <= a.max(b));
        }

        #[test]
        fn prop_f32_to_u8_exact_for_integers(value in 0u8..=255) {
            prop_assert_eq!(f32_to_u8_saturate(f32::from(value)), value);
        }
    }
}
