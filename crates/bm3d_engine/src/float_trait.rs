//! Float trait abstraction for f32/f64 support.
//!
//! The engine runs in `f32` by default; every numeric kernel is generic so
//! the same code paths can be exercised in `f64` for validation.

use num_traits::{Float, FromPrimitive, NumAssign};
use rustfft::FftNum;
use std::fmt::Debug;
use std::iter::Sum;

/// Floating point types supported by the denoising engine.
///
/// Combines the bounds every kernel needs:
/// - Basic float operations (Float, NumAssign)
/// - FFT compatibility (FftNum from rustfft, used by the DCT)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
pub trait Bm3dFloat:
    Float + FftNum + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// The constant PI for this float type.
    const PI: Self;

    /// Largest value of an 8-bit sample.
    const SAMPLE_MAX: Self;

    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;

    /// Widen an 8-bit sample without rescaling (0..=255 stays 0..=255).
    fn from_sample(val: u8) -> Self;

    /// Quantize back to an 8-bit sample: round half away from zero, clamp to
    /// 0..=255. NaN maps to 0.
    #[inline]
    fn to_sample(self) -> u8 {
        let v = self.round();
        if v.is_nan() || v <= Self::zero() {
            0
        } else if v >= Self::SAMPLE_MAX {
            u8::MAX
        } else {
            v.to_u8().unwrap_or(u8::MAX)
        }
    }
}

impl Bm3dFloat for f32 {
    const PI: Self = std::f32::consts::PI;
    const SAMPLE_MAX: Self = 255.0;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }

    #[inline]
    fn from_sample(val: u8) -> Self {
        val as f32
    }
}

impl Bm3dFloat for f64 {
    const PI: Self = std::f64::consts::PI;
    const SAMPLE_MAX: Self = 255.0;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }

    #[inline]
    fn from_sample(val: u8) -> Self {
        val as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_trait_impl() {
        let val: f32 = Bm3dFloat::from_f64_c(std::f64::consts::PI);
        assert!((val - std::f32::consts::PI).abs() < 1e-5);

        let usize_val: f32 = Bm3dFloat::usize_as(42);
        assert_eq!(usize_val, 42.0f32);

        let sample: f32 = Bm3dFloat::from_sample(200);
        assert_eq!(sample, 200.0f32);
    }

    #[test]
    fn test_f64_trait_impl() {
        let val: f64 = Bm3dFloat::from_f64_c(std::f64::consts::PI);
        assert!((val - std::f64::consts::PI).abs() < 1e-14);

        let sample: f64 = Bm3dFloat::from_sample(7);
        assert_eq!(sample, 7.0f64);
    }

    #[test]
    fn test_to_sample_rounds_half_away_from_zero() {
        assert_eq!(127.5f32.to_sample(), 128);
        assert_eq!(127.49f32.to_sample(), 127);
        assert_eq!(0.5f64.to_sample(), 1);
    }

    #[test]
    fn test_to_sample_clamps() {
        assert_eq!((-3.0f32).to_sample(), 0);
        assert_eq!(254.6f32.to_sample(), 255);
        assert_eq!(1e9f32.to_sample(), 255);
        assert_eq!(f32::NAN.to_sample(), 0);
        assert_eq!(f64::INFINITY.to_sample(), 255);
    }
}
