//! Image geometry and conversions between interleaved 8-bit samples and
//! per-channel float planes.

use std::fmt;

use ndarray::{Array2, Axis};
use rayon::prelude::*;

use crate::error::{Bm3dError, Result};
use crate::float_trait::Bm3dFloat;

/// Dimensions of an interleaved 8-bit image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageGeometry {
    pub width: usize,
    pub height: usize,
    /// 1 (grayscale) or 3 (RGB), interleaved per pixel.
    pub channels: usize,
}

impl fmt::Display for ImageGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

impl ImageGeometry {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> Bm3dError {
        Bm3dError::InvalidGeometry {
            width: self.width,
            height: self.height,
            channels: self.channels,
            reason: reason.into(),
        }
    }

    /// Check that the geometry is usable with the given patch size.
    pub fn validate(&self, patch_size: usize) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(self.invalid("width and height must be > 0"));
        }
        if self.channels != 1 && self.channels != 3 {
            return Err(self.invalid("channels must be 1 or 3"));
        }
        if self.width < patch_size || self.height < patch_size {
            return Err(self.invalid(format!(
                "image is smaller than one {}x{} patch",
                patch_size, patch_size
            )));
        }
        if self.checked_sample_count().is_none() {
            return Err(self.invalid("sample count overflows usize"));
        }
        Ok(())
    }

    fn checked_sample_count(&self) -> Option<usize> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(self.channels)
    }

    /// Pixels per channel plane.
    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }

    /// Total interleaved samples (`width * height * channels`).
    pub fn sample_count(&self) -> usize {
        self.plane_len() * self.channels
    }
}

/// Reserve a vector of exactly `len` copies of `value`, reporting failure
/// instead of aborting.
pub(crate) fn try_filled_vec<T: Clone>(what: &'static str, len: usize, value: T) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| Bm3dError::AllocationFailure { what, elements: len })?;
    v.resize(len, value);
    Ok(v)
}

/// Zero-filled `rows x cols` plane, allocated fallibly.
pub(crate) fn try_zeroed_plane<F: Bm3dFloat>(
    what: &'static str,
    rows: usize,
    cols: usize,
) -> Result<Array2<F>> {
    let data = try_filled_vec(what, rows * cols, F::zero())?;
    Array2::from_shape_vec((rows, cols), data).map_err(|_| Bm3dError::AllocationFailure {
        what,
        elements: rows * cols,
    })
}

/// Copy channel `channel` of an interleaved image into `plane`.
///
/// `plane` must be `height x width` and `src` must hold
/// `geometry.sample_count()` samples.
pub(crate) fn extract_plane<F: Bm3dFloat>(
    src: &[u8],
    geometry: ImageGeometry,
    channel: usize,
    plane: &mut Array2<F>,
) {
    let stride = geometry.channels;
    let row_len = geometry.width * stride;
    plane
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(src.par_chunks(row_len))
        .for_each(|(mut row, samples)| {
            for (dst, px) in row.iter_mut().zip(samples.chunks_exact(stride)) {
                *dst = F::from_sample(px[channel]);
            }
        });
}

/// Quantize `plane` into channel `channel` of an interleaved image.
pub(crate) fn store_plane<F: Bm3dFloat>(
    plane: &Array2<F>,
    geometry: ImageGeometry,
    channel: usize,
    dst: &mut [u8],
) {
    let stride = geometry.channels;
    let row_len = geometry.width * stride;
    plane
        .axis_iter(Axis(0))
        .into_par_iter()
        .zip(dst.par_chunks_mut(row_len))
        .for_each(|(row, samples)| {
            for (v, px) in row.iter().zip(samples.chunks_exact_mut(stride)) {
                px[channel] = v.to_sample();
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_display() {
        assert_eq!(ImageGeometry::new(64, 32, 3).to_string(), "64x32x3");
    }

    #[test]
    fn test_geometry_validation() {
        assert!(ImageGeometry::new(64, 64, 1).validate(8).is_ok());
        assert!(ImageGeometry::new(8, 8, 3).validate(8).is_ok());

        for geometry in [
            ImageGeometry::new(0, 64, 1),
            ImageGeometry::new(64, 0, 1),
            ImageGeometry::new(64, 64, 2),
            ImageGeometry::new(64, 64, 4),
            ImageGeometry::new(7, 64, 1),
            ImageGeometry::new(64, 5, 3),
            ImageGeometry::new(usize::MAX, 2, 1),
        ] {
            assert!(
                matches!(
                    geometry.validate(8),
                    Err(Bm3dError::InvalidGeometry { .. })
                ),
                "geometry {} should be rejected",
                geometry
            );
        }
    }

    #[test]
    fn test_sample_count() {
        let g = ImageGeometry::new(10, 4, 3);
        assert_eq!(g.plane_len(), 40);
        assert_eq!(g.sample_count(), 120);
    }

    #[test]
    fn test_extract_store_interleaved_channels() {
        let geometry = ImageGeometry::new(4, 2, 3);
        let src: Vec<u8> = (0..geometry.sample_count() as u8).collect();

        let mut plane = Array2::<f32>::zeros((2, 4));
        extract_plane(&src, geometry, 1, &mut plane);
        // Channel 1 of pixel (r, c) sits at 3 * (r * 4 + c) + 1.
        assert_eq!(plane[[0, 0]], 1.0);
        assert_eq!(plane[[0, 3]], 10.0);
        assert_eq!(plane[[1, 2]], 19.0);

        let mut dst = vec![0u8; geometry.sample_count()];
        for channel in 0..3 {
            extract_plane(&src, geometry, channel, &mut plane);
            store_plane(&plane, geometry, channel, &mut dst);
        }
        assert_eq!(dst, src);
    }

    #[test]
    fn test_store_plane_quantizes() {
        let geometry = ImageGeometry::new(3, 1, 1);
        let plane = Array2::from_shape_vec((1, 3), vec![-4.0f32, 99.5, 300.0]).unwrap();
        let mut dst = vec![0u8; 3];
        store_plane(&plane, geometry, 0, &mut dst);
        assert_eq!(dst, vec![0, 100, 255]);
    }

    #[test]
    fn test_try_zeroed_plane() {
        let plane: Array2<f64> = try_zeroed_plane("test plane", 3, 5).unwrap();
        assert_eq!(plane.dim(), (3, 5));
        assert!(plane.iter().all(|&v| v == 0.0));

        let err = try_filled_vec::<u64>("huge", usize::MAX / 4, 0).unwrap_err();
        assert!(matches!(err, Bm3dError::AllocationFailure { what: "huge", .. }));
    }
}
