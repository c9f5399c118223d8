//! Weighted aggregation of filtered patches back into a pixel grid.
//!
//! Groups are filtered band by band; each band owns a partial
//! numerator/denominator covering every row its groups can reach. Partials
//! are merged into the full-image accumulator in band order, so the sums do
//! not depend on how rayon scheduled the bands.

use ndarray::{s, Array2, Zip};

use crate::error::Result;
use crate::float_trait::Bm3dFloat;
use crate::image::try_zeroed_plane;

/// Denominators at or below this are treated as "no estimate".
pub const AGGREGATION_EPSILON: f64 = 1e-30;

/// Separable sine window over a `P x P` patch, normalized to mean 1 and
/// stored row-major. Edge pixels keep a positive weight.
pub fn compute_patch_blend_weights<F: Bm3dFloat>(patch_size: usize) -> Vec<F> {
    if patch_size <= 1 {
        return vec![F::one(); patch_size.max(1)];
    }
    let n = F::usize_as(patch_size);
    let half = F::from_f64_c(0.5);
    let window: Vec<F> = (0..patch_size)
        .map(|i| (F::PI * (F::usize_as(i) + half) / n).sin())
        .collect();

    let mut weights: Vec<F> = window
        .iter()
        .flat_map(|&wr| window.iter().map(move |&wc| wr * wc))
        .collect();
    let mean = weights.iter().copied().sum::<F>() / F::usize_as(weights.len());
    if mean > F::zero() {
        weights.iter_mut().for_each(|v| *v /= mean);
    }
    weights
}

/// Rows `[start, end)` touched by groups whose references lie on rows
/// `first_ref..=last_ref`, when matches stay within `half` rows of their
/// reference.
pub fn band_row_span(
    first_ref: usize,
    last_ref: usize,
    half: usize,
    patch_size: usize,
    height: usize,
) -> (usize, usize) {
    let start = first_ref.saturating_sub(half);
    let end = (last_ref + half).min(height - patch_size) + patch_size;
    (start, end)
}

/// Partial sums for one band of reference rows.
pub struct BandAccumulator<F: Bm3dFloat> {
    row_start: usize,
    numerator: Array2<F>,
    denominator: Array2<F>,
}

impl<F: Bm3dFloat> BandAccumulator<F> {
    /// Accumulator covering image rows `rows` of a `width`-wide image.
    pub fn try_new(rows: (usize, usize), width: usize) -> Result<Self> {
        let (start, end) = rows;
        Ok(Self {
            row_start: start,
            numerator: try_zeroed_plane("band numerator", end - start, width)?,
            denominator: try_zeroed_plane("band denominator", end - start, width)?,
        })
    }

    pub fn reset(&mut self) {
        self.numerator.fill(F::zero());
        self.denominator.fill(F::zero());
    }

    /// Add a filtered `P x P` patch anchored at image position `(row, col)`.
    pub fn add_patch(
        &mut self,
        patch: &[F],
        (row, col): (usize, usize),
        patch_size: usize,
        weight: F,
        blend: &[F],
    ) {
        let local_row = row - self.row_start;
        for (i, (values, window)) in patch
            .chunks_exact(patch_size)
            .zip(blend.chunks_exact(patch_size))
            .enumerate()
        {
            let mut num = self
                .numerator
                .slice_mut(s![local_row + i, col..col + patch_size]);
            let mut den = self
                .denominator
                .slice_mut(s![local_row + i, col..col + patch_size]);
            for j in 0..patch_size {
                let w = weight * window[j];
                num[j] += w * values[j];
                den[j] += w;
            }
        }
    }
}

/// Full-image numerator and denominator.
pub struct Accumulator<F: Bm3dFloat> {
    numerator: Array2<F>,
    denominator: Array2<F>,
}

impl<F: Bm3dFloat> Accumulator<F> {
    pub fn try_new(height: usize, width: usize) -> Result<Self> {
        Ok(Self {
            numerator: try_zeroed_plane("numerator", height, width)?,
            denominator: try_zeroed_plane("denominator", height, width)?,
        })
    }

    pub fn reset(&mut self) {
        self.numerator.fill(F::zero());
        self.denominator.fill(F::zero());
    }

    /// Add a band's partial sums. Call in band order for reproducible sums.
    pub fn merge_band(&mut self, band: &BandAccumulator<F>) {
        let rows = band.row_start..band.row_start + band.numerator.nrows();
        let mut num = self.numerator.slice_mut(s![rows.clone(), ..]);
        num += &band.numerator;
        let mut den = self.denominator.slice_mut(s![rows, ..]);
        den += &band.denominator;
    }

    /// Write `numerator / denominator` into `out`, falling back to `noisy`
    /// where nothing was accumulated.
    pub fn normalize_into(&self, noisy: &Array2<F>, out: &mut Array2<F>) {
        let eps = F::from_f64_c(AGGREGATION_EPSILON);
        Zip::from(out)
            .and(&self.numerator)
            .and(&self.denominator)
            .and(noisy)
            .par_for_each(|o, &n, &d, &x| {
                *o = if d > eps { n / d } else { x };
            });
    }

    /// Smallest accumulated weight over the image.
    pub fn min_weight(&self) -> F {
        self.denominator
            .iter()
            .copied()
            .fold(F::infinity(), |m, v| m.min(v))
    }
}
