use ndarray::ArrayView2;
use std::cmp::Ordering;

use crate::config::EngineConfig;
use crate::error::{Bm3dError, Result};
use crate::filtering::Bm3dMode;
use crate::float_trait::Bm3dFloat;
use crate::image::try_filled_vec;

/// Relative slack on the pruning bounds. The prescreen bounds come from f64
/// integral images while the exact distance is accumulated in `F`; the final
/// accept/reject decision is made on the exact distance.
const PRESCREEN_SLACK: f64 = 1e-3;

/// One entry of a group: patch position and its distance to the reference.
#[derive(Debug, Clone, Copy)]
pub struct PatchMatch<F: Bm3dFloat> {
    pub row: usize,
    pub col: usize,
    /// Mean squared difference per pixel.
    pub distance: F,
    /// Squared Euclidean offset from the reference position.
    pub offset_sq: usize,
}

impl<F: Bm3dFloat> PatchMatch<F> {
    pub fn reference(row: usize, col: usize) -> Self {
        Self {
            row,
            col,
            distance: F::zero(),
            offset_sq: 0,
        }
    }
}

impl<F: Bm3dFloat> Default for PatchMatch<F> {
    fn default() -> Self {
        Self::reference(0, 0)
    }
}

impl<F: Bm3dFloat> PartialEq for PatchMatch<F> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<F: Bm3dFloat> Eq for PatchMatch<F> {}

/// Ascending distance, then closer to the reference, then raster order.
/// Total for finite distances, which keeps the selected group independent
/// of the order candidates are visited in.
impl<F: Bm3dFloat> Ord for PatchMatch<F> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.offset_sq.cmp(&other.offset_sq))
            .then(self.row.cmp(&other.row))
            .then(self.col.cmp(&other.col))
    }
}

impl<F: Bm3dFloat> PartialOrd for PatchMatch<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// =============================================================================
// Integral images
// =============================================================================

/// Summed-area tables of a plane and of its squares.
///
/// Stored in f64 with a zero first row and column: entry `[r + 1, c + 1]`
/// holds the sum over `[0..=r, 0..=c]`. They provide O(1) patch sums for
/// two lower bounds of the SSD between patches `a` and `b` of `N` pixels:
/// 1. Mean bound: `(sum(a) - sum(b))^2 / N`
/// 2. Norm bound: `(|a| - |b|)^2`
pub struct IntegralImages {
    width: usize,
    height: usize,
    sum: Vec<f64>,
    sq_sum: Vec<f64>,
}

impl IntegralImages {
    /// Allocate tables for a `height x width` plane.
    pub fn try_new(height: usize, width: usize) -> Result<Self> {
        let len = (height + 1) * (width + 1);
        Ok(Self {
            width,
            height,
            sum: try_filled_vec("integral image", len, 0.0)?,
            sq_sum: try_filled_vec("integral image", len, 0.0)?,
        })
    }

    /// Recompute both tables from `plane`. The plane must match the
    /// dimensions the tables were allocated for.
    pub fn fill<F: Bm3dFloat>(&mut self, plane: ArrayView2<F>) {
        debug_assert_eq!(plane.dim(), (self.height, self.width));
        let stride = self.width + 1;
        for (r, row) in plane.outer_iter().enumerate() {
            let mut row_sum = 0.0;
            let mut row_sq_sum = 0.0;
            for (c, &v) in row.iter().enumerate() {
                let v = v.to_f64().unwrap_or(0.0);
                row_sum += v;
                row_sq_sum += v * v;
                let above = r * stride + c + 1;
                let here = above + stride;
                self.sum[here] = self.sum[above] + row_sum;
                self.sq_sum[here] = self.sq_sum[above] + row_sq_sum;
            }
        }
    }

    /// Sum and squared sum of the `size x size` patch at `(r, c)`.
    #[inline(always)]
    pub fn patch_sums(&self, r: usize, c: usize, size: usize) -> (f64, f64) {
        let stride = self.width + 1;
        let tl = r * stride + c;
        let tr = tl + size;
        let bl = tl + size * stride;
        let br = bl + size;
        (
            self.sum[br] - self.sum[tr] - self.sum[bl] + self.sum[tl],
            self.sq_sum[br] - self.sq_sum[tr] - self.sq_sum[bl] + self.sq_sum[tl],
        )
    }
}

/// Build integral images for `plane`.
pub fn compute_integral_images<F: Bm3dFloat>(plane: ArrayView2<F>) -> Result<IntegralImages> {
    let (h, w) = plane.dim();
    let mut integrals = IntegralImages::try_new(h, w)?;
    integrals.fill(plane);
    Ok(integrals)
}

// =============================================================================
// Matching
// =============================================================================

/// Parameters of a single block-matching query.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<F: Bm3dFloat> {
    pub patch_size: usize,
    pub search_window: usize,
    pub search_step: usize,
    /// Group size, reference included.
    pub max_matches: usize,
    /// Candidates farther than this (mean squared difference) are rejected.
    pub max_distance: F,
}

impl<F: Bm3dFloat> MatchRequest<F> {
    pub fn from_config(config: &EngineConfig, mode: Bm3dMode, sigma: f32) -> Self {
        Self {
            patch_size: config.patch_size,
            search_window: config.search_window,
            search_step: config.search_step,
            max_matches: config.max_matches(mode),
            max_distance: F::from_f32(config.match_distance(mode, sigma)).unwrap_or_else(F::zero),
        }
    }
}

/// Squared distance with early termination once `limit` is exceeded.
#[inline]
fn patch_ssd<F: Bm3dFloat>(
    image: &ArrayView2<F>,
    a: (usize, usize),
    b: (usize, usize),
    size: usize,
    limit: F,
) -> F {
    let mut ssd = F::zero();
    for i in 0..size {
        let row_a = image.row(a.0 + i);
        let row_b = image.row(b.0 + i);
        for j in 0..size {
            let d = row_a[a.1 + j] - row_b[b.1 + j];
            ssd += d * d;
        }
        if ssd > limit {
            return ssd;
        }
    }
    ssd
}

/// Insert `candidate` into the sorted prefix `out[..len]`, keeping at most
/// `out.len()` entries. Entry 0 is never displaced. Returns the new length.
#[inline]
fn insert_sorted<F: Bm3dFloat>(out: &mut [PatchMatch<F>], len: usize, candidate: PatchMatch<F>) -> usize {
    let cap = out.len();
    if len == cap && candidate >= out[len - 1] {
        return len;
    }
    let new_len = if len < cap { len + 1 } else { len };
    let mut i = new_len - 1;
    while i > 1 && out[i - 1] > candidate {
        out[i] = out[i - 1];
        i -= 1;
    }
    out[i] = candidate;
    new_len
}

/// Find the patches most similar to the reference at `ref_pos`.
///
/// The search window is centered on the reference and clipped so every
/// candidate patch lies inside the image. Matches are written to
/// `out[..n]` in ascending order and `n` is returned; `out[0]` is always
/// the reference itself with distance 0. At most
/// `min(request.max_matches, out.len())` entries are produced.
pub fn find_similar_patches<F: Bm3dFloat>(
    image: ArrayView2<F>,
    integrals: &IntegralImages,
    ref_pos: (usize, usize),
    request: &MatchRequest<F>,
    out: &mut [PatchMatch<F>],
) -> usize {
    let (ref_r, ref_c) = ref_pos;
    let p = request.patch_size;
    let (h, w) = image.dim();
    let cap = request.max_matches.min(out.len());
    if cap == 0 {
        return 0;
    }
    let out = &mut out[..cap];
    out[0] = PatchMatch::reference(ref_r, ref_c);
    let mut len = 1;

    let half = request.search_window / 2;
    let r_start = ref_r.saturating_sub(half);
    let r_end = (ref_r + half).min(h - p);
    let c_start = ref_c.saturating_sub(half);
    let c_end = (ref_c + half).min(w - p);

    let area = F::usize_as(p * p);
    let area_f64 = (p * p) as f64;
    let (ref_sum, ref_sq_sum) = integrals.patch_sums(ref_r, ref_c, p);
    let ref_norm = ref_sq_sum.max(0.0).sqrt();
    let step = request.search_step.max(1);
    let slack = F::one() + F::from_f64_c(PRESCREEN_SLACK);

    for r in (r_start..=r_end).step_by(step) {
        for c in (c_start..=c_end).step_by(step) {
            if r == ref_r && c == ref_c {
                continue;
            }
            // Current acceptance bound as an SSD.
            let worst = if len == cap {
                out[len - 1].distance
            } else {
                request.max_distance
            };
            let bound = worst * area;
            let bound_f64 = bound.to_f64().unwrap_or(f64::MAX) * (1.0 + PRESCREEN_SLACK);

            let (cand_sum, cand_sq_sum) = integrals.patch_sums(r, c, p);
            let diff_sum = cand_sum - ref_sum;
            if diff_sum * diff_sum / area_f64 > bound_f64 {
                continue;
            }
            let diff_norm = cand_sq_sum.max(0.0).sqrt() - ref_norm;
            if diff_norm * diff_norm > bound_f64 {
                continue;
            }

            let limit = bound * slack;
            let ssd = patch_ssd(&image, (ref_r, ref_c), (r, c), p, limit);
            if ssd > limit {
                continue;
            }
            let distance = ssd / area;
            if distance > request.max_distance {
                continue;
            }
            let dr = r.abs_diff(ref_r);
            let dc = c.abs_diff(ref_c);
            let candidate = PatchMatch {
                row: r,
                col: c,
                distance,
                offset_sq: dr * dr + dc * dc,
            };
            len = insert_sorted(out, len, candidate);
        }
    }
    len
}

/// Reference positions along one axis: `0, stride, 2 * stride, ...` plus
/// the last valid position `len - patch_size`, so the grid reaches the far
/// border.
pub fn reference_positions(len: usize, patch_size: usize, stride: usize) -> Vec<usize> {
    if len < patch_size || stride == 0 {
        return Vec::new();
    }
    let last = len - patch_size;
    let mut positions: Vec<usize> = (0..=last).step_by(stride).collect();
    if positions.last() != Some(&last) {
        positions.push(last);
    }
    positions
}

/// Run one block-matching query on `plane`, returning the sorted group.
///
/// Allocates its own integral images; the pipeline reuses them instead.
pub fn match_patches<F: Bm3dFloat>(
    plane: ArrayView2<F>,
    ref_pos: (usize, usize),
    config: &EngineConfig,
    mode: Bm3dMode,
    sigma: f32,
) -> Result<Vec<PatchMatch<F>>> {
    config.validate()?;
    let (h, w) = plane.dim();
    let p = config.patch_size;
    if ref_pos.0 + p > h || ref_pos.1 + p > w {
        return Err(Bm3dError::InvalidGeometry {
            width: w,
            height: h,
            channels: 1,
            reason: format!(
                "reference patch at ({}, {}) does not fit inside the plane",
                ref_pos.0, ref_pos.1
            ),
        });
    }
    let integrals = compute_integral_images(plane)?;
    let request = MatchRequest::from_config(config, mode, sigma);
    let mut out = try_filled_vec("match list", request.max_matches, PatchMatch::default())?;
    let n = find_similar_patches(plane, &integrals, ref_pos, &request, &mut out);
    out.truncate(n);
    Ok(out)
}
