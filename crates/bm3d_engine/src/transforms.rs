//! Orthonormal patch and group transforms.
//!
//! Patches are transformed with a separable 2D DCT-II (or an 8-point
//! Walsh-Hadamard fast path), groups additionally with a 1D DCT-II along the
//! stack. All transforms are orthonormal so white noise keeps its standard
//! deviation in every coefficient and the inverse is the transpose.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::error::{Bm3dError, Result};
use crate::float_trait::Bm3dFloat;
use crate::image::try_filled_vec;

/// Patch side length required by the Hadamard fast path.
pub const HADAMARD_PATCH_SIZE: usize = 8;

/// 2D transform applied to every patch of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchTransform {
    /// Orthonormal DCT-II, any patch size.
    #[default]
    Dct,
    /// Orthonormal Walsh-Hadamard, 8x8 patches only.
    Hadamard,
}

// =============================================================================
// 1D DCT
// =============================================================================

/// Orthonormal DCT-II (forward) and DCT-III (inverse) of a fixed length,
/// computed through a complex FFT of the same length.
///
/// The input is reordered (even samples ascending, odd samples descending),
/// transformed, and rotated by a quarter-sample twiddle.
pub struct DctPlan<F: Bm3dFloat> {
    len: usize,
    fft: Arc<dyn Fft<F>>,
    ifft: Arc<dyn Fft<F>>,
    /// `e^{-i*pi*k/(2n)}`
    twiddles: Vec<Complex<F>>,
    /// Orthonormal scale per output coefficient.
    scales: Vec<F>,
}

impl<F: Bm3dFloat> DctPlan<F> {
    pub fn new(len: usize, planner: &mut FftPlanner<F>) -> Self {
        let n = F::usize_as(len.max(1));
        let twiddles = (0..len)
            .map(|k| {
                let angle = -F::PI * F::usize_as(k) / (F::usize_as(2) * n);
                Complex::new(angle.cos(), angle.sin())
            })
            .collect();
        let dc_scale = (F::one() / n).sqrt();
        let ac_scale = (F::usize_as(2) / n).sqrt();
        let scales = (0..len)
            .map(|k| if k == 0 { dc_scale } else { ac_scale })
            .collect();

        Self {
            len,
            fft: planner.plan_fft_forward(len),
            ifft: planner.plan_fft_inverse(len),
            twiddles,
            scales,
        }
    }

    /// Scratch length required by `forward` / `inverse`.
    pub fn scratch_len(&self) -> usize {
        self.fft
            .get_inplace_scratch_len()
            .max(self.ifft.get_inplace_scratch_len())
    }

    /// Forward DCT-II of `data` in place.
    ///
    /// `work` needs at least `len` elements, `scratch` at least
    /// `scratch_len()`.
    pub fn forward(&self, data: &mut [F], work: &mut [Complex<F>], scratch: &mut [Complex<F>]) {
        let n = self.len;
        if n <= 1 {
            return;
        }
        let work = &mut work[..n];
        for (i, &x) in data[..n].iter().enumerate() {
            let dst = if i % 2 == 0 { i / 2 } else { n - 1 - i / 2 };
            work[dst] = Complex::new(x, F::zero());
        }

        let scratch_len = self.fft.get_inplace_scratch_len();
        self.fft
            .process_with_scratch(work, &mut scratch[..scratch_len]);

        for (k, out) in data[..n].iter_mut().enumerate() {
            *out = (work[k] * self.twiddles[k]).re * self.scales[k];
        }
    }

    /// Inverse (DCT-III) of `data` in place.
    pub fn inverse(&self, data: &mut [F], work: &mut [Complex<F>], scratch: &mut [Complex<F>]) {
        let n = self.len;
        if n <= 1 {
            return;
        }
        let work = &mut work[..n];
        for k in 0..n {
            let re = data[k] / self.scales[k];
            let im = if k == 0 {
                F::zero()
            } else {
                -(data[n - k] / self.scales[n - k])
            };
            // conj(twiddle) undoes the forward rotation.
            work[k] = Complex::new(re, im) * self.twiddles[k].conj();
        }

        let scratch_len = self.ifft.get_inplace_scratch_len();
        self.ifft
            .process_with_scratch(work, &mut scratch[..scratch_len]);

        let norm = F::one() / F::usize_as(n);
        for (i, out) in data[..n].iter_mut().enumerate() {
            let src = if i % 2 == 0 { i / 2 } else { n - 1 - i / 2 };
            *out = work[src].re * norm;
        }
    }
}

// =============================================================================
// Walsh-Hadamard
// =============================================================================

/// In-place orthonormal Walsh-Hadamard transform of 8 elements (natural
/// order). Self-inverse.
#[inline]
pub fn fwht8<F: Bm3dFloat>(buf: &mut [F]) {
    let buf = &mut buf[..HADAMARD_PATCH_SIZE];
    let mut half = 1;
    while half < HADAMARD_PATCH_SIZE {
        for start in (0..HADAMARD_PATCH_SIZE).step_by(half * 2) {
            for i in start..start + half {
                let a = buf[i];
                let b = buf[i + half];
                buf[i] = a + b;
                buf[i + half] = a - b;
            }
        }
        half *= 2;
    }
    let scale = F::one() / F::usize_as(HADAMARD_PATCH_SIZE).sqrt();
    for v in buf.iter_mut() {
        *v *= scale;
    }
}

// =============================================================================
// Plans
// =============================================================================

/// Per-worker buffers used by `TransformPlans`.
pub struct TransformScratch<F: Bm3dFloat> {
    line: Vec<F>,
    work: Vec<Complex<F>>,
    fft: Vec<Complex<F>>,
}

impl<F: Bm3dFloat> TransformScratch<F> {
    fn try_new(line_len: usize, fft_len: usize) -> Result<Self> {
        let zero = Complex::new(F::zero(), F::zero());
        Ok(Self {
            line: try_filled_vec("transform scratch", line_len, F::zero())?,
            work: try_filled_vec("transform scratch", line_len, zero)?,
            fft: try_filled_vec("transform scratch", fft_len, zero)?,
        })
    }
}

/// Plans for the 2D patch transform and the 1D stack transform of every
/// group length up to `max_group`.
///
/// Stacks are laid out as `[k][patch_size][patch_size]`, index
/// `i * P * P + r * P + c`.
pub struct TransformPlans<F: Bm3dFloat> {
    patch_size: usize,
    kind: PatchTransform,
    patch: DctPlan<F>,
    /// `group[k - 1]` transforms stacks of length `k`.
    group: Vec<DctPlan<F>>,
}

impl<F: Bm3dFloat> TransformPlans<F> {
    pub fn try_new(patch_size: usize, max_group: usize, kind: PatchTransform) -> Result<Self> {
        let max_group = max_group.max(1);
        let mut group = Vec::new();
        group
            .try_reserve_exact(max_group)
            .map_err(|_| Bm3dError::AllocationFailure {
                what: "group transform plans",
                elements: max_group,
            })?;

        let mut planner = FftPlanner::new();
        let patch = DctPlan::new(patch_size, &mut planner);
        group.extend((1..=max_group).map(|k| DctPlan::new(k, &mut planner)));
        Ok(Self {
            patch_size,
            kind,
            patch,
            group,
        })
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Allocate scratch large enough for any transform these plans run.
    pub fn make_scratch(&self) -> Result<TransformScratch<F>> {
        let line_len = self.patch_size.max(self.group.len());
        let fft_len = self
            .group
            .iter()
            .map(DctPlan::scratch_len)
            .chain(std::iter::once(self.patch.scratch_len()))
            .max()
            .unwrap_or(0);
        TransformScratch::try_new(line_len, fft_len)
    }

    fn transform_lines(
        &self,
        patch: &mut [F],
        scratch: &mut TransformScratch<F>,
        inverse: bool,
    ) {
        let p = self.patch_size;
        let TransformScratch { line, work, fft } = scratch;
        let line = &mut line[..p];

        let mut apply = |line: &mut [F]| match self.kind {
            PatchTransform::Hadamard => fwht8(line),
            PatchTransform::Dct if inverse => self.patch.inverse(line, work, fft),
            PatchTransform::Dct => self.patch.forward(line, work, fft),
        };

        for row in patch.chunks_exact_mut(p) {
            apply(row);
        }
        for c in 0..p {
            for r in 0..p {
                line[r] = patch[r * p + c];
            }
            apply(line);
            for r in 0..p {
                patch[r * p + c] = line[r];
            }
        }
    }

    /// 2D forward transform of one `P x P` patch (row-major) in place.
    pub fn forward_2d(&self, patch: &mut [F], scratch: &mut TransformScratch<F>) {
        self.transform_lines(patch, scratch, false);
    }

    /// 2D inverse transform of one `P x P` patch in place.
    pub fn inverse_2d(&self, patch: &mut [F], scratch: &mut TransformScratch<F>) {
        self.transform_lines(patch, scratch, true);
    }

    fn transform_stack(
        &self,
        stack: &mut [F],
        k: usize,
        scratch: &mut TransformScratch<F>,
        inverse: bool,
    ) {
        if k <= 1 {
            return;
        }
        let area = self.patch_size * self.patch_size;
        let plan = &self.group[k - 1];
        let TransformScratch { line, work, fft } = scratch;
        let line = &mut line[..k];
        for pos in 0..area {
            for i in 0..k {
                line[i] = stack[i * area + pos];
            }
            if inverse {
                plan.inverse(line, work, fft);
            } else {
                plan.forward(line, work, fft);
            }
            for i in 0..k {
                stack[i * area + pos] = line[i];
            }
        }
    }

    /// 3D forward transform of the first `k` patches of `stack` in place.
    pub fn forward_3d(&self, stack: &mut [F], k: usize, scratch: &mut TransformScratch<F>) {
        let area = self.patch_size * self.patch_size;
        for patch in stack[..k * area].chunks_exact_mut(area) {
            self.forward_2d(patch, scratch);
        }
        self.transform_stack(stack, k, scratch, false);
    }

    /// 3D inverse transform of the first `k` patches of `stack` in place.
    pub fn inverse_3d(&self, stack: &mut [F], k: usize, scratch: &mut TransformScratch<F>) {
        self.transform_stack(stack, k, scratch, true);
        let area = self.patch_size * self.patch_size;
        for patch in stack[..k * area].chunks_exact_mut(area) {
            self.inverse_2d(patch, scratch);
        }
    }
}
