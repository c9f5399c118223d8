//! Group storage: the match table shared by a matching pass and the
//! per-worker patch stacks used while filtering.

use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::block_matching::PatchMatch;
use crate::error::Result;
use crate::float_trait::Bm3dFloat;
use crate::image::try_filled_vec;
use crate::transforms::{TransformPlans, TransformScratch};

/// Fixed-capacity arena of groups, one slot per reference position.
///
/// Slot `i` owns `entries[i * capacity..][..lens[i]]`. The table is sized
/// once for a geometry and refilled by every matching pass.
pub struct MatchTable<F: Bm3dFloat> {
    capacity: usize,
    refs: Vec<(usize, usize)>,
    entries: Vec<PatchMatch<F>>,
    lens: Vec<usize>,
}

impl<F: Bm3dFloat> MatchTable<F> {
    /// Allocate a table for the given reference positions (slot order) and
    /// group capacity.
    pub fn try_new(refs: Vec<(usize, usize)>, capacity: usize) -> Result<Self> {
        let entries = try_filled_vec(
            "match table",
            refs.len() * capacity,
            PatchMatch::default(),
        )?;
        let lens = try_filled_vec("match table lengths", refs.len(), 0)?;
        Ok(Self {
            capacity,
            refs,
            entries,
            lens,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slots(&self) -> usize {
        self.refs.len()
    }

    pub fn reference(&self, slot: usize) -> (usize, usize) {
        self.refs[slot]
    }

    /// Refill every slot in parallel. `fill` receives the reference
    /// position and the slot's storage and returns how many entries it
    /// wrote.
    pub fn par_fill<M>(&mut self, fill: M)
    where
        M: Fn((usize, usize), &mut [PatchMatch<F>]) -> usize + Sync,
    {
        let capacity = self.capacity;
        self.entries
            .par_chunks_mut(capacity)
            .zip(self.lens.par_iter_mut())
            .zip(self.refs.par_iter())
            .for_each(|((slot, len), &ref_pos)| {
                *len = fill(ref_pos, slot).min(capacity);
            });
    }

    /// The group stored in `slot`, reference first.
    pub fn group(&self, slot: usize) -> &[PatchMatch<F>] {
        let start = slot * self.capacity;
        &self.entries[start..start + self.lens[slot]]
    }
}

/// Copy the patches of `group` into consecutive `P x P` blocks of `dst`.
pub fn gather_patches<F: Bm3dFloat>(
    plane: ArrayView2<F>,
    group: &[PatchMatch<F>],
    patch_size: usize,
    dst: &mut [F],
) {
    let area = patch_size * patch_size;
    for (m, block) in group.iter().zip(dst.chunks_exact_mut(area)) {
        for (i, line) in block.chunks_exact_mut(patch_size).enumerate() {
            let row = plane.row(m.row + i);
            for (j, v) in line.iter_mut().enumerate() {
                *v = row[m.col + j];
            }
        }
    }
}

/// Staging buffers for filtering one group: the stack being filtered, the
/// pilot stack (Wiener pass only) and transform scratch.
pub struct GroupStack<F: Bm3dFloat> {
    pub(crate) noisy: Vec<F>,
    pub(crate) pilot: Vec<F>,
    pub(crate) scratch: TransformScratch<F>,
}

impl<F: Bm3dFloat> GroupStack<F> {
    pub fn try_new(plans: &TransformPlans<F>, capacity: usize) -> Result<Self> {
        let len = capacity * plans.patch_size() * plans.patch_size();
        Ok(Self {
            noisy: try_filled_vec("group stack", len, F::zero())?,
            pilot: try_filled_vec("group stack", len, F::zero())?,
            scratch: plans.make_scratch()?,
        })
    }

    /// Load the stacks for `group`: patches of `noisy` always, patches of
    /// `pilot` when given.
    pub fn load(
        &mut self,
        noisy: ArrayView2<F>,
        pilot: Option<ArrayView2<F>>,
        group: &[PatchMatch<F>],
        patch_size: usize,
    ) {
        gather_patches(noisy, group, patch_size, &mut self.noisy);
        if let Some(pilot) = pilot {
            gather_patches(pilot, group, patch_size, &mut self.pilot);
        }
    }

    /// The filtered stack after `filter_group`.
    pub fn filtered(&self, k: usize, patch_size: usize) -> &[F] {
        &self.noisy[..k * patch_size * patch_size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::PatchTransform;
    use ndarray::Array2;

    #[test]
    fn test_par_fill_and_group_views() {
        let refs = vec![(0, 0), (0, 3), (3, 0)];
        let mut table = MatchTable::<f32>::try_new(refs, 4).unwrap();
        assert_eq!(table.slots(), 3);
        assert_eq!(table.capacity(), 4);

        table.par_fill(|(r, c), out| {
            let n = 1 + r / 3 + c / 3;
            for (i, m) in out[..n].iter_mut().enumerate() {
                *m = PatchMatch::reference(r + i, c);
            }
            n
        });

        assert_eq!(table.group(0).len(), 1);
        assert_eq!(table.group(1).len(), 2);
        assert_eq!(table.group(2).len(), 2);
        assert_eq!(table.reference(2), (3, 0));
        assert_eq!((table.group(2)[1].row, table.group(2)[1].col), (4, 0));
    }

    #[test]
    fn test_gather_patches_layout() {
        let plane = Array2::from_shape_fn((6, 6), |(r, c)| (r * 10 + c) as f32);
        let group = [PatchMatch::reference(0, 0), PatchMatch::reference(2, 3)];
        let mut dst = vec![0.0f32; 2 * 4];
        gather_patches(plane.view(), &group, 2, &mut dst);
        assert_eq!(dst, vec![0.0, 1.0, 10.0, 11.0, 23.0, 24.0, 33.0, 34.0]);
    }

    #[test]
    fn test_group_stack_loads_pilot_only_when_given() {
        let plans = TransformPlans::<f32>::try_new(2, 2, PatchTransform::Dct).unwrap();
        let mut stack = GroupStack::try_new(&plans, 2).unwrap();
        let noisy = Array2::from_elem((4, 4), 1.0f32);
        let pilot = Array2::from_elem((4, 4), 2.0f32);
        let group = [PatchMatch::reference(1, 1)];

        stack.load(noisy.view(), None, &group, 2);
        assert!(stack.filtered(1, 2).iter().all(|&v| v == 1.0));
        assert!(stack.pilot.iter().all(|&v| v == 0.0));

        stack.load(noisy.view(), Some(pilot.view()), &group, 2);
        assert!(stack.pilot[..4].iter().all(|&v| v == 2.0));
    }
}
