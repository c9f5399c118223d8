//! Collaborative filtering of a group in the 3D transform domain.
//!
//! Hard thresholding (first pass) and empirical Wiener shrinkage (second
//! pass). Both return the group's aggregation weight, which is inversely
//! proportional to the residual noise left in the group estimate.

use crate::float_trait::Bm3dFloat;
use crate::group::GroupStack;
use crate::transforms::TransformPlans;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bm3dMode {
    /// Step 1: hard thresholding of the noisy group.
    HardThreshold,
    /// Step 2: Wiener shrinkage guided by the basic estimate.
    Wiener,
}

/// Zero every coefficient whose magnitude is below `threshold`, except the
/// DC term at index 0. Returns the number of non-zero coefficients left,
/// the DC term included.
pub fn hard_threshold<F: Bm3dFloat>(coeffs: &mut [F], threshold: F) -> usize {
    let Some((dc, ac)) = coeffs.split_first_mut() else {
        return 0;
    };
    let mut survivors = usize::from(*dc != F::zero());
    for c in ac {
        if c.abs() < threshold {
            *c = F::zero();
        } else if *c != F::zero() {
            survivors += 1;
        }
    }
    survivors
}

/// Scale each noisy coefficient by `E / (E + sigma^2)` with `E` the squared
/// pilot coefficient. Returns the sum of squared shrinkage factors.
pub fn wiener_shrink<F: Bm3dFloat>(noisy: &mut [F], pilot: &[F], sigma_sq: F) -> F {
    let mut sum_sq = F::zero();
    for (c, &p) in noisy.iter_mut().zip(pilot) {
        let energy = p * p;
        let denom = energy + sigma_sq;
        let w = if denom > F::zero() {
            (energy / denom).max(F::zero()).min(F::one())
        } else {
            F::zero()
        };
        *c *= w;
        sum_sq += w * w;
    }
    sum_sq
}

/// Weight of a hard-thresholded group: inversely proportional to the number
/// of surviving coefficients. A group with no survivors gets the weight it
/// would have if every coefficient had survived.
fn hard_threshold_weight<F: Bm3dFloat>(survivors: usize, sigma: F, coeff_count: usize) -> F {
    let retained = if survivors > 0 { survivors } else { coeff_count.max(1) };
    F::one() / (sigma * sigma * F::usize_as(retained))
}

/// Weight of a Wiener-filtered group: proportional to the sum of squared
/// shrinkage factors, normalized by the coefficient count. A zero sum falls
/// back to the minimal hard-threshold weight.
fn wiener_weight<F: Bm3dFloat>(shrink_energy: F, sigma: F, coeff_count: usize) -> F {
    let scale = F::one() / (sigma * sigma * F::usize_as(coeff_count.max(1)));
    if shrink_energy > F::zero() {
        shrink_energy * scale
    } else {
        scale
    }
}

/// Filter the first `k` patches loaded into `stack` in place and return the
/// group weight. For `Bm3dMode::Wiener` the pilot stack must hold the
/// matching basic-estimate patches.
pub fn filter_group<F: Bm3dFloat>(
    mode: Bm3dMode,
    stack: &mut GroupStack<F>,
    k: usize,
    plans: &TransformPlans<F>,
    sigma: F,
    lambda: F,
) -> F {
    let n = k * plans.patch_size() * plans.patch_size();
    let GroupStack {
        noisy,
        pilot,
        scratch,
    } = stack;
    let noisy = &mut noisy[..n];

    plans.forward_3d(noisy, k, scratch);
    let weight = match mode {
        Bm3dMode::HardThreshold => {
            let survivors = hard_threshold(noisy, lambda * sigma);
            hard_threshold_weight(survivors, sigma, n)
        }
        Bm3dMode::Wiener => {
            let pilot = &mut pilot[..n];
            plans.forward_3d(pilot, k, scratch);
            let energy = wiener_shrink(noisy, pilot, sigma * sigma);
            wiener_weight(energy, sigma, n)
        }
    };
    plans.inverse_3d(noisy, k, scratch);
    weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_matching::PatchMatch;
    use crate::transforms::PatchTransform;
    use ndarray::Array2;

    #[test]
    fn test_hard_threshold_keeps_dc() {
        let mut coeffs = vec![1.0f32, 5.0, -60.0, 53.9, 54.0, -0.1];
        let survivors = hard_threshold(&mut coeffs, 54.0);
        assert_eq!(coeffs, vec![1.0, 0.0, -60.0, 0.0, 54.0, 0.0]);
        assert_eq!(survivors, 3);
    }

    #[test]
    fn test_hard_threshold_zero_dc_is_not_a_survivor() {
        let mut coeffs = vec![0.0f64; 8];
        assert_eq!(hard_threshold(&mut coeffs, 1.0), 0);
        assert_eq!(hard_threshold::<f64>(&mut [], 1.0), 0);

        // Small DC is exempt from the threshold and still counted.
        let mut coeffs = vec![0.5f64, 0.2, 3.0];
        assert_eq!(hard_threshold(&mut coeffs, 1.0), 2);
        assert_eq!(coeffs, vec![0.5, 0.0, 3.0]);
    }

    #[test]
    fn test_wiener_shrink_factors() {
        let mut noisy = vec![10.0f64, 10.0, 10.0];
        let pilot = vec![0.0f64, 20.0, 1e6];
        let sum_sq = wiener_shrink(&mut noisy, &pilot, 400.0);
        assert_eq!(noisy[0], 0.0);
        assert!((noisy[1] - 5.0).abs() < 1e-12);
        assert!((noisy[2] - 10.0).abs() < 1e-6);
        assert!((sum_sq - (0.25 + 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_group_weights() {
        assert_eq!(hard_threshold_weight(4, 2.0f64, 64), 1.0 / 16.0);
        assert_eq!(hard_threshold_weight(0, 2.0f64, 64), 1.0 / 256.0);
        // More shrinkage energy means more confidence.
        assert!(wiener_weight(32.0f64, 2.0, 64) > wiener_weight(8.0f64, 2.0, 64));
        assert_eq!(wiener_weight(64.0f64, 2.0, 64), 0.25);
        assert_eq!(wiener_weight(0.0f64, 2.0, 64), 1.0 / 256.0);
    }

    fn load_flat_group(
        plans: &TransformPlans<f64>,
        value: f64,
        k: usize,
    ) -> (GroupStack<f64>, Vec<PatchMatch<f64>>) {
        let plane = Array2::from_elem((16, 16), value);
        let group: Vec<_> = (0..k).map(|i| PatchMatch::reference(i, i)).collect();
        let mut stack = GroupStack::try_new(plans, 8).unwrap();
        stack.load(plane.view(), Some(plane.view()), &group, plans.patch_size());
        (stack, group)
    }

    #[test]
    fn test_hard_threshold_preserves_flat_group() {
        let plans = TransformPlans::<f64>::try_new(4, 8, PatchTransform::Dct).unwrap();
        let (mut stack, _) = load_flat_group(&plans, 128.0, 4);
        let weight = filter_group(Bm3dMode::HardThreshold, &mut stack, 4, &plans, 20.0, 2.7);
        // Only the DC survives.
        assert!((weight - 1.0 / 400.0).abs() < 1e-12);
        assert!(stack
            .filtered(4, 4)
            .iter()
            .all(|v| (v - 128.0).abs() < 1e-9));
    }

    #[test]
    fn test_black_group_gets_fallback_weight() {
        let plans = TransformPlans::<f64>::try_new(4, 8, PatchTransform::Dct).unwrap();
        let (mut stack, _) = load_flat_group(&plans, 0.0, 3);
        let weight = filter_group(Bm3dMode::HardThreshold, &mut stack, 3, &plans, 20.0, 2.7);
        // No survivors: 1 / (sigma^2 * k * P^2).
        assert!((weight - 1.0 / (400.0 * 3.0 * 16.0)).abs() < 1e-15);
        assert!(stack.filtered(3, 4).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_wiener_preserves_flat_group() {
        let plans = TransformPlans::<f64>::try_new(4, 8, PatchTransform::Dct).unwrap();
        let (mut stack, _) = load_flat_group(&plans, 128.0, 2);
        let weight = filter_group(Bm3dMode::Wiener, &mut stack, 2, &plans, 20.0, 2.7);
        assert!(weight > 0.0);
        // DC shrink factor is E / (E + sigma^2) with E = (128 * sqrt(32))^2.
        let e = 128.0f64 * 128.0 * 32.0;
        let w = e / (e + 400.0);
        assert!(stack
            .filtered(2, 4)
            .iter()
            .all(|v| (v - 128.0 * w).abs() < 1e-9));
    }

    #[test]
    fn test_hard_threshold_removes_small_noise() {
        let plans = TransformPlans::<f32>::try_new(8, 16, PatchTransform::Dct).unwrap();
        let mut stack = GroupStack::try_new(&plans, 16).unwrap();
        // Tiny alternating perturbation around a flat value.
        let plane = Array2::from_shape_fn((16, 16), |(r, c)| {
            100.0f32 + if (r + c) % 2 == 0 { 1.0 } else { -1.0 }
        });
        let group = vec![PatchMatch::reference(0, 0), PatchMatch::reference(2, 2)];
        stack.load(plane.view(), None, &group, 8);
        filter_group(Bm3dMode::HardThreshold, &mut stack, 2, &plans, 20.0, 2.7);
        assert!(stack.filtered(2, 8).iter().all(|v| (v - 100.0).abs() < 1e-3));
    }
}
