//! Denoising parameters and engine configuration.
//!
//! `DenoiseParams` carries the per-call scalars a caller supplies (noise
//! levels, threshold multiplier, step count, verbosity). `EngineConfig`
//! carries the structural knobs (patch geometry, search window, group
//! sizes, transform) that size the working buffers.

use crate::error::{Bm3dError, Result};
use crate::filtering::Bm3dMode;
use crate::transforms::{PatchTransform, HADAMARD_PATCH_SIZE};

// =============================================================================
// Constants
// =============================================================================

/// Default noise standard deviation for both steps (0..255 scale).
const DEFAULT_SIGMA: f32 = 20.0;

/// Default hard thresholding multiplier.
const DEFAULT_LAMBDA: f32 = 2.7;

/// Default patch side length.
const DEFAULT_PATCH_SIZE: usize = 8;

/// Default stride between reference patches.
const DEFAULT_STRIDE: usize = 3;

/// Default search window side length, centered on the reference patch.
const DEFAULT_SEARCH_WINDOW: usize = 33;

/// Default step between candidate positions inside the search window.
const DEFAULT_SEARCH_STEP: usize = 1;

/// Default group size for the hard thresholding pass.
const DEFAULT_MAX_MATCHES_HARD: usize = 16;

/// Default group size for the Wiener pass.
const DEFAULT_MAX_MATCHES_WIENER: usize = 32;

/// Largest accepted group size.
pub const MAX_GROUP_SIZE: usize = 64;

/// Sigma at and above which the high-noise match thresholds apply.
const HIGH_NOISE_SIGMA: f32 = 40.0;

/// Match thresholds (mean squared difference per pixel, 0..255 scale).
const MATCH_DISTANCE_HARD: f32 = 2500.0;
const MATCH_DISTANCE_HARD_HIGH_NOISE: f32 = 5000.0;
const MATCH_DISTANCE_WIENER: f32 = 400.0;
const MATCH_DISTANCE_WIENER_HIGH_NOISE: f32 = 3500.0;

/// Default number of reference rows handled by one aggregation band.
const DEFAULT_BAND_REF_ROWS: usize = 8;
const BAND_REF_ROWS_ENV: &str = "BM3D_BAND_REF_ROWS";
const PROFILE_TIMING_ENV: &str = "BM3D_PROFILE_TIMING";

// =============================================================================
// Environment overrides
// =============================================================================

fn resolve_band_ref_rows() -> usize {
    std::env::var(BAND_REF_ROWS_ENV)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_BAND_REF_ROWS)
}

/// Whether per-stage timings should be collected and logged at debug level.
pub(crate) fn resolve_profile_timing() -> bool {
    std::env::var(PROFILE_TIMING_ENV)
        .ok()
        .map(|value| {
            let v = value.trim();
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

// =============================================================================
// Denoise parameters
// =============================================================================

/// How many filtering stages to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DenoiseSteps {
    /// Hard thresholding only; the basic estimate is the output.
    BasicOnly,
    /// Hard thresholding followed by Wiener filtering.
    #[default]
    Full,
}

impl DenoiseSteps {
    /// Map the numeric step count used by callers (1 or 2).
    pub fn from_count(step: u32) -> Result<Self> {
        match step {
            1 => Ok(Self::BasicOnly),
            2 => Ok(Self::Full),
            other => Err(Bm3dError::InvalidParameter {
                name: "step",
                value: f64::from(other),
                reason: "must be 1 (basic estimate) or 2 (basic + Wiener)",
            }),
        }
    }

    pub fn count(self) -> u32 {
        match self {
            Self::BasicOnly => 1,
            Self::Full => 2,
        }
    }
}

/// Scalars supplied with every denoise call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenoiseParams {
    /// Noise standard deviation for the hard thresholding pass. Default: 20
    pub sigma_1st: f32,
    /// Noise standard deviation for the Wiener pass. Default: 20
    pub sigma_2nd: f32,
    /// Hard thresholding multiplier. Default: 2.7
    pub lambda: f32,
    /// Stages to run. Default: both
    pub steps: DenoiseSteps,
    /// Log the run parameters at info level. Default: false
    pub verbose: bool,
}

impl Default for DenoiseParams {
    fn default() -> Self {
        Self {
            sigma_1st: DEFAULT_SIGMA,
            sigma_2nd: DEFAULT_SIGMA,
            lambda: DEFAULT_LAMBDA,
            steps: DenoiseSteps::Full,
            verbose: false,
        }
    }
}

fn check_positive(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Bm3dError::InvalidParameter {
            name,
            value: f64::from(value),
            reason: "must be finite and > 0",
        })
    }
}

impl DenoiseParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Noise level used by the given pass.
    pub fn sigma(&self, mode: Bm3dMode) -> f32 {
        match mode {
            Bm3dMode::HardThreshold => self.sigma_1st,
            Bm3dMode::Wiener => self.sigma_2nd,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("sigma_1st", self.sigma_1st)?;
        check_positive("sigma_2nd", self.sigma_2nd)?;
        check_positive("lambda", self.lambda)?;
        Ok(())
    }
}

// =============================================================================
// Engine configuration
// =============================================================================

/// Structural engine settings. These size the working buffers, so changing
/// them requires a fresh workspace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Patch side length. Default: 8
    pub patch_size: usize,
    /// Stride between reference patches. Default: 3
    pub stride: usize,
    /// Search window side length. Default: 33
    pub search_window: usize,
    /// Step between candidate positions. Default: 1
    pub search_step: usize,
    /// Group size for hard thresholding. Default: 16
    pub max_matches_hard: usize,
    /// Group size for Wiener filtering. Default: 32
    pub max_matches_wiener: usize,
    /// Match threshold for hard thresholding; `None` picks by noise level.
    pub match_distance_hard: Option<f32>,
    /// Match threshold for Wiener filtering; `None` picks by noise level.
    pub match_distance_wiener: Option<f32>,
    /// 2D patch transform. Default: DCT
    pub transform: PatchTransform,
    /// Reference rows per aggregation band. Default: 8 (`BM3D_BAND_REF_ROWS`)
    pub band_ref_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            patch_size: DEFAULT_PATCH_SIZE,
            stride: DEFAULT_STRIDE,
            search_window: DEFAULT_SEARCH_WINDOW,
            search_step: DEFAULT_SEARCH_STEP,
            max_matches_hard: DEFAULT_MAX_MATCHES_HARD,
            max_matches_wiener: DEFAULT_MAX_MATCHES_WIENER,
            match_distance_hard: None,
            match_distance_wiener: None,
            transform: PatchTransform::Dct,
            band_ref_rows: resolve_band_ref_rows(),
        }
    }
}

fn check_nonzero(name: &'static str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Bm3dError::InvalidParameter {
            name,
            value: 0.0,
            reason: "must be > 0",
        });
    }
    Ok(())
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group size for the given pass.
    pub fn max_matches(&self, mode: Bm3dMode) -> usize {
        match mode {
            Bm3dMode::HardThreshold => self.max_matches_hard,
            Bm3dMode::Wiener => self.max_matches_wiener,
        }
    }

    /// Largest group either pass can form; sizes the match table.
    pub fn max_group_size(&self) -> usize {
        self.max_matches_hard.max(self.max_matches_wiener)
    }

    /// Match threshold for the given pass and noise level.
    pub fn match_distance(&self, mode: Bm3dMode, sigma: f32) -> f32 {
        let high_noise = sigma >= HIGH_NOISE_SIGMA;
        match mode {
            Bm3dMode::HardThreshold => self.match_distance_hard.unwrap_or(if high_noise {
                MATCH_DISTANCE_HARD_HIGH_NOISE
            } else {
                MATCH_DISTANCE_HARD
            }),
            Bm3dMode::Wiener => self.match_distance_wiener.unwrap_or(if high_noise {
                MATCH_DISTANCE_WIENER_HIGH_NOISE
            } else {
                MATCH_DISTANCE_WIENER
            }),
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_nonzero("patch_size", self.patch_size)?;
        check_nonzero("stride", self.stride)?;
        check_nonzero("search_window", self.search_window)?;
        check_nonzero("search_step", self.search_step)?;
        check_nonzero("max_matches_hard", self.max_matches_hard)?;
        check_nonzero("max_matches_wiener", self.max_matches_wiener)?;
        check_nonzero("band_ref_rows", self.band_ref_rows)?;

        for (name, value) in [
            ("max_matches_hard", self.max_matches_hard),
            ("max_matches_wiener", self.max_matches_wiener),
        ] {
            if value > MAX_GROUP_SIZE {
                return Err(Bm3dError::InvalidParameter {
                    name,
                    value: value as f64,
                    reason: "must not exceed MAX_GROUP_SIZE (64)",
                });
            }
        }

        for (name, value) in [
            ("match_distance_hard", self.match_distance_hard),
            ("match_distance_wiener", self.match_distance_wiener),
        ] {
            if let Some(v) = value {
                if v.is_nan() || v <= 0.0 {
                    return Err(Bm3dError::InvalidParameter {
                        name,
                        value: f64::from(v),
                        reason: "must be > 0",
                    });
                }
            }
        }

        if self.transform == PatchTransform::Hadamard && self.patch_size != HADAMARD_PATCH_SIZE {
            return Err(Bm3dError::InvalidParameter {
                name: "patch_size",
                value: self.patch_size as f64,
                reason: "the Hadamard transform requires 8x8 patches",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        let params = DenoiseParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.sigma_1st, 20.0);
        assert_eq!(params.lambda, 2.7);
        assert_eq!(params.steps, DenoiseSteps::Full);
        assert!(!params.verbose);
    }

    #[test]
    fn test_params_reject_non_positive_values() {
        for (params, name) in [
            (
                DenoiseParams {
                    sigma_1st: 0.0,
                    ..Default::default()
                },
                "sigma_1st",
            ),
            (
                DenoiseParams {
                    sigma_2nd: -5.0,
                    ..Default::default()
                },
                "sigma_2nd",
            ),
            (
                DenoiseParams {
                    lambda: f32::NAN,
                    ..Default::default()
                },
                "lambda",
            ),
            (
                DenoiseParams {
                    lambda: f32::INFINITY,
                    ..Default::default()
                },
                "lambda",
            ),
        ] {
            match params.validate() {
                Err(Bm3dError::InvalidParameter { name: got, .. }) => assert_eq!(got, name),
                other => panic!("expected InvalidParameter for {}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_steps_from_count() {
        assert_eq!(DenoiseSteps::from_count(1).unwrap(), DenoiseSteps::BasicOnly);
        assert_eq!(DenoiseSteps::from_count(2).unwrap(), DenoiseSteps::Full);
        assert!(matches!(
            DenoiseSteps::from_count(3),
            Err(Bm3dError::InvalidParameter { name: "step", .. })
        ));
        assert!(DenoiseSteps::from_count(0).is_err());
        assert_eq!(DenoiseSteps::Full.count(), 2);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_group_size(), 32);
        assert_eq!(config.max_matches(Bm3dMode::HardThreshold), 16);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad = [
            EngineConfig {
                patch_size: 0,
                ..Default::default()
            },
            EngineConfig {
                stride: 0,
                ..Default::default()
            },
            EngineConfig {
                max_matches_wiener: MAX_GROUP_SIZE + 1,
                ..Default::default()
            },
            EngineConfig {
                match_distance_hard: Some(-1.0),
                ..Default::default()
            },
            EngineConfig {
                patch_size: 4,
                transform: PatchTransform::Hadamard,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(Bm3dError::InvalidParameter { .. })),
                "config should be rejected: {:?}",
                config
            );
        }
    }

    #[test]
    fn test_match_distance_depends_on_noise_level() {
        let config = EngineConfig::default();
        assert_eq!(config.match_distance(Bm3dMode::HardThreshold, 20.0), 2500.0);
        assert_eq!(config.match_distance(Bm3dMode::HardThreshold, 45.0), 5000.0);
        assert_eq!(config.match_distance(Bm3dMode::Wiener, 20.0), 400.0);
        assert_eq!(config.match_distance(Bm3dMode::Wiener, 40.0), 3500.0);

        let fixed = EngineConfig {
            match_distance_wiener: Some(123.0),
            ..Default::default()
        };
        assert_eq!(fixed.match_distance(Bm3dMode::Wiener, 60.0), 123.0);
    }
}
