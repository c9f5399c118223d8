//! BM3D Denoising Engine
//!
//! Pure Rust, data-parallel implementation of BM3D (Block-Matching and 3D
//! filtering) for 8-bit grayscale and RGB images. Use [`denoise`] for a
//! single image, or [`RealtimeDenoiser`] to reuse every working buffer
//! across frames of a fixed size.

pub mod aggregation;
pub mod block_matching;
pub mod config;
pub mod error;
pub mod filtering;
pub mod float_trait;
pub mod group;
pub mod image;
pub mod pipeline;
pub mod realtime;
pub mod transforms;

// Re-export commonly used types at the crate root
pub use block_matching::{match_patches, PatchMatch};
pub use config::{DenoiseParams, DenoiseSteps, EngineConfig};
pub use error::{Bm3dError, Result};
pub use filtering::Bm3dMode;
pub use float_trait::Bm3dFloat;
pub use image::ImageGeometry;
pub use pipeline::PipelineStage;
pub use realtime::RealtimeDenoiser;
pub use transforms::PatchTransform;

/// Denoise an interleaved 8-bit image.
///
/// `src` and `dst` must both hold `width * height * channels` samples,
/// `channels` is 1 or 3 and `step` is 1 (basic estimate only) or 2 (basic
/// estimate followed by Wiener filtering). Sigmas are on the 0..255 scale.
/// On error `dst` is left untouched.
#[allow(clippy::too_many_arguments)]
pub fn denoise(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    sigma_1st: f32,
    sigma_2nd: f32,
    lambda: f32,
    channels: usize,
    step: u32,
    verbose: bool,
) -> Result<()> {
    let params = DenoiseParams {
        sigma_1st,
        sigma_2nd,
        lambda,
        steps: DenoiseSteps::from_count(step)?,
        verbose,
    };
    denoise_with_params(src, dst, ImageGeometry::new(width, height, channels), params)
}

/// Denoise with explicit parameters and the default engine configuration.
pub fn denoise_with_params(
    src: &[u8],
    dst: &mut [u8],
    geometry: ImageGeometry,
    params: DenoiseParams,
) -> Result<()> {
    denoise_with_config(src, dst, geometry, params, EngineConfig::default())
}

/// Denoise with explicit parameters and engine configuration.
pub fn denoise_with_config(
    src: &[u8],
    dst: &mut [u8],
    geometry: ImageGeometry,
    params: DenoiseParams,
    config: EngineConfig,
) -> Result<()> {
    let mut engine = RealtimeDenoiser::<f32>::configure_with(geometry, params, config)?;
    engine.run_into(src, dst)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Deterministic test images shared by the module tests.

    struct SimpleLcg {
        state: u64,
    }

    impl SimpleLcg {
        fn new(seed: u64) -> Self {
            Self { state: seed }
        }

        fn next_u64(&mut self) -> u64 {
            self.state = self
                .state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.state
        }

        /// Uniform in (0.0, 1.0].
        fn next_unit(&mut self) -> f64 {
            ((self.next_u64() >> 11) + 1) as f64 / (1u64 << 53) as f64
        }

        /// Standard normal sample (Box-Muller).
        fn next_gaussian(&mut self) -> f64 {
            let u1 = self.next_unit();
            let u2 = self.next_unit();
            (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        }
    }

    /// Smooth waves plus a checkerboard of 8-pixel blocks, values in
    /// 55..=195 so moderate noise rarely clips.
    pub fn synthetic_plane(width: usize, height: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let wave = 45.0
                    * (2.0 * std::f64::consts::PI * x as f64 / 16.0).sin()
                    * (2.0 * std::f64::consts::PI * y as f64 / 20.0).cos();
                let block = if (x / 8 + y / 8) % 2 == 0 { 25.0 } else { -25.0 };
                out.push((125.0 + wave + block).round() as u8);
            }
        }
        out
    }

    pub fn add_gaussian_noise(clean: &[u8], sigma: f64, seed: u64) -> Vec<u8> {
        let mut rng = SimpleLcg::new(seed);
        clean
            .iter()
            .map(|&v| (v as f64 + sigma * rng.next_gaussian()).round().clamp(0.0, 255.0) as u8)
            .collect()
    }

    pub fn mse(a: &[u8], b: &[u8]) -> f64 {
        assert_eq!(a.len(), b.len());
        a.iter()
            .zip(b)
            .map(|(&x, &y)| {
                let d = x as f64 - y as f64;
                d * d
            })
            .sum::<f64>()
            / a.len() as f64
    }
}
