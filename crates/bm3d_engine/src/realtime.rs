//! Persistent-buffer denoising handle for repeated calls on a fixed frame
//! size, e.g. a video stream.
//!
//! ```no_run
//! use bm3d_engine::RealtimeDenoiser;
//!
//! # fn main() -> bm3d_engine::Result<()> {
//! let frames: Vec<Vec<u8>> = vec![vec![128; 640 * 480]; 3];
//! let mut denoiser: RealtimeDenoiser = RealtimeDenoiser::configure(640, 480, 1)?;
//! for frame in &frames {
//!     let clean = denoiser.run(frame)?;
//!     assert_eq!(clean.len(), frame.len());
//! }
//! denoiser.release();
//! # Ok(())
//! # }
//! ```

use crate::config::{DenoiseParams, EngineConfig};
use crate::error::{Bm3dError, Result};
use crate::float_trait::Bm3dFloat;
use crate::image::{try_filled_vec, ImageGeometry};
use crate::pipeline::Workspace;

/// A configured engine: every working buffer is allocated by `configure`
/// and reused by each `run` until the handle is reconfigured or released.
///
/// `run` borrows the handle mutably, so a handle serves one call at a time.
pub struct RealtimeDenoiser<F: Bm3dFloat = f32> {
    params: DenoiseParams,
    workspace: Workspace<F>,
}

impl<F: Bm3dFloat> RealtimeDenoiser<F> {
    /// Configure for `width x height x channels` frames with default
    /// parameters and engine settings.
    pub fn configure(width: usize, height: usize, channels: usize) -> Result<Self> {
        Self::configure_with(
            ImageGeometry::new(width, height, channels),
            DenoiseParams::default(),
            EngineConfig::default(),
        )
    }

    /// Configure with explicit parameters and engine settings.
    pub fn configure_with(
        geometry: ImageGeometry,
        params: DenoiseParams,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        geometry.validate(config.patch_size)?;
        params.validate()?;
        Ok(Self {
            params,
            workspace: Workspace::try_new(geometry, config)?,
        })
    }

    /// Switch to a new frame size. Buffers are kept when the geometry is
    /// unchanged; otherwise they are reallocated and the previous basic
    /// estimate is dropped.
    pub fn reconfigure(&mut self, width: usize, height: usize, channels: usize) -> Result<()> {
        let geometry = ImageGeometry::new(width, height, channels);
        if geometry == self.workspace.geometry() {
            return Ok(());
        }
        let config = *self.workspace.config();
        self.workspace = Workspace::try_new(geometry, config)?;
        Ok(())
    }

    /// Replace the parameters used by subsequent runs.
    pub fn set_params(&mut self, params: DenoiseParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn params(&self) -> &DenoiseParams {
        &self.params
    }

    pub fn config(&self) -> &EngineConfig {
        self.workspace.config()
    }

    pub fn geometry(&self) -> ImageGeometry {
        self.workspace.geometry()
    }

    /// Denoise one frame into a new buffer.
    pub fn run(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        let mut dst = try_filled_vec("output frame", src.len(), 0u8)?;
        self.run_into(src, &mut dst)?;
        Ok(dst)
    }

    /// Denoise one frame into `dst`. Both buffers must hold exactly
    /// `width * height * channels` samples.
    pub fn run_into(&mut self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let params = self.params;
        self.workspace.denoise_into(src, dst, &params)
    }

    /// Denoise a frame whose caller-side geometry is checked against the
    /// configured one first.
    pub fn run_frame(&mut self, geometry: ImageGeometry, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let configured = self.workspace.geometry();
        if geometry != configured {
            return Err(Bm3dError::GeometryMismatch {
                expected: configured.to_string(),
                actual: geometry.to_string(),
            });
        }
        self.run_into(src, dst)
    }

    /// Quantized basic estimate (step 1 output) of the last successful run.
    pub fn basic_estimate(&self) -> Option<&[u8]> {
        self.workspace.basic_estimate()
    }

    /// Smallest per-pixel aggregation weight of the last aggregation pass.
    pub fn min_aggregation_weight(&self) -> F {
        self.workspace.min_weight()
    }

    /// End the handle's life and free its buffers.
    pub fn release(self) {
        log::debug!("bm3d releasing workspace {}", self.geometry());
    }
}
