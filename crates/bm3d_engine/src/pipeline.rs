//! BM3D pipeline: the stage machine and the passes it drives over each
//! channel plane.
//!
//! Every pass is a full rayon pass over the reference grid and the driver
//! blocks between passes, so a stage only ever reads what earlier stages
//! finished writing.

use ndarray::Array2;
use rayon::prelude::*;
use std::ops::Range;
use std::time::Instant;

use crate::aggregation::{band_row_span, compute_patch_blend_weights, Accumulator, BandAccumulator};
use crate::block_matching::{find_similar_patches, reference_positions, IntegralImages, MatchRequest};
use crate::config::{resolve_profile_timing, DenoiseParams, DenoiseSteps, EngineConfig};
use crate::error::{Bm3dError, Result};
use crate::filtering::{filter_group, Bm3dMode};
use crate::float_trait::Bm3dFloat;
use crate::group::{GroupStack, MatchTable};
use crate::image::{extract_plane, store_plane, try_filled_vec, try_zeroed_plane, ImageGeometry};
use crate::transforms::TransformPlans;

/// States of one denoising run over a plane, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Init,
    Step1Matching,
    Step1Filtering,
    Step1Aggregating,
    BasicEstimateReady,
    Step2Matching,
    Step2Filtering,
    Step2Aggregating,
    Done,
}

impl PipelineStage {
    /// The state that follows `self`. `Done` is terminal.
    pub fn next(self, steps: DenoiseSteps) -> Self {
        use PipelineStage::*;
        match self {
            Init => Step1Matching,
            Step1Matching => Step1Filtering,
            Step1Filtering => Step1Aggregating,
            Step1Aggregating => BasicEstimateReady,
            BasicEstimateReady => match steps {
                DenoiseSteps::BasicOnly => Done,
                DenoiseSteps::Full => Step2Matching,
            },
            Step2Matching => Step2Filtering,
            Step2Filtering => Step2Aggregating,
            Step2Aggregating => Done,
            Done => Done,
        }
    }

    /// The filtering mode a working stage belongs to.
    pub fn mode(self) -> Option<Bm3dMode> {
        use PipelineStage::*;
        match self {
            Step1Matching | Step1Filtering | Step1Aggregating => Some(Bm3dMode::HardThreshold),
            Step2Matching | Step2Filtering | Step2Aggregating => Some(Bm3dMode::Wiener),
            Init | BasicEstimateReady | Done => None,
        }
    }

    /// All states visited for `steps`, `Init` through `Done`.
    pub fn walk(steps: DenoiseSteps) -> Vec<Self> {
        let mut stage = PipelineStage::Init;
        let mut visited = vec![stage];
        while stage != PipelineStage::Done {
            stage = stage.next(steps);
            visited.push(stage);
        }
        visited
    }
}

#[inline]
fn to_float<F: Bm3dFloat>(v: f32) -> F {
    F::from_f64_c(f64::from(v))
}

/// A band of consecutive reference rows: its group slots, its partial
/// accumulator and its staging buffers.
struct BandWorker<F: Bm3dFloat> {
    slots: Range<usize>,
    acc: BandAccumulator<F>,
    stack: GroupStack<F>,
}

/// Every buffer a run needs, sized once for a geometry and configuration.
pub(crate) struct Workspace<F: Bm3dFloat> {
    geometry: ImageGeometry,
    config: EngineConfig,
    plans: TransformPlans<F>,
    blend: Vec<F>,
    integrals: IntegralImages,
    table: MatchTable<F>,
    bands: Vec<BandWorker<F>>,
    accumulator: Accumulator<F>,
    noisy: Array2<F>,
    basic: Array2<F>,
    estimate: Array2<F>,
    basic_samples: Vec<u8>,
    output_samples: Vec<u8>,
    has_basic: bool,
    profile_timing: bool,
}

impl<F: Bm3dFloat> Workspace<F> {
    /// Validate `geometry` against `config` and allocate every buffer.
    /// `config` must already be validated.
    pub(crate) fn try_new(geometry: ImageGeometry, config: EngineConfig) -> Result<Self> {
        geometry.validate(config.patch_size)?;
        let (h, w) = (geometry.height, geometry.width);
        let p = config.patch_size;

        let plans = TransformPlans::try_new(p, config.max_group_size(), config.transform)?;
        let ref_rows = reference_positions(h, p, config.stride);
        let ref_cols = reference_positions(w, p, config.stride);
        let refs: Vec<(usize, usize)> = ref_rows
            .iter()
            .flat_map(|&r| ref_cols.iter().map(move |&c| (r, c)))
            .collect();
        let table = MatchTable::try_new(refs, config.max_group_size())?;

        let half = config.search_window / 2;
        let mut bands = Vec::new();
        bands
            .try_reserve_exact(ref_rows.len().div_ceil(config.band_ref_rows))
            .map_err(|_| Bm3dError::AllocationFailure {
                what: "band workers",
                elements: ref_rows.len(),
            })?;
        for (i, chunk) in ref_rows.chunks(config.band_ref_rows).enumerate() {
            let first_slot = i * config.band_ref_rows * ref_cols.len();
            let (first, last) = (chunk[0], chunk[chunk.len() - 1]);
            bands.push(BandWorker {
                slots: first_slot..first_slot + chunk.len() * ref_cols.len(),
                acc: BandAccumulator::try_new(band_row_span(first, last, half, p, h), w)?,
                stack: GroupStack::try_new(&plans, config.max_group_size())?,
            });
        }

        log::debug!(
            "bm3d workspace {}: {} reference patches in {} bands",
            geometry,
            table.slots(),
            bands.len()
        );

        Ok(Self {
            geometry,
            config,
            blend: compute_patch_blend_weights(p),
            plans,
            integrals: IntegralImages::try_new(h, w)?,
            table,
            bands,
            accumulator: Accumulator::try_new(h, w)?,
            noisy: try_zeroed_plane("noisy plane", h, w)?,
            basic: try_zeroed_plane("basic estimate", h, w)?,
            estimate: try_zeroed_plane("final estimate", h, w)?,
            basic_samples: try_filled_vec("basic estimate samples", geometry.sample_count(), 0)?,
            output_samples: try_filled_vec("output samples", geometry.sample_count(), 0)?,
            has_basic: false,
            profile_timing: resolve_profile_timing(),
        })
    }

    pub(crate) fn geometry(&self) -> ImageGeometry {
        self.geometry
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Quantized basic estimate of the last completed run.
    pub(crate) fn basic_estimate(&self) -> Option<&[u8]> {
        self.has_basic.then_some(self.basic_samples.as_slice())
    }

    /// Smallest aggregation weight of the last aggregation pass.
    pub(crate) fn min_weight(&self) -> F {
        self.accumulator.min_weight()
    }

    fn match_pass(&mut self, mode: Bm3dMode, sigma: f32) {
        let source = match mode {
            Bm3dMode::HardThreshold => &self.noisy,
            Bm3dMode::Wiener => &self.basic,
        };
        self.integrals.fill(source.view());
        let request = MatchRequest::<F>::from_config(&self.config, mode, sigma);
        let integrals = &self.integrals;
        let view = source.view();
        self.table.par_fill(|ref_pos, out| {
            find_similar_patches(view, integrals, ref_pos, &request, out)
        });
    }

    fn filter_pass(&mut self, mode: Bm3dMode, sigma: f32, lambda: f32) {
        let p = self.config.patch_size;
        let area = p * p;
        let sigma = to_float::<F>(sigma);
        let lambda = to_float::<F>(lambda);
        let noisy = self.noisy.view();
        let pilot = match mode {
            Bm3dMode::HardThreshold => None,
            Bm3dMode::Wiener => Some(self.basic.view()),
        };
        let table = &self.table;
        let plans = &self.plans;
        let blend = self.blend.as_slice();

        self.bands.par_iter_mut().for_each(|band| {
            band.acc.reset();
            for slot in band.slots.clone() {
                let group = table.group(slot);
                let k = group.len();
                band.stack.load(noisy, pilot, group, p);
                let weight = filter_group(mode, &mut band.stack, k, plans, sigma, lambda);
                let filtered = band.stack.filtered(k, p);
                for (m, patch) in group.iter().zip(filtered.chunks_exact(area)) {
                    band.acc.add_patch(patch, (m.row, m.col), p, weight, blend);
                }
            }
        });
    }

    fn aggregate_pass(&mut self, mode: Bm3dMode) {
        self.accumulator.reset();
        for band in &self.bands {
            self.accumulator.merge_band(&band.acc);
        }
        let target = match mode {
            Bm3dMode::HardThreshold => &mut self.basic,
            Bm3dMode::Wiener => &mut self.estimate,
        };
        self.accumulator.normalize_into(&self.noisy, target);
    }

    fn run_stage(&mut self, stage: PipelineStage, params: &DenoiseParams) {
        use PipelineStage::*;
        let Some(mode) = stage.mode() else {
            return;
        };
        let sigma = params.sigma(mode);
        match stage {
            Step1Matching | Step2Matching => self.match_pass(mode, sigma),
            Step1Filtering | Step2Filtering => self.filter_pass(mode, sigma, params.lambda),
            Step1Aggregating | Step2Aggregating => self.aggregate_pass(mode),
            Init | BasicEstimateReady | Done => {}
        }
    }

    /// Denoise one interleaved frame into `dst`. Nothing is written to
    /// `dst` unless the whole run succeeds.
    pub(crate) fn denoise_into(
        &mut self,
        src: &[u8],
        dst: &mut [u8],
        params: &DenoiseParams,
    ) -> Result<()> {
        let expected = self.geometry.sample_count();
        for len in [src.len(), dst.len()] {
            if len != expected {
                return Err(Bm3dError::GeometryMismatch {
                    expected: format!("{} ({} samples)", self.geometry, expected),
                    actual: format!("{} samples", len),
                });
            }
        }
        params.validate()?;

        if params.verbose {
            log_parameters(self.geometry, params);
        }

        let started = self.profile_timing.then(Instant::now);
        self.has_basic = false;
        let geometry = self.geometry;
        for channel in 0..geometry.channels {
            extract_plane(src, geometry, channel, &mut self.noisy);

            let mut stage = PipelineStage::Init;
            loop {
                let stage_started = self.profile_timing.then(Instant::now);
                self.run_stage(stage, params);
                if let Some(t) = stage_started {
                    log::debug!(
                        "bm3d_profile channel={} stage={:?} ms={:.3}",
                        channel,
                        stage,
                        t.elapsed().as_secs_f64() * 1000.0
                    );
                }
                if stage == PipelineStage::BasicEstimateReady {
                    store_plane(&self.basic, geometry, channel, &mut self.basic_samples);
                }
                if stage == PipelineStage::Done {
                    break;
                }
                stage = stage.next(params.steps);
            }

            let output = match params.steps {
                DenoiseSteps::BasicOnly => &self.basic,
                DenoiseSteps::Full => &self.estimate,
            };
            store_plane(output, geometry, channel, &mut self.output_samples);
        }
        self.has_basic = true;
        dst.copy_from_slice(&self.output_samples);

        if let Some(t) = started {
            log::debug!(
                "bm3d_profile size={} steps={} refs={} total_ms={:.3}",
                geometry,
                params.steps.count(),
                self.table.slots(),
                t.elapsed().as_secs_f64() * 1000.0
            );
        }
        Ok(())
    }
}

fn log_parameters(geometry: ImageGeometry, params: &DenoiseParams) {
    log::info!("BM3D denoising {}", geometry);
    log::info!("  sigma (1st step) = {}", params.sigma_1st);
    if params.steps == DenoiseSteps::Full {
        log::info!("  sigma (2nd step) = {}", params.sigma_2nd);
    }
    log::info!("  lambda = {}", params.lambda);
    log::info!(
        "  {} image, {} step(s)",
        if geometry.channels == 1 { "grayscale" } else { "color" },
        params.steps.count()
    );
}
