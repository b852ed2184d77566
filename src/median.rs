//! Background median-map estimator (spec §4.2).
//!
//! Maintains two independent rolling estimates of the sky's steady-state
//! background, each built from a histogram of per-pixel stack means sampled
//! every `sample_every_n`-th short stack. Once a histogram has accumulated
//! 255 samples (one per possible 8-bit bin, per `original_source`'s
//! `medianMapUseEveryNthStack` scheme) a fresh median map is derived from it
//! and becomes the *pending* map; the caller decides when to swap it in for
//! the currently active one via [`MedianWorkspace::flip`].
//!
//! The motion trigger itself never touches this map — its 8/9 and 7/9 probe
//! passes (spec §4.3) compare the current short stack against the
//! *previous interval's* short stack, not the long-run background. This
//! estimator feeds only background-subtracted artefact rendering (event and
//! timelapse flushes).

use rayon::prelude::*;

use crate::error::ConfigError;
use crate::geometry::{clip256, PlaneDims, RgbPlanes, SumPlanes};
use crate::stacker::stack_mean;

/// Number of samples a histogram needs before a new median estimate is derived.
const CYCLE_SAMPLES: u32 = 255;

pub struct MedianWorkspace {
    dims: PlaneDims,
    sample_every_n: u32,
    stack_counter: u64,
    samples_this_cycle: u32,
    histogram: Vec<u16>,
    maps: [RgbPlanes; 2],
    active: usize,
    pending: RgbPlanes,
    ready: bool,
}

impl MedianWorkspace {
    pub fn new(dims: PlaneDims, sample_every_n: u32) -> Result<Self, ConfigError> {
        if sample_every_n == 0 {
            return Err(ConfigError::InvalidMedianSampleEveryN(sample_every_n));
        }
        let histogram = vec![0u16; 3 * dims.pixel_count() * 256];
        Ok(Self {
            dims,
            sample_every_n,
            stack_counter: 0,
            samples_this_cycle: 0,
            histogram,
            maps: [RgbPlanes::zeroed(dims), RgbPlanes::zeroed(dims)],
            active: 0,
            pending: RgbPlanes::zeroed(dims),
            ready: false,
        })
    }

    /// Currently active background estimate, read by event and timelapse
    /// background-subtracted artefact rendering.
    pub fn active_map(&self) -> &RgbPlanes {
        &self.maps[self.active]
    }

    /// Whether a freshly completed histogram cycle has produced a new
    /// estimate not yet swapped in.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Swaps the pending estimate in as the active map. The caller (the
    /// engine) is responsible for suppressing this during event recording
    /// (spec §4.4's pre-event pinning), so that the background doesn't shift
    /// mid-event.
    pub fn flip(&mut self) {
        if !self.ready {
            return;
        }
        let demoted = 1 - self.active;
        std::mem::swap(&mut self.maps[demoted], &mut self.pending);
        self.active = demoted;
        self.ready = false;
    }

    /// Folds one completed short stack into the histogram, if this stack
    /// lands on a sampling tick. When a full cycle of samples has been
    /// collected, derives a new pending median map and resets the histogram.
    pub fn absorb_stack(
        &mut self,
        stack: &SumPlanes,
        n: i32,
        dims: PlaneDims,
        pool: &rayon::ThreadPool,
    ) {
        debug_assert_eq!(dims, self.dims);
        self.stack_counter += 1;
        if self.stack_counter % self.sample_every_n as u64 != 0 {
            return;
        }

        let pixel_count = dims.pixel_count();
        for c in 0..3 {
            let base = c * pixel_count * 256;
            for (p, &sum) in stack.channel(c).iter().enumerate() {
                let bin = stack_mean(sum, n) as usize;
                self.histogram[base + p * 256 + bin] += 1;
            }
        }
        self.samples_this_cycle += 1;

        if self.samples_this_cycle >= CYCLE_SAMPLES {
            self.derive_pending(pool);
            self.histogram.iter_mut().for_each(|b| *b = 0);
            self.samples_this_cycle = 0;
        }
    }

    fn derive_pending(&mut self, pool: &rayon::ThreadPool) {
        let pixel_count = self.dims.pixel_count();
        let threshold = (self.samples_this_cycle + 1) / 2;
        let histogram = &self.histogram;
        let pending = &mut self.pending;

        pool.install(|| {
            for c in 0..3 {
                let base = c * pixel_count * 256;
                let hist_slice = &histogram[base..base + pixel_count * 256];
                pending
                    .channel_mut(c)
                    .par_iter_mut()
                    .zip(hist_slice.par_chunks_exact(256))
                    .for_each(|(dst, bins)| {
                        let mut cumulative = 0u32;
                        let mut median = 255u8;
                        for (bin, &count) in bins.iter().enumerate() {
                            cumulative += count as u32;
                            if cumulative >= threshold {
                                median = clip256(bin as i64);
                                break;
                            }
                        }
                        *dst = median;
                    });
            }
        });
        self.ready = true;
    }
}
