//! Short-buffer stacker (spec §4.1).
//!
//! Reads one stack interval (`n` consecutive frames, `n` ≈ fps) from a
//! [`FrameProvider`], accumulating RGB sums and a per-pixel max-map, and
//! optionally feeding a median histogram workspace in the same pass.
//! Grounded on `observe.c`'s `readShortBuffer`: one function that does the
//! fetch, colour-convert, accumulate, and max-update for a whole interval.
//! `observe.c` also threads an optional *second* sum stack through the same
//! loop so that one read pass can feed both the short-interval stack and an
//! open timelapse accumulation; this implementation does not carry that
//! parameter, since [`crate::timelapse::TimelapseStacker`] folds each
//! completed short stack into its own exposure window independently once
//! `read_short_buffer` returns (`TimelapseStacker::step`), rather than
//! needing to know whether a timelapse window happens to be open while the
//! frame loop is still running.

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::colorspace::{yuv420_frame_len, yuv420_to_rgb, ColorTables};
use crate::error::ObserveError;
use crate::geometry::{clip256, PlaneDims, RgbPlanes, SumPlanes};
use crate::median::MedianWorkspace;
use crate::source::{FetchStatus, FrameProvider};

/// Reads exactly `n` frames from `provider` into `raw_dst` (which must be
/// `n * yuv420_frame_len(dims)` bytes), accumulating into `stack_dst` and
/// `max_dst`. Both must already be cleared by the caller.
///
/// Returns the UTC timestamp of the last frame read. On end-of-stream the
/// buffers are left partially written (guarantee only holds on success).
#[allow(clippy::too_many_arguments)]
pub fn read_short_buffer(
    provider: &mut dyn FrameProvider,
    n: usize,
    dims: PlaneDims,
    raw_dst: &mut [u8],
    stack_dst: &mut SumPlanes,
    max_dst: &mut RgbPlanes,
    median_ws: Option<&mut MedianWorkspace>,
    tables: &ColorTables,
    pool: &rayon::ThreadPool,
) -> Result<DateTime<Utc>, ObserveError> {
    let frame_len = yuv420_frame_len(dims);
    debug_assert_eq!(raw_dst.len(), n * frame_len);

    let mut rgb_scratch = RgbPlanes::zeroed(dims);
    let mut last_utc = None;

    for i in 0..n {
        let raw_frame = &mut raw_dst[i * frame_len..(i + 1) * frame_len];
        // A transient per-frame decode error is recovered locally (spec §7):
        // log it and skip this frame's contribution entirely, rather than
        // aborting the stack interval. `raw_frame` is zeroed so the raw video
        // dump doesn't carry forward whatever garbage was left from a prior
        // stack interval's reuse of this buffer.
        let status = match provider.fetch_frame(Some(raw_frame)) {
            Ok((status, utc)) => {
                last_utc = utc.or(last_utc);
                status
            }
            Err(ObserveError::DecodeTransient(msg)) => {
                log::warn!("dropping frame {i} of this stack interval, decode error: {msg}");
                raw_frame.iter_mut().for_each(|b| *b = 0);
                continue;
            }
            Err(e) => return Err(e),
        };
        if status == FetchStatus::End {
            return Err(ObserveError::EndOfStream);
        }

        yuv420_to_rgb(raw_frame, dims, tables, &mut rgb_scratch);

        pool.install(|| {
            for c in 0..3 {
                let rgb_chan = rgb_scratch.channel(c);
                stack_dst
                    .channel_mut(c)
                    .par_iter_mut()
                    .zip(rgb_chan.par_iter())
                    .for_each(|(sum, &px)| *sum += px as i32);
                max_dst
                    .channel_mut(c)
                    .par_iter_mut()
                    .zip(rgb_chan.par_iter())
                    .for_each(|(m, &px)| {
                        if px > *m {
                            *m = px;
                        }
                    });
            }
        });
    }

    if let Some(ws) = median_ws {
        ws.absorb_stack(stack_dst, n as i32, dims, pool);
    }

    last_utc.ok_or(ObserveError::EndOfStream)
}

/// Normalizes a summed stack back to a per-pixel 8-bit value: `clip(sum/n)`.
#[inline]
pub fn stack_mean(sum: i32, n: i32) -> u8 {
    clip256((sum / n) as i64)
}
