//! Frame providers.
//!
//! Out of core scope (spec §1): camera capture and compressed-video decoding
//! are external collaborators. What the engine depends on is the small
//! capability pair described in spec §6 — `fetch_frame` / `rewind` — modeled
//! here as the `FrameProvider` trait, the way a `transcoder::source::video::Source`
//! trait is the seam between the engine
//! and whatever produces frames (`consume`/`get_video` there; `fetch_frame`/
//! `rewind` here). Concrete variants are polymorphic over that pair, per
//! Design Notes §9: a live camera, a recorded-file decoder, or (for tests)
//! a synthetic source.

use chrono::{DateTime, Duration, Utc};

use crate::error::ObserveError;
use crate::geometry::PlaneDims;

/// Outcome of a single `fetch_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// A frame was fetched (and written to `dst`, if one was given).
    Ok,
    /// No more frames are available.
    End,
}

/// Outcome of a `rewind` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindStatus {
    Ok,
    Unsupported,
}

/// A source of successive YUV420 frames, each tagged with a monotonic UTC
/// timestamp.
///
/// `fetch_frame` must advance the provider and populate `dims()` even when
/// `dst` is `None`, so that a caller can probe the stream's geometry before
/// allocating buffers.
pub trait FrameProvider: Send {
    /// Width and height of frames this provider produces.
    fn dims(&self) -> PlaneDims;

    /// Fetches the next frame. When `dst` is `Some`, its length must equal
    /// `yuv420_frame_len(self.dims())`; the raw YUV420 bytes are written
    /// into it. Returns the frame's UTC timestamp alongside the status.
    fn fetch_frame(
        &mut self,
        dst: Option<&mut [u8]>,
    ) -> Result<(FetchStatus, Option<DateTime<Utc>>), ObserveError>;

    /// Rewinds to the start of the stream. Called exactly once, at the end
    /// of the warm-up period (spec §4.4). A live camera reports
    /// `Unsupported`; a recorded source seeks back to its first frame.
    fn rewind(&mut self) -> Result<(RewindStatus, Option<DateTime<Utc>>), ObserveError>;
}

/// Builds a single all-gray YUV420 frame (neutral chroma, so after colour
/// conversion R = G = B = `value` everywhere). Used to construct synthetic
/// test fixtures without depending on the colour converter's coefficients.
pub fn make_gray_frame(dims: PlaneDims, value: u8) -> Vec<u8> {
    let w = dims.width() as usize;
    let h = dims.height() as usize;
    let mut frame = vec![0u8; w * h * 3 / 2];
    frame[..w * h].iter_mut().for_each(|b| *b = value);
    frame[w * h..].iter_mut().for_each(|b| *b = 128);
    frame
}

/// Overwrites a `size x size` square of luma samples centred on `(cx, cy)`
/// with `value`, leaving chroma untouched (still neutral). Used to inject a
/// synthetic bright cluster into an otherwise-uniform frame.
pub fn inject_square(frame: &mut [u8], dims: PlaneDims, cx: u32, cy: u32, size: u32, value: u8) {
    let w = dims.width() as i64;
    let h = dims.height() as i64;
    let half = size as i64 / 2;
    for dy in -half..=half {
        for dx in -half..=half {
            let x = cx as i64 + dx;
            let y = cy as i64 + dy;
            if x >= 0 && y >= 0 && x < w && y < h {
                frame[(y * w + x) as usize] = value;
            }
        }
    }
}

/// A deterministic, rewindable provider over a fixed sequence of pre-built
/// YUV420 frames. The stand-in for a recorded-file decoder in tests (spec
/// §8's E1–E6 scenarios, and property tests 1–8).
pub struct SyntheticSource {
    dims: PlaneDims,
    frames: Vec<Vec<u8>>,
    idx: usize,
    start_utc: DateTime<Utc>,
    frame_period: Duration,
    rewindable: bool,
}

impl SyntheticSource {
    pub fn new(
        dims: PlaneDims,
        frames: Vec<Vec<u8>>,
        start_utc: DateTime<Utc>,
        fps: f64,
        rewindable: bool,
    ) -> Self {
        let micros = (1_000_000.0 / fps).round() as i64;
        Self {
            dims,
            frames,
            idx: 0,
            start_utc,
            frame_period: Duration::microseconds(micros),
            rewindable,
        }
    }

    pub fn frames_remaining(&self) -> usize {
        self.frames.len().saturating_sub(self.idx)
    }
}

impl FrameProvider for SyntheticSource {
    fn dims(&self) -> PlaneDims {
        self.dims
    }

    fn fetch_frame(
        &mut self,
        dst: Option<&mut [u8]>,
    ) -> Result<(FetchStatus, Option<DateTime<Utc>>), ObserveError> {
        if self.idx >= self.frames.len() {
            return Ok((FetchStatus::End, None));
        }
        let utc = self.start_utc + self.frame_period * self.idx as i32;
        if let Some(dst) = dst {
            dst.copy_from_slice(&self.frames[self.idx]);
        }
        self.idx += 1;
        Ok((FetchStatus::Ok, Some(utc)))
    }

    fn rewind(&mut self) -> Result<(RewindStatus, Option<DateTime<Utc>>), ObserveError> {
        if !self.rewindable {
            return Ok((RewindStatus::Unsupported, None));
        }
        self.idx = 0;
        Ok((RewindStatus::Ok, Some(self.start_utc)))
    }
}

/// Wiring point for a recorded-file source (decoding a pre-compressed video
/// on disk, e.g. H.264/MP4). Decoding is an external collaborator per spec
/// §1; this struct exists only so `Engine` can be constructed against a
/// concrete type without pulling in a codec dependency. A real
/// implementation backs `fetch_frame`/`rewind` with a decoder and forwards
/// its frames here.
pub struct RecordedFileSource {
    dims: PlaneDims,
}

impl RecordedFileSource {
    pub fn new(dims: PlaneDims) -> Self {
        Self { dims }
    }
}

impl FrameProvider for RecordedFileSource {
    fn dims(&self) -> PlaneDims {
        self.dims
    }

    fn fetch_frame(
        &mut self,
        _dst: Option<&mut [u8]>,
    ) -> Result<(FetchStatus, Option<DateTime<Utc>>), ObserveError> {
        Ok((FetchStatus::End, None))
    }

    fn rewind(&mut self) -> Result<(RewindStatus, Option<DateTime<Utc>>), ObserveError> {
        Ok((RewindStatus::Unsupported, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_yields_frames_then_end() {
        let dims = PlaneDims::new(4, 4).unwrap();
        let frames = vec![make_gray_frame(dims, 10), make_gray_frame(dims, 20)];
        let mut src = SyntheticSource::new(dims, frames, Utc::now(), 10.0, true);
        let mut buf = vec![0u8; dims.pixel_count() * 3 / 2];
        let (status, utc1) = src.fetch_frame(Some(&mut buf)).unwrap();
        assert_eq!(status, FetchStatus::Ok);
        assert!(utc1.is_some());
        assert_eq!(buf[0], 10);
        let (status, utc2) = src.fetch_frame(Some(&mut buf)).unwrap();
        assert_eq!(status, FetchStatus::Ok);
        assert!(utc2.unwrap() > utc1.unwrap());
        let (status, _) = src.fetch_frame(Some(&mut buf)).unwrap();
        assert_eq!(status, FetchStatus::End);
    }

    #[test]
    fn rewind_resets_index_when_supported() {
        let dims = PlaneDims::new(2, 2).unwrap();
        let frames = vec![make_gray_frame(dims, 1), make_gray_frame(dims, 2)];
        let mut src = SyntheticSource::new(dims, frames, Utc::now(), 1.0, true);
        let mut buf = vec![0u8; dims.pixel_count() * 3 / 2];
        src.fetch_frame(Some(&mut buf)).unwrap();
        src.fetch_frame(Some(&mut buf)).unwrap();
        assert_eq!(src.frames_remaining(), 0);
        let (status, _) = src.rewind().unwrap();
        assert_eq!(status, RewindStatus::Ok);
        assert_eq!(src.frames_remaining(), 2);
    }

    #[test]
    fn inject_square_overwrites_only_luma_region() {
        let dims = PlaneDims::new(10, 10).unwrap();
        let mut frame = make_gray_frame(dims, 50);
        inject_square(&mut frame, dims, 5, 5, 4, 255);
        assert_eq!(frame[5 * 10 + 5], 255);
        assert_eq!(frame[0], 50);
    }
}
