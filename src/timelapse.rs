//! Timelapse stacker (spec §4.5).
//!
//! Accumulates a fixed-length exposure (`TIMELAPSE_EXPOSURE` stacks) inside
//! every wall-clock-aligned window (`TIMELAPSE_INTERVAL` stacks), emitting
//! one summed frame per window and then sitting idle for the remainder.
//! Runs independently of the event recorder — `original_source`'s settings
//! (`TIMELAPSE_EXPOSURE=28`, `TIMELAPSE_INTERVAL=30`) describe a steady
//! 28-second exposure inside every 30-second window, the same cadence
//! whether or not an event is being recorded concurrently.
//!
//! Per spec §3/§4.5, the window's *opening* is pinned to wall-clock time, not
//! to a running tick count: nothing accumulates until [`TimelapseStacker::arm`]
//! has been called (with the next whole minute after warm-up) and the
//! engine's current UTC has crossed that target. Once a window closes, the
//! next target advances by a fixed `interval_secs`, so a camera that's been
//! running for days keeps emitting on exact minute boundaries rather than
//! drifting with accumulated rounding from tick-counting.

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::config::EngineConfig;
use crate::geometry::{clip256, PlaneDims, RgbPlanes, SumPlanes};
use crate::stacker::stack_mean;

/// One completed timelapse exposure.
pub struct TimelapseFrame {
    pub start_utc: DateTime<Utc>,
    pub stack: SumPlanes,
    pub stacks_accumulated: u32,
}

pub struct TimelapseStacker {
    dims: PlaneDims,
    stacks_per_exposure: u32,
    interval: Duration,
    exposure_remaining: u32,
    accum: SumPlanes,
    stacks_accumulated: u32,
    start_utc: Option<DateTime<Utc>>,
    /// Next wall-clock time at which a window may open. `None` until [`arm`]
    /// is called at the end of warm-up (spec §4.4).
    next_target: Option<DateTime<Utc>>,
    accumulating: bool,
}

impl TimelapseStacker {
    pub fn new(config: &EngineConfig) -> Self {
        let stacks_per_exposure = config.stacks_per_timelapse_exposure().max(1);
        let dims = config.plane;
        Self {
            dims,
            stacks_per_exposure,
            interval: Duration::milliseconds((config.timelapse.interval_secs * 1000.0).round() as i64),
            exposure_remaining: stacks_per_exposure,
            accum: SumPlanes::zeroed(dims),
            stacks_accumulated: 0,
            start_utc: None,
            next_target: None,
            accumulating: false,
        }
    }

    /// Seeds the first target: the next whole minute at or after `now`.
    /// Called once, when the event recorder's warm-up period elapses.
    pub fn arm(&mut self, now: DateTime<Utc>) {
        let remainder_secs = 60 - (now.second() as i64 % 60);
        let next_minute = (now + Duration::seconds(remainder_secs))
            .with_nanosecond(0)
            .unwrap_or(now);
        self.next_target = Some(next_minute);
    }

    /// Folds one completed short stack in, if a window is open. Returns a
    /// completed exposure once `stacks_per_exposure` stacks have been
    /// accumulated, then stays idle until the next wall-clock target.
    pub fn step(&mut self, stack: &SumPlanes, now: DateTime<Utc>) -> Option<TimelapseFrame> {
        if !self.accumulating {
            let target = self.next_target?;
            if now < target {
                return None;
            }
            self.accumulating = true;
        }

        if self.stacks_accumulated == 0 {
            self.start_utc = Some(now);
        }
        self.accum.accumulate(stack);
        self.stacks_accumulated += 1;
        self.exposure_remaining -= 1;

        if self.exposure_remaining > 0 {
            return None;
        }

        let frame = TimelapseFrame {
            start_utc: self.start_utc.take().expect("exposure start recorded on first stack"),
            stack: std::mem::replace(&mut self.accum, SumPlanes::zeroed(self.dims)),
            stacks_accumulated: std::mem::take(&mut self.stacks_accumulated),
        };
        self.exposure_remaining = self.stacks_per_exposure;
        self.accumulating = false;
        self.next_target = self.next_target.map(|t| t + self.interval);
        Some(frame)
    }
}

/// Normalizes a summed stack back to an 8-bit mean frame.
pub fn mean_frame(stack: &SumPlanes, n: u32, dims: PlaneDims) -> RgbPlanes {
    let mut out = RgbPlanes::zeroed(dims);
    for c in 0..3 {
        for (dst, &sum) in out.channel_mut(c).iter_mut().zip(stack.channel(c)) {
            *dst = stack_mean(sum, n as i32);
        }
    }
    out
}

/// Background-subtracted rendering of a summed stack: `clip((sum/n - bg) *
/// gain + offset)`, grounded on `original_source`'s `dumpFrameRGBFromISub`.
/// `offset` recenters the signed difference (typically 128) so dimming stays
/// visible instead of clipping to black; `gain` is `STACK_GAIN` for event and
/// timelapse artifacts.
pub fn subtract_background(
    stack: &SumPlanes,
    n: u32,
    background: &RgbPlanes,
    gain: i32,
    offset: i32,
    dims: PlaneDims,
) -> RgbPlanes {
    let mut out = RgbPlanes::zeroed(dims);
    for c in 0..3 {
        for ((dst, &sum), &bg) in out
            .channel_mut(c)
            .iter_mut()
            .zip(stack.channel(c))
            .zip(background.channel(c))
        {
            let mean = sum / n as i32;
            *dst = clip256((mean - bg as i32) as i64 * gain as i64 + offset as i64);
        }
    }
    out
}

/// Plain gained rendering of a summed stack, with no background subtracted:
/// `clip(sum/n * gain)`, grounded on `original_source`'s
/// `dumpFrameRGBFromInts`.
pub fn gained_frame(stack: &SumPlanes, n: u32, gain: i32, dims: PlaneDims) -> RgbPlanes {
    let mut out = RgbPlanes::zeroed(dims);
    for c in 0..3 {
        for (dst, &sum) in out.channel_mut(c).iter_mut().zip(stack.channel(c)) {
            let mean = sum / n as i32;
            *dst = clip256(mean as i64 * gain as i64);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{build_config, Args};

    fn test_config() -> EngineConfig {
        let args = Args { width: Some(4), height: Some(4), frame_rate: Some(1.0), ..Default::default() };
        let mut cfg = build_config(&args, None).unwrap();
        cfg.timelapse.exposure_secs = 3.0;
        cfg.timelapse.interval_secs = 5.0;
        cfg
    }

    #[test]
    fn stays_silent_until_armed() {
        let cfg = test_config();
        let dims = cfg.plane;
        let mut ts = TimelapseStacker::new(&cfg);
        let stack = SumPlanes::zeroed(dims);
        let now = Utc::now();
        assert!(ts.step(&stack, now).is_none());
    }

    #[test]
    fn emits_after_exposure_then_idles_until_next_target() {
        let cfg = test_config();
        let dims = cfg.plane;
        let mut ts = TimelapseStacker::new(&cfg);
        let stack = SumPlanes::zeroed(dims);
        let now = Utc::now();
        ts.arm(now);
        let target = now + Duration::seconds(60 - now.second() as i64 % 60);

        // Before the target, nothing accumulates even though a window is armed.
        assert!(ts.step(&stack, target - Duration::seconds(1)).is_none());

        assert!(ts.step(&stack, target).is_none());
        assert!(ts.step(&stack, target + Duration::seconds(1)).is_none());
        let frame = ts.step(&stack, target + Duration::seconds(2));
        assert!(frame.is_some());
        assert_eq!(frame.unwrap().stacks_accumulated, 3);

        // Idle for the remainder of the interval, even though ticks keep coming.
        assert!(ts.step(&stack, target + Duration::seconds(3)).is_none());
        assert!(ts.step(&stack, target + Duration::seconds(4)).is_none());

        // The next window opens exactly `interval_secs` after the first.
        assert!(ts.step(&stack, target + Duration::seconds(5)).is_some());
    }

    #[test]
    fn mean_frame_divides_by_stack_count() {
        let dims = PlaneDims::new(2, 2).unwrap();
        let mut stack = SumPlanes::zeroed(dims);
        stack.r = vec![40; dims.pixel_count()];
        let frame = mean_frame(&stack, 4, dims);
        assert_eq!(frame.r[0], 10);
    }

    #[test]
    fn subtract_background_applies_gain_and_offset() {
        let dims = PlaneDims::new(1, 1).unwrap();
        let mut stack = SumPlanes::zeroed(dims);
        stack.r[0] = 60; // n=1, mean=60
        let mut bg = RgbPlanes::zeroed(dims);
        bg.r[0] = 50;
        let diff = subtract_background(&stack, 1, &bg, 6, 128, dims);
        // (60 - 50) * 6 + 128 = 188
        assert_eq!(diff.r[0], 188);
    }

    #[test]
    fn gained_frame_scales_the_mean() {
        let dims = PlaneDims::new(1, 1).unwrap();
        let mut stack = SumPlanes::zeroed(dims);
        stack.r[0] = 20; // n=1, mean=20
        let frame = gained_frame(&stack, 1, 6, dims);
        assert_eq!(frame.r[0], 120);
    }
}
