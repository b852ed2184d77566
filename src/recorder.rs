//! Event-recorder state machine (spec §4.4).
//!
//! Warming (discarding the first K stacks for trigger purposes) → Idle
//! (evaluating the trigger each stack) → Recording (accumulating a
//! fixed-length event, throttled) → flush (handing a completed event's
//! artifacts back to the caller) → Idle. Grounded on `observe.c`'s
//! `framesSinceLastTrigger` / `TRIGGER_THROTTLE_*` bookkeeping: a rolling
//! window of recent trigger times gates how many events can start within
//! `throttle_period_mins`.
//!
//! `observe.c` writes three numbered segments per event (`observe.c:310-325`,
//! `observe.c:266-274`): the pre-event interval (`1_`), the triggering
//! interval (`2_`), and the accumulated post-trigger recording (`3_`). This
//! state machine keeps those three stack/max-map pairs distinct throughout
//! Recording rather than folding them into one combined accumulation, so the
//! caller can write all three segments independently.
//!
//! The recorder never touches disk itself — it hands a [`FlushedEvent`] back
//! to the caller, which writes it out through an [`crate::artifact::ArtifactSink`].
//! That keeps this state machine testable without a filesystem.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::config::EngineConfig;
use crate::geometry::{PlaneDims, RgbPlanes, SumPlanes};
use crate::trigger::MotionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Warming,
    Idle,
    Recording,
    Flushing,
}

/// A completed event's artifacts, ready to be written out.
///
/// Carries the three segments the spec's filename convention numbers `1_`,
/// `2_`, and `3_`: the pre-event interval, the triggering interval, and the
/// accumulated post-trigger recording.
pub struct FlushedEvent {
    pub start_utc: DateTime<Utc>,
    /// Segment `1_`: the interval immediately before the trigger fired.
    pub pre_stack: SumPlanes,
    pub pre_max: RgbPlanes,
    /// Segment `2_`: the triggering interval itself.
    pub trigger_stack: SumPlanes,
    pub trigger_max: RgbPlanes,
    /// Segment `3_`: every post-trigger interval accumulated, pixel-wise sum
    /// and running max respectively, across `post_stacks` intervals.
    pub post_stack: SumPlanes,
    pub post_max: RgbPlanes,
    /// Number of stack intervals folded into `post_stack`/`post_max`. Zero
    /// when `stacks_per_event == 1`, i.e. the event flushes on the same tick
    /// it starts.
    pub post_stacks: u32,
    /// The triggering interval's diagnostic image (spec §4.3 point 6),
    /// captured once at trigger time.
    pub diagnostic: RgbPlanes,
    /// Pre-event (previous interval) + trigger interval + post-event
    /// intervals, concatenated in time order.
    pub raw_video: Vec<u8>,
}

/// What happened on one call to [`EventRecorder::step`].
pub enum RecorderAction {
    None,
    WarmupComplete,
    EventStarted { start_utc: DateTime<Utc> },
    EventThrottled,
    EventFlushed(FlushedEvent),
}

pub struct EventRecorder {
    state: RecorderState,
    warm_up_remaining: u32,
    stacks_per_event: u32,
    recording_remaining: u32,
    event_pre_stack: Option<SumPlanes>,
    event_pre_max: Option<RgbPlanes>,
    event_trigger_stack: Option<SumPlanes>,
    event_trigger_max: Option<RgbPlanes>,
    event_post_stack: Option<SumPlanes>,
    event_post_max: Option<RgbPlanes>,
    event_post_stacks: u32,
    event_diagnostic: Option<RgbPlanes>,
    event_raw: Vec<u8>,
    event_start_utc: Option<DateTime<Utc>>,
    throttle_window: VecDeque<DateTime<Utc>>,
    throttle_period: ChronoDuration,
    throttle_max_events: u32,
    dims: PlaneDims,
}

impl EventRecorder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: if config.warm_up_stacks() == 0 { RecorderState::Idle } else { RecorderState::Warming },
            warm_up_remaining: config.warm_up_stacks(),
            stacks_per_event: config.stacks_per_event().max(1),
            recording_remaining: 0,
            event_pre_stack: None,
            event_pre_max: None,
            event_trigger_stack: None,
            event_trigger_max: None,
            event_post_stack: None,
            event_post_max: None,
            event_post_stacks: 0,
            event_diagnostic: None,
            event_raw: Vec::new(),
            event_start_utc: None,
            throttle_window: VecDeque::new(),
            throttle_period: ChronoDuration::minutes(config.throttle_period_mins as i64),
            throttle_max_events: config.throttle_max_events,
            dims: config.plane,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Whether rotation of the trigger's previous/current short-stack
    /// buffers should be suspended this tick: during Recording, the
    /// pre-event interval stays pinned as "previous" (spec §4.4, property
    /// 6 "pre-event pinning").
    pub fn suppress_buffer_rotation(&self) -> bool {
        matches!(self.state, RecorderState::Recording)
    }

    fn purge_throttle_window(&mut self, now: DateTime<Utc>) {
        while let Some(&front) = self.throttle_window.front() {
            if now - front > self.throttle_period {
                self.throttle_window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Advances the state machine by one completed short stack.
    ///
    /// `motion` is `None` during warm-up. `previous_stack`/`previous_max` are
    /// the prior interval's accumulation (the pre-event segment) and
    /// `previous_raw_frame_bytes` is its raw YUV420 bytes; `stack`/`max_map`/
    /// `raw_frame_bytes` are this interval's.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        motion: Option<&MotionResult>,
        previous_stack: &SumPlanes,
        previous_max: &RgbPlanes,
        stack: &SumPlanes,
        previous_raw_frame_bytes: &[u8],
        raw_frame_bytes: &[u8],
        max_map: &RgbPlanes,
        now: DateTime<Utc>,
    ) -> RecorderAction {
        match self.state {
            RecorderState::Warming => {
                self.warm_up_remaining = self.warm_up_remaining.saturating_sub(1);
                if self.warm_up_remaining == 0 {
                    self.state = RecorderState::Idle;
                    RecorderAction::WarmupComplete
                } else {
                    RecorderAction::None
                }
            }
            RecorderState::Idle => {
                let triggered = motion.map(|m| m.triggered).unwrap_or(false);
                if !triggered {
                    return RecorderAction::None;
                }
                self.purge_throttle_window(now);
                if self.throttle_window.len() as u32 >= self.throttle_max_events {
                    return RecorderAction::EventThrottled;
                }
                self.throttle_window.push_back(now);
                self.event_pre_stack = Some(previous_stack.clone());
                self.event_pre_max = Some(previous_max.clone());
                self.event_trigger_stack = Some(stack.clone());
                self.event_trigger_max = Some(max_map.clone());
                self.event_post_stack = Some(SumPlanes::zeroed(self.dims));
                self.event_post_max = Some(RgbPlanes::zeroed(self.dims));
                self.event_post_stacks = 0;
                self.event_diagnostic = motion.map(|m| m.diagnostic.clone());
                self.event_raw = previous_raw_frame_bytes.to_vec();
                self.event_raw.extend_from_slice(raw_frame_bytes);
                self.event_start_utc = Some(now);
                self.recording_remaining = self.stacks_per_event.saturating_sub(1);

                if self.recording_remaining == 0 {
                    self.state = RecorderState::Flushing;
                    let flushed = self.take_flushed();
                    self.state = RecorderState::Idle;
                    RecorderAction::EventFlushed(flushed)
                } else {
                    self.state = RecorderState::Recording;
                    RecorderAction::EventStarted { start_utc: now }
                }
            }
            RecorderState::Recording => {
                if let Some(ps) = self.event_post_stack.as_mut() {
                    ps.accumulate(stack);
                }
                if let Some(pm) = self.event_post_max.as_mut() {
                    pm.max_into(max_map);
                }
                self.event_post_stacks += 1;
                self.event_raw.extend_from_slice(raw_frame_bytes);
                self.recording_remaining = self.recording_remaining.saturating_sub(1);

                if self.recording_remaining == 0 {
                    self.state = RecorderState::Flushing;
                    let flushed = self.take_flushed();
                    self.state = RecorderState::Idle;
                    RecorderAction::EventFlushed(flushed)
                } else {
                    RecorderAction::None
                }
            }
            RecorderState::Flushing => {
                // Flushing is entered and exited within the same `step`
                // call that completes an event; a caller can never observe
                // it via `state()` between calls.
                self.state = RecorderState::Idle;
                RecorderAction::None
            }
        }
    }

    fn take_flushed(&mut self) -> FlushedEvent {
        let pre_stack = self.event_pre_stack.take().unwrap_or_else(|| SumPlanes::zeroed(self.dims));
        let pre_max = self.event_pre_max.take().unwrap_or_else(|| RgbPlanes::zeroed(self.dims));
        let trigger_stack = self.event_trigger_stack.take().unwrap_or_else(|| SumPlanes::zeroed(self.dims));
        let trigger_max = self.event_trigger_max.take().unwrap_or_else(|| RgbPlanes::zeroed(self.dims));
        let post_stack = self.event_post_stack.take().unwrap_or_else(|| SumPlanes::zeroed(self.dims));
        let post_max = self.event_post_max.take().unwrap_or_else(|| RgbPlanes::zeroed(self.dims));
        let diagnostic = self.event_diagnostic.take().unwrap_or_else(|| RgbPlanes::zeroed(self.dims));
        let start_utc = self.event_start_utc.take().unwrap_or_else(Utc::now);
        let raw = std::mem::take(&mut self.event_raw);
        FlushedEvent {
            start_utc,
            pre_stack,
            pre_max,
            trigger_stack,
            trigger_max,
            post_stack,
            post_max,
            post_stacks: std::mem::take(&mut self.event_post_stacks),
            diagnostic,
            raw_video: raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{build_config, Args};

    fn test_config(warm_up_secs: f64, event_record_secs: f64, throttle_max: u32) -> EngineConfig {
        let args = Args {
            width: Some(16),
            height: Some(16),
            frame_rate: Some(1.0),
            ..Default::default()
        };
        let mut cfg = build_config(&args, None).unwrap();
        cfg.warm_up_secs = warm_up_secs;
        cfg.event_record_secs = event_record_secs;
        cfg.throttle_max_events = throttle_max;
        cfg
    }

    fn dims() -> PlaneDims {
        PlaneDims::new(16, 16).unwrap()
    }

    fn motion(triggered: bool) -> MotionResult {
        MotionResult { triggered, diagnostic: RgbPlanes::zeroed(dims()) }
    }

    #[test]
    fn warms_up_before_evaluating_trigger() {
        let cfg = test_config(3.0, 2.0, 5);
        let mut rec = EventRecorder::new(&cfg);
        assert_eq!(rec.state(), RecorderState::Warming);
        let stack = SumPlanes::zeroed(dims());
        let max_map = RgbPlanes::zeroed(dims());
        let now = Utc::now();

        rec.step(None, &stack, &max_map, &stack, &[], &[], &max_map, now);
        rec.step(None, &stack, &max_map, &stack, &[], &[], &max_map, now);
        assert_eq!(rec.state(), RecorderState::Warming);
        let action = rec.step(None, &stack, &max_map, &stack, &[], &[], &max_map, now);
        assert!(matches!(action, RecorderAction::WarmupComplete));
        assert_eq!(rec.state(), RecorderState::Idle);
    }

    #[test]
    fn trigger_starts_and_flushes_an_event() {
        let cfg = test_config(0.0, 2.0, 5);
        let mut rec = EventRecorder::new(&cfg);
        let stack = SumPlanes::zeroed(dims());
        let max_map = RgbPlanes::zeroed(dims());
        let now = Utc::now();

        let action = rec.step(Some(&motion(true)), &stack, &max_map, &stack, &[1, 2], &[3, 4], &max_map, now);
        assert!(matches!(action, RecorderAction::EventStarted { .. }));
        assert_eq!(rec.state(), RecorderState::Recording);

        let action = rec.step(Some(&motion(false)), &stack, &max_map, &stack, &[], &[5, 6], &max_map, now);
        match action {
            RecorderAction::EventFlushed(flushed) => {
                assert_eq!(flushed.raw_video, vec![1, 2, 3, 4, 5, 6]);
                assert_eq!(flushed.post_stacks, 1);
            }
            _ => panic!("expected a flushed event"),
        }
        assert_eq!(rec.state(), RecorderState::Idle);
    }

    #[test]
    fn throttle_blocks_excess_events_within_window() {
        let cfg = test_config(0.0, 1.0, 1);
        let mut rec = EventRecorder::new(&cfg);
        let stack = SumPlanes::zeroed(dims());
        let max_map = RgbPlanes::zeroed(dims());
        let now = Utc::now();

        let a1 = rec.step(Some(&motion(true)), &stack, &max_map, &stack, &[], &[], &max_map, now);
        assert!(matches!(a1, RecorderAction::EventFlushed(_)));

        let a2 = rec.step(Some(&motion(true)), &stack, &max_map, &stack, &[], &[], &max_map, now);
        assert!(matches!(a2, RecorderAction::EventThrottled));
    }

    #[test]
    fn event_max_map_accumulates_pixelwise_across_recording_ticks() {
        let cfg = test_config(0.0, 3.0, 5);
        let mut rec = EventRecorder::new(&cfg);
        let stack = SumPlanes::zeroed(dims());
        let now = Utc::now();

        let mut trigger_max = RgbPlanes::zeroed(dims());
        trigger_max.r[0] = 40;
        trigger_max.r[1] = 90;
        rec.step(Some(&motion(true)), &stack, &trigger_max, &stack, &[], &[], &trigger_max, now);
        assert_eq!(rec.state(), RecorderState::Recording);

        let mut tick_max = RgbPlanes::zeroed(dims());
        tick_max.r[0] = 200;
        tick_max.r[1] = 10;
        rec.step(Some(&motion(false)), &stack, &tick_max, &stack, &[], &[], &tick_max, now);

        let final_max = RgbPlanes::zeroed(dims());
        let action = rec.step(Some(&motion(false)), &stack, &final_max, &stack, &[], &[], &final_max, now);
        match action {
            RecorderAction::EventFlushed(flushed) => {
                // Each pixel should hold the max ever seen across the two
                // post-trigger ticks, independent of the trigger segment.
                assert_eq!(flushed.post_max.r[0], 200);
                assert_eq!(flushed.post_max.r[1], 10);
                assert_eq!(flushed.trigger_max.r[0], 40);
                assert_eq!(flushed.trigger_max.r[1], 90);
            }
            _ => panic!("expected a flushed event"),
        }
    }

    #[test]
    fn flushed_event_carries_the_triggering_ticks_diagnostic() {
        let cfg = test_config(0.0, 1.0, 5);
        let mut rec = EventRecorder::new(&cfg);
        let stack = SumPlanes::zeroed(dims());
        let max_map = RgbPlanes::zeroed(dims());
        let now = Utc::now();

        let mut triggering = motion(true);
        triggering.diagnostic.b[3] = 255;

        let action = rec.step(Some(&triggering), &stack, &max_map, &stack, &[], &[], &max_map, now);
        match action {
            RecorderAction::EventFlushed(flushed) => {
                assert_eq!(flushed.diagnostic.b[3], 255);
            }
            _ => panic!("expected a flushed event"),
        }
    }

    #[test]
    fn buffer_rotation_suppressed_only_while_recording() {
        let cfg = test_config(0.0, 3.0, 5);
        let mut rec = EventRecorder::new(&cfg);
        let stack = SumPlanes::zeroed(dims());
        let max_map = RgbPlanes::zeroed(dims());
        let now = Utc::now();

        assert!(!rec.suppress_buffer_rotation());
        rec.step(Some(&motion(true)), &stack, &max_map, &stack, &[], &[], &max_map, now);
        assert!(rec.suppress_buffer_rotation());
    }
}
