//! The observation engine: the cooperative loop tying the frame provider,
//! stacker, median estimator, motion trigger, event recorder, and timelapse
//! stacker together.
//!
//! Owns one `rayon::ThreadPool` for the lifetime of the run, the way a
//! `SimulProcessor` owns a pool sized once at construction rather
//! than rebuilding it per frame. Buffers (`raw`, `stack`, `max_map`) are
//! allocated once before the loop starts and reused every stack interval.
//!
//! The motion trigger (`detect_motion`) compares each interval's stack
//! against the *previous* interval's stack, an independent rolling buffer
//! the engine keeps in `previous_stack`/`previous_max`/`previous_raw`. This
//! is distinct from the median-map estimator, which cycles on its own
//! 255-sample-per-bin schedule and is used only for background subtraction
//! in artifact rendering. The two therefore advance independently: the
//! median flip is unconditional, while the previous/current buffer rotation
//! is pinned while an event is recording (spec §4.4's pre-event pinning), so
//! the pre-event video segment stays the interval immediately before the
//! trigger fired rather than drifting forward while the event lengthens.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::artifact::{dump_frame_rgb_from_isub, dump_frame_rgb_from_sums, ArtifactSink};
use crate::colorspace::{yuv420_frame_len, ColorTables};
use crate::config::EngineConfig;
use crate::error::ObserveError;
use crate::filename::artifact_path;
use crate::geometry::{PlaneDims, RgbPlanes, SumPlanes};
use crate::median::MedianWorkspace;
use crate::recorder::{EventRecorder, RecorderAction, RecorderState};
use crate::source::FrameProvider;
use crate::stacker::read_short_buffer;
use crate::timelapse::TimelapseStacker;
use crate::trigger::detect_motion;

pub struct Engine {
    config: EngineConfig,
    pool: rayon::ThreadPool,
    tables: ColorTables,
    median: MedianWorkspace,
    recorder: EventRecorder,
    timelapse: TimelapseStacker,
    dims: PlaneDims,
    previous_stack: SumPlanes,
    previous_max: RgbPlanes,
    previous_raw: Vec<u8>,
    have_previous: bool,
    timelapse_armed: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, ObserveError> {
        let dims = config.plane;
        let pool = rayon::ThreadPoolBuilder::new()
            .build()
            .map_err(|_| ObserveError::Allocation { buffer: "rayon thread pool" })?;
        let median = MedianWorkspace::new(dims, config.median_sample_every_n)?;
        let recorder = EventRecorder::new(&config);
        let timelapse = TimelapseStacker::new(&config);
        Ok(Self {
            config,
            pool,
            tables: ColorTables::new(),
            median,
            recorder,
            timelapse,
            dims,
            previous_stack: SumPlanes::zeroed(dims),
            previous_max: RgbPlanes::zeroed(dims),
            previous_raw: Vec::new(),
            have_previous: false,
            timelapse_armed: false,
        })
    }

    /// Runs until the provider reaches end of stream or `cancel` is set.
    /// `sink` receives every emitted artifact.
    pub fn run(
        &mut self,
        provider: &mut dyn FrameProvider,
        sink: &mut dyn ArtifactSink,
        cancel: &AtomicBool,
    ) -> Result<(), ObserveError> {
        let frames_per_stack = self.config.frames_per_stack().max(1);
        let frame_len = yuv420_frame_len(self.dims);
        let mut raw = vec![0u8; frames_per_stack as usize * frame_len];
        let mut stack = SumPlanes::zeroed(self.dims);
        let mut max_map = RgbPlanes::zeroed(self.dims);

        loop {
            if cancel.load(Ordering::Relaxed) {
                log::info!("observation engine cancelled");
                return Ok(());
            }

            stack.clear();
            max_map.clear();

            let utc = match read_short_buffer(
                provider,
                frames_per_stack as usize,
                self.dims,
                &mut raw,
                &mut stack,
                &mut max_map,
                Some(&mut self.median),
                &self.tables,
                &self.pool,
            ) {
                Ok(utc) => utc,
                Err(ObserveError::EndOfStream) => {
                    log::info!("frame provider exhausted, stopping");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            // The median estimator cycles on its own schedule and feeds only
            // background subtraction; it never gates on recorder state.
            if self.median.is_ready() {
                self.median.flip();
            }

            let motion = if !self.have_previous || matches!(self.recorder.state(), RecorderState::Warming) {
                None
            } else {
                Some(detect_motion(
                    &self.previous_stack,
                    &stack,
                    frames_per_stack,
                    self.dims,
                    &self.config.trigger,
                ))
            };

            let action = self.recorder.step(
                motion.as_ref(),
                &self.previous_stack,
                &self.previous_max,
                &stack,
                &self.previous_raw,
                &raw,
                &max_map,
                utc,
            );
            // Arms the timelapse (and issues the one-time rewind) the first
            // time the recorder is found out of Warming: either the normal
            // transition on this tick (`action` is `WarmupComplete`), or, for
            // a zero-length warm-up, the very first tick, since the recorder
            // then starts in `Idle` directly and no such action ever fires.
            if !self.timelapse_armed && !matches!(self.recorder.state(), RecorderState::Warming) {
                self.on_warmup_complete(provider, utc);
                self.timelapse_armed = true;
            }
            self.handle_recorder_action(action, sink);

            if !self.recorder.suppress_buffer_rotation() {
                self.previous_stack.clone_from(&stack);
                self.previous_max.clone_from(&max_map);
                self.previous_raw.clear();
                self.previous_raw.extend_from_slice(&raw);
                self.have_previous = true;
            }

            if let Some(frame) = self.timelapse.step(&stack, utc) {
                self.write_timelapse_frame(frame, sink);
            }
        }
    }

    /// Issues the one-time rewind (spec §4.4) and seeds the timelapse's
    /// initial wall-clock target once warm-up has elapsed.
    fn on_warmup_complete(&mut self, provider: &mut dyn FrameProvider, utc: DateTime<Utc>) {
        match provider.rewind() {
            Ok((crate::source::RewindStatus::Ok, rewound_utc)) => {
                log::info!("rewound frame provider to start of stream");
                self.timelapse.arm(rewound_utc.unwrap_or(utc));
                return;
            }
            Ok((crate::source::RewindStatus::Unsupported, _)) => {
                log::debug!("frame provider does not support rewind (live source)");
            }
            Err(e) => {
                log::warn!("rewind failed, continuing without it: {e}");
            }
        }
        self.timelapse.arm(utc);
    }

    /// Logged rather than propagated: per spec §7, artefact write failures
    /// are recovered locally and processing continues.
    fn log_write_failure(context: &str, result: Result<(), ObserveError>) {
        if let Err(e) = result {
            log::error!("{context}: {e}");
        }
    }

    fn handle_recorder_action(&mut self, action: RecorderAction, sink: &mut dyn ArtifactSink) {
        match action {
            RecorderAction::None => {}
            RecorderAction::WarmupComplete => {
                log::info!("warm-up complete, entering idle");
            }
            RecorderAction::EventStarted { start_utc } => {
                log::info!("event recording started at {start_utc}");
            }
            RecorderAction::EventThrottled => {
                log::warn!("trigger fired but event was throttled");
            }
            RecorderAction::EventFlushed(flushed) => {
                let start = flushed.start_utc;
                let frames_per_stack = self.config.frames_per_stack().max(1);

                let raw_path = artifact_path(&self.config.output_root, &self.config.camera_label, "events", start, "", "vid");
                Self::log_write_failure(
                    "failed to write event video",
                    sink.dump_video(&raw_path, self.dims, &flushed.raw_video),
                );

                self.write_event_segment(sink, start, "1", &flushed.pre_stack, &flushed.pre_max, frames_per_stack);
                self.write_event_segment(sink, start, "2", &flushed.trigger_stack, &flushed.trigger_max, frames_per_stack);
                let post_frames = (frames_per_stack * flushed.post_stacks).max(1);
                self.write_event_segment(sink, start, "3", &flushed.post_stack, &flushed.post_max, post_frames);

                let map_path = artifact_path(&self.config.output_root, &self.config.camera_label, "events", start, "MAP", "rgb");
                Self::log_write_failure(
                    "failed to write event diagnostic map",
                    sink.dump_frame_rgb(&map_path, self.dims, &flushed.diagnostic),
                );

                log::info!(
                    "event flushed: {} post-trigger stacks written to {}",
                    flushed.post_stacks,
                    raw_path.display()
                );
            }
        }
    }

    /// Writes one numbered event segment's `BS0`/`BS1`/`MAX` triple (spec §6:
    /// `1_`/`2_`/`3_` prefixed artifacts for the pre-event, trigger-interval,
    /// and post-trigger segments respectively).
    fn write_event_segment(
        &self,
        sink: &mut dyn ArtifactSink,
        start: DateTime<Utc>,
        segment: &str,
        stack: &SumPlanes,
        max_map: &RgbPlanes,
        total_frames: u32,
    ) {
        let bs0_path = artifact_path(
            &self.config.output_root,
            &self.config.camera_label,
            "events",
            start,
            &format!("{segment}_BS0"),
            "rgb",
        );
        Self::log_write_failure(
            "failed to write event segment stack",
            dump_frame_rgb_from_sums(sink, &bs0_path, self.dims, stack, total_frames),
        );

        let bs1_path = artifact_path(
            &self.config.output_root,
            &self.config.camera_label,
            "events",
            start,
            &format!("{segment}_BS1"),
            "rgb",
        );
        Self::log_write_failure(
            "failed to write event segment background-subtracted stack",
            dump_frame_rgb_from_isub(
                sink,
                &bs1_path,
                self.dims,
                stack,
                total_frames,
                self.median.active_map(),
                self.config.stack_gain,
                128,
            ),
        );

        let max_path = artifact_path(
            &self.config.output_root,
            &self.config.camera_label,
            "events",
            start,
            &format!("{segment}_MAX"),
            "rgb",
        );
        Self::log_write_failure(
            "failed to write event segment max-map",
            sink.dump_frame_rgb(&max_path, self.dims, max_map),
        );
    }

    fn write_timelapse_frame(&mut self, frame: crate::timelapse::TimelapseFrame, sink: &mut dyn ArtifactSink) {
        let start: DateTime<Utc> = frame.start_utc;
        let total_frames = frame.stacks_accumulated * self.config.frames_per_stack().max(1);

        let plain_path = artifact_path(&self.config.output_root, &self.config.camera_label, "timelapse", start, "BS0", "rgb");
        Self::log_write_failure(
            "failed to write timelapse stack",
            dump_frame_rgb_from_sums(sink, &plain_path, self.dims, &frame.stack, total_frames),
        );

        let bgsub_path = artifact_path(&self.config.output_root, &self.config.camera_label, "timelapse", start, "BS1", "rgb");
        Self::log_write_failure(
            "failed to write timelapse background-subtracted stack",
            dump_frame_rgb_from_isub(
                sink,
                &bgsub_path,
                self.dims,
                &frame.stack,
                total_frames,
                self.median.active_map(),
                self.config.stack_gain,
                128,
            ),
        );

        log::debug!("timelapse frame written for {start}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::InMemorySink;
    use crate::config::{build_config, Args};
    use crate::source::{inject_square, make_gray_frame, SyntheticSource};
    use chrono::TimeZone;

    /// A fixed instant 2 seconds before a whole-minute boundary, so a short
    /// synthetic run actually crosses the timelapse's next wall-clock target
    /// (spec §4.5) instead of depending on where `Utc::now()` falls in the
    /// current real minute.
    fn near_minute_boundary() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 58).unwrap()
    }

    fn test_config(frames: usize) -> (EngineConfig, Vec<Vec<u8>>) {
        let args = Args { width: Some(64), height: Some(64), frame_rate: Some(2.0), ..Default::default() };
        let mut cfg = build_config(&args, None).unwrap();
        cfg.warm_up_secs = 0.0;
        cfg.event_record_secs = 1.0;
        cfg.stack_interval_secs = 1.0;
        cfg.timelapse.exposure_secs = 2.0;
        cfg.timelapse.interval_secs = 4.0;
        let dims = cfg.plane;
        let frames: Vec<_> = (0..frames).map(|_| make_gray_frame(dims, 40)).collect();
        (cfg, frames)
    }

    #[test]
    fn idle_run_emits_timelapse_but_no_events() {
        let (cfg, frames) = test_config(16);
        let dims = cfg.plane;
        let mut provider = SyntheticSource::new(dims, frames, near_minute_boundary(), 2.0, false);
        let mut engine = Engine::new(cfg).unwrap();
        let mut sink = InMemorySink::new();
        let cancel = AtomicBool::new(false);

        engine.run(&mut provider, &mut sink, &cancel).unwrap();

        assert!(sink.videos.is_empty());
        assert!(!sink.images.is_empty());
    }

    #[test]
    fn bright_cluster_triggers_an_event_recording() {
        let (cfg, mut frames) = test_config(20);
        let dims = cfg.plane;
        // Skip the first couple of stacks so a "previous" buffer exists
        // before the cluster appears, then keep it bright for several
        // stacks so the trigger has time to fire against its predecessor.
        for frame in frames.iter_mut().skip(4) {
            inject_square(frame, dims, 32, 32, 12, 250);
        }
        let mut provider = SyntheticSource::new(dims, frames, Utc::now(), 2.0, false);
        let mut engine = Engine::new(cfg).unwrap();
        let mut sink = InMemorySink::new();
        let cancel = AtomicBool::new(false);

        engine.run(&mut provider, &mut sink, &cancel).unwrap();

        assert!(!sink.videos.is_empty());
        assert!(
            sink.images.iter().any(|(path, _)| path.to_string_lossy().contains("_MAP.rgb")),
            "expected the triggering event's diagnostic map to be written"
        );
    }

    #[test]
    fn cancellation_stops_the_loop_cleanly() {
        let (cfg, frames) = test_config(100);
        let dims = cfg.plane;
        let mut provider = SyntheticSource::new(dims, frames, Utc::now(), 2.0, false);
        let mut engine = Engine::new(cfg).unwrap();
        let mut sink = InMemorySink::new();
        let cancel = AtomicBool::new(true);

        engine.run(&mut provider, &mut sink, &cancel).unwrap();
        assert!(sink.images.is_empty());
    }
}
