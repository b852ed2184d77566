//! Engine configuration: CLI flags, TOML file, and the validated profile
//! built from them.
//!
//! Follows a dual-surface pattern (`SimulProcArgs` in
//! `utils/simulproc.rs`): a `clap::Parser` struct for command-line
//! ergonomics, a plain `serde`-deserializable struct mirroring it for a TOML
//! file on disk, and a merge step where CLI flags override file values. The
//! merged result is validated once, at startup, into an `EngineConfig` that
//! the rest of the crate treats as immutable and already-correct.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::geometry::PlaneDims;

/// Command-line surface. `--config` points at a TOML file (see
/// [`FileConfig`]); any flag given here overrides the corresponding file
/// value.
#[derive(Parser, Debug, Default)]
#[command(name = "observe", about = "All-sky camera transient-event observer")]
pub struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    #[arg(long)]
    pub frame_rate: Option<f64>,

    #[arg(long)]
    pub output_root: Option<PathBuf>,

    #[arg(long)]
    pub camera_label: Option<String>,

    #[arg(long)]
    pub log_level: Option<String>,
}

/// Mirrors [`Args`] for deserializing a TOML config file. All fields are
/// optional so a file can specify a subset and let CLI flags or defaults
/// fill in the rest.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct FileConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub output_root: Option<PathBuf>,
    pub camera_label: Option<String>,
    pub log_level: Option<String>,
    pub stack_interval_secs: Option<f64>,
    pub median_sample_every_n: Option<u32>,
    pub throttle_period_mins: Option<u32>,
    pub throttle_max_events: Option<u32>,
    pub event_record_secs: Option<f64>,
    pub warm_up_secs: Option<f64>,
    pub timelapse_exposure_secs: Option<f64>,
    pub timelapse_interval_secs: Option<f64>,
    pub stack_gain: Option<i32>,
    pub trigger: TriggerFileConfig,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct TriggerFileConfig {
    pub margin_left: Option<u32>,
    pub margin_right: Option<u32>,
    pub margin_top: Option<u32>,
    pub margin_bottom: Option<u32>,
    pub min_pixels: Option<u32>,
    pub probe_radius: Option<u32>,
    pub threshold_per_frame: Option<i32>,
}

/// Parameters of the motion trigger (spec §4.3), grounded on the constants
/// in `original_source/src/videoProcess/src/settings.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerProfile {
    pub margin_left: u32,
    pub margin_right: u32,
    pub margin_top: u32,
    pub margin_bottom: u32,
    pub min_pixels: u32,
    pub probe_radius: u32,
    pub threshold_per_frame: i32,
}

impl Default for TriggerProfile {
    fn default() -> Self {
        Self {
            margin_left: 12,
            margin_right: 19,
            margin_top: 8,
            margin_bottom: 19,
            min_pixels: 30,
            probe_radius: 8,
            threshold_per_frame: 13,
        }
    }
}

impl TriggerProfile {
    /// Absolute change threshold for a stack of `stacked_frames` co-added
    /// frames: `threshold_per_frame * stacked_frames`.
    pub fn threshold(&self, stacked_frames: u32) -> i32 {
        self.threshold_per_frame * stacked_frames as i32
    }

    fn merge(self, file: &TriggerFileConfig) -> Self {
        Self {
            margin_left: file.margin_left.unwrap_or(self.margin_left),
            margin_right: file.margin_right.unwrap_or(self.margin_right),
            margin_top: file.margin_top.unwrap_or(self.margin_top),
            margin_bottom: file.margin_bottom.unwrap_or(self.margin_bottom),
            min_pixels: file.min_pixels.unwrap_or(self.min_pixels),
            probe_radius: file.probe_radius.unwrap_or(self.probe_radius),
            threshold_per_frame: file.threshold_per_frame.unwrap_or(self.threshold_per_frame),
        }
    }
}

/// Timelapse cadence (spec §4.5), grounded on `TIMELAPSE_EXPOSURE`/
/// `TIMELAPSE_INTERVAL` in `settings.h`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelapseProfile {
    pub exposure_secs: f64,
    pub interval_secs: f64,
}

impl Default for TimelapseProfile {
    fn default() -> Self {
        Self { exposure_secs: 28.0, interval_secs: 30.0 }
    }
}

/// Fully validated, immutable engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub plane: PlaneDims,
    pub frame_rate: f64,
    pub stack_interval_secs: f64,
    pub trigger: TriggerProfile,
    pub median_sample_every_n: u32,
    pub throttle_period_mins: u32,
    pub throttle_max_events: u32,
    pub event_record_secs: f64,
    pub warm_up_secs: f64,
    pub timelapse: TimelapseProfile,
    /// Multiplier applied to background-subtracted artifacts, grounded on
    /// `original_source/src/videoProcess/src/settings.h`'s `STACK_GAIN`.
    pub stack_gain: i32,
    pub output_root: PathBuf,
    pub camera_label: String,
    pub log_level: String,
}

impl EngineConfig {
    /// Number of frames accumulated into one short stack.
    pub fn frames_per_stack(&self) -> u32 {
        (self.frame_rate * self.stack_interval_secs).round() as u32
    }

    /// Number of short stacks accumulated into one recorded event.
    pub fn stacks_per_event(&self) -> u32 {
        (self.event_record_secs / self.stack_interval_secs).round() as u32
    }

    /// Number of short stacks in one timelapse exposure / interval.
    pub fn stacks_per_timelapse_exposure(&self) -> u32 {
        (self.timelapse.exposure_secs / self.stack_interval_secs).round() as u32
    }

    pub fn stacks_per_timelapse_interval(&self) -> u32 {
        (self.timelapse.interval_secs / self.stack_interval_secs).round() as u32
    }

    pub fn warm_up_stacks(&self) -> u32 {
        (self.warm_up_secs / self.stack_interval_secs).round() as u32
    }
}

/// Builds a validated [`EngineConfig`] from CLI args and an optional parsed
/// TOML file, CLI taking precedence. `width`/`height`/`frame_rate` have no
/// built-in default: one of CLI or file must supply them.
pub fn build_config(args: &Args, file: Option<&FileConfig>) -> Result<EngineConfig, ConfigError> {
    let empty = FileConfig::default();
    let file = file.unwrap_or(&empty);

    let width = args.width.or(file.width).unwrap_or(0);
    let height = args.height.or(file.height).unwrap_or(0);
    let plane = PlaneDims::new(width, height)?;

    let frame_rate = args.frame_rate.or(file.frame_rate).unwrap_or(0.0);
    if frame_rate <= 0.0 {
        return Err(ConfigError::InvalidFrameRate(frame_rate));
    }

    let stack_interval_secs = file.stack_interval_secs.unwrap_or(1.0);
    let trigger = TriggerProfile::default().merge(&file.trigger);
    let median_sample_every_n = file.median_sample_every_n.unwrap_or(8);
    if median_sample_every_n == 0 {
        return Err(ConfigError::InvalidMedianSampleEveryN(median_sample_every_n));
    }
    let throttle_period_mins = file.throttle_period_mins.unwrap_or(10);
    let throttle_max_events = file.throttle_max_events.unwrap_or(5);
    if throttle_max_events == 0 {
        return Err(ConfigError::InvalidThrottleMaxEvents(throttle_max_events));
    }
    let event_record_secs = file.event_record_secs.unwrap_or(20.0);
    if (event_record_secs / stack_interval_secs).fract().abs() > 1e-6 {
        return Err(ConfigError::RecordLengthNotMultiple {
            record_secs: event_record_secs,
            stack_secs: stack_interval_secs,
        });
    }
    // Grounded on `observe.c`'s `framesSinceLastTrigger_INITIAL =
    // -260 * medianMapUseEveryNthStack`: the camera runs for 260 full median
    // histogram cycles' worth of sampling cadence before the trigger (and the
    // one-shot rewind) is allowed to fire.
    let warm_up_secs = file
        .warm_up_secs
        .unwrap_or(260.0 * median_sample_every_n as f64 * stack_interval_secs);

    let timelapse = TimelapseProfile {
        exposure_secs: file.timelapse_exposure_secs.unwrap_or(28.0),
        interval_secs: file.timelapse_interval_secs.unwrap_or(30.0),
    };
    if (timelapse.exposure_secs / stack_interval_secs).fract().abs() > 1e-6 {
        return Err(ConfigError::TimelapseExposureNotMultiple {
            exposure_secs: timelapse.exposure_secs,
            stack_secs: stack_interval_secs,
        });
    }
    if (timelapse.interval_secs / stack_interval_secs).fract().abs() > 1e-6 {
        return Err(ConfigError::TimelapseIntervalNotMultiple {
            interval_secs: timelapse.interval_secs,
            stack_secs: stack_interval_secs,
        });
    }

    let stack_gain = file.stack_gain.unwrap_or(6);

    let output_root = args
        .output_root
        .clone()
        .or_else(|| file.output_root.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let camera_label = args
        .camera_label
        .clone()
        .or_else(|| file.camera_label.clone())
        .unwrap_or_else(|| "allsky".to_string());
    let log_level = args
        .log_level
        .clone()
        .or_else(|| file.log_level.clone())
        .unwrap_or_else(|| "info".to_string());

    Ok(EngineConfig {
        plane,
        frame_rate,
        stack_interval_secs,
        trigger,
        median_sample_every_n,
        throttle_period_mins,
        throttle_max_events,
        event_record_secs,
        warm_up_secs,
        timelapse,
        stack_gain,
        output_root,
        camera_label,
        log_level,
    })
}

/// Reads and parses a TOML config file from disk.
pub fn read_file_config(path: &Path) -> Result<FileConfig, crate::error::ObserveError> {
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text)
        .map_err(|e| crate::error::ObserveError::Config(ConfigError::ParseFailure(e.to_string())))
}
