use thiserror::Error;

/// Errors surfaced while running the observation engine.
///
/// Mirrors the taxonomy in the design spec: end-of-stream and per-frame
/// decode errors are expected and recoverable; allocation and configuration
/// failures are fatal at the point they're detected.
#[derive(Error, Debug)]
pub enum ObserveError {
    /// The frame provider has no more frames. Expected at any tick; callers
    /// should exit cleanly after discarding any in-progress event.
    #[error("frame provider reached end of stream")]
    EndOfStream,

    /// A single frame failed to decode. The affected frame is skipped and
    /// the stack interval is otherwise treated as normal.
    #[error("transient decode error on frame: {0}")]
    DecodeTransient(String),

    /// Buffer allocation failed. Fatal; the process should abort.
    #[error("allocation failure for buffer `{buffer}`")]
    Allocation {
        /// Name of the buffer that could not be allocated.
        buffer: &'static str,
    },

    /// A configuration value is internally inconsistent. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error not otherwise classified above: covers both a config file
    /// that fails to read and an artefact that fails to write (spec §7's
    /// "artefact write failure" taxonomy entry) — [`crate::artifact::FileSink`]
    /// surfaces its write failures through this variant via `?`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration inconsistencies detected at startup, before the engine runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("plane dimensions invalid: width={width}, height={height}")]
    InvalidPlane { width: u32, height: u32 },

    #[error("frame rate must be positive, found {0}")]
    InvalidFrameRate(f64),

    #[error(
        "timelapse exposure length ({exposure_secs}s) is not a whole multiple of the stack \
         interval ({stack_secs}s)"
    )]
    TimelapseExposureNotMultiple { exposure_secs: f64, stack_secs: f64 },

    #[error(
        "timelapse interval ({interval_secs}s) is not a whole multiple of the stack interval \
         ({stack_secs}s)"
    )]
    TimelapseIntervalNotMultiple { interval_secs: f64, stack_secs: f64 },

    #[error(
        "event recording length ({record_secs}s) is not a whole multiple of the stack interval \
         ({stack_secs}s)"
    )]
    RecordLengthNotMultiple { record_secs: f64, stack_secs: f64 },

    #[error("median sample-every-n must be at least 1, found {0}")]
    InvalidMedianSampleEveryN(u32),

    #[error("throttle max events must be at least 1, found {0}")]
    InvalidThrottleMaxEvents(u32),

    #[error("failed to parse config file: {0}")]
    ParseFailure(String),
}
