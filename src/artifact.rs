//! Artifact output (spec §6): the small set of "push bytes somewhere"
//! operations the rest of the engine depends on, abstracted behind a trait so
//! tests never touch a filesystem. `FileSink` is the real implementation;
//! `InMemorySink` is the test double.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ObserveError;
use crate::geometry::{PlaneDims, RgbPlanes, SumPlanes};
use crate::timelapse::{gained_frame, mean_frame, subtract_background};

/// Where the engine's artifacts go: event flushes, timelapse frames, and
/// diagnostic dumps.
pub trait ArtifactSink: Send {
    /// Writes one RGB image to `path`, creating parent directories as needed.
    fn dump_frame_rgb(&mut self, path: &Path, dims: PlaneDims, image: &RgbPlanes) -> Result<(), ObserveError>;

    /// Writes a run of raw YUV420 frames (an event's recorded video) to `path`,
    /// preceded by the 3-int `(total_size, width, height)` header spec §6
    /// requires for `.vid` artifacts.
    fn dump_video(&mut self, path: &Path, dims: PlaneDims, raw_frames: &[u8]) -> Result<(), ObserveError>;
}

/// Normalizes a summed stack to a mean frame and writes it.
pub fn dump_frame_rgb_from_sums(
    sink: &mut dyn ArtifactSink,
    path: &Path,
    dims: PlaneDims,
    stack: &SumPlanes,
    n: u32,
) -> Result<(), ObserveError> {
    let image = mean_frame(stack, n, dims);
    sink.dump_frame_rgb(path, dims, &image)
}

/// Renders a gained, background-subtracted difference image and writes it.
#[allow(clippy::too_many_arguments)]
pub fn dump_frame_rgb_from_isub(
    sink: &mut dyn ArtifactSink,
    path: &Path,
    dims: PlaneDims,
    stack: &SumPlanes,
    n: u32,
    background: &RgbPlanes,
    gain: i32,
    offset: i32,
) -> Result<(), ObserveError> {
    let image = subtract_background(stack, n, background, gain, offset, dims);
    sink.dump_frame_rgb(path, dims, &image)
}

/// Renders a gained, non-subtracted mean frame and writes it.
pub fn dump_frame_rgb_from_ints(
    sink: &mut dyn ArtifactSink,
    path: &Path,
    dims: PlaneDims,
    stack: &SumPlanes,
    n: u32,
    gain: i32,
) -> Result<(), ObserveError> {
    let image = gained_frame(stack, n, gain, dims);
    sink.dump_frame_rgb(path, dims, &image)
}

/// Writes images as raw concatenated R,G,B planes (no header) and video as a
/// 3-int `(total_size, width, height)` header followed by raw YUV420 frames —
/// no external codec dependency, matching the spec's Non-goal of video
/// encoding.
pub struct FileSink;

impl FileSink {
    pub fn new() -> Self {
        Self
    }

    fn ensure_parent(path: &Path) -> Result<(), ObserveError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Default for FileSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactSink for FileSink {
    fn dump_frame_rgb(&mut self, path: &Path, _dims: PlaneDims, image: &RgbPlanes) -> Result<(), ObserveError> {
        Self::ensure_parent(path)?;
        let mut file = fs::File::create(path)?;
        file.write_all(&image.r)?;
        file.write_all(&image.g)?;
        file.write_all(&image.b)?;
        Ok(())
    }

    fn dump_video(&mut self, path: &Path, dims: PlaneDims, raw_frames: &[u8]) -> Result<(), ObserveError> {
        Self::ensure_parent(path)?;
        let mut file = fs::File::create(path)?;
        file.write_all(&vid_header(dims, raw_frames.len()))?;
        file.write_all(raw_frames)?;
        Ok(())
    }
}

/// Builds the 3-int little-endian `(total_size, width, height)` header spec
/// §6 mandates at the front of every `.vid` file.
fn vid_header(dims: PlaneDims, total_size: usize) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0..4].copy_from_slice(&(total_size as i32).to_le_bytes());
    header[4..8].copy_from_slice(&(dims.width() as i32).to_le_bytes());
    header[8..12].copy_from_slice(&(dims.height() as i32).to_le_bytes());
    header
}

/// In-memory test double: records every write instead of touching disk.
#[derive(Default)]
pub struct InMemorySink {
    pub images: Vec<(PathBuf, RgbPlanes)>,
    pub videos: Vec<(PathBuf, Vec<u8>)>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactSink for InMemorySink {
    fn dump_frame_rgb(&mut self, path: &Path, _dims: PlaneDims, image: &RgbPlanes) -> Result<(), ObserveError> {
        self.images.push((path.to_path_buf(), image.clone()));
        Ok(())
    }

    fn dump_video(&mut self, path: &Path, dims: PlaneDims, raw_frames: &[u8]) -> Result<(), ObserveError> {
        let mut bytes = vid_header(dims, raw_frames.len()).to_vec();
        bytes.extend_from_slice(raw_frames);
        self.videos.push((path.to_path_buf(), bytes));
        Ok(())
    }
}
