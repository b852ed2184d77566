//! Artifact path generation (spec §4.6).
//!
//! Builds `<root>/<category>_<camera_label>/<YYYYMMDD>/<YYYYMMDDHHMMSS>_<tag>.<ext>`
//! paths from a UTC timestamp, mirroring the directory-per-day layout
//! `original_source`'s `JulianDate.c`/filename helpers build for recorded
//! events and timelapse frames.
//!
//! Open Question (spec §9): `JulianDate.c` switches from the Julian to the
//! Gregorian calendar at the historical 1582 cutover, which has no bearing
//! on any camera deployment. This implementation uses `chrono`'s proleptic
//! Gregorian calendar unconditionally — the deviation only matters for dates
//! before 1582, which this system will never observe.
//!
//! The day directory groups by "observing night" rather than calendar date:
//! the UTC timestamp is shifted back by half a day before formatting, so a
//! night that runs from evening to early morning UTC lands in a single
//! directory instead of splitting at midnight.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

fn day_dir(utc: DateTime<Utc>) -> String {
    (utc - Duration::hours(12)).format("%Y%m%d").to_string()
}

fn timestamp(utc: DateTime<Utc>) -> String {
    utc.format("%Y%m%d%H%M%S").to_string()
}

/// Builds the path for one artifact file.
///
/// `category` names the kind of output (e.g. `"events"`, `"timelapse"`),
/// `tag` disambiguates multiple files from the same moment (e.g. `"BS0"`,
/// `"MAX"`, `"MAP"`). An empty `tag` drops the infix entirely, for the bare
/// `.vid` video suffix spec §6 specifies with no tag token before it.
pub fn artifact_path(
    root: &Path,
    camera_label: &str,
    category: &str,
    utc: DateTime<Utc>,
    tag: &str,
    ext: &str,
) -> PathBuf {
    let leaf = if tag.is_empty() {
        format!("{}.{ext}", timestamp(utc))
    } else {
        format!("{}_{tag}.{ext}", timestamp(utc))
    };
    root.join(format!("{category}_{camera_label}"))
        .join(day_dir(utc))
        .join(leaf)
}
