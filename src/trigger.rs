//! Differential motion trigger (spec §4.3).
//!
//! Compares this interval's short stack against the *previous* interval's
//! short stack (not the long-term median background — that belongs to
//! [`crate::median`] and feeds artefact subtraction, not triggering).
//! Candidate pixels inside a margin box are probed against a 3x3
//! neighbourhood spaced by `probe_radius`, twice: once against the previous
//! stack (guards against a noisy "previous" pixel), once against the
//! current stack itself (demands the pixel is bright relative to its own
//! neighbourhood). Survivors are unioned into connected components; a
//! component exceeding `min_pixels` (strictly more, not "at least") fires
//! the trigger.
//!
//! Grounded on `original_source/src/videoProcess/src/analyse/observe.c`'s
//! scan. Connected-component labeling is a general disjoint-set union,
//! substituted per the spec's Design Notes §9 in place of the original's
//! two-row equivalence-table rewrite; the observable emit (which pixels end
//! up painted into a fired component) is unchanged.

use crate::config::TriggerProfile;
use crate::geometry::{clip256, PlaneDims, RgbPlanes, SumPlanes};
use crate::stacker::stack_mean;

/// Offsets of the nine probe points around a candidate pixel, in multiples
/// of `probe_radius`.
const PROBE_OFFSETS: [(i64, i64); 9] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (0, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Outcome of one stack interval's motion trigger evaluation.
pub struct MotionResult {
    /// Whether any connected component reached `min_pixels`.
    pub triggered: bool,
    /// Diagnostic image: R = clipped signed difference (current − previous),
    /// G = clipped current brightness, B = 255 where a pixel belongs to a
    /// component that fired.
    pub diagnostic: RgbPlanes,
}

/// Disjoint-set union over pixel indices, with path compression and union by
/// size.
struct Dsu {
    parent: Vec<u32>,
    size: Vec<u32>,
}

impl Dsu {
    fn new(n: usize) -> Self {
        Self { parent: (0..n as u32).collect(), size: vec![1; n] }
    }

    fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut cur = x;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra as usize] >= self.size[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small as usize] = big;
        self.size[big as usize] += self.size[small as usize];
    }
}

/// Evaluates the motion trigger for one completed short stack against the
/// previous one. Both carry the same `frames_per_stack` coverage `n`.
/// Detection runs on the red channel only, per spec §4.3.
pub fn detect_motion(
    previous: &SumPlanes,
    current: &SumPlanes,
    frames_per_stack: u32,
    dims: PlaneDims,
    profile: &TriggerProfile,
) -> MotionResult {
    let w = dims.width() as i64;
    let h = dims.height() as i64;
    let threshold = profile.threshold(frames_per_stack);
    let radius = profile.probe_radius as i64;

    let x0 = profile.margin_left as i64;
    let x1 = w - profile.margin_right as i64;
    let y0 = profile.margin_top as i64;
    let y1 = h - profile.margin_bottom as i64;

    let mut diagnostic = RgbPlanes::zeroed(dims);
    let mut passed = vec![false; dims.pixel_count()];
    let mut dsu = Dsu::new(dims.pixel_count());

    let current_at = |x: i64, y: i64| -> i32 { current.r[dims.offset(x as u32, y as u32)] };
    let previous_at = |x: i64, y: i64| -> i32 { previous.r[dims.offset(x as u32, y as u32)] };

    if x0 < x1 && y0 < y1 {
        for y in y0..y1 {
            for x in x0..x1 {
                let idx = dims.offset(x as u32, y as u32);
                let delta = current_at(x, y) - previous_at(x, y);
                diagnostic.r[idx] = clip256(delta as i64);
                diagnostic.g[idx] = stack_mean(current.r[idx], frames_per_stack as i32);

                if delta <= threshold {
                    continue;
                }

                let against_previous = probe_count(
                    |px, py| current_at(x, y) - previous_at(px, py),
                    dims,
                    x,
                    y,
                    radius,
                    threshold,
                );
                let against_current = probe_count(
                    |px, py| current_at(x, y) - current_at(px, py),
                    dims,
                    x,
                    y,
                    radius,
                    threshold,
                );

                let (against_previous, against_current) = match (against_previous, against_current) {
                    (Some(p), Some(c)) => (p, c),
                    _ => continue, // a probe point fell outside the image: reject
                };

                if against_previous < 8 || against_current < 7 {
                    continue;
                }

                passed[idx] = true;

                let neighbours = [(x - 1, y - 1), (x, y - 1), (x + 1, y - 1), (x - 1, y)];
                for (nx, ny) in neighbours {
                    if nx >= x0 && nx < x1 && ny >= y0 && ny < y1 {
                        let nidx = dims.offset(nx as u32, ny as u32);
                        if passed[nidx] {
                            dsu.union(idx as u32, nidx as u32);
                        }
                    }
                }
            }
        }
    }

    let mut triggered = false;
    for y in y0..y1 {
        for x in x0..x1 {
            let idx = dims.offset(x as u32, y as u32);
            if !passed[idx] {
                continue;
            }
            let root = dsu.find(idx as u32);
            // Strictly more than `min_pixels`, not "at least": grounded on
            // `observe.c`'s `if (triggerBlock[blockId] > Npixels)`.
            if dsu.size[root as usize] > profile.min_pixels {
                diagnostic.b[idx] = 255;
                triggered = true;
            }
        }
    }

    MotionResult { triggered, diagnostic }
}

/// Counts how many of the nine probe points around `(cx, cy)` satisfy
/// `diff(probe_x, probe_y) > threshold`. Returns `None` if any probe point
/// falls outside the frame (the whole candidate is then rejected).
fn probe_count(
    diff: impl Fn(i64, i64) -> i32,
    dims: PlaneDims,
    cx: i64,
    cy: i64,
    radius: i64,
    threshold: i32,
) -> Option<u32> {
    let mut count = 0u32;
    for (dx, dy) in PROBE_OFFSETS {
        let x = cx + dx * radius;
        let y = cy + dy * radius;
        if !dims.contains(x, y) {
            return None;
        }
        if diff(x, y) > threshold {
            count += 1;
        }
    }
    Some(count)
}
