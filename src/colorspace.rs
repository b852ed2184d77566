//! YUV420 → RGB colour conversion.
//!
//! Out of the engine's core scope (spec §1): the conversion tables and the
//! per-pixel formula are a pure, external collaborator. It is implemented
//! here only because the engine needs *something* to turn provider frames
//! into the RGB planes every other component operates on; nothing downstream
//! depends on the particular coefficients used.
//!
//! Design note §9: the lookup tables are process-wide in the original C.
//! Here they're an immutable, owned table built once
//! (`ColorTables::new`) and passed by reference into the conversion
//! function, rather than relying on a mutable global.

use crate::geometry::{clip256, PlaneDims, RgbPlanes};

/// Precomputed YUV→RGB contribution tables (BT.601 full-range coefficients).
///
/// `y_table[v]` is simply `v` scaled for the luma contribution; `u`/`v` tables
/// hold the chroma contributions for each of the three output channels,
/// indexed by the raw 8-bit U/V sample. Building these once avoids
/// recomputing the same floating point multiplications for every pixel.
pub struct ColorTables {
    r_v: [i32; 256],
    g_u: [i32; 256],
    g_v: [i32; 256],
    b_u: [i32; 256],
}

impl ColorTables {
    pub fn new() -> Self {
        let mut r_v = [0i32; 256];
        let mut g_u = [0i32; 256];
        let mut g_v = [0i32; 256];
        let mut b_u = [0i32; 256];
        for i in 0..256 {
            let c = i as f32 - 128.0;
            r_v[i] = (1.402 * c) as i32;
            g_u[i] = (-0.344136 * c) as i32;
            g_v[i] = (-0.714136 * c) as i32;
            b_u[i] = (1.772 * c) as i32;
        }
        Self { r_v, g_u, g_v, b_u }
    }
}

impl Default for ColorTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts one planar YUV420 frame (`Y` plane of `w*h` bytes, followed by
/// `U` and `V` planes of `w/2*h/2` bytes each) into three 8-bit R/G/B planes.
///
/// `dst` is reused across calls by the caller to avoid a per-frame
/// allocation; its planes are fully overwritten.
pub fn yuv420_to_rgb(yuv: &[u8], dims: PlaneDims, tables: &ColorTables, dst: &mut RgbPlanes) {
    let w = dims.width() as usize;
    let h = dims.height() as usize;
    let y_plane = &yuv[0..w * h];
    let u_plane = &yuv[w * h..w * h + (w / 2) * (h / 2)];
    let v_plane = &yuv[w * h + (w / 2) * (h / 2)..];

    for row in 0..h {
        let uv_row = row / 2;
        for col in 0..w {
            let uv_col = col / 2;
            let idx = row * w + col;
            let y = y_plane[idx] as i32;
            let u = u_plane[uv_row * (w / 2) + uv_col] as usize;
            let v = v_plane[uv_row * (w / 2) + uv_col] as usize;

            dst.r[idx] = clip256((y + tables.r_v[v]) as i64);
            dst.g[idx] = clip256((y + tables.g_u[u] + tables.g_v[v]) as i64);
            dst.b[idx] = clip256((y + tables.b_u[u]) as i64);
        }
    }
}

/// Byte length of one YUV420 frame for the given plane dimensions.
pub fn yuv420_frame_len(dims: PlaneDims) -> usize {
    dims.pixel_count() * 3 / 2
}
