//! Jitter sequence helpers
//!
//! Callers offset their projection by [`jitter_offset`] before rendering each
//! low-resolution frame. Both functions are pure.

use crate::error::{NssError, Result};

/// Number of jitter phases needed for an upscale factor
///
/// Computed as `floor(8 * (display / render)^2)`. A zero render width yields a
/// non-finite ratio and saturates.
pub fn jitter_phase_count(render_width: u32, display_width: u32) -> i32 {
    const BASE_PHASE_COUNT: f32 = 8.0;
    let ratio = display_width as f32 / render_width as f32;
    (BASE_PHASE_COUNT * ratio * ratio) as i32
}

/// Radical inverse of `index` in `base`
pub fn halton(mut index: i32, base: i32) -> f32 {
    let mut f = 1.0f32;
    let mut result = 0.0f32;
    while index > 0 {
        f /= base as f32;
        result += f * (index % base) as f32;
        index /= base;
    }
    result
}

/// Sub-pixel offset for frame `index`, each axis in `[-0.5, 0.5)`
///
/// The sequence repeats every `phase_count` frames.
pub fn jitter_offset(index: i32, phase_count: i32) -> Result<(f32, f32)> {
    if phase_count <= 0 {
        return Err(NssError::InvalidArgument("jitter phase count must be positive"));
    }
    let i = index.rem_euclid(phase_count) + 1;
    Ok((halton(i, 2) - 0.5, halton(i, 3) - 0.5))
}

/// Writes the offset for frame `index` into the provided slots
///
/// Both slots must be present. Nothing is written on error.
///
/// # Arguments
/// * `out_x` - Horizontal offset slot
/// * `out_y` - Vertical offset slot
/// * `index` - Frame index
/// * `phase_count` - Sequence length from [`jitter_phase_count`]
pub fn jitter_offset_into(out_x: Option<&mut f32>, out_y: Option<&mut f32>, index: i32, phase_count: i32) -> Result<()> {
    let (Some(out_x), Some(out_y)) = (out_x, out_y) else {
        return Err(NssError::InvalidPointer);
    };
    let (x, y) = jitter_offset(index, phase_count)?;
    *out_x = x;
    *out_y = y;
    Ok(())
}
