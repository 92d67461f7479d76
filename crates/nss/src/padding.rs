//! Resolution padding
//!
//! The inference graph needs its input extent aligned to [`RESOURCE_ALIGNMENT`].
//! When the render size is not aligned, inputs are mirror-padded up to the next
//! multiple and the output grows by the same upscale factor.

use crate::Dimensions2D;

/// Alignment required by the inference pipeline, in pixels
pub const RESOURCE_ALIGNMENT: u32 = 8;

/// Rounds `value` up to a multiple of `alignment`
pub fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Padded input/output extents derived from the unpadded sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddedResolution {
    pub input: Dimensions2D,
    pub output: Dimensions2D,
    /// True if any dimension differs from its unpadded value
    pub changed: bool,
}

impl PaddedResolution {
    /// Computes padded extents for a render and upscale size
    ///
    /// Each axis of the input is aligned independently. The output is the padded
    /// input scaled by that axis' upscale factor, truncated, then aligned.
    ///
    /// # Arguments
    /// * `render` - Unpadded render (input) size, non-zero
    /// * `upscale` - Unpadded upscale (output) size
    pub fn compute(render: Dimensions2D, upscale: Dimensions2D) -> Self {
        let input = Dimensions2D::new(align_up(render.width, RESOURCE_ALIGNMENT), align_up(render.height, RESOURCE_ALIGNMENT));

        let factor_x = upscale.width as f32 / render.width as f32;
        let factor_y = upscale.height as f32 / render.height as f32;
        let output = Dimensions2D::new(
            align_up((input.width as f32 * factor_x) as u32, RESOURCE_ALIGNMENT),
            align_up((input.height as f32 * factor_y) as u32, RESOURCE_ALIGNMENT),
        );

        Self {
            input,
            output,
            changed: input != render || output != upscale,
        }
    }

    /// Horizontal ratio between padded output and padded input
    pub fn upscale_ratio(&self) -> f32 {
        self.output.width as f32 / self.input.width as f32
    }

    /// True if both padded input dimensions meet the alignment
    pub fn is_aligned(&self) -> bool {
        self.input.width % RESOURCE_ALIGNMENT == 0 && self.input.height % RESOURCE_ALIGNMENT == 0
    }
}
