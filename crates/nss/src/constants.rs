//! Per-frame constant block
//!
//! The block has a common part and a precision-dependent part. The precision
//! layout (32-bit floats or 16-bit packed pairs) is chosen once when the
//! context is created and never switches afterwards.

use bytemuck::{Pod, Zeroable};
use bytes::Bytes;
use half::f16;

use crate::Dimensions2D;
use crate::dispatch::DispatchDescription;
use crate::padding::PaddedResolution;
use crate::types::ContextFlags;

/// Quantization parameters between float and snorm; .xy quantize, .zw dequantize
pub const QUANT_PARAMS_SNORM: [f32; 4] = [(1.0 / 0.49803924513980746) as f32, -1.0078740157480315, 0.49999999813735485, -1.0];
/// Quantization parameters between float and sint; .xy quantize, .zw dequantize
pub const QUANT_PARAMS_SINT: [f32; 4] = [(1.0 / 0.003921568859368563) as f32, -128.0, 0.003937007859349251, -127.0];
/// Squared pixel motion below which motion is ignored
pub const MOTION_VECTOR_THRESHOLD: f32 = 0.01;
/// Squared pixel motion above which disocclusion is taken at full strength
pub const MOTION_DISOCCLUSION_THRESHOLD: f32 = 0.25;
/// Disocclusion mask scale on near-static pixels; learned with the network
pub const DISOCCLUSION_SCALE: f32 = 0.725223958492279;
/// Kernel tile size of the fixed-ratio path
pub const INDEX_MODULO: [u32; 2] = [2, 2];

/// Arithmetic precision used by the shaders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    Full,
    Half,
}

impl Precision {
    /// Half precision only when it is both allowed and supported
    pub fn resolve(allow_16bit: bool, fp16_supported: bool) -> Self {
        if allow_16bit && fp16_supported { Precision::Half } else { Precision::Full }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Precision::Full => "32-bit",
            Precision::Half => "16-bit",
        }
    }
}

/// Fields shared by both precision layouts
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct CommonConstants {
    pub device_to_view_depth: [f32; 4],
    /// .xy pixels, .zw uv
    pub jitter_offset: [f32; 4],
    /// Previous frame's jitter; .xy pixels, .zw uv
    pub jitter_offset_tm1: [f32; 4],
    /// .xy output/input, .zw input/output
    pub scale_factor: [f32; 4],
    pub output_dims: [u32; 2],
    pub input_dims: [u32; 2],
    pub inv_output_dims: [f32; 2],
    pub inv_input_dims: [f32; 2],
    pub motion_vector_scale: [f32; 2],
    pub unpadded_input_dims: [u32; 2],
}

/// Precision-dependent fields as 32-bit values
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct FullPrecisionConstants {
    pub quant_params_snorm: [f32; 4],
    pub quant_params_sint: [f32; 4],
    /// .x motion threshold, .y disocclusion threshold, .z disocclusion scale
    pub motion_dis_thresh_pad: [f32; 4],
    /// .x exposure, .y inverse exposure
    pub exposure: [f32; 2],
    pub index_modulo: [u32; 2],
    pub lut_offset: [u32; 2],
    pub not_history_reset: f32,
}

/// The same fields packed as pairs of 16-bit values, low half first
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct HalfPrecisionConstants {
    pub quant_params_snorm: [u32; 2],
    pub quant_params_sint: [u32; 2],
    pub motion_dis_thresh_pad: [u32; 2],
    pub exposure: u32,
    pub index_modulo: u32,
    pub lut_offset: u32,
    pub not_history_reset: u32,
}

/// The precision layout in use
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrecisionConstants {
    Full(FullPrecisionConstants),
    Half(HalfPrecisionConstants),
}

/// Size of the staged block; the 16-bit layout is zero-extended to it
pub const CONSTANT_BLOCK_SIZE: usize = size_of::<CommonConstants>() + size_of::<FullPrecisionConstants>();
/// Root-constant size in 32-bit words
pub const CONSTANT_BLOCK_WORDS: u32 = (CONSTANT_BLOCK_SIZE / size_of::<u32>()) as u32;

/// Packs two floats as half floats, `a` in the low 16 bits
///
/// Values below the smallest normal half float flush to signed zero.
pub fn pack_half2(a: f32, b: f32) -> u32 {
    (u32::from(to_half(b).to_bits()) << 16) | u32::from(to_half(a).to_bits())
}

fn to_half(value: f32) -> f16 {
    if value.abs() >= f32::from(f16::MIN_POSITIVE) || value.is_nan() {
        f16::from_f32(value)
    } else if value.is_sign_negative() {
        f16::NEG_ZERO
    } else {
        f16::ZERO
    }
}

/// Packs two values truncated to 16 bits, `a` in the low 16 bits
pub fn pack_u16x2(a: u32, b: u32) -> u32 {
    ((b & 0xffff) << 16) | (a & 0xffff)
}

/// Depth-to-view-space transform coefficients
///
/// Near and far may be passed in either order; the depth flags decide which
/// projection form is assumed.
pub fn device_to_view_depth(near: f32, far: f32, fov_vertical: f32, padded_input: Dimensions2D, flags: ContextFlags) -> [f32; 4] {
    let inverted = flags.contains(ContextFlags::DEPTH_INVERTED);
    let infinite = flags.contains(ContextFlags::DEPTH_INFINITE);

    let (mut min, mut max) = (near.min(far), near.max(far));
    if inverted {
        std::mem::swap(&mut min, &mut max);
    }

    let q = max / (min - max);
    // [inverted][infinite]
    let c = [[q, -1.0 - f32::EPSILON], [q, f32::EPSILON]];
    let e = [[q * min, -min - f32::EPSILON], [q * min, max]];
    let (i, j) = (usize::from(inverted), usize::from(infinite));

    let aspect = padded_input.width as f32 / padded_input.height as f32;
    let cot_half_fov = (0.5 * fov_vertical).cos() / (0.5 * fov_vertical).sin();
    let a = cot_half_fov / aspect;
    let b = cot_half_fov;

    [-c[i][j], e[i][j], 1.0 / a, 1.0 / b]
}

/// Offset of the jittered sample inside the fixed-ratio kernel tile
///
/// # Arguments
/// * `jitter` - Jitter in padded input pixels
/// * `scale` - Output/input scale per axis
/// * `modulo` - Tile size per axis
pub fn jitter_tile_offset(jitter: [f32; 2], scale: [f32; 2], modulo: [u32; 2]) -> [u32; 2] {
    let axis = |j: f32, s: f32, m: u32| {
        let base = (0.5 * s).floor() as i32;
        let jittered = ((j + 0.5) * s).floor() as i32;
        (jittered - base).rem_euclid(m as i32) as u32
    };
    [axis(jitter[0], scale[0], modulo[0]), axis(jitter[1], scale[1], modulo[1])]
}

/// Values written to the precision-dependent part each frame
struct PrecisionValues {
    exposure: f32,
    inv_exposure: f32,
    lut_offset: [u32; 2],
    not_history_reset: f32,
}

impl FullPrecisionConstants {
    fn from_values(values: &PrecisionValues) -> Self {
        Self {
            quant_params_snorm: QUANT_PARAMS_SNORM,
            quant_params_sint: QUANT_PARAMS_SINT,
            motion_dis_thresh_pad: [MOTION_VECTOR_THRESHOLD, MOTION_DISOCCLUSION_THRESHOLD, DISOCCLUSION_SCALE, 0.0],
            exposure: [values.exposure, values.inv_exposure],
            index_modulo: INDEX_MODULO,
            lut_offset: values.lut_offset,
            not_history_reset: values.not_history_reset,
        }
    }
}

impl HalfPrecisionConstants {
    fn from_values(values: &PrecisionValues) -> Self {
        Self {
            quant_params_snorm: [
                pack_half2(QUANT_PARAMS_SNORM[0], QUANT_PARAMS_SNORM[1]),
                pack_half2(QUANT_PARAMS_SNORM[2], QUANT_PARAMS_SNORM[3]),
            ],
            quant_params_sint: [
                pack_half2(QUANT_PARAMS_SINT[0], QUANT_PARAMS_SINT[1]),
                pack_half2(QUANT_PARAMS_SINT[2], QUANT_PARAMS_SINT[3]),
            ],
            motion_dis_thresh_pad: [
                pack_half2(MOTION_VECTOR_THRESHOLD, MOTION_DISOCCLUSION_THRESHOLD),
                pack_half2(DISOCCLUSION_SCALE, 0.0),
            ],
            exposure: pack_half2(values.exposure, values.inv_exposure),
            index_modulo: pack_u16x2(INDEX_MODULO[0], INDEX_MODULO[1]),
            lut_offset: pack_u16x2(values.lut_offset[0], values.lut_offset[1]),
            not_history_reset: pack_half2(values.not_history_reset, 0.0),
        }
    }
}

/// Host copy of the constants staged for every pass of a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantBlock {
    pub common: CommonConstants,
    pub precision: PrecisionConstants,
}

impl ConstantBlock {
    /// A zeroed block using the given layout
    pub fn new(precision: Precision) -> Self {
        Self {
            common: CommonConstants::zeroed(),
            precision: match precision {
                Precision::Full => PrecisionConstants::Full(FullPrecisionConstants::zeroed()),
                Precision::Half => PrecisionConstants::Half(HalfPrecisionConstants::zeroed()),
            },
        }
    }

    pub fn precision(&self) -> Precision {
        match self.precision {
            PrecisionConstants::Full(_) => Precision::Full,
            PrecisionConstants::Half(_) => Precision::Half,
        }
    }

    /// Zeroes every field, keeping the layout
    pub fn reset(&mut self) {
        *self = Self::new(self.precision());
    }

    /// Repopulates the block for one dispatch
    ///
    /// On a history reset the block is zeroed first, so the previous jitter
    /// reads as zero on the first frame after a reset.
    pub fn update(&mut self, params: &DispatchDescription, padded: &PaddedResolution, flags: ContextFlags, reset_history: bool) {
        if reset_history {
            self.reset();
        }

        let input = padded.input;
        let output = padded.output;
        let render = params.render_size;
        let common = &mut self.common;

        common.device_to_view_depth = device_to_view_depth(params.camera_near, params.camera_far, params.camera_fov_angle_vertical, input, flags);

        common.input_dims = [input.width, input.height];
        common.inv_input_dims = [1.0 / input.width as f32, 1.0 / input.height as f32];
        common.output_dims = [output.width, output.height];
        common.inv_output_dims = [1.0 / output.width as f32, 1.0 / output.height as f32];
        common.unpadded_input_dims = [render.width, render.height];

        // Caller jitter is in unpadded render pixels
        let jitter_uv = [params.jitter_offset.x / render.width as f32, params.jitter_offset.y / render.height as f32];
        common.jitter_offset_tm1 = common.jitter_offset;
        common.jitter_offset = [jitter_uv[0] * input.width as f32, jitter_uv[1] * input.height as f32, jitter_uv[0], jitter_uv[1]];

        common.scale_factor = [
            output.width as f32 / input.width as f32,
            output.height as f32 / input.height as f32,
            input.width as f32 / output.width as f32,
            input.height as f32 / output.height as f32,
        ];

        common.motion_vector_scale = [params.motion_vector_scale.x / render.width as f32, params.motion_vector_scale.y / render.height as f32];

        let exposure = if params.exposure <= 0.0 { 1.0 } else { params.exposure };
        let values = PrecisionValues {
            exposure,
            inv_exposure: 1.0 / exposure,
            lut_offset: jitter_tile_offset(
                [common.jitter_offset[0], common.jitter_offset[1]],
                [common.scale_factor[0], common.scale_factor[1]],
                INDEX_MODULO,
            ),
            not_history_reset: if reset_history { 0.0 } else { 1.0 },
        };

        self.precision = match self.precision {
            PrecisionConstants::Full(_) => PrecisionConstants::Full(FullPrecisionConstants::from_values(&values)),
            PrecisionConstants::Half(_) => PrecisionConstants::Half(HalfPrecisionConstants::from_values(&values)),
        };
    }

    /// Serializes the block for staging, always [`CONSTANT_BLOCK_SIZE`] bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut data = Vec::with_capacity(CONSTANT_BLOCK_SIZE);
        data.extend_from_slice(bytemuck::bytes_of(&self.common));
        match &self.precision {
            PrecisionConstants::Full(constants) => data.extend_from_slice(bytemuck::bytes_of(constants)),
            PrecisionConstants::Half(constants) => data.extend_from_slice(bytemuck::bytes_of(constants)),
        }
        data.resize(CONSTANT_BLOCK_SIZE, 0);
        Bytes::from(data)
    }
}
