//! Pipeline set: per-pass programs, permutation selection and binding patching
//!
//! Each pass is compiled once per context generation with a permutation bitmask
//! derived from the context flags and the padded upscale ratio. After creation
//! the reflected binding names are resolved against fixed lookup tables, so a
//! dispatch only has to read slot indices.

use crate::Dimensions2D;
use crate::backend::{Backend, EffectContextId, FilterMode, PipelineDescription, PipelineState, ResourceBinding, SamplerDescription};
use crate::constants::Precision;
use crate::error::{NssError, Result};
use crate::resources::ResourceId;
use crate::types::ContextFlags;

/// How close the padded ratio must be to a preset to select its fast path
pub const SCALE_PRESET_MODE_THRESHOLD: f32 = 0.01;

/// The passes that make up one NSS frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Pass {
    MirrorPadding = 0,
    Preprocess = 1,
    DataGraph = 2,
    Postprocess = 3,
    DebugView = 4,
}

impl Pass {
    pub const COUNT: usize = 5;

    /// Name given to the compiled pipeline
    pub fn pipeline_name(&self) -> &'static str {
        match self {
            Pass::MirrorPadding => "NSS-MirrorPadding",
            Pass::Preprocess => "NSS-Preprocess",
            Pass::DataGraph => "NSS-Graph",
            Pass::Postprocess => "NSS-Postprocess",
            Pass::DebugView => "NSS-DebugView",
        }
    }

    /// Label attached to the pass' GPU job
    pub fn job_label(&self) -> &'static str {
        match self {
            Pass::MirrorPadding => "MirrorPadding",
            Pass::Preprocess => "Preprocess",
            Pass::DataGraph => "DataGraph",
            Pass::Postprocess => "Postprocess",
            Pass::DebugView => "DebugView",
        }
    }
}

bitflags::bitflags! {
    /// Shader permutation selected for every pipeline of a context
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct PermutationFlags: u32 {
        const QUANTIZED = 1 << 0;
        const REVERSE_Z = 1 << 1;
        const RESAMPLE_BICUBIC = 1 << 2;
        const STATIC = 1 << 3;
        const ALIAS_OUTPUT_TENSORS_AS_IMAGES = 1 << 4;
        const ALLOW_16BIT = 1 << 5;
        const SCALE_PRESET_X1_3 = 1 << 6;
        const SCALE_PRESET_X1_5 = 1 << 7;
        /// Fixed 4x4-kernel path for exact 2x upscaling
        const SCALE_PRESET_X2 = 1 << 8;
    }
}

impl PermutationFlags {
    /// Derives the permutation for a context
    ///
    /// # Arguments
    /// * `flags` - Context creation flags
    /// * `precision` - Arithmetic precision resolved against device support
    /// * `upscale_ratio` - Padded output width over padded input width
    pub fn select(flags: ContextFlags, precision: Precision, upscale_ratio: f32) -> Self {
        let mut permutation = Self::empty();
        permutation.set(Self::QUANTIZED, flags.contains(ContextFlags::QUANTIZED));
        permutation.set(Self::REVERSE_Z, flags.contains(ContextFlags::DEPTH_INVERTED));
        permutation.set(Self::RESAMPLE_BICUBIC, flags.contains(ContextFlags::RESAMPLE_BICUBIC));
        permutation.set(Self::ALIAS_OUTPUT_TENSORS_AS_IMAGES, flags.contains(ContextFlags::READ_TENSORS_AS_IMAGES));
        permutation.set(Self::ALLOW_16BIT, precision == Precision::Half);

        // Only 2x has a preset today; other ratios take the general per-tap path
        if (upscale_ratio - 2.0).abs() < SCALE_PRESET_MODE_THRESHOLD {
            permutation |= Self::SCALE_PRESET_X2;
        }
        permutation
    }
}

// Reflected shader names mapped to logical slots, one table per binding kind.

const SRV_TEXTURE_BINDINGS: &[(&str, ResourceId)] = &[
    ("r_unpadded_color", ResourceId::UnpaddedColor),
    ("r_unpadded_depth", ResourceId::UnpaddedDepth),
    ("r_unpadded_depth_tm1", ResourceId::UnpaddedDepthTm1),
    ("r_unpadded_motion", ResourceId::UnpaddedMotion),
    ("r_input_color_jittered", ResourceId::InputColor),
    ("r_input_depth", ResourceId::InputDepth),
    ("r_prev_depth", ResourceId::InputDepthTm1),
    ("r_input_motion_vectors", ResourceId::InputMotionVectors),
    ("r_prev_luma_deriv", ResourceId::LumaDerivative),
    ("r_prev_upscaled_color", ResourceId::HistoryUpscaledColor),
    ("r_input_nearest_depth_coord", ResourceId::NearestDepthCoord),
    ("r_input_nearest_depth_coord_tm1", ResourceId::NearestDepthCoordTm1),
    // Tensors sampled through image aliases
    ("r_prev_feedback_tensor", ResourceId::FeedbackTensor),
    ("r_coefficients_k0_tensor", ResourceId::K0Tensor),
    ("r_coefficients_k1_tensor", ResourceId::K1Tensor),
    ("r_coefficients_k2_tensor", ResourceId::K2Tensor),
    ("r_coefficients_k3_tensor", ResourceId::K3Tensor),
    ("r_coefficients_k4_tensor", ResourceId::K4Tensor),
    ("r_preprocessed_tensor", ResourceId::PreprocessInputTensor),
];

const UAV_TEXTURE_BINDINGS: &[(&str, ResourceId)] = &[
    ("rw_luma_deriv", ResourceId::LumaDerivative),
    ("rw_upscaled_output", ResourceId::UpscaledOutput),
    ("rw_nearest_depth_coord_out", ResourceId::NearestDepthCoord),
    ("rw_debug_views", ResourceId::DebugViews),
    ("rw_input_color_jittered", ResourceId::InputColor),
    ("rw_input_depth", ResourceId::InputDepth),
    ("rw_prev_depth", ResourceId::InputDepthTm1),
    ("rw_input_motion_vectors", ResourceId::InputMotionVectors),
];

const SRV_TENSOR_BINDINGS: &[(&str, ResourceId)] = &[
    ("r_prev_feedback_tensor", ResourceId::FeedbackTensor),
    ("r_coefficients_k0_tensor", ResourceId::K0Tensor),
    ("r_coefficients_k1_tensor", ResourceId::K1Tensor),
    ("r_coefficients_k2_tensor", ResourceId::K2Tensor),
    ("r_coefficients_k3_tensor", ResourceId::K3Tensor),
    ("r_coefficients_k4_tensor", ResourceId::K4Tensor),
    ("r_preprocessed_tensor", ResourceId::PreprocessInputTensor),
];

const UAV_TENSOR_BINDINGS: &[(&str, ResourceId)] = &[
    ("rw_preprocessed_tensor", ResourceId::PreprocessInputTensor),
    // Data graph ports, named by the graph's reflection
    ("Resource_0_input", ResourceId::PreprocessInputTensor),
    ("Resource_1_output", ResourceId::FeedbackTensor),
    ("Resource_2_output", ResourceId::K4Tensor),
    ("Resource_3_output", ResourceId::K3Tensor),
    ("Resource_4_output", ResourceId::K2Tensor),
    ("Resource_5_output", ResourceId::K1Tensor),
    ("Resource_6_output", ResourceId::K0Tensor),
];

fn patch_table(pipeline: &str, bindings: &mut [ResourceBinding], table: &[(&str, ResourceId)]) -> Result<()> {
    for binding in bindings {
        let (_, id) = table.iter().find(|(name, _)| *name == binding.name).ok_or_else(|| NssError::UnknownBinding {
            pipeline: pipeline.to_string(),
            name: binding.name.clone(),
        })?;
        binding.resource = Some(*id);
    }
    Ok(())
}

/// Resolves every reflected binding of `pipeline` to a logical slot
///
/// Fails with [`NssError::UnknownBinding`] on the first name missing from the
/// lookup table for its binding kind.
pub fn patch_resource_bindings(pipeline: &mut PipelineState) -> Result<()> {
    let name = pipeline.name.clone();
    patch_table(&name, &mut pipeline.srv_textures, SRV_TEXTURE_BINDINGS)?;
    patch_table(&name, &mut pipeline.uav_textures, UAV_TEXTURE_BINDINGS)?;
    patch_table(&name, &mut pipeline.srv_tensors, SRV_TENSOR_BINDINGS)?;
    patch_table(&name, &mut pipeline.uav_tensors, UAV_TENSOR_BINDINGS)?;
    Ok(())
}

/// Inputs that shape every pipeline of a context generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub context_flags: ContextFlags,
    pub permutation: PermutationFlags,
    pub has_padding_pass: bool,
    pub padded_input: Dimensions2D,
    /// Root-constant block size in 32-bit words
    pub constant_block_words: u32,
}

impl PipelineConfig {
    fn description(&self, pass: Pass) -> PipelineDescription {
        PipelineDescription {
            name: pass.pipeline_name(),
            context_flags: self.context_flags,
            samplers: vec![SamplerDescription { filter: FilterMode::Point }, SamplerDescription { filter: FilterMode::Linear }],
            root_constants: vec![self.constant_block_words],
        }
    }
}

/// The compiled programs of one context, one optional slot per pass
#[derive(Debug, Default)]
pub struct PipelineSet {
    pipelines: [Option<PipelineState>; Pass::COUNT],
}

impl PipelineSet {
    pub fn get(&self, pass: Pass) -> Option<&PipelineState> {
        self.pipelines[pass as usize].as_ref()
    }

    /// Creates (or re-creates) every pipeline the configuration needs
    ///
    /// Each pass releases its previous generation before compiling the new one,
    /// so at most one generation per pass exists at any time. The data graph is
    /// compiled last, for the padded input extent.
    pub fn create<B: Backend>(&mut self, backend: &mut B, context: EffectContextId, config: &PipelineConfig) -> Result<()> {
        if config.has_padding_pass {
            self.create_compute(backend, context, config, Pass::MirrorPadding)?;
        }
        self.create_compute(backend, context, config, Pass::Preprocess)?;
        self.create_compute(backend, context, config, Pass::Postprocess)?;
        self.create_compute(backend, context, config, Pass::DebugView)?;

        let slot = &mut self.pipelines[Pass::DataGraph as usize];
        safe_release(backend, context, slot)?;
        let alignment = crate::padding::RESOURCE_ALIGNMENT;
        if config.padded_input.width % alignment != 0 || config.padded_input.height % alignment != 0 {
            tracing::warn!(padded_input = %config.padded_input, "data graph input is not 8-aligned");
        }
        let mut pipeline = backend.create_data_graph_pipeline(
            context,
            Pass::DataGraph,
            config.permutation,
            &config.description(Pass::DataGraph),
            config.padded_input.width,
            config.padded_input.height,
        )?;
        patch_or_release(backend, context, &mut pipeline)?;
        tracing::debug!(name = %pipeline.name, bindings = pipeline.uav_tensors.len(), "created data graph pipeline");
        *slot = Some(pipeline);
        Ok(())
    }

    fn create_compute<B: Backend>(&mut self, backend: &mut B, context: EffectContextId, config: &PipelineConfig, pass: Pass) -> Result<()> {
        let slot = &mut self.pipelines[pass as usize];
        safe_release(backend, context, slot)?;
        let mut pipeline = backend.create_pipeline(context, pass, config.permutation, &config.description(pass))?;
        patch_or_release(backend, context, &mut pipeline)?;
        tracing::debug!(name = %pipeline.name, permutation = ?config.permutation, "created pipeline");
        *slot = Some(pipeline);
        Ok(())
    }

    /// Releases every pipeline in teardown order, continuing past failures and returning the first
    pub fn release<B: Backend>(&mut self, backend: &mut B, context: EffectContextId) -> Result<()> {
        let mut first_error = None;
        for pass in [Pass::MirrorPadding, Pass::Preprocess, Pass::DataGraph, Pass::Postprocess, Pass::DebugView] {
            if let Err(error) = safe_release(backend, context, &mut self.pipelines[pass as usize]) {
                tracing::warn!(?pass, %error, "failed to release pipeline");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Patches a freshly compiled pipeline, destroying it if a binding is unknown
fn patch_or_release<B: Backend>(backend: &mut B, context: EffectContextId, pipeline: &mut PipelineState) -> Result<()> {
    if let Err(error) = patch_resource_bindings(pipeline) {
        if let Err(release_error) = backend.destroy_pipeline(context, pipeline) {
            tracing::warn!(name = %pipeline.name, %release_error, "failed to release unpatchable pipeline");
        }
        return Err(error);
    }
    Ok(())
}

/// Destroys the pipeline in `slot`, if any, and empties the slot
fn safe_release<B: Backend>(backend: &mut B, context: EffectContextId, slot: &mut Option<PipelineState>) -> Result<()> {
    if let Some(pipeline) = slot.take() {
        backend.destroy_pipeline(context, &pipeline)?;
    }
    Ok(())
}
