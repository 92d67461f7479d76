//! Reflected binding layouts of the NSS passes
//!
//! A real backend reflects these names from the compiled shaders. The layouts
//! here mirror what each pass declares so the recording backend hands the core
//! realistic pipelines to patch.

use nss::backend::{ConstantBufferBinding, PipelineHandle, PipelineState, ResourceBinding};
use nss::pipelines::{Pass, PermutationFlags};

/// Coefficient tensors as declared by the postprocess and debug passes
const COEFFICIENTS: [&str; 5] = [
    "r_coefficients_k0_tensor",
    "r_coefficients_k1_tensor",
    "r_coefficients_k2_tensor",
    "r_coefficients_k3_tensor",
    "r_coefficients_k4_tensor",
];

/// Binding names of one pass, grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassLayout {
    pub srv_textures: Vec<&'static str>,
    pub uav_textures: Vec<&'static str>,
    pub srv_tensors: Vec<&'static str>,
    pub uav_tensors: Vec<&'static str>,
    pub constant_buffers: Vec<&'static str>,
}

impl PassLayout {
    /// Adds tensors the pass reads, either as sampled images or as tensors
    fn read_tensors(&mut self, names: &[&'static str], as_images: bool) {
        if as_images {
            self.srv_textures.extend_from_slice(names);
        } else {
            self.srv_tensors.extend_from_slice(names);
        }
    }

    /// Builds the reflected pipeline state for this layout
    pub fn to_pipeline_state(&self, handle: PipelineHandle, name: &str) -> PipelineState {
        let bindings = |names: &[&'static str]| names.iter().enumerate().map(|(slot, name)| ResourceBinding::new(slot as u32, *name)).collect();
        PipelineState {
            handle,
            name: name.to_string(),
            srv_textures: bindings(&self.srv_textures),
            uav_textures: bindings(&self.uav_textures),
            srv_tensors: bindings(&self.srv_tensors),
            uav_tensors: bindings(&self.uav_tensors),
            constant_buffers: self
                .constant_buffers
                .iter()
                .enumerate()
                .map(|(slot, name)| ConstantBufferBinding {
                    slot: slot as u32,
                    name: name.to_string(),
                })
                .collect(),
        }
    }
}

/// Layout of `pass` compiled with `permutation`
pub fn pass_layout(pass: Pass, permutation: PermutationFlags) -> PassLayout {
    let as_images = permutation.contains(PermutationFlags::ALIAS_OUTPUT_TENSORS_AS_IMAGES);
    let mut layout = PassLayout {
        constant_buffers: vec!["cbNSS"],
        ..Default::default()
    };

    match pass {
        Pass::MirrorPadding => {
            layout.srv_textures = vec!["r_unpadded_color", "r_unpadded_depth", "r_unpadded_depth_tm1", "r_unpadded_motion"];
            layout.uav_textures = vec!["rw_input_color_jittered", "rw_input_depth", "rw_prev_depth", "rw_input_motion_vectors"];
        }
        Pass::Preprocess => {
            layout.srv_textures = vec![
                "r_input_color_jittered",
                "r_input_depth",
                "r_prev_depth",
                "r_input_motion_vectors",
                "r_prev_upscaled_color",
                "r_prev_luma_deriv",
                "r_input_nearest_depth_coord_tm1",
            ];
            layout.read_tensors(&["r_prev_feedback_tensor"], as_images);
            layout.uav_textures = vec!["rw_luma_deriv", "rw_nearest_depth_coord_out"];
            layout.uav_tensors = vec!["rw_preprocessed_tensor"];
        }
        Pass::DataGraph => {
            layout.constant_buffers.clear();
            layout.uav_tensors = vec![
                "Resource_0_input",
                "Resource_1_output",
                "Resource_2_output",
                "Resource_3_output",
                "Resource_4_output",
                "Resource_5_output",
                "Resource_6_output",
            ];
        }
        Pass::Postprocess => {
            layout.srv_textures = vec![
                "r_input_color_jittered",
                "r_input_motion_vectors",
                "r_prev_upscaled_color",
                "r_input_nearest_depth_coord",
            ];
            layout.read_tensors(&COEFFICIENTS, as_images);
            layout.uav_textures = vec!["rw_upscaled_output"];
        }
        Pass::DebugView => {
            layout.srv_textures = vec![
                "r_prev_upscaled_color",
                "r_input_color_jittered",
                "r_input_motion_vectors",
                "r_prev_luma_deriv",
                "r_input_nearest_depth_coord",
            ];
            layout.read_tensors(&["r_prev_feedback_tensor"], as_images);
            layout.read_tensors(&COEFFICIENTS, as_images);
            layout.uav_textures = vec!["rw_upscaled_output", "rw_debug_views"];
        }
    }
    layout
}
