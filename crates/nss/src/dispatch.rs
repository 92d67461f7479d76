//! Frame orchestrator
//!
//! One [`NssContext::dispatch`] call records one upscaled frame. The call
//! validates the request, routes ping-pong history by frame parity, registers
//! the caller's resources, builds every GPU job of the frame and only then
//! schedules them, so a rejected frame leaves nothing half-recorded.

use crate::backend::{
    Backend, BoundResource, ClearJob, CommandList, ComputeJob, ConstantBuffer, CopyJob, CopyMode, DataGraphJob, ExternalResource, GpuJob,
    InternalResource, PipelineState, ResourceBinding,
};
use crate::constants::ConstantBlock;
use crate::context::NssContext;
use crate::error::{NssError, Result};
use crate::pipelines::Pass;
use crate::resources::{Parity, ResourceId, ResourceTable};
use crate::types::{ContextFlags, DispatchFlags};
use crate::validation::{DispatchLimits, check_dispatch};
use crate::{Dimensions2D, FloatCoords2D, MAX_QUEUED_FRAMES};

/// Per-frame request
#[derive(Debug, Clone, Default)]
pub struct DispatchDescription {
    pub command_list: Option<CommandList>,
    /// Jittered color at render resolution
    pub color: ExternalResource,
    pub depth: ExternalResource,
    /// Depth of the previous frame
    pub depth_tm1: ExternalResource,
    pub motion_vectors: ExternalResource,
    /// Upscaled result, written at upscale resolution
    pub output: ExternalResource,
    /// Previous frame's upscaled result; read as history when the padding pass is off
    pub output_tm1: ExternalResource,
    /// Target of the debug grid, required with [`DispatchFlags::DRAW_DEBUG_VIEW`]
    pub debug_views: ExternalResource,
    /// Sub-pixel jitter of this frame in render pixels
    pub jitter_offset: FloatCoords2D,
    pub render_size: Dimensions2D,
    pub upscale_size: Dimensions2D,
    pub camera_near: f32,
    pub camera_far: f32,
    /// Vertical field of view in radians
    pub camera_fov_angle_vertical: f32,
    /// Pre-exposure of the color input; values at or below zero mean 1.0
    pub exposure: f32,
    /// Scale from motion vector units to render pixels
    pub motion_vector_scale: FloatCoords2D,
    /// Milliseconds since the previous frame
    pub frame_time_delta: f32,
    /// Discard history, e.g. on a camera cut
    pub reset: bool,
    pub flags: DispatchFlags,
}

fn clear_job(target: InternalResource) -> GpuJob {
    GpuJob::Clear(ClearJob { target, color: [0.0; 4] })
}

/// Resolves reflected bindings against one side of the slot table
fn resolve_bindings(
    pipeline: &PipelineState,
    bindings: &[ResourceBinding],
    lookup: impl Fn(ResourceId) -> Option<InternalResource>,
) -> Result<Vec<BoundResource>> {
    bindings
        .iter()
        .map(|binding| {
            let id = binding.resource.ok_or_else(|| NssError::UnknownBinding {
                pipeline: pipeline.name.clone(),
                name: binding.name.clone(),
            })?;
            let resource = lookup(id).ok_or_else(|| {
                tracing::error!(pipeline = %pipeline.name, binding = %binding.name, ?id, "binding resolves to an empty slot");
                NssError::InvalidPointer
            })?;
            Ok(BoundResource {
                name: binding.name.clone(),
                resource,
            })
        })
        .collect()
}

impl<B: Backend> NssContext<B> {
    /// Records one upscaled frame into `params.command_list`
    ///
    /// # Arguments
    /// * `params` - Resources, sizes and camera values of this frame
    ///
    /// # Returns
    /// `Ok(())` once every job of the frame was scheduled and submitted.
    /// Contract violations are reported before the backend sees any job.
    pub fn dispatch(&mut self, params: &DispatchDescription) -> Result<()> {
        if params.render_size.has_zero_dimension() {
            return Err(NssError::InvalidArgument("renderSize contains zero dimension"));
        }
        if params.upscale_size.has_zero_dimension() {
            return Err(NssError::InvalidArgument("upscaleSize contains zero dimension"));
        }
        if params.render_size != self.max_render_size {
            return Err(NssError::OutOfRange {
                what: "renderSize",
                expected: self.max_render_size,
                actual: params.render_size,
            });
        }
        if params.upscale_size != self.max_upscale_size {
            return Err(NssError::OutOfRange {
                what: "upscaleSize",
                expected: self.max_upscale_size,
                actual: params.upscale_size,
            });
        }
        if self.destroyed {
            return Err(NssError::NullDevice);
        }

        if self.flags.contains(ContextFlags::ENABLE_DEBUG_CHECKING) {
            let limits = DispatchLimits {
                max_render_size: self.max_render_size,
                max_upscale_size: self.max_upscale_size,
                padded_input: self.padded.input,
            };
            for diagnostic in check_dispatch(params, &limits) {
                self.messenger.emit(diagnostic.severity, diagnostic.message);
            }
        }

        let command_list = self.required_handles(params)?;

        let reset_history = self.first_execution || params.reset;
        let parity = Parity::of(self.frame_index);
        tracing::debug!(frame_index = self.frame_index, ?parity, reset_history, "dispatching frame");

        let mut constants = self.constants;
        constants.update(params, &self.padded, self.flags, reset_history);

        self.bind_history(parity);
        let jobs = match self.prepare_frame(params, reset_history, &constants) {
            Ok(jobs) => jobs,
            Err(error) => {
                if let Err(release_error) = self.release_registrations(command_list) {
                    tracing::warn!(%release_error, "failed to release registrations of a rejected frame");
                }
                return Err(error);
            }
        };

        let submitted = self.submit(jobs, command_list);
        if submitted.is_ok() {
            self.constants = constants;
            self.frame_index = (self.frame_index + 1) % MAX_QUEUED_FRAMES;
            self.first_execution = false;
        }
        let released = self.release_registrations(command_list);
        submitted.and(released)
    }

    /// Rejects null handles the frame cannot run without
    fn required_handles(&self, params: &DispatchDescription) -> Result<CommandList> {
        let command_list = params.command_list.ok_or(NssError::InvalidPointer)?;
        let inputs = [&params.color, &params.depth, &params.depth_tm1, &params.motion_vectors, &params.output];
        if inputs.iter().any(|resource| resource.is_null()) {
            return Err(NssError::InvalidPointer);
        }
        // History comes from the caller only when there is no padded history of our own
        if !self.has_padding_pass && params.output_tm1.is_null() {
            return Err(NssError::InvalidPointer);
        }
        if params.flags.contains(DispatchFlags::DRAW_DEBUG_VIEW) && params.debug_views.is_null() {
            return Err(NssError::InvalidPointer);
        }
        Ok(command_list)
    }

    /// Points every history slot at this frame's half of its ping-pong pair
    fn bind_history(&mut self, parity: Parity) {
        let resources = &self.resources;
        let table = &mut self.table;

        table.set_srv(ResourceId::LumaDerivative, resources.luma_derivative.previous(parity));
        table.set_uav(ResourceId::LumaDerivative, resources.luma_derivative.current(parity));

        table.set_srv(ResourceId::NearestDepthCoordTm1, resources.depth_offset.previous(parity));
        // Written by preprocess, read back by postprocess in the same frame
        table.bind(ResourceId::NearestDepthCoord, resources.depth_offset.current(parity));

        table.set_srv(ResourceId::FeedbackTensor, resources.feedback.previous(parity));
        table.set_uav(ResourceId::FeedbackTensor, resources.feedback.current(parity));

        if let Some(padding) = &resources.padding {
            table.set_srv(ResourceId::HistoryUpscaledColor, padding.output.previous(parity));
            table.bind(ResourceId::UpscaledOutput, padding.output.current(parity));
        }
    }

    fn register(&mut self, resource: &ExternalResource) -> Result<InternalResource> {
        Ok(self.backend.register_resource(self.effect_context, resource)?)
    }

    /// Registers the caller's resources into their slots
    ///
    /// With the padding pass the inputs land in the unpadded slots read by
    /// mirror padding, and the output becomes the target of the crop copy.
    fn register_external(&mut self, params: &DispatchDescription) -> Result<()> {
        let (depth_tm1, depth, color, motion) = if self.has_padding_pass {
            (ResourceId::UnpaddedDepthTm1, ResourceId::UnpaddedDepth, ResourceId::UnpaddedColor, ResourceId::UnpaddedMotion)
        } else {
            (ResourceId::InputDepthTm1, ResourceId::InputDepth, ResourceId::InputColor, ResourceId::InputMotionVectors)
        };

        let resource = self.register(&params.depth_tm1)?;
        self.table.set_srv(depth_tm1, resource);
        let resource = self.register(&params.depth)?;
        self.table.set_srv(depth, resource);
        let resource = self.register(&params.color)?;
        self.table.set_srv(color, resource);
        let resource = self.register(&params.motion_vectors)?;
        self.table.set_srv(motion, resource);

        if self.has_padding_pass {
            let resource = self.register(&params.output)?;
            self.table.set_uav(ResourceId::UnpaddedOutput, resource);
        } else {
            let resource = self.register(&params.output_tm1)?;
            self.table.set_srv(ResourceId::HistoryUpscaledColor, resource);
            let resource = self.register(&params.output)?;
            self.table.set_uav(ResourceId::UpscaledOutput, resource);
        }

        if params.flags.contains(DispatchFlags::DRAW_DEBUG_VIEW) {
            let resource = self.register(&params.debug_views)?;
            self.table.set_uav(ResourceId::DebugViews, resource);
        }
        Ok(())
    }

    /// Registers resources, stages constants and builds the frame's jobs in order
    fn prepare_frame(&mut self, params: &DispatchDescription, reset_history: bool, constants: &ConstantBlock) -> Result<Vec<GpuJob>> {
        self.register_external(params)?;

        let mut jobs = Vec::new();
        if reset_history {
            jobs.extend(self.resources.history_slots().into_iter().map(clear_job));
        }
        let draw_debug_view = params.flags.contains(DispatchFlags::DRAW_DEBUG_VIEW);
        if draw_debug_view {
            let target = self.table.uav(ResourceId::DebugViews).ok_or(NssError::InvalidPointer)?;
            jobs.push(clear_job(target));
        }

        let constant_buffer = self.backend.stage_constant_buffer(constants.to_bytes())?;

        let source_grid = self.padded.input.thread_groups();
        let destination_grid = self.padded.output.thread_groups();

        if self.has_padding_pass {
            jobs.push(self.compute_job(Pass::MirrorPadding, source_grid, constant_buffer)?);
        }
        jobs.push(self.compute_job(Pass::Preprocess, source_grid, constant_buffer)?);
        jobs.push(self.data_graph_job()?);
        jobs.push(self.compute_job(Pass::Postprocess, destination_grid, constant_buffer)?);

        if self.has_padding_pass {
            // Crop the padded result into the caller's output
            let src = self.table.srv(ResourceId::UpscaledOutput).ok_or(NssError::InvalidPointer)?;
            let dst = self.table.uav(ResourceId::UnpaddedOutput).ok_or(NssError::InvalidPointer)?;
            jobs.push(GpuJob::Copy(CopyJob {
                src,
                dst,
                mode: CopyMode::DestinationExtent,
            }));
        }

        if draw_debug_view {
            jobs.push(self.compute_job(Pass::DebugView, params.render_size.thread_groups(), constant_buffer)?);
        }
        Ok(jobs)
    }

    fn pipeline(&self, pass: Pass) -> Result<&PipelineState> {
        self.pipelines.get(pass).ok_or_else(|| {
            tracing::error!(pass = pass.pipeline_name(), "pipeline was not created");
            NssError::InvalidPointer
        })
    }

    fn compute_job(&self, pass: Pass, dimensions: [u32; 3], constant_buffer: ConstantBuffer) -> Result<GpuJob> {
        let pipeline = self.pipeline(pass)?;
        let table: &ResourceTable = &self.table;
        Ok(GpuJob::Compute(ComputeJob {
            label: pass.job_label(),
            pipeline: pipeline.handle,
            dimensions,
            srv_textures: resolve_bindings(pipeline, &pipeline.srv_textures, |id| table.srv(id))?,
            uav_textures: resolve_bindings(pipeline, &pipeline.uav_textures, |id| table.uav(id))?,
            srv_tensors: resolve_bindings(pipeline, &pipeline.srv_tensors, |id| table.srv(id))?,
            uav_tensors: resolve_bindings(pipeline, &pipeline.uav_tensors, |id| table.uav(id))?,
            constant_buffers: vec![constant_buffer; pipeline.constant_buffers.len()],
        }))
    }

    fn data_graph_job(&self) -> Result<GpuJob> {
        let pipeline = self.pipeline(Pass::DataGraph)?;
        let table = &self.table;
        Ok(GpuJob::DataGraph(DataGraphJob {
            label: Pass::DataGraph.job_label(),
            pipeline: pipeline.handle,
            srv_tensors: resolve_bindings(pipeline, &pipeline.srv_tensors, |id| table.srv(id))?,
            uav_tensors: resolve_bindings(pipeline, &pipeline.uav_tensors, |id| table.uav(id))?,
        }))
    }

    fn submit(&mut self, jobs: Vec<GpuJob>, command_list: CommandList) -> Result<()> {
        for job in jobs {
            tracing::trace!(label = job.label(), "scheduling job");
            self.backend.schedule_gpu_job(job)?;
        }
        self.backend.execute_gpu_jobs(self.effect_context, command_list)?;
        Ok(())
    }

    /// Drops this frame's registrations and nulls the slots that held them
    fn release_registrations(&mut self, command_list: CommandList) -> Result<()> {
        for id in ResourceId::registered_slots(self.has_padding_pass) {
            self.table.clear(*id);
        }
        self.backend.unregister_resources(self.effect_context, command_list)?;
        Ok(())
    }
}
