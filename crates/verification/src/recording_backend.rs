//! A backend that records every call instead of driving a GPU
//!
//! The recording lives behind an `Arc<Mutex<_>>` shared with a
//! [`RecordingHandle`], so it can still be inspected after the backend itself
//! was moved into a context (or dropped with a context that failed to build).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use nss::backend::{
    ConstantBuffer, CreateResourceDescription, DeviceCapabilities, EffectContextId, EntryPoints, ExternalResource, GpuJob, InternalResource,
    PipelineDescription, PipelineHandle, PipelineState,
};
use nss::pipelines::{Pass, PermutationFlags};
use nss::{BackendError, CommandList};

use crate::pass_layouts::pass_layout;

/// One backend entry point invocation
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CreateBackendContext,
    DestroyBackendContext,
    DeviceCapabilities,
    CreateResource(&'static str),
    DestroyResource(InternalResource),
    RegisterResource,
    UnregisterResources,
    CreatePipeline(Pass),
    CreateDataGraphPipeline { width: u32, height: u32 },
    DestroyPipeline(String),
    StageConstantBuffer,
    ScheduleGpuJob(&'static str),
    ExecuteGpuJobs,
}

/// A compiled pipeline request as the backend saw it
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub pass: Pass,
    pub permutation: PermutationFlags,
    pub description: PipelineDescription,
}

/// Failures to inject into an otherwise healthy backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureInjection {
    /// Fail creation of the resource with this debug name
    pub resource: Option<&'static str>,
    /// Fail compilation of this pass
    pub pipeline: Option<Pass>,
    /// Add a binding no lookup table knows to this pass
    pub unknown_binding: Option<Pass>,
    /// Fail destruction of the pipeline with this name, leaving it live
    pub destroy_pipeline: Option<&'static str>,
    /// Fail every job submission
    pub execute: bool,
}

/// Everything the backend was asked to do
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub calls: Vec<BackendCall>,
    /// Live internal resources with their creation descriptions
    pub resources: BTreeMap<InternalResource, CreateResourceDescription>,
    pub destroyed_resources: Vec<InternalResource>,
    /// Registrations of the frame being recorded
    pub registered: Vec<(InternalResource, ExternalResource)>,
    /// Every registration ever made, in order
    pub registration_log: Vec<(InternalResource, ExternalResource)>,
    pub pipeline_requests: Vec<PipelineRequest>,
    /// Live pipelines by handle
    pub pipelines: BTreeMap<u64, String>,
    /// Extent the data graph was last compiled for
    pub data_graph_extent: Option<(u32, u32)>,
    pub staged_constants: Vec<Bytes>,
    /// Jobs scheduled since the last execution
    pub pending_jobs: Vec<GpuJob>,
    /// Jobs of every executed frame, in submission order
    pub executed_frames: Vec<Vec<GpuJob>>,
    pub live_contexts: BTreeSet<u32>,
}

impl Recording {
    /// Number of calls to one entry point
    pub fn count(&self, matches: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|call| matches(call)).count()
    }

    /// Looks up a live resource by debug name
    pub fn resource_named(&self, name: &str) -> Option<InternalResource> {
        self.resources.iter().find(|(_, description)| description.name == name).map(|(resource, _)| *resource)
    }

    /// Job labels of one executed frame
    pub fn frame_labels(&self, frame: usize) -> Vec<&'static str> {
        self.executed_frames.get(frame).map(|jobs| jobs.iter().map(GpuJob::label).collect()).unwrap_or_default()
    }

    /// Most recent internal handle a caller resource was registered under
    pub fn registration_of(&self, raw: u64) -> Option<InternalResource> {
        self.registration_log
            .iter()
            .rev()
            .find(|(_, external)| external.handle.is_some_and(|handle| handle.0.get() == raw))
            .map(|(internal, _)| *internal)
    }

    /// True once every context, resource, pipeline and registration has been released
    pub fn is_clean(&self) -> bool {
        self.resources.is_empty() && self.pipelines.is_empty() && self.live_contexts.is_empty() && self.registered.is_empty()
    }
}

/// Shared view of a [`RecordingBackend`]'s recording
#[derive(Debug, Clone, Default)]
pub struct RecordingHandle {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingHandle {
    pub fn lock(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the recording as it is now
    pub fn snapshot(&self) -> Recording {
        self.lock().clone()
    }
}

/// [`nss::Backend`] implementation that only records
#[derive(Debug)]
pub struct RecordingBackend {
    capabilities: DeviceCapabilities,
    entry_points: EntryPoints,
    failures: FailureInjection,
    recording: RecordingHandle,
    next_context: u32,
    next_resource: u32,
    next_pipeline: u64,
    next_constant_buffer: u32,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(Self::neural_device())
    }
}

impl RecordingBackend {
    /// Capabilities of a device that can run the network in full precision
    pub fn neural_device() -> DeviceCapabilities {
        DeviceCapabilities {
            tensor_supported: true,
            data_graph_supported: true,
            fp16_supported: false,
            wave_lane_count_min: 16,
            wave_lane_count_max: 64,
        }
    }

    pub fn new(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            entry_points: EntryPoints::all(),
            failures: FailureInjection::default(),
            recording: RecordingHandle::default(),
            next_context: 1,
            next_resource: 1,
            next_pipeline: 1,
            next_constant_buffer: 0,
        }
    }

    pub fn with_entry_points(mut self, entry_points: EntryPoints) -> Self {
        self.entry_points = entry_points;
        self
    }

    pub fn with_failures(mut self, failures: FailureInjection) -> Self {
        self.failures = failures;
        self
    }

    /// Handle that keeps observing this backend after it is moved
    pub fn handle(&self) -> RecordingHandle {
        self.recording.clone()
    }

    fn record(&self, call: BackendCall) -> MutexGuard<'_, Recording> {
        let mut recording = self.recording.lock();
        recording.calls.push(call);
        recording
    }

    fn allocate_handle(&mut self) -> InternalResource {
        let resource = InternalResource(self.next_resource);
        self.next_resource += 1;
        resource
    }

    fn compile(&mut self, pass: Pass, permutation: PermutationFlags, description: &PipelineDescription) -> Result<PipelineState, BackendError> {
        if self.failures.pipeline == Some(pass) {
            return Err(BackendError::PipelineCreation(format!("injected failure compiling {}", description.name)));
        }
        let handle = PipelineHandle(self.next_pipeline);
        self.next_pipeline += 1;

        let mut layout = pass_layout(pass, permutation);
        if self.failures.unknown_binding == Some(pass) {
            layout.srv_textures.push("r_unreflected_input");
        }
        let pipeline = layout.to_pipeline_state(handle, description.name);

        let mut recording = self.recording.lock();
        recording.pipeline_requests.push(PipelineRequest {
            pass,
            permutation,
            description: description.clone(),
        });
        recording.pipelines.insert(handle.0, pipeline.name.clone());
        Ok(pipeline)
    }
}

impl nss::Backend for RecordingBackend {
    fn entry_points(&self) -> EntryPoints {
        self.entry_points
    }

    fn create_backend_context(&mut self) -> Result<EffectContextId, BackendError> {
        let context = EffectContextId(self.next_context);
        self.next_context += 1;
        self.record(BackendCall::CreateBackendContext).live_contexts.insert(context.0);
        Ok(context)
    }

    fn destroy_backend_context(&mut self, context: EffectContextId) -> Result<(), BackendError> {
        let mut recording = self.record(BackendCall::DestroyBackendContext);
        if !recording.live_contexts.remove(&context.0) {
            return Err(BackendError::UnknownContext(context.0));
        }
        Ok(())
    }

    fn device_capabilities(&self) -> Result<DeviceCapabilities, BackendError> {
        self.record(BackendCall::DeviceCapabilities);
        Ok(self.capabilities)
    }

    fn create_resource(&mut self, _context: EffectContextId, description: &CreateResourceDescription) -> Result<InternalResource, BackendError> {
        self.record(BackendCall::CreateResource(description.name));
        if self.failures.resource == Some(description.name) {
            return Err(BackendError::OutOfMemory(description.name.to_string()));
        }
        let resource = self.allocate_handle();
        self.recording.lock().resources.insert(resource, description.clone());
        Ok(resource)
    }

    fn destroy_resource(&mut self, _context: EffectContextId, resource: InternalResource) -> Result<(), BackendError> {
        let mut recording = self.record(BackendCall::DestroyResource(resource));
        if recording.resources.remove(&resource).is_none() {
            return Err(BackendError::Api(format!("resource {} is not live", resource.0)));
        }
        recording.destroyed_resources.push(resource);
        Ok(())
    }

    fn register_resource(&mut self, _context: EffectContextId, resource: &ExternalResource) -> Result<InternalResource, BackendError> {
        self.record(BackendCall::RegisterResource);
        let internal = self.allocate_handle();
        let mut recording = self.recording.lock();
        recording.registered.push((internal, *resource));
        recording.registration_log.push((internal, *resource));
        Ok(internal)
    }

    fn unregister_resources(&mut self, _context: EffectContextId, _command_list: CommandList) -> Result<(), BackendError> {
        self.record(BackendCall::UnregisterResources).registered.clear();
        Ok(())
    }

    fn create_pipeline(
        &mut self,
        _context: EffectContextId,
        pass: Pass,
        permutation: PermutationFlags,
        description: &PipelineDescription,
    ) -> Result<PipelineState, BackendError> {
        self.record(BackendCall::CreatePipeline(pass));
        self.compile(pass, permutation, description)
    }

    fn create_data_graph_pipeline(
        &mut self,
        _context: EffectContextId,
        pass: Pass,
        permutation: PermutationFlags,
        description: &PipelineDescription,
        width: u32,
        height: u32,
    ) -> Result<PipelineState, BackendError> {
        self.record(BackendCall::CreateDataGraphPipeline { width, height }).data_graph_extent = Some((width, height));
        self.compile(pass, permutation, description)
    }

    fn destroy_pipeline(&mut self, _context: EffectContextId, pipeline: &PipelineState) -> Result<(), BackendError> {
        let mut recording = self.record(BackendCall::DestroyPipeline(pipeline.name.clone()));
        if self.failures.destroy_pipeline == Some(pipeline.name.as_str()) {
            return Err(BackendError::Api(format!("injected failure destroying {}", pipeline.name)));
        }
        if recording.pipelines.remove(&pipeline.handle.0).is_none() {
            return Err(BackendError::Api(format!("pipeline {} is not live", pipeline.name)));
        }
        Ok(())
    }

    fn stage_constant_buffer(&mut self, data: Bytes) -> Result<ConstantBuffer, BackendError> {
        let num_32bit_entries = (data.len() / size_of::<u32>()) as u32;
        self.record(BackendCall::StageConstantBuffer).staged_constants.push(data);
        let id = self.next_constant_buffer;
        self.next_constant_buffer += 1;
        Ok(ConstantBuffer { id, num_32bit_entries })
    }

    fn schedule_gpu_job(&mut self, job: GpuJob) -> Result<(), BackendError> {
        self.record(BackendCall::ScheduleGpuJob(job.label())).pending_jobs.push(job);
        Ok(())
    }

    fn execute_gpu_jobs(&mut self, _context: EffectContextId, _command_list: CommandList) -> Result<(), BackendError> {
        let failed = self.failures.execute;
        let mut recording = self.record(BackendCall::ExecuteGpuJobs);
        let jobs = std::mem::take(&mut recording.pending_jobs);
        if failed {
            return Err(BackendError::Api("injected submission failure".into()));
        }
        recording.executed_frames.push(jobs);
        Ok(())
    }
}
