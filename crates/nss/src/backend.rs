//! Backend trait, the graphics-API contract consumed by the core
//!
//! The core never talks to a graphics API directly. Resource creation, pipeline
//! compilation, job recording and submission all go through [`Backend`], so the
//! orchestrator stays polymorphic over whatever device actually runs the passes.

use std::num::NonZeroU64;

use bytes::Bytes;

use crate::error::BackendError;
use crate::pipelines::{Pass, PermutationFlags};
use crate::resources::ResourceId;
use crate::types::ContextFlags;

/// Identifier of an effect context created by [`Backend::create_backend_context`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectContextId(pub u32);

/// Backend-side handle to a created or registered resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalResource(pub u32);

/// Backend-side handle to a compiled pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

/// Opaque handle to the caller's command list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandList(pub NonZeroU64);

impl CommandList {
    /// Wraps a raw native handle; zero is the null command list
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

/// Opaque handle to a caller-owned native resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub NonZeroU64);

/// Device capabilities reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities {
    pub tensor_supported: bool,
    pub data_graph_supported: bool,
    pub fp16_supported: bool,
    pub wave_lane_count_min: u32,
    pub wave_lane_count_max: u32,
}

impl DeviceCapabilities {
    /// Tensors and data graphs are both required to run the network
    pub fn supports_neural_graphics(&self) -> bool {
        self.tensor_supported && self.data_graph_supported
    }
}

bitflags::bitflags! {
    /// Entry points a backend implements
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct EntryPoints: u32 {
        const DEVICE_CAPABILITIES = 1 << 0;
        const CREATE_BACKEND_CONTEXT = 1 << 1;
        const DESTROY_BACKEND_CONTEXT = 1 << 2;
        const CREATE_RESOURCE = 1 << 3;
        const DESTROY_RESOURCE = 1 << 4;
        const REGISTER_RESOURCE = 1 << 5;
        const UNREGISTER_RESOURCES = 1 << 6;
        const CREATE_PIPELINE = 1 << 7;
        const CREATE_DATA_GRAPH_PIPELINE = 1 << 8;
        const DESTROY_PIPELINE = 1 << 9;
        const STAGE_CONSTANT_BUFFER = 1 << 10;
        const SCHEDULE_GPU_JOB = 1 << 11;
        const EXECUTE_GPU_JOBS = 1 << 12;

        /// Everything the core calls
        const REQUIRED = (1 << 13) - 1;
    }
}

/// Surface formats used by NSS resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceFormat {
    #[default]
    Unknown,
    R8Sint,
    R8Unorm,
    R8G8Unorm,
    R16G16Float,
    R32Float,
    R11G11B10Float,
    R16G16B16A16Float,
    R8G8B8A8Unorm,
}

/// Kind of GPU resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceType {
    #[default]
    Texture2D,
    Tensor,
}

bitflags::bitflags! {
    /// How a resource may be used; an empty set means read-only
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct ResourceUsage: u32 {
        const RENDER_TARGET = 1 << 0;
        const UAV = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Resource creation flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct ResourceFlags: u32 {
        const ALIASABLE = 1 << 0;
        /// Tensor memory may also be sampled as an image
        const IMAGE_ALIASED = 1 << 1;
    }
}

/// State a resource is created in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    ComputeRead,
    #[default]
    UnorderedAccess,
}

/// Shape and format of a texture or tensor
///
/// For tensors `depth` holds the channel count, `batch` the batch size and
/// `rank` the number of tensor dimensions. Textures use depth 1 and rank 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceDescription {
    pub resource_type: ResourceType,
    pub format: SurfaceFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub flags: ResourceFlags,
    pub usage: ResourceUsage,
    pub batch: u32,
    pub rank: u32,
}

/// Everything the backend needs to allocate one internal resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResourceDescription {
    pub name: &'static str,
    pub description: ResourceDescription,
    pub initial_state: ResourceState,
}

/// A caller-owned resource handed over for one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExternalResource {
    pub handle: Option<NativeHandle>,
    pub description: ResourceDescription,
    pub state: ResourceState,
}

impl ExternalResource {
    /// Wraps a raw native handle; zero produces a null resource
    pub fn new(raw: u64, description: ResourceDescription) -> Self {
        Self {
            handle: NonZeroU64::new(raw).map(NativeHandle),
            description,
            state: ResourceState::ComputeRead,
        }
    }

    /// A resource with no native handle
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.handle.is_none()
    }
}

/// Sampler filtering modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Point,
    Linear,
}

/// Sampler declared by a pipeline; addressing is always clamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDescription {
    pub filter: FilterMode,
}

/// Root signature and naming for one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    pub name: &'static str,
    pub context_flags: ContextFlags,
    pub samplers: Vec<SamplerDescription>,
    /// Size of each root-constant block in 32-bit words
    pub root_constants: Vec<u32>,
}

/// A binding reflected from a compiled pipeline
///
/// `resource` is empty until the core patches the binding against its name tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub slot: u32,
    pub name: String,
    pub resource: Option<ResourceId>,
}

impl ResourceBinding {
    pub fn new(slot: u32, name: impl Into<String>) -> Self {
        Self {
            slot,
            name: name.into(),
            resource: None,
        }
    }
}

/// A reflected constant-buffer binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBufferBinding {
    pub slot: u32,
    pub name: String,
}

/// A compiled pipeline with its reflected bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    pub handle: PipelineHandle,
    pub name: String,
    pub srv_textures: Vec<ResourceBinding>,
    pub uav_textures: Vec<ResourceBinding>,
    pub srv_tensors: Vec<ResourceBinding>,
    pub uav_tensors: Vec<ResourceBinding>,
    pub constant_buffers: Vec<ConstantBufferBinding>,
}

/// Handle to constant data staged for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantBuffer {
    pub id: u32,
    pub num_32bit_entries: u32,
}

/// A resource resolved for one binding of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundResource {
    pub name: String,
    pub resource: InternalResource,
}

/// Zero-fill of one resource
#[derive(Debug, Clone, PartialEq)]
pub struct ClearJob {
    pub target: InternalResource,
    pub color: [f32; 4],
}

/// A compute dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeJob {
    pub label: &'static str,
    pub pipeline: PipelineHandle,
    pub dimensions: [u32; 3],
    pub srv_textures: Vec<BoundResource>,
    pub uav_textures: Vec<BoundResource>,
    pub srv_tensors: Vec<BoundResource>,
    pub uav_tensors: Vec<BoundResource>,
    pub constant_buffers: Vec<ConstantBuffer>,
}

/// A neural-inference dispatch; the backend derives its grid from the graph
#[derive(Debug, Clone, PartialEq)]
pub struct DataGraphJob {
    pub label: &'static str,
    pub pipeline: PipelineHandle,
    pub srv_tensors: Vec<BoundResource>,
    pub uav_tensors: Vec<BoundResource>,
}

/// How a copy job sizes its region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyMode {
    /// Copy the whole source
    SourceExtent,
    /// Copy only the destination's extent, cropping a larger source
    DestinationExtent,
}

/// A resource-to-resource copy
#[derive(Debug, Clone, PartialEq)]
pub struct CopyJob {
    pub src: InternalResource,
    pub dst: InternalResource,
    pub mode: CopyMode,
}

/// One unit of GPU work scheduled by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum GpuJob {
    Clear(ClearJob),
    Compute(ComputeJob),
    DataGraph(DataGraphJob),
    Copy(CopyJob),
}

impl GpuJob {
    /// Short name for logging
    pub fn label(&self) -> &'static str {
        match self {
            GpuJob::Clear(_) => "Clear",
            GpuJob::Compute(job) => job.label,
            GpuJob::DataGraph(job) => job.label,
            GpuJob::Copy(_) => "Copy",
        }
    }
}

/// Graphics-API backend driven by an NSS context.
///
/// Contract:
/// - Handles returned by `create_resource` stay valid until `destroy_resource`.
/// - Handles returned by `register_resource` stay valid until the next
///   `unregister_resources` on the same context.
/// - Scheduled jobs are recorded in order and submitted by `execute_gpu_jobs`.
/// - Every failure is reported as a [`BackendError`]; the core never retries.
pub trait Backend: Send {
    /// Entry points this backend implements; creation refuses incomplete sets
    fn entry_points(&self) -> EntryPoints {
        EntryPoints::all()
    }

    fn create_backend_context(&mut self) -> Result<EffectContextId, BackendError>;

    fn destroy_backend_context(&mut self, context: EffectContextId) -> Result<(), BackendError>;

    fn device_capabilities(&self) -> Result<DeviceCapabilities, BackendError>;

    fn create_resource(&mut self, context: EffectContextId, description: &CreateResourceDescription) -> Result<InternalResource, BackendError>;

    fn destroy_resource(&mut self, context: EffectContextId, resource: InternalResource) -> Result<(), BackendError>;

    /// Makes a caller resource addressable by jobs for the current frame
    fn register_resource(&mut self, context: EffectContextId, resource: &ExternalResource) -> Result<InternalResource, BackendError>;

    /// Drops every registration made since the previous call
    fn unregister_resources(&mut self, context: EffectContextId, command_list: CommandList) -> Result<(), BackendError>;

    /// Compiles a compute pipeline and reflects its bindings
    fn create_pipeline(
        &mut self,
        context: EffectContextId,
        pass: Pass,
        permutation: PermutationFlags,
        description: &PipelineDescription,
    ) -> Result<PipelineState, BackendError>;

    /// Compiles the inference graph for a fixed input extent
    fn create_data_graph_pipeline(
        &mut self,
        context: EffectContextId,
        pass: Pass,
        permutation: PermutationFlags,
        description: &PipelineDescription,
        width: u32,
        height: u32,
    ) -> Result<PipelineState, BackendError>;

    fn destroy_pipeline(&mut self, context: EffectContextId, pipeline: &PipelineState) -> Result<(), BackendError>;

    /// Copies constant data into backend-owned memory for this frame
    fn stage_constant_buffer(&mut self, data: Bytes) -> Result<ConstantBuffer, BackendError>;

    fn schedule_gpu_job(&mut self, job: GpuJob) -> Result<(), BackendError>;

    /// Records every scheduled job into the command list
    fn execute_gpu_jobs(&mut self, context: EffectContextId, command_list: CommandList) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_entry_points_cover_all() {
        assert_eq!(EntryPoints::REQUIRED.bits(), EntryPoints::all().bits());
        assert!(EntryPoints::REQUIRED.contains(EntryPoints::EXECUTE_GPU_JOBS));
    }

    #[test]
    fn test_null_external_resource() {
        assert!(ExternalResource::null().is_null());
        assert!(ExternalResource::new(0, ResourceDescription::default()).is_null());
        assert!(!ExternalResource::new(42, ResourceDescription::default()).is_null());
        assert!(CommandList::from_raw(0).is_none());
    }

    #[test]
    fn test_neural_graphics_needs_both_capabilities() {
        let mut caps = DeviceCapabilities {
            tensor_supported: true,
            ..Default::default()
        };
        assert!(!caps.supports_neural_graphics());
        caps.data_graph_supported = true;
        assert!(caps.supports_neural_graphics());
    }
}
