//! Resource table: logical slots, physical allocations and ping-pong history
//!
//! Jobs address resources through [`ResourceId`] slots held in two parallel
//! tables (read and write). Internally owned allocations live in
//! [`OwnedResources`]; history that must survive a frame is held as
//! [`DoubleBuffered`] pairs and routed into the logical slots by frame parity.

use crate::Dimensions2D;
use crate::backend::{
    Backend, CreateResourceDescription, EffectContextId, InternalResource, ResourceDescription, ResourceFlags, ResourceState, ResourceType,
    ResourceUsage, SurfaceFormat,
};
use crate::error::Result;
use crate::types::ContextFlags;

/// Channels of the packed network input tensor
pub const PREPROCESS_TENSOR_CHANNELS: u32 = 12;
/// Channels of the temporal feedback tensor
pub const FEEDBACK_TENSOR_CHANNELS: u32 = 4;
/// Channels of each coefficient tensor
pub const COEFFICIENT_TENSOR_CHANNELS: u32 = 4;
/// Rank of every tensor (batch, height, width, channels)
pub const TENSOR_RANK: u32 = 4;

/// Logical resource slots referenced by pipeline bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum ResourceId {
    UnpaddedColor,
    UnpaddedDepth,
    UnpaddedDepthTm1,
    UnpaddedMotion,
    UnpaddedOutput,
    InputColor,
    InputDepth,
    InputDepthTm1,
    InputMotionVectors,
    HistoryUpscaledColor,
    UpscaledOutput,
    DebugViews,
    PreprocessInputTensor,
    LumaDerivative,
    NearestDepthCoord,
    NearestDepthCoordTm1,
    FeedbackTensor,
    K0Tensor,
    K1Tensor,
    K2Tensor,
    K3Tensor,
    K4Tensor,
}

impl ResourceId {
    pub const COUNT: usize = 22;

    /// Slots caller resources are registered into when the padding pass runs
    pub const REGISTERED_PADDED: [ResourceId; 6] = [
        ResourceId::UnpaddedColor,
        ResourceId::UnpaddedDepth,
        ResourceId::UnpaddedDepthTm1,
        ResourceId::UnpaddedMotion,
        ResourceId::UnpaddedOutput,
        ResourceId::DebugViews,
    ];

    /// Slots caller resources are registered into without the padding pass
    pub const REGISTERED_UNPADDED: [ResourceId; 7] = [
        ResourceId::InputColor,
        ResourceId::InputDepth,
        ResourceId::InputDepthTm1,
        ResourceId::InputMotionVectors,
        ResourceId::HistoryUpscaledColor,
        ResourceId::UpscaledOutput,
        ResourceId::DebugViews,
    ];

    /// Slots that hold per-dispatch registrations and are nulled after each frame
    pub fn registered_slots(has_padding_pass: bool) -> &'static [ResourceId] {
        if has_padding_pass { &Self::REGISTERED_PADDED } else { &Self::REGISTERED_UNPADDED }
    }

    /// Coefficient tensors in K0..K4 order
    pub const COEFFICIENTS: [ResourceId; 5] = [
        ResourceId::K0Tensor,
        ResourceId::K1Tensor,
        ResourceId::K2Tensor,
        ResourceId::K3Tensor,
        ResourceId::K4Tensor,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Which half of a ping-pong pair is the read side this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    /// Parity of a resource frame index
    pub fn of(frame_index: u32) -> Self {
        if frame_index & 1 == 1 { Parity::Odd } else { Parity::Even }
    }

    fn previous_slot(self) -> usize {
        match self {
            Parity::Even => 0,
            Parity::Odd => 1,
        }
    }
}

/// Two physical allocations backing one logical history resource
///
/// On every frame one slot is read as "previous" and the other written as
/// "current"; the roles swap with parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleBuffered<T> {
    slots: [T; 2],
}

impl<T: Copy> DoubleBuffered<T> {
    pub fn new(first: T, second: T) -> Self {
        Self { slots: [first, second] }
    }

    /// Slot read this frame
    pub fn previous(&self, parity: Parity) -> T {
        self.slots[parity.previous_slot()]
    }

    /// Slot written this frame
    pub fn current(&self, parity: Parity) -> T {
        self.slots[parity.previous_slot() ^ 1]
    }

    pub fn slots(&self) -> [T; 2] {
        self.slots
    }
}

/// Extra allocations that exist only while the padding pass is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingResources {
    pub color: InternalResource,
    pub depth: InternalResource,
    pub depth_tm1: InternalResource,
    pub motion_vectors: InternalResource,
    pub output: DoubleBuffered<InternalResource>,
}

/// Every resource the context allocates and must release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedResources {
    pub preprocess_input: InternalResource,
    pub luma_derivative: DoubleBuffered<InternalResource>,
    pub depth_offset: DoubleBuffered<InternalResource>,
    pub feedback: DoubleBuffered<InternalResource>,
    /// K0..K3 kernel coefficients followed by K4 temporal parameters
    pub coefficients: [InternalResource; 5],
    pub padding: Option<PaddingResources>,
}

/// Parameters that decide resource shapes and formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLayout {
    pub padded_input: Dimensions2D,
    pub padded_output: Dimensions2D,
    pub flags: ContextFlags,
    pub has_padding_pass: bool,
}

impl ResourceLayout {
    fn tensor_format(&self) -> SurfaceFormat {
        if self.flags.contains(ContextFlags::QUANTIZED) { SurfaceFormat::R8Sint } else { SurfaceFormat::R32Float }
    }

    fn network_output_flags(&self) -> ResourceFlags {
        if self.flags.contains(ContextFlags::READ_TENSORS_AS_IMAGES) { ResourceFlags::IMAGE_ALIASED } else { ResourceFlags::empty() }
    }
}

fn texture(name: &'static str, format: SurfaceFormat, size: Dimensions2D) -> CreateResourceDescription {
    CreateResourceDescription {
        name,
        description: ResourceDescription {
            resource_type: ResourceType::Texture2D,
            format,
            width: size.width,
            height: size.height,
            depth: 1,
            mip_count: 1,
            flags: ResourceFlags::empty(),
            usage: ResourceUsage::RENDER_TARGET | ResourceUsage::UAV,
            batch: 1,
            rank: 0,
        },
        initial_state: ResourceState::UnorderedAccess,
    }
}

fn tensor(name: &'static str, format: SurfaceFormat, size: Dimensions2D, channels: u32, flags: ResourceFlags) -> CreateResourceDescription {
    CreateResourceDescription {
        name,
        description: ResourceDescription {
            resource_type: ResourceType::Tensor,
            format,
            width: size.width,
            height: size.height,
            depth: channels,
            mip_count: 1,
            flags,
            usage: ResourceUsage::UAV,
            batch: 1,
            rank: TENSOR_RANK,
        },
        initial_state: ResourceState::UnorderedAccess,
    }
}

/// Creates resources and remembers them so a failed allocation can be undone
struct Allocator<'a, B: Backend> {
    backend: &'a mut B,
    context: EffectContextId,
    created: Vec<InternalResource>,
}

impl<B: Backend> Allocator<'_, B> {
    fn create(&mut self, description: CreateResourceDescription) -> Result<InternalResource> {
        let resource = self.backend.create_resource(self.context, &description)?;
        tracing::trace!(name = description.name, ?resource, "created resource");
        self.created.push(resource);
        Ok(resource)
    }

    fn pair(&mut self, first: CreateResourceDescription, second: CreateResourceDescription) -> Result<DoubleBuffered<InternalResource>> {
        Ok(DoubleBuffered::new(self.create(first)?, self.create(second)?))
    }

    fn rollback(self) {
        for resource in self.created {
            if let Err(error) = self.backend.destroy_resource(self.context, resource) {
                tracing::warn!(?resource, %error, "failed to release resource after allocation failure");
            }
        }
    }
}

impl OwnedResources {
    /// Allocates the full resource table for `layout`
    ///
    /// If any creation fails, everything created so far is released before the
    /// error is returned.
    pub fn allocate<B: Backend>(backend: &mut B, context: EffectContextId, layout: &ResourceLayout) -> Result<Self> {
        let mut allocator = Allocator {
            backend,
            context,
            created: Vec::new(),
        };
        match Self::allocate_with(&mut allocator, layout) {
            Ok(resources) => Ok(resources),
            Err(error) => {
                allocator.rollback();
                Err(error)
            }
        }
    }

    fn allocate_with<B: Backend>(allocator: &mut Allocator<'_, B>, layout: &ResourceLayout) -> Result<Self> {
        let input = layout.padded_input;
        let format = layout.tensor_format();
        let aliased = layout.network_output_flags();

        let preprocess_input = allocator.create(tensor(
            "NSS_PreprocessInputTensor",
            format,
            input,
            PREPROCESS_TENSOR_CHANNELS,
            ResourceFlags::empty(),
        ))?;
        let luma_derivative = allocator.pair(
            texture("NSS_LumaDeriv_1", SurfaceFormat::R8G8Unorm, input),
            texture("NSS_LumaDeriv_2", SurfaceFormat::R8G8Unorm, input),
        )?;
        let depth_offset = allocator.pair(
            texture("NSS_DepthOffset_1", SurfaceFormat::R8Unorm, input),
            texture("NSS_DepthOffset_2", SurfaceFormat::R8Unorm, input),
        )?;
        let feedback = allocator.pair(
            tensor("NSS_FeedbackTensor_1", format, input, FEEDBACK_TENSOR_CHANNELS, aliased),
            tensor("NSS_FeedbackTensor_2", format, input, FEEDBACK_TENSOR_CHANNELS, aliased),
        )?;

        const COEFFICIENT_NAMES: [&str; 5] = [
            "NSS_CoefficientsTensor_0",
            "NSS_CoefficientsTensor_1",
            "NSS_CoefficientsTensor_2",
            "NSS_CoefficientsTensor_3",
            "NSS_CoefficientsTensor_4",
        ];
        let mut coefficients = [InternalResource(0); 5];
        for (slot, name) in coefficients.iter_mut().zip(COEFFICIENT_NAMES) {
            *slot = allocator.create(tensor(name, format, input, COEFFICIENT_TENSOR_CHANNELS, aliased))?;
        }

        let padding = if layout.has_padding_pass {
            Some(PaddingResources {
                color: allocator.create(texture("NSS_padded_input_color_jittered", SurfaceFormat::R11G11B10Float, input))?,
                depth: allocator.create(texture("NSS_padded_input_depth", SurfaceFormat::R32Float, input))?,
                depth_tm1: allocator.create(texture("NSS_padded_input_depth_tm1", SurfaceFormat::R32Float, input))?,
                motion_vectors: allocator.create(texture("NSS_padded_input_motion_vectors", SurfaceFormat::R16G16Float, input))?,
                output: allocator.pair(
                    texture("NSS_padded_upscaled_color_1", SurfaceFormat::R11G11B10Float, layout.padded_output),
                    texture("NSS_padded_upscaled_color_2", SurfaceFormat::R11G11B10Float, layout.padded_output),
                )?,
            })
        } else {
            None
        };

        Ok(Self {
            preprocess_input,
            luma_derivative,
            depth_offset,
            feedback,
            coefficients,
            padding,
        })
    }

    /// Both slots of every history pair, in the order they are cleared on reset
    pub fn history_slots(&self) -> Vec<InternalResource> {
        let mut slots = Vec::with_capacity(8);
        slots.extend(self.luma_derivative.slots());
        slots.extend(self.depth_offset.slots());
        slots.extend(self.feedback.slots());
        if let Some(padding) = &self.padding {
            slots.extend(padding.output.slots());
        }
        slots
    }

    /// Every owned allocation
    pub fn all(&self) -> Vec<InternalResource> {
        let mut all = vec![self.preprocess_input];
        all.extend(self.luma_derivative.slots());
        all.extend(self.depth_offset.slots());
        all.extend(self.feedback.slots());
        all.extend(self.coefficients);
        if let Some(padding) = &self.padding {
            all.extend([padding.color, padding.depth, padding.depth_tm1, padding.motion_vectors]);
            all.extend(padding.output.slots());
        }
        all
    }

    /// Releases every allocation, continuing past failures and returning the first
    pub fn release<B: Backend>(&self, backend: &mut B, context: EffectContextId) -> Result<()> {
        let mut first_error = None;
        for resource in self.all() {
            if let Err(error) = backend.destroy_resource(context, resource) {
                tracing::warn!(?resource, %error, "failed to release resource");
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

/// The read and write slot tables jobs resolve their bindings against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTable {
    srv: [Option<InternalResource>; ResourceId::COUNT],
    uav: [Option<InternalResource>; ResourceId::COUNT],
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self {
            srv: [None; ResourceId::COUNT],
            uav: [None; ResourceId::COUNT],
        }
    }
}

impl ResourceTable {
    /// Binds the single-buffered owned resources into their fixed slots
    pub fn with_owned(owned: &OwnedResources) -> Self {
        let mut table = Self::default();
        table.bind(ResourceId::PreprocessInputTensor, owned.preprocess_input);
        for (id, resource) in ResourceId::COEFFICIENTS.into_iter().zip(owned.coefficients) {
            table.bind(id, resource);
        }
        if let Some(padding) = &owned.padding {
            table.bind(ResourceId::InputColor, padding.color);
            table.bind(ResourceId::InputDepth, padding.depth);
            table.bind(ResourceId::InputDepthTm1, padding.depth_tm1);
            table.bind(ResourceId::InputMotionVectors, padding.motion_vectors);
        }
        table
    }

    pub fn srv(&self, id: ResourceId) -> Option<InternalResource> {
        self.srv[id.index()]
    }

    pub fn uav(&self, id: ResourceId) -> Option<InternalResource> {
        self.uav[id.index()]
    }

    pub fn set_srv(&mut self, id: ResourceId, resource: InternalResource) {
        self.srv[id.index()] = Some(resource);
    }

    pub fn set_uav(&mut self, id: ResourceId, resource: InternalResource) {
        self.uav[id.index()] = Some(resource);
    }

    /// Binds the same allocation for reading and writing
    pub fn bind(&mut self, id: ResourceId, resource: InternalResource) {
        self.set_srv(id, resource);
        self.set_uav(id, resource);
    }

    /// Nulls a slot in both tables
    pub fn clear(&mut self, id: ResourceId) {
        self.srv[id.index()] = None;
        self.uav[id.index()] = None;
    }

    /// Drops every binding
    pub fn clear_all(&mut self) {
        *self = Self::default();
    }
}
