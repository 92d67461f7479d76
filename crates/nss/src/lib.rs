//! Neural temporal super-sampling for real-time rendering
//!
//! This crate orchestrates the NSS effect: a small kernel-prediction network
//! interleaved with compute passes that upscales a jittered low-resolution
//! frame using temporal history. All GPU work goes through a caller-provided
//! [`Backend`], so the core stays independent of any graphics API.

pub mod backend;
pub mod constants;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod jitter;
pub mod padding;
pub mod pipelines;
pub mod registry;
pub mod resources;
mod types;
pub mod validation;

pub use backend::{Backend, CommandList, DeviceCapabilities, EffectContextId, EntryPoints, ExternalResource, GpuJob, InternalResource};
pub use context::{ContextDescription, NssContext};
pub use dispatch::DispatchDescription;
pub use error::{BackendError, NssError, Result};
pub use jitter::{jitter_offset, jitter_offset_into, jitter_phase_count};
pub use registry::{NssProvider, Provider, ProviderRegistry, Query};
pub use types::{ContextFlags, Dimensions2D, DispatchFlags, FloatCoords2D, MessageCallback, MessageType, QualityMode};

/// Thread group edge length every compute pass is compiled for
pub const THREAD_GROUP_SIZE: u32 = 16;

/// Ping-pong window; must stay even so parity alternates across the wrap
pub const MAX_QUEUED_FRAMES: u32 = 16;

const _: () = assert!(MAX_QUEUED_FRAMES % 2 == 0);
