//! Plain value types shared by the context, the orchestrator and backends
//!
//! Sizes, coordinates, quality modes, the creation/dispatch flag sets and the
//! caller's message sink.

use std::fmt;
use std::sync::Arc;

/// A width/height pair in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions2D {
    pub width: u32,
    pub height: u32,
}

impl Dimensions2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if either dimension is zero
    pub fn has_zero_dimension(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of 16x16 thread groups needed to cover this extent
    pub fn thread_groups(&self) -> [u32; 3] {
        [self.width.div_ceil(crate::THREAD_GROUP_SIZE), self.height.div_ceil(crate::THREAD_GROUP_SIZE), 1]
    }
}

impl fmt::Display for Dimensions2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A 2D floating point coordinate
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FloatCoords2D {
    pub x: f32,
    pub y: f32,
}

impl FloatCoords2D {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Shader quality modes
///
/// The mode is recorded on the context; every mode currently runs the same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum QualityMode {
    Quality = 1,
    #[default]
    Balanced = 2,
    Performance = 3,
}

impl QualityMode {
    /// Human-readable name for logging and scenario files
    pub fn name(&self) -> &'static str {
        match self {
            QualityMode::Quality => "quality",
            QualityMode::Balanced => "balanced",
            QualityMode::Performance => "performance",
        }
    }

    /// Looks a mode up by its [`QualityMode::name`]
    pub fn from_name(name: &str) -> Option<Self> {
        [QualityMode::Quality, QualityMode::Balanced, QualityMode::Performance]
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(name))
    }
}

bitflags::bitflags! {
    /// Flags fixed at context creation
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct ContextFlags: u32 {
        /// Run the quantized (8-bit) network; tensors use `R8_SINT`
        const QUANTIZED = 1 << 0;
        /// Input color is high dynamic range
        const HIGH_DYNAMIC_RANGE = 1 << 1;
        /// Depth is stored inverted, 1 at the near plane
        const DEPTH_INVERTED = 1 << 2;
        /// Projection uses an infinite far plane
        const DEPTH_INFINITE = 1 << 3;
        /// Resample history with a bicubic filter
        const RESAMPLE_BICUBIC = 1 << 4;
        /// Read network outputs through image aliases of the tensors
        const READ_TENSORS_AS_IMAGES = 1 << 5;
        /// Use 16-bit arithmetic where the device supports it
        const ALLOW_16BIT = 1 << 6;
        /// Never insert the mirror padding pass
        const DISABLE_PADDING = 1 << 7;
        /// Validate dispatch parameters and report through the message callback
        const ENABLE_DEBUG_CHECKING = 1 << 8;
    }
}

bitflags::bitflags! {
    /// Per-dispatch flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct DispatchFlags: u32 {
        /// Compose the 4x3 debug grid into the caller's debug target
        const DRAW_DEBUG_VIEW = 1 << 0;
    }
}

/// Severity of a message delivered to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Error,
    Warning,
}

/// Caller-supplied sink for diagnostics
pub type MessageCallback = Arc<dyn Fn(MessageType, &str) + Send + Sync>;
