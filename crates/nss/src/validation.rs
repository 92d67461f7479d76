//! Advisory dispatch checks
//!
//! Run only when the context was created with
//! [`ContextFlags::ENABLE_DEBUG_CHECKING`](crate::ContextFlags::ENABLE_DEBUG_CHECKING).
//! Findings are reported to the caller and never abort the dispatch.

use crate::Dimensions2D;
use crate::dispatch::DispatchDescription;
use crate::padding::RESOURCE_ALIGNMENT;
use crate::types::{DispatchFlags, MessageType};

/// One finding of [`check_dispatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: MessageType,
    pub message: &'static str,
}

impl Diagnostic {
    const fn error(message: &'static str) -> Self {
        Self {
            severity: MessageType::Error,
            message,
        }
    }

    const fn warning(message: &'static str) -> Self {
        Self {
            severity: MessageType::Warning,
            message,
        }
    }
}

/// Context-side values the checks compare against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub max_render_size: Dimensions2D,
    pub max_upscale_size: Dimensions2D,
    pub padded_input: Dimensions2D,
}

/// Checks a dispatch for common integration mistakes
///
/// # Arguments
/// * `params` - The dispatch about to run
/// * `limits` - Sizes fixed when the context was created
///
/// # Returns
/// Every finding, in a fixed order: missing handles first, then range warnings
pub fn check_dispatch(params: &DispatchDescription, limits: &DispatchLimits) -> Vec<Diagnostic> {
    let mut findings = Vec::new();
    let mut check = |failed: bool, diagnostic: Diagnostic| {
        if failed {
            findings.push(diagnostic);
        }
    };

    check(params.command_list.is_none(), Diagnostic::error("commandList is null"));
    check(params.color.is_null(), Diagnostic::error("color resource is null"));
    check(params.depth.is_null(), Diagnostic::error("depth resource is null"));
    check(params.depth_tm1.is_null(), Diagnostic::error("depthTm1 resource is null"));
    check(params.motion_vectors.is_null(), Diagnostic::error("motionVectors resource is null"));
    check(params.output.is_null(), Diagnostic::error("output resource is null"));
    check(
        params.debug_views.is_null() && params.flags.contains(DispatchFlags::DRAW_DEBUG_VIEW),
        Diagnostic::error("debugViews resource is null"),
    );

    check(
        params.jitter_offset.x.abs() > 1.0 || params.jitter_offset.y.abs() > 1.0,
        Diagnostic::warning("jitterOffset contains value outside of expected range [-1.0, 1.0]"),
    );
    check(params.render_size.has_zero_dimension(), Diagnostic::warning("renderSize contains zero dimension"));
    check(
        params.render_size.width != 0 && params.upscale_size.width as f32 / params.render_size.width as f32 - 2.0 > f32::EPSILON,
        Diagnostic::warning("It's recommanded to use upscale ratio less than x2."),
    );
    check(
        params.render_size != limits.max_render_size,
        Diagnostic::warning("renderSize is different from context maxRenderSize"),
    );
    check(
        params.motion_vector_scale.x.abs() > limits.max_render_size.width as f32 || params.motion_vector_scale.y.abs() > limits.max_render_size.height as f32,
        Diagnostic::warning("motionVectorScale is greater than context maxRenderSize"),
    );
    check(params.upscale_size.has_zero_dimension(), Diagnostic::warning("upscaleSize contains zero dimension"));
    check(
        params.upscale_size != limits.max_upscale_size,
        Diagnostic::warning("upscaleSize is different from context maxUpscaleSize"),
    );
    check(
        limits.padded_input.width % RESOURCE_ALIGNMENT != 0 || limits.padded_input.height % RESOURCE_ALIGNMENT != 0,
        Diagnostic::warning("padded input size is not aligned to required alignment"),
    );

    findings
}
