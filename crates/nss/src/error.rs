//! Error types for context creation, dispatch and backend propagation
//!
//! Every failure the core can report maps onto a stable numeric code via
//! [`NssError::code`], so callers bridging to a C ABI never parse strings.

/// Errors reported by a [`crate::Backend`] implementation.
///
/// The core never recovers from these; they are wrapped in [`NssError::Backend`]
/// and returned to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend ran out of memory while creating {0}")]
    OutOfMemory(String),

    #[error("backend failed to create resource {0}")]
    ResourceCreation(String),

    #[error("backend failed to create pipeline {0}")]
    PipelineCreation(String),

    #[error("backend does not know effect context {0}")]
    UnknownContext(u32),

    #[error("backend API error: {0}")]
    Api(String),
}

/// All errors originating from the NSS core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NssError {
    /// A handle the call depends on is null or already released
    #[error("a required handle is null")]
    InvalidPointer,

    #[error("backend interface is missing required entry points: {0}")]
    IncompleteInterface(String),

    #[error("context size has a zero dimension: {0}")]
    InvalidAlignment(&'static str),

    /// The device cannot run the network
    #[error("device does not support tensors and data graphs")]
    NullDevice,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("{what} {actual} does not match context maximum {expected}")]
    OutOfRange {
        what: &'static str,
        expected: crate::Dimensions2D,
        actual: crate::Dimensions2D,
    },

    /// A compiled pipeline reflects a binding with no resource slot
    #[error("pipeline {pipeline} declares unknown binding {name}")]
    UnknownBinding { pipeline: String, name: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl NssError {
    /// Returns the stable error code for this error.
    ///
    /// Codes follow the historical SDK table; an unknown binding is reported
    /// with the invalid-argument code, as the binding patcher always did.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidPointer => 0x8000_0000,
            Self::InvalidAlignment(_) => 0x8000_0001,
            Self::IncompleteInterface(_) => 0x8000_0008,
            Self::InvalidArgument(_) | Self::UnknownBinding { .. } => 0x8000_000a,
            Self::OutOfRange { .. } => 0x8000_000b,
            Self::NullDevice => 0x8000_000c,
            Self::Backend(BackendError::OutOfMemory(_)) => 0x8000_0007,
            Self::Backend(_) => 0x8000_000d,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NssError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dimensions2D;

    #[test]
    fn test_codes_are_distinct_per_category() {
        let errors = [
            NssError::InvalidPointer,
            NssError::InvalidAlignment("max render width"),
            NssError::IncompleteInterface("schedule_gpu_job".into()),
            NssError::InvalidArgument("render size"),
            NssError::OutOfRange {
                what: "render size",
                expected: Dimensions2D::new(960, 540),
                actual: Dimensions2D::new(1280, 720),
            },
            NssError::NullDevice,
            NssError::Backend(BackendError::Api("lost".into())),
        ];

        let mut codes: Vec<u32> = errors.iter().map(NssError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_unknown_binding_reports_invalid_argument_code() {
        let error = NssError::UnknownBinding {
            pipeline: "NSS-Preprocess".into(),
            name: "r_mystery".into(),
        };
        assert_eq!(error.code(), NssError::InvalidArgument("").code());
        assert_eq!(error.to_string(), "pipeline NSS-Preprocess declares unknown binding r_mystery");
    }

    #[test]
    fn test_backend_errors_convert_transparently() {
        let error: NssError = BackendError::PipelineCreation("NSS-Graph".into()).into();
        assert_eq!(error.to_string(), "backend failed to create pipeline NSS-Graph");
        assert_eq!(error.code(), 0x8000_000d);
    }
}
