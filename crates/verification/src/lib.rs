//! Verification utilities for the NSS orchestrator
//!
//! This crate provides a recording backend that stands in for a GPU, the
//! binding layouts the NSS passes reflect, and YAML frame scenarios that
//! replay dispatch sequences against both.

pub mod pass_layouts;
pub mod recording_backend;
pub mod scenario;

pub use recording_backend::{BackendCall, FailureInjection, Recording, RecordingBackend, RecordingHandle};
pub use scenario::{FrameReport, Scenario, ScenarioError, ScenarioReport};
