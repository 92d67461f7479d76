//! Frame scenarios: YAML-described dispatch sequences replayed on the recording backend
//!
//! A scenario names a context configuration and a list of frames. Running it
//! creates a context over a [`RecordingBackend`], dispatches every frame,
//! destroys the context and reports what the backend was asked to do.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use nss::backend::{DeviceCapabilities, ResourceDescription, ResourceType, SurfaceFormat};
use nss::constants::Precision;
use nss::pipelines::PermutationFlags;
use nss::{
    CommandList, ContextDescription, ContextFlags, Dimensions2D, DispatchDescription, DispatchFlags, ExternalResource, FloatCoords2D, MessageType,
    NssContext, NssError, QualityMode, jitter_offset, jitter_phase_count,
};
use serde::Deserialize;

use crate::recording_backend::{RecordingBackend, RecordingHandle};

/// Errors raised while loading or running a scenario
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse scenario: {0}")]
    Yaml(#[from] serde_norway::Error),

    #[error("unknown context flag '{0}'")]
    UnknownFlag(String),

    #[error("unknown quality mode '{0}'")]
    UnknownQuality(String),

    #[error(transparent)]
    Nss(#[from] NssError),
}

/// Device the recording backend reports
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DeviceSpec {
    pub tensors: bool,
    pub data_graphs: bool,
    pub fp16: bool,
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self {
            tensors: true,
            data_graphs: true,
            fp16: false,
        }
    }
}

impl DeviceSpec {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            tensor_supported: self.tensors,
            data_graph_supported: self.data_graphs,
            fp16_supported: self.fp16,
            ..RecordingBackend::neural_device()
        }
    }
}

/// Camera values shared by every frame
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CameraSpec {
    pub near: f32,
    pub far: f32,
    /// Vertical field of view in radians
    pub fov_vertical: f32,
    pub exposure: f32,
}

impl Default for CameraSpec {
    fn default() -> Self {
        Self {
            near: 0.1,
            far: 1000.0,
            fov_vertical: 1.0,
            exposure: 1.0,
        }
    }
}

/// One dispatched frame
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FrameSpec {
    pub reset: bool,
    /// Explicit jitter; the Halton sequence is used when absent
    pub jitter: Option<[f32; 2]>,
    pub debug_view: bool,
    /// Overrides the render size, to exercise the size contract
    pub render_size: Option<[u32; 2]>,
    #[serde(rename = "frame_time_delta_ms")]
    pub frame_time_delta: Option<f32>,
    /// Replaces the scenario camera for this frame only
    pub camera: Option<CameraSpec>,
}

/// A replayable sequence of dispatches
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    /// Context flag names, e.g. `QUANTIZED` or `enable_debug_checking`
    #[serde(default)]
    pub flags: Vec<String>,
    pub max_render_size: [u32; 2],
    pub max_upscale_size: [u32; 2],
    #[serde(default)]
    pub device: DeviceSpec,
    #[serde(default)]
    pub camera: CameraSpec,
    pub frames: Vec<FrameSpec>,
}

fn default_quality() -> String {
    QualityMode::default().name().to_string()
}

/// Outcome of one frame
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// Ping-pong position the frame was dispatched at
    pub frame_index: u32,
    pub jitter: FloatCoords2D,
    pub result: Result<(), NssError>,
    /// Labels of the jobs the backend executed for this frame
    pub jobs: Vec<&'static str>,
}

/// Everything observed while running a scenario
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub padded_input: Dimensions2D,
    pub padded_output: Dimensions2D,
    pub has_padding_pass: bool,
    pub permutation: PermutationFlags,
    pub precision: Precision,
    pub frames: Vec<FrameReport>,
    pub messages: Vec<(MessageType, String)>,
    /// No context, resource or pipeline outlived the scenario
    pub clean: bool,
}

impl ScenarioReport {
    pub fn failed_frames(&self) -> usize {
        self.frames.iter().filter(|frame| frame.result.is_err()).count()
    }
}

/// Parses `flags` into a flag set, accepting any letter case
pub fn parse_context_flags(flags: &[String]) -> Result<ContextFlags, ScenarioError> {
    flags.iter().try_fold(ContextFlags::empty(), |acc, name| {
        ContextFlags::from_name(&name.to_ascii_uppercase())
            .map(|flag| acc | flag)
            .ok_or_else(|| ScenarioError::UnknownFlag(name.clone()))
    })
}

fn dimensions([width, height]: [u32; 2]) -> Dimensions2D {
    Dimensions2D::new(width, height)
}

fn texture(raw: u64, size: Dimensions2D, format: SurfaceFormat) -> ExternalResource {
    ExternalResource::new(
        raw,
        ResourceDescription {
            resource_type: ResourceType::Texture2D,
            format,
            width: size.width,
            height: size.height,
            depth: 1,
            mip_count: 1,
            ..Default::default()
        },
    )
}

impl Scenario {
    /// Parses a scenario from YAML
    pub fn from_yaml(yaml_content: &str) -> Result<Self, serde_norway::Error> {
        serde_norway::from_str(yaml_content)
    }

    /// Reads and parses a scenario file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }

    fn quality_mode(&self) -> Result<QualityMode, ScenarioError> {
        QualityMode::from_name(&self.quality).ok_or_else(|| ScenarioError::UnknownQuality(self.quality.clone()))
    }

    /// Builds the dispatch of frame `index`
    ///
    /// Caller resources get stable fake handles so registrations can be told
    /// apart in the recording.
    fn dispatch_description(&self, index: usize, frame: &FrameSpec, jitter: FloatCoords2D) -> DispatchDescription {
        let render_size = frame.render_size.map(dimensions).unwrap_or(dimensions(self.max_render_size));
        let upscale_size = dimensions(self.max_upscale_size);
        let flags = if frame.debug_view { DispatchFlags::DRAW_DEBUG_VIEW } else { DispatchFlags::empty() };
        let camera = frame.camera.unwrap_or(self.camera);

        DispatchDescription {
            command_list: CommandList::from_raw(0xC0DE + index as u64),
            color: texture(0x100, render_size, SurfaceFormat::R11G11B10Float),
            depth: texture(0x101, render_size, SurfaceFormat::R32Float),
            depth_tm1: texture(0x102, render_size, SurfaceFormat::R32Float),
            motion_vectors: texture(0x103, render_size, SurfaceFormat::R16G16Float),
            output: texture(0x104, upscale_size, SurfaceFormat::R11G11B10Float),
            output_tm1: texture(0x105, upscale_size, SurfaceFormat::R11G11B10Float),
            debug_views: texture(0x106, upscale_size, SurfaceFormat::R8G8B8A8Unorm),
            jitter_offset: jitter,
            render_size,
            upscale_size,
            camera_near: camera.near,
            camera_far: camera.far,
            camera_fov_angle_vertical: camera.fov_vertical,
            exposure: camera.exposure,
            motion_vector_scale: FloatCoords2D::new(render_size.width as f32, render_size.height as f32),
            frame_time_delta: frame.frame_time_delta.unwrap_or(16.6),
            reset: frame.reset,
            flags,
        }
    }

    /// Runs the scenario on a fresh recording backend
    pub fn run(&self) -> Result<ScenarioReport, ScenarioError> {
        self.run_with(RecordingBackend::new(self.device.capabilities())).map(|(report, _)| report)
    }

    /// Runs the scenario on `backend`, returning the report and the backend's recording
    ///
    /// Frames that fail are recorded in the report; only context creation and
    /// destruction errors abort the run.
    pub fn run_with(&self, backend: RecordingBackend) -> Result<(ScenarioReport, RecordingHandle), ScenarioError> {
        let flags = parse_context_flags(&self.flags)?;
        let quality = self.quality_mode()?;
        let recording = backend.handle();

        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let description = ContextDescription::new(backend, dimensions(self.max_render_size), dimensions(self.max_upscale_size))
            .with_quality(quality)
            .with_flags(flags)
            .with_message_callback(move |severity, message| {
                sink.lock().unwrap_or_else(PoisonError::into_inner).push((severity, message.to_string()));
            });
        let mut context = NssContext::new(description)?;

        let phase_count = jitter_phase_count(self.max_render_size[0], self.max_upscale_size[0]);
        let mut frames = Vec::with_capacity(self.frames.len());
        for (index, frame) in self.frames.iter().enumerate() {
            let jitter = match frame.jitter {
                Some([x, y]) => FloatCoords2D::new(x, y),
                None => {
                    let (x, y) = jitter_offset(index as i32, phase_count)?;
                    FloatCoords2D::new(x, y)
                }
            };
            let frame_index = context.frame_index();
            let executed_before = recording.lock().executed_frames.len();

            let result = context.dispatch(&self.dispatch_description(index, frame, jitter));
            if let Err(error) = &result {
                tracing::warn!(scenario = %self.name, frame = index, %error, "dispatch failed");
            }

            let jobs = {
                let recording = recording.lock();
                recording.executed_frames.get(executed_before).map(|jobs| jobs.iter().map(|job| job.label()).collect()).unwrap_or_default()
            };
            frames.push(FrameReport {
                frame_index,
                jitter,
                result,
                jobs,
            });
        }

        let padded = context.padded_resolution();
        let has_padding_pass = context.has_padding_pass();
        let permutation = context.permutation();
        let precision = context.precision();
        context.destroy()?;
        drop(context);

        let messages = std::mem::take(&mut *messages.lock().unwrap_or_else(PoisonError::into_inner));
        let clean = recording.lock().is_clean();
        let report = ScenarioReport {
            name: self.name.clone(),
            padded_input: padded.input,
            padded_output: padded.output,
            has_padding_pass,
            permutation,
            precision,
            frames,
            messages,
            clean,
        };
        Ok((report, recording))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: minimal
max_render_size: [1280, 720]
max_upscale_size: [1920, 1080]
frames:
  - reset: true
  - {}
"#;

    #[test]
    fn test_minimal_scenario_defaults() {
        let scenario = Scenario::from_yaml(MINIMAL).unwrap();
        assert_eq!(scenario.quality, "balanced");
        assert!(scenario.flags.is_empty());
        assert!(scenario.device.tensors && scenario.device.data_graphs && !scenario.device.fp16);
        assert_eq!(scenario.frames.len(), 2);
        assert!(scenario.frames[0].reset);
        assert!(scenario.frames[1].jitter.is_none());
    }

    #[test]
    fn test_flag_names_are_case_insensitive() {
        let flags = parse_context_flags(&["quantized".into(), "ENABLE_DEBUG_CHECKING".into()]).unwrap();
        assert_eq!(flags, ContextFlags::QUANTIZED | ContextFlags::ENABLE_DEBUG_CHECKING);
        assert!(matches!(parse_context_flags(&["turbo".into()]), Err(ScenarioError::UnknownFlag(name)) if name == "turbo"));
    }

    #[test]
    fn test_unknown_quality_is_rejected() {
        let mut scenario = Scenario::from_yaml(MINIMAL).unwrap();
        scenario.quality = "ultra".into();
        assert!(matches!(scenario.run(), Err(ScenarioError::UnknownQuality(_))));
    }

    #[test]
    fn test_minimal_scenario_runs_clean() {
        let report = Scenario::from_yaml(MINIMAL).unwrap().run().unwrap();
        assert_eq!(report.failed_frames(), 0);
        assert_eq!(report.frames[0].frame_index, 0);
        assert_eq!(report.frames[1].frame_index, 1);
        assert!(report.clean);
    }

    #[test]
    fn test_halton_jitter_is_used_when_absent() {
        let report = Scenario::from_yaml(MINIMAL).unwrap().run().unwrap();
        let (x, y) = jitter_offset(1, jitter_phase_count(1280, 1920)).unwrap();
        assert_eq!(report.frames[1].jitter, FloatCoords2D::new(x, y));
    }
}
