//! Context lifecycle and frame orchestration against the recording backend

use std::sync::{Arc, Mutex};

use nss::backend::{BoundResource, ComputeJob, CopyMode, DataGraphJob, EntryPoints, ResourceDescription};
use nss::constants::{CONSTANT_BLOCK_SIZE, Precision};
use nss::pipelines::PermutationFlags;
use nss::resources::{Parity, ResourceId};
use nss::{
    BackendError, CommandList, ContextDescription, ContextFlags, Dimensions2D, DispatchDescription, DispatchFlags, ExternalResource, FloatCoords2D,
    GpuJob, InternalResource, MessageType, NssContext, NssError,
};
use nss_verification::{BackendCall, FailureInjection, RecordingBackend, RecordingHandle};

const RENDER_540P: Dimensions2D = Dimensions2D::new(960, 540);
const RENDER_720P: Dimensions2D = Dimensions2D::new(1280, 720);
const UPSCALE_1080P: Dimensions2D = Dimensions2D::new(1920, 1080);

const OUTPUT: u64 = 0x104;
const DEBUG_VIEWS: u64 = 0x106;

type Messages = Arc<Mutex<Vec<(MessageType, String)>>>;

fn create(backend: RecordingBackend, render: Dimensions2D, flags: ContextFlags) -> (NssContext<RecordingBackend>, RecordingHandle, Messages) {
    let recording = backend.handle();
    let messages: Messages = Arc::default();
    let sink = Arc::clone(&messages);
    let description = ContextDescription::new(backend, render, UPSCALE_1080P)
        .with_flags(flags)
        .with_message_callback(move |severity, message| sink.lock().unwrap().push((severity, message.to_string())));
    let context = NssContext::new(description).unwrap();
    (context, recording, messages)
}

fn padded_context() -> (NssContext<RecordingBackend>, RecordingHandle) {
    let (context, recording, _) = create(RecordingBackend::default(), RENDER_540P, ContextFlags::empty());
    assert!(context.has_padding_pass());
    (context, recording)
}

fn unpadded_context() -> (NssContext<RecordingBackend>, RecordingHandle) {
    let (context, recording, _) = create(RecordingBackend::default(), RENDER_720P, ContextFlags::empty());
    assert!(!context.has_padding_pass());
    (context, recording)
}

fn frame(render: Dimensions2D) -> DispatchDescription {
    let resource = |raw| ExternalResource::new(raw, ResourceDescription::default());
    DispatchDescription {
        command_list: CommandList::from_raw(1),
        color: resource(0x100),
        depth: resource(0x101),
        depth_tm1: resource(0x102),
        motion_vectors: resource(0x103),
        output: resource(OUTPUT),
        output_tm1: resource(0x105),
        debug_views: resource(DEBUG_VIEWS),
        render_size: render,
        upscale_size: UPSCALE_1080P,
        camera_near: 0.1,
        camera_far: 100.0,
        camera_fov_angle_vertical: 1.0,
        exposure: 1.0,
        motion_vector_scale: FloatCoords2D::new(render.width as f32, render.height as f32),
        frame_time_delta: 16.6,
        ..Default::default()
    }
}

fn compute<'a>(jobs: &'a [GpuJob], label: &str) -> &'a ComputeJob {
    jobs.iter()
        .find_map(|job| match job {
            GpuJob::Compute(compute) if compute.label == label => Some(compute),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no {label} job"))
}

fn data_graph(jobs: &[GpuJob]) -> &DataGraphJob {
    jobs.iter()
        .find_map(|job| match job {
            GpuJob::DataGraph(graph) => Some(graph),
            _ => None,
        })
        .unwrap()
}

fn bound(bindings: &[BoundResource], name: &str) -> InternalResource {
    bindings.iter().find(|binding| binding.name == name).unwrap_or_else(|| panic!("no binding {name}")).resource
}

fn clear_targets(jobs: &[GpuJob]) -> Vec<InternalResource> {
    jobs.iter()
        .filter_map(|job| match job {
            GpuJob::Clear(clear) => Some(clear.target),
            _ => None,
        })
        .collect()
}

#[test]
fn test_incomplete_interface_touches_nothing() {
    let backend = RecordingBackend::default().with_entry_points(EntryPoints::all() - EntryPoints::SCHEDULE_GPU_JOB);
    let recording = backend.handle();

    let error = NssContext::new(ContextDescription::new(backend, RENDER_540P, UPSCALE_1080P)).err().unwrap();
    assert!(matches!(&error, NssError::IncompleteInterface(missing) if missing.contains("SCHEDULE_GPU_JOB")));
    assert!(recording.snapshot().calls.is_empty());
}

#[test]
fn test_zero_maximum_size_is_invalid_alignment() {
    let backend = RecordingBackend::default();
    let recording = backend.handle();

    let error = NssContext::new(ContextDescription::new(backend, Dimensions2D::new(0, 540), UPSCALE_1080P)).err().unwrap();
    assert_eq!(error, NssError::InvalidAlignment("maxRenderSize"));

    let error = NssContext::new(ContextDescription::new(RecordingBackend::default(), RENDER_540P, Dimensions2D::new(1920, 0))).err().unwrap();
    assert_eq!(error, NssError::InvalidAlignment("maxUpscaleSize"));
    assert!(recording.snapshot().calls.is_empty());
}

#[test]
fn test_device_without_data_graphs_is_rejected() {
    let backend = RecordingBackend::new(nss::DeviceCapabilities {
        data_graph_supported: false,
        ..RecordingBackend::neural_device()
    });
    let recording = backend.handle();
    let messages: Messages = Arc::default();
    let sink = Arc::clone(&messages);
    let description = ContextDescription::new(backend, RENDER_540P, UPSCALE_1080P)
        .with_message_callback(move |severity, message| sink.lock().unwrap().push((severity, message.to_string())));

    assert_eq!(NssContext::new(description).err(), Some(NssError::NullDevice));
    let recording = recording.snapshot();
    assert!(recording.is_clean());
    assert_eq!(recording.count(|call| matches!(call, BackendCall::CreateResource(_))), 0);
    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, MessageType::Error);
}

#[test]
fn test_size_mismatch_schedules_nothing() {
    let (mut context, recording) = padded_context();

    let error = context.dispatch(&frame(RENDER_720P)).unwrap_err();
    assert_eq!(
        error,
        NssError::OutOfRange {
            what: "renderSize",
            expected: RENDER_540P,
            actual: RENDER_720P,
        }
    );

    let mut params = frame(RENDER_540P);
    params.upscale_size = Dimensions2D::new(2560, 1440);
    assert!(matches!(context.dispatch(&params), Err(NssError::OutOfRange { what: "upscaleSize", .. })));

    let mut params = frame(RENDER_540P);
    params.render_size = Dimensions2D::new(960, 0);
    assert!(matches!(context.dispatch(&params), Err(NssError::InvalidArgument(_))));

    let recording = recording.snapshot();
    assert_eq!(recording.count(|call| matches!(call, BackendCall::RegisterResource | BackendCall::ScheduleGpuJob(_))), 0);
    assert_eq!(context.frame_index(), 0);
}

#[test]
fn test_first_frame_clears_every_history_slot_before_compute() {
    let (mut context, recording) = padded_context();
    context.dispatch(&frame(RENDER_540P)).unwrap();

    let recording = recording.snapshot();
    assert_eq!(
        recording.frame_labels(0),
        vec![
            "Clear",
            "Clear",
            "Clear",
            "Clear",
            "Clear",
            "Clear",
            "Clear",
            "Clear",
            "MirrorPadding",
            "Preprocess",
            "DataGraph",
            "Postprocess",
            "Copy"
        ]
    );
    assert_eq!(clear_targets(&recording.executed_frames[0]), context.owned_resources().history_slots());
}

#[test]
fn test_history_is_cleared_only_on_first_frame_and_reset() {
    let (mut context, recording) = unpadded_context();
    let mut params = frame(RENDER_720P);
    context.dispatch(&params).unwrap();
    context.dispatch(&params).unwrap();
    params.reset = true;
    context.dispatch(&params).unwrap();

    let recording = recording.snapshot();
    let clears: Vec<_> = recording.executed_frames.iter().map(|jobs| clear_targets(jobs).len()).collect();
    assert_eq!(clears, vec![6, 0, 6]);
    assert_eq!(recording.frame_labels(1), vec!["Preprocess", "DataGraph", "Postprocess"]);
}

#[test]
fn test_history_written_this_frame_is_read_next_frame() {
    let (mut context, recording) = padded_context();
    context.dispatch(&frame(RENDER_540P)).unwrap();
    context.dispatch(&frame(RENDER_540P)).unwrap();

    let recording = recording.snapshot();
    let (first, second) = (&recording.executed_frames[0], &recording.executed_frames[1]);

    let written = compute(first, "Preprocess");
    let read = compute(second, "Preprocess");
    assert_eq!(bound(&written.uav_textures, "rw_luma_deriv"), bound(&read.srv_textures, "r_prev_luma_deriv"));
    assert_eq!(
        bound(&written.uav_textures, "rw_nearest_depth_coord_out"),
        bound(&read.srv_textures, "r_input_nearest_depth_coord_tm1")
    );
    assert_eq!(bound(&data_graph(first).uav_tensors, "Resource_1_output"), bound(&read.srv_tensors, "r_prev_feedback_tensor"));
    assert_eq!(
        bound(&compute(first, "Postprocess").uav_textures, "rw_upscaled_output"),
        bound(&read.srv_textures, "r_prev_upscaled_color")
    );

    // Read and write halves never alias within a frame
    assert_ne!(bound(&read.uav_textures, "rw_luma_deriv"), bound(&read.srv_textures, "r_prev_luma_deriv"));

    let luma = context.owned_resources().luma_derivative;
    assert_eq!(bound(&written.uav_textures, "rw_luma_deriv"), luma.current(Parity::Even));
    assert_eq!(bound(&read.uav_textures, "rw_luma_deriv"), luma.current(Parity::Odd));
}

#[test]
fn test_padding_pass_for_unaligned_render_size() {
    let (mut context, recording) = padded_context();
    assert_eq!(context.padded_resolution().input, Dimensions2D::new(960, 544));
    assert_eq!(context.padded_resolution().output, Dimensions2D::new(1920, 1088));
    context.dispatch(&frame(RENDER_540P)).unwrap();

    let recording = recording.snapshot();
    assert_eq!(recording.data_graph_extent, Some((960, 544)));

    let jobs = &recording.executed_frames[0];
    assert_eq!(compute(jobs, "MirrorPadding").dimensions, [60, 34, 1]);
    assert_eq!(compute(jobs, "Preprocess").dimensions, [60, 34, 1]);
    assert_eq!(compute(jobs, "Postprocess").dimensions, [120, 68, 1]);
    assert!(!recording.frame_labels(0).contains(&"DebugView"));

    let Some(GpuJob::Copy(copy)) = jobs.last() else {
        panic!("frame must end with the crop copy");
    };
    let padding = context.owned_resources().padding.unwrap();
    assert_eq!(copy.src, padding.output.current(Parity::Even));
    assert_eq!(Some(copy.dst), recording.registration_of(OUTPUT));
    assert_eq!(copy.mode, CopyMode::DestinationExtent);

    // Mirror padding fills the owned padded inputs that preprocess reads
    let mirror = compute(jobs, "MirrorPadding");
    assert_eq!(bound(&mirror.uav_textures, "rw_input_color_jittered"), padding.color);
    assert_eq!(bound(&compute(jobs, "Preprocess").srv_textures, "r_input_color_jittered"), padding.color);
}

#[test]
fn test_registrations_are_released_after_each_frame() {
    let (mut context, recording) = padded_context();
    context.dispatch(&frame(RENDER_540P)).unwrap();

    let snapshot = recording.snapshot();
    assert_eq!(snapshot.count(|call| *call == BackendCall::RegisterResource), 5);
    assert_eq!(snapshot.count(|call| *call == BackendCall::UnregisterResources), 1);
    assert!(snapshot.registered.is_empty());

    let table = context.resource_table();
    assert_eq!(table.srv(ResourceId::UnpaddedColor), None);
    assert_eq!(table.uav(ResourceId::UnpaddedOutput), None);
    // Owned padded inputs stay bound
    assert_eq!(table.srv(ResourceId::InputColor), Some(context.owned_resources().padding.unwrap().color));

    let (mut context, recording) = unpadded_context();
    context.dispatch(&frame(RENDER_720P)).unwrap();
    assert_eq!(recording.snapshot().count(|call| *call == BackendCall::RegisterResource), 6);
    assert_eq!(context.resource_table().srv(ResourceId::HistoryUpscaledColor), None);
}

#[test]
fn test_history_input_required_only_without_padding() {
    let mut params = frame(RENDER_720P);
    params.output_tm1 = ExternalResource::null();
    let (mut context, recording) = unpadded_context();
    assert_eq!(context.dispatch(&params), Err(NssError::InvalidPointer));
    assert_eq!(recording.snapshot().count(|call| matches!(call, BackendCall::ScheduleGpuJob(_))), 0);

    let mut params = frame(RENDER_540P);
    params.output_tm1 = ExternalResource::null();
    let (mut context, _) = padded_context();
    assert_eq!(context.dispatch(&params), Ok(()));
}

#[test]
fn test_missing_command_list_is_invalid_pointer() {
    let (mut context, _) = padded_context();
    let mut params = frame(RENDER_540P);
    params.command_list = None;
    assert_eq!(context.dispatch(&params), Err(NssError::InvalidPointer));
}

#[test]
fn test_exact_2x_selects_preset_permutation() {
    let (context, recording) = padded_context();
    assert!(context.permutation().contains(PermutationFlags::SCALE_PRESET_X2));
    let requests = recording.snapshot().pipeline_requests;
    assert_eq!(requests.len(), 5);
    assert!(requests.iter().all(|request| request.permutation.contains(PermutationFlags::SCALE_PRESET_X2)));

    let (context, recording) = unpadded_context();
    assert!(!context.permutation().contains(PermutationFlags::SCALE_PRESET_X2));
    assert_eq!(recording.snapshot().pipeline_requests.len(), 4);
}

#[test]
fn test_unsupported_16bit_falls_back_with_warning() {
    let (mut context, recording, messages) = create(RecordingBackend::default(), RENDER_720P, ContextFlags::ALLOW_16BIT);
    assert_eq!(context.precision(), Precision::Full);
    assert!(!context.permutation().contains(PermutationFlags::ALLOW_16BIT));
    assert_eq!(
        *messages.lock().unwrap(),
        vec![(MessageType::Warning, "16-bit resources requested but not supported by the device.".to_string())]
    );

    context.dispatch(&frame(RENDER_720P)).unwrap();
    let staged = recording.snapshot().staged_constants;
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].len(), CONSTANT_BLOCK_SIZE);
}

#[test]
fn test_supported_16bit_selects_half_precision() {
    let backend = RecordingBackend::new(nss::DeviceCapabilities {
        fp16_supported: true,
        ..RecordingBackend::neural_device()
    });
    let (context, _, messages) = create(backend, RENDER_720P, ContextFlags::ALLOW_16BIT);
    assert_eq!(context.precision(), Precision::Half);
    assert!(context.permutation().contains(PermutationFlags::ALLOW_16BIT));
    assert!(messages.lock().unwrap().is_empty());
}

#[test]
fn test_debug_view_runs_last_over_render_grid() {
    let (mut context, recording) = padded_context();
    let mut params = frame(RENDER_540P);
    params.flags = DispatchFlags::DRAW_DEBUG_VIEW;
    context.dispatch(&params).unwrap();

    let recording = recording.snapshot();
    let labels = recording.frame_labels(0);
    assert_eq!(&labels[labels.len() - 3..], ["Postprocess", "Copy", "DebugView"]);

    let jobs = &recording.executed_frames[0];
    let debug_target = recording.registration_of(DEBUG_VIEWS).unwrap();
    let clears = clear_targets(jobs);
    assert_eq!(clears.len(), 9);
    assert_eq!(clears.last(), Some(&debug_target));

    let debug_view = compute(jobs, "DebugView");
    assert_eq!(debug_view.dimensions, [60, 34, 1]);
    assert_eq!(bound(&debug_view.uav_textures, "rw_debug_views"), debug_target);
}

#[test]
fn test_debug_view_without_target_is_invalid_pointer() {
    let (mut context, recording) = padded_context();
    let mut params = frame(RENDER_540P);
    params.flags = DispatchFlags::DRAW_DEBUG_VIEW;
    params.debug_views = ExternalResource::null();
    assert_eq!(context.dispatch(&params), Err(NssError::InvalidPointer));
    assert!(recording.snapshot().executed_frames.is_empty());
}

#[test]
fn test_debug_checking_reports_without_failing() {
    let (mut context, _, messages) = create(RecordingBackend::default(), RENDER_540P, ContextFlags::ENABLE_DEBUG_CHECKING);
    let mut params = frame(RENDER_540P);
    params.jitter_offset = FloatCoords2D::new(2.0, 0.0);
    context.dispatch(&params).unwrap();

    let messages = messages.lock().unwrap();
    assert!(messages.contains(&(MessageType::Warning, "jitterOffset contains value outside of expected range [-1.0, 1.0]".to_string())));
}

#[test]
fn test_frame_index_wraps_after_queue_window() {
    let (mut context, _) = unpadded_context();
    let params = frame(RENDER_720P);
    for _ in 0..nss::MAX_QUEUED_FRAMES + 1 {
        context.dispatch(&params).unwrap();
    }
    assert_eq!(context.frame_index(), 1);
}

#[test]
fn test_submission_failure_keeps_state() {
    let backend = RecordingBackend::default().with_failures(FailureInjection {
        execute: true,
        ..Default::default()
    });
    let (mut context, recording, _) = create(backend, RENDER_540P, ContextFlags::empty());
    let constants = *context.constants();

    let error = context.dispatch(&frame(RENDER_540P)).unwrap_err();
    assert!(matches!(error, NssError::Backend(BackendError::Api(_))));
    assert_eq!(context.frame_index(), 0);
    assert_eq!(*context.constants(), constants);
    assert!(recording.snapshot().registered.is_empty());
}

#[test]
fn test_recreate_pipelines_replaces_each_generation() {
    let (mut context, recording) = padded_context();
    let before = recording.snapshot().pipelines;
    context.recreate_pipelines().unwrap();

    let after = recording.snapshot();
    assert_eq!(after.pipelines.len(), before.len());
    assert!(after.pipelines.keys().all(|handle| !before.contains_key(handle)));
    assert_eq!(after.count(|call| matches!(call, BackendCall::DestroyPipeline(_))), 5);
    assert_eq!(after.count(|call| matches!(call, BackendCall::CreateDataGraphPipeline { .. })), 2);
}

#[test]
fn test_destroy_releases_everything() {
    let (mut context, recording) = padded_context();
    context.dispatch(&frame(RENDER_540P)).unwrap();
    let owned = context.owned_resources().all().len();
    assert_eq!(owned, 18);

    context.destroy().unwrap();
    let snapshot = recording.snapshot();
    assert!(snapshot.is_clean());
    assert_eq!(snapshot.destroyed_resources.len(), owned);

    assert_eq!(context.destroy(), Err(NssError::InvalidPointer));
    assert_eq!(context.dispatch(&frame(RENDER_540P)), Err(NssError::NullDevice));
    assert_eq!(context.recreate_pipelines(), Err(NssError::NullDevice));
}

#[test]
fn test_destroy_continues_past_pipeline_release_failure() {
    let backend = RecordingBackend::default().with_failures(FailureInjection {
        destroy_pipeline: Some("NSS-MirrorPadding"),
        ..Default::default()
    });
    let (mut context, recording, _) = create(backend, RENDER_540P, ContextFlags::empty());
    let live = recording.snapshot().pipelines.len();
    assert!(live > 1);

    let error = context.destroy().unwrap_err();
    assert!(matches!(error, NssError::Backend(BackendError::Api(_))));

    let snapshot = recording.snapshot();
    assert_eq!(snapshot.pipelines.values().collect::<Vec<_>>(), ["NSS-MirrorPadding"]);
    assert_eq!(snapshot.count(|call| matches!(call, BackendCall::DestroyPipeline(_))), live);
    assert!(snapshot.resources.is_empty());
    assert!(snapshot.live_contexts.is_empty());
    assert_eq!(context.destroy(), Err(NssError::InvalidPointer));
}

#[test]
fn test_drop_destroys_live_context() {
    let (context, recording) = unpadded_context();
    drop(context);
    assert!(recording.snapshot().is_clean());
}

#[test]
fn test_allocation_failure_rolls_back() {
    let backend = RecordingBackend::default().with_failures(FailureInjection {
        resource: Some("NSS_FeedbackTensor_2"),
        ..Default::default()
    });
    let recording = backend.handle();

    let error = NssContext::new(ContextDescription::new(backend, RENDER_540P, UPSCALE_1080P)).err().unwrap();
    assert_eq!(error, NssError::Backend(BackendError::OutOfMemory("NSS_FeedbackTensor_2".into())));

    let recording = recording.snapshot();
    assert!(recording.is_clean());
    assert_eq!(recording.destroyed_resources.len(), 6);
    assert_eq!(recording.count(|call| matches!(call, BackendCall::CreatePipeline(_))), 0);
}

#[test]
fn test_pipeline_failure_releases_resources() {
    let backend = RecordingBackend::default().with_failures(FailureInjection {
        pipeline: Some(nss::pipelines::Pass::Postprocess),
        ..Default::default()
    });
    let recording = backend.handle();

    let error = NssContext::new(ContextDescription::new(backend, RENDER_540P, UPSCALE_1080P)).err().unwrap();
    assert!(matches!(error, NssError::Backend(BackendError::PipelineCreation(_))));
    assert!(recording.snapshot().is_clean());
}

#[test]
fn test_unknown_binding_fails_creation_cleanly() {
    let backend = RecordingBackend::default().with_failures(FailureInjection {
        unknown_binding: Some(nss::pipelines::Pass::Preprocess),
        ..Default::default()
    });
    let recording = backend.handle();

    let error = NssContext::new(ContextDescription::new(backend, RENDER_720P, UPSCALE_1080P)).err().unwrap();
    assert_eq!(
        error,
        NssError::UnknownBinding {
            pipeline: "NSS-Preprocess".into(),
            name: "r_unreflected_input".into()
        }
    );
    assert!(recording.snapshot().is_clean());
}
