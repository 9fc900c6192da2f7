mod common;

use std::sync::Arc;

use common::{shader, Fixture};
use rhi_state::native::QueueWait;
use rhi_state::pipeline::GraphicsPipelineDesc;
use rhi_state::resource::BufferDesc;
use rhi_state::{
    CommandListParameters, CommandQueue, DeviceError, Format, HeadlessDevice, MessageSeverity,
    NativeError, PipelineError, ShaderType,
};

#[test]
fn referenced_objects_live_until_their_submission_completes() {
    let mut fx = Fixture::with_native(HeadlessDevice::with_manual_completion());
    let buffer = fx.buffer(64);
    let weak = Arc::downgrade(&buffer);

    let mut list = fx.open_list();
    list.write_buffer(&buffer, &[0u8; 64], 0).unwrap();
    list.close().unwrap();
    let instance = fx
        .device
        .execute_command_lists(&[&list], CommandQueue::Graphics)
        .unwrap();
    assert_eq!(instance, 1);
    drop(list);
    drop(buffer);

    fx.device.run_garbage_collection();
    assert!(weak.upgrade().is_some());
    assert_eq!(fx.device.in_flight_count(CommandQueue::Graphics), 1);

    fx.device.native_mut().complete_all();
    assert_eq!(fx.device.last_completed_instance(CommandQueue::Graphics), 1);
    fx.device.run_garbage_collection();
    assert!(weak.upgrade().is_none());
    assert_eq!(fx.device.in_flight_count(CommandQueue::Graphics), 0);
}

#[test]
fn untracked_liveness_is_not_retained() {
    let mut fx = Fixture::with_native(HeadlessDevice::with_manual_completion());
    let buffer = fx
        .device
        .create_buffer(BufferDesc {
            byte_size: 64,
            keep_initial_state: true,
            track_liveness: false,
            ..BufferDesc::default()
        })
        .unwrap();
    let weak = Arc::downgrade(&buffer);

    let mut list = fx.open_list();
    list.write_buffer(&buffer, &[0u8; 64], 0).unwrap();
    list.close().unwrap();
    fx.device
        .execute_command_lists(&[&list], CommandQueue::Graphics)
        .unwrap();
    drop(list);
    drop(buffer);
    assert!(weak.upgrade().is_none());
}

#[test]
fn queue_waits_attach_to_the_next_submission_only() {
    let mut fx = Fixture::new();
    let mut compute = fx
        .device
        .create_command_list(CommandListParameters::for_queue(CommandQueue::Compute));
    compute.open().unwrap();
    compute.close().unwrap();
    let instance = fx
        .device
        .execute_command_lists(&[&compute], CommandQueue::Compute)
        .unwrap();

    assert_eq!(
        fx.device
            .queue_wait_for_command_list(CommandQueue::Graphics, CommandQueue::Compute, 5),
        Err(DeviceError::UnknownInstance {
            queue: CommandQueue::Compute,
            instance: 5,
        })
    );
    assert_eq!(fx.messages.count(MessageSeverity::Error), 1);
    fx.device
        .queue_wait_for_command_list(CommandQueue::Graphics, CommandQueue::Compute, instance)
        .unwrap();

    let mut graphics = fx.open_list();
    graphics.close().unwrap();
    fx.device
        .execute_command_lists(&[&graphics], CommandQueue::Graphics)
        .unwrap();
    let submission = fx.device.native().last_submission().unwrap();
    assert_eq!(
        submission.waits,
        [QueueWait {
            queue: CommandQueue::Compute,
            instance,
        }]
    );

    fx.device
        .execute_command_lists(&[&graphics], CommandQueue::Graphics)
        .unwrap();
    assert!(fx.device.native().last_submission().unwrap().waits.is_empty());
    assert_eq!(fx.device.last_submitted_instance(CommandQueue::Graphics), 2);
    assert_eq!(fx.device.last_submitted_instance(CommandQueue::Copy), 0);
}

#[test]
fn execution_checks_list_state_and_queue() {
    let mut fx = Fixture::new();
    let open = fx.open_list();
    assert_eq!(
        fx.device
            .execute_command_lists(&[&open], CommandQueue::Graphics),
        Err(DeviceError::CommandListNotClosed)
    );

    let mut copy = fx
        .device
        .create_command_list(CommandListParameters::for_queue(CommandQueue::Copy));
    copy.open().unwrap();
    copy.close().unwrap();
    assert_eq!(
        fx.device
            .execute_command_lists(&[&copy], CommandQueue::Graphics),
        Err(DeviceError::QueueMismatch {
            recorded: CommandQueue::Copy,
            queue: CommandQueue::Graphics,
        })
    );
    assert!(fx.device.native().submissions().is_empty());
}

#[test]
fn lost_device_fails_submission_and_idle_wait() {
    let mut fx = Fixture::new();
    let mut list = fx.open_list();
    list.close().unwrap();

    fx.device.native_mut().lose_device();
    assert_eq!(
        fx.device
            .execute_command_lists(&[&list], CommandQueue::Graphics),
        Err(DeviceError::Native(NativeError::DeviceLost))
    );
    assert!(!fx.device.wait_for_idle());
    assert_eq!(fx.device.last_submitted_instance(CommandQueue::Graphics), 0);
    assert_eq!(fx.messages.count(MessageSeverity::Error), 2);
}

#[test]
fn event_queries_follow_queue_completion() {
    let mut fx = Fixture::with_native(HeadlessDevice::with_manual_completion());
    let query = fx.device.create_event_query();
    assert!(!fx.device.poll_event_query(&query));
    fx.device.wait_event_query(&query).unwrap();

    let mut list = fx.open_list();
    list.close().unwrap();
    fx.device
        .execute_command_lists(&[&list], CommandQueue::Graphics)
        .unwrap();
    fx.device.set_event_query(&query, CommandQueue::Graphics);
    assert!(query.is_set());
    assert!(!fx.device.poll_event_query(&query));

    fx.device
        .native_mut()
        .complete_through(CommandQueue::Graphics, 1);
    assert!(fx.device.poll_event_query(&query));

    fx.device.reset_event_query(&query);
    assert!(!query.is_set());
    assert!(!fx.device.poll_event_query(&query));
}

#[test]
fn native_pipeline_failure_is_reported() {
    let mut fx = Fixture::new();
    let target = fx.render_target(Format::Rgba8Unorm);
    let framebuffer = fx.framebuffer(&target);

    fx.device.native_mut().fail_next_pipeline("out of memory");
    let desc = GraphicsPipelineDesc {
        vs: Some(shader(ShaderType::VERTEX)),
        ps: Some(shader(ShaderType::PIXEL)),
        ..GraphicsPipelineDesc::default()
    };
    assert_eq!(
        fx.device
            .create_graphics_pipeline_for_framebuffer(desc.clone(), &framebuffer)
            .unwrap_err(),
        PipelineError::Native(NativeError::CreationFailed("out of memory".into()))
    );
    assert_eq!(fx.messages.count(MessageSeverity::Error), 1);

    fx.device
        .create_graphics_pipeline_for_framebuffer(desc, &framebuffer)
        .unwrap();
    assert_eq!(fx.device.native().pipelines_created().len(), 1);
}

#[test]
fn shader_in_the_wrong_slot_is_rejected_before_native_creation() {
    let mut fx = Fixture::new();
    let target = fx.render_target(Format::Rgba8Unorm);
    let framebuffer = fx.framebuffer(&target);

    let result = fx.device.create_graphics_pipeline_for_framebuffer(
        GraphicsPipelineDesc {
            vs: Some(shader(ShaderType::PIXEL)),
            ..GraphicsPipelineDesc::default()
        },
        &framebuffer,
    );
    assert_eq!(
        result.unwrap_err(),
        PipelineError::ShaderStageMismatch {
            expected: ShaderType::VERTEX,
            actual: ShaderType::PIXEL,
        }
    );
    assert!(fx.device.native().pipelines_created().is_empty());
}
