mod common;

use common::{names, Fixture};
use rhi_state::resource::{BufferDesc, TextureSubresourceSet};
use rhi_state::{CommandListError, CommandQueue, MessageSeverity, ResourceStates};

#[test]
fn permanent_state_is_promoted_on_execute() {
    let mut fx = Fixture::new();
    let texture = fx.texture_2d(1);

    let mut list = fx.open_list();
    list.begin_tracking_texture_state(&texture, TextureSubresourceSet::ALL, ResourceStates::COMMON)
        .unwrap();
    list.set_permanent_texture_state(&texture, ResourceStates::SHADER_RESOURCE)
        .unwrap();
    assert_eq!(
        list.get_texture_subresource_state(&texture, 0, 0),
        ResourceStates::SHADER_RESOURCE
    );
    list.close().unwrap();
    assert_eq!(names(list.commands()), ["Barriers"]);

    // Closing alone does not publish the state.
    assert_eq!(texture.permanent_state(), None);
    fx.device
        .execute_command_lists(&[&list], CommandQueue::Graphics)
        .unwrap();
    assert_eq!(
        texture.permanent_state(),
        Some(ResourceStates::SHADER_RESOURCE)
    );

    let mut next = fx.open_list();
    next.set_texture_state(&texture, TextureSubresourceSet::ALL, ResourceStates::SHADER_RESOURCE)
        .unwrap();
    assert_eq!(
        next.set_texture_state(&texture, TextureSubresourceSet::ALL, ResourceStates::RENDER_TARGET),
        Err(CommandListError::PermanentStateMismatch {
            resource: texture.id(),
            permanent: ResourceStates::SHADER_RESOURCE,
            requested: ResourceStates::RENDER_TARGET,
        })
    );
    next.close().unwrap();
    assert!(next.commands().is_empty());
}

#[test]
fn dropped_command_list_promotes_nothing() {
    let fx = Fixture::new();
    let texture = fx.texture_2d(1);

    {
        let mut list = fx.open_list();
        list.begin_tracking_texture_state(
            &texture,
            TextureSubresourceSet::ALL,
            ResourceStates::COMMON,
        )
        .unwrap();
        list.set_permanent_texture_state(&texture, ResourceStates::SHADER_RESOURCE)
            .unwrap();
        list.close().unwrap();
    }
    assert_eq!(texture.permanent_state(), None);

    let mut list = fx.open_list();
    list.begin_tracking_texture_state(&texture, TextureSubresourceSet::ALL, ResourceStates::COMMON)
        .unwrap();
    list.set_permanent_texture_state(&texture, ResourceStates::RENDER_TARGET)
        .unwrap();
}

#[test]
fn conflicting_permanent_requests_in_one_list_are_rejected() {
    let fx = Fixture::new();
    let texture = fx.texture_2d(1);

    let mut list = fx.open_list();
    list.begin_tracking_texture_state(&texture, TextureSubresourceSet::ALL, ResourceStates::COMMON)
        .unwrap();
    list.set_permanent_texture_state(&texture, ResourceStates::SHADER_RESOURCE)
        .unwrap();
    // Repeating the same request is a no-op.
    list.set_permanent_texture_state(&texture, ResourceStates::SHADER_RESOURCE)
        .unwrap();
    assert_eq!(
        list.set_permanent_texture_state(&texture, ResourceStates::UNORDERED_ACCESS),
        Err(CommandListError::PermanentStateConflict {
            resource: texture.id(),
            existing: ResourceStates::SHADER_RESOURCE,
            requested: ResourceStates::UNORDERED_ACCESS,
        })
    );
    list.commit_barriers().unwrap();
    assert_eq!(names(list.commands()), ["Barriers"]);
}

#[test]
fn second_promotion_of_the_same_texture_is_reported_and_ignored() {
    let mut fx = Fixture::new();
    let texture = fx.texture_2d(1);

    let record = |state: ResourceStates| {
        let mut list = fx.open_list();
        list.begin_tracking_texture_state(
            &texture,
            TextureSubresourceSet::ALL,
            ResourceStates::COMMON,
        )
        .unwrap();
        list.set_permanent_texture_state(&texture, state).unwrap();
        list.close().unwrap();
        list
    };
    let first = record(ResourceStates::SHADER_RESOURCE);
    let second = record(ResourceStates::UNORDERED_ACCESS);

    fx.device
        .execute_command_lists(&[&first], CommandQueue::Graphics)
        .unwrap();
    fx.device
        .execute_command_lists(&[&second], CommandQueue::Graphics)
        .unwrap();

    assert_eq!(
        texture.permanent_state(),
        Some(ResourceStates::SHADER_RESOURCE)
    );
    assert_eq!(fx.messages.count(MessageSeverity::Error), 1);
}

#[test]
fn buffers_take_permanent_states_too() {
    let mut fx = Fixture::new();
    let buffer = fx.buffer(256);
    let constants = fx
        .device
        .create_buffer(BufferDesc::volatile_constant_buffer(256, 16))
        .unwrap();

    let mut list = fx.open_list();
    list.set_permanent_buffer_state(&buffer, ResourceStates::SHADER_RESOURCE)
        .unwrap();
    assert!(matches!(
        list.set_permanent_buffer_state(&constants, ResourceStates::SHADER_RESOURCE),
        Err(CommandListError::InvalidArgument(_))
    ));
    list.close().unwrap();
    // No restore barrier for a buffer that became permanent.
    assert_eq!(names(list.commands()), ["Barriers"]);

    fx.device
        .execute_command_lists(&[&list], CommandQueue::Graphics)
        .unwrap();
    assert_eq!(
        buffer.permanent_state(),
        Some(ResourceStates::SHADER_RESOURCE)
    );
    assert_eq!(
        fx.open_list().get_buffer_state(&buffer),
        ResourceStates::SHADER_RESOURCE
    );
}
