mod common;

use common::{count, names, Fixture};
use rhi_state::resource::TextureSubresourceSet;
use rhi_state::{
    BindingLayoutItem, BindingSetDesc, BindingSetItem, Color, CommandListError, ComputeState,
    Format, MessageSeverity, NativeCmd, ResourceStates, ResourceType, TextureBarrier,
};

fn barrier_batches(commands: &[NativeCmd]) -> Vec<&rhi_state::BarrierBatch> {
    commands
        .iter()
        .filter_map(|cmd| match cmd {
            NativeCmd::Barriers(batch) => Some(batch),
            _ => None,
        })
        .collect()
}

#[test]
fn partial_mip_transition_emits_one_barrier_for_the_range() {
    let fx = Fixture::new();
    let texture = fx.texture_2d(4);

    let mut list = fx.open_list();
    list.begin_tracking_texture_state(&texture, TextureSubresourceSet::ALL, ResourceStates::COMMON)
        .unwrap();
    list.set_texture_state(
        &texture,
        TextureSubresourceSet::mips(0..2),
        ResourceStates::RENDER_TARGET,
    )
    .unwrap();

    // Queued, not yet emitted.
    assert!(list.commands().is_empty());
    assert_eq!(
        list.get_texture_subresource_state(&texture, 0, 1),
        ResourceStates::RENDER_TARGET
    );
    assert_eq!(
        list.get_texture_subresource_state(&texture, 0, 2),
        ResourceStates::COMMON
    );

    list.commit_barriers().unwrap();
    list.commit_barriers().unwrap();

    let batches = barrier_batches(list.commands());
    assert_eq!(batches.len(), 1);
    assert!(batches[0].buffers.is_empty());
    assert_eq!(
        batches[0].textures,
        [TextureBarrier {
            texture: texture.id(),
            mip_levels: 0..2,
            array_slices: 0..1,
            entire_texture: false,
            before: ResourceStates::COMMON,
            after: ResourceStates::RENDER_TARGET,
        }]
    );
    assert_eq!(list.stats().texture_barriers, 1);
}

#[test]
fn requiring_a_state_on_an_untracked_texture_fails() {
    let fx = Fixture::new();
    let texture = fx.texture_2d(1);

    let mut list = fx.open_list();
    assert_eq!(
        list.set_texture_state(
            &texture,
            TextureSubresourceSet::ALL,
            ResourceStates::SHADER_RESOURCE
        ),
        Err(CommandListError::UnknownPriorState {
            resource: texture.id(),
            mip_level: 0,
            array_slice: 0,
        })
    );
    assert_eq!(fx.messages.count(MessageSeverity::Error), 1);
    assert_eq!(
        list.get_texture_subresource_state(&texture, 0, 0),
        ResourceStates::UNKNOWN
    );

    assert_eq!(
        list.set_texture_state(
            &texture,
            TextureSubresourceSet::mips(4..5),
            ResourceStates::SHADER_RESOURCE
        ),
        Err(CommandListError::SubresourceOutOfRange {
            resource: texture.id()
        })
    );
}

fn uav_dispatch_commands(enable_uav_barriers: bool) -> Vec<&'static str> {
    let mut fx = Fixture::new();
    let texture = fx.texture_2d(1);
    let layout = fx.binding_layout(vec![BindingLayoutItem::new(0, ResourceType::TextureUav)]);
    let set = fx
        .device
        .create_binding_set(
            BindingSetDesc {
                items: vec![BindingSetItem::texture_uav(0, texture.clone())],
                track_liveness: true,
            },
            &layout,
        )
        .unwrap();
    let pipeline = fx.compute_pipeline(&[layout]);
    let mut state = ComputeState::new(pipeline);
    state.bindings = vec![set];

    let mut list = fx.open_list();
    list.begin_tracking_texture_state(
        &texture,
        TextureSubresourceSet::ALL,
        ResourceStates::UNORDERED_ACCESS,
    )
    .unwrap();
    list.set_enable_uav_barriers_for_texture(&texture, enable_uav_barriers);
    list.set_compute_state(&state).unwrap();
    list.dispatch(16, 16, 1).unwrap();
    list.set_compute_state(&state).unwrap();
    list.dispatch(16, 16, 1).unwrap();

    for batch in barrier_batches(list.commands()) {
        assert_eq!(batch.uav_barrier_count(), batch.len());
    }
    names(list.commands())
}

#[test]
fn consecutive_uav_uses_get_uav_barriers() {
    assert_eq!(
        uav_dispatch_commands(true),
        [
            "Barriers",
            "BindPipeline",
            "BindBindingSets",
            "Dispatch",
            "Barriers",
            "Dispatch",
        ]
    );
}

#[test]
fn disabling_uav_barriers_keeps_only_the_first() {
    assert_eq!(
        uav_dispatch_commands(false),
        [
            "Barriers",
            "BindPipeline",
            "BindBindingSets",
            "Dispatch",
            "Dispatch",
        ]
    );
}

#[test]
fn keep_initial_state_textures_are_restored_on_close() {
    let fx = Fixture::new();
    let target = fx.render_target(Format::Rgba8Unorm);

    let mut list = fx.open_list();
    list.clear_texture_float(&target, TextureSubresourceSet::ALL, Color::default())
        .unwrap();
    assert_eq!(
        list.get_texture_subresource_state(&target, 0, 0),
        ResourceStates::COPY_DEST
    );
    list.close().unwrap();

    assert_eq!(
        names(list.commands()),
        ["Barriers", "ClearTextureFloat", "Barriers"]
    );
    let batches = barrier_batches(list.commands());
    let restore = &batches[1].textures[0];
    assert_eq!(restore.before, ResourceStates::COPY_DEST);
    assert_eq!(restore.after, ResourceStates::RENDER_TARGET);
    assert!(restore.entire_texture);
}

#[test]
fn buffer_transitions_batch_with_texture_transitions() {
    let fx = Fixture::new();
    let target = fx.render_target(Format::Rgba8Unorm);
    let src = fx.buffer(64);
    let dest = fx.buffer(64);

    let mut list = fx.open_list();
    list.set_texture_state(&target, TextureSubresourceSet::ALL, ResourceStates::SHADER_RESOURCE)
        .unwrap();
    list.copy_buffer(&dest, 0, &src, 0, 64).unwrap();

    let batches = barrier_batches(list.commands());
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].textures.len(), 1);
    assert_eq!(batches[0].buffers.len(), 2);
    assert_eq!(list.get_buffer_state(&src), ResourceStates::COPY_SOURCE);
    assert_eq!(list.get_buffer_state(&dest), ResourceStates::COPY_DEST);
}

#[test]
fn manual_mode_emits_no_barriers() {
    let fx = Fixture::new();
    let buffer = fx.buffer(64);

    let mut list = fx.open_list();
    list.set_enable_automatic_barriers(false);
    assert!(!list.automatic_barriers_enabled());
    list.write_buffer(&buffer, &[0u8; 64], 0).unwrap();
    list.close().unwrap();

    assert_eq!(names(list.commands()), ["WriteBuffer"]);
    assert_eq!(count(list.commands(), "Barriers"), 0);
}

#[test]
fn explicit_states_are_honored_in_manual_mode() {
    let fx = Fixture::new();
    let buffer = fx.buffer(64);

    let mut list = fx.open_list();
    list.set_enable_automatic_barriers(false);
    list.set_buffer_state(&buffer, ResourceStates::COPY_DEST).unwrap();
    list.write_buffer(&buffer, &[0u8; 64], 0).unwrap();
    list.set_buffer_state(&buffer, ResourceStates::SHADER_RESOURCE)
        .unwrap();
    list.commit_barriers().unwrap();

    assert_eq!(
        names(list.commands()),
        ["Barriers", "WriteBuffer", "Barriers"]
    );
    assert_eq!(
        list.get_buffer_state(&buffer),
        ResourceStates::SHADER_RESOURCE
    );
}

#[test]
fn failed_copy_drops_the_transitions_it_queued() {
    let fx = Fixture::new();
    let dest = fx.buffer(64);
    let src = fx
        .device
        .create_buffer(rhi_state::resource::BufferDesc {
            byte_size: 64,
            ..rhi_state::resource::BufferDesc::default()
        })
        .unwrap();

    let mut list = fx.open_list();
    assert_eq!(
        list.copy_buffer(&dest, 0, &src, 0, 16),
        Err(CommandListError::UnknownPriorState {
            resource: src.id(),
            mip_level: 0,
            array_slice: 0,
        })
    );
    assert_eq!(list.get_buffer_state(&dest), ResourceStates::COMMON);

    list.commit_barriers().unwrap();
    assert!(list.commands().is_empty());
    assert_eq!(fx.messages.count(MessageSeverity::Error), 1);
}
