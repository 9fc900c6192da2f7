//! Per-command-list resource state tracking.
//!
//! Textures are tracked per subresource (mip level, array slice), buffers and
//! acceleration-structure storage as a single unit. Every tracked entry holds
//! exactly one state or [`ResourceStates::UNKNOWN`].
//!
//! Requesting a state queues transitions on the [`BarrierScheduler`]; nothing
//! is emitted until the command list commits. All tracking is discarded when
//! the command list is reopened. Permanent-state requests are collected as
//! [`PermanentPromotions`] and only become registry-wide when the device
//! accepts the command list for execution.

use std::collections::HashMap;

use crate::barrier::{BarrierScheduler, BufferBarrier, TextureBarrier};
use crate::error::CommandListError;
use crate::resource::{BufferHandle, ResourceId, TextureHandle, TextureSubresourceSet};
use crate::states::ResourceStates;

#[derive(Debug, Clone)]
struct TextureTracking {
    texture: TextureHandle,
    /// Indexed by `slice * mip_levels + mip`.
    states: Vec<ResourceStates>,
    enable_uav_barriers: bool,
    first_uav_barrier_placed: bool,
    /// Permanent state requested by this command list, not yet submitted.
    permanent: Option<ResourceStates>,
}

#[derive(Debug, Clone)]
struct BufferTracking {
    buffer: BufferHandle,
    state: ResourceStates,
    enable_uav_barriers: bool,
    first_uav_barrier_placed: bool,
    permanent: Option<ResourceStates>,
}

/// Permanent states requested by one command list.
#[derive(Debug, Default)]
pub struct PermanentPromotions {
    pub textures: Vec<(TextureHandle, ResourceStates)>,
    pub buffers: Vec<(BufferHandle, ResourceStates)>,
}

impl PermanentPromotions {
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.buffers.is_empty()
    }
}

/// Entries as they were when a transaction began.
#[derive(Debug, Default)]
struct Journal {
    textures: usize,
    buffers: usize,
    saved_textures: Vec<(usize, TextureTracking)>,
    saved_buffers: Vec<(usize, BufferTracking)>,
}

#[derive(Debug, Default)]
pub struct StateTracker {
    textures: Vec<TextureTracking>,
    texture_index: HashMap<ResourceId, usize>,
    buffers: Vec<BufferTracking>,
    buffer_index: HashMap<ResourceId, usize>,
    journal: Option<Journal>,
}

fn check_permanent(
    resource: ResourceId,
    permanent: ResourceStates,
    requested: ResourceStates,
) -> Result<(), CommandListError> {
    if permanent.contains(requested) {
        Ok(())
    } else {
        Err(CommandListError::PermanentStateMismatch {
            resource,
            permanent,
            requested,
        })
    }
}

fn check_permanent_assignment(
    resource: ResourceId,
    existing: Option<ResourceStates>,
    requested: ResourceStates,
) -> Result<bool, CommandListError> {
    match existing {
        Some(existing) if existing == requested => Ok(true),
        Some(existing) => Err(CommandListError::PermanentStateConflict {
            resource,
            existing,
            requested,
        }),
        None => Ok(false),
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all tracking information.
    pub fn reset(&mut self) {
        self.textures.clear();
        self.texture_index.clear();
        self.buffers.clear();
        self.buffer_index.clear();
        self.journal = None;
    }

    /// Starts recording enough to undo every tracking change made until
    /// [`StateTracker::commit_transaction`] or
    /// [`StateTracker::rollback_transaction`]. Transactions do not nest.
    pub fn begin_transaction(&mut self) {
        self.journal = Some(Journal {
            textures: self.textures.len(),
            buffers: self.buffers.len(),
            ..Journal::default()
        });
    }

    pub fn commit_transaction(&mut self) {
        self.journal = None;
    }

    /// Restores the tracking state seen by the last `begin_transaction`.
    pub fn rollback_transaction(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for tracking in self.textures.drain(journal.textures..) {
            self.texture_index.remove(&tracking.texture.id());
        }
        for tracking in self.buffers.drain(journal.buffers..) {
            self.buffer_index.remove(&tracking.buffer.id());
        }
        for (index, saved) in journal.saved_textures {
            self.textures[index] = saved;
        }
        for (index, saved) in journal.saved_buffers {
            self.buffers[index] = saved;
        }
    }

    fn texture_tracking(&mut self, texture: &TextureHandle) -> &mut TextureTracking {
        let index = match self.texture_index.get(&texture.id()) {
            Some(&index) => index,
            None => {
                let desc = texture.desc();
                let initial = if desc.keep_initial_state {
                    desc.initial_state
                } else {
                    ResourceStates::UNKNOWN
                };
                self.textures.push(TextureTracking {
                    texture: texture.clone(),
                    states: vec![initial; texture.num_subresources()],
                    enable_uav_barriers: true,
                    first_uav_barrier_placed: false,
                    permanent: None,
                });
                let index = self.textures.len() - 1;
                self.texture_index.insert(texture.id(), index);
                index
            }
        };
        if let Some(journal) = &mut self.journal {
            if index < journal.textures && journal.saved_textures.iter().all(|(i, _)| *i != index) {
                journal
                    .saved_textures
                    .push((index, self.textures[index].clone()));
            }
        }
        &mut self.textures[index]
    }

    fn buffer_tracking(&mut self, buffer: &BufferHandle) -> &mut BufferTracking {
        let index = match self.buffer_index.get(&buffer.id()) {
            Some(&index) => index,
            None => {
                let desc = buffer.desc();
                let initial = if desc.keep_initial_state {
                    desc.initial_state
                } else {
                    ResourceStates::UNKNOWN
                };
                self.buffers.push(BufferTracking {
                    buffer: buffer.clone(),
                    state: initial,
                    enable_uav_barriers: true,
                    first_uav_barrier_placed: false,
                    permanent: None,
                });
                let index = self.buffers.len() - 1;
                self.buffer_index.insert(buffer.id(), index);
                index
            }
        };
        if let Some(journal) = &mut self.journal {
            if index < journal.buffers && journal.saved_buffers.iter().all(|(i, _)| *i != index) {
                journal
                    .saved_buffers
                    .push((index, self.buffers[index].clone()));
            }
        }
        &mut self.buffers[index]
    }

    fn local_texture_permanent(&self, id: ResourceId) -> Option<ResourceStates> {
        self.texture_index
            .get(&id)
            .and_then(|&index| self.textures[index].permanent)
    }

    fn local_buffer_permanent(&self, id: ResourceId) -> Option<ResourceStates> {
        self.buffer_index
            .get(&id)
            .and_then(|&index| self.buffers[index].permanent)
    }

    fn resolve_range(
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
    ) -> Result<TextureSubresourceSet, CommandListError> {
        let range = subresources.resolve(texture.desc(), false);
        if range.is_empty() {
            return Err(CommandListError::SubresourceOutOfRange {
                resource: texture.id(),
            });
        }
        Ok(range)
    }

    /// Seeds the tracked state of `subresources` without emitting barriers.
    ///
    /// Ignored for resources that already hold a permanent state.
    pub fn begin_tracking_texture(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        if texture.permanent_state().is_some() || self.local_texture_permanent(texture.id()).is_some()
        {
            return Ok(());
        }
        let range = Self::resolve_range(texture, subresources)?;
        let tracking = self.texture_tracking(texture);
        for slice in range.slice_range() {
            for mip in range.mip_range() {
                let index = tracking.texture.subresource_index(mip, slice);
                tracking.states[index] = state;
            }
        }
        Ok(())
    }

    pub fn begin_tracking_buffer(
        &mut self,
        buffer: &BufferHandle,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        if buffer.permanent_state().is_some() || self.local_buffer_permanent(buffer.id()).is_some() {
            return Ok(());
        }
        self.buffer_tracking(buffer).state = state;
        Ok(())
    }

    /// Brings `subresources` into `state`, queueing one barrier per maximal
    /// block of subresources that share a different prior state.
    ///
    /// Requesting `UNORDERED_ACCESS` on subresources already in that state
    /// queues a UAV barrier instead, unless UAV barriers were disabled for the
    /// texture and one was already placed in this command list.
    pub fn require_texture_state(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
        barriers: &mut BarrierScheduler,
    ) -> Result<(), CommandListError> {
        let permanent = texture
            .permanent_state()
            .or_else(|| self.local_texture_permanent(texture.id()));
        if let Some(permanent) = permanent {
            return check_permanent(texture.id(), permanent, state);
        }

        let range = Self::resolve_range(texture, subresources)?;
        let tracking = self.texture_tracking(texture);

        let mut all_equal = true;
        for slice in range.slice_range() {
            for mip in range.mip_range() {
                let current = tracking.states[tracking.texture.subresource_index(mip, slice)];
                if current.is_unknown() {
                    return Err(CommandListError::UnknownPriorState {
                        resource: tracking.texture.id(),
                        mip_level: mip,
                        array_slice: slice,
                    });
                }
                all_equal &= current == state;
            }
        }

        let wants_uav = state.contains(ResourceStates::UNORDERED_ACCESS);
        if all_equal {
            if wants_uav && (tracking.enable_uav_barriers || !tracking.first_uav_barrier_placed) {
                barriers.push_texture(TextureBarrier {
                    texture: tracking.texture.id(),
                    mip_levels: range.mip_range(),
                    array_slices: range.slice_range(),
                    entire_texture: range.is_entire_texture(tracking.texture.desc()),
                    before: state,
                    after: state,
                });
                tracking.first_uav_barrier_placed = true;
            }
            return Ok(());
        }

        transition_texture(tracking, range, state, barriers);
        if wants_uav {
            tracking.first_uav_barrier_placed = true;
        }
        Ok(())
    }

    /// Buffer counterpart of [`StateTracker::require_texture_state`].
    ///
    /// Volatile buffers are never transitioned.
    pub fn require_buffer_state(
        &mut self,
        buffer: &BufferHandle,
        state: ResourceStates,
        barriers: &mut BarrierScheduler,
    ) -> Result<(), CommandListError> {
        if buffer.desc().is_volatile {
            return Ok(());
        }
        let permanent = buffer
            .permanent_state()
            .or_else(|| self.local_buffer_permanent(buffer.id()));
        if let Some(permanent) = permanent {
            return check_permanent(buffer.id(), permanent, state);
        }

        let tracking = self.buffer_tracking(buffer);
        if tracking.state.is_unknown() {
            return Err(CommandListError::UnknownPriorState {
                resource: buffer.id(),
                mip_level: 0,
                array_slice: 0,
            });
        }

        let wants_uav = state.contains(ResourceStates::UNORDERED_ACCESS);
        if tracking.state == state {
            if wants_uav && (tracking.enable_uav_barriers || !tracking.first_uav_barrier_placed) {
                barriers.push_buffer(BufferBarrier {
                    buffer: buffer.id(),
                    before: state,
                    after: state,
                });
                tracking.first_uav_barrier_placed = true;
            }
            return Ok(());
        }

        barriers.push_buffer(BufferBarrier {
            buffer: buffer.id(),
            before: tracking.state,
            after: state,
        });
        tracking.state = state;
        if wants_uav {
            tracking.first_uav_barrier_placed = true;
        }
        Ok(())
    }

    /// Transitions the whole texture to `state` and records the request to
    /// make it permanent once this command list is submitted.
    pub fn set_permanent_texture_state(
        &mut self,
        texture: &TextureHandle,
        state: ResourceStates,
        barriers: &mut BarrierScheduler,
    ) -> Result<(), CommandListError> {
        if check_permanent_assignment(texture.id(), texture.permanent_state(), state)? {
            return Ok(());
        }
        if check_permanent_assignment(
            texture.id(),
            self.local_texture_permanent(texture.id()),
            state,
        )? {
            return Ok(());
        }
        self.require_texture_state(texture, TextureSubresourceSet::ALL, state, barriers)?;
        self.texture_tracking(texture).permanent = Some(state);
        Ok(())
    }

    pub fn set_permanent_buffer_state(
        &mut self,
        buffer: &BufferHandle,
        state: ResourceStates,
        barriers: &mut BarrierScheduler,
    ) -> Result<(), CommandListError> {
        if buffer.desc().is_volatile {
            return Err(CommandListError::InvalidArgument(
                "volatile buffers cannot have a permanent state",
            ));
        }
        if check_permanent_assignment(buffer.id(), buffer.permanent_state(), state)? {
            return Ok(());
        }
        if check_permanent_assignment(buffer.id(), self.local_buffer_permanent(buffer.id()), state)?
        {
            return Ok(());
        }
        self.require_buffer_state(buffer, state, barriers)?;
        self.buffer_tracking(buffer).permanent = Some(state);
        Ok(())
    }

    pub fn set_enable_uav_barriers_for_texture(&mut self, texture: &TextureHandle, enable: bool) {
        self.texture_tracking(texture).enable_uav_barriers = enable;
    }

    pub fn set_enable_uav_barriers_for_buffer(&mut self, buffer: &BufferHandle, enable: bool) {
        self.buffer_tracking(buffer).enable_uav_barriers = enable;
    }

    /// Current state of one subresource, or `UNKNOWN` if it was never observed.
    pub fn texture_subresource_state(
        &self,
        texture: &TextureHandle,
        array_slice: u32,
        mip_level: u32,
    ) -> ResourceStates {
        if let Some(permanent) = texture
            .permanent_state()
            .or_else(|| self.local_texture_permanent(texture.id()))
        {
            return permanent;
        }
        let desc = texture.desc();
        if mip_level >= desc.mip_levels || array_slice >= texture.subresource_slices() {
            return ResourceStates::UNKNOWN;
        }
        match self.texture_index.get(&texture.id()) {
            Some(&index) => {
                self.textures[index].states[texture.subresource_index(mip_level, array_slice)]
            }
            None if desc.keep_initial_state => desc.initial_state,
            None => ResourceStates::UNKNOWN,
        }
    }

    pub fn buffer_state(&self, buffer: &BufferHandle) -> ResourceStates {
        if let Some(permanent) = buffer
            .permanent_state()
            .or_else(|| self.local_buffer_permanent(buffer.id()))
        {
            return permanent;
        }
        match self.buffer_index.get(&buffer.id()) {
            Some(&index) => self.buffers[index].state,
            None if buffer.desc().keep_initial_state => buffer.desc().initial_state,
            None => ResourceStates::UNKNOWN,
        }
    }

    /// Queues transitions that return every keep-initial-state resource used
    /// in this command list to its initial state.
    pub fn restore_initial_states(&mut self, barriers: &mut BarrierScheduler) {
        for tracking in &mut self.textures {
            let desc = tracking.texture.desc();
            if !desc.keep_initial_state || tracking.permanent.is_some() {
                continue;
            }
            let initial = desc.initial_state;
            let range = TextureSubresourceSet::ALL.resolve(desc, false);
            // Subresources explicitly seeded as unknown stay untouched.
            let any_unknown = tracking.states.iter().any(|s| s.is_unknown());
            if any_unknown {
                for slice in range.slice_range() {
                    for mip in range.mip_range() {
                        let index = tracking.texture.subresource_index(mip, slice);
                        let current = tracking.states[index];
                        if !current.is_unknown() && current != initial {
                            transition_texture(
                                tracking,
                                TextureSubresourceSet::new(mip, 1, slice, 1),
                                initial,
                                barriers,
                            );
                        }
                    }
                }
            } else {
                transition_texture(tracking, range, initial, barriers);
            }
        }

        for tracking in &mut self.buffers {
            let desc = tracking.buffer.desc();
            if !desc.keep_initial_state || tracking.permanent.is_some() {
                continue;
            }
            if !tracking.state.is_unknown() && tracking.state != desc.initial_state {
                barriers.push_buffer(BufferBarrier {
                    buffer: tracking.buffer.id(),
                    before: tracking.state,
                    after: desc.initial_state,
                });
                tracking.state = desc.initial_state;
            }
        }
    }

    /// Permanent states requested since the last reset.
    pub fn permanent_promotions(&self) -> PermanentPromotions {
        PermanentPromotions {
            textures: self
                .textures
                .iter()
                .filter_map(|t| t.permanent.map(|state| (t.texture.clone(), state)))
                .collect(),
            buffers: self
                .buffers
                .iter()
                .filter_map(|b| b.permanent.map(|state| (b.buffer.clone(), state)))
                .collect(),
        }
    }
}

/// Queues one barrier per maximal block of `range` sharing a prior state that
/// differs from `state`, then records `state` for the whole range.
///
/// Blocks are mip runs within a slice, merged across consecutive slices when
/// the run and its prior state repeat.
fn transition_texture(
    tracking: &mut TextureTracking,
    range: TextureSubresourceSet,
    state: ResourceStates,
    barriers: &mut BarrierScheduler,
) {
    let texture = &tracking.texture;
    let desc = texture.desc();
    let mips = range.mip_range();

    let mut finished: Vec<TextureBarrier> = Vec::new();
    let mut open: Vec<TextureBarrier> = Vec::new();

    for slice in range.slice_range() {
        let mut next_open = Vec::new();
        let mut mip = mips.start;
        while mip < mips.end {
            let before = tracking.states[texture.subresource_index(mip, slice)];
            let run_start = mip;
            while mip < mips.end && tracking.states[texture.subresource_index(mip, slice)] == before
            {
                mip += 1;
            }
            if before == state {
                continue;
            }
            let run = run_start..mip;
            let extended = open
                .iter()
                .position(|b| b.mip_levels == run && b.before == before);
            match extended {
                Some(pos) => {
                    let mut barrier = open.remove(pos);
                    barrier.array_slices.end = slice + 1;
                    next_open.push(barrier);
                }
                None => next_open.push(TextureBarrier {
                    texture: texture.id(),
                    mip_levels: run,
                    array_slices: slice..slice + 1,
                    entire_texture: false,
                    before,
                    after: state,
                }),
            }
        }
        finished.append(&mut open);
        open = next_open;
    }
    finished.append(&mut open);
    finished.sort_by_key(|b| (b.array_slices.start, b.mip_levels.start));

    let all_slices = 0..texture.subresource_slices();
    for mut barrier in finished {
        barrier.entire_texture =
            barrier.mip_levels == (0..desc.mip_levels) && barrier.array_slices == all_slices;
        barriers.push_texture(barrier);
    }

    for slice in range.slice_range() {
        for mip in range.mip_range() {
            let index = texture.subresource_index(mip, slice);
            tracking.states[index] = state;
        }
    }
}
