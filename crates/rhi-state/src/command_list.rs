//! The command-list state cache.
//!
//! A command list turns `set*_state` calls into the minimal native call
//! sequence: it requests resource states from the [`StateTracker`], keeps the
//! render pass open across draws that share a framebuffer and only rebinds
//! what changed since the last applied state. Graphics, compute, meshlet and
//! ray tracing states are mutually exclusive; applying one forgets the others.
//!
//! Usage errors skip the operation, leave the cached state untouched and are
//! forwarded to the device's message callback before being returned.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::barrier::BarrierScheduler;
use crate::binding::{BindingSetHandle, RequiredState};
use crate::config::{CommandListParameters, CommandQueue, MAX_VERTEX_ATTRIBUTES, MAX_VIEWPORTS};
use crate::device::DeviceShared;
use crate::error::CommandListError;
use crate::message::MessageSeverity;
use crate::native::{BoundBindingSet, NativeCmd, VertexBufferBind, VolatileBufferVersion};
use crate::pipeline::{
    DynamicStates, FramebufferHandle, FramebufferInfo, PipelineBindPoint, PipelineBindingMap,
};
use crate::resource::{
    AccelStructBuildFlags, AccelStructHandle, BufferHandle, GeometryDesc, InstanceDesc,
    ResourceId, Retained, TextureHandle, TextureSlice, TextureSubresourceSet,
};
use crate::state::{
    same_bindings, Color, ComputeState, DispatchRaysArguments, DrawArguments,
    GraphicsState, MeshletState, RayTracingState, ViewportState,
};
use crate::states::ResourceStates;
use crate::stats::CommandListStats;
use crate::tracker::{PermanentPromotions, StateTracker};

/// Where a command list is in its recording lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListState {
    Closed,
    OpenEmpty,
    OpenGraphics,
    OpenCompute,
    OpenMeshlet,
    OpenRayTracing,
}

pub struct CommandList {
    shared: Arc<DeviceShared>,
    params: CommandListParameters,
    open: bool,

    commands: Vec<NativeCmd>,
    tracker: StateTracker,
    barriers: BarrierScheduler,
    automatic_barriers: bool,

    retained: Vec<Retained>,
    retained_keys: HashSet<usize>,

    graphics: Option<GraphicsState>,
    compute: Option<ComputeState>,
    meshlet: Option<MeshletState>,
    ray_tracing: Option<RayTracingState>,
    render_pass: Option<FramebufferHandle>,

    any_volatile_buffer_writes: bool,
    volatile_versions: HashMap<ResourceId, u32>,

    stats: CommandListStats,
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("queue", &self.params.queue)
            .field("state", &self.state_kind())
            .field("commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}

fn check_bindings(
    map: &PipelineBindingMap,
    bindings: &[BindingSetHandle],
) -> Result<(), CommandListError> {
    if bindings.len() > map.len() {
        return Err(CommandListError::BindingSlotOutOfRange {
            slot: map.len(),
            layouts: map.len(),
        });
    }
    for (slot, set) in bindings.iter().enumerate() {
        match map.layout(slot) {
            Some(layout) if Arc::ptr_eq(layout, set.layout()) => {}
            _ => return Err(CommandListError::BindingLayoutMismatch { slot }),
        }
    }
    Ok(())
}

fn check_viewports(viewport: &ViewportState) -> Result<(), CommandListError> {
    if viewport.viewports.len() > MAX_VIEWPORTS || viewport.scissor_rects.len() > MAX_VIEWPORTS {
        return Err(CommandListError::InvalidArgument(
            "too many viewports or scissor rects",
        ));
    }
    Ok(())
}

impl CommandList {
    pub(crate) fn new(shared: Arc<DeviceShared>, params: CommandListParameters) -> Self {
        let automatic_barriers = params
            .enable_automatic_barriers
            .unwrap_or(shared.config.automatic_barriers);
        Self {
            shared,
            params,
            open: false,
            commands: Vec::new(),
            tracker: StateTracker::new(),
            barriers: BarrierScheduler::new(),
            automatic_barriers,
            retained: Vec::new(),
            retained_keys: HashSet::new(),
            graphics: None,
            compute: None,
            meshlet: None,
            ray_tracing: None,
            render_pass: None,
            any_volatile_buffer_writes: false,
            volatile_versions: HashMap::new(),
            stats: CommandListStats::default(),
        }
    }

    pub fn queue(&self) -> CommandQueue {
        self.params.queue
    }

    pub fn parameters(&self) -> &CommandListParameters {
        &self.params
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn state_kind(&self) -> CommandListState {
        if !self.open {
            CommandListState::Closed
        } else if self.graphics.is_some() {
            CommandListState::OpenGraphics
        } else if self.compute.is_some() {
            CommandListState::OpenCompute
        } else if self.meshlet.is_some() {
            CommandListState::OpenMeshlet
        } else if self.ray_tracing.is_some() {
            CommandListState::OpenRayTracing
        } else {
            CommandListState::OpenEmpty
        }
    }

    pub fn graphics_state(&self) -> Option<&GraphicsState> {
        self.graphics.as_ref()
    }

    pub fn compute_state(&self) -> Option<&ComputeState> {
        self.compute.as_ref()
    }

    pub fn meshlet_state(&self) -> Option<&MeshletState> {
        self.meshlet.as_ref()
    }

    pub fn ray_tracing_state(&self) -> Option<&RayTracingState> {
        self.ray_tracing.as_ref()
    }

    /// Native calls recorded since the last `open()`.
    pub fn commands(&self) -> &[NativeCmd] {
        &self.commands
    }

    pub fn stats(&self) -> CommandListStats {
        self.stats
    }

    pub fn automatic_barriers_enabled(&self) -> bool {
        self.automatic_barriers
    }

    pub(crate) fn retained(&self) -> &[Retained] {
        &self.retained
    }

    pub(crate) fn permanent_promotions(&self) -> PermanentPromotions {
        self.tracker.permanent_promotions()
    }

    fn check<T>(&self, result: Result<T, CommandListError>) -> Result<T, CommandListError> {
        if let Err(err) = &result {
            self.shared
                .callback
                .message(MessageSeverity::Error, &err.to_string());
        }
        result
    }

    fn ensure_open(&self) -> Result<(), CommandListError> {
        if self.open {
            Ok(())
        } else {
            Err(CommandListError::NotOpen)
        }
    }

    fn ensure_graphics_queue(&self, operation: &'static str) -> Result<(), CommandListError> {
        if self.params.queue.supports_graphics() {
            Ok(())
        } else {
            Err(CommandListError::UnsupportedOnQueue {
                operation,
                queue: self.params.queue,
            })
        }
    }

    fn ensure_compute_queue(&self, operation: &'static str) -> Result<(), CommandListError> {
        if self.params.queue.supports_compute() {
            Ok(())
        } else {
            Err(CommandListError::UnsupportedOnQueue {
                operation,
                queue: self.params.queue,
            })
        }
    }

    fn retain<T: Any + Send + Sync>(&mut self, object: &Arc<T>) {
        let key = Arc::as_ptr(object) as *const () as usize;
        if self.retained_keys.insert(key) {
            self.retained.push(object.clone());
        }
    }

    fn retain_texture(&mut self, texture: &TextureHandle) {
        if texture.desc().track_liveness {
            self.retain(texture);
        }
    }

    fn retain_buffer(&mut self, buffer: &BufferHandle) {
        if buffer.desc().track_liveness {
            self.retain(buffer);
        }
    }

    fn retain_binding_sets(&mut self, bindings: &[BindingSetHandle]) {
        for set in bindings {
            if set.desc().track_liveness {
                self.retain(set);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Starts a new recording. Everything recorded or tracked before is
    /// discarded.
    pub fn open(&mut self) -> Result<(), CommandListError> {
        if self.open {
            return self.check(Err(CommandListError::AlreadyOpen));
        }
        self.open = true;
        self.commands.clear();
        self.tracker.reset();
        self.barriers.clear();
        self.retained.clear();
        self.retained_keys.clear();
        self.clear_cached_states();
        self.render_pass = None;
        self.any_volatile_buffer_writes = false;
        self.volatile_versions.clear();
        self.stats = CommandListStats::default();
        self.automatic_barriers = self
            .params
            .enable_automatic_barriers
            .unwrap_or(self.shared.config.automatic_barriers);
        Ok(())
    }

    /// Ends the render pass, returns keep-initial-state resources to their
    /// initial state and commits the remaining barriers.
    pub fn close(&mut self) -> Result<(), CommandListError> {
        let result = self.ensure_open();
        self.check(result)?;
        self.end_render_pass();
        self.tracker.restore_initial_states(&mut self.barriers);
        self.commit();
        self.clear_cached_states();
        self.open = false;
        tracing::debug!(
            commands = self.commands.len(),
            retained = self.retained.len(),
            "command list closed"
        );
        Ok(())
    }

    /// Forgets every cached state without closing; the next draw or dispatch
    /// needs a fresh `set*_state`.
    pub fn clear_state(&mut self) -> Result<(), CommandListError> {
        let result = self.ensure_open();
        self.check(result)?;
        self.end_render_pass();
        self.clear_cached_states();
        Ok(())
    }

    fn clear_cached_states(&mut self) {
        self.graphics = None;
        self.compute = None;
        self.meshlet = None;
        self.ray_tracing = None;
    }

    // -----------------------------------------------------------------------
    // Barriers and render passes
    // -----------------------------------------------------------------------

    /// Flushes pending barriers as one batch. No-op when nothing is pending.
    fn commit(&mut self) {
        if !self.barriers.has_pending() {
            return;
        }
        self.end_render_pass();
        let Some(batch) = self.barriers.take() else {
            return;
        };
        let uav = batch.uav_barrier_count() as u64;
        CommandListStats::bump(&mut self.stats.barrier_batches);
        self.stats.texture_barriers = self
            .stats
            .texture_barriers
            .saturating_add(batch.textures.len() as u64);
        self.stats.buffer_barriers = self
            .stats
            .buffer_barriers
            .saturating_add(batch.buffers.len() as u64);
        self.stats.uav_barriers = self.stats.uav_barriers.saturating_add(uav);
        tracing::trace!(
            textures = batch.textures.len(),
            buffers = batch.buffers.len(),
            uav,
            "commit barriers"
        );
        self.commands.push(NativeCmd::Barriers(batch));
    }

    pub fn commit_barriers(&mut self) -> Result<(), CommandListError> {
        let result = self.ensure_open();
        self.check(result)?;
        self.commit();
        Ok(())
    }

    fn end_render_pass(&mut self) {
        if let Some(framebuffer) = self.render_pass.take() {
            tracing::trace!(framebuffer = framebuffer.id().0, "end render pass");
            self.commands.push(NativeCmd::EndRenderPass);
            CommandListStats::bump(&mut self.stats.render_pass_ends);
        }
    }

    fn begin_render_pass(&mut self, framebuffer: &FramebufferHandle) {
        debug_assert!(self.render_pass.is_none());
        debug_assert!(!self.barriers.has_pending());
        let info = framebuffer.info();
        tracing::trace!(framebuffer = framebuffer.id().0, "begin render pass");
        self.commands.push(NativeCmd::BeginRenderPass {
            framebuffer: framebuffer.id(),
            width: info.width,
            height: info.height,
            array_size: info.array_size,
        });
        self.render_pass = Some(framebuffer.clone());
        CommandListStats::bump(&mut self.stats.render_pass_begins);
    }

    /// Commits pending barriers (ending the pass if needed), then makes sure
    /// `framebuffer`'s render pass is active.
    fn resume_render_pass(&mut self, framebuffer: &FramebufferHandle) {
        if self.barriers.has_pending() {
            self.end_render_pass();
            self.commit();
        }
        let same = self
            .render_pass
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, framebuffer));
        if !same {
            self.end_render_pass();
            self.begin_render_pass(framebuffer);
        }
    }

    // -----------------------------------------------------------------------
    // Resource state requests
    // -----------------------------------------------------------------------

    fn require_texture(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        self.retain_texture(texture);
        self.tracker
            .require_texture_state(texture, subresources, state, &mut self.barriers)
    }

    fn require_buffer(
        &mut self,
        buffer: &BufferHandle,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        self.retain_buffer(buffer);
        self.tracker
            .require_buffer_state(buffer, state, &mut self.barriers)
    }

    /// Runs a group of state requests as one unit: if any of them fails, the
    /// tracker and the pending barriers are put back as they were.
    fn require_all(
        &mut self,
        requests: impl FnOnce(&mut Self) -> Result<(), CommandListError>,
    ) -> Result<(), CommandListError> {
        let pending = self.barriers.checkpoint();
        self.tracker.begin_transaction();
        let result = requests(self);
        if result.is_ok() {
            self.tracker.commit_transaction();
        } else {
            self.tracker.rollback_transaction();
            self.barriers.rollback(pending);
        }
        result
    }

    fn require_binding_set(&mut self, set: &BindingSetHandle) -> Result<(), CommandListError> {
        for required in set.required_states() {
            match required {
                RequiredState::Texture {
                    texture,
                    subresources,
                    state,
                } => self.require_texture(texture, subresources, state)?,
                RequiredState::Buffer { buffer, state } => self.require_buffer(buffer, state)?,
            }
        }
        Ok(())
    }

    fn require_framebuffer(&mut self, framebuffer: &FramebufferHandle) -> Result<(), CommandListError> {
        let desc = framebuffer.desc();
        for (attachment, view) in desc.color_attachments.iter().zip(framebuffer.color_views()) {
            self.require_texture(&attachment.texture, view.subresources, ResourceStates::RENDER_TARGET)?;
        }
        if let (Some(attachment), Some(view)) = (&desc.depth_attachment, framebuffer.depth_view()) {
            let state = if attachment.is_read_only {
                ResourceStates::DEPTH_READ
            } else {
                ResourceStates::DEPTH_WRITE
            };
            self.require_texture(&attachment.texture, view.subresources, state)?;
        }
        if let (Some(attachment), Some(view)) =
            (&desc.shading_rate_attachment, framebuffer.shading_rate_view())
        {
            self.require_texture(
                &attachment.texture,
                view.subresources,
                ResourceStates::SHADING_RATE_SURFACE,
            )?;
        }
        Ok(())
    }

    fn check_volatile_written(&self, bindings: &[BindingSetHandle]) -> Result<(), CommandListError> {
        for set in bindings {
            for buffer in set.volatile_buffers() {
                if !self.volatile_versions.contains_key(&buffer.id()) {
                    return Err(CommandListError::VolatileBufferNotWritten {
                        buffer: buffer.id(),
                    });
                }
            }
        }
        Ok(())
    }

    fn bind_binding_sets(
        &mut self,
        bind_point: PipelineBindPoint,
        map: &PipelineBindingMap,
        bindings: &[BindingSetHandle],
    ) {
        let sets = bindings
            .iter()
            .enumerate()
            .map(|(slot, set)| BoundBindingSet {
                descriptor_set: map.descriptor_set(slot).unwrap_or(slot as u32),
                binding_set: set.id(),
                volatile_versions: set
                    .volatile_buffers()
                    .iter()
                    .map(|buffer| VolatileBufferVersion {
                        buffer: buffer.id(),
                        version: self.volatile_versions.get(&buffer.id()).copied().unwrap_or(0),
                    })
                    .collect(),
            })
            .collect();
        self.commands
            .push(NativeCmd::BindBindingSets { bind_point, sets });
        CommandListStats::bump(&mut self.stats.binding_set_binds);
    }

    /// Rebinds the current state's binding sets if a volatile buffer moved
    /// since they were bound.
    fn rebind_volatile(&mut self) {
        if !self.any_volatile_buffer_writes {
            return;
        }
        let current = if let Some(state) = &self.graphics {
            Some((PipelineBindPoint::Graphics, state.pipeline.binding_map().clone(), state.bindings.clone()))
        } else if let Some(state) = &self.meshlet {
            Some((PipelineBindPoint::Graphics, state.pipeline.binding_map().clone(), state.bindings.clone()))
        } else if let Some(state) = &self.compute {
            Some((PipelineBindPoint::Compute, state.pipeline.binding_map().clone(), state.bindings.clone()))
        } else {
            self.ray_tracing.as_ref().map(|state| {
                (
                    PipelineBindPoint::RayTracing,
                    state.shader_table.pipeline().binding_map().clone(),
                    state.bindings.clone(),
                )
            })
        };
        if let Some((bind_point, map, bindings)) = current {
            if bindings.iter().any(|set| !set.volatile_buffers().is_empty()) {
                self.bind_binding_sets(bind_point, &map, &bindings);
                CommandListStats::bump(&mut self.stats.volatile_rebinds);
            }
        }
        self.any_volatile_buffer_writes = false;
    }

    // -----------------------------------------------------------------------
    // set*State
    // -----------------------------------------------------------------------

    pub fn set_graphics_state(&mut self, state: &GraphicsState) -> Result<(), CommandListError> {
        let result = self.apply_graphics_state(state);
        self.check(result)?;
        self.validate_render_pass(&state.framebuffer, state.pipeline.framebuffer_info());
        Ok(())
    }

    fn apply_graphics_state(&mut self, state: &GraphicsState) -> Result<(), CommandListError> {
        self.ensure_open()?;
        self.ensure_graphics_queue("set_graphics_state")?;
        let pipeline = &state.pipeline;
        if pipeline.framebuffer_info() != state.framebuffer.framebuffer_info() {
            return Err(CommandListError::IncompatibleFramebuffer);
        }
        check_bindings(pipeline.binding_map(), &state.bindings)?;
        self.check_volatile_written(&state.bindings)?;
        check_viewports(&state.viewport)?;
        if let Some(vb) = state
            .vertex_buffers
            .iter()
            .find(|vb| vb.slot as usize >= MAX_VERTEX_ATTRIBUTES)
        {
            return Err(CommandListError::VertexBufferSlotOutOfRange { slot: vb.slot });
        }
        if let Some(ib) = &state.index_buffer {
            if !ib.format.is_index_format() {
                return Err(CommandListError::InvalidArgument(
                    "index buffer format must be R16Uint or R32Uint",
                ));
            }
        }

        self.retain(pipeline);
        self.retain(&state.framebuffer);
        self.retain_binding_sets(&state.bindings);
        for vb in &state.vertex_buffers {
            self.retain_buffer(&vb.buffer);
        }
        if let Some(ib) = &state.index_buffer {
            self.retain_buffer(&ib.buffer);
        }
        if let Some(indirect) = &state.indirect_params {
            self.retain_buffer(indirect);
        }

        if self.automatic_barriers {
            self.require_all(|list| {
                list.require_framebuffer(&state.framebuffer)?;
                for set in &state.bindings {
                    list.require_binding_set(set)?;
                }
                for vb in &state.vertex_buffers {
                    list.require_buffer(&vb.buffer, ResourceStates::VERTEX_BUFFER)?;
                }
                if let Some(ib) = &state.index_buffer {
                    list.require_buffer(&ib.buffer, ResourceStates::INDEX_BUFFER)?;
                }
                if let Some(indirect) = &state.indirect_params {
                    list.require_buffer(indirect, ResourceStates::INDIRECT_ARGUMENT)?;
                }
                Ok(())
            })?;
        }

        self.resume_render_pass(&state.framebuffer);

        let previous = self.graphics.take();
        let dynamic = pipeline.dynamic_states();

        let update_pipeline = previous
            .as_ref()
            .map_or(true, |prev| !Arc::ptr_eq(&prev.pipeline, pipeline));
        if update_pipeline {
            self.commands.push(NativeCmd::BindPipeline {
                bind_point: PipelineBindPoint::Graphics,
                pipeline: pipeline.native(),
            });
            CommandListStats::bump(&mut self.stats.pipeline_binds);
        }

        let bindings_differ = previous
            .as_ref()
            .map_or(true, |prev| !same_bindings(&prev.bindings, &state.bindings));
        if !state.bindings.is_empty()
            && (update_pipeline || bindings_differ || self.any_volatile_buffer_writes)
        {
            if !update_pipeline && !bindings_differ {
                CommandListStats::bump(&mut self.stats.volatile_rebinds);
            }
            self.bind_binding_sets(PipelineBindPoint::Graphics, pipeline.binding_map(), &state.bindings);
        }

        self.set_dynamic_state(
            dynamic,
            update_pipeline,
            &state.viewport,
            previous.as_ref().map(|p| &p.viewport),
            state.dynamic_stencil_ref,
            previous.as_ref().map(|p| p.dynamic_stencil_ref),
            state.blend_constant_color,
            previous.as_ref().map(|p| p.blend_constant_color),
        );

        if let Some(ib) = &state.index_buffer {
            let unchanged = previous.as_ref().is_some_and(|prev| {
                prev.index_buffer.as_ref() == Some(ib)
            });
            if !unchanged {
                self.commands.push(NativeCmd::BindIndexBuffer {
                    buffer: ib.buffer.id(),
                    format: ib.format,
                    offset: ib.offset,
                });
            }
        }

        if !state.vertex_buffers.is_empty() {
            let unchanged = previous
                .as_ref()
                .is_some_and(|prev| prev.vertex_buffers == state.vertex_buffers);
            if !unchanged {
                self.commands.push(NativeCmd::BindVertexBuffers(
                    state
                        .vertex_buffers
                        .iter()
                        .map(|vb| VertexBufferBind {
                            slot: vb.slot,
                            buffer: vb.buffer.id(),
                            offset: vb.offset,
                        })
                        .collect(),
                ));
            }
        }

        if state.shading_rate_state.enabled && dynamic.contains(DynamicStates::SHADING_RATE) {
            let unchanged = previous
                .as_ref()
                .is_some_and(|prev| prev.shading_rate_state == state.shading_rate_state);
            if update_pipeline || !unchanged {
                self.commands
                    .push(NativeCmd::SetShadingRate(state.shading_rate_state));
            }
        }

        self.clear_cached_states();
        self.graphics = Some(state.clone());
        self.any_volatile_buffer_writes = false;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn set_dynamic_state(
        &mut self,
        dynamic: DynamicStates,
        update_pipeline: bool,
        viewport: &ViewportState,
        previous_viewport: Option<&ViewportState>,
        stencil_ref: u8,
        previous_stencil_ref: Option<u8>,
        blend_constants: Color,
        previous_blend_constants: Option<Color>,
    ) {
        if dynamic.contains(DynamicStates::VIEWPORT) && !viewport.viewports.is_empty() {
            let unchanged =
                previous_viewport.is_some_and(|prev| prev.viewports == viewport.viewports);
            if update_pipeline || !unchanged {
                self.commands
                    .push(NativeCmd::SetViewports(viewport.viewports.clone()));
            }
        }
        if dynamic.contains(DynamicStates::SCISSOR) && !viewport.scissor_rects.is_empty() {
            let unchanged =
                previous_viewport.is_some_and(|prev| prev.scissor_rects == viewport.scissor_rects);
            if update_pipeline || !unchanged {
                self.commands
                    .push(NativeCmd::SetScissorRects(viewport.scissor_rects.clone()));
            }
        }
        if dynamic.contains(DynamicStates::STENCIL_REFERENCE)
            && (update_pipeline || previous_stencil_ref != Some(stencil_ref))
        {
            self.commands.push(NativeCmd::SetStencilReference(stencil_ref));
        }
        if dynamic.contains(DynamicStates::BLEND_CONSTANTS)
            && (update_pipeline || previous_blend_constants != Some(blend_constants))
        {
            self.commands.push(NativeCmd::SetBlendConstants(blend_constants));
        }
    }

    /// Cross-checks the cache after a graphics or meshlet state was applied.
    fn validate_render_pass(
        &self,
        framebuffer: &FramebufferHandle,
        pipeline_info: &FramebufferInfo,
    ) {
        if !self.shared.config.validate_state_cache {
            return;
        }
        let active = self
            .render_pass
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, framebuffer));
        if !active {
            self.shared.callback.message(
                MessageSeverity::Fatal,
                "state cache out of sync: render pass does not match the cached framebuffer",
            );
        }
        if pipeline_info != framebuffer.framebuffer_info() {
            self.shared.callback.message(
                MessageSeverity::Fatal,
                "state cache out of sync: pipeline signature does not match the active framebuffer",
            );
        }
    }

    pub fn set_compute_state(&mut self, state: &ComputeState) -> Result<(), CommandListError> {
        let result = self.apply_compute_state(state);
        self.check(result)
    }

    fn apply_compute_state(&mut self, state: &ComputeState) -> Result<(), CommandListError> {
        self.ensure_open()?;
        self.ensure_compute_queue("set_compute_state")?;
        let pipeline = &state.pipeline;
        check_bindings(pipeline.binding_map(), &state.bindings)?;
        self.check_volatile_written(&state.bindings)?;

        self.retain(pipeline);
        self.retain_binding_sets(&state.bindings);
        if let Some(indirect) = &state.indirect_params {
            self.retain_buffer(indirect);
        }

        if self.automatic_barriers {
            self.require_all(|list| {
                for set in &state.bindings {
                    list.require_binding_set(set)?;
                }
                if let Some(indirect) = &state.indirect_params {
                    list.require_buffer(indirect, ResourceStates::INDIRECT_ARGUMENT)?;
                }
                Ok(())
            })?;
        }

        self.end_render_pass();
        self.commit();

        let previous = self.compute.take();
        let update_pipeline = previous
            .as_ref()
            .map_or(true, |prev| !Arc::ptr_eq(&prev.pipeline, pipeline));
        if update_pipeline {
            self.commands.push(NativeCmd::BindPipeline {
                bind_point: PipelineBindPoint::Compute,
                pipeline: pipeline.native(),
            });
            CommandListStats::bump(&mut self.stats.pipeline_binds);
        }

        let bindings_differ = previous
            .as_ref()
            .map_or(true, |prev| !same_bindings(&prev.bindings, &state.bindings));
        if !state.bindings.is_empty()
            && (update_pipeline || bindings_differ || self.any_volatile_buffer_writes)
        {
            if !update_pipeline && !bindings_differ {
                CommandListStats::bump(&mut self.stats.volatile_rebinds);
            }
            self.bind_binding_sets(PipelineBindPoint::Compute, pipeline.binding_map(), &state.bindings);
        }

        self.clear_cached_states();
        self.compute = Some(state.clone());
        self.any_volatile_buffer_writes = false;
        Ok(())
    }

    pub fn set_meshlet_state(&mut self, state: &MeshletState) -> Result<(), CommandListError> {
        let result = self.apply_meshlet_state(state);
        self.check(result)?;
        self.validate_render_pass(&state.framebuffer, state.pipeline.framebuffer_info());
        Ok(())
    }

    fn apply_meshlet_state(&mut self, state: &MeshletState) -> Result<(), CommandListError> {
        self.ensure_open()?;
        self.ensure_graphics_queue("set_meshlet_state")?;
        let pipeline = &state.pipeline;
        if pipeline.framebuffer_info() != state.framebuffer.framebuffer_info() {
            return Err(CommandListError::IncompatibleFramebuffer);
        }
        check_bindings(pipeline.binding_map(), &state.bindings)?;
        self.check_volatile_written(&state.bindings)?;
        check_viewports(&state.viewport)?;

        self.retain(pipeline);
        self.retain(&state.framebuffer);
        self.retain_binding_sets(&state.bindings);
        if let Some(indirect) = &state.indirect_params {
            self.retain_buffer(indirect);
        }

        if self.automatic_barriers {
            self.require_all(|list| {
                list.require_framebuffer(&state.framebuffer)?;
                for set in &state.bindings {
                    list.require_binding_set(set)?;
                }
                if let Some(indirect) = &state.indirect_params {
                    list.require_buffer(indirect, ResourceStates::INDIRECT_ARGUMENT)?;
                }
                Ok(())
            })?;
        }

        self.resume_render_pass(&state.framebuffer);

        let previous = self.meshlet.take();
        let update_pipeline = previous
            .as_ref()
            .map_or(true, |prev| !Arc::ptr_eq(&prev.pipeline, pipeline));
        if update_pipeline {
            self.commands.push(NativeCmd::BindPipeline {
                bind_point: PipelineBindPoint::Graphics,
                pipeline: pipeline.native(),
            });
            CommandListStats::bump(&mut self.stats.pipeline_binds);
        }

        let bindings_differ = previous
            .as_ref()
            .map_or(true, |prev| !same_bindings(&prev.bindings, &state.bindings));
        if !state.bindings.is_empty()
            && (update_pipeline || bindings_differ || self.any_volatile_buffer_writes)
        {
            if !update_pipeline && !bindings_differ {
                CommandListStats::bump(&mut self.stats.volatile_rebinds);
            }
            self.bind_binding_sets(PipelineBindPoint::Graphics, pipeline.binding_map(), &state.bindings);
        }

        self.set_dynamic_state(
            pipeline.dynamic_states(),
            update_pipeline,
            &state.viewport,
            previous.as_ref().map(|p| &p.viewport),
            state.dynamic_stencil_ref,
            previous.as_ref().map(|p| p.dynamic_stencil_ref),
            state.blend_constant_color,
            previous.as_ref().map(|p| p.blend_constant_color),
        );

        self.clear_cached_states();
        self.meshlet = Some(state.clone());
        self.any_volatile_buffer_writes = false;
        Ok(())
    }

    pub fn set_ray_tracing_state(&mut self, state: &RayTracingState) -> Result<(), CommandListError> {
        let result = self.apply_ray_tracing_state(state);
        self.check(result)
    }

    fn apply_ray_tracing_state(&mut self, state: &RayTracingState) -> Result<(), CommandListError> {
        self.ensure_open()?;
        self.ensure_compute_queue("set_ray_tracing_state")?;
        let pipeline = state.shader_table.pipeline().clone();
        check_bindings(pipeline.binding_map(), &state.bindings)?;
        self.check_volatile_written(&state.bindings)?;

        self.retain(&state.shader_table);
        self.retain_binding_sets(&state.bindings);

        if self.automatic_barriers {
            self.require_all(|list| {
                state
                    .bindings
                    .iter()
                    .try_for_each(|set| list.require_binding_set(set))
            })?;
        }

        self.end_render_pass();
        self.commit();

        let previous = self.ray_tracing.take();
        let update_pipeline = previous
            .as_ref()
            .map_or(true, |prev| !Arc::ptr_eq(prev.shader_table.pipeline(), &pipeline));
        if update_pipeline {
            self.commands.push(NativeCmd::BindPipeline {
                bind_point: PipelineBindPoint::RayTracing,
                pipeline: pipeline.native(),
            });
            CommandListStats::bump(&mut self.stats.pipeline_binds);
        }

        let bindings_differ = previous
            .as_ref()
            .map_or(true, |prev| !same_bindings(&prev.bindings, &state.bindings));
        if !state.bindings.is_empty()
            && (update_pipeline || bindings_differ || self.any_volatile_buffer_writes)
        {
            if !update_pipeline && !bindings_differ {
                CommandListStats::bump(&mut self.stats.volatile_rebinds);
            }
            self.bind_binding_sets(
                PipelineBindPoint::RayTracing,
                pipeline.binding_map(),
                &state.bindings,
            );
        }

        self.clear_cached_states();
        self.ray_tracing = Some(state.clone());
        self.any_volatile_buffer_writes = false;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Draws and dispatches
    // -----------------------------------------------------------------------

    fn prepare_graphics_draw(&mut self) -> Result<(), CommandListError> {
        self.ensure_open()?;
        let framebuffer = self
            .graphics
            .as_ref()
            .map(|state| state.framebuffer.clone())
            .ok_or(CommandListError::NoGraphicsState)?;
        self.resume_render_pass(&framebuffer);
        self.rebind_volatile();
        Ok(())
    }

    fn graphics_indirect_buffer(&self) -> Result<ResourceId, CommandListError> {
        self.graphics
            .as_ref()
            .ok_or(CommandListError::NoGraphicsState)?
            .indirect_params
            .as_ref()
            .map(|buffer| buffer.id())
            .ok_or(CommandListError::MissingIndirectParams)
    }

    fn record_draw(&mut self, cmd: NativeCmd) {
        self.commands.push(cmd);
        CommandListStats::bump(&mut self.stats.draws);
    }

    fn record_dispatch(&mut self, cmd: NativeCmd) {
        self.commands.push(cmd);
        CommandListStats::bump(&mut self.stats.dispatches);
    }

    pub fn draw(&mut self, args: DrawArguments) -> Result<(), CommandListError> {
        let result = self.prepare_graphics_draw();
        self.check(result)?;
        self.record_draw(NativeCmd::Draw(args));
        Ok(())
    }

    pub fn draw_indexed(&mut self, args: DrawArguments) -> Result<(), CommandListError> {
        let result = self.prepare_graphics_draw().and_then(|()| {
            let has_index_buffer = self
                .graphics
                .as_ref()
                .is_some_and(|state| state.index_buffer.is_some());
            if has_index_buffer {
                Ok(())
            } else {
                Err(CommandListError::InvalidArgument(
                    "indexed draw without an index buffer in the graphics state",
                ))
            }
        });
        self.check(result)?;
        self.record_draw(NativeCmd::DrawIndexed(args));
        Ok(())
    }

    pub fn draw_indirect(&mut self, offset: u64, draw_count: u32) -> Result<(), CommandListError> {
        let result = self
            .ensure_open()
            .and_then(|()| self.graphics_indirect_buffer())
            .and_then(|buffer| self.prepare_graphics_draw().map(|()| buffer));
        let buffer = self.check(result)?;
        self.record_draw(NativeCmd::DrawIndirect {
            buffer,
            offset,
            draw_count,
        });
        Ok(())
    }

    pub fn draw_indexed_indirect(
        &mut self,
        offset: u64,
        draw_count: u32,
    ) -> Result<(), CommandListError> {
        let result = self
            .ensure_open()
            .and_then(|()| self.graphics_indirect_buffer())
            .and_then(|buffer| self.prepare_graphics_draw().map(|()| buffer));
        let buffer = self.check(result)?;
        self.record_draw(NativeCmd::DrawIndexedIndirect {
            buffer,
            offset,
            draw_count,
        });
        Ok(())
    }

    /// Indexed indirect draw whose draw count is read from `count_buffer`.
    pub fn draw_indexed_indirect_count(
        &mut self,
        offset: u64,
        count_buffer: &BufferHandle,
        count_offset: u64,
        max_draw_count: u32,
    ) -> Result<(), CommandListError> {
        let result = self
            .ensure_open()
            .and_then(|()| self.graphics_indirect_buffer())
            .and_then(|buffer| {
                self.retain_buffer(count_buffer);
                if self.automatic_barriers {
                    self.require_buffer(count_buffer, ResourceStates::INDIRECT_ARGUMENT)?;
                }
                self.prepare_graphics_draw().map(|()| buffer)
            });
        let buffer = self.check(result)?;
        self.record_draw(NativeCmd::DrawIndexedIndirectCount {
            buffer,
            offset,
            count_buffer: count_buffer.id(),
            count_offset,
            max_draw_count,
        });
        Ok(())
    }

    fn prepare_dispatch(&mut self) -> Result<(), CommandListError> {
        self.ensure_open()?;
        if self.compute.is_none() {
            return Err(CommandListError::NoComputeState);
        }
        self.commit();
        self.rebind_volatile();
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), CommandListError> {
        let result = self.prepare_dispatch();
        self.check(result)?;
        self.record_dispatch(NativeCmd::Dispatch { x, y, z });
        Ok(())
    }

    pub fn dispatch_indirect(&mut self, offset: u64) -> Result<(), CommandListError> {
        let result = self.prepare_dispatch().and_then(|()| {
            self.compute
                .as_ref()
                .and_then(|state| state.indirect_params.as_ref())
                .map(|buffer| buffer.id())
                .ok_or(CommandListError::MissingIndirectParams)
        });
        let buffer = self.check(result)?;
        self.record_dispatch(NativeCmd::DispatchIndirect { buffer, offset });
        Ok(())
    }

    pub fn dispatch_mesh(&mut self, x: u32, y: u32, z: u32) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            let framebuffer = self
                .meshlet
                .as_ref()
                .map(|state| state.framebuffer.clone())
                .ok_or(CommandListError::NoMeshletState)?;
            self.resume_render_pass(&framebuffer);
            self.rebind_volatile();
            Ok(())
        });
        self.check(result)?;
        self.record_draw(NativeCmd::DispatchMesh { x, y, z });
        Ok(())
    }

    pub fn dispatch_rays(&mut self, args: DispatchRaysArguments) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            let shader_table = self
                .ray_tracing
                .as_ref()
                .map(|state| state.shader_table.id())
                .ok_or(CommandListError::NoRayTracingState)?;
            self.commit();
            self.rebind_volatile();
            Ok(shader_table)
        });
        let shader_table = self.check(result)?;
        self.record_dispatch(NativeCmd::DispatchRays { shader_table, args });
        Ok(())
    }

    /// Uploads push constants for the current pipeline.
    pub fn set_push_constants(&mut self, data: &[u8]) -> Result<(), CommandListError> {
        let result = self.push_constants(data);
        self.check(result)
    }

    fn push_constants(&mut self, data: &[u8]) -> Result<(), CommandListError> {
        self.ensure_open()?;
        let max = self.shared.config.max_push_constant_size;
        if data.len() > max {
            return Err(CommandListError::PushConstantsTooLarge {
                size: data.len(),
                max,
            });
        }
        let map = if let Some(state) = &self.graphics {
            state.pipeline.binding_map()
        } else if let Some(state) = &self.compute {
            state.pipeline.binding_map()
        } else if let Some(state) = &self.meshlet {
            state.pipeline.binding_map()
        } else if let Some(state) = &self.ray_tracing {
            state.shader_table.pipeline().binding_map()
        } else {
            return Err(CommandListError::NoPipelineState);
        };
        let declared = map.push_constant_size() as usize;
        if declared == 0 {
            return Err(CommandListError::InvalidArgument(
                "current pipeline declares no push constants",
            ));
        }
        if data.len() > declared {
            return Err(CommandListError::PushConstantsTooLarge {
                size: data.len(),
                max: declared,
            });
        }
        let visibility = map.push_constant_visibility();
        self.commands.push(NativeCmd::PushConstants {
            visibility,
            data: data.to_vec(),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Explicit state control
    // -----------------------------------------------------------------------

    pub fn set_enable_automatic_barriers(&mut self, enable: bool) {
        self.automatic_barriers = enable;
    }

    /// Seeds the tracked state of `subresources` without emitting a barrier.
    pub fn begin_tracking_texture_state(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.retain_texture(texture);
            self.tracker.begin_tracking_texture(texture, subresources, state)
        });
        self.check(result)
    }

    pub fn begin_tracking_buffer_state(
        &mut self,
        buffer: &BufferHandle,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.retain_buffer(buffer);
            self.tracker.begin_tracking_buffer(buffer, state)
        });
        self.check(result)
    }

    /// Queues the transitions that bring `subresources` into `state`. Nothing
    /// is emitted until the next commit point.
    pub fn set_texture_state(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        let result = self
            .ensure_open()
            .and_then(|()| self.require_texture(texture, subresources, state));
        self.check(result)
    }

    pub fn set_buffer_state(
        &mut self,
        buffer: &BufferHandle,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        let result = self
            .ensure_open()
            .and_then(|()| self.require_buffer(buffer, state));
        self.check(result)
    }

    pub fn set_accel_struct_state(
        &mut self,
        accel: &AccelStructHandle,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.retain(accel);
            self.require_buffer(accel.storage(), state)
        });
        self.check(result)
    }

    /// Transitions the texture to `state` and fixes it there once this
    /// command list is executed.
    pub fn set_permanent_texture_state(
        &mut self,
        texture: &TextureHandle,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.retain_texture(texture);
            self.tracker
                .set_permanent_texture_state(texture, state, &mut self.barriers)
        });
        self.check(result)
    }

    pub fn set_permanent_buffer_state(
        &mut self,
        buffer: &BufferHandle,
        state: ResourceStates,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.retain_buffer(buffer);
            self.tracker
                .set_permanent_buffer_state(buffer, state, &mut self.barriers)
        });
        self.check(result)
    }

    /// UAV barriers between consecutive unordered-access uses of `texture`.
    /// The setting lasts until the command list is reopened.
    pub fn set_enable_uav_barriers_for_texture(&mut self, texture: &TextureHandle, enable: bool) {
        self.tracker.set_enable_uav_barriers_for_texture(texture, enable);
    }

    pub fn set_enable_uav_barriers_for_buffer(&mut self, buffer: &BufferHandle, enable: bool) {
        self.tracker.set_enable_uav_barriers_for_buffer(buffer, enable);
    }

    pub fn get_texture_subresource_state(
        &self,
        texture: &TextureHandle,
        array_slice: u32,
        mip_level: u32,
    ) -> ResourceStates {
        self.tracker
            .texture_subresource_state(texture, array_slice, mip_level)
    }

    pub fn get_buffer_state(&self, buffer: &BufferHandle) -> ResourceStates {
        self.tracker.buffer_state(buffer)
    }

    /// Requests every state `set` needs without touching pipeline state.
    pub fn set_resource_states_for_binding_set(
        &mut self,
        set: &BindingSetHandle,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.retain_binding_sets(std::slice::from_ref(set));
            self.require_all(|list| list.require_binding_set(set))
        });
        self.check(result)
    }

    pub fn set_resource_states_for_framebuffer(
        &mut self,
        framebuffer: &FramebufferHandle,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.retain(framebuffer);
            self.require_all(|list| list.require_framebuffer(framebuffer))
        });
        self.check(result)
    }

    // -----------------------------------------------------------------------
    // Clears, copies and uploads
    // -----------------------------------------------------------------------

    /// Ends the render pass, requests `states` when automatic barriers are on
    /// and commits, leaving the list ready for a transfer command.
    fn prepare_transfer(
        &mut self,
        textures: &[(&TextureHandle, TextureSubresourceSet, ResourceStates)],
        buffers: &[(&BufferHandle, ResourceStates)],
    ) -> Result<(), CommandListError> {
        for &(texture, _, _) in textures {
            self.retain_texture(texture);
        }
        for &(buffer, _) in buffers {
            self.retain_buffer(buffer);
        }
        if self.automatic_barriers {
            self.require_all(|list| {
                for &(texture, subresources, state) in textures {
                    list.require_texture(texture, subresources, state)?;
                }
                for &(buffer, state) in buffers {
                    list.require_buffer(buffer, state)?;
                }
                Ok(())
            })?;
        }
        self.end_render_pass();
        self.commit();
        Ok(())
    }

    fn check_slice(texture: &TextureHandle, slice: &TextureSlice) -> Result<(), CommandListError> {
        if slice.mip_level >= texture.desc().mip_levels
            || slice.array_slice >= texture.subresource_slices()
        {
            return Err(CommandListError::SubresourceOutOfRange {
                resource: texture.id(),
            });
        }
        Ok(())
    }

    fn check_buffer_range(
        buffer: &BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<(), CommandListError> {
        match offset.checked_add(size) {
            Some(end) if end <= buffer.desc().byte_size => Ok(()),
            _ => Err(CommandListError::InvalidArgument(
                "buffer access is out of bounds",
            )),
        }
    }

    pub fn clear_texture_float(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        color: Color,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.ensure_compute_queue("clear_texture_float")?;
            if texture.desc().format.is_depth_stencil() {
                return Err(CommandListError::InvalidArgument(
                    "depth textures are cleared with clear_depth_stencil_texture",
                ));
            }
            self.prepare_transfer(&[(texture, subresources, ResourceStates::COPY_DEST)], &[])
        });
        self.check(result)?;
        self.commands.push(NativeCmd::ClearTextureFloat {
            texture: texture.id(),
            subresources: subresources.resolve(texture.desc(), false),
            color,
        });
        Ok(())
    }

    pub fn clear_texture_uint(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        value: u32,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.ensure_compute_queue("clear_texture_uint")?;
            if texture.desc().format.is_depth_stencil() {
                return Err(CommandListError::InvalidArgument(
                    "depth textures are cleared with clear_depth_stencil_texture",
                ));
            }
            self.prepare_transfer(&[(texture, subresources, ResourceStates::COPY_DEST)], &[])
        });
        self.check(result)?;
        self.commands.push(NativeCmd::ClearTextureUint {
            texture: texture.id(),
            subresources: subresources.resolve(texture.desc(), false),
            value,
        });
        Ok(())
    }

    pub fn clear_depth_stencil_texture(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        depth: Option<f32>,
        stencil: Option<u8>,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.ensure_graphics_queue("clear_depth_stencil_texture")?;
            let info = texture.desc().format.info();
            if !info.has_depth && !info.has_stencil {
                return Err(CommandListError::InvalidArgument(
                    "texture does not have a depth or stencil format",
                ));
            }
            if depth.is_none() && stencil.is_none() {
                return Err(CommandListError::InvalidArgument(
                    "clear_depth_stencil_texture needs a depth or stencil value",
                ));
            }
            self.prepare_transfer(&[(texture, subresources, ResourceStates::COPY_DEST)], &[])
        });
        self.check(result)?;
        self.commands.push(NativeCmd::ClearDepthStencil {
            texture: texture.id(),
            subresources: subresources.resolve(texture.desc(), false),
            depth,
            stencil,
        });
        Ok(())
    }

    pub fn copy_texture(
        &mut self,
        dest: &TextureHandle,
        dest_slice: TextureSlice,
        src: &TextureHandle,
        src_slice: TextureSlice,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            Self::check_slice(dest, &dest_slice)?;
            Self::check_slice(src, &src_slice)?;
            self.prepare_transfer(
                &[
                    (dest, dest_slice.subresource(), ResourceStates::COPY_DEST),
                    (src, src_slice.subresource(), ResourceStates::COPY_SOURCE),
                ],
                &[],
            )
        });
        self.check(result)?;
        self.commands.push(NativeCmd::CopyTexture {
            dest: dest.id(),
            dest_slice: dest_slice.resolve(dest.desc()),
            src: src.id(),
            src_slice: src_slice.resolve(src.desc()),
        });
        CommandListStats::bump(&mut self.stats.copies);
        Ok(())
    }

    pub fn write_texture(
        &mut self,
        dest: &TextureHandle,
        array_slice: u32,
        mip_level: u32,
        data: &[u8],
        row_pitch: u64,
        depth_pitch: u64,
    ) -> Result<(), CommandListError> {
        let slice = TextureSlice {
            mip_level,
            array_slice,
            ..TextureSlice::default()
        };
        let result = self.ensure_open().and_then(|()| {
            Self::check_slice(dest, &slice)?;
            self.prepare_transfer(&[(dest, slice.subresource(), ResourceStates::COPY_DEST)], &[])
        });
        self.check(result)?;
        self.commands.push(NativeCmd::WriteTexture {
            texture: dest.id(),
            array_slice,
            mip_level,
            data: data.to_vec(),
            row_pitch,
            depth_pitch,
        });
        CommandListStats::bump(&mut self.stats.copies);
        Ok(())
    }

    /// Resolves a multisampled texture into a single-sampled one.
    pub fn resolve_texture(
        &mut self,
        dest: &TextureHandle,
        dest_subresources: TextureSubresourceSet,
        src: &TextureHandle,
        src_subresources: TextureSubresourceSet,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.ensure_graphics_queue("resolve_texture")?;
            if src.desc().sample_count <= 1 || dest.desc().sample_count != 1 {
                return Err(CommandListError::InvalidArgument(
                    "resolve needs a multisampled source and a single-sampled destination",
                ));
            }
            let dest_range = dest_subresources.resolve(dest.desc(), false);
            let src_range = src_subresources.resolve(src.desc(), false);
            if dest_range.num_mip_levels != src_range.num_mip_levels
                || dest_range.num_array_slices != src_range.num_array_slices
            {
                return Err(CommandListError::InvalidArgument(
                    "resolve source and destination ranges differ in size",
                ));
            }
            self.prepare_transfer(
                &[
                    (dest, dest_subresources, ResourceStates::RESOLVE_DEST),
                    (src, src_subresources, ResourceStates::RESOLVE_SOURCE),
                ],
                &[],
            )
        });
        self.check(result)?;
        self.commands.push(NativeCmd::ResolveTexture {
            dest: dest.id(),
            dest_subresources: dest_subresources.resolve(dest.desc(), false),
            src: src.id(),
            src_subresources: src_subresources.resolve(src.desc(), false),
        });
        CommandListStats::bump(&mut self.stats.copies);
        Ok(())
    }

    /// Writes `data` at `offset`. Volatile buffers get a fresh version per
    /// write and are rebound before the next draw or dispatch.
    pub fn write_buffer(
        &mut self,
        buffer: &BufferHandle,
        data: &[u8],
        offset: u64,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            Self::check_buffer_range(buffer, offset, data.len() as u64)?;
            if buffer.desc().is_volatile {
                if offset != 0 {
                    return Err(CommandListError::InvalidArgument(
                        "volatile buffers are written from offset 0",
                    ));
                }
                return self.next_volatile_version(buffer).map(Some);
            }
            self.prepare_transfer(&[], &[(buffer, ResourceStates::COPY_DEST)])
                .map(|()| None)
        });
        let version = self.check(result)?;
        if version.is_some() {
            self.retain_buffer(buffer);
            self.any_volatile_buffer_writes = true;
        }
        self.commands.push(NativeCmd::WriteBuffer {
            buffer: buffer.id(),
            offset,
            data: data.to_vec(),
            version,
        });
        CommandListStats::bump(&mut self.stats.copies);
        Ok(())
    }

    fn next_volatile_version(&mut self, buffer: &BufferHandle) -> Result<u32, CommandListError> {
        let desc = buffer.desc();
        let max_versions = if desc.max_versions == 0 {
            self.shared.config.default_volatile_versions
        } else {
            desc.max_versions
        };
        let next = self
            .volatile_versions
            .get(&buffer.id())
            .map_or(0, |v| v.saturating_add(1));
        if next >= max_versions {
            return Err(CommandListError::VolatileVersionsExhausted {
                buffer: buffer.id(),
                max_versions,
            });
        }
        self.volatile_versions.insert(buffer.id(), next);
        Ok(next)
    }

    pub fn clear_buffer_uint(&mut self, buffer: &BufferHandle, value: u32) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            if buffer.desc().is_volatile {
                return Err(CommandListError::InvalidArgument(
                    "volatile buffers cannot be cleared",
                ));
            }
            self.prepare_transfer(&[], &[(buffer, ResourceStates::COPY_DEST)])
        });
        self.check(result)?;
        self.commands.push(NativeCmd::ClearBufferUint {
            buffer: buffer.id(),
            value,
        });
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        dest: &BufferHandle,
        dest_offset: u64,
        src: &BufferHandle,
        src_offset: u64,
        size: u64,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            Self::check_buffer_range(dest, dest_offset, size)?;
            Self::check_buffer_range(src, src_offset, size)?;
            if dest.desc().is_volatile || src.desc().is_volatile {
                return Err(CommandListError::InvalidArgument(
                    "volatile buffers cannot be copied",
                ));
            }
            self.prepare_transfer(
                &[],
                &[
                    (dest, ResourceStates::COPY_DEST),
                    (src, ResourceStates::COPY_SOURCE),
                ],
            )
        });
        self.check(result)?;
        self.commands.push(NativeCmd::CopyBuffer {
            dest: dest.id(),
            dest_offset,
            src: src.id(),
            src_offset,
            size,
        });
        CommandListStats::bump(&mut self.stats.copies);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Acceleration structures
    // -----------------------------------------------------------------------

    pub fn build_bottom_level_accel_struct(
        &mut self,
        accel: &AccelStructHandle,
        geometries: &[GeometryDesc],
        flags: AccelStructBuildFlags,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.ensure_compute_queue("build_bottom_level_accel_struct")?;
            if accel.desc().is_top_level {
                return Err(CommandListError::InvalidArgument(
                    "bottom-level build on a top-level acceleration structure",
                ));
            }
            self.retain(accel);
            let inputs: Vec<(&BufferHandle, ResourceStates)> = geometries
                .iter()
                .flat_map(|geometry| geometry.input_buffers())
                .map(|buffer| (buffer, ResourceStates::ACCEL_STRUCT_BUILD_INPUT))
                .chain(std::iter::once((
                    accel.storage(),
                    ResourceStates::ACCEL_STRUCT_WRITE,
                )))
                .collect();
            self.prepare_transfer(&[], &inputs)
        });
        self.check(result)?;
        self.commands.push(NativeCmd::BuildBottomLevelAccelStruct {
            accel: accel.id(),
            geometry_count: geometries.len(),
            flags,
        });
        Ok(())
    }

    pub fn build_top_level_accel_struct(
        &mut self,
        accel: &AccelStructHandle,
        instances: &[InstanceDesc],
        flags: AccelStructBuildFlags,
    ) -> Result<(), CommandListError> {
        let result = self.ensure_open().and_then(|()| {
            self.ensure_compute_queue("build_top_level_accel_struct")?;
            let desc = accel.desc();
            if !desc.is_top_level {
                return Err(CommandListError::InvalidArgument(
                    "top-level build on a bottom-level acceleration structure",
                ));
            }
            if instances.len() > desc.top_level_max_instances as usize {
                return Err(CommandListError::InvalidArgument(
                    "more instances than the acceleration structure was created for",
                ));
            }
            self.retain(accel);
            for instance in instances {
                self.retain(&instance.bottom_level);
            }
            let buffers: Vec<(&BufferHandle, ResourceStates)> = instances
                .iter()
                .map(|instance| {
                    (
                        instance.bottom_level.storage(),
                        ResourceStates::ACCEL_STRUCT_BUILD_BLAS,
                    )
                })
                .chain(std::iter::once((
                    accel.storage(),
                    ResourceStates::ACCEL_STRUCT_WRITE,
                )))
                .collect();
            self.prepare_transfer(&[], &buffers)
        });
        self.check(result)?;
        self.commands.push(NativeCmd::BuildTopLevelAccelStruct {
            accel: accel.id(),
            instance_count: instances.len(),
            flags,
        });
        Ok(())
    }
}
