use std::collections::BTreeMap;
use std::ops::Range;
use std::time::{Duration, Instant};

use rhi_state::native::{BoundBindingSet, NativePipeline, VertexBufferBind};
use rhi_state::pipeline::PipelineBindPoint;
use rhi_state::resource::{BindingSetId, FramebufferId, ResourceId, TextureSlice};
use rhi_state::{Color, DrawArguments, Format, NativeCmd, Rect, Viewport};
use thiserror::Error;
use wgpu::util::DeviceExt;

use crate::format;

/// Byte stride of one `DrawIndirectArgs` record.
const DRAW_INDIRECT_STRIDE: u64 = 16;
/// Byte stride of one `DrawIndexedIndirectArgs` record.
const DRAW_INDEXED_INDIRECT_STRIDE: u64 = 20;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeMetrics {
    pub commands_in: usize,
    pub render_passes: u32,
    pub compute_passes: u32,
    pub draw_calls: u32,
    pub dispatches: u32,
    pub pipeline_switches: u32,
    pub bind_group_changes: u32,
    /// Barrier records in the stream. wgpu tracks usage itself, so they are
    /// counted and skipped.
    pub barriers_dropped: u32,
    pub staging_uploads: u32,
    pub encode_time: Duration,
}

fn bump(counter: &mut u32) {
    *counter = counter.saturating_add(1);
}

#[derive(Debug)]
pub struct EncodeResult {
    pub command_buffer: wgpu::CommandBuffer,
    pub metrics: EncodeMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("missing pipeline {0:?}")]
    MissingPipeline(NativePipeline),

    #[error("missing bind group for binding set {0:?}")]
    MissingBindGroup(BindingSetId),

    #[error("missing buffer {0}")]
    MissingBuffer(ResourceId),

    #[error("missing texture {0}")]
    MissingTexture(ResourceId),

    #[error("missing framebuffer {0:?}")]
    MissingFramebuffer(FramebufferId),

    #[error("no storage for version {version} of volatile buffer {buffer}")]
    MissingVolatileVersion { buffer: ResourceId, version: u32 },

    #[error("arithmetic overflow while encoding {0}")]
    ArithmeticOverflow(&'static str),

    #[error("{0} is not aligned to wgpu::COPY_BUFFER_ALIGNMENT")]
    Misaligned(&'static str),

    #[error("{0} is not supported by the wgpu backend")]
    Unsupported(&'static str),

    #[error("unexpected EndRenderPass")]
    UnexpectedEndRenderPass,

    #[error("unexpected {0} inside a render pass")]
    UnexpectedCommandInRenderPass(&'static str),

    #[error("unexpected {0} outside a render pass")]
    UnexpectedCommandOutsideRenderPass(&'static str),

    #[error("unterminated render pass")]
    UnterminatedRenderPass,
}

fn range_u32(start: u32, count: u32, context: &'static str) -> Result<Range<u32>, EncodeError> {
    let end = start
        .checked_add(count)
        .ok_or(EncodeError::ArithmeticOverflow(context))?;
    Ok(start..end)
}

fn offset_u64(base: u64, add: u64, context: &'static str) -> Result<u64, EncodeError> {
    base.checked_add(add)
        .ok_or(EncodeError::ArithmeticOverflow(context))
}

fn check_copy_alignment(offset: u64, size: u64, context: &'static str) -> Result<(), EncodeError> {
    if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(EncodeError::Misaligned(context));
    }
    Ok(())
}

/// How the encoder handles a native command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSupport {
    Encoded,
    /// Accepted and skipped (barriers).
    Dropped,
    Unsupported,
}

pub fn support(cmd: &NativeCmd) -> CommandSupport {
    match cmd {
        NativeCmd::Barriers(_) => CommandSupport::Dropped,
        NativeCmd::BindPipeline { bind_point, .. } | NativeCmd::BindBindingSets { bind_point, .. }
            if *bind_point == PipelineBindPoint::RayTracing =>
        {
            CommandSupport::Unsupported
        }
        NativeCmd::SetViewports(viewports) if viewports.len() > 1 => CommandSupport::Unsupported,
        NativeCmd::SetScissorRects(rects) if rects.len() > 1 => CommandSupport::Unsupported,
        // wgpu only clears buffers to zero.
        NativeCmd::ClearBufferUint { value, .. } if *value != 0 => CommandSupport::Unsupported,
        NativeCmd::SetShadingRate(_)
        | NativeCmd::PushConstants { .. }
        | NativeCmd::DrawIndexedIndirectCount { .. }
        | NativeCmd::DispatchMesh { .. }
        | NativeCmd::DispatchRays { .. }
        | NativeCmd::ClearTextureFloat { .. }
        | NativeCmd::ClearTextureUint { .. }
        | NativeCmd::ClearDepthStencil { .. }
        | NativeCmd::WriteTexture { .. }
        | NativeCmd::ResolveTexture { .. }
        | NativeCmd::BuildBottomLevelAccelStruct { .. }
        | NativeCmd::BuildTopLevelAccelStruct { .. } => CommandSupport::Unsupported,
        _ => CommandSupport::Encoded,
    }
}

/// Rejects streams containing commands this backend cannot express, before
/// anything is encoded.
pub fn validate(cmds: &[NativeCmd]) -> Result<(), EncodeError> {
    match cmds
        .iter()
        .find(|cmd| support(cmd) == CommandSupport::Unsupported)
    {
        Some(cmd) => Err(EncodeError::Unsupported(cmd.name())),
        None => Ok(()),
    }
}

/// Attachments of one framebuffer object.
pub struct FramebufferTargets<'a> {
    pub color: Vec<&'a wgpu::TextureView>,
    pub depth_stencil: Option<(&'a wgpu::TextureView, Format)>,
}

/// Lookup interface that maps the identities in a [`NativeCmd`] stream to wgpu
/// objects.
pub trait ResourceProvider {
    fn render_pipeline(&self, id: NativePipeline) -> Option<&wgpu::RenderPipeline>;
    fn compute_pipeline(&self, id: NativePipeline) -> Option<&wgpu::ComputePipeline>;
    fn bind_group(&self, id: BindingSetId) -> Option<&wgpu::BindGroup>;
    fn buffer(&self, id: ResourceId) -> Option<&wgpu::Buffer>;
    fn texture(&self, id: ResourceId) -> Option<&wgpu::Texture>;
    fn framebuffer(&self, id: FramebufferId) -> Option<FramebufferTargets<'_>>;

    /// Byte offset of `version` inside a volatile buffer. Used both as the
    /// dynamic offset when binding and as the upload destination.
    fn volatile_offset(&self, buffer: ResourceId, version: u32) -> Option<u32> {
        let _ = (buffer, version);
        None
    }
}

#[derive(Debug, Default)]
struct BindState {
    pipeline: Option<NativePipeline>,
    bind_groups: BTreeMap<u32, (BindingSetId, Vec<u32>)>,
}

impl BindState {
    fn bind_pipeline(&mut self, pipeline: NativePipeline, metrics: &mut EncodeMetrics) {
        if self.pipeline != Some(pipeline) {
            bump(&mut metrics.pipeline_switches);
            self.pipeline = Some(pipeline);
        }
    }

    fn bind_group(
        &mut self,
        index: u32,
        set: BindingSetId,
        offsets: Vec<u32>,
        metrics: &mut EncodeMetrics,
    ) {
        let entry = (set, offsets);
        if self.bind_groups.get(&index) != Some(&entry) {
            bump(&mut metrics.bind_group_changes);
            self.bind_groups.insert(index, entry);
        }
    }
}

/// Graphics state carried across render passes. The native stream only sets
/// state once, but a wgpu pass starts empty.
#[derive(Debug, Default)]
struct GraphicsBindState {
    common: BindState,
    vertex_buffers: BTreeMap<u32, (ResourceId, u64)>,
    index_buffer: Option<(ResourceId, Format, u64)>,
    viewport: Option<Viewport>,
    scissor: Option<Rect>,
    stencil_reference: Option<u8>,
    blend_constants: Option<Color>,
}

#[derive(Debug, Default)]
struct ReplayState {
    graphics: GraphicsBindState,
    compute: BindState,
}

fn set_viewport(pass: &mut wgpu::RenderPass<'_>, viewport: &Viewport) {
    pass.set_viewport(
        viewport.min_x,
        viewport.min_y,
        viewport.width(),
        viewport.height(),
        viewport.min_z,
        viewport.max_z,
    );
}

fn set_scissor(pass: &mut wgpu::RenderPass<'_>, rect: &Rect) {
    let x = rect.min_x.max(0);
    let y = rect.min_y.max(0);
    let width = rect.max_x.max(x) - x;
    let height = rect.max_y.max(y) - y;
    pass.set_scissor_rect(x as u32, y as u32, width as u32, height as u32);
}

fn image_copy<'t>(texture: &'t wgpu::Texture, slice: &TextureSlice) -> wgpu::ImageCopyTexture<'t> {
    let z = if texture.dimension() == wgpu::TextureDimension::D3 {
        slice.z
    } else {
        slice.array_slice
    };
    wgpu::ImageCopyTexture {
        texture,
        mip_level: slice.mip_level,
        origin: wgpu::Origin3d {
            x: slice.x,
            y: slice.y,
            z,
        },
        aspect: wgpu::TextureAspect::All,
    }
}

/// Encoder that replays a closed command list's [`NativeCmd`] stream into a
/// wgpu command buffer.
///
/// Volatile buffer writes go straight to the queue: every version owns its
/// own storage range, so writing them ahead of the command buffer keeps each
/// draw's view of the data intact.
pub struct Encoder<'a, R: ResourceProvider> {
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
    resources: &'a R,
}

impl<'a, R: ResourceProvider> Encoder<'a, R> {
    pub fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue, resources: &'a R) -> Self {
        Self {
            device,
            queue,
            resources,
        }
    }

    pub fn encode(&self, cmds: &[NativeCmd]) -> Result<EncodeResult, EncodeError> {
        validate(cmds)?;
        let start = Instant::now();
        let mut metrics = EncodeMetrics {
            commands_in: cmds.len(),
            ..EncodeMetrics::default()
        };
        let mut state = ReplayState::default();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        let mut i = 0;
        while i < cmds.len() {
            match &cmds[i] {
                NativeCmd::BeginRenderPass { framebuffer, .. } => {
                    i = self.encode_render_pass(
                        &mut encoder,
                        *framebuffer,
                        cmds,
                        i + 1,
                        &mut state,
                        &mut metrics,
                    )?;
                }
                NativeCmd::Dispatch { .. } | NativeCmd::DispatchIndirect { .. } => {
                    i = self.encode_compute_pass(&mut encoder, cmds, i, &mut state, &mut metrics)?;
                }
                NativeCmd::EndRenderPass => return Err(EncodeError::UnexpectedEndRenderPass),
                cmd => {
                    self.encode_outside_pass(&mut encoder, cmd, &mut state, &mut metrics)?;
                    i += 1;
                }
            }
        }

        let command_buffer = encoder.finish();
        metrics.encode_time = start.elapsed();
        tracing::trace!(
            commands = metrics.commands_in,
            render_passes = metrics.render_passes,
            compute_passes = metrics.compute_passes,
            barriers_dropped = metrics.barriers_dropped,
            "encoded native command stream"
        );
        Ok(EncodeResult {
            command_buffer,
            metrics,
        })
    }

    fn render_pipeline(&self, id: NativePipeline) -> Result<&'a wgpu::RenderPipeline, EncodeError> {
        self.resources
            .render_pipeline(id)
            .ok_or(EncodeError::MissingPipeline(id))
    }

    fn compute_pipeline(&self, id: NativePipeline) -> Result<&'a wgpu::ComputePipeline, EncodeError> {
        self.resources
            .compute_pipeline(id)
            .ok_or(EncodeError::MissingPipeline(id))
    }

    fn bind_group(&self, id: BindingSetId) -> Result<&'a wgpu::BindGroup, EncodeError> {
        self.resources
            .bind_group(id)
            .ok_or(EncodeError::MissingBindGroup(id))
    }

    fn buffer(&self, id: ResourceId) -> Result<&'a wgpu::Buffer, EncodeError> {
        self.resources.buffer(id).ok_or(EncodeError::MissingBuffer(id))
    }

    fn texture(&self, id: ResourceId) -> Result<&'a wgpu::Texture, EncodeError> {
        self.resources
            .texture(id)
            .ok_or(EncodeError::MissingTexture(id))
    }

    fn volatile_offset(&self, buffer: ResourceId, version: u32) -> Result<u32, EncodeError> {
        self.resources
            .volatile_offset(buffer, version)
            .ok_or(EncodeError::MissingVolatileVersion { buffer, version })
    }

    fn dynamic_offsets(&self, set: &BoundBindingSet) -> Result<Vec<u32>, EncodeError> {
        set.volatile_versions
            .iter()
            .map(|v| self.volatile_offset(v.buffer, v.version))
            .collect()
    }

    fn track_vertex_buffers(&self, state: &mut GraphicsBindState, binds: &[VertexBufferBind]) {
        for bind in binds {
            state
                .vertex_buffers
                .insert(bind.slot, (bind.buffer, bind.offset));
        }
    }

    fn encode_outside_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        cmd: &NativeCmd,
        state: &mut ReplayState,
        metrics: &mut EncodeMetrics,
    ) -> Result<(), EncodeError> {
        match cmd {
            NativeCmd::Barriers(batch) => {
                metrics.barriers_dropped = metrics
                    .barriers_dropped
                    .saturating_add(u32::try_from(batch.len()).unwrap_or(u32::MAX));
            }
            NativeCmd::BindPipeline {
                bind_point,
                pipeline,
            } => match bind_point {
                PipelineBindPoint::Compute => state.compute.bind_pipeline(*pipeline, metrics),
                _ => state.graphics.common.bind_pipeline(*pipeline, metrics),
            },
            NativeCmd::BindBindingSets { bind_point, sets } => {
                let target = match bind_point {
                    PipelineBindPoint::Compute => &mut state.compute,
                    _ => &mut state.graphics.common,
                };
                for set in sets {
                    let offsets = self.dynamic_offsets(set)?;
                    target.bind_group(set.descriptor_set, set.binding_set, offsets, metrics);
                }
            }
            NativeCmd::SetViewports(viewports) => {
                state.graphics.viewport = viewports.first().copied();
            }
            NativeCmd::SetScissorRects(rects) => state.graphics.scissor = rects.first().copied(),
            NativeCmd::SetStencilReference(value) => {
                state.graphics.stencil_reference = Some(*value);
            }
            NativeCmd::SetBlendConstants(value) => state.graphics.blend_constants = Some(*value),
            NativeCmd::BindVertexBuffers(binds) => self.track_vertex_buffers(&mut state.graphics, binds),
            NativeCmd::BindIndexBuffer {
                buffer,
                format,
                offset,
            } => state.graphics.index_buffer = Some((*buffer, *format, *offset)),
            NativeCmd::WriteBuffer {
                buffer,
                offset,
                data,
                version: Some(version),
            } => self.write_volatile(*buffer, *offset, data, *version)?,
            NativeCmd::WriteBuffer {
                buffer,
                offset,
                data,
                version: None,
            } => self.upload(encoder, *buffer, *offset, data, metrics)?,
            NativeCmd::ClearBufferUint { buffer, .. } => {
                encoder.clear_buffer(self.buffer(*buffer)?, 0, None);
            }
            NativeCmd::CopyBuffer {
                dest,
                dest_offset,
                src,
                src_offset,
                size,
            } => {
                check_copy_alignment(*dest_offset, *size, "buffer copy destination")?;
                check_copy_alignment(*src_offset, *size, "buffer copy source")?;
                encoder.copy_buffer_to_buffer(
                    self.buffer(*src)?,
                    *src_offset,
                    self.buffer(*dest)?,
                    *dest_offset,
                    *size,
                );
            }
            NativeCmd::CopyTexture {
                dest,
                dest_slice,
                src,
                src_slice,
            } => {
                let src_texture = self.texture(*src)?;
                let dest_texture = self.texture(*dest)?;
                let depth = if src_texture.dimension() == wgpu::TextureDimension::D3 {
                    src_slice.depth
                } else {
                    1
                };
                encoder.copy_texture_to_texture(
                    image_copy(src_texture, src_slice),
                    image_copy(dest_texture, dest_slice),
                    wgpu::Extent3d {
                        width: src_slice.width,
                        height: src_slice.height,
                        depth_or_array_layers: depth,
                    },
                );
            }
            other => return Err(EncodeError::UnexpectedCommandOutsideRenderPass(other.name())),
        }
        Ok(())
    }

    fn write_volatile(
        &self,
        buffer: ResourceId,
        offset: u64,
        data: &[u8],
        version: u32,
    ) -> Result<(), EncodeError> {
        let base = self.volatile_offset(buffer, version)?;
        let at = offset_u64(u64::from(base), offset, "volatile buffer write")?;
        check_copy_alignment(at, data.len() as u64, "volatile buffer write")?;
        self.queue.write_buffer(self.buffer(buffer)?, at, data);
        Ok(())
    }

    fn upload(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffer: ResourceId,
        offset: u64,
        data: &[u8],
        metrics: &mut EncodeMetrics,
    ) -> Result<(), EncodeError> {
        check_copy_alignment(offset, data.len() as u64, "buffer upload")?;
        let dest = self.buffer(buffer)?;
        if data.is_empty() {
            return Ok(());
        }
        // Staged through the encoder so the write lands between the commands
        // that surround it.
        let staging = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("rhi-state upload"),
                contents: data,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        encoder.copy_buffer_to_buffer(&staging, 0, dest, offset, data.len() as u64);
        bump(&mut metrics.staging_uploads);
        Ok(())
    }

    fn replay_graphics<'p>(
        &self,
        pass: &mut wgpu::RenderPass<'p>,
        state: &GraphicsBindState,
    ) -> Result<(), EncodeError>
    where
        'a: 'p,
    {
        if let Some(pipeline) = state.common.pipeline {
            pass.set_pipeline(self.render_pipeline(pipeline)?);
        }
        for (&index, (set, offsets)) in &state.common.bind_groups {
            pass.set_bind_group(index, self.bind_group(*set)?, offsets);
        }
        for (&slot, &(buffer, offset)) in &state.vertex_buffers {
            pass.set_vertex_buffer(slot, self.buffer(buffer)?.slice(offset..));
        }
        if let Some((buffer, index_format, offset)) = state.index_buffer {
            let index_format = format::index_format(index_format)
                .ok_or(EncodeError::Unsupported("index buffer format"))?;
            pass.set_index_buffer(self.buffer(buffer)?.slice(offset..), index_format);
        }
        if let Some(viewport) = &state.viewport {
            set_viewport(pass, viewport);
        }
        if let Some(rect) = &state.scissor {
            set_scissor(pass, rect);
        }
        if let Some(reference) = state.stencil_reference {
            pass.set_stencil_reference(u32::from(reference));
        }
        if let Some(constants) = state.blend_constants {
            pass.set_blend_constant(format::color(constants));
        }
        Ok(())
    }

    fn encode_render_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        framebuffer: FramebufferId,
        cmds: &[NativeCmd],
        mut i: usize,
        state: &mut ReplayState,
        metrics: &mut EncodeMetrics,
    ) -> Result<usize, EncodeError> {
        bump(&mut metrics.render_passes);
        let targets = self
            .resources
            .framebuffer(framebuffer)
            .ok_or(EncodeError::MissingFramebuffer(framebuffer))?;

        // The native model keeps attachment contents across pass boundaries.
        let keep = wgpu::Operations {
            load: wgpu::LoadOp::Load,
            store: wgpu::StoreOp::Store,
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = targets
            .color
            .iter()
            .map(|&view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: keep,
                })
            })
            .collect();
        let depth_stencil_attachment =
            targets
                .depth_stencil
                .map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: format.info().has_depth.then_some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: format.info().has_stencil.then_some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: None,
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        self.replay_graphics(&mut pass, &state.graphics)?;

        while i < cmds.len() {
            match &cmds[i] {
                NativeCmd::EndRenderPass => return Ok(i + 1),
                NativeCmd::BindPipeline {
                    bind_point: PipelineBindPoint::Graphics,
                    pipeline,
                } => {
                    pass.set_pipeline(self.render_pipeline(*pipeline)?);
                    state.graphics.common.bind_pipeline(*pipeline, metrics);
                }
                NativeCmd::BindBindingSets {
                    bind_point: PipelineBindPoint::Graphics,
                    sets,
                } => {
                    for set in sets {
                        let offsets = self.dynamic_offsets(set)?;
                        pass.set_bind_group(set.descriptor_set, self.bind_group(set.binding_set)?, &offsets);
                        state
                            .graphics
                            .common
                            .bind_group(set.descriptor_set, set.binding_set, offsets, metrics);
                    }
                }
                NativeCmd::SetViewports(viewports) => {
                    if let Some(viewport) = viewports.first() {
                        set_viewport(&mut pass, viewport);
                        state.graphics.viewport = Some(*viewport);
                    }
                }
                NativeCmd::SetScissorRects(rects) => {
                    if let Some(rect) = rects.first() {
                        set_scissor(&mut pass, rect);
                        state.graphics.scissor = Some(*rect);
                    }
                }
                NativeCmd::SetStencilReference(reference) => {
                    pass.set_stencil_reference(u32::from(*reference));
                    state.graphics.stencil_reference = Some(*reference);
                }
                NativeCmd::SetBlendConstants(constants) => {
                    pass.set_blend_constant(format::color(*constants));
                    state.graphics.blend_constants = Some(*constants);
                }
                NativeCmd::BindVertexBuffers(binds) => {
                    for bind in binds {
                        pass.set_vertex_buffer(bind.slot, self.buffer(bind.buffer)?.slice(bind.offset..));
                    }
                    self.track_vertex_buffers(&mut state.graphics, binds);
                }
                NativeCmd::BindIndexBuffer {
                    buffer,
                    format: index_format,
                    offset,
                } => {
                    let wgpu_format = format::index_format(*index_format)
                        .ok_or(EncodeError::Unsupported("index buffer format"))?;
                    pass.set_index_buffer(self.buffer(*buffer)?.slice(*offset..), wgpu_format);
                    state.graphics.index_buffer = Some((*buffer, *index_format, *offset));
                }
                NativeCmd::Draw(args) => {
                    let (vertices, instances) = draw_ranges(args)?;
                    pass.draw(vertices, instances);
                    bump(&mut metrics.draw_calls);
                }
                NativeCmd::DrawIndexed(args) => {
                    let (indices, base_vertex, instances) = draw_indexed_ranges(args)?;
                    pass.draw_indexed(indices, base_vertex, instances);
                    bump(&mut metrics.draw_calls);
                }
                NativeCmd::DrawIndirect {
                    buffer,
                    offset,
                    draw_count,
                } => {
                    let buffer = self.buffer(*buffer)?;
                    for n in 0..u64::from(*draw_count) {
                        let at = offset_u64(*offset, n * DRAW_INDIRECT_STRIDE, "indirect draw")?;
                        pass.draw_indirect(buffer, at);
                        bump(&mut metrics.draw_calls);
                    }
                }
                NativeCmd::DrawIndexedIndirect {
                    buffer,
                    offset,
                    draw_count,
                } => {
                    let buffer = self.buffer(*buffer)?;
                    for n in 0..u64::from(*draw_count) {
                        let at = offset_u64(
                            *offset,
                            n * DRAW_INDEXED_INDIRECT_STRIDE,
                            "indexed indirect draw",
                        )?;
                        pass.draw_indexed_indirect(buffer, at);
                        bump(&mut metrics.draw_calls);
                    }
                }
                NativeCmd::WriteBuffer {
                    buffer,
                    offset,
                    data,
                    version: Some(version),
                } => self.write_volatile(*buffer, *offset, data, *version)?,
                NativeCmd::BeginRenderPass { .. } => return Err(EncodeError::UnterminatedRenderPass),
                other => return Err(EncodeError::UnexpectedCommandInRenderPass(other.name())),
            }
            i += 1;
        }

        Err(EncodeError::UnterminatedRenderPass)
    }

    /// Encodes the run of compute commands starting at `i` into one compute
    /// pass and returns the index of the first command after it.
    fn encode_compute_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        cmds: &[NativeCmd],
        mut i: usize,
        state: &mut ReplayState,
        metrics: &mut EncodeMetrics,
    ) -> Result<usize, EncodeError> {
        bump(&mut metrics.compute_passes);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: None,
            timestamp_writes: None,
        });
        if let Some(pipeline) = state.compute.pipeline {
            pass.set_pipeline(self.compute_pipeline(pipeline)?);
        }
        for (&index, (set, offsets)) in &state.compute.bind_groups {
            pass.set_bind_group(index, self.bind_group(*set)?, offsets);
        }

        while i < cmds.len() {
            match &cmds[i] {
                NativeCmd::Dispatch { x, y, z } => {
                    pass.dispatch_workgroups(*x, *y, *z);
                    bump(&mut metrics.dispatches);
                }
                NativeCmd::DispatchIndirect { buffer, offset } => {
                    pass.dispatch_workgroups_indirect(self.buffer(*buffer)?, *offset);
                    bump(&mut metrics.dispatches);
                }
                NativeCmd::BindPipeline {
                    bind_point: PipelineBindPoint::Compute,
                    pipeline,
                } => {
                    pass.set_pipeline(self.compute_pipeline(*pipeline)?);
                    state.compute.bind_pipeline(*pipeline, metrics);
                }
                NativeCmd::BindBindingSets {
                    bind_point: PipelineBindPoint::Compute,
                    sets,
                } => {
                    for set in sets {
                        let offsets = self.dynamic_offsets(set)?;
                        pass.set_bind_group(set.descriptor_set, self.bind_group(set.binding_set)?, &offsets);
                        state
                            .compute
                            .bind_group(set.descriptor_set, set.binding_set, offsets, metrics);
                    }
                }
                NativeCmd::Barriers(batch) => {
                    metrics.barriers_dropped = metrics
                        .barriers_dropped
                        .saturating_add(u32::try_from(batch.len()).unwrap_or(u32::MAX));
                }
                _ => break,
            }
            i += 1;
        }
        Ok(i)
    }
}

fn draw_ranges(args: &DrawArguments) -> Result<(Range<u32>, Range<u32>), EncodeError> {
    Ok((
        range_u32(args.start_vertex_location, args.vertex_count, "draw vertex range")?,
        range_u32(args.start_instance_location, args.instance_count, "draw instance range")?,
    ))
}

fn draw_indexed_ranges(args: &DrawArguments) -> Result<(Range<u32>, i32, Range<u32>), EncodeError> {
    let base_vertex = i32::try_from(args.start_vertex_location)
        .map_err(|_| EncodeError::ArithmeticOverflow("draw base vertex"))?;
    Ok((
        range_u32(args.start_index_location, args.vertex_count, "draw index range")?,
        base_vertex,
        range_u32(args.start_instance_location, args.instance_count, "draw instance range")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhi_state::{BarrierBatch, ShaderType};

    #[test]
    fn barriers_are_dropped_and_exotic_calls_rejected() {
        assert_eq!(
            support(&NativeCmd::Barriers(BarrierBatch::default())),
            CommandSupport::Dropped
        );
        assert_eq!(
            support(&NativeCmd::Draw(DrawArguments::vertices(3))),
            CommandSupport::Encoded
        );
        assert_eq!(
            support(&NativeCmd::DispatchMesh { x: 1, y: 1, z: 1 }),
            CommandSupport::Unsupported
        );
        assert_eq!(
            support(&NativeCmd::PushConstants {
                visibility: ShaderType::ALL_GRAPHICS,
                data: vec![0; 4],
            }),
            CommandSupport::Unsupported
        );
        assert_eq!(
            support(&NativeCmd::BindPipeline {
                bind_point: PipelineBindPoint::RayTracing,
                pipeline: NativePipeline(1),
            }),
            CommandSupport::Unsupported
        );
    }

    #[test]
    fn only_single_viewports_and_zero_clears_are_encoded() {
        let viewport = Viewport::new(8.0, 8.0);
        assert_eq!(
            support(&NativeCmd::SetViewports(vec![viewport])),
            CommandSupport::Encoded
        );
        assert_eq!(
            support(&NativeCmd::SetViewports(vec![viewport, viewport])),
            CommandSupport::Unsupported
        );
        let clear = |value| NativeCmd::ClearBufferUint {
            buffer: ResourceId(1),
            value,
        };
        assert_eq!(support(&clear(0)), CommandSupport::Encoded);
        assert_eq!(support(&clear(7)), CommandSupport::Unsupported);
    }

    #[test]
    fn validate_names_the_first_unsupported_command() {
        let cmds = vec![
            NativeCmd::Barriers(BarrierBatch::default()),
            NativeCmd::DispatchRays {
                shader_table: rhi_state::resource::ShaderTableId(1),
                args: Default::default(),
            },
            NativeCmd::DispatchMesh { x: 1, y: 1, z: 1 },
        ];
        assert_eq!(
            validate(&cmds),
            Err(EncodeError::Unsupported("DispatchRays"))
        );
        assert_eq!(validate(&cmds[..1]), Ok(()));
    }

    #[test]
    fn draw_ranges_reject_overflow() {
        let args = DrawArguments {
            vertex_count: 3,
            start_vertex_location: u32::MAX,
            ..DrawArguments::vertices(3)
        };
        assert_eq!(
            draw_ranges(&args),
            Err(EncodeError::ArithmeticOverflow("draw vertex range"))
        );
        assert_eq!(
            draw_indexed_ranges(&args),
            Err(EncodeError::ArithmeticOverflow("draw base vertex"))
        );

        let (vertices, instances) = draw_ranges(&DrawArguments::vertices(6)).unwrap();
        assert_eq!(vertices, 0..6);
        assert_eq!(instances, 0..1);
    }

    #[test]
    fn copies_must_be_four_byte_aligned() {
        assert_eq!(check_copy_alignment(0, 16, "copy"), Ok(()));
        assert_eq!(
            check_copy_alignment(2, 16, "copy"),
            Err(EncodeError::Misaligned("copy"))
        );
        assert_eq!(
            check_copy_alignment(0, 6, "copy"),
            Err(EncodeError::Misaligned("copy"))
        );
    }
}
