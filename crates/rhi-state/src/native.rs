//! The fixed vocabulary of native calls a command list records, and the
//! interface to the native graphics API.
//!
//! Command lists never talk to the native API directly: they record a
//! [`NativeCmd`] stream which the device hands to a [`NativeDevice`] at
//! submission. Backends translate portable enums (formats, blend factors,
//! topologies) into their own.

use crate::barrier::BarrierBatch;
use crate::config::CommandQueue;
use crate::error::NativeError;
use crate::format::Format;
use crate::pipeline::{
    ComputePipelineDesc, FramebufferInfo, GraphicsPipelineDesc, MeshletPipelineDesc,
    PipelineBindPoint, RayTracingPipelineDesc, ResolvedComputePipeline, ResolvedGraphicsPipeline,
    ResolvedMeshletPipeline, ResolvedRayTracingPipeline, VariableRateShadingState,
};
use crate::resource::{
    AccelStructBuildFlags, BindingSetId, FramebufferId, ResourceId, ShaderTableId, TextureSlice,
    TextureSubresourceSet,
};
use crate::state::{Color, DispatchRaysArguments, DrawArguments, Rect, Viewport};
use crate::states::ShaderType;

/// Handle of a pipeline object owned by the native device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativePipeline(pub u64);

/// Current backing version of a volatile buffer at bind time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VolatileBufferVersion {
    pub buffer: ResourceId,
    pub version: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundBindingSet {
    /// Native descriptor set / root index.
    pub descriptor_set: u32,
    pub binding_set: BindingSetId,
    pub volatile_versions: Vec<VolatileBufferVersion>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexBufferBind {
    pub slot: u32,
    pub buffer: ResourceId,
    pub offset: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NativeCmd {
    Barriers(BarrierBatch),

    BeginRenderPass {
        framebuffer: FramebufferId,
        width: u32,
        height: u32,
        array_size: u32,
    },
    EndRenderPass,

    BindPipeline {
        bind_point: PipelineBindPoint,
        pipeline: NativePipeline,
    },
    BindBindingSets {
        bind_point: PipelineBindPoint,
        sets: Vec<BoundBindingSet>,
    },
    SetViewports(Vec<Viewport>),
    SetScissorRects(Vec<Rect>),
    SetStencilReference(u8),
    SetBlendConstants(Color),
    SetShadingRate(VariableRateShadingState),
    BindVertexBuffers(Vec<VertexBufferBind>),
    BindIndexBuffer {
        buffer: ResourceId,
        format: Format,
        offset: u64,
    },
    PushConstants {
        visibility: ShaderType,
        data: Vec<u8>,
    },

    Draw(DrawArguments),
    DrawIndexed(DrawArguments),
    DrawIndirect {
        buffer: ResourceId,
        offset: u64,
        draw_count: u32,
    },
    DrawIndexedIndirect {
        buffer: ResourceId,
        offset: u64,
        draw_count: u32,
    },
    DrawIndexedIndirectCount {
        buffer: ResourceId,
        offset: u64,
        count_buffer: ResourceId,
        count_offset: u64,
        max_draw_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: ResourceId,
        offset: u64,
    },
    DispatchMesh {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchRays {
        shader_table: ShaderTableId,
        args: DispatchRaysArguments,
    },

    ClearTextureFloat {
        texture: ResourceId,
        subresources: TextureSubresourceSet,
        color: Color,
    },
    ClearTextureUint {
        texture: ResourceId,
        subresources: TextureSubresourceSet,
        value: u32,
    },
    ClearDepthStencil {
        texture: ResourceId,
        subresources: TextureSubresourceSet,
        depth: Option<f32>,
        stencil: Option<u8>,
    },
    CopyTexture {
        dest: ResourceId,
        dest_slice: TextureSlice,
        src: ResourceId,
        src_slice: TextureSlice,
    },
    WriteTexture {
        texture: ResourceId,
        array_slice: u32,
        mip_level: u32,
        data: Vec<u8>,
        row_pitch: u64,
        depth_pitch: u64,
    },
    ResolveTexture {
        dest: ResourceId,
        dest_subresources: TextureSubresourceSet,
        src: ResourceId,
        src_subresources: TextureSubresourceSet,
    },
    WriteBuffer {
        buffer: ResourceId,
        offset: u64,
        data: Vec<u8>,
        /// Set for volatile buffers: the version the data was written to.
        version: Option<u32>,
    },
    ClearBufferUint {
        buffer: ResourceId,
        value: u32,
    },
    CopyBuffer {
        dest: ResourceId,
        dest_offset: u64,
        src: ResourceId,
        src_offset: u64,
        size: u64,
    },
    BuildBottomLevelAccelStruct {
        accel: ResourceId,
        geometry_count: usize,
        flags: AccelStructBuildFlags,
    },
    BuildTopLevelAccelStruct {
        accel: ResourceId,
        instance_count: usize,
        flags: AccelStructBuildFlags,
    },
}

impl NativeCmd {
    pub fn name(&self) -> &'static str {
        match self {
            NativeCmd::Barriers(_) => "Barriers",
            NativeCmd::BeginRenderPass { .. } => "BeginRenderPass",
            NativeCmd::EndRenderPass => "EndRenderPass",
            NativeCmd::BindPipeline { .. } => "BindPipeline",
            NativeCmd::BindBindingSets { .. } => "BindBindingSets",
            NativeCmd::SetViewports(_) => "SetViewports",
            NativeCmd::SetScissorRects(_) => "SetScissorRects",
            NativeCmd::SetStencilReference(_) => "SetStencilReference",
            NativeCmd::SetBlendConstants(_) => "SetBlendConstants",
            NativeCmd::SetShadingRate(_) => "SetShadingRate",
            NativeCmd::BindVertexBuffers(_) => "BindVertexBuffers",
            NativeCmd::BindIndexBuffer { .. } => "BindIndexBuffer",
            NativeCmd::PushConstants { .. } => "PushConstants",
            NativeCmd::Draw(_) => "Draw",
            NativeCmd::DrawIndexed(_) => "DrawIndexed",
            NativeCmd::DrawIndirect { .. } => "DrawIndirect",
            NativeCmd::DrawIndexedIndirect { .. } => "DrawIndexedIndirect",
            NativeCmd::DrawIndexedIndirectCount { .. } => "DrawIndexedIndirectCount",
            NativeCmd::Dispatch { .. } => "Dispatch",
            NativeCmd::DispatchIndirect { .. } => "DispatchIndirect",
            NativeCmd::DispatchMesh { .. } => "DispatchMesh",
            NativeCmd::DispatchRays { .. } => "DispatchRays",
            NativeCmd::ClearTextureFloat { .. } => "ClearTextureFloat",
            NativeCmd::ClearTextureUint { .. } => "ClearTextureUint",
            NativeCmd::ClearDepthStencil { .. } => "ClearDepthStencil",
            NativeCmd::CopyTexture { .. } => "CopyTexture",
            NativeCmd::WriteTexture { .. } => "WriteTexture",
            NativeCmd::ResolveTexture { .. } => "ResolveTexture",
            NativeCmd::WriteBuffer { .. } => "WriteBuffer",
            NativeCmd::ClearBufferUint { .. } => "ClearBufferUint",
            NativeCmd::CopyBuffer { .. } => "CopyBuffer",
            NativeCmd::BuildBottomLevelAccelStruct { .. } => "BuildBottomLevelAccelStruct",
            NativeCmd::BuildTopLevelAccelStruct { .. } => "BuildTopLevelAccelStruct",
        }
    }

    /// Commands that may only appear inside a render pass.
    pub fn requires_render_pass(&self) -> bool {
        matches!(
            self,
            NativeCmd::Draw(_)
                | NativeCmd::DrawIndexed(_)
                | NativeCmd::DrawIndirect { .. }
                | NativeCmd::DrawIndexedIndirect { .. }
                | NativeCmd::DrawIndexedIndirectCount { .. }
                | NativeCmd::DispatchMesh { .. }
        )
    }

    /// Commands that are illegal inside a render pass. Volatile buffer writes
    /// only move the buffer to new storage and may appear anywhere.
    pub fn forbidden_in_render_pass(&self) -> bool {
        matches!(
            self,
            NativeCmd::Barriers(_)
                | NativeCmd::BeginRenderPass { .. }
                | NativeCmd::Dispatch { .. }
                | NativeCmd::DispatchIndirect { .. }
                | NativeCmd::DispatchRays { .. }
                | NativeCmd::ClearTextureFloat { .. }
                | NativeCmd::ClearTextureUint { .. }
                | NativeCmd::ClearDepthStencil { .. }
                | NativeCmd::CopyTexture { .. }
                | NativeCmd::WriteTexture { .. }
                | NativeCmd::ResolveTexture { .. }
                | NativeCmd::WriteBuffer { version: None, .. }
                | NativeCmd::ClearBufferUint { .. }
                | NativeCmd::CopyBuffer { .. }
                | NativeCmd::BuildBottomLevelAccelStruct { .. }
                | NativeCmd::BuildTopLevelAccelStruct { .. }
        )
    }
}

pub struct GraphicsPipelineInfo<'a> {
    pub desc: &'a GraphicsPipelineDesc,
    pub framebuffer_info: &'a FramebufferInfo,
    pub resolved: &'a ResolvedGraphicsPipeline,
}

pub struct MeshletPipelineInfo<'a> {
    pub desc: &'a MeshletPipelineDesc,
    pub framebuffer_info: &'a FramebufferInfo,
    pub resolved: &'a ResolvedMeshletPipeline,
}

pub struct ComputePipelineInfo<'a> {
    pub desc: &'a ComputePipelineDesc,
    pub resolved: &'a ResolvedComputePipeline,
}

pub struct RayTracingPipelineInfo<'a> {
    pub desc: &'a RayTracingPipelineDesc,
    pub resolved: &'a ResolvedRayTracingPipeline,
}

/// Makes a submission wait until `instance` on `queue` has completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueWait {
    pub queue: CommandQueue,
    pub instance: u64,
}

pub struct Submission<'a> {
    pub queue: CommandQueue,
    pub instance: u64,
    pub waits: &'a [QueueWait],
    pub command_lists: &'a [&'a [NativeCmd]],
}

/// The native graphics API as seen by the device.
///
/// Pipeline creation must be atomic: on error nothing is retained. Completion
/// is reported per queue as the highest completed instance.
pub trait NativeDevice: Send {
    fn create_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineInfo<'_>,
    ) -> Result<NativePipeline, NativeError>;

    fn create_meshlet_pipeline(
        &mut self,
        info: &MeshletPipelineInfo<'_>,
    ) -> Result<NativePipeline, NativeError>;

    fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineInfo<'_>,
    ) -> Result<NativePipeline, NativeError>;

    fn create_ray_tracing_pipeline(
        &mut self,
        info: &RayTracingPipelineInfo<'_>,
    ) -> Result<NativePipeline, NativeError>;

    fn submit(&mut self, submission: &Submission<'_>) -> Result<(), NativeError>;

    fn last_completed_instance(&self, queue: CommandQueue) -> u64;

    /// Blocks until `instance` on `queue` has completed.
    fn wait_for_instance(&mut self, queue: CommandQueue, instance: u64)
        -> Result<(), NativeError>;

    /// Blocks until every queue is idle.
    fn wait_for_idle(&mut self) -> Result<(), NativeError>;
}
