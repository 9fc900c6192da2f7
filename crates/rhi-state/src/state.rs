//! State objects passed to the `set*_state` family.
//!
//! States are plain values built by the caller. The command list keeps a copy
//! of the last one applied and compares by handle identity, so passing the same
//! handles again costs nothing.

use std::sync::Arc;

use crate::binding::BindingSetHandle;
use crate::format::Format;
use crate::pipeline::{
    ComputePipelineHandle, FramebufferHandle, GraphicsPipelineHandle, MeshletPipelineHandle,
    ShaderTableHandle, VariableRateShadingState,
};
use crate::resource::BufferHandle;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            min_x: 0.0,
            max_x: width,
            min_y: 0.0,
            max_y: height,
            min_z: 0.0,
            max_z: 1.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl Rect {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            min_x: 0,
            max_x: width,
            min_y: 0,
            max_y: height,
        }
    }

    /// The rect covering `viewport`, rounded outwards.
    pub fn from_viewport(viewport: &Viewport) -> Self {
        Self {
            min_x: viewport.min_x.floor() as i32,
            max_x: viewport.max_x.ceil() as i32,
            min_y: viewport.min_y.floor() as i32,
            max_y: viewport.max_y.ceil() as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewportState {
    pub viewports: Vec<Viewport>,
    pub scissor_rects: Vec<Rect>,
}

impl ViewportState {
    /// One viewport with a matching scissor rect.
    pub fn single(viewport: Viewport) -> Self {
        Self {
            viewports: vec![viewport],
            scissor_rects: vec![Rect::from_viewport(&viewport)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone)]
pub struct VertexBufferBinding {
    pub buffer: BufferHandle,
    pub slot: u32,
    pub offset: u64,
}

impl PartialEq for VertexBufferBinding {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
            && self.slot == other.slot
            && self.offset == other.offset
    }
}

#[derive(Debug, Clone)]
pub struct IndexBufferBinding {
    pub buffer: BufferHandle,
    pub format: Format,
    pub offset: u64,
}

impl PartialEq for IndexBufferBinding {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
            && self.format == other.format
            && self.offset == other.offset
    }
}

pub(crate) fn same_bindings(a: &[BindingSetHandle], b: &[BindingSetHandle]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| Arc::ptr_eq(a, b))
}

#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub pipeline: GraphicsPipelineHandle,
    pub framebuffer: FramebufferHandle,
    pub viewport: ViewportState,
    pub shading_rate_state: VariableRateShadingState,
    pub blend_constant_color: Color,
    pub dynamic_stencil_ref: u8,
    /// One binding set per pipeline binding layout, by logical index.
    pub bindings: Vec<BindingSetHandle>,
    pub vertex_buffers: Vec<VertexBufferBinding>,
    pub index_buffer: Option<IndexBufferBinding>,
    pub indirect_params: Option<BufferHandle>,
}

impl GraphicsState {
    pub fn new(pipeline: GraphicsPipelineHandle, framebuffer: FramebufferHandle) -> Self {
        Self {
            pipeline,
            framebuffer,
            viewport: ViewportState::default(),
            shading_rate_state: VariableRateShadingState::default(),
            blend_constant_color: Color::default(),
            dynamic_stencil_ref: 0,
            bindings: Vec::new(),
            vertex_buffers: Vec::new(),
            index_buffer: None,
            indirect_params: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComputeState {
    pub pipeline: ComputePipelineHandle,
    pub bindings: Vec<BindingSetHandle>,
    pub indirect_params: Option<BufferHandle>,
}

impl ComputeState {
    pub fn new(pipeline: ComputePipelineHandle) -> Self {
        Self {
            pipeline,
            bindings: Vec::new(),
            indirect_params: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeshletState {
    pub pipeline: MeshletPipelineHandle,
    pub framebuffer: FramebufferHandle,
    pub viewport: ViewportState,
    pub blend_constant_color: Color,
    pub dynamic_stencil_ref: u8,
    pub bindings: Vec<BindingSetHandle>,
    pub indirect_params: Option<BufferHandle>,
}

impl MeshletState {
    pub fn new(pipeline: MeshletPipelineHandle, framebuffer: FramebufferHandle) -> Self {
        Self {
            pipeline,
            framebuffer,
            viewport: ViewportState::default(),
            blend_constant_color: Color::default(),
            dynamic_stencil_ref: 0,
            bindings: Vec::new(),
            indirect_params: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RayTracingState {
    pub shader_table: ShaderTableHandle,
    pub bindings: Vec<BindingSetHandle>,
}

impl RayTracingState {
    pub fn new(shader_table: ShaderTableHandle) -> Self {
        Self {
            shader_table,
            bindings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawArguments {
    /// Vertex count, or index count for indexed draws.
    pub vertex_count: u32,
    pub instance_count: u32,
    pub start_index_location: u32,
    pub start_vertex_location: u32,
    pub start_instance_location: u32,
}

impl Default for DrawArguments {
    fn default() -> Self {
        Self {
            vertex_count: 0,
            instance_count: 1,
            start_index_location: 0,
            start_vertex_location: 0,
            start_instance_location: 0,
        }
    }
}

impl DrawArguments {
    pub fn vertices(vertex_count: u32) -> Self {
        Self {
            vertex_count,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchRaysArguments {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Default for DispatchRaysArguments {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
        }
    }
}
