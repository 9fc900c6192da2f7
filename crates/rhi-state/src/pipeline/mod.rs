//! Pipeline and binding resolution.
//!
//! Resolution turns a portable pipeline description into everything the
//! native device needs to create the pipeline: validated shader stages,
//! specialization tables, the binding-slot map and the set of dynamic states.
//! It has no side effects; [`crate::Device`] hands the result to the native
//! device and wraps the native object.

mod framebuffer;
mod layout;
mod render_state;
mod shader;

use std::sync::Arc;

use bitflags::bitflags;

use crate::binding::BindingLayoutHandle;
use crate::error::PipelineError;
use crate::native::NativePipeline;
use crate::resource::ShaderTableId;
use crate::states::ShaderType;

pub use framebuffer::{
    framebuffer_view_dimension, Framebuffer, FramebufferAttachment, FramebufferDesc,
    FramebufferHandle, FramebufferInfo, FramebufferInfoEx, RenderTargetView,
};
pub use layout::PipelineBindingMap;
pub use render_state::{
    BlendFactor, BlendOp, BlendState, ColorMask, ComparisonFunc, CullMode, DepthStencilState,
    FillMode, PrimitiveType, RasterState, RenderState, RenderTargetBlend, ShadingRate,
    ShadingRateCombiner, SinglePassStereoState, StencilOp, StencilOpDesc, VariableRateShadingState,
    VertexAttributeDesc, VertexInputRate,
};
pub use shader::{
    Shader, ShaderDesc, ShaderHandle, ShaderStageInfo, SpecializationConstant,
    SpecializationInfo, SpecializationMapEntry, SpecializationTables,
};

bitflags! {
    /// Pipeline state set by the command list rather than baked into the
    /// pipeline object.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct DynamicStates: u8 {
        const VIEWPORT = 1 << 0;
        const SCISSOR = 1 << 1;
        const BLEND_CONSTANTS = 1 << 2;
        const STENCIL_REFERENCE = 1 << 3;
        const SHADING_RATE = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
    RayTracing,
}

fn dynamic_states(
    render_state: &RenderState,
    shading_rate: &VariableRateShadingState,
    framebuffer_info: &FramebufferInfo,
) -> DynamicStates {
    let mut states = DynamicStates::VIEWPORT | DynamicStates::SCISSOR;
    if render_state
        .blend_state
        .uses_constant_color(framebuffer_info.color_formats.len())
    {
        states |= DynamicStates::BLEND_CONSTANTS;
    }
    if render_state.depth_stencil_state.dynamic_stencil_ref {
        states |= DynamicStates::STENCIL_REFERENCE;
    }
    if shading_rate.enabled {
        states |= DynamicStates::SHADING_RATE;
    }
    states
}

fn check_stage(
    shader: &ShaderHandle,
    expected: ShaderType,
) -> Result<(ShaderType, &ShaderHandle), PipelineError> {
    let actual = shader.desc().shader_type;
    if actual != expected {
        return Err(PipelineError::ShaderStageMismatch { expected, actual });
    }
    Ok((expected, shader))
}

fn collect_stages<'a>(
    stages: &[(ShaderType, Option<&'a ShaderHandle>)],
) -> Result<Vec<(ShaderType, &'a ShaderHandle)>, PipelineError> {
    stages
        .iter()
        .filter_map(|&(stage, shader)| shader.map(|shader| check_stage(shader, stage)))
        .collect()
}

fn check_render_state(render_state: &RenderState) -> Result<(), PipelineError> {
    if render_state.single_pass_stereo.enabled {
        return Err(PipelineError::UnsupportedFeature("single-pass stereo"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Graphics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineDesc {
    pub primitive_type: PrimitiveType,
    /// Used when `primitive_type` is `PatchList`.
    pub patch_control_points: u32,
    pub input_layout: Vec<VertexAttributeDesc>,
    pub vs: Option<ShaderHandle>,
    pub hs: Option<ShaderHandle>,
    pub ds: Option<ShaderHandle>,
    pub gs: Option<ShaderHandle>,
    pub ps: Option<ShaderHandle>,
    pub render_state: RenderState,
    pub shading_rate_state: VariableRateShadingState,
    pub binding_layouts: Vec<BindingLayoutHandle>,
}

/// Everything needed to create a native graphics pipeline.
#[derive(Debug, Clone)]
pub struct ResolvedGraphicsPipeline {
    pub stages: Vec<ShaderStageInfo>,
    pub specialization: SpecializationTables,
    pub binding_map: PipelineBindingMap,
    pub dynamic_states: DynamicStates,
    pub patch_control_points: u32,
}

pub fn resolve_graphics_pipeline(
    desc: &GraphicsPipelineDesc,
    framebuffer_info: &FramebufferInfo,
) -> Result<ResolvedGraphicsPipeline, PipelineError> {
    check_render_state(&desc.render_state)?;
    if desc.vs.is_none() {
        return Err(PipelineError::MissingShader("vertex"));
    }
    if desc.primitive_type == PrimitiveType::PatchList && desc.patch_control_points == 0 {
        return Err(PipelineError::InvalidDescriptor(
            "patch list topology needs patch control points",
        ));
    }

    let stages = collect_stages(&[
        (ShaderType::VERTEX, desc.vs.as_ref()),
        (ShaderType::HULL, desc.hs.as_ref()),
        (ShaderType::DOMAIN, desc.ds.as_ref()),
        (ShaderType::GEOMETRY, desc.gs.as_ref()),
        (ShaderType::PIXEL, desc.ps.as_ref()),
    ])?;
    let (specialization, stages) = SpecializationTables::build(&stages);
    let binding_map = PipelineBindingMap::resolve(&desc.binding_layouts)?;

    Ok(ResolvedGraphicsPipeline {
        stages,
        specialization,
        binding_map,
        dynamic_states: dynamic_states(
            &desc.render_state,
            &desc.shading_rate_state,
            framebuffer_info,
        ),
        patch_control_points: if desc.primitive_type == PrimitiveType::PatchList {
            desc.patch_control_points
        } else {
            0
        },
    })
}

#[derive(Debug)]
pub struct GraphicsPipeline {
    desc: GraphicsPipelineDesc,
    framebuffer_info: FramebufferInfo,
    binding_map: PipelineBindingMap,
    dynamic_states: DynamicStates,
    native: NativePipeline,
}

pub type GraphicsPipelineHandle = Arc<GraphicsPipeline>;

impl GraphicsPipeline {
    pub(crate) fn new(
        desc: GraphicsPipelineDesc,
        framebuffer_info: FramebufferInfo,
        resolved: ResolvedGraphicsPipeline,
        native: NativePipeline,
    ) -> Self {
        Self {
            desc,
            framebuffer_info,
            binding_map: resolved.binding_map,
            dynamic_states: resolved.dynamic_states,
            native,
        }
    }

    pub fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }

    pub fn framebuffer_info(&self) -> &FramebufferInfo {
        &self.framebuffer_info
    }

    pub fn binding_map(&self) -> &PipelineBindingMap {
        &self.binding_map
    }

    pub fn dynamic_states(&self) -> DynamicStates {
        self.dynamic_states
    }

    pub fn native(&self) -> NativePipeline {
        self.native
    }
}

// ---------------------------------------------------------------------------
// Compute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ComputePipelineDesc {
    pub cs: Option<ShaderHandle>,
    pub binding_layouts: Vec<BindingLayoutHandle>,
}

#[derive(Debug, Clone)]
pub struct ResolvedComputePipeline {
    pub stage: ShaderStageInfo,
    pub specialization: SpecializationTables,
    pub binding_map: PipelineBindingMap,
}

pub fn resolve_compute_pipeline(
    desc: &ComputePipelineDesc,
) -> Result<ResolvedComputePipeline, PipelineError> {
    let cs = desc.cs.as_ref().ok_or(PipelineError::MissingShader("compute"))?;
    let stage = check_stage(cs, ShaderType::COMPUTE)?;
    let (specialization, mut stages) = SpecializationTables::build(&[stage]);
    let binding_map = PipelineBindingMap::resolve(&desc.binding_layouts)?;
    let stage = stages
        .pop()
        .ok_or(PipelineError::MissingShader("compute"))?;
    Ok(ResolvedComputePipeline {
        stage,
        specialization,
        binding_map,
    })
}

#[derive(Debug)]
pub struct ComputePipeline {
    desc: ComputePipelineDesc,
    binding_map: PipelineBindingMap,
    native: NativePipeline,
}

pub type ComputePipelineHandle = Arc<ComputePipeline>;

impl ComputePipeline {
    pub(crate) fn new(
        desc: ComputePipelineDesc,
        resolved: ResolvedComputePipeline,
        native: NativePipeline,
    ) -> Self {
        Self {
            desc,
            binding_map: resolved.binding_map,
            native,
        }
    }

    pub fn desc(&self) -> &ComputePipelineDesc {
        &self.desc
    }

    pub fn binding_map(&self) -> &PipelineBindingMap {
        &self.binding_map
    }

    pub fn native(&self) -> NativePipeline {
        self.native
    }
}

// ---------------------------------------------------------------------------
// Meshlet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MeshletPipelineDesc {
    pub primitive_type: PrimitiveType,
    pub amplification: Option<ShaderHandle>,
    pub mesh: Option<ShaderHandle>,
    pub ps: Option<ShaderHandle>,
    pub render_state: RenderState,
    pub binding_layouts: Vec<BindingLayoutHandle>,
}

#[derive(Debug, Clone)]
pub struct ResolvedMeshletPipeline {
    pub stages: Vec<ShaderStageInfo>,
    pub specialization: SpecializationTables,
    pub binding_map: PipelineBindingMap,
    pub dynamic_states: DynamicStates,
}

pub fn resolve_meshlet_pipeline(
    desc: &MeshletPipelineDesc,
    framebuffer_info: &FramebufferInfo,
) -> Result<ResolvedMeshletPipeline, PipelineError> {
    check_render_state(&desc.render_state)?;
    if desc.mesh.is_none() {
        return Err(PipelineError::MissingShader("mesh"));
    }
    let stages = collect_stages(&[
        (ShaderType::AMPLIFICATION, desc.amplification.as_ref()),
        (ShaderType::MESH, desc.mesh.as_ref()),
        (ShaderType::PIXEL, desc.ps.as_ref()),
    ])?;
    let (specialization, stages) = SpecializationTables::build(&stages);
    let binding_map = PipelineBindingMap::resolve(&desc.binding_layouts)?;
    Ok(ResolvedMeshletPipeline {
        stages,
        specialization,
        binding_map,
        dynamic_states: dynamic_states(
            &desc.render_state,
            &VariableRateShadingState::default(),
            framebuffer_info,
        ),
    })
}

#[derive(Debug)]
pub struct MeshletPipeline {
    desc: MeshletPipelineDesc,
    framebuffer_info: FramebufferInfo,
    binding_map: PipelineBindingMap,
    dynamic_states: DynamicStates,
    native: NativePipeline,
}

pub type MeshletPipelineHandle = Arc<MeshletPipeline>;

impl MeshletPipeline {
    pub(crate) fn new(
        desc: MeshletPipelineDesc,
        framebuffer_info: FramebufferInfo,
        resolved: ResolvedMeshletPipeline,
        native: NativePipeline,
    ) -> Self {
        Self {
            desc,
            framebuffer_info,
            binding_map: resolved.binding_map,
            dynamic_states: resolved.dynamic_states,
            native,
        }
    }

    pub fn desc(&self) -> &MeshletPipelineDesc {
        &self.desc
    }

    pub fn framebuffer_info(&self) -> &FramebufferInfo {
        &self.framebuffer_info
    }

    pub fn binding_map(&self) -> &PipelineBindingMap {
        &self.binding_map
    }

    pub fn dynamic_states(&self) -> DynamicStates {
        self.dynamic_states
    }

    pub fn native(&self) -> NativePipeline {
        self.native
    }
}

// ---------------------------------------------------------------------------
// Ray tracing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RayTracingShaderExport {
    pub export_name: String,
    pub shader: ShaderHandle,
}

#[derive(Debug, Clone, Default)]
pub struct HitGroupDesc {
    pub export_name: String,
    pub closest_hit: Option<ShaderHandle>,
    pub any_hit: Option<ShaderHandle>,
    pub intersection: Option<ShaderHandle>,
    pub is_procedural: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RayTracingPipelineDesc {
    /// Ray generation, miss and callable shaders.
    pub shaders: Vec<RayTracingShaderExport>,
    pub hit_groups: Vec<HitGroupDesc>,
    pub global_binding_layouts: Vec<BindingLayoutHandle>,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

#[derive(Debug, Clone)]
pub struct ResolvedRayTracingPipeline {
    pub stages: Vec<ShaderStageInfo>,
    pub specialization: SpecializationTables,
    pub binding_map: PipelineBindingMap,
}

pub fn resolve_ray_tracing_pipeline(
    desc: &RayTracingPipelineDesc,
) -> Result<ResolvedRayTracingPipeline, PipelineError> {
    let mut stages = Vec::new();
    for export in &desc.shaders {
        let actual = export.shader.desc().shader_type;
        let allowed = ShaderType::RAY_GENERATION | ShaderType::MISS | ShaderType::CALLABLE;
        if !actual.is_single_stage() || !allowed.contains(actual) {
            return Err(PipelineError::ShaderStageMismatch {
                expected: allowed,
                actual,
            });
        }
        stages.push((actual, &export.shader));
    }
    for group in &desc.hit_groups {
        if group.is_procedural && group.intersection.is_none() {
            return Err(PipelineError::MissingShader("intersection"));
        }
        stages.extend(collect_stages(&[
            (ShaderType::CLOSEST_HIT, group.closest_hit.as_ref()),
            (ShaderType::ANY_HIT, group.any_hit.as_ref()),
            (ShaderType::INTERSECTION, group.intersection.as_ref()),
        ])?);
    }
    if !stages
        .iter()
        .any(|(stage, _)| *stage == ShaderType::RAY_GENERATION)
    {
        return Err(PipelineError::MissingShader("ray generation"));
    }
    let (specialization, stages) = SpecializationTables::build(&stages);
    let binding_map = PipelineBindingMap::resolve(&desc.global_binding_layouts)?;
    Ok(ResolvedRayTracingPipeline {
        stages,
        specialization,
        binding_map,
    })
}

#[derive(Debug)]
pub struct RayTracingPipeline {
    desc: RayTracingPipelineDesc,
    binding_map: PipelineBindingMap,
    native: NativePipeline,
}

pub type RayTracingPipelineHandle = Arc<RayTracingPipeline>;

impl RayTracingPipeline {
    pub(crate) fn new(
        desc: RayTracingPipelineDesc,
        resolved: ResolvedRayTracingPipeline,
        native: NativePipeline,
    ) -> Self {
        Self {
            desc,
            binding_map: resolved.binding_map,
            native,
        }
    }

    pub fn desc(&self) -> &RayTracingPipelineDesc {
        &self.desc
    }

    pub fn binding_map(&self) -> &PipelineBindingMap {
        &self.binding_map
    }

    pub fn native(&self) -> NativePipeline {
        self.native
    }

    fn exports(&self, stage: ShaderType, name: &str) -> bool {
        self.desc
            .shaders
            .iter()
            .any(|e| e.export_name == name && e.shader.desc().shader_type == stage)
    }

    fn exports_hit_group(&self, name: &str) -> bool {
        self.desc.hit_groups.iter().any(|g| g.export_name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShaderTableDesc {
    pub ray_generation: String,
    pub miss_shaders: Vec<String>,
    pub hit_groups: Vec<String>,
    pub callable_shaders: Vec<String>,
}

/// Shader records of one ray tracing dispatch, bound to one pipeline.
#[derive(Debug)]
pub struct ShaderTable {
    id: ShaderTableId,
    pipeline: RayTracingPipelineHandle,
    desc: ShaderTableDesc,
}

pub type ShaderTableHandle = Arc<ShaderTable>;

impl ShaderTable {
    pub(crate) fn new(
        id: ShaderTableId,
        pipeline: RayTracingPipelineHandle,
        desc: ShaderTableDesc,
    ) -> Result<Self, PipelineError> {
        if !pipeline.exports(ShaderType::RAY_GENERATION, &desc.ray_generation) {
            return Err(PipelineError::UnknownShaderExport(desc.ray_generation));
        }
        for name in &desc.miss_shaders {
            if !pipeline.exports(ShaderType::MISS, name) {
                return Err(PipelineError::UnknownShaderExport(name.clone()));
            }
        }
        for name in &desc.callable_shaders {
            if !pipeline.exports(ShaderType::CALLABLE, name) {
                return Err(PipelineError::UnknownShaderExport(name.clone()));
            }
        }
        for name in &desc.hit_groups {
            if !pipeline.exports_hit_group(name) {
                return Err(PipelineError::UnknownShaderExport(name.clone()));
            }
        }
        Ok(Self { id, pipeline, desc })
    }

    pub fn id(&self) -> ShaderTableId {
        self.id
    }

    pub fn pipeline(&self) -> &RayTracingPipelineHandle {
        &self.pipeline
    }

    pub fn desc(&self) -> &ShaderTableDesc {
        &self.desc
    }
}
