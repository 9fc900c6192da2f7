//! Fixed-function pipeline state.
//!
//! These are portable descriptions; translating them to native enums is left
//! to the backend.

use bitflags::bitflags;

use crate::config::MAX_RENDER_TARGETS;
use crate::format::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
    TriangleListWithAdjacency,
    TriangleStripWithAdjacency,
    PatchList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    Zero,
    #[default]
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstAlpha,
    InvDstAlpha,
    DstColor,
    InvDstColor,
    SrcAlphaSaturate,
    ConstantColor,
    InvConstantColor,
    Src1Color,
    InvSrc1Color,
    Src1Alpha,
    InvSrc1Alpha,
}

impl BlendFactor {
    fn is_constant(self) -> bool {
        matches!(self, BlendFactor::ConstantColor | BlendFactor::InvConstantColor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
    }
}

impl Default for ColorMask {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderTargetBlend {
    pub blend_enable: bool,
    pub src_blend: BlendFactor,
    pub dest_blend: BlendFactor,
    pub blend_op: BlendOp,
    pub src_blend_alpha: BlendFactor,
    pub dest_blend_alpha: BlendFactor,
    pub blend_op_alpha: BlendOp,
    pub color_write_mask: ColorMask,
}

impl RenderTargetBlend {
    pub fn uses_constant_color(&self) -> bool {
        self.blend_enable
            && (self.src_blend.is_constant()
                || self.dest_blend.is_constant()
                || self.src_blend_alpha.is_constant()
                || self.dest_blend_alpha.is_constant())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlendState {
    pub targets: [RenderTargetBlend; MAX_RENDER_TARGETS],
    pub alpha_to_coverage_enable: bool,
}

impl BlendState {
    /// Whether any of the first `num_targets` targets reads the blend constant.
    pub fn uses_constant_color(&self, num_targets: usize) -> bool {
        self.targets
            .iter()
            .take(num_targets)
            .any(RenderTargetBlend::uses_constant_color)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComparisonFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilOpDesc {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub stencil_func: ComparisonFunc,
}

impl Default for StencilOpDesc {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            stencil_func: ComparisonFunc::Always,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    /// Baked reference value, used unless `dynamic_stencil_ref` is set.
    pub stencil_ref_value: u8,
    /// Take the stencil reference from the graphics state instead.
    pub dynamic_stencil_ref: bool,
    pub front_face_stencil: StencilOpDesc,
    pub back_face_stencil: StencilOpDesc,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_func: ComparisonFunc::Less,
            stencil_enable: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
            stencil_ref_value: 0,
            dynamic_stencil_ref: false,
            front_face_stencil: StencilOpDesc::default(),
            back_face_stencil: StencilOpDesc::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    Back,
    Front,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RasterState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_clip_enable: bool,
    pub scissor_enable: bool,
    pub multisample_enable: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub conservative_raster_enable: bool,
}

/// Single-pass stereo rendering. Not supported by any backend of this crate;
/// pipelines that enable it are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SinglePassStereoState {
    pub enabled: bool,
    pub independent_viewport_mask: bool,
    pub render_target_index_offset: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderState {
    pub blend_state: BlendState,
    pub depth_stencil_state: DepthStencilState,
    pub raster_state: RasterState,
    pub single_pass_stereo: SinglePassStereoState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShadingRate {
    #[default]
    X1x1,
    X1x2,
    X2x1,
    X2x2,
    X2x4,
    X4x2,
    X4x4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShadingRateCombiner {
    #[default]
    Passthrough,
    Override,
    Min,
    Max,
    ApplyRelative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VariableRateShadingState {
    pub enabled: bool,
    pub shading_rate: ShadingRate,
    pub pipeline_primitive_combiner: ShadingRateCombiner,
    pub image_combiner: ShadingRateCombiner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexInputRate {
    #[default]
    PerVertex,
    PerInstance,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributeDesc {
    pub name: String,
    pub format: Format,
    pub array_size: u32,
    pub buffer_index: u32,
    pub offset: u32,
    pub element_stride: u32,
    pub input_rate: VertexInputRate,
}
