//! Shared helpers for `rhi-state` integration tests.
//!
//! Every test runs against the headless native device and installs a message
//! callback that records what the device and its command lists reported.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use rhi_state::pipeline::{
    ComputePipelineDesc, ComputePipelineHandle, FramebufferAttachment, FramebufferDesc,
    FramebufferHandle, GraphicsPipelineDesc, GraphicsPipelineHandle, HitGroupDesc,
    MeshletPipelineDesc, MeshletPipelineHandle, RayTracingPipelineDesc, RayTracingShaderExport,
    Shader, ShaderDesc, ShaderHandle, ShaderTableDesc, ShaderTableHandle,
};
use rhi_state::resource::{BufferDesc, BufferHandle, TextureDesc, TextureHandle};
use rhi_state::{
    BindingLayoutDesc, BindingLayoutHandle, BindingLayoutItem, CommandList,
    CommandListParameters, Device, DeviceConfig, Format, GraphicsState, HeadlessDevice,
    MessageCallback, MessageSeverity, NativeCmd, ResourceStates, ResourceType, ShaderType,
    Viewport, ViewportState,
};

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .try_init();
    });
}

#[derive(Debug, Default)]
pub struct RecordingCallback {
    messages: Mutex<Vec<(MessageSeverity, String)>>,
}

impl RecordingCallback {
    pub fn messages(&self) -> Vec<(MessageSeverity, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count(&self, severity: MessageSeverity) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == severity)
            .count()
    }
}

impl MessageCallback for RecordingCallback {
    fn message(&self, severity: MessageSeverity, text: &str) {
        self.messages.lock().unwrap().push((severity, text.to_owned()));
    }
}

pub struct Fixture {
    pub device: Device<HeadlessDevice>,
    pub messages: Arc<RecordingCallback>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_native(HeadlessDevice::new())
    }

    pub fn with_native(native: HeadlessDevice) -> Self {
        Self::with_config(native, DeviceConfig::default())
    }

    pub fn with_config(native: HeadlessDevice, config: DeviceConfig) -> Self {
        init_tracing();
        let messages = Arc::new(RecordingCallback::default());
        let device = Device::with_message_callback(native, config, messages.clone());
        Self { device, messages }
    }

    pub fn open_list(&self) -> CommandList {
        let mut list = self.device.create_command_list(CommandListParameters::default());
        list.open().unwrap();
        list
    }

    /// A 64x64 RGBA8 render target that stays in `RENDER_TARGET` between
    /// command lists.
    pub fn render_target(&self, format: Format) -> TextureHandle {
        self.device
            .create_texture(TextureDesc {
                width: 64,
                height: 64,
                format,
                is_render_target: true,
                initial_state: ResourceStates::RENDER_TARGET,
                keep_initial_state: true,
                debug_name: "render target".into(),
                ..TextureDesc::default()
            })
            .unwrap()
    }

    pub fn framebuffer(&self, color: &TextureHandle) -> FramebufferHandle {
        self.device
            .create_framebuffer(FramebufferDesc {
                color_attachments: vec![FramebufferAttachment::new(color.clone())],
                ..FramebufferDesc::default()
            })
            .unwrap()
    }

    pub fn binding_layout(&self, bindings: Vec<BindingLayoutItem>) -> BindingLayoutHandle {
        self.device
            .create_binding_layout(BindingLayoutDesc {
                visibility: ShaderType::ALL_GRAPHICS | ShaderType::COMPUTE,
                bindings,
                ..BindingLayoutDesc::default()
            })
            .unwrap()
    }

    pub fn graphics_pipeline(
        &mut self,
        framebuffer: &FramebufferHandle,
        layouts: &[BindingLayoutHandle],
    ) -> GraphicsPipelineHandle {
        self.device
            .create_graphics_pipeline_for_framebuffer(
                GraphicsPipelineDesc {
                    vs: Some(shader(ShaderType::VERTEX)),
                    ps: Some(shader(ShaderType::PIXEL)),
                    binding_layouts: layouts.to_vec(),
                    ..GraphicsPipelineDesc::default()
                },
                framebuffer,
            )
            .unwrap()
    }

    pub fn compute_pipeline(&mut self, layouts: &[BindingLayoutHandle]) -> ComputePipelineHandle {
        self.device
            .create_compute_pipeline(ComputePipelineDesc {
                cs: Some(shader(ShaderType::COMPUTE)),
                binding_layouts: layouts.to_vec(),
            })
            .unwrap()
    }

    pub fn meshlet_pipeline(
        &mut self,
        framebuffer: &FramebufferHandle,
        layouts: &[BindingLayoutHandle],
    ) -> MeshletPipelineHandle {
        self.device
            .create_meshlet_pipeline(
                MeshletPipelineDesc {
                    mesh: Some(shader(ShaderType::MESH)),
                    ps: Some(shader(ShaderType::PIXEL)),
                    binding_layouts: layouts.to_vec(),
                    ..MeshletPipelineDesc::default()
                },
                framebuffer.framebuffer_info(),
            )
            .unwrap()
    }

    /// A ray tracing pipeline exporting `raygen`, `miss` and the hit group
    /// `hit`, with a shader table that uses all three.
    pub fn shader_table(&mut self, layouts: &[BindingLayoutHandle]) -> ShaderTableHandle {
        let export = |name: &str, stage| RayTracingShaderExport {
            export_name: name.into(),
            shader: shader(stage),
        };
        let pipeline = self
            .device
            .create_ray_tracing_pipeline(RayTracingPipelineDesc {
                shaders: vec![
                    export("raygen", ShaderType::RAY_GENERATION),
                    export("miss", ShaderType::MISS),
                ],
                hit_groups: vec![HitGroupDesc {
                    export_name: "hit".into(),
                    closest_hit: Some(shader(ShaderType::CLOSEST_HIT)),
                    ..HitGroupDesc::default()
                }],
                global_binding_layouts: layouts.to_vec(),
                max_payload_size: 16,
                max_attribute_size: 8,
                max_recursion_depth: 1,
            })
            .unwrap();
        self.device
            .create_shader_table(
                &pipeline,
                ShaderTableDesc {
                    ray_generation: "raygen".into(),
                    miss_shaders: vec!["miss".into()],
                    hit_groups: vec!["hit".into()],
                    ..ShaderTableDesc::default()
                },
            )
            .unwrap()
    }

    /// A buffer tracked from `COMMON` at creation.
    pub fn buffer(&self, byte_size: u64) -> BufferHandle {
        self.device
            .create_buffer(BufferDesc {
                byte_size,
                keep_initial_state: true,
                ..BufferDesc::default()
            })
            .unwrap()
    }

    pub fn texture_2d(&self, mip_levels: u32) -> TextureHandle {
        self.device
            .create_texture(TextureDesc {
                width: 256,
                height: 256,
                mip_levels,
                format: Format::Rgba8Unorm,
                is_render_target: true,
                is_uav: true,
                ..TextureDesc::default()
            })
            .unwrap()
    }
}

pub fn shader(stage: ShaderType) -> ShaderHandle {
    Shader::new(
        ShaderDesc {
            shader_type: stage,
            entry_name: "main".into(),
            ..ShaderDesc::default()
        },
        vec![0u8; 16],
    )
}

pub fn graphics_state(
    pipeline: &GraphicsPipelineHandle,
    framebuffer: &FramebufferHandle,
) -> GraphicsState {
    let mut state = GraphicsState::new(pipeline.clone(), framebuffer.clone());
    state.viewport = ViewportState::single(Viewport::new(64.0, 64.0));
    state
}

pub fn count(commands: &[NativeCmd], name: &str) -> usize {
    commands.iter().filter(|cmd| cmd.name() == name).count()
}

pub fn names(commands: &[NativeCmd]) -> Vec<&'static str> {
    commands.iter().map(NativeCmd::name).collect()
}

pub fn position(commands: &[NativeCmd], name: &str) -> Option<usize> {
    commands.iter().position(|cmd| cmd.name() == name)
}

pub fn constant_buffer_layout(fixture: &Fixture, ty: ResourceType) -> BindingLayoutHandle {
    fixture.binding_layout(vec![BindingLayoutItem::new(0, ty)])
}
