//! Binding layouts and binding sets.
//!
//! A binding layout declares which slots a shader stage set reads; a binding
//! set fills a layout with concrete resources. Binding sets are immutable, so
//! the command list can compare them by identity to skip redundant binds.

use std::sync::Arc;

use crate::config::{MAX_PUSH_CONSTANT_SIZE, MAX_VOLATILE_CONSTANT_BUFFERS_PER_LAYOUT};
use crate::error::PipelineError;
use crate::format::Format;
use crate::resource::{
    AccelStructHandle, BindingLayoutId, BindingSetId, BufferHandle, BufferRange, SamplerId,
    TextureDimension, TextureHandle, TextureSubresourceSet,
};
use crate::states::{ResourceStates, ShaderType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    TextureSrv,
    TextureUav,
    TypedBufferSrv,
    TypedBufferUav,
    StructuredBufferSrv,
    StructuredBufferUav,
    RawBufferSrv,
    RawBufferUav,
    ConstantBuffer,
    VolatileConstantBuffer,
    Sampler,
    RayTracingAccelStruct,
    PushConstants,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingLayoutItem {
    pub slot: u32,
    pub ty: ResourceType,
    /// Byte size for push constants, 0 otherwise.
    pub size: u32,
}

impl BindingLayoutItem {
    pub fn new(slot: u32, ty: ResourceType) -> Self {
        Self { slot, ty, size: 0 }
    }

    pub fn push_constants(slot: u32, size: u32) -> Self {
        Self {
            slot,
            ty: ResourceType::PushConstants,
            size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindingLayoutDesc {
    pub visibility: ShaderType,
    pub register_space: u32,
    /// Use `register_space` as the native descriptor set index. Must agree
    /// across all layouts of a pipeline.
    pub register_space_is_descriptor_set: bool,
    pub bindings: Vec<BindingLayoutItem>,
}

#[derive(Debug)]
pub struct BindingLayout {
    id: BindingLayoutId,
    desc: BindingLayoutDesc,
    push_constant_size: u32,
}

pub type BindingLayoutHandle = Arc<BindingLayout>;

impl BindingLayout {
    pub(crate) fn new(id: BindingLayoutId, desc: BindingLayoutDesc) -> Result<Self, PipelineError> {
        let mut push_constants = desc
            .bindings
            .iter()
            .filter(|item| item.ty == ResourceType::PushConstants);
        let push_constant_size = push_constants.next().map_or(0, |item| item.size);
        if push_constants.next().is_some() {
            return Err(PipelineError::InvalidDescriptor(
                "binding layout declares more than one push constant block",
            ));
        }
        if push_constant_size as usize > MAX_PUSH_CONSTANT_SIZE {
            return Err(PipelineError::InvalidDescriptor(
                "push constant block exceeds the maximum size",
            ));
        }
        let volatile = desc
            .bindings
            .iter()
            .filter(|item| item.ty == ResourceType::VolatileConstantBuffer)
            .count();
        if volatile > MAX_VOLATILE_CONSTANT_BUFFERS_PER_LAYOUT {
            return Err(PipelineError::InvalidDescriptor(
                "too many volatile constant buffers in one binding layout",
            ));
        }
        Ok(Self {
            id,
            desc,
            push_constant_size,
        })
    }

    pub fn id(&self) -> BindingLayoutId {
        self.id
    }

    pub fn desc(&self) -> &BindingLayoutDesc {
        &self.desc
    }

    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }

    fn declares(&self, slot: u32, ty: ResourceType) -> bool {
        self.desc
            .bindings
            .iter()
            .any(|item| item.slot == slot && item.ty == ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferViewKind {
    #[default]
    Raw,
    Typed,
    Structured,
}

/// One resource in a binding set. The variant determines the view type.
#[derive(Debug, Clone)]
pub enum BindingSetItem {
    TextureSrv {
        slot: u32,
        texture: TextureHandle,
        subresources: TextureSubresourceSet,
        format: Format,
        dimension: TextureDimension,
    },
    TextureUav {
        slot: u32,
        texture: TextureHandle,
        subresources: TextureSubresourceSet,
        format: Format,
        dimension: TextureDimension,
    },
    BufferSrv {
        slot: u32,
        buffer: BufferHandle,
        range: BufferRange,
        kind: BufferViewKind,
    },
    BufferUav {
        slot: u32,
        buffer: BufferHandle,
        range: BufferRange,
        kind: BufferViewKind,
    },
    /// Volatile buffers bind as volatile constant buffers.
    ConstantBuffer {
        slot: u32,
        buffer: BufferHandle,
        range: BufferRange,
    },
    Sampler {
        slot: u32,
        sampler: SamplerId,
    },
    RayTracingAccelStruct {
        slot: u32,
        accel: AccelStructHandle,
    },
    PushConstants {
        slot: u32,
        byte_size: u32,
    },
}

impl BindingSetItem {
    pub fn texture_srv(slot: u32, texture: TextureHandle) -> Self {
        BindingSetItem::TextureSrv {
            slot,
            texture,
            subresources: TextureSubresourceSet::ALL,
            format: Format::Unknown,
            dimension: TextureDimension::Unknown,
        }
    }

    pub fn texture_uav(slot: u32, texture: TextureHandle) -> Self {
        BindingSetItem::TextureUav {
            slot,
            texture,
            subresources: TextureSubresourceSet::new(0, 1, 0, TextureSubresourceSet::ALL_ARRAY_SLICES),
            format: Format::Unknown,
            dimension: TextureDimension::Unknown,
        }
    }

    pub fn constant_buffer(slot: u32, buffer: BufferHandle) -> Self {
        BindingSetItem::ConstantBuffer {
            slot,
            buffer,
            range: BufferRange::ENTIRE,
        }
    }

    pub fn slot(&self) -> u32 {
        match self {
            BindingSetItem::TextureSrv { slot, .. }
            | BindingSetItem::TextureUav { slot, .. }
            | BindingSetItem::BufferSrv { slot, .. }
            | BindingSetItem::BufferUav { slot, .. }
            | BindingSetItem::ConstantBuffer { slot, .. }
            | BindingSetItem::Sampler { slot, .. }
            | BindingSetItem::RayTracingAccelStruct { slot, .. }
            | BindingSetItem::PushConstants { slot, .. } => *slot,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            BindingSetItem::TextureSrv { .. } => ResourceType::TextureSrv,
            BindingSetItem::TextureUav { .. } => ResourceType::TextureUav,
            BindingSetItem::BufferSrv { kind, .. } => match kind {
                BufferViewKind::Raw => ResourceType::RawBufferSrv,
                BufferViewKind::Typed => ResourceType::TypedBufferSrv,
                BufferViewKind::Structured => ResourceType::StructuredBufferSrv,
            },
            BindingSetItem::BufferUav { kind, .. } => match kind {
                BufferViewKind::Raw => ResourceType::RawBufferUav,
                BufferViewKind::Typed => ResourceType::TypedBufferUav,
                BufferViewKind::Structured => ResourceType::StructuredBufferUav,
            },
            BindingSetItem::ConstantBuffer { buffer, .. } if buffer.desc().is_volatile => {
                ResourceType::VolatileConstantBuffer
            }
            BindingSetItem::ConstantBuffer { .. } => ResourceType::ConstantBuffer,
            BindingSetItem::Sampler { .. } => ResourceType::Sampler,
            BindingSetItem::RayTracingAccelStruct { .. } => ResourceType::RayTracingAccelStruct,
            BindingSetItem::PushConstants { .. } => ResourceType::PushConstants,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BindingSetDesc {
    pub items: Vec<BindingSetItem>,
    pub track_liveness: bool,
}

/// State a binding set needs one of its resources to be in.
#[derive(Debug, Clone)]
pub enum RequiredState<'a> {
    Texture {
        texture: &'a TextureHandle,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    },
    Buffer {
        buffer: &'a BufferHandle,
        state: ResourceStates,
    },
}

#[derive(Debug)]
pub struct BindingSet {
    id: BindingSetId,
    desc: BindingSetDesc,
    layout: BindingLayoutHandle,
    volatile_buffers: Vec<BufferHandle>,
}

pub type BindingSetHandle = Arc<BindingSet>;

impl BindingSet {
    pub(crate) fn new(
        id: BindingSetId,
        desc: BindingSetDesc,
        layout: BindingLayoutHandle,
    ) -> Result<Self, PipelineError> {
        for item in &desc.items {
            if !layout.declares(item.slot(), item.resource_type()) {
                return Err(PipelineError::BindingNotInLayout { slot: item.slot() });
            }
        }
        let volatile_buffers = desc
            .items
            .iter()
            .filter_map(|item| match item {
                BindingSetItem::ConstantBuffer { buffer, .. } if buffer.desc().is_volatile => {
                    Some(buffer.clone())
                }
                _ => None,
            })
            .collect();
        Ok(Self {
            id,
            desc,
            layout,
            volatile_buffers,
        })
    }

    pub fn id(&self) -> BindingSetId {
        self.id
    }

    pub fn desc(&self) -> &BindingSetDesc {
        &self.desc
    }

    pub fn layout(&self) -> &BindingLayoutHandle {
        &self.layout
    }

    pub fn volatile_buffers(&self) -> &[BufferHandle] {
        &self.volatile_buffers
    }

    /// States every tracked resource of this set must be in before use.
    ///
    /// Volatile constant buffers and samplers are not tracked.
    pub fn required_states(&self) -> Vec<RequiredState<'_>> {
        let mut required = Vec::with_capacity(self.desc.items.len());
        for item in &self.desc.items {
            match item {
                BindingSetItem::TextureSrv {
                    texture,
                    subresources,
                    ..
                } => required.push(RequiredState::Texture {
                    texture,
                    subresources: *subresources,
                    state: ResourceStates::SHADER_RESOURCE,
                }),
                BindingSetItem::TextureUav {
                    texture,
                    subresources,
                    ..
                } => required.push(RequiredState::Texture {
                    texture,
                    subresources: *subresources,
                    state: ResourceStates::UNORDERED_ACCESS,
                }),
                BindingSetItem::BufferSrv { buffer, .. } => required.push(RequiredState::Buffer {
                    buffer,
                    state: ResourceStates::SHADER_RESOURCE,
                }),
                BindingSetItem::BufferUav { buffer, .. } => required.push(RequiredState::Buffer {
                    buffer,
                    state: ResourceStates::UNORDERED_ACCESS,
                }),
                BindingSetItem::ConstantBuffer { buffer, .. } if !buffer.desc().is_volatile => {
                    required.push(RequiredState::Buffer {
                        buffer,
                        state: ResourceStates::CONSTANT_BUFFER,
                    })
                }
                BindingSetItem::RayTracingAccelStruct { accel, .. } => {
                    required.push(RequiredState::Buffer {
                        buffer: accel.storage(),
                        state: ResourceStates::ACCEL_STRUCT_READ,
                    })
                }
                BindingSetItem::ConstantBuffer { .. }
                | BindingSetItem::Sampler { .. }
                | BindingSetItem::PushConstants { .. } => {}
            }
        }
        required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{BufferDesc, ResourceRegistry, TextureDesc};

    fn layout(items: Vec<BindingLayoutItem>) -> BindingLayoutHandle {
        Arc::new(
            BindingLayout::new(
                BindingLayoutId(1),
                BindingLayoutDesc {
                    visibility: ShaderType::ALL_GRAPHICS,
                    bindings: items,
                    ..BindingLayoutDesc::default()
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn set_items_must_match_layout() {
        let registry = ResourceRegistry::new();
        let cb = registry.create_buffer(BufferDesc::constant_buffer(256)).unwrap();
        let layout = layout(vec![BindingLayoutItem::new(0, ResourceType::ConstantBuffer)]);

        let ok = BindingSet::new(
            BindingSetId(2),
            BindingSetDesc {
                items: vec![BindingSetItem::constant_buffer(0, cb.clone())],
                track_liveness: true,
            },
            layout.clone(),
        );
        assert!(ok.is_ok());

        let err = BindingSet::new(
            BindingSetId(3),
            BindingSetDesc {
                items: vec![BindingSetItem::constant_buffer(1, cb)],
                track_liveness: true,
            },
            layout,
        )
        .unwrap_err();
        assert_eq!(err, PipelineError::BindingNotInLayout { slot: 1 });
    }

    #[test]
    fn volatile_buffers_bind_as_volatile_constant_buffers() {
        let registry = ResourceRegistry::new();
        let volatile = registry
            .create_buffer(BufferDesc::volatile_constant_buffer(256, 16))
            .unwrap();
        let texture = registry.create_texture(TextureDesc::default()).unwrap();
        let layout = layout(vec![
            BindingLayoutItem::new(0, ResourceType::VolatileConstantBuffer),
            BindingLayoutItem::new(1, ResourceType::TextureSrv),
        ]);
        let set = BindingSet::new(
            BindingSetId(2),
            BindingSetDesc {
                items: vec![
                    BindingSetItem::constant_buffer(0, volatile),
                    BindingSetItem::texture_srv(1, texture),
                ],
                track_liveness: true,
            },
            layout,
        )
        .unwrap();

        assert_eq!(set.volatile_buffers().len(), 1);
        let required = set.required_states();
        assert_eq!(required.len(), 1);
        assert!(matches!(
            required[0],
            RequiredState::Texture { state, .. } if state == ResourceStates::SHADER_RESOURCE
        ));
    }

    #[test]
    fn layout_rejects_oversized_push_constants() {
        let err = BindingLayout::new(
            BindingLayoutId(1),
            BindingLayoutDesc {
                bindings: vec![BindingLayoutItem::push_constants(0, 256)],
                ..BindingLayoutDesc::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDescriptor(_)));
    }
}
