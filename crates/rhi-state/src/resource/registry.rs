use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::states::ResourceStates;

use super::{
    AccelStruct, AccelStructDesc, AccelStructHandle, Buffer, BufferDesc, BufferHandle, ResourceId,
    Texture, TextureDesc, TextureDimension, TextureHandle,
};

/// Creates resource handles and hands out object identities.
///
/// Per-resource metadata (subresource layout, keep-initial-state flag and the
/// permanent state) lives in the handles themselves; the permanent state is
/// the only part that is mutated after creation, and only by
/// [`crate::Device::execute_command_lists`].
#[derive(Debug)]
pub struct ResourceRegistry {
    next_id: AtomicU64,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn create_texture(&self, desc: TextureDesc) -> Result<TextureHandle, PipelineError> {
        validate_texture_desc(&desc)?;
        let id = ResourceId(self.next_id());
        tracing::trace!(texture = %id, name = %desc.debug_name, "create texture");
        Ok(Arc::new(Texture::new(id, desc)))
    }

    pub fn create_buffer(&self, desc: BufferDesc) -> Result<BufferHandle, PipelineError> {
        if desc.byte_size == 0 {
            return Err(PipelineError::InvalidDescriptor("buffer byte_size must be non-zero"));
        }
        if desc.is_volatile && !desc.is_constant_buffer {
            return Err(PipelineError::InvalidDescriptor(
                "volatile buffers must be constant buffers",
            ));
        }
        if desc.is_volatile && desc.keep_initial_state {
            return Err(PipelineError::InvalidDescriptor(
                "volatile buffers are not state-tracked",
            ));
        }
        let id = ResourceId(self.next_id());
        tracing::trace!(buffer = %id, name = %desc.debug_name, "create buffer");
        Ok(Arc::new(Buffer::new(id, desc)))
    }

    /// Creates the structure and its backing storage buffer.
    ///
    /// The storage starts in `ACCEL_STRUCT_READ` and is tracked from creation.
    pub fn create_accel_struct(
        &self,
        desc: AccelStructDesc,
    ) -> Result<AccelStructHandle, PipelineError> {
        if desc.is_top_level && desc.top_level_max_instances == 0 {
            return Err(PipelineError::InvalidDescriptor(
                "top level acceleration structures need top_level_max_instances",
            ));
        }
        if !desc.is_top_level && desc.bottom_level_geometries.is_empty() {
            return Err(PipelineError::InvalidDescriptor(
                "bottom level acceleration structures need at least one geometry",
            ));
        }
        let storage = self.create_buffer(BufferDesc {
            byte_size: desc.storage_size.max(1),
            is_accel_struct_storage: true,
            can_have_uavs: true,
            debug_name: desc.debug_name.clone(),
            initial_state: ResourceStates::ACCEL_STRUCT_READ,
            keep_initial_state: true,
            track_liveness: desc.track_liveness,
            ..BufferDesc::default()
        })?;
        let id = ResourceId(self.next_id());
        Ok(Arc::new(AccelStruct::new(id, desc, storage)))
    }
}

fn validate_texture_desc(desc: &TextureDesc) -> Result<(), PipelineError> {
    if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
        return Err(PipelineError::InvalidDescriptor("texture extent must be non-zero"));
    }
    if desc.mip_levels == 0 || desc.array_size == 0 {
        return Err(PipelineError::InvalidDescriptor(
            "texture must have at least one mip level and array slice",
        ));
    }
    if desc.sample_count > 1 && !desc.dimension.is_multisampled() {
        return Err(PipelineError::InvalidDescriptor(
            "multisampled textures need a 2D MS dimension",
        ));
    }
    if matches!(
        desc.dimension,
        TextureDimension::TextureCube | TextureDimension::TextureCubeArray
    ) && desc.array_size % 6 != 0
    {
        return Err(PipelineError::InvalidDescriptor(
            "cube textures need a multiple of six array slices",
        ));
    }
    if desc.dimension == TextureDimension::Unknown {
        return Err(PipelineError::InvalidDescriptor("texture dimension is unknown"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let registry = ResourceRegistry::new();
        let a = registry.create_texture(TextureDesc::default()).unwrap();
        let b = registry.create_buffer(BufferDesc::vertex_buffer(16)).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn rejects_invalid_descs() {
        let registry = ResourceRegistry::new();
        assert!(registry
            .create_texture(TextureDesc {
                mip_levels: 0,
                ..TextureDesc::default()
            })
            .is_err());
        assert!(registry
            .create_texture(TextureDesc {
                dimension: TextureDimension::TextureCube,
                array_size: 4,
                ..TextureDesc::default()
            })
            .is_err());
        assert!(registry.create_buffer(BufferDesc::default()).is_err());
    }

    #[test]
    fn accel_struct_storage_tracks_from_creation() {
        let registry = ResourceRegistry::new();
        let tlas = registry
            .create_accel_struct(AccelStructDesc {
                is_top_level: true,
                top_level_max_instances: 4,
                storage_size: 1024,
                ..AccelStructDesc::default()
            })
            .unwrap();
        let storage = tlas.storage().desc();
        assert!(storage.keep_initial_state);
        assert_eq!(storage.initial_state, ResourceStates::ACCEL_STRUCT_READ);
    }
}
