use std::sync::Arc;

use bitflags::bitflags;

use crate::format::Format;

use super::{BufferHandle, ResourceId};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct GeometryFlags: u8 {
        const OPAQUE = 1 << 0;
        const NO_DUPLICATE_ANY_HIT_INVOCATION = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct AccelStructBuildFlags: u8 {
        const ALLOW_UPDATE = 1 << 0;
        const ALLOW_COMPACTION = 1 << 1;
        const PREFER_FAST_TRACE = 1 << 2;
        const PREFER_FAST_BUILD = 1 << 3;
        const MINIMIZE_MEMORY = 1 << 4;
        const PERFORM_UPDATE = 1 << 5;
    }
}

#[derive(Debug, Clone)]
pub struct GeometryTriangles {
    pub index_buffer: Option<BufferHandle>,
    pub vertex_buffer: BufferHandle,
    pub index_format: Format,
    pub vertex_format: Format,
    pub index_offset: u64,
    pub vertex_offset: u64,
    pub index_count: u32,
    pub vertex_count: u32,
    pub vertex_stride: u32,
}

#[derive(Debug, Clone)]
pub struct GeometryAabbs {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub count: u32,
    pub stride: u32,
}

#[derive(Debug, Clone)]
pub struct GeometrySpheres {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<BufferHandle>,
    pub vertex_position_offset: u64,
    pub vertex_radius_offset: u64,
    pub vertex_count: u32,
    pub index_count: u32,
}

/// Line-swept spheres.
#[derive(Debug, Clone)]
pub struct GeometryLss {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<BufferHandle>,
    pub vertex_position_offset: u64,
    pub vertex_radius_offset: u64,
    pub vertex_count: u32,
    pub primitive_count: u32,
}

/// One bottom-level geometry. The variant is the geometry type.
#[derive(Debug, Clone)]
pub enum GeometryDesc {
    Triangles {
        geometry: GeometryTriangles,
        flags: GeometryFlags,
        transform: Option<[f32; 12]>,
    },
    Aabbs {
        geometry: GeometryAabbs,
        flags: GeometryFlags,
    },
    Spheres {
        geometry: GeometrySpheres,
        flags: GeometryFlags,
    },
    Lss {
        geometry: GeometryLss,
        flags: GeometryFlags,
    },
}

impl GeometryDesc {
    /// Buffers the build reads from.
    pub fn input_buffers(&self) -> Vec<&BufferHandle> {
        match self {
            GeometryDesc::Triangles { geometry, .. } => {
                let mut buffers = vec![&geometry.vertex_buffer];
                buffers.extend(geometry.index_buffer.as_ref());
                buffers
            }
            GeometryDesc::Aabbs { geometry, .. } => vec![&geometry.buffer],
            GeometryDesc::Spheres { geometry, .. } => {
                let mut buffers = vec![&geometry.vertex_buffer];
                buffers.extend(geometry.index_buffer.as_ref());
                buffers
            }
            GeometryDesc::Lss { geometry, .. } => {
                let mut buffers = vec![&geometry.vertex_buffer];
                buffers.extend(geometry.index_buffer.as_ref());
                buffers
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccelStructDesc {
    pub is_top_level: bool,
    pub top_level_max_instances: u32,
    pub bottom_level_geometries: Vec<GeometryDesc>,
    pub build_flags: AccelStructBuildFlags,
    /// Size of the backing storage buffer.
    pub storage_size: u64,
    pub debug_name: String,
    pub track_liveness: bool,
}

impl Default for AccelStructDesc {
    fn default() -> Self {
        Self {
            is_top_level: false,
            top_level_max_instances: 0,
            bottom_level_geometries: Vec::new(),
            build_flags: AccelStructBuildFlags::empty(),
            storage_size: 0,
            debug_name: String::new(),
            track_liveness: true,
        }
    }
}

/// Top-level instance referencing a bottom-level structure.
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    pub bottom_level: AccelStructHandle,
    pub transform: [f32; 12],
    pub instance_id: u32,
    pub instance_mask: u8,
    pub instance_contribution_to_hit_group_index: u32,
}

/// An acceleration structure. Its state is the state of its storage buffer.
#[derive(Debug)]
pub struct AccelStruct {
    id: ResourceId,
    desc: AccelStructDesc,
    storage: BufferHandle,
}

pub type AccelStructHandle = Arc<AccelStruct>;

impl AccelStruct {
    pub(crate) fn new(id: ResourceId, desc: AccelStructDesc, storage: BufferHandle) -> Self {
        Self { id, desc, storage }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn desc(&self) -> &AccelStructDesc {
        &self.desc
    }

    pub fn storage(&self) -> &BufferHandle {
        &self.storage
    }
}
