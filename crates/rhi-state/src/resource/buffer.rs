use std::sync::{Arc, OnceLock};

use crate::format::Format;
use crate::states::ResourceStates;

use super::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub byte_size: u64,
    /// Element stride for structured views; 0 for raw/typed buffers.
    pub struct_stride: u32,
    /// Format of typed views.
    pub format: Format,
    pub debug_name: String,

    pub can_have_uavs: bool,
    pub is_vertex_buffer: bool,
    pub is_index_buffer: bool,
    pub is_constant_buffer: bool,
    pub is_draw_indirect_args: bool,
    pub is_accel_struct_build_input: bool,
    pub is_accel_struct_storage: bool,

    /// Volatile constant buffers get new backing storage on every write and
    /// must be rebound after each one.
    pub is_volatile: bool,
    /// Number of writes a volatile buffer accepts per command list; 0 uses
    /// the device default.
    pub max_versions: u32,

    pub initial_state: ResourceStates,
    pub keep_initial_state: bool,
    pub track_liveness: bool,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            byte_size: 0,
            struct_stride: 0,
            format: Format::Unknown,
            debug_name: String::new(),
            can_have_uavs: false,
            is_vertex_buffer: false,
            is_index_buffer: false,
            is_constant_buffer: false,
            is_draw_indirect_args: false,
            is_accel_struct_build_input: false,
            is_accel_struct_storage: false,
            is_volatile: false,
            max_versions: 0,
            initial_state: ResourceStates::COMMON,
            keep_initial_state: false,
            track_liveness: true,
        }
    }
}

impl BufferDesc {
    pub fn vertex_buffer(byte_size: u64) -> Self {
        Self {
            byte_size,
            is_vertex_buffer: true,
            ..Self::default()
        }
    }

    pub fn index_buffer(byte_size: u64) -> Self {
        Self {
            byte_size,
            is_index_buffer: true,
            ..Self::default()
        }
    }

    pub fn constant_buffer(byte_size: u64) -> Self {
        Self {
            byte_size,
            is_constant_buffer: true,
            ..Self::default()
        }
    }

    pub fn volatile_constant_buffer(byte_size: u64, max_versions: u32) -> Self {
        Self {
            byte_size,
            is_constant_buffer: true,
            is_volatile: true,
            max_versions,
            ..Self::default()
        }
    }
}

/// Byte range within a buffer. A `byte_size` of `u64::MAX` runs to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRange {
    pub byte_offset: u64,
    pub byte_size: u64,
}

impl Default for BufferRange {
    fn default() -> Self {
        Self::ENTIRE
    }
}

impl BufferRange {
    pub const ENTIRE: Self = Self {
        byte_offset: 0,
        byte_size: u64::MAX,
    };

    pub const fn new(byte_offset: u64, byte_size: u64) -> Self {
        Self {
            byte_offset,
            byte_size,
        }
    }

    pub fn resolve(&self, desc: &BufferDesc) -> Self {
        let byte_offset = self.byte_offset.min(desc.byte_size);
        let remaining = desc.byte_size - byte_offset;
        let byte_size = if self.byte_size == 0 {
            remaining
        } else {
            self.byte_size.min(remaining)
        };
        Self {
            byte_offset,
            byte_size,
        }
    }

    pub fn is_entire_buffer(&self, desc: &BufferDesc) -> bool {
        self.byte_offset == 0 && (self.byte_size == u64::MAX || self.byte_size == desc.byte_size)
    }
}

#[derive(Debug)]
pub struct Buffer {
    id: ResourceId,
    desc: BufferDesc,
    permanent_state: OnceLock<ResourceStates>,
}

pub type BufferHandle = Arc<Buffer>;

impl Buffer {
    pub(crate) fn new(id: ResourceId, desc: BufferDesc) -> Self {
        Self {
            id,
            desc,
            permanent_state: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn permanent_state(&self) -> Option<ResourceStates> {
        self.permanent_state.get().copied()
    }

    pub(crate) fn promote_permanent(&self, state: ResourceStates) -> Result<(), ResourceStates> {
        let assigned = *self.permanent_state.get_or_init(|| state);
        if assigned == state {
            Ok(())
        } else {
            Err(assigned)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_resolve_clamps() {
        let desc = BufferDesc::constant_buffer(256);
        assert_eq!(BufferRange::ENTIRE.resolve(&desc), BufferRange::new(0, 256));
        assert_eq!(BufferRange::new(200, 100).resolve(&desc), BufferRange::new(200, 56));
        assert_eq!(BufferRange::new(64, 0).resolve(&desc), BufferRange::new(64, 192));
        assert_eq!(BufferRange::new(512, 16).resolve(&desc), BufferRange::new(256, 0));
    }
}
