//! Resource handles and the registry that creates them.
//!
//! Handles are `Arc`s: the application and every command list that references a
//! resource share ownership, so a resource used by an in-flight submission
//! outlives the application's last handle until garbage collection.

mod accel;
mod buffer;
mod registry;
mod texture;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub use accel::{
    AccelStruct, AccelStructBuildFlags, AccelStructDesc, AccelStructHandle, GeometryAabbs,
    GeometryDesc, GeometryFlags, GeometryLss, GeometrySpheres, GeometryTriangles, InstanceDesc,
};
pub use buffer::{Buffer, BufferDesc, BufferHandle, BufferRange};
pub use registry::ResourceRegistry;
pub use texture::{
    Texture, TextureDesc, TextureDimension, TextureHandle, TextureSlice, TextureSubresourceSet,
};

/// Identity of a texture, buffer or acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a framebuffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u64);

/// Identity of a binding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingLayoutId(pub u64);

/// Identity of a binding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingSetId(pub u64);

/// Identity of a ray tracing shader table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderTableId(pub u64);

/// Opaque sampler handle owned by the caller's descriptor machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerId(pub u64);

/// Type-erased strong reference kept alive by a command list until its
/// submission completes.
pub(crate) type Retained = Arc<dyn Any + Send + Sync>;
