//! `rhi-state` records GPU command lists on top of a native graphics API and
//! keeps every resource they touch in a legal state.
//!
//! The crate provides:
//! - Per-subresource resource state tracking with batched, automatically
//!   placed barriers (see [`StateTracker`] and [`BarrierScheduler`]).
//! - Pipeline and binding resolution: shader stage validation,
//!   specialization tables and the binding-slot map (see [`pipeline`]).
//! - A command-list state cache that turns `set*_state` calls into the
//!   minimal native call sequence (see [`CommandList`]).
//! - Submission, permanent-state promotion and liveness tracking (see
//!   [`Device`]).
//!
//! The native API sits behind [`NativeDevice`]; [`HeadlessDevice`] records
//! everything and is what the tests run against.

mod barrier;
mod binding;
mod command_list;
mod config;
mod device;
mod error;
mod format;
mod message;
mod state;
mod states;
mod stats;
mod tracker;

pub mod headless;
pub mod native;
pub mod pipeline;
pub mod resource;

pub use barrier::{
    BarrierBatch, BarrierScheduler, BufferBarrier, PendingCheckpoint, TextureBarrier,
};
pub use binding::{
    BindingLayout, BindingLayoutDesc, BindingLayoutHandle, BindingLayoutItem, BindingSet,
    BindingSetDesc, BindingSetHandle, BindingSetItem, BufferViewKind, RequiredState, ResourceType,
};
pub use command_list::{CommandList, CommandListState};
pub use config::{
    CommandListParameters, CommandQueue, DeviceConfig, MAX_BINDING_LAYOUTS,
    MAX_PUSH_CONSTANT_SIZE, MAX_RENDER_TARGETS, MAX_VERTEX_ATTRIBUTES, MAX_VIEWPORTS,
    MAX_VOLATILE_CONSTANT_BUFFERS_PER_LAYOUT,
};
pub use device::{Device, EventQuery, EventQueryHandle};
pub use error::{CommandListError, DeviceError, NativeError, PipelineError};
pub use format::{Format, FormatInfo};
pub use headless::HeadlessDevice;
pub use message::{MessageCallback, MessageSeverity, TracingMessageCallback};
pub use native::{NativeCmd, NativeDevice};
pub use state::{
    Color, ComputeState, DispatchRaysArguments, DrawArguments, GraphicsState,
    IndexBufferBinding, MeshletState, RayTracingState, Rect, VertexBufferBinding, Viewport,
    ViewportState,
};
pub use states::{ResourceStates, ShaderType};
pub use stats::CommandListStats;
pub use tracker::{PermanentPromotions, StateTracker};
