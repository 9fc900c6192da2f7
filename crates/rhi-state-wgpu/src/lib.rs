//! wgpu backend for `rhi-state`.
//!
//! A closed `rhi_state::CommandList` holds a backend-neutral
//! [`rhi_state::NativeCmd`] stream. [`Encoder`] replays that stream into a
//! `wgpu::CommandBuffer`, looking every resource identity up through a
//! [`ResourceProvider`] owned by the caller.
//!
//! wgpu tracks resource usage on its own, so barrier batches are counted and
//! skipped. Render and compute passes do not keep state across pass
//! boundaries in wgpu; the encoder re-applies the last bound state whenever it
//! opens a new pass.

mod encode;
mod format;

pub use encode::{
    support, validate, CommandSupport, EncodeError, EncodeMetrics, EncodeResult, Encoder,
    FramebufferTargets, ResourceProvider,
};
pub use format::{index_format, texture_format};
