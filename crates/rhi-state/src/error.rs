use thiserror::Error;

use crate::config::CommandQueue;
use crate::resource::ResourceId;
use crate::states::{ResourceStates, ShaderType};

/// Usage errors raised while recording into a command list.
///
/// The offending operation is skipped; the command list stays open and keeps
/// its previous cached state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandListError {
    #[error("command list is not open")]
    NotOpen,

    #[error("command list is already open")]
    AlreadyOpen,

    #[error("no graphics state is set")]
    NoGraphicsState,

    #[error("no compute state is set")]
    NoComputeState,

    #[error("no meshlet state is set")]
    NoMeshletState,

    #[error("no ray tracing state is set")]
    NoRayTracingState,

    #[error("no pipeline state is set")]
    NoPipelineState,

    #[error("indirect draw or dispatch without indirect parameters in the current state")]
    MissingIndirectParams,

    #[error("resource {resource} has unknown state at mip {mip_level}, slice {array_slice}; call begin_tracking first")]
    UnknownPriorState {
        resource: ResourceId,
        mip_level: u32,
        array_slice: u32,
    },

    #[error("resource {resource} is permanently in {permanent:?}, cannot use it as {requested:?}")]
    PermanentStateMismatch {
        resource: ResourceId,
        permanent: ResourceStates,
        requested: ResourceStates,
    },

    #[error("resource {resource} already has permanent state {existing:?}, cannot make it {requested:?}")]
    PermanentStateConflict {
        resource: ResourceId,
        existing: ResourceStates,
        requested: ResourceStates,
    },

    #[error("subresource range is empty or out of range for resource {resource}")]
    SubresourceOutOfRange { resource: ResourceId },

    #[error("binding set slot {slot} is out of range (pipeline has {layouts} binding layouts)")]
    BindingSlotOutOfRange { slot: usize, layouts: usize },

    #[error("binding set in slot {slot} was created for a different binding layout")]
    BindingLayoutMismatch { slot: usize },

    #[error("vertex buffer slot {slot} is out of range")]
    VertexBufferSlotOutOfRange { slot: u32 },

    #[error("framebuffer is incompatible with the pipeline's render target signature")]
    IncompatibleFramebuffer,

    #[error("push constant payload of {size} bytes exceeds the maximum of {max}")]
    PushConstantsTooLarge { size: usize, max: usize },

    #[error("volatile buffer {buffer} is bound before being written in this command list")]
    VolatileBufferNotWritten { buffer: ResourceId },

    #[error("volatile buffer {buffer} ran out of versions (max {max_versions})")]
    VolatileVersionsExhausted {
        buffer: ResourceId,
        max_versions: u32,
    },

    #[error("{operation} is not supported on the {queue:?} queue")]
    UnsupportedOnQueue {
        operation: &'static str,
        queue: CommandQueue,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Failures reported by the native graphics API collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("native object creation failed: {0}")]
    CreationFailed(String),

    #[error("device lost")]
    DeviceLost,

    #[error("unsupported by the native backend: {0}")]
    Unsupported(&'static str),
}

/// Object construction failures (pipelines, framebuffers, binding sets).
///
/// Construction is atomic: on error no object is returned and nothing is
/// cached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    #[error("{count} binding layouts exceed the maximum of {max}")]
    TooManyBindingLayouts { count: usize, max: usize },

    #[error("binding layouts disagree on whether register spaces are descriptor sets")]
    InconsistentRegisterSpaceMode,

    #[error("descriptor set {set} is used by more than one binding layout")]
    DuplicateDescriptorSet { set: u32 },

    #[error("descriptor set {set} is out of range, sets must be below {max}")]
    DescriptorSetOutOfRange { set: u32, max: usize },

    #[error("pipeline is missing its {0} shader")]
    MissingShader(&'static str),

    #[error("shader of type {actual:?} used in a {expected:?} slot")]
    ShaderStageMismatch {
        expected: ShaderType,
        actual: ShaderType,
    },

    #[error("{count} render targets exceed the maximum of {max}")]
    TooManyRenderTargets { count: usize, max: usize },

    #[error("invalid framebuffer: {0}")]
    InvalidFramebuffer(&'static str),

    #[error("binding set item in slot {slot} has no matching entry in the binding layout")]
    BindingNotInLayout { slot: u32 },

    #[error("shader table references unknown export {0:?}")]
    UnknownShaderExport(String),

    #[error("invalid resource descriptor: {0}")]
    InvalidDescriptor(&'static str),

    #[error(transparent)]
    Native(#[from] NativeError),
}

/// Submission and queue errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("instance {instance} was never submitted to the {queue:?} queue")]
    UnknownInstance { queue: CommandQueue, instance: u64 },

    #[error("command list must be closed before execution")]
    CommandListNotClosed,

    #[error("command list was recorded for the {recorded:?} queue, cannot execute on {queue:?}")]
    QueueMismatch {
        recorded: CommandQueue,
        queue: CommandQueue,
    },

    #[error(transparent)]
    Native(#[from] NativeError),
}
