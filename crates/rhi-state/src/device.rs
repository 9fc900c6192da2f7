//! Object creation, submission and completion tracking.
//!
//! The device owns the native collaborator and the per-queue submission
//! counters. It is the only place the registry-wide permanent state of a
//! resource changes: promotions requested by a command list are applied when
//! that list is accepted by [`Device::execute_command_lists`], never at
//! `close()`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::binding::{
    BindingLayout, BindingLayoutDesc, BindingLayoutHandle, BindingSet, BindingSetDesc,
    BindingSetHandle,
};
use crate::command_list::CommandList;
use crate::config::{CommandListParameters, CommandQueue, DeviceConfig};
use crate::error::{DeviceError, PipelineError};
use crate::message::{MessageCallback, MessageSeverity, TracingMessageCallback};
use crate::native::{
    ComputePipelineInfo, GraphicsPipelineInfo, MeshletPipelineInfo, NativeCmd, NativeDevice,
    QueueWait, RayTracingPipelineInfo, Submission,
};
use crate::pipeline::{
    resolve_compute_pipeline, resolve_graphics_pipeline, resolve_meshlet_pipeline,
    resolve_ray_tracing_pipeline, ComputePipeline, ComputePipelineDesc, ComputePipelineHandle,
    Framebuffer, FramebufferDesc, FramebufferHandle, FramebufferInfo, GraphicsPipeline,
    GraphicsPipelineDesc, GraphicsPipelineHandle, MeshletPipeline, MeshletPipelineDesc,
    MeshletPipelineHandle, RayTracingPipeline, RayTracingPipelineDesc, RayTracingPipelineHandle,
    ShaderTable, ShaderTableDesc, ShaderTableHandle,
};
use crate::resource::{
    AccelStructDesc, AccelStructHandle, BindingLayoutId, BindingSetId, BufferDesc, BufferHandle,
    FramebufferId, ResourceRegistry, Retained, ShaderTableId, TextureDesc, TextureHandle,
};

/// State shared between a device and the command lists it created.
pub(crate) struct DeviceShared {
    pub(crate) registry: ResourceRegistry,
    pub(crate) config: DeviceConfig,
    pub(crate) callback: Arc<dyn MessageCallback>,
}

impl DeviceShared {
    fn report<T, E: fmt::Display>(&self, result: Result<T, E>) -> Result<T, E> {
        if let Err(err) = &result {
            self.callback.message(MessageSeverity::Error, &err.to_string());
        }
        result
    }
}

#[derive(Debug, Default)]
struct QueueState {
    last_submitted: u64,
    /// Waits to attach to the next submission on this queue.
    pending_waits: Vec<QueueWait>,
    /// Objects kept alive per submitted instance, oldest first.
    in_flight: VecDeque<(u64, Vec<Retained>)>,
}

/// Completion marker placed on a queue with [`Device::set_event_query`].
///
/// Packs the queue and instance into one word so a query can be shared
/// across threads without a lock. Zero means "not set".
#[derive(Debug, Default)]
pub struct EventQuery {
    marker: AtomicU64,
}

pub type EventQueryHandle = Arc<EventQuery>;

impl EventQuery {
    fn store(&self, wait: Option<QueueWait>) {
        let packed = wait.map_or(0, |w| (w.instance << 2) | (w.queue.index() as u64 + 1));
        self.marker.store(packed, Ordering::Release);
    }

    fn load(&self) -> Option<QueueWait> {
        let packed = self.marker.load(Ordering::Acquire);
        let queue = match packed & 0b11 {
            1 => CommandQueue::Graphics,
            2 => CommandQueue::Compute,
            3 => CommandQueue::Copy,
            _ => return None,
        };
        Some(QueueWait {
            queue,
            instance: packed >> 2,
        })
    }

    pub fn is_set(&self) -> bool {
        self.load().is_some()
    }
}

pub struct Device<N: NativeDevice> {
    shared: Arc<DeviceShared>,
    native: N,
    queues: [QueueState; 3],
}

impl<N: NativeDevice> fmt::Debug for Device<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.shared.config)
            .field("queues", &self.queues)
            .finish_non_exhaustive()
    }
}

impl<N: NativeDevice> Device<N> {
    pub fn new(native: N, config: DeviceConfig) -> Self {
        Self::with_message_callback(native, config, Arc::new(TracingMessageCallback))
    }

    pub fn with_message_callback(
        native: N,
        config: DeviceConfig,
        callback: Arc<dyn MessageCallback>,
    ) -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                registry: ResourceRegistry::new(),
                config,
                callback,
            }),
            native,
            queues: Default::default(),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.shared.registry
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut N {
        &mut self.native
    }

    fn message(&self, severity: MessageSeverity, text: &str) {
        self.shared.callback.message(severity, text);
    }

    // -----------------------------------------------------------------------
    // Resources and binding objects
    // -----------------------------------------------------------------------

    pub fn create_texture(&self, desc: TextureDesc) -> Result<TextureHandle, PipelineError> {
        self.shared.report(self.shared.registry.create_texture(desc))
    }

    pub fn create_buffer(&self, desc: BufferDesc) -> Result<BufferHandle, PipelineError> {
        self.shared.report(self.shared.registry.create_buffer(desc))
    }

    pub fn create_accel_struct(
        &self,
        desc: AccelStructDesc,
    ) -> Result<AccelStructHandle, PipelineError> {
        self.shared.report(self.shared.registry.create_accel_struct(desc))
    }

    pub fn create_framebuffer(
        &self,
        desc: FramebufferDesc,
    ) -> Result<FramebufferHandle, PipelineError> {
        let id = FramebufferId(self.shared.registry.next_id());
        let result = Framebuffer::new(id, desc).map(Arc::new);
        self.shared.report(result)
    }

    pub fn create_binding_layout(
        &self,
        desc: BindingLayoutDesc,
    ) -> Result<BindingLayoutHandle, PipelineError> {
        let id = BindingLayoutId(self.shared.registry.next_id());
        let result = BindingLayout::new(id, desc).map(Arc::new);
        self.shared.report(result)
    }

    pub fn create_binding_set(
        &self,
        desc: BindingSetDesc,
        layout: &BindingLayoutHandle,
    ) -> Result<BindingSetHandle, PipelineError> {
        let id = BindingSetId(self.shared.registry.next_id());
        let result = BindingSet::new(id, desc, layout.clone()).map(Arc::new);
        self.shared.report(result)
    }

    // -----------------------------------------------------------------------
    // Pipelines
    // -----------------------------------------------------------------------

    /// Creates a graphics pipeline for framebuffers matching `framebuffer_info`.
    pub fn create_graphics_pipeline(
        &mut self,
        desc: GraphicsPipelineDesc,
        framebuffer_info: &FramebufferInfo,
    ) -> Result<GraphicsPipelineHandle, PipelineError> {
        let result = resolve_graphics_pipeline(&desc, framebuffer_info).and_then(|resolved| {
            let native = self.native.create_graphics_pipeline(&GraphicsPipelineInfo {
                desc: &desc,
                framebuffer_info,
                resolved: &resolved,
            })?;
            tracing::trace!(pipeline = native.0, stages = resolved.stages.len(), "create graphics pipeline");
            Ok(Arc::new(GraphicsPipeline::new(
                desc,
                framebuffer_info.clone(),
                resolved,
                native,
            )))
        });
        self.shared.report(result)
    }

    /// Same as [`Device::create_graphics_pipeline`] with the signature taken
    /// from `framebuffer`.
    pub fn create_graphics_pipeline_for_framebuffer(
        &mut self,
        desc: GraphicsPipelineDesc,
        framebuffer: &FramebufferHandle,
    ) -> Result<GraphicsPipelineHandle, PipelineError> {
        self.create_graphics_pipeline(desc, framebuffer.framebuffer_info())
    }

    pub fn create_meshlet_pipeline(
        &mut self,
        desc: MeshletPipelineDesc,
        framebuffer_info: &FramebufferInfo,
    ) -> Result<MeshletPipelineHandle, PipelineError> {
        let result = resolve_meshlet_pipeline(&desc, framebuffer_info).and_then(|resolved| {
            let native = self.native.create_meshlet_pipeline(&MeshletPipelineInfo {
                desc: &desc,
                framebuffer_info,
                resolved: &resolved,
            })?;
            tracing::trace!(pipeline = native.0, "create meshlet pipeline");
            Ok(Arc::new(MeshletPipeline::new(
                desc,
                framebuffer_info.clone(),
                resolved,
                native,
            )))
        });
        self.shared.report(result)
    }

    pub fn create_compute_pipeline(
        &mut self,
        desc: ComputePipelineDesc,
    ) -> Result<ComputePipelineHandle, PipelineError> {
        let result = resolve_compute_pipeline(&desc).and_then(|resolved| {
            let native = self.native.create_compute_pipeline(&ComputePipelineInfo {
                desc: &desc,
                resolved: &resolved,
            })?;
            tracing::trace!(pipeline = native.0, "create compute pipeline");
            Ok(Arc::new(ComputePipeline::new(desc, resolved, native)))
        });
        self.shared.report(result)
    }

    pub fn create_ray_tracing_pipeline(
        &mut self,
        desc: RayTracingPipelineDesc,
    ) -> Result<RayTracingPipelineHandle, PipelineError> {
        let result = resolve_ray_tracing_pipeline(&desc).and_then(|resolved| {
            let native = self
                .native
                .create_ray_tracing_pipeline(&RayTracingPipelineInfo {
                    desc: &desc,
                    resolved: &resolved,
                })?;
            tracing::trace!(pipeline = native.0, "create ray tracing pipeline");
            Ok(Arc::new(RayTracingPipeline::new(desc, resolved, native)))
        });
        self.shared.report(result)
    }

    pub fn create_shader_table(
        &self,
        pipeline: &RayTracingPipelineHandle,
        desc: ShaderTableDesc,
    ) -> Result<ShaderTableHandle, PipelineError> {
        let id = ShaderTableId(self.shared.registry.next_id());
        let result = ShaderTable::new(id, pipeline.clone(), desc).map(Arc::new);
        self.shared.report(result)
    }

    // -----------------------------------------------------------------------
    // Command lists and submission
    // -----------------------------------------------------------------------

    pub fn create_command_list(&self, params: CommandListParameters) -> CommandList {
        CommandList::new(self.shared.clone(), params)
    }

    /// Submits closed command lists to `queue` in order and returns the
    /// instance number of the submission.
    ///
    /// On success every permanent state requested by the lists becomes
    /// registry-wide and the objects they reference stay alive until a
    /// garbage-collection pass observes the instance as completed.
    pub fn execute_command_lists(
        &mut self,
        command_lists: &[&CommandList],
        queue: CommandQueue,
    ) -> Result<u64, DeviceError> {
        let result = self.submit(command_lists, queue);
        self.shared.report(result)
    }

    fn submit(
        &mut self,
        command_lists: &[&CommandList],
        queue: CommandQueue,
    ) -> Result<u64, DeviceError> {
        for list in command_lists {
            if list.is_open() {
                return Err(DeviceError::CommandListNotClosed);
            }
            if list.queue() != queue {
                return Err(DeviceError::QueueMismatch {
                    recorded: list.queue(),
                    queue,
                });
            }
        }

        let state = &mut self.queues[queue.index()];
        let instance = state.last_submitted + 1;
        let streams: Vec<&[NativeCmd]> = command_lists.iter().map(|list| list.commands()).collect();
        self.native.submit(&Submission {
            queue,
            instance,
            waits: &state.pending_waits,
            command_lists: &streams,
        })?;
        state.last_submitted = instance;
        let waits = std::mem::take(&mut state.pending_waits);

        let mut retained = Vec::new();
        for list in command_lists {
            retained.extend(list.retained().iter().cloned());
        }
        state.in_flight.push_back((instance, retained));

        for list in command_lists {
            self.apply_permanent_promotions(list);
        }

        tracing::debug!(
            ?queue,
            instance,
            lists = command_lists.len(),
            waits = waits.len(),
            "executed command lists"
        );
        Ok(instance)
    }

    fn apply_permanent_promotions(&self, list: &CommandList) {
        let promotions = list.permanent_promotions();
        for (texture, state) in &promotions.textures {
            if let Err(existing) = texture.promote_permanent(*state) {
                self.message(
                    MessageSeverity::Error,
                    &format!(
                        "texture {} is already permanently in {existing:?}, ignoring promotion to {state:?}",
                        texture.id()
                    ),
                );
            }
        }
        for (buffer, state) in &promotions.buffers {
            if let Err(existing) = buffer.promote_permanent(*state) {
                self.message(
                    MessageSeverity::Error,
                    &format!(
                        "buffer {} is already permanently in {existing:?}, ignoring promotion to {state:?}",
                        buffer.id()
                    ),
                );
            }
        }
    }

    /// Makes the next submission on `wait_queue` wait for `instance` of
    /// `execution_queue`. Does not block.
    pub fn queue_wait_for_command_list(
        &mut self,
        wait_queue: CommandQueue,
        execution_queue: CommandQueue,
        instance: u64,
    ) -> Result<(), DeviceError> {
        let result = if instance > self.queues[execution_queue.index()].last_submitted {
            Err(DeviceError::UnknownInstance {
                queue: execution_queue,
                instance,
            })
        } else {
            self.queues[wait_queue.index()].pending_waits.push(QueueWait {
                queue: execution_queue,
                instance,
            });
            Ok(())
        };
        self.shared.report(result)
    }

    pub fn last_submitted_instance(&self, queue: CommandQueue) -> u64 {
        self.queues[queue.index()].last_submitted
    }

    pub fn last_completed_instance(&self, queue: CommandQueue) -> u64 {
        self.native.last_completed_instance(queue)
    }

    /// Number of submissions whose references are still held.
    pub fn in_flight_count(&self, queue: CommandQueue) -> usize {
        self.queues[queue.index()].in_flight.len()
    }

    /// Blocks until every queue is idle, then collects garbage. Returns
    /// `false` if the device was lost.
    pub fn wait_for_idle(&mut self) -> bool {
        if let Err(err) = self.native.wait_for_idle() {
            self.message(MessageSeverity::Error, &format!("wait for idle failed: {err}"));
            return false;
        }
        self.run_garbage_collection();
        true
    }

    /// Releases the references held by submissions the native device reports
    /// as completed.
    pub fn run_garbage_collection(&mut self) {
        let mut released = 0usize;
        for queue in CommandQueue::ALL {
            let completed = self.native.last_completed_instance(queue);
            let state = &mut self.queues[queue.index()];
            while let Some((instance, _)) = state.in_flight.front() {
                if *instance > completed {
                    break;
                }
                if let Some((_, objects)) = state.in_flight.pop_front() {
                    released += objects.len();
                }
            }
        }
        if released > 0 {
            tracing::debug!(released, "garbage collection released references");
        }
    }

    // -----------------------------------------------------------------------
    // Event queries
    // -----------------------------------------------------------------------

    pub fn create_event_query(&self) -> EventQueryHandle {
        Arc::new(EventQuery::default())
    }

    /// Marks the query with the last instance submitted to `queue`.
    pub fn set_event_query(&self, query: &EventQuery, queue: CommandQueue) {
        query.store(Some(QueueWait {
            queue,
            instance: self.last_submitted_instance(queue),
        }));
    }

    /// `true` once the marked instance has completed. An unset query never
    /// completes.
    pub fn poll_event_query(&self, query: &EventQuery) -> bool {
        query
            .load()
            .is_some_and(|wait| self.native.last_completed_instance(wait.queue) >= wait.instance)
    }

    /// Blocks until the marked instance completes. Returns immediately for an
    /// unset query.
    pub fn wait_event_query(&mut self, query: &EventQuery) -> Result<(), DeviceError> {
        let Some(wait) = query.load() else {
            return Ok(());
        };
        let result = self
            .native
            .wait_for_instance(wait.queue, wait.instance)
            .map_err(DeviceError::from);
        self.shared.report(result)
    }

    pub fn reset_event_query(&self, query: &EventQuery) {
        query.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn event_query_packs_queue_and_instance() {
        let query = EventQuery::default();
        assert!(!query.is_set());
        query.store(Some(QueueWait {
            queue: CommandQueue::Copy,
            instance: 41,
        }));
        assert_eq!(
            query.load(),
            Some(QueueWait {
                queue: CommandQueue::Copy,
                instance: 41,
            })
        );
        query.store(None);
        assert_eq!(query.load(), None);
    }

    #[test]
    fn instances_are_per_queue() {
        let mut device = Device::new(HeadlessDevice::new(), DeviceConfig::default());
        let mut gfx = device.create_command_list(CommandListParameters::default());
        let mut copy = device.create_command_list(CommandListParameters::for_queue(CommandQueue::Copy));
        for list in [&mut gfx, &mut copy] {
            list.open().unwrap();
            list.close().unwrap();
        }

        assert_eq!(device.execute_command_lists(&[&gfx], CommandQueue::Graphics), Ok(1));
        assert_eq!(device.execute_command_lists(&[&gfx], CommandQueue::Graphics), Ok(2));
        assert_eq!(device.execute_command_lists(&[&copy], CommandQueue::Copy), Ok(1));
        assert_eq!(
            device.execute_command_lists(&[&copy], CommandQueue::Graphics),
            Err(DeviceError::QueueMismatch {
                recorded: CommandQueue::Copy,
                queue: CommandQueue::Graphics,
            })
        );
    }

    #[test]
    fn open_lists_are_rejected() {
        let mut device = Device::new(HeadlessDevice::new(), DeviceConfig::default());
        let mut list = device.create_command_list(CommandListParameters::default());
        list.open().unwrap();
        assert_eq!(
            device.execute_command_lists(&[&list], CommandQueue::Graphics),
            Err(DeviceError::CommandListNotClosed)
        );
        assert_eq!(device.last_submitted_instance(CommandQueue::Graphics), 0);
    }
}
