//! A native device that executes nothing and records everything.
//!
//! Used by tests and CI: every pipeline creation and submission is kept so
//! callers can assert on the exact native call sequence. Submissions complete
//! immediately unless manual completion is requested.

use crate::config::CommandQueue;
use crate::error::NativeError;
use crate::native::{
    ComputePipelineInfo, GraphicsPipelineInfo, MeshletPipelineInfo, NativeCmd, NativeDevice,
    NativePipeline, QueueWait, RayTracingPipelineInfo, Submission,
};
use crate::pipeline::PipelineBindPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Meshlet,
    Compute,
    RayTracing,
}

impl PipelineKind {
    pub fn bind_point(self) -> PipelineBindPoint {
        match self {
            PipelineKind::Graphics | PipelineKind::Meshlet => PipelineBindPoint::Graphics,
            PipelineKind::Compute => PipelineBindPoint::Compute,
            PipelineKind::RayTracing => PipelineBindPoint::RayTracing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPipeline {
    pub pipeline: NativePipeline,
    pub kind: PipelineKind,
    pub stage_count: usize,
    pub specialization_constants: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSubmission {
    pub queue: CommandQueue,
    pub instance: u64,
    pub waits: Vec<QueueWait>,
    /// One command stream per executed command list, in submission order.
    pub command_lists: Vec<Vec<NativeCmd>>,
}

impl RecordedSubmission {
    pub fn commands(&self) -> impl Iterator<Item = &NativeCmd> {
        self.command_lists.iter().flatten()
    }
}

#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_pipeline: u64,
    pipelines: Vec<CreatedPipeline>,
    submissions: Vec<RecordedSubmission>,
    submitted: [u64; 3],
    completed: [u64; 3],
    manual_completion: bool,
    fail_next_pipeline: Option<String>,
    lost: bool,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submissions stay in flight until [`HeadlessDevice::complete_through`]
    /// or [`HeadlessDevice::complete_all`] is called.
    pub fn with_manual_completion() -> Self {
        Self {
            manual_completion: true,
            ..Self::default()
        }
    }

    pub fn complete_through(&mut self, queue: CommandQueue, instance: u64) {
        let i = queue.index();
        self.completed[i] = self.completed[i].max(instance.min(self.submitted[i]));
    }

    pub fn complete_all(&mut self) {
        self.completed = self.submitted;
    }

    /// Makes the next pipeline creation fail with `reason`.
    pub fn fail_next_pipeline(&mut self, reason: impl Into<String>) {
        self.fail_next_pipeline = Some(reason.into());
    }

    /// Every later submission and wait fails with [`NativeError::DeviceLost`].
    pub fn lose_device(&mut self) {
        self.lost = true;
    }

    pub fn pipelines_created(&self) -> &[CreatedPipeline] {
        &self.pipelines
    }

    pub fn submissions(&self) -> &[RecordedSubmission] {
        &self.submissions
    }

    pub fn last_submission(&self) -> Option<&RecordedSubmission> {
        self.submissions.last()
    }

    fn create(
        &mut self,
        kind: PipelineKind,
        stage_count: usize,
        specialization_constants: usize,
    ) -> Result<NativePipeline, NativeError> {
        if self.lost {
            return Err(NativeError::DeviceLost);
        }
        if let Some(reason) = self.fail_next_pipeline.take() {
            return Err(NativeError::CreationFailed(reason));
        }
        self.next_pipeline += 1;
        let pipeline = NativePipeline(self.next_pipeline);
        self.pipelines.push(CreatedPipeline {
            pipeline,
            kind,
            stage_count,
            specialization_constants,
        });
        Ok(pipeline)
    }
}

impl NativeDevice for HeadlessDevice {
    fn create_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineInfo<'_>,
    ) -> Result<NativePipeline, NativeError> {
        let resolved = info.resolved;
        self.create(
            PipelineKind::Graphics,
            resolved.stages.len(),
            resolved.specialization.map_entry_count(),
        )
    }

    fn create_meshlet_pipeline(
        &mut self,
        info: &MeshletPipelineInfo<'_>,
    ) -> Result<NativePipeline, NativeError> {
        let resolved = info.resolved;
        self.create(
            PipelineKind::Meshlet,
            resolved.stages.len(),
            resolved.specialization.map_entry_count(),
        )
    }

    fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineInfo<'_>,
    ) -> Result<NativePipeline, NativeError> {
        self.create(
            PipelineKind::Compute,
            1,
            info.resolved.specialization.map_entry_count(),
        )
    }

    fn create_ray_tracing_pipeline(
        &mut self,
        info: &RayTracingPipelineInfo<'_>,
    ) -> Result<NativePipeline, NativeError> {
        let resolved = info.resolved;
        self.create(
            PipelineKind::RayTracing,
            resolved.stages.len(),
            resolved.specialization.map_entry_count(),
        )
    }

    fn submit(&mut self, submission: &Submission<'_>) -> Result<(), NativeError> {
        if self.lost {
            return Err(NativeError::DeviceLost);
        }
        let i = submission.queue.index();
        self.submitted[i] = self.submitted[i].max(submission.instance);
        if !self.manual_completion {
            self.completed[i] = self.submitted[i];
        }
        self.submissions.push(RecordedSubmission {
            queue: submission.queue,
            instance: submission.instance,
            waits: submission.waits.to_vec(),
            command_lists: submission
                .command_lists
                .iter()
                .map(|cmds| cmds.to_vec())
                .collect(),
        });
        Ok(())
    }

    fn last_completed_instance(&self, queue: CommandQueue) -> u64 {
        self.completed[queue.index()]
    }

    fn wait_for_instance(&mut self, queue: CommandQueue, instance: u64) -> Result<(), NativeError> {
        if self.lost {
            return Err(NativeError::DeviceLost);
        }
        self.complete_through(queue, instance);
        Ok(())
    }

    fn wait_for_idle(&mut self) -> Result<(), NativeError> {
        if self.lost {
            return Err(NativeError::DeviceLost);
        }
        self.complete_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(device: &mut HeadlessDevice, queue: CommandQueue, instance: u64) {
        let cmds = [NativeCmd::EndRenderPass];
        let lists: [&[NativeCmd]; 1] = [&cmds];
        device
            .submit(&Submission {
                queue,
                instance,
                waits: &[],
                command_lists: &lists,
            })
            .unwrap();
    }

    #[test]
    fn manual_completion_holds_instances_in_flight() {
        let mut device = HeadlessDevice::with_manual_completion();
        submit(&mut device, CommandQueue::Graphics, 1);
        submit(&mut device, CommandQueue::Graphics, 2);
        assert_eq!(device.last_completed_instance(CommandQueue::Graphics), 0);

        device.complete_through(CommandQueue::Graphics, 1);
        assert_eq!(device.last_completed_instance(CommandQueue::Graphics), 1);

        // Completion never runs ahead of submission.
        device.complete_through(CommandQueue::Graphics, 10);
        assert_eq!(device.last_completed_instance(CommandQueue::Graphics), 2);
        assert_eq!(device.last_completed_instance(CommandQueue::Copy), 0);
    }

    #[test]
    fn lost_device_fails_waits() {
        let mut device = HeadlessDevice::new();
        submit(&mut device, CommandQueue::Compute, 1);
        assert_eq!(device.submissions().len(), 1);
        device.lose_device();
        assert_eq!(device.wait_for_idle(), Err(NativeError::DeviceLost));
    }
}
