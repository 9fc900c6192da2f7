//! Pending barrier accumulation.
//!
//! The state tracker queues transitions here; the command list flushes them
//! as one native barrier batch at each commit point. Flushing an empty set is
//! a no-op, so commit points can be placed liberally.

use std::ops::Range;

use crate::resource::ResourceId;
use crate::states::ResourceStates;

/// Transition of a block of texture subresources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBarrier {
    pub texture: ResourceId,
    pub mip_levels: Range<u32>,
    pub array_slices: Range<u32>,
    /// Covers every subresource, so the backend may use a whole-resource barrier.
    pub entire_texture: bool,
    pub before: ResourceStates,
    pub after: ResourceStates,
}

impl TextureBarrier {
    /// A UAV barrier orders two unordered-access uses without changing state.
    pub fn is_uav_barrier(&self) -> bool {
        self.before == ResourceStates::UNORDERED_ACCESS
            && self.after == ResourceStates::UNORDERED_ACCESS
    }
}

/// Transition of a whole buffer (or acceleration-structure storage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: ResourceId,
    pub before: ResourceStates,
    pub after: ResourceStates,
}

impl BufferBarrier {
    pub fn is_uav_barrier(&self) -> bool {
        self.before == ResourceStates::UNORDERED_ACCESS
            && self.after == ResourceStates::UNORDERED_ACCESS
    }
}

/// One committed set of barriers. Barriers in a batch are unordered relative
/// to each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierBatch {
    pub textures: Vec<TextureBarrier>,
    pub buffers: Vec<BufferBarrier>,
}

impl BarrierBatch {
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.buffers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.textures.len() + self.buffers.len()
    }

    pub fn uav_barrier_count(&self) -> usize {
        self.textures.iter().filter(|b| b.is_uav_barrier()).count()
            + self.buffers.iter().filter(|b| b.is_uav_barrier()).count()
    }
}

/// Pending lengths at a point in time; see [`BarrierScheduler::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCheckpoint {
    textures: usize,
    buffers: usize,
}

#[derive(Debug, Default)]
pub struct BarrierScheduler {
    pending: BarrierBatch,
}

impl BarrierScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_texture(&mut self, barrier: TextureBarrier) {
        self.pending.textures.push(barrier);
    }

    pub fn push_buffer(&mut self, barrier: BufferBarrier) {
        self.pending.buffers.push(barrier);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &BarrierBatch {
        &self.pending
    }

    /// Takes the pending batch, or `None` when nothing is pending.
    pub fn take(&mut self) -> Option<BarrierBatch> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    pub fn clear(&mut self) {
        self.pending = BarrierBatch::default();
    }

    pub fn checkpoint(&self) -> PendingCheckpoint {
        PendingCheckpoint {
            textures: self.pending.textures.len(),
            buffers: self.pending.buffers.len(),
        }
    }

    /// Drops barriers queued after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: PendingCheckpoint) {
        self.pending.textures.truncate(checkpoint.textures);
        self.pending.buffers.truncate(checkpoint.buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_on_empty_is_none() {
        let mut scheduler = BarrierScheduler::new();
        assert!(scheduler.take().is_none());
    }

    #[test]
    fn second_take_is_none() {
        let mut scheduler = BarrierScheduler::new();
        scheduler.push_buffer(BufferBarrier {
            buffer: ResourceId(1),
            before: ResourceStates::COMMON,
            after: ResourceStates::COPY_DEST,
        });
        let batch = scheduler.take().expect("one batch");
        assert_eq!(batch.len(), 1);
        assert!(scheduler.take().is_none());
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn uav_barriers_are_counted() {
        let batch = BarrierBatch {
            textures: vec![TextureBarrier {
                texture: ResourceId(1),
                mip_levels: 0..1,
                array_slices: 0..1,
                entire_texture: true,
                before: ResourceStates::UNORDERED_ACCESS,
                after: ResourceStates::UNORDERED_ACCESS,
            }],
            buffers: vec![BufferBarrier {
                buffer: ResourceId(2),
                before: ResourceStates::COMMON,
                after: ResourceStates::UNORDERED_ACCESS,
            }],
        };
        assert_eq!(batch.uav_barrier_count(), 1);
    }

    #[test]
    fn rollback_keeps_barriers_queued_before_the_checkpoint() {
        let mut scheduler = BarrierScheduler::new();
        let barrier = |id, after| BufferBarrier {
            buffer: ResourceId(id),
            before: ResourceStates::COMMON,
            after,
        };
        scheduler.push_buffer(barrier(1, ResourceStates::COPY_DEST));
        let checkpoint = scheduler.checkpoint();
        scheduler.push_buffer(barrier(2, ResourceStates::COPY_SOURCE));
        scheduler.push_texture(TextureBarrier {
            texture: ResourceId(3),
            mip_levels: 0..1,
            array_slices: 0..1,
            entire_texture: true,
            before: ResourceStates::COMMON,
            after: ResourceStates::SHADER_RESOURCE,
        });

        scheduler.rollback(checkpoint);
        let batch = scheduler.take().expect("one batch");
        assert!(batch.textures.is_empty());
        assert_eq!(batch.buffers, [barrier(1, ResourceStates::COPY_DEST)]);
    }
}
