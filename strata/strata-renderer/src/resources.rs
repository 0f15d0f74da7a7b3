use slotmap::SlotMap;

use crate::batch::{BatchHandle, RenderBatch};
use crate::error::{RenderError, Result};
use crate::material::MaterialRegistry;

/// Materials and batches shared by every node of the renderer.
#[derive(Debug, Default)]
pub struct RenderResources {
    pub materials: MaterialRegistry,
    pub batches: SlotMap<BatchHandle, RenderBatch>,
}

impl RenderResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_batch(&mut self, batch: RenderBatch) -> BatchHandle {
        self.batches.insert(batch)
    }

    pub fn batch(&self, handle: BatchHandle) -> Result<&RenderBatch> {
        self.batches.get(handle).ok_or(RenderError::UnknownBatch)
    }

    pub fn batch_mut(&mut self, handle: BatchHandle) -> Result<&mut RenderBatch> {
        self.batches.get_mut(handle).ok_or(RenderError::UnknownBatch)
    }

    /// Reset every batch for the next frame.
    pub fn clear_batches(&mut self) {
        for (_, batch) in self.batches.iter_mut() {
            batch.clear_batch();
        }
    }

    /// Drop every batch's secondaries that were not recorded this frame.
    pub fn retire_unrecorded_secondaries(&mut self) {
        for (_, batch) in self.batches.iter_mut() {
            batch.retire_unrecorded();
        }
    }

    pub fn destroy(&mut self) {
        for (_, batch) in self.batches.iter_mut() {
            batch.destroy();
        }
        self.batches.clear();
    }
}
