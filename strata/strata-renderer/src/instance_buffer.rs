//! Per-kind instance buffer: a fixed-capacity host-visible uniform buffer holding one aligned
//! parameter block per drawable of that kind, refilled every frame.

use strata_rhi::{Buffer, BufferDescriptor, BufferMemoryPreference, BufferUsage, Device};

use crate::drawable::DrawableKind;
use crate::error::{RenderError, Result};

/// Round `size` up to a multiple of `alignment` (alignment 0 or 1 leaves it unchanged).
pub(crate) fn align_up(size: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

#[derive(Debug)]
pub struct InstanceBuffer {
    kind: DrawableKind,
    /// None for kinds without per-instance data.
    buffer: Option<Box<dyn Buffer>>,
    item_size: u64,
    aligned_item_size: u64,
    len: u32,
    capacity: u32,
}

impl InstanceBuffer {
    /// Allocate room for `capacity` items of `item_size` bytes, each starting on the device's
    /// dynamic-offset alignment.
    pub fn new(device: &dyn Device, kind: DrawableKind, item_size: u64, capacity: u32, usage: BufferUsage) -> Result<Self> {
        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        let aligned_item_size = align_up(item_size, alignment);
        let buffer = if aligned_item_size == 0 || capacity == 0 {
            None
        } else {
            Some(device.create_buffer(&BufferDescriptor {
                label: Some("instance buffer"),
                size: aligned_item_size * capacity as u64,
                usage,
                memory: BufferMemoryPreference::HostVisible,
            })?)
        };
        Ok(Self {
            kind,
            buffer,
            item_size,
            aligned_item_size,
            len: 0,
            capacity,
        })
    }

    /// Append one item. On failure nothing is written and the fill count is unchanged.
    pub fn add_item(&mut self, device: &dyn Device, data: &[u8]) -> Result<u32> {
        self.add_items(device, std::slice::from_ref(&data))
    }

    /// Append several items at once; either all of them land or none do. Returns the slot of the first.
    pub fn add_items(&mut self, device: &dyn Device, items: &[&[u8]]) -> Result<u32> {
        if self.len as usize + items.len() > self.capacity as usize {
            return Err(RenderError::CapacityExceeded {
                kind: self.kind,
                capacity: self.capacity,
            });
        }
        if let Some(item) = items.iter().find(|i| i.len() as u64 > self.item_size) {
            return Err(RenderError::InstanceDataSize {
                kind: self.kind,
                len: item.len(),
                item_size: self.item_size,
            });
        }
        let first = self.len;
        if let Some(ref buffer) = self.buffer {
            for (i, item) in items.iter().enumerate() {
                if item.is_empty() {
                    continue;
                }
                device.write_buffer(buffer.as_ref(), self.offset_of(first + i as u32), item)?;
            }
        }
        self.len += items.len() as u32;
        Ok(first)
    }

    /// Reset the fill count. The allocation is kept and overwritten by the next frame.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Byte offset of slot `index`, the dynamic offset used when binding it.
    pub fn offset_of(&self, index: u32) -> u64 {
        index as u64 * self.aligned_item_size
    }

    pub fn buffer(&self) -> Option<&dyn Buffer> {
        self.buffer.as_deref()
    }

    pub fn kind(&self) -> DrawableKind {
        self.kind
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn item_size(&self) -> u64 {
        self.item_size
    }

    pub fn aligned_item_size(&self) -> u64 {
        self.aligned_item_size
    }
}
