// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::error::{Result, VkResultExt};
use crate::gpu::GpuDevice;
use crate::FRAMES_IN_FLIGHT;

/// Per-slot sync and recording target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameResource {
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by acquire, waited on by submit.
    pub image_available: vk::Semaphore,
    /// Signaled by submit, waited on by present.
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on a fresh slot returns at once.
    pub in_flight: vk::Fence,
}

impl FrameResource {
    pub fn is_null(&self) -> bool {
        *self == Self::default()
    }
}

/// N slots plus the command pool their buffers come from. The pool outlives
/// every `recreate`; the slots do not.
#[derive(Debug, Default)]
pub struct FrameRing {
    pool: vk::CommandPool,
    slots: [FrameResource; FRAMES_IN_FLIGHT],
}

impl FrameRing {
    pub fn new(device: &dyn GpuDevice) -> Result<Self> {
        let pool = device
            .create_command_pool(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .op("vkCreateCommandPool(frames)")?;
        let mut ring = Self {
            pool,
            slots: Default::default(),
        };
        if let Err(e) = ring.fill_slots(device) {
            ring.destroy(device);
            return Err(e);
        }
        Ok(ring)
    }

    /// Drain the device, drop every slot and build them again from the
    /// retained pool.
    pub fn recreate(&mut self, device: &dyn GpuDevice) -> Result<()> {
        device.wait_idle().op("vkDeviceWaitIdle")?;
        self.release_slots(device);
        self.fill_slots(device)?;
        debug!(slots = FRAMES_IN_FLIGHT, "frame ring rebuilt");
        Ok(())
    }

    fn fill_slots(&mut self, device: &dyn GpuDevice) -> Result<()> {
        let buffers = device
            .allocate_command_buffers(self.pool, FRAMES_IN_FLIGHT as u32)
            .op("vkAllocateCommandBuffers(frames)")?;
        for (slot, cmd) in self.slots.iter_mut().zip(buffers) {
            slot.command_buffer = cmd;
        }

        for i in 0..FRAMES_IN_FLIGHT {
            if let Err(e) = Self::create_sync(device, &mut self.slots[i]) {
                self.release_slots(device);
                return Err(e);
            }
        }
        Ok(())
    }

    fn create_sync(device: &dyn GpuDevice, slot: &mut FrameResource) -> Result<()> {
        slot.image_available = device
            .create_semaphore()
            .op("vkCreateSemaphore(image_available)")?;
        slot.render_finished = device
            .create_semaphore()
            .op("vkCreateSemaphore(render_finished)")?;
        slot.in_flight = device.create_fence(true).op("vkCreateFence(in_flight)")?;
        Ok(())
    }

    fn release_slots(&mut self, device: &dyn GpuDevice) {
        let buffers: Vec<vk::CommandBuffer> = self
            .slots
            .iter()
            .map(|s| s.command_buffer)
            .filter(|&c| c != vk::CommandBuffer::null())
            .collect();
        if !buffers.is_empty() {
            device.free_command_buffers(self.pool, &buffers);
        }

        for slot in &mut self.slots {
            if slot.image_available != vk::Semaphore::null() {
                device.destroy_semaphore(slot.image_available);
            }
            if slot.render_finished != vk::Semaphore::null() {
                device.destroy_semaphore(slot.render_finished);
            }
            if slot.in_flight != vk::Fence::null() {
                device.destroy_fence(slot.in_flight);
            }
            *slot = FrameResource::default();
        }
    }

    /// `index` is taken modulo N.
    pub fn slot(&self, index: usize) -> &FrameResource {
        &self.slots[index % FRAMES_IN_FLIGHT]
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn is_null(&self) -> bool {
        self.pool == vk::CommandPool::null() && self.slots.iter().all(FrameResource::is_null)
    }

    /// Slots first, then the pool. The caller makes sure the GPU is idle.
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        self.release_slots(device);
        if self.pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.pool);
            self.pool = vk::CommandPool::null();
        }
    }
}

/// Which slot records next, and how many frames were completed so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCursor {
    frame: u32,
    slot: usize,
}

impl FrameCursor {
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn advance(&mut self) {
        self.frame = self.frame.wrapping_add(1);
        self.slot = (self.slot + 1) % FRAMES_IN_FLIGHT;
    }
}
