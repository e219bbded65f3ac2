// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;

use crate::device::DeviceHandles;

/// Synchronization and command state of one frame in flight.
pub struct FrameSlot {
    device: Arc<DeviceHandles>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSlot {
    /// Handles are filled in acquisition order; on error, drop releases
    /// the ones already created.
    fn new(device: &Arc<DeviceHandles>, graphics_family: u32) -> Result<Self> {
        let mut slot = Self {
            device: Arc::clone(device),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
        };
        let raw = device.raw();
        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Signaled, so the first wait on a fresh slot returns at once.
        let fence_ci = vk::FenceCreateInfo {
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let pool_ci = vk::CommandPoolCreateInfo {
            queue_family_index: graphics_family,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };

        // SAFETY: valid device; each handle is stored before the next call can fail.
        unsafe {
            slot.image_available = raw
                .create_semaphore(&sem_ci, None)
                .context("create image-available semaphore")?;
            slot.render_finished = raw
                .create_semaphore(&sem_ci, None)
                .context("create render-finished semaphore")?;
            slot.in_flight = raw
                .create_fence(&fence_ci, None)
                .context("create in-flight fence")?;
            slot.command_pool = raw
                .create_command_pool(&pool_ci, None)
                .context("create frame command pool")?;
            let alloc = vk::CommandBufferAllocateInfo {
                command_pool: slot.command_pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            slot.command_buffer = raw
                .allocate_command_buffers(&alloc)
                .context("allocate frame command buffer")?[0];
        }
        Ok(slot)
    }

    /// Unbounded wait for the slot's last submission.
    pub fn wait(&self) -> Result<()> {
        // SAFETY: the fence belongs to this device.
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.in_flight], true, u64::MAX)
        }
        .context("wait for in-flight fence")
    }

    /// Reset the fence and recycle the slot's command pool.
    pub fn reset(&self) -> Result<()> {
        let raw = self.device.raw();
        // SAFETY: the fence was waited on, so nothing in the pool is pending.
        unsafe {
            raw.reset_fences(&[self.in_flight])
                .context("reset in-flight fence")?;
            raw.reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())
                .context("reset frame command pool")
        }
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        let raw = self.device.raw();
        // SAFETY: the owner waited for the device; null handles were never created.
        unsafe {
            if self.command_pool != vk::CommandPool::null() {
                raw.destroy_command_pool(self.command_pool, None);
            }
            if self.in_flight != vk::Fence::null() {
                raw.destroy_fence(self.in_flight, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                raw.destroy_semaphore(self.render_finished, None);
            }
            if self.image_available != vk::Semaphore::null() {
                raw.destroy_semaphore(self.image_available, None);
            }
        }
    }
}

/// `F` independent frame slots on the graphics family.
pub struct FrameSyncSet {
    slots: Vec<FrameSlot>,
}

impl FrameSyncSet {
    pub fn new(device: &Arc<DeviceHandles>, frames_in_flight: usize) -> Result<Self> {
        let graphics = device.families().graphics;
        let slots = (0..frames_in_flight.max(1))
            .map(|_| FrameSlot::new(device, graphics))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { slots })
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }
}
