// SPDX-License-Identifier: CEPL-1.0
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator as GpuAllocator,
    AllocatorCreateDesc,
};
use gpu_allocator::{AllocationError, MemoryLocation};
use thiserror::Error;
use tracing::{error, warn};

use crate::device::DeviceHandles;
use crate::queue::QueueSharing;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("resource creation failed: {0}")]
    Create(vk::Result),
    #[error("memory allocation failed: {0}")]
    Allocate(#[from] AllocationError),
    #[error("binding memory failed: {0}")]
    Bind(vk::Result),
    #[error("allocator is unavailable (poisoned lock)")]
    Poisoned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Device-local; only reachable through transfers.
    GpuOnly,
    /// Host-visible, persistently mapped, written by the host.
    CpuToGpu,
    /// Host-visible, persistently mapped, read back by the host.
    GpuToCpu,
}

impl From<MemoryUsage> for MemoryLocation {
    fn from(usage: MemoryUsage) -> Self {
        match usage {
            MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
            MemoryUsage::CpuToGpu => MemoryLocation::CpuToGpu,
            MemoryUsage::GpuToCpu => MemoryLocation::GpuToCpu,
        }
    }
}

/// Shared sub-allocator. Every buffer and image keeps an `Arc` to it, and it
/// keeps the device alive.
pub struct Allocator {
    inner: Mutex<Option<GpuAllocator>>,
    live: AtomicUsize,
    device: Arc<DeviceHandles>,
}

impl Allocator {
    pub fn new(device: &Arc<DeviceHandles>) -> Result<Arc<Self>> {
        let inner = GpuAllocator::new(&AllocatorCreateDesc {
            instance: device.instance().raw().clone(),
            device: device.raw().clone(),
            physical_device: device.physical(),
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("create gpu allocator")?;

        Ok(Arc::new(Self {
            inner: Mutex::new(Some(inner)),
            live: AtomicUsize::new(0),
            device: Arc::clone(device),
        }))
    }

    pub fn device(&self) -> &Arc<DeviceHandles> {
        &self.device
    }

    /// Allocations handed out and not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub(crate) fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        usage: MemoryUsage,
        linear: bool,
    ) -> Result<Allocation, AllocError> {
        let mut guard = self.inner.lock().map_err(|_| AllocError::Poisoned)?;
        let allocator = guard.as_mut().ok_or(AllocError::Poisoned)?;
        let allocation = allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: usage.into(),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        self.live.fetch_add(1, Ordering::Relaxed);
        Ok(allocation)
    }

    pub(crate) fn free(&self, allocation: Allocation) {
        let Ok(mut guard) = self.inner.lock() else {
            error!("vk: allocator lock poisoned, leaking allocation");
            return;
        };
        if let Some(allocator) = guard.as_mut() {
            match allocator.free(allocation) {
                Ok(()) => {
                    self.live.fetch_sub(1, Ordering::Relaxed);
                }
                Err(e) => error!("vk: free allocation: {e}"),
            }
        }
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        // The sub-allocator releases its device memory blocks here, before
        // the Arc<DeviceHandles> field lets the device go.
        let live = self.live_allocations();
        if live > 0 {
            warn!("vk: allocator dropped with {live} live allocations");
        }
        if let Ok(mut guard) = self.inner.lock() {
            guard.take();
        }
    }
}

pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory: MemoryUsage,
    pub sharing: &'a QueueSharing,
}

/// Buffer plus its allocation. Destroyed and freed exactly once, on drop.
pub struct Buffer {
    allocator: Arc<Allocator>,
    handle: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl Buffer {
    pub fn new(allocator: &Arc<Allocator>, desc: &BufferDesc) -> Result<Self, AllocError> {
        let device = allocator.device().raw();
        let info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(desc.sharing.mode())
            .queue_family_indices(desc.sharing.create_info_families());

        // SAFETY: valid device; info outlives the call.
        let handle = unsafe { device.create_buffer(&info, None) }.map_err(AllocError::Create)?;
        // From here on, drop cleans up whatever was acquired.
        let mut buffer = Self {
            allocator: Arc::clone(allocator),
            handle,
            allocation: None,
            size: desc.size,
        };

        // SAFETY: handle was just created on this device.
        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        // Owned by `buffer` before binding, so a failed bind still frees it.
        let allocation = allocator.allocate(desc.name, requirements, desc.memory, true)?;
        let allocation = buffer.allocation.insert(allocation);
        // SAFETY: the allocation satisfies `requirements` and is not bound elsewhere.
        unsafe { device.bind_buffer_memory(handle, allocation.memory(), allocation.offset()) }
            .map_err(AllocError::Bind)?;
        Ok(buffer)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Mapped bytes of a host-visible buffer, `None` for device-local memory.
    pub fn mapped(&self) -> Option<&[u8]> {
        self.allocation.as_ref()?.mapped_slice()
    }

    pub fn mapped_mut(&mut self) -> Option<&mut [u8]> {
        self.allocation.as_mut()?.mapped_slice_mut()
    }

    /// Copy `bytes` into a host-visible buffer at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mapped = self
            .mapped_mut()
            .context("buffer is not host-visible")?;
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= mapped.len())
            .context("write past the end of the buffer")?;
        mapped[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: callers wait on the device before dropping resources it may use.
        unsafe { self.allocator.device().raw().destroy_buffer(self.handle, None) };
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free(allocation);
        }
    }
}
