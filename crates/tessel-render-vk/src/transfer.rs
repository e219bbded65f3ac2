// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::image::{color_range, texel_size, Image};
use crate::memory::{AllocError, Allocator, Buffer, BufferDesc, MemoryUsage};
use crate::mip::mip_corner;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("staging buffer: {0}")]
    Staging(#[from] AllocError),
    #[error("staging buffer is not host-visible")]
    NotMapped,
    #[error("reset command buffer: {0}")]
    ResetCommandBuffer(vk::Result),
    #[error("begin command buffer: {0}")]
    Begin(vk::Result),
    #[error("end command buffer: {0}")]
    End(vk::Result),
    #[error("reset transfer fence: {0}")]
    ResetFence(vk::Result),
    #[error("submit to transfer queue: {0}")]
    Submit(vk::Result),
    #[error("wait for transfer fence: {0}")]
    Wait(vk::Result),
    #[error("payload holds {actual} bytes, copy needs {expected}")]
    PayloadSize { expected: u64, actual: u64 },
    #[error("copy of {size} bytes at offset {offset} overruns a {capacity}-byte buffer")]
    OutOfBounds {
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },
    #[error("region {0:?} is empty or lies outside the image")]
    InvalidRegion(vk::Rect2D),
    #[error("region {0:?} does not cover a mip-chained image")]
    PartialMipRegion(vk::Rect2D),
    #[error("no linear upload path for {0:?}")]
    UnsupportedFormat(vk::Format),
}

/// One command pool + buffer bound to a queue.
struct CommandLane {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    queue: vk::Queue,
    graphics: bool,
}

impl CommandLane {
    fn new(device: &ash::Device, family: u32, queue: vk::Queue, graphics: bool) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            queue_family_index: family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        // SAFETY: valid device.
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("create transfer command pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        // SAFETY: pool was just created on this device.
        let cmd = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(bufs) => bufs[0],
            Err(e) => {
                // SAFETY: nothing was allocated from the pool.
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e).context("allocate transfer command buffer");
            }
        };
        Ok(Self {
            pool,
            cmd,
            queue,
            graphics,
        })
    }

    /// Destination stage/access that is legal on this lane's queue for a
    /// transition into `layout`.
    fn release_scope(&self, layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
        if !self.graphics {
            return (vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty());
        }
        match layout {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::SHADER_READ,
            ),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
                (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ)
            }
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
                (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
            }
            _ => (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ,
            ),
        }
    }
}

/// Layout change of a subresource range, with both synchronization scopes.
struct LayoutTransition {
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    src_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_stage: vk::PipelineStageFlags,
    dst_access: vk::AccessFlags,
}

/// Synchronous host to device uploads. One transfer in flight at a time,
/// tracked by a fence no frame slot ever uses.
pub struct TransferContext {
    allocator: Arc<Allocator>,
    upload: CommandLane,
    /// Graphics-queue lane for blits when uploads run on a dedicated
    /// transfer family. `None` means `upload` can blit.
    blit: Option<CommandLane>,
    fence: vk::Fence,
}

impl TransferContext {
    pub fn new(allocator: &Arc<Allocator>) -> Result<Self> {
        let handles = allocator.device();
        let device = handles.raw();
        let families = handles.families();

        let upload = match families.transfer {
            Some(family) => {
                info!("vk: dedicated transfer queue family {family}");
                CommandLane::new(device, family, handles.transfer_queue(), false)?
            }
            None => CommandLane::new(device, families.graphics, handles.graphics_queue(), true)?,
        };
        let mut ctx = Self {
            allocator: Arc::clone(allocator),
            upload,
            blit: None,
            fence: vk::Fence::null(),
        };
        if families.transfer.is_some() {
            ctx.blit = Some(CommandLane::new(
                device,
                families.graphics,
                handles.graphics_queue(),
                true,
            )?);
        }

        // Unsignaled: every use resets then waits.
        // SAFETY: valid device.
        ctx.fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .context("create transfer fence")?;
        Ok(ctx)
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// Copy `size` bytes of `data` into `destination` at `offset`, blocking
    /// until the device has finished.
    pub fn stage_to_buffer(
        &mut self,
        destination: &Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> Result<(), TransferError> {
        if (data.len() as u64) < size {
            return Err(TransferError::PayloadSize {
                expected: size,
                actual: data.len() as u64,
            });
        }
        if offset.checked_add(size).map_or(true, |end| end > destination.size()) {
            return Err(TransferError::OutOfBounds {
                offset,
                size,
                capacity: destination.size(),
            });
        }
        if size == 0 {
            return Ok(());
        }

        let staging = self.staging("staging buffer", &data[..size as usize])?;
        let device = self.allocator.device().raw();
        let lane = &self.upload;

        self.begin(lane)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size,
        };
        // SAFETY: lane.cmd is recording; both buffers are alive until the wait below.
        unsafe {
            device.cmd_copy_buffer(lane.cmd, staging.handle(), destination.handle(), &[region]);
        }
        self.submit_and_wait(lane)?;
        debug!("vk: staged {size} bytes to buffer at offset {offset}");
        Ok(())
    }

    /// Upload tightly packed texels into level 0 of `destination` at
    /// `region`, then build the rest of its mip chain. Every level ends in
    /// `final_layout`; previous contents are discarded, also outside
    /// `region`. Mips are built from the whole of level 0, so an image with
    /// more than one level only accepts a region covering all of it.
    pub fn stage_linear_data_to_image(
        &mut self,
        destination: &Image,
        region: vk::Rect2D,
        pixel_data: &[u8],
        format: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> Result<(), TransferError> {
        let texel = texel_size(format).ok_or(TransferError::UnsupportedFormat(format))?;
        if !region_fits(region, destination.extent()) {
            return Err(TransferError::InvalidRegion(region));
        }
        if destination.mip_levels() > 1 && !region_covers(region, destination.extent()) {
            return Err(TransferError::PartialMipRegion(region));
        }
        let expected =
            u64::from(region.extent.width) * u64::from(region.extent.height) * u64::from(texel);
        if (pixel_data.len() as u64) < expected {
            return Err(TransferError::PayloadSize {
                expected,
                actual: pixel_data.len() as u64,
            });
        }

        let staging = self.staging("image staging buffer", &pixel_data[..expected as usize])?;
        let device = self.allocator.device().raw();
        let levels = destination.mip_levels();
        let image = destination.handle();
        let lane = &self.upload;

        self.begin(lane)?;
        record_transition(
            device,
            lane.cmd,
            image,
            color_range(0, levels),
            &LayoutTransition {
                old: vk::ImageLayout::UNDEFINED,
                new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                src_access: vk::AccessFlags::empty(),
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
            },
        );
        let copy = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D {
                x: region.offset.x,
                y: region.offset.y,
                z: 0,
            },
            image_extent: vk::Extent3D {
                width: region.extent.width,
                height: region.extent.height,
                depth: 1,
            },
        };
        // SAFETY: lane.cmd is recording; staging and image outlive the wait below.
        unsafe {
            device.cmd_copy_buffer_to_image(
                lane.cmd,
                staging.handle(),
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
        if levels == 1 && final_layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            let (dst_stage, dst_access) = lane.release_scope(final_layout);
            record_transition(
                device,
                lane.cmd,
                image,
                color_range(0, 1),
                &LayoutTransition {
                    old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new: final_layout,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_stage,
                    dst_access,
                },
            );
        }
        self.submit_and_wait(lane)?;
        drop(staging);

        if levels > 1 {
            self.generate_mips(destination, final_layout)?;
        }
        Ok(())
    }

    /// Blit level i into level i+1 for the whole chain. Expects every level
    /// in TRANSFER_DST_OPTIMAL with level 0 filled.
    fn generate_mips(
        &self,
        destination: &Image,
        final_layout: vk::ImageLayout,
    ) -> Result<(), TransferError> {
        let device = self.allocator.device().raw();
        let lane = self.blit.as_ref().unwrap_or(&self.upload);
        let image = destination.handle();
        let base = destination.extent();
        let levels = destination.mip_levels();
        let (release_stage, release_access) = lane.release_scope(final_layout);

        self.begin(lane)?;
        for level in 0..levels - 1 {
            record_transition(
                device,
                lane.cmd,
                image,
                color_range(level, 1),
                &LayoutTransition {
                    old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_stage: vk::PipelineStageFlags::TRANSFER,
                    dst_access: vk::AccessFlags::TRANSFER_READ,
                },
            );

            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                src_offsets: [vk::Offset3D::default(), mip_corner(base, level)],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level + 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                dst_offsets: [vk::Offset3D::default(), mip_corner(base, level + 1)],
            };
            // SAFETY: lane.cmd is recording; the image outlives the wait below.
            unsafe {
                device.cmd_blit_image(
                    lane.cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
            }

            record_transition(
                device,
                lane.cmd,
                image,
                color_range(level, 1),
                &LayoutTransition {
                    old: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    new: final_layout,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    src_access: vk::AccessFlags::TRANSFER_READ,
                    dst_stage: release_stage,
                    dst_access: release_access,
                },
            );
        }
        if final_layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            record_transition(
                device,
                lane.cmd,
                image,
                color_range(levels - 1, 1),
                &LayoutTransition {
                    old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new: final_layout,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_stage: release_stage,
                    dst_access: release_access,
                },
            );
        }
        self.submit_and_wait(lane)?;
        debug!("vk: generated {levels} mip levels");
        Ok(())
    }

    /// Copy `size` bytes of `source` back to the host. `source` needs
    /// `TRANSFER_SRC` usage.
    pub fn read_buffer(
        &mut self,
        source: &Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<Vec<u8>, TransferError> {
        if offset.checked_add(size).map_or(true, |end| end > source.size()) {
            return Err(TransferError::OutOfBounds {
                offset,
                size,
                capacity: source.size(),
            });
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let readback = self.readback("readback buffer", size)?;
        let device = self.allocator.device().raw();
        let lane = &self.upload;

        self.begin(lane)?;
        let region = vk::BufferCopy {
            src_offset: offset,
            dst_offset: 0,
            size,
        };
        let host_visible = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ);
        // SAFETY: lane.cmd is recording; both buffers outlive the wait below.
        unsafe {
            device.cmd_copy_buffer(lane.cmd, source.handle(), readback.handle(), &[region]);
            device.cmd_pipeline_barrier(
                lane.cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[host_visible],
                &[],
                &[],
            );
        }
        self.submit_and_wait(lane)?;

        let bytes = readback.mapped().ok_or(TransferError::NotMapped)?;
        Ok(bytes[..size as usize].to_vec())
    }

    /// Copy level 0 of `source` back to the host as tightly packed texels.
    /// `source` needs `TRANSFER_SRC` usage and is left in `layout`, or in
    /// TRANSFER_SRC_OPTIMAL when `layout` is UNDEFINED.
    pub fn read_image(
        &mut self,
        source: &Image,
        layout: vk::ImageLayout,
    ) -> Result<Vec<u8>, TransferError> {
        let format = source.format();
        let texel = texel_size(format).ok_or(TransferError::UnsupportedFormat(format))?;
        let extent = source.extent();
        let size = u64::from(extent.width) * u64::from(extent.height) * u64::from(texel);

        let readback = self.readback("image readback buffer", size)?;
        let device = self.allocator.device().raw();
        let lane = &self.upload;

        self.begin(lane)?;
        record_transition(
            device,
            lane.cmd,
            source.handle(),
            color_range(0, 1),
            &LayoutTransition {
                old: layout,
                new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                src_access: vk::AccessFlags::empty(),
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                dst_access: vk::AccessFlags::TRANSFER_READ,
            },
        );
        let copy = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        let host_visible = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ);
        // SAFETY: lane.cmd is recording; image and buffer outlive the wait below.
        unsafe {
            device.cmd_copy_image_to_buffer(
                lane.cmd,
                source.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback.handle(),
                &[copy],
            );
            device.cmd_pipeline_barrier(
                lane.cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[host_visible],
                &[],
                &[],
            );
        }
        if layout != vk::ImageLayout::TRANSFER_SRC_OPTIMAL && layout != vk::ImageLayout::UNDEFINED {
            record_transition(
                device,
                lane.cmd,
                source.handle(),
                color_range(0, 1),
                &LayoutTransition {
                    old: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    new: layout,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    src_access: vk::AccessFlags::TRANSFER_READ,
                    dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    dst_access: vk::AccessFlags::empty(),
                },
            );
        }
        self.submit_and_wait(lane)?;

        let bytes = readback.mapped().ok_or(TransferError::NotMapped)?;
        Ok(bytes[..size as usize].to_vec())
    }

    fn readback(&self, name: &str, size: vk::DeviceSize) -> Result<Buffer, TransferError> {
        let sharing = self.allocator.device().families().transfer_sharing();
        Ok(Buffer::new(
            &self.allocator,
            &BufferDesc {
                name,
                size,
                usage: vk::BufferUsageFlags::TRANSFER_DST,
                memory: MemoryUsage::GpuToCpu,
                sharing: &sharing,
            },
        )?)
    }

    fn staging(&self, name: &str, data: &[u8]) -> Result<Buffer, TransferError> {
        let sharing = self.allocator.device().families().transfer_sharing();
        let mut staging = Buffer::new(
            &self.allocator,
            &BufferDesc {
                name,
                size: data.len() as vk::DeviceSize,
                usage: vk::BufferUsageFlags::TRANSFER_SRC,
                memory: MemoryUsage::CpuToGpu,
                sharing: &sharing,
            },
        )?;
        let mapped = staging.mapped_mut().ok_or(TransferError::NotMapped)?;
        mapped[..data.len()].copy_from_slice(data);
        Ok(staging)
    }

    fn begin(&self, lane: &CommandLane) -> Result<(), TransferError> {
        let device = self.allocator.device().raw();
        let begin = vk::CommandBufferBeginInfo {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        // SAFETY: the previous submission of lane.cmd was waited on.
        unsafe {
            device
                .reset_command_buffer(lane.cmd, vk::CommandBufferResetFlags::RELEASE_RESOURCES)
                .map_err(|e| log_failure(TransferError::ResetCommandBuffer(e)))?;
            device
                .begin_command_buffer(lane.cmd, &begin)
                .map_err(|e| log_failure(TransferError::Begin(e)))
        }
    }

    fn submit_and_wait(&self, lane: &CommandLane) -> Result<(), TransferError> {
        let device = self.allocator.device().raw();
        let cmds = [lane.cmd];
        let submit = vk::SubmitInfo::default().command_buffers(&cmds);
        // SAFETY: lane.cmd is recording; the fence is not in use (single caller).
        unsafe {
            device
                .end_command_buffer(lane.cmd)
                .map_err(|e| log_failure(TransferError::End(e)))?;
            device
                .reset_fences(&[self.fence])
                .map_err(|e| log_failure(TransferError::ResetFence(e)))?;
            device
                .queue_submit(lane.queue, &[submit], self.fence)
                .map_err(|e| log_failure(TransferError::Submit(e)))?;
            device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .map_err(|e| log_failure(TransferError::Wait(e)))
        }
    }
}

impl Drop for TransferContext {
    fn drop(&mut self) {
        let device = self.allocator.device().raw();
        // SAFETY: a failed submit may still be executing; drain the queues first.
        unsafe {
            device.queue_wait_idle(self.upload.queue).ok();
            if let Some(blit) = &self.blit {
                device.queue_wait_idle(blit.queue).ok();
            }
            if self.fence != vk::Fence::null() {
                device.destroy_fence(self.fence, None);
            }
            for lane in std::iter::once(&self.upload).chain(self.blit.as_ref()) {
                device.destroy_command_pool(lane.pool, None);
            }
        }
    }
}

fn log_failure(e: TransferError) -> TransferError {
    error!("vk: transfer failed: {e}");
    e
}

fn region_covers(region: vk::Rect2D, extent: vk::Extent2D) -> bool {
    region.offset.x == 0 && region.offset.y == 0 && region.extent == extent
}

fn region_fits(region: vk::Rect2D, extent: vk::Extent2D) -> bool {
    let (Ok(x), Ok(y)) = (u32::try_from(region.offset.x), u32::try_from(region.offset.y)) else {
        return false;
    };
    region.extent.width > 0
        && region.extent.height > 0
        && x.checked_add(region.extent.width)
            .is_some_and(|end| end <= extent.width)
        && y.checked_add(region.extent.height)
            .is_some_and(|end| end <= extent.height)
}

fn record_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    t: &LayoutTransition,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(t.old)
        .new_layout(t.new)
        .src_access_mask(t.src_access)
        .dst_access_mask(t.dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range);
    // SAFETY: cmd is in the recording state.
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            t.src_stage,
            t.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: i32, y: i32, w: u32, h: u32) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x, y },
            extent: vk::Extent2D {
                width: w,
                height: h,
            },
        }
    }

    #[test]
    fn regions_must_lie_inside_the_image() {
        let extent = vk::Extent2D {
            width: 64,
            height: 32,
        };
        assert!(region_fits(rect(0, 0, 64, 32), extent));
        assert!(region_fits(rect(16, 8, 48, 24), extent));
        assert!(!region_fits(rect(16, 8, 49, 24), extent));
        assert!(!region_fits(rect(-1, 0, 4, 4), extent));
        assert!(!region_fits(rect(0, 0, 0, 4), extent));
    }

    #[test]
    fn only_the_whole_image_counts_as_covered() {
        let extent = vk::Extent2D {
            width: 64,
            height: 32,
        };
        assert!(region_covers(rect(0, 0, 64, 32), extent));
        assert!(!region_covers(rect(0, 0, 63, 32), extent));
        assert!(!region_covers(rect(1, 0, 63, 32), extent));
    }
}
