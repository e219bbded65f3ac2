// SPDX-License-Identifier: CEPL-1.0
use std::mem::size_of;
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::device::DeviceHandles;
use crate::image::Image;
use crate::memory::{Allocator, Buffer, BufferDesc, MemoryUsage};
use crate::queue::QueueSharing;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct UniformMatrices {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl UniformMatrices {
    /// Model spinning about +Z at pi/4 rad/s, seen from (1,1,1).
    pub fn spinning(seconds: f32, aspect: f32) -> Self {
        let model = Mat4::from_rotation_z(seconds * std::f32::consts::FRAC_PI_4);
        let view = Mat4::look_at_rh(Vec3::ONE, Vec3::ZERO, Vec3::Z);
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // clip space Y points down
        proj.y_axis.y *= -1.0;
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

/// Per-slot uniform buffers and descriptor sets. Slot `i` only ever touches
/// buffer `i` and set `i`.
pub struct FrameUniforms {
    device: Arc<DeviceHandles>,
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    buffers: Vec<Buffer>,
}

impl FrameUniforms {
    /// `texture` must already carry its view and sampler; they are written
    /// into binding 1 of every set.
    pub fn new(allocator: &Arc<Allocator>, frames: usize, texture: &Image) -> Result<Self> {
        let device = allocator.device();
        let raw = device.raw();
        let (view, sampler) = texture
            .view()
            .zip(texture.sampler())
            .context("texture needs a view and a sampler")?;

        let mut this = Self {
            device: Arc::clone(device),
            set_layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
            buffers: Vec::with_capacity(frames),
        };

        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        // SAFETY: valid device; bindings outlive the call.
        this.set_layout = unsafe { raw.create_descriptor_set_layout(&layout_info, None) }
            .context("create_descriptor_set_layout")?;

        let count = frames as u32;
        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(count);
        // SAFETY: as above.
        this.pool = unsafe { raw.create_descriptor_pool(&pool_info, None) }
            .context("create_descriptor_pool")?;

        let sharing = QueueSharing::new(&[device.families().graphics]);
        for _ in 0..frames {
            this.buffers.push(
                Buffer::new(
                    allocator,
                    &BufferDesc {
                        name: "frame uniforms",
                        size: size_of::<UniformMatrices>() as vk::DeviceSize,
                        usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                        memory: MemoryUsage::CpuToGpu,
                        sharing: &sharing,
                    },
                )
                .context("create uniform buffer")?,
            );
        }

        let layouts = vec![this.set_layout; frames];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(this.pool)
            .set_layouts(&layouts);
        // SAFETY: the pool was sized for exactly `frames` sets.
        this.sets = unsafe { raw.allocate_descriptor_sets(&alloc_info) }
            .context("allocate_descriptor_sets")?;

        for (set, buffer) in this.sets.iter().zip(&this.buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.handle(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            }];
            let image_info = [vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }];
            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(*set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info),
                vk::WriteDescriptorSet::default()
                    .dst_set(*set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info),
            ];
            // SAFETY: sets are not in use by any submission yet.
            unsafe { raw.update_descriptor_sets(&writes, &[]) };
        }
        Ok(this)
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    pub fn set(&self, slot: usize) -> vk::DescriptorSet {
        self.sets[slot]
    }

    /// Caller must have waited on the slot's fence.
    pub fn write(&mut self, slot: usize, matrices: &UniformMatrices) -> Result<()> {
        self.buffers[slot].write(0, bytemuck::bytes_of(matrices))
    }
}

impl Drop for FrameUniforms {
    fn drop(&mut self) {
        let raw = self.device.raw();
        // SAFETY: the owner waited for the device; sets go with the pool.
        unsafe {
            if self.pool != vk::DescriptorPool::null() {
                raw.destroy_descriptor_pool(self.pool, None);
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                raw.destroy_descriptor_set_layout(self.set_layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_flips_y_and_model_spins() {
        let m = UniformMatrices::spinning(0.0, 16.0 / 9.0);
        assert!(m.proj[1][1] < 0.0);
        assert_eq!(m.model, Mat4::IDENTITY.to_cols_array_2d());

        let quarter = UniformMatrices::spinning(2.0, 1.0);
        let model = Mat4::from_cols_array_2d(&quarter.model);
        let x = model.transform_vector3(Vec3::X);
        assert!((x - Vec3::Y).length() < 1e-5);
        assert_eq!(size_of::<UniformMatrices>(), 192);
    }
}
