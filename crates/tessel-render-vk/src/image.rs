// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use tracing::{info, warn};

use crate::memory::{AllocError, Allocator, MemoryUsage};
use crate::mip::{exceeds_full_chain, full_chain_levels, resolve_mip_levels};
use crate::queue::QueueSharing;
use crate::transfer::TransferContext;

/// Bytes per texel for the uncompressed formats the upload path accepts.
pub fn texel_size(format: vk::Format) -> Option<u32> {
    use vk::Format as F;
    Some(match format {
        F::R8_UNORM | F::R8_SRGB | F::R8_UINT => 1,
        F::R8G8_UNORM | F::R8G8_SRGB | F::R8G8_UINT => 2,
        F::R8G8B8_UNORM | F::R8G8B8_SRGB | F::B8G8R8_UNORM | F::B8G8R8_SRGB => 3,
        F::R8G8B8A8_UNORM
        | F::R8G8B8A8_SRGB
        | F::R8G8B8A8_UINT
        | F::B8G8R8A8_UNORM
        | F::B8G8R8A8_SRGB
        | F::R32_SFLOAT
        | F::R32_UINT => 4,
        F::R16G16B16A16_SFLOAT => 8,
        F::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    })
}

/// 8-bit sRGB format for a decoded image with `channels` components.
pub fn srgb_format_for_channels(channels: u8) -> Option<vk::Format> {
    match channels {
        1 => Some(vk::Format::R8_SRGB),
        2 => Some(vk::Format::R8G8_SRGB),
        3 => Some(vk::Format::R8G8B8_SRGB),
        4 => Some(vk::Format::R8G8B8A8_SRGB),
        _ => None,
    }
}

/// View swizzle that makes grey, grey+alpha and RGB data sample like RGBA.
pub fn channel_swizzle(format: vk::Format) -> vk::ComponentMapping {
    use vk::ComponentSwizzle as S;
    use vk::Format as F;
    let (r, g, b, a) = match format {
        F::R8_UNORM | F::R8_SRGB => (S::R, S::R, S::R, S::ONE),
        F::R8G8_UNORM | F::R8G8_SRGB => (S::R, S::R, S::R, S::G),
        F::R8G8B8_UNORM | F::R8G8B8_SRGB | F::B8G8R8_UNORM | F::B8G8R8_SRGB => {
            (S::R, S::G, S::B, S::ONE)
        }
        _ => (S::IDENTITY, S::IDENTITY, S::IDENTITY, S::IDENTITY),
    };
    vk::ComponentMapping { r, g, b, a }
}

pub(crate) fn color_range(base_mip: u32, levels: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: base_mip,
        level_count: levels,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// 2D view over `levels` mips of `image`.
pub(crate) fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    levels: u32,
    components: vk::ComponentMapping,
) -> Result<vk::ImageView, vk::Result> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(components)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: levels,
            base_array_layer: 0,
            layer_count: 1,
        });
    // SAFETY: image belongs to device; info outlives the call.
    unsafe { device.create_image_view(&info, None) }
}

pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub sharing: &'a QueueSharing,
}

pub struct TextureDesc<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    /// Upper bound; `u32::MAX` asks for the full chain.
    pub mip_levels: u32,
    pub with_view: bool,
    pub with_sampler: bool,
}

/// Device-local 2D image with an optional view and an optional sampler.
pub struct Image {
    allocator: Arc<Allocator>,
    handle: vk::Image,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
    format: vk::Format,
    mip_levels: u32,
    view: Option<vk::ImageView>,
    sampler: Option<vk::Sampler>,
}

impl Image {
    pub fn new(allocator: &Arc<Allocator>, desc: &ImageDesc) -> Result<Self, AllocError> {
        let device = allocator.device().raw();
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(desc.sharing.mode())
            .queue_family_indices(desc.sharing.create_info_families())
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: valid device; info outlives the call.
        let handle = unsafe { device.create_image(&info, None) }.map_err(AllocError::Create)?;
        let mut image = Self {
            allocator: Arc::clone(allocator),
            handle,
            allocation: None,
            extent: desc.extent,
            format: desc.format,
            mip_levels: desc.mip_levels.max(1),
            view: None,
            sampler: None,
        };

        // SAFETY: handle was just created on this device.
        let requirements = unsafe { device.get_image_memory_requirements(handle) };
        let allocation = allocator.allocate(desc.name, requirements, MemoryUsage::GpuOnly, false)?;
        let allocation = image.allocation.insert(allocation);
        // SAFETY: the allocation satisfies `requirements` and is not bound elsewhere.
        unsafe { device.bind_image_memory(handle, allocation.memory(), allocation.offset()) }
            .map_err(AllocError::Bind)?;
        Ok(image)
    }

    /// Create, stage and optionally view/sample a 2D texture. The mip count
    /// is resolved against the device: too many levels are clamped, and a
    /// format without linear blits gets a single level.
    pub fn upload_2d(
        transfer: &mut TransferContext,
        desc: &TextureDesc,
        pixels: &[u8],
    ) -> Result<Self> {
        let device = transfer.allocator().device();
        let linear_blit = device.supports_linear_blit(desc.format);
        let levels = resolve_mip_levels(desc.mip_levels, desc.width, desc.height, linear_blit);
        if exceeds_full_chain(desc.mip_levels, desc.width, desc.height) {
            warn!(
                "vk: '{}' asked for {} mip levels, a {}x{} image has {}",
                desc.name,
                desc.mip_levels,
                desc.width,
                desc.height,
                full_chain_levels(desc.width, desc.height)
            );
        }
        if desc.mip_levels > 1 && !linear_blit {
            warn!(
                "vk: {:?} has no linear blit support; '{}' gets 1 mip level",
                desc.format, desc.name
            );
        }

        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        let sharing = device.families().transfer_sharing();
        let mut image = Image::new(
            transfer.allocator(),
            &ImageDesc {
                name: desc.name,
                extent,
                format: desc.format,
                mip_levels: levels,
                samples: vk::SampleCountFlags::TYPE_1,
                usage,
                sharing: &sharing,
            },
        )
        .with_context(|| format!("create image '{}'", desc.name))?;

        let region = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        transfer
            .stage_linear_data_to_image(
                &image,
                region,
                pixels,
                desc.format,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
            .with_context(|| format!("stage image '{}'", desc.name))?;

        if desc.with_view {
            image.create_view(vk::ImageAspectFlags::COLOR, channel_swizzle(desc.format))?;
        }
        if desc.with_sampler {
            image.create_sampler()?;
        }

        info!(
            "vk: image '{}' {}x{} {:?} levels={}",
            desc.name, desc.width, desc.height, desc.format, levels
        );
        Ok(image)
    }

    /// Replaces any previous view.
    pub fn create_view(
        &mut self,
        aspect: vk::ImageAspectFlags,
        components: vk::ComponentMapping,
    ) -> Result<vk::ImageView> {
        let device = self.allocator.device().raw();
        let view = create_view(device, self.handle, self.format, aspect, self.mip_levels, components)
            .context("create_image_view")?;
        if let Some(old) = self.view.replace(view) {
            // SAFETY: the old view is only referenced by work the caller already waited on.
            unsafe { device.destroy_image_view(old, None) };
        }
        Ok(view)
    }

    /// Linear, repeating sampler covering every mip level.
    pub fn create_sampler(&mut self) -> Result<vk::Sampler> {
        let handles = self.allocator.device();
        let anisotropy = handles.max_anisotropy();
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(self.mip_levels as f32);
        // SAFETY: valid device; info outlives the call.
        let sampler =
            unsafe { handles.raw().create_sampler(&info, None) }.context("create_sampler")?;
        if let Some(old) = self.sampler.replace(sampler) {
            // SAFETY: as for views.
            unsafe { handles.raw().destroy_sampler(old, None) };
        }
        Ok(sampler)
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn view(&self) -> Option<vk::ImageView> {
        self.view
    }

    pub fn sampler(&self) -> Option<vk::Sampler> {
        self.sampler
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let device = self.allocator.device().raw();
        // SAFETY: callers wait on the device before dropping resources it may use.
        unsafe {
            if let Some(sampler) = self.sampler.take() {
                device.destroy_sampler(sampler, None);
            }
            if let Some(view) = self.view.take() {
                device.destroy_image_view(view, None);
            }
            device.destroy_image(self.handle, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texel_sizes_cover_upload_formats() {
        assert_eq!(texel_size(vk::Format::R8_SRGB), Some(1));
        assert_eq!(texel_size(vk::Format::R8G8_SRGB), Some(2));
        assert_eq!(texel_size(vk::Format::R8G8B8_SRGB), Some(3));
        assert_eq!(texel_size(vk::Format::R8G8B8A8_SRGB), Some(4));
        assert_eq!(texel_size(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(texel_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }

    #[test]
    fn channel_count_maps_to_srgb_formats() {
        assert_eq!(srgb_format_for_channels(1), Some(vk::Format::R8_SRGB));
        assert_eq!(srgb_format_for_channels(4), Some(vk::Format::R8G8B8A8_SRGB));
        assert_eq!(srgb_format_for_channels(5), None);
    }

    #[test]
    fn swizzle_expands_grey_and_rgb() {
        use vk::ComponentSwizzle as S;
        let grey = channel_swizzle(vk::Format::R8_SRGB);
        assert_eq!((grey.r, grey.g, grey.b, grey.a), (S::R, S::R, S::R, S::ONE));

        let grey_alpha = channel_swizzle(vk::Format::R8G8_SRGB);
        assert_eq!(
            (grey_alpha.r, grey_alpha.g, grey_alpha.b, grey_alpha.a),
            (S::R, S::R, S::R, S::G)
        );

        let rgb = channel_swizzle(vk::Format::R8G8B8_SRGB);
        assert_eq!(rgb.a, S::ONE);

        let rgba = channel_swizzle(vk::Format::R8G8B8A8_SRGB);
        assert_eq!(rgba.r, S::IDENTITY);
        assert_eq!(rgba.a, S::IDENTITY);
    }
}
