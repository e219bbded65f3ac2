// SPDX-License-Identifier: CEPL-1.0
//! Headless device tests. Skipped when the machine has no Vulkan loader or
//! no usable adapter.

use std::sync::Arc;

use tessel_render_vk::{
    full_chain_levels, vk, Allocator, Buffer, BufferDesc, DeviceHandles, DeviceRequest, Image,
    ImageDesc, InstanceDesc, MemoryUsage, TextureDesc, TransferContext, TransferError,
    VulkanInstance,
};

fn headless() -> Option<(Arc<DeviceHandles>, Arc<Allocator>)> {
    let instance = match VulkanInstance::new(&InstanceDesc {
        app_name: "tessel-tests",
        validation: false,
        display: None,
    }) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("skipping: no Vulkan instance ({e:#})");
            return None;
        }
    };
    let device = match DeviceHandles::new(
        &instance,
        &DeviceRequest {
            surface: None,
            dedicated_transfer: true,
        },
    ) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("skipping: no Vulkan device ({e:#})");
            return None;
        }
    };
    let allocator = Allocator::new(&device).expect("allocator");
    Some((device, allocator))
}

fn device_buffer(allocator: &Arc<Allocator>, size: vk::DeviceSize) -> Buffer {
    let sharing = allocator.device().families().transfer_sharing();
    Buffer::new(
        allocator,
        &BufferDesc {
            name: "round trip",
            size,
            usage: vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            memory: MemoryUsage::GpuOnly,
            sharing: &sharing,
        },
    )
    .expect("device buffer")
}

/// RGBA8 image that can be both uploaded to and read back.
fn readable_image(allocator: &Arc<Allocator>, width: u32, height: u32, levels: u32) -> Image {
    let sharing = allocator.device().families().transfer_sharing();
    Image::new(
        allocator,
        &ImageDesc {
            name: "readable",
            extent: vk::Extent2D { width, height },
            format: vk::Format::R8G8B8A8_UNORM,
            mip_levels: levels,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::SAMPLED,
            sharing: &sharing,
        },
    )
    .expect("image")
}

fn rect(x: i32, y: i32, width: u32, height: u32) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x, y },
        extent: vk::Extent2D { width, height },
    }
}

fn texels(width: u32, height: u32, seed: u32) -> Vec<u8> {
    (0..width * height * 4)
        .map(|i| (i.wrapping_mul(31).wrapping_add(seed) % 253) as u8)
        .collect()
}

#[test]
fn staged_bytes_read_back_identically() {
    let Some((_device, allocator)) = headless() else {
        return;
    };
    let mut transfer = TransferContext::new(&allocator).expect("transfer context");

    let payload: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
    let buffer = device_buffer(&allocator, 8192);

    transfer
        .stage_to_buffer(&buffer, payload.len() as u64, 1024, &payload)
        .expect("stage");
    let back = transfer
        .read_buffer(&buffer, 1024, payload.len() as u64)
        .expect("read back");
    assert_eq!(back, payload);

    // the context stays usable for back-to-back transfers
    transfer
        .stage_to_buffer(&buffer, 4, 0, &[1, 2, 3, 4])
        .expect("second stage");
    assert_eq!(transfer.read_buffer(&buffer, 0, 4).expect("read"), [1, 2, 3, 4]);
}

#[test]
fn staging_rejects_bad_sizes() {
    let Some((_device, allocator)) = headless() else {
        return;
    };
    let mut transfer = TransferContext::new(&allocator).expect("transfer context");
    let buffer = device_buffer(&allocator, 64);

    assert!(matches!(
        transfer.stage_to_buffer(&buffer, 32, 0, &[0u8; 16]),
        Err(TransferError::PayloadSize { .. })
    ));
    assert!(matches!(
        transfer.stage_to_buffer(&buffer, 32, 48, &[0u8; 32]),
        Err(TransferError::OutOfBounds { .. })
    ));
}

#[test]
fn texture_mip_chain_is_clamped_to_the_image() {
    let Some((device, allocator)) = headless() else {
        return;
    };
    let mut transfer = TransferContext::new(&allocator).expect("transfer context");
    let format = vk::Format::R8G8B8A8_SRGB;
    let pixels = vec![0x80u8; 512 * 256 * 4];

    let full = Image::upload_2d(
        &mut transfer,
        &TextureDesc {
            name: "full chain",
            width: 512,
            height: 256,
            format,
            mip_levels: u32::MAX,
            with_view: true,
            with_sampler: true,
        },
        &pixels,
    )
    .expect("upload full chain");
    let expected = if device.supports_linear_blit(format) {
        assert_eq!(full_chain_levels(512, 256), 10);
        10
    } else {
        1
    };
    assert_eq!(full.mip_levels(), expected);
    assert!(full.view().is_some() && full.sampler().is_some());

    let single = Image::upload_2d(
        &mut transfer,
        &TextureDesc {
            name: "single level",
            width: 512,
            height: 256,
            format,
            mip_levels: 1,
            with_view: false,
            with_sampler: false,
        },
        &pixels,
    )
    .expect("upload single level");
    assert_eq!(single.mip_levels(), 1);
    assert!(single.view().is_none());
}

#[test]
fn staged_texels_land_in_level_zero() {
    let Some((_device, allocator)) = headless() else {
        return;
    };
    let mut transfer = TransferContext::new(&allocator).expect("transfer context");
    let image = readable_image(&allocator, 16, 8, 1);
    let pixels = texels(16, 8, 5);

    transfer
        .stage_linear_data_to_image(
            &image,
            rect(0, 0, 16, 8),
            &pixels,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .expect("stage texels");
    let back = transfer
        .read_image(&image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .expect("read image");
    assert_eq!(back, pixels);
}

#[test]
fn partial_region_left_in_transfer_dst_keeps_its_texels() {
    let Some((_device, allocator)) = headless() else {
        return;
    };
    let mut transfer = TransferContext::new(&allocator).expect("transfer context");
    let (width, height) = (16u32, 8u32);
    let image = readable_image(&allocator, width, height, 1);
    let patch = texels(4, 2, 11);

    // single level ending in TRANSFER_DST: no closing transition is recorded
    transfer
        .stage_linear_data_to_image(
            &image,
            rect(8, 4, 4, 2),
            &patch,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .expect("stage patch");
    let back = transfer
        .read_image(&image, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .expect("read image");

    // texels outside the region were discarded, so only the patch is compared
    let row_bytes = (width * 4) as usize;
    for row in 0..2usize {
        let start = (4 + row) * row_bytes + 8 * 4;
        assert_eq!(&back[start..start + 16], &patch[row * 16..row * 16 + 16]);
    }
}

#[test]
fn image_uploads_reject_bad_regions_and_payloads() {
    let Some((_device, allocator)) = headless() else {
        return;
    };
    let mut transfer = TransferContext::new(&allocator).expect("transfer context");
    let format = vk::Format::R8G8B8A8_UNORM;
    let image = readable_image(&allocator, 16, 8, 1);
    let pixels = texels(16, 8, 0);
    let layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

    assert!(matches!(
        transfer.stage_linear_data_to_image(&image, rect(8, 4, 9, 4), &pixels, format, layout),
        Err(TransferError::InvalidRegion(_))
    ));
    assert!(matches!(
        transfer.stage_linear_data_to_image(&image, rect(-1, 0, 4, 4), &pixels, format, layout),
        Err(TransferError::InvalidRegion(_))
    ));
    let short_payload = &pixels[..100];
    assert!(matches!(
        transfer.stage_linear_data_to_image(&image, rect(0, 0, 16, 8), short_payload, format, layout),
        Err(TransferError::PayloadSize { .. })
    ));

    let chained = readable_image(&allocator, 16, 8, 4);
    assert!(matches!(
        transfer.stage_linear_data_to_image(&chained, rect(0, 0, 8, 8), &pixels, format, layout),
        Err(TransferError::PartialMipRegion(_))
    ));

    let short = Image::upload_2d(
        &mut transfer,
        &TextureDesc {
            name: "short payload",
            width: 16,
            height: 8,
            format,
            mip_levels: 1,
            with_view: false,
            with_sampler: false,
        },
        &pixels[..64],
    );
    assert!(short.is_err());

    // rejected uploads still leave the context usable
    transfer
        .stage_linear_data_to_image(&image, rect(0, 0, 16, 8), &pixels, format, layout)
        .expect("stage after rejections");
}

#[test]
fn dropped_resources_return_every_allocation() {
    let Some((_device, allocator)) = headless() else {
        return;
    };
    let before = allocator.live_allocations();
    {
        let mut transfer = TransferContext::new(&allocator).expect("transfer context");
        let buffer = device_buffer(&allocator, 256);
        let image = readable_image(&allocator, 32, 32, 1);
        assert_eq!(allocator.live_allocations(), before + 2);

        // staging and readback buffers are released when each call returns
        transfer
            .stage_to_buffer(&buffer, 4, 0, &[9, 8, 7, 6])
            .expect("stage");
        transfer.read_buffer(&buffer, 0, 4).expect("read back");
        transfer
            .stage_linear_data_to_image(
                &image,
                rect(0, 0, 32, 32),
                &texels(32, 32, 3),
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
            .expect("stage image");
        transfer
            .read_image(&image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .expect("read image");
        assert_eq!(allocator.live_allocations(), before + 2);

        // a failed upload frees the image it created
        let failed = Image::upload_2d(
            &mut transfer,
            &TextureDesc {
                name: "failed upload",
                width: 32,
                height: 32,
                format: vk::Format::R8G8B8A8_UNORM,
                mip_levels: 1,
                with_view: false,
                with_sampler: false,
            },
            &[0u8; 16],
        );
        assert!(failed.is_err());
        assert_eq!(allocator.live_allocations(), before + 2);
    }
    assert_eq!(allocator.live_allocations(), before);
}
