// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use tracing::warn;

use crate::device::DeviceHandles;
use crate::image::{Image, ImageDesc};
use crate::memory::Allocator;
use crate::pipeline::{AttachmentRole, RenderPass};
use crate::queue::QueueSharing;
use crate::swapchain::Swapchain;

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn pick_depth_format(device: &DeviceHandles) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|&format| {
        device
            .format_properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

/// Largest supported power-of-two sample count not above `requested`.
pub fn clamp_samples(requested: u32, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    const COUNTS: [(u32, vk::SampleCountFlags); 7] = [
        (64, vk::SampleCountFlags::TYPE_64),
        (32, vk::SampleCountFlags::TYPE_32),
        (16, vk::SampleCountFlags::TYPE_16),
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
        (1, vk::SampleCountFlags::TYPE_1),
    ];
    COUNTS
        .into_iter()
        .find(|&(n, flag)| n <= requested && supported.contains(flag))
        .map_or(vk::SampleCountFlags::TYPE_1, |(_, flag)| flag)
}

pub fn resolve_samples(device: &DeviceHandles, requested: u32) -> vk::SampleCountFlags {
    let samples = clamp_samples(requested, device.framebuffer_sample_counts());
    if samples.as_raw() < requested {
        warn!("vk: {requested}x MSAA unsupported, using {samples:?}");
    }
    samples
}

/// Offscreen color/depth targets and one framebuffer per swap image. Built
/// against one swapchain + render pass and dropped with them.
pub struct RenderTargets {
    device: Arc<DeviceHandles>,
    framebuffers: Vec<vk::Framebuffer>,
    msaa_color: Option<Image>,
    depth: Option<Image>,
}

impl RenderTargets {
    pub fn new(
        allocator: &Arc<Allocator>,
        swapchain: &Swapchain,
        render_pass: &RenderPass,
    ) -> Result<Self> {
        let device = allocator.device();
        let pass = render_pass.desc();
        let extent = swapchain.extent();
        let sharing = QueueSharing::new(&[device.families().graphics]);

        let mut targets = Self {
            device: Arc::clone(device),
            framebuffers: Vec::with_capacity(swapchain.views().len()),
            msaa_color: None,
            depth: None,
        };

        if pass.multisampled() {
            let mut image = Image::new(
                allocator,
                &ImageDesc {
                    name: "msaa color target",
                    extent,
                    format: pass.color_format,
                    mip_levels: 1,
                    samples: pass.samples,
                    usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                        | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                    sharing: &sharing,
                },
            )
            .context("create msaa color target")?;
            image.create_view(vk::ImageAspectFlags::COLOR, vk::ComponentMapping::default())?;
            targets.msaa_color = Some(image);
        }

        if let Some(format) = pass.depth_format {
            let mut image = Image::new(
                allocator,
                &ImageDesc {
                    name: "depth target",
                    extent,
                    format,
                    mip_levels: 1,
                    samples: pass.samples,
                    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    sharing: &sharing,
                },
            )
            .context("create depth target")?;
            image.create_view(vk::ImageAspectFlags::DEPTH, vk::ComponentMapping::default())?;
            targets.depth = Some(image);
        }

        let roles = pass.attachment_roles();
        let msaa_view = targets.msaa_color.as_ref().and_then(Image::view);
        let depth_view = targets.depth.as_ref().and_then(Image::view);
        for &swap_view in swapchain.views() {
            let views: Vec<vk::ImageView> = roles
                .iter()
                .map(|role| match role {
                    AttachmentRole::Color => msaa_view.unwrap_or(swap_view),
                    AttachmentRole::Depth => depth_view.unwrap_or_default(),
                    AttachmentRole::Resolve => swap_view,
                })
                .collect();
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle())
                .attachments(&views)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            // SAFETY: every view matches the render pass attachments; on error
            // drop destroys the framebuffers made so far.
            let framebuffer = unsafe { device.raw().create_framebuffer(&info, None) }
                .context("create_framebuffer")?;
            targets.framebuffers.push(framebuffer);
        }
        Ok(targets)
    }

    pub fn framebuffer(&self, image: usize) -> vk::Framebuffer {
        self.framebuffers[image]
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        let raw = self.device.raw();
        for framebuffer in self.framebuffers.drain(..) {
            // SAFETY: the owner waited for the device.
            unsafe { raw.destroy_framebuffer(framebuffer, None) };
        }
        // images drop after their framebuffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_clamp_to_supported_power_of_two() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4;
        assert_eq!(clamp_samples(8, supported), vk::SampleCountFlags::TYPE_4);
        assert_eq!(clamp_samples(4, supported), vk::SampleCountFlags::TYPE_4);
        assert_eq!(clamp_samples(3, supported), vk::SampleCountFlags::TYPE_2);
        assert_eq!(clamp_samples(1, supported), vk::SampleCountFlags::TYPE_1);
        assert_eq!(clamp_samples(0, supported), vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            clamp_samples(8, vk::SampleCountFlags::empty()),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
