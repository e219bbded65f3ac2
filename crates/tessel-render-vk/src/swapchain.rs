// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use tessel_render::{AcquireOutcome, PresentOutcome, RenderSize};
use tracing::{error, info};

use crate::bootstrap::{Surface, SurfaceSupport};
use crate::device::{DeviceHandles, QueueFamilies};
use crate::image::create_view;
use crate::queue::QueueSharing;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    Fifo,
    /// Mailbox when the surface offers it, FIFO otherwise.
    #[default]
    Mailbox,
}

/// `min + 1`, capped by a nonzero max.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

/// 8-bit BGRA/RGBA sRGB with the non-linear sRGB color space, else whatever
/// the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];
    PREFERRED
        .iter()
        .find_map(|&want| {
            formats.iter().copied().find(|f| {
                f.format == want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// The surface's current extent, or the framebuffer size clamped into the
/// supported range when the surface leaves it undefined.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Everything decided before the create call. A pure function of the
/// surface support, framebuffer size and queue families.
#[derive(Clone, Debug)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing: QueueSharing,
}

impl SwapchainPlan {
    pub fn new(
        support: &SurfaceSupport,
        framebuffer: RenderSize,
        families: &QueueFamilies,
        preference: PresentModePreference,
    ) -> Result<Self> {
        let caps = &support.capabilities;
        Ok(Self {
            image_count: choose_image_count(caps),
            surface_format: choose_surface_format(&support.formats)
                .ok_or_else(|| anyhow!("surface reports no formats"))?,
            present_mode: choose_present_mode(&support.present_modes, preference),
            extent: choose_extent(caps, framebuffer),
            pre_transform: caps.current_transform,
            sharing: families.present_sharing(),
        })
    }
}

pub struct SwapchainRequest<'a> {
    pub framebuffer: RenderSize,
    pub present_mode: PresentModePreference,
    /// Chain being replaced; handed to the driver so it can recycle images.
    pub previous: Option<&'a Swapchain>,
}

/// The presentable image chain and one view per image. Images belong to
/// the chain; views are ours.
pub struct Swapchain {
    device: Arc<DeviceHandles>,
    _surface: Arc<Surface>,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub fn create(
        surface: &Arc<Surface>,
        device: &Arc<DeviceHandles>,
        request: &SwapchainRequest,
    ) -> Result<Self> {
        let support = surface.support(device.physical())?;
        let plan = SwapchainPlan::new(
            &support,
            request.framebuffer,
            &device.families(),
            request.present_mode,
        )?;
        let old = request
            .previous
            .map_or(vk::SwapchainKHR::null(), |prev| prev.handle);

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing.mode())
            .queue_family_indices(plan.sharing.create_info_families())
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old);

        let loader = device.swapchain_loader();
        // SAFETY: surface and device are alive; `old` is either null or a live chain.
        let handle =
            unsafe { loader.create_swapchain(&info, None) }.context("create_swapchain")?;
        let mut chain = Self {
            device: Arc::clone(device),
            _surface: Arc::clone(surface),
            handle,
            images: Vec::new(),
            views: Vec::new(),
            format: plan.surface_format.format,
            extent: plan.extent,
        };

        chain.images = get_images(device, handle)?;
        chain.views = create_image_views(device.raw(), &chain.images, plan.surface_format.format)?;

        info!(
            "vk: swapchain {}x{} {:?}/{:?} {:?} images={}",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            chain.images.len()
        );
        Ok(chain)
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Destroy the views early, keeping the chain handle valid for use as
    /// the `previous` of a rebuild.
    pub fn release_views(&mut self) {
        let device = self.device.raw();
        for view in self.views.drain(..) {
            // SAFETY: the caller waited for the device to go idle.
            unsafe { device.destroy_image_view(view, None) };
        }
    }

    pub fn acquire_next_image(&self, image_available: vk::Semaphore) -> Result<AcquireOutcome> {
        let loader = self.device.swapchain_loader();
        // SAFETY: the semaphore is unsignaled with no pending signal (its slot's fence was waited).
        match unsafe {
            loader.acquire_next_image(self.handle, u64::MAX, image_available, vk::Fence::null())
        } {
            Ok((image, suboptimal)) => Ok(AcquireOutcome::Acquired { image, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => {
                error!("vk: acquire_next_image: {e:?}");
                Err(e).context("acquire_next_image")
            }
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        render_finished: vk::Semaphore,
        image: u32,
    ) -> Result<PresentOutcome> {
        let waits = [render_finished];
        let swapchains = [self.handle];
        let indices = [image];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        // SAFETY: `image` was acquired from this chain and submitted with `render_finished`.
        match unsafe { self.device.swapchain_loader().queue_present(queue, &info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => {
                error!("vk: queue_present: {e:?}");
                Err(e).context("queue_present")
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.release_views();
        // SAFETY: views are gone and the caller waited for the device.
        unsafe {
            self.device
                .swapchain_loader()
                .destroy_swapchain(self.handle, None)
        };
    }
}

pub fn get_images(device: &DeviceHandles, chain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
    // SAFETY: chain is a live swapchain of this device.
    unsafe { device.swapchain_loader().get_swapchain_images(chain) }
        .context("get_swapchain_images")
}

/// One color view per image. On failure the views made so far are destroyed.
pub fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        match create_view(
            device,
            image,
            format,
            vk::ImageAspectFlags::COLOR,
            1,
            vk::ComponentMapping::default(),
        ) {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    // SAFETY: created above and never used.
                    unsafe { device.destroy_image_view(view, None) };
                }
                return Err(e).context("create swapchain image view");
            }
        }
    }
    Ok(views)
}
