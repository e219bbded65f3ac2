// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ash::khr::swapchain;
use ash::vk;
use tracing::{info, warn};

use crate::bootstrap::{Surface, VulkanInstance};
use crate::queue::QueueSharing;

/// Queue family indices of the selected adapter. `transfer` is `None` when no
/// dedicated transfer family exists (or one was not wanted); transfers then
/// run on the graphics queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: Option<u32>,
}

impl QueueFamilies {
    pub fn transfer_or_ignored(&self) -> u32 {
        self.transfer.unwrap_or(vk::QUEUE_FAMILY_IGNORED)
    }

    /// Sharing for resources touched by both the transfer and graphics queues.
    pub fn transfer_sharing(&self) -> QueueSharing {
        QueueSharing::new(&[self.graphics, self.transfer_or_ignored()])
    }

    /// Sharing for swapchain images.
    pub fn present_sharing(&self) -> QueueSharing {
        QueueSharing::new(&[self.graphics, self.present])
    }

    fn unique(&self) -> QueueSharing {
        QueueSharing::new(&[self.graphics, self.present, self.transfer_or_ignored()])
    }
}

/// Picks graphics, present and (optionally) dedicated transfer families.
/// A graphics family that can also present wins over split families.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    can_present: impl Fn(u32) -> bool,
    want_dedicated_transfer: bool,
) -> Option<QueueFamilies> {
    let indexed = || (0u32..).zip(families.iter()).filter(|(_, f)| f.queue_count > 0);

    let graphics_families: Vec<u32> = indexed()
        .filter(|(_, f)| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i)
        .collect();

    let (graphics, present) = match graphics_families.iter().find(|&&i| can_present(i)) {
        Some(&both) => (both, both),
        None => {
            let graphics = *graphics_families.first()?;
            let (present, _) = indexed().find(|&(i, _)| can_present(i))?;
            (graphics, present)
        }
    };

    let transfer = if want_dedicated_transfer {
        indexed()
            .find(|(_, f)| {
                f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|(i, _)| i)
    } else {
        None
    };

    Some(QueueFamilies {
        graphics,
        present,
        transfer,
    })
}

/// The selected adapter, logical device and its queues. Immutable once built.
pub struct DeviceHandles {
    instance: Arc<VulkanInstance>,
    physical: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
    families: QueueFamilies,
    max_anisotropy: Option<f32>,
}

pub struct DeviceRequest<'a> {
    /// Surface the device must present to; `None` for headless use.
    pub surface: Option<&'a Surface>,
    pub dedicated_transfer: bool,
}

struct Candidate {
    physical: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    families: QueueFamilies,
    score: u64,
}

impl DeviceHandles {
    pub fn new(instance: &Arc<VulkanInstance>, request: &DeviceRequest) -> Result<Arc<Self>> {
        let raw = instance.raw();
        // SAFETY: valid instance.
        let physicals =
            unsafe { raw.enumerate_physical_devices() }.context("enumerate_physical_devices")?;

        let Some(chosen) = physicals
            .into_iter()
            .filter_map(|phys| rate_physical_device(raw, phys, request))
            .max_by_key(|c| c.score)
        else {
            bail!("no Vulkan adapter with graphics + present support");
        };

        let families = chosen.families;
        if request.dedicated_transfer && families.transfer.is_none() {
            warn!("vk: no dedicated transfer queue family; uploads share the graphics queue");
        }

        let priorities = [1.0f32];
        let unique = families.unique();
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique
            .families()
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        // SAFETY: valid adapter.
        let supported = unsafe { raw.get_physical_device_features(chosen.physical) };
        let anisotropy = supported.sampler_anisotropy == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy);

        let mut extensions = Vec::new();
        if request.surface.is_some() {
            extensions.push(swapchain::NAME.as_ptr());
        }

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);
        // SAFETY: create_info and everything it points to outlive the call.
        let device = unsafe { raw.create_device(chosen.physical, &create_info, None) }
            .context("vkCreateDevice")?;

        // SAFETY: every family below got exactly one queue in queue_infos.
        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            let graphics = device.get_device_queue(families.graphics, 0);
            let present = device.get_device_queue(families.present, 0);
            let transfer = match families.transfer {
                Some(family) => device.get_device_queue(family, 0),
                None => graphics,
            };
            (graphics, present, transfer)
        };

        let swapchain_loader = swapchain::Device::new(raw, &device);
        let max_anisotropy = anisotropy.then_some(chosen.properties.limits.max_sampler_anisotropy);

        info!(
            "vk: device '{}' families graphics={} present={} transfer={:?}",
            device_name(&chosen.properties),
            families.graphics,
            families.present,
            families.transfer
        );

        Ok(Arc::new(Self {
            instance: Arc::clone(instance),
            physical: chosen.physical,
            properties: chosen.properties,
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            transfer_queue,
            families,
            max_anisotropy,
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Arc<VulkanInstance> {
        &self.instance
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn name(&self) -> String {
        device_name(&self.properties)
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Aliases the graphics queue when there is no dedicated transfer family.
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    /// `Some(limit)` when sampler anisotropy was enabled at device creation.
    pub fn max_anisotropy(&self) -> Option<f32> {
        self.max_anisotropy
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        // SAFETY: valid adapter.
        unsafe {
            self.instance
                .raw()
                .get_physical_device_format_properties(self.physical, format)
        }
    }

    /// Whether optimal-tiling images of `format` can be blitted with linear filtering.
    pub fn supports_linear_blit(&self, format: vk::Format) -> bool {
        self.format_properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    /// Sample counts usable for a color + depth framebuffer.
    pub fn framebuffer_sample_counts(&self) -> vk::SampleCountFlags {
        let limits = &self.properties.limits;
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts
    }

    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: valid device.
        unsafe { self.device.device_wait_idle() }.context("device_wait_idle")
    }
}

impl Drop for DeviceHandles {
    fn drop(&mut self) {
        // SAFETY: every device child holds an Arc to this set, so none remain.
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("<unnamed>"))
}

fn supports_extension(raw: &ash::Instance, phys: vk::PhysicalDevice, name: &CStr) -> bool {
    // SAFETY: valid adapter.
    match unsafe { raw.enumerate_device_extension_properties(phys) } {
        Ok(exts) => exts
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == name)),
        Err(_) => false,
    }
}

/// `None` rejects the adapter. Discrete GPUs get a large bonus, then larger
/// max 2D image size wins.
fn rate_physical_device(
    raw: &ash::Instance,
    physical: vk::PhysicalDevice,
    request: &DeviceRequest,
) -> Option<Candidate> {
    // SAFETY: valid adapter.
    let (properties, queue_props) = unsafe {
        (
            raw.get_physical_device_properties(physical),
            raw.get_physical_device_queue_family_properties(physical),
        )
    };

    let families = match request.surface {
        Some(surface) => {
            if !supports_extension(raw, physical, swapchain::NAME) {
                return None;
            }
            let adequate = surface
                .support(physical)
                .map(|s| s.is_adequate())
                .unwrap_or(false);
            if !adequate {
                return None;
            }
            find_queue_families(
                &queue_props,
                |family| surface.supports_present(physical, family),
                request.dedicated_transfer,
            )?
        }
        None => find_queue_families(&queue_props, |_| true, request.dedicated_transfer)?,
    };

    let mut score = 1u64;
    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 1000;
    }
    score += u64::from(properties.limits.max_image_dimension2_d);

    Some(Candidate {
        physical,
        properties,
        families,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn graphics_family_that_presents_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];
        let found = find_queue_families(&families, |i| i == 1, true).unwrap();
        assert_eq!(
            found,
            QueueFamilies {
                graphics: 1,
                present: 1,
                transfer: Some(2),
            }
        );
    }

    #[test]
    fn split_present_family_is_used_when_needed() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::COMPUTE)];
        let found = find_queue_families(&families, |i| i == 1, true).unwrap();
        assert_eq!(found.graphics, 0);
        assert_eq!(found.present, 1);
        assert_eq!(found.transfer, None);
        assert_eq!(found.present_sharing().mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(found.transfer_sharing().families(), &[0]);
    }

    #[test]
    fn dedicated_transfer_can_be_declined() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let found = find_queue_families(&families, |_| true, false).unwrap();
        assert_eq!(found.transfer, None);
        assert_eq!(found.transfer_or_ignored(), vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn no_graphics_family_rejects_adapter() {
        let families = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert!(find_queue_families(&families, |_| true, true).is_none());
    }
}
