// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct InstanceDesc<'a> {
    pub app_name: &'a str,
    pub validation: bool,
    /// Display the instance must present to. `None` builds a headless instance.
    pub display: Option<RawDisplayHandle>,
}

/// Loader entry, instance and the optional validation messenger.
pub struct VulkanInstance {
    entry: Entry,
    instance: ash::Instance,
    surface_loader: surface::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    pub fn new(desc: &InstanceDesc) -> Result<Arc<Self>> {
        // SAFETY: dlopens the system loader; nothing else is using Vulkan yet.
        let entry = unsafe { Entry::load() }.context("load Vulkan loader")?;

        let app_name = CString::new(desc.app_name).context("application name")?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(c"tessel")
            .engine_version(0)
            .api_version(vk::API_VERSION_1_0);

        let mut extensions: Vec<*const c_char> = match desc.display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .context("enumerate_required_extensions")?
                .to_vec(),
            None => Vec::new(),
        };

        let validation = desc.validation && layer_available(&entry, VALIDATION_LAYER);
        if desc.validation && !validation {
            warn!("vk: validation requested but {VALIDATION_LAYER:?} is not installed");
        }
        let mut layers: Vec<*const c_char> = Vec::new();
        if validation {
            layers.push(VALIDATION_LAYER.as_ptr());
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        // SAFETY: every pointer in create_info outlives the call.
        let instance =
            unsafe { entry.create_instance(&create_info, None) }.context("vkCreateInstance")?;

        let surface_loader = surface::Instance::new(&entry, &instance);
        let debug = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!("vk: debug messenger unavailable: {e:?}");
                    None
                }
            }
        } else {
            None
        };

        info!(
            "vk: instance ready (validation={}, headless={})",
            validation,
            desc.display.is_none()
        );

        Ok(Arc::new(Self {
            entry,
            instance,
            surface_loader,
            debug,
        }))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        // SAFETY: every child object holds an Arc to this instance, so none remain.
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn layer_available(entry: &Entry, name: &CStr) -> bool {
    // SAFETY: plain enumeration query.
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(e) => {
            warn!("vk: layer enumeration failed: {e:?}");
            return false;
        }
    };
    layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback struct for the duration of the call.
    let message = unsafe {
        let p_message = (*data).p_message;
        if p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p_message).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {message}");
    } else {
        debug!("[vulkan] {message}");
    }
    vk::FALSE
}

fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    // SAFETY: the instance was created with VK_EXT_debug_utils enabled.
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }?;
    Ok((loader, messenger))
}

/// Capabilities, formats and present modes the surface reports for one adapter.
#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

pub struct Surface {
    instance: Arc<VulkanInstance>,
    handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(
        instance: &Arc<VulkanInstance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Arc<Self>> {
        // SAFETY: the caller keeps the window alive for the lifetime of the surface.
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.raw(), display, window, None)
        }
        .context("create_surface")?;
        Ok(Arc::new(Self {
            instance: Arc::clone(instance),
            handle,
        }))
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn loader(&self) -> &surface::Instance {
        self.instance.surface_loader()
    }

    pub fn supports_present(&self, phys: vk::PhysicalDevice, family: u32) -> bool {
        // SAFETY: valid adapter and surface handles.
        unsafe {
            self.loader()
                .get_physical_device_surface_support(phys, family, self.handle)
        }
        .unwrap_or(false)
    }

    pub fn support(&self, phys: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        let loader = self.loader();
        // SAFETY: valid adapter and surface handles.
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(phys, self.handle)
                    .context("get_physical_device_surface_capabilities")?,
                formats: loader
                    .get_physical_device_surface_formats(phys, self.handle)
                    .context("get_physical_device_surface_formats")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(phys, self.handle)
                    .context("get_physical_device_surface_present_modes")?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: swapchains hold an Arc<Surface>, so none can outlive this.
        unsafe { self.loader().destroy_surface(self.handle, None) };
    }
}
