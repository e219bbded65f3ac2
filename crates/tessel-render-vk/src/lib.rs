// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

mod bootstrap;
mod device;
mod image;
mod memory;
mod mip;
mod pipeline;
mod queue;
mod renderer;
mod scene;
mod shader;
mod swapchain;
mod sync;
mod targets;
mod transfer;
mod uniforms;

pub use bootstrap::{InstanceDesc, Surface, SurfaceSupport, VulkanInstance};
pub use device::{find_queue_families, DeviceHandles, DeviceRequest, QueueFamilies};
pub use image::{channel_swizzle, srgb_format_for_channels, texel_size, Image, ImageDesc, TextureDesc};
pub use memory::{AllocError, Allocator, Buffer, BufferDesc, MemoryUsage};
pub use mip::{full_chain_levels, mip_extent, resolve_mip_levels};
pub use pipeline::{AttachmentRole, GraphicsPipeline, PipelineDesc, RenderPass, RenderPassDesc};
pub use queue::QueueSharing;
pub use renderer::{RendererConfig, VkRenderer};
pub use scene::{SceneAssets, TextureData, Vertex, QUAD_INDICES, QUAD_VERTICES};
pub use shader::{ShaderModule, ShaderSet, ShaderSources};
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    create_image_views, get_images, PresentModePreference, Swapchain, SwapchainPlan,
    SwapchainRequest,
};
pub use sync::{FrameSlot, FrameSyncSet};
pub use targets::{clamp_samples, pick_depth_format, RenderTargets};
pub use transfer::{TransferContext, TransferError};
pub use uniforms::{FrameUniforms, UniformMatrices};

pub use ash::vk;
