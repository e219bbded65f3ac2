// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;

use crate::device::DeviceHandles;
use crate::scene::Vertex;
use crate::shader::ShaderModule;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentRole {
    /// Rendered color: the swap image itself, or the MSAA target.
    Color,
    Depth,
    /// Swap image the MSAA target resolves into.
    Resolve,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
}

impl RenderPassDesc {
    pub fn multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    /// Attachment order shared by the render pass and every framebuffer.
    pub fn attachment_roles(&self) -> Vec<AttachmentRole> {
        let mut roles = vec![AttachmentRole::Color];
        if self.depth_format.is_some() {
            roles.push(AttachmentRole::Depth);
        }
        if self.multisampled() {
            roles.push(AttachmentRole::Resolve);
        }
        roles
    }
}

pub struct RenderPass {
    device: Arc<DeviceHandles>,
    handle: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    pub fn new(device: &Arc<DeviceHandles>, desc: RenderPassDesc) -> Result<Self> {
        let msaa = desc.multisampled();
        let mut attachments = Vec::with_capacity(3);
        let mut depth_ref = None;
        let mut resolve_refs = Vec::new();

        for (index, role) in (0u32..).zip(desc.attachment_roles()) {
            match role {
                AttachmentRole::Color => attachments.push(vk::AttachmentDescription {
                    format: desc.color_format,
                    samples: desc.samples,
                    load_op: vk::AttachmentLoadOp::CLEAR,
                    store_op: if msaa {
                        vk::AttachmentStoreOp::DONT_CARE
                    } else {
                        vk::AttachmentStoreOp::STORE
                    },
                    stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                    stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                    initial_layout: vk::ImageLayout::UNDEFINED,
                    final_layout: if msaa {
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                    } else {
                        vk::ImageLayout::PRESENT_SRC_KHR
                    },
                    ..Default::default()
                }),
                AttachmentRole::Depth => {
                    attachments.push(vk::AttachmentDescription {
                        format: desc.depth_format.unwrap_or(vk::Format::UNDEFINED),
                        samples: desc.samples,
                        load_op: vk::AttachmentLoadOp::CLEAR,
                        store_op: vk::AttachmentStoreOp::DONT_CARE,
                        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                        initial_layout: vk::ImageLayout::UNDEFINED,
                        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                        ..Default::default()
                    });
                    depth_ref = Some(vk::AttachmentReference {
                        attachment: index,
                        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    });
                }
                AttachmentRole::Resolve => {
                    attachments.push(vk::AttachmentDescription {
                        format: desc.color_format,
                        samples: vk::SampleCountFlags::TYPE_1,
                        load_op: vk::AttachmentLoadOp::DONT_CARE,
                        store_op: vk::AttachmentStoreOp::STORE,
                        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                        initial_layout: vk::ImageLayout::UNDEFINED,
                        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                        ..Default::default()
                    });
                    resolve_refs.push(vk::AttachmentReference {
                        attachment: index,
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    });
                }
            }
        }

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        if !resolve_refs.is_empty() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }

        let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        if desc.depth_format.is_some() {
            stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
            access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: stages,
            dst_access_mask: access,
            dependency_flags: vk::DependencyFlags::empty(),
        };

        let subpasses = [subpass];
        let dependencies = [dependency];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        // SAFETY: valid device; every array above outlives the call.
        let handle = unsafe { device.raw().create_render_pass(&info, None) }
            .context("create_render_pass")?;
        Ok(Self {
            device: Arc::clone(device),
            handle,
            desc,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        // SAFETY: framebuffers and pipelines using this pass are dropped first.
        unsafe { self.device.raw().destroy_render_pass(self.handle, None) };
    }
}

pub struct PipelineDesc<'a> {
    pub render_pass: &'a RenderPass,
    pub set_layout: vk::DescriptorSetLayout,
    pub vertex_spirv: &'a [u32],
    pub fragment_spirv: &'a [u32],
}

pub struct GraphicsPipeline {
    device: Arc<DeviceHandles>,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    pub fn new(device: &Arc<DeviceHandles>, desc: &PipelineDesc) -> Result<Self> {
        let raw = device.raw();
        let vertex = ShaderModule::new(device, desc.vertex_spirv)?;
        let fragment = ShaderModule::new(device, desc.fragment_spirv)?;

        let set_layouts = [desc.set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        // SAFETY: valid device and set layout.
        let layout = unsafe { raw.create_pipeline_layout(&layout_info, None) }
            .context("create_pipeline_layout")?;
        let mut this = Self {
            device: Arc::clone(device),
            layout,
            pipeline: vk::Pipeline::null(),
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.handle())
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment.handle())
                .name(c"main"),
        ];

        let bindings = Vertex::bindings();
        let attributes = Vertex::attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);
        // Viewport and scissor are dynamic; only the counts matter here.
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let raster = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let render_pass = desc.render_pass.desc();
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(render_pass.samples)
            .sample_shading_enable(false);
        let depth_on = render_pass.depth_format.is_some();
        let depth = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth_on)
            .depth_write_enable(depth_on)
            .depth_compare_op(vk::CompareOp::LESS)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::TRUE,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }];
        let blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&raster)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth)
            .color_blend_state(&blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .render_pass(desc.render_pass.handle())
            .subpass(0);

        // SAFETY: every state struct above outlives the call.
        let pipelines = unsafe {
            raw.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, e)| e)
        .context("create_graphics_pipelines")?;
        this.pipeline = pipelines[0];
        Ok(this)
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        let raw = self.device.raw();
        // SAFETY: the owner waited for the device before dropping.
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                raw.destroy_pipeline(self.pipeline, None);
            }
            raw.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(depth: bool, samples: vk::SampleCountFlags) -> RenderPassDesc {
        RenderPassDesc {
            color_format: vk::Format::B8G8R8A8_SRGB,
            depth_format: depth.then_some(vk::Format::D32_SFLOAT),
            samples,
        }
    }

    #[test]
    fn attachment_order_is_color_depth_resolve() {
        use AttachmentRole::*;
        assert_eq!(
            desc(true, vk::SampleCountFlags::TYPE_4).attachment_roles(),
            vec![Color, Depth, Resolve]
        );
        assert_eq!(
            desc(false, vk::SampleCountFlags::TYPE_4).attachment_roles(),
            vec![Color, Resolve]
        );
        assert_eq!(
            desc(true, vk::SampleCountFlags::TYPE_1).attachment_roles(),
            vec![Color, Depth]
        );
        assert_eq!(
            desc(false, vk::SampleCountFlags::TYPE_1).attachment_roles(),
            vec![Color]
        );
    }
}
