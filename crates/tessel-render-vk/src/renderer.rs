// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{error, info};

use tessel_render::{
    AcquireOutcome, FrameBackend, FrameLoop, FrameStatus, FramebufferSource, PresentOutcome,
    RecreateReasons, RenderSize, Renderer,
};

use crate::bootstrap::{InstanceDesc, Surface, VulkanInstance};
use crate::device::{DeviceHandles, DeviceRequest};
use crate::image::{Image, TextureDesc};
use crate::memory::{Allocator, Buffer, BufferDesc, MemoryUsage};
use crate::pipeline::{GraphicsPipeline, PipelineDesc, RenderPass, RenderPassDesc};
use crate::scene::SceneAssets;
use crate::shader::{ShaderSet, ShaderSources};
use crate::swapchain::{PresentModePreference, Swapchain, SwapchainRequest};
use crate::sync::FrameSyncSet;
use crate::targets::{pick_depth_format, resolve_samples, RenderTargets};
use crate::transfer::TransferContext;
use crate::uniforms::{FrameUniforms, UniformMatrices};

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub app_name: String,
    pub frames_in_flight: usize,
    pub present_mode: PresentModePreference,
    pub msaa_samples: u32,
    pub depth: bool,
    pub validation: bool,
    pub dedicated_transfer: bool,
    pub clear_color: [f32; 4],
    pub shaders: ShaderSources,
    pub scene: SceneAssets,
}

impl RendererConfig {
    /// `TESSEL_VALIDATION=1` forces the validation layer on, `0` forces it off.
    pub fn with_env_overrides(mut self) -> Self {
        match std::env::var("TESSEL_VALIDATION").ok().as_deref() {
            Some("1") => self.validation = true,
            Some("0") => self.validation = false,
            _ => {}
        }
        self
    }
}

/// Settings every swap chain generation is built with.
#[derive(Clone, Copy, Debug)]
struct ChainSettings {
    present_mode: PresentModePreference,
    samples: vk::SampleCountFlags,
    depth_format: Option<vk::Format>,
}

/// Everything whose lifetime is one swap chain generation. Fields drop in
/// declaration order: framebuffers before the pass, the pass before the chain.
struct SwapchainSet {
    targets: RenderTargets,
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    swapchain: Swapchain,
}

impl SwapchainSet {
    fn build(
        swapchain: Swapchain,
        allocator: &Arc<Allocator>,
        settings: ChainSettings,
        shaders: &ShaderSet,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let device = allocator.device();
        let render_pass = RenderPass::new(
            device,
            RenderPassDesc {
                color_format: swapchain.format(),
                depth_format: settings.depth_format,
                samples: settings.samples,
            },
        )?;
        let pipeline = GraphicsPipeline::new(
            device,
            &PipelineDesc {
                render_pass: &render_pass,
                set_layout,
                vertex_spirv: shaders.vertex_spirv(),
                fragment_spirv: shaders.fragment_spirv(),
            },
        )?;
        let targets = RenderTargets::new(allocator, &swapchain, &render_pass)?;
        Ok(Self {
            targets,
            pipeline,
            render_pass,
            swapchain,
        })
    }
}

/// GPU side of the renderer. Fields are declared in teardown order.
struct RenderState {
    frames: FrameSyncSet,
    chain: Option<SwapchainSet>,
    uniforms: FrameUniforms,
    _texture: Image,
    index_buffer: Buffer,
    vertex_buffer: Buffer,
    _transfer: TransferContext,
    allocator: Arc<Allocator>,
    device: Arc<DeviceHandles>,
    surface: Arc<Surface>,
    _instance: Arc<VulkanInstance>,

    shaders: ShaderSet,
    settings: ChainSettings,
    index_count: u32,
    clear: [f32; 4],
    started: Instant,
}

impl RenderState {
    fn chain(&self) -> Result<&SwapchainSet> {
        match &self.chain {
            Some(chain) => Ok(chain),
            None => bail!("no swap chain (an earlier rebuild failed)"),
        }
    }

    fn record(&self, slot: usize, image: u32) -> Result<()> {
        let chain = self.chain()?;
        let device = self.device.raw();
        let cmd = self.frames.slot(slot).command_buffer;
        let extent = chain.swapchain.extent();

        let mut clears = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear,
            },
        }];
        if self.settings.depth_format.is_some() {
            clears.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }
        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let begin = vk::CommandBufferBeginInfo {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        let pass_begin = vk::RenderPassBeginInfo::default()
            .render_pass(chain.render_pass.handle())
            .framebuffer(chain.targets.framebuffer(image as usize))
            .render_area(area)
            .clear_values(&clears);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        // SAFETY: the slot's pool was reset after its fence signaled, so `cmd`
        // is in the initial state; every bound object outlives the submission.
        unsafe {
            device
                .begin_command_buffer(cmd, &begin)
                .context("begin frame command buffer")?;
            device.cmd_begin_render_pass(cmd, &pass_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                chain.pipeline.handle(),
            );
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[area]);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle()], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.handle(), 0, vk::IndexType::UINT16);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                chain.pipeline.layout(),
                0,
                &[self.uniforms.set(slot)],
                &[],
            );
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .context("end frame command buffer")?;
        }
        Ok(())
    }
}

impl FrameBackend for RenderState {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.frames.slot(slot).wait()
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.frames.slot(slot).image_available;
        self.chain()?.swapchain.acquire_next_image(semaphore)
    }

    fn update_frame_data(&mut self, slot: usize, _image: u32) -> Result<()> {
        let extent = self.chain()?.swapchain.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let matrices = UniformMatrices::spinning(self.started.elapsed().as_secs_f32(), aspect);
        self.uniforms.write(slot, &matrices)
    }

    fn reset_and_record(&mut self, slot: usize, image: u32) -> Result<()> {
        self.frames.slot(slot).reset()?;
        self.record(slot, image)
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.frames.slot(slot);
        let waits = [frame.image_available];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let cmds = [frame.command_buffer];
        let signals = [frame.render_finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signals);
        // SAFETY: `cmd` is fully recorded and the fence was reset with it.
        unsafe {
            self.device
                .raw()
                .queue_submit(self.device.graphics_queue(), &[submit], frame.in_flight)
        }
        .map_err(|e| {
            error!("vk: queue_submit: {e:?}");
            e
        })
        .context("queue_submit")
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<PresentOutcome> {
        let render_finished = self.frames.slot(slot).render_finished;
        self.chain()?
            .swapchain
            .present(self.device.present_queue(), render_finished, image)
    }

    fn recreate_swapchain(&mut self, size: RenderSize, reasons: RecreateReasons) -> Result<()> {
        self.device.wait_idle()?;
        if reasons.contains(RecreateReasons::SHADERS_CHANGED) {
            self.shaders.reload();
        }

        let previous = self.chain.take().map(|old| {
            let SwapchainSet {
                targets,
                pipeline,
                render_pass,
                mut swapchain,
            } = old;
            drop(targets);
            drop(pipeline);
            drop(render_pass);
            swapchain.release_views();
            swapchain
        });

        let swapchain = Swapchain::create(
            &self.surface,
            &self.device,
            &SwapchainRequest {
                framebuffer: size,
                present_mode: self.settings.present_mode,
                previous: previous.as_ref(),
            },
        )?;
        // retired only once its successor exists
        drop(previous);

        self.chain = Some(SwapchainSet::build(
            swapchain,
            &self.allocator,
            self.settings,
            &self.shaders,
            self.uniforms.set_layout(),
        )?);
        Ok(())
    }
}

/// Vulkan renderer: the frame loop driving a [`RenderState`].
pub struct VkRenderer {
    driver: FrameLoop,
    gpu: RenderState,
}

impl VkRenderer {
    pub fn frames_in_flight(&self) -> usize {
        self.driver.frames_in_flight()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.gpu.chain.as_ref().map(|chain| chain.swapchain.extent())
    }
}

fn upload_geometry(
    transfer: &mut TransferContext,
    name: &str,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<Buffer> {
    let allocator = Arc::clone(transfer.allocator());
    let sharing = allocator.device().families().transfer_sharing();
    let buffer = Buffer::new(
        &allocator,
        &BufferDesc {
            name,
            size: bytes.len() as vk::DeviceSize,
            usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
            memory: MemoryUsage::GpuOnly,
            sharing: &sharing,
        },
    )
    .with_context(|| format!("create {name}"))?;
    transfer
        .stage_to_buffer(&buffer, buffer.size(), 0, bytes)
        .with_context(|| format!("stage {name}"))?;
    Ok(buffer)
}

impl Renderer for VkRenderer {
    type Config = RendererConfig;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: RendererConfig,
    ) -> Result<Self> {
        let display = display.display_handle().context("display handle")?.as_raw();
        let window = window.window_handle().context("window handle")?.as_raw();

        let instance = VulkanInstance::new(&InstanceDesc {
            app_name: &config.app_name,
            validation: config.validation,
            display: Some(display),
        })?;
        let surface = Surface::new(&instance, display, window)?;
        let device = DeviceHandles::new(
            &instance,
            &DeviceRequest {
                surface: Some(&surface),
                dedicated_transfer: config.dedicated_transfer,
            },
        )?;
        let allocator = Allocator::new(&device)?;
        let mut transfer = TransferContext::new(&allocator)?;

        let scene = &config.scene;
        if scene.indices.is_empty() {
            bail!("scene has no indices");
        }
        let vertex_buffer = upload_geometry(
            &mut transfer,
            "vertex buffer",
            bytemuck::cast_slice(&scene.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = upload_geometry(
            &mut transfer,
            "index buffer",
            bytemuck::cast_slice(&scene.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        let texture = Image::upload_2d(
            &mut transfer,
            &TextureDesc {
                name: "scene texture",
                width: scene.texture.width,
                height: scene.texture.height,
                format: scene.texture.format,
                mip_levels: scene.mip_levels,
                with_view: true,
                with_sampler: true,
            },
            &scene.texture.pixels,
        )?;

        let driver = FrameLoop::new(config.frames_in_flight);
        let frames_in_flight = driver.frames_in_flight();
        let uniforms = FrameUniforms::new(&allocator, frames_in_flight, &texture)?;
        let shaders = ShaderSet::new(config.shaders.clone())?;

        let settings = ChainSettings {
            present_mode: config.present_mode,
            samples: resolve_samples(&device, config.msaa_samples),
            depth_format: if config.depth {
                Some(pick_depth_format(&device).context("no usable depth format")?)
            } else {
                None
            },
        };
        let swapchain = Swapchain::create(
            &surface,
            &device,
            &SwapchainRequest {
                framebuffer: size,
                present_mode: settings.present_mode,
                previous: None,
            },
        )?;
        let chain = SwapchainSet::build(
            swapchain,
            &allocator,
            settings,
            &shaders,
            uniforms.set_layout(),
        )?;
        let frames = FrameSyncSet::new(&device, frames_in_flight)?;

        info!(
            "vk: renderer ready on {} ({} frames in flight, {:?} MSAA, depth {:?})",
            device.name(),
            frames_in_flight,
            settings.samples,
            settings.depth_format
        );

        Ok(Self {
            driver,
            gpu: RenderState {
                frames,
                chain: Some(chain),
                uniforms,
                _texture: texture,
                index_buffer,
                vertex_buffer,
                _transfer: transfer,
                allocator,
                device,
                surface,
                _instance: instance,
                shaders,
                settings,
                index_count: scene.indices.len() as u32,
                clear: config.clear_color,
                started: Instant::now(),
            },
        })
    }

    fn request_recreate(&mut self, reasons: RecreateReasons) {
        self.driver.request_recreate(reasons);
    }

    fn draw_frame(&mut self, window: &mut dyn FramebufferSource) -> Result<FrameStatus> {
        self.driver.run_frame(&mut self.gpu, window)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.gpu.clear = rgba;
    }

    fn wait_idle(&self) -> Result<()> {
        self.gpu.device.wait_idle()
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.device.wait_idle() {
            error!("vk: wait_idle before teardown: {e:#}");
        }
        // RenderState fields now drop in declaration order.
    }
}

