// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use image::DynamicImage;
use serde::Deserialize;
use tracing::{error, info, warn};

use tessel_core::init_tracing;
use tessel_platform::{ShaderWatch, WindowDesc, WindowSystem};
use tessel_render::{FrameStatus, FramebufferSource, RecreateReasons, Renderer};
use tessel_render_vk::{
    srgb_format_for_channels, vk, PresentModePreference, RendererConfig, SceneAssets,
    ShaderSources, TextureData, VkRenderer,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = "tessel.toml")]
    config: PathBuf,
    /// Frames in flight; overrides the config
    #[arg(long)]
    frames_in_flight: Option<usize>,
    /// Force the Vulkan validation layer on
    #[arg(long)]
    validation: bool,
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    window: WindowCfg,
    #[serde(default)]
    render: RenderCfg,
    #[serde(default)]
    assets: AssetsCfg,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "tessel".into(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum PresentModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RenderCfg {
    frames_in_flight: usize,
    present_mode: PresentModeCfg,
    clear_color: [f32; 4],
    msaa_samples: u32,
    depth: bool,
    validation: bool,
    dedicated_transfer: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            frames_in_flight: 2,
            present_mode: PresentModeCfg::Mailbox,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            msaa_samples: 4,
            depth: true,
            validation: cfg!(debug_assertions),
            dedicated_transfer: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AssetsCfg {
    shader_dir: PathBuf,
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    texture: Option<PathBuf>,
    mip_levels: u32,
}

impl Default for AssetsCfg {
    fn default() -> Self {
        AssetsCfg {
            shader_dir: "shaders".into(),
            vertex_shader: "quad.vert".into(),
            fragment_shader: "quad.frag".into(),
            texture: None,
            mip_levels: u32::MAX,
        }
    }
}

fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("config {}: {e}; using defaults", path.display());
            return AppCfg::default();
        }
    };
    toml::from_str(&text).unwrap_or_else(|e| {
        warn!("config {}: {e}; using defaults", path.display());
        AppCfg::default()
    })
}

/// Decode an image file into tightly packed 8-bit sRGB texels. Grey and
/// grey+alpha keep their channel count; everything else becomes RGBA.
fn load_texture(path: &Path) -> Result<TextureData> {
    let img = image::open(path).with_context(|| format!("open texture {}", path.display()))?;
    let (width, height) = (img.width(), img.height());
    let (channels, pixels) = match img {
        DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
        DynamicImage::ImageLumaA8(buf) => (2, buf.into_raw()),
        other => (4, other.into_rgba8().into_raw()),
    };
    let format = srgb_format_for_channels(channels).unwrap_or(vk::Format::R8G8B8A8_SRGB);
    Ok(TextureData {
        width,
        height,
        format,
        pixels,
    })
}

fn scene_texture(assets: &AssetsCfg) -> TextureData {
    match &assets.texture {
        Some(path) => load_texture(path).unwrap_or_else(|e| {
            warn!("{e:#}; using a checkerboard");
            TextureData::checkerboard(256, 8)
        }),
        None => TextureData::checkerboard(256, 8),
    }
}

fn run(
    windows: &mut WindowSystem,
    renderer: &mut VkRenderer,
    watch: Option<&ShaderWatch>,
) -> Result<()> {
    let mut frames = 0u32;
    let mut last_fps_instant = Instant::now();

    loop {
        windows.pump();
        if windows.close_requested() {
            return Ok(());
        }
        if windows.take_resized() {
            renderer.request_recreate(RecreateReasons::RESIZED);
        }
        if watch.is_some_and(ShaderWatch::poll) {
            info!("shader sources changed");
            renderer.request_recreate(RecreateReasons::SHADERS_CHANGED);
        }

        if let FrameStatus::Presented { .. } = renderer.draw_frame(windows)? {
            frames = frames.saturating_add(1);
        }

        let now = Instant::now();
        if now.duration_since(last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", frames);
            frames = 0;
            last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);

    let mut windows = WindowSystem::new(&WindowDesc {
        title: cfg.window.title.clone(),
        width: cfg.window.width,
        height: cfg.window.height,
    })?;

    let assets = &cfg.assets;
    let shaders = ShaderSources {
        vertex: assets.shader_dir.join(&assets.vertex_shader),
        fragment: assets.shader_dir.join(&assets.fragment_shader),
    };
    let mut config = RendererConfig {
        app_name: cfg.window.title.clone(),
        frames_in_flight: args
            .frames_in_flight
            .unwrap_or(cfg.render.frames_in_flight)
            .max(1),
        present_mode: match cfg.render.present_mode {
            PresentModeCfg::Fifo => PresentModePreference::Fifo,
            PresentModeCfg::Mailbox => PresentModePreference::Mailbox,
        },
        msaa_samples: cfg.render.msaa_samples,
        depth: cfg.render.depth,
        validation: cfg.render.validation,
        dedicated_transfer: cfg.render.dedicated_transfer,
        clear_color: cfg.render.clear_color,
        shaders: shaders.clone(),
        scene: SceneAssets::quad(scene_texture(assets), assets.mip_levels),
    }
    .with_env_overrides();
    if args.validation {
        config.validation = true;
    }

    let size = windows.framebuffer_size();
    let mut renderer = VkRenderer::new(windows.window(), windows.window(), size, config)?;
    if let Some(extent) = renderer.extent() {
        info!(
            "rendering {}x{} with {} frames in flight",
            extent.width,
            extent.height,
            renderer.frames_in_flight()
        );
    }

    let watched = [shaders.vertex.as_path(), shaders.fragment.as_path()];
    let watch = ShaderWatch::new(&assets.shader_dir, &watched)
        .inspect_err(|e| warn!("shader hot reload disabled: {e:#}"))
        .ok();

    let result = run(&mut windows, &mut renderer, watch.as_ref());
    if let Err(e) = &result {
        error!("frame loop: {e:#}");
    }
    renderer.wait_idle()?;
    // the surface must go before the window it was made from
    drop(renderer);
    drop(windows);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [render]
            frames_in_flight = 3
            present_mode = "fifo"

            [assets]
            texture = "textures/crate.png"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert!(matches!(cfg.render.present_mode, PresentModeCfg::Fifo));
        assert!(cfg.render.depth);
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.assets.mip_levels, u32::MAX);
        assert_eq!(cfg.assets.texture, Some(PathBuf::from("textures/crate.png")));
    }

    #[test]
    fn shipped_config_matches_builtin_defaults() {
        let shipped: AppCfg =
            toml::from_str(include_str!("../../../tessel.toml")).expect("parse tessel.toml");
        let builtin = AppCfg::default();
        assert_eq!(shipped.render.msaa_samples, builtin.render.msaa_samples);
        assert_eq!(shipped.render.frames_in_flight, builtin.render.frames_in_flight);
        assert_eq!(shipped.render.depth, builtin.render.depth);
        assert_eq!(shipped.window.title, builtin.window.title);
        assert_eq!(shipped.assets.shader_dir, builtin.assets.shader_dir);
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let cfg = load_cfg(Path::new("definitely/not/here.toml"));
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.assets.vertex_shader, PathBuf::from("quad.vert"));
    }

    #[test]
    fn missing_texture_falls_back_to_checkerboard() {
        let assets = AssetsCfg {
            texture: Some("definitely/not/here.png".into()),
            ..AssetsCfg::default()
        };
        let tex = scene_texture(&assets);
        assert_eq!((tex.width, tex.height), (256, 256));
        assert_eq!(tex.format, vk::Format::R8G8B8A8_SRGB);
    }
}
