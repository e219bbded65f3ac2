// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use shaderc::{CompileOptions, Compiler, IncludeType, ResolvedInclude, ShaderKind};
use tracing::{info, warn};

use crate::device::DeviceHandles;

#[derive(Clone, Debug)]
pub struct ShaderSources {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

/// GLSL compiled at runtime. Keeps the last SPIR-V that compiled, so a
/// broken edit during hot reload leaves the previous shaders in place.
pub struct ShaderSet {
    compiler: Compiler,
    sources: ShaderSources,
    vertex: Vec<u32>,
    fragment: Vec<u32>,
}

impl ShaderSet {
    pub fn new(sources: ShaderSources) -> Result<Self> {
        let compiler = Compiler::new().context("create shaderc compiler")?;
        let vertex = compile_file(&compiler, &sources.vertex, ShaderKind::Vertex)?;
        let fragment = compile_file(&compiler, &sources.fragment, ShaderKind::Fragment)?;
        Ok(Self {
            compiler,
            sources,
            vertex,
            fragment,
        })
    }

    /// Recompile both stages. Returns whether new code was taken.
    pub fn reload(&mut self) -> bool {
        let compiled = compile_file(&self.compiler, &self.sources.vertex, ShaderKind::Vertex)
            .and_then(|vertex| {
                compile_file(&self.compiler, &self.sources.fragment, ShaderKind::Fragment)
                    .map(|fragment| (vertex, fragment))
            });
        match compiled {
            Ok((vertex, fragment)) => {
                self.vertex = vertex;
                self.fragment = fragment;
                info!("vk: shaders reloaded");
                true
            }
            Err(e) => {
                warn!("vk: shader reload failed, keeping previous build: {e:#}");
                false
            }
        }
    }

    pub fn vertex_spirv(&self) -> &[u32] {
        &self.vertex
    }

    pub fn fragment_spirv(&self) -> &[u32] {
        &self.fragment
    }
}

fn compile_file(compiler: &Compiler, path: &Path, kind: ShaderKind) -> Result<Vec<u32>> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("read shader {}", path.display()))?;
    let name = path.display().to_string();
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut options = CompileOptions::new().context("create shaderc options")?;
    options.set_include_callback(move |requested, include_type, requesting, _depth| {
        let dir = match include_type {
            IncludeType::Relative => Path::new(requesting)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| base_dir.clone()),
            IncludeType::Standard => base_dir.clone(),
        };
        let resolved = dir.join(requested);
        let content = fs::read_to_string(&resolved)
            .map_err(|e| format!("{}: {e}", resolved.display()))?;
        Ok(ResolvedInclude {
            resolved_name: resolved.display().to_string(),
            content,
        })
    });

    let artifact = compiler
        .compile_into_spirv(&source, kind, &name, "main", Some(&options))
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("compile {name}"))?;
    if artifact.get_num_warnings() > 0 {
        warn!("vk: {name}: {}", artifact.get_warning_messages());
    }
    Ok(artifact.as_binary().to_vec())
}

pub struct ShaderModule {
    device: Arc<DeviceHandles>,
    handle: vk::ShaderModule,
}

impl ShaderModule {
    pub fn new(device: &Arc<DeviceHandles>, spirv: &[u32]) -> Result<Self> {
        let info = vk::ShaderModuleCreateInfo::default().code(spirv);
        // SAFETY: valid device; `spirv` came out of the compiler.
        let handle = unsafe { device.raw().create_shader_module(&info, None) }
            .context("create_shader_module")?;
        Ok(Self {
            device: Arc::clone(device),
            handle,
        })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        // SAFETY: modules are only needed until pipeline creation returns.
        unsafe { self.device.raw().destroy_shader_module(self.handle, None) };
    }
}
