//! YAML pipeline descriptions.
//!
//! ```yaml
//! environment: opencl        # optional, --env overrides
//! width: 1920
//! height: 1080
//! buffers:
//!   - name: src
//!     channels: 4            # default 1
//!     input: src.raw         # raw native-endian f32, or
//!   - name: tmp
//!     fill: 0.0              # constant initial value
//!   - name: dst
//!     channels: 4
//!     output: dst.raw        # downloaded after run
//! kernels:
//!   - name: gain
//!     source: gain.cl        # full unit or body fragment
//!     inputs:  [{ binding: src, buffer: src }]
//!     outputs: [{ binding: dst, buffer: dst }]
//!     params:
//!       - { name: gain, float: 2.0 }
//!       - { name: mode, int: 1 }
//! ```
//!
//! Relative paths resolve against the YAML file's directory.

use anyhow::{Context, Result, bail};
use gpuip::{
    BufferId, BufferType, Environment, GpuipResult, ImageProcessor, Kernel, KernelId, Param,
    PipelineGraph,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    #[serde(default)]
    pub environment: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub buffers: Vec<BufferSpec>,
    #[serde(default)]
    pub kernels: Vec<KernelSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferSpec {
    pub name: String,
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(default)]
    pub fill: Option<f32>,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

fn default_channels() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingSpec {
    pub binding: String,
    pub buffer: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub int: Option<i32>,
    #[serde(default)]
    pub float: Option<f32>,
}

impl ParamSpec {
    pub fn to_param(&self) -> Result<Param> {
        match (self.int, self.float) {
            (Some(v), None) => Ok(Param::int(&self.name, v)),
            (None, Some(v)) => Ok(Param::float(&self.name, v)),
            _ => bail!("parameter '{}' needs exactly one of `int` or `float`", self.name),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelSpec {
    pub name: String,
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub inputs: Vec<BindingSpec>,
    #[serde(default)]
    pub outputs: Vec<BindingSpec>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

// ============================================================================
// Loading
// ============================================================================

/// Anything a pipeline can be declared on.
pub trait PipelineTarget {
    fn set_dimensions(&mut self, width: u32, height: u32) -> GpuipResult<()>;
    fn create_buffer(&mut self, name: &str, channels: u32) -> GpuipResult<BufferId>;
    fn create_kernel(&mut self, name: &str) -> GpuipResult<KernelId>;
    fn kernel_mut(&mut self, id: KernelId) -> GpuipResult<&mut Kernel>;
}

impl PipelineTarget for PipelineGraph {
    fn set_dimensions(&mut self, width: u32, height: u32) -> GpuipResult<()> {
        PipelineGraph::set_dimensions(self, width, height)
    }

    fn create_buffer(&mut self, name: &str, channels: u32) -> GpuipResult<BufferId> {
        PipelineGraph::create_buffer(self, name, BufferType::Float, channels)
    }

    fn create_kernel(&mut self, name: &str) -> GpuipResult<KernelId> {
        PipelineGraph::create_kernel(self, name)
    }

    fn kernel_mut(&mut self, id: KernelId) -> GpuipResult<&mut Kernel> {
        PipelineGraph::kernel_mut(self, id)
    }
}

impl PipelineTarget for ImageProcessor {
    fn set_dimensions(&mut self, width: u32, height: u32) -> GpuipResult<()> {
        ImageProcessor::set_dimensions(self, width, height)
    }

    fn create_buffer(&mut self, name: &str, channels: u32) -> GpuipResult<BufferId> {
        ImageProcessor::create_buffer(self, name, BufferType::Float, channels)
    }

    fn create_kernel(&mut self, name: &str) -> GpuipResult<KernelId> {
        ImageProcessor::create_kernel(self, name)
    }

    fn kernel_mut(&mut self, id: KernelId) -> GpuipResult<&mut Kernel> {
        ImageProcessor::kernel_mut(self, id)
    }
}

/// Ids issued while declaring a pipeline, in file order.
#[derive(Debug)]
pub struct Declared {
    pub buffers: Vec<BufferId>,
    pub kernels: Vec<KernelId>,
}

/// A parsed pipeline plus the directory its relative paths resolve against.
#[derive(Debug)]
pub struct Pipeline {
    pub file: PipelineFile,
    pub base_dir: PathBuf,
}

impl Pipeline {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline: {}", path.display()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, base_dir).with_context(|| format!("Invalid pipeline: {}", path.display()))
    }

    pub fn parse(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let file: PipelineFile = serde_yaml::from_str(text)?;
        for b in &file.buffers {
            if b.input.is_some() && b.fill.is_some() {
                bail!("buffer '{}' has both `input` and `fill`", b.name);
            }
        }
        for k in &file.kernels {
            for p in &k.params {
                p.to_param()?;
            }
        }
        Ok(Self { file, base_dir: base_dir.into() })
    }

    /// `over` if given, else the file's environment.
    pub fn environment(&self, over: Option<Environment>) -> Result<Environment> {
        if let Some(env) = over {
            return Ok(env);
        }
        match &self.file.environment {
            Some(name) => Ok(name.parse()?),
            None => bail!("no environment in pipeline file, pass --env"),
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    /// Declares dimensions, buffers and kernels on `target`. Kernel sources
    /// are read only when `with_sources` is set.
    pub fn declare<T: PipelineTarget>(&self, target: &mut T, with_sources: bool) -> Result<Declared> {
        target.set_dimensions(self.file.width, self.file.height)?;

        let mut buffers = Vec::with_capacity(self.file.buffers.len());
        for b in &self.file.buffers {
            buffers.push(target.create_buffer(&b.name, b.channels)?);
        }
        let lookup = |name: &str| -> Result<BufferId> {
            self.file
                .buffers
                .iter()
                .position(|b| b.name == name)
                .map(|i| buffers[i])
                .with_context(|| format!("unknown buffer '{name}'"))
        };

        let mut kernels = Vec::with_capacity(self.file.kernels.len());
        for spec in &self.file.kernels {
            let id = target.create_kernel(&spec.name)?;
            let source = match (&spec.source, with_sources) {
                (Some(path), true) => {
                    let path = self.resolve(path);
                    Some(fs::read_to_string(&path).with_context(|| {
                        format!("Failed to read source of '{}': {}", spec.name, path.display())
                    })?)
                }
                _ => None,
            };

            let kernel = target.kernel_mut(id)?;
            for b in &spec.inputs {
                kernel.set_in_buffer(&b.binding, lookup(&b.buffer)?)?;
            }
            for b in &spec.outputs {
                kernel.set_out_buffer(&b.binding, lookup(&b.buffer)?)?;
            }
            for p in &spec.params {
                kernel.set_param(p.to_param()?)?;
            }
            if let Some(source) = source {
                kernel.set_source(source);
            }
            kernels.push(id);
        }

        Ok(Declared { buffers, kernels })
    }
}

// ============================================================================
// Raw f32 files
// ============================================================================

/// Source file extension conventional for an environment.
pub fn source_extension(env: Environment) -> &'static str {
    match env {
        Environment::OpenCL => "cl",
        Environment::Cuda => "cu",
        Environment::Glsl => "glsl",
    }
}

/// Reads `len` native-endian f32 values.
pub fn read_raw(path: &Path, len: usize) -> Result<Vec<f32>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read: {}", path.display()))?;
    if bytes.len() != len * size_of::<f32>() {
        bail!(
            "{}: expected {} bytes ({} floats), got {}",
            path.display(),
            len * size_of::<f32>(),
            len,
            bytes.len()
        );
    }
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

pub fn write_raw(path: &Path, data: &[f32]) -> Result<()> {
    fs::write(path, bytemuck::cast_slice::<f32, u8>(data))
        .with_context(|| format!("Failed to write: {}", path.display()))
}
