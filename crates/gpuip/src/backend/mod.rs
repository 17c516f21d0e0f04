//! Compute backends behind a single adapter interface.
//!
//! Each environment has one adapter; the orchestrator never sees native
//! objects, only opaque handles the adapter issues.
//!
//! # Architecture
//!
//! ```text
//! ImageProcessor
//!     +-- Box<dyn BackendAdapter>
//!             +-- OpenClAdapter (ocl, feature "opencl")
//!             +-- CudaAdapter   (cudarc, feature "cuda")
//!             +-- GlslAdapter   (glow + glutin EGL, feature "glsl")
//! ```

mod detect;
mod slots;

#[cfg(feature = "opencl")]
mod opencl_backend;

#[cfg(all(feature = "cuda", not(target_os = "macos")))]
mod cuda_backend;

#[cfg(feature = "glsl")]
mod glsl_backend;

use std::fmt;
use std::str::FromStr;

pub use detect::{EnvironmentInfo, can_create_environment, describe_environments, detect_environments};
pub use slots::{SlotKey, SlotTable};

#[cfg(feature = "opencl")]
pub use opencl_backend::OpenClAdapter;

#[cfg(all(feature = "cuda", not(target_os = "macos")))]
pub use cuda_backend::CudaAdapter;

#[cfg(feature = "glsl")]
pub use glsl_backend::GlslAdapter;

use crate::buffer::BufferType;
use crate::processor::ProcessorConfig;
use crate::{GpuipError, GpuipResult};

/// Target compute environment, fixed for a processor's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    /// OpenCL C kernels.
    OpenCL,
    /// CUDA C kernels compiled with NVRTC.
    Cuda,
    /// GLSL 1.20 fragment shaders rendering into float textures.
    Glsl,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Self::OpenCL, Self::Cuda, Self::Glsl];

    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenCL => "opencl",
            Self::Cuda => "cuda",
            Self::Glsl => "glsl",
        }
    }

    /// Whether this build carries the adapter for the environment.
    pub fn is_compiled(&self) -> bool {
        match self {
            Self::OpenCL => cfg!(feature = "opencl"),
            Self::Cuda => cfg!(all(feature = "cuda", not(target_os = "macos"))),
            Self::Glsl => cfg!(feature = "glsl"),
        }
    }

    /// Whether a processor can be created for this environment here.
    pub fn is_available(&self) -> bool {
        can_create_environment(*self)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = GpuipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opencl" | "cl" => Ok(Self::OpenCL),
            "cuda" => Ok(Self::Cuda),
            "glsl" | "gl" => Ok(Self::Glsl),
            _ => Err(GpuipError::NotFound { kind: "environment", name: s.to_string() }),
        }
    }
}

/// Device storage owned by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceBuffer(SlotKey);

impl DeviceBuffer {
    pub fn new(key: SlotKey) -> Self {
        Self(key)
    }

    pub fn key(&self) -> SlotKey {
        self.0
    }
}

/// Compiled program owned by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(SlotKey);

impl ProgramHandle {
    pub fn new(key: SlotKey) -> Self {
        Self(key)
    }

    pub fn key(&self) -> SlotKey {
        self.0
    }
}

/// What an adapter needs to reserve storage for one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub name: String,
    pub buffer_type: BufferType,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl BufferDesc {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.len() * self.buffer_type.size_bytes()
    }
}

/// Scalar argument of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaunchArg<'a> {
    Int { name: &'a str, value: i32 },
    Float { name: &'a str, value: f32 },
}

impl LaunchArg<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Int { name, .. } | Self::Float { name, .. } => name,
        }
    }
}

/// One kernel dispatch over the `width x height` domain.
///
/// Arguments are in signature order: inputs, outputs, int params, float
/// params. Width and height follow implicitly.
#[derive(Debug, Clone)]
pub struct Launch<'a> {
    pub kernel: &'a str,
    pub program: ProgramHandle,
    pub inputs: Vec<(&'a str, DeviceBuffer)>,
    pub outputs: Vec<(&'a str, DeviceBuffer)>,
    pub params: Vec<LaunchArg<'a>>,
    pub width: u32,
    pub height: u32,
}

/// Device lifecycle of one compute environment.
///
/// Every call blocks until the device has finished. Handles are only
/// meaningful to the adapter that issued them.
pub trait BackendAdapter {
    fn environment(&self) -> Environment;

    /// Device name, for logs.
    fn name(&self) -> &str;

    /// Reserve storage for `buffers`, releasing every earlier allocation
    /// first. Handles are returned in the order of `buffers`.
    fn allocate(&mut self, buffers: &[BufferDesc]) -> GpuipResult<Vec<DeviceBuffer>>;

    /// Compile one assembled unit whose entry point is `kernel`.
    fn compile(&mut self, kernel: &str, source: &str) -> GpuipResult<ProgramHandle>;

    /// Release a compiled program. Unknown handles are ignored.
    fn release_program(&mut self, program: ProgramHandle);

    fn dispatch(&mut self, launch: &Launch<'_>) -> GpuipResult<()>;

    /// Copy host data into device storage; `data` covers the whole buffer.
    fn upload(&mut self, buffer: DeviceBuffer, data: &[f32]) -> GpuipResult<()>;

    /// Copy device storage into `data`, which covers the whole buffer.
    fn download(&mut self, buffer: DeviceBuffer, data: &mut [f32]) -> GpuipResult<()>;
}

/// Create the adapter for `env`.
pub fn create_adapter(env: Environment, config: &ProcessorConfig) -> GpuipResult<Box<dyn BackendAdapter>> {
    match env {
        Environment::OpenCL => {
            #[cfg(feature = "opencl")]
            {
                Ok(Box::new(OpenClAdapter::new(config)?))
            }
            #[cfg(not(feature = "opencl"))]
            {
                let _ = config;
                Err(GpuipError::BackendNotAvailable("opencl feature not enabled".to_string()))
            }
        }
        Environment::Cuda => {
            #[cfg(all(feature = "cuda", not(target_os = "macos")))]
            {
                Ok(Box::new(CudaAdapter::new(config)?))
            }
            #[cfg(not(all(feature = "cuda", not(target_os = "macos"))))]
            {
                let _ = config;
                Err(GpuipError::BackendNotAvailable("cuda feature not enabled".to_string()))
            }
        }
        Environment::Glsl => {
            #[cfg(feature = "glsl")]
            {
                Ok(Box::new(GlslAdapter::new(config)?))
            }
            #[cfg(not(feature = "glsl"))]
            {
                let _ = config;
                Err(GpuipError::BackendNotAvailable("glsl feature not enabled".to_string()))
            }
        }
    }
}

/// Grid covering a `width x height` domain with square blocks of `block`.
///
/// The last block in each direction may overhang; the kernel's bounds guard
/// discards those invocations.
pub fn launch_grid(width: u32, height: u32, block: u32) -> (u32, u32) {
    let block = block.max(1);
    (width.div_ceil(block), height.div_ceil(block))
}

/// Check a staging slice against the buffer it is copied to or from.
pub(crate) fn check_len(expected: usize, actual: usize) -> GpuipResult<()> {
    if expected != actual {
        return Err(GpuipError::BufferSizeMismatch { expected, actual });
    }
    Ok(())
}
