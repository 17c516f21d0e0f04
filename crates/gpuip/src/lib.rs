//! Write-once image processing pipelines for GPU compute backends.
//!
//! A pipeline is a set of named 2D float buffers and kernels reading and
//! writing them. The same pipeline runs on OpenCL, CUDA or GLSL fragment
//! shaders; only the kernel sources differ, and the crate generates the
//! per-backend boilerplate those sources are written against.
//!
//! # Architecture
//!
//! ```text
//! ImageProcessor (allocate -> build -> run)
//!     +-- PipelineGraph
//!     |       +-- BufferRegistry (host staging storage)
//!     |       +-- Kernel (bindings, ParamSet, source)
//!     +-- boilerplate (scaffold generation + source assembly)
//!     +-- dyn BackendAdapter
//!             +-- OpenClAdapter (ocl)
//!             +-- CudaAdapter   (cudarc / NVRTC)
//!             +-- GlslAdapter   (glow + headless EGL)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gpuip::{BufferType, Environment, ImageProcessor, Param};
//!
//! let mut ip = ImageProcessor::new(Environment::OpenCL)?;
//! ip.set_dimensions(1920, 1080)?;
//! let src = ip.create_buffer("src", BufferType::Float, 4)?;
//! let dst = ip.create_buffer("dst", BufferType::Float, 4)?;
//!
//! let k = ip.create_kernel("gain")?;
//! ip.kernel_mut(k)?.set_in_buffer("src", src)?;
//! ip.kernel_mut(k)?.set_out_buffer("dst", dst)?;
//! ip.kernel_mut(k)?.set_param(Param::float("gain", 2.0))?;
//! ip.kernel_mut(k)?.set_source("dst[idx] = src[idx] * gain;");
//!
//! ip.allocate()?;
//! ip.write_buffer_to_gpu(src)?;
//! ip.build()?;
//! ip.run()?;
//! ip.read_buffer_from_gpu(dst)?;
//! ```

pub mod backend;
pub mod boilerplate;
pub mod buffer;
pub mod graph;
pub mod kernel;
pub mod param;
pub mod processor;

pub use backend::{
    BackendAdapter, BufferDesc, DeviceBuffer, Environment, EnvironmentInfo, Launch,
    LaunchArg, ProgramHandle, SlotKey, SlotTable, can_create_environment, create_adapter,
    describe_environments, detect_environments, launch_grid,
};
pub use boilerplate::Scaffold;
pub use buffer::{Buffer, BufferId, BufferRegistry, BufferType};
pub use graph::PipelineGraph;
pub use kernel::{Binding, Kernel, KernelId};
pub use param::{Param, ParamSet, ParamType};
pub use processor::{DeviceSelection, ImageProcessor, ProcessorConfig, ProcessorState};

use thiserror::Error;

/// Pipeline errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuipError {
    #[error("{kind} '{name}' already exists")]
    DuplicateName { kind: &'static str, name: String },

    #[error("binding '{binding}' is already used on kernel '{kernel}'")]
    DuplicateBinding { kernel: String, binding: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid state: {0}")]
    State(String),

    #[error("kernel '{kernel}' is incomplete: {reason}")]
    BindingIncomplete { kernel: String, reason: String },

    #[error("parameter '{name}' is {existing}, cannot replace it with {requested}")]
    ParamTypeMismatch { name: String, existing: ParamType, requested: ParamType },

    #[error("device error: {0}")]
    Device(String),

    #[error("failed to compile kernel '{kernel}':\n{log}")]
    Compile { kernel: String, log: String },

    #[error("backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("invalid channel count {0}, expected 1 to 4")]
    InvalidChannels(u32),

    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },
}

/// Coarse category of a [`GpuipError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DuplicateName,
    NotFound,
    State,
    BindingIncomplete,
    Device,
    Compile,
    InvalidArgument,
}

impl GpuipError {
    /// Taxonomy category, independent of the message payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateName { .. } | Self::DuplicateBinding { .. } => ErrorKind::DuplicateName,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::State(_) => ErrorKind::State,
            Self::BindingIncomplete { .. } => ErrorKind::BindingIncomplete,
            Self::Device(_) | Self::BackendNotAvailable(_) => ErrorKind::Device,
            Self::Compile { .. } => ErrorKind::Compile,
            Self::ParamTypeMismatch { .. }
            | Self::InvalidDimensions(..)
            | Self::InvalidChannels(_)
            | Self::BufferSizeMismatch { .. } => ErrorKind::InvalidArgument,
        }
    }
}

pub type GpuipResult<T> = Result<T, GpuipError>;

/// Diagnostic-string view of a result.
///
/// Success maps to an empty string and failure to the error message, so
/// callers that prefer checking a returned diagnostic after every call can
/// do `assert_eq!(ip.build().diagnostic(), "")`.
pub trait Diagnostic {
    fn diagnostic(&self) -> String;
}

impl<T> Diagnostic for GpuipResult<T> {
    fn diagnostic(&self) -> String {
        match self {
            Ok(_) => String::new(),
            Err(e) => e.to_string(),
        }
    }
}
