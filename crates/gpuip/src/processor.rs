//! Orchestrator driving the allocate -> build -> run lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! Created --allocate--> Allocated --build--> Built --run--> Ready
//!                           ^                  |  ^           |
//!                           +---allocate-------+  +---build---+
//! ```
//!
//! - Buffers, kernels, bindings, parameters and sources can be changed in
//!   any state. Build snapshots bindings; Run reads parameter values live.
//! - Allocate is repeatable. Compiled programs survive it.
//! - Build is atomic: if any kernel fails to compile, the previous build is
//!   kept and the error names the kernel.
//! - Transfers are explicit. Run never copies between host and device.

use tracing::{debug, info, warn};

use crate::backend::{
    BackendAdapter, BufferDesc, DeviceBuffer, Environment, Launch, LaunchArg, ProgramHandle,
    create_adapter,
};
use crate::boilerplate;
use crate::buffer::{Buffer, BufferId, BufferType};
use crate::graph::PipelineGraph;
use crate::kernel::{Kernel, KernelId};
use crate::param::Param;
use crate::{GpuipError, GpuipResult};

// ============================================================================
// Configuration
// ============================================================================

/// Default CUDA block edge (threads per block = edge^2).
pub const DEFAULT_CUDA_BLOCK: u32 = 16;

/// Which device an adapter opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    /// Backend heuristic: fastest CUDA device, first OpenCL GPU.
    #[default]
    Auto,
    /// Device ordinal as enumerated by the backend.
    Index(usize),
}

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub device: DeviceSelection,
    /// CUDA block edge; the launch grid is `ceil(w / edge) x ceil(h / edge)`.
    pub cuda_block: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelection::Auto,
            cuda_block: DEFAULT_CUDA_BLOCK,
        }
    }
}

/// Lifecycle state of an [`ImageProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Created,
    Allocated,
    Built,
    /// Run has completed at least once since the last Build.
    Ready,
}

/// Build output of one kernel: the program and the layout it was built for.
#[derive(Debug)]
struct CompiledKernel {
    kernel: KernelId,
    program: ProgramHandle,
    inputs: Vec<(String, BufferId)>,
    outputs: Vec<(String, BufferId)>,
    /// Parameter names in signature order.
    params: Vec<String>,
}

// ============================================================================
// ImageProcessor
// ============================================================================

/// A pipeline bound to one compute environment.
pub struct ImageProcessor {
    graph: PipelineGraph,
    adapter: Box<dyn BackendAdapter>,
    state: ProcessorState,
    /// Device storage by buffer index, as of the last Allocate.
    device: Vec<DeviceBuffer>,
    compiled: Vec<CompiledKernel>,
}

impl ImageProcessor {
    /// Create a processor on the default device of `env`.
    pub fn new(env: Environment) -> GpuipResult<Self> {
        Self::with_config(env, ProcessorConfig::default())
    }

    pub fn with_config(env: Environment, config: ProcessorConfig) -> GpuipResult<Self> {
        let adapter = create_adapter(env, &config)?;
        Ok(Self::with_adapter(adapter))
    }

    /// Create a processor driving a caller-supplied adapter.
    pub fn with_adapter(adapter: Box<dyn BackendAdapter>) -> Self {
        let env = adapter.environment();
        info!(env = %env, device = adapter.name(), "ImageProcessor created");
        Self {
            graph: PipelineGraph::new(env),
            adapter,
            state: ProcessorState::Created,
            device: Vec::new(),
            compiled: Vec::new(),
        }
    }

    pub fn environment(&self) -> Environment {
        self.graph.environment()
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Name of the device the adapter opened.
    pub fn device_name(&self) -> &str {
        self.adapter.name()
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    // === Graph construction ===

    /// Set the image domain. Only valid before Allocate and before any
    /// buffer exists.
    pub fn set_dimensions(&mut self, width: u32, height: u32) -> GpuipResult<()> {
        if self.state != ProcessorState::Created {
            return Err(GpuipError::State("set_dimensions() after allocate()".into()));
        }
        self.graph.set_dimensions(width, height)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.graph.dimensions()
    }

    pub fn create_buffer(&mut self, name: &str, buffer_type: BufferType, channels: u32) -> GpuipResult<BufferId> {
        self.graph.create_buffer(name, buffer_type, channels)
    }

    pub fn buffer(&self, id: BufferId) -> GpuipResult<&Buffer> {
        self.graph.buffer(id)
    }

    /// Host staging data of a buffer, for filling before upload.
    pub fn buffer_mut(&mut self, id: BufferId) -> GpuipResult<&mut Buffer> {
        self.graph.buffer_mut(id)
    }

    pub fn buffer_by_name(&self, name: &str) -> GpuipResult<BufferId> {
        self.graph.buffer_by_name(name)
    }

    pub fn create_kernel(&mut self, name: &str) -> GpuipResult<KernelId> {
        self.graph.create_kernel(name)
    }

    pub fn kernel(&self, id: KernelId) -> GpuipResult<&Kernel> {
        self.graph.kernel(id)
    }

    pub fn kernel_mut(&mut self, id: KernelId) -> GpuipResult<&mut Kernel> {
        self.graph.kernel_mut(id)
    }

    pub fn kernel_by_name(&self, name: &str) -> GpuipResult<KernelId> {
        self.graph.kernel_by_name(name)
    }

    /// Boilerplate for a kernel in this processor's environment.
    pub fn boilerplate_code(&self, id: KernelId) -> GpuipResult<String> {
        self.graph.boilerplate_code(id)
    }

    // === Lifecycle ===

    /// Reserve device storage for every buffer, releasing earlier storage.
    ///
    /// On failure the processor returns to `Created` with no device
    /// storage and no compiled programs.
    pub fn allocate(&mut self) -> GpuipResult<()> {
        let descs: Vec<BufferDesc> = self
            .graph
            .buffers()
            .iter()
            .map(|(_, b)| BufferDesc {
                name: b.name().to_string(),
                buffer_type: b.buffer_type(),
                width: b.width(),
                height: b.height(),
                channels: b.channels(),
            })
            .collect();

        let total: usize = descs.iter().map(|d| d.size_bytes()).sum();
        debug!(buffers = descs.len(), bytes = total, "allocate");

        self.device.clear();
        match self.adapter.allocate(&descs) {
            Ok(handles) => {
                self.device = handles;
                if self.state == ProcessorState::Created {
                    self.state = ProcessorState::Allocated;
                }
                info!(buffers = self.device.len(), bytes = total, state = ?self.state, "allocated");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "allocate failed, resetting to Created");
                self.release_programs();
                self.state = ProcessorState::Created;
                Err(e)
            }
        }
    }

    /// Assemble and compile every kernel.
    ///
    /// Either every kernel compiles and replaces the previous build, or the
    /// previous build stays in place.
    pub fn build(&mut self) -> GpuipResult<()> {
        if self.state == ProcessorState::Created {
            return Err(GpuipError::State("build() before allocate()".into()));
        }

        let env = self.environment();
        let mut units = Vec::new();
        for (id, kernel) in self.graph.kernels() {
            kernel.validate()?;
            for binding in kernel.in_buffers().iter().chain(kernel.out_buffers()) {
                self.require_device(binding.buffer)?;
            }
            let source = boilerplate::assemble(kernel, self.graph.buffers(), env)?;
            units.push((id, source));
        }

        let mut fresh: Vec<CompiledKernel> = Vec::with_capacity(units.len());
        for (id, source) in units {
            let kernel = self.graph.kernel(id)?;
            match self.adapter.compile(kernel.name(), &source) {
                Ok(program) => {
                    debug!(kernel = kernel.name(), "compiled");
                    fresh.push(CompiledKernel {
                        kernel: id,
                        program,
                        inputs: kernel.in_buffers().iter().map(|b| (b.name.clone(), b.buffer)).collect(),
                        outputs: kernel.out_buffers().iter().map(|b| (b.name.clone(), b.buffer)).collect(),
                        params: kernel.params().signature_order().map(|p| p.name().to_string()).collect(),
                    });
                }
                Err(e) => {
                    warn!(kernel = kernel.name(), error = %e, "build failed, keeping previous programs");
                    for c in fresh {
                        self.adapter.release_program(c.program);
                    }
                    return Err(e);
                }
            }
        }

        self.release_programs();
        self.compiled = fresh;
        self.state = ProcessorState::Built;
        info!(kernels = self.compiled.len(), "built");
        Ok(())
    }

    /// Dispatch every built kernel in declaration order.
    pub fn run(&mut self) -> GpuipResult<()> {
        if !matches!(self.state, ProcessorState::Built | ProcessorState::Ready) {
            return Err(GpuipError::State("run() before build()".into()));
        }
        let (width, height) = self.graph.dimensions();

        for compiled in &self.compiled {
            let kernel = self.graph.kernel(compiled.kernel)?;
            let inputs = resolve_bindings(&compiled.inputs, &self.device, &self.graph)?;
            let outputs = resolve_bindings(&compiled.outputs, &self.device, &self.graph)?;

            let params = compiled
                .params
                .iter()
                .map(|name| match kernel.params().get(name) {
                    Some(Param::Int { value, .. }) => Ok(LaunchArg::Int { name: name.as_str(), value: *value }),
                    Some(Param::Float { value, .. }) => Ok(LaunchArg::Float { name: name.as_str(), value: *value }),
                    None => Err(GpuipError::NotFound { kind: "parameter", name: name.clone() }),
                })
                .collect::<GpuipResult<Vec<_>>>()?;

            debug!(kernel = kernel.name(), width, height, "dispatch");
            self.adapter.dispatch(&Launch {
                kernel: kernel.name(),
                program: compiled.program,
                inputs,
                outputs,
                params,
                width,
                height,
            })?;
        }

        self.state = ProcessorState::Ready;
        Ok(())
    }

    /// Copy a buffer's host staging data to the device.
    pub fn write_buffer_to_gpu(&mut self, id: BufferId) -> GpuipResult<()> {
        let handle = self.require_device(id)?;
        let buffer = self.graph.buffer(id)?;
        debug!(buffer = buffer.name(), bytes = buffer.size_bytes(), "upload");
        self.adapter.upload(handle, buffer.data())
    }

    /// Copy a buffer's device storage into its host staging data.
    pub fn read_buffer_from_gpu(&mut self, id: BufferId) -> GpuipResult<()> {
        let handle = self.require_device(id)?;
        let buffer = self.graph.buffer_mut(id)?;
        debug!(buffer = buffer.name(), bytes = buffer.size_bytes(), "download");
        self.adapter.download(handle, buffer.data_mut())
    }

    fn require_device(&self, id: BufferId) -> GpuipResult<DeviceBuffer> {
        if self.state == ProcessorState::Created {
            return Err(GpuipError::State("buffer transfer before allocate()".into()));
        }
        device_handle(&self.device, &self.graph, id)
    }

    fn release_programs(&mut self) {
        for c in self.compiled.drain(..) {
            self.adapter.release_program(c.program);
        }
    }
}

fn device_handle(device: &[DeviceBuffer], graph: &PipelineGraph, id: BufferId) -> GpuipResult<DeviceBuffer> {
    let buffer = graph.buffer(id)?;
    device.get(id.index()).copied().ok_or_else(|| {
        GpuipError::State(format!(
            "buffer '{}' has no device storage, call allocate() after creating it",
            buffer.name()
        ))
    })
}

fn resolve_bindings<'a>(
    bindings: &'a [(String, BufferId)],
    device: &[DeviceBuffer],
    graph: &PipelineGraph,
) -> GpuipResult<Vec<(&'a str, DeviceBuffer)>> {
    bindings
        .iter()
        .map(|(name, id)| Ok((name.as_str(), device_handle(device, graph, *id)?)))
        .collect()
}

impl std::fmt::Debug for ImageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProcessor")
            .field("environment", &self.environment())
            .field("device", &self.adapter.name())
            .field("state", &self.state)
            .field("dimensions", &self.graph.dimensions())
            .field("buffers", &self.graph.buffers().len())
            .field("kernels", &self.compiled.len())
            .finish()
    }
}

impl Drop for ImageProcessor {
    fn drop(&mut self) {
        self.release_programs();
    }
}
