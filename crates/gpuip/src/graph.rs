//! Buffer/kernel graph of one pipeline, independent of any device.

use tracing::debug;

use crate::backend::Environment;
use crate::boilerplate;
use crate::buffer::{Buffer, BufferId, BufferRegistry, BufferType, OwnerId};
use crate::kernel::{Kernel, KernelId};
use crate::{GpuipError, GpuipResult};

/// Buffers and kernels targeting one environment.
///
/// This is the device-free half of an [`ImageProcessor`](crate::ImageProcessor):
/// it can validate bindings and generate boilerplate without a GPU.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    env: Environment,
    owner: OwnerId,
    buffers: BufferRegistry,
    kernels: Vec<Kernel>,
}

impl PipelineGraph {
    /// Create an empty graph; call [`set_dimensions`](Self::set_dimensions)
    /// before creating buffers.
    pub fn new(env: Environment) -> Self {
        let owner = OwnerId::next();
        Self {
            env,
            owner,
            buffers: BufferRegistry::new(owner, 0, 0),
            kernels: Vec::new(),
        }
    }

    pub fn environment(&self) -> Environment {
        self.env
    }

    /// Set the image domain. Only valid before the first buffer exists.
    pub fn set_dimensions(&mut self, width: u32, height: u32) -> GpuipResult<()> {
        // kernels receive width and height as `int`
        let max = i32::MAX as u32;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GpuipError::InvalidDimensions(width, height));
        }
        self.buffers.set_dimensions(width, height)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffers.dimensions()
    }

    pub fn create_buffer(&mut self, name: &str, buffer_type: BufferType, channels: u32) -> GpuipResult<BufferId> {
        self.buffers.create(name, buffer_type, channels)
    }

    pub fn buffer(&self, id: BufferId) -> GpuipResult<&Buffer> {
        self.buffers.get(id)
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> GpuipResult<&mut Buffer> {
        self.buffers.get_mut(id)
    }

    pub fn buffer_by_name(&self, name: &str) -> GpuipResult<BufferId> {
        self.buffers.lookup(name)
    }

    pub fn buffers(&self) -> &BufferRegistry {
        &self.buffers
    }

    pub fn create_kernel(&mut self, name: &str) -> GpuipResult<KernelId> {
        if self.kernels.iter().any(|k| k.name() == name) {
            return Err(GpuipError::DuplicateName { kind: "kernel", name: name.to_string() });
        }
        debug!(name, index = self.kernels.len(), "create_kernel");
        self.kernels.push(Kernel::new(name, self.owner));
        Ok(KernelId { owner: self.owner, index: self.kernels.len() - 1 })
    }

    pub fn kernel(&self, id: KernelId) -> GpuipResult<&Kernel> {
        self.check_kernel(id)?;
        Ok(&self.kernels[id.index])
    }

    pub fn kernel_mut(&mut self, id: KernelId) -> GpuipResult<&mut Kernel> {
        self.check_kernel(id)?;
        Ok(&mut self.kernels[id.index])
    }

    pub fn kernel_by_name(&self, name: &str) -> GpuipResult<KernelId> {
        self.kernels
            .iter()
            .position(|k| k.name() == name)
            .map(|index| KernelId { owner: self.owner, index })
            .ok_or_else(|| GpuipError::NotFound { kind: "kernel", name: name.to_string() })
    }

    /// Kernels in declaration (= execution) order.
    pub fn kernels(&self) -> impl Iterator<Item = (KernelId, &Kernel)> {
        let owner = self.owner;
        self.kernels
            .iter()
            .enumerate()
            .map(move |(index, k)| (KernelId { owner, index }, k))
    }

    /// Generated boilerplate for a kernel, with zeroed outputs in place of
    /// the kernel body.
    pub fn boilerplate_code(&self, id: KernelId) -> GpuipResult<String> {
        let kernel = self.kernel(id)?;
        Ok(boilerplate::generate(kernel, &self.buffers, self.env)?.boilerplate())
    }

    fn check_kernel(&self, id: KernelId) -> GpuipResult<()> {
        if id.owner != self.owner || id.index >= self.kernels.len() {
            return Err(GpuipError::NotFound {
                kind: "kernel",
                name: format!("#{} (not owned by this processor)", id.index),
            });
        }
        Ok(())
    }
}
