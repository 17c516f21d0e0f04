//! Kernel definitions: buffer bindings, parameters and source.

use crate::buffer::{BufferId, OwnerId};
use crate::param::{Param, ParamSet};
use crate::{GpuipError, GpuipResult};

/// Handle to a kernel in a [`PipelineGraph`](crate::PipelineGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId {
    pub(crate) owner: OwnerId,
    pub(crate) index: usize,
}

impl KernelId {
    /// Declaration-order index; kernels run in this order.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Binding of a kernel argument name to a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub buffer: BufferId,
}

/// A named unit of work over the image domain.
///
/// Inputs and outputs share one binding namespace. The source is either a
/// complete kernel written against [`boilerplate`](crate::boilerplate) or a
/// body fragment that gets embedded into the generated scaffold at build.
#[derive(Debug, Clone)]
pub struct Kernel {
    name: String,
    owner: OwnerId,
    source: String,
    inputs: Vec<Binding>,
    outputs: Vec<Binding>,
    params: ParamSet,
}

impl Kernel {
    pub(crate) fn new(name: &str, owner: OwnerId) -> Self {
        Self {
            name: name.to_string(),
            owner,
            source: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: ParamSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind `buffer` as a read-only input under `binding`.
    pub fn set_in_buffer(&mut self, binding: &str, buffer: BufferId) -> GpuipResult<()> {
        self.check_binding(binding, buffer)?;
        self.inputs.push(Binding { name: binding.to_string(), buffer });
        Ok(())
    }

    /// Bind `buffer` as a writable output under `binding`.
    pub fn set_out_buffer(&mut self, binding: &str, buffer: BufferId) -> GpuipResult<()> {
        self.check_binding(binding, buffer)?;
        self.outputs.push(Binding { name: binding.to_string(), buffer });
        Ok(())
    }

    fn check_binding(&self, binding: &str, buffer: BufferId) -> GpuipResult<()> {
        if buffer.owner != self.owner {
            return Err(GpuipError::NotFound {
                kind: "buffer",
                name: format!("#{} bound to '{binding}' (not owned by this processor)", buffer.index),
            });
        }
        if self.is_bound(binding) || self.params.get(binding).is_some() {
            return Err(GpuipError::DuplicateBinding {
                kernel: self.name.clone(),
                binding: binding.to_string(),
            });
        }
        Ok(())
    }

    fn is_bound(&self, name: &str) -> bool {
        self.inputs.iter().chain(&self.outputs).any(|b| b.name == name)
    }

    /// Add or replace a parameter. Parameters share the argument namespace
    /// with buffer bindings.
    pub fn set_param(&mut self, param: Param) -> GpuipResult<()> {
        if self.is_bound(param.name()) {
            return Err(GpuipError::DuplicateBinding {
                kernel: self.name.clone(),
                binding: param.name().to_string(),
            });
        }
        self.params.set(param)
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn in_buffers(&self) -> &[Binding] {
        &self.inputs
    }

    pub fn out_buffers(&self) -> &[Binding] {
        &self.outputs
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// Check the kernel is ready to build.
    pub fn validate(&self) -> GpuipResult<()> {
        if self.source.trim().is_empty() {
            return Err(GpuipError::BindingIncomplete {
                kernel: self.name.clone(),
                reason: "source is empty".into(),
            });
        }
        if self.outputs.is_empty() {
            return Err(GpuipError::BindingIncomplete {
                kernel: self.name.clone(),
                reason: "no output buffer bound".into(),
            });
        }
        Ok(())
    }
}
