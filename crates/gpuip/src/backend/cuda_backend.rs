//! CUDA adapter.
//!
//! Requires the `cuda` feature and an NVIDIA driver. Kernels are compiled at
//! Build with NVRTC; the driver library is loaded dynamically.

use std::sync::Arc;

use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{CudaContext, CudaFunction, CudaSlice, CudaStream, LaunchConfig, PushKernelArg};
use cudarc::nvrtc::CompileError;
use tracing::{debug, info};

use super::slots::SlotTable;
use super::{
    BackendAdapter, BufferDesc, DeviceBuffer, Environment, Launch, LaunchArg, ProgramHandle, check_len,
    launch_grid,
};
use crate::processor::{DeviceSelection, ProcessorConfig};
use crate::{GpuipError, GpuipResult};

/// Adapter over one CUDA device and its default stream.
pub struct CudaAdapter {
    name: String,
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    block: u32,
    buffers: SlotTable<CudaSlice<f32>>,
    programs: SlotTable<CudaFunction>,
}

impl CudaAdapter {
    pub fn new(config: &ProcessorConfig) -> GpuipResult<Self> {
        let ordinal = match config.device {
            DeviceSelection::Index(index) => index,
            DeviceSelection::Auto => fastest_device()?,
        };
        let ctx = CudaContext::new(ordinal).map_err(|e| {
            GpuipError::BackendNotAvailable(format!("CUDA init of device {ordinal} failed: {e:?}"))
        })?;
        let name = ctx.name().unwrap_or_else(|_| format!("CUDA device {ordinal}"));
        let stream = ctx.default_stream();

        info!(device = %name, ordinal, block = config.cuda_block, "CUDA adapter ready");
        Ok(Self {
            name,
            ctx,
            stream,
            block: config.cuda_block.max(1),
            buffers: SlotTable::new(),
            programs: SlotTable::new(),
        })
    }

    /// Check if CUDA is available.
    pub fn is_available() -> bool {
        CudaContext::device_count().map(|n| n > 0).unwrap_or(false)
    }

    fn buffer(&self, handle: DeviceBuffer) -> GpuipResult<&CudaSlice<f32>> {
        self.buffers
            .get(handle.key())
            .ok_or_else(|| GpuipError::Device("stale CUDA buffer handle".into()))
    }

    fn synchronize(&self) -> GpuipResult<()> {
        self.stream
            .synchronize()
            .map_err(|e| GpuipError::Device(format!("CUDA synchronize failed: {e:?}")))
    }
}

/// Device with the highest multiprocessor count x clock rate.
fn fastest_device() -> GpuipResult<usize> {
    let count = CudaContext::device_count()
        .map_err(|e| GpuipError::BackendNotAvailable(format!("CUDA driver unavailable: {e:?}")))?;
    if count <= 0 {
        return Err(GpuipError::BackendNotAvailable("no CUDA device found".into()));
    }

    let mut best = (0usize, 0i64);
    for ordinal in 0..count as usize {
        let Ok(ctx) = CudaContext::new(ordinal) else {
            continue;
        };
        let sms = ctx.attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT).unwrap_or(0);
        let clock = ctx.attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_CLOCK_RATE).unwrap_or(0);
        let score = sms as i64 * clock as i64;
        debug!(ordinal, sms, clock, score, "CUDA device");
        if score > best.1 {
            best = (ordinal, score);
        }
    }
    Ok(best.0)
}

impl BackendAdapter for CudaAdapter {
    fn environment(&self) -> Environment {
        Environment::Cuda
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn allocate(&mut self, buffers: &[BufferDesc]) -> GpuipResult<Vec<DeviceBuffer>> {
        drop(self.buffers.drain());

        let mut handles = Vec::with_capacity(buffers.len());
        for desc in buffers {
            let slice: CudaSlice<f32> = self.stream.alloc_zeros(desc.len()).map_err(|e| {
                GpuipError::Device(format!("CUDA allocation of '{}' ({} bytes) failed: {e:?}", desc.name, desc.size_bytes()))
            })?;
            handles.push(DeviceBuffer::new(self.buffers.insert(slice)));
        }
        debug!(count = handles.len(), "CUDA buffers allocated");
        Ok(handles)
    }

    fn compile(&mut self, kernel: &str, source: &str) -> GpuipResult<ProgramHandle> {
        let compile_err = |log: String| GpuipError::Compile { kernel: kernel.to_string(), log };

        let ptx = cudarc::nvrtc::compile_ptx(source).map_err(|e| match e {
            CompileError::CompileError { log, .. } => compile_err(log.to_string_lossy().into_owned()),
            other => compile_err(format!("{other:?}")),
        })?;
        let module = self
            .ctx
            .load_module(ptx)
            .map_err(|e| compile_err(format!("module load failed: {e:?}")))?;
        let function = module
            .load_function(kernel)
            .map_err(|e| compile_err(format!("entry point '{kernel}' not found: {e:?}")))?;

        Ok(ProgramHandle::new(self.programs.insert(function)))
    }

    fn release_program(&mut self, program: ProgramHandle) {
        self.programs.remove(program.key());
    }

    fn dispatch(&mut self, launch: &Launch<'_>) -> GpuipResult<()> {
        let function = self
            .programs
            .get(launch.program.key())
            .ok_or_else(|| GpuipError::Device(format!("no program for kernel '{}'", launch.kernel)))?;

        let buffers = launch
            .inputs
            .iter()
            .chain(&launch.outputs)
            .map(|(_, handle)| self.buffer(*handle))
            .collect::<GpuipResult<Vec<_>>>()?;
        let ints: Vec<i32> = launch
            .params
            .iter()
            .filter_map(|p| match p {
                LaunchArg::Int { value, .. } => Some(*value),
                LaunchArg::Float { .. } => None,
            })
            .collect();
        let floats: Vec<f32> = launch
            .params
            .iter()
            .filter_map(|p| match p {
                LaunchArg::Float { value, .. } => Some(*value),
                LaunchArg::Int { .. } => None,
            })
            .collect();
        let width = launch.width as i32;
        let height = launch.height as i32;

        let (gx, gy) = launch_grid(launch.width, launch.height, self.block);
        let cfg = LaunchConfig {
            grid_dim: (gx, gy, 1),
            block_dim: (self.block, self.block, 1),
            shared_mem_bytes: 0,
        };

        let mut builder = self.stream.launch_builder(function);
        for buffer in &buffers {
            builder.arg(*buffer);
        }
        for value in &ints {
            builder.arg(value);
        }
        for value in &floats {
            builder.arg(value);
        }
        builder.arg(&width);
        builder.arg(&height);

        #[allow(unsafe_code)]
        unsafe { builder.launch(cfg) }
            .map_err(|e| GpuipError::Device(format!("CUDA kernel '{}' launch failed: {e:?}", launch.kernel)))?;
        self.synchronize()
    }

    fn upload(&mut self, buffer: DeviceBuffer, data: &[f32]) -> GpuipResult<()> {
        let stream = self.stream.clone();
        let device = self
            .buffers
            .get_mut(buffer.key())
            .ok_or_else(|| GpuipError::Device("stale CUDA buffer handle".into()))?;
        check_len(device.len(), data.len())?;
        stream
            .memcpy_htod(data, device)
            .map_err(|e| GpuipError::Device(format!("CUDA upload failed: {e:?}")))?;
        self.synchronize()
    }

    fn download(&mut self, buffer: DeviceBuffer, data: &mut [f32]) -> GpuipResult<()> {
        let device = self.buffer(buffer)?;
        check_len(device.len(), data.len())?;
        self.stream
            .memcpy_dtoh(device, data)
            .map_err(|e| GpuipError::Device(format!("CUDA download failed: {e:?}")))?;
        self.synchronize()
    }
}
