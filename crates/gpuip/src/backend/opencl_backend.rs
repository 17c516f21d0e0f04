//! OpenCL adapter.
//!
//! Requires the `opencl` feature and an installed OpenCL ICD.

use ocl::enums::{ProgramInfo, ProgramInfoResult};
use ocl::flags::{DeviceType, MemFlags};
use ocl::{Buffer, Context, Device, Platform, Program, Queue};
use tracing::{debug, info};

use super::slots::SlotTable;
use super::{BackendAdapter, BufferDesc, DeviceBuffer, Environment, Launch, LaunchArg, ProgramHandle, check_len};
use crate::processor::{DeviceSelection, ProcessorConfig};
use crate::{GpuipError, GpuipResult};

struct ClProgram {
    kernel: String,
    program: Program,
}

/// Adapter over one OpenCL device and in-order queue.
pub struct OpenClAdapter {
    name: String,
    device: Device,
    context: Context,
    queue: Queue,
    buffers: SlotTable<Buffer<f32>>,
    programs: SlotTable<ClProgram>,
}

impl OpenClAdapter {
    pub fn new(config: &ProcessorConfig) -> GpuipResult<Self> {
        let (platform, device) = select_device(config.device)?;
        let name = device.name().unwrap_or_else(|_| "OpenCL device".to_string());

        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(|e| GpuipError::Device(format!("OpenCL context creation failed: {e}")))?;
        let queue = Queue::new(&context, device, None)
            .map_err(|e| GpuipError::Device(format!("OpenCL queue creation failed: {e}")))?;

        info!(device = %name, "OpenCL adapter ready");
        Ok(Self {
            name,
            device,
            context,
            queue,
            buffers: SlotTable::new(),
            programs: SlotTable::new(),
        })
    }

    /// Check if any OpenCL device is present.
    pub fn is_available() -> bool {
        select_device(DeviceSelection::Auto).is_ok()
    }

    fn buffer(&self, handle: DeviceBuffer) -> GpuipResult<&Buffer<f32>> {
        self.buffers
            .get(handle.key())
            .ok_or_else(|| GpuipError::Device("stale OpenCL buffer handle".into()))
    }

    fn finish(&self) -> GpuipResult<()> {
        self.queue
            .finish()
            .map_err(|e| GpuipError::Device(format!("OpenCL queue finish failed: {e}")))
    }
}

/// First GPU of any platform, else the first device of the first platform.
/// An explicit index counts every device across platforms.
fn select_device(selection: DeviceSelection) -> GpuipResult<(Platform, Device)> {
    let platforms = Platform::list();
    if platforms.is_empty() {
        return Err(GpuipError::BackendNotAvailable("no OpenCL platform found".into()));
    }

    match selection {
        DeviceSelection::Index(index) => platforms
            .iter()
            .flat_map(|p| Device::list_all(p).unwrap_or_default().into_iter().map(move |d| (*p, d)))
            .nth(index)
            .ok_or_else(|| GpuipError::BackendNotAvailable(format!("OpenCL device #{index} not found"))),
        DeviceSelection::Auto => {
            for platform in &platforms {
                let gpus = Device::list(platform, Some(DeviceType::GPU)).unwrap_or_default();
                if let Some(device) = gpus.first() {
                    return Ok((*platform, *device));
                }
            }
            let platform = platforms[0];
            let device = Device::first(platform)
                .map_err(|e| GpuipError::BackendNotAvailable(format!("no OpenCL device: {e}")))?;
            Ok((platform, device))
        }
    }
}

/// Whether the `;`-separated `CL_PROGRAM_KERNEL_NAMES` list contains `kernel`.
fn declares_kernel(names: &str, kernel: &str) -> bool {
    names.split(';').any(|name| name.trim() == kernel)
}

impl BackendAdapter for OpenClAdapter {
    fn environment(&self) -> Environment {
        Environment::OpenCL
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn allocate(&mut self, buffers: &[BufferDesc]) -> GpuipResult<Vec<DeviceBuffer>> {
        drop(self.buffers.drain());

        let mut handles = Vec::with_capacity(buffers.len());
        for desc in buffers {
            let buffer = Buffer::<f32>::builder()
                .queue(self.queue.clone())
                .flags(MemFlags::new().read_write())
                .len(desc.len())
                .fill_val(0.0f32)
                .build()
                .map_err(|e| {
                    GpuipError::Device(format!("OpenCL allocation of '{}' ({} bytes) failed: {e}", desc.name, desc.size_bytes()))
                })?;
            handles.push(DeviceBuffer::new(self.buffers.insert(buffer)));
        }
        debug!(count = handles.len(), "OpenCL buffers allocated");
        Ok(handles)
    }

    fn compile(&mut self, kernel: &str, source: &str) -> GpuipResult<ProgramHandle> {
        let program = Program::builder()
            .src(source)
            .devices(self.device)
            .build(&self.context)
            .map_err(|e| GpuipError::Compile { kernel: kernel.to_string(), log: e.to_string() })?;

        // clBuildProgram accepts a unit that lacks the entry point
        let names = match program.info(ProgramInfo::KernelNames) {
            Ok(ProgramInfoResult::KernelNames(names)) => names,
            Ok(other) => {
                return Err(GpuipError::Compile {
                    kernel: kernel.to_string(),
                    log: format!("unexpected program info: {other:?}"),
                });
            }
            Err(e) => {
                return Err(GpuipError::Compile {
                    kernel: kernel.to_string(),
                    log: format!("kernel name query failed: {e}"),
                });
            }
        };
        if !declares_kernel(&names, kernel) {
            return Err(GpuipError::Compile {
                kernel: kernel.to_string(),
                log: format!("program declares no __kernel named '{kernel}' (found: {names})"),
            });
        }
        debug!(kernel, kernels = %names, "OpenCL program built");

        let key = self.programs.insert(ClProgram { kernel: kernel.to_string(), program });
        Ok(ProgramHandle::new(key))
    }

    fn release_program(&mut self, program: ProgramHandle) {
        self.programs.remove(program.key());
    }

    fn dispatch(&mut self, launch: &Launch<'_>) -> GpuipResult<()> {
        let program = self
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

        let mut builder = ocl::Kernel::builder();
        builder
            .program(&program.program)
            .name(program.kernel.as_str())
            .queue(self.queue.clone())
            .global_work_size([launch.width as usize, launch.height as usize]);
        for buffer in &buffers {
            builder.arg(*buffer);
        }
        for value in &ints {
            builder.arg(value);
        }
        for value in &floats {
            builder.arg(value);
        }
        builder.arg(&width).arg(&height);

        let kernel = builder
            .build()
            .map_err(|e| GpuipError::Device(format!("OpenCL kernel '{}' setup failed: {e}", launch.kernel)))?;

        #[allow(unsafe_code)]
        unsafe { kernel.enq() }
            .map_err(|e| GpuipError::Device(format!("OpenCL kernel '{}' launch failed: {e}", launch.kernel)))?;
        self.finish()
    }

    fn upload(&mut self, buffer: DeviceBuffer, data: &[f32]) -> GpuipResult<()> {
        let device = self.buffer(buffer)?;
        check_len(device.len(), data.len())?;
        device
            .write(data)
            .enq()
            .map_err(|e| GpuipError::Device(format!("OpenCL upload failed: {e}")))?;
        self.finish()
    }

    fn download(&mut self, buffer: DeviceBuffer, data: &mut [f32]) -> GpuipResult<()> {
        let device = self.buffer(buffer)?;
        check_len(device.len(), data.len())?;
        device
            .read(data)
            .enq()
            .map_err(|e| GpuipError::Device(format!("OpenCL download failed: {e}")))?;
        self.finish()
    }
}
