//! Host-memory adapter and shared pipelines for integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use gpuip::{
    BackendAdapter, BufferDesc, BufferId, BufferType, DeviceBuffer, Environment, GpuipError,
    GpuipResult, ImageProcessor, KernelId, Launch, LaunchArg, Param, ProgramHandle, SlotTable,
};

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 4;
pub const INC_A: i32 = 2;
pub const INC_B: f32 = 0.25;

/// Buffers and arguments of one host dispatch, keyed by binding name.
pub struct HostLaunch {
    pub inputs: HashMap<String, Vec<f32>>,
    pub outputs: HashMap<String, Vec<f32>>,
    pub ints: HashMap<String, i32>,
    pub floats: HashMap<String, f32>,
    pub width: u32,
    pub height: u32,
}

impl HostLaunch {
    pub fn input(&self, name: &str) -> &[f32] {
        &self.inputs[name]
    }

    pub fn output(&mut self, name: &str) -> &mut Vec<f32> {
        self.outputs.get_mut(name).unwrap()
    }
}

pub type HostKernel = Rc<dyn Fn(&mut HostLaunch)>;

/// What the adapter saw, shared with the test after the adapter is boxed.
#[derive(Debug, Default)]
pub struct HostLog {
    /// (kernel, assembled source) per successful compile.
    pub compiled: Vec<(String, String)>,
    pub dispatched: Vec<String>,
    pub allocations: usize,
    pub live_buffers: usize,
    pub live_programs: usize,
}

/// Adapter running registered Rust closures in place of device kernels.
pub struct HostAdapter {
    env: Environment,
    kernels: HashMap<String, HostKernel>,
    buffers: SlotTable<Vec<f32>>,
    programs: SlotTable<String>,
    log: Rc<RefCell<HostLog>>,
    fail_allocate: bool,
}

impl HostAdapter {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            kernels: HashMap::new(),
            buffers: SlotTable::new(),
            programs: SlotTable::new(),
            log: Rc::new(RefCell::new(HostLog::default())),
            fail_allocate: false,
        }
    }

    pub fn with_kernel(mut self, name: &str, kernel: impl Fn(&mut HostLaunch) + 'static) -> Self {
        self.kernels.insert(name.to_string(), Rc::new(kernel));
        self
    }

    pub fn failing_allocate(mut self) -> Self {
        self.fail_allocate = true;
        self
    }

    pub fn log(&self) -> Rc<RefCell<HostLog>> {
        self.log.clone()
    }

    fn sync_counts(&self) {
        let mut log = self.log.borrow_mut();
        log.live_buffers = self.buffers.len();
        log.live_programs = self.programs.len();
    }

    fn storage(&self, handle: DeviceBuffer) -> GpuipResult<&Vec<f32>> {
        self.buffers
            .get(handle.key())
            .ok_or_else(|| GpuipError::Device("stale host buffer".into()))
    }
}

impl BackendAdapter for HostAdapter {
    fn environment(&self) -> Environment {
        self.env
    }

    fn name(&self) -> &str {
        "host"
    }

    fn allocate(&mut self, buffers: &[BufferDesc]) -> GpuipResult<Vec<DeviceBuffer>> {
        self.buffers.drain();
        if self.fail_allocate {
            self.sync_counts();
            return Err(GpuipError::Device("out of device memory".into()));
        }
        let handles = buffers
            .iter()
            .map(|d| DeviceBuffer::new(self.buffers.insert(vec![0.0; d.len()])))
            .collect();
        self.log.borrow_mut().allocations += 1;
        self.sync_counts();
        Ok(handles)
    }

    fn compile(&mut self, kernel: &str, source: &str) -> GpuipResult<ProgramHandle> {
        if source.contains("#error") {
            return Err(GpuipError::Compile {
                kernel: kernel.to_string(),
                log: "error: #error directive".into(),
            });
        }
        if !self.kernels.contains_key(kernel) {
            return Err(GpuipError::Compile {
                kernel: kernel.to_string(),
                log: format!("entry point '{kernel}' not found"),
            });
        }
        let handle = ProgramHandle::new(self.programs.insert(kernel.to_string()));
        self.log.borrow_mut().compiled.push((kernel.to_string(), source.to_string()));
        self.sync_counts();
        Ok(handle)
    }

    fn release_program(&mut self, program: ProgramHandle) {
        self.programs.remove(program.key());
        self.sync_counts();
    }

    fn dispatch(&mut self, launch: &Launch<'_>) -> GpuipResult<()> {
        let name = self
            .programs
            .get(launch.program.key())
            .ok_or_else(|| GpuipError::Device("stale program".into()))?
            .clone();
        let kernel = self.kernels[&name].clone();

        let mut host = HostLaunch {
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            ints: HashMap::new(),
            floats: HashMap::new(),
            width: launch.width,
            height: launch.height,
        };
        for (binding, handle) in &launch.inputs {
            host.inputs.insert(binding.to_string(), self.storage(*handle)?.clone());
        }
        for (binding, handle) in &launch.outputs {
            host.outputs.insert(binding.to_string(), self.storage(*handle)?.clone());
        }
        for arg in &launch.params {
            match arg {
                LaunchArg::Int { name, value } => {
                    host.ints.insert(name.to_string(), *value);
                }
                LaunchArg::Float { name, value } => {
                    host.floats.insert(name.to_string(), *value);
                }
            }
        }

        kernel(&mut host);

        for (binding, handle) in &launch.outputs {
            let data = host.outputs.remove(*binding).unwrap();
            *self.buffers.get_mut(handle.key()).unwrap() = data;
        }
        self.log.borrow_mut().dispatched.push(name);
        Ok(())
    }

    fn upload(&mut self, buffer: DeviceBuffer, data: &[f32]) -> GpuipResult<()> {
        let storage = self
            .buffers
            .get_mut(buffer.key())
            .ok_or_else(|| GpuipError::Device("stale host buffer".into()))?;
        storage.copy_from_slice(data);
        Ok(())
    }

    fn download(&mut self, buffer: DeviceBuffer, data: &mut [f32]) -> GpuipResult<()> {
        data.copy_from_slice(self.storage(buffer)?);
        Ok(())
    }
}

/// `B = A + 0.1 * incA`, `C = A + incB`.
pub fn kernel_a(l: &mut HostLaunch) {
    let inc_a = l.ints["incA"] as f32;
    let inc_b = l.floats["incB"];
    let a = l.input("A").to_vec();
    for (b, a) in l.output("B").iter_mut().zip(&a) {
        *b = a + 0.1 * inc_a;
    }
    for (c, a) in l.output("C").iter_mut().zip(&a) {
        *c = a + inc_b;
    }
}

/// `A = B + C`.
pub fn kernel_b(l: &mut HostLaunch) {
    let sum: Vec<f32> = l.input("B").iter().zip(l.input("C")).map(|(b, c)| b + c).collect();
    *l.output("A") = sum;
}

pub struct Pipeline {
    pub ip: ImageProcessor,
    pub buffers: [BufferId; 3],
    pub kernel_a: KernelId,
    pub kernel_b: KernelId,
    pub log: Rc<RefCell<HostLog>>,
}

/// The 4x4 two-kernel pipeline on a host adapter, before Allocate.
pub fn pipeline(adapter: HostAdapter, code_a: &str, code_b: &str) -> Pipeline {
    let log = adapter.log();
    let mut ip = ImageProcessor::with_adapter(Box::new(adapter));
    ip.set_dimensions(WIDTH, HEIGHT).unwrap();

    let b0 = ip.create_buffer("b0", BufferType::Float, 1).unwrap();
    let b1 = ip.create_buffer("b1", BufferType::Float, 1).unwrap();
    let b2 = ip.create_buffer("b2", BufferType::Float, 1).unwrap();

    let ka = ip.create_kernel("my_kernelA").unwrap();
    {
        let k = ip.kernel_mut(ka).unwrap();
        k.set_source(code_a);
        k.set_in_buffer("A", b0).unwrap();
        k.set_out_buffer("B", b1).unwrap();
        k.set_out_buffer("C", b2).unwrap();
        k.set_param(Param::int("incA", INC_A)).unwrap();
        k.set_param(Param::float("incB", INC_B)).unwrap();
    }

    let kb = ip.create_kernel("my_kernelB").unwrap();
    {
        let k = ip.kernel_mut(kb).unwrap();
        k.set_source(code_b);
        k.set_in_buffer("B", b1).unwrap();
        k.set_in_buffer("C", b2).unwrap();
        k.set_out_buffer("A", b0).unwrap();
    }

    Pipeline { ip, buffers: [b0, b1, b2], kernel_a: ka, kernel_b: kb, log }
}

pub fn host_pipeline(env: Environment) -> Pipeline {
    let adapter = HostAdapter::new(env)
        .with_kernel("my_kernelA", kernel_a)
        .with_kernel("my_kernelB", kernel_b);
    pipeline(adapter, "B[idx] = A[idx] + incA * 0.1;\nC[idx] = A[idx] + incB;", "A[idx] = B[idx] + C[idx];")
}

/// `i + width * j` at pixel `(i, j)`.
pub fn seed() -> Vec<f32> {
    (0..WIDTH * HEIGHT).map(|i| i as f32).collect()
}
