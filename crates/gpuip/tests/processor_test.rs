//! Lifecycle tests for ImageProcessor against the host adapter.

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use gpuip::{
    BufferType, Diagnostic, Environment, ErrorKind, GpuipError, ImageProcessor, Param, ProcessorState,
};

fn upload_seed(p: &mut Pipeline) -> Vec<f32> {
    let seed = seed();
    p.ip.buffer_mut(p.buffers[0]).unwrap().set_data(&seed).unwrap();
    p.ip.write_buffer_to_gpu(p.buffers[0]).unwrap();
    seed
}

fn read_all(p: &mut Pipeline) -> [Vec<f32>; 3] {
    for id in p.buffers {
        p.ip.read_buffer_from_gpu(id).unwrap();
    }
    p.buffers.map(|id| p.ip.buffer(id).unwrap().data().to_vec())
}

#[test]
fn test_end_to_end_4x4() {
    let mut p = host_pipeline(Environment::OpenCL);

    assert_eq!(p.ip.allocate().diagnostic(), "");
    assert_eq!(p.ip.allocate().diagnostic(), "");
    let seed = upload_seed(&mut p);
    assert_eq!(p.ip.build().diagnostic(), "");
    assert_eq!(p.ip.build().diagnostic(), "");
    assert_eq!(p.ip.run().diagnostic(), "");
    assert_eq!(p.ip.state(), ProcessorState::Ready);

    let [a, b, c] = read_all(&mut p);
    for i in 0..(WIDTH * HEIGHT) as usize {
        assert_abs_diff_eq!(b[i], seed[i] + 0.1 * INC_A as f32, epsilon = 1e-4);
        assert_abs_diff_eq!(c[i], seed[i] + INC_B, epsilon = 1e-4);
        assert_abs_diff_eq!(a[i], b[i] + c[i], epsilon = 1e-4);
    }
}

#[test]
fn test_duplicate_buffer_name() {
    let mut ip = ImageProcessor::with_adapter(Box::new(HostAdapter::new(Environment::Cuda)));
    ip.set_dimensions(4, 4).unwrap();
    ip.create_buffer("b0", BufferType::Float, 1).unwrap();
    let err = ip.create_buffer("b0", BufferType::Float, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
}

#[test]
fn test_run_before_build() {
    let mut p = host_pipeline(Environment::OpenCL);
    let err = p.ip.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(p.ip.run().diagnostic(), "invalid state: run() before build()");

    p.ip.allocate().unwrap();
    assert!(matches!(p.ip.run(), Err(GpuipError::State(_))));
    assert!(p.log.borrow().dispatched.is_empty());
}

#[test]
fn test_build_before_allocate() {
    let mut p = host_pipeline(Environment::OpenCL);
    assert!(matches!(p.ip.build(), Err(GpuipError::State(_))));
    assert!(matches!(p.ip.write_buffer_to_gpu(p.buffers[0]), Err(GpuipError::State(_))));
    assert_eq!(p.ip.state(), ProcessorState::Created);
}

#[test]
fn test_upload_download_round_trip() {
    let mut p = host_pipeline(Environment::Glsl);
    p.ip.allocate().unwrap();
    let seed = upload_seed(&mut p);

    p.ip.buffer_mut(p.buffers[0]).unwrap().data_mut().fill(-1.0);
    p.ip.read_buffer_from_gpu(p.buffers[0]).unwrap();
    assert_eq!(p.ip.buffer(p.buffers[0]).unwrap().data(), &seed[..]);
}

#[test]
fn test_allocate_and_build_idempotent() {
    let run_once = |allocs: usize, builds: usize| {
        let mut p = host_pipeline(Environment::OpenCL);
        for _ in 0..allocs {
            p.ip.allocate().unwrap();
        }
        upload_seed(&mut p);
        for _ in 0..builds {
            p.ip.build().unwrap();
        }
        p.ip.run().unwrap();
        let out = read_all(&mut p);
        let log = p.log.borrow();
        assert_eq!(log.live_programs, 2);
        assert_eq!(log.live_buffers, 3);
        out
    };
    assert_eq!(run_once(1, 1), run_once(2, 2));
    assert_eq!(run_once(1, 1), run_once(3, 1));
}

#[test]
fn test_declaration_order() {
    let adapter = HostAdapter::new(Environment::OpenCL)
        .with_kernel("first", |l: &mut HostLaunch| {
            let x: Vec<f32> = l.input("src").iter().map(|v| v + 1.0).collect();
            *l.output("dst") = x;
        })
        .with_kernel("second", |l: &mut HostLaunch| {
            let y: Vec<f32> = l.input("src").iter().map(|v| v * 2.0).collect();
            *l.output("dst") = y;
        });
    let log = adapter.log();
    let mut ip = ImageProcessor::with_adapter(Box::new(adapter));
    ip.set_dimensions(2, 2).unwrap();
    let a = ip.create_buffer("a", BufferType::Float, 1).unwrap();
    let x = ip.create_buffer("x", BufferType::Float, 1).unwrap();
    let y = ip.create_buffer("y", BufferType::Float, 1).unwrap();

    let k1 = ip.create_kernel("first").unwrap();
    let k2 = ip.create_kernel("second").unwrap();
    ip.kernel_mut(k2).unwrap().set_in_buffer("src", x).unwrap();
    ip.kernel_mut(k2).unwrap().set_out_buffer("dst", y).unwrap();
    ip.kernel_mut(k2).unwrap().set_source("dst[idx] = src[idx] * 2;");
    ip.kernel_mut(k1).unwrap().set_in_buffer("src", a).unwrap();
    ip.kernel_mut(k1).unwrap().set_out_buffer("dst", x).unwrap();
    ip.kernel_mut(k1).unwrap().set_source("dst[idx] = src[idx] + 1;");

    ip.allocate().unwrap();
    ip.buffer_mut(a).unwrap().set_data(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    ip.write_buffer_to_gpu(a).unwrap();
    ip.build().unwrap();
    ip.run().unwrap();
    ip.read_buffer_from_gpu(y).unwrap();

    assert_eq!(ip.buffer(y).unwrap().data(), &[4.0, 6.0, 8.0, 10.0]);
    assert_eq!(log.borrow().dispatched, ["first", "second"]);
}

#[test]
fn test_failed_build_keeps_previous() {
    let mut p = host_pipeline(Environment::Cuda);
    p.ip.allocate().unwrap();
    upload_seed(&mut p);
    p.ip.build().unwrap();

    p.ip.kernel_mut(p.kernel_b).unwrap().set_source("#error broken");
    let err = p.ip.build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert!(err.to_string().contains("my_kernelB"));
    assert_eq!(p.ip.state(), ProcessorState::Built);
    assert_eq!(p.log.borrow().live_programs, 2);

    // previous programs still run
    p.ip.run().unwrap();
    let [a, b, c] = read_all(&mut p);
    assert_abs_diff_eq!(a[5], b[5] + c[5], epsilon = 1e-4);
}

#[test]
fn test_build_validates_kernels() {
    let mut p = host_pipeline(Environment::OpenCL);
    p.ip.allocate().unwrap();

    p.ip.kernel_mut(p.kernel_a).unwrap().set_source("   ");
    let err = p.ip.build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BindingIncomplete);

    p.ip.kernel_mut(p.kernel_a).unwrap().set_source("B[idx] = 0;");
    let lonely = p.ip.create_kernel("lonely").unwrap();
    p.ip.kernel_mut(lonely).unwrap().set_source("x = 1;");
    let err = p.ip.build().unwrap_err();
    assert!(matches!(&err, GpuipError::BindingIncomplete { kernel, .. } if kernel == "lonely"));
    assert_eq!(p.log.borrow().live_programs, 0);
}

#[test]
fn test_params_read_at_run() {
    let mut p = host_pipeline(Environment::OpenCL);
    p.ip.allocate().unwrap();
    let seed = upload_seed(&mut p);
    p.ip.build().unwrap();

    p.ip.kernel_mut(p.kernel_a).unwrap().set_param(Param::float("incB", 1.5)).unwrap();
    p.ip.run().unwrap();
    let [_, _, c] = read_all(&mut p);
    assert_abs_diff_eq!(c[3], seed[3] + 1.5, epsilon = 1e-4);
    assert_eq!(p.log.borrow().compiled.len(), 2);
}

#[test]
fn test_buffer_created_after_allocate() {
    let mut p = host_pipeline(Environment::OpenCL);
    p.ip.allocate().unwrap();
    let late = p.ip.create_buffer("late", BufferType::Float, 1).unwrap();
    assert!(matches!(p.ip.write_buffer_to_gpu(late), Err(GpuipError::State(_))));

    p.ip.kernel_mut(p.kernel_b).unwrap().set_out_buffer("D", late).unwrap();
    assert!(matches!(p.ip.build(), Err(GpuipError::State(_))));

    p.ip.allocate().unwrap();
    p.ip.write_buffer_to_gpu(late).unwrap();
    p.ip.build().unwrap();
}

#[test]
fn test_reallocate_keeps_build() {
    let mut p = host_pipeline(Environment::OpenCL);
    p.ip.allocate().unwrap();
    p.ip.build().unwrap();
    p.ip.run().unwrap();
    p.ip.allocate().unwrap();
    assert_eq!(p.ip.state(), ProcessorState::Ready);
    assert_eq!(p.log.borrow().compiled.len(), 2);
    p.ip.run().unwrap();
}

#[test]
fn test_failed_allocate_resets() {
    let adapter = HostAdapter::new(Environment::OpenCL).failing_allocate();
    let mut ip = ImageProcessor::with_adapter(Box::new(adapter));
    ip.set_dimensions(2, 2).unwrap();
    let b = ip.create_buffer("b", BufferType::Float, 1).unwrap();
    let err = ip.allocate().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert_eq!(ip.state(), ProcessorState::Created);
    assert!(ip.write_buffer_to_gpu(b).is_err());
}

#[test]
fn test_set_dimensions_after_allocate() {
    let mut p = host_pipeline(Environment::OpenCL);
    p.ip.allocate().unwrap();
    assert!(matches!(p.ip.set_dimensions(8, 8), Err(GpuipError::State(_))));
    assert_eq!(p.ip.dimensions(), (WIDTH, HEIGHT));
}

#[test]
fn test_fragment_is_wrapped() {
    let mut p = host_pipeline(Environment::OpenCL);
    p.ip.allocate().unwrap();
    p.ip.build().unwrap();

    let log = p.log.borrow();
    let (kernel, source) = &log.compiled[0];
    assert_eq!(kernel, "my_kernelA");
    assert!(source.starts_with("__kernel void\nmy_kernelA(__global const float * A,"));
    assert!(source.contains("    // kernel code\nB[idx] = A[idx] + incA * 0.1;"));
    assert!(source.ends_with("C[idx] = A[idx] + incB;\n}"));
}

#[test]
fn test_boilerplate_through_processor() {
    let p = host_pipeline(Environment::Glsl);
    let code = p.ip.boilerplate_code(p.kernel_b).unwrap();
    assert!(code.starts_with("#version 120\nuniform sampler2D B;\nuniform sampler2D C;\n"));
    assert_eq!(code, p.ip.graph().boilerplate_code(p.kernel_b).unwrap());
}

#[test]
fn test_drop_releases_programs() {
    let mut p = host_pipeline(Environment::OpenCL);
    p.ip.allocate().unwrap();
    p.ip.build().unwrap();
    let log = p.log.clone();
    assert_eq!(log.borrow().live_programs, 2);
    drop(p);
    assert_eq!(log.borrow().live_programs, 0);
}

#[test]
fn test_missing_entry_point_fails_at_build() {
    // adapter only knows my_kernelA; my_kernelB has no entry point
    let adapter = HostAdapter::new(Environment::OpenCL).with_kernel("my_kernelA", kernel_a);
    let mut p = pipeline(adapter, "B[idx] = A[idx];\nC[idx] = A[idx];", "A[idx] = B[idx] + C[idx];");
    p.ip.allocate().unwrap();

    let err = p.ip.build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert!(err.to_string().contains("my_kernelB"));
    assert_eq!(p.ip.state(), ProcessorState::Allocated);
    assert!(matches!(p.ip.run(), Err(GpuipError::State(_))));
    assert!(p.log.borrow().dispatched.is_empty());
    assert_eq!(p.log.borrow().live_programs, 0);
}
