//! Pipeline execution command.
//!
//! allocate -> upload -> build -> run -> download, then raw f32 outputs.

use crate::RunArgs;
use crate::pipeline::{Pipeline, read_raw, write_raw};
use anyhow::{Context, Result};
use gpuip::{DeviceSelection, ImageProcessor, ProcessorConfig};
use std::time::Instant;
use tracing::{debug, info, trace};

pub fn run(args: RunArgs, verbose: bool) -> Result<()> {
    trace!(pipeline = %args.pipeline.display(), "run::run");
    let pipeline = Pipeline::load(&args.pipeline)?;
    let env = pipeline.environment(args.env)?;

    let config = ProcessorConfig {
        device: args.device.map_or(DeviceSelection::Auto, DeviceSelection::Index),
        cuda_block: args.cuda_block,
    };
    let mut ip = ImageProcessor::with_config(env, config)
        .with_context(|| format!("Failed to create {env} processor"))?;
    info!(env = %env, device = %ip.device_name(), "Processor ready");

    let declared = pipeline.declare(&mut ip, true)?;
    ip.allocate().context("Allocate failed")?;

    for (spec, &id) in pipeline.file.buffers.iter().zip(&declared.buffers) {
        if let Some(input) = &spec.input {
            let path = pipeline.resolve(input);
            let len = ip.buffer(id)?.len();
            let data = read_raw(&path, len)?;
            ip.buffer_mut(id)?.set_data(&data)?;
        } else if let Some(value) = spec.fill {
            ip.buffer_mut(id)?.data_mut().fill(value);
        } else {
            continue;
        }
        ip.write_buffer_to_gpu(id)
            .with_context(|| format!("Upload of '{}' failed", spec.name))?;
        debug!(buffer = %spec.name, "Uploaded");
    }

    let start = Instant::now();
    ip.build().context("Build failed")?;
    let built = start.elapsed();
    ip.run().context("Run failed")?;
    let ran = start.elapsed() - built;
    info!(build_ms = built.as_millis() as u64, run_ms = ran.as_millis() as u64, "Pipeline executed");

    for (spec, &id) in pipeline.file.buffers.iter().zip(&declared.buffers) {
        let Some(output) = &spec.output else { continue };
        ip.read_buffer_from_gpu(id)
            .with_context(|| format!("Download of '{}' failed", spec.name))?;
        let path = pipeline.resolve(output);
        write_raw(&path, ip.buffer(id)?.data())?;
        if verbose {
            println!("{} -> {}", spec.name, path.display());
        }
    }

    if verbose {
        println!("build {:.2?}, run {:.2?} on {}", built, ran, ip.device_name());
    }
    Ok(())
}
