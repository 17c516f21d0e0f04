//! Boilerplate generation command.
//!
//! Needs no device: the pipeline is declared on a bare `PipelineGraph`.

use crate::BoilerplateArgs;
use crate::pipeline::{Pipeline, source_extension};
use anyhow::{Context, Result};
use gpuip::PipelineGraph;
use std::fs;
use tracing::{info, trace};

pub fn run(args: BoilerplateArgs, verbose: bool) -> Result<()> {
    trace!(pipeline = %args.pipeline.display(), "boilerplate::run");
    let pipeline = Pipeline::load(&args.pipeline)?;
    let env = pipeline.environment(args.env)?;

    let mut graph = PipelineGraph::new(env);
    let declared = pipeline.declare(&mut graph, false)?;

    let kernels = match &args.kernel {
        Some(name) => vec![graph.kernel_by_name(name)?],
        None => declared.kernels,
    };

    if let Some(dir) = &args.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create: {}", dir.display()))?;
    }

    for (i, id) in kernels.iter().enumerate() {
        let name = graph.kernel(*id)?.name().to_string();
        let code = graph.boilerplate_code(*id)?;

        match &args.output_dir {
            Some(dir) => {
                let path = dir.join(format!("{name}.{}", source_extension(env)));
                fs::write(&path, format!("{code}\n"))
                    .with_context(|| format!("Failed to write: {}", path.display()))?;
                info!(kernel = %name, path = %path.display(), "Wrote boilerplate");
                if verbose {
                    println!("{}", path.display());
                }
            }
            None => {
                if kernels.len() > 1 {
                    if i > 0 {
                        println!();
                    }
                    println!("// {name} ({env})");
                }
                println!("{code}");
            }
        }
    }
    Ok(())
}
