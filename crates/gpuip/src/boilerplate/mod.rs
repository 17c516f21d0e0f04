//! Per-backend boilerplate generation and build-time source assembly.
//!
//! Every kernel is written against a scaffold derived from its bindings:
//!
//! ```text
//! prologue   signature (inputs, outputs, int params, float params,
//!            width, height), coordinates, idx, bounds guard
//! body       zeroed outputs in the boilerplate, author code at build
//! epilogue   closing brace
//! ```
//!
//! Generation is a pure function of (bindings, parameters, environment):
//! the text is compared byte-for-byte by clients, so any change in
//! whitespace or comments here is a compatibility break.

mod cuda;
mod glsl;
mod opencl;

use crate::backend::Environment;
use crate::buffer::BufferRegistry;
use crate::kernel::{Binding, Kernel};
use crate::param::ParamSet;
use crate::GpuipResult;

/// Generated scaffold for one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scaffold {
    prologue: String,
    zero_body: String,
    epilogue: String,
}

impl Scaffold {
    /// Signature and guard, up to where kernel code starts.
    pub fn prologue(&self) -> &str {
        &self.prologue
    }

    /// Body assigning zero to every output.
    pub fn zero_body(&self) -> &str {
        &self.zero_body
    }

    pub fn epilogue(&self) -> &str {
        &self.epilogue
    }

    /// Complete boilerplate kernel.
    pub fn boilerplate(&self) -> String {
        format!("{}{}{}", self.prologue, self.zero_body, self.epilogue)
    }

    /// Embed an author's body fragment in place of the zeroed body.
    pub fn wrap(&self, fragment: &str) -> String {
        let mut out = String::with_capacity(self.prologue.len() + fragment.len() + 8);
        out.push_str(&self.prologue);
        out.push_str(fragment);
        if !fragment.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.epilogue);
        out
    }
}

/// A bound argument with its resolved channel count.
struct Arg<'a> {
    name: &'a str,
    channels: u32,
}

/// Kernel interface resolved against the buffer registry.
struct Signature<'a> {
    kernel: &'a str,
    inputs: Vec<Arg<'a>>,
    outputs: Vec<Arg<'a>>,
    params: &'a ParamSet,
}

fn resolve<'a>(bindings: &'a [Binding], buffers: &BufferRegistry) -> GpuipResult<Vec<Arg<'a>>> {
    bindings
        .iter()
        .map(|b| {
            let buffer = buffers.get(b.buffer)?;
            Ok(Arg { name: &b.name, channels: buffer.channels() })
        })
        .collect()
}

/// Generate the scaffold of `kernel` for `env`.
pub fn generate(kernel: &Kernel, buffers: &BufferRegistry, env: Environment) -> GpuipResult<Scaffold> {
    let sig = Signature {
        kernel: kernel.name(),
        inputs: resolve(kernel.in_buffers(), buffers)?,
        outputs: resolve(kernel.out_buffers(), buffers)?,
        params: kernel.params(),
    };
    Ok(match env {
        Environment::OpenCL => compute_scaffold(&opencl::DIALECT, &sig),
        Environment::Cuda => compute_scaffold(&cuda::DIALECT, &sig),
        Environment::Glsl => glsl::scaffold(&sig),
    })
}

/// Whether `source` is a complete unit (declares its own entry point)
/// rather than a body fragment.
pub fn is_complete_unit(env: Environment, source: &str) -> bool {
    match env {
        Environment::OpenCL => source.contains("__kernel"),
        Environment::Cuda => source.contains("__global__"),
        Environment::Glsl => source.contains("void main"),
    }
}

/// Assemble the source handed to the backend compiler for `kernel`.
///
/// Complete units pass through; body fragments are embedded into the
/// generated scaffold. CUDA units get C linkage so the entry point keeps
/// the kernel's name.
pub fn assemble(kernel: &Kernel, buffers: &BufferRegistry, env: Environment) -> GpuipResult<String> {
    let source = kernel.source();
    let unit = if is_complete_unit(env, source) {
        source.to_string()
    } else {
        generate(kernel, buffers, env)?.wrap(source)
    };
    Ok(match env {
        Environment::Cuda => cuda::with_c_linkage(unit),
        Environment::OpenCL | Environment::Glsl => unit,
    })
}

/// Textual conventions of a C-like compute dialect.
struct ComputeDialect {
    /// Line preceding the kernel name.
    entry: &'static str,
    input_qualifier: &'static str,
    output_qualifier: &'static str,
    /// Statements computing `x` and `y`.
    coords: [&'static str; 2],
    /// Zero literal for a vector of `n` floats.
    zero_vector: fn(u32) -> String,
}

fn float_type(channels: u32) -> String {
    if channels == 1 {
        "float".to_string()
    } else {
        format!("float{channels}")
    }
}

fn zero_components(channels: u32) -> String {
    vec!["0"; channels as usize].join(", ")
}

fn compute_scaffold(dialect: &ComputeDialect, sig: &Signature<'_>) -> Scaffold {
    let separator = format!(",\n{}", " ".repeat(sig.kernel.len() + 1));

    let mut args: Vec<String> = Vec::new();
    for input in &sig.inputs {
        args.push(format!("{}{} * {}", dialect.input_qualifier, float_type(input.channels), input.name));
    }
    for output in &sig.outputs {
        args.push(format!("{}{} * {}", dialect.output_qualifier, float_type(output.channels), output.name));
    }
    for (name, _) in sig.params.ints() {
        args.push(format!("const int {name}"));
    }
    for (name, _) in sig.params.floats() {
        args.push(format!("const float {name}"));
    }
    args.push("const int width".to_string());
    args.push("const int height".to_string());

    let mut prologue = String::new();
    prologue.push_str(dialect.entry);
    prologue.push('\n');
    prologue.push_str(sig.kernel);
    prologue.push('(');
    prologue.push_str(&args.join(&separator));
    prologue.push_str(")\n{\n");
    prologue.push_str(&format!("    {}\n", dialect.coords[0]));
    prologue.push_str(&format!("    {}\n\n", dialect.coords[1]));
    prologue.push_str("    // array index\n");
    prologue.push_str("    const int idx = x + width * y;\n\n");
    prologue.push_str("    // inside image bounds check\n");
    prologue.push_str("    if (x >= width || y >= height) {\n");
    prologue.push_str("        return;\n");
    prologue.push_str("    }\n\n");
    prologue.push_str("    // kernel code\n");

    let mut zero_body = String::new();
    for output in &sig.outputs {
        let zero = if output.channels == 1 {
            "0".to_string()
        } else {
            (dialect.zero_vector)(output.channels)
        };
        zero_body.push_str(&format!("    {}[idx] = {};\n", output.name, zero));
    }

    Scaffold { prologue, zero_body, epilogue: "}".to_string() }
}
