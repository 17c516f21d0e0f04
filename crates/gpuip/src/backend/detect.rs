//! Environment detection.
//!
//! Probes open and drop their own native handles; nothing is cached.

use super::Environment;

/// Availability of one environment.
#[derive(Debug, Clone)]
pub struct EnvironmentInfo {
    pub environment: Environment,
    /// Human-readable name.
    pub name: &'static str,
    /// Adapter is built into this binary.
    pub compiled: bool,
    /// A device was found and a processor can be created.
    pub available: bool,
    pub description: &'static str,
}

/// Can a processor for `env` be created on this machine?
pub fn can_create_environment(env: Environment) -> bool {
    match env {
        #[cfg(feature = "opencl")]
        Environment::OpenCL => super::OpenClAdapter::is_available(),
        #[cfg(all(feature = "cuda", not(target_os = "macos")))]
        Environment::Cuda => super::CudaAdapter::is_available(),
        #[cfg(feature = "glsl")]
        Environment::Glsl => super::GlslAdapter::is_available(),
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

/// Probe every environment.
pub fn detect_environments() -> Vec<EnvironmentInfo> {
    Environment::ALL
        .iter()
        .map(|&environment| {
            let (name, description) = match environment {
                Environment::OpenCL => ("OpenCL", "OpenCL C kernels (ocl)"),
                Environment::Cuda => ("CUDA", "NVIDIA GPU via NVRTC (cudarc)"),
                Environment::Glsl => ("GLSL", "GLSL 1.20 fragment shaders (headless EGL)"),
            };
            let compiled = environment.is_compiled();
            EnvironmentInfo {
                environment,
                name,
                compiled,
                available: compiled && can_create_environment(environment),
                description,
            }
        })
        .collect()
}

/// Printable availability table.
pub fn describe_environments() -> String {
    let mut desc = String::new();
    for info in detect_environments() {
        let status = if info.available { "+" } else { "-" };
        let note = if info.compiled { "" } else { " (not compiled in)" };
        desc.push_str(&format!("[{}] {}: {}{}\n", status, info.name, info.description, note));
    }
    desc
}
