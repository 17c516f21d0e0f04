//! CUDA C dialect.

use super::{ComputeDialect, zero_components};

pub(super) const DIALECT: ComputeDialect = ComputeDialect {
    entry: "__global__ void",
    input_qualifier: "const ",
    output_qualifier: "",
    coords: [
        "const int x = blockIdx.x * blockDim.x + threadIdx.x;",
        "const int y = blockIdx.y * blockDim.y + threadIdx.y;",
    ],
    zero_vector,
};

fn zero_vector(channels: u32) -> String {
    format!("make_float{channels}({})", zero_components(channels))
}

/// Give the unit C linkage unless it already declares it, so NVRTC does
/// not mangle the entry point.
pub(super) fn with_c_linkage(unit: String) -> String {
    if unit.contains("extern \"C\"") {
        unit
    } else {
        format!("extern \"C\" {{\n{unit}\n}}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_vector() {
        assert_eq!(zero_vector(4), "make_float4(0, 0, 0, 0)");
    }

    #[test]
    fn test_c_linkage_once() {
        let wrapped = with_c_linkage("__global__ void k() {}".into());
        assert_eq!(wrapped, "extern \"C\" {\n__global__ void k() {}\n}\n");
        assert_eq!(with_c_linkage(wrapped.clone()), wrapped);
    }
}
