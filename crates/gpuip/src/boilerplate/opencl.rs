//! OpenCL C dialect.

use super::{ComputeDialect, zero_components};

pub(super) const DIALECT: ComputeDialect = ComputeDialect {
    entry: "__kernel void",
    input_qualifier: "__global const ",
    output_qualifier: "__global ",
    coords: ["const int x = get_global_id(0);", "const int y = get_global_id(1);"],
    zero_vector,
};

fn zero_vector(channels: u32) -> String {
    format!("(float{channels})({})", zero_components(channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_vector() {
        assert_eq!(zero_vector(2), "(float2)(0, 0)");
        assert_eq!(zero_vector(3), "(float3)(0, 0, 0)");
    }
}
