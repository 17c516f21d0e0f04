//! GLSL 1.20 fragment shader dialect.
//!
//! Inputs are samplers, outputs are `gl_FragData` attachments in binding
//! order. `x` holds the texture coordinate and `dx` one texel in x.

use super::{Scaffold, Signature};

pub(super) fn scaffold(sig: &Signature<'_>) -> Scaffold {
    let mut prologue = String::from("#version 120\n");
    for input in &sig.inputs {
        prologue.push_str(&format!("uniform sampler2D {};\n", input.name));
    }
    for (name, _) in sig.params.ints() {
        prologue.push_str(&format!("uniform int {name};\n"));
    }
    for (name, _) in sig.params.floats() {
        prologue.push_str(&format!("uniform float {name};\n"));
    }
    prologue.push_str("varying vec2 x; // texture coordinates\n");
    prologue.push_str("uniform float dx; // delta\n");
    prologue.push('\n');
    prologue.push_str("void main()\n{\n");

    let zero_body = sig
        .outputs
        .iter()
        .enumerate()
        .map(|(i, output)| {
            format!(
                "    // gl_FragData[{i}] is buffer {name}\n    gl_FragData[{i}] = vec4(0,0,0,1);\n",
                name = output.name
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Scaffold { prologue, zero_body, epilogue: "}".to_string() }
}
