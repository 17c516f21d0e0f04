//! GLSL fragment shader adapter.
//!
//! Requires the `glsl` feature. Opens a headless EGL device context (no
//! window, no surface) and runs every kernel as a full-screen quad into a
//! framebuffer whose color attachments are the output textures.
//!
//! Every buffer is an RGBA32F texture regardless of channel count; uploads
//! pad missing channels with zero and downloads drop them.

use glow::{HasContext, PixelPackData, PixelUnpackData};
use glutin::api::egl::context::PossiblyCurrentContext;
use glutin::api::egl::device::Device;
use glutin::api::egl::display::Display;
use glutin::config::{Api, ConfigSurfaceTypes, ConfigTemplateBuilder};
use glutin::context::{ContextApi, ContextAttributesBuilder, Version};
use glutin::prelude::*;
use tracing::{debug, info};

use super::slots::SlotTable;
use super::{BackendAdapter, BufferDesc, DeviceBuffer, Environment, Launch, LaunchArg, ProgramHandle, check_len};
use crate::processor::{DeviceSelection, ProcessorConfig};
use crate::{GpuipError, GpuipResult};

const VERTEX_SHADER: &str = "#version 120
attribute vec2 position;
varying vec2 x;
void main()
{
    x = position * 0.5 + 0.5;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

/// Two triangles covering clip space, as a strip.
const QUAD: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

struct GlBuffer {
    texture: glow::Texture,
    width: u32,
    height: u32,
    channels: u32,
}

impl GlBuffer {
    fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

/// Adapter over a headless OpenGL context.
pub struct GlslAdapter {
    name: String,
    gl: glow::Context,
    fbo: glow::Framebuffer,
    quad: glow::Buffer,
    buffers: SlotTable<GlBuffer>,
    programs: SlotTable<glow::Program>,
    // Dropped after the GL objects above are deleted in `Drop`.
    _context: PossiblyCurrentContext,
    _display: Display,
}

impl GlslAdapter {
    #[allow(unsafe_code)]
    pub fn new(config: &ProcessorConfig) -> GpuipResult<Self> {
        let index = match config.device {
            DeviceSelection::Auto => 0,
            DeviceSelection::Index(index) => index,
        };
        let unavailable = |what: &str, e: &dyn std::fmt::Display| {
            GpuipError::BackendNotAvailable(format!("EGL {what} failed: {e}"))
        };

        let device = Device::query_devices()
            .map_err(|e| unavailable("device query", &e))?
            .nth(index)
            .ok_or_else(|| GpuipError::BackendNotAvailable(format!("EGL device #{index} not found")))?;
        let display = unsafe { Display::with_device(&device, None) }.map_err(|e| unavailable("display", &e))?;

        let template = ConfigTemplateBuilder::new()
            .with_api(Api::OPENGL)
            .with_surface_type(ConfigSurfaceTypes::empty())
            .build();
        let config = unsafe { display.find_configs(template) }
            .map_err(|e| unavailable("config query", &e))?
            .next()
            .ok_or_else(|| GpuipError::BackendNotAvailable("no surfaceless OpenGL EGL config".into()))?;

        let attributes = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::OpenGl(Some(Version::new(2, 1))))
            .build(None);
        let context = unsafe { display.create_context(&config, &attributes) }
            .map_err(|e| unavailable("context creation", &e))?
            .make_current_surfaceless()
            .map_err(|e| unavailable("make current", &e))?;

        let gl = unsafe { glow::Context::from_loader_function_cstr(|s| display.get_proc_address(s)) };
        let name = unsafe { gl.get_parameter_string(glow::RENDERER) };

        let (fbo, quad) = unsafe {
            let fbo = gl.create_framebuffer().map_err(GpuipError::Device)?;
            let quad = gl.create_buffer().map_err(GpuipError::Device)?;
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(quad));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(&QUAD[..]), glow::STATIC_DRAW);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            (fbo, quad)
        };

        info!(device = %name, "GLSL adapter ready");
        Ok(Self {
            name,
            gl,
            fbo,
            quad,
            buffers: SlotTable::new(),
            programs: SlotTable::new(),
            _context: context,
            _display: display,
        })
    }

    /// Check if a headless OpenGL context can be opened.
    pub fn is_available() -> bool {
        Self::new(&ProcessorConfig::default()).is_ok()
    }

    fn buffer(&self, handle: DeviceBuffer) -> GpuipResult<&GlBuffer> {
        self.buffers
            .get(handle.key())
            .ok_or_else(|| GpuipError::Device("stale GL texture handle".into()))
    }

    #[allow(unsafe_code)]
    fn release_buffers(&mut self) {
        for buffer in self.buffers.drain() {
            unsafe { self.gl.delete_texture(buffer.texture) };
        }
    }

    #[allow(unsafe_code)]
    fn compile_shader(&self, kind: u32, source: &str) -> Result<glow::Shader, String> {
        unsafe {
            let shader = self.gl.create_shader(kind)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if self.gl.get_shader_compile_status(shader) {
                Ok(shader)
            } else {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                Err(log)
            }
        }
    }

    #[allow(unsafe_code)]
    fn check_gl(&self, what: &str) -> GpuipResult<()> {
        let err = unsafe { self.gl.get_error() };
        if err != glow::NO_ERROR {
            return Err(GpuipError::Device(format!("GL error 0x{err:04x} during {what}")));
        }
        Ok(())
    }
}

/// Expand interleaved `channels`-wide pixels to RGBA.
fn to_rgba(data: &[f32], channels: usize) -> Vec<f32> {
    let mut out = vec![0.0; data.len() / channels * 4];
    for (src, dst) in data.chunks_exact(channels).zip(out.chunks_exact_mut(4)) {
        dst[..channels].copy_from_slice(src);
    }
    out
}

/// Compact RGBA pixels to `channels`-wide pixels.
fn from_rgba(rgba: &[f32], channels: usize, out: &mut [f32]) {
    for (src, dst) in rgba.chunks_exact(4).zip(out.chunks_exact_mut(channels)) {
        dst.copy_from_slice(&src[..channels]);
    }
}

impl BackendAdapter for GlslAdapter {
    fn environment(&self) -> Environment {
        Environment::Glsl
    }

    fn name(&self) -> &str {
        &self.name
    }

    #[allow(unsafe_code)]
    fn allocate(&mut self, buffers: &[BufferDesc]) -> GpuipResult<Vec<DeviceBuffer>> {
        self.release_buffers();

        let gl = &self.gl;
        let mut handles = Vec::with_capacity(buffers.len());
        for desc in buffers {
            let texture = unsafe {
                let texture = gl.create_texture().map_err(GpuipError::Device)?;
                gl.bind_texture(glow::TEXTURE_2D, Some(texture));
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::NEAREST as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::NEAREST as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
                gl.tex_image_2d(
                    glow::TEXTURE_2D,
                    0,
                    glow::RGBA32F as i32,
                    desc.width as i32,
                    desc.height as i32,
                    0,
                    glow::RGBA,
                    glow::FLOAT,
                    PixelUnpackData::Slice(None),
                );
                gl.bind_texture(glow::TEXTURE_2D, None);
                texture
            };
            handles.push(DeviceBuffer::new(self.buffers.insert(GlBuffer {
                texture,
                width: desc.width,
                height: desc.height,
                channels: desc.channels,
            })));
            self.check_gl(&format!("allocation of '{}'", desc.name))?;
        }
        debug!(count = handles.len(), "GL textures allocated");
        Ok(handles)
    }

    #[allow(unsafe_code)]
    fn compile(&mut self, kernel: &str, source: &str) -> GpuipResult<ProgramHandle> {
        let compile_err = |log: String| GpuipError::Compile { kernel: kernel.to_string(), log };

        let vs = self.compile_shader(glow::VERTEX_SHADER, VERTEX_SHADER).map_err(compile_err)?;
        let fs = match self.compile_shader(glow::FRAGMENT_SHADER, source) {
            Ok(fs) => fs,
            Err(log) => {
                unsafe { self.gl.delete_shader(vs) };
                return Err(compile_err(log));
            }
        };

        let gl = &self.gl;
        unsafe {
            let program = gl.create_program().map_err(GpuipError::Device)?;
            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            gl.bind_attrib_location(program, 0, "position");
            gl.link_program(program);
            let linked = gl.get_program_link_status(program);
            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            if !linked {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(compile_err(log));
            }
            Ok(ProgramHandle::new(self.programs.insert(program)))
        }
    }

    #[allow(unsafe_code)]
    fn release_program(&mut self, program: ProgramHandle) {
        if let Some(program) = self.programs.remove(program.key()) {
            unsafe { self.gl.delete_program(program) };
        }
    }

    #[allow(unsafe_code)]
    fn dispatch(&mut self, launch: &Launch<'_>) -> GpuipResult<()> {
        let program = *self
            .programs
            .get(launch.program.key())
            .ok_or_else(|| GpuipError::Device(format!("no program for kernel '{}'", launch.kernel)))?;
        let inputs = launch
            .inputs
            .iter()
            .map(|(name, h)| Ok((*name, self.buffer(*h)?.texture)))
            .collect::<GpuipResult<Vec<_>>>()?;
        let outputs = launch
            .outputs
            .iter()
            .map(|(_, h)| Ok(self.buffer(*h)?.texture))
            .collect::<GpuipResult<Vec<_>>>()?;

        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo));
            let attachments: Vec<u32> = (0..outputs.len() as u32).map(|i| glow::COLOR_ATTACHMENT0 + i).collect();
            for (attachment, texture) in attachments.iter().zip(&outputs) {
                gl.framebuffer_texture_2d(glow::FRAMEBUFFER, *attachment, glow::TEXTURE_2D, Some(*texture), 0);
            }
            gl.draw_buffers(&attachments);
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                return Err(GpuipError::Device(format!(
                    "framebuffer incomplete (0x{status:04x}) for kernel '{}'",
                    launch.kernel
                )));
            }

            gl.viewport(0, 0, launch.width as i32, launch.height as i32);
            gl.use_program(Some(program));

            for (unit, (name, texture)) in inputs.iter().enumerate() {
                gl.active_texture(glow::TEXTURE0 + unit as u32);
                gl.bind_texture(glow::TEXTURE_2D, Some(*texture));
                let location = gl.get_uniform_location(program, name);
                gl.uniform_1_i32(location.as_ref(), unit as i32);
            }
            for param in &launch.params {
                let location = gl.get_uniform_location(program, param.name());
                match param {
                    LaunchArg::Int { value, .. } => gl.uniform_1_i32(location.as_ref(), *value),
                    LaunchArg::Float { value, .. } => gl.uniform_1_f32(location.as_ref(), *value),
                }
            }
            let dx = gl.get_uniform_location(program, "dx");
            gl.uniform_1_f32(dx.as_ref(), 1.0 / launch.width as f32);

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.quad));
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 0, 0);
            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
            gl.finish();

            gl.disable_vertex_attrib_array(0);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            for attachment in &attachments {
                gl.framebuffer_texture_2d(glow::FRAMEBUFFER, *attachment, glow::TEXTURE_2D, None, 0);
            }
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.use_program(None);
        }
        self.check_gl(&format!("kernel '{}'", launch.kernel))
    }

    #[allow(unsafe_code)]
    fn upload(&mut self, buffer: DeviceBuffer, data: &[f32]) -> GpuipResult<()> {
        let target = self.buffer(buffer)?;
        check_len(target.len(), data.len())?;
        let rgba = to_rgba(data, target.channels as usize);

        let gl = &self.gl;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(target.texture));
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                target.width as i32,
                target.height as i32,
                glow::RGBA,
                glow::FLOAT,
                PixelUnpackData::Slice(Some(bytemuck::cast_slice(&rgba))),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
        }
        self.check_gl("upload")
    }

    #[allow(unsafe_code)]
    fn download(&mut self, buffer: DeviceBuffer, data: &mut [f32]) -> GpuipResult<()> {
        let source = self.buffer(buffer)?;
        check_len(source.len(), data.len())?;
        let mut rgba = vec![0.0f32; source.width as usize * source.height as usize * 4];

        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(source.texture),
                0,
            );
            gl.read_buffer(glow::COLOR_ATTACHMENT0);
            gl.read_pixels(
                0,
                0,
                source.width as i32,
                source.height as i32,
                glow::RGBA,
                glow::FLOAT,
                PixelPackData::Slice(Some(bytemuck::cast_slice_mut(&mut rgba))),
            );
            gl.framebuffer_texture_2d(glow::FRAMEBUFFER, glow::COLOR_ATTACHMENT0, glow::TEXTURE_2D, None, 0);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        from_rgba(&rgba, source.channels as usize, data);
        self.check_gl("download")
    }
}

impl Drop for GlslAdapter {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        self.release_buffers();
        for program in self.programs.drain() {
            unsafe { self.gl.delete_program(program) };
        }
        unsafe {
            self.gl.delete_framebuffer(self.fbo);
            self.gl.delete_buffer(self.quad);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_padding() {
        let rg = [1.0, 2.0, 3.0, 4.0];
        let rgba = to_rgba(&rg, 2);
        assert_eq!(rgba, [1.0, 2.0, 0.0, 0.0, 3.0, 4.0, 0.0, 0.0]);
        let mut back = [0.0; 4];
        from_rgba(&rgba, 2, &mut back);
        assert_eq!(back, rg);
    }
}
