// gpu/kernel.rs — named kernels, binding contract, quad dispatch.
//
// A kernel is a pre-linked fragment program drawn over the fixed
// two-triangle quad covering the whole grid. The calling contract:
//
//   load(name)                 — resolve a built-in kernel by name and
//                                link it; unknown name or a shader that
//                                fails validation is a load failure.
//   bind_uniform(name, value)  — stage a value for one of the uniform
//                                block's named fields.
//   bind_sampler(name, slot)   — point a named input at a resource slot;
//                                the slot's registered view is resolved
//                                at dispatch time through the SlotTable.
//   dispatch(target)           — one render pass: write the uniform
//                                block, draw the quad into the attached
//                                surface. Attachment contents are
//                                preserved (LoadOp::Load), matching the
//                                persistent-framebuffer model the
//                                kernels are written against.
//
// Every kernel source is compiled with the shared prelude (common.wgsl)
// concatenated in front of it — one vertex stage, one uniform block, one
// set of packing helpers for the whole kernel set.
//
// wgpu reports validation problems asynchronously; dispatch brackets its
// submit in an error scope and maps anything caught to the fatal
// `Backend` fault. There is no retry: a scan is defined only by all of
// its passes completing.

use std::fmt;
use std::sync::Arc;

use bytemuck::Zeroable;
use wgpu::util::DeviceExt;

use crate::gpu::device::GpuDevice;
use crate::gpu::slots::{Slot, SlotTable};
use crate::gpu::surface::{RenderTarget, TargetError, SURFACE_FORMAT};

// Kernel sub-modes (the u_stage uniform).
pub const MODE_RUNNING_SUM: i32 = 0;
pub const MODE_BINARY_SEARCH: i32 = 1;
pub const MODE_ROOT_INIT: i32 = 2;
pub const MODE_STORE: i32 = 3;

// ---------------------------------------------------------------------------
// Built-in kernel set
// ---------------------------------------------------------------------------

struct KernelDecl {
    name: &'static str,
    source: &'static str,
    /// Sampler names in binding order; sampler i is @binding(i + 1).
    samplers: &'static [&'static str],
}

const COMMON_SOURCE: &str = include_str!("shaders/common.wgsl");

const KERNELS: &[KernelDecl] = &[
    KernelDecl {
        name: "reduction",
        source: include_str!("shaders/reduction.wgsl"),
        samplers: &["s_texture", "s_values"],
    },
    KernelDecl {
        name: "fill",
        source: include_str!("shaders/fill.wgsl"),
        samplers: &["s_fill"],
    },
    KernelDecl {
        name: "count",
        source: include_str!("shaders/count.wgsl"),
        samplers: &["s_texture", "s_values", "s_result"],
    },
    KernelDecl {
        name: "centroid",
        source: include_str!("shaders/centroid.wgsl"),
        samplers: &["s_texture", "s_values", "s_result"],
    },
];

/// Names of all built-in kernels.
pub fn kernel_names() -> impl Iterator<Item = &'static str> {
    KERNELS.iter().map(|k| k.name)
}

// ---------------------------------------------------------------------------
// Quad geometry
// ---------------------------------------------------------------------------

// Position (xyz) + texcoord (uv), four corners of the full-grid quad.
// Fixed by design — a kernel always covers the whole grid.
const QUAD_VERTICES: [f32; 20] = [
    -1.0, -1.0, 0.0, 0.0, 0.0, // 0
    -1.0, 1.0, 0.0, 0.0, 1.0, // 1
    1.0, 1.0, 0.0, 1.0, 1.0, // 2
    1.0, -1.0, 0.0, 1.0, 0.0, // 3
];
const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

// ---------------------------------------------------------------------------
// Uniform block
// ---------------------------------------------------------------------------

/// CPU mirror of the `KernelParams` uniform block in common.wgsl.
/// Layout (48 bytes):
///   offset  0: tex_dim       (vec2<f32>)
///   offset  8: factor        (vec2<f32>)
///   offset 16: pass_index    (i32)
///   offset 20: mode          (i32)
///   offset 24: direction     (i32)
///   offset 28: saving_offset (i32)
///   offset 32: coordinate    (i32)
///   offset 36: padding       (3 × i32)
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    tex_dim: [f32; 2],
    factor: [f32; 2],
    pass_index: i32,
    mode: i32,
    direction: i32,
    saving_offset: i32,
    coordinate: i32,
    _pad: [i32; 3],
}

/// A value for `bind_uniform`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Vec2([f32; 2]),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Kernel load failure: unknown name, or shader failed validation.
#[derive(Debug)]
pub enum KernelError {
    UnknownKernel(String),
    Validation { kernel: String, error: String },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::UnknownKernel(name) => write!(f, "unknown kernel {name:?}"),
            KernelError::Validation { kernel, error } => {
                write!(f, "kernel {kernel:?} failed validation: {error}")
            }
        }
    }
}

impl std::error::Error for KernelError {}

/// Binding or dispatch failure.
#[derive(Debug)]
pub enum DispatchError {
    /// `bind_uniform` with a name the uniform block does not have, or a
    /// value of the wrong shape for the field.
    UnknownUniform(String),
    UniformType(String),
    /// `bind_sampler` with a name the kernel does not declare.
    UnknownSampler(String),
    /// Dispatch with a declared sampler that was never pointed at a slot.
    UnboundSampler(&'static str),
    /// A sampler's slot has no registered view — the surface was released
    /// while the kernel still referenced its slot.
    EmptySlot { sampler: &'static str, slot: Slot },
    /// The render target failed its completeness check.
    Target(TargetError),
    /// The backend reported an error for the dispatch. Fatal: partial
    /// scan output is undefined and must be discarded.
    Backend(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownUniform(n) => write!(f, "unknown uniform {n:?}"),
            DispatchError::UniformType(n) => write!(f, "wrong value type for uniform {n:?}"),
            DispatchError::UnknownSampler(n) => write!(f, "unknown sampler {n:?}"),
            DispatchError::UnboundSampler(n) => write!(f, "sampler {n:?} has no slot bound"),
            DispatchError::EmptySlot { sampler, slot } => {
                write!(f, "sampler {sampler:?} bound to empty {slot}")
            }
            DispatchError::Target(e) => write!(f, "{e}"),
            DispatchError::Backend(msg) => write!(f, "backend fault: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<TargetError> for DispatchError {
    fn from(e: TargetError) -> Self {
        DispatchError::Target(e)
    }
}

// ---------------------------------------------------------------------------
// KernelProvider
// ---------------------------------------------------------------------------

/// Owns the resources shared by every kernel: the quad geometry buffers.
/// Create once per device context.
pub struct KernelProvider {
    quad_vertices: Arc<wgpu::Buffer>,
    quad_indices: Arc<wgpu::Buffer>,
}

impl KernelProvider {
    pub fn new(gpu: &GpuDevice) -> Self {
        let quad_vertices = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad vertices"),
                contents: bytemuck::cast_slice(&QUAD_VERTICES),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let quad_indices = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad indices"),
                contents: bytemuck::cast_slice(&QUAD_INDICES),
                usage: wgpu::BufferUsages::INDEX,
            });
        KernelProvider {
            quad_vertices: Arc::new(quad_vertices),
            quad_indices: Arc::new(quad_indices),
        }
    }

    /// Load a built-in kernel by name and link its pipeline.
    pub fn load(&self, gpu: &GpuDevice, name: &str) -> Result<KernelHandle, KernelError> {
        let decl = KERNELS
            .iter()
            .find(|k| k.name == name)
            .ok_or_else(|| KernelError::UnknownKernel(name.to_string()))?;

        let source = format!("{COMMON_SOURCE}\n{}", decl.source);

        // Shader validation errors arrive asynchronously; catch them in an
        // error scope so a broken kernel is a load failure, not a panic
        // later at dispatch.
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(decl.name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        // Binding 0 is the uniform block; samplers follow in declaration
        // order as uint 2D textures (no filtering, ever).
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        for i in 0..decl.samplers.len() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: (i + 1) as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        let bind_group_layout =
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(decl.name),
                    entries: &entries,
                });
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(decl.name),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(decl.name),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: 5 * std::mem::size_of::<f32>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[
                            wgpu::VertexAttribute {
                                format: wgpu::VertexFormat::Float32x3,
                                offset: 0,
                                shader_location: 0,
                            },
                            wgpu::VertexAttribute {
                                format: wgpu::VertexFormat::Float32x2,
                                offset: 12,
                                shader_location: 1,
                            },
                        ],
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: SURFACE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(KernelError::Validation {
                kernel: decl.name.to_string(),
                error: err.to_string(),
            });
        }

        let uniform_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(decl.name),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(KernelHandle {
            name: decl.name,
            pipeline,
            bind_group_layout,
            uniform_buf,
            params: KernelParams::zeroed(),
            samplers: decl.samplers.iter().map(|&n| (n, None)).collect(),
            quad_vertices: self.quad_vertices.clone(),
            quad_indices: self.quad_indices.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// KernelHandle
// ---------------------------------------------------------------------------

/// A linked kernel with its staged uniform state and sampler→slot
/// assignments. Uniforms and sampler assignments persist across
/// dispatches, the way program state does — passes only change what
/// they must.
pub struct KernelHandle {
    name: &'static str,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buf: wgpu::Buffer,
    params: KernelParams,
    samplers: Vec<(&'static str, Option<Slot>)>,
    quad_vertices: Arc<wgpu::Buffer>,
    quad_indices: Arc<wgpu::Buffer>,
}

impl KernelHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stage a uniform value. Takes effect at the next dispatch.
    pub fn bind_uniform(&mut self, name: &str, value: UniformValue) -> Result<(), DispatchError> {
        match (name, value) {
            ("u_texDimensions", UniformValue::Vec2(v)) => self.params.tex_dim = v,
            ("u_factor", UniformValue::Vec2(v)) => self.params.factor = v,
            ("u_pass", UniformValue::Int(v)) => self.params.pass_index = v,
            ("u_stage", UniformValue::Int(v)) => self.params.mode = v,
            ("u_direction", UniformValue::Int(v)) => self.params.direction = v,
            ("u_savingOffset", UniformValue::Int(v)) => self.params.saving_offset = v,
            ("u_coordinate", UniformValue::Int(v)) => self.params.coordinate = v,
            ("u_texDimensions" | "u_factor", _) => {
                return Err(DispatchError::UniformType(name.to_string()))
            }
            ("u_pass" | "u_stage" | "u_direction" | "u_savingOffset" | "u_coordinate", _) => {
                return Err(DispatchError::UniformType(name.to_string()))
            }
            _ => return Err(DispatchError::UnknownUniform(name.to_string())),
        }
        Ok(())
    }

    /// Point a named sampler at a resource slot.
    pub fn bind_sampler(&mut self, name: &str, slot: Slot) -> Result<(), DispatchError> {
        for (sampler, assigned) in self.samplers.iter_mut() {
            if *sampler == name {
                *assigned = Some(slot);
                return Ok(());
            }
        }
        Err(DispatchError::UnknownSampler(name.to_string()))
    }

    /// One kernel dispatch: draw the quad into the target's attached
    /// surface with the currently staged uniforms and sampler slots.
    pub fn dispatch(
        &self,
        gpu: &GpuDevice,
        table: &SlotTable,
        target: &RenderTarget,
    ) -> Result<(), DispatchError> {
        let target_view = target.attached_view()?;

        // Resolve sampler slots to views through the table.
        let mut bind_entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: self.uniform_buf.as_entire_binding(),
        }];
        for (i, &(sampler, assigned)) in self.samplers.iter().enumerate() {
            let slot = assigned.ok_or(DispatchError::UnboundSampler(sampler))?;
            let view = table
                .view(slot)
                .ok_or(DispatchError::EmptySlot { sampler, slot })?;
            bind_entries.push(wgpu::BindGroupEntry {
                binding: (i + 1) as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

        gpu.queue
            .write_buffer(&self.uniform_buf, 0, bytemuck::bytes_of(&self.params));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.name),
            layout: &self.bind_group_layout,
            entries: &bind_entries,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(self.name),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(self.name),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        // Preserve what previous passes wrote; kernels are
                        // written against a persistent framebuffer.
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.quad_vertices.slice(..));
            pass.set_index_buffer(self.quad_indices.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(DispatchError::Backend(err.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_layout_is_48_bytes() {
        // Must match the WGSL struct in common.wgsl exactly.
        assert_eq!(std::mem::size_of::<KernelParams>(), 48);
    }

    #[test]
    fn quad_covers_clip_space() {
        // Two triangles, four corners at the clip-space extremes.
        assert_eq!(QUAD_INDICES, [0, 1, 2, 0, 2, 3]);
        for corner in QUAD_VERTICES.chunks(5) {
            assert!(corner[0].abs() == 1.0 && corner[1].abs() == 1.0);
            assert_eq!(corner[2], 0.0);
        }
    }

    #[test]
    fn builtin_kernel_table() {
        let names: Vec<_> = kernel_names().collect();
        assert_eq!(names, vec!["reduction", "fill", "count", "centroid"]);
    }

    // GPU tests for load/bind/dispatch live in reduce.rs and stage.rs,
    // where they exercise the kernels through the engine.
}
