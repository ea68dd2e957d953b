//! Threshold effect runtime
//!
//! Per-frame orchestration: read the parameter store, mix the last frame's
//! adaptive estimate with the user bias into the effective threshold, run
//! the fullscreen threshold pass, and (in adaptive mode) capture this
//! frame's pixels so the estimator can feed the *next* frame.
//!
//! The one-frame lag is deliberate: frame N renders with the estimate
//! derived from frame N-1's content, never its own.

use bytemuck::{Pod, Zeroable};

use crate::estimator::{self, EstimatorMethod};
use crate::params::ParameterStore;
use crate::readback::PixelReadback;

/// Uniform block handed to `shaders/threshold.wgsl`. Layout matches the
/// WGSL struct: two floats, two bool flags as u32, then two vec4 colors.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ThresholdUniforms {
    pub threshold: f32,
    pub smoothness: f32,
    pub two_tone: u32,
    pub chroma: u32,
    pub color1: [f32; 4],
    pub color2: [f32; 4],
}

impl ThresholdUniforms {
    /// Resolve the store plus the effective threshold into shader uniforms.
    pub fn new(effective_threshold: f32, params: &ParameterStore) -> Self {
        Self {
            threshold: effective_threshold,
            smoothness: params.smoothness(),
            two_tone: params.two_tone() as u32,
            chroma: params.chroma() as u32,
            color1: params.color1(),
            color2: params.color2(),
        }
    }
}

/// The adaptive-threshold carry-over: the single scalar of cross-frame
/// state the effect owns besides the parameter store.
///
/// Lifecycle is strict init-then-mutate-every-frame: starts at 0.0 when the
/// instance is created, then [`ingest_frame`](Self::ingest_frame) replaces
/// it once per adaptive frame. Frame failures leave it untouched so the
/// next valid frame picks up where the last good one left off.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdaptiveState {
    auto_threshold: f32,
}

impl AdaptiveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The estimate carried over from the last ingested frame.
    pub fn auto_threshold(&self) -> f32 {
        self.auto_threshold
    }

    /// The threshold the compositor uses this frame.
    ///
    /// Adaptive mode scales the carried estimate by twice the user bias
    /// (so bias 0.5 is neutral) and clamps to [0, 1]; manual mode passes
    /// the user value through verbatim.
    pub fn effective_threshold(&self, params: &ParameterStore) -> f32 {
        if params.auto() {
            (self.auto_threshold * params.user_threshold() * 2.0).clamp(0.0, 1.0)
        } else {
            params.user_threshold()
        }
    }

    /// Run the estimator over a captured frame and store the result as the
    /// basis for the *next* frame's effective threshold.
    pub fn ingest_frame(
        &mut self,
        method: EstimatorMethod,
        rgba: &[u8],
        width: usize,
        height: usize,
    ) {
        self.auto_threshold = estimator::estimate(method, rgba, width, height);
    }
}

/// The complete effect instance: parameters, adaptive state, and the GPU
/// pipeline that runs the per-pixel transform.
pub struct ThresholdEffect {
    params: ParameterStore,
    method: EstimatorMethod,
    adaptive: AdaptiveState,
    last_effective: f32,

    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    readback: Option<PixelReadback>,
}

impl ThresholdEffect {
    /// Build the render pipeline targeting `output_format`.
    pub fn new(device: &wgpu::Device, output_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Threshold Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/threshold.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Threshold Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Threshold Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Threshold Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
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

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Threshold Uniform Buffer"),
            size: std::mem::size_of::<ThresholdUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Threshold Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            params: ParameterStore::new(),
            method: EstimatorMethod::default(),
            adaptive: AdaptiveState::new(),
            last_effective: 0.0,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            sampler,
            readback: None,
        }
    }

    /// The host-facing parameter store.
    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    /// Mutable access for the host boundary (indexed set calls).
    pub fn params_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }

    /// Which estimation algorithm runs in adaptive mode.
    pub fn estimator_method(&self) -> EstimatorMethod {
        self.method
    }

    pub fn set_estimator_method(&mut self, method: EstimatorMethod) {
        if method != self.method {
            log::info!("estimator method: {}", method.name());
            self.method = method;
        }
    }

    /// The adaptive estimate carried over from the previous frame.
    pub fn auto_threshold(&self) -> f32 {
        self.adaptive.auto_threshold()
    }

    /// The effective threshold used by the most recent frame (UI display).
    pub fn last_effective_threshold(&self) -> f32 {
        self.last_effective
    }

    /// Process one frame.
    ///
    /// `input` must carry `TEXTURE_BINDING`, and `COPY_SRC` if adaptive
    /// mode is ever enabled. The output is written to `output_view`.
    ///
    /// Order per the frame contract: resolve last frame's capture into a
    /// fresh estimate, compute the effective threshold, render, then
    /// capture this frame's pixels for the next estimate. Failures return
    /// an error for this frame only and leave the adaptive state unchanged.
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::Texture,
        input_view: &wgpu::TextureView,
        output_view: &wgpu::TextureView,
    ) -> Result<(), String> {
        let size = input.size();
        if size.width == 0 || size.height == 0 {
            return Err("input image is missing or zero-size".to_string());
        }

        // Consume the previous frame's capture, if any.
        if self.params.auto() {
            if let Some(readback) = &mut self.readback {
                if readback.has_pending() {
                    match readback.resolve(device) {
                        Ok(frame) => {
                            self.adaptive.ingest_frame(
                                self.method,
                                &frame.data,
                                frame.width as usize,
                                frame.height as usize,
                            );
                            log::trace!(
                                "adaptive threshold {:.3} ({})",
                                self.adaptive.auto_threshold(),
                                self.method.name()
                            );
                        }
                        Err(e) => {
                            // Keep the previous estimate rather than skip
                            // this frame.
                            log::warn!("readback resolve failed: {}", e);
                        }
                    }
                }
            }
        }

        let effective = self.adaptive.effective_threshold(&self.params);
        self.last_effective = effective;

        let uniforms = ThresholdUniforms::new(effective, &self.params);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Threshold Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Threshold Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        // Capture this frame's pixels as the basis for the next frame's
        // estimate. A capture failure is not a frame failure; the previous
        // estimate simply stays in effect.
        if self.params.auto() {
            let readback = self
                .readback
                .get_or_insert_with(|| PixelReadback::new(device, size.width, size.height));
            if let Err(e) = readback.capture(device, queue, input) {
                log::warn!("readback capture failed: {}", e);
            }
        }

        Ok(())
    }
}
