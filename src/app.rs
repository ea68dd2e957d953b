//! Application state holding the wgpu graphics context
//!
//! Owns the device, queue, surface, the frame source, and the threshold
//! effect instance, and drives the per-frame pipeline: upload the source
//! frame, run (or bypass) the effect into the output texture, present the
//! output to the window, draw the egui control panel on top.

use std::sync::Arc;
use std::time::Instant;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::effect::ThresholdEffect;
use crate::estimator::EstimatorMethod;
use crate::params::ParamIndex;
use crate::source::FrameSource;

/// Main application state
pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,

    // Input side
    source: FrameSource,
    input_texture: wgpu::Texture,
    input_texture_view: wgpu::TextureView,

    // The effect and its output
    effect: ThresholdEffect,
    effect_enabled: bool,
    output_texture_view: wgpu::TextureView,

    // Passthrough pipelines: one presents the output texture to the window,
    // the other copies input to output directly when the effect is bypassed.
    passthrough_pipeline: wgpu::RenderPipeline,
    bypass_pipeline: wgpu::RenderPipeline,
    input_bind_group: wgpu::BindGroup,
    output_bind_group: wgpu::BindGroup,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    // Frame timing
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Create a new App with an initialized wgpu context, rendering frames
    /// from `source`.
    pub async fn new(window: Arc<Window>, source: FrameSource) -> Self {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .expect("Failed to create surface");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("Failed to find suitable GPU adapter");

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Threshold Effect Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .expect("Failed to create device");

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        log::info!("Surface format: {:?}", surface_format);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let frame_width = source.width();
        let frame_height = source.height();

        // Input texture: sampled by the effect, written from the CPU each
        // frame, and copied back out for the adaptive estimator.
        let input_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Input Texture"),
            size: wgpu::Extent3d {
                width: frame_width,
                height: frame_height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let input_texture_view = input_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let output_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Output Texture"),
            size: wgpu::Extent3d {
                width: frame_width,
                height: frame_height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let output_texture_view =
            output_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let passthrough_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Passthrough Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/passthrough.wgsl").into()),
        });

        let passthrough_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Passthrough Bind Group Layout"),
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
                ],
            });

        let passthrough_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Passthrough Pipeline Layout"),
                bind_group_layouts: &[&passthrough_bind_group_layout],
                push_constant_ranges: &[],
            });

        // The present pass targets the surface format, the bypass pass the
        // output texture's format.
        let passthrough_pipeline = Self::make_passthrough_pipeline(
            &device,
            &passthrough_pipeline_layout,
            &passthrough_shader,
            surface_format,
        );
        let bypass_pipeline = Self::make_passthrough_pipeline(
            &device,
            &passthrough_pipeline_layout,
            &passthrough_shader,
            wgpu::TextureFormat::Rgba8Unorm,
        );

        let input_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Input Bind Group"),
            layout: &passthrough_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let output_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Output Bind Group"),
            layout: &passthrough_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&output_texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let effect = ThresholdEffect::new(&device, wgpu::TextureFormat::Rgba8Unorm);

        // Initialize egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let now = Instant::now();

        Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            source,
            input_texture,
            input_texture_view,
            effect,
            effect_enabled: true,
            output_texture_view,
            passthrough_pipeline,
            bypass_pipeline,
            input_bind_group,
            output_bind_group,
            egui_ctx,
            egui_state,
            egui_renderer,
            fps: 60.0,
            last_fps_update: now,
            frames_since_update: 0,
        }
    }

    fn make_passthrough_pipeline(
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        shader: &wgpu::ShaderModule,
        format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Passthrough Pipeline"),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
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
        })
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Get current size
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Toggle the effect on/off
    pub fn toggle_effect(&mut self) {
        self.effect_enabled = !self.effect_enabled;
        log::info!("Effect enabled: {}", self.effect_enabled);
    }

    /// Pull the next source frame and upload it to the input texture.
    pub fn update_source(&mut self) {
        let frame = self.source.next_frame();
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.input_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Render a frame
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        if self.effect_enabled {
            if let Err(e) = self.effect.render(
                &self.device,
                &self.queue,
                &mut encoder,
                &self.input_texture,
                &self.input_texture_view,
                &self.output_texture_view,
            ) {
                log::warn!("effect frame skipped: {}", e);
            }
        } else {
            // Bypass: copy the input straight to the output texture.
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Bypass Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.output_texture_view,
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
            render_pass.set_pipeline(&self.bypass_pipeline);
            render_pass.set_bind_group(0, &self.input_bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        // Present the output texture to the window.
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
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
            render_pass.set_pipeline(&self.passthrough_pipeline);
            render_pass.set_bind_group(0, &self.output_bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.update_fps();

        Ok(())
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        // Copy UI state out so the egui closure doesn't borrow self.
        let fps = self.fps;
        let effect_enabled = self.effect_enabled;
        let params = self.effect.params();
        let mut threshold = params.user_threshold();
        let mut smoothness = params.smoothness();
        let mut auto = params.auto();
        let mut two_tone = params.two_tone();
        let mut chroma = params.chroma();
        let mut color1 = params.color1();
        let mut color2 = params.color2();
        let mut method = self.effect.estimator_method();
        let auto_estimate = self.effect.auto_threshold();
        let effective = self.effect.last_effective_threshold();
        let mut toggle_effect = false;

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::SidePanel::left("controls").show(ctx, |ui| {
                ui.heading("Auto Threshold");
                ui.label(format!("FPS: {:.1}", fps));
                if ui
                    .button(if effect_enabled { "Bypass" } else { "Enable" })
                    .clicked()
                {
                    toggle_effect = true;
                }
                ui.separator();

                ui.add(egui::Slider::new(&mut threshold, 0.0..=1.0).text("Threshold"));
                ui.add(egui::Slider::new(&mut smoothness, 0.0..=1.0).text("Smoothness"));

                ui.separator();
                ui.checkbox(&mut auto, "Auto threshold");
                if auto {
                    ui.label(format!("Estimate: {:.3}", auto_estimate));
                    ui.label(format!("Effective: {:.3}", effective));
                    ui.label("Method:");
                    ui.horizontal(|ui| {
                        for m in [
                            EstimatorMethod::Gradient,
                            EstimatorMethod::Entropy,
                            EstimatorMethod::Otsu,
                        ] {
                            if ui.selectable_label(method == m, m.name()).clicked() {
                                method = m;
                            }
                        }
                    });
                }

                ui.separator();
                ui.checkbox(&mut two_tone, "Two-tone");
                ui.checkbox(&mut chroma, "Keep chroma");
                if two_tone && chroma {
                    ui.label("Both set: plain black/white");
                }

                ui.separator();
                ui.horizontal(|ui| {
                    ui.label("Dark color:");
                    color_edit(ui, &mut color1);
                });
                ui.horizontal(|ui| {
                    ui.label("Light color:");
                    color_edit(ui, &mut color2);
                });
            });
        });

        // Apply UI changes back through the indexed host boundary.
        if toggle_effect {
            self.toggle_effect();
        }
        self.effect.set_estimator_method(method);
        let store = self.effect.params_mut();
        let updates = [
            (ParamIndex::Threshold, threshold),
            (ParamIndex::Smoothness, smoothness),
            (ParamIndex::Auto, auto as u32 as f32),
            (ParamIndex::TwoTone, two_tone as u32 as f32),
            (ParamIndex::Chroma, chroma as u32 as f32),
            (ParamIndex::Red1, color1[0]),
            (ParamIndex::Grn1, color1[1]),
            (ParamIndex::Blu1, color1[2]),
            (ParamIndex::Alf1, color1[3]),
            (ParamIndex::Red2, color2[0]),
            (ParamIndex::Grn2, color2[1]),
            (ParamIndex::Blu2, color2[2]),
            (ParamIndex::Alf2, color2[3]),
        ];
        for (index, value) in updates {
            if let Err(e) = store.set(index as usize, value) {
                log::error!("parameter update failed: {}", e);
            }
        }

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let render_pass_static: &mut wgpu::RenderPass<'static> =
                unsafe { std::mem::transmute(&mut render_pass) };

            self.egui_renderer
                .render(render_pass_static, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }

    fn update_fps(&mut self) {
        self.frames_since_update += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}

fn color_edit(ui: &mut egui::Ui, rgba: &mut [f32; 4]) {
    let mut color = egui::Color32::from_rgba_unmultiplied(
        (rgba[0] * 255.0) as u8,
        (rgba[1] * 255.0) as u8,
        (rgba[2] * 255.0) as u8,
        (rgba[3] * 255.0) as u8,
    );
    if ui.color_edit_button_srgba(&mut color).changed() {
        *rgba = [
            color.r() as f32 / 255.0,
            color.g() as f32 / 255.0,
            color.b() as f32 / 255.0,
            color.a() as f32 / 255.0,
        ];
    }
}
