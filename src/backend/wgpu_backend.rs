//! `wgpu` render backend.
//!
//! Every backend call is recorded into one command encoder per frame and
//! submitted in [`end_frame`](RenderBackend::end_frame). Quad draws run the
//! built-in full-screen filter shader (`filter.wgsl`); scene draws are
//! batched between `begin_scene` and `end_scene` and handed to a host
//! [`SceneRenderer`], since mesh storage belongs to the host.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use refract::{PipelineConfig, Renderer, WgpuBackend};
//!
//! # fn demo(window: Arc<winit::window::Window>) -> refract::Result<()> {
//! let backend = WgpuBackend::new(window)?;
//! let mut renderer = Renderer::new(backend, PipelineConfig::new().bloom(true))?;
//! renderer.render()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::backend::RenderBackend;
use crate::error::{PipelineError, Result};
use crate::gpu::GpuContext;
use crate::render_graph::{RenderTarget, SSAO_BIAS, SSAO_RADIUS, TargetDescriptor};
use crate::scene::{MeshId, Scene, SceneObject};
use crate::shading::{
    AttributeChannel, Color, ScreenQuad, ShaderKind, ShaderParam, TextureHandle,
};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Uniforms of `filter.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct FilterUniforms {
    resolution: [f32; 2],
    second_intensity: f32,
    gamma: f32,
    alpha: f32,
    ssao_radius: f32,
    ssao_bias: f32,
    filter_kind: u32,
    combine_kind: u32,
    antialias: u32,
    flip_y: u32,
    mode: u32,
}

/// Parameters pushed since the last `use_shader`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct ParamState {
    texture: Option<TextureHandle>,
    second_texture: Option<TextureHandle>,
    shadow_map: Option<TextureHandle>,
    depth_map: Option<TextureHandle>,
    normal_map: Option<TextureHandle>,
    filter: u32,
    combine: u32,
    second_intensity: f32,
    resolution: [f32; 2],
    gamma: f32,
    antialias: bool,
    alpha: f32,
    channel: AttributeChannel,
    ssao_radius: f32,
    ssao_bias: f32,
    shadow_intensity: f32,
    flip_y: bool,
}

impl Default for ParamState {
    fn default() -> Self {
        Self {
            texture: None,
            second_texture: None,
            shadow_map: None,
            depth_map: None,
            normal_map: None,
            filter: 0,
            combine: 0,
            second_intensity: 1.0,
            resolution: [1.0, 1.0],
            gamma: 1.0,
            antialias: false,
            alpha: 1.0,
            channel: AttributeChannel::Depth,
            ssao_radius: SSAO_RADIUS,
            ssao_bias: SSAO_BIAS,
            shadow_intensity: 0.0,
            flip_y: false,
        }
    }
}

impl ParamState {
    fn apply(&mut self, param: ShaderParam) {
        match param {
            ShaderParam::Texture(t) => self.texture = t,
            ShaderParam::SecondTexture(t) => self.second_texture = t,
            ShaderParam::ShadowMap(t) => self.shadow_map = t,
            ShaderParam::DepthMap(t) => self.depth_map = t,
            ShaderParam::NormalMap(t) => self.normal_map = t,
            ShaderParam::Filter(f) => self.filter = f.code(),
            ShaderParam::Combine(c) => self.combine = c.code(),
            ShaderParam::SecondIntensity(v) => self.second_intensity = v,
            ShaderParam::Resolution(r) => self.resolution = r,
            ShaderParam::Gamma(g) => self.gamma = g,
            ShaderParam::Antialias(on) => self.antialias = on,
            ShaderParam::Alpha(a) => self.alpha = a,
            ShaderParam::AttributeChannel(c) => self.channel = c,
            ShaderParam::SsaoRadius(r) => self.ssao_radius = r,
            ShaderParam::SsaoBias(b) => self.ssao_bias = b,
            ShaderParam::ShadowIntensity(i) => self.shadow_intensity = i,
            ShaderParam::FlipY(on) => self.flip_y = on,
        }
    }

    /// Textures sampled by the quad shader: the image inputs, or the
    /// depth/normal maps in SSAO mode.
    fn quad_inputs(&self, ssao: bool) -> (Option<TextureHandle>, Option<TextureHandle>) {
        if ssao {
            (self.depth_map, self.normal_map)
        } else {
            (self.texture, self.second_texture)
        }
    }

    fn uniforms(&self, ssao: bool) -> FilterUniforms {
        FilterUniforms {
            resolution: self.resolution,
            second_intensity: self.second_intensity,
            gamma: self.gamma,
            alpha: self.alpha,
            ssao_radius: self.ssao_radius,
            ssao_bias: self.ssao_bias,
            filter_kind: self.filter,
            combine_kind: self.combine,
            antialias: self.antialias as u32,
            flip_y: self.flip_y as u32,
            mode: ssao as u32,
        }
    }
}

/// One mesh draw collected inside a scene bracket.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneDraw {
    pub mesh: MeshId,
    /// Name of the object the mesh belongs to.
    pub object: String,
    /// World transform, parents applied.
    pub transform: Mat4,
}

/// Everything a [`SceneRenderer`] needs to draw one scene pass.
pub struct SceneBatch<'a> {
    /// [`ShaderKind::Standard`], [`ShaderKind::ShadowMap`] or
    /// [`ShaderKind::Attribute`].
    pub shader: ShaderKind,
    pub view_projection: Mat4,
    pub camera_position: Vec3,
    pub light_view_projection: Mat4,
    pub light_direction: Vec3,
    pub light_intensity: f32,
    /// Which attribute to write when `shader` is [`ShaderKind::Attribute`].
    pub attribute: AttributeChannel,
    /// Blurred shadow map to sample, for the standard shader.
    pub shadow_map: Option<&'a wgpu::TextureView>,
    pub shadow_intensity: f32,
    pub color_format: wgpu::TextureFormat,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub draws: &'a [SceneDraw],
}

/// Host hook that owns mesh buffers and draws scene batches.
pub trait SceneRenderer {
    /// Records the draws of `batch` into `pass`. The pass already targets
    /// the right color and depth attachments with the viewport set.
    fn draw(&mut self, gpu: &GpuContext, pass: &mut wgpu::RenderPass<'_>, batch: &SceneBatch<'_>);
}

/// A texture plus its default view.
struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl GpuTexture {
    fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    fn from_texture(texture: wgpu::Texture) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// The full-screen filter program, with and without alpha blending.
struct FilterPipeline {
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    replace: wgpu::RenderPipeline,
    blend: wgpu::RenderPipeline,
}

impl FilterPipeline {
    fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Filter Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("filter.wgsl").into()),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Filter Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Filter Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Filter Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let build = |label: &str, blend: wgpu::BlendState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(blend),
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
        };

        Self {
            replace: build("Filter Pipeline", wgpu::BlendState::REPLACE),
            blend: build("Screen Pipeline", wgpu::BlendState::ALPHA_BLENDING),
            bind_group_layout,
            sampler,
        }
    }

    fn bind_group(
        &self,
        device: &wgpu::Device,
        uniforms: &wgpu::Buffer,
        tex1: &wgpu::TextureView,
        tex2: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Filter Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(tex1),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(tex2),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

/// A frame being recorded.
struct Frame {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
    /// The surface gets cleared by the first pass that touches it.
    surface_cleared: bool,
}

/// An offscreen target bound with `use_target`.
struct Bound {
    color: TextureHandle,
    depth: Option<TextureHandle>,
    size: (u32, u32),
}

/// Camera, light and collected draws of an open scene bracket.
struct SceneFrame {
    view_projection: Mat4,
    camera_position: Vec3,
    light_view_projection: Mat4,
    light_direction: Vec3,
    light_intensity: f32,
    transforms: Vec<Mat4>,
    objects: Vec<String>,
    draws: Vec<SceneDraw>,
}

/// Renders the pipeline through `wgpu` into a window surface.
pub struct WgpuBackend {
    gpu: GpuContext,
    filter: FilterPipeline,
    textures: HashMap<TextureHandle, GpuTexture>,
    next_handle: u64,
    /// 1x1 white texture bound in place of missing inputs.
    fallback: TextureHandle,
    surface_depth: GpuTexture,
    frame: Option<Frame>,
    bound: Vec<Bound>,
    shader: Option<ShaderKind>,
    params: ParamState,
    viewport: (u32, u32),
    scene: Option<SceneFrame>,
    scene_renderer: Option<Box<dyn SceneRenderer>>,
}

impl WgpuBackend {
    /// Creates the GPU context for `window` and the built-in pipelines.
    pub fn new(window: Arc<Window>) -> Result<Self> {
        Ok(Self::from_context(GpuContext::new(window)?))
    }

    pub fn from_context(gpu: GpuContext) -> Self {
        let filter = FilterPipeline::new(&gpu.device, gpu.config.format);
        let surface_depth = Self::surface_depth(&gpu);
        let mut backend = Self {
            gpu,
            filter,
            textures: HashMap::new(),
            next_handle: 0,
            fallback: TextureHandle(0),
            surface_depth,
            frame: None,
            bound: Vec::new(),
            shader: None,
            params: ParamState::default(),
            viewport: (1, 1),
            scene: None,
            scene_renderer: None,
        };
        backend.fallback = backend.upload_rgba(&[255; 4], 1, 1, "Fallback Texture");
        backend.viewport = backend.surface_size();
        backend
    }

    /// Installs the host hook that draws scene meshes.
    pub fn with_scene_renderer(mut self, renderer: impl SceneRenderer + 'static) -> Self {
        self.scene_renderer = Some(Box::new(renderer));
        self
    }

    pub fn set_scene_renderer(&mut self, renderer: Box<dyn SceneRenderer>) {
        self.scene_renderer = Some(renderer);
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Makes an externally created texture usable as a node input or scene
    /// background. It must have `TEXTURE_BINDING` usage.
    pub fn register_texture(&mut self, texture: wgpu::Texture) -> TextureHandle {
        let handle = self.alloc();
        self.textures.insert(handle, GpuTexture::from_texture(texture));
        handle
    }

    /// Uploads raw RGBA8 pixels as an sRGB texture.
    pub fn upload_rgba(&mut self, data: &[u8], width: u32, height: u32, label: &str) -> TextureHandle {
        let texture = self.gpu.device.create_texture_with_data(
            &self.gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );
        self.register_texture(texture)
    }

    /// Drops a texture added with [`register_texture`](Self::register_texture)
    /// or [`upload_rgba`](Self::upload_rgba).
    pub fn release_texture(&mut self, handle: TextureHandle) {
        if handle == self.fallback {
            return;
        }
        if let Some(tex) = self.textures.remove(&handle) {
            tex.texture.destroy();
        }
    }

    fn alloc(&mut self) -> TextureHandle {
        self.next_handle += 1;
        TextureHandle(self.next_handle)
    }

    fn surface_depth(gpu: &GpuContext) -> GpuTexture {
        GpuTexture::new(
            &gpu.device,
            "Surface Depth",
            gpu.width(),
            gpu.height(),
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        )
    }

    fn view_or_fallback(&self, handle: Option<TextureHandle>) -> &wgpu::TextureView {
        handle
            .and_then(|h| self.textures.get(&h))
            .or_else(|| self.textures.get(&self.fallback))
            .map(|t| &t.view)
            .unwrap_or(&self.surface_depth.view)
    }
}

/// Color and depth views plus the size of the current drawing area.
fn current_views<'a>(
    textures: &'a HashMap<TextureHandle, GpuTexture>,
    bound: &[Bound],
    surface: &'a wgpu::TextureView,
    surface_depth: &'a GpuTexture,
) -> Option<(&'a wgpu::TextureView, Option<&'a wgpu::TextureView>, (u32, u32))> {
    match bound.last() {
        Some(b) => {
            let color = &textures.get(&b.color)?.view;
            let depth = b.depth.and_then(|d| textures.get(&d)).map(|t| &t.view);
            Some((color, depth, b.size))
        }
        None => {
            let size = surface_depth.texture.size();
            Some((surface, Some(&surface_depth.view), (size.width, size.height)))
        }
    }
}

/// Load ops for the next pass: the surface is cleared the first time it is
/// drawn to in a frame, everything else keeps its contents.
fn first_use_loads(
    frame: &mut Frame,
    on_surface: bool,
) -> (wgpu::LoadOp<wgpu::Color>, wgpu::LoadOp<f32>) {
    if on_surface && !frame.surface_cleared {
        frame.surface_cleared = true;
        (wgpu::LoadOp::Clear(wgpu::Color::BLACK), wgpu::LoadOp::Clear(1.0))
    } else {
        (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
    }
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    color: &wgpu::TextureView,
    color_load: wgpu::LoadOp<wgpu::Color>,
    depth: Option<(&wgpu::TextureView, wgpu::LoadOp<f32>)>,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: color,
            resolve_target: None,
            ops: wgpu::Operations {
                load: color_load,
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: depth.map(|(view, load)| {
            wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

/// Intersects a top-left pixel rectangle with a `width` x `height` target.
fn clamp_rect(rect: (f32, f32, f32, f32), width: u32, height: u32) -> Option<(f32, f32, f32, f32)> {
    let (x, y, w, h) = rect;
    let (tw, th) = (width as f32, height as f32);
    let x0 = x.clamp(0.0, tw);
    let y0 = y.clamp(0.0, th);
    let x1 = (x + w).clamp(0.0, tw);
    let y1 = (y + h).clamp(0.0, th);
    (x1 - x0 >= 1.0 && y1 - y0 >= 1.0).then_some((x0, y0, x1 - x0, y1 - y0))
}

impl RenderBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.gpu.width(), self.gpu.height())
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
        self.surface_depth = Self::surface_depth(&self.gpu);
    }

    fn begin_frame(&mut self) -> Result<()> {
        if self.frame.take().is_some() {
            log::warn!("WgpuBackend: previous frame was never ended, dropping it");
        }

        let output = match self.gpu.surface.get_current_texture() {
            Ok(t) => t,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.gpu.reconfigure();
                return Err(PipelineError::Surface("surface lost, reconfigured".into()));
            }
            Err(e) => return Err(PipelineError::Surface(e.to_string())),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pipeline Frame"),
            });

        self.bound.clear();
        self.shader = None;
        self.params = ParamState::default();
        self.viewport = self.surface_size();
        self.frame = Some(Frame {
            output,
            view,
            encoder,
            surface_cleared: false,
        });
        Ok(())
    }

    fn end_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        self.gpu
            .queue
            .submit(std::iter::once(frame.encoder.finish()));
        frame.output.present();
    }

    fn create_target(&mut self, desc: &TargetDescriptor) -> Result<RenderTarget> {
        let max = self.gpu.device.limits().max_texture_dimension_2d;
        let failure = |reason: String| PipelineError::TargetCreation {
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
            reason,
        };
        if desc.width > max || desc.height > max {
            return Err(failure(format!("exceeds max texture dimension {max}")));
        }

        self.gpu
            .device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let color = GpuTexture::new(
            &self.gpu.device,
            &desc.label,
            desc.width,
            desc.height,
            self.gpu.config.format,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let depth = desc.depth.then(|| {
            GpuTexture::new(
                &self.gpu.device,
                &format!("{} depth", desc.label),
                desc.width,
                desc.height,
                DEPTH_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            )
        });
        if let Some(err) = pollster::block_on(self.gpu.device.pop_error_scope()) {
            return Err(failure(err.to_string()));
        }

        log::trace!(
            "WgpuBackend: created target {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        let color_handle = self.alloc();
        self.textures.insert(color_handle, color);
        let depth_handle = depth.map(|d| {
            let handle = self.alloc();
            self.textures.insert(handle, d);
            handle
        });
        Ok(RenderTarget::from_parts(desc, color_handle, depth_handle))
    }

    fn destroy_target(&mut self, target: RenderTarget) {
        log::trace!("WgpuBackend: destroying target {:?}", target.label());
        for handle in std::iter::once(target.texture()).chain(target.depth_texture()) {
            if let Some(tex) = self.textures.remove(&handle) {
                tex.texture.destroy();
            }
        }
    }

    fn use_target(&mut self, target: &RenderTarget) {
        self.bound.push(Bound {
            color: target.texture(),
            depth: target.depth_texture(),
            size: target.size(),
        });
        if target.clears_on_use() {
            self.clear(Color::TRANSPARENT);
        }
    }

    fn disuse_target(&mut self, target: &RenderTarget) {
        if let Some(pos) = self.bound.iter().rposition(|b| b.color == target.texture()) {
            self.bound.remove(pos);
        }
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width.max(1), height.max(1));
    }

    fn clear(&mut self, color: Color) {
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        if self.bound.is_empty() {
            frame.surface_cleared = true;
        }
        let Some((view, depth, _)) =
            current_views(&self.textures, &self.bound, &frame.view, &self.surface_depth)
        else {
            return;
        };
        let _pass = begin_pass(
            &mut frame.encoder,
            "Clear Pass",
            view,
            wgpu::LoadOp::Clear(color.into()),
            depth.map(|d| (d, wgpu::LoadOp::Clear(1.0))),
        );
    }

    fn use_shader(&mut self, shader: ShaderKind) {
        self.shader = Some(shader);
        self.params = ParamState::default();
    }

    fn disuse_shader(&mut self) {
        self.shader = None;
    }

    fn set_param(&mut self, param: ShaderParam) {
        self.params.apply(param);
    }

    fn begin_scene(&mut self, scene: &Scene) {
        let (w, h) = self.viewport;
        self.scene = Some(SceneFrame {
            view_projection: scene.camera.view_projection(w as f32 / h as f32),
            camera_position: scene.camera.position,
            light_view_projection: scene.light.view_projection(),
            light_direction: scene.light.direction(),
            light_intensity: scene.light.intensity,
            transforms: vec![Mat4::IDENTITY],
            objects: Vec::new(),
            draws: Vec::new(),
        });
    }

    fn begin_object(&mut self, object: &SceneObject) {
        if let Some(scene) = self.scene.as_mut() {
            let parent = scene.transforms.last().copied().unwrap_or(Mat4::IDENTITY);
            scene.transforms.push(parent * object.transform);
            scene.objects.push(object.name.clone());
        }
    }

    fn draw_mesh(&mut self, mesh: MeshId) {
        if let Some(scene) = self.scene.as_mut() {
            scene.draws.push(SceneDraw {
                mesh,
                object: scene.objects.last().cloned().unwrap_or_default(),
                transform: scene.transforms.last().copied().unwrap_or(Mat4::IDENTITY),
            });
        }
    }

    fn end_object(&mut self, _object: &SceneObject) {
        if let Some(scene) = self.scene.as_mut() {
            scene.transforms.pop();
            scene.objects.pop();
        }
    }

    fn end_scene(&mut self, _scene: &Scene) {
        let Some(collected) = self.scene.take() else {
            return;
        };
        let Some(shader) = self
            .shader
            .filter(|s| matches!(s, ShaderKind::Standard | ShaderKind::ShadowMap | ShaderKind::Attribute))
        else {
            return;
        };
        if collected.draws.is_empty() {
            return;
        }
        let Some(renderer) = self.scene_renderer.as_mut() else {
            log::trace!("WgpuBackend: no scene renderer, {} draws dropped", collected.draws.len());
            return;
        };
        let Some(frame) = self.frame.as_mut() else {
            return;
        };

        let (color_load, depth_load) = first_use_loads(frame, self.bound.is_empty());
        let Some((color, depth, size)) =
            current_views(&self.textures, &self.bound, &frame.view, &self.surface_depth)
        else {
            return;
        };
        let shadow_map = self
            .params
            .shadow_map
            .and_then(|h| self.textures.get(&h))
            .map(|t| &t.view);
        let batch = SceneBatch {
            shader,
            view_projection: collected.view_projection,
            camera_position: collected.camera_position,
            light_view_projection: collected.light_view_projection,
            light_direction: collected.light_direction,
            light_intensity: collected.light_intensity,
            attribute: self.params.channel,
            shadow_map,
            shadow_intensity: self.params.shadow_intensity,
            color_format: self.gpu.config.format,
            depth_format: depth.map(|_| DEPTH_FORMAT),
            draws: &collected.draws,
        };

        let mut pass = begin_pass(
            &mut frame.encoder,
            "Scene Pass",
            color,
            color_load,
            depth.map(|d| (d, depth_load)),
        );
        let (w, h) = (self.viewport.0.min(size.0), self.viewport.1.min(size.1));
        pass.set_viewport(0.0, 0.0, w as f32, h as f32, 0.0, 1.0);
        renderer.draw(&self.gpu, &mut pass, &batch);
    }

    fn draw_quad(&mut self, quad: ScreenQuad) {
        let ssao = match self.shader {
            Some(ShaderKind::Image | ShaderKind::Screen) => false,
            Some(ShaderKind::Ssao) => true,
            other => {
                log::trace!("WgpuBackend: quad draw with {other:?} ignored");
                return;
            }
        };
        if self.frame.is_none() {
            return;
        }

        let (tex1, tex2) = self.params.quad_inputs(ssao);
        let uniforms = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Filter Uniforms"),
                contents: bytemuck::bytes_of(&self.params.uniforms(ssao)),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.filter.bind_group(
            &self.gpu.device,
            &uniforms,
            self.view_or_fallback(tex1),
            self.view_or_fallback(tex2),
        );
        let pipeline = if self.shader == Some(ShaderKind::Screen) {
            &self.filter.blend
        } else {
            &self.filter.replace
        };

        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        let (color_load, _) = first_use_loads(frame, self.bound.is_empty());
        let Some((color, _, (tw, th))) =
            current_views(&self.textures, &self.bound, &frame.view, &self.surface_depth)
        else {
            return;
        };
        let (vw, vh) = self.viewport;
        let Some((x, y, w, h)) = clamp_rect(quad.to_pixels(vw.min(tw), vh.min(th)), tw, th) else {
            return;
        };

        let mut pass = begin_pass(&mut frame.encoder, "Filter Pass", color, color_load, None);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_viewport(x, y, w, h, 0.0, 1.0);
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shading::{CombineKind, FilterKind};

    #[test]
    fn uniforms_match_shader_layout() {
        assert_eq!(std::mem::size_of::<FilterUniforms>(), 48);
    }

    #[test]
    fn params_reach_uniforms() {
        let mut params = ParamState::default();
        for p in [
            ShaderParam::Filter(FilterKind::GaussBlurVertical),
            ShaderParam::Combine(CombineKind::Darken),
            ShaderParam::SecondIntensity(0.2),
            ShaderParam::Gamma(2.0),
            ShaderParam::Antialias(true),
            ShaderParam::FlipY(true),
        ] {
            params.apply(p);
        }
        let u = params.uniforms(false);
        assert_eq!(u.filter_kind, 3);
        assert_eq!(u.combine_kind, 4);
        assert_eq!(u.second_intensity, 0.2);
        assert_eq!(u.gamma, 2.0);
        assert_eq!(u.antialias, 1);
        assert_eq!(u.flip_y, 1);
        assert_eq!(u.mode, 0);
        assert_eq!(params.uniforms(true).mode, 1);
    }

    #[test]
    fn ssao_samples_attribute_maps() {
        let mut params = ParamState::default();
        params.apply(ShaderParam::Texture(Some(TextureHandle(1))));
        params.apply(ShaderParam::DepthMap(Some(TextureHandle(2))));
        params.apply(ShaderParam::NormalMap(Some(TextureHandle(3))));
        assert_eq!(
            params.quad_inputs(true),
            (Some(TextureHandle(2)), Some(TextureHandle(3)))
        );
        assert_eq!(params.quad_inputs(false), (Some(TextureHandle(1)), None));
        assert_eq!(params.uniforms(true).ssao_radius, SSAO_RADIUS);
    }

    #[test]
    fn quads_are_clipped_to_the_target() {
        let full = ScreenQuad::FULL.to_pixels(100, 50);
        assert_eq!(clamp_rect(full, 100, 50), Some((0.0, 0.0, 100.0, 50.0)));

        let overhang = (80.0, 40.0, 50.0, 50.0);
        assert_eq!(clamp_rect(overhang, 100, 50), Some((80.0, 40.0, 20.0, 10.0)));

        assert_eq!(clamp_rect((120.0, 0.0, 10.0, 10.0), 100, 50), None);
    }
}
