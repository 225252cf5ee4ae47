#![forbid(unsafe_code)]

//! WebGPU renderer for the grid.
//!
//! Two passes per frame:
//! - tile pass: one instanced quad per visible tile into an offscreen colour
//!   target, followed by a second quad carrying the card caption, baked once
//!   per item from a 2D canvas. Per-quad data lives in a storage buffer
//!   indexed by `instance_index`; each quad binds its own texture group.
//! - post pass: a full-screen triangle samples the offscreen target through
//!   the lens warp, film grain and vignette, and writes the swapchain.
//!
//! Byte layouts are platform-agnostic and unit-tested natively; the device
//! code only builds on wasm32.

use std::fmt;

#[cfg(any(target_arch = "wasm32", test))]
use infigrid_core::post_effect::PostParams;
use infigrid_core::render_loop::{FrameParams, TileDraw};

// ---------------------------------------------------------------------------
// Platform-agnostic types (available on all targets for type checking)
// ---------------------------------------------------------------------------

/// Size of one tile instance in bytes (16 × f32 = 64 bytes).
pub const TILE_INSTANCE_BYTES: usize = 64;

/// Size of the frame uniform in bytes (mat4 + 2 × vec2 = 80 bytes).
#[cfg(any(target_arch = "wasm32", test))]
const FRAME_UNIFORM_BYTES: usize = 80;

/// Size of the post uniform in bytes (5 × f32 + padding = 32 bytes).
#[cfg(any(target_arch = "wasm32", test))]
const POST_UNIFORM_BYTES: usize = 32;

/// Initial instance buffer capacity, in tiles.
#[cfg(target_arch = "wasm32")]
const INITIAL_TILE_CAPACITY: usize = 256;

/// Sub-rectangle of an image, in UV space, that fills a tile without
/// stretching ("object-fit: cover").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverUv {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
}

impl CoverUv {
    pub const FULL: Self = Self {
        scale: [1.0, 1.0],
        offset: [0.0, 0.0],
    };
}

/// Crop the longer image axis so its aspect matches the tile's.
#[must_use]
pub fn cover_uv(image: (u32, u32), tile: [f32; 2]) -> CoverUv {
    let (iw, ih) = (image.0 as f32, image.1 as f32);
    let [tw, th] = tile;
    if iw <= 0.0 || ih <= 0.0 || !(tw > 0.0) || !(th > 0.0) {
        return CoverUv::FULL;
    }
    let image_aspect = iw / ih;
    let tile_aspect = tw / th;
    if image_aspect > tile_aspect {
        let sx = tile_aspect / image_aspect;
        CoverUv {
            scale: [sx, 1.0],
            offset: [(1.0 - sx) / 2.0, 0.0],
        }
    } else {
        let sy = image_aspect / tile_aspect;
        CoverUv {
            scale: [1.0, sy],
            offset: [0.0, (1.0 - sy) / 2.0],
        }
    }
}

/// Per-tile data sent to the GPU via a storage buffer.
///
/// Layout matches the WGSL `Tile` struct.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileInstance {
    /// Tile centre in world units, before the pan offset.
    pub center: [f32; 2],
    pub size: [f32; 2],
    /// Image zoom inside the tile (1 = cover).
    pub scale: f32,
    pub alpha: f32,
    pub grayscale: f32,
    pub overlay: f32,
    pub radius: f32,
    pub vignette_intensity: f32,
    pub vignette_power: f32,
    pub uv: CoverUv,
}

impl TileInstance {
    /// Pack one draw. `image_size` is the content's pixel size, if any.
    #[must_use]
    pub fn from_draw<H>(
        draw: &TileDraw<'_, H>,
        frame: &FrameParams,
        image_size: Option<(u32, u32)>,
    ) -> Self {
        let size = [draw.size.x, draw.size.y];
        Self {
            center: [draw.center.x, draw.center.y],
            size,
            scale: draw.visual.scale,
            alpha: draw.visual.alpha,
            grayscale: draw.visual.grayscale,
            overlay: draw.visual.overlay_opacity,
            radius: frame.style.border_radius.min(size[0].min(size[1]) / 2.0),
            vignette_intensity: frame.style.image_vignette_intensity,
            vignette_power: frame.style.image_vignette_power,
            uv: image_size.map_or(CoverUv::FULL, |px| cover_uv(px, size)),
        }
    }

    /// Caption quad for a tile: same rectangle, unzoomed, full colour,
    /// square corners, no vignette. Only the load-in alpha carries over.
    #[must_use]
    pub fn caption_overlay<H>(draw: &TileDraw<'_, H>) -> Self {
        Self {
            center: [draw.center.x, draw.center.y],
            size: [draw.size.x, draw.size.y],
            scale: 1.0,
            alpha: draw.visual.alpha,
            grayscale: 0.0,
            overlay: 0.0,
            radius: 0.0,
            vignette_intensity: 0.0,
            vignette_power: 1.0,
            uv: CoverUv::FULL,
        }
    }

    /// Serialize to 64 little-endian bytes matching the WGSL layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; TILE_INSTANCE_BYTES] {
        let mut buf = [0u8; TILE_INSTANCE_BYTES];
        put_f32s(
            &mut buf,
            &[
                self.center[0],
                self.center[1],
                self.size[0],
                self.size[1],
                self.scale,
                self.alpha,
                self.grayscale,
                self.overlay,
                self.radius,
                self.vignette_intensity,
                self.vignette_power,
                0.0,
                self.uv.scale[0],
                self.uv.scale[1],
                self.uv.offset[0],
                self.uv.offset[1],
            ],
        );
        buf
    }
}

/// Renderer initialization or frame error.
#[derive(Debug, Clone)]
pub enum RendererError {
    /// No suitable GPU adapter found.
    NoAdapter,
    /// Device request failed.
    DeviceError(String),
    /// Surface creation, configuration or presentation failed.
    SurfaceError(String),
    /// The canvas refused the requested context.
    ContextUnavailable,
}

impl fmt::Display for RendererError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no suitable GPU adapter found"),
            Self::DeviceError(msg) => write!(f, "device error: {msg}"),
            Self::SurfaceError(msg) => write!(f, "surface error: {msg}"),
            Self::ContextUnavailable => write!(f, "canvas context unavailable"),
        }
    }
}

impl std::error::Error for RendererError {}

/// Which backend a session is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    WebGpu,
    Canvas2d,
}

impl BackendKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::WebGpu => "webgpu",
            Self::Canvas2d => "canvas2d",
        }
    }
}

// ---------------------------------------------------------------------------
// WGSL shaders
// ---------------------------------------------------------------------------

#[cfg(target_arch = "wasm32")]
const TILE_SHADER_WGSL: &str = r#"
struct Frame {
    projection: mat4x4<f32>,
    offset: vec2<f32>,
    viewport: vec2<f32>,
}

struct Tile {
    center: vec2<f32>,
    size: vec2<f32>,
    // scale, alpha, grayscale, overlay
    look: vec4<f32>,
    // radius, vignette intensity, vignette power, unused
    shape: vec4<f32>,
    uv_scale: vec2<f32>,
    uv_offset: vec2<f32>,
}

@group(0) @binding(0) var<uniform> frame: Frame;
@group(0) @binding(1) var<storage, read> tiles: array<Tile>;
@group(1) @binding(0) var tile_texture: texture_2d<f32>;
@group(1) @binding(1) var tile_sampler: sampler;

// Tiles sit in front of the orthographic camera.
const TILE_DEPTH: f32 = -10.0;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) @interpolate(flat) instance: u32,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> VertexOutput {
    var quad = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 1.0),
    );
    let corner = quad[vertex_index];
    let tile = tiles[instance_index];
    let world = tile.center + frame.offset + (corner - vec2<f32>(0.5)) * tile.size;

    var out: VertexOutput;
    out.position = frame.projection * vec4<f32>(world, TILE_DEPTH, 1.0);
    // World y points up, texture v points down.
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    out.instance = instance_index;
    return out;
}

fn rounded_rect_sdf(p: vec2<f32>, half_size: vec2<f32>, radius: f32) -> f32 {
    return length(max(abs(p) - half_size + radius, vec2<f32>(0.0))) - radius;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let tile = tiles[in.instance];
    let zoom = max(tile.look.x, 0.0001);
    let zoomed = (in.uv - vec2<f32>(0.5)) / zoom + vec2<f32>(0.5);
    let color = textureSample(tile_texture, tile_sampler, tile.uv_offset + zoomed * tile.uv_scale);

    let gray = dot(color.rgb, vec3<f32>(0.299, 0.587, 0.114));
    var rgb = mix(color.rgb, vec3<f32>(gray), tile.look.z);
    rgb = mix(rgb, vec3<f32>(0.0), tile.look.w);

    let d = min(length(in.uv - vec2<f32>(0.5)) * 1.41421356, 1.0);
    rgb = rgb * (1.0 - clamp(tile.shape.y, 0.0, 1.0) * pow(d, max(tile.shape.z, 0.01)));

    let p = (in.uv - vec2<f32>(0.5)) * tile.size;
    let dist = rounded_rect_sdf(p, tile.size * 0.5, tile.shape.x);
    let edge = 1.0 - smoothstep(-1.0, 1.0, dist);
    return vec4<f32>(rgb, color.a * tile.look.y * edge);
}
"#;

#[cfg(target_arch = "wasm32")]
const POST_SHADER_WGSL: &str = r#"
struct Post {
    distortion: f32,
    time: f32,
    noise_intensity: f32,
    vignette_intensity: f32,
    vignette_power: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
}

@group(0) @binding(0) var<uniform> post: Post;
@group(0) @binding(1) var scene: texture_2d<f32>;
@group(0) @binding(2) var scene_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    let p = corners[vertex_index];
    var out: VertexOutput;
    out.position = vec4<f32>(p, 0.0, 1.0);
    out.uv = vec2<f32>(p.x * 0.5 + 0.5, 0.5 - p.y * 0.5);
    return out;
}

fn barrel_pincushion(uv: vec2<f32>, strength: f32) -> vec2<f32> {
    let st = uv - vec2<f32>(0.5);
    let r = 1.0 + strength * dot(st, st);
    return vec2<f32>(0.5) + st * r;
}

fn grain(uv: vec2<f32>, time: f32) -> f32 {
    let p = uv * 1000.0 + vec2<f32>(time);
    let h = fract(sin(dot(p, vec2<f32>(12.9898, 78.233))) * 43758.547);
    return h * 2.0 - 1.0;
}

fn vignette(uv: vec2<f32>, intensity: f32, power: f32) -> f32 {
    let d = min(length(uv - vec2<f32>(0.5)) * 1.41421356, 1.0);
    return 1.0 - clamp(intensity, 0.0, 1.0) * pow(d, max(power, 0.01));
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let uv = barrel_pincushion(in.uv, post.distortion);
    let s = textureSample(scene, scene_sampler, clamp(uv, vec2<f32>(0.0), vec2<f32>(1.0)));
    let n = grain(uv, post.time) * clamp(post.noise_intensity, 0.0, 1.0);
    let v = vignette(uv, post.vignette_intensity, post.vignette_power);
    let c = clamp(s.rgb, vec3<f32>(0.0), vec3<f32>(1.0));
    let headroom = select(c, vec3<f32>(1.0) - c, n >= 0.0);
    return vec4<f32>((c + n * headroom) * v, s.a);
}
"#;

// ---------------------------------------------------------------------------
// GPU implementation (wasm32 only)
// ---------------------------------------------------------------------------

/// Backends that can turn a decoded browser image into a cache handle.
#[cfg(target_arch = "wasm32")]
pub trait ImageUpload: infigrid_core::render_loop::RenderBackend<Error = RendererError> {
    const KIND: BackendKind;

    fn upload(
        &mut self,
        image: &web_sys::HtmlImageElement,
    ) -> Result<Self::Handle, infigrid_core::resource_cache::LoadError>;
}

#[cfg(target_arch = "wasm32")]
mod gpu {
    use super::*;
    use crate::canvas_renderer::bake_caption;
    use infigrid_core::camera::Viewport;
    use infigrid_core::caption::{CaptionLayout, CardCaption};
    use infigrid_core::item::ItemId;
    use infigrid_core::render_loop::RenderBackend;
    use infigrid_core::resource_cache::{
        AddressMode, CachedResource, FilterMode, LoadError, SamplingPolicy,
    };
    use std::collections::HashMap;
    use std::rc::Rc;
    use tracing::{debug, info, warn};
    use web_sys::{HtmlCanvasElement, HtmlImageElement};

    const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    #[derive(Debug)]
    struct GpuImage {
        id: u64,
        view: wgpu::TextureView,
        width: u32,
        height: u32,
        _texture: wgpu::Texture,
    }

    /// Cache handle for an uploaded image. Clones share the texture.
    #[derive(Debug, Clone)]
    pub struct TileTexture {
        image: Rc<GpuImage>,
        sampling: SamplingPolicy,
    }

    impl TileTexture {
        #[must_use]
        pub fn size(&self) -> (u32, u32) {
            (self.image.width, self.image.height)
        }
    }

    impl CachedResource for TileTexture {
        fn configure_sampling(&mut self, policy: SamplingPolicy) {
            self.sampling = policy;
        }
    }

    struct Offscreen {
        _texture: wgpu::Texture,
        view: wgpu::TextureView,
    }

    /// WebGPU renderer owning all GPU resources.
    pub struct WebGpuRenderer {
        canvas: HtmlCanvasElement,
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: wgpu::Surface<'static>,
        surface_config: wgpu::SurfaceConfiguration,
        tile_pipeline: wgpu::RenderPipeline,
        frame_layout: wgpu::BindGroupLayout,
        texture_layout: wgpu::BindGroupLayout,
        frame_uniform: wgpu::Buffer,
        instance_buffer: wgpu::Buffer,
        instance_capacity: usize,
        frame_group: wgpu::BindGroup,
        post_pipeline: wgpu::RenderPipeline,
        post_layout: wgpu::BindGroupLayout,
        post_uniform: wgpu::Buffer,
        post_group: wgpu::BindGroup,
        offscreen: Offscreen,
        scene_sampler: wgpu::Sampler,
        samplers: HashMap<SamplingPolicy, wgpu::Sampler>,
        /// Texture bind groups keyed by image id and sampling policy.
        tile_groups: HashMap<(u64, SamplingPolicy), wgpu::BindGroup>,
        next_image_id: u64,
        /// Baked caption per item of the current build. `None` when the card
        /// has no caption or baking failed, so it is not retried every frame.
        captions: HashMap<ItemId, Option<TileTexture>>,
        /// Pixel ratio the cached captions were baked at.
        caption_ratio: f32,
        /// Scratch buffer reused for instance uploads.
        instance_scratch: Vec<u8>,
    }

    impl WebGpuRenderer {
        /// Whether an adapter can be obtained at all. Checked before a
        /// context is taken from the canvas, since a canvas that handed out a
        /// `webgpu` context can no longer give a `2d` one.
        pub async fn is_available() -> bool {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::BROWSER_WEBGPU,
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_ok()
        }

        /// Initialize the WebGPU renderer on the given canvas.
        pub async fn init(
            canvas: HtmlCanvasElement,
            viewport: &Viewport,
        ) -> Result<Self, RendererError> {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::BROWSER_WEBGPU,
                ..Default::default()
            });

            let surface = instance
                .create_surface(wgpu::SurfaceTarget::Canvas(canvas.clone()))
                .map_err(|e| RendererError::SurfaceError(e.to_string()))?;

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|_| RendererError::NoAdapter)?;

            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("infigrid"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                    ..Default::default()
                })
                .await
                .map_err(|e| RendererError::DeviceError(e.to_string()))?;

            let (pixel_width, pixel_height) = viewport.physical_size();
            canvas.set_width(pixel_width);
            canvas.set_height(pixel_height);

            // Tiles are composited in the offscreen target, so the swapchain
            // must not re-encode to sRGB on write.
            let surface_caps = surface.get_capabilities(&adapter);
            let format = surface_caps
                .formats
                .iter()
                .copied()
                .find(|f| !f.is_srgb())
                .or_else(|| surface_caps.formats.first().copied())
                .unwrap_or(wgpu::TextureFormat::Bgra8Unorm);

            let surface_config = wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format,
                width: pixel_width,
                height: pixel_height,
                present_mode: wgpu::PresentMode::Fifo,
                desired_maximum_frame_latency: 2,
                alpha_mode: surface_caps
                    .alpha_modes
                    .first()
                    .copied()
                    .unwrap_or(wgpu::CompositeAlphaMode::Auto),
                view_formats: vec![],
            };
            surface.configure(&device, &surface_config);

            // Tile pass.
            let tile_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("tile_shader"),
                source: wgpu::ShaderSource::Wgsl(TILE_SHADER_WGSL.into()),
            });

            let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("frame_bgl"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

            let texture_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("tile_texture_bgl"),
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

            let tile_pipeline = create_pipeline(
                &device,
                "tile",
                &tile_shader,
                &[&frame_layout, &texture_layout],
                OFFSCREEN_FORMAT,
                Some(wgpu::BlendState::ALPHA_BLENDING),
            );

            let frame_uniform = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("frame_uniform"),
                size: FRAME_UNIFORM_BYTES as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let instance_buffer = create_instance_buffer(&device, INITIAL_TILE_CAPACITY);
            let frame_group =
                create_frame_group(&device, &frame_layout, &frame_uniform, &instance_buffer);

            // Post pass.
            let post_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("post_shader"),
                source: wgpu::ShaderSource::Wgsl(POST_SHADER_WGSL.into()),
            });
            let post_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("post_bgl"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });
            let post_pipeline =
                create_pipeline(&device, "post", &post_shader, &[&post_layout], format, None);
            let post_uniform = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("post_uniform"),
                size: POST_UNIFORM_BYTES as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let scene_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("scene_sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::MipmapFilterMode::Nearest,
                ..Default::default()
            });
            let offscreen = create_offscreen(&device, pixel_width, pixel_height);
            let post_group = create_post_group(
                &device,
                &post_layout,
                &post_uniform,
                &offscreen.view,
                &scene_sampler,
            );

            info!(
                width = pixel_width,
                height = pixel_height,
                format = ?format,
                "webgpu renderer ready"
            );

            Ok(Self {
                canvas,
                device,
                queue,
                surface,
                surface_config,
                tile_pipeline,
                frame_layout,
                texture_layout,
                frame_uniform,
                instance_buffer,
                instance_capacity: INITIAL_TILE_CAPACITY,
                frame_group,
                post_pipeline,
                post_layout,
                post_uniform,
                post_group,
                offscreen,
                scene_sampler,
                samplers: HashMap::new(),
                tile_groups: HashMap::new(),
                next_image_id: 1,
                captions: HashMap::new(),
                caption_ratio: viewport.pixel_ratio(),
                instance_scratch: Vec::new(),
            })
        }

        /// Copy a browser image source into a fresh sampled texture.
        fn upload_external(
            &mut self,
            source: wgpu::ExternalImageSource,
            width: u32,
            height: u32,
            label: &str,
        ) -> Result<TileTexture, LoadError> {
            if width == 0 || height == 0 {
                return Err(LoadError::Decode("image has no pixels".into()));
            }
            let max = self.device.limits().max_texture_dimension_2d;
            if width > max || height > max {
                return Err(LoadError::Decode(format!(
                    "{width}x{height} exceeds the {max}px texture limit"
                )));
            }

            let size = wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            };
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            self.queue.copy_external_image_to_texture(
                &wgpu::CopyExternalImageSourceInfo {
                    source,
                    origin: wgpu::Origin2d::ZERO,
                    flip_y: false,
                },
                wgpu::CopyExternalImageDestInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                    color_space: wgpu::PredefinedColorSpace::Srgb,
                    premultiplied_alpha: false,
                },
                size,
            );
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let id = self.next_image_id;
            self.next_image_id += 1;

            Ok(TileTexture {
                image: Rc::new(GpuImage {
                    id,
                    view,
                    width,
                    height,
                    _texture: texture,
                }),
                sampling: SamplingPolicy::TILE,
            })
        }

        /// Caption texture for `draw`'s item, baking it on first use.
        fn caption_for(
            &mut self,
            frame: &FrameParams,
            draw: &TileDraw<'_, TileTexture>,
        ) -> Option<TileTexture> {
            if let Some(cached) = self.captions.get(&draw.id.item) {
                return cached.clone();
            }
            let baked = self.bake(frame, draw);
            self.captions.insert(draw.id.item, baked.clone());
            baked
        }

        fn bake(
            &mut self,
            frame: &FrameParams,
            draw: &TileDraw<'_, TileTexture>,
        ) -> Option<TileTexture> {
            let style = &frame.style.caption;
            let layout = CaptionLayout::compute(draw.size, style)?;
            let caption = CardCaption::of(draw.item);
            if caption.is_empty() {
                return None;
            }
            let ratio = frame.viewport.pixel_ratio();
            let canvas = match bake_caption(
                &self.canvas,
                &caption,
                &layout,
                draw.size,
                ratio,
                style.tags_opacity,
            ) {
                Ok(canvas) => canvas,
                Err(e) => {
                    warn!(item = draw.id.item.0, error = %e, "caption bake failed");
                    return None;
                }
            };
            let (width, height) = (canvas.width(), canvas.height());
            match self.upload_external(
                wgpu::ExternalImageSource::HTMLCanvasElement(canvas),
                width,
                height,
                "caption",
            ) {
                Ok(texture) => Some(texture),
                Err(e) => {
                    warn!(item = draw.id.item.0, error = %e, "caption upload failed");
                    None
                }
            }
        }

        fn ensure_instance_capacity(&mut self, tiles: usize) {
            if tiles <= self.instance_capacity {
                return;
            }
            let capacity = tiles.next_power_of_two();
            self.instance_buffer = create_instance_buffer(&self.device, capacity);
            self.frame_group = create_frame_group(
                &self.device,
                &self.frame_layout,
                &self.frame_uniform,
                &self.instance_buffer,
            );
            self.instance_capacity = capacity;
            debug!(capacity, "grew tile instance buffer");
        }

        fn ensure_sampler(&mut self, policy: SamplingPolicy) {
            let device = &self.device;
            self.samplers.entry(policy).or_insert_with(|| {
                let address = match policy.address {
                    AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
                    AddressMode::Repeat => wgpu::AddressMode::Repeat,
                };
                let filter = match policy.filter {
                    FilterMode::Nearest => wgpu::FilterMode::Nearest,
                    FilterMode::Linear => wgpu::FilterMode::Linear,
                };
                device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("tile_sampler"),
                    address_mode_u: address,
                    address_mode_v: address,
                    address_mode_w: address,
                    mag_filter: filter,
                    min_filter: filter,
                    mipmap_filter: wgpu::MipmapFilterMode::Nearest,
                    ..Default::default()
                })
            });
        }

        fn ensure_tile_group(&mut self, texture: &TileTexture) {
            let key = (texture.image.id, texture.sampling);
            if self.tile_groups.contains_key(&key) {
                return;
            }
            self.ensure_sampler(texture.sampling);
            let Some(sampler) = self.samplers.get(&texture.sampling) else {
                return;
            };
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("tile_texture_bg"),
                layout: &self.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&texture.image.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            });
            self.tile_groups.insert(key, group);
        }
    }

    impl RenderBackend for WebGpuRenderer {
        type Handle = TileTexture;
        type Error = RendererError;

        fn resize(&mut self, viewport: &Viewport) -> Result<(), RendererError> {
            let (w, h) = viewport.physical_size();
            if w == self.surface_config.width && h == self.surface_config.height {
                return Ok(());
            }
            self.canvas.set_width(w);
            self.canvas.set_height(h);
            self.surface_config.width = w;
            self.surface_config.height = h;
            self.surface.configure(&self.device, &self.surface_config);

            self.offscreen = create_offscreen(&self.device, w, h);
            self.post_group = create_post_group(
                &self.device,
                &self.post_layout,
                &self.post_uniform,
                &self.offscreen.view,
                &self.scene_sampler,
            );
            debug!(width = w, height = h, "webgpu surface resized");
            Ok(())
        }

        fn draw_tiles(
            &mut self,
            frame: &FrameParams,
            tiles: &[TileDraw<'_, TileTexture>],
        ) -> Result<(), RendererError> {
            let ratio = frame.viewport.pixel_ratio();
            if ratio != self.caption_ratio {
                self.captions.clear();
                self.caption_ratio = ratio;
            }

            // Image quad then caption quad, per tile, in draw order.
            let mut quads: Vec<(TileInstance, TileTexture)> = Vec::with_capacity(tiles.len() * 2);
            for draw in tiles {
                if let Some(texture) = draw.content {
                    let instance = TileInstance::from_draw(draw, frame, Some(texture.size()));
                    quads.push((instance, texture.clone()));
                }
                if draw.visual.alpha > 0.0 {
                    if let Some(caption) = self.caption_for(frame, draw) {
                        quads.push((TileInstance::caption_overlay(draw), caption));
                    }
                }
            }

            self.ensure_instance_capacity(quads.len());
            self.instance_scratch.clear();
            self.instance_scratch
                .reserve(quads.len() * TILE_INSTANCE_BYTES);
            for (instance, texture) in &quads {
                self.instance_scratch
                    .extend_from_slice(&instance.to_bytes());
                self.ensure_tile_group(texture);
            }
            if !self.instance_scratch.is_empty() {
                self.queue
                    .write_buffer(&self.instance_buffer, 0, &self.instance_scratch);
            }
            self.queue
                .write_buffer(&self.frame_uniform, 0, &frame_uniform_bytes(frame));

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("tile_frame"),
                });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("tile_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &self.offscreen.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });

                pass.set_pipeline(&self.tile_pipeline);
                pass.set_bind_group(0, &self.frame_group, &[]);
                for (i, (_, texture)) in quads.iter().enumerate() {
                    let Some(group) = self.tile_groups.get(&(texture.image.id, texture.sampling))
                    else {
                        continue;
                    };
                    let i = i as u32;
                    pass.set_bind_group(1, group, &[]);
                    // 6 vertices per quad (2 triangles); the instance index
                    // selects the quad's storage entry.
                    pass.draw(0..6, i..i + 1);
                }
            }
            self.queue.submit(std::iter::once(encoder.finish()));
            Ok(())
        }

        fn draw_post(&mut self, frame: &FrameParams) -> Result<(), RendererError> {
            self.queue
                .write_buffer(&self.post_uniform, 0, &post_uniform_bytes(&frame.post));

            let output = self
                .surface
                .get_current_texture()
                .map_err(|e| RendererError::SurfaceError(e.to_string()))?;
            let view = output
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("post_frame"),
                });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("post_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
                pass.set_pipeline(&self.post_pipeline);
                pass.set_bind_group(0, &self.post_group, &[]);
                pass.draw(0..3, 0..1);
            }
            self.queue.submit(std::iter::once(encoder.finish()));
            output.present();
            Ok(())
        }

        fn release_tiles(&mut self, epoch: u64) {
            let dropped = self.tile_groups.len();
            self.tile_groups.clear();
            self.captions.clear();
            debug!(epoch, dropped, "released tile bind groups and captions");
        }
    }

    impl ImageUpload for WebGpuRenderer {
        const KIND: BackendKind = BackendKind::WebGpu;

        fn upload(&mut self, image: &HtmlImageElement) -> Result<TileTexture, LoadError> {
            self.upload_external(
                wgpu::ExternalImageSource::HTMLImageElement(image.clone()),
                image.natural_width(),
                image.natural_height(),
                "tile_image",
            )
        }
    }

    fn create_pipeline(
        device: &wgpu::Device,
        label: &str,
        shader: &wgpu::ShaderModule,
        layouts: &[&wgpu::BindGroupLayout],
        format: wgpu::TextureFormat,
        blend: Option<wgpu::BlendState>,
    ) -> wgpu::RenderPipeline {
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: layouts,
            immediate_size: 0,
        });
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
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
                    blend,
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
            multiview_mask: None,
            cache: None,
        })
    }

    fn create_instance_buffer(device: &wgpu::Device, tiles: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tile_instances"),
            size: (tiles.max(1) * TILE_INSTANCE_BYTES) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn create_frame_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniform: &wgpu::Buffer,
        instances: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame_bg"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: instances.as_entire_binding(),
                },
            ],
        })
    }

    fn create_offscreen(device: &wgpu::Device, width: u32, height: u32) -> Offscreen {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("scene"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Offscreen {
            _texture: texture,
            view,
        }
    }

    fn create_post_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniform: &wgpu::Buffer,
        scene: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("post_bg"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(scene),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }
}

#[cfg(target_arch = "wasm32")]
pub use gpu::{TileTexture, WebGpuRenderer};

// ---------------------------------------------------------------------------
// Helpers (used by the wasm32-only gpu module and tests)
// ---------------------------------------------------------------------------

fn put_f32s(buf: &mut [u8], values: &[f32]) {
    for (chunk, v) in buf.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
}

/// Pack a list of instances back to back.
#[must_use]
pub fn instances_to_bytes(instances: &[TileInstance]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(instances.len() * TILE_INSTANCE_BYTES);
    for instance in instances {
        bytes.extend_from_slice(&instance.to_bytes());
    }
    bytes
}

#[cfg(any(target_arch = "wasm32", test))]
fn frame_uniform_bytes(frame: &FrameParams) -> [u8; FRAME_UNIFORM_BYTES] {
    let mut buf = [0u8; FRAME_UNIFORM_BYTES];
    // Column-major, matching WGSL mat4x4.
    for (c, column) in frame.projection.iter().enumerate() {
        put_f32s(&mut buf[c * 16..(c + 1) * 16], column);
    }
    let size = frame.viewport.size();
    put_f32s(
        &mut buf[64..80],
        &[frame.offset.x, frame.offset.y, size.x, size.y],
    );
    buf
}

#[cfg(any(target_arch = "wasm32", test))]
fn post_uniform_bytes(post: &PostParams) -> [u8; POST_UNIFORM_BYTES] {
    let mut buf = [0u8; POST_UNIFORM_BYTES];
    put_f32s(
        &mut buf,
        &[
            post.distortion,
            post.time,
            post.noise_intensity,
            post.vignette_intensity,
            post.vignette_power,
        ],
    );
    // bytes 20..32 are padding (zeroed).
    buf
}
