//! Batched scene in a window: a geometry node draws tinted, spinning quads into an offscreen target
//! through a render batch, then a post node copies the target into the swapchain.
//! Run: cargo run --bin batched_scene_window --features window

#[cfg(feature = "window")]
use log::{error, info, warn};
#[cfg(feature = "window")]
use std::error::Error;
#[cfg(feature = "window")]
use std::sync::Arc;
#[cfg(feature = "window")]
use std::time::Instant;
#[cfg(feature = "window")]
use strata_renderer::{
    BatchHandle, BatchKind, BlitQuad, DrawableKind, FrameStatus, InputSlot, MaterialDescriptor, MaterialHandle,
    MaterialInstanceHandle, Mesh, MeshDrawable, PassId, RenderBatch, RenderError, RenderNode, RenderPassDesc,
    RenderProcess, RenderResources, Renderer, RendererConfig, ShaderSource, StaticMeshInstance, StaticVertex,
    SubpassState,
};
#[cfg(feature = "window")]
use strata_rhi::{
    AttachmentDescription, ClearColor, ClearValue, CullMode, Device, ImageLayout, LoadOp, RasterizationState,
    RenderPassLayoutDescriptor, ShaderStages, StoreOp, Texture, TextureDescriptor, TextureFormat, TextureUsage,
};
#[cfg(feature = "window")]
use winit::application::ApplicationHandler;
#[cfg(feature = "window")]
use winit::event::WindowEvent;
#[cfg(feature = "window")]
use winit::event_loop::{ActiveEventLoop, EventLoop};
#[cfg(feature = "window")]
use winit::window::{Window, WindowId};

#[cfg(feature = "window")]
const OFFSCREEN_EXTENT: (u32, u32) = (1280, 720);
#[cfg(feature = "window")]
const QUAD_COUNT: usize = 6;
#[cfg(feature = "window")]
const POST_NODE: usize = 1;

#[cfg(feature = "window")]
type DemoResult<T> = Result<T, Box<dyn Error>>;

/// Everything the scene keeps between frames.
#[cfg(feature = "window")]
struct Scene {
    renderer: Renderer,
    scene_batch: BatchHandle,
    scene_material: MaterialHandle,
    tints: [MaterialInstanceHandle; 2],
    post_material: MaterialHandle,
    present_pass: PassId,
    quad: Arc<Mesh>,
    start: Instant,
}

#[cfg(feature = "window")]
impl Scene {
    fn new(window: &Window) -> DemoResult<Self> {
        let size = window.inner_size();
        let config = RendererConfig {
            window_extent: (size.width.max(1), size.height.max(1)),
            ..Default::default()
        }
        .with_env_overrides();
        let per_kind_sets = config.per_kind_set_capacity;
        let device: Arc<dyn Device> = strata_rhi::VulkanDevice::new_with_surface(window)?;
        let mut renderer = Renderer::new(Arc::clone(&device), config)?;

        let offscreen: Arc<dyn Texture> = Arc::from(device.create_texture(&TextureDescriptor {
            label: Some("scene color"),
            size: (OFFSCREEN_EXTENT.0, OFFSCREEN_EXTENT.1, 1),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            ..Default::default()
        })?);
        let sampler = renderer.material_sampler(Some("post"))?;
        let swapchain_format = renderer.swapchain().format();
        let no_culling = SubpassState {
            rasterization: RasterizationState {
                cull_mode: CullMode::None,
                ..Default::default()
            },
            ..Default::default()
        };

        // Geometry node: quads into the offscreen target, left ready for sampling.
        let mut geometry = RenderNode::new(Arc::clone(&device), Some("geometry"));
        let scene_pass = geometry.add_render_pass(
            RenderPassDesc {
                layout: RenderPassLayoutDescriptor::single_color(
                    "scene",
                    AttachmentDescription {
                        format: TextureFormat::Rgba8Unorm,
                        load_op: LoadOp::Clear,
                        store_op: StoreOp::Store,
                        initial_layout: ImageLayout::Undefined,
                        final_layout: ImageLayout::ShaderReadOnly,
                    },
                ),
                subpass_states: vec![no_culling.clone()],
                clear_values: vec![ClearValue::Color(ClearColor {
                    r: 0.05,
                    g: 0.05,
                    b: 0.08,
                    a: 1.0,
                })],
            },
            &[],
        )?;
        geometry.create_framebuffers(scene_pass, &[vec![offscreen.as_ref()]], OFFSCREEN_EXTENT)?;

        // Post node: full-screen copy into the swapchain image.
        let mut post = RenderNode::new(Arc::clone(&device), Some("post"));
        let present_pass = post.add_render_pass(
            RenderPassDesc {
                layout: RenderPassLayoutDescriptor::single_color(
                    "present",
                    AttachmentDescription {
                        format: swapchain_format,
                        load_op: LoadOp::DontCare,
                        store_op: StoreOp::Store,
                        initial_layout: ImageLayout::Undefined,
                        final_layout: ImageLayout::PresentSrc,
                    },
                ),
                subpass_states: vec![no_culling],
                clear_values: Vec::new(),
            },
            &[],
        )?;

        let resources = renderer.resources_mut();
        let scene_material = resources.materials.create_material(
            device.as_ref(),
            &MaterialDescriptor::new(
                "tinted quad",
                ShaderSource::SpirV(compile_wgsl_to_spirv(SCENE_VS, naga::ShaderStage::Vertex)?),
                ShaderSource::SpirV(compile_wgsl_to_spirv(SCENE_FS, naga::ShaderStage::Fragment)?),
            )
            .with_global_input(InputSlot::uniform(0, ShaderStages::FRAGMENT, &[0.02f32, 0.02, 0.03, 0.0]))
            .with_local_input(InputSlot::uniform(0, ShaderStages::FRAGMENT, &[1.0f32; 4]))
            .with_kind(DrawableKind::StaticMesh),
            per_kind_sets,
        )?;
        let warm = resources.materials.create_instance(
            device.as_ref(),
            scene_material,
            vec![InputSlot::uniform(0, ShaderStages::FRAGMENT, &[0.95f32, 0.55, 0.2, 1.0])],
        )?;
        let cool = resources.materials.create_instance(
            device.as_ref(),
            scene_material,
            vec![InputSlot::uniform(0, ShaderStages::FRAGMENT, &[0.2f32, 0.6, 0.95, 1.0])],
        )?;
        let post_material = resources.materials.create_material(
            device.as_ref(),
            &MaterialDescriptor::new(
                "present copy",
                ShaderSource::SpirV(compile_wgsl_to_spirv(BLIT_VS, naga::ShaderStage::Vertex)?),
                ShaderSource::SpirV(compile_wgsl_to_spirv(BLIT_FS, naga::ShaderStage::Fragment)?),
            )
            .with_global_input(InputSlot::uniform(0, ShaderStages::FRAGMENT, &[1.0f32; 4]))
            .with_local_input(InputSlot::Texture {
                binding: 0,
                stages: ShaderStages::FRAGMENT,
                texture: offscreen,
                sampler,
            })
            .with_kind(DrawableKind::BlitQuad),
            per_kind_sets,
        )?;

        let scene_batch = resources.add_batch(RenderBatch::new(
            device.as_ref(),
            Some("scene"),
            &[BatchKind::new(DrawableKind::StaticMesh, 64)],
        )?);
        let mut post_batch = RenderBatch::new(device.as_ref(), Some("post"), &[BatchKind::new(DrawableKind::BlitQuad, 1)])?;
        post_batch.add_renderable(device.as_ref(), &resources.materials, post_material, None, Arc::new(BlitQuad))?;
        let post_batch = resources.add_batch(post_batch);

        geometry.set_batch_for_all_subpasses(scene_pass, scene_batch)?;
        post.set_batch_for_all_subpasses(present_pass, post_batch)?;
        let mut process = RenderProcess::new(Some("frame"));
        process.add_render_node(geometry);
        process.add_render_node(post);
        renderer.add_process(process);
        renderer.setup_processes()?;

        let vertices = [
            StaticVertex { position: [-0.5, -0.5, 0.0], normal: [0.0, 0.0, 1.0], uv: [0.0, 0.0] },
            StaticVertex { position: [0.5, -0.5, 0.0], normal: [0.0, 0.0, 1.0], uv: [1.0, 0.0] },
            StaticVertex { position: [-0.5, 0.5, 0.0], normal: [0.0, 0.0, 1.0], uv: [0.0, 1.0] },
            StaticVertex { position: [0.5, 0.5, 0.0], normal: [0.0, 0.0, 1.0], uv: [1.0, 1.0] },
        ];
        let quad = Arc::new(Mesh::new(
            device.as_ref(),
            "quad",
            bytemuck::cast_slice(&vertices),
            vertices.len() as u32,
            Some(&[0u32, 1, 2, 2, 1, 3][..]),
        )?);

        let mut scene = Self {
            renderer,
            scene_batch,
            scene_material,
            tints: [warm, cool],
            post_material,
            present_pass,
            quad,
            start: Instant::now(),
        };
        scene.rebuild_present_targets()?;
        info!("scene ready: {:?}", scene.renderer);
        Ok(scene)
    }

    /// Point the post node at the current swapchain images and rescale the copy.
    fn rebuild_present_targets(&mut self) -> DemoResult<()> {
        let device = Arc::clone(self.renderer.device());
        let (swapchain, processes) = self.renderer.swapchain_and_processes();
        let extent = swapchain.extent();
        let images = (0..swapchain.image_count())
            .map(|i| swapchain.image(i).map(|t| vec![t]).ok_or_else(|| format!("missing swapchain image {}", i)))
            .collect::<Result<Vec<_>, _>>()?;
        let post = processes
            .first_mut()
            .and_then(|p| p.node_mut(POST_NODE))
            .ok_or("post node missing")?;
        post.create_framebuffers(self.present_pass, &images, extent)?;

        let scale = [
            extent.0 as f32,
            extent.1 as f32,
            OFFSCREEN_EXTENT.0 as f32,
            OFFSCREEN_EXTENT.1 as f32,
        ];
        self.renderer
            .resources_mut()
            .materials
            .material_mut(self.post_material)?
            .global_inputs_mut()
            .set_uniform(device.as_ref(), 0, bytemuck::bytes_of(&scale))?;
        Ok(())
    }

    fn render(&mut self) -> DemoResult<()> {
        // Batches and instance buffers are only touched once the previous frame has retired.
        self.renderer.begin_frame()?;
        let device = Arc::clone(self.renderer.device());
        let t = self.start.elapsed().as_secs_f32();
        let RenderResources { materials, batches } = self.renderer.resources_mut();
        let batch = batches.get_mut(self.scene_batch).ok_or(RenderError::UnknownBatch)?;
        batch.clear_batch();
        for i in 0..QUAD_COUNT {
            let column = i as f32 - (QUAD_COUNT as f32 - 1.0) / 2.0;
            let mvp = quad_transform(t * (0.5 + 0.25 * i as f32), [column * 0.3, 0.3 * (t + i as f32).sin()], 0.25);
            let drawable = MeshDrawable::static_mesh(Arc::clone(&self.quad), StaticMeshInstance { mvp });
            let tint = self.tints[i % self.tints.len()];
            if let Err(e) = batch.add_renderable(device.as_ref(), materials, self.scene_material, Some(tint), Arc::new(drawable)) {
                if !e.is_recoverable() {
                    return Err(e.into());
                }
                warn!("quad {} skipped this frame: {}", i, e);
            }
        }

        match self.renderer.render_frame()? {
            FrameStatus::Presented { .. } => {}
            FrameStatus::SwapchainRecreated => self.rebuild_present_targets()?,
        }
        Ok(())
    }

    fn resize(&mut self, extent: (u32, u32)) {
        self.renderer.request_resize(extent);
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.renderer.destroy_processes() {
            error!("shutdown: {}", e);
        }
    }
}

/// Rotation about z, uniform scale, then translation in clip space (column-major).
#[cfg(feature = "window")]
fn quad_transform(angle: f32, offset: [f32; 2], scale: f32) -> [[f32; 4]; 4] {
    let (s, c) = angle.sin_cos();
    [
        [c * scale, s * scale, 0.0, 0.0],
        [-s * scale, c * scale, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [offset[0], offset[1], 0.0, 1.0],
    ]
}

#[cfg(feature = "window")]
#[derive(Default)]
struct App {
    window: Option<Window>,
    scene: Option<Scene>,
    /// Defer device creation until the window has a real size.
    pending_init: bool,
}

#[cfg(feature = "window")]
impl App {
    fn init(&mut self) -> DemoResult<()> {
        let Some(window) = self.window.as_ref() else {
            return Ok(());
        };
        let size = window.inner_size();
        if self.scene.is_some() || size.width == 0 || size.height == 0 {
            return Ok(());
        }
        self.scene = Some(Scene::new(window)?);
        Ok(())
    }
}

#[cfg(feature = "window")]
impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let defaults = RendererConfig::default();
        let attrs = winit::window::WindowAttributes::default()
            .with_title(defaults.window_title)
            .with_inner_size(winit::dpi::PhysicalSize::new(defaults.window_extent.0, defaults.window_extent.1));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                window.request_redraw();
                self.window = Some(window);
                self.pending_init = true;
            }
            Err(e) => {
                error!("create window: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                // Release GPU objects before the surface's window goes away.
                if let Some(mut scene) = self.scene.take() {
                    scene.shutdown();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                match self.scene.as_mut() {
                    Some(scene) => scene.resize((size.width, size.height)),
                    None => self.pending_init = true,
                }
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                if self.pending_init {
                    self.pending_init = false;
                    if let Err(e) = self.init() {
                        error!("init: {}", e);
                        event_loop.exit();
                        return;
                    }
                }
                if let Some(scene) = self.scene.as_mut() {
                    if let Err(e) = scene.render() {
                        error!("frame: {}", e);
                        scene.shutdown();
                        self.scene = None;
                        event_loop.exit();
                        return;
                    }
                }
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

#[cfg(feature = "window")]
fn main() {
    env_logger::init();
    let mut app = App::default();
    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!("event loop: {}", e);
            return;
        }
    };
    if let Err(e) = event_loop.run_app(&mut app) {
        error!("event loop: {}", e);
    }
}

#[cfg(not(feature = "window"))]
fn main() {
    eprintln!("Build and run with: cargo run --bin batched_scene_window --features window");
}

#[cfg(feature = "window")]
const SCENE_VS: &str = r#"
    struct Instance {
        mvp: mat4x4<f32>,
    }
    @group(2) @binding(0) var<uniform> instance: Instance;

    struct VsOut {
        @builtin(position) position: vec4<f32>,
        @location(0) uv: vec2<f32>,
    }

    @vertex
    fn main(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>, @location(2) uv: vec2<f32>) -> VsOut {
        var out: VsOut;
        out.position = instance.mvp * vec4<f32>(position, 1.0);
        out.uv = uv;
        return out;
    }
"#;

#[cfg(feature = "window")]
const SCENE_FS: &str = r#"
    @group(0) @binding(0) var<uniform> ambient: vec4<f32>;
    @group(1) @binding(0) var<uniform> tint: vec4<f32>;

    @fragment
    fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
        let shade = 0.6 + 0.4 * uv.y;
        return vec4<f32>(tint.rgb * shade + ambient.rgb, 1.0);
    }
"#;

#[cfg(feature = "window")]
const BLIT_VS: &str = r#"
    @vertex
    fn main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
        let corner = vec2<f32>(f32(index & 1u), f32(index >> 1u));
        return vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
    }
"#;

// The source is bound as a combined image sampler; reading it with textureLoad needs only the image.
#[cfg(feature = "window")]
const BLIT_FS: &str = r#"
    // xy: target extent, zw: source extent.
    @group(0) @binding(0) var<uniform> scale: vec4<f32>;
    @group(1) @binding(0) var source: texture_2d<f32>;

    @fragment
    fn main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
        let texel = vec2<i32>(position.xy * scale.zw / scale.xy);
        let max_texel = vec2<i32>(textureDimensions(source)) - vec2<i32>(1, 1);
        return textureLoad(source, clamp(texel, vec2<i32>(0, 0), max_texel), 0);
    }
"#;

#[cfg(feature = "window")]
fn compile_wgsl_to_spirv(source: &str, stage: naga::ShaderStage) -> DemoResult<Vec<u8>> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| format!("parse wgsl: {}", e))?;
    let info = naga::valid::Validator::new(naga::valid::ValidationFlags::default(), naga::valid::Capabilities::default())
        .validate(&module)
        .map_err(|e| format!("validate wgsl: {:?}", e))?;
    let options = naga::back::spv::Options::default();
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: "main".to_string(),
    };
    let spv = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| format!("compile to spirv: {:?}", e))?;
    Ok(spv.iter().flat_map(|w| w.to_le_bytes()).collect())
}
