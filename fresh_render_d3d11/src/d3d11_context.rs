/// D3D11RenderContext - Direct3D 11 implementation of RenderContext
///
/// One device and its immediate context draw into a two-buffer
/// FLIP_DISCARD swapchain. The immediate context serializes submission, so
/// the frame ring only tracks which back buffer is current.

use fresh_render::context::validate_swapchain_size;
use fresh_render::fresh::chunk::{
    ChunkCoord, ChunkMesh, ChunkMeshCache, ChunkMeshRenderer, CHUNK_MVP_UNIFORM, CHUNK_PIXEL_HLSL,
    CHUNK_VERTEX_HLSL,
};
use fresh_render::fresh::pacing::{FrameRing, Lifecycle, ResourceTracker, FRAMES_IN_FLIGHT};
use fresh_render::fresh::resource::{
    BufferHandle, BufferKind, MeshVertex, NativeHandle, RenderBuffer, RenderShader, ShaderHandle, ShaderSource,
    TextureHandle,
};
use fresh_render::fresh::{
    win32_hwnd, ClearValues, ContextState, Error, GraphicsApi, RenderConfig, RenderContext, RenderWindow, Result,
    ScissorRect, Viewport,
};
use fresh_render::glam::Mat4;
use fresh_render::{engine_bail_warn, engine_debug, engine_err, engine_error, engine_info, engine_warn};
use rustc_hash::FxHashSet;
use std::any::Any;
use std::ffi::c_void;
use std::rc::Rc;
use std::sync::Arc;
use windows::core::Interface;
use windows::Win32::Foundation::{BOOL, FALSE, HMODULE, HWND, RECT, TRUE};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::d3d11_buffer::Buffer;
use crate::d3d11_shader::Shader;
use crate::d3d11_texture::Texture;
use crate::d3d11_util::{present_interval, BACK_BUFFER_COUNT, SOURCE};

// ============================================================================
// Device and swapchain objects
// ============================================================================

struct DeviceObjects {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    factory: IDXGIFactory2,
    feature_level: D3D_FEATURE_LEVEL,
    rasterizer: ID3D11RasterizerState,
    depth_state: ID3D11DepthStencilState,
}

struct SwapchainTargets {
    swap_chain: IDXGISwapChain1,
    rtv: ID3D11RenderTargetView,
    _depth: ID3D11Texture2D,
    dsv: ID3D11DepthStencilView,
}

fn feature_level_name(level: D3D_FEATURE_LEVEL) -> &'static str {
    match level {
        D3D_FEATURE_LEVEL_11_1 => "11_1",
        D3D_FEATURE_LEVEL_11_0 => "11_0",
        _ => "unknown",
    }
}

unsafe fn create_device_with(
    flags: D3D11_CREATE_DEVICE_FLAG,
    levels: &[D3D_FEATURE_LEVEL],
) -> windows::core::Result<(ID3D11Device, ID3D11DeviceContext, D3D_FEATURE_LEVEL)> {
    let mut device = None;
    let mut context = None;
    let mut level = D3D_FEATURE_LEVEL::default();
    D3D11CreateDevice(
        None,
        D3D_DRIVER_TYPE_HARDWARE,
        HMODULE::default(),
        flags,
        Some(levels),
        D3D11_SDK_VERSION,
        Some(&mut device),
        Some(&mut level),
        Some(&mut context),
    )?;
    match (device, context) {
        (Some(device), Some(context)) => Ok((device, context, level)),
        _ => Err(windows::core::Error::from(windows::Win32::Foundation::E_POINTER)),
    }
}

fn create_device(validation: bool) -> Result<DeviceObjects> {
    let levels = [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0];
    let base_flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT;
    let flags = if validation {
        base_flags | D3D11_CREATE_DEVICE_DEBUG
    } else {
        base_flags
    };

    let created = unsafe {
        create_device_with(flags, &levels)
            .or_else(|e| {
                if validation {
                    engine_warn!(SOURCE, "Debug layer unavailable ({}), creating device without it", e);
                    create_device_with(base_flags, &levels)
                } else {
                    Err(e)
                }
            })
            // Runtimes without 11.1 reject the whole list
            .or_else(|_| create_device_with(base_flags, &levels[1..]))
    };
    let (device, context, feature_level) = created.map_err(|e| {
        engine_error!(SOURCE, "D3D11CreateDevice failed at feature level 11_0: {}", e);
        Error::InitializationFailed(format!("D3D11CreateDevice failed: {}", e))
    })?;

    unsafe {
        let dxgi_device: IDXGIDevice = device
            .cast()
            .map_err(|e| engine_err!(SOURCE, "Device has no IDXGIDevice: {}", e))?;
        let adapter = dxgi_device
            .GetAdapter()
            .map_err(|e| engine_err!(SOURCE, "GetAdapter failed: {}", e))?;
        let factory: IDXGIFactory2 = adapter
            .GetParent()
            .map_err(|e| engine_err!(SOURCE, "Adapter has no IDXGIFactory2: {}", e))?;
        if let Ok(desc) = adapter.GetDesc() {
            let name = String::from_utf16_lossy(&desc.Description);
            engine_info!(
                SOURCE,
                "Direct3D 11 device: {} (feature level {})",
                name.trim_end_matches('\0'),
                feature_level_name(feature_level)
            );
        }

        let raster_desc = D3D11_RASTERIZER_DESC {
            FillMode: D3D11_FILL_SOLID,
            CullMode: D3D11_CULL_BACK,
            FrontCounterClockwise: FALSE,
            DepthClipEnable: TRUE,
            ScissorEnable: TRUE,
            ..Default::default()
        };
        let mut rasterizer = None;
        device
            .CreateRasterizerState(&raster_desc, Some(&mut rasterizer))
            .map_err(|e| engine_err!(SOURCE, "CreateRasterizerState failed: {}", e))?;

        let depth_desc = D3D11_DEPTH_STENCIL_DESC {
            DepthEnable: TRUE,
            DepthWriteMask: D3D11_DEPTH_WRITE_MASK_ALL,
            DepthFunc: D3D11_COMPARISON_LESS,
            StencilEnable: FALSE,
            ..Default::default()
        };
        let mut depth_state = None;
        device
            .CreateDepthStencilState(&depth_desc, Some(&mut depth_state))
            .map_err(|e| engine_err!(SOURCE, "CreateDepthStencilState failed: {}", e))?;

        match (rasterizer, depth_state) {
            (Some(rasterizer), Some(depth_state)) => Ok(DeviceObjects {
                device,
                context,
                factory,
                feature_level,
                rasterizer,
                depth_state,
            }),
            _ => Err(engine_err!(SOURCE, "Pipeline state creation returned a null object")),
        }
    }
}

fn create_swapchain(objects: &DeviceObjects, hwnd: isize, width: u32, height: u32) -> Result<SwapchainTargets> {
    let desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: width,
        Height: height,
        Format: DXGI_FORMAT_R8G8B8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: BACK_BUFFER_COUNT,
        Scaling: DXGI_SCALING_STRETCH,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
        AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
        ..Default::default()
    };

    unsafe {
        let swap_chain = objects
            .factory
            .CreateSwapChainForHwnd(&objects.device, HWND(hwnd as *mut c_void), &desc, None, None)
            .map_err(|e| Error::InitializationFailed(format!("CreateSwapChainForHwnd failed: {}", e)))?;
        let back_buffer: ID3D11Texture2D = swap_chain
            .GetBuffer(0)
            .map_err(|e| engine_err!(SOURCE, "GetBuffer(0) failed: {}", e))?;
        let mut rtv = None;
        objects
            .device
            .CreateRenderTargetView(&back_buffer, None, Some(&mut rtv))
            .map_err(|e| engine_err!(SOURCE, "CreateRenderTargetView failed: {}", e))?;

        let depth_desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_D24_UNORM_S8_UINT,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_DEPTH_STENCIL.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let mut depth = None;
        objects
            .device
            .CreateTexture2D(&depth_desc, None, Some(&mut depth))
            .map_err(|e| engine_err!(SOURCE, "Depth buffer creation failed: {}", e))?;
        let depth = depth.ok_or_else(|| engine_err!(SOURCE, "CreateTexture2D returned no depth buffer"))?;
        let mut dsv = None;
        objects
            .device
            .CreateDepthStencilView(&depth, None, Some(&mut dsv))
            .map_err(|e| engine_err!(SOURCE, "CreateDepthStencilView failed: {}", e))?;

        match (rtv, dsv) {
            (Some(rtv), Some(dsv)) => Ok(SwapchainTargets {
                swap_chain,
                rtv,
                _depth: depth,
                dsv,
            }),
            _ => Err(engine_err!(SOURCE, "Swapchain views are null")),
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Direct3D 11 render context
pub struct D3D11RenderContext {
    config: RenderConfig,
    lifecycle: Lifecycle,
    ring: FrameRing,
    tracker: ResourceTracker,

    window: Option<Arc<dyn RenderWindow>>,
    objects: Option<DeviceObjects>,
    targets: Option<SwapchainTargets>,

    swapchain_size: (u32, u32),
    clear: ClearValues,
    viewport: Viewport,
    scissor: ScissorRect,

    chunks: ChunkMeshCache,
    chunk_shader: Option<Shader>,
}

impl D3D11RenderContext {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(SOURCE),
            ring: FrameRing::new(FRAMES_IN_FLIGHT),
            tracker: ResourceTracker::new(),
            window: None,
            objects: None,
            targets: None,
            swapchain_size: (0, 0),
            clear: ClearValues::default(),
            viewport: Viewport::default(),
            scissor: ScissorRect::default(),
            chunks: ChunkMeshCache::new(),
            chunk_shader: None,
        }
    }

    /// The D3D11 device, for callers recording their own draws
    pub fn device(&self) -> Option<&ID3D11Device> {
        self.objects.as_ref().map(|o| &o.device)
    }

    pub fn immediate_context(&self) -> Option<&ID3D11DeviceContext> {
        self.objects.as_ref().map(|o| &o.context)
    }

    pub fn swap_chain(&self) -> Option<&IDXGISwapChain1> {
        self.targets.as_ref().map(|t| &t.swap_chain)
    }

    pub fn feature_level(&self) -> Option<D3D_FEATURE_LEVEL> {
        self.objects.as_ref().map(|o| o.feature_level)
    }

    fn objects(&self) -> Result<&DeviceObjects> {
        self.objects.as_ref().ok_or(Error::NotInitialized)
    }

    fn apply_viewport(&self, context: &ID3D11DeviceContext) {
        let vp = D3D11_VIEWPORT {
            TopLeftX: self.viewport.x as f32,
            TopLeftY: self.viewport.y as f32,
            Width: self.viewport.width as f32,
            Height: self.viewport.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        unsafe { context.RSSetViewports(Some(&[vp])) };
    }

    fn apply_scissor(&self, context: &ID3D11DeviceContext) {
        let rect = RECT {
            left: self.scissor.x,
            top: self.scissor.y,
            right: self.scissor.x + self.scissor.width as i32,
            bottom: self.scissor.y + self.scissor.height as i32,
        };
        unsafe { context.RSSetScissorRects(Some(&[rect])) };
    }

    fn clear_color_target(&self) {
        if let (Some(objects), Some(targets)) = (&self.objects, &self.targets) {
            unsafe { objects.context.ClearRenderTargetView(&targets.rtv, &self.clear.color) };
        }
    }

    fn clear_depth_target(&self) {
        if let (Some(objects), Some(targets)) = (&self.objects, &self.targets) {
            let flags = (D3D11_CLEAR_DEPTH.0 | D3D11_CLEAR_STENCIL.0) as u32;
            unsafe {
                objects
                    .context
                    .ClearDepthStencilView(&targets.dsv, flags, self.clear.depth, 0)
            };
        }
    }

    fn create_buffer(&mut self, kind: BufferKind, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.lifecycle.require_initialized("create_buffer")?;
        let objects = self.objects()?;
        let buffer = Buffer::new(
            &objects.device,
            &objects.context,
            kind,
            data,
            size,
            Some(self.tracker.track()),
        )?;
        engine_debug!(SOURCE, "Created {:?} buffer ({} bytes)", kind, size);
        Ok(Rc::new(buffer))
    }

    /// Drop the swapchain and its views after draining the immediate context
    fn release_targets(&mut self) {
        if let Some(objects) = &self.objects {
            unsafe {
                objects.context.OMSetRenderTargets(None, None);
                objects.context.ClearState();
                objects.context.Flush();
            }
        }
        self.targets = None;
    }

    fn rebuild_targets(&mut self, window: &Arc<dyn RenderWindow>, width: u32, height: u32) -> Result<()> {
        validate_swapchain_size(width, height)?;
        let hwnd = win32_hwnd(window.as_ref())?;
        self.release_targets();
        let targets = create_swapchain(self.objects()?, hwnd, width, height)?;
        self.targets = Some(targets);
        self.swapchain_size = (width, height);
        self.viewport = Viewport::full(width, height);
        self.scissor = Viewport::full(width, height);
        engine_debug!(SOURCE, "Swapchain rebuilt at {}x{}", width, height);
        Ok(())
    }

    /// Block until the immediate context has drained
    fn drain_gpu(&self) -> Result<()> {
        let objects = self.objects()?;
        let desc = D3D11_QUERY_DESC {
            Query: D3D11_QUERY_EVENT,
            MiscFlags: 0,
        };
        let mut query = None;
        unsafe {
            objects
                .device
                .CreateQuery(&desc, Some(&mut query))
                .map_err(|e| engine_err!(SOURCE, "CreateQuery(EVENT) failed: {}", e))?;
            let query = query.ok_or_else(|| engine_err!(SOURCE, "CreateQuery returned no query"))?;
            objects.context.End(&query);
            let mut done = BOOL(0);
            loop {
                objects
                    .context
                    .GetData(
                        &query,
                        Some(&mut done as *mut BOOL as *mut c_void),
                        std::mem::size_of::<BOOL>() as u32,
                        0,
                    )
                    .map_err(|e| engine_err!(SOURCE, "GetData on event query failed: {}", e))?;
                if done.as_bool() {
                    break;
                }
                std::thread::yield_now();
            }
        }
        Ok(())
    }

    fn chunk_shader(&mut self) -> Result<&Shader> {
        if self.chunk_shader.is_none() {
            let objects = self.objects()?;
            // Built-in, so not counted among the caller's live resources
            let shader = Shader::new(
                &objects.device,
                &objects.context,
                &ShaderSource::Hlsl(CHUNK_VERTEX_HLSL.to_string()),
                &ShaderSource::Hlsl(CHUNK_PIXEL_HLSL.to_string()),
                ResourceTracker::new().track(),
            )?;
            self.chunk_shader = Some(shader);
        }
        self.chunk_shader.as_ref().ok_or(Error::NotInitialized)
    }
}

impl RenderContext for D3D11RenderContext {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::DirectX11
    }

    fn state(&self) -> ContextState {
        self.lifecycle.state()
    }

    fn initialize(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.begin_initialize()?;
        let (width, height) = window.client_size();
        validate_swapchain_size(width, height)?;
        let hwnd = win32_hwnd(window.as_ref())?;

        let objects = create_device(self.config.enable_validation)?;
        let targets = create_swapchain(&objects, hwnd, width, height)?;

        self.objects = Some(objects);
        self.targets = Some(targets);
        self.window = Some(window);
        self.swapchain_size = (width, height);
        self.viewport = Viewport::full(width, height);
        self.scissor = Viewport::full(width, height);
        self.lifecycle.mark_initialized();
        engine_info!(SOURCE, "Direct3D 11 render context initialized ({}x{})", width, height);
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.lifecycle.shut_down() {
            return;
        }
        if let Err(e) = self.drain_gpu() {
            engine_warn!(SOURCE, "GPU drain before shutdown failed: {}", e);
        }
        self.chunks.clear();
        self.chunk_shader = None;
        self.tracker.warn_leaks(SOURCE);
        self.release_targets();
        self.objects = None;
        self.window = None;
        engine_info!(SOURCE, "Direct3D 11 render context shut down");
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.lifecycle.check_begin_frame()?;
        if let Some(window) = &self.window {
            if window.client_size() != self.swapchain_size {
                return Err(Error::SwapchainOutOfDate);
            }
        }
        let (width, height) = self.swapchain_size;
        self.viewport = Viewport::full(width, height);
        self.scissor = Viewport::full(width, height);

        let objects = self.objects()?;
        let targets = self.targets.as_ref().ok_or(Error::SwapchainOutOfDate)?;
        unsafe {
            objects
                .context
                .OMSetRenderTargets(Some(&[Some(targets.rtv.clone())]), &targets.dsv);
            objects.context.RSSetState(&objects.rasterizer);
            objects.context.OMSetDepthStencilState(&objects.depth_state, 0);
        }
        self.apply_viewport(&objects.context);
        self.apply_scissor(&objects.context);
        self.clear_color_target();
        self.clear_depth_target();
        self.lifecycle.begin_recording();
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.lifecycle.check_end_frame()?;
        let result = match &self.targets {
            Some(targets) => unsafe {
                targets
                    .swap_chain
                    .Present(present_interval(self.config.vsync), DXGI_PRESENT(0))
                    .ok()
                    .map_err(|e| engine_err!(SOURCE, "Present failed: {}", e))
            },
            None => Err(Error::SwapchainOutOfDate),
        };
        self.ring.advance();
        self.lifecycle.end_recording();
        result
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.lifecycle.require_initialized("wait_idle")?;
        self.drain_gpu()
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = Viewport { x, y, width, height };
        if let Some(objects) = &self.objects {
            self.apply_viewport(&objects.context);
        }
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.scissor = ScissorRect { x, y, width, height };
        if let Some(objects) = &self.objects {
            self.apply_scissor(&objects.context);
        }
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear.color = [r, g, b, a];
        if self.lifecycle.is_recording() {
            self.clear_color_target();
        }
    }

    fn clear_depth(&mut self, depth: f32) {
        self.clear.depth = depth;
        if self.lifecycle.is_recording() {
            self.clear_depth_target();
        }
    }

    fn create_vertex_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.create_buffer(BufferKind::Vertex, data, size)
    }

    fn create_index_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.create_buffer(BufferKind::Index, data, size)
    }

    fn create_uniform_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.create_buffer(BufferKind::Uniform, data, size)
    }

    fn create_texture(&mut self, width: u32, height: u32, data: Option<&[u8]>) -> Result<TextureHandle> {
        self.lifecycle.require_initialized("create_texture")?;
        let objects = self.objects()?;
        let texture = Texture::new(&objects.device, &objects.context, width, height, data, self.tracker.track())?;
        engine_debug!(SOURCE, "Created {}x{} texture", width, height);
        Ok(Rc::new(texture))
    }

    fn create_shader(&mut self, vertex: &ShaderSource, fragment: &ShaderSource) -> Result<ShaderHandle> {
        self.lifecycle.require_initialized("create_shader")?;
        let objects = self.objects()?;
        let shader = Shader::new(&objects.device, &objects.context, vertex, fragment, self.tracker.track())?;
        Ok(Rc::new(shader))
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.lifecycle.require_idle("recreate_swapchain")?;
        let window = self.window.clone().ok_or(Error::NotInitialized)?;
        self.rebuild_targets(&window, width, height)
    }

    fn set_viewport_window(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.require_idle("set_viewport_window")?;
        let (width, height) = window.client_size();
        self.rebuild_targets(&window, width, height)?;
        self.window = Some(window);
        Ok(())
    }

    fn swapchain_width(&self) -> u32 {
        self.swapchain_size.0
    }

    fn swapchain_height(&self) -> u32 {
        self.swapchain_size.1
    }

    fn frame_index(&self) -> usize {
        self.ring.index()
    }

    fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    fn native_device(&self) -> NativeHandle {
        match &self.objects {
            Some(objects) => NativeHandle::ComPtr(objects.device.as_raw()),
            None => NativeHandle::Null,
        }
    }

    fn live_resource_count(&self) -> usize {
        self.tracker.live_count()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for D3D11RenderContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Chunk meshes
// ============================================================================

impl ChunkMeshRenderer for D3D11RenderContext {
    fn upload_chunk_mesh(&mut self, coord: ChunkCoord, vertices: &[MeshVertex], indices: &[u32]) -> Result<()> {
        if vertices.is_empty() || indices.is_empty() {
            self.release_chunk_mesh(coord);
            return Ok(());
        }
        let mesh = ChunkMesh::upload(self, vertices, indices)?;
        self.chunks.insert(coord, mesh);
        Ok(())
    }

    fn release_chunk_mesh(&mut self, coord: ChunkCoord) -> bool {
        self.chunks.remove(coord).is_some()
    }

    fn retain_visible_chunks(&mut self, visible: &FxHashSet<ChunkCoord>) -> usize {
        self.chunks.retain_visible(visible)
    }

    fn chunk_mesh_count(&self) -> usize {
        self.chunks.len()
    }

    fn draw_chunk_meshes(&mut self, view_proj: Mat4) -> Result<()> {
        if !self.lifecycle.is_recording() {
            engine_bail_warn!(SOURCE, "draw_chunk_meshes called outside begin_frame/end_frame");
        }
        if self.chunks.is_empty() {
            return Ok(());
        }
        self.chunk_shader()?;

        let (Some(objects), Some(shader)) = (&self.objects, &self.chunk_shader) else {
            return Err(Error::NotInitialized);
        };
        shader.set_uniform_mat4(CHUNK_MVP_UNIFORM, view_proj);
        shader.bind();
        for (_, mesh) in self.chunks.iter() {
            mesh.vertex_buffer.bind();
            mesh.index_buffer.bind();
            unsafe { objects.context.DrawIndexed(mesh.index_count, 0, 0) };
        }
        Ok(())
    }
}
