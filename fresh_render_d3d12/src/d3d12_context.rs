/// D3D12RenderContext - Direct3D 12 implementation of RenderContext
///
/// Double-buffered: each frame slot owns a command allocator and a fence
/// value in a [`FenceRing`]. `end_frame` submits, presents and advances the
/// ring, which blocks until the next slot's previous submission retired.
/// Only then may `begin_frame` reset that slot's allocator.

use fresh_render::context::validate_swapchain_size;
use fresh_render::fresh::chunk::{
    ChunkCoord, ChunkMesh, ChunkMeshCache, ChunkMeshRenderer, CHUNK_MVP_UNIFORM, CHUNK_PIXEL_HLSL,
    CHUNK_VERTEX_HLSL,
};
use fresh_render::fresh::pacing::{FenceRing, GpuTimeline, Lifecycle, ResourceTracker, FRAMES_IN_FLIGHT};
use fresh_render::fresh::resource::{
    BufferHandle, BufferKind, MeshVertex, NativeHandle, RenderBuffer, RenderShader, ShaderHandle, ShaderSource,
    TextureHandle,
};
use fresh_render::fresh::{
    win32_hwnd, ClearValues, ContextState, Error, GraphicsApi, RenderConfig, RenderContext, RenderWindow, Result,
    ScissorRect, Viewport,
};
use fresh_render::glam::Mat4;
use fresh_render::{engine_bail_warn, engine_debug, engine_err, engine_info, engine_warn};
use rustc_hash::FxHashSet;
use std::any::Any;
use std::ffi::c_void;
use std::rc::Rc;
use std::sync::Arc;
use windows::core::Interface;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::d3d12_buffer::Buffer;
use crate::d3d12_device::{create_device, transition_barrier, GpuShared};
use crate::d3d12_fence::FenceTimeline;
use crate::d3d12_shader::{Shader, DEPTH_FORMAT, RENDER_TARGET_FORMAT};
use crate::d3d12_texture::Texture;
use crate::d3d12_util::{present_interval, BACK_BUFFER_COUNT, SOURCE};

// ============================================================================
// Device and swapchain objects
// ============================================================================

struct DeviceObjects {
    factory: IDXGIFactory4,
    shared: Rc<GpuShared>,
    allocators: Vec<ID3D12CommandAllocator>,
    rtv_heap: ID3D12DescriptorHeap,
    rtv_increment: u32,
    dsv_heap: ID3D12DescriptorHeap,
    timeline: FenceTimeline,
}

struct SwapchainTargets {
    swap_chain: IDXGISwapChain3,
    render_targets: Vec<ID3D12Resource>,
    _depth: ID3D12Resource,
}

fn create_device_objects(validation: bool) -> Result<DeviceObjects> {
    let (factory, device) = create_device(validation)?;
    unsafe {
        let queue: ID3D12CommandQueue = device
            .CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
            .map_err(|e| Error::InitializationFailed(format!("CreateCommandQueue failed: {}", e)))?;

        let allocators = (0..FRAMES_IN_FLIGHT)
            .map(|_| {
                device
                    .CreateCommandAllocator::<ID3D12CommandAllocator>(D3D12_COMMAND_LIST_TYPE_DIRECT)
                    .map_err(|e| engine_err!(SOURCE, "CreateCommandAllocator failed: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;
        let list: ID3D12GraphicsCommandList = device
            .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocators[0], None)
            .map_err(|e| engine_err!(SOURCE, "CreateCommandList failed: {}", e))?;
        list.Close()
            .map_err(|e| engine_err!(SOURCE, "Initial command list close failed: {}", e))?;

        let rtv_heap: ID3D12DescriptorHeap = device
            .CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                NumDescriptors: BACK_BUFFER_COUNT,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                NodeMask: 0,
            })
            .map_err(|e| engine_err!(SOURCE, "RTV heap creation failed: {}", e))?;
        let rtv_increment = device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV);
        let dsv_heap: ID3D12DescriptorHeap = device
            .CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
                NumDescriptors: 1,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                NodeMask: 0,
            })
            .map_err(|e| engine_err!(SOURCE, "DSV heap creation failed: {}", e))?;

        let timeline = FenceTimeline::new(&device, &queue)?;
        let shared = Rc::new(GpuShared::new(device, queue, list)?);

        Ok(DeviceObjects {
            factory,
            shared,
            allocators,
            rtv_heap,
            rtv_increment,
            dsv_heap,
            timeline,
        })
    }
}

impl DeviceObjects {
    fn rtv_handle(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + (index * self.rtv_increment) as usize,
        }
    }

    fn dsv_handle(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        unsafe { self.dsv_heap.GetCPUDescriptorHandleForHeapStart() }
    }

    /// Back buffers' RTVs and a matching depth buffer
    fn create_views(
        &self,
        swap_chain: &IDXGISwapChain3,
        width: u32,
        height: u32,
    ) -> Result<(Vec<ID3D12Resource>, ID3D12Resource)> {
        let device = &self.shared.device;
        unsafe {
            let render_targets = (0..BACK_BUFFER_COUNT)
                .map(|i| {
                    let buffer: ID3D12Resource = swap_chain
                        .GetBuffer(i)
                        .map_err(|e| engine_err!(SOURCE, "GetBuffer({}) failed: {}", i, e))?;
                    device.CreateRenderTargetView(&buffer, None, self.rtv_handle(i));
                    Ok(buffer)
                })
                .collect::<Result<Vec<_>>>()?;

            let depth_desc = D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                Width: u64::from(width),
                Height: height,
                DepthOrArraySize: 1,
                MipLevels: 1,
                Format: DEPTH_FORMAT,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
                Flags: D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
                ..Default::default()
            };
            let clear_value = D3D12_CLEAR_VALUE {
                Format: DEPTH_FORMAT,
                Anonymous: D3D12_CLEAR_VALUE_0 {
                    DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: 1.0, Stencil: 0 },
                },
            };
            let mut depth: Option<ID3D12Resource> = None;
            device
                .CreateCommittedResource(
                    &D3D12_HEAP_PROPERTIES {
                        Type: D3D12_HEAP_TYPE_DEFAULT,
                        ..Default::default()
                    },
                    D3D12_HEAP_FLAG_NONE,
                    &depth_desc,
                    D3D12_RESOURCE_STATE_DEPTH_WRITE,
                    Some(&clear_value as *const _),
                    &mut depth,
                )
                .map_err(|e| engine_err!(SOURCE, "Depth buffer creation failed: {}", e))?;
            let depth = depth.ok_or_else(|| engine_err!(SOURCE, "CreateCommittedResource returned no depth buffer"))?;
            let dsv_desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
                Format: DEPTH_FORMAT,
                ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                Flags: D3D12_DSV_FLAG_NONE,
                Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                },
            };
            device.CreateDepthStencilView(
                &depth,
                Some(&dsv_desc as *const _),
                self.dsv_handle(),
            );
            Ok((render_targets, depth))
        }
    }

    fn create_swapchain(&self, hwnd: isize, width: u32, height: u32) -> Result<SwapchainTargets> {
        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: width,
            Height: height,
            Format: RENDER_TARGET_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: BACK_BUFFER_COUNT,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            ..Default::default()
        };
        let hwnd = HWND(hwnd as *mut c_void);
        let swap_chain: IDXGISwapChain3 = unsafe {
            let swap_chain = self
                .factory
                .CreateSwapChainForHwnd(&self.shared.queue, hwnd, &desc, None, None)
                .map_err(|e| Error::InitializationFailed(format!("CreateSwapChainForHwnd failed: {}", e)))?;
            if let Err(e) = self.factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) {
                engine_warn!(SOURCE, "MakeWindowAssociation failed: {}", e);
            }
            swap_chain
                .cast()
                .map_err(|e| engine_err!(SOURCE, "Swapchain has no IDXGISwapChain3: {}", e))?
        };
        let (render_targets, depth) = self.create_views(&swap_chain, width, height)?;
        Ok(SwapchainTargets {
            swap_chain,
            render_targets,
            _depth: depth,
        })
    }
}

// ============================================================================
// Context
// ============================================================================

/// Direct3D 12 render context
pub struct D3D12RenderContext {
    config: RenderConfig,
    lifecycle: Lifecycle,
    fences: FenceRing<FRAMES_IN_FLIGHT>,
    tracker: ResourceTracker,

    window: Option<Arc<dyn RenderWindow>>,
    objects: Option<DeviceObjects>,
    targets: Option<SwapchainTargets>,

    swapchain_size: (u32, u32),
    back_buffer: u32,
    clear: ClearValues,
    viewport: Viewport,
    scissor: ScissorRect,

    chunks: ChunkMeshCache,
    chunk_shader: Option<Shader>,
}

impl D3D12RenderContext {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(SOURCE),
            fences: FenceRing::new(),
            tracker: ResourceTracker::new(),
            window: None,
            objects: None,
            targets: None,
            swapchain_size: (0, 0),
            back_buffer: 0,
            clear: ClearValues::default(),
            viewport: Viewport::default(),
            scissor: ScissorRect::default(),
            chunks: ChunkMeshCache::new(),
            chunk_shader: None,
        }
    }

    pub fn device(&self) -> Option<&ID3D12Device> {
        self.objects.as_ref().map(|o| &o.shared.device)
    }

    pub fn command_queue(&self) -> Option<&ID3D12CommandQueue> {
        self.objects.as_ref().map(|o| &o.shared.queue)
    }

    /// The frame's command list, for callers recording their own draws
    ///
    /// Only open between `begin_frame` and `end_frame`.
    pub fn command_list(&self) -> Option<&ID3D12GraphicsCommandList> {
        if self.lifecycle.is_recording() {
            self.objects.as_ref().map(|o| &o.shared.list)
        } else {
            None
        }
    }

    pub fn swap_chain(&self) -> Option<&IDXGISwapChain3> {
        self.targets.as_ref().map(|t| &t.swap_chain)
    }

    /// Fence value the current frame slot will signal
    pub fn current_fence_value(&self) -> u64 {
        self.fences.current_value()
    }

    /// Last value the frame fence has reached on the GPU
    pub fn completed_fence_value(&self) -> u64 {
        self.objects.as_ref().map(|o| o.timeline.completed_value()).unwrap_or(0)
    }

    fn objects(&self) -> Result<&DeviceObjects> {
        self.objects.as_ref().ok_or(Error::NotInitialized)
    }

    fn shared(&self) -> Result<Rc<GpuShared>> {
        self.objects().map(|o| Rc::clone(&o.shared))
    }

    fn record_viewport(&self, list: &ID3D12GraphicsCommandList) {
        let vp = D3D12_VIEWPORT {
            TopLeftX: self.viewport.x as f32,
            TopLeftY: self.viewport.y as f32,
            Width: self.viewport.width as f32,
            Height: self.viewport.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        unsafe { list.RSSetViewports(&[vp]) };
    }

    fn record_scissor(&self, list: &ID3D12GraphicsCommandList) {
        let rect = RECT {
            left: self.scissor.x,
            top: self.scissor.y,
            right: self.scissor.x + self.scissor.width as i32,
            bottom: self.scissor.y + self.scissor.height as i32,
        };
        unsafe { list.RSSetScissorRects(&[rect]) };
    }

    fn record_clear_color(&self) {
        if let Some(objects) = &self.objects {
            unsafe {
                objects
                    .shared
                    .list
                    .ClearRenderTargetView(objects.rtv_handle(self.back_buffer), self.clear.color.as_ptr(), None)
            };
        }
    }

    fn record_clear_depth(&self) {
        if let Some(objects) = &self.objects {
            unsafe {
                objects
                    .shared
                    .list
                    .ClearDepthStencilView(objects.dsv_handle(), D3D12_CLEAR_FLAG_DEPTH, self.clear.depth, 0, &[])
            };
        }
    }

    fn create_buffer(&mut self, kind: BufferKind, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.lifecycle.require_initialized("create_buffer")?;
        let buffer = Buffer::new(self.shared()?, kind, data, size, self.tracker.track())?;
        engine_debug!(SOURCE, "Created {:?} buffer ({} bytes)", kind, size);
        Ok(Rc::new(buffer))
    }

    /// Signal, advance the ring and free what the GPU finished with
    fn advance_frame(&mut self) -> Result<()> {
        let objects = self.objects.as_mut().ok_or(Error::NotInitialized)?;
        let slot = self.fences.advance(&mut objects.timeline)?;
        objects.shared.set_frame_slot(slot);
        objects.shared.collect_retired(objects.timeline.completed_value());
        Ok(())
    }

    /// Signal the current slot and block until the queue is empty
    fn drain_gpu(&mut self) -> Result<()> {
        let objects = self.objects.as_mut().ok_or(Error::NotInitialized)?;
        self.fences.wait_idle(&mut objects.timeline)?;
        objects.shared.release_all_retired();
        Ok(())
    }

    fn finish_rebuild(&mut self, width: u32, height: u32) {
        self.back_buffer = self
            .targets
            .as_ref()
            .map(|t| unsafe { t.swap_chain.GetCurrentBackBufferIndex() })
            .unwrap_or(0);
        self.fences.reset_after_resize(self.back_buffer as usize);
        if let Some(objects) = &self.objects {
            objects.shared.set_frame_slot(self.fences.index());
        }
        self.swapchain_size = (width, height);
        self.viewport = Viewport::full(width, height);
        self.scissor = Viewport::full(width, height);
        engine_debug!(SOURCE, "Swapchain rebuilt at {}x{}", width, height);
    }

    fn chunk_shader(&mut self) -> Result<&Shader> {
        if self.chunk_shader.is_none() {
            // Built-in, so not counted among the caller's live resources
            let shader = Shader::new(
                self.shared()?,
                &ShaderSource::Hlsl(CHUNK_VERTEX_HLSL.to_string()),
                &ShaderSource::Hlsl(CHUNK_PIXEL_HLSL.to_string()),
                ResourceTracker::new().track(),
            )?;
            self.chunk_shader = Some(shader);
        }
        self.chunk_shader.as_ref().ok_or(Error::NotInitialized)
    }
}

impl RenderContext for D3D12RenderContext {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::DirectX12
    }

    fn state(&self) -> ContextState {
        self.lifecycle.state()
    }

    fn initialize(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.begin_initialize()?;
        let (width, height) = window.client_size();
        validate_swapchain_size(width, height)?;
        let hwnd = win32_hwnd(window.as_ref())?;

        let objects = create_device_objects(self.config.enable_validation)?;
        let targets = objects.create_swapchain(hwnd, width, height)?;

        self.objects = Some(objects);
        self.targets = Some(targets);
        self.window = Some(window);
        self.fences = FenceRing::new();
        self.finish_rebuild(width, height);
        self.lifecycle.mark_initialized();
        engine_info!(SOURCE, "Direct3D 12 render context initialized ({}x{})", width, height);
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.lifecycle.shut_down() {
            return;
        }
        if let Some(objects) = &self.objects {
            objects.shared.set_recording(false);
        }
        if let Err(e) = self.drain_gpu() {
            engine_warn!(SOURCE, "GPU drain before shutdown failed: {}", e);
        }
        self.chunks.clear();
        self.chunk_shader = None;
        if let Some(objects) = &self.objects {
            objects.shared.release_all_retired();
        }
        self.tracker.warn_leaks(SOURCE);
        self.targets = None;
        self.objects = None;
        self.window = None;
        engine_info!(SOURCE, "Direct3D 12 render context shut down");
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
        let back_buffer = unsafe { targets.swap_chain.GetCurrentBackBufferIndex() };
        let allocator = &objects.allocators[self.fences.index()];
        let list = &objects.shared.list;

        // The previous end_frame waited for this slot's fence, so the
        // allocator is no longer referenced by the GPU
        unsafe {
            allocator
                .Reset()
                .map_err(|e| engine_err!(SOURCE, "Command allocator reset failed: {}", e))?;
            list.Reset(allocator, None)
                .map_err(|e| engine_err!(SOURCE, "Command list reset failed: {}", e))?;

            list.ResourceBarrier(&[transition_barrier(
                &targets.render_targets[back_buffer as usize],
                D3D12_RESOURCE_STATE_PRESENT,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            )]);
            let rtv = objects.rtv_handle(back_buffer);
            let dsv = objects.dsv_handle();
            list.OMSetRenderTargets(1, Some(&rtv as *const _), false, Some(&dsv as *const _));
            list.SetGraphicsRootSignature(&objects.shared.root_signature);
            list.SetDescriptorHeaps(&[Some(objects.shared.srv_heap.clone())]);
        }
        self.record_viewport(list);
        self.record_scissor(list);

        objects.shared.set_submit_value(self.fences.current_value());
        objects.shared.set_recording(true);
        self.back_buffer = back_buffer;
        self.record_clear_color();
        self.record_clear_depth();
        self.lifecycle.begin_recording();
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.lifecycle.check_end_frame()?;
        let objects = self.objects()?;
        objects.shared.set_recording(false);

        let submitted = match &self.targets {
            Some(targets) => unsafe {
                let list = &objects.shared.list;
                list.ResourceBarrier(&[transition_barrier(
                    &targets.render_targets[self.back_buffer as usize],
                    D3D12_RESOURCE_STATE_RENDER_TARGET,
                    D3D12_RESOURCE_STATE_PRESENT,
                )]);
                list.Close()
                    .map_err(|e| engine_err!(SOURCE, "Command list close failed: {}", e))
                    .and_then(|_| {
                        let list: ID3D12CommandList = list
                            .cast()
                            .map_err(|e| engine_err!(SOURCE, "Command list cast failed: {}", e))?;
                        objects.shared.queue.ExecuteCommandLists(&[Some(list)]);
                        targets
                            .swap_chain
                            .Present(present_interval(self.config.vsync), DXGI_PRESENT(0))
                            .ok()
                            .map_err(|e| engine_err!(SOURCE, "Present failed: {}", e))
                    })
            },
            None => Err(Error::SwapchainOutOfDate),
        };

        // The ring moves whatever the present outcome
        let advanced = self.advance_frame();
        self.lifecycle.end_recording();
        submitted.and(advanced)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.lifecycle.require_initialized("wait_idle")?;
        self.drain_gpu()
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = Viewport { x, y, width, height };
        if self.lifecycle.is_recording() {
            if let Some(objects) = &self.objects {
                self.record_viewport(&objects.shared.list);
            }
        }
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.scissor = ScissorRect { x, y, width, height };
        if self.lifecycle.is_recording() {
            if let Some(objects) = &self.objects {
                self.record_scissor(&objects.shared.list);
            }
        }
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear.color = [r, g, b, a];
        if self.lifecycle.is_recording() {
            self.record_clear_color();
        }
    }

    fn clear_depth(&mut self, depth: f32) {
        self.clear.depth = depth;
        if self.lifecycle.is_recording() {
            self.record_clear_depth();
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
        let texture = Texture::new(self.shared()?, width, height, data, self.tracker.track())?;
        engine_debug!(SOURCE, "Created {}x{} texture", width, height);
        Ok(Rc::new(texture))
    }

    fn create_shader(&mut self, vertex: &ShaderSource, fragment: &ShaderSource) -> Result<ShaderHandle> {
        self.lifecycle.require_initialized("create_shader")?;
        let shader = Shader::new(self.shared()?, vertex, fragment, self.tracker.track())?;
        Ok(Rc::new(shader))
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.lifecycle.require_idle("recreate_swapchain")?;
        validate_swapchain_size(width, height)?;
        self.drain_gpu()?;

        let objects = self.objects.as_ref().ok_or(Error::NotInitialized)?;
        let mut targets = self.targets.take().ok_or(Error::NotInitialized)?;
        // Every reference to the old back buffers must go before ResizeBuffers
        targets.render_targets.clear();
        let SwapchainTargets { swap_chain, .. } = targets;
        unsafe {
            swap_chain
                .ResizeBuffers(BACK_BUFFER_COUNT, width, height, RENDER_TARGET_FORMAT, DXGI_SWAP_CHAIN_FLAG(0))
                .map_err(|e| engine_err!(SOURCE, "ResizeBuffers({}x{}) failed: {}", width, height, e))?;
        }
        let (render_targets, depth) = objects.create_views(&swap_chain, width, height)?;
        self.targets = Some(SwapchainTargets {
            swap_chain,
            render_targets,
            _depth: depth,
        });
        self.finish_rebuild(width, height);
        Ok(())
    }

    fn set_viewport_window(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.require_idle("set_viewport_window")?;
        let (width, height) = window.client_size();
        validate_swapchain_size(width, height)?;
        let hwnd = win32_hwnd(window.as_ref())?;
        self.drain_gpu()?;

        self.targets = None;
        let targets = self.objects()?.create_swapchain(hwnd, width, height)?;
        self.targets = Some(targets);
        self.window = Some(window);
        self.finish_rebuild(width, height);
        Ok(())
    }

    fn swapchain_width(&self) -> u32 {
        self.swapchain_size.0
    }

    fn swapchain_height(&self) -> u32 {
        self.swapchain_size.1
    }

    fn frame_index(&self) -> usize {
        self.fences.index()
    }

    fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    fn native_device(&self) -> NativeHandle {
        match &self.objects {
            Some(objects) => NativeHandle::ComPtr(objects.shared.device.as_raw()),
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

impl Drop for D3D12RenderContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Chunk meshes
// ============================================================================

impl ChunkMeshRenderer for D3D12RenderContext {
    fn upload_chunk_mesh(&mut self, coord: ChunkCoord, vertices: &[MeshVertex], indices: &[u32]) -> Result<()> {
        if vertices.is_empty() || indices.is_empty() {
            self.release_chunk_mesh(coord);
            return Ok(());
        }
        let mesh = ChunkMesh::upload(self, vertices, indices)?;
        // A replaced mesh is retired until the frames using it complete
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
            unsafe { objects.shared.list.DrawIndexedInstanced(mesh.index_count, 1, 0, 0, 0) };
        }
        Ok(())
    }
}
