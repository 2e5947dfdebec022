/// Mock render context for unit tests (no GPU required)
///
/// Drives the same pacing primitives as the explicit backends (Lifecycle,
/// FenceRing, ResourceTracker) against a simulated GPU queue that completes
/// submissions a configurable number of frames late.

#[cfg(test)]
use std::any::Any;
#[cfg(test)]
use std::cell::{Cell, RefCell};
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::rc::Rc;
#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
use glam::{Mat4, Vec2, Vec3, Vec4};
#[cfg(test)]
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};

#[cfg(test)]
use crate::context::{validate_swapchain_size, ClearValues, RenderContext, ScissorRect, Viewport};
#[cfg(test)]
use crate::error::{Error, Result};
#[cfg(test)]
use crate::fence_ring::{FenceRing, GpuTimeline};
#[cfg(test)]
use crate::graphics_api::GraphicsApi;
#[cfg(test)]
use crate::lifecycle::{ContextState, Lifecycle};
#[cfg(test)]
use crate::resource::{
    validate_buffer_request, validate_buffer_update, validate_texture_request, validate_texture_unit,
    BufferHandle, BufferKind, NativeHandle, RenderBuffer, RenderShader, RenderTexture, ShaderHandle,
    ShaderSource, TextureHandle,
};
#[cfg(test)]
use crate::resource_tracker::{ResourceTracker, TrackedResource};
#[cfg(test)]
use crate::uniform_block::{UniformBlock, UniformValue};
#[cfg(test)]
use crate::window::RenderWindow;
#[cfg(test)]
use crate::{engine_bail, engine_warn};

#[cfg(test)]
const SOURCE: &str = "fresh::mock";

// ============================================================================
// Mock Window
// ============================================================================

#[cfg(test)]
#[derive(Debug)]
pub struct MockWindow {
    size: Mutex<(u32, u32)>,
}

#[cfg(test)]
impl MockWindow {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            size: Mutex::new((width, height)),
        })
    }

    /// Simulate the user dragging the window border
    pub fn resize(&self, width: u32, height: u32) {
        *self.size.lock().unwrap() = (width, height);
    }
}

#[cfg(test)]
impl HasWindowHandle for MockWindow {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::NotSupported)
    }
}

#[cfg(test)]
impl HasDisplayHandle for MockWindow {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::NotSupported)
    }
}

#[cfg(test)]
impl RenderWindow for MockWindow {
    fn client_size(&self) -> (u32, u32) {
        *self.size.lock().unwrap()
    }
}

// ============================================================================
// Simulated GPU queue
// ============================================================================

/// Completes each signal `latency` submissions after it was enqueued
#[cfg(test)]
#[derive(Debug, Default)]
pub struct SimulatedGpu {
    pending: VecDeque<u64>,
    completed: u64,
    latency: usize,
    pub waits: Vec<u64>,
}

#[cfg(test)]
impl SimulatedGpu {
    pub fn with_latency(latency: usize) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn complete_front(&mut self) -> bool {
        match self.pending.pop_front() {
            Some(value) => {
                self.completed = self.completed.max(value);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
impl GpuTimeline for SimulatedGpu {
    fn signal(&mut self, value: u64) -> Result<()> {
        self.pending.push_back(value);
        while self.pending.len() > self.latency {
            self.complete_front();
        }
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.completed
    }

    fn wait_for(&mut self, value: u64) -> Result<()> {
        self.waits.push(value);
        while self.completed < value {
            if !self.complete_front() {
                engine_bail!(SOURCE, "wait for fence value {} can never complete", value);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Mock resources
// ============================================================================

#[cfg(test)]
pub struct MockBuffer {
    kind: BufferKind,
    id: u32,
    pub data: RefCell<Vec<u8>>,
    pub bound: Cell<bool>,
    _tracked: TrackedResource,
}

#[cfg(test)]
impl RenderBuffer for MockBuffer {
    fn kind(&self) -> BufferKind {
        self.kind
    }

    fn size(&self) -> usize {
        self.data.borrow().len()
    }

    fn update_data(&self, data: &[u8], offset: usize) -> Result<()> {
        let mut storage = self.data.borrow_mut();
        validate_buffer_update(storage.len(), data.len(), offset)?;
        storage[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn bind(&self) {
        self.bound.set(true);
    }

    fn unbind(&self) {
        self.bound.set(false);
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::GlObject(self.id)
    }
}

#[cfg(test)]
pub struct MockTexture {
    width: u32,
    height: u32,
    id: u32,
    pub bound_unit: Cell<Option<u32>>,
    _tracked: TrackedResource,
}

#[cfg(test)]
impl RenderTexture for MockTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn bind(&self, unit: u32) {
        match validate_texture_unit(unit) {
            Ok(()) => self.bound_unit.set(Some(unit)),
            Err(e) => engine_warn!(SOURCE, "texture bind ignored: {}", e),
        }
    }

    fn unbind(&self) {
        self.bound_unit.set(None);
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::GlObject(self.id)
    }
}

#[cfg(test)]
pub struct MockShader {
    id: u32,
    pub uniforms: RefCell<UniformBlock>,
    pub bound: Cell<bool>,
    _tracked: TrackedResource,
}

#[cfg(test)]
impl MockShader {
    fn set(&self, name: &str, value: UniformValue) {
        if let Err(e) = self.uniforms.borrow_mut().set(name, value) {
            engine_warn!(SOURCE, "uniform '{}' not set: {}", name, e);
        }
    }
}

#[cfg(test)]
impl RenderShader for MockShader {
    fn bind(&self) {
        self.bound.set(true);
    }

    fn unbind(&self) {
        self.bound.set(false);
    }

    fn set_uniform_int(&self, name: &str, value: i32) {
        self.set(name, UniformValue::Int(value));
    }

    fn set_uniform_float(&self, name: &str, value: f32) {
        self.set(name, UniformValue::Float(value));
    }

    fn set_uniform_vec2(&self, name: &str, value: Vec2) {
        self.set(name, UniformValue::Vec2(value));
    }

    fn set_uniform_vec3(&self, name: &str, value: Vec3) {
        self.set(name, UniformValue::Vec3(value));
    }

    fn set_uniform_vec4(&self, name: &str, value: Vec4) {
        self.set(name, UniformValue::Vec4(value));
    }

    fn set_uniform_mat4(&self, name: &str, value: Mat4) {
        self.set(name, UniformValue::Mat4(value));
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::GlObject(self.id)
    }
}

// ============================================================================
// Mock Context
// ============================================================================

/// Command recorded into the current frame
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum MockCommand {
    ClearColor([f32; 4]),
    ClearDepth(f32),
    Viewport(Viewport),
    Scissor(ScissorRect),
}

#[cfg(test)]
pub struct MockContext {
    lifecycle: Lifecycle,
    fences: FenceRing<2>,
    pub gpu: SimulatedGpu,
    tracker: ResourceTracker,
    window: Option<Arc<dyn RenderWindow>>,
    swapchain_size: (u32, u32),
    swapchain_stale: bool,
    clear: ClearValues,
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub commands: Vec<MockCommand>,
    pub presented_frames: u64,
    pub swapchain_rebuilds: u32,
    /// Fence value each slot's last submission signals
    slot_submissions: [Option<u64>; 2],
    /// Slot handed out while the GPU still owned it
    pub reuse_violations: u32,
    pub fail_next_present: bool,
    pub fail_device_creation: bool,
    next_id: u32,
}

#[cfg(test)]
impl MockContext {
    pub fn new() -> Self {
        Self::with_gpu_latency(1)
    }

    pub fn with_gpu_latency(latency: usize) -> Self {
        Self {
            lifecycle: Lifecycle::new(SOURCE),
            fences: FenceRing::new(),
            gpu: SimulatedGpu::with_latency(latency),
            tracker: ResourceTracker::new(),
            window: None,
            swapchain_size: (0, 0),
            swapchain_stale: false,
            clear: ClearValues::default(),
            viewport: Viewport::default(),
            scissor: ScissorRect::default(),
            commands: Vec::new(),
            presented_frames: 0,
            swapchain_rebuilds: 0,
            slot_submissions: [None; 2],
            reuse_violations: 0,
            fail_next_present: false,
            fail_device_creation: false,
            next_id: 1,
        }
    }

    /// Simulate an OUT_OF_DATE present result
    pub fn mark_swapchain_stale(&mut self) {
        self.swapchain_stale = true;
    }

    pub fn clear_values(&self) -> ClearValues {
        self.clear
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_buffer(&mut self, kind: BufferKind, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.lifecycle.require_initialized("create_buffer")?;
        validate_buffer_request(kind, data, size)?;
        let mut storage = vec![0u8; size];
        if let Some(data) = data {
            storage.copy_from_slice(&data[..size]);
        }
        Ok(Rc::new(MockBuffer {
            kind,
            id: self.allocate_id(),
            data: RefCell::new(storage),
            bound: Cell::new(false),
            _tracked: self.tracker.track(),
        }))
    }

    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        validate_swapchain_size(width, height)?;
        self.fences.wait_idle(&mut self.gpu)?;
        self.swapchain_size = (width, height);
        self.swapchain_stale = false;
        self.fences.reset_after_resize(0);
        self.swapchain_rebuilds += 1;
        Ok(())
    }
}

#[cfg(test)]
impl RenderContext for MockContext {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::Vulkan
    }

    fn state(&self) -> ContextState {
        self.lifecycle.state()
    }

    fn initialize(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.begin_initialize()?;
        if self.fail_device_creation {
            return Err(Error::InitializationFailed("no suitable adapter".to_string()));
        }
        let (width, height) = window.client_size();
        validate_swapchain_size(width, height)?;
        self.swapchain_size = (width, height);
        self.window = Some(window);
        self.lifecycle.mark_initialized();
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.lifecycle.shut_down() {
            let _ = self.fences.wait_idle(&mut self.gpu);
            self.tracker.warn_leaks(SOURCE);
        }
        self.window = None;
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.lifecycle.check_begin_frame()?;
        if let Some(window) = &self.window {
            if self.swapchain_stale || window.client_size() != self.swapchain_size {
                return Err(Error::SwapchainOutOfDate);
            }
        }

        // The slot must have been released by the previous frame advance
        if let Some(value) = self.slot_submissions[self.fences.index()] {
            if self.gpu.completed_value() < value {
                self.reuse_violations += 1;
            }
        }

        self.commands.clear();
        let (width, height) = self.swapchain_size;
        self.viewport = Viewport::full(width, height);
        self.scissor = ScissorRect::full(width, height);
        self.commands.push(MockCommand::Viewport(self.viewport));
        self.commands.push(MockCommand::Scissor(self.scissor));
        self.commands.push(MockCommand::ClearColor(self.clear.color));
        self.commands.push(MockCommand::ClearDepth(self.clear.depth));
        self.lifecycle.begin_recording();
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.lifecycle.check_end_frame()?;
        self.slot_submissions[self.fences.index()] = Some(self.fences.current_value());
        self.fences.advance(&mut self.gpu)?;
        self.lifecycle.end_recording();

        if self.fail_next_present {
            self.fail_next_present = false;
            self.swapchain_stale = true;
            return Err(Error::SwapchainOutOfDate);
        }
        self.presented_frames += 1;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.lifecycle.require_initialized("wait_idle")?;
        self.fences.wait_idle(&mut self.gpu)
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = Viewport { x, y, width, height };
        if self.lifecycle.is_recording() {
            self.commands.push(MockCommand::Viewport(self.viewport));
        }
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.scissor = ScissorRect { x, y, width, height };
        if self.lifecycle.is_recording() {
            self.commands.push(MockCommand::Scissor(self.scissor));
        }
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear.color = [r, g, b, a];
        if self.lifecycle.is_recording() {
            self.commands.push(MockCommand::ClearColor(self.clear.color));
        }
    }

    fn clear_depth(&mut self, depth: f32) {
        self.clear.depth = depth;
        if self.lifecycle.is_recording() {
            self.commands.push(MockCommand::ClearDepth(depth));
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
        validate_texture_request(width, height, data)?;
        Ok(Rc::new(MockTexture {
            width,
            height,
            id: self.allocate_id(),
            bound_unit: Cell::new(None),
            _tracked: self.tracker.track(),
        }))
    }

    fn create_shader(&mut self, vertex: &ShaderSource, fragment: &ShaderSource) -> Result<ShaderHandle> {
        self.lifecycle.require_initialized("create_shader")?;
        for stage in [vertex, fragment] {
            let empty = match stage {
                ShaderSource::Glsl(src) | ShaderSource::Hlsl(src) => src.trim().is_empty(),
                ShaderSource::SpirV(words) => words.is_empty(),
            };
            if empty {
                return Err(Error::ShaderCompilation(format!("empty {} stage", stage.kind_name())));
            }
        }
        Ok(Rc::new(MockShader {
            id: self.allocate_id(),
            uniforms: RefCell::new(UniformBlock::packed()),
            bound: Cell::new(false),
            _tracked: self.tracker.track(),
        }))
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.lifecycle.require_idle("recreate_swapchain")?;
        self.rebuild_swapchain(width, height)
    }

    fn set_viewport_window(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.require_idle("set_viewport_window")?;
        let (width, height) = window.client_size();
        self.rebuild_swapchain(width, height)?;
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
        self.fences.index()
    }

    fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    fn native_device(&self) -> NativeHandle {
        if self.lifecycle.is_initialized() {
            NativeHandle::Vulkan(0x1)
        } else {
            NativeHandle::Null
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

#[cfg(test)]
#[path = "mock_context_tests.rs"]
mod tests;
