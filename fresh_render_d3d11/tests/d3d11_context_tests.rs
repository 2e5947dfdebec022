//! Integration tests for D3D11RenderContext
//!
//! Everything except the registration check needs a Direct3D 11 capable GPU
//! and is marked with #[ignore].
//!
//! Run with: cargo test --test d3d11_context_tests -- --ignored

use fresh_render::fresh::{is_backend_registered, unregister_backend, GraphicsApi};
use serial_test::serial;

#[test]
#[serial]
fn test_register_is_platform_gated() {
    unregister_backend(GraphicsApi::DirectX11);
    fresh_render_d3d11::register();
    assert_eq!(is_backend_registered(GraphicsApi::DirectX11), cfg!(windows));
    unregister_backend(GraphicsApi::DirectX11);
}

#[cfg(windows)]
mod gpu {
    use fresh_render::fresh::chunk::{ChunkCoord, ChunkMeshRenderer};
    use fresh_render::fresh::resource::{MeshVertex, NativeHandle, RenderBuffer, RenderTexture, ShaderSource};
    use fresh_render::fresh::{ContextState, Error, RenderConfig, RenderContext, RenderWindow};
    use fresh_render::glam::{Mat4, Vec3};
    use fresh_render_d3d11::D3D11RenderContext;
    use rustc_hash::FxHashSet;
    use std::sync::Arc;
    use winit::event_loop::{EventLoop, EventLoopBuilder};
    use winit::platform::windows::EventLoopBuilderExtWindows;
    use windows::core::Interface;
    use windows::Win32::Graphics::Direct3D11::{ID3D11Buffer, ID3D11Device};
    use winit::window::Window;

    /// Vertex stage reading the shader's own constants (b0) and a bound uniform buffer (b1)
    const TINTED_VERTEX_HLSL: &str = r#"
cbuffer ChunkConstants : register(b0)
{
    float4x4 modelViewProj;
};

cbuffer Tint : register(b1)
{
    float4 tint;
};

struct VSInput
{
    float3 position : POSITION;
    float3 normal : NORMAL;
};

struct PSInput
{
    float4 position : SV_Position;
    float3 normal : NORMAL;
};

PSInput main(VSInput input)
{
    PSInput output;
    output.position = mul(modelViewProj, float4(input.position, 1.0));
    output.normal = input.normal * tint.rgb;
    return output;
}
"#;

    /// Hidden 800x600 window; the event loop must outlive it
    #[allow(deprecated)]
    fn create_test_window() -> (Arc<Window>, EventLoop<()>) {
        let event_loop = EventLoopBuilder::new().with_any_thread(true).build().unwrap();
        let attrs = Window::default_attributes()
            .with_title("D3D11 Test Window")
            .with_inner_size(winit::dpi::PhysicalSize::new(800, 600))
            .with_visible(false);
        let window = event_loop.create_window(attrs).unwrap();
        (Arc::new(window), event_loop)
    }

    fn create_context() -> (D3D11RenderContext, Arc<Window>, EventLoop<()>) {
        let (window, event_loop) = create_test_window();
        let mut context = D3D11RenderContext::new(RenderConfig {
            enable_validation: false,
            ..RenderConfig::default()
        });
        context.initialize(window.clone()).unwrap();
        (context, window, event_loop)
    }

    fn quad() -> (Vec<MeshVertex>, Vec<u32>) {
        let n = Vec3::Y;
        let vertices = vec![
            MeshVertex::new(Vec3::new(0.0, 0.0, 0.0), n),
            MeshVertex::new(Vec3::new(1.0, 0.0, 0.0), n),
            MeshVertex::new(Vec3::new(1.0, 0.0, 1.0), n),
            MeshVertex::new(Vec3::new(0.0, 0.0, 1.0), n),
        ];
        (vertices, vec![0, 1, 2, 0, 2, 3])
    }

    // ============================================================================
    // LIFECYCLE
    // ============================================================================

    #[test]
    #[ignore] // Requires GPU
    fn test_d3d11_initialize_and_frame() {
        let (mut context, window, _event_loop) = create_context();
        let (width, height) = window.client_size();

        assert_eq!(context.state(), ContextState::Initialized);
        assert_eq!(context.swapchain_width(), width);
        assert_eq!(context.swapchain_height(), height);
        assert!(matches!(context.native_device(), NativeHandle::ComPtr(_)));

        context.clear_color(0.0, 0.0, 0.0, 1.0);
        context.begin_frame().unwrap();
        assert_eq!(context.state(), ContextState::Recording);
        context.end_frame().unwrap();

        context.shutdown();
        assert_eq!(context.state(), ContextState::ShutDown);
        assert_eq!(context.live_resource_count(), 0);
    }

    #[test]
    #[ignore] // Requires GPU
    fn test_d3d11_initialize_twice_fails() {
        let (mut context, window, _event_loop) = create_context();
        assert!(matches!(context.initialize(window), Err(Error::AlreadyInitialized)));
        assert_eq!(context.state(), ContextState::Initialized);
    }

    #[test]
    #[ignore] // Requires GPU
    fn test_d3d11_ring_wraps_after_two_frames() {
        let (mut context, _window, _event_loop) = create_context();
        for _ in 0..context.frames_in_flight() {
            context.begin_frame().unwrap();
            context.end_frame().unwrap();
        }
        assert_eq!(context.frame_index(), 0);
    }

    #[test]
    #[ignore] // Requires GPU
    fn test_d3d11_recreate_swapchain_sizes() {
        let (mut context, _window, _event_loop) = create_context();
        context.recreate_swapchain(640, 360).unwrap();
        assert_eq!(context.swapchain_width(), 640);
        assert_eq!(context.swapchain_height(), 360);
        assert!(context.recreate_swapchain(0, 360).is_err());
    }

    // ============================================================================
    // RESOURCES
    // ============================================================================

    #[test]
    #[ignore] // Requires GPU
    fn test_d3d11_buffer_update_keeps_handle() {
        let (mut context, _window, _event_loop) = create_context();
        let data = [7u8; 96];
        let buffer = context.create_vertex_buffer(Some(&data), data.len()).unwrap();
        let handle = buffer.native_handle();

        buffer.update_data(&data, 0).unwrap();

        assert_eq!(buffer.size(), 96);
        assert_eq!(buffer.native_handle(), handle);
        assert!(buffer.update_data(&data, 1).is_err());
    }

    #[test]
    #[ignore] // Requires GPU
    fn test_d3d11_uniform_buffer_partial_update() {
        let (mut context, _window, _event_loop) = create_context();
        let buffer = context.create_uniform_buffer(None, 64).unwrap();
        buffer.update_data(&[1u8; 16], 16).unwrap();
        assert_eq!(buffer.size(), 64);
    }

    #[test]
    #[ignore] // Requires GPU
    fn test_d3d11_texture_and_shader() {
        let (mut context, _window, _event_loop) = create_context();
        let pixels = vec![255u8; 4 * 4 * 4];
        let texture = context.create_texture(4, 4, Some(&pixels)).unwrap();
        assert_eq!((texture.width(), texture.height()), (4, 4));

        let vs = ShaderSource::Hlsl(fresh_render::fresh::chunk::CHUNK_VERTEX_HLSL.to_string());
        let ps = ShaderSource::Hlsl(fresh_render::fresh::chunk::CHUNK_PIXEL_HLSL.to_string());
        let shader = context.create_shader(&vs, &ps).unwrap();
        shader.set_uniform_mat4("modelViewProj", Mat4::IDENTITY);
        assert_eq!(context.live_resource_count(), 2);

        let broken = ShaderSource::Hlsl("float4 main( : SV_Target".to_string());
        assert!(matches!(
            context.create_shader(&vs, &broken),
            Err(Error::ShaderCompilation(_))
        ));
    }

    /// Constant buffers the immediate context has bound at b0 and b1 of the vertex stage
    fn bound_vertex_constants(context: &D3D11RenderContext) -> [NativeHandle; 2] {
        let NativeHandle::ComPtr(raw) = context.native_device() else {
            panic!("context has no device");
        };
        let device = unsafe { ID3D11Device::from_raw_borrowed(&raw) }.unwrap();
        let immediate = unsafe { device.GetImmediateContext() }.unwrap();
        let mut bound: [Option<ID3D11Buffer>; 2] = [None, None];
        unsafe { immediate.VSGetConstantBuffers(0, Some(&mut bound)) };
        bound.map(|buffer| match buffer {
            Some(buffer) => NativeHandle::ComPtr(buffer.as_raw()),
            None => NativeHandle::Null,
        })
    }

    #[test]
    #[ignore] // Requires GPU
    fn test_d3d11_shader_constants_and_uniform_buffer_bound_together() {
        let (mut context, _window, _event_loop) = create_context();
        let vs = ShaderSource::Hlsl(TINTED_VERTEX_HLSL.to_string());
        let ps = ShaderSource::Hlsl(fresh_render::fresh::chunk::CHUNK_PIXEL_HLSL.to_string());
        let shader = context.create_shader(&vs, &ps).unwrap();
        let tint = [1.0f32, 0.5, 0.25, 1.0];
        let tint_bytes: Vec<u8> = tint.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let uniforms = context.create_uniform_buffer(Some(&tint_bytes), tint_bytes.len()).unwrap();

        context.begin_frame().unwrap();
        shader.set_uniform_mat4("modelViewProj", Mat4::IDENTITY);
        shader.bind();
        uniforms.bind();

        let [constants, user] = bound_vertex_constants(&context);
        assert!(!constants.is_null());
        assert_ne!(constants, user);
        assert_eq!(user, uniforms.native_handle());

        // Rebinding the shader leaves b1 alone
        shader.bind();
        assert_eq!(bound_vertex_constants(&context), [constants, uniforms.native_handle()]);

        uniforms.unbind();
        assert_eq!(bound_vertex_constants(&context), [constants, NativeHandle::Null]);
        context.end_frame().unwrap();
    }

    // ============================================================================
    // CHUNK MESHES
    // ============================================================================

    #[test]
    #[ignore] // Requires GPU
    fn test_d3d11_chunk_meshes() {
        let (mut context, _window, _event_loop) = create_context();
        let (vertices, indices) = quad();
        let a = ChunkCoord::new(0, 0, 0);
        let b = ChunkCoord::new(1, 0, 0);

        context.upload_chunk_mesh(a, &vertices, &indices).unwrap();
        context.upload_chunk_mesh(b, &vertices, &indices).unwrap();
        assert_eq!(context.chunk_mesh_count(), 2);
        assert!(context.draw_chunk_meshes(Mat4::IDENTITY).is_err());

        context.begin_frame().unwrap();
        context.draw_chunk_meshes(Mat4::IDENTITY).unwrap();
        context.end_frame().unwrap();

        let visible: FxHashSet<ChunkCoord> = [a].into_iter().collect();
        assert_eq!(context.retain_visible_chunks(&visible), 1);
        context.upload_chunk_mesh(a, &[], &[]).unwrap();
        assert_eq!(context.chunk_mesh_count(), 0);
        assert_eq!(context.live_resource_count(), 0);
    }
}
