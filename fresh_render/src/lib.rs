/*!
# Fresh Render

Core traits and types of the Fresh voxel engine's render layer.

One [`fresh::RenderContext`] interface covers four graphics APIs. Backend
crates (`fresh_render_opengl`, `fresh_render_d3d11`, `fresh_render_d3d12`,
`fresh_render_vulkan`) implement it and register a constructor with the
[`fresh::RenderContextFactory`] at startup.

## Architecture

- **RenderContext**: lifecycle, frame pacing, per-frame state and resource creation
- **RenderBuffer / RenderTexture / RenderShader**: reference-counted GPU resources
- **Lifecycle / FrameRing / FenceRing / UniformRing**: pacing primitives shared by the backends
- **RenderContextFactory**: platform availability check and backend registry
- **ChunkMeshCache**: per-chunk GPU meshes for the chunk mesher

## Usage

```no_run
use fresh_render::fresh::{RenderConfig, RenderContextFactory, GraphicsApi};

# fn run() -> fresh_render::fresh::Result<()> {
// A backend crate registers itself first, e.g. fresh_render_opengl::register()
let mut context = RenderContextFactory::create(GraphicsApi::Auto, &RenderConfig::default())?;
# Ok(())
# }
```
*/

// Internal modules
mod error;
pub mod log;
pub mod chunk_mesh;
pub mod config;
pub mod context;
pub mod factory;
pub mod fence_ring;
pub mod frame_ring;
pub mod graphics_api;
pub mod lifecycle;
pub mod resource;
pub mod resource_tracker;
pub mod uniform_block;
pub mod uniform_ring;
pub mod window;

#[cfg(test)]
mod mock_context;

// Error types at the crate root for the engine_* macros
pub use error::{Error, Result};

// Main fresh namespace module
pub mod fresh {
    // Error types
    pub use crate::error::{Error, Result};

    // Context and factory
    pub use crate::config::RenderConfig;
    pub use crate::context::{ClearValues, RenderContext, ScissorRect, Viewport};
    pub use crate::factory::{
        is_backend_registered, register_backend, unregister_backend, BackendConstructor,
        RenderContextFactory,
    };
    pub use crate::graphics_api::{select_best_graphics_api, ApiSet, GraphicsApi};
    pub use crate::lifecycle::ContextState;
    pub use crate::window::{win32_hwnd, GlSurface, RenderWindow, ResizeFlag};

    // Logging sub-module (types only, macros live at the crate root)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogFacadeLogger, LogSeverity, Logger};
    }

    // Resource sub-module
    pub mod resource {
        pub use crate::resource::*;
        pub use crate::uniform_block::{UniformBlock, UniformMember, UniformValue, UNIFORM_BLOCK_CAPACITY};
    }

    // Frame pacing sub-module, for backend crates
    pub mod pacing {
        pub use crate::fence_ring::{FenceRing, GpuTimeline};
        pub use crate::frame_ring::{FrameRing, FRAMES_IN_FLIGHT};
        pub use crate::lifecycle::Lifecycle;
        pub use crate::resource_tracker::{ResourceTracker, TrackedResource};
        pub use crate::uniform_ring::{align_up, UniformRing};
    }

    // Chunk mesh sub-module
    pub mod chunk {
        pub use crate::chunk_mesh::*;
    }
}

// Re-export math library at crate root
pub use glam;
