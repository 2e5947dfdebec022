//! Render context configuration

use crate::graphics_api::GraphicsApi;

/// Configuration handed to a backend constructor
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Enable the backend's debug/validation layer
    pub enable_validation: bool,

    /// Present synchronized with the vertical blank
    pub vsync: bool,

    /// Application name (reported to the Vulkan instance)
    pub app_name: String,

    /// Application version (reported to the Vulkan instance)
    pub app_version: (u32, u32, u32),

    /// API used by `RenderContextFactory::create_best`
    pub preferred_api: GraphicsApi,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            vsync: true,
            app_name: "Fresh Voxel Engine".to_string(),
            app_version: (0, 1, 0),
            preferred_api: GraphicsApi::Auto,
        }
    }
}
