//! Graphics API enumeration, platform availability and best-API selection

use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Graphics API a render context is built on
///
/// Fixed once a context has been created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    /// Let the factory pick the best API for the platform
    Auto,
    /// OpenGL 4.x
    OpenGL,
    /// Direct3D 11 (Windows only)
    DirectX11,
    /// Direct3D 12 (Windows only)
    DirectX12,
    /// Vulkan 1.2+
    Vulkan,
}

bitflags! {
    /// Set of concrete graphics APIs
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ApiSet: u8 {
        const OPENGL = 1 << 0;
        const DIRECTX11 = 1 << 1;
        const DIRECTX12 = 1 << 2;
        const VULKAN = 1 << 3;
    }
}

impl GraphicsApi {
    /// Every concrete API, in declaration order
    pub const CONCRETE: [GraphicsApi; 4] = [
        GraphicsApi::OpenGL,
        GraphicsApi::DirectX11,
        GraphicsApi::DirectX12,
        GraphicsApi::Vulkan,
    ];

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            GraphicsApi::Auto => "Auto",
            GraphicsApi::OpenGL => "OpenGL",
            GraphicsApi::DirectX11 => "DirectX 11",
            GraphicsApi::DirectX12 => "DirectX 12",
            GraphicsApi::Vulkan => "Vulkan",
        }
    }

    /// Whether this API can exist at all on the target platform
    ///
    /// This is a compile-time platform check. Whether a backend is actually
    /// linked into the process is answered by the factory.
    pub fn is_supported_on_platform(self) -> bool {
        match self {
            GraphicsApi::Auto => true,
            GraphicsApi::OpenGL | GraphicsApi::Vulkan => true,
            GraphicsApi::DirectX11 | GraphicsApi::DirectX12 => cfg!(windows),
        }
    }

    /// Resolve `Auto` to a concrete API; concrete values are returned as-is
    pub fn resolve(self) -> GraphicsApi {
        match self {
            GraphicsApi::Auto => select_best_graphics_api(),
            api => api,
        }
    }

    /// The [`ApiSet`] flag for a concrete API (empty for `Auto`)
    pub fn flag(self) -> ApiSet {
        match self {
            GraphicsApi::Auto => ApiSet::empty(),
            GraphicsApi::OpenGL => ApiSet::OPENGL,
            GraphicsApi::DirectX11 => ApiSet::DIRECTX11,
            GraphicsApi::DirectX12 => ApiSet::DIRECTX12,
            GraphicsApi::Vulkan => ApiSet::VULKAN,
        }
    }
}

impl ApiSet {
    /// Concrete APIs contained in the set
    pub fn apis(self) -> impl Iterator<Item = GraphicsApi> {
        GraphicsApi::CONCRETE
            .into_iter()
            .filter(move |api| self.contains(api.flag()))
    }
}

/// Fixed best-API policy: DirectX 12 on Windows, OpenGL elsewhere
///
/// No runtime capability probing happens here.
pub fn select_best_graphics_api() -> GraphicsApi {
    if cfg!(windows) {
        GraphicsApi::DirectX12
    } else {
        GraphicsApi::OpenGL
    }
}

impl fmt::Display for GraphicsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GraphicsApi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "auto" => Ok(GraphicsApi::Auto),
            "opengl" | "gl" => Ok(GraphicsApi::OpenGL),
            "dx11" | "directx11" | "d3d11" => Ok(GraphicsApi::DirectX11),
            "dx12" | "directx12" | "d3d12" => Ok(GraphicsApi::DirectX12),
            "vulkan" | "vk" => Ok(GraphicsApi::Vulkan),
            _ => Err(Error::InvalidResource(format!("unknown graphics API '{}'", s))),
        }
    }
}

#[cfg(test)]
#[path = "graphics_api_tests.rs"]
mod tests;
