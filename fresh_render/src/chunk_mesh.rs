//! Per-chunk GPU meshes
//!
//! The voxel mesher produces one vertex/index list per chunk. Backends that
//! draw chunks directly keep the uploaded buffers in a [`ChunkMeshCache`]
//! keyed by chunk coordinate: uploaded when a chunk becomes visible,
//! released when it streams out.

use glam::Mat4;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashSet;
use std::hash::BuildHasher;

use crate::context::RenderContext;
use crate::error::{Error, Result};
use crate::resource::{BufferHandle, MeshVertex, RenderBuffer};

/// Chunk position in chunk units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// GPU buffers of one chunk
#[derive(Clone)]
pub struct ChunkMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

impl std::fmt::Debug for ChunkMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkMesh")
            .field("vertex_bytes", &self.vertex_buffer.size())
            .field("index_count", &self.index_count)
            .finish()
    }
}

impl ChunkMesh {
    /// Upload a mesher output through `context`
    ///
    /// Indices are 32-bit and must reference existing vertices.
    pub fn upload<C: RenderContext + ?Sized>(
        context: &mut C,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> Result<Self> {
        validate_chunk_geometry(vertices, indices)?;

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let vertex_buffer = context.create_vertex_buffer(Some(vertex_bytes), vertex_bytes.len())?;
        let index_buffer = context.create_index_buffer(Some(index_bytes), index_bytes.len())?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }
}

/// Check mesher output before it reaches the GPU
pub fn validate_chunk_geometry(vertices: &[MeshVertex], indices: &[u32]) -> Result<()> {
    if vertices.is_empty() || indices.is_empty() {
        return Err(Error::InvalidResource("empty chunk mesh".to_string()));
    }
    if indices.len() % 3 != 0 {
        return Err(Error::InvalidResource(format!(
            "chunk index count {} is not a triangle list",
            indices.len()
        )));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
        return Err(Error::InvalidResource(format!(
            "chunk index {} out of range ({} vertices)",
            bad,
            vertices.len()
        )));
    }
    Ok(())
}

// ============================================================================
// Cache
// ============================================================================

/// Chunk meshes currently resident on the GPU
#[derive(Debug, Default)]
pub struct ChunkMeshCache {
    meshes: FxHashMap<ChunkCoord, ChunkMesh>,
}

impl ChunkMeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the mesh for `coord`, returning the one it replaces
    pub fn insert(&mut self, coord: ChunkCoord, mesh: ChunkMesh) -> Option<ChunkMesh> {
        self.meshes.insert(coord, mesh)
    }

    pub fn remove(&mut self, coord: ChunkCoord) -> Option<ChunkMesh> {
        self.meshes.remove(&coord)
    }

    /// Drop every mesh whose chunk is not in `visible`; returns how many went
    pub fn retain_visible<S: BuildHasher>(&mut self, visible: &HashSet<ChunkCoord, S>) -> usize {
        let before = self.meshes.len();
        self.meshes.retain(|coord, _| visible.contains(coord));
        before - self.meshes.len()
    }

    pub fn get(&self, coord: ChunkCoord) -> Option<&ChunkMesh> {
        self.meshes.get(&coord)
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.meshes.contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChunkCoord, &ChunkMesh)> {
        self.meshes.iter()
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
    }
}

// ============================================================================
// Built-in chunk shader
// ============================================================================

/// Vertex stage of the built-in chunk shader (HLSL, entry `main`)
///
/// `modelViewProj` is a column-major float4x4 at b0, which is how
/// `Mat4::to_cols_array` lays it out.
pub const CHUNK_VERTEX_HLSL: &str = r#"
cbuffer ChunkConstants : register(b0)
{
    float4x4 modelViewProj;
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
    output.normal = input.normal;
    return output;
}
"#;

/// Pixel stage of the built-in chunk shader: fixed directional light
pub const CHUNK_PIXEL_HLSL: &str = r#"
struct PSInput
{
    float4 position : SV_Position;
    float3 normal : NORMAL;
};

float4 main(PSInput input) : SV_Target
{
    float3 light_dir = normalize(float3(0.4, 1.0, 0.3));
    float diffuse = saturate(dot(normalize(input.normal), light_dir));
    float shade = 0.3 + 0.7 * diffuse;
    return float4(shade, shade, shade, 1.0);
}
"#;

/// Name of the chunk shader's only uniform
pub const CHUNK_MVP_UNIFORM: &str = "modelViewProj";

// ============================================================================
// Renderer trait
// ============================================================================

/// Contexts that own and draw per-chunk meshes themselves
pub trait ChunkMeshRenderer {
    /// Upload (or replace) the mesh of one chunk
    ///
    /// An empty mesh releases the chunk.
    fn upload_chunk_mesh(&mut self, coord: ChunkCoord, vertices: &[MeshVertex], indices: &[u32]) -> Result<()>;

    /// Free the chunk's buffers; false if it had none
    fn release_chunk_mesh(&mut self, coord: ChunkCoord) -> bool;

    /// Free every chunk outside `visible`
    fn retain_visible_chunks(&mut self, visible: &FxHashSet<ChunkCoord>) -> usize;

    fn chunk_mesh_count(&self) -> usize;

    /// Draw every resident chunk with the built-in chunk shader
    ///
    /// Only valid while a frame is being recorded.
    fn draw_chunk_meshes(&mut self, view_proj: Mat4) -> Result<()>;
}

#[cfg(test)]
#[path = "chunk_mesh_tests.rs"]
mod tests;
