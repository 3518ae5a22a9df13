use glam::DMat4;

use super::BoundingBox;

/// glTF primitive topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl From<gltf::mesh::Mode> for PrimitiveMode {
    fn from(mode: gltf::mesh::Mode) -> Self {
        match mode {
            gltf::mesh::Mode::Points => PrimitiveMode::Points,
            gltf::mesh::Mode::Lines => PrimitiveMode::Lines,
            gltf::mesh::Mode::LineLoop => PrimitiveMode::LineLoop,
            gltf::mesh::Mode::LineStrip => PrimitiveMode::LineStrip,
            gltf::mesh::Mode::Triangles => PrimitiveMode::Triangles,
            gltf::mesh::Mode::TriangleStrip => PrimitiveMode::TriangleStrip,
            gltf::mesh::Mode::TriangleFan => PrimitiveMode::TriangleFan,
        }
    }
}

/// One decoded glTF primitive, with attributes exactly as stored in the
/// content (no flips, no generated data).
#[derive(Debug, Clone, Default)]
pub struct MeshPrimitive {
    pub positions: Vec<[f32; 3]>,
    /// Empty when the content carries no normals.
    pub normals: Vec<[f32; 3]>,
    /// TEXCOORD_0, empty when absent.
    pub uvs: Vec<[f32; 2]>,
    /// `_CESIUMOVERLAY_n` sets, indexed by overlay texture-coordinate id.
    pub overlay_uvs: Vec<Vec<[f32; 2]>>,
    /// COLOR_0 as RGBA.
    pub colors: Vec<[f32; 4]>,
    /// `_FEATURE_ID_n` sets.
    pub feature_ids: Vec<Vec<f32>>,
    /// `None` for non-indexed primitives.
    pub indices: Option<Vec<u32>>,
    pub mode: PrimitiveMode,
    /// Local extent from the POSITION accessor bounds.
    pub extent: Option<BoundingBox>,
    pub material_index: Option<usize>,
    /// Node hierarchy transform from primitive space to model space.
    pub node_transform: DMat4,
}

impl MeshPrimitive {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Approximate heap footprint of the vertex and index data.
    pub fn byte_size(&self) -> usize {
        self.positions.len() * 12
            + self.normals.len() * 12
            + self.uvs.len() * 8
            + self.overlay_uvs.iter().map(|s| s.len() * 8).sum::<usize>()
            + self.colors.len() * 16
            + self.feature_ids.iter().map(|s| s.len() * 4).sum::<usize>()
            + self.indices.as_ref().map_or(0, |i| i.len() * 4)
    }
}
