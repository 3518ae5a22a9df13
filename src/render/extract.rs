//! Worker-thread conversion of decoded glTF primitives into the flat
//! arrays render geometry is populated from. Nothing here touches the
//! scene.

use glam::{DMat4, Vec3};
use tracing::debug;

use super::geometry::GeometryDefinition;
use super::material::MaterialDefinition;
use crate::error::{Result, StreamError};
use crate::scene::ScenePath;
use crate::types::{BoundingBox, ImageData, MaterialInfo, MeshPrimitive, PrimitiveMode, TileModel};

/// Geometric error assumed for point sizing when the tile has none.
pub const DEFAULT_POINT_GEOMETRIC_ERROR: f64 = 100.0;
/// Point quads are this fraction of the geometric error across, per side.
const POINT_HALF_SIZE_FACTOR: f64 = 0.02;

/// Per-tileset switches that shape extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub smooth_normals: bool,
    pub imagery_layer_count: usize,
    pub disable_textures: bool,
    pub geometric_error: f64,
}

/// CPU-side geometry and material data for one mesh, ready for the main
/// thread to copy into pooled render objects.
#[derive(Debug, Clone, Default)]
pub struct PreparedMesh {
    pub mesh_index: usize,
    pub points: Vec<[f32; 3]>,
    pub face_vertex_counts: Vec<i32>,
    pub face_vertex_indices: Vec<i32>,
    pub normals: Vec<[f32; 3]>,
    pub st: Vec<[f32; 2]>,
    pub vertex_colors: Vec<[f32; 3]>,
    pub feature_ids: Vec<Vec<f32>>,
    pub local_extent: BoundingBox,
    pub local_to_ecef: DMat4,
    pub material: MaterialInfo,
    pub base_color_image: Option<ImageData>,
    pub imagery_layer_count: usize,
}

impl PreparedMesh {
    pub fn triangle_count(&self) -> usize {
        self.face_vertex_indices.len() / 3
    }

    pub fn geometry_definition(&self) -> GeometryDefinition {
        GeometryDefinition {
            has_normals: !self.normals.is_empty(),
            has_texcoords: !self.st.is_empty(),
            has_vertex_colors: !self.vertex_colors.is_empty(),
            double_sided: self.material.double_sided,
            feature_id_count: self.feature_ids.len().min(u8::MAX as usize) as u8,
        }
    }

    pub fn material_definition(&self, tileset_material_path: Option<&ScenePath>) -> MaterialDefinition {
        MaterialDefinition {
            has_base_color_texture: self.base_color_image.is_some(),
            imagery_layer_count: self.imagery_layer_count.min(u8::MAX as usize) as u8,
            has_vertex_colors: !self.vertex_colors.is_empty(),
            tileset_material_path: tileset_material_path.cloned(),
        }
    }

    pub fn byte_size(&self) -> usize {
        self.points.len() * 12
            + self.face_vertex_counts.len() * 4
            + self.face_vertex_indices.len() * 4
            + self.normals.len() * 12
            + self.st.len() * 8
            + self.vertex_colors.len() * 12
            + self.feature_ids.iter().map(|f| f.len() * 4).sum::<usize>()
            + self.base_color_image.as_ref().map_or(0, ImageData::byte_size)
    }
}

/// Converts one primitive. `content_to_ecef` maps model space (after the
/// node hierarchy) to ECEF.
pub fn prepare_primitive(
    primitive: &MeshPrimitive,
    model: &TileModel,
    content_to_ecef: DMat4,
    options: &ExtractOptions,
    mesh_index: usize,
) -> Result<PreparedMesh> {
    if primitive.positions.is_empty() {
        return Err(StreamError::Decode("primitive has no positions".into()));
    }
    let extent = primitive
        .extent
        .ok_or_else(|| StreamError::Decode("primitive has no position bounds".into()))?;

    let mut material = primitive
        .material_index
        .and_then(|i| model.materials.get(i))
        .cloned()
        .unwrap_or_default();
    if material.unlit {
        material.metallic = 0.0;
        material.roughness = 1.0;
    }

    let local_to_ecef = content_to_ecef * primitive.node_transform;

    if primitive.mode == PrimitiveMode::Points {
        return Ok(expand_points(primitive, extent, local_to_ecef, material, options, mesh_index));
    }

    let vertex_count = primitive.vertex_count();
    let indices = triangle_indices(primitive)?;
    if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(StreamError::Decode(format!(
            "index {bad} out of range for {vertex_count} vertices"
        )));
    }

    let normals = if primitive.normals.len() == vertex_count {
        primitive.normals.clone()
    } else if options.smooth_normals {
        smooth_normals(&primitive.positions, &indices)
    } else {
        Vec::new()
    };

    let st = if options.imagery_layer_count > 0 {
        match primitive.overlay_uvs.first() {
            Some(uvs) if uvs.len() == vertex_count => uvs.clone(),
            _ => planar_overlay_texcoords(&primitive.positions, &extent),
        }
    } else if primitive.uvs.len() == vertex_count {
        flip_texcoords(&primitive.uvs)
    } else {
        Vec::new()
    };

    let base_color_image = if options.disable_textures || options.imagery_layer_count > 0 || st.is_empty() {
        None
    } else {
        material
            .base_color_texture
            .and_then(|i| model.images.get(i))
            .cloned()
    };

    let vertex_colors = if primitive.colors.len() == vertex_count {
        primitive.colors.iter().map(|c| [c[0], c[1], c[2]]).collect()
    } else {
        Vec::new()
    };

    let feature_ids = primitive
        .feature_ids
        .iter()
        .filter(|set| set.len() == vertex_count)
        .cloned()
        .collect();

    Ok(PreparedMesh {
        mesh_index,
        points: primitive.positions.clone(),
        face_vertex_counts: vec![3; indices.len() / 3],
        face_vertex_indices: indices.iter().map(|&i| i as i32).collect(),
        normals,
        st,
        vertex_colors,
        feature_ids,
        local_extent: extent,
        local_to_ecef,
        material,
        base_color_image,
        imagery_layer_count: options.imagery_layer_count,
    })
}

/// Triangle-list indices for a triangle primitive. Non-indexed primitives
/// index their vertices in order.
fn triangle_indices(primitive: &MeshPrimitive) -> Result<Vec<u32>> {
    let indices: Vec<u32> = match &primitive.indices {
        Some(i) => i.clone(),
        None => (0..primitive.vertex_count() as u32).collect(),
    };
    if indices.is_empty() {
        return Err(StreamError::Decode("primitive has no indices".into()));
    }

    match primitive.mode {
        PrimitiveMode::Triangles => {
            if indices.len() % 3 != 0 {
                return Err(StreamError::Decode(format!(
                    "triangle list has {} indices",
                    indices.len()
                )));
            }
            Ok(indices)
        }
        PrimitiveMode::TriangleStrip => {
            if indices.len() <= 2 {
                return Err(StreamError::Decode("triangle strip needs more than 2 indices".into()));
            }
            Ok(strip_to_list(&indices))
        }
        PrimitiveMode::TriangleFan => {
            if indices.len() <= 2 {
                return Err(StreamError::Decode("triangle fan needs more than 2 indices".into()));
            }
            Ok(fan_to_list(&indices))
        }
        other => Err(StreamError::Decode(format!("unsupported primitive mode {other:?}"))),
    }
}

/// Alternates winding so every strip triangle faces the same way.
pub fn strip_to_list(strip: &[u32]) -> Vec<u32> {
    let mut list = Vec::with_capacity((strip.len() - 2) * 3);
    for i in 0..strip.len() - 2 {
        if i % 2 == 0 {
            list.extend_from_slice(&[strip[i], strip[i + 1], strip[i + 2]]);
        } else {
            list.extend_from_slice(&[strip[i + 1], strip[i], strip[i + 2]]);
        }
    }
    list
}

pub fn fan_to_list(fan: &[u32]) -> Vec<u32> {
    let mut list = Vec::with_capacity((fan.len() - 2) * 3);
    for i in 1..fan.len() - 1 {
        list.extend_from_slice(&[fan[0], fan[i], fan[i + 1]]);
    }
    list
}

/// glTF texture space has V pointing down; the scene expects it up.
pub fn flip_texcoords(uvs: &[[f32; 2]]) -> Vec<[f32; 2]> {
    uvs.iter().map(|[u, v]| [*u, 1.0 - v]).collect()
}

/// Area-weighted vertex normals.
pub fn smooth_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut acc = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let pa = Vec3::from_array(positions[a]);
        let pb = Vec3::from_array(positions[b]);
        let pc = Vec3::from_array(positions[c]);
        let n = (pb - pa).cross(pc - pa);
        acc[a] += n;
        acc[b] += n;
        acc[c] += n;
    }
    acc.into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Z).to_array())
        .collect()
}

/// Projects the horizontal plane of the (Y-up) content onto [0, 1]².
fn planar_overlay_texcoords(positions: &[[f32; 3]], extent: &BoundingBox) -> Vec<[f32; 2]> {
    let dx = (extent.max[0] - extent.min[0]).max(f64::EPSILON);
    let dz = (extent.max[2] - extent.min[2]).max(f64::EPSILON);
    positions
        .iter()
        .map(|p| {
            let u = (p[0] as f64 - extent.min[0]) / dx;
            let v = (extent.max[2] - p[2] as f64) / dz;
            [u.clamp(0.0, 1.0) as f32, v.clamp(0.0, 1.0) as f32]
        })
        .collect()
}

/// Expands every point into a two-triangle quad so point clouds render as
/// meshes.
fn expand_points(
    primitive: &MeshPrimitive,
    extent: BoundingBox,
    local_to_ecef: DMat4,
    material: MaterialInfo,
    options: &ExtractOptions,
    mesh_index: usize,
) -> PreparedMesh {
    let geometric_error = if options.geometric_error > 0.0 {
        options.geometric_error
    } else {
        DEFAULT_POINT_GEOMETRIC_ERROR
    };
    let h = (POINT_HALF_SIZE_FACTOR * geometric_error) as f32;
    let count = primitive.vertex_count();
    debug!(points = count, half_size = h, "Expanding point primitive into quads");

    let has_colors = primitive.colors.len() == count;
    let mut points = Vec::with_capacity(count * 4);
    let mut indices = Vec::with_capacity(count * 6);
    let mut vertex_colors = Vec::with_capacity(if has_colors { count * 4 } else { 0 });

    for (i, p) in primitive.positions.iter().enumerate() {
        let base = (i * 4) as i32;
        points.push([p[0] - h, p[1] - h, p[2]]);
        points.push([p[0] + h, p[1] - h, p[2]]);
        points.push([p[0] + h, p[1] + h, p[2]]);
        points.push([p[0] - h, p[1] + h, p[2]]);
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        if has_colors {
            let c = primitive.colors[i];
            vertex_colors.extend(std::iter::repeat_n([c[0], c[1], c[2]], 4));
        }
    }

    let h = h as f64;
    let local_extent = BoundingBox {
        min: [extent.min[0] - h, extent.min[1] - h, extent.min[2]],
        max: [extent.max[0] + h, extent.max[1] + h, extent.max[2]],
    };

    PreparedMesh {
        mesh_index,
        points,
        face_vertex_counts: vec![3; count * 2],
        face_vertex_indices: indices,
        vertex_colors,
        local_extent,
        local_to_ecef,
        material,
        imagery_layer_count: 0,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_extent() -> Option<BoundingBox> {
        Some(BoundingBox {
            min: [0.0, 0.0, 0.0],
            max: [1.0, 1.0, 1.0],
        })
    }

    fn triangle() -> MeshPrimitive {
        MeshPrimitive {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            uvs: vec![[0.0, 0.0], [1.0, 0.25], [0.0, 1.0]],
            indices: Some(vec![0, 1, 2]),
            extent: unit_extent(),
            ..Default::default()
        }
    }

    fn prepare(prim: &MeshPrimitive, options: &ExtractOptions) -> Result<PreparedMesh> {
        prepare_primitive(prim, &TileModel::default(), DMat4::IDENTITY, options, 0)
    }

    #[test]
    fn triangle_list_face_counts() {
        let mesh = prepare(&triangle(), &ExtractOptions::default()).unwrap();
        assert_eq!(mesh.face_vertex_counts, vec![3]);
        assert_eq!(mesh.face_vertex_indices, vec![0, 1, 2]);
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn texcoords_are_flipped() {
        let mesh = prepare(&triangle(), &ExtractOptions::default()).unwrap();
        assert_eq!(mesh.st[1], [1.0, 0.75]);
        assert_eq!(mesh.st[2], [0.0, 0.0]);
    }

    #[test]
    fn overlay_texcoords_are_not_flipped() {
        let mut prim = triangle();
        prim.overlay_uvs = vec![vec![[0.0, 0.0], [1.0, 0.25], [0.0, 1.0]]];
        let options = ExtractOptions {
            imagery_layer_count: 1,
            ..Default::default()
        };
        let mesh = prepare(&prim, &options).unwrap();
        assert_eq!(mesh.st[1], [1.0, 0.25]);
        assert!(mesh.base_color_image.is_none());
        assert_eq!(mesh.material_definition(None).imagery_layer_count, 1);
    }

    #[test]
    fn missing_overlay_texcoords_are_generated() {
        let options = ExtractOptions {
            imagery_layer_count: 1,
            ..Default::default()
        };
        let mesh = prepare(&triangle(), &options).unwrap();
        assert_eq!(mesh.st.len(), 3);
        assert!(mesh.st.iter().all(|[u, v]| (0.0..=1.0).contains(u) && (0.0..=1.0).contains(v)));
    }

    #[test]
    fn non_indexed_primitive_uses_sequential_indices() {
        let mut prim = triangle();
        prim.indices = None;
        let mesh = prepare(&prim, &ExtractOptions::default()).unwrap();
        assert_eq!(mesh.face_vertex_indices, vec![0, 1, 2]);
    }

    #[test]
    fn malformed_triangle_list_is_rejected() {
        let mut prim = triangle();
        prim.indices = Some(vec![0, 1]);
        assert!(prepare(&prim, &ExtractOptions::default()).is_err());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut prim = triangle();
        prim.indices = Some(vec![0, 1, 7]);
        let err = prepare(&prim, &ExtractOptions::default()).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn empty_index_buffer_skips_the_mesh() {
        let mut prim = triangle();
        prim.indices = Some(Vec::new());
        assert!(prepare(&prim, &ExtractOptions::default()).is_err());
    }

    #[test]
    fn missing_bounds_skip_the_mesh() {
        let mut prim = triangle();
        prim.extent = None;
        assert!(prepare(&prim, &ExtractOptions::default()).is_err());
    }

    #[test]
    fn empty_positions_skip_the_mesh() {
        let prim = MeshPrimitive {
            extent: unit_extent(),
            ..Default::default()
        };
        assert!(prepare(&prim, &ExtractOptions::default()).is_err());
    }

    #[test]
    fn strip_conversion_keeps_winding() {
        assert_eq!(strip_to_list(&[0, 1, 2, 3]), vec![0, 1, 2, 2, 1, 3]);
    }

    #[test]
    fn fan_conversion() {
        assert_eq!(fan_to_list(&[0, 1, 2, 3]), vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn short_strip_is_rejected() {
        let mut prim = triangle();
        prim.mode = PrimitiveMode::TriangleStrip;
        prim.indices = Some(vec![0, 1]);
        assert!(prepare(&prim, &ExtractOptions::default()).is_err());
    }

    #[test]
    fn lines_are_unsupported() {
        let mut prim = triangle();
        prim.mode = PrimitiveMode::Lines;
        prim.indices = Some(vec![0, 1]);
        assert!(prepare(&prim, &ExtractOptions::default()).is_err());
    }

    #[test]
    fn smooth_normals_only_when_requested() {
        let without = prepare(&triangle(), &ExtractOptions::default()).unwrap();
        assert!(without.normals.is_empty());

        let options = ExtractOptions {
            smooth_normals: true,
            ..Default::default()
        };
        let with = prepare(&triangle(), &options).unwrap();
        assert_eq!(with.normals.len(), 3);
        // (1,0,0) x (0,0,1) = (0,-1,0)
        assert_relative_eq!(with.normals[0][1], -1.0);
        assert!(with.geometry_definition().has_normals);
    }

    #[test]
    fn unlit_materials_are_rough_dielectrics() {
        let mut prim = triangle();
        prim.material_index = Some(0);
        let model = TileModel {
            materials: vec![MaterialInfo {
                unlit: true,
                metallic: 0.8,
                roughness: 0.2,
                ..Default::default()
            }],
            ..Default::default()
        };
        let mesh = prepare_primitive(&prim, &model, DMat4::IDENTITY, &ExtractOptions::default(), 0).unwrap();
        assert_eq!(mesh.material.metallic, 0.0);
        assert_eq!(mesh.material.roughness, 1.0);
    }

    #[test]
    fn base_color_texture_respects_disable_switch() {
        let mut prim = triangle();
        prim.material_index = Some(0);
        let model = TileModel {
            materials: vec![MaterialInfo {
                base_color_texture: Some(0),
                ..Default::default()
            }],
            images: vec![ImageData::white()],
            ..Default::default()
        };
        let on = prepare_primitive(&prim, &model, DMat4::IDENTITY, &ExtractOptions::default(), 0).unwrap();
        assert!(on.base_color_image.is_some());
        assert!(on.material_definition(None).has_base_color_texture);

        let options = ExtractOptions {
            disable_textures: true,
            ..Default::default()
        };
        let off = prepare_primitive(&prim, &model, DMat4::IDENTITY, &options, 0).unwrap();
        assert!(off.base_color_image.is_none());
    }

    #[test]
    fn points_expand_to_quads() {
        let prim = MeshPrimitive {
            positions: vec![[0.0, 0.0, 0.0], [5.0, 0.0, 0.0]],
            colors: vec![[1.0, 0.0, 0.0, 1.0]; 2],
            mode: PrimitiveMode::Points,
            extent: unit_extent(),
            ..Default::default()
        };
        let options = ExtractOptions {
            geometric_error: 50.0,
            ..Default::default()
        };
        let mesh = prepare(&prim, &options).unwrap();
        assert_eq!(mesh.points.len(), 8);
        assert_eq!(mesh.face_vertex_counts.len(), 4);
        assert_eq!(mesh.vertex_colors.len(), 8);
        // half size = 0.02 * 50
        assert_relative_eq!(mesh.points[1][0], 1.0);
    }

    #[test]
    fn points_fall_back_to_default_geometric_error() {
        let prim = MeshPrimitive {
            positions: vec![[0.0, 0.0, 0.0]],
            mode: PrimitiveMode::Points,
            extent: unit_extent(),
            ..Default::default()
        };
        let mesh = prepare(&prim, &ExtractOptions::default()).unwrap();
        assert_relative_eq!(mesh.points[1][0], 2.0);
    }
}
