use glam::{DMat4, DQuat, DVec3};

use super::extract::PreparedMesh;
use super::{set_tile_ids, NO_TILESET_ID, NO_TILE_ID};
use crate::pool::Pooled;
use crate::scene::{AttributeValue, SceneHost, ScenePath};
use crate::tokens;
use crate::types::BoundingBox;

/// Attribute layout of a render geometry. Geometry objects are only
/// recycled between meshes with equal definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GeometryDefinition {
    pub has_normals: bool,
    pub has_texcoords: bool,
    pub has_vertex_colors: bool,
    pub double_sided: bool,
    pub feature_id_count: u8,
}

/// A mesh prim owned by a geometry pool.
#[derive(Debug)]
pub struct RenderGeometry {
    path: ScenePath,
    definition: GeometryDefinition,
    local_to_ecef: DMat4,
    local_extent: BoundingBox,
    visible: bool,
    populated: bool,
    triangle_count: usize,
}

impl RenderGeometry {
    pub fn new(path: ScenePath, definition: GeometryDefinition, stage: &mut dyn SceneHost) -> Self {
        let mut geometry = Self {
            path,
            definition,
            local_to_ecef: DMat4::IDENTITY,
            local_extent: BoundingBox::ZERO,
            visible: false,
            populated: false,
            triangle_count: 0,
        };
        geometry.initialize(stage);
        geometry.reset(stage);
        geometry
    }

    fn initialize(&self, stage: &mut dyn SceneHost) {
        stage.create_prim(&self.path, tokens::MESH_PRIM);

        let mut primvars = vec![tokens::DISPLAY_COLOR.to_string(), tokens::DISPLAY_OPACITY.to_string()];
        let mut interpolations = vec!["constant".to_string(), "constant".to_string()];
        if self.definition.has_texcoords {
            primvars.push(tokens::PRIMVARS_ST.into());
            interpolations.push("vertex".into());
        }
        if self.definition.has_normals {
            primvars.push(tokens::PRIMVARS_NORMALS.into());
            interpolations.push("vertex".into());
        }
        if self.definition.has_vertex_colors {
            primvars.push(tokens::PRIMVARS_VERTEX_COLOR.into());
            interpolations.push("vertex".into());
        }
        for i in 0..self.definition.feature_id_count as usize {
            primvars.push(tokens::feature_id_primvar(i));
            interpolations.push("vertex".into());
        }

        let path = &self.path;
        stage.set_attribute(path, tokens::PRIMVARS, AttributeValue::TokenArray(primvars));
        stage.set_attribute(
            path,
            tokens::PRIMVAR_INTERPOLATIONS,
            AttributeValue::TokenArray(interpolations),
        );
        stage.set_attribute(path, tokens::SUBDIVISION_SCHEME, AttributeValue::Token("none".into()));
        stage.set_attribute(path, tokens::DOUBLE_SIDED, AttributeValue::Bool(self.definition.double_sided));
    }

    pub fn path(&self) -> &ScenePath {
        &self.path
    }

    pub fn definition(&self) -> &GeometryDefinition {
        &self.definition
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_count
    }

    /// Copies a prepared mesh into the prim and places it in the scene.
    /// Meshes with no vertices or faces leave the geometry untouched.
    pub fn set_geometry(
        &mut self,
        stage: &mut dyn SceneHost,
        tileset_id: i64,
        tile_id: i64,
        mesh: &PreparedMesh,
        ecef_to_usd: DMat4,
        display_color: [f32; 3],
        display_opacity: f32,
    ) {
        if mesh.points.is_empty() || mesh.face_vertex_indices.is_empty() {
            return;
        }

        let path = self.path.clone();
        stage.set_attribute(&path, tokens::POINTS, AttributeValue::Vec3fArray(mesh.points.clone()));
        stage.set_attribute(
            &path,
            tokens::FACE_VERTEX_COUNTS,
            AttributeValue::IntArray(mesh.face_vertex_counts.clone()),
        );
        stage.set_attribute(
            &path,
            tokens::FACE_VERTEX_INDICES,
            AttributeValue::IntArray(mesh.face_vertex_indices.clone()),
        );
        if self.definition.has_normals {
            stage.set_attribute(&path, tokens::PRIMVARS_NORMALS, AttributeValue::Vec3fArray(mesh.normals.clone()));
        }
        if self.definition.has_texcoords {
            stage.set_attribute(&path, tokens::PRIMVARS_ST, AttributeValue::Vec2fArray(mesh.st.clone()));
        }
        if self.definition.has_vertex_colors {
            stage.set_attribute(
                &path,
                tokens::PRIMVARS_VERTEX_COLOR,
                AttributeValue::Vec3fArray(mesh.vertex_colors.clone()),
            );
        }
        for (i, ids) in mesh
            .feature_ids
            .iter()
            .take(self.definition.feature_id_count as usize)
            .enumerate()
        {
            stage.set_attribute(&path, &tokens::feature_id_primvar(i), AttributeValue::FloatArray(ids.clone()));
        }

        set_tile_ids(stage, &path, tileset_id, tile_id);
        self.set_display_color_and_opacity(stage, display_color, display_opacity);

        self.local_to_ecef = mesh.local_to_ecef;
        self.local_extent = mesh.local_extent;
        self.triangle_count = mesh.triangle_count();
        self.populated = true;
        self.set_world_transform(stage, ecef_to_usd);
    }

    /// Re-derives the world placement from the stored local-to-ECEF
    /// transform, e.g. after the georeference origin moved.
    pub fn set_world_transform(&mut self, stage: &mut dyn SceneHost, ecef_to_usd: DMat4) {
        if !self.populated {
            return;
        }
        let local_to_usd = ecef_to_usd * self.local_to_ecef;
        let (scale, rotation, translation) = local_to_usd.to_scale_rotation_translation();
        let world_extent = self.local_extent.transformed(&local_to_usd);

        let path = self.path.clone();
        let e = &self.local_extent;
        stage.set_attribute(&path, tokens::EXTENT, AttributeValue::Range3d { min: e.min, max: e.max });
        stage.set_attribute(
            &path,
            tokens::WORLD_EXTENT,
            AttributeValue::Range3d {
                min: world_extent.min,
                max: world_extent.max,
            },
        );
        stage.set_attribute(
            &path,
            tokens::LOCAL_TO_ECEF_TRANSFORM,
            AttributeValue::Matrix4d(self.local_to_ecef.to_cols_array()),
        );
        stage.set_attribute(&path, tokens::WORLD_POSITION, AttributeValue::Vec3d(translation.to_array()));
        stage.set_attribute(&path, tokens::WORLD_ORIENTATION, quat_value(rotation));
        stage.set_attribute(&path, tokens::WORLD_SCALE, vec3f_value(scale));
    }

    pub fn set_visibility(&mut self, stage: &mut dyn SceneHost, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        stage.set_attribute(&self.path, tokens::WORLD_VISIBILITY, AttributeValue::Bool(visible));
    }

    pub fn set_material(&mut self, stage: &mut dyn SceneHost, material_path: &ScenePath) {
        stage.set_attribute(
            &self.path,
            tokens::MATERIAL_BINDING,
            AttributeValue::PathArray(vec![material_path.clone()]),
        );
    }

    pub fn set_display_color_and_opacity(&mut self, stage: &mut dyn SceneHost, color: [f32; 3], opacity: f32) {
        stage.set_attribute(&self.path, tokens::DISPLAY_COLOR, AttributeValue::Vec3fArray(vec![color]));
        stage.set_attribute(&self.path, tokens::DISPLAY_OPACITY, AttributeValue::FloatArray(vec![opacity]));
    }
}

fn quat_value(q: DQuat) -> AttributeValue {
    AttributeValue::Quatf([q.x as f32, q.y as f32, q.z as f32, q.w as f32])
}

fn vec3f_value(v: DVec3) -> AttributeValue {
    AttributeValue::Vec3f([v.x as f32, v.y as f32, v.z as f32])
}

impl Pooled for RenderGeometry {
    fn reset(&mut self, stage: &mut dyn SceneHost) {
        self.local_to_ecef = DMat4::IDENTITY;
        self.local_extent = BoundingBox::ZERO;
        self.visible = false;
        self.populated = false;
        self.triangle_count = 0;

        let path = self.path.clone();
        let zero = AttributeValue::Range3d {
            min: [0.0; 3],
            max: [0.0; 3],
        };
        stage.set_attribute(&path, tokens::EXTENT, zero.clone());
        stage.set_attribute(&path, tokens::WORLD_EXTENT, zero);
        stage.set_attribute(&path, tokens::WORLD_VISIBILITY, AttributeValue::Bool(false));
        stage.set_attribute(
            &path,
            tokens::LOCAL_TO_ECEF_TRANSFORM,
            AttributeValue::Matrix4d(DMat4::IDENTITY.to_cols_array()),
        );
        stage.set_attribute(&path, tokens::WORLD_POSITION, AttributeValue::Vec3d([0.0; 3]));
        stage.set_attribute(&path, tokens::WORLD_ORIENTATION, quat_value(DQuat::IDENTITY));
        stage.set_attribute(&path, tokens::WORLD_SCALE, vec3f_value(DVec3::ONE));
        self.set_display_color_and_opacity(stage, [1.0, 1.0, 1.0], 1.0);
        set_tile_ids(stage, &path, NO_TILESET_ID, NO_TILE_ID);
        stage.set_attribute(&path, tokens::MATERIAL_BINDING, AttributeValue::PathArray(Vec::new()));

        stage.set_attribute(&path, tokens::POINTS, AttributeValue::Vec3fArray(Vec::new()));
        stage.set_attribute(&path, tokens::FACE_VERTEX_COUNTS, AttributeValue::IntArray(Vec::new()));
        stage.set_attribute(&path, tokens::FACE_VERTEX_INDICES, AttributeValue::IntArray(Vec::new()));
        if self.definition.has_normals {
            stage.set_attribute(&path, tokens::PRIMVARS_NORMALS, AttributeValue::Vec3fArray(Vec::new()));
        }
        if self.definition.has_texcoords {
            stage.set_attribute(&path, tokens::PRIMVARS_ST, AttributeValue::Vec2fArray(Vec::new()));
        }
        if self.definition.has_vertex_colors {
            stage.set_attribute(&path, tokens::PRIMVARS_VERTEX_COLOR, AttributeValue::Vec3fArray(Vec::new()));
        }
        for i in 0..self.definition.feature_id_count as usize {
            stage.set_attribute(&path, &tokens::feature_id_primvar(i), AttributeValue::FloatArray(Vec::new()));
        }
    }

    fn destroy(&mut self, stage: &mut dyn SceneHost) {
        stage.destroy_prim(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MemoryStage;

    fn mesh() -> PreparedMesh {
        PreparedMesh {
            points: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            face_vertex_counts: vec![3],
            face_vertex_indices: vec![0, 1, 2],
            st: vec![[0.0; 2]; 3],
            local_extent: BoundingBox {
                min: [0.0; 3],
                max: [1.0, 1.0, 0.0],
            },
            local_to_ecef: DMat4::from_translation(DVec3::new(100.0, 0.0, 0.0)),
            ..Default::default()
        }
    }

    fn definition() -> GeometryDefinition {
        GeometryDefinition {
            has_texcoords: true,
            ..Default::default()
        }
    }

    #[test]
    fn new_geometry_is_reset() {
        let mut stage = MemoryStage::new(1);
        let path = ScenePath::from("/geom");
        let g = RenderGeometry::new(path.clone(), definition(), &mut stage);
        assert!(!g.is_visible());
        assert_eq!(stage.attribute(&path, tokens::TILE_ID), Some(AttributeValue::Int(-1)));
        assert_eq!(stage.attribute(&path, tokens::WORLD_VISIBILITY), Some(AttributeValue::Bool(false)));
        assert_eq!(
            stage.attribute(&path, tokens::DISPLAY_COLOR),
            Some(AttributeValue::Vec3fArray(vec![[1.0, 1.0, 1.0]]))
        );
        assert_eq!(stage.attribute(&path, tokens::POINTS).and_then(|v| v.array_len()), Some(0));
    }

    #[test]
    fn set_geometry_populates_and_places() {
        let mut stage = MemoryStage::new(1);
        let path = ScenePath::from("/geom");
        let mut g = RenderGeometry::new(path.clone(), definition(), &mut stage);
        g.set_geometry(&mut stage, 3, 9, &mesh(), DMat4::IDENTITY, [0.5, 0.5, 0.5], 0.25);

        assert_eq!(g.triangle_count(), 1);
        assert_eq!(stage.attribute(&path, tokens::POINTS).and_then(|v| v.array_len()), Some(3));
        assert_eq!(stage.attribute(&path, tokens::TILESET_ID), Some(AttributeValue::Int(3)));
        assert_eq!(stage.attribute(&path, tokens::TILE_ID), Some(AttributeValue::Int(9)));
        assert_eq!(
            stage.attribute(&path, tokens::WORLD_POSITION),
            Some(AttributeValue::Vec3d([100.0, 0.0, 0.0]))
        );
        assert_eq!(
            stage.attribute(&path, tokens::DISPLAY_OPACITY),
            Some(AttributeValue::FloatArray(vec![0.25]))
        );
    }

    #[test]
    fn empty_mesh_is_ignored() {
        let mut stage = MemoryStage::new(1);
        let mut g = RenderGeometry::new("/geom".into(), definition(), &mut stage);
        let before = stage.mutation_count();
        g.set_geometry(&mut stage, 0, 0, &PreparedMesh::default(), DMat4::IDENTITY, [1.0; 3], 1.0);
        assert_eq!(stage.mutation_count(), before);
        assert_eq!(g.triangle_count(), 0);
    }

    #[test]
    fn world_transform_follows_georeference() {
        let mut stage = MemoryStage::new(1);
        let path = ScenePath::from("/geom");
        let mut g = RenderGeometry::new(path.clone(), definition(), &mut stage);
        g.set_geometry(&mut stage, 0, 0, &mesh(), DMat4::IDENTITY, [1.0; 3], 1.0);
        g.set_world_transform(&mut stage, DMat4::from_translation(DVec3::new(-100.0, 0.0, 5.0)));
        assert_eq!(
            stage.attribute(&path, tokens::WORLD_POSITION),
            Some(AttributeValue::Vec3d([0.0, 0.0, 5.0]))
        );
    }

    #[test]
    fn visibility_writes_only_on_change() {
        let mut stage = MemoryStage::new(1);
        let mut g = RenderGeometry::new("/geom".into(), definition(), &mut stage);
        g.set_visibility(&mut stage, true);
        let before = stage.mutation_count();
        g.set_visibility(&mut stage, true);
        assert_eq!(stage.mutation_count(), before);
        assert!(g.is_visible());
    }

    #[test]
    fn reset_clears_tile_state() {
        let mut stage = MemoryStage::new(1);
        let path = ScenePath::from("/geom");
        let mut g = RenderGeometry::new(path.clone(), definition(), &mut stage);
        g.set_geometry(&mut stage, 1, 2, &mesh(), DMat4::IDENTITY, [1.0; 3], 1.0);
        g.set_material(&mut stage, &"/mat".into());
        g.set_visibility(&mut stage, true);

        g.reset(&mut stage);
        assert!(!g.is_visible());
        assert_eq!(stage.attribute(&path, tokens::TILESET_ID), Some(AttributeValue::Int(-1)));
        assert_eq!(stage.attribute(&path, tokens::MATERIAL_BINDING), Some(AttributeValue::PathArray(vec![])));
        assert_eq!(stage.attribute(&path, tokens::PRIMVARS_ST).and_then(|v| v.array_len()), Some(0));
    }
}
