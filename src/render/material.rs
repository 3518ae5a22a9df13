use tracing::trace;

use super::{set_tile_ids, NO_TILESET_ID, NO_TILE_ID};
use crate::pool::Pooled;
use crate::scene::{is_type, AttributeValue, SceneHost, ScenePath};
use crate::tokens;
use crate::types::MaterialInfo;

/// Shading-network shape of a render material. Materials are only
/// recycled between meshes with equal definitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MaterialDefinition {
    pub has_base_color_texture: bool,
    pub imagery_layer_count: u8,
    pub has_vertex_colors: bool,
    /// User material whose shaders are copied into this one.
    pub tileset_material_path: Option<ScenePath>,
}

/// A material prim with its shader, owned by a material pool.
#[derive(Debug)]
pub struct RenderMaterial {
    path: ScenePath,
    shader_path: ScenePath,
    definition: MaterialDefinition,
    /// (source shader, copy under this material)
    shader_copies: Vec<(ScenePath, ScenePath)>,
    imagery_alphas: Vec<f32>,
}

impl RenderMaterial {
    pub fn new(path: ScenePath, definition: MaterialDefinition, stage: &mut dyn SceneHost) -> Self {
        let shader_path = path.append_child(tokens::SHADER_CHILD);
        let mut material = Self {
            path,
            shader_path,
            imagery_alphas: vec![1.0; definition.imagery_layer_count as usize],
            definition,
            shader_copies: Vec::new(),
        };
        material.initialize(stage);
        material.reset(stage);
        material
    }

    fn initialize(&mut self, stage: &mut dyn SceneHost) {
        stage.create_prim(&self.path, tokens::MATERIAL_PRIM);
        stage.create_prim(&self.shader_path, tokens::SHADER_PRIM);
        stage.set_attribute(&self.shader_path, tokens::INFO_ID, AttributeValue::Token(tokens::OMNI_PBR.into()));
        stage.set_attribute(&self.shader_path, tokens::SPECULAR_LEVEL, AttributeValue::Float(0.0));

        let Some(source) = self.definition.tileset_material_path.clone() else {
            return;
        };
        for source_shader in stage.children(&source) {
            if !is_type(stage, &source_shader, tokens::SHADER_PRIM) {
                continue;
            }
            let copy = self.path.append_child(&format!("tileset_{}", source_shader.name()));
            stage.create_prim(&copy, tokens::SHADER_PRIM);
            for name in stage.attribute_names(&source_shader) {
                if let Some(value) = stage.attribute(&source_shader, &name) {
                    stage.set_attribute(&copy, &name, value);
                }
            }
            self.shader_copies.push((source_shader, copy));
        }
    }

    pub fn path(&self) -> &ScenePath {
        &self.path
    }

    pub fn shader_path(&self) -> &ScenePath {
        &self.shader_path
    }

    pub fn definition(&self) -> &MaterialDefinition {
        &self.definition
    }

    /// Writes the glTF material constants and the base color texture.
    pub fn set_material(
        &mut self,
        stage: &mut dyn SceneHost,
        tileset_id: i64,
        tile_id: i64,
        info: &MaterialInfo,
        base_color_texture: Option<&str>,
    ) {
        let shader = self.shader_path.clone();
        let [r, g, b, _] = info.base_color;
        stage.set_attribute(&shader, tokens::DIFFUSE_COLOR_CONSTANT, AttributeValue::Vec3f([r, g, b]));
        stage.set_attribute(&shader, tokens::METALLIC_CONSTANT, AttributeValue::Float(info.metallic as f64));
        stage.set_attribute(
            &shader,
            tokens::REFLECTION_ROUGHNESS_CONSTANT,
            AttributeValue::Float(info.roughness as f64),
        );
        if self.definition.has_base_color_texture {
            let asset = base_color_texture.unwrap_or_default().to_string();
            stage.set_attribute(&shader, tokens::DIFFUSE_TEXTURE, AttributeValue::Asset(asset));
        }
        self.set_tile_ids(stage, tileset_id, tile_id);
    }

    /// Binds (`Some`) or unbinds (`None`) the texture of imagery layer
    /// `index`. Unbound layers fall back to the base color.
    pub fn set_imagery_layer(&mut self, stage: &mut dyn SceneHost, index: usize, texture: Option<&str>) {
        if index >= self.definition.imagery_layer_count as usize {
            trace!(index, path = %self.path, "Material has no such imagery layer");
            return;
        }
        let asset = texture.unwrap_or_default().to_string();
        stage.set_attribute(
            &self.shader_path,
            &tokens::imagery_layer_input(index),
            AttributeValue::Asset(asset),
        );
    }

    /// Places the raster within the layer's overlay texcoord space.
    pub fn set_imagery_transform(&mut self, stage: &mut dyn SceneHost, index: usize, translation: [f32; 2], scale: [f32; 2]) {
        if index >= self.definition.imagery_layer_count as usize {
            return;
        }
        stage.set_attribute(
            &self.shader_path,
            &tokens::imagery_translation_input(index),
            AttributeValue::Vec2f(translation),
        );
        stage.set_attribute(&self.shader_path, &tokens::imagery_scale_input(index), AttributeValue::Vec2f(scale));
    }

    pub fn set_imagery_alpha(&mut self, stage: &mut dyn SceneHost, index: usize, alpha: f32) {
        let Some(current) = self.imagery_alphas.get_mut(index) else {
            return;
        };
        *current = alpha;
        stage.set_attribute(
            &self.shader_path,
            &tokens::imagery_alpha_input(index),
            AttributeValue::Float(alpha as f64),
        );
    }

    pub fn imagery_alpha(&self, index: usize) -> Option<f32> {
        self.imagery_alphas.get(index).copied()
    }

    /// Re-copies one input from a user shader into this material's copy of
    /// it. Returns whether this material copies that shader.
    pub fn update_shader_input(&mut self, stage: &mut dyn SceneHost, source_shader: &ScenePath, property: &str) -> bool {
        let Some((_, copy)) = self.shader_copies.iter().find(|(src, _)| src == source_shader) else {
            return false;
        };
        let copy = copy.clone();
        if let Some(value) = stage.attribute(source_shader, property) {
            stage.set_attribute(&copy, property, value);
        }
        true
    }

    fn set_tile_ids(&self, stage: &mut dyn SceneHost, tileset_id: i64, tile_id: i64) {
        set_tile_ids(stage, &self.path, tileset_id, tile_id);
        set_tile_ids(stage, &self.shader_path, tileset_id, tile_id);
        for (_, copy) in &self.shader_copies {
            set_tile_ids(stage, copy, tileset_id, tile_id);
        }
    }
}

impl Pooled for RenderMaterial {
    fn reset(&mut self, stage: &mut dyn SceneHost) {
        let defaults = MaterialInfo::default();
        self.set_material(stage, NO_TILESET_ID, NO_TILE_ID, &defaults, None);
        for i in 0..self.definition.imagery_layer_count as usize {
            self.set_imagery_layer(stage, i, None);
            self.set_imagery_alpha(stage, i, 1.0);
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

    fn shader_attr(stage: &MemoryStage, m: &RenderMaterial, name: &str) -> Option<AttributeValue> {
        stage.attribute(m.shader_path(), name)
    }

    #[test]
    fn new_material_has_gltf_defaults() {
        let mut stage = MemoryStage::new(1);
        let m = RenderMaterial::new("/mat".into(), MaterialDefinition::default(), &mut stage);
        assert_eq!(
            shader_attr(&stage, &m, tokens::DIFFUSE_COLOR_CONSTANT),
            Some(AttributeValue::Vec3f([1.0, 1.0, 1.0]))
        );
        assert_eq!(shader_attr(&stage, &m, tokens::METALLIC_CONSTANT), Some(AttributeValue::Float(1.0)));
        assert_eq!(stage.attribute(m.path(), tokens::TILE_ID), Some(AttributeValue::Int(-1)));
        assert!(shader_attr(&stage, &m, tokens::DIFFUSE_TEXTURE).is_none());
    }

    #[test]
    fn set_material_binds_texture() {
        let mut stage = MemoryStage::new(1);
        let def = MaterialDefinition {
            has_base_color_texture: true,
            ..Default::default()
        };
        let mut m = RenderMaterial::new("/mat".into(), def, &mut stage);
        let info = MaterialInfo {
            base_color: [0.5, 0.25, 0.0, 1.0],
            metallic: 0.0,
            ..Default::default()
        };
        m.set_material(&mut stage, 2, 7, &info, Some("dynamic://tex_1"));

        assert_eq!(
            shader_attr(&stage, &m, tokens::DIFFUSE_TEXTURE),
            Some(AttributeValue::Asset("dynamic://tex_1".into()))
        );
        assert_eq!(
            shader_attr(&stage, &m, tokens::DIFFUSE_COLOR_CONSTANT),
            Some(AttributeValue::Vec3f([0.5, 0.25, 0.0]))
        );
        assert_eq!(stage.attribute(m.shader_path(), tokens::TILESET_ID), Some(AttributeValue::Int(2)));
    }

    #[test]
    fn imagery_layers_bind_and_unbind() {
        let mut stage = MemoryStage::new(1);
        let def = MaterialDefinition {
            imagery_layer_count: 1,
            ..Default::default()
        };
        let mut m = RenderMaterial::new("/mat".into(), def, &mut stage);
        m.set_imagery_layer(&mut stage, 0, Some("dynamic://imagery"));
        assert_eq!(
            shader_attr(&stage, &m, &tokens::imagery_layer_input(0)),
            Some(AttributeValue::Asset("dynamic://imagery".into()))
        );
        m.set_imagery_layer(&mut stage, 0, None);
        assert_eq!(
            shader_attr(&stage, &m, &tokens::imagery_layer_input(0)),
            Some(AttributeValue::Asset(String::new()))
        );

        // Out-of-range layers are ignored.
        let before = stage.mutation_count();
        m.set_imagery_layer(&mut stage, 3, Some("x"));
        m.set_imagery_alpha(&mut stage, 3, 0.5);
        assert_eq!(stage.mutation_count(), before);
    }

    #[test]
    fn imagery_alpha_resets_to_opaque() {
        let mut stage = MemoryStage::new(1);
        let def = MaterialDefinition {
            imagery_layer_count: 2,
            ..Default::default()
        };
        let mut m = RenderMaterial::new("/mat".into(), def, &mut stage);
        m.set_imagery_alpha(&mut stage, 1, 0.3);
        assert_eq!(m.imagery_alpha(1), Some(0.3));
        m.reset(&mut stage);
        assert_eq!(m.imagery_alpha(1), Some(1.0));
    }

    #[test]
    fn user_shaders_are_copied_and_updated() {
        let mut stage = MemoryStage::new(1);
        let user = ScenePath::from("/Looks/Custom");
        let user_shader = user.append_child("Shader");
        stage.create_prim(&user, tokens::MATERIAL_PRIM);
        stage.create_prim(&user_shader, tokens::SHADER_PRIM);
        stage.set_attribute(&user_shader, "inputs:tint", AttributeValue::Vec3f([1.0, 0.0, 0.0]));

        let def = MaterialDefinition {
            tileset_material_path: Some(user.clone()),
            ..Default::default()
        };
        let mut m = RenderMaterial::new("/mat".into(), def, &mut stage);
        let copy = m.path().append_child("tileset_Shader");
        assert_eq!(stage.attribute(&copy, "inputs:tint"), Some(AttributeValue::Vec3f([1.0, 0.0, 0.0])));

        stage.set_attribute(&user_shader, "inputs:tint", AttributeValue::Vec3f([0.0, 1.0, 0.0]));
        assert!(m.update_shader_input(&mut stage, &user_shader, "inputs:tint"));
        assert_eq!(stage.attribute(&copy, "inputs:tint"), Some(AttributeValue::Vec3f([0.0, 1.0, 0.0])));
        assert!(!m.update_shader_input(&mut stage, &"/Other/Shader".into(), "inputs:tint"));
    }

    #[test]
    fn destroy_removes_network() {
        let mut stage = MemoryStage::new(1);
        let mut m = RenderMaterial::new("/mat".into(), MaterialDefinition::default(), &mut stage);
        m.destroy(&mut stage);
        assert!(!stage.prim_exists(&"/mat".into()));
        assert!(!stage.prim_exists(&"/mat/Shader".into()));
    }
}
