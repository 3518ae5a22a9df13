use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::trace;

use super::{AttributeValue, SceneHost, ScenePath, StageId};

/// Kind of scene mutation recorded by [`MemoryStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    CreatePrim,
    DestroyPrim,
    SetAttribute(String),
    ApplyApi(String),
    UploadTexture,
    ReleaseTexture,
}

/// One recorded mutation. Texture mutations use `/<texture name>` as path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub path: ScenePath,
    pub kind: MutationKind,
}

#[derive(Debug, Clone, Default)]
pub struct PrimRecord {
    pub type_name: String,
    pub apis: BTreeSet<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone)]
pub struct TextureRecord {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// In-memory scene host used by the headless binary and the tests.
///
/// Every mutation is appended to a log so callers can assert exactly what
/// the streamer wrote.
#[derive(Debug)]
pub struct MemoryStage {
    stage_id: StageId,
    prims: BTreeMap<ScenePath, PrimRecord>,
    textures: HashMap<String, TextureRecord>,
    mutations: Vec<Mutation>,
}

impl MemoryStage {
    pub fn new(stage_id: StageId) -> Self {
        Self {
            stage_id,
            prims: BTreeMap::new(),
            textures: HashMap::new(),
            mutations: Vec::new(),
        }
    }

    /// Simulates the host tearing down and reopening the stage. Authored
    /// prims survive, dynamic textures do not.
    pub fn reload(&mut self, new_stage_id: StageId) {
        self.stage_id = new_stage_id;
        self.textures.clear();
    }

    pub fn apply_api(&mut self, path: &ScenePath, api: &str) {
        if let Some(prim) = self.prims.get_mut(path) {
            prim.apis.insert(api.to_string());
            self.record(path.clone(), MutationKind::ApplyApi(api.to_string()));
        }
    }

    pub fn prim(&self, path: &ScenePath) -> Option<&PrimRecord> {
        self.prims.get(path)
    }

    pub fn prim_count(&self) -> usize {
        self.prims.len()
    }

    /// Prims whose type name equals `type_name`.
    pub fn prims_of_type(&self, type_name: &str) -> Vec<ScenePath> {
        self.prims
            .iter()
            .filter(|(_, p)| p.type_name == type_name)
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn texture(&self, name: &str) -> Option<&TextureRecord> {
        self.textures.get(name)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.len()
    }

    pub fn clear_mutations(&mut self) {
        self.mutations.clear();
    }

    fn record(&mut self, path: ScenePath, kind: MutationKind) {
        trace!(path = %path, kind = ?kind, "stage mutation");
        self.mutations.push(Mutation { path, kind });
    }
}

impl SceneHost for MemoryStage {
    fn stage_id(&self) -> StageId {
        self.stage_id
    }

    fn prim_exists(&self, path: &ScenePath) -> bool {
        self.prims.contains_key(path)
    }

    fn type_name(&self, path: &ScenePath) -> Option<String> {
        self.prims.get(path).map(|p| p.type_name.clone())
    }

    fn has_api(&self, path: &ScenePath, api: &str) -> bool {
        self.prims.get(path).is_some_and(|p| p.apis.contains(api))
    }

    fn children(&self, path: &ScenePath) -> Vec<ScenePath> {
        self.prims
            .keys()
            .filter(|p| p.parent() == *path)
            .cloned()
            .collect()
    }

    fn traverse(&self) -> Vec<ScenePath> {
        // A parent path sorts before every path it prefixes.
        self.prims.keys().cloned().collect()
    }

    fn create_prim(&mut self, path: &ScenePath, type_name: &str) {
        let prim = self.prims.entry(path.clone()).or_default();
        prim.type_name = type_name.to_string();
        self.record(path.clone(), MutationKind::CreatePrim);
    }

    fn destroy_prim(&mut self, path: &ScenePath) {
        let doomed: Vec<ScenePath> = self
            .prims
            .keys()
            .filter(|p| p.has_prefix(path))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return;
        }
        for p in &doomed {
            self.prims.remove(p);
        }
        self.record(path.clone(), MutationKind::DestroyPrim);
    }

    fn attribute(&self, path: &ScenePath, name: &str) -> Option<AttributeValue> {
        self.prims
            .get(path)
            .and_then(|p| p.attributes.get(name).cloned())
    }

    fn attribute_names(&self, path: &ScenePath) -> Vec<String> {
        self.prims
            .get(path)
            .map(|p| p.attributes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn set_attribute(&mut self, path: &ScenePath, name: &str, value: AttributeValue) {
        let Some(prim) = self.prims.get_mut(path) else {
            return;
        };
        prim.attributes.insert(name.to_string(), value);
        self.record(path.clone(), MutationKind::SetAttribute(name.to_string()));
    }

    fn upload_texture(&mut self, name: &str, width: u32, height: u32, rgba: &[u8]) {
        self.textures.insert(
            name.to_string(),
            TextureRecord {
                width,
                height,
                rgba: rgba.to_vec(),
            },
        );
        self.record(ScenePath::root().append_child(name), MutationKind::UploadTexture);
    }

    fn release_texture(&mut self, name: &str) {
        if self.textures.remove(name).is_some() {
            self.record(ScenePath::root().append_child(name), MutationKind::ReleaseTexture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_destroy_subtree() {
        let mut stage = MemoryStage::new(7);
        stage.create_prim(&"/World".into(), "Xform");
        stage.create_prim(&"/World/Tileset".into(), "CesiumTilesetPrim");
        stage.create_prim(&"/World/Tileset/Imagery".into(), "CesiumImageryPrim");
        stage.create_prim(&"/World/Tileset2".into(), "CesiumTilesetPrim");

        assert_eq!(stage.children(&"/World".into()).len(), 2);
        stage.destroy_prim(&"/World/Tileset".into());
        assert!(!stage.prim_exists(&"/World/Tileset/Imagery".into()));
        assert!(stage.prim_exists(&"/World/Tileset2".into()));
        assert_eq!(stage.prim_count(), 2);
    }

    #[test]
    fn traverse_visits_parents_first() {
        let mut stage = MemoryStage::new(1);
        stage.create_prim(&"/A/B".into(), "Xform");
        stage.create_prim(&"/A".into(), "Xform");
        stage.create_prim(&"/A-x".into(), "Xform");
        let order = stage.traverse();
        let a = order.iter().position(|p| p.as_str() == "/A").unwrap();
        let ab = order.iter().position(|p| p.as_str() == "/A/B").unwrap();
        assert!(a < ab);
    }

    #[test]
    fn attributes_on_missing_prims_are_ignored() {
        let mut stage = MemoryStage::new(1);
        stage.set_attribute(&"/Nope".into(), "x", AttributeValue::Int(1));
        assert_eq!(stage.mutation_count(), 0);
        assert!(stage.attribute(&"/Nope".into(), "x").is_none());
    }

    #[test]
    fn mutation_log_records_everything() {
        let mut stage = MemoryStage::new(1);
        let p = ScenePath::from("/Mesh");
        stage.create_prim(&p, "Mesh");
        stage.set_attribute(&p, "points", AttributeValue::Vec3fArray(vec![[0.0; 3]]));
        stage.upload_texture("tex", 1, 1, &[255, 255, 255, 255]);
        stage.release_texture("tex");
        stage.release_texture("tex");
        stage.destroy_prim(&p);

        let kinds: Vec<_> = stage.mutations().iter().map(|m| m.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                MutationKind::CreatePrim,
                MutationKind::SetAttribute("points".into()),
                MutationKind::UploadTexture,
                MutationKind::ReleaseTexture,
                MutationKind::DestroyPrim,
            ]
        );
    }

    #[test]
    fn reload_issues_new_stage_id() {
        let mut stage = MemoryStage::new(1);
        stage.create_prim(&"/Tileset".into(), "CesiumTilesetPrim");
        stage.upload_texture("tex", 1, 1, &[0; 4]);
        stage.reload(2);
        assert_eq!(stage.stage_id(), 2);
        assert!(stage.prim_exists(&"/Tileset".into()));
        assert_eq!(stage.texture_count(), 0);
    }
}
