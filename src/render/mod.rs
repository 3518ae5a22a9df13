//! Scene-graph render resources: pooled geometry, materials and textures,
//! and the two-phase preparer that turns decoded tiles into them.

pub mod extract;
pub mod geometry;
pub mod manager;
pub mod material;
pub mod prepare;
pub mod texture;

use std::hash::{DefaultHasher, Hash, Hasher};

use glam::DMat4;

use crate::pool::Pooled;
use crate::scene::{AttributeValue, SceneHost, ScenePath, StageId};
use crate::tokens;

pub use geometry::{GeometryDefinition, RenderGeometry};
pub use manager::{GeometryHandle, MaterialHandle, ResourceManager, ResourceStatistics, TextureHandle};
pub use material::{MaterialDefinition, RenderMaterial};
pub use prepare::{MeshEntry, RenderResourcePreparer, RendererOptions, TileRenderResources};
pub use texture::RenderTexture;

/// Tileset id carried by reset objects.
pub const NO_TILESET_ID: i64 = -1;
/// Tile id carried by reset objects.
pub const NO_TILE_ID: i64 = -1;

/// A render object bound to the stage it was created on.
///
/// Every scene-touching operation goes through [`Staged::with`], which
/// skips the call when the host has since moved to another stage.
#[derive(Debug)]
pub struct Staged<T> {
    stage_id: StageId,
    inner: T,
}

impl<T> Staged<T> {
    pub fn new(stage_id: StageId, inner: T) -> Self {
        Self { stage_id, inner }
    }

    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn is_live(&self, stage: &dyn SceneHost) -> bool {
        stage.stage_id() == self.stage_id
    }

    /// Runs `f` against the stage, or returns `None` if the stage changed.
    pub fn with<R>(
        &mut self,
        stage: &mut dyn SceneHost,
        f: impl FnOnce(&mut T, &mut dyn SceneHost) -> R,
    ) -> Option<R> {
        if !self.is_live(stage) {
            return None;
        }
        Some(f(&mut self.inner, stage))
    }

    pub fn get(&self) -> &T {
        &self.inner
    }
}

impl<T: Pooled> Pooled for Staged<T> {
    fn reset(&mut self, stage: &mut dyn SceneHost) {
        self.with(stage, |inner, stage| inner.reset(stage));
    }

    fn destroy(&mut self, stage: &mut dyn SceneHost) {
        self.with(stage, |inner, stage| inner.destroy(stage));
    }
}

/// Everything a main-thread render step needs, assembled per frame by the
/// tileset controller.
pub struct MainThreadContext<'a> {
    pub stage: &'a mut dyn SceneHost,
    pub resources: &'a mut ResourceManager,
    /// ECEF to scene (georeferenced local) transform.
    pub ecef_to_usd: DMat4,
    pub display_color: [f32; 3],
    pub display_opacity: f32,
    /// Alpha per imagery layer, indexed by overlay id.
    pub imagery_alphas: &'a [f32],
}

/// Writes the tileset/tile id tags onto a prim.
pub(crate) fn set_tile_ids(stage: &mut dyn SceneHost, path: &ScenePath, tileset_id: i64, tile_id: i64) {
    stage.set_attribute(path, tokens::TILESET_ID, AttributeValue::Int(tileset_id));
    stage.set_attribute(path, tokens::TILE_ID, AttributeValue::Int(tile_id));
}

/// Deterministic debug color for a mesh, stable across runs.
pub fn random_color(tileset_id: i64, tile_id: i64, mesh_index: usize) -> [f32; 3] {
    let mut hasher = DefaultHasher::new();
    (tileset_id, tile_id, mesh_index).hash(&mut hasher);
    let h = hasher.finish();
    let channel = |shift: u32| ((h >> shift) & 0xFF) as f32 / 255.0;
    [channel(0), channel(8), channel(16)]
}
