//! Directory of render-resource pools keyed by resource definition.

use tracing::{debug, info};

use super::{GeometryDefinition, MaterialDefinition, RenderGeometry, RenderMaterial, RenderTexture, Staged};
use crate::config::ResourceConfig;
use crate::pool::{ObjectPool, PoolHandle, PoolStats};
use crate::scene::{SceneHost, ScenePath, StageId};

/// Reference to a pooled geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryHandle {
    pool: u32,
    slot: PoolHandle,
}

/// Reference to a pooled material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle {
    pool: u32,
    slot: PoolHandle,
}

/// Reference to a pooled texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    slot: PoolHandle,
}

struct DefinitionPool<D, T> {
    definition: D,
    pool: ObjectPool<Staged<T>>,
}

/// Aggregate counters over every pool, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct ResourceStatistics {
    pub materials_capacity: usize,
    pub materials_loaded: usize,
    pub geometries_capacity: usize,
    pub geometries_loaded: usize,
    pub geometries_rendered: usize,
    pub triangles_loaded: usize,
    pub triangles_rendered: usize,
    pub textures_capacity: usize,
    pub textures_loaded: usize,
}

/// Owns all geometry, material and texture pools of one stage.
///
/// Every entry point is a no-op when the host has moved to a different
/// stage than the one the manager was built for.
pub struct ResourceManager {
    stage_id: StageId,
    config: ResourceConfig,
    geometry_pools: Vec<DefinitionPool<GeometryDefinition, RenderGeometry>>,
    material_pools: Vec<DefinitionPool<MaterialDefinition, RenderMaterial>>,
    texture_pool: ObjectPool<Staged<RenderTexture>>,
}

impl ResourceManager {
    pub fn new(stage_id: StageId, config: ResourceConfig) -> Self {
        let texture_pool = Self::new_texture_pool(&config);
        Self {
            stage_id,
            config,
            geometry_pools: Vec::new(),
            material_pools: Vec::new(),
            texture_pool,
        }
    }

    fn new_texture_pool(config: &ResourceConfig) -> ObjectPool<Staged<RenderTexture>> {
        ObjectPool::new(
            config.texture_pool_initial_capacity,
            !config.disable_texture_pool,
            |id, stage: &mut dyn SceneHost| {
                let name = format!("fabric_texture_pool_0_object_{id}");
                Staged::new(stage.stage_id(), RenderTexture::new(name, stage))
            },
        )
    }

    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    fn is_live(&self, stage: &dyn SceneHost) -> bool {
        stage.stage_id() == self.stage_id
    }

    fn geometry_pool_index(&mut self, definition: GeometryDefinition) -> usize {
        if let Some(i) = self.geometry_pools.iter().position(|p| p.definition == definition) {
            return i;
        }
        let pool_id = self.geometry_pools.len();
        debug!(pool_id, ?definition, "Creating geometry pool");
        let pool = ObjectPool::new(
            self.config.geometry_pool_initial_capacity,
            !self.config.disable_geometry_pool,
            move |id, stage: &mut dyn SceneHost| {
                let path = ScenePath::from(format!("/fabric_geometry_pool_{pool_id}_object_{id}"));
                Staged::new(stage.stage_id(), RenderGeometry::new(path, definition, stage))
            },
        );
        self.geometry_pools.push(DefinitionPool { definition, pool });
        pool_id
    }

    fn material_pool_index(&mut self, definition: &MaterialDefinition) -> usize {
        if let Some(i) = self.material_pools.iter().position(|p| &p.definition == definition) {
            return i;
        }
        let pool_id = self.material_pools.len();
        debug!(pool_id, ?definition, "Creating material pool");
        let factory_definition = definition.clone();
        let pool = ObjectPool::new(
            self.config.material_pool_initial_capacity,
            !self.config.disable_material_pool,
            move |id, stage: &mut dyn SceneHost| {
                let path = ScenePath::from(format!("/fabric_material_pool_{pool_id}_object_{id}"));
                Staged::new(
                    stage.stage_id(),
                    RenderMaterial::new(path, factory_definition.clone(), stage),
                )
            },
        );
        self.material_pools.push(DefinitionPool {
            definition: definition.clone(),
            pool,
        });
        pool_id
    }

    pub fn acquire_geometry(&mut self, stage: &mut dyn SceneHost, definition: GeometryDefinition) -> Option<GeometryHandle> {
        if !self.is_live(stage) {
            return None;
        }
        let pool = self.geometry_pool_index(definition);
        let slot = self.geometry_pools[pool].pool.acquire(stage);
        Some(GeometryHandle { pool: pool as u32, slot })
    }

    pub fn acquire_material(&mut self, stage: &mut dyn SceneHost, definition: &MaterialDefinition) -> Option<MaterialHandle> {
        if !self.is_live(stage) {
            return None;
        }
        let pool = self.material_pool_index(definition);
        let slot = self.material_pools[pool].pool.acquire(stage);
        Some(MaterialHandle { pool: pool as u32, slot })
    }

    pub fn acquire_texture(&mut self, stage: &mut dyn SceneHost) -> Option<TextureHandle> {
        if !self.is_live(stage) {
            return None;
        }
        Some(TextureHandle {
            slot: self.texture_pool.acquire(stage),
        })
    }

    /// Returns the geometry to its pool, reset to defaults.
    pub fn release_geometry(&mut self, stage: &mut dyn SceneHost, handle: GeometryHandle) -> bool {
        if !self.is_live(stage) {
            return false;
        }
        self.geometry_pools
            .get_mut(handle.pool as usize)
            .is_some_and(|p| p.pool.release(handle.slot, stage))
    }

    pub fn release_material(&mut self, stage: &mut dyn SceneHost, handle: MaterialHandle) -> bool {
        if !self.is_live(stage) {
            return false;
        }
        self.material_pools
            .get_mut(handle.pool as usize)
            .is_some_and(|p| p.pool.release(handle.slot, stage))
    }

    pub fn release_texture(&mut self, stage: &mut dyn SceneHost, handle: TextureHandle) -> bool {
        if !self.is_live(stage) {
            return false;
        }
        self.texture_pool.release(handle.slot, stage)
    }

    pub fn geometry(&self, handle: GeometryHandle) -> Option<&RenderGeometry> {
        let entry = self.geometry_pools.get(handle.pool as usize)?;
        entry.pool.get(handle.slot).map(Staged::get)
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&RenderMaterial> {
        let entry = self.material_pools.get(handle.pool as usize)?;
        entry.pool.get(handle.slot).map(Staged::get)
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&RenderTexture> {
        self.texture_pool.get(handle.slot).map(Staged::get)
    }

    /// Runs `f` on a live geometry. Stale handles and foreign stages yield
    /// `None`.
    pub fn with_geometry<R>(
        &mut self,
        stage: &mut dyn SceneHost,
        handle: GeometryHandle,
        f: impl FnOnce(&mut RenderGeometry, &mut dyn SceneHost) -> R,
    ) -> Option<R> {
        let entry = self.geometry_pools.get_mut(handle.pool as usize)?;
        entry.pool.get_mut(handle.slot)?.with(stage, f)
    }

    pub fn with_material<R>(
        &mut self,
        stage: &mut dyn SceneHost,
        handle: MaterialHandle,
        f: impl FnOnce(&mut RenderMaterial, &mut dyn SceneHost) -> R,
    ) -> Option<R> {
        let entry = self.material_pools.get_mut(handle.pool as usize)?;
        entry.pool.get_mut(handle.slot)?.with(stage, f)
    }

    pub fn with_texture<R>(
        &mut self,
        stage: &mut dyn SceneHost,
        handle: TextureHandle,
        f: impl FnOnce(&mut RenderTexture, &mut dyn SceneHost) -> R,
    ) -> Option<R> {
        self.texture_pool.get_mut(handle.slot)?.with(stage, f)
    }

    /// Propagates an edited user shader input to every active material
    /// that copies that shader. Returns the number of materials touched.
    pub fn update_shader_input(&mut self, stage: &mut dyn SceneHost, shader_path: &ScenePath, property: &str) -> usize {
        if !self.is_live(stage) {
            return 0;
        }
        let mut updated = 0;
        for entry in &mut self.material_pools {
            for material in entry.pool.iter_active_mut() {
                let touched = material.with(stage, |m, stage| m.update_shader_input(stage, shader_path, property));
                if touched == Some(true) {
                    updated += 1;
                }
            }
        }
        updated
    }

    pub fn geometry_pool_stats(&self) -> Vec<(GeometryDefinition, PoolStats)> {
        self.geometry_pools
            .iter()
            .map(|p| (p.definition, p.pool.stats()))
            .collect()
    }

    pub fn material_pool_stats(&self) -> Vec<(MaterialDefinition, PoolStats)> {
        self.material_pools
            .iter()
            .map(|p| (p.definition.clone(), p.pool.stats()))
            .collect()
    }

    pub fn texture_pool_stats(&self) -> PoolStats {
        self.texture_pool.stats()
    }

    pub fn statistics(&self) -> ResourceStatistics {
        let mut stats = ResourceStatistics::default();
        for entry in &self.geometry_pools {
            stats.geometries_capacity += entry.pool.capacity();
            for (_, geometry) in entry.pool.iter_active() {
                let geometry = geometry.get();
                stats.geometries_loaded += 1;
                stats.triangles_loaded += geometry.triangle_count();
                if geometry.is_visible() {
                    stats.geometries_rendered += 1;
                    stats.triangles_rendered += geometry.triangle_count();
                }
            }
        }
        for entry in &self.material_pools {
            stats.materials_capacity += entry.pool.capacity();
            stats.materials_loaded += entry.pool.active_count();
        }
        stats.textures_capacity = self.texture_pool.capacity();
        stats.textures_loaded = self.texture_pool.active_count();
        stats
    }

    /// Destroys every pooled object. Outstanding handles become stale.
    pub fn clear(&mut self, stage: &mut dyn SceneHost) {
        for entry in &mut self.geometry_pools {
            entry.pool.clear(stage);
        }
        for entry in &mut self.material_pools {
            entry.pool.clear(stage);
        }
        self.texture_pool.clear(stage);
        self.geometry_pools.clear();
        self.material_pools.clear();
    }

    /// Drops every pool without touching the scene and rebinds the manager
    /// to a new stage. Used when the host reloads its stage, which already
    /// took the old objects with it.
    pub fn reset_for_stage(&mut self, stage_id: StageId, config: ResourceConfig) {
        info!(old_stage = self.stage_id, new_stage = stage_id, "Rebuilding render resource pools");
        self.geometry_pools.clear();
        self.material_pools.clear();
        self.texture_pool = Self::new_texture_pool(&config);
        self.stage_id = stage_id;
        self.config = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MemoryStage;

    fn plain() -> GeometryDefinition {
        GeometryDefinition::default()
    }

    #[test]
    fn equal_definitions_share_a_pool() {
        let mut stage = MemoryStage::new(1);
        let mut manager = ResourceManager::new(1, ResourceConfig::default());
        let a = manager.acquire_geometry(&mut stage, plain()).unwrap();
        let b = manager.acquire_geometry(&mut stage, plain()).unwrap();
        let normals = GeometryDefinition {
            has_normals: true,
            ..plain()
        };
        let c = manager.acquire_geometry(&mut stage, normals).unwrap();

        assert_eq!(a.pool, b.pool);
        assert_ne!(a.pool, c.pool);
        assert_eq!(manager.geometry_pool_stats().len(), 2);
    }

    #[test]
    fn released_geometry_is_recycled() {
        let mut stage = MemoryStage::new(1);
        let mut manager = ResourceManager::new(1, ResourceConfig::default());
        for _ in 0..5 {
            let a = manager.acquire_geometry(&mut stage, plain()).unwrap();
            let b = manager.acquire_geometry(&mut stage, plain()).unwrap();
            assert!(manager.release_geometry(&mut stage, a));
            assert!(manager.release_geometry(&mut stage, b));
        }
        let (_, stats) = manager.geometry_pool_stats()[0];
        assert_eq!(stats.constructed, 2);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn pooling_disabled_constructs_fresh_objects() {
        let mut stage = MemoryStage::new(1);
        let config = ResourceConfig {
            disable_geometry_pool: true,
            ..Default::default()
        };
        let mut manager = ResourceManager::new(1, config);
        let a = manager.acquire_geometry(&mut stage, plain()).unwrap();
        let first = manager.geometry(a).unwrap().path().clone();
        manager.release_geometry(&mut stage, a);
        assert!(!stage.prim_exists(&first));

        let b = manager.acquire_geometry(&mut stage, plain()).unwrap();
        assert_ne!(manager.geometry(b).unwrap().path(), &first);
    }

    #[test]
    fn foreign_stage_is_ignored() {
        let mut stage = MemoryStage::new(1);
        let mut manager = ResourceManager::new(1, ResourceConfig::default());
        let handle = manager.acquire_geometry(&mut stage, plain()).unwrap();

        stage.reload(2);
        stage.clear_mutations();
        assert!(manager.acquire_geometry(&mut stage, plain()).is_none());
        assert!(!manager.release_geometry(&mut stage, handle));
        assert!(manager
            .with_geometry(&mut stage, handle, |g, s| g.set_visibility(s, true))
            .is_none());
        assert_eq!(stage.mutation_count(), 0);
    }

    #[test]
    fn statistics_count_rendered_geometry() {
        let mut stage = MemoryStage::new(1);
        let mut manager = ResourceManager::new(1, ResourceConfig::default());
        let a = manager.acquire_geometry(&mut stage, plain()).unwrap();
        let _b = manager.acquire_geometry(&mut stage, plain()).unwrap();
        manager.with_geometry(&mut stage, a, |g, s| g.set_visibility(s, true));
        let _m = manager.acquire_material(&mut stage, &MaterialDefinition::default()).unwrap();
        let _t = manager.acquire_texture(&mut stage).unwrap();

        let stats = manager.statistics();
        assert_eq!(stats.geometries_loaded, 2);
        assert_eq!(stats.geometries_rendered, 1);
        assert_eq!(stats.materials_loaded, 1);
        assert_eq!(stats.textures_loaded, 1);
        assert_eq!(stats.geometries_capacity, 2048);
    }

    #[test]
    fn clear_destroys_everything() {
        let mut stage = MemoryStage::new(1);
        let mut manager = ResourceManager::new(1, ResourceConfig::default());
        let g = manager.acquire_geometry(&mut stage, plain()).unwrap();
        let path = manager.geometry(g).unwrap().path().clone();
        manager.acquire_texture(&mut stage).unwrap();
        manager.clear(&mut stage);

        assert!(!stage.prim_exists(&path));
        assert_eq!(stage.texture_count(), 0);
        assert!(manager.geometry(g).is_none());
    }

    #[test]
    fn reset_for_stage_rebinds() {
        let mut stage = MemoryStage::new(1);
        let mut manager = ResourceManager::new(1, ResourceConfig::default());
        manager.acquire_geometry(&mut stage, plain()).unwrap();
        stage.reload(2);
        manager.reset_for_stage(2, ResourceConfig::default());
        assert_eq!(manager.stage_id(), 2);
        assert!(manager.geometry_pool_stats().is_empty());
        assert!(manager.acquire_geometry(&mut stage, plain()).is_some());
    }
}
