use tracing::debug;

use crate::controller::TilesetController;
use crate::error::{Result, StreamError};
use crate::scene::ScenePath;

/// A registered imagery layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageryEntry {
    pub path: ScenePath,
    /// Tileset the layer drapes over (its parent prim).
    pub tileset_path: ScenePath,
    pub ion_asset_id: i64,
    pub ion_server_path: Option<ScenePath>,
}

/// Active tilesets and imagery layers, by path and by ion asset id.
///
/// A path holds at most one tileset and at most one imagery layer.
#[derive(Default)]
pub struct AssetRegistry {
    tilesets: Vec<TilesetController>,
    imagery: Vec<ImageryEntry>,
}

impl AssetRegistry {
    pub fn add_tileset(&mut self, controller: TilesetController) -> Result<()> {
        if self.is_tileset(controller.path()) {
            return Err(StreamError::Registry(format!(
                "tileset {} is already registered",
                controller.path()
            )));
        }
        debug!(tileset = %controller.path(), id = controller.id(), "Registered tileset");
        self.tilesets.push(controller);
        Ok(())
    }

    pub fn remove_tileset(&mut self, path: &ScenePath) -> Option<TilesetController> {
        let index = self.tilesets.iter().position(|t| t.path() == path)?;
        Some(self.tilesets.remove(index))
    }

    pub fn is_tileset(&self, path: &ScenePath) -> bool {
        self.tileset(path).is_some()
    }

    pub fn tileset(&self, path: &ScenePath) -> Option<&TilesetController> {
        self.tilesets.iter().find(|t| t.path() == path)
    }

    pub fn tileset_mut(&mut self, path: &ScenePath) -> Option<&mut TilesetController> {
        self.tilesets.iter_mut().find(|t| t.path() == path)
    }

    pub fn tileset_by_id(&self, id: i64) -> Option<&TilesetController> {
        self.tilesets.iter().find(|t| t.id() == id)
    }

    pub fn tileset_by_id_mut(&mut self, id: i64) -> Option<&mut TilesetController> {
        self.tilesets.iter_mut().find(|t| t.id() == id)
    }

    pub fn tilesets(&self) -> impl Iterator<Item = &TilesetController> {
        self.tilesets.iter()
    }

    pub fn tilesets_mut(&mut self) -> impl Iterator<Item = &mut TilesetController> {
        self.tilesets.iter_mut()
    }

    pub fn tileset_paths(&self) -> Vec<ScenePath> {
        self.tilesets.iter().map(|t| t.path().clone()).collect()
    }

    pub fn tileset_count(&self) -> usize {
        self.tilesets.len()
    }

    /// Tilesets streaming ion asset `asset_id`.
    pub fn tilesets_by_ion_asset_id(&self, asset_id: i64) -> Vec<ScenePath> {
        self.tilesets
            .iter()
            .filter(|t| t.options().ion_asset_id == asset_id)
            .map(|t| t.path().clone())
            .collect()
    }

    /// Tilesets that stream anything through the ion server at `server`.
    pub fn tilesets_using_server(&self, server: &ScenePath) -> Vec<ScenePath> {
        let mut paths: Vec<ScenePath> = self
            .tilesets
            .iter()
            .filter(|t| t.uses_ion_server(server))
            .map(|t| t.path().clone())
            .collect();
        for entry in self.imagery.iter().filter(|i| i.ion_server_path.as_ref() == Some(server)) {
            if !paths.contains(&entry.tileset_path) && self.is_tileset(&entry.tileset_path) {
                paths.push(entry.tileset_path.clone());
            }
        }
        paths
    }

    /// Removes every tileset, handing the controllers back for teardown.
    pub fn take_tilesets(&mut self) -> Vec<TilesetController> {
        std::mem::take(&mut self.tilesets)
    }

    pub fn add_imagery(&mut self, entry: ImageryEntry) -> Result<()> {
        if self.is_imagery(&entry.path) {
            return Err(StreamError::Registry(format!("imagery {} is already registered", entry.path)));
        }
        debug!(imagery = %entry.path, tileset = %entry.tileset_path, "Registered imagery");
        self.imagery.push(entry);
        Ok(())
    }

    pub fn remove_imagery(&mut self, path: &ScenePath) -> Option<ImageryEntry> {
        let index = self.imagery.iter().position(|i| &i.path == path)?;
        Some(self.imagery.remove(index))
    }

    pub fn is_imagery(&self, path: &ScenePath) -> bool {
        self.imagery(path).is_some()
    }

    pub fn imagery(&self, path: &ScenePath) -> Option<&ImageryEntry> {
        self.imagery.iter().find(|i| &i.path == path)
    }

    pub fn imagery_by_ion_asset_id(&self, asset_id: i64) -> Vec<&ImageryEntry> {
        self.imagery.iter().filter(|i| i.ion_asset_id == asset_id).collect()
    }

    pub fn imagery_paths(&self) -> Vec<ScenePath> {
        self.imagery.iter().map(|i| i.path.clone()).collect()
    }

    pub fn imagery_count(&self) -> usize {
        self.imagery.len()
    }

    pub fn clear_imagery(&mut self) {
        self.imagery.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(id: i64, path: &str) -> TilesetController {
        TilesetController::new(id, ScenePath::from(path), ScenePath::from("/CesiumGeoreference"))
    }

    #[test]
    fn one_tileset_per_path() {
        let mut registry = AssetRegistry::default();
        registry.add_tileset(controller(0, "/A")).unwrap();
        assert!(matches!(registry.add_tileset(controller(1, "/A")), Err(StreamError::Registry(_))));
        registry.add_tileset(controller(1, "/B")).unwrap();
        assert_eq!(registry.tileset_count(), 2);
        assert_eq!(registry.tileset_by_id(1).unwrap().path(), &ScenePath::from("/B"));

        let removed = registry.remove_tileset(&ScenePath::from("/A")).unwrap();
        assert_eq!(removed.id(), 0);
        assert!(registry.remove_tileset(&ScenePath::from("/A")).is_none());
    }

    #[test]
    fn imagery_by_asset_id() {
        let mut registry = AssetRegistry::default();
        let entry = ImageryEntry {
            path: ScenePath::from("/A/Bing"),
            tileset_path: ScenePath::from("/A"),
            ion_asset_id: 2,
            ion_server_path: Some(ScenePath::from("/Server")),
        };
        registry.add_imagery(entry.clone()).unwrap();
        assert!(registry.add_imagery(entry).is_err());
        assert_eq!(registry.imagery_by_ion_asset_id(2).len(), 1);
        assert!(registry.imagery_by_ion_asset_id(3).is_empty());

        // The owning tileset is not registered, so nothing to reload.
        assert!(registry.tilesets_using_server(&ScenePath::from("/Server")).is_empty());
        registry.add_tileset(controller(0, "/A")).unwrap();
        assert_eq!(registry.tilesets_using_server(&ScenePath::from("/Server")), vec![ScenePath::from("/A")]);
    }
}
