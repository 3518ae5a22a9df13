//! Top-level streaming context: the entry points a host calls.
//!
//! Every entry point first checks the stage it is handed against the stage
//! the pools were built for. On a mismatch the old stage's state is thrown
//! away and the new stage is scanned, so the rest of the crate never has to
//! repeat that check. Entry points never fail: bad input yields
//! [`TilesetHandle::INVALID`] or does nothing. A source that cannot be
//! read still gets a handle; the tileset stays empty until it is fixed.

use glam::DMat4;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ContextConfig, ImageryOptions, ResourceConfig};
use crate::controller::{Services, TilesetController, TilesetStatistics};
use crate::notify::{
    property_action, ChangeKind, ChangeRecord, DrainAction, NotificationPipeline, PrimType, PropertyAction,
};
use crate::registry::{ImageryEntry, IonSession, Registries};
use crate::render::{ResourceManager, ResourceStatistics};
use crate::scene::{AttributeValue, SceneHost, ScenePath};
use crate::streaming::{ViewUpdateResult, Viewport};
use crate::tokens;

/// Host-facing id of a tileset added through the [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TilesetHandle(pub i64);

impl TilesetHandle {
    pub const INVALID: TilesetHandle = TilesetHandle(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

pub struct Context {
    config: ContextConfig,
    services: Services,
    resources: ResourceManager,
    registries: Registries,
    notifications: NotificationPipeline,
    next_tileset_id: i64,
}

/// Work collected during one drain pass.
#[derive(Default)]
struct DrainState {
    actions: Vec<DrainAction>,
    reloads: Vec<ScenePath>,
    reload_stage: bool,
}

impl DrainState {
    fn schedule_reload(&mut self, path: ScenePath) {
        if !self.reloads.contains(&path) {
            self.reloads.push(path);
        }
    }
}

impl Context {
    /// Binds a new context to `stage` and queues everything already on it
    /// for registration at the first frame.
    pub fn new(stage: &dyn SceneHost, config: ContextConfig, services: Services) -> Self {
        let resource_config = resource_config(stage, &config);
        let mut context = Self {
            resources: ResourceManager::new(stage.stage_id(), resource_config),
            config,
            services,
            registries: Registries::default(),
            notifications: NotificationPipeline::new(),
            next_tileset_id: 0,
        };
        context.notifications.on_stage_loaded(stage, &context.registries);
        info!(stage = stage.stage_id(), "Streaming context created");
        context
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.pending_count()
    }

    /// Drops all state of a previous stage. Returns true if `stage` is a
    /// different stage than the one the context was bound to.
    fn attach_stage(&mut self, stage: &mut dyn SceneHost) -> bool {
        if stage.stage_id() == self.resources.stage_id() {
            return false;
        }
        info!(
            old_stage = self.resources.stage_id(),
            new_stage = stage.stage_id(),
            "Stage changed, resetting streaming state"
        );
        for mut controller in self.registries.assets.take_tilesets() {
            controller.destroy(stage, &mut self.resources);
        }
        self.registries.assets.clear_imagery();
        self.registries.sessions.clear();
        self.registries.anchors.clear();
        self.resources
            .reset_for_stage(stage.stage_id(), resource_config(stage, &self.config));
        self.notifications.clear();
        self.notifications.on_stage_loaded(stage, &self.registries);
        true
    }

    pub fn add_tileset_from_url(&mut self, stage: &mut dyn SceneHost, url: &str) -> TilesetHandle {
        self.attach_stage(stage);
        if url.trim().is_empty() {
            warn!("Refusing to add a tileset without a url");
            return TilesetHandle::INVALID;
        }
        let path = self.create_tileset_prim(stage);
        stage.set_attribute(&path, tokens::SOURCE_TYPE, AttributeValue::Token(tokens::SOURCE_URL.into()));
        stage.set_attribute(&path, tokens::URL, AttributeValue::String(url.to_string()));
        self.register_and_load(stage, path)
    }

    pub fn add_tileset_from_asset(
        &mut self,
        stage: &mut dyn SceneHost,
        asset_id: i64,
        access_token: &str,
    ) -> TilesetHandle {
        self.attach_stage(stage);
        if asset_id <= 0 {
            warn!(asset_id, "Refusing to add a tileset with an invalid ion asset id");
            return TilesetHandle::INVALID;
        }
        let path = self.create_tileset_prim(stage);
        stage.set_attribute(&path, tokens::SOURCE_TYPE, AttributeValue::Token(tokens::SOURCE_ION.into()));
        stage.set_attribute(&path, tokens::ION_ASSET_ID, AttributeValue::Int(asset_id));
        stage.set_attribute(&path, tokens::ION_ACCESS_TOKEN, AttributeValue::String(access_token.to_string()));
        self.register_and_load(stage, path)
    }

    fn create_tileset_prim(&mut self, stage: &mut dyn SceneHost) -> ScenePath {
        let mut n = self.next_tileset_id;
        let path = loop {
            let candidate = ScenePath::root().append_child(&format!("Tileset_{n}"));
            if !stage.prim_exists(&candidate) {
                break candidate;
            }
            n += 1;
        };
        stage.create_prim(&path, tokens::TILESET_PRIM);
        path
    }

    fn register_and_load(&mut self, stage: &mut dyn SceneHost, path: ScenePath) -> TilesetHandle {
        let id = self.next_tileset_id;
        self.next_tileset_id += 1;
        let mut controller =
            TilesetController::new(id, path.clone(), self.config.default_georeference_path.clone());
        // A failed reload is logged by the controller; the tileset stays
        // registered and empty so a later source edit can reload it.
        controller.reload(stage, &mut self.resources, &self.registries.sessions, &self.services);
        if let Err(e) = self.registries.assets.add_tileset(controller) {
            warn!(tileset = %path, error = %e, "Could not register tileset");
            stage.destroy_prim(&path);
            return TilesetHandle::INVALID;
        }
        TilesetHandle(id)
    }

    /// Stops streaming the tileset and deletes its prim. Unknown handles
    /// are ignored.
    pub fn remove_tileset(&mut self, stage: &mut dyn SceneHost, handle: TilesetHandle) {
        self.attach_stage(stage);
        let Some(path) = self.tileset_path(handle) else {
            return;
        };
        self.unregister_tileset(stage, &path);
        stage.destroy_prim(&path);
        info!(tileset = %path, id = handle.0, "Tileset removed");
    }

    fn unregister_tileset(&mut self, stage: &mut dyn SceneHost, path: &ScenePath) {
        if let Some(mut controller) = self.registries.assets.remove_tileset(path) {
            controller.destroy(stage, &mut self.resources);
        }
        for imagery in self.registries.assets.imagery_paths() {
            if self.registries.assets.imagery(&imagery).is_some_and(|e| &e.tileset_path == path) {
                self.registries.assets.remove_imagery(&imagery);
            }
        }
    }

    fn tileset_path(&self, handle: TilesetHandle) -> Option<ScenePath> {
        if !handle.is_valid() {
            return None;
        }
        self.registries.assets.tileset_by_id(handle.0).map(|t| t.path().clone())
    }

    /// Drapes ion imagery asset `asset_id` over the tileset and reloads it.
    /// Returns false when nothing was added.
    pub fn add_imagery_from_asset(
        &mut self,
        stage: &mut dyn SceneHost,
        handle: TilesetHandle,
        name: &str,
        asset_id: i64,
        access_token: &str,
    ) -> bool {
        self.attach_stage(stage);
        let Some(tileset_path) = self.tileset_path(handle) else {
            return false;
        };
        if name.is_empty() || name.contains(['/', '.']) || asset_id <= 0 {
            warn!(tileset = %tileset_path, name, asset_id, "Refusing to add imagery");
            return false;
        }
        let path = tileset_path.append_child(name);
        if self.registries.assets.is_imagery(&path) {
            warn!(imagery = %path, "Imagery layer already exists");
            return false;
        }
        stage.create_prim(&path, tokens::IMAGERY_PRIM);
        stage.set_attribute(&path, tokens::ION_ASSET_ID, AttributeValue::Int(asset_id));
        stage.set_attribute(&path, tokens::ION_ACCESS_TOKEN, AttributeValue::String(access_token.to_string()));
        let entry = ImageryEntry {
            path,
            tileset_path: tileset_path.clone(),
            ion_asset_id: asset_id,
            ion_server_path: None,
        };
        if self.registries.assets.add_imagery(entry).is_err() {
            return false;
        }
        if let Some(controller) = self.registries.assets.tileset_mut(&tileset_path) {
            controller.reload(stage, &mut self.resources, &self.registries.sessions, &self.services);
        }
        true
    }

    /// Streams one tileset for one camera. Pending notifications are
    /// drained first, since this is a frame boundary.
    #[allow(clippy::too_many_arguments)]
    pub fn update_frame(
        &mut self,
        stage: &mut dyn SceneHost,
        handle: TilesetHandle,
        view: DMat4,
        projection: DMat4,
        width: f64,
        height: f64,
    ) -> Option<ViewUpdateResult> {
        self.attach_stage(stage);
        self.drain_notifications(stage);
        let path = self.tileset_path(handle)?;
        let viewport = Viewport {
            view: view.to_cols_array(),
            projection: projection.to_cols_array(),
            width,
            height,
        };
        let controller = self.registries.assets.tileset_mut(&path)?;
        controller.on_update_frame(stage, &mut self.resources, &[viewport])
    }

    /// Per-frame tick: drains notifications, then streams every tileset
    /// for the given viewports. Returns what the drain did.
    pub fn on_update_frame(&mut self, stage: &mut dyn SceneHost, viewports: &[Viewport]) -> Vec<DrainAction> {
        self.attach_stage(stage);
        let actions = self.drain_notifications(stage);
        for controller in self.registries.assets.tilesets_mut() {
            controller.on_update_frame(stage, &mut self.resources, viewports);
        }
        actions
    }

    /// Moves the default georeference and every anchor bound to it.
    pub fn set_georeference_origin(&mut self, stage: &mut dyn SceneHost, longitude: f64, latitude: f64, height: f64) {
        self.attach_stage(stage);
        let path = self.config.default_georeference_path.clone();
        if !stage.prim_exists(&path) {
            stage.create_prim(&path, tokens::GEOREFERENCE_PRIM);
        }
        stage.set_attribute(&path, tokens::GEOREFERENCE_ORIGIN_LONGITUDE, AttributeValue::Float(longitude));
        stage.set_attribute(&path, tokens::GEOREFERENCE_ORIGIN_LATITUDE, AttributeValue::Float(latitude));
        stage.set_attribute(&path, tokens::GEOREFERENCE_ORIGIN_HEIGHT, AttributeValue::Float(height));
        let anchors = self.registries.anchors.update_origin(stage, &path);
        info!(longitude, latitude, height, anchors, "Georeference origin set");
    }

    /// Host notification hook; see [`NotificationPipeline::on_objects_changed`].
    pub fn on_objects_changed(&mut self, stage: &mut dyn SceneHost, resynced: &[ScenePath], changed_info: &[ScenePath]) {
        if self.attach_stage(stage) {
            // The fresh scan already covers whatever changed.
            return;
        }
        self.notifications
            .on_objects_changed(stage, &self.registries, resynced, changed_info);
    }

    /// The host opened a stage: start over on it.
    pub fn on_stage_loaded(&mut self, stage: &mut dyn SceneHost) {
        if !self.attach_stage(stage) {
            self.notifications.on_stage_loaded(stage, &self.registries);
        }
    }

    /// Replays the notifications collected since the last drain: added,
    /// then removed, then changed. Tileset reloads are deduplicated and run
    /// last.
    pub fn drain_notifications(&mut self, stage: &mut dyn SceneHost) -> Vec<DrainAction> {
        let pending = self.notifications.begin_drain();
        if pending.is_empty() {
            self.notifications.end_drain();
            return Vec::new();
        }
        let mut state = DrainState::default();
        for record in &pending.added {
            self.apply_added(stage, record, &mut state);
        }
        for record in &pending.removed {
            self.apply_removed(stage, record, &mut state);
        }
        for record in &pending.changed {
            if let ChangeKind::PropertyChanged(property) = &record.kind {
                self.apply_changed(stage, record, property, &mut state);
            }
        }

        if state.reload_stage {
            self.reload_stage(stage);
            state.actions.push(DrainAction::ReloadStage);
        } else {
            for path in state.reloads {
                let Some(controller) = self.registries.assets.tileset_mut(&path) else {
                    continue;
                };
                controller.reload(stage, &mut self.resources, &self.registries.sessions, &self.services);
                state.actions.push(DrainAction::ReloadTileset(path));
            }
        }
        self.notifications.end_drain();
        debug!(records = pending.len(), actions = state.actions.len(), "Drained notifications");
        state.actions
    }

    fn apply_added(&mut self, stage: &mut dyn SceneHost, record: &ChangeRecord, state: &mut DrainState) {
        let path = &record.path;
        match record.prim_type {
            PrimType::Tileset => {
                if self.registries.assets.is_tileset(path) {
                    return;
                }
                let id = self.next_tileset_id;
                self.next_tileset_id += 1;
                let controller =
                    TilesetController::new(id, path.clone(), self.config.default_georeference_path.clone());
                if self.registries.assets.add_tileset(controller).is_ok() {
                    state.actions.push(DrainAction::RegisterTileset(path.clone()));
                    state.schedule_reload(path.clone());
                }
            }
            PrimType::Imagery => {
                let options = ImageryOptions::read_from(stage, path);
                let entry = ImageryEntry {
                    path: path.clone(),
                    tileset_path: path.parent(),
                    ion_asset_id: options.ion_asset_id,
                    ion_server_path: options.ion_server_path,
                };
                let tileset_path = entry.tileset_path.clone();
                if self.registries.assets.add_imagery(entry).is_ok() {
                    state.actions.push(DrainAction::RegisterImagery(path.clone()));
                    if self.registries.assets.is_tileset(&tileset_path) {
                        state.schedule_reload(tileset_path);
                    }
                }
            }
            PrimType::IonServer => {
                self.registries.sessions.add_session(IonSession::read_from(stage, path));
                state.actions.push(DrainAction::RegisterSession(path.clone()));
                for tileset in self.registries.assets.tilesets_using_server(path) {
                    state.schedule_reload(tileset);
                }
            }
            PrimType::GlobeAnchor => {
                let default_georeference = &self.config.default_georeference_path;
                if self.registries.anchors.add_anchor(stage, path, default_georeference) {
                    state.actions.push(DrainAction::RegisterAnchor(path.clone()));
                }
            }
            PrimType::Data => {
                if path == &self.config.data_prim_path
                    && &ResourceConfig::read_from(stage, path) != self.resources.config()
                {
                    state.reload_stage = true;
                }
            }
            PrimType::Georeference | PrimType::Shader | PrimType::Other => {}
        }
    }

    fn apply_removed(&mut self, stage: &mut dyn SceneHost, record: &ChangeRecord, state: &mut DrainState) {
        let path = &record.path;
        match record.prim_type {
            // Imagery below a removed tileset arrives as its own record.
            PrimType::Tileset => {
                if let Some(mut controller) = self.registries.assets.remove_tileset(path) {
                    controller.destroy(stage, &mut self.resources);
                    state.actions.push(DrainAction::RemoveTileset(path.clone()));
                }
            }
            PrimType::Imagery => {
                if let Some(entry) = self.registries.assets.remove_imagery(path) {
                    state.actions.push(DrainAction::RemoveImagery(path.clone()));
                    state.schedule_reload(entry.tileset_path);
                }
            }
            PrimType::IonServer => {
                if self.registries.sessions.remove_session(path) {
                    state.actions.push(DrainAction::RemoveSession(path.clone()));
                }
                for tileset in self.registries.assets.tilesets_using_server(path) {
                    state.schedule_reload(tileset);
                }
            }
            PrimType::GlobeAnchor => {
                if self.registries.anchors.remove_anchor(path) {
                    state.actions.push(DrainAction::RemoveAnchor(path.clone()));
                }
            }
            PrimType::Georeference | PrimType::Shader | PrimType::Data | PrimType::Other => {}
        }
    }

    fn apply_changed(&mut self, stage: &mut dyn SceneHost, record: &ChangeRecord, property: &str, state: &mut DrainState) {
        let path = &record.path;
        let Some(action) = property_action(record.prim_type, property) else {
            return;
        };
        let default_georeference = self.config.default_georeference_path.clone();
        match action {
            PropertyAction::ReloadTileset => {
                if self.registries.assets.is_tileset(path) {
                    state.schedule_reload(path.clone());
                }
            }
            PropertyAction::UpdateTilesetOptions => {
                if let Some(controller) = self.registries.assets.tileset_mut(path) {
                    controller.update_tileset_options(stage);
                    state.actions.push(DrainAction::UpdateTilesetOptions(path.clone()));
                }
            }
            PropertyAction::UpdateDisplayColorAndOpacity => {
                if let Some(controller) = self.registries.assets.tileset_mut(path) {
                    controller.update_display_color_and_opacity(stage, &mut self.resources);
                    state.actions.push(DrainAction::UpdateDisplayColorAndOpacity(path.clone()));
                }
            }
            PropertyAction::ReloadImageryTileset => {
                let Some(entry) = self.registries.assets.remove_imagery(path) else {
                    return;
                };
                let options = ImageryOptions::read_from(stage, path);
                let tileset_path = entry.tileset_path.clone();
                let refreshed = ImageryEntry {
                    ion_asset_id: options.ion_asset_id,
                    ion_server_path: options.ion_server_path,
                    ..entry
                };
                if self.registries.assets.add_imagery(refreshed).is_ok() && self.registries.assets.is_tileset(&tileset_path)
                {
                    state.schedule_reload(tileset_path);
                }
            }
            PropertyAction::UpdateImageryAlpha => {
                let Some(tileset_path) = self.registries.assets.imagery(path).map(|e| e.tileset_path.clone()) else {
                    return;
                };
                let Some(controller) = self.registries.assets.tileset_mut(&tileset_path) else {
                    return;
                };
                let Some(index) = controller.imagery_layer_index(path) else {
                    return;
                };
                controller.update_imagery_layer_alpha(stage, &mut self.resources, index);
                state.actions.push(DrainAction::UpdateImageryLayerAlpha {
                    tileset: tileset_path,
                    index,
                });
            }
            PropertyAction::UpdateGeoreferenceOrigin => {
                let anchors = self.registries.anchors.update_origin(stage, path);
                state.actions.push(DrainAction::UpdateGeoreferenceOrigin {
                    georeference: path.clone(),
                    anchors,
                });
            }
            PropertyAction::AnchorByTransform
            | PropertyAction::AnchorByGeographicCoordinates
            | PropertyAction::AnchorByFixedTransform
            | PropertyAction::AnchorSettings => {
                let anchors = &mut self.registries.anchors;
                if !anchors.contains(path) {
                    return;
                }
                match action {
                    PropertyAction::AnchorByTransform => anchors.update_by_transform(stage, path),
                    PropertyAction::AnchorByGeographicCoordinates => {
                        anchors.update_by_geographic_coordinates(stage, path)
                    }
                    PropertyAction::AnchorByFixedTransform => anchors.update_by_fixed_transform(stage, path),
                    _ => anchors.update_settings(stage, path, &default_georeference),
                }
                state.actions.push(DrainAction::UpdateAnchor(path.clone()));
            }
            PropertyAction::ReloadIonServer => {
                if !self.registries.sessions.exists(path) {
                    return;
                }
                self.registries.sessions.add_session(IonSession::read_from(stage, path));
                for tileset in self.registries.assets.tilesets_using_server(path) {
                    state.schedule_reload(tileset);
                }
            }
            PropertyAction::UpdateShaderInput => {
                let mut materials = 0;
                for controller in self.registries.assets.tilesets_mut() {
                    materials += controller.update_shader_input(stage, &mut self.resources, path, property);
                }
                state.actions.push(DrainAction::UpdateShaderInput {
                    shader: path.clone(),
                    property: property.to_string(),
                    materials,
                });
            }
            PropertyAction::ReloadStage => state.reload_stage = true,
        }
    }

    /// Rebuilds every pool with the data prim's current policy and reloads
    /// every tileset.
    pub fn reload_stage(&mut self, stage: &mut dyn SceneHost) {
        for controller in self.registries.assets.tilesets_mut() {
            controller.destroy(stage, &mut self.resources);
        }
        self.resources.clear(stage);
        self.resources
            .reset_for_stage(stage.stage_id(), resource_config(stage, &self.config));
        for controller in self.registries.assets.tilesets_mut() {
            controller.reload(stage, &mut self.resources, &self.registries.sessions, &self.services);
        }
        info!(tilesets = self.registries.assets.tileset_count(), "Stage reloaded");
    }

    pub fn tileset_handle(&self, path: &ScenePath) -> TilesetHandle {
        self.registries
            .assets
            .tileset(path)
            .map_or(TilesetHandle::INVALID, |t| TilesetHandle(t.id()))
    }

    pub fn tileset_statistics(&self, handle: TilesetHandle) -> Option<TilesetStatistics> {
        let path = self.tileset_path(handle)?;
        self.registries.assets.tileset(&path).map(|t| t.statistics())
    }

    pub fn tileset_count(&self) -> usize {
        self.registries.assets.tileset_count()
    }

    pub fn resource_statistics(&self) -> ResourceStatistics {
        self.resources.statistics()
    }

    /// Releases everything the context put into the scene. The tileset
    /// prims themselves stay.
    pub fn shutdown(&mut self, stage: &mut dyn SceneHost) {
        for mut controller in self.registries.assets.take_tilesets() {
            controller.destroy(stage, &mut self.resources);
        }
        self.registries.assets.clear_imagery();
        self.registries.sessions.clear();
        self.registries.anchors.clear();
        if stage.stage_id() == self.resources.stage_id() {
            self.resources.clear(stage);
        }
        self.notifications.clear();
    }
}

/// Pool policy authored on the data prim, or the configured default when
/// the stage has none.
fn resource_config(stage: &dyn SceneHost, config: &ContextConfig) -> ResourceConfig {
    if stage.prim_exists(&config.data_prim_path) {
        ResourceConfig::read_from(stage, &config.data_prim_path)
    } else {
        config.resources.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::DVec3;

    use super::*;
    use crate::scene::MemoryStage;
    use crate::streaming::decode::tests::triangle_glb;
    use crate::streaming::{InlineAsyncSystem, MemorySourceFactory, MemoryTileSource, TilesetJson};
    use crate::transform::ecef::enu_frame;

    fn tileset_json() -> TilesetJson {
        let transform = enu_frame(0.0, 0.0, 0.0).to_cols_array();
        serde_json::from_value(serde_json::json!({
            "asset": {"version": "1.1"},
            "root": {
                "transform": transform.to_vec(),
                "boundingVolume": {"sphere": [0, 0, 0, 50]},
                "geometricError": 0,
                "content": {"uri": "leaf.glb"}
            }
        }))
        .unwrap()
    }

    fn services() -> Services {
        let source = Arc::new(MemoryTileSource::new(tileset_json()).with_content("leaf.glb", triangle_glb()));
        Services {
            sources: Arc::new(
                MemorySourceFactory::new()
                    .with_tileset("memory://tileset.json", source.clone())
                    .with_ion_tileset(96188, source),
            ),
            async_system: Arc::new(InlineAsyncSystem),
        }
    }

    fn viewport() -> Viewport {
        let view = DMat4::look_at_rh(DVec3::new(0.0, -300.0, 100.0), DVec3::ZERO, DVec3::Z);
        let projection = DMat4::perspective_rh_gl(60f64.to_radians(), 16.0 / 9.0, 1.0, 1.0e7);
        Viewport {
            view: view.to_cols_array(),
            projection: projection.to_cols_array(),
            width: 1920.0,
            height: 1080.0,
        }
    }

    fn context(stage: &MemoryStage) -> Context {
        Context::new(stage, ContextConfig::default(), services())
    }

    #[test]
    fn invalid_input_yields_invalid_handle() {
        let mut stage = MemoryStage::new(1);
        let mut ctx = context(&stage);
        assert_eq!(ctx.add_tileset_from_url(&mut stage, ""), TilesetHandle::INVALID);
        assert_eq!(ctx.add_tileset_from_asset(&mut stage, 0, "token"), TilesetHandle::INVALID);
        assert_eq!(ctx.tileset_count(), 0);
        assert!(stage.prims_of_type(tokens::TILESET_PRIM).is_empty());

        // Unknown handles are no-ops.
        ctx.remove_tileset(&mut stage, TilesetHandle(42));
        ctx.remove_tileset(&mut stage, TilesetHandle::INVALID);
        assert!(!ctx.add_imagery_from_asset(&mut stage, TilesetHandle(42), "Bing", 2, ""));
        assert!(ctx
            .update_frame(&mut stage, TilesetHandle(42), DMat4::IDENTITY, DMat4::IDENTITY, 1.0, 1.0)
            .is_none());
    }

    #[test]
    fn add_update_and_remove() {
        let mut stage = MemoryStage::new(1);
        let mut ctx = context(&stage);
        let url = ctx.add_tileset_from_url(&mut stage, "memory://tileset.json");
        let ion = ctx.add_tileset_from_asset(&mut stage, 96188, "token");
        assert!(url.is_valid() && ion.is_valid());
        assert_ne!(url, ion);
        assert_eq!(ctx.tileset_count(), 2);

        let vp = viewport();
        let first = ctx
            .update_frame(&mut stage, url, vp.view_matrix(), vp.projection_matrix(), vp.width, vp.height)
            .unwrap();
        assert_eq!(first.tiles_visited, 1);
        assert_eq!(ctx.tileset_statistics(url).unwrap().tiles_visited, 1);

        let path = ctx.tileset_path(url).unwrap();
        ctx.remove_tileset(&mut stage, url);
        assert!(!stage.prim_exists(&path));
        assert_eq!(ctx.tileset_count(), 1);
        assert_eq!(ctx.tileset_handle(&path), TilesetHandle::INVALID);
        assert!(ctx.tileset_statistics(url).is_none());
    }

    #[test]
    fn unreachable_source_keeps_an_empty_tileset() {
        let mut stage = MemoryStage::new(1);
        let mut ctx = context(&stage);
        let handle = ctx.add_tileset_from_url(&mut stage, "memory://unreachable.json");
        assert!(handle.is_valid());
        let path = ctx.tileset_path(handle).unwrap();
        assert!(stage.prim_exists(&path));
        assert!(!ctx.registries().assets.tileset(&path).unwrap().is_loaded());
        assert!(ctx
            .update_frame(&mut stage, handle, DMat4::IDENTITY, DMat4::IDENTITY, 1.0, 1.0)
            .is_none());

        // Pointing the prim at a reachable source reloads it.
        stage.set_attribute(&path, tokens::URL, AttributeValue::String("memory://tileset.json".into()));
        ctx.on_objects_changed(&mut stage, &[], &[path.append_property(tokens::URL)]);
        let actions = ctx.on_update_frame(&mut stage, &[viewport()]);
        assert!(actions.contains(&DrainAction::ReloadTileset(path.clone())));
        assert!(ctx.registries().assets.tileset(&path).unwrap().is_loaded());
        assert_eq!(ctx.tileset_statistics(handle).unwrap().tiles_visited, 1);
    }

    #[test]
    fn stage_change_rebuilds_registries() {
        let mut stage = MemoryStage::new(1);
        let mut ctx = context(&stage);
        let handle = ctx.add_tileset_from_url(&mut stage, "memory://tileset.json");
        let path = ctx.tileset_path(handle).unwrap();
        ctx.on_update_frame(&mut stage, &[viewport()]);

        stage.reload(2);
        let actions = ctx.on_update_frame(&mut stage, &[viewport()]);
        assert!(actions.contains(&DrainAction::RegisterTileset(path.clone())));
        assert!(actions.contains(&DrainAction::ReloadTileset(path.clone())));
        assert_eq!(ctx.resources().stage_id(), 2);
        assert_eq!(ctx.tileset_count(), 1);
        // Re-registered under a fresh id.
        assert_ne!(ctx.tileset_handle(&path), handle);
    }

    #[test]
    fn debug_option_change_reloads_stage() {
        let mut stage = MemoryStage::new(1);
        let data = ScenePath::from("/Cesium");
        stage.create_prim(&data, tokens::DATA_PRIM);
        let mut ctx = context(&stage);
        ctx.add_tileset_from_url(&mut stage, "memory://tileset.json");
        ctx.drain_notifications(&mut stage);

        stage.set_attribute(&data, tokens::DEBUG_DISABLE_MATERIALS, AttributeValue::Bool(true));
        ctx.on_objects_changed(&mut stage, &[], &[data.append_property(tokens::DEBUG_DISABLE_MATERIALS)]);
        let actions = ctx.drain_notifications(&mut stage);
        assert_eq!(actions, vec![DrainAction::ReloadStage]);
        assert!(ctx.resources().config().disable_materials);
        assert_eq!(ctx.tileset_count(), 1);
    }

    #[test]
    fn georeference_origin_moves_anchors() {
        let mut stage = MemoryStage::new(1);
        let anchor = ScenePath::from("/Cube");
        stage.create_prim(&anchor, tokens::XFORM_PRIM);
        stage.apply_api(&anchor, tokens::GLOBE_ANCHOR_API);
        let mut ctx = context(&stage);
        let actions = ctx.drain_notifications(&mut stage);
        assert_eq!(actions, vec![DrainAction::RegisterAnchor(anchor.clone())]);

        let before = stage.attribute(&anchor, tokens::XFORM_OP_TRANSFORM_CESIUM);
        ctx.set_georeference_origin(&mut stage, 10.0, 45.0, 100.0);
        let after = stage.attribute(&anchor, tokens::XFORM_OP_TRANSFORM_CESIUM);
        assert!(after.is_some());
        assert_ne!(before, after);
    }

    #[test]
    fn removed_server_reloads_bound_tilesets() {
        let mut stage = MemoryStage::new(1);
        let server = ScenePath::from("/Servers/Ion");
        stage.create_prim(&server, tokens::ION_SERVER_PRIM);
        stage.set_attribute(&server, tokens::PROJECT_DEFAULT_ION_ACCESS_TOKEN, AttributeValue::String("t".into()));
        let tileset = ScenePath::from("/World/Tileset");
        stage.create_prim(&tileset, tokens::TILESET_PRIM);
        stage.set_attribute(&tileset, tokens::SOURCE_TYPE, AttributeValue::Token("ion".into()));
        stage.set_attribute(&tileset, tokens::ION_ASSET_ID, AttributeValue::Int(96188));
        stage.set_attribute(&tileset, tokens::ION_SERVER_BINDING, AttributeValue::PathArray(vec![server.clone()]));

        let mut ctx = context(&stage);
        let actions = ctx.drain_notifications(&mut stage);
        assert_eq!(
            actions,
            vec![
                DrainAction::RegisterSession(server.clone()),
                DrainAction::RegisterTileset(tileset.clone()),
                DrainAction::ReloadTileset(tileset.clone()),
            ]
        );

        stage.destroy_prim(&ScenePath::from("/Servers"));
        ctx.on_objects_changed(&mut stage, &[ScenePath::from("/Servers")], &[]);
        let actions = ctx.drain_notifications(&mut stage);
        assert_eq!(
            actions,
            vec![DrainAction::RemoveSession(server), DrainAction::ReloadTileset(tileset)]
        );
    }
}
