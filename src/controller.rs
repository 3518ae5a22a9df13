//! Per-tileset streaming controller: owns one [`Tileset`] and keeps the
//! scene in sync with what it selects each frame.

use std::sync::Arc;

use glam::DMat4;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{ImageryOptions, TilesetOptions, TilesetSourceType};
use crate::error::{Result, StreamError};
use crate::registry::SessionRegistry;
use crate::render::{
    MainThreadContext, RenderResourcePreparer, RendererOptions, ResourceManager, TileRenderResources,
};
use crate::scene::{is_type, SceneHost, ScenePath};
use crate::streaming::{
    AsyncSystem, ImagerySource, RasterOverlay, SourceFactory, Tileset, TilesetSource, ViewState, ViewUpdateResult,
    Viewport,
};
use crate::tokens;
use crate::transform::Georeference;

/// Shared collaborators every controller loads through.
#[derive(Clone)]
pub struct Services {
    pub sources: Arc<dyn SourceFactory>,
    pub async_system: Arc<dyn AsyncSystem>,
}

/// Cumulative per-tileset counters, refreshed every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TilesetStatistics {
    pub tiles_visited: usize,
    pub culled_tiles_visited: usize,
    pub tiles_rendered: usize,
    pub tiles_culled: usize,
    pub max_depth_visited: u32,
    pub tiles_loading_worker: usize,
    pub tiles_loading_main: usize,
    pub tiles_loaded: usize,
    pub cached_bytes: usize,
    pub frame_number: u64,
}

/// An imagery layer that resolved to a live overlay, at the position of
/// its overlay id.
#[derive(Debug, Clone)]
struct ImageryLayer {
    path: ScenePath,
    options: ImageryOptions,
}

pub struct TilesetController {
    id: i64,
    path: ScenePath,
    default_georeference_path: ScenePath,
    options: TilesetOptions,
    imagery: Vec<ImageryLayer>,
    tileset: Option<Tileset<RenderResourcePreparer>>,
    /// Origin used for the transforms currently in the scene.
    georeference: Option<Georeference>,
    statistics: TilesetStatistics,
    reload_count: usize,
}

impl TilesetController {
    /// Creates an unloaded controller; call [`TilesetController::reload`]
    /// to start streaming.
    pub fn new(id: i64, path: ScenePath, default_georeference_path: ScenePath) -> Self {
        Self {
            id,
            path,
            default_georeference_path,
            options: TilesetOptions::default(),
            imagery: Vec::new(),
            tileset: None,
            georeference: None,
            statistics: TilesetStatistics::default(),
            reload_count: 0,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn path(&self) -> &ScenePath {
        &self.path
    }

    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    pub fn statistics(&self) -> TilesetStatistics {
        self.statistics
    }

    /// Number of times the streaming tileset was rebuilt.
    pub fn reload_count(&self) -> usize {
        self.reload_count
    }

    pub fn is_loaded(&self) -> bool {
        self.tileset.is_some()
    }

    pub fn imagery_paths(&self) -> Vec<ScenePath> {
        self.imagery.iter().map(|l| l.path.clone()).collect()
    }

    /// Overlay index of an imagery prim attached to this tileset.
    pub fn imagery_layer_index(&self, imagery_path: &ScenePath) -> Option<usize> {
        self.imagery.iter().position(|l| &l.path == imagery_path)
    }

    pub fn georeference_path(&self) -> &ScenePath {
        self.options
            .georeference_path
            .as_ref()
            .unwrap_or(&self.default_georeference_path)
    }

    /// Whether this tileset or one of its imagery layers streams through
    /// the ion server at `server`.
    pub fn uses_ion_server(&self, server: &ScenePath) -> bool {
        let tileset_bound =
            self.options.source_type == TilesetSourceType::Ion && self.options.ion_server_path.as_ref() == Some(server);
        tileset_bound
            || self
                .imagery
                .iter()
                .any(|l| l.options.ion_server_path.as_ref() == Some(server))
    }

    /// Tears down the streaming tileset and rebuilds it from the prim's
    /// current attributes. Failures are logged and leave the controller
    /// with nothing loaded.
    pub fn reload(
        &mut self,
        stage: &mut dyn SceneHost,
        resources: &mut ResourceManager,
        sessions: &SessionRegistry,
        services: &Services,
    ) {
        self.destroy(stage, resources);
        self.options = TilesetOptions::read_from(stage, &self.path);
        self.imagery.clear();
        self.georeference = None;
        self.statistics = TilesetStatistics::default();
        self.reload_count += 1;

        match self.create_tileset(stage, resources, sessions, services) {
            Ok(tileset) => {
                info!(
                    tileset = %self.path,
                    id = self.id,
                    tiles = tileset.tile_count(),
                    imagery = self.imagery.len(),
                    "Tileset reloaded"
                );
                self.tileset = Some(tileset);
            }
            Err(e) => {
                error!(tileset = %self.path, id = self.id, error = %e, "Tileset reload failed");
            }
        }
    }

    fn create_tileset(
        &mut self,
        stage: &dyn SceneHost,
        resources: &ResourceManager,
        sessions: &SessionRegistry,
        services: &Services,
    ) -> Result<Tileset<RenderResourcePreparer>> {
        let source = match self.options.source_type {
            TilesetSourceType::Url if self.options.url.is_empty() => {
                return Err(StreamError::Config(format!("{} has no url", self.path)));
            }
            TilesetSourceType::Url => TilesetSource::Url(self.options.url.clone()),
            TilesetSourceType::Ion => {
                let session = self.options.ion_server_path.as_ref().and_then(|p| sessions.session(p));
                TilesetSource::Ion {
                    asset_id: self.options.ion_asset_id,
                    access_token: resolve_token(&self.options.ion_access_token, session.map(|s| s.default_access_token.as_str())),
                    api_url: session.map(|s| s.api_url.clone()),
                }
            }
        };
        let tile_source = services.sources.tileset_source(&source)?;

        let mut overlays = Vec::new();
        for path in stage.children(&self.path) {
            if !is_type(stage, &path, tokens::IMAGERY_PRIM) {
                continue;
            }
            let options = ImageryOptions::read_from(stage, &path);
            let session = options.ion_server_path.as_ref().and_then(|p| sessions.session(p));
            let imagery_source = ImagerySource::Ion {
                asset_id: options.ion_asset_id,
                access_token: resolve_token(&options.ion_access_token, session.map(|s| s.default_access_token.as_str())),
                api_url: session.map(|s| s.api_url.clone()),
            };
            match services.sources.imagery_source(&imagery_source) {
                Ok(source) => {
                    overlays.push(RasterOverlay {
                        name: path.name().to_string(),
                        source,
                    });
                    self.imagery.push(ImageryLayer { path, options });
                }
                Err(e) => warn!(imagery = %path, error = %e, "Skipping imagery layer"),
            }
        }

        let config = resources.config();
        let preparer = RenderResourcePreparer::new(RendererOptions {
            tileset_id: self.id,
            smooth_normals: self.options.smooth_normals,
            imagery_layer_count: overlays.len(),
            disable_materials: config.disable_materials,
            disable_textures: config.disable_textures,
            random_colors: config.random_colors,
            tileset_material_path: self.options.material_path.clone(),
        });
        Tileset::new(
            tile_source,
            Arc::new(preparer),
            services.async_system.clone(),
            self.options.clone(),
            overlays,
        )
    }

    /// Runs one frame of streaming for the given viewports and applies the
    /// selection to the scene.
    pub fn on_update_frame(
        &mut self,
        stage: &mut dyn SceneHost,
        resources: &mut ResourceManager,
        viewports: &[Viewport],
    ) -> Option<ViewUpdateResult> {
        if self.tileset.is_none() || viewports.is_empty() {
            return None;
        }

        let georeference = Georeference::read_from(stage, self.georeference_path());
        let ecef_to_usd = georeference.ecef_to_local();
        let usd_to_ecef = georeference.local_to_ecef();
        let origin_changed = self.georeference.is_some_and(|g| g != georeference);
        self.georeference = Some(georeference);
        let tileset = self.tileset.as_mut()?;

        let views: Vec<ViewState> = viewports
            .iter()
            .map(|v| ViewState::from_viewport(v, usd_to_ecef))
            .collect();
        let alphas: Vec<f32> = self.imagery.iter().map(|l| l.options.alpha).collect();
        let mut ctx = MainThreadContext {
            stage,
            resources,
            ecef_to_usd,
            display_color: self.options.display_color,
            display_opacity: self.options.display_opacity,
            imagery_alphas: &alphas,
        };

        if origin_changed {
            debug!(tileset = %self.path, "Georeference origin changed, moving loaded tiles");
            tileset.for_each_render_resources(|_, r| r.set_world_transform(ctx.resources, ctx.stage, ecef_to_usd));
        }

        let result = tileset.update_view(&mut ctx, &views);
        for id in &result.tiles_fading_out {
            if let Some(r) = tileset.render_resources_mut(*id) {
                r.set_visibility(ctx.resources, ctx.stage, false);
            }
        }
        for id in &result.tiles_to_render {
            if let Some(r) = tileset.render_resources_mut(*id) {
                r.set_visibility(ctx.resources, ctx.stage, true);
                r.mark_selected(result.frame_number);
            }
        }

        self.statistics = TilesetStatistics {
            tiles_visited: result.tiles_visited,
            culled_tiles_visited: result.culled_tiles_visited,
            tiles_rendered: result.tiles_to_render.len(),
            tiles_culled: result.tiles_culled,
            max_depth_visited: result.max_depth_visited,
            tiles_loading_worker: result.worker_thread_tile_load_queue_length,
            tiles_loading_main: result.main_thread_tile_load_queue_length,
            tiles_loaded: tileset.number_of_tiles_loaded(),
            cached_bytes: tileset.total_data_bytes(),
            frame_number: result.frame_number,
        };
        Some(result)
    }

    /// Re-reads the streaming options that can change without a reload.
    pub fn update_tileset_options(&mut self, stage: &dyn SceneHost) {
        let fresh = TilesetOptions::read_from(stage, &self.path);
        let options = &mut self.options;
        options.maximum_screen_space_error = fresh.maximum_screen_space_error;
        options.preload_ancestors = fresh.preload_ancestors;
        options.preload_siblings = fresh.preload_siblings;
        options.forbid_holes = fresh.forbid_holes;
        options.maximum_simultaneous_tile_loads = fresh.maximum_simultaneous_tile_loads;
        options.maximum_cached_bytes = fresh.maximum_cached_bytes;
        options.loading_descendant_limit = fresh.loading_descendant_limit;
        options.enable_frustum_culling = fresh.enable_frustum_culling;
        options.enable_fog_culling = fresh.enable_fog_culling;
        options.enforce_culled_screen_space_error = fresh.enforce_culled_screen_space_error;
        options.culled_screen_space_error = fresh.culled_screen_space_error;
        options.main_thread_loading_time_limit = fresh.main_thread_loading_time_limit;
        options.suspend_update = fresh.suspend_update;
        if let Some(tileset) = &mut self.tileset {
            tileset.set_options(self.options.clone());
        }
    }

    pub fn update_display_color_and_opacity(&mut self, stage: &mut dyn SceneHost, resources: &mut ResourceManager) {
        let fresh = TilesetOptions::read_from(stage, &self.path);
        self.options.display_color = fresh.display_color;
        self.options.display_opacity = fresh.display_opacity;
        let (color, opacity) = (fresh.display_color, fresh.display_opacity);
        self.for_each_loaded(|r| r.set_display_color_and_opacity(resources, stage, color, opacity));
    }

    /// Pushes the alpha authored on imagery layer `index` to every loaded
    /// tile material.
    pub fn update_imagery_layer_alpha(&mut self, stage: &mut dyn SceneHost, resources: &mut ResourceManager, index: usize) {
        let Some(layer) = self.imagery.get_mut(index) else {
            return;
        };
        layer.options.alpha = ImageryOptions::read_from(stage, &layer.path).alpha;
        let alpha = layer.options.alpha;
        debug!(tileset = %self.path, index, alpha, "Imagery alpha updated");
        self.for_each_loaded(|r| r.set_imagery_alpha(resources, stage, index, alpha));
    }

    /// Propagates an edited input of the bound user material's shader to
    /// every tile material copy. Returns how many materials changed.
    pub fn update_shader_input(
        &mut self,
        stage: &mut dyn SceneHost,
        resources: &mut ResourceManager,
        shader_path: &ScenePath,
        property: &str,
    ) -> usize {
        if self.options.material_path.as_ref() != Some(&shader_path.parent()) {
            return 0;
        }
        resources.update_shader_input(stage, shader_path, property)
    }

    fn for_each_loaded(&mut self, mut f: impl FnMut(&mut TileRenderResources)) {
        if let Some(tileset) = &mut self.tileset {
            tileset.for_each_render_resources(|_, r| f(r));
        }
    }

    /// Releases every tile's render resources back to the pools.
    pub fn destroy(&mut self, stage: &mut dyn SceneHost, resources: &mut ResourceManager) {
        let Some(mut tileset) = self.tileset.take() else {
            return;
        };
        let mut ctx = MainThreadContext {
            stage,
            resources,
            ecef_to_usd: DMat4::IDENTITY,
            display_color: self.options.display_color,
            display_opacity: self.options.display_opacity,
            imagery_alphas: &[],
        };
        tileset.destroy(&mut ctx);
        self.statistics = TilesetStatistics::default();
    }
}

/// Tileset token first, then the server's project default.
fn resolve_token(token: &str, default: Option<&str>) -> String {
    if token.is_empty() {
        default.unwrap_or_default().to_string()
    } else {
        token.to_string()
    }
}
