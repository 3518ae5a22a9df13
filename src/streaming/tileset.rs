//! View-driven tile selection, loading and eviction.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use glam::{DMat4, DVec2, DVec3};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::decode::decode_tile_content;
use super::prepare::PrepareRendererResources;
use super::source::{is_external_tileset, RasterOverlaySource, Refine, TileJson, TileSource};
use super::task::{AsyncSystem, CancellationToken, Task, TaskPoll};
use super::tile::{ContentState, LoadedRaster, RasterState, Tile, TileId, TileInfo, WorkerOutput};
use super::view::ViewState;
use crate::config::TilesetOptions;
use crate::error::{Result, StreamError};
use crate::render::MainThreadContext;
use crate::transform::ecef::y_up_to_z_up;
use crate::types::BoundingVolume;

/// An imagery layer draped over every tile of a tileset.
#[derive(Clone)]
pub struct RasterOverlay {
    pub name: String,
    pub source: Arc<dyn RasterOverlaySource>,
}

/// Outcome of one [`Tileset::update_view`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewUpdateResult {
    pub tiles_to_render: Vec<TileId>,
    /// Rendered last frame but not this one.
    pub tiles_fading_out: Vec<TileId>,
    pub tiles_visited: usize,
    pub culled_tiles_visited: usize,
    pub tiles_culled: usize,
    pub max_depth_visited: u32,
    pub worker_thread_tile_load_queue_length: usize,
    pub main_thread_tile_load_queue_length: usize,
    pub frame_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LoadPriority {
    Urgent,
    Normal,
    Preload,
}

#[derive(Debug, Clone, Copy)]
struct LoadRequest {
    id: TileId,
    priority: LoadPriority,
    distance: f64,
}

#[derive(Debug, Clone, Copy)]
struct TraversalDetails {
    all_are_renderable: bool,
    any_were_rendered_last_frame: bool,
    not_yet_renderable_count: u32,
}

impl Default for TraversalDetails {
    fn default() -> Self {
        Self {
            all_are_renderable: true,
            any_were_rendered_last_frame: false,
            not_yet_renderable_count: 0,
        }
    }
}

impl TraversalDetails {
    fn leaf(renderable: bool, was_rendered: bool) -> Self {
        Self {
            all_are_renderable: renderable,
            any_were_rendered_last_frame: was_rendered,
            not_yet_renderable_count: u32::from(!renderable),
        }
    }

    fn combine(&mut self, other: TraversalDetails) {
        self.all_are_renderable &= other.all_are_renderable;
        self.any_were_rendered_last_frame |= other.any_were_rendered_last_frame;
        self.not_yet_renderable_count += other.not_yet_renderable_count;
    }
}

/// A streamed tile hierarchy.
///
/// All methods run on the main thread. Content loading is dispatched to the
/// async system and finished by later [`Tileset::update_view`] calls.
pub struct Tileset<P: PrepareRendererResources> {
    source: Arc<dyn TileSource>,
    preparer: Arc<P>,
    async_system: Arc<dyn AsyncSystem>,
    options: TilesetOptions,
    overlays: Vec<RasterOverlay>,
    tiles: Vec<Tile<P>>,
    root: TileId,
    token: CancellationToken,
    frame: u64,
    previous_render: HashSet<TileId>,
    last_result: ViewUpdateResult,
}

impl<P: PrepareRendererResources> Tileset<P> {
    /// Fetches the root description and builds the tile tree. Nothing is
    /// loaded until the first view update.
    pub fn new(
        source: Arc<dyn TileSource>,
        preparer: Arc<P>,
        async_system: Arc<dyn AsyncSystem>,
        options: TilesetOptions,
        overlays: Vec<RasterOverlay>,
    ) -> Result<Self> {
        let json = source.load_tileset_json()?;
        let mut tileset = Self {
            source,
            preparer,
            async_system,
            options,
            overlays,
            tiles: Vec::new(),
            root: TileId::from_index(0),
            token: CancellationToken::new(),
            frame: 0,
            previous_render: HashSet::new(),
            last_result: ViewUpdateResult::default(),
        };
        let Some(root) = tileset.add_tile_tree(&json.root, None, DMat4::IDENTITY, Refine::Replace, 0, None) else {
            return Err(StreamError::Source(format!(
                "{}: root tile has no valid bounding volume",
                tileset.source.describe()
            )));
        };
        tileset.root = root;
        info!(
            source = %tileset.source.describe(),
            tiles = tileset.tiles.len(),
            overlays = tileset.overlays.len(),
            "Tileset created"
        );
        Ok(tileset)
    }

    /// Appends `json` and its subtree. Tiles without a usable bounding
    /// volume are dropped with their descendants. `uri_base` prefixes
    /// relative content URIs of nested tilesets.
    fn add_tile_tree(
        &mut self,
        json: &TileJson,
        parent: Option<TileId>,
        parent_transform: DMat4,
        parent_refine: Refine,
        depth: u32,
        uri_base: Option<&str>,
    ) -> Option<TileId> {
        let local = match json.transform.as_deref() {
            Some(m) if m.len() == 16 => DMat4::from_cols_slice(m),
            _ => DMat4::IDENTITY,
        };
        let transform = parent_transform * local;
        let bv = &json.bounding_volume;
        let Some(volume) = BoundingVolume::from_arrays(bv.bbox.as_deref(), bv.sphere.as_deref(), bv.region.as_deref())
        else {
            warn!(depth, "Skipping tile without a valid bounding volume");
            return None;
        };

        let id = TileId::from_index(self.tiles.len());
        let refine = json.refine.unwrap_or(parent_refine);
        let content_uri = json
            .content
            .as_ref()
            .and_then(|c| c.uri())
            .map(|uri| resolve_uri(uri_base, uri));
        let state = if content_uri.is_some() {
            ContentState::Unloaded
        } else {
            ContentState::Empty
        };
        self.tiles.push(Tile {
            id,
            parent,
            children: Vec::new(),
            bounding_sphere: volume.to_sphere(&transform),
            geometric_error: json.geometric_error,
            refine,
            transform,
            content_uri,
            depth,
            state,
            last_visited_frame: 0,
            rasters: (0..self.overlays.len()).map(|_| None).collect(),
        });

        for child in &json.children {
            if let Some(child_id) = self.add_tile_tree(child, Some(id), transform, refine, depth + 1, uri_base) {
                self.tiles[id.index()].children.push(child_id);
            }
        }
        Some(id)
    }

    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: TilesetOptions) {
        self.options = options;
    }

    pub fn root(&self) -> TileId {
        self.root
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn tile_info(&self, id: TileId) -> Option<TileInfo> {
        self.tiles.get(id.index()).map(Tile::info)
    }

    pub fn parent(&self, id: TileId) -> Option<TileId> {
        self.tiles.get(id.index()).and_then(|t| t.parent)
    }

    /// Tiles whose main-thread phase has completed.
    pub fn number_of_tiles_loaded(&self) -> usize {
        self.tiles
            .iter()
            .filter(|t| matches!(t.state, ContentState::Done { .. }))
            .count()
    }

    pub fn total_data_bytes(&self) -> usize {
        self.tiles.iter().map(|t| t.state.byte_size()).sum()
    }

    pub fn render_resources_mut(&mut self, id: TileId) -> Option<&mut P::MainThreadResult> {
        match &mut self.tiles.get_mut(id.index())?.state {
            ContentState::Done { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn for_each_render_resources(&mut self, mut f: impl FnMut(TileId, &mut P::MainThreadResult)) {
        for tile in &mut self.tiles {
            if let ContentState::Done { result, .. } = &mut tile.state {
                f(tile.id, result);
            }
        }
    }

    /// Runs one frame of selection and loading for the given views.
    pub fn update_view(&mut self, ctx: &mut MainThreadContext<'_>, views: &[ViewState]) -> ViewUpdateResult {
        if self.options.suspend_update {
            return self.last_result.clone();
        }
        self.frame += 1;

        self.process_worker_results();
        self.finalize_loaded_tiles(ctx);

        let mut result = ViewUpdateResult {
            frame_number: self.frame,
            ..Default::default()
        };
        let mut queue = Vec::new();
        if !views.is_empty() {
            self.visit(self.root, views, &mut result, &mut queue);
        }

        let rendered: HashSet<TileId> = result.tiles_to_render.iter().copied().collect();
        let mut fading: Vec<TileId> = self.previous_render.difference(&rendered).copied().collect();
        fading.sort();
        result.tiles_fading_out = fading;

        self.dispatch_loads(queue);
        self.unload_cached_tiles(ctx, &rendered);
        self.update_rasters(ctx);

        for tile in &self.tiles {
            match tile.state {
                ContentState::Loading(_) => result.worker_thread_tile_load_queue_length += 1,
                ContentState::Loaded { .. } => result.main_thread_tile_load_queue_length += 1,
                _ => {}
            }
        }

        self.previous_render = rendered;
        self.last_result = result.clone();
        result
    }

    fn visit(
        &mut self,
        id: TileId,
        views: &[ViewState],
        result: &mut ViewUpdateResult,
        queue: &mut Vec<LoadRequest>,
    ) -> TraversalDetails {
        let tile = &self.tiles[id.index()];
        let sphere = tile.bounding_sphere;
        let geometric_error = tile.geometric_error;
        let refine = tile.refine;
        let children = tile.children.clone();
        result.tiles_visited += 1;
        result.max_depth_visited = result.max_depth_visited.max(tile.depth);

        let distance = views
            .iter()
            .map(|v| v.distance_to(&sphere))
            .fold(f64::INFINITY, f64::min);
        let in_frustum =
            !self.options.enable_frustum_culling || views.iter().any(|v| v.is_bounding_sphere_visible(&sphere));
        let fog_culled = self.options.enable_fog_culling
            && views.iter().all(|v| v.is_fog_culled(v.distance_to(&sphere)));

        let mut threshold = self.options.maximum_screen_space_error;
        if !in_frustum || fog_culled {
            if !self.options.enforce_culled_screen_space_error {
                result.tiles_culled += 1;
                if self.options.preload_siblings {
                    self.queue_load(id, LoadPriority::Preload, distance, queue);
                }
                return TraversalDetails::default();
            }
            result.culled_tiles_visited += 1;
            threshold = self.options.culled_screen_space_error;
        }
        self.tiles[id.index()].last_visited_frame = self.frame;

        let sse = views
            .iter()
            .map(|v| v.screen_space_error(geometric_error, v.distance_to(&sphere)))
            .fold(0.0, f64::max);
        let renderable = self.tiles[id.index()].is_renderable();
        let was_rendered = self.previous_render.contains(&id);

        if children.is_empty() || sse < threshold {
            self.queue_load(id, LoadPriority::Normal, distance, queue);
            if renderable {
                result.tiles_to_render.push(id);
            }
            return TraversalDetails::leaf(renderable, was_rendered);
        }

        if refine == Refine::Add {
            self.queue_load(id, LoadPriority::Normal, distance, queue);
            if renderable {
                result.tiles_to_render.push(id);
            }
        } else if self.options.preload_ancestors {
            self.queue_load(id, LoadPriority::Preload, distance, queue);
        }

        let render_start = result.tiles_to_render.len();
        let load_start = queue.len();
        let mut details = TraversalDetails::default();
        for child in children {
            details.combine(self.visit(child, views, result, queue));
        }

        if refine == Refine::Add {
            details.all_are_renderable &= renderable;
            details.not_yet_renderable_count += u32::from(!renderable);
            return details;
        }

        // Too many descendants still loading: load this tile first instead.
        let was_really_rendered = was_rendered && renderable;
        if !was_really_rendered && details.not_yet_renderable_count > self.options.loading_descendant_limit {
            queue.truncate(load_start);
            self.queue_load(id, LoadPriority::Urgent, distance, queue);
            details.not_yet_renderable_count = u32::from(!renderable);
        }

        let want_to_kick = !details.all_are_renderable && !details.any_were_rendered_last_frame;
        let hole = self.options.forbid_holes && !details.all_are_renderable;
        if want_to_kick || hole {
            result.tiles_to_render.truncate(render_start);
            if renderable {
                result.tiles_to_render.push(id);
            } else {
                self.queue_load(id, LoadPriority::Urgent, distance, queue);
            }
            details = TraversalDetails::leaf(renderable, was_rendered);
        }
        details
    }

    fn queue_load(&self, id: TileId, priority: LoadPriority, distance: f64, queue: &mut Vec<LoadRequest>) {
        if matches!(self.tiles[id.index()].state, ContentState::Unloaded) {
            queue.push(LoadRequest { id, priority, distance });
        }
    }

    fn dispatch_loads(&mut self, mut queue: Vec<LoadRequest>) {
        queue.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.distance.total_cmp(&b.distance)));
        let mut in_flight = self
            .tiles
            .iter()
            .filter(|t| matches!(t.state, ContentState::Loading(_)))
            .count();
        let limit = self.options.maximum_simultaneous_tile_loads as usize;
        for request in queue {
            if in_flight >= limit {
                break;
            }
            if matches!(self.tiles[request.id.index()].state, ContentState::Unloaded) {
                self.start_load(request.id);
                in_flight += 1;
            }
        }
    }

    fn start_load(&mut self, id: TileId) {
        let tile = &mut self.tiles[id.index()];
        let Some(uri) = tile.content_uri.clone() else {
            tile.state = ContentState::Empty;
            return;
        };
        let info = tile.info();
        let source = self.source.clone();
        let preparer = self.preparer.clone();
        debug!(tile = %id, uri = %uri, "Dispatching tile load");
        let task = Task::spawn(self.async_system.as_ref(), self.token.clone(), move || {
            load_tile_content(source.as_ref(), preparer.as_ref(), &info, &uri)
        });
        tile.state = ContentState::Loading(task);
    }

    fn process_worker_results(&mut self) {
        for i in 0..self.tiles.len() {
            let poll = match &self.tiles[i].state {
                ContentState::Loading(task) => task.poll(),
                _ => continue,
            };
            match poll {
                TaskPoll::Pending => {}
                TaskPoll::Cancelled => self.tiles[i].state = ContentState::Unloaded,
                TaskPoll::Ready(Ok(WorkerOutput::Content { result, byte_size })) => {
                    self.tiles[i].state = ContentState::Loaded { result, byte_size };
                }
                TaskPoll::Ready(Ok(WorkerOutput::External(json))) => {
                    let tile = &self.tiles[i];
                    let (id, transform, refine, depth) = (tile.id, tile.transform, tile.refine, tile.depth);
                    let base = tile.content_uri.as_deref().map(uri_directory);
                    let child = self.add_tile_tree(&json.root, Some(id), transform, refine, depth + 1, base.as_deref());
                    if let Some(child) = child {
                        self.tiles[i].children.push(child);
                    }
                    self.tiles[i].state = ContentState::Empty;
                    debug!(tile = %id, tiles = self.tiles.len(), "Expanded external tileset");
                }
                TaskPoll::Ready(Err(e)) => {
                    warn!(tile = i, uri = ?self.tiles[i].content_uri, error = %e, "Tile content failed to load");
                    self.tiles[i].state = ContentState::Failed;
                }
            }
        }
    }

    fn finalize_loaded_tiles(&mut self, ctx: &mut MainThreadContext<'_>) {
        let start = Instant::now();
        let limit_ms = self.options.main_thread_loading_time_limit;
        for i in 0..self.tiles.len() {
            if !matches!(self.tiles[i].state, ContentState::Loaded { .. }) {
                continue;
            }
            if limit_ms > 0.0 && start.elapsed().as_secs_f64() * 1000.0 >= limit_ms {
                debug!(limit_ms, "Main thread loading time limit reached");
                break;
            }
            let state = std::mem::replace(&mut self.tiles[i].state, ContentState::Unloaded);
            let ContentState::Loaded { result, byte_size } = state else {
                continue;
            };
            let info = self.tiles[i].info();
            let result = self.preparer.prepare_in_main_thread(ctx, &info, result);
            self.tiles[i].state = ContentState::Done { result, byte_size };
        }
    }

    /// Evicts least recently visited tiles until the cache fits its budget.
    /// Tiles used this frame are never evicted.
    fn unload_cached_tiles(&mut self, ctx: &mut MainThreadContext<'_>, rendered: &HashSet<TileId>) {
        let budget = self.options.maximum_cached_bytes as usize;
        let mut total = self.total_data_bytes();
        if total <= budget {
            return;
        }
        let mut candidates: Vec<(u64, usize)> = self
            .tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                matches!(t.state, ContentState::Loaded { .. } | ContentState::Done { .. })
                    && t.last_visited_frame < self.frame
                    && !rendered.contains(&t.id)
            })
            .map(|(i, t)| (t.last_visited_frame, i))
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (_, i) in candidates {
            if total <= budget {
                break;
            }
            total -= self.tiles[i].state.byte_size();
            self.unload_tile(ctx, i);
            evicted += 1;
        }
        debug!(evicted, total_bytes = total, budget, "Evicted cached tiles");
    }

    fn unload_tile(&mut self, ctx: &mut MainThreadContext<'_>, index: usize) {
        let tile = &mut self.tiles[index];
        let info = tile.info();
        let rasters: Vec<Option<RasterState<P>>> = tile.rasters.iter_mut().map(Option::take).collect();
        match std::mem::replace(&mut tile.state, ContentState::Unloaded) {
            ContentState::Done { mut result, .. } => {
                for (overlay_id, raster) in rasters.into_iter().enumerate() {
                    if let Some(RasterState::Attached(raster)) = raster {
                        self.preparer
                            .detach_raster_in_main_thread(ctx, &info, &mut result, overlay_id, &raster.result);
                        self.preparer.free_raster(ctx, overlay_id, raster.result);
                    }
                }
                self.preparer.free(ctx, &info, None, Some(result));
            }
            ContentState::Loaded { result, .. } => self.preparer.free(ctx, &info, Some(result), None),
            ContentState::Loading(_) | ContentState::Unloaded => {}
            kept @ (ContentState::Empty | ContentState::Failed) => tile.state = kept,
        }
    }

    /// Starts raster loads for finished tiles and attaches completed ones.
    fn update_rasters(&mut self, ctx: &mut MainThreadContext<'_>) {
        if self.overlays.is_empty() {
            return;
        }
        for tile in &mut self.tiles {
            let ContentState::Done { result, .. } = &mut tile.state else {
                continue;
            };
            let info = TileInfo {
                id: tile.id,
                geometric_error: tile.geometric_error,
                depth: tile.depth,
                content_uri: tile.content_uri.clone(),
                transform: tile.transform,
            };
            for (overlay_id, slot) in tile.rasters.iter_mut().enumerate() {
                match slot {
                    None => {
                        let source = self.overlays[overlay_id].source.clone();
                        let preparer = self.preparer.clone();
                        let job_info = info.clone();
                        let task = Task::spawn(self.async_system.as_ref(), self.token.clone(), move || {
                            load_raster(source.as_ref(), preparer.as_ref(), &job_info, overlay_id)
                        });
                        *slot = Some(RasterState::Loading(task));
                    }
                    Some(RasterState::Loading(task)) => match task.poll() {
                        TaskPoll::Pending => {}
                        TaskPoll::Ready(Some(loaded)) => {
                            let main = self.preparer.prepare_raster_in_main_thread(ctx, overlay_id, loaded.result);
                            self.preparer.attach_raster_in_main_thread(
                                ctx,
                                &info,
                                result,
                                overlay_id,
                                &main,
                                DVec2::from_array(loaded.translation),
                                DVec2::from_array(loaded.scale),
                            );
                            *slot = Some(RasterState::Attached(LoadedRaster {
                                result: main,
                                translation: loaded.translation,
                                scale: loaded.scale,
                            }));
                        }
                        TaskPoll::Ready(None) | TaskPoll::Cancelled => *slot = Some(RasterState::Missing),
                    },
                    Some(RasterState::Attached(_) | RasterState::Missing) => {}
                }
            }
        }
    }

    /// Cancels outstanding work and frees every loaded tile. Background
    /// jobs already running finish, but their results are dropped.
    pub fn destroy(&mut self, ctx: &mut MainThreadContext<'_>) {
        self.token.cancel();
        for i in 0..self.tiles.len() {
            self.unload_tile(ctx, i);
        }
        self.previous_render.clear();
        debug!(source = %self.source.describe(), "Tileset destroyed");
    }
}

/// Worker-thread body of a tile load.
fn load_tile_content<P: PrepareRendererResources>(
    source: &dyn TileSource,
    preparer: &P,
    info: &TileInfo,
    uri: &str,
) -> Result<WorkerOutput<P::LoadThreadResult>> {
    let bytes = source.load_content(uri)?;
    if is_external_tileset(uri) {
        return Ok(WorkerOutput::External(serde_json::from_slice(&bytes)?));
    }
    let model = decode_tile_content(&bytes)?;
    let byte_size = model.byte_size();
    let rtc = model
        .rtc_center
        .map_or(DMat4::IDENTITY, |c| DMat4::from_translation(DVec3::from_array(c)));
    let transform = info.transform * rtc * y_up_to_z_up();
    Ok(WorkerOutput::Content {
        result: preparer.prepare_in_load_thread(info, model, transform),
        byte_size,
    })
}

fn load_raster<P: PrepareRendererResources>(
    source: &dyn RasterOverlaySource,
    preparer: &P,
    info: &TileInfo,
    overlay_id: usize,
) -> Option<LoadedRaster<P::RasterLoadThreadResult>> {
    match source.fetch_image(info) {
        Ok(Some(image)) => Some(LoadedRaster {
            result: preparer.prepare_raster_in_load_thread(overlay_id, image.bytes),
            translation: image.translation,
            scale: image.scale,
        }),
        Ok(None) => None,
        Err(e) => {
            warn!(tile = %info.id, overlay = overlay_id, error = %e, "Raster overlay failed to load");
            None
        }
    }
}

/// Directory part of a content URI, with trailing slash.
fn uri_directory(uri: &str) -> String {
    match uri.rfind('/') {
        Some(i) => uri[..=i].to_string(),
        None => String::new(),
    }
}

fn resolve_uri(base: Option<&str>, uri: &str) -> String {
    match base {
        Some(base) if !uri.contains("://") && !uri.starts_with('/') => format!("{base}{uri}"),
        _ => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::ResourceConfig;
    use crate::render::ResourceManager;
    use crate::scene::MemoryStage;
    use crate::streaming::decode::tests::triangle_glb;
    use crate::streaming::source::{MemoryRasterSource, MemoryTileSource, TilesetJson};
    use crate::streaming::task::{DeferredAsyncSystem, InlineAsyncSystem};
    use crate::streaming::view::tests::look_at_viewport;
    use crate::types::TileModel;

    #[derive(Default)]
    struct Counting {
        load: AtomicUsize,
        main: AtomicUsize,
        freed: AtomicUsize,
        rasters_attached: AtomicUsize,
        rasters_freed: AtomicUsize,
    }

    impl PrepareRendererResources for Counting {
        type LoadThreadResult = usize;
        type MainThreadResult = usize;
        type RasterLoadThreadResult = usize;
        type RasterMainThreadResult = usize;

        fn prepare_in_load_thread(&self, _tile: &TileInfo, model: TileModel, _transform: DMat4) -> usize {
            self.load.fetch_add(1, Ordering::SeqCst);
            model.primitives.len()
        }

        fn prepare_in_main_thread(&self, _ctx: &mut MainThreadContext<'_>, _tile: &TileInfo, load: usize) -> usize {
            self.main.fetch_add(1, Ordering::SeqCst);
            load
        }

        fn free(&self, _ctx: &mut MainThreadContext<'_>, _tile: &TileInfo, _load: Option<usize>, _main: Option<usize>) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }

        fn prepare_raster_in_load_thread(&self, _overlay_id: usize, bytes: Vec<u8>) -> usize {
            bytes.len()
        }

        fn prepare_raster_in_main_thread(&self, _ctx: &mut MainThreadContext<'_>, _overlay_id: usize, load: usize) -> usize {
            load
        }

        fn free_raster(&self, _ctx: &mut MainThreadContext<'_>, _overlay_id: usize, _main: usize) {
            self.rasters_freed.fetch_add(1, Ordering::SeqCst);
        }

        fn attach_raster_in_main_thread(
            &self,
            _ctx: &mut MainThreadContext<'_>,
            _tile: &TileInfo,
            _tile_result: &mut usize,
            _overlay_id: usize,
            _raster: &usize,
            _translation: DVec2,
            _scale: DVec2,
        ) {
            self.rasters_attached.fetch_add(1, Ordering::SeqCst);
        }

        fn detach_raster_in_main_thread(
            &self,
            _ctx: &mut MainThreadContext<'_>,
            _tile: &TileInfo,
            _tile_result: &mut usize,
            _overlay_id: usize,
            _raster: &usize,
        ) {
        }
    }

    fn tileset_json() -> TilesetJson {
        serde_json::from_value(serde_json::json!({
            "asset": {"version": "1.1"},
            "geometricError": 200,
            "root": {
                "boundingVolume": {"sphere": [0, 0, 0, 100]},
                "geometricError": 100,
                "refine": "REPLACE",
                "content": {"uri": "root.glb"},
                "children": [
                    {"boundingVolume": {"sphere": [-50, 0, 0, 50]}, "geometricError": 0, "content": {"uri": "a.glb"}},
                    {"boundingVolume": {"sphere": [50, 0, 0, 50]}, "geometricError": 0, "content": {"uri": "b.glb"}},
                    {"boundingVolume": {"box": [1, 2]}, "geometricError": 0}
                ]
            }
        }))
        .unwrap()
    }

    fn source() -> Arc<MemoryTileSource> {
        Arc::new(
            MemoryTileSource::new(tileset_json())
                .with_content("root.glb", triangle_glb())
                .with_content("a.glb", triangle_glb())
                .with_content("b.glb", triangle_glb()),
        )
    }

    fn options() -> TilesetOptions {
        TilesetOptions {
            enable_fog_culling: false,
            ..Default::default()
        }
    }

    fn near_view() -> ViewState {
        ViewState::from_viewport(
            &look_at_viewport(DVec3::new(0.0, -500.0, 0.0), DVec3::ZERO, 1080.0),
            DMat4::IDENTITY,
        )
    }

    fn away_view() -> ViewState {
        ViewState::from_viewport(
            &look_at_viewport(DVec3::new(0.0, -500.0, 0.0), DVec3::new(0.0, -1000.0, 0.0), 1080.0),
            DMat4::IDENTITY,
        )
    }

    struct Harness {
        stage: MemoryStage,
        resources: ResourceManager,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                stage: MemoryStage::new(1),
                resources: ResourceManager::new(1, ResourceConfig::default()),
            }
        }

        fn ctx(&mut self) -> MainThreadContext<'_> {
            MainThreadContext {
                stage: &mut self.stage,
                resources: &mut self.resources,
                ecef_to_usd: DMat4::IDENTITY,
                display_color: [1.0; 3],
                display_opacity: 1.0,
                imagery_alphas: &[],
            }
        }
    }

    #[test]
    fn invalid_children_are_dropped() {
        let preparer = Arc::new(Counting::default());
        let tileset = Tileset::new(source(), preparer, Arc::new(InlineAsyncSystem), options(), Vec::new()).unwrap();
        assert_eq!(tileset.tile_count(), 3);
        assert_eq!(tileset.parent(TileId::from_index(1)), Some(tileset.root()));
    }

    #[test]
    fn refines_to_children_once_loaded() {
        let preparer = Arc::new(Counting::default());
        let mut tileset =
            Tileset::new(source(), preparer.clone(), Arc::new(InlineAsyncSystem), options(), Vec::new()).unwrap();
        let mut h = Harness::new();
        let views = [near_view()];

        let first = tileset.update_view(&mut h.ctx(), &views);
        assert!(first.tiles_to_render.is_empty());
        assert_eq!(first.tiles_visited, 3);
        assert_eq!(first.worker_thread_tile_load_queue_length, 3);
        assert_eq!(preparer.load.load(Ordering::SeqCst), 3);

        let second = tileset.update_view(&mut h.ctx(), &views);
        assert_eq!(preparer.main.load(Ordering::SeqCst), 3);
        assert_eq!(second.tiles_to_render, vec![TileId::from_index(1), TileId::from_index(2)]);
        assert_eq!(second.max_depth_visited, 1);
        assert_eq!(tileset.number_of_tiles_loaded(), 3);
        assert!(tileset.total_data_bytes() > 0);
    }

    #[test]
    fn load_concurrency_is_bounded() {
        let preparer = Arc::new(Counting::default());
        let async_system = Arc::new(DeferredAsyncSystem::new());
        let opts = TilesetOptions {
            maximum_simultaneous_tile_loads: 1,
            ..options()
        };
        let mut tileset = Tileset::new(source(), preparer, async_system.clone(), opts, Vec::new()).unwrap();
        let mut h = Harness::new();
        let result = tileset.update_view(&mut h.ctx(), &[near_view()]);
        assert_eq!(result.worker_thread_tile_load_queue_length, 1);
        assert_eq!(async_system.pending_count(), 1);
    }

    #[test]
    fn suspended_update_reuses_last_result() {
        let preparer = Arc::new(Counting::default());
        let mut tileset =
            Tileset::new(source(), preparer, Arc::new(InlineAsyncSystem), options(), Vec::new()).unwrap();
        let mut h = Harness::new();
        tileset.update_view(&mut h.ctx(), &[near_view()]);
        let second = tileset.update_view(&mut h.ctx(), &[near_view()]);

        let mut suspended = tileset.options().clone();
        suspended.suspend_update = true;
        tileset.set_options(suspended);
        let frozen = tileset.update_view(&mut h.ctx(), &[away_view()]);
        assert_eq!(frozen, second);
    }

    #[test]
    fn culled_tiles_are_evicted_over_budget() {
        let preparer = Arc::new(Counting::default());
        let opts = TilesetOptions {
            maximum_cached_bytes: 0,
            preload_siblings: false,
            enforce_culled_screen_space_error: false,
            ..options()
        };
        let mut tileset =
            Tileset::new(source(), preparer.clone(), Arc::new(InlineAsyncSystem), opts, Vec::new()).unwrap();
        let mut h = Harness::new();
        tileset.update_view(&mut h.ctx(), &[near_view()]);
        tileset.update_view(&mut h.ctx(), &[near_view()]);
        assert_eq!(tileset.number_of_tiles_loaded(), 3);

        let away = tileset.update_view(&mut h.ctx(), &[away_view()]);
        assert!(away.tiles_to_render.is_empty());
        assert_eq!(away.tiles_culled, 1);
        assert_eq!(away.tiles_fading_out.len(), 2);
        assert_eq!(tileset.number_of_tiles_loaded(), 0);
        assert_eq!(preparer.freed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn destroy_discards_in_flight_loads() {
        let preparer = Arc::new(Counting::default());
        let async_system = Arc::new(DeferredAsyncSystem::new());
        let mut tileset =
            Tileset::new(source(), preparer.clone(), async_system.clone(), options(), Vec::new()).unwrap();
        let mut h = Harness::new();
        tileset.update_view(&mut h.ctx(), &[near_view()]);
        tileset.destroy(&mut h.ctx());

        assert_eq!(async_system.run_pending(), 3);
        assert_eq!(preparer.load.load(Ordering::SeqCst), 3);
        assert_eq!(preparer.main.load(Ordering::SeqCst), 0);
        assert_eq!(h.stage.mutation_count(), 0);
    }

    #[test]
    fn missing_content_fails_only_that_tile() {
        let preparer = Arc::new(Counting::default());
        let partial = Arc::new(
            MemoryTileSource::new(tileset_json())
                .with_content("root.glb", triangle_glb())
                .with_content("a.glb", triangle_glb()),
        );
        let mut tileset =
            Tileset::new(partial, preparer, Arc::new(InlineAsyncSystem), options(), Vec::new()).unwrap();
        let mut h = Harness::new();
        tileset.update_view(&mut h.ctx(), &[near_view()]);
        let result = tileset.update_view(&mut h.ctx(), &[near_view()]);
        // The failed sibling counts as renderable, so the parent still refines.
        assert_eq!(result.tiles_to_render, vec![TileId::from_index(1), TileId::from_index(2)]);
        assert!(tileset.render_resources_mut(TileId::from_index(2)).is_none());
        assert_eq!(tileset.number_of_tiles_loaded(), 2);
    }

    #[test]
    fn external_tilesets_are_grafted() {
        let outer: TilesetJson = serde_json::from_value(serde_json::json!({
            "asset": {"version": "1.0"},
            "root": {
                "boundingVolume": {"sphere": [0, 0, 0, 100]},
                "geometricError": 100,
                "content": {"uri": "sub/tileset.json"}
            }
        }))
        .unwrap();
        let inner = serde_json::json!({
            "asset": {"version": "1.0"},
            "root": {
                "boundingVolume": {"sphere": [0, 0, 0, 100]},
                "geometricError": 0,
                "content": {"uri": "leaf.glb"}
            }
        });
        let source = Arc::new(
            MemoryTileSource::new(outer)
                .with_content("sub/tileset.json", serde_json::to_vec(&inner).unwrap())
                .with_content("sub/leaf.glb", triangle_glb()),
        );
        let preparer = Arc::new(Counting::default());
        let mut tileset = Tileset::new(source, preparer, Arc::new(InlineAsyncSystem), options(), Vec::new()).unwrap();
        let mut h = Harness::new();
        for _ in 0..4 {
            tileset.update_view(&mut h.ctx(), &[near_view()]);
        }
        assert_eq!(tileset.tile_count(), 2);
        let leaf = tileset.tile_info(TileId::from_index(1)).unwrap();
        assert_eq!(leaf.content_uri.as_deref(), Some("sub/leaf.glb"));
        assert_eq!(tileset.number_of_tiles_loaded(), 1);
    }

    #[test]
    fn rasters_attach_to_loaded_tiles() {
        let preparer = Arc::new(Counting::default());
        let overlay = RasterOverlay {
            name: "imagery".into(),
            source: Arc::new(MemoryRasterSource::new(vec![1, 2, 3])),
        };
        let mut tileset =
            Tileset::new(source(), preparer.clone(), Arc::new(InlineAsyncSystem), options(), vec![overlay]).unwrap();
        let mut h = Harness::new();
        for _ in 0..3 {
            tileset.update_view(&mut h.ctx(), &[near_view()]);
        }
        assert_eq!(preparer.rasters_attached.load(Ordering::SeqCst), 3);

        tileset.destroy(&mut h.ctx());
        assert_eq!(preparer.rasters_freed.load(Ordering::SeqCst), 3);
        assert_eq!(preparer.freed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn uri_helpers() {
        assert_eq!(uri_directory("a/b/tileset.json"), "a/b/");
        assert_eq!(uri_directory("tileset.json"), "");
        assert_eq!(resolve_uri(Some("a/"), "x.glb"), "a/x.glb");
        assert_eq!(resolve_uri(Some("a/"), "https://h/x.glb"), "https://h/x.glb");
        assert_eq!(resolve_uri(None, "x.glb"), "x.glb");
    }
}
