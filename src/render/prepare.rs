//! The renderer side of the two-phase tile loading protocol.

use glam::{DMat4, DVec2};
use tracing::{debug, warn};

use super::extract::{prepare_primitive, ExtractOptions, PreparedMesh};
use super::{random_color, GeometryHandle, MainThreadContext, MaterialHandle, ResourceManager, TextureHandle};
use crate::scene::{SceneHost, ScenePath};
use crate::streaming::{PrepareRendererResources, TileInfo};
use crate::types::{ImageData, MaterialInfo, TileModel};

/// Per-tileset switches fixed for the lifetime of a preparer.
#[derive(Debug, Clone, Default)]
pub struct RendererOptions {
    pub tileset_id: i64,
    pub smooth_normals: bool,
    pub imagery_layer_count: usize,
    pub disable_materials: bool,
    pub disable_textures: bool,
    pub random_colors: bool,
    /// User material whose shaders every tile material copies.
    pub tileset_material_path: Option<ScenePath>,
}

/// Worker-thread output for one tile.
#[derive(Debug, Default)]
pub struct TileLoadResult {
    pub meshes: Vec<PreparedMesh>,
    pub skipped_primitives: usize,
}

/// Pooled objects backing one mesh of a tile.
#[derive(Debug, Clone)]
pub struct MeshEntry {
    pub mesh_index: usize,
    pub geometry: GeometryHandle,
    pub material: Option<MaterialHandle>,
    pub base_color_texture: Option<TextureHandle>,
    pub material_info: MaterialInfo,
    pub triangle_count: usize,
    /// Debug color that overrides the tileset display color.
    pub random_color: Option<[f32; 3]>,
    pub last_selected_frame: Option<u64>,
}

/// Main-thread output for one tile, retained by the tile until freed.
#[derive(Debug, Clone, Default)]
pub struct TileRenderResources {
    pub tile_id: i64,
    pub tile_transform: DMat4,
    pub meshes: Vec<MeshEntry>,
}

impl TileRenderResources {
    pub fn set_visibility(&mut self, resources: &mut ResourceManager, stage: &mut dyn SceneHost, visible: bool) {
        for entry in &self.meshes {
            resources.with_geometry(stage, entry.geometry, |g, s| g.set_visibility(s, visible));
        }
    }

    pub fn mark_selected(&mut self, frame: u64) {
        for entry in &mut self.meshes {
            entry.last_selected_frame = Some(frame);
        }
    }

    pub fn set_world_transform(&mut self, resources: &mut ResourceManager, stage: &mut dyn SceneHost, ecef_to_usd: DMat4) {
        for entry in &self.meshes {
            resources.with_geometry(stage, entry.geometry, |g, s| g.set_world_transform(s, ecef_to_usd));
        }
    }

    pub fn set_display_color_and_opacity(
        &mut self,
        resources: &mut ResourceManager,
        stage: &mut dyn SceneHost,
        color: [f32; 3],
        opacity: f32,
    ) {
        for entry in &self.meshes {
            let color = entry.random_color.unwrap_or(color);
            resources.with_geometry(stage, entry.geometry, |g, s| {
                g.set_display_color_and_opacity(s, color, opacity)
            });
        }
    }

    pub fn set_imagery_alpha(&mut self, resources: &mut ResourceManager, stage: &mut dyn SceneHost, index: usize, alpha: f32) {
        for material in self.meshes.iter().filter_map(|e| e.material) {
            resources.with_material(stage, material, |m, s| m.set_imagery_alpha(s, index, alpha));
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(|e| e.triangle_count).sum()
    }
}

/// Turns decoded tiles into pooled scene objects for one tileset.
///
/// Holds no mutable state, so the same instance serves every worker
/// thread.
#[derive(Debug, Clone)]
pub struct RenderResourcePreparer {
    options: RendererOptions,
}

impl RenderResourcePreparer {
    pub fn new(options: RendererOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RendererOptions {
        &self.options
    }

    fn extract_options(&self, tile: &TileInfo) -> ExtractOptions {
        ExtractOptions {
            smooth_normals: self.options.smooth_normals,
            imagery_layer_count: self.options.imagery_layer_count,
            disable_textures: self.options.disable_textures,
            geometric_error: tile.geometric_error,
        }
    }

    fn create_mesh(&self, ctx: &mut MainThreadContext<'_>, tile_id: i64, mesh: &PreparedMesh) -> Option<MeshEntry> {
        let tileset_id = self.options.tileset_id;
        let geometry = ctx.resources.acquire_geometry(ctx.stage, mesh.geometry_definition())?;

        let random = self
            .options
            .random_colors
            .then(|| random_color(tileset_id, tile_id, mesh.mesh_index));
        let color = random.unwrap_or(ctx.display_color);
        let (ecef_to_usd, opacity) = (ctx.ecef_to_usd, ctx.display_opacity);
        ctx.resources.with_geometry(ctx.stage, geometry, |g, s| {
            g.set_geometry(s, tileset_id, tile_id, mesh, ecef_to_usd, color, opacity)
        });

        let mut entry = MeshEntry {
            mesh_index: mesh.mesh_index,
            geometry,
            material: None,
            base_color_texture: None,
            material_info: mesh.material.clone(),
            triangle_count: mesh.triangle_count(),
            random_color: random,
            last_selected_frame: None,
        };
        if self.options.disable_materials {
            return Some(entry);
        }

        let mut texture_asset = None;
        if let Some(image) = &mesh.base_color_image {
            if let Some(texture) = ctx.resources.acquire_texture(ctx.stage) {
                ctx.resources.with_texture(ctx.stage, texture, |t, s| t.set_image(s, image));
                texture_asset = ctx.resources.texture(texture).map(|t| t.asset_path().to_string());
                entry.base_color_texture = Some(texture);
            }
        }

        let definition = mesh.material_definition(self.options.tileset_material_path.as_ref());
        let Some(material) = ctx.resources.acquire_material(ctx.stage, &definition) else {
            return Some(entry);
        };
        ctx.resources.with_material(ctx.stage, material, |m, s| {
            m.set_material(s, tileset_id, tile_id, &mesh.material, texture_asset.as_deref())
        });
        if let Some(material_path) = ctx.resources.material(material).map(|m| m.path().clone()) {
            ctx.resources
                .with_geometry(ctx.stage, geometry, |g, s| g.set_material(s, &material_path));
        }
        entry.material = Some(material);
        Some(entry)
    }

    fn release_entry(ctx: &mut MainThreadContext<'_>, entry: &MeshEntry) {
        if let Some(texture) = entry.base_color_texture {
            ctx.resources.release_texture(ctx.stage, texture);
        }
        if let Some(material) = entry.material {
            ctx.resources.release_material(ctx.stage, material);
        }
        ctx.resources.release_geometry(ctx.stage, entry.geometry);
    }
}

impl PrepareRendererResources for RenderResourcePreparer {
    type LoadThreadResult = TileLoadResult;
    type MainThreadResult = TileRenderResources;
    type RasterLoadThreadResult = Option<ImageData>;
    type RasterMainThreadResult = Option<TextureHandle>;

    fn prepare_in_load_thread(&self, tile: &TileInfo, model: TileModel, transform: DMat4) -> TileLoadResult {
        let options = self.extract_options(tile);
        let mut result = TileLoadResult::default();
        for (i, primitive) in model.primitives.iter().enumerate() {
            match prepare_primitive(primitive, &model, transform, &options, i) {
                Ok(mesh) if mesh.points.is_empty() || mesh.face_vertex_indices.is_empty() => {
                    result.skipped_primitives += 1;
                }
                Ok(mesh) => result.meshes.push(mesh),
                Err(e) => {
                    warn!(tile = %tile.id, primitive = i, error = %e, "Skipping primitive");
                    result.skipped_primitives += 1;
                }
            }
        }
        result
    }

    fn prepare_in_main_thread(
        &self,
        ctx: &mut MainThreadContext<'_>,
        tile: &TileInfo,
        load_result: TileLoadResult,
    ) -> TileRenderResources {
        let tile_id = tile.id.as_i64();
        let mut resources = TileRenderResources {
            tile_id,
            tile_transform: tile.transform,
            meshes: Vec::with_capacity(load_result.meshes.len()),
        };
        for mesh in &load_result.meshes {
            if let Some(entry) = self.create_mesh(ctx, tile_id, mesh) {
                resources.meshes.push(entry);
            }
        }
        debug!(
            tileset = self.options.tileset_id,
            tile = %tile.id,
            meshes = resources.meshes.len(),
            triangles = resources.triangle_count(),
            "Tile render resources created"
        );
        resources
    }

    fn free(
        &self,
        ctx: &mut MainThreadContext<'_>,
        _tile: &TileInfo,
        _load_result: Option<TileLoadResult>,
        main_result: Option<TileRenderResources>,
    ) {
        let Some(resources) = main_result else {
            return;
        };
        for entry in &resources.meshes {
            Self::release_entry(ctx, entry);
        }
    }

    fn prepare_raster_in_load_thread(&self, overlay_id: usize, bytes: Vec<u8>) -> Option<ImageData> {
        if self.options.disable_textures {
            return None;
        }
        match image::load_from_memory(&bytes) {
            Ok(img) => Some(ImageData::from(img.to_rgba8())),
            Err(e) => {
                warn!(overlay = overlay_id, error = %e, "Failed to decode raster image");
                None
            }
        }
    }

    fn prepare_raster_in_main_thread(
        &self,
        ctx: &mut MainThreadContext<'_>,
        _overlay_id: usize,
        load_result: Option<ImageData>,
    ) -> Option<TextureHandle> {
        let image = load_result?;
        let texture = ctx.resources.acquire_texture(ctx.stage)?;
        ctx.resources.with_texture(ctx.stage, texture, |t, s| t.set_image(s, &image));
        Some(texture)
    }

    fn free_raster(&self, ctx: &mut MainThreadContext<'_>, _overlay_id: usize, main_result: Option<TextureHandle>) {
        if let Some(texture) = main_result {
            ctx.resources.release_texture(ctx.stage, texture);
        }
    }

    fn attach_raster_in_main_thread(
        &self,
        ctx: &mut MainThreadContext<'_>,
        _tile: &TileInfo,
        tile_result: &mut TileRenderResources,
        overlay_id: usize,
        raster: &Option<TextureHandle>,
        translation: DVec2,
        scale: DVec2,
    ) {
        let Some(asset) = raster.and_then(|t| ctx.resources.texture(t)).map(|t| t.asset_path().to_string()) else {
            return;
        };
        let alpha = ctx.imagery_alphas.get(overlay_id).copied().unwrap_or(1.0);
        let translation = translation.as_vec2().to_array();
        let scale = scale.as_vec2().to_array();
        for material in tile_result.meshes.iter().filter_map(|e| e.material) {
            ctx.resources.with_material(ctx.stage, material, |m, s| {
                m.set_imagery_layer(s, overlay_id, Some(&asset));
                m.set_imagery_transform(s, overlay_id, translation, scale);
                m.set_imagery_alpha(s, overlay_id, alpha);
            });
        }
    }

    fn detach_raster_in_main_thread(
        &self,
        ctx: &mut MainThreadContext<'_>,
        _tile: &TileInfo,
        tile_result: &mut TileRenderResources,
        overlay_id: usize,
        _raster: &Option<TextureHandle>,
    ) {
        for material in tile_result.meshes.iter().filter_map(|e| e.material) {
            ctx.resources
                .with_material(ctx.stage, material, |m, s| m.set_imagery_layer(s, overlay_id, None));
        }
    }
}
