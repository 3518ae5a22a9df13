use glam::{DMat4, DVec2};

use super::tile::TileInfo;
use crate::render::MainThreadContext;
use crate::types::TileModel;

/// Two-phase conversion of tile content into renderer resources.
///
/// The `*_load_thread` methods run on worker threads and must not touch
/// the scene. Everything taking a [`MainThreadContext`] runs on the thread
/// that owns the scene, and only for tiles whose tileset is still alive.
pub trait PrepareRendererResources: Send + Sync + 'static {
    type LoadThreadResult: Send + 'static;
    type MainThreadResult;
    type RasterLoadThreadResult: Send + 'static;
    type RasterMainThreadResult;

    /// `transform` maps decoded model space to ECEF.
    fn prepare_in_load_thread(&self, tile: &TileInfo, model: TileModel, transform: DMat4) -> Self::LoadThreadResult;

    fn prepare_in_main_thread(
        &self,
        ctx: &mut MainThreadContext<'_>,
        tile: &TileInfo,
        load_result: Self::LoadThreadResult,
    ) -> Self::MainThreadResult;

    /// Releases whatever phase results exist for a tile. Either may be
    /// absent, e.g. when a tile is evicted between the two phases.
    fn free(
        &self,
        ctx: &mut MainThreadContext<'_>,
        tile: &TileInfo,
        load_result: Option<Self::LoadThreadResult>,
        main_result: Option<Self::MainThreadResult>,
    );

    fn prepare_raster_in_load_thread(&self, overlay_id: usize, bytes: Vec<u8>) -> Self::RasterLoadThreadResult;

    fn prepare_raster_in_main_thread(
        &self,
        ctx: &mut MainThreadContext<'_>,
        overlay_id: usize,
        load_result: Self::RasterLoadThreadResult,
    ) -> Self::RasterMainThreadResult;

    fn free_raster(&self, ctx: &mut MainThreadContext<'_>, overlay_id: usize, main_result: Self::RasterMainThreadResult);

    /// Drapes a raster over a rendered tile. `translation` and `scale` place
    /// the raster within the overlay texcoord set `overlay_id`.
    #[allow(clippy::too_many_arguments)]
    fn attach_raster_in_main_thread(
        &self,
        ctx: &mut MainThreadContext<'_>,
        tile: &TileInfo,
        tile_result: &mut Self::MainThreadResult,
        overlay_id: usize,
        raster: &Self::RasterMainThreadResult,
        translation: DVec2,
        scale: DVec2,
    );

    fn detach_raster_in_main_thread(
        &self,
        ctx: &mut MainThreadContext<'_>,
        tile: &TileInfo,
        tile_result: &mut Self::MainThreadResult,
        overlay_id: usize,
        raster: &Self::RasterMainThreadResult,
    );
}
