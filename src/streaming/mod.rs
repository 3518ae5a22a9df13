//! Tileset streaming: tile sources, view-dependent selection and background
//! loading, handing results to a [`PrepareRendererResources`] implementation.

pub mod decode;
pub mod prepare;
pub mod source;
pub mod task;
pub mod tile;
pub mod tileset;
pub mod view;

pub use prepare::PrepareRendererResources;
pub use source::{
    FileRasterSource, FileSourceFactory, FileTileSource, ImagerySource, MemoryRasterSource, MemorySourceFactory,
    MemoryTileSource, RasterImage, RasterOverlaySource, SourceFactory, TileSource, TilesetJson, TilesetSource,
};
pub use task::{AsyncSystem, CancellationToken, DeferredAsyncSystem, InlineAsyncSystem, RayonAsyncSystem, Task, TaskPoll};
pub use tile::{TileId, TileInfo};
pub use tileset::{RasterOverlay, Tileset, ViewUpdateResult};
pub use view::{ViewState, Viewport};
