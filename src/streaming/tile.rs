use std::fmt;

use glam::DMat4;
use serde::Serialize;

use super::prepare::PrepareRendererResources;
use super::source::{Refine, TilesetJson};
use super::task::Task;
use crate::error::Result;
use crate::types::BoundingSphere;

/// Index of a tile within its tileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TileId(u32);

impl TileId {
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the renderer is told about a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileInfo {
    pub id: TileId,
    pub geometric_error: f64,
    pub depth: u32,
    pub content_uri: Option<String>,
    /// Tile-to-ECEF transform.
    pub transform: DMat4,
}

/// What a worker produced for a tile.
pub(crate) enum WorkerOutput<L> {
    Content { result: L, byte_size: usize },
    External(TilesetJson),
}

pub(crate) enum ContentState<P: PrepareRendererResources> {
    Unloaded,
    Loading(Task<Result<WorkerOutput<P::LoadThreadResult>>>),
    /// Waiting for its main-thread phase.
    Loaded { result: P::LoadThreadResult, byte_size: usize },
    Done { result: P::MainThreadResult, byte_size: usize },
    /// No content, or content that expanded into child tiles.
    Empty,
    Failed,
}

impl<P: PrepareRendererResources> ContentState<P> {
    pub(crate) fn is_renderable(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Empty | Self::Failed)
    }

    pub(crate) fn byte_size(&self) -> usize {
        match self {
            Self::Loaded { byte_size, .. } | Self::Done { byte_size, .. } => *byte_size,
            _ => 0,
        }
    }
}

pub(crate) enum RasterState<P: PrepareRendererResources> {
    Loading(Task<Option<LoadedRaster<P::RasterLoadThreadResult>>>),
    Attached(LoadedRaster<P::RasterMainThreadResult>),
    /// The overlay had nothing for this tile.
    Missing,
}

pub(crate) struct LoadedRaster<R> {
    pub(crate) result: R,
    pub(crate) translation: [f64; 2],
    pub(crate) scale: [f64; 2],
}

pub(crate) struct Tile<P: PrepareRendererResources> {
    pub(crate) id: TileId,
    pub(crate) parent: Option<TileId>,
    pub(crate) children: Vec<TileId>,
    pub(crate) bounding_sphere: BoundingSphere,
    pub(crate) geometric_error: f64,
    pub(crate) refine: Refine,
    pub(crate) transform: DMat4,
    pub(crate) content_uri: Option<String>,
    pub(crate) depth: u32,
    pub(crate) state: ContentState<P>,
    pub(crate) last_visited_frame: u64,
    /// One slot per raster overlay, filled once the content is done.
    pub(crate) rasters: Vec<Option<RasterState<P>>>,
}

impl<P: PrepareRendererResources> Tile<P> {
    pub(crate) fn info(&self) -> TileInfo {
        TileInfo {
            id: self.id,
            geometric_error: self.geometric_error,
            depth: self.depth,
            content_uri: self.content_uri.clone(),
            transform: self.transform,
        }
    }

    pub(crate) fn is_renderable(&self) -> bool {
        self.state.is_renderable()
    }
}
