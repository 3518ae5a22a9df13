//! Where tileset descriptions, tile content and raster imagery come from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tile::TileInfo;
use crate::error::{Result, StreamError};

/// Root `tileset.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetJson {
    pub asset: AssetJson,
    #[serde(default)]
    pub geometric_error: f64,
    pub root: TileJson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetJson {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tileset_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Refine {
    #[serde(rename = "ADD", alias = "add")]
    Add,
    #[serde(rename = "REPLACE", alias = "replace")]
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileJson {
    pub bounding_volume: BoundingVolumeJson,
    #[serde(default)]
    pub geometric_error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refine: Option<Refine>,
    /// Column-major 4x4 tile-to-parent transform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TileJson>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolumeJson {
    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sphere: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Pre-1.0 spelling of `uri`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ContentJson {
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref().or(self.url.as_deref())
    }
}

/// Whether a content URI points at a nested tileset rather than renderable
/// content.
pub fn is_external_tileset(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.ends_with(".json")
}

/// Supplies a tileset description and its tile content. Implementations
/// are called from worker threads.
pub trait TileSource: Send + Sync {
    /// Human readable origin, for logs.
    fn describe(&self) -> String;
    fn load_tileset_json(&self) -> Result<TilesetJson>;
    /// Raw content bytes of `uri`, resolved against the tileset root.
    fn load_content(&self, uri: &str) -> Result<Vec<u8>>;
}

/// Encoded imagery for one geometry tile, with its placement inside the
/// overlay texcoord set.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pub bytes: Vec<u8>,
    pub translation: [f64; 2],
    pub scale: [f64; 2],
}

/// Supplies raster imagery draped over geometry tiles.
pub trait RasterOverlaySource: Send + Sync {
    fn describe(&self) -> String;
    /// `Ok(None)` means the overlay has nothing for this tile.
    fn fetch_image(&self, tile: &TileInfo) -> Result<Option<RasterImage>>;
}

/// How a tileset is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TilesetSource {
    Url(String),
    Ion {
        asset_id: i64,
        access_token: String,
        api_url: Option<String>,
    },
}

/// How an imagery layer is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagerySource {
    Url(String),
    Ion {
        asset_id: i64,
        access_token: String,
        api_url: Option<String>,
    },
}

/// Resolves source descriptors into live sources.
pub trait SourceFactory: Send + Sync {
    fn tileset_source(&self, source: &TilesetSource) -> Result<Arc<dyn TileSource>>;
    fn imagery_source(&self, source: &ImagerySource) -> Result<Arc<dyn RasterOverlaySource>>;
}

/// Reads tilesets and imagery from the local file system. Ion assets are
/// unreachable from here.
#[derive(Debug, Clone, Default)]
pub struct FileSourceFactory {
    base_dir: Option<PathBuf>,
}

impl FileSourceFactory {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(StreamError::Source(format!("network URL {url} is not reachable from a file source")));
        }
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        })
    }
}

impl SourceFactory for FileSourceFactory {
    fn tileset_source(&self, source: &TilesetSource) -> Result<Arc<dyn TileSource>> {
        match source {
            TilesetSource::Url(url) => Ok(Arc::new(FileTileSource::new(self.resolve(url)?)?)),
            TilesetSource::Ion { asset_id, .. } => Err(StreamError::Source(format!(
                "ion asset {asset_id} cannot be streamed from the file system"
            ))),
        }
    }

    fn imagery_source(&self, source: &ImagerySource) -> Result<Arc<dyn RasterOverlaySource>> {
        match source {
            ImagerySource::Url(url) => Ok(Arc::new(FileRasterSource::new(&self.resolve(url)?)?)),
            ImagerySource::Ion { asset_id, .. } => Err(StreamError::Source(format!(
                "ion imagery {asset_id} cannot be streamed from the file system"
            ))),
        }
    }
}

/// A tileset on disk. `path` may name the `tileset.json` or its directory.
#[derive(Debug, Clone)]
pub struct FileTileSource {
    tileset_file: PathBuf,
    root_dir: PathBuf,
}

impl FileTileSource {
    pub fn new(path: PathBuf) -> Result<Self> {
        let tileset_file = if path.is_dir() { path.join("tileset.json") } else { path };
        if !tileset_file.is_file() {
            return Err(StreamError::Source(format!("{} does not exist", tileset_file.display())));
        }
        let root_dir = tileset_file.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self { tileset_file, root_dir })
    }

    fn content_path(&self, uri: &str) -> PathBuf {
        let uri = uri.split(['?', '#']).next().unwrap_or(uri);
        self.root_dir.join(uri.strip_prefix("file://").unwrap_or(uri))
    }
}

impl TileSource for FileTileSource {
    fn describe(&self) -> String {
        self.tileset_file.display().to_string()
    }

    fn load_tileset_json(&self) -> Result<TilesetJson> {
        let bytes = std::fs::read(&self.tileset_file)
            .map_err(|e| StreamError::Source(format!("reading {}: {e}", self.tileset_file.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StreamError::Source(format!("parsing {}: {e}", self.tileset_file.display())))
    }

    fn load_content(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.content_path(uri);
        debug!(path = %path.display(), "Reading tile content");
        Ok(std::fs::read(path)?)
    }
}

/// A tileset held in memory, keyed by content URI.
#[derive(Debug, Clone)]
pub struct MemoryTileSource {
    tileset: TilesetJson,
    content: HashMap<String, Vec<u8>>,
}

impl MemoryTileSource {
    pub fn new(tileset: TilesetJson) -> Self {
        Self {
            tileset,
            content: HashMap::new(),
        }
    }

    pub fn with_content(mut self, uri: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.content.insert(uri.into(), bytes);
        self
    }
}

impl TileSource for MemoryTileSource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn load_tileset_json(&self) -> Result<TilesetJson> {
        Ok(self.tileset.clone())
    }

    fn load_content(&self, uri: &str) -> Result<Vec<u8>> {
        self.content
            .get(uri)
            .cloned()
            .ok_or_else(|| StreamError::Source(format!("no content for {uri}")))
    }
}

/// One image draped over the whole tileset.
#[derive(Debug, Clone)]
pub struct FileRasterSource {
    name: String,
    bytes: Arc<Vec<u8>>,
}

impl FileRasterSource {
    pub fn new(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| StreamError::Source(format!("reading {}: {e}", path.display())))?;
        Ok(Self {
            name: path.display().to_string(),
            bytes: Arc::new(bytes),
        })
    }
}

impl RasterOverlaySource for FileRasterSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn fetch_image(&self, _tile: &TileInfo) -> Result<Option<RasterImage>> {
        Ok(Some(RasterImage {
            bytes: self.bytes.as_ref().clone(),
            translation: [0.0, 0.0],
            scale: [1.0, 1.0],
        }))
    }
}

/// In-memory imagery: the same encoded image for every tile.
#[derive(Debug, Clone)]
pub struct MemoryRasterSource {
    bytes: Vec<u8>,
}

impl MemoryRasterSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl RasterOverlaySource for MemoryRasterSource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn fetch_image(&self, _tile: &TileInfo) -> Result<Option<RasterImage>> {
        Ok(Some(RasterImage {
            bytes: self.bytes.clone(),
            translation: [0.0, 0.0],
            scale: [1.0, 1.0],
        }))
    }
}

/// Resolves URLs and ion asset ids against registered in-memory sources.
#[derive(Default, Clone)]
pub struct MemorySourceFactory {
    tilesets: HashMap<String, Arc<dyn TileSource>>,
    ion_tilesets: HashMap<i64, Arc<dyn TileSource>>,
    ion_imagery: HashMap<i64, Arc<dyn RasterOverlaySource>>,
}

impl MemorySourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tileset(mut self, url: impl Into<String>, source: Arc<dyn TileSource>) -> Self {
        self.tilesets.insert(url.into(), source);
        self
    }

    pub fn with_ion_tileset(mut self, asset_id: i64, source: Arc<dyn TileSource>) -> Self {
        self.ion_tilesets.insert(asset_id, source);
        self
    }

    pub fn with_ion_imagery(mut self, asset_id: i64, source: Arc<dyn RasterOverlaySource>) -> Self {
        self.ion_imagery.insert(asset_id, source);
        self
    }
}

impl SourceFactory for MemorySourceFactory {
    fn tileset_source(&self, source: &TilesetSource) -> Result<Arc<dyn TileSource>> {
        let found = match source {
            TilesetSource::Url(url) => self.tilesets.get(url),
            TilesetSource::Ion { asset_id, .. } => self.ion_tilesets.get(asset_id),
        };
        found
            .cloned()
            .ok_or_else(|| StreamError::Source(format!("unknown tileset source {source:?}")))
    }

    fn imagery_source(&self, source: &ImagerySource) -> Result<Arc<dyn RasterOverlaySource>> {
        let found = match source {
            ImagerySource::Ion { asset_id, .. } => self.ion_imagery.get(asset_id),
            ImagerySource::Url(_) => None,
        };
        found
            .cloned()
            .ok_or_else(|| StreamError::Source(format!("unknown imagery source {source:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TILESET: &str = r#"{
        "asset": {"version": "1.0"},
        "geometricError": 500,
        "root": {
            "boundingVolume": {"region": [-1.3197, 0.6988, -1.3196, 0.6989, 0, 20]},
            "geometricError": 100,
            "refine": "REPLACE",
            "content": {"url": "root.b3dm"},
            "children": [
                {"boundingVolume": {"sphere": [0, 0, 0, 10]}, "geometricError": 0,
                 "content": {"uri": "child.glb"}}
            ]
        }
    }"#;

    #[test]
    fn parses_tileset_json() {
        let json: TilesetJson = serde_json::from_str(TILESET).unwrap();
        assert_eq!(json.geometric_error, 500.0);
        assert_eq!(json.root.refine, Some(Refine::Replace));
        assert_eq!(json.root.content.as_ref().and_then(|c| c.uri()), Some("root.b3dm"));
        assert_eq!(json.root.children.len(), 1);
        assert_eq!(json.root.children[0].refine, None);
        assert_eq!(json.root.children[0].bounding_volume.sphere.as_deref(), Some(&[0.0, 0.0, 0.0, 10.0][..]));
    }

    #[test]
    fn external_tileset_detection() {
        assert!(is_external_tileset("sub/tileset.json"));
        assert!(is_external_tileset("sub/tileset.json?v=2"));
        assert!(!is_external_tileset("tile.b3dm"));
    }

    #[test]
    fn file_source_reads_relative_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tileset.json"), TILESET).unwrap();
        std::fs::write(dir.path().join("child.glb"), b"glTF").unwrap();

        let factory = FileSourceFactory::default();
        let source = factory
            .tileset_source(&TilesetSource::Url(dir.path().display().to_string()))
            .unwrap();
        assert_eq!(source.load_tileset_json().unwrap().root.children.len(), 1);
        assert_eq!(source.load_content("child.glb?x=1").unwrap(), b"glTF");
        assert!(source.load_content("missing.glb").is_err());
    }

    #[test]
    fn file_factory_rejects_unreachable_sources() {
        let factory = FileSourceFactory::default();
        let ion = TilesetSource::Ion {
            asset_id: 1,
            access_token: String::new(),
            api_url: None,
        };
        assert!(matches!(factory.tileset_source(&ion), Err(StreamError::Source(_))));
        assert!(factory
            .tileset_source(&TilesetSource::Url("https://example.com/tileset.json".into()))
            .is_err());
        assert!(factory
            .tileset_source(&TilesetSource::Url("/definitely/not/here".into()))
            .is_err());
    }

    #[test]
    fn malformed_json_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tileset.json");
        std::fs::write(&path, "{not json").unwrap();
        let source = FileTileSource::new(path).unwrap();
        assert!(matches!(source.load_tileset_json(), Err(StreamError::Source(_))));
    }
}
