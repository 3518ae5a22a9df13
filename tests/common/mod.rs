//! Fixtures shared by the integration tests: synthetic tile content,
//! tileset descriptions and cameras.

#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use glam::{DMat4, DVec3};
use serde_json::{json, Value};

use tileset_streamer::streaming::{
    AsyncSystem, InlineAsyncSystem, MemoryRasterSource, MemorySourceFactory, MemoryTileSource, TilesetJson, Viewport,
};
use tileset_streamer::transform::ecef::enu_frame;
use tileset_streamer::Services;

pub const TILESET_URL: &str = "memory://tileset.json";
pub const OTHER_URL: &str = "memory://other.json";
pub const ION_TILESET: i64 = 96188;
pub const ION_IMAGERY: i64 = 2;

/// A single triangle with positions and indices only, so every tile built
/// from it needs the same kind of render geometry.
pub fn plain_triangle_glb() -> Vec<u8> {
    let mut bin = Vec::new();
    for p in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
        for c in p {
            bin.extend_from_slice(&c.to_le_bytes());
        }
    }
    for i in [0u16, 1, 2] {
        bin.extend_from_slice(&i.to_le_bytes());
    }
    bin.extend_from_slice(&[0, 0]);

    let gltf = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0}],
        "meshes": [{"primitives": [{"attributes": {"POSITION": 0}, "indices": 1}]}],
        "buffers": [{"byteLength": bin.len()}],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 6}
        ],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
             "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]},
            {"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}
        ]
    });
    let mut json = serde_json::to_vec(&gltf).unwrap();
    while json.len() % 4 != 0 {
        json.push(b' ');
    }

    let total = 12 + 8 + json.len() + 8 + bin.len();
    let mut glb = Vec::with_capacity(total);
    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total as u32).to_le_bytes());
    glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
    glb.extend_from_slice(b"JSON");
    glb.extend_from_slice(&json);
    glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    glb.extend_from_slice(b"BIN\0");
    glb.extend_from_slice(&bin);
    glb
}

/// 4x4 opaque PNG used as overlay imagery.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_fn(4, 4, |x, y| {
        if (x + y) % 2 == 0 {
            image::Rgba([200, 60, 60, 255])
        } else {
            image::Rgba([60, 60, 200, 255])
        }
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// A REPLACE-refined root over two leaves at x = -50 and x = 50, anchored
/// at longitude 0, latitude 0. With `root_content` false the root is an
/// empty tile and only the leaves carry geometry.
pub fn tileset_value(root_content: bool) -> Value {
    let transform = enu_frame(0.0, 0.0, 0.0).to_cols_array();
    let mut root = json!({
        "transform": transform.to_vec(),
        "boundingVolume": {"sphere": [0, 0, 0, 100]},
        "geometricError": 100,
        "refine": "REPLACE",
        "children": [
            {"boundingVolume": {"sphere": [-50, 0, 0, 50]}, "geometricError": 0, "content": {"uri": "a.glb"}},
            {"boundingVolume": {"sphere": [50, 0, 0, 50]}, "geometricError": 0, "content": {"uri": "b.glb"}}
        ]
    });
    if root_content {
        root["content"] = json!({"uri": "root.glb"});
    }
    json!({"asset": {"version": "1.1"}, "geometricError": 200, "root": root})
}

pub fn memory_source(root_content: bool) -> Arc<MemoryTileSource> {
    let tileset: TilesetJson = serde_json::from_value(tileset_value(root_content)).unwrap();
    Arc::new(
        MemoryTileSource::new(tileset)
            .with_content("root.glb", plain_triangle_glb())
            .with_content("a.glb", plain_triangle_glb())
            .with_content("b.glb", plain_triangle_glb()),
    )
}

/// Services resolving [`TILESET_URL`], [`OTHER_URL`], ion asset
/// [`ION_TILESET`] and ion imagery [`ION_IMAGERY`] from memory.
pub fn memory_services(root_content: bool, async_system: Arc<dyn AsyncSystem>) -> Services {
    let source = memory_source(root_content);
    Services {
        sources: Arc::new(
            MemorySourceFactory::new()
                .with_tileset(TILESET_URL, source.clone())
                .with_tileset(OTHER_URL, source.clone())
                .with_ion_tileset(ION_TILESET, source)
                .with_ion_imagery(ION_IMAGERY, Arc::new(MemoryRasterSource::new(png_bytes()))),
        ),
        async_system,
    }
}

pub fn inline_services(root_content: bool) -> Services {
    memory_services(root_content, Arc::new(InlineAsyncSystem))
}

/// Writes the fixture tileset and its content to `dir`.
pub fn write_tileset(dir: &Path) {
    let text = serde_json::to_string_pretty(&tileset_value(true)).unwrap();
    fs::write(dir.join("tileset.json"), text).unwrap();
    for name in ["root.glb", "a.glb", "b.glb"] {
        fs::write(dir.join(name), plain_triangle_glb()).unwrap();
    }
}

pub fn viewport(eye: DVec3, target: DVec3) -> Viewport {
    let view = DMat4::look_at_rh(eye, target, DVec3::Z);
    let projection = DMat4::perspective_rh_gl(60f64.to_radians(), 16.0 / 9.0, 1.0, 1.0e7);
    Viewport {
        view: view.to_cols_array(),
        projection: projection.to_cols_array(),
        width: 1920.0,
        height: 1080.0,
    }
}

/// Camera 500 m south of the origin, looking at it.
pub fn near_viewport() -> Viewport {
    viewport(DVec3::new(0.0, -500.0, 0.0), DVec3::ZERO)
}

/// Same position, looking away from the tileset.
pub fn away_viewport() -> Viewport {
    viewport(DVec3::new(0.0, -500.0, 0.0), DVec3::new(0.0, -1000.0, 0.0))
}

/// Camera so far away that the root's error is acceptable.
pub fn far_viewport() -> Viewport {
    viewport(DVec3::new(0.0, -20_000.0, 0.0), DVec3::ZERO)
}
