//! Tile content decoding: GLB/glTF and batched 3D model (`b3dm`) payloads
//! into a [`TileModel`].

use glam::{DMat4, DVec3};
use gltf::accessor::{DataType, Dimensions};
use gltf::mesh::Semantic;
use tracing::{debug, warn};

use crate::error::{Result, StreamError};
use crate::types::{AlphaMode, BoundingBox, ImageData, MaterialInfo, MeshPrimitive, TileModel};

const B3DM_MAGIC: &[u8; 4] = b"b3dm";
const B3DM_HEADER_LEN: usize = 28;
const OVERLAY_PREFIX: &str = "CESIUMOVERLAY_";
const FEATURE_ID_PREFIX: &str = "FEATURE_ID_";

/// Decodes tile content bytes. The format is sniffed from the magic.
pub fn decode_tile_content(bytes: &[u8]) -> Result<TileModel> {
    if bytes.starts_with(B3DM_MAGIC) {
        return decode_b3dm(bytes);
    }
    if bytes.starts_with(b"glTF") || bytes.first() == Some(&b'{') {
        return decode_gltf(bytes);
    }
    let magic = String::from_utf8_lossy(&bytes[..bytes.len().min(4)]).into_owned();
    Err(StreamError::Decode(format!("unsupported tile content (magic {magic:?})")))
}

/// Fixed 28-byte b3dm header, little-endian on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct B3dmHeader {
    magic: [u8; 4],
    version: u32,
    byte_length: u32,
    feature_table_json_len: u32,
    feature_table_bin_len: u32,
    batch_table_json_len: u32,
    batch_table_bin_len: u32,
}

impl B3dmHeader {
    fn read(bytes: &[u8]) -> Result<Self> {
        let raw = bytes
            .get(..B3DM_HEADER_LEN)
            .ok_or_else(|| StreamError::Decode("truncated b3dm header".into()))?;
        let header: B3dmHeader = bytemuck::pod_read_unaligned(raw);
        Ok(B3dmHeader {
            magic: header.magic,
            version: u32::from_le(header.version),
            byte_length: u32::from_le(header.byte_length),
            feature_table_json_len: u32::from_le(header.feature_table_json_len),
            feature_table_bin_len: u32::from_le(header.feature_table_bin_len),
            batch_table_json_len: u32::from_le(header.batch_table_json_len),
            batch_table_bin_len: u32::from_le(header.batch_table_bin_len),
        })
    }
}

/// Strips the b3dm header and tables and decodes the embedded GLB. Only
/// `RTC_CENTER` is read from the feature table.
fn decode_b3dm(bytes: &[u8]) -> Result<TileModel> {
    let header = B3dmHeader::read(bytes)?;
    debug_assert_eq!(&header.magic, B3DM_MAGIC);
    if header.version != 1 {
        warn!(version = header.version, "Unexpected b3dm version");
    }
    let byte_length = header.byte_length as usize;
    let feature_json_len = header.feature_table_json_len as usize;
    let feature_bin_len = header.feature_table_bin_len as usize;
    let batch_json_len = header.batch_table_json_len as usize;
    let batch_bin_len = header.batch_table_bin_len as usize;
    if byte_length > bytes.len() {
        return Err(StreamError::Decode(format!(
            "b3dm declares {byte_length} bytes but only {} are present",
            bytes.len()
        )));
    }

    let feature_json_start = B3DM_HEADER_LEN;
    let glb_start = feature_json_start + feature_json_len + feature_bin_len + batch_json_len + batch_bin_len;
    if glb_start > byte_length {
        return Err(StreamError::Decode("b3dm tables overrun the payload".into()));
    }

    let rtc_center = if feature_json_len > 0 {
        let table: serde_json::Value =
            serde_json::from_slice(&bytes[feature_json_start..feature_json_start + feature_json_len])?;
        table
            .get("RTC_CENTER")
            .and_then(|v| v.as_array())
            .and_then(|a| {
                let c: Vec<f64> = a.iter().filter_map(|x| x.as_f64()).collect();
                (c.len() == 3).then(|| [c[0], c[1], c[2]])
            })
    } else {
        None
    };

    let mut model = decode_gltf(&bytes[glb_start..byte_length])?;
    model.rtc_center = rtc_center;
    Ok(model)
}

pub fn decode_gltf(bytes: &[u8]) -> Result<TileModel> {
    let (document, buffers, images) =
        gltf::import_slice(bytes).map_err(|e| StreamError::Decode(format!("invalid glTF: {e}")))?;

    let mut primitives = Vec::new();
    match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => {
            for node in scene.nodes() {
                visit_node(&node, DMat4::IDENTITY, &buffers, &mut primitives);
            }
        }
        None => {
            for mesh in document.meshes() {
                read_mesh(&mesh, DMat4::IDENTITY, &buffers, &mut primitives);
            }
        }
    }

    let materials = document.materials().map(|m| convert_material(&m)).collect();
    let images = images.iter().map(convert_image).collect();

    debug!(
        primitives = primitives.len(),
        materials = document.materials().len(),
        "Decoded glTF content"
    );

    Ok(TileModel {
        primitives,
        materials,
        images,
        rtc_center: None,
    })
}

fn visit_node(node: &gltf::Node<'_>, parent: DMat4, buffers: &[gltf::buffer::Data], out: &mut Vec<MeshPrimitive>) {
    let local = DMat4::from_cols_array_2d(&node.transform().matrix().map(|c| c.map(f64::from)));
    let world = parent * local;
    if let Some(mesh) = node.mesh() {
        read_mesh(&mesh, world, buffers, out);
    }
    for child in node.children() {
        visit_node(&child, world, buffers, out);
    }
}

fn read_mesh(mesh: &gltf::Mesh<'_>, transform: DMat4, buffers: &[gltf::buffer::Data], out: &mut Vec<MeshPrimitive>) {
    for primitive in mesh.primitives() {
        match read_primitive(&primitive, buffers) {
            Ok(mut prim) => {
                prim.node_transform = transform;
                out.push(prim);
            }
            Err(e) => warn!(mesh = mesh.index(), error = %e, "Skipping primitive"),
        }
    }
}

fn read_primitive(primitive: &gltf::Primitive<'_>, buffers: &[gltf::buffer::Data]) -> Result<MeshPrimitive> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| &d.0[..]));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| StreamError::Decode("primitive missing positions".into()))?
        .collect();

    let normals = reader.read_normals().map(|i| i.collect()).unwrap_or_default();
    let uvs = reader
        .read_tex_coords(0)
        .map(|i| i.into_f32().collect())
        .unwrap_or_default();
    let colors = reader
        .read_colors(0)
        .map(|i| i.into_rgba_f32().collect())
        .unwrap_or_default();
    let indices = reader.read_indices().map(|i| i.into_u32().collect());

    let mut overlays: Vec<(usize, Vec<[f32; 2]>)> = Vec::new();
    let mut feature_ids: Vec<(usize, Vec<f32>)> = Vec::new();
    for (semantic, accessor) in primitive.attributes() {
        let Semantic::Extras(name) = semantic else {
            continue;
        };
        let name = name.trim_start_matches('_');
        if let Some(n) = name.strip_prefix(OVERLAY_PREFIX).and_then(|n| n.parse().ok()) {
            match read_vec2(&accessor, buffers) {
                Some(uvs) => overlays.push((n, uvs)),
                None => warn!(set = n, "Ignoring overlay texcoords with unsupported layout"),
            }
        } else if let Some(n) = name.strip_prefix(FEATURE_ID_PREFIX).and_then(|n| n.parse().ok()) {
            match read_scalar(&accessor, buffers) {
                Some(ids) => feature_ids.push((n, ids)),
                None => warn!(set = n, "Ignoring feature ids with unsupported layout"),
            }
        }
    }
    overlays.sort_by_key(|(n, _)| *n);
    feature_ids.sort_by_key(|(n, _)| *n);

    let position_accessor = primitive.get(&Semantic::Positions);
    let extent = position_accessor
        .as_ref()
        .and_then(accessor_bounds)
        .or_else(|| {
            let points: Vec<DVec3> = positions.iter().map(|p| DVec3::from(p.map(f64::from))).collect();
            BoundingBox::from_points(&points)
        });

    Ok(MeshPrimitive {
        positions,
        normals,
        uvs,
        overlay_uvs: overlays.into_iter().map(|(_, uvs)| uvs).collect(),
        colors,
        feature_ids: feature_ids.into_iter().map(|(_, ids)| ids).collect(),
        indices,
        mode: primitive.mode().into(),
        extent,
        material_index: primitive.material().index(),
        node_transform: DMat4::IDENTITY,
    })
}

fn accessor_bounds(accessor: &gltf::Accessor<'_>) -> Option<BoundingBox> {
    let read = |v: Option<gltf::json::Value>| -> Option<[f64; 3]> {
        let values: Vec<f64> = v?.as_array()?.iter().filter_map(|x| x.as_f64()).collect();
        (values.len() == 3).then(|| [values[0], values[1], values[2]])
    };
    Some(BoundingBox {
        min: read(accessor.min())?,
        max: read(accessor.max())?,
    })
}

fn read_vec2(accessor: &gltf::Accessor<'_>, buffers: &[gltf::buffer::Data]) -> Option<Vec<[f32; 2]>> {
    if accessor.dimensions() != Dimensions::Vec2 {
        return None;
    }
    let get = |buffer: gltf::Buffer<'_>| buffers.get(buffer.index()).map(|d| &d.0[..]);
    match accessor.data_type() {
        DataType::F32 => Some(gltf::accessor::Iter::<[f32; 2]>::new(accessor.clone(), get)?.collect()),
        DataType::U16 if accessor.normalized() => Some(
            gltf::accessor::Iter::<[u16; 2]>::new(accessor.clone(), get)?
                .map(|[u, v]| [u as f32 / 65535.0, v as f32 / 65535.0])
                .collect(),
        ),
        DataType::U8 if accessor.normalized() => Some(
            gltf::accessor::Iter::<[u8; 2]>::new(accessor.clone(), get)?
                .map(|[u, v]| [u as f32 / 255.0, v as f32 / 255.0])
                .collect(),
        ),
        _ => None,
    }
}

fn read_scalar(accessor: &gltf::Accessor<'_>, buffers: &[gltf::buffer::Data]) -> Option<Vec<f32>> {
    if accessor.dimensions() != Dimensions::Scalar {
        return None;
    }
    let get = |buffer: gltf::Buffer<'_>| buffers.get(buffer.index()).map(|d| &d.0[..]);
    let values = match accessor.data_type() {
        DataType::F32 => gltf::accessor::Iter::<f32>::new(accessor.clone(), get)?.collect(),
        DataType::U8 => gltf::accessor::Iter::<u8>::new(accessor.clone(), get)?
            .map(f32::from)
            .collect(),
        DataType::U16 => gltf::accessor::Iter::<u16>::new(accessor.clone(), get)?
            .map(f32::from)
            .collect(),
        DataType::U32 => gltf::accessor::Iter::<u32>::new(accessor.clone(), get)?
            .map(|v| v as f32)
            .collect(),
        _ => return None,
    };
    Some(values)
}

fn convert_material(material: &gltf::Material<'_>) -> MaterialInfo {
    let pbr = material.pbr_metallic_roughness();
    MaterialInfo {
        base_color: pbr.base_color_factor(),
        metallic: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        base_color_texture: pbr.base_color_texture().map(|info| info.texture().source().index()),
        alpha_mode: match material.alpha_mode() {
            gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
            gltf::material::AlphaMode::Mask => AlphaMode::Mask,
            gltf::material::AlphaMode::Blend => AlphaMode::Blend,
        },
        alpha_cutoff: material.alpha_cutoff().unwrap_or(0.5),
        double_sided: material.double_sided(),
        unlit: material.unlit(),
    }
}

/// Converts a decoded glTF image to RGBA8. Unsupported pixel formats are
/// replaced by a white texel so texture indices stay aligned.
fn convert_image(data: &gltf::image::Data) -> ImageData {
    use gltf::image::Format;

    let (w, h) = (data.width, data.height);
    let pixels = data.pixels.clone();
    let dynamic = match data.format {
        Format::R8 => image::GrayImage::from_raw(w, h, pixels).map(image::DynamicImage::ImageLuma8),
        Format::R8G8 => image::GrayAlphaImage::from_raw(w, h, pixels).map(image::DynamicImage::ImageLumaA8),
        Format::R8G8B8 => image::RgbImage::from_raw(w, h, pixels).map(image::DynamicImage::ImageRgb8),
        Format::R8G8B8A8 => image::RgbaImage::from_raw(w, h, pixels).map(image::DynamicImage::ImageRgba8),
        other => {
            warn!(format = ?other, "Unsupported glTF image format, substituting white");
            None
        }
    };
    match dynamic {
        Some(img) => ImageData::from(img.to_rgba8()),
        None => ImageData::white(),
    }
}
