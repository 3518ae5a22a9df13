use super::PrimType;
use crate::tokens;

/// What a single property edit asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAction {
    ReloadTileset,
    UpdateTilesetOptions,
    UpdateDisplayColorAndOpacity,
    /// Reload the tileset the imagery layer belongs to.
    ReloadImageryTileset,
    UpdateImageryAlpha,
    UpdateGeoreferenceOrigin,
    AnchorByTransform,
    AnchorByGeographicCoordinates,
    AnchorByFixedTransform,
    AnchorSettings,
    /// Re-read the server and reload everything streaming through it.
    ReloadIonServer,
    UpdateShaderInput,
    ReloadStage,
}

const TILESET_OPTIONS: &[&str] = &[
    tokens::MAXIMUM_SCREEN_SPACE_ERROR,
    tokens::PRELOAD_ANCESTORS,
    tokens::PRELOAD_SIBLINGS,
    tokens::FORBID_HOLES,
    tokens::MAXIMUM_SIMULTANEOUS_TILE_LOADS,
    tokens::MAXIMUM_CACHED_BYTES,
    tokens::LOADING_DESCENDANT_LIMIT,
    tokens::ENABLE_FRUSTUM_CULLING,
    tokens::ENABLE_FOG_CULLING,
    tokens::ENFORCE_CULLED_SCREEN_SPACE_ERROR,
    tokens::CULLED_SCREEN_SPACE_ERROR,
    tokens::MAIN_THREAD_LOADING_TIME_LIMIT,
    tokens::SUSPEND_UPDATE,
];

const TILESET_RELOAD: &[&str] = &[
    tokens::SOURCE_TYPE,
    tokens::URL,
    tokens::ION_ASSET_ID,
    tokens::ION_ACCESS_TOKEN,
    tokens::ION_SERVER_BINDING,
    tokens::GEOREFERENCE_BINDING,
    tokens::SMOOTH_NORMALS,
    tokens::SHOW_CREDITS_ON_SCREEN,
    tokens::MATERIAL_BINDING,
];

const IMAGERY_RELOAD: &[&str] = &[
    tokens::ION_ASSET_ID,
    tokens::ION_ACCESS_TOKEN,
    tokens::ION_SERVER_BINDING,
    tokens::SHOW_CREDITS_ON_SCREEN,
];

const ION_SERVER: &[&str] = &[
    tokens::ION_SERVER_URL,
    tokens::ION_SERVER_API_URL,
    tokens::ION_SERVER_APPLICATION_ID,
    tokens::PROJECT_DEFAULT_ION_ACCESS_TOKEN,
];

const DEBUG_OPTIONS: &[&str] = &[
    tokens::DEBUG_DISABLE_MATERIALS,
    tokens::DEBUG_DISABLE_TEXTURES,
    tokens::DEBUG_DISABLE_GEOMETRY_POOL,
    tokens::DEBUG_DISABLE_MATERIAL_POOL,
    tokens::DEBUG_DISABLE_TEXTURE_POOL,
    tokens::DEBUG_GEOMETRY_POOL_INITIAL_CAPACITY,
    tokens::DEBUG_MATERIAL_POOL_INITIAL_CAPACITY,
    tokens::DEBUG_TEXTURE_POOL_INITIAL_CAPACITY,
    tokens::DEBUG_RANDOM_COLORS,
];

/// Maps an edited `(owner type, property)` pair to its action. Pairs not
/// listed here are ignored.
pub fn property_action(prim_type: PrimType, property: &str) -> Option<PropertyAction> {
    use PropertyAction::*;

    let action = match prim_type {
        PrimType::Tileset if TILESET_OPTIONS.contains(&property) => UpdateTilesetOptions,
        PrimType::Tileset if TILESET_RELOAD.contains(&property) => ReloadTileset,
        PrimType::Tileset if property == tokens::DISPLAY_COLOR || property == tokens::DISPLAY_OPACITY => {
            UpdateDisplayColorAndOpacity
        }
        PrimType::Imagery if IMAGERY_RELOAD.contains(&property) => ReloadImageryTileset,
        PrimType::Imagery if property == tokens::ALPHA => UpdateImageryAlpha,
        PrimType::Georeference
            if property == tokens::GEOREFERENCE_ORIGIN_LONGITUDE
                || property == tokens::GEOREFERENCE_ORIGIN_LATITUDE
                || property == tokens::GEOREFERENCE_ORIGIN_HEIGHT =>
        {
            UpdateGeoreferenceOrigin
        }
        PrimType::GlobeAnchor => match property {
            tokens::XFORM_OP_TRANSFORM_CESIUM => AnchorByTransform,
            tokens::ANCHOR_GEOGRAPHIC_COORDINATES => AnchorByGeographicCoordinates,
            tokens::ANCHOR_POSITION | tokens::ANCHOR_ROTATION | tokens::ANCHOR_SCALE => AnchorByFixedTransform,
            tokens::ANCHOR_GEOREFERENCE_BINDING
            | tokens::ANCHOR_ADJUST_ORIENTATION
            | tokens::ANCHOR_DETECT_TRANSFORM_CHANGES => AnchorSettings,
            _ => return None,
        },
        PrimType::IonServer if ION_SERVER.contains(&property) => ReloadIonServer,
        PrimType::Shader if property.starts_with(tokens::INPUTS_PREFIX) => UpdateShaderInput,
        PrimType::Data if DEBUG_OPTIONS.contains(&property) => ReloadStage,
        _ => return None,
    };
    Some(action)
}
