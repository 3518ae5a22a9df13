//! Prim type names, API schema names and attribute names shared by the
//! scene host, the render resources and the notification pipeline.

// Prim types
pub const TILESET_PRIM: &str = "CesiumTilesetPrim";
pub const IMAGERY_PRIM: &str = "CesiumImageryPrim";
pub const GEOREFERENCE_PRIM: &str = "CesiumGeoreferencePrim";
pub const ION_SERVER_PRIM: &str = "CesiumIonServerPrim";
pub const DATA_PRIM: &str = "CesiumDataPrim";
pub const SHADER_PRIM: &str = "Shader";
pub const MATERIAL_PRIM: &str = "Material";
pub const MESH_PRIM: &str = "Mesh";
pub const XFORM_PRIM: &str = "Xform";

// API schemas
pub const GLOBE_ANCHOR_API: &str = "CesiumGlobeAnchorAPI";

// Tileset attributes
pub const SOURCE_TYPE: &str = "cesium:sourceType";
pub const URL: &str = "cesium:url";
pub const ION_ASSET_ID: &str = "cesium:ionAssetId";
pub const ION_ACCESS_TOKEN: &str = "cesium:ionAccessToken";
pub const ION_SERVER_BINDING: &str = "cesium:ionServerBinding";
pub const GEOREFERENCE_BINDING: &str = "cesium:georeferenceBinding";
pub const MAXIMUM_SCREEN_SPACE_ERROR: &str = "cesium:maximumScreenSpaceError";
pub const PRELOAD_ANCESTORS: &str = "cesium:preloadAncestors";
pub const PRELOAD_SIBLINGS: &str = "cesium:preloadSiblings";
pub const FORBID_HOLES: &str = "cesium:forbidHoles";
pub const MAXIMUM_SIMULTANEOUS_TILE_LOADS: &str = "cesium:maximumSimultaneousTileLoads";
pub const MAXIMUM_CACHED_BYTES: &str = "cesium:maximumCachedBytes";
pub const LOADING_DESCENDANT_LIMIT: &str = "cesium:loadingDescendantLimit";
pub const ENABLE_FRUSTUM_CULLING: &str = "cesium:enableFrustumCulling";
pub const ENABLE_FOG_CULLING: &str = "cesium:enableFogCulling";
pub const ENFORCE_CULLED_SCREEN_SPACE_ERROR: &str = "cesium:enforceCulledScreenSpaceError";
pub const CULLED_SCREEN_SPACE_ERROR: &str = "cesium:culledScreenSpaceError";
pub const MAIN_THREAD_LOADING_TIME_LIMIT: &str = "cesium:mainThreadLoadingTimeLimit";
pub const SUSPEND_UPDATE: &str = "cesium:suspendUpdate";
pub const SMOOTH_NORMALS: &str = "cesium:smoothNormals";
pub const SHOW_CREDITS_ON_SCREEN: &str = "cesium:showCreditsOnScreen";
pub const MATERIAL_BINDING: &str = "material:binding";
pub const DISPLAY_COLOR: &str = "primvars:displayColor";
pub const DISPLAY_OPACITY: &str = "primvars:displayOpacity";

// Source type values
pub const SOURCE_ION: &str = "ion";
pub const SOURCE_URL: &str = "url";

// Imagery attributes
pub const ALPHA: &str = "cesium:alpha";

// Georeference attributes
pub const GEOREFERENCE_ORIGIN_LONGITUDE: &str = "cesium:georeferenceOrigin:longitude";
pub const GEOREFERENCE_ORIGIN_LATITUDE: &str = "cesium:georeferenceOrigin:latitude";
pub const GEOREFERENCE_ORIGIN_HEIGHT: &str = "cesium:georeferenceOrigin:height";

// Globe anchor attributes
pub const ANCHOR_DETECT_TRANSFORM_CHANGES: &str = "cesium:anchor:detectTransformChanges";
pub const ANCHOR_ADJUST_ORIENTATION: &str = "cesium:anchor:adjustOrientationForGlobeWhenMoving";
pub const ANCHOR_GEOGRAPHIC_COORDINATES: &str = "cesium:anchor:geographicCoordinates";
pub const ANCHOR_GEOREFERENCE_BINDING: &str = "cesium:anchor:georeferenceBinding";
pub const ANCHOR_POSITION: &str = "cesium:anchor:position";
pub const ANCHOR_ROTATION: &str = "cesium:anchor:rotation";
pub const ANCHOR_SCALE: &str = "cesium:anchor:scale";
pub const XFORM_OP_TRANSFORM_CESIUM: &str = "xformOp:transform:cesium";

// Ion server attributes
pub const ION_SERVER_URL: &str = "cesium:ionServerUrl";
pub const ION_SERVER_API_URL: &str = "cesium:ionServerApiUrl";
pub const ION_SERVER_APPLICATION_ID: &str = "cesium:ionServerApplicationId";
pub const PROJECT_DEFAULT_ION_ACCESS_TOKEN: &str = "cesium:projectDefaultIonAccessToken";

// Data prim debug options
pub const DEBUG_DISABLE_MATERIALS: &str = "cesium:debug:disableMaterials";
pub const DEBUG_DISABLE_TEXTURES: &str = "cesium:debug:disableTextures";
pub const DEBUG_DISABLE_GEOMETRY_POOL: &str = "cesium:debug:disableGeometryPool";
pub const DEBUG_DISABLE_MATERIAL_POOL: &str = "cesium:debug:disableMaterialPool";
pub const DEBUG_DISABLE_TEXTURE_POOL: &str = "cesium:debug:disableTexturePool";
pub const DEBUG_GEOMETRY_POOL_INITIAL_CAPACITY: &str = "cesium:debug:geometryPoolInitialCapacity";
pub const DEBUG_MATERIAL_POOL_INITIAL_CAPACITY: &str = "cesium:debug:materialPoolInitialCapacity";
pub const DEBUG_TEXTURE_POOL_INITIAL_CAPACITY: &str = "cesium:debug:texturePoolInitialCapacity";
pub const DEBUG_RANDOM_COLORS: &str = "cesium:debug:randomColors";

// Render resource attributes
pub const FACE_VERTEX_COUNTS: &str = "faceVertexCounts";
pub const FACE_VERTEX_INDICES: &str = "faceVertexIndices";
pub const POINTS: &str = "points";
pub const EXTENT: &str = "extent";
pub const WORLD_EXTENT: &str = "_worldExtent";
pub const WORLD_VISIBILITY: &str = "_worldVisibility";
pub const WORLD_POSITION: &str = "_worldPosition";
pub const WORLD_ORIENTATION: &str = "_worldOrientation";
pub const WORLD_SCALE: &str = "_worldScale";
pub const LOCAL_TO_ECEF_TRANSFORM: &str = "_cesium_localToEcefTransform";
pub const TILESET_ID: &str = "_cesium_tilesetId";
pub const TILE_ID: &str = "_cesium_tileId";
pub const PRIMVARS: &str = "primvars";
pub const PRIMVAR_INTERPOLATIONS: &str = "primvarInterpolations";
pub const PRIMVARS_ST: &str = "primvars:st";
pub const PRIMVARS_NORMALS: &str = "primvars:normals";
pub const PRIMVARS_VERTEX_COLOR: &str = "primvars:vertexColor";
pub const PRIMVARS_FEATURE_ID_PREFIX: &str = "primvars:_FEATURE_ID_";
pub const DOUBLE_SIDED: &str = "doubleSided";
pub const SUBDIVISION_SCHEME: &str = "subdivisionScheme";

// Shader inputs on pooled materials
pub const INPUTS_PREFIX: &str = "inputs:";
pub const INFO_ID: &str = "info:id";
pub const OMNI_PBR: &str = "OmniPBR.mdl";
pub const DIFFUSE_COLOR_CONSTANT: &str = "inputs:diffuse_color_constant";
pub const METALLIC_CONSTANT: &str = "inputs:metallic_constant";
pub const REFLECTION_ROUGHNESS_CONSTANT: &str = "inputs:reflection_roughness_constant";
pub const SPECULAR_LEVEL: &str = "inputs:specular_level";
pub const DIFFUSE_TEXTURE: &str = "inputs:diffuse_texture";
pub const IMAGERY_LAYER_PREFIX: &str = "inputs:imagery_layer_";
pub const IMAGERY_ALPHA_PREFIX: &str = "inputs:imagery_alpha_";
pub const SHADER_CHILD: &str = "Shader";
/// Suffix of the attribute recording an input connection.
pub const CONNECT_SUFFIX: &str = ".connect";

/// Name of the texture input bound to imagery layer `index`.
pub fn imagery_layer_input(index: usize) -> String {
    format!("{IMAGERY_LAYER_PREFIX}{index}")
}

/// Name of the alpha input for imagery layer `index`.
pub fn imagery_alpha_input(index: usize) -> String {
    format!("{IMAGERY_ALPHA_PREFIX}{index}")
}

/// Name of the feature-id primvar for set `index`.
pub fn feature_id_primvar(index: usize) -> String {
    format!("{PRIMVARS_FEATURE_ID_PREFIX}{index}")
}

/// Name of the texcoord offset input for imagery layer `index`.
pub fn imagery_translation_input(index: usize) -> String {
    format!("{IMAGERY_LAYER_PREFIX}{index}_translation")
}

/// Name of the texcoord scale input for imagery layer `index`.
pub fn imagery_scale_input(index: usize) -> String {
    format!("{IMAGERY_LAYER_PREFIX}{index}_scale")
}
