use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::scene::{get_bool, get_f64, get_i64, get_string, SceneHost, ScenePath};
use crate::tokens;

/// Where a tileset's data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TilesetSourceType {
    #[default]
    #[value(name = "ion")]
    Ion,
    #[value(name = "url")]
    Url,
}

impl std::fmt::Display for TilesetSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TilesetSourceType::Ion => write!(f, "{}", tokens::SOURCE_ION),
            TilesetSourceType::Url => write!(f, "{}", tokens::SOURCE_URL),
        }
    }
}

/// Streaming parameters of a single tileset, read from its prim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilesetOptions {
    pub source_type: TilesetSourceType,
    pub url: String,
    pub ion_asset_id: i64,
    pub ion_access_token: String,
    pub ion_server_path: Option<ScenePath>,
    pub georeference_path: Option<ScenePath>,
    pub maximum_screen_space_error: f64,
    pub preload_ancestors: bool,
    pub preload_siblings: bool,
    pub forbid_holes: bool,
    pub maximum_simultaneous_tile_loads: u32,
    pub maximum_cached_bytes: u64,
    pub loading_descendant_limit: u32,
    pub enable_frustum_culling: bool,
    pub enable_fog_culling: bool,
    pub enforce_culled_screen_space_error: bool,
    pub culled_screen_space_error: f64,
    /// Milliseconds of main-thread finalization per frame; 0 means unlimited.
    pub main_thread_loading_time_limit: f64,
    pub suspend_update: bool,
    pub smooth_normals: bool,
    pub show_credits_on_screen: bool,
    pub material_path: Option<ScenePath>,
    pub display_color: [f32; 3],
    pub display_opacity: f32,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self {
            source_type: TilesetSourceType::Ion,
            url: String::new(),
            ion_asset_id: 0,
            ion_access_token: String::new(),
            ion_server_path: None,
            georeference_path: None,
            maximum_screen_space_error: 16.0,
            preload_ancestors: true,
            preload_siblings: true,
            forbid_holes: false,
            maximum_simultaneous_tile_loads: 20,
            maximum_cached_bytes: 512 * 1024 * 1024,
            loading_descendant_limit: 20,
            enable_frustum_culling: true,
            enable_fog_culling: true,
            enforce_culled_screen_space_error: true,
            culled_screen_space_error: 64.0,
            main_thread_loading_time_limit: 0.0,
            suspend_update: false,
            smooth_normals: false,
            show_credits_on_screen: false,
            material_path: None,
            display_color: [1.0, 1.0, 1.0],
            display_opacity: 1.0,
        }
    }
}

impl TilesetOptions {
    /// Reads every `cesium:*` attribute of the tileset prim, falling back to
    /// defaults for anything unauthored.
    pub fn read_from(stage: &dyn SceneHost, path: &ScenePath) -> Self {
        let d = Self::default();
        let source_type = match get_string(stage, path, tokens::SOURCE_TYPE).as_deref() {
            Some(tokens::SOURCE_URL) => TilesetSourceType::Url,
            _ => TilesetSourceType::Ion,
        };
        let display_color = stage
            .attribute(path, tokens::DISPLAY_COLOR)
            .and_then(|v| v.as_vec3f())
            .unwrap_or(d.display_color);
        let display_opacity = stage
            .attribute(path, tokens::DISPLAY_OPACITY)
            .and_then(|v| match v {
                crate::scene::AttributeValue::FloatArray(a) => a.first().copied(),
                other => other.as_float().map(|f| f as f32),
            })
            .unwrap_or(d.display_opacity);

        Self {
            source_type,
            url: get_string(stage, path, tokens::URL).unwrap_or_default(),
            ion_asset_id: get_i64(stage, path, tokens::ION_ASSET_ID, d.ion_asset_id),
            ion_access_token: get_string(stage, path, tokens::ION_ACCESS_TOKEN).unwrap_or_default(),
            ion_server_path: crate::scene::get_target(stage, path, tokens::ION_SERVER_BINDING),
            georeference_path: crate::scene::get_target(stage, path, tokens::GEOREFERENCE_BINDING),
            maximum_screen_space_error: get_f64(
                stage,
                path,
                tokens::MAXIMUM_SCREEN_SPACE_ERROR,
                d.maximum_screen_space_error,
            ),
            preload_ancestors: get_bool(stage, path, tokens::PRELOAD_ANCESTORS, d.preload_ancestors),
            preload_siblings: get_bool(stage, path, tokens::PRELOAD_SIBLINGS, d.preload_siblings),
            forbid_holes: get_bool(stage, path, tokens::FORBID_HOLES, d.forbid_holes),
            maximum_simultaneous_tile_loads: get_i64(
                stage,
                path,
                tokens::MAXIMUM_SIMULTANEOUS_TILE_LOADS,
                d.maximum_simultaneous_tile_loads as i64,
            )
            .max(0) as u32,
            maximum_cached_bytes: get_i64(
                stage,
                path,
                tokens::MAXIMUM_CACHED_BYTES,
                d.maximum_cached_bytes as i64,
            )
            .max(0) as u64,
            loading_descendant_limit: get_i64(
                stage,
                path,
                tokens::LOADING_DESCENDANT_LIMIT,
                d.loading_descendant_limit as i64,
            )
            .max(0) as u32,
            enable_frustum_culling: get_bool(
                stage,
                path,
                tokens::ENABLE_FRUSTUM_CULLING,
                d.enable_frustum_culling,
            ),
            enable_fog_culling: get_bool(stage, path, tokens::ENABLE_FOG_CULLING, d.enable_fog_culling),
            enforce_culled_screen_space_error: get_bool(
                stage,
                path,
                tokens::ENFORCE_CULLED_SCREEN_SPACE_ERROR,
                d.enforce_culled_screen_space_error,
            ),
            culled_screen_space_error: get_f64(
                stage,
                path,
                tokens::CULLED_SCREEN_SPACE_ERROR,
                d.culled_screen_space_error,
            ),
            main_thread_loading_time_limit: get_f64(
                stage,
                path,
                tokens::MAIN_THREAD_LOADING_TIME_LIMIT,
                d.main_thread_loading_time_limit,
            ),
            suspend_update: get_bool(stage, path, tokens::SUSPEND_UPDATE, d.suspend_update),
            smooth_normals: get_bool(stage, path, tokens::SMOOTH_NORMALS, d.smooth_normals),
            show_credits_on_screen: get_bool(
                stage,
                path,
                tokens::SHOW_CREDITS_ON_SCREEN,
                d.show_credits_on_screen,
            ),
            material_path: crate::scene::get_target(stage, path, tokens::MATERIAL_BINDING),
            display_color,
            display_opacity,
        }
    }
}

/// Parameters of a raster imagery layer draped over a tileset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageryOptions {
    pub ion_asset_id: i64,
    pub ion_access_token: String,
    pub ion_server_path: Option<ScenePath>,
    pub alpha: f32,
    pub show_credits_on_screen: bool,
}

impl Default for ImageryOptions {
    fn default() -> Self {
        Self {
            ion_asset_id: 0,
            ion_access_token: String::new(),
            ion_server_path: None,
            alpha: 1.0,
            show_credits_on_screen: false,
        }
    }
}

impl ImageryOptions {
    pub fn read_from(stage: &dyn SceneHost, path: &ScenePath) -> Self {
        let d = Self::default();
        Self {
            ion_asset_id: get_i64(stage, path, tokens::ION_ASSET_ID, d.ion_asset_id),
            ion_access_token: get_string(stage, path, tokens::ION_ACCESS_TOKEN).unwrap_or_default(),
            ion_server_path: crate::scene::get_target(stage, path, tokens::ION_SERVER_BINDING),
            alpha: get_f64(stage, path, tokens::ALPHA, d.alpha as f64).clamp(0.0, 1.0) as f32,
            show_credits_on_screen: get_bool(
                stage,
                path,
                tokens::SHOW_CREDITS_ON_SCREEN,
                d.show_credits_on_screen,
            ),
        }
    }
}

/// Render resource pooling and debug switches, authored on the data prim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub disable_materials: bool,
    pub disable_textures: bool,
    pub disable_geometry_pool: bool,
    pub disable_material_pool: bool,
    pub disable_texture_pool: bool,
    pub geometry_pool_initial_capacity: usize,
    pub material_pool_initial_capacity: usize,
    pub texture_pool_initial_capacity: usize,
    pub random_colors: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            disable_materials: false,
            disable_textures: false,
            disable_geometry_pool: false,
            disable_material_pool: false,
            disable_texture_pool: false,
            geometry_pool_initial_capacity: 2048,
            material_pool_initial_capacity: 2048,
            texture_pool_initial_capacity: 2048,
            random_colors: false,
        }
    }
}

impl ResourceConfig {
    /// Reads the debug options from the data prim; an absent prim yields
    /// the defaults.
    pub fn read_from(stage: &dyn SceneHost, data_prim: &ScenePath) -> Self {
        let d = Self::default();
        let capacity = |name: &str, default: usize| {
            get_i64(stage, data_prim, name, default as i64).max(0) as usize
        };
        Self {
            disable_materials: get_bool(stage, data_prim, tokens::DEBUG_DISABLE_MATERIALS, false),
            disable_textures: get_bool(stage, data_prim, tokens::DEBUG_DISABLE_TEXTURES, false),
            disable_geometry_pool: get_bool(stage, data_prim, tokens::DEBUG_DISABLE_GEOMETRY_POOL, false),
            disable_material_pool: get_bool(stage, data_prim, tokens::DEBUG_DISABLE_MATERIAL_POOL, false),
            disable_texture_pool: get_bool(stage, data_prim, tokens::DEBUG_DISABLE_TEXTURE_POOL, false),
            geometry_pool_initial_capacity: capacity(
                tokens::DEBUG_GEOMETRY_POOL_INITIAL_CAPACITY,
                d.geometry_pool_initial_capacity,
            ),
            material_pool_initial_capacity: capacity(
                tokens::DEBUG_MATERIAL_POOL_INITIAL_CAPACITY,
                d.material_pool_initial_capacity,
            ),
            texture_pool_initial_capacity: capacity(
                tokens::DEBUG_TEXTURE_POOL_INITIAL_CAPACITY,
                d.texture_pool_initial_capacity,
            ),
            random_colors: get_bool(stage, data_prim, tokens::DEBUG_RANDOM_COLORS, false),
        }
    }
}

/// Top-level configuration of a streaming context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub resources: ResourceConfig,
    /// Path of the prim carrying the debug options.
    pub data_prim_path: ScenePath,
    /// Georeference used by tilesets without a binding.
    pub default_georeference_path: ScenePath,
    /// Worker thread count for background tile loading (default: all cores).
    pub threads: Option<usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            resources: ResourceConfig::default(),
            data_prim_path: ScenePath::from("/Cesium"),
            default_georeference_path: ScenePath::from("/CesiumGeoreference"),
            threads: None,
        }
    }
}

/// Settings of the headless streaming binary.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub tileset: PathBuf,
    pub frames: u32,
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
    pub camera_distance: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub tileset_options: TilesetOptions,
    pub context: ContextConfig,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            tileset: PathBuf::new(),
            frames: 60,
            longitude: 0.0,
            latitude: 0.0,
            height: 0.0,
            camera_distance: 1000.0,
            viewport_width: 1920.0,
            viewport_height: 1080.0,
            tileset_options: TilesetOptions::default(),
            context: ContextConfig::default(),
            verbose: false,
            json_logs: false,
        }
    }
}

/// CLI argument definition (clap derive).
#[derive(Parser, Debug)]
#[command(
    name = "tileset-streamer",
    about = "Headless view-driven 3D Tiles streamer",
    version
)]
pub struct CliArgs {
    /// Path to a local tileset.json
    #[arg(short = 't', long)]
    pub tileset: PathBuf,

    /// Number of frames to simulate
    #[arg(short = 'n', long, default_value_t = 60)]
    pub frames: u32,

    /// Georeference origin longitude in degrees
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub longitude: f64,

    /// Georeference origin latitude in degrees
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub latitude: f64,

    /// Georeference origin height in metres
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub height: f64,

    /// Camera distance above the origin in metres
    #[arg(long, default_value_t = 1000.0)]
    pub camera_distance: f64,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1920.0)]
    pub width: f64,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 1080.0)]
    pub height_px: f64,

    /// Maximum screen-space error in pixels
    #[arg(long, default_value_t = 16.0)]
    pub maximum_screen_space_error: f64,

    /// Maximum simultaneous tile loads
    #[arg(long, default_value_t = 20)]
    pub max_loads: u32,

    /// Cache budget in megabytes
    #[arg(long, default_value_t = 512)]
    pub cache_mb: u64,

    /// Disable material creation
    #[arg(long)]
    pub no_materials: bool,

    /// Disable texture creation
    #[arg(long)]
    pub no_textures: bool,

    /// Disable render resource pooling
    #[arg(long)]
    pub no_pooling: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Worker thread count (default: all cores)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,
}

impl From<CliArgs> for StreamerConfig {
    fn from(args: CliArgs) -> Self {
        let tileset_options = TilesetOptions {
            source_type: TilesetSourceType::Url,
            url: args.tileset.to_string_lossy().into_owned(),
            maximum_screen_space_error: args.maximum_screen_space_error,
            maximum_simultaneous_tile_loads: args.max_loads,
            maximum_cached_bytes: args.cache_mb * 1024 * 1024,
            ..Default::default()
        };

        let resources = ResourceConfig {
            disable_materials: args.no_materials,
            disable_textures: args.no_textures,
            disable_geometry_pool: args.no_pooling,
            disable_material_pool: args.no_pooling,
            disable_texture_pool: args.no_pooling,
            ..Default::default()
        };

        StreamerConfig {
            tileset: args.tileset,
            frames: args.frames,
            longitude: args.longitude,
            latitude: args.latitude,
            height: args.height,
            camera_distance: args.camera_distance,
            viewport_width: args.width,
            viewport_height: args.height_px,
            tileset_options,
            context: ContextConfig {
                resources,
                threads: args.threads,
                ..Default::default()
            },
            verbose: args.verbose,
            json_logs: args.json_logs,
        }
    }
}
