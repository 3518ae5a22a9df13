//! The scene-graph host the streamer writes into.
//!
//! The host owns prims, their attributes and the dynamic textures uploaded
//! for tile imagery. Everything in this crate that mutates the scene goes
//! through [`SceneHost`].

pub mod memory;
pub mod path;
pub mod value;

pub use memory::{MemoryStage, Mutation, MutationKind};
pub use path::ScenePath;
pub use value::AttributeValue;

/// Identifier of a loaded stage. A new id is issued every time the host
/// tears down and reloads its stage.
pub type StageId = i64;

/// Stage id meaning "no stage attached".
pub const NO_STAGE: StageId = -1;

/// Prefix of asset paths that refer to host-side dynamic textures.
pub const DYNAMIC_TEXTURE_PREFIX: &str = "dynamic://";

pub trait SceneHost {
    fn stage_id(&self) -> StageId;

    fn prim_exists(&self, path: &ScenePath) -> bool;
    fn type_name(&self, path: &ScenePath) -> Option<String>;
    fn has_api(&self, path: &ScenePath, api: &str) -> bool;
    /// Direct children of `path`.
    fn children(&self, path: &ScenePath) -> Vec<ScenePath>;
    /// Every prim on the stage, parents before children.
    fn traverse(&self) -> Vec<ScenePath>;

    fn create_prim(&mut self, path: &ScenePath, type_name: &str);
    /// Removes the prim and its whole subtree.
    fn destroy_prim(&mut self, path: &ScenePath);

    fn attribute(&self, path: &ScenePath, name: &str) -> Option<AttributeValue>;
    fn attribute_names(&self, path: &ScenePath) -> Vec<String>;
    fn set_attribute(&mut self, path: &ScenePath, name: &str, value: AttributeValue);

    /// Uploads RGBA8 pixels to the dynamic texture `name`, replacing any
    /// previous contents.
    fn upload_texture(&mut self, name: &str, width: u32, height: u32, rgba: &[u8]);
    fn release_texture(&mut self, name: &str);
}

/// Asset path under which the host exposes dynamic texture `name`.
pub fn dynamic_texture_asset(name: &str) -> String {
    format!("{DYNAMIC_TEXTURE_PREFIX}{name}")
}

pub fn get_bool(stage: &dyn SceneHost, path: &ScenePath, name: &str, default: bool) -> bool {
    stage
        .attribute(path, name)
        .and_then(|v| v.as_bool())
        .unwrap_or(default)
}

pub fn get_f64(stage: &dyn SceneHost, path: &ScenePath, name: &str, default: f64) -> f64 {
    stage
        .attribute(path, name)
        .and_then(|v| v.as_float())
        .unwrap_or(default)
}

pub fn get_i64(stage: &dyn SceneHost, path: &ScenePath, name: &str, default: i64) -> i64 {
    stage
        .attribute(path, name)
        .and_then(|v| v.as_int())
        .unwrap_or(default)
}

pub fn get_string(stage: &dyn SceneHost, path: &ScenePath, name: &str) -> Option<String> {
    stage
        .attribute(path, name)
        .and_then(|v| v.as_str().map(str::to_string))
}

/// First target of relationship `name`, if any.
pub fn get_target(stage: &dyn SceneHost, path: &ScenePath, name: &str) -> Option<ScenePath> {
    stage
        .attribute(path, name)
        .and_then(|v| v.as_paths().and_then(|p| p.first().cloned()))
}

/// Whether the prim at `path` has the given type name.
pub fn is_type(stage: &dyn SceneHost, path: &ScenePath, type_name: &str) -> bool {
    stage.type_name(path).as_deref() == Some(type_name)
}
