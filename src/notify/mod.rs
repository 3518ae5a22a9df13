//! Buffers scene change notifications and replays them once per frame.
//!
//! The host reports changes while it is in the middle of editing the
//! stage, which is no time to tear down tilesets. Records are collected
//! here and drained by the [`crate::context::Context`] at the next frame
//! boundary: all additions, then all removals, then all property changes.

pub mod dispatch;

use serde::Serialize;
use tracing::trace;

use crate::registry::Registries;
use crate::scene::{is_type, SceneHost, ScenePath};
use crate::tokens;

pub use dispatch::{property_action, PropertyAction};

/// Kind of prim a change concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PrimType {
    Tileset,
    Imagery,
    Georeference,
    GlobeAnchor,
    IonServer,
    /// A shader of a material bound to a tileset.
    Shader,
    /// The prim carrying debug options.
    Data,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    PropertyChanged(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub path: ScenePath,
    pub prim_type: PrimType,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Collecting,
    Draining,
}

/// The records of one frame, in insertion order per list.
#[derive(Debug, Default)]
pub struct PendingChanges {
    pub added: Vec<ChangeRecord>,
    pub removed: Vec<ChangeRecord>,
    pub changed: Vec<ChangeRecord>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}

/// Something a drain pass did, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainAction {
    RegisterTileset(ScenePath),
    RegisterImagery(ScenePath),
    RegisterSession(ScenePath),
    RegisterAnchor(ScenePath),
    RemoveTileset(ScenePath),
    RemoveImagery(ScenePath),
    RemoveSession(ScenePath),
    RemoveAnchor(ScenePath),
    ReloadTileset(ScenePath),
    UpdateTilesetOptions(ScenePath),
    UpdateDisplayColorAndOpacity(ScenePath),
    UpdateImageryLayerAlpha { tileset: ScenePath, index: usize },
    UpdateGeoreferenceOrigin { georeference: ScenePath, anchors: usize },
    UpdateAnchor(ScenePath),
    UpdateShaderInput { shader: ScenePath, property: String, materials: usize },
    ReloadStage,
}

/// Type of a prim that currently exists on the stage.
pub fn classify(stage: &dyn SceneHost, registries: &Registries, path: &ScenePath) -> PrimType {
    match stage.type_name(path).as_deref() {
        Some(tokens::TILESET_PRIM) => PrimType::Tileset,
        Some(tokens::IMAGERY_PRIM) => PrimType::Imagery,
        Some(tokens::GEOREFERENCE_PRIM) => PrimType::Georeference,
        Some(tokens::ION_SERVER_PRIM) => PrimType::IonServer,
        Some(tokens::DATA_PRIM) => PrimType::Data,
        Some(tokens::SHADER_PRIM) if is_tileset_shader(stage, registries, path) => PrimType::Shader,
        _ if stage.has_api(path, tokens::GLOBE_ANCHOR_API) => PrimType::GlobeAnchor,
        _ => PrimType::Other,
    }
}

fn is_tileset_shader(stage: &dyn SceneHost, registries: &Registries, path: &ScenePath) -> bool {
    let material = path.parent();
    is_type(stage, &material, tokens::MATERIAL_PRIM)
        && registries
            .assets
            .tilesets()
            .any(|t| t.options().material_path.as_ref() == Some(&material))
}

/// Type of a prim that is gone, from what the registries remember.
pub fn classify_removed(registries: &Registries, path: &ScenePath) -> PrimType {
    if registries.assets.is_tileset(path) {
        PrimType::Tileset
    } else if registries.assets.is_imagery(path) {
        PrimType::Imagery
    } else if registries.anchors.contains(path) {
        PrimType::GlobeAnchor
    } else if registries.sessions.exists(path) {
        PrimType::IonServer
    } else {
        PrimType::Other
    }
}

#[derive(Debug, Default)]
pub struct NotificationPipeline {
    state: PipelineState,
    pending: PendingChanges,
}

impl NotificationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Records one batch of host notifications. `resynced` are structural
    /// changes (prims added, moved or removed); `changed_info` are
    /// property paths whose values changed.
    pub fn on_objects_changed(
        &mut self,
        stage: &dyn SceneHost,
        registries: &Registries,
        resynced: &[ScenePath],
        changed_info: &[ScenePath],
    ) {
        self.state = PipelineState::Collecting;
        for path in resynced {
            if path.is_property_path() {
                self.enqueue_property(stage, registries, path);
            } else if stage.prim_exists(path) {
                self.enqueue_added(stage, registries, path);
            } else {
                self.enqueue_removed(registries, path);
            }
        }
        for path in changed_info {
            self.enqueue_property(stage, registries, path);
        }
    }

    /// Queues every existing object of a freshly opened stage: ion servers
    /// first so tilesets can resolve their server, then tilesets, imagery
    /// and anchors.
    pub fn on_stage_loaded(&mut self, stage: &dyn SceneHost, registries: &Registries) {
        self.state = PipelineState::Collecting;
        let by_type: Vec<(PrimType, ScenePath)> = stage
            .traverse()
            .into_iter()
            .map(|path| (classify(stage, registries, &path), path))
            .collect();
        let order = [
            PrimType::IonServer,
            PrimType::Data,
            PrimType::Tileset,
            PrimType::Imagery,
            PrimType::GlobeAnchor,
        ];
        for prim_type in order {
            for (_, path) in by_type.iter().filter(|(t, _)| *t == prim_type) {
                if prim_type == PrimType::Tileset && registries.assets.is_tileset(path) {
                    continue;
                }
                self.push_added(path.clone(), prim_type);
            }
        }
    }

    fn enqueue_added(&mut self, stage: &dyn SceneHost, registries: &Registries, path: &ScenePath) {
        let prim_type = classify(stage, registries, path);
        let already_registered = prim_type == PrimType::Tileset && registries.assets.is_tileset(path);
        if !already_registered && !matches!(prim_type, PrimType::Other | PrimType::Shader) {
            self.push_added(path.clone(), prim_type);
        }
        for child in stage.children(path) {
            self.enqueue_added(stage, registries, &child);
        }
    }

    /// The prim is gone, so its subtree is recovered from the registries.
    fn enqueue_removed(&mut self, registries: &Registries, path: &ScenePath) {
        let known = registries
            .assets
            .tileset_paths()
            .into_iter()
            .chain(registries.assets.imagery_paths())
            .chain(registries.anchors.paths())
            .chain(registries.sessions.server_paths());
        let mut removed: Vec<ScenePath> = known.filter(|p| p.has_prefix(path)).collect();
        removed.sort();
        removed.dedup();
        for p in removed {
            let prim_type = classify_removed(registries, &p);
            self.push(ChangeRecord {
                path: p,
                prim_type,
                kind: ChangeKind::Removed,
            });
        }
    }

    fn enqueue_property(&mut self, stage: &dyn SceneHost, registries: &Registries, path: &ScenePath) {
        let Some(property) = path.property_name() else {
            return;
        };
        let owner = path.prim_path();
        if !stage.prim_exists(&owner) {
            return;
        }
        let prim_type = classify(stage, registries, &owner);
        if prim_type == PrimType::Other {
            return;
        }
        if prim_type == PrimType::Shader && is_connected_input(stage, &owner, property) {
            return;
        }
        self.push(ChangeRecord {
            path: owner,
            prim_type,
            kind: ChangeKind::PropertyChanged(property.to_string()),
        });
    }

    fn push_added(&mut self, path: ScenePath, prim_type: PrimType) {
        self.push(ChangeRecord {
            path,
            prim_type,
            kind: ChangeKind::Added,
        });
    }

    fn push(&mut self, record: ChangeRecord) {
        let list = match record.kind {
            ChangeKind::Added => &mut self.pending.added,
            ChangeKind::Removed => &mut self.pending.removed,
            ChangeKind::PropertyChanged(_) => &mut self.pending.changed,
        };
        if list.contains(&record) {
            return;
        }
        trace!(path = %record.path, prim_type = ?record.prim_type, kind = ?record.kind, "Queued change");
        list.push(record);
    }

    /// Closes collection for this frame and hands over its records.
    pub fn begin_drain(&mut self) -> PendingChanges {
        self.state = PipelineState::Draining;
        std::mem::take(&mut self.pending)
    }

    pub fn end_drain(&mut self) {
        self.state = PipelineState::Idle;
    }

    /// Drops everything queued, e.g. when the stage goes away.
    pub fn clear(&mut self) {
        self.pending = PendingChanges::default();
        self.state = PipelineState::Idle;
    }
}

/// Shader inputs driven by a connection are not plain values to copy.
fn is_connected_input(stage: &dyn SceneHost, shader: &ScenePath, property: &str) -> bool {
    property.ends_with(tokens::CONNECT_SUFFIX)
        || !property.starts_with(tokens::INPUTS_PREFIX)
        || stage
            .attribute(shader, &format!("{property}{}", tokens::CONNECT_SUFFIX))
            .is_some()
}
