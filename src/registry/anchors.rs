//! Globe anchors: scene prims whose transform follows a fixed position on
//! the globe through their georeference.

use glam::{DMat4, DQuat, DVec3, EulerRot};
use tracing::{debug, error};

use crate::scene::{get_bool, get_target, AttributeValue, SceneHost, ScenePath};
use crate::tokens;
use crate::transform::ecef::enu_frame;
use crate::transform::{Cartographic, Georeference};

#[derive(Debug, Clone, PartialEq)]
pub struct GlobeAnchor {
    pub path: ScenePath,
    pub georeference_path: ScenePath,
    pub detect_transform_changes: bool,
    pub adjust_orientation: bool,
    /// Anchor-to-ECEF transform; the source of truth every other
    /// representation is derived from.
    pub anchor_to_fixed: DMat4,
}

impl GlobeAnchor {
    fn read_flags(&mut self, stage: &dyn SceneHost, default_georeference: &ScenePath) {
        self.georeference_path = get_target(stage, &self.path, tokens::ANCHOR_GEOREFERENCE_BINDING)
            .unwrap_or_else(|| default_georeference.clone());
        self.detect_transform_changes = get_bool(stage, &self.path, tokens::ANCHOR_DETECT_TRANSFORM_CHANGES, true);
        self.adjust_orientation = get_bool(stage, &self.path, tokens::ANCHOR_ADJUST_ORIENTATION, true);
    }

    fn georeference(&self, stage: &dyn SceneHost) -> Georeference {
        Georeference::read_from(stage, &self.georeference_path)
    }

    pub fn position(&self) -> DVec3 {
        self.anchor_to_fixed.w_axis.truncate()
    }

    pub fn cartographic(&self) -> Cartographic {
        Cartographic::from_ecef(self.position())
    }

    /// Writes the local transform and every derived attribute.
    fn write(&self, stage: &mut dyn SceneHost) {
        let local = self.georeference(stage).ecef_to_local() * self.anchor_to_fixed;
        let (scale, rotation, translation) = self.anchor_to_fixed.to_scale_rotation_translation();
        let (rx, ry, rz) = rotation.to_euler(EulerRot::XYZ);
        let carto = self.cartographic();

        stage.set_attribute(&self.path, tokens::XFORM_OP_TRANSFORM_CESIUM, AttributeValue::Matrix4d(local.to_cols_array()));
        stage.set_attribute(&self.path, tokens::ANCHOR_POSITION, AttributeValue::Vec3d(translation.to_array()));
        stage.set_attribute(
            &self.path,
            tokens::ANCHOR_ROTATION,
            AttributeValue::Vec3d([rx.to_degrees(), ry.to_degrees(), rz.to_degrees()]),
        );
        stage.set_attribute(&self.path, tokens::ANCHOR_SCALE, AttributeValue::Vec3d(scale.to_array()));
        stage.set_attribute(
            &self.path,
            tokens::ANCHOR_GEOGRAPHIC_COORDINATES,
            AttributeValue::Vec3d([carto.longitude, carto.latitude, carto.height]),
        );
    }
}

fn local_transform(stage: &dyn SceneHost, path: &ScenePath) -> DMat4 {
    stage
        .attribute(path, tokens::XFORM_OP_TRANSFORM_CESIUM)
        .and_then(|v| v.as_matrix())
        .map_or(DMat4::IDENTITY, |m| DMat4::from_cols_array(&m))
}

fn vec3_attribute(stage: &dyn SceneHost, path: &ScenePath, name: &str) -> Option<DVec3> {
    stage
        .attribute(path, name)
        .and_then(|v| v.as_vec3d())
        .map(DVec3::from_array)
}

/// Every globe anchor of the stage.
#[derive(Debug, Default)]
pub struct GlobeAnchorRegistry {
    anchors: Vec<GlobeAnchor>,
}

impl GlobeAnchorRegistry {
    /// Registers the anchor at `path`, seeding its fixed transform from the
    /// prim's current local transform. Returns false if already present.
    pub fn add_anchor(&mut self, stage: &mut dyn SceneHost, path: &ScenePath, default_georeference: &ScenePath) -> bool {
        if self.contains(path) {
            return false;
        }
        let mut anchor = GlobeAnchor {
            path: path.clone(),
            georeference_path: default_georeference.clone(),
            detect_transform_changes: true,
            adjust_orientation: true,
            anchor_to_fixed: DMat4::IDENTITY,
        };
        anchor.read_flags(stage, default_georeference);
        anchor.anchor_to_fixed = anchor.georeference(stage).local_to_ecef() * local_transform(stage, path);
        anchor.write(stage);
        debug!(anchor = %path, georeference = %anchor.georeference_path, "Registered globe anchor");
        self.anchors.push(anchor);
        true
    }

    pub fn remove_anchor(&mut self, path: &ScenePath) -> bool {
        let before = self.anchors.len();
        self.anchors.retain(|a| &a.path != path);
        let removed = self.anchors.len() != before;
        if !removed {
            error!(anchor = %path, "Removing a globe anchor that was never registered");
        }
        removed
    }

    pub fn contains(&self, path: &ScenePath) -> bool {
        self.anchor(path).is_some()
    }

    pub fn anchor(&self, path: &ScenePath) -> Option<&GlobeAnchor> {
        self.anchors.iter().find(|a| &a.path == path)
    }

    fn anchor_mut(&mut self, path: &ScenePath) -> Option<&mut GlobeAnchor> {
        self.anchors.iter_mut().find(|a| &a.path == path)
    }

    pub fn paths(&self) -> Vec<ScenePath> {
        self.anchors.iter().map(|a| a.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn clear(&mut self) {
        self.anchors.clear();
    }

    /// Re-derives the local transform of every anchor bound to
    /// `georeference` after its origin moved. Returns how many changed.
    pub fn update_origin(&mut self, stage: &mut dyn SceneHost, georeference: &ScenePath) -> usize {
        let mut updated = 0;
        for anchor in self.anchors.iter().filter(|a| &a.georeference_path == georeference) {
            anchor.write(stage);
            updated += 1;
        }
        debug!(georeference = %georeference, anchors = updated, "Propagated georeference origin");
        updated
    }

    /// The prim's local transform was edited: move the anchor to match.
    pub fn update_by_transform(&mut self, stage: &mut dyn SceneHost, path: &ScenePath) {
        let Some(anchor) = self.anchor_mut(path) else {
            return;
        };
        if !anchor.detect_transform_changes {
            return;
        }
        let local = local_transform(stage, path);
        anchor.anchor_to_fixed = anchor.georeference(stage).local_to_ecef() * local;
        anchor.write(stage);
    }

    /// The longitude/latitude/height was edited. When orientation
    /// adjustment is on, the anchor keeps its orientation relative to the
    /// local horizon.
    pub fn update_by_geographic_coordinates(&mut self, stage: &mut dyn SceneHost, path: &ScenePath) {
        let Some(anchor) = self.anchor_mut(path) else {
            return;
        };
        let Some(coords) = vec3_attribute(stage, path, tokens::ANCHOR_GEOGRAPHIC_COORDINATES) else {
            return;
        };
        let old = anchor.cartographic();
        let new_frame = enu_frame(coords.x, coords.y, coords.z);
        if anchor.adjust_orientation {
            let old_frame = enu_frame(old.longitude, old.latitude, old.height);
            anchor.anchor_to_fixed = new_frame * old_frame.inverse() * anchor.anchor_to_fixed;
        } else {
            anchor.anchor_to_fixed.w_axis = new_frame.w_axis;
        }
        anchor.write(stage);
    }

    /// Position, rotation or scale in the fixed frame was edited.
    pub fn update_by_fixed_transform(&mut self, stage: &mut dyn SceneHost, path: &ScenePath) {
        let Some(anchor) = self.anchor_mut(path) else {
            return;
        };
        let (scale, rotation, translation) = anchor.anchor_to_fixed.to_scale_rotation_translation();
        let translation = vec3_attribute(stage, path, tokens::ANCHOR_POSITION).unwrap_or(translation);
        let scale = vec3_attribute(stage, path, tokens::ANCHOR_SCALE).unwrap_or(scale);
        let rotation = vec3_attribute(stage, path, tokens::ANCHOR_ROTATION).map_or(rotation, |r| {
            DQuat::from_euler(EulerRot::XYZ, r.x.to_radians(), r.y.to_radians(), r.z.to_radians())
        });
        anchor.anchor_to_fixed = DMat4::from_scale_rotation_translation(scale, rotation, translation);
        anchor.write(stage);
    }

    /// Binding or behavior flags were edited.
    pub fn update_settings(&mut self, stage: &mut dyn SceneHost, path: &ScenePath, default_georeference: &ScenePath) {
        let Some(anchor) = self.anchor_mut(path) else {
            return;
        };
        anchor.read_flags(stage, default_georeference);
        anchor.write(stage);
    }
}
