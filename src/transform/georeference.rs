use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

use super::ecef::{ecef_to_geodetic, enu_frame, geodetic_to_ecef};
use crate::scene::{get_f64, SceneHost, ScenePath};
use crate::tokens;

/// Geographic position in degrees and metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    pub fn to_ecef(&self) -> DVec3 {
        DVec3::from_array(geodetic_to_ecef(self.longitude, self.latitude, self.height))
    }

    pub fn from_ecef(ecef: DVec3) -> Self {
        let [longitude, latitude, height] = ecef_to_geodetic(ecef.to_array());
        Self {
            longitude,
            latitude,
            height,
        }
    }
}

/// Anchors the scene's local Z-up frame to a point on the globe: scene
/// coordinates are metres East-North-Up from the origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Georeference {
    pub origin: Cartographic,
}

impl Georeference {
    pub fn new(origin: Cartographic) -> Self {
        Self { origin }
    }

    /// Reads the origin from a georeference prim; missing attributes are 0.
    pub fn read_from(stage: &dyn SceneHost, path: &ScenePath) -> Self {
        Self {
            origin: Cartographic::new(
                get_f64(stage, path, tokens::GEOREFERENCE_ORIGIN_LONGITUDE, 0.0),
                get_f64(stage, path, tokens::GEOREFERENCE_ORIGIN_LATITUDE, 0.0),
                get_f64(stage, path, tokens::GEOREFERENCE_ORIGIN_HEIGHT, 0.0),
            ),
        }
    }

    pub fn local_to_ecef(&self) -> DMat4 {
        enu_frame(self.origin.longitude, self.origin.latitude, self.origin.height)
    }

    pub fn ecef_to_local(&self) -> DMat4 {
        self.local_to_ecef().inverse()
    }
}
