//! Registries of stage objects the streamer tracks: tilesets and imagery,
//! ion server sessions and globe anchors.
//!
//! They are plain values owned by the [`crate::context::Context`] and
//! passed down explicitly, so tests can build isolated instances.

pub mod anchors;
pub mod assets;
pub mod sessions;

pub use anchors::{GlobeAnchor, GlobeAnchorRegistry};
pub use assets::{AssetRegistry, ImageryEntry};
pub use sessions::{IonSession, SessionRegistry};

#[derive(Default)]
pub struct Registries {
    pub assets: AssetRegistry,
    pub sessions: SessionRegistry,
    pub anchors: GlobeAnchorRegistry,
}
